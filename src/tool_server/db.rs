//! SQLite product catalog backing the tool server.
//!
//! Uses `rusqlite` synchronously; the server handles one request at a time.
//! Expiry dates are stored as `YYYY-MM-DD` text, which sorts chronologically.

use chrono::NaiveDate;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::Serialize;

use super::errors::ToolServerError;

/// Date format of the `expiry_date` column and of tool arguments.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

const PRODUCT_COLUMNS: &str = "id, name, category, price, bar_code, expiry_date, manufacturer";

// ─── Types ──────────────────────────────────────────────────────────────────

/// A stored product.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Product {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub price: f64,
    pub bar_code: String,
    pub expiry_date: NaiveDate,
    pub manufacturer: String,
}

/// Fields of a product that is not stored yet.
#[derive(Debug, Clone, PartialEq)]
pub struct NewProduct {
    pub name: String,
    pub category: String,
    pub price: f64,
    pub bar_code: String,
    pub expiry_date: NaiveDate,
    pub manufacturer: String,
}

impl NewProduct {
    fn sample(
        name: &str,
        category: &str,
        price: f64,
        bar_code: &str,
        (y, m, d): (i32, u32, u32),
        manufacturer: &str,
    ) -> Option<Self> {
        Some(Self {
            name: name.to_string(),
            category: category.to_string(),
            price,
            bar_code: bar_code.to_string(),
            expiry_date: NaiveDate::from_ymd_opt(y, m, d)?,
            manufacturer: manufacturer.to_string(),
        })
    }
}

/// The sample catalog inserted by [`ProductStore::seed_products`].
pub fn sample_products() -> Vec<NewProduct> {
    [
        NewProduct::sample("Whole Milk 1L", "Dairy", 1.29, "7891000100103", (2024, 3, 10), "Green Valley"),
        NewProduct::sample("Greek Yogurt", "Dairy", 0.99, "7891000100202", (2030, 6, 30), "Green Valley"),
        NewProduct::sample("Cheddar Cheese 200g", "Dairy", 3.49, "7891000100301", (2030, 9, 15), "Highland Creamery"),
        NewProduct::sample("Sourdough Bread", "Bakery", 4.25, "7891000200109", (2024, 1, 5), "Baker Street Co."),
        NewProduct::sample("Croissant 4-pack", "Bakery", 3.75, "7891000200208", (2030, 2, 1), "Baker Street Co."),
        NewProduct::sample("Orange Juice 1L", "Beverages", 2.89, "7891000300105", (2030, 11, 20), "Sunny Farms"),
        NewProduct::sample("Sparkling Water 500ml", "Beverages", 0.79, "7891000300204", (2031, 4, 1), "Clear Springs"),
        NewProduct::sample("Ground Coffee 250g", "Beverages", 6.49, "7891000300303", (2031, 1, 31), "Mountain Roast"),
        NewProduct::sample("Spaghetti 500g", "Pantry", 1.59, "7891000400101", (2031, 8, 1), "Casa Italia"),
        NewProduct::sample("Tomato Sauce 340g", "Pantry", 2.19, "7891000400200", (2023, 12, 31), "Casa Italia"),
        NewProduct::sample("Basmati Rice 1kg", "Pantry", 3.99, "7891000400309", (2032, 5, 10), "Golden Grain"),
        NewProduct::sample("Chicken Breast 1kg", "Meat", 8.90, "7891000500107", (2024, 7, 20), "Farm Fresh"),
    ]
    .into_iter()
    .flatten()
    .collect()
}

// ─── Store ──────────────────────────────────────────────────────────────────

/// SQLite handle for the product catalog.
pub struct ProductStore {
    conn: Connection,
}

impl ProductStore {
    /// Open (or create) the database at `path` and create the schema.
    ///
    /// Pass `":memory:"` for an in-memory database.
    pub fn open(path: &str) -> Result<Self, ToolServerError> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        let store = Self { conn };
        store.init_db()?;
        Ok(store)
    }

    /// Create the `products` table if it does not exist.
    pub fn init_db(&self) -> Result<(), ToolServerError> {
        self.conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS products (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                name TEXT NOT NULL,
                category TEXT NOT NULL,
                price REAL NOT NULL,
                bar_code TEXT NOT NULL UNIQUE,
                expiry_date TEXT NOT NULL,
                manufacturer TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_products_category ON products(category);
            ",
        )?;
        Ok(())
    }

    /// Insert the sample catalog. Products whose bar code is already
    /// present are skipped. Returns how many rows were inserted.
    pub fn seed_products(&self) -> Result<usize, ToolServerError> {
        let mut inserted = 0;
        for product in sample_products() {
            let bar_code = product.bar_code.clone();
            let (_, created) = self.get_or_create(&bar_code, &product)?;
            if created {
                inserted += 1;
            }
        }
        tracing::debug!(inserted, "seeded product catalog");
        Ok(inserted)
    }

    /// Fetch the product with `bar_code`, or insert `defaults` under that
    /// bar code. The flag is `true` when a row was created.
    pub fn get_or_create(
        &self,
        bar_code: &str,
        defaults: &NewProduct,
    ) -> Result<(Product, bool), ToolServerError> {
        if let Some(existing) = self.find_by_bar_code(bar_code)? {
            return Ok((existing, false));
        }
        let product = self.insert(&NewProduct {
            bar_code: bar_code.to_string(),
            ..defaults.clone()
        })?;
        Ok((product, true))
    }

    /// Insert a product and return it with its assigned id.
    pub fn insert(&self, product: &NewProduct) -> Result<Product, ToolServerError> {
        self.conn.execute(
            "INSERT INTO products (name, category, price, bar_code, expiry_date, manufacturer)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                product.name,
                product.category,
                product.price,
                product.bar_code,
                product.expiry_date.format(DATE_FORMAT).to_string(),
                product.manufacturer,
            ],
        )?;
        Ok(Product {
            id: self.conn.last_insert_rowid(),
            name: product.name.clone(),
            category: product.category.clone(),
            price: product.price,
            bar_code: product.bar_code.clone(),
            expiry_date: product.expiry_date,
            manufacturer: product.manufacturer.clone(),
        })
    }

    // ─── Queries ────────────────────────────────────────────────────────

    pub fn find_by_bar_code(&self, bar_code: &str) -> Result<Option<Product>, ToolServerError> {
        let raw = self
            .conn
            .query_row(
                &format!("SELECT {PRODUCT_COLUMNS} FROM products WHERE bar_code = ?1"),
                params![bar_code],
                RawProduct::from_row,
            )
            .optional()?;
        raw.map(RawProduct::into_product).transpose()
    }

    /// First product whose name contains `name`, case-insensitively.
    pub fn find_by_name(&self, name: &str) -> Result<Option<Product>, ToolServerError> {
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {PRODUCT_COLUMNS} FROM products
                     WHERE instr(lower(name), lower(?1)) > 0 ORDER BY id LIMIT 1"
                ),
                params![name],
                RawProduct::from_row,
            )
            .optional()?;
        raw.map(RawProduct::into_product).transpose()
    }

    /// Products whose category contains `category`, case-insensitively.
    pub fn by_category(&self, category: &str) -> Result<Vec<Product>, ToolServerError> {
        self.query_products(
            &format!(
                "SELECT {PRODUCT_COLUMNS} FROM products
                 WHERE instr(lower(category), lower(?1)) > 0 ORDER BY id"
            ),
            category,
        )
    }

    /// Products whose manufacturer contains `manufacturer`, case-insensitively.
    pub fn by_manufacturer(&self, manufacturer: &str) -> Result<Vec<Product>, ToolServerError> {
        self.query_products(
            &format!(
                "SELECT {PRODUCT_COLUMNS} FROM products
                 WHERE instr(lower(manufacturer), lower(?1)) > 0 ORDER BY id"
            ),
            manufacturer,
        )
    }

    /// Products that expired strictly before `today`.
    pub fn expired(&self, today: NaiveDate) -> Result<Vec<Product>, ToolServerError> {
        self.query_products(
            &format!(
                "SELECT {PRODUCT_COLUMNS} FROM products
                 WHERE expiry_date < ?1 ORDER BY expiry_date, id"
            ),
            &today.format(DATE_FORMAT).to_string(),
        )
    }

    /// Set the price of the product with `bar_code`.
    ///
    /// Returns the product (with its new price) and the old price, or `None`
    /// if no product has that bar code.
    pub fn update_price(
        &self,
        bar_code: &str,
        new_price: f64,
    ) -> Result<Option<(Product, f64)>, ToolServerError> {
        let Some(mut product) = self.find_by_bar_code(bar_code)? else {
            return Ok(None);
        };
        self.conn.execute(
            "UPDATE products SET price = ?1 WHERE id = ?2",
            params![new_price, product.id],
        )?;
        let old_price = product.price;
        product.price = new_price;
        Ok(Some((product, old_price)))
    }

    /// Distinct categories, sorted.
    pub fn categories(&self) -> Result<Vec<String>, ToolServerError> {
        self.distinct("category")
    }

    /// Distinct manufacturers, sorted.
    pub fn manufacturers(&self) -> Result<Vec<String>, ToolServerError> {
        self.distinct("manufacturer")
    }

    pub fn count(&self) -> Result<i64, ToolServerError> {
        Ok(self
            .conn
            .query_row("SELECT COUNT(*) FROM products", [], |row| row.get(0))?)
    }

    fn query_products(&self, sql: &str, param: &str) -> Result<Vec<Product>, ToolServerError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params![param], RawProduct::from_row)?;
        let mut products = Vec::new();
        for raw in rows {
            products.push(raw?.into_product()?);
        }
        Ok(products)
    }

    fn distinct(&self, column: &'static str) -> Result<Vec<String>, ToolServerError> {
        let mut stmt = self
            .conn
            .prepare(&format!("SELECT DISTINCT {column} FROM products ORDER BY {column}"))?;
        let values = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(values)
    }
}

/// A row as read from SQLite, before the date is parsed.
struct RawProduct {
    id: i64,
    name: String,
    category: String,
    price: f64,
    bar_code: String,
    expiry_date: String,
    manufacturer: String,
}

impl RawProduct {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            name: row.get(1)?,
            category: row.get(2)?,
            price: row.get(3)?,
            bar_code: row.get(4)?,
            expiry_date: row.get(5)?,
            manufacturer: row.get(6)?,
        })
    }

    fn into_product(self) -> Result<Product, ToolServerError> {
        let expiry_date = NaiveDate::parse_from_str(&self.expiry_date, DATE_FORMAT).map_err(|e| {
            ToolServerError::CorruptRow {
                id: self.id,
                reason: format!("bad expiry_date '{}': {e}", self.expiry_date),
            }
        })?;
        Ok(Product {
            id: self.id,
            name: self.name,
            category: self.category,
            price: self.price,
            bar_code: self.bar_code,
            expiry_date,
            manufacturer: self.manufacturer,
        })
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────
