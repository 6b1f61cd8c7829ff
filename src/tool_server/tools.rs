//! Product tools: definitions advertised by `tools/list` and their handlers.
//!
//! Every tool answers with formatted text. Argument problems and rejected
//! writes come back as tool-level errors (`isError: true`) so the model can
//! see and relay them.

use chrono::NaiveDate;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use super::db::{NewProduct, Product, ProductStore, DATE_FORMAT};
use super::errors::ToolServerError;
use crate::mcp_client::{CallToolResult, McpToolDefinition};

// ─── Definitions ────────────────────────────────────────────────────────────

fn string_prop(description: &str) -> serde_json::Value {
    serde_json::json!({"type": "string", "description": description})
}

fn number_prop(description: &str) -> serde_json::Value {
    serde_json::json!({"type": "number", "description": description})
}

fn object_schema(properties: &[(&str, serde_json::Value)]) -> serde_json::Value {
    let props: serde_json::Map<String, serde_json::Value> = properties
        .iter()
        .map(|(name, schema)| (name.to_string(), schema.clone()))
        .collect();
    let required: Vec<&str> = properties.iter().map(|(name, _)| *name).collect();
    serde_json::json!({
        "type": "object",
        "properties": props,
        "required": required,
    })
}

fn tool(name: &str, description: &str, input_schema: serde_json::Value) -> McpToolDefinition {
    McpToolDefinition {
        name: name.to_string(),
        description: description.to_string(),
        input_schema,
    }
}

/// Every tool this server exposes, in a stable order.
pub fn definitions() -> Vec<McpToolDefinition> {
    vec![
        tool(
            "query_product_by_name",
            "Look up a product by name and return its details as formatted text",
            object_schema(&[("name", string_prop("Full or partial product name"))]),
        ),
        tool(
            "get_products_by_category",
            "List the products in a category",
            object_schema(&[("category", string_prop("Product category"))]),
        ),
        tool(
            "get_expired_products",
            "List the products whose expiry date has passed",
            object_schema(&[]),
        ),
        tool(
            "update_product_price",
            "Update the price of a product identified by its bar code",
            object_schema(&[
                ("bar_code", string_prop("Bar code of the product")),
                ("new_price", number_prop("New price")),
            ]),
        ),
        tool(
            "add_new_product",
            "Add a new product to the catalog",
            object_schema(&[
                ("name", string_prop("Product name")),
                ("category", string_prop("Product category")),
                ("price", number_prop("Price")),
                ("bar_code", string_prop("Unique bar code")),
                ("expiry_date", string_prop("Expiry date, YYYY-MM-DD")),
                ("manufacturer", string_prop("Manufacturer name")),
            ]),
        ),
        tool(
            "get_products_by_manufacturer",
            "List the products made by a manufacturer",
            object_schema(&[("manufacturer", string_prop("Manufacturer name"))]),
        ),
        tool(
            "get_product_categories",
            "List every product category",
            object_schema(&[]),
        ),
        tool(
            "get_product_manufacturers",
            "List every manufacturer",
            object_schema(&[]),
        ),
    ]
}

// ─── Arguments ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct NameArgs {
    name: String,
}

#[derive(Deserialize)]
struct CategoryArgs {
    category: String,
}

#[derive(Deserialize)]
struct ManufacturerArgs {
    manufacturer: String,
}

#[derive(Deserialize)]
struct UpdatePriceArgs {
    bar_code: String,
    new_price: f64,
}

#[derive(Deserialize)]
struct AddProductArgs {
    name: String,
    category: String,
    price: f64,
    bar_code: String,
    expiry_date: String,
    manufacturer: String,
}

fn parse_args<T: DeserializeOwned>(tool: &str, args: &serde_json::Value) -> Result<T, CallToolResult> {
    let args = if args.is_null() {
        serde_json::Value::Object(Default::default())
    } else {
        args.clone()
    };
    serde_json::from_value(args)
        .map_err(|e| CallToolResult::error(format!("Invalid arguments for '{tool}': {e}")))
}

// ─── Dispatch ───────────────────────────────────────────────────────────────

/// Run one tool against the store.
///
/// `today` decides which products count as expired. Only an unknown tool
/// name or a database failure is an `Err`.
pub fn call(
    store: &ProductStore,
    name: &str,
    args: &serde_json::Value,
    today: NaiveDate,
) -> Result<CallToolResult, ToolServerError> {
    macro_rules! args {
        ($ty:ty) => {
            match parse_args::<$ty>(name, args) {
                Ok(parsed) => parsed,
                Err(result) => return Ok(result),
            }
        };
    }

    let text = match name {
        "query_product_by_name" => {
            let a = args!(NameArgs);
            match store.find_by_name(&a.name)? {
                Some(p) => product_details(&p),
                None => format!("Product named '{}' not found.", a.name),
            }
        }
        "get_products_by_category" => {
            let a = args!(CategoryArgs);
            let products = store.by_category(&a.category)?;
            if products.is_empty() {
                format!("No products found in category '{}'.", a.category)
            } else {
                bullet_list(
                    &format!("Products in category '{}':", a.category),
                    products.iter().map(|p| {
                        format!("{} (Manufacturer: {}, Price: ${:.2})", p.name, p.manufacturer, p.price)
                    }),
                )
            }
        }
        "get_expired_products" => {
            let products = store.expired(today)?;
            if products.is_empty() {
                "No expired products found.".to_string()
            } else {
                bullet_list(
                    "Expired products:",
                    products.iter().map(|p| {
                        format!(
                            "{} (Expiry date: {}, Bar code: {})",
                            p.name,
                            p.expiry_date.format(DATE_FORMAT),
                            p.bar_code
                        )
                    }),
                )
            }
        }
        "update_product_price" => {
            let a = args!(UpdatePriceArgs);
            if !a.new_price.is_finite() || a.new_price < 0.0 {
                return Ok(CallToolResult::error(format!(
                    "Invalid price {}: must be a non-negative number.",
                    a.new_price
                )));
            }
            match store.update_price(&a.bar_code, a.new_price)? {
                Some((p, old)) => format!(
                    "Price of product '{}' (Bar code: {}) updated from ${:.2} to ${:.2}.",
                    p.name, p.bar_code, old, p.price
                ),
                None => format!("Product with bar code '{}' not found.", a.bar_code),
            }
        }
        "add_new_product" => {
            let a = args!(AddProductArgs);
            if store.find_by_bar_code(&a.bar_code)?.is_some() {
                return Ok(CallToolResult::error(format!(
                    "Product with bar code '{}' already exists.",
                    a.bar_code
                )));
            }
            let Ok(expiry_date) = NaiveDate::parse_from_str(&a.expiry_date, DATE_FORMAT) else {
                return Ok(CallToolResult::error(
                    "Invalid expiry date. Use the 'YYYY-MM-DD' format.",
                ));
            };
            if !a.price.is_finite() || a.price < 0.0 {
                return Ok(CallToolResult::error(format!(
                    "Invalid price {}: must be a non-negative number.",
                    a.price
                )));
            }
            let p = store.insert(&NewProduct {
                name: a.name,
                category: a.category,
                price: a.price,
                bar_code: a.bar_code,
                expiry_date,
                manufacturer: a.manufacturer,
            })?;
            format!(
                "Product '{}' (ID: {}, Bar code: {}) added successfully.",
                p.name, p.id, p.bar_code
            )
        }
        "get_products_by_manufacturer" => {
            let a = args!(ManufacturerArgs);
            let products = store.by_manufacturer(&a.manufacturer)?;
            if products.is_empty() {
                format!("No products found from manufacturer '{}'.", a.manufacturer)
            } else {
                bullet_list(
                    &format!("Products from manufacturer '{}':", a.manufacturer),
                    products.iter().map(|p| {
                        format!(
                            "{} (Category: {}, Price: ${:.2}, Bar code: {})",
                            p.name, p.category, p.price, p.bar_code
                        )
                    }),
                )
            }
        }
        "get_product_categories" => {
            let categories = store.categories()?;
            if categories.is_empty() {
                "No product categories found.".to_string()
            } else {
                bullet_list("Available product categories:", categories.into_iter())
            }
        }
        "get_product_manufacturers" => {
            let manufacturers = store.manufacturers()?;
            if manufacturers.is_empty() {
                "No manufacturers found.".to_string()
            } else {
                bullet_list("Available manufacturers:", manufacturers.into_iter())
            }
        }
        other => {
            return Err(ToolServerError::UnknownTool {
                name: other.to_string(),
            })
        }
    };

    Ok(CallToolResult::text(text))
}

// ─── Formatting ─────────────────────────────────────────────────────────────

fn product_details(p: &Product) -> String {
    [
        "Product information:".to_string(),
        format!("Name: {}", p.name),
        format!("Category: {}", p.category),
        format!("Price: {:.2}", p.price),
        format!("Expiry date: {}", p.expiry_date.format(DATE_FORMAT)),
        format!("Manufacturer: {}", p.manufacturer),
        format!("Bar code: {}", p.bar_code),
    ]
    .join("\n")
}

fn bullet_list(header: &str, items: impl Iterator<Item = String>) -> String {
    let mut lines = vec![header.to_string()];
    lines.extend(items.map(|item| format!(" - {item}")));
    lines.join("\n")
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ProductStore {
        let store = ProductStore::open(":memory:").unwrap();
        store.seed_products().unwrap();
        store
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()
    }

    fn run(store: &ProductStore, name: &str, args: serde_json::Value) -> CallToolResult {
        call(store, name, &args, today()).unwrap()
    }

    fn text(result: &CallToolResult) -> String {
        result.texts().collect::<Vec<_>>().join("\n")
    }

    #[test]
    fn test_definitions_are_unique_objects() {
        let defs = definitions();
        assert_eq!(defs.len(), 8);
        let mut names: Vec<_> = defs.iter().map(|d| d.name.as_str()).collect();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), 8);
        for def in &defs {
            assert_eq!(def.input_schema["type"], "object");
        }
        let add = defs.iter().find(|d| d.name == "add_new_product").unwrap();
        assert_eq!(add.input_schema["required"].as_array().unwrap().len(), 6);
    }

    #[test]
    fn test_query_product_by_name() {
        let store = store();
        let result = run(&store, "query_product_by_name", serde_json::json!({"name": "cheddar"}));
        assert!(!result.is_error);
        let out = text(&result);
        assert!(out.starts_with("Product information:"));
        assert!(out.contains("Price: 3.49"));
        assert!(out.contains("Bar code: 7891000100301"));

        let missing = run(&store, "query_product_by_name", serde_json::json!({"name": "caviar"}));
        assert_eq!(text(&missing), "Product named 'caviar' not found.");
    }

    #[test]
    fn test_products_by_category_formats_prices() {
        let store = store();
        let out = text(&run(
            &store,
            "get_products_by_category",
            serde_json::json!({"category": "bakery"}),
        ));
        assert_eq!(
            out,
            "Products in category 'bakery':\n \
             - Sourdough Bread (Manufacturer: Baker Street Co., Price: $4.25)\n \
             - Croissant 4-pack (Manufacturer: Baker Street Co., Price: $3.75)"
        );
    }

    #[test]
    fn test_expired_products() {
        let store = store();
        let out = text(&run(&store, "get_expired_products", serde_json::json!({})));
        assert!(out.starts_with("Expired products:"));
        assert!(out.contains("Tomato Sauce 340g (Expiry date: 2023-12-31"));
        assert!(out.contains("Chicken Breast 1kg"));
        assert!(!out.contains("Greek Yogurt"));
    }

    #[test]
    fn test_update_price() {
        let store = store();
        let result = run(
            &store,
            "update_product_price",
            serde_json::json!({"bar_code": "7891000300204", "new_price": 0.5}),
        );
        assert_eq!(
            text(&result),
            "Price of product 'Sparkling Water 500ml' (Bar code: 7891000300204) updated from $0.79 to $0.50."
        );

        let negative = run(
            &store,
            "update_product_price",
            serde_json::json!({"bar_code": "7891000300204", "new_price": -1}),
        );
        assert!(negative.is_error);
    }

    #[test]
    fn test_add_new_product_rejections() {
        let store = store();
        let mut args = serde_json::json!({
            "name": "Oat Milk",
            "category": "Dairy",
            "price": 2.49,
            "bar_code": "7891000100103",
            "expiry_date": "2031-02-28",
            "manufacturer": "Plant Co"
        });

        let dup = run(&store, "add_new_product", args.clone());
        assert!(dup.is_error);
        assert!(text(&dup).contains("already exists"));

        args["bar_code"] = "7891000999999".into();
        args["expiry_date"] = "28/02/2031".into();
        let bad_date = run(&store, "add_new_product", args.clone());
        assert!(bad_date.is_error);
        assert!(text(&bad_date).contains("YYYY-MM-DD"));

        args["expiry_date"] = "2031-02-28".into();
        let ok = run(&store, "add_new_product", args);
        assert!(!ok.is_error);
        assert!(text(&ok).contains("added successfully"));
        assert!(store.find_by_bar_code("7891000999999").unwrap().is_some());
    }

    #[test]
    fn test_missing_argument_is_tool_error() {
        let store = store();
        let result = run(&store, "get_products_by_manufacturer", serde_json::json!({}));
        assert!(result.is_error);
        assert!(text(&result).contains("manufacturer"));

        let null_args = call(&store, "get_product_categories", &serde_json::Value::Null, today()).unwrap();
        assert!(!null_args.is_error);
    }

    #[test]
    fn test_listing_tools() {
        let store = store();
        let categories = text(&run(&store, "get_product_categories", serde_json::json!({})));
        assert_eq!(
            categories,
            "Available product categories:\n - Bakery\n - Beverages\n - Dairy\n - Meat\n - Pantry"
        );
        let by_maker = text(&run(
            &store,
            "get_products_by_manufacturer",
            serde_json::json!({"manufacturer": "casa"}),
        ));
        assert!(by_maker.contains("Spaghetti 500g (Category: Pantry, Price: $1.59"));
        let makers = text(&run(&store, "get_product_manufacturers", serde_json::json!({})));
        assert!(makers.contains(" - Mountain Roast"));
    }

    #[test]
    fn test_unknown_tool() {
        let store = store();
        let err = call(&store, "drop_table", &serde_json::json!({}), today()).unwrap_err();
        assert!(matches!(err, ToolServerError::UnknownTool { name } if name == "drop_table"));
    }
}
