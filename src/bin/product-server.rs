//! `product-server`: MCP stdio server exposing the product catalog tools.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::io::BufReader;

use toolchat::tool_server::{serve, ProductStore};

#[derive(Parser, Debug)]
#[command(name = "product-server", version, about = "MCP server for the product catalog")]
struct Cli {
    /// SQLite database path, or `:memory:` (default: <data dir>/products.db)
    #[arg(long, env = "PRODUCTS_DB")]
    db: Option<String>,

    /// Do not insert the sample catalog
    #[arg(long)]
    no_seed: bool,
}

fn default_db_path() -> Result<String> {
    let dir = toolchat::data_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create {}", dir.display()))?;
    Ok(dir.join("products.db").to_string_lossy().into_owned())
}

#[tokio::main]
async fn main() -> Result<()> {
    // stdout carries the protocol
    toolchat::init_stderr_tracing(false);

    let cli = Cli::parse();
    let db_path = match cli.db {
        Some(path) => toolchat::inference::config::expand_tilde(&path),
        None => default_db_path()?,
    };
    if db_path != ":memory:" {
        if let Some(parent) = PathBuf::from(&db_path).parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
    }

    let store = ProductStore::open(&db_path)
        .with_context(|| format!("failed to open product database at {db_path}"))?;
    if !cli.no_seed {
        let inserted = store.seed_products().context("failed to seed products")?;
        tracing::info!(inserted, "sample catalog seeded");
    }

    tracing::info!(db = %db_path, pid = std::process::id(), "product-server ready");

    serve(store, BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await
        .context("product-server stopped with an error")
}
