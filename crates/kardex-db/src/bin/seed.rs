//! # Demo Data Seeder
//!
//! Populates a database with a small catalog and runs one of every ledger
//! flow through it, so a fresh install has something to look at.
//!
//! ## Usage
//! ```bash
//! # Use kardex.toml from the platform config dir (or defaults)
//! cargo run -p kardex-db --bin seed
//!
//! # Specify database path
//! cargo run -p kardex-db --bin seed -- --db ./data/kardex.db
//!
//! # Specify config file
//! cargo run -p kardex-db --bin seed -- --config ./kardex.toml
//! ```
//!
//! ## What It Does
//! 1. Creates a client, a supplier and a few products
//! 2. Records opening stock as adjustments
//! 3. Opens a cash register
//! 4. Runs a purchase order through approve and receive
//! 5. Issues a cash sales receipt
//! 6. Prints balances and audits every ledger

use std::env;
use std::path::PathBuf;

use kardex_core::{
    CreatePurchaseOrder, CreateSalesReceipt, DocumentLineInput, Money, Reception, StockChange,
    UserRef,
};
use kardex_db::{init_tracing, Database, LedgerConfig};

/// Demo products: (sku, name, opening stock, unit price in cents)
const PRODUCTS: &[(&str, &str, i64, i64)] = &[
    ("DEMO-RICE-1KG", "Arroz Costeño 1kg", 40, 450),
    ("DEMO-OIL-1L", "Aceite Primor 1L", 12, 1_090),
    ("DEMO-MILK-400", "Leche Gloria 400g", 0, 420),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    // Parse command line arguments
    let args: Vec<String> = env::args().collect();

    let mut db_path: Option<PathBuf> = None;
    let mut config_path: Option<PathBuf> = None;

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--config" | "-c" => {
                if i + 1 < args.len() {
                    config_path = Some(PathBuf::from(&args[i + 1]));
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Kardex Demo Seeder");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>        Database file path (overrides config)");
                println!("  -c, --config <PATH>    Config file (default: platform config dir)");
                println!("  -h, --help             Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    let mut config = LedgerConfig::load(config_path)?;
    if let Some(path) = db_path {
        config.database.path = path;
    }

    println!("Kardex Demo Seeder");
    println!("==================");
    println!("Database: {}", config.database.path.display());
    println!("Tax rate: {} bps", config.tax.rate_bps);
    println!();

    let db = Database::from_config(&config).await?;
    println!("✓ Connected, migrations applied");

    let catalog = db.catalog();
    if catalog.get_product_by_sku(PRODUCTS[0].0).await?.is_some() {
        println!("⚠ Demo data already present, nothing to do.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let admin = UserRef::new("seed", "Seeder");

    // Catalog
    let client = catalog.create_client("Cliente Varios", Some("00000000")).await?;
    let supplier = catalog
        .create_supplier("Distribuidora Lima SAC", Some("20100070970"))
        .await?;

    let mut products = Vec::with_capacity(PRODUCTS.len());
    for (sku, name, opening, price) in PRODUCTS {
        let product = catalog.create_product(sku, name).await?;
        if *opening > 0 {
            db.stock()
                .append(&product.id, StockChange::AdjustmentIn, *opening, Some("opening count"), &admin)
                .await?;
        }
        products.push((product, *price));
    }
    println!("✓ Catalog: {} products, opening stock recorded", products.len());

    // Register
    let register = db
        .cash()
        .open_register("Caja 1", Money::from_cents(20_000), &admin)
        .await?;
    println!("✓ Register '{}' opened with {}", register.name, register.current_balance());

    // Purchase order: pending → approved → received
    let documents = db.documents();
    let order = documents
        .create_purchase_order(
            &CreatePurchaseOrder {
                supplier_id: supplier.id.clone(),
                lines: products
                    .iter()
                    .map(|(product, price)| DocumentLineInput::new(&product.id, 24, price * 70 / 100))
                    .collect(),
                discount_cents: 0,
                notes: Some("Weekly restock".to_string()),
            },
            &admin,
        )
        .await?;
    documents.approve_purchase_order(&order.order.id, &admin).await?;
    let order = documents
        .receive_purchase_order(&order.order.id, &Reception::All, &admin)
        .await?;
    println!(
        "✓ Purchase order {} {} (total {})",
        order.order.number,
        order.order.status,
        order.order.total()
    );

    // Cash sale
    let receipt = documents
        .create_sales_receipt(
            &CreateSalesReceipt {
                series: "F001".to_string(),
                client_id: client.id.clone(),
                lines: products
                    .iter()
                    .take(2)
                    .map(|(product, price)| DocumentLineInput::new(&product.id, 3, *price))
                    .collect(),
                discount_cents: 100,
                cash_register_id: Some(register.id.clone()),
                notes: None,
            },
            &admin,
        )
        .await?;
    println!(
        "✓ Sales receipt {} (subtotal {}, tax {}, total {})",
        receipt.receipt.document_number(),
        Money::from_cents(receipt.receipt.subtotal_cents),
        Money::from_cents(receipt.receipt.tax_cents),
        receipt.receipt.total()
    );

    // Balances
    println!();
    println!("Balances");
    println!("--------");
    for (product, _) in &products {
        let balance = db.stock().current_balance(&product.id).await?;
        let audit = db.stock().audit(&product.id).await?;
        println!(
            "  {:<16} {:>5} units  ({} movements, {})",
            product.sku,
            balance,
            audit.movements,
            if audit.is_consistent() { "consistent" } else { "INCONSISTENT" }
        );
    }

    let cash_balance = db.cash().current_balance(&register.id).await?;
    let cash_audit = db.cash().audit(&register.id).await?;
    println!(
        "  {:<16} {:>11}  ({} movements, {})",
        register.name,
        cash_balance.to_string(),
        cash_audit.movements,
        if cash_audit.is_consistent() { "consistent" } else { "INCONSISTENT" }
    );

    db.close().await;

    println!();
    println!("✓ Seed complete!");

    Ok(())
}
