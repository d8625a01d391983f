//! # Seed Data Generator
//!
//! Populates an empty database with a demo ice-cream shop catalog.
//!
//! ## Usage
//! ```bash
//! # Seed ./sorveteria_dev.db
//! cargo run -p sorveteria-db --bin seed
//!
//! # Specify database path
//! cargo run -p sorveteria-db --bin seed -- --db ./data/sorveteria.db
//! ```
//!
//! ## Generated Data
//! - "Montado" assembled category with sizes P (1 flavor), M (2), G (3)
//! - Açaí and sorvete cups priced per size
//! - "Sorvete por quilo" weight product (stock in grams)
//! - Picolés and drinks as unit products with tracked stock
//! - Card fees: debit 1.99%, credit 3.49%, pix 0%
//! - Loyalty: 1 point per R$1 over R$10; cashback 2%, capped at R$5

use chrono::Utc;
use std::env;
use sorveteria_core::{
    CashbackConfig, CategoryKind, EligibilityPolicy, LoyaltyConfig, Money, PaymentMethod,
    PaymentMethodConfig, ProductEligibility, Rate, SaleType,
};
use sorveteria_db::{Database, DbConfig, NewProduct};

/// Assembled sizes: (name, max flavors).
const SIZES: &[(&str, i64)] = &[("P", 1), ("M", 2), ("G", 3)];

/// Assembled products with their P/M/G prices in centavos.
const ASSEMBLED: &[(&str, [i64; 3])] = &[
    ("Copo de Sorvete", [1200, 1800, 2400]),
    ("Açaí na Tigela", [1500, 2200, 2900]),
    ("Milk-shake", [1400, 1900, 2500]),
];

/// Unit products: (name, price, cost, stock).
const UNIT: &[(&str, i64, i64, i64)] = &[
    ("Picolé de Limão", 500, 180, 120),
    ("Picolé de Chocolate", 600, 220, 120),
    ("Picolé de Coco", 600, 210, 80),
    ("Cascão Duplo", 900, 300, 60),
    ("Água Mineral 500ml", 400, 150, 48),
    ("Refrigerante Lata", 600, 280, 48),
];

/// Card-fee table in basis points.
const FEES: &[(PaymentMethod, u32)] = &[
    (PaymentMethod::Cash, 0),
    (PaymentMethod::Debit, 199),
    (PaymentMethod::Credit, 349),
    (PaymentMethod::Pix, 0),
    (PaymentMethod::Other, 0),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args: Vec<String> = env::args().collect();

    let mut db_path = String::from("./sorveteria_dev.db");

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--db" | "-d" => {
                if i + 1 < args.len() {
                    db_path = args[i + 1].clone();
                    i += 1;
                }
            }
            "--help" | "-h" => {
                println!("Sorveteria POS Seed Data Generator");
                println!();
                println!("Usage: seed [OPTIONS]");
                println!();
                println!("Options:");
                println!("  -d, --db <PATH>    Database file path (default: ./sorveteria_dev.db)");
                println!("  -h, --help         Show this help message");
                return Ok(());
            }
            _ => {}
        }
        i += 1;
    }

    println!("🍦 Sorveteria POS Seed Data Generator");
    println!("====================================");
    println!("Database: {}", db_path);
    println!();

    let db = Database::new(DbConfig::new(&db_path)).await?;

    println!("✓ Connected to database");
    println!("✓ Migrations applied");

    let existing = db.catalog().list_products(false).await?.len();
    if existing > 0 {
        println!("⚠ Database already has {} products", existing);
        println!("  Skipping seed to avoid duplicates.");
        println!("  Delete the database file to regenerate.");
        return Ok(());
    }

    let start = std::time::Instant::now();
    let catalog = db.catalog();

    // Assembled cups
    let montado = catalog.create_category("Montado", CategoryKind::Assembled).await?;
    let mut sizes = Vec::with_capacity(SIZES.len());
    for (name, max_flavors) in SIZES {
        sizes.push(catalog.create_size(&montado.id, name, *max_flavors).await?);
    }

    let mut generated = 0;
    for (name, prices) in ASSEMBLED {
        let product = catalog
            .create_product(NewProduct {
                category_id: Some(montado.id.clone()),
                name: name.to_string(),
                sale_type: SaleType::Unit,
                sale_price: Money::from_cents(prices[0]),
                cost_price: Money::from_cents(prices[0] * 35 / 100),
                track_stock: false,
                initial_stock: 0,
            })
            .await?;
        for (size, price) in sizes.iter().zip(prices.iter()) {
            catalog.set_size_price(&product.id, &size.id, Money::from_cents(*price)).await?;
        }
        generated += 1;
    }

    // Self-service by weight
    let kilo = catalog.create_category("Por Quilo", CategoryKind::Standard).await?;
    catalog
        .create_product(NewProduct {
            category_id: Some(kilo.id.clone()),
            name: "Sorvete por quilo".to_string(),
            sale_type: SaleType::Weight,
            sale_price: Money::from_cents(6990),
            cost_price: Money::from_cents(2400),
            track_stock: true,
            initial_stock: 40_000,
        })
        .await?;
    generated += 1;

    // Picolés and drinks
    let avulsos = catalog.create_category("Avulsos", CategoryKind::Standard).await?;
    for (name, price, cost, stock) in UNIT {
        catalog
            .create_product(NewProduct {
                category_id: Some(avulsos.id.clone()),
                name: name.to_string(),
                sale_type: SaleType::Unit,
                sale_price: Money::from_cents(*price),
                cost_price: Money::from_cents(*cost),
                track_stock: true,
                initial_stock: *stock,
            })
            .await?;
        generated += 1;
    }

    println!("✓ Generated {} products in {:?}", generated, start.elapsed());

    // Business configuration
    for (method, bps) in FEES {
        db.config()
            .save_payment_method(&PaymentMethodConfig {
                method: *method,
                fee: Rate::from_bps(*bps),
                active: true,
            })
            .await?;
    }

    db.config()
        .save_loyalty(&LoyaltyConfig {
            active: true,
            points_per_real: Rate::from_bps(10_000),
            min_purchase: Money::from_cents(1000),
            eligibility: ProductEligibility::all(),
            expiration_days: Some(365),
        })
        .await?;

    db.config()
        .save_cashback(&CashbackConfig {
            active: true,
            percentage: Rate::from_bps(200),
            min_purchase: Money::from_cents(2000),
            max_cashback_per_purchase: Some(Money::from_cents(500)),
            eligibility: ProductEligibility {
                policy: EligibilityPolicy::WholeTotal,
                ..ProductEligibility::all()
            },
            expiration_days: Some(90),
        })
        .await?;

    println!("✓ Payment fees, loyalty and cashback configured");
    println!();
    println!("✓ Seed complete at {}", Utc::now().format("%Y-%m-%d %H:%M:%S"));

    Ok(())
}
