//! Fixtures shared by the service tests: an in-memory store with migrations
//! applied and a small ice-cream shop catalog.

use chrono::{Duration, Utc};
use std::sync::Once;

use crate::{CashSessionManager, SettlementEngine};
use sorveteria_core::pricing::ItemRequest;
use sorveteria_core::settlement::{PaymentRequest, SettlementRequest};
use sorveteria_core::{
    CashSession, CategoryKind, CategorySize, Customer, LoyaltyConfig, Money, PaymentMethod, PaymentMethodConfig,
    Product, ProductEligibility, Rate, SaleType,
};
use sorveteria_db::{Database, DbConfig, NewCustomer, NewProduct};

static TRACING: Once = Once::new();

/// Test-writer subscriber, honouring `RUST_LOG`.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub async fn database() -> Database {
    init_tracing();
    Database::new(DbConfig::in_memory())
        .await
        .expect("in-memory database")
}

/// File-backed store under `dir`, for tests that need several connections.
pub async fn file_database(dir: &tempfile::TempDir) -> Database {
    init_tracing();
    Database::new(DbConfig::new(dir.path().join("sorveteria.db")).max_connections(4))
        .await
        .expect("file database")
}

pub async fn customer(db: &Database, name: &str) -> Customer {
    db.customers()
        .create(NewCustomer {
            name: name.to_string(),
            ..NewCustomer::default()
        })
        .await
        .expect("customer")
}

pub async fn open_session(db: &Database, terminal: &str) -> CashSession {
    CashSessionManager::new(db.clone())
        .open(terminal, Money::from_cents(10_000), "ana")
        .await
        .expect("open session")
}

/// A sale request paid with R$100 in cash.
pub fn sale(session_id: &str, items: Vec<ItemRequest>) -> SettlementRequest {
    SettlementRequest {
        cash_session_id: session_id.to_string(),
        customer_id: None,
        coupon_code: None,
        items,
        payments: vec![PaymentRequest::new(PaymentMethod::Cash, 10_000)],
        discount_cents: 0,
        additional_fee_cents: 0,
        delivery_fee_cents: 0,
        operator_id: "ana".to_string(),
        notes: None,
    }
}

/// Store plus catalog:
/// - `picole`: unit product, R$18.00, 50 in stock
/// - `kilo`: R$69.90/kg, 40 kg in stock
/// - `copo`: assembled cup, sizes P/M/G (1/2/3 flavors), G at R$24.00
pub struct Shop {
    pub db: Database,
    pub engine: SettlementEngine,
    pub picole: Product,
    pub kilo: Product,
    pub copo: Product,
    pub size_g: CategorySize,
}

impl Shop {
    pub async fn new() -> Shop {
        Shop::with_database(database().await).await
    }

    pub async fn with_database(db: Database) -> Shop {
        let catalog = db.catalog();

        let picoles = catalog.create_category("Picolés", CategoryKind::Standard).await.expect("category");
        let picole = catalog
            .create_product(NewProduct {
                category_id: Some(picoles.id.clone()),
                name: "Picolé de Morango".to_string(),
                sale_type: SaleType::Unit,
                sale_price: Money::from_cents(1800),
                cost_price: Money::from_cents(600),
                track_stock: true,
                initial_stock: 50,
            })
            .await
            .expect("picole");

        let kilo = catalog
            .create_product(NewProduct {
                category_id: None,
                name: "Sorvete por Quilo".to_string(),
                sale_type: SaleType::Weight,
                sale_price: Money::from_cents(6990),
                cost_price: Money::from_cents(2500),
                track_stock: true,
                initial_stock: 40_000,
            })
            .await
            .expect("kilo");

        let montado = catalog.create_category("Montado", CategoryKind::Assembled).await.expect("category");
        let copo = catalog
            .create_product(NewProduct {
                category_id: Some(montado.id.clone()),
                name: "Copo de Sorvete".to_string(),
                sale_type: SaleType::Unit,
                sale_price: Money::from_cents(2400),
                cost_price: Money::from_cents(800),
                track_stock: false,
                initial_stock: 0,
            })
            .await
            .expect("copo");
        let mut size_g = None;
        for (name, max_flavors, price) in [("P", 1, 1200), ("M", 2, 1800), ("G", 3, 2400)] {
            let size = catalog.create_size(&montado.id, name, max_flavors).await.expect("size");
            catalog
                .set_size_price(&copo.id, &size.id, Money::from_cents(price))
                .await
                .expect("size price");
            if name == "G" {
                size_g = Some(size);
            }
        }

        // Costs valid from yesterday so a settlement right now picks them up.
        catalog
            .add_product_cost(&picole.id, Money::from_cents(600), Utc::now() - Duration::days(1))
            .await
            .expect("cost");

        for (method, bps) in [(PaymentMethod::Credit, 349), (PaymentMethod::Debit, 199)] {
            db.config()
                .save_payment_method(&PaymentMethodConfig {
                    method,
                    fee: Rate::from_bps(bps),
                    active: true,
                })
                .await
                .expect("payment method");
        }

        Shop {
            engine: SettlementEngine::new(db.clone()),
            db,
            picole,
            kilo,
            copo,
            size_g: size_g.expect("size G"),
        }
    }

    pub async fn stock(&self, product_id: &str) -> i64 {
        self.db
            .catalog()
            .get_product(product_id)
            .await
            .expect("product")
            .expect("product exists")
            .current_stock
    }

    /// Activates loyalty at 1 point per real, points valid for a year.
    pub async fn loyalty(&self, eligibility: ProductEligibility) {
        self.db
            .config()
            .save_loyalty(&LoyaltyConfig {
                active: true,
                points_per_real: Rate::from_bps(10_000),
                min_purchase: Money::zero(),
                eligibility,
                expiration_days: Some(365),
            })
            .await
            .expect("loyalty config");
    }
}
