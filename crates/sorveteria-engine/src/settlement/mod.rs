//! # Settlement Engine
//!
//! One settlement path for the three order channels. Channel modules only
//! decide the persistence shape of the header; pricing, stock, coupon,
//! rewards and session totals all go through the helpers below.
//!
//! ## Settlement Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  request.validate()                      shape only, no store access    │
//! │  preflight(items)                        price + stock on a pool conn   │
//! │       │                                                                 │
//! │  BEGIN ─────────────────────────────────────────────────────────────┐   │
//! │  │  lock_session            UPDATE ... WHERE status = 'open'        │   │
//! │  │  price_items             products, sizes, costs as of now        │   │
//! │  │  take_stock              UPDATE ... WHERE current_stock >= q     │   │
//! │  │  prepare                 totals, customer, coupon, rewards       │   │
//! │  │  insert header + items   (channel module)                        │   │
//! │  │  commit_effects          payments, coupon use, ledgers, totals   │   │
//! │  COMMIT ────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │  card fees for the order                 best effort, idempotent        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any error between BEGIN and COMMIT drops the transaction. Reversals
//! (sale cancel, comanda reopen, delivery cancel) run the mirror image in one
//! transaction through [`reverse`].

mod comanda;
mod delivery;
mod sale;

pub use comanda::CloseComanda;
pub use delivery::DeliveryRequest;

use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::coupons::CouponService;
use crate::error::EngineResult;
use crate::reconciliation::CardFeeJob;
use crate::rewards::{self, RewardBalances, RewardReversal, RewardService};
use sorveteria_core::pricing::{self, ItemRequest, PricedLine, PricingContext};
use sorveteria_core::rewards::{self as reward_rules, RewardAccrual};
use sorveteria_core::session::{self as session_rules, SessionTotals};
use sorveteria_core::settlement::{self as rules, payments_sum, PaymentRequest, SettlementTotals};
use sorveteria_core::{
    effective_cost, CashSession, Channel, CoreError, Coupon, Customer, Money, OrderItem, OrderPayment, OrderRef,
};
use sorveteria_db::{CashSessionRepository, CatalogRepository, ConfigRepository, Database, OrderRepository};

// =============================================================================
// Public Types
// =============================================================================

/// Everything a settlement produced, as committed.
#[derive(Debug, Clone, Serialize)]
pub struct SettlementReceipt<H> {
    pub order: H,
    pub items: Vec<OrderItem>,
    pub payments: Vec<OrderPayment>,
    pub totals: SettlementTotals,
    pub rewards: RewardAccrual,
    /// Customer balances after the settlement, when a customer is attached.
    pub balances: Option<RewardBalances>,
    /// Cash handed back when payments exceed the total. Not part of the
    /// stored payment rows.
    pub change_due: Money,
}

/// What a reversal undid.
#[derive(Debug, Clone, Serialize)]
pub struct ReversalReceipt<H> {
    pub order: H,
    pub restocked: Vec<(String, i64)>,
    pub session_delta: SessionTotals,
    pub rewards: RewardReversal,
    pub coupon_released: bool,
}

#[derive(Debug, Clone)]
pub struct SettlementEngine {
    db: Database,
}

impl SettlementEngine {
    pub fn new(db: Database) -> Self {
        SettlementEngine { db }
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Cheap rejection before any lock is taken. The same checks run again
    /// inside the transaction.
    async fn preflight(&self, items: &[ItemRequest]) -> EngineResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        let lines = price_items(&mut conn, items, Utc::now()).await?;
        check_stock(&mut conn, &lines).await
    }

    /// [`preflight`](Self::preflight) for lines already stored on a tab.
    async fn preflight_stored(&self, items: &[OrderItem]) -> EngineResult<()> {
        let mut conn = self.db.pool().acquire().await?;
        let lines = lines_from_items(&mut conn, items).await?;
        check_stock(&mut conn, &lines).await
    }

    /// Books card fees for a committed order. Failures are logged and left to
    /// the batch job.
    async fn book_card_fees(&self, order: &OrderRef) {
        match CardFeeJob::new(self.db.clone()).run_for_order(order, false).await {
            Ok(report) => {
                debug!(order = %order, created = report.counters.created, "Card fees booked");
            }
            Err(err) => {
                warn!(order = %order, error = %err, "Card fee booking failed, batch job will retry");
            }
        }
    }
}

// =============================================================================
// Transaction Helpers
// =============================================================================

/// Money-level inputs shared by every channel.
#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct Adjustments {
    pub discount: Money,
    pub additional_fee: Money,
    pub delivery_fee: Money,
}

/// Resolved inputs of a settlement, before anything is written.
#[derive(Debug, Clone)]
pub(crate) struct Prepared {
    pub lines: Vec<PricedLine>,
    pub totals: SettlementTotals,
    pub customer: Option<Customer>,
    pub coupon: Option<Coupon>,
    pub accrual: RewardAccrual,
    /// Payments net of change.
    pub payments: Vec<PaymentRequest>,
    pub change_due: Money,
}

impl Prepared {
    pub fn customer_id(&self) -> Option<&str> {
        self.customer.as_ref().map(|c| c.id.as_str())
    }

    pub fn coupon_id(&self) -> Option<String> {
        self.coupon.as_ref().map(|c| c.id.clone())
    }
}

/// Takes the session's write lock. Fails unless the session is `open`.
pub(crate) async fn lock_session(conn: &mut SqliteConnection, session_id: &str) -> EngineResult<CashSession> {
    let locked = CashSessionRepository::lock_open(conn, session_id).await?;
    let session = CashSessionRepository::find(conn, session_id)
        .await?
        .ok_or_else(|| CoreError::not_found("CashSession", session_id))?;
    if !locked {
        session_rules::ensure_open(&session)?;
    }
    Ok(session)
}

/// Next order number of the session's terminal for today.
pub(crate) async fn next_order_number(
    conn: &mut SqliteConnection,
    session: &CashSession,
    now: DateTime<Utc>,
) -> EngineResult<String> {
    let date = now.date_naive();
    let prefix = rules::order_number_prefix(date, &session.terminal_id);
    let sequence = OrderRepository::next_sequence(conn, &prefix).await?;
    Ok(rules::order_number(date, &session.terminal_id, sequence))
}

/// Prices every requested line against the catalog as of `now`.
pub(crate) async fn price_items(
    conn: &mut SqliteConnection,
    items: &[ItemRequest],
    now: DateTime<Utc>,
) -> EngineResult<Vec<PricedLine>> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        lines.push(price_item(conn, item, now).await?);
    }
    Ok(lines)
}

pub(crate) async fn price_item(
    conn: &mut SqliteConnection,
    item: &ItemRequest,
    now: DateTime<Utc>,
) -> EngineResult<PricedLine> {
    let product = CatalogRepository::find_product(conn, &item.product_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Product", item.product_id.as_str()))?;

    let category = match product.category_id.as_deref() {
        Some(category_id) => CatalogRepository::find_category(conn, category_id).await?,
        None => None,
    };

    let (size, size_price) = match item.size_id.as_deref() {
        Some(size_id) => (
            CatalogRepository::find_size(conn, size_id).await?,
            CatalogRepository::find_size_price(conn, &product.id, size_id).await?,
        ),
        None => (None, None),
    };

    let costs = CatalogRepository::costs_for(conn, &product.id).await?;
    let ctx = PricingContext {
        product: &product,
        category: category.as_ref(),
        size: size.as_ref(),
        size_price,
        unit_cost: effective_cost(&product, &costs, now),
    };

    Ok(pricing::price_line(item, &ctx)?)
}

/// Rebuilds priced lines from stored items (comanda close). Every product
/// must still be active.
pub(crate) async fn lines_from_items(
    conn: &mut SqliteConnection,
    items: &[OrderItem],
) -> EngineResult<Vec<PricedLine>> {
    let mut lines = Vec::with_capacity(items.len());
    for item in items {
        let product = CatalogRepository::find_product(conn, &item.product_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Product", item.product_id.as_str()))?;
        if !product.active {
            return Err(CoreError::invalid_state("Product", &product.id, "product is inactive").into());
        }
        lines.push(PricedLine {
            product_id: item.product_id.clone(),
            product_name: item.product_name.clone(),
            sale_type: item.sale_type,
            size_id: item.size_id.clone(),
            size_name: item.size_name.clone(),
            flavor_count: item.flavor_count,
            quantity: item.quantity,
            weight_grams: item.weight_grams,
            unit_price: Money::from_cents(item.unit_price_cents),
            cost: Money::from_cents(item.cost_cents),
            subtotal: item.subtotal(),
            track_stock: product.track_stock,
            stock_quantity: item.stock_quantity(),
        });
    }
    Ok(lines)
}

/// Reads current stock for every tracked line. Takes no lock.
async fn check_stock(conn: &mut SqliteConnection, lines: &[PricedLine]) -> EngineResult<()> {
    for (product_id, requested) in pricing::stock_requirements(lines) {
        let product = CatalogRepository::find_product(conn, &product_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Product", product_id.as_str()))?;
        pricing::ensure_stock(&product, requested)?;
    }
    Ok(())
}

/// Decrements tracked stock for every line. All or nothing with the transaction.
pub(crate) async fn take_stock(conn: &mut SqliteConnection, lines: &[PricedLine]) -> EngineResult<()> {
    for (product_id, requested) in pricing::stock_requirements(lines) {
        if !CatalogRepository::decrement_stock(conn, &product_id, requested).await? {
            let product = CatalogRepository::find_product(conn, &product_id)
                .await?
                .ok_or_else(|| CoreError::not_found("Product", product_id.as_str()))?;
            return Err(CoreError::InsufficientStock {
                product: product.name,
                available: product.current_stock,
                requested,
            }
            .into());
        }
    }
    Ok(())
}

/// Totals, customer, coupon quote and reward accrual. Reads only.
pub(crate) async fn prepare(
    conn: &mut SqliteConnection,
    lines: Vec<PricedLine>,
    adjustments: Adjustments,
    customer_id: Option<&str>,
    coupon_code: Option<&str>,
    payments: &[PaymentRequest],
    now: DateTime<Utc>,
) -> EngineResult<Prepared> {
    let mut totals = SettlementTotals::new(
        &lines,
        adjustments.additional_fee,
        adjustments.delivery_fee,
        adjustments.discount,
    );

    let customer = match customer_id {
        Some(id) => {
            let customer = rewards::find_customer(conn, id).await?;
            if !customer.active {
                return Err(CoreError::invalid_state("Customer", id, "customer is inactive").into());
            }
            Some(customer)
        }
        None => None,
    };

    let coupon = match coupon_code.filter(|c| !c.trim().is_empty()) {
        Some(code) => {
            let (coupon, discount) = CouponService::quote(conn, code, totals.coupon_base(), customer_id, now).await?;
            totals = totals.with_coupon(discount);
            Some(coupon)
        }
        None => None,
    };

    let totals = totals.finalize()?;

    let paid = payments_sum(payments);
    if paid < totals.total {
        warn!(total = %totals.total, paid = %paid, "Settlement is underpaid");
    }
    let applied = rules::apply_change(payments, totals.total)?;

    let accrual = if customer.is_some() {
        let loyalty = ConfigRepository::load_loyalty(conn).await?;
        let cashback = ConfigRepository::load_cashback(conn).await?;
        reward_rules::accrue(&loyalty, &cashback, totals.total, &lines, now)
    } else {
        RewardAccrual::default()
    };

    Ok(Prepared {
        lines,
        totals,
        customer,
        coupon,
        accrual,
        payments: applied.payments,
        change_due: applied.change,
    })
}

/// Item rows for priced lines.
pub(crate) fn order_items(order: &OrderRef, lines: &[PricedLine], now: DateTime<Utc>) -> Vec<OrderItem> {
    lines.iter().map(|line| order_item(order, line, now)).collect()
}

pub(crate) fn order_item(order: &OrderRef, line: &PricedLine, now: DateTime<Utc>) -> OrderItem {
    OrderItem {
        id: Uuid::new_v4().to_string(),
        channel: order.channel,
        order_id: order.order_id.clone(),
        product_id: line.product_id.clone(),
        product_name: line.product_name.clone(),
        sale_type: line.sale_type,
        size_id: line.size_id.clone(),
        size_name: line.size_name.clone(),
        flavor_count: line.flavor_count,
        quantity: line.quantity,
        weight_grams: line.weight_grams,
        unit_price_cents: line.unit_price.cents(),
        cost_cents: line.cost.cents(),
        subtotal_cents: line.subtotal.cents(),
        created_at: now,
    }
}

pub(crate) fn order_payments(order: &OrderRef, payments: &[PaymentRequest], now: DateTime<Utc>) -> Vec<OrderPayment> {
    payments
        .iter()
        .map(|p| OrderPayment {
            id: Uuid::new_v4().to_string(),
            channel: order.channel,
            order_id: order.order_id.clone(),
            method: p.method,
            amount_cents: p.amount_cents,
            created_at: now,
        })
        .collect()
}

/// Writes payments, coupon use, reward postings and the session movement.
pub(crate) async fn commit_effects(
    conn: &mut SqliteConnection,
    order: &OrderRef,
    order_number: &str,
    session_id: &str,
    prepared: &Prepared,
    now: DateTime<Utc>,
) -> EngineResult<(Vec<OrderPayment>, Option<RewardBalances>)> {
    let rows = order_payments(order, &prepared.payments, now);
    OrderRepository::insert_payments(conn, &rows).await?;

    if let Some(coupon) = &prepared.coupon {
        CouponService::apply(conn, coupon, prepared.customer_id(), order, prepared.totals.coupon_discount).await?;
    }

    let balances = match prepared.customer_id() {
        Some(customer_id) => {
            if !prepared.accrual.is_empty() {
                RewardService::earn_for_order(conn, customer_id, order, order_number, &prepared.accrual).await?;
            }
            let customer = rewards::find_customer(conn, customer_id).await?;
            Some(RewardBalances::of(&customer))
        }
        None => None,
    };

    let movement = SessionTotals::from_payments(&rows, prepared.totals.total);
    CashSessionRepository::apply_totals(conn, session_id, &movement).await?;

    Ok((rows, balances))
}

/// Figures of a settled order needed to undo it.
#[derive(Debug, Clone)]
pub(crate) struct ReversalTarget<'a> {
    pub order: OrderRef,
    pub session_id: &'a str,
    pub total: Money,
    pub customer_id: Option<&'a str>,
    pub points_earned: i64,
    pub cashback_earned: Money,
}

/// Undoes every effect of a settlement. The session must still be open.
pub(crate) async fn reverse(
    conn: &mut SqliteConnection,
    target: &ReversalTarget<'_>,
) -> EngineResult<(Vec<(String, i64)>, SessionTotals, RewardReversal, bool)> {
    lock_session(conn, target.session_id).await?;
    let order = &target.order;

    let items = OrderRepository::items_for(conn, order.channel, &order.order_id).await?;
    let mut restocked = Vec::new();
    for item in &items {
        let product = CatalogRepository::find_product(conn, &item.product_id).await?;
        if product.map(|p| p.track_stock).unwrap_or(false) {
            CatalogRepository::restock(conn, &item.product_id, item.stock_quantity()).await?;
            restocked.push((item.product_id.clone(), item.stock_quantity()));
        }
    }

    let payments = OrderRepository::payments_for(conn, order.channel, &order.order_id).await?;
    let delta = SessionTotals::from_payments(&payments, target.total).negated();
    CashSessionRepository::apply_totals(conn, target.session_id, &delta).await?;

    let reversal = match target.customer_id {
        Some(customer_id) => {
            RewardService::reverse_for_order(conn, customer_id, order, target.points_earned, target.cashback_earned)
                .await?
        }
        None => RewardReversal::default(),
    };

    let released = CouponService::release(conn, order).await?;
    CardFeeJob::cancel_for_order(conn, order).await?;

    debug!(order = %order, restocked = restocked.len(), "Settlement reversed");
    Ok((restocked, delta, reversal, released))
}

pub(crate) fn sale_ref(id: &str) -> OrderRef {
    OrderRef::new(Channel::Sale, id)
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use sorveteria_core::ErrorKind;

    #[tokio::test]
    async fn test_lock_session_rejects_closed_session() {
        let db = test_support::database().await;
        let session = test_support::open_session(&db, "T1").await;

        let mut tx = db.begin().await.unwrap();
        assert_eq!(lock_session(&mut tx, &session.id).await.unwrap().id, session.id);
        let err = lock_session(&mut tx, "missing").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        drop(tx);

        crate::CashSessionManager::new(db.clone())
            .cashier_close(&session.id, Money::zero(), vec![], "ana")
            .await
            .unwrap();
        let mut tx = db.begin().await.unwrap();
        let err = lock_session(&mut tx, &session.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_order_numbers_share_a_sequence() {
        let db = test_support::database().await;
        let session = test_support::open_session(&db, "T1").await;
        let now = Utc::now();

        let mut tx = db.begin().await.unwrap();
        let first = next_order_number(&mut tx, &session, now).await.unwrap();
        assert!(first.ends_with("-T1-0001"));
        assert!(first.starts_with(&now.format("%Y%m%d").to_string()));
    }
}
