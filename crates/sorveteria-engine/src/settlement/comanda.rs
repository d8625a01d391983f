//! In-store tabs.
//!
//! ```text
//! open_comanda ──► open ──add/remove items──► open ──close_comanda──► closed
//!                   │                                                   │
//!                   └──cancel_comanda──► cancelled        reopen_comanda┘ (back to open)
//! ```
//!
//! Items are priced when added and touch neither stock nor the session until
//! the tab is closed through the settlement path.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{
    commit_effects, lines_from_items, lock_session, next_order_number, order_item, prepare, price_item,
    reverse, take_stock, Adjustments, ReversalReceipt, ReversalTarget, SettlementEngine, SettlementReceipt,
};
use crate::error::EngineResult;
use crate::rewards;
use sorveteria_core::pricing::ItemRequest;
use sorveteria_core::settlement::{validate_payments, PaymentRequest};
use sorveteria_core::validation::{validate_non_negative_cents, validate_text};
use sorveteria_core::{Channel, Comanda, ComandaStatus, CoreError, Money, OrderItem, OrderRef, ValidationError};
use sorveteria_db::OrderRepository;

/// Input of `close_comanda`. Items come from the tab itself.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CloseComanda {
    pub payments: Vec<PaymentRequest>,
    pub coupon_code: Option<String>,
    /// Overrides the customer attached at open time.
    pub customer_id: Option<String>,
    #[serde(default)]
    pub discount_cents: i64,
    /// Service charge.
    #[serde(default)]
    pub additional_fee_cents: i64,
    pub operator_id: String,
    pub notes: Option<String>,
}

fn comanda_ref(id: &str) -> OrderRef {
    OrderRef::new(Channel::Comanda, id)
}

fn not_open(comanda: &Comanda) -> CoreError {
    CoreError::invalid_state(
        "Comanda",
        &comanda.id,
        format!("comanda is {:?}, expected open", comanda.status),
    )
}

impl SettlementEngine {
    pub async fn open_comanda(
        &self,
        session_id: &str,
        table_label: &str,
        customer_id: Option<&str>,
        operator_id: &str,
    ) -> EngineResult<Comanda> {
        let table_label = validate_text("table_label", table_label, 40)?;
        let operator_id = validate_text("operator_id", operator_id, 100)?;
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        let session = lock_session(&mut tx, session_id).await?;
        if let Some(customer_id) = customer_id {
            rewards::find_customer(&mut tx, customer_id).await?;
        }
        let order_number = next_order_number(&mut tx, &session, now).await?;

        let comanda = Comanda {
            id: Uuid::new_v4().to_string(),
            order_number,
            cash_session_id: session.id.clone(),
            table_label,
            customer_id: customer_id.map(str::to_string),
            coupon_id: None,
            status: ComandaStatus::Open,
            subtotal_cents: 0,
            discount_cents: 0,
            coupon_discount_cents: 0,
            additional_fee_cents: 0,
            total_cents: 0,
            points_earned: 0,
            cashback_earned_cents: 0,
            opened_by: operator_id,
            notes: None,
            cancel_reason: None,
            opened_at: now,
            closed_at: None,
            cancelled_at: None,
            updated_at: now,
        };
        OrderRepository::insert_comanda(&mut tx, &comanda).await?;
        tx.commit().await?;

        info!(comanda_id = %comanda.id, table = %comanda.table_label, session_id = %session.id, "Comanda opened");
        Ok(comanda)
    }

    /// Prices and appends a line. Returns the stored item.
    pub async fn add_comanda_item(&self, comanda_id: &str, item: ItemRequest) -> EngineResult<OrderItem> {
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let comanda = OrderRepository::find_comanda(&mut tx, comanda_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Comanda", comanda_id))?;
        if !comanda.is_open() {
            return Err(not_open(&comanda).into());
        }

        let line = price_item(&mut tx, &item, now).await?;
        let stored = order_item(&comanda_ref(comanda_id), &line, now);
        OrderRepository::insert_items(&mut tx, std::slice::from_ref(&stored)).await?;
        let subtotal = OrderRepository::refresh_comanda_subtotal(&mut tx, comanda_id).await?;
        tx.commit().await?;

        info!(comanda_id = %comanda_id, product = %stored.product_name, subtotal = %subtotal, "Comanda item added");
        Ok(stored)
    }

    /// Drops a line. Returns the new running subtotal.
    pub async fn remove_comanda_item(&self, comanda_id: &str, item_id: &str) -> EngineResult<Money> {
        let mut tx = self.db.begin().await?;

        let comanda = OrderRepository::find_comanda(&mut tx, comanda_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Comanda", comanda_id))?;
        if !comanda.is_open() {
            return Err(not_open(&comanda).into());
        }

        if !OrderRepository::delete_item(&mut tx, Channel::Comanda, comanda_id, item_id).await? {
            return Err(CoreError::not_found("OrderItem", item_id).into());
        }
        let subtotal = OrderRepository::refresh_comanda_subtotal(&mut tx, comanda_id).await?;
        tx.commit().await?;

        info!(comanda_id = %comanda_id, item_id = %item_id, subtotal = %subtotal, "Comanda item removed");
        Ok(subtotal)
    }

    /// Settles the tab: `open → closed`.
    pub async fn close_comanda(
        &self,
        comanda_id: &str,
        close: CloseComanda,
    ) -> EngineResult<SettlementReceipt<Comanda>> {
        validate_payments(&close.payments)?;
        validate_non_negative_cents("discount", close.discount_cents)?;
        validate_non_negative_cents("additional_fee", close.additional_fee_cents)?;
        let operator_id = validate_text("operator_id", &close.operator_id, 100)?;
        let notes = close.notes.as_deref().map(|n| validate_text("notes", n, 500)).transpose()?;

        let pending = self.db.orders().items(Channel::Comanda, comanda_id).await?;
        self.preflight_stored(&pending).await?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let comanda = OrderRepository::find_comanda(&mut tx, comanda_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Comanda", comanda_id))?;
        if !comanda.is_open() {
            return Err(not_open(&comanda).into());
        }
        let session = lock_session(&mut tx, &comanda.cash_session_id).await?;

        let items = OrderRepository::items_for(&mut tx, Channel::Comanda, comanda_id).await?;
        if items.is_empty() {
            return Err(ValidationError::required("items").into());
        }
        let lines = lines_from_items(&mut tx, &items).await?;
        take_stock(&mut tx, &lines).await?;

        let customer_id = close.customer_id.clone().or_else(|| comanda.customer_id.clone());
        let adjustments = Adjustments {
            discount: Money::from_cents(close.discount_cents),
            additional_fee: Money::from_cents(close.additional_fee_cents),
            delivery_fee: Money::zero(),
        };
        let prepared = prepare(
            &mut tx,
            lines,
            adjustments,
            customer_id.as_deref(),
            close.coupon_code.as_deref(),
            &close.payments,
            now,
        )
        .await?;

        let totals = prepared.totals;
        let closed = Comanda {
            customer_id: prepared.customer_id().map(str::to_string),
            coupon_id: prepared.coupon_id(),
            status: ComandaStatus::Closed,
            subtotal_cents: totals.subtotal.cents(),
            discount_cents: totals.discount.cents(),
            coupon_discount_cents: totals.coupon_discount.cents(),
            additional_fee_cents: totals.additional_fee.cents(),
            total_cents: totals.total.cents(),
            points_earned: prepared.accrual.points,
            cashback_earned_cents: prepared.accrual.cashback.cents(),
            notes: notes.or_else(|| comanda.notes.clone()),
            closed_at: Some(now),
            updated_at: now,
            ..comanda
        };
        if !OrderRepository::save_comanda_close(&mut tx, &closed).await? {
            return Err(CoreError::invalid_state("Comanda", comanda_id, "comanda changed during close").into());
        }

        let order = comanda_ref(comanda_id);
        let (payments, balances) =
            commit_effects(&mut tx, &order, &closed.order_number, &session.id, &prepared, now)
                .await?;
        tx.commit().await?;

        info!(
            comanda_id = %comanda_id,
            number = %closed.order_number,
            closed_by = %operator_id,
            total = %totals.total,
            "Comanda closed"
        );

        self.book_card_fees(&order).await;

        Ok(SettlementReceipt {
            order: closed,
            items,
            payments,
            totals,
            rewards: prepared.accrual,
            balances,
            change_due: prepared.change_due,
        })
    }

    /// `open → cancelled`. Nothing was settled yet, so nothing is reversed.
    pub async fn cancel_comanda(&self, comanda_id: &str, reason: &str) -> EngineResult<Comanda> {
        let reason = validate_text("reason", reason, 200)?;
        let mut tx = self.db.begin().await?;

        let comanda = OrderRepository::find_comanda(&mut tx, comanda_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Comanda", comanda_id))?;
        if !OrderRepository::mark_comanda_cancelled(&mut tx, comanda_id, &reason, Utc::now()).await? {
            return Err(not_open(&comanda).into());
        }
        let cancelled = OrderRepository::find_comanda(&mut tx, comanda_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Comanda", comanda_id))?;
        tx.commit().await?;

        info!(comanda_id = %comanda_id, reason = %reason, "Comanda cancelled");
        Ok(cancelled)
    }

    /// `closed → open`, undoing the settlement. Items stay on the tab; the
    /// payment rows are dropped.
    pub async fn reopen_comanda(&self, comanda_id: &str) -> EngineResult<ReversalReceipt<Comanda>> {
        let mut tx = self.db.begin().await?;

        let comanda = OrderRepository::find_comanda(&mut tx, comanda_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Comanda", comanda_id))?;
        if comanda.status != ComandaStatus::Closed {
            return Err(CoreError::invalid_state(
                "Comanda",
                comanda_id,
                format!("comanda is {:?}, expected closed", comanda.status),
            )
            .into());
        }

        let target = ReversalTarget {
            order: comanda_ref(comanda_id),
            session_id: &comanda.cash_session_id,
            total: Money::from_cents(comanda.total_cents),
            customer_id: comanda.customer_id.as_deref(),
            points_earned: comanda.points_earned,
            cashback_earned: Money::from_cents(comanda.cashback_earned_cents),
        };
        let (restocked, session_delta, rewards, coupon_released) = reverse(&mut tx, &target).await?;

        OrderRepository::delete_payments(&mut tx, Channel::Comanda, comanda_id).await?;
        if !OrderRepository::mark_comanda_reopened(&mut tx, comanda_id, Utc::now()).await? {
            return Err(CoreError::invalid_state("Comanda", comanda_id, "comanda changed during reopen").into());
        }
        let reopened = OrderRepository::find_comanda(&mut tx, comanda_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Comanda", comanda_id))?;
        tx.commit().await?;

        info!(comanda_id = %comanda_id, "Comanda reopened");
        Ok(ReversalReceipt {
            order: reopened,
            restocked,
            session_delta,
            rewards,
            coupon_released,
        })
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{self, Shop};
    use sorveteria_core::{ErrorKind, PaymentMethod};

    fn close_with(payments: Vec<PaymentRequest>) -> CloseComanda {
        CloseComanda {
            payments,
            operator_id: "ana".to_string(),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_comanda_lifecycle() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let stock_before = shop.stock(&shop.picole.id).await;

        let comanda = shop.engine.open_comanda(&session.id, "Mesa 4", None, "ana").await.unwrap();
        assert_eq!(comanda.status, ComandaStatus::Open);

        let first = shop
            .engine
            .add_comanda_item(&comanda.id, ItemRequest::unit(&shop.picole.id, 2))
            .await
            .unwrap();
        let second = shop
            .engine
            .add_comanda_item(&comanda.id, ItemRequest::assembled(&shop.copo.id, 1, &shop.size_g.id, 2))
            .await
            .unwrap();
        assert_eq!(second.unit_price_cents, 1200);

        // Adding items does not touch stock
        assert_eq!(shop.stock(&shop.picole.id).await, stock_before);

        let subtotal = shop.engine.remove_comanda_item(&comanda.id, &second.id).await.unwrap();
        assert_eq!(subtotal.cents(), first.subtotal_cents);

        let mut close = close_with(vec![PaymentRequest::new(PaymentMethod::Cash, 5000)]);
        close.additional_fee_cents = 360;
        let receipt = shop.engine.close_comanda(&comanda.id, close).await.unwrap();
        assert_eq!(receipt.order.status, ComandaStatus::Closed);
        assert_eq!(receipt.totals.total.cents(), 3600 + 360);
        assert_eq!(receipt.change_due.cents(), 5000 - 3960);
        assert_eq!(shop.stock(&shop.picole.id).await, stock_before - 2);

        let session_after = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session_after.total_sales_cents, 3960);
        // Change handed back never reaches the drawer total
        assert_eq!(session_after.total_cash_cents, 3960);
        assert_eq!(receipt.payments.len(), 1);
        assert_eq!(receipt.payments[0].amount_cents, 3960);

        // Closed tabs take no more items
        let err = shop
            .engine
            .add_comanda_item(&comanda.id, ItemRequest::unit(&shop.picole.id, 1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_reopen_reverses_and_allows_second_close() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let stock_before = shop.stock(&shop.picole.id).await;

        let comanda = shop.engine.open_comanda(&session.id, "Mesa 1", None, "ana").await.unwrap();
        shop.engine
            .add_comanda_item(&comanda.id, ItemRequest::unit(&shop.picole.id, 1))
            .await
            .unwrap();
        shop.engine
            .close_comanda(&comanda.id, close_with(vec![PaymentRequest::new(PaymentMethod::Pix, 1800)]))
            .await
            .unwrap();

        let reversal = shop.engine.reopen_comanda(&comanda.id).await.unwrap();
        assert_eq!(reversal.order.status, ComandaStatus::Open);
        assert_eq!(reversal.order.total_cents, 1800);
        assert_eq!(shop.stock(&shop.picole.id).await, stock_before);
        assert!(shop.db.orders().payments(Channel::Comanda, &comanda.id).await.unwrap().is_empty());
        assert_eq!(shop.db.orders().items(Channel::Comanda, &comanda.id).await.unwrap().len(), 1);

        let session_mid = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session_mid.total_sales_cents, 0);
        assert_eq!(session_mid.total_pix_cents, 0);

        shop.engine
            .close_comanda(&comanda.id, close_with(vec![PaymentRequest::new(PaymentMethod::Cash, 1800)]))
            .await
            .unwrap();
        let session_end = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session_end.total_sales_cents, 1800);
        assert_eq!(session_end.total_cash_cents, 1800);
        assert_eq!(shop.stock(&shop.picole.id).await, stock_before - 1);
    }

    #[tokio::test]
    async fn test_empty_and_cancelled_comandas() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        let comanda = shop.engine.open_comanda(&session.id, "Balcão", None, "ana").await.unwrap();
        let err = shop
            .engine
            .close_comanda(&comanda.id, close_with(vec![PaymentRequest::new(PaymentMethod::Cash, 100)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        let cancelled = shop.engine.cancel_comanda(&comanda.id, "cliente saiu").await.unwrap();
        assert_eq!(cancelled.status, ComandaStatus::Cancelled);

        let err = shop.engine.cancel_comanda(&comanda.id, "de novo").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = shop.engine.reopen_comanda(&comanda.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_close_rejects_product_deactivated_after_add() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let stock_before = shop.stock(&shop.picole.id).await;

        let comanda = shop.engine.open_comanda(&session.id, "Mesa 7", None, "ana").await.unwrap();
        shop.engine
            .add_comanda_item(&comanda.id, ItemRequest::unit(&shop.picole.id, 1))
            .await
            .unwrap();
        shop.db.catalog().deactivate_product(&shop.picole.id).await.unwrap();

        let err = shop
            .engine
            .close_comanda(&comanda.id, close_with(vec![PaymentRequest::new(PaymentMethod::Cash, 1800)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let still_open = shop.db.orders().get_comanda(&comanda.id).await.unwrap().unwrap();
        assert_eq!(still_open.status, ComandaStatus::Open);
        assert_eq!(shop.stock(&shop.picole.id).await, stock_before);
        let session_after = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session_after.total_sales_cents, 0);
    }

    #[tokio::test]
    async fn test_close_checks_stock_before_settling() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let available = shop.stock(&shop.picole.id).await;

        let comanda = shop.engine.open_comanda(&session.id, "Mesa 2", None, "ana").await.unwrap();
        shop.engine
            .add_comanda_item(&comanda.id, ItemRequest::unit(&shop.picole.id, available + 1))
            .await
            .unwrap();

        let err = shop
            .engine
            .close_comanda(&comanda.id, close_with(vec![PaymentRequest::new(PaymentMethod::Pix, 100)]))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(shop.stock(&shop.picole.id).await, available);
        let still_open = shop.db.orders().get_comanda(&comanda.id).await.unwrap().unwrap();
        assert_eq!(still_open.status, ComandaStatus::Open);
    }
}
