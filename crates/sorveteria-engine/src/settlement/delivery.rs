//! Delivery orders: settled at creation, then walked to `delivered`.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use super::{
    commit_effects, lock_session, next_order_number, order_items, prepare, price_items, reverse,
    take_stock, Adjustments, ReversalReceipt, ReversalTarget, SettlementEngine, SettlementReceipt,
};
use crate::error::EngineResult;
use sorveteria_core::settlement::SettlementRequest;
use sorveteria_core::validation::validate_text;
use sorveteria_core::{Channel, CoreError, DeliveryOrder, DeliveryStatus, Money, OrderRef};
use sorveteria_db::OrderRepository;

/// A settlement request plus where it goes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRequest {
    #[serde(flatten)]
    pub settlement: SettlementRequest,
    pub recipient_name: String,
    pub phone: Option<String>,
    pub address: String,
}

fn delivery_ref(id: &str) -> OrderRef {
    OrderRef::new(Channel::Delivery, id)
}

impl SettlementEngine {
    /// Settles a delivery order. It starts in `received`.
    pub async fn create_delivery(&self, request: DeliveryRequest) -> EngineResult<SettlementReceipt<DeliveryOrder>> {
        let settlement = &request.settlement;
        settlement.validate()?;
        let recipient_name = validate_text("recipient_name", &request.recipient_name, 100)?;
        let address = validate_text("address", &request.address, 300)?;
        let phone = request.phone.as_deref().map(|p| validate_text("phone", p, 20)).transpose()?;
        let notes = settlement.notes.as_deref().map(|n| validate_text("notes", n, 500)).transpose()?;

        self.preflight(&settlement.items).await?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let session = lock_session(&mut tx, &settlement.cash_session_id).await?;
        let order_number = next_order_number(&mut tx, &session, now).await?;

        let lines = price_items(&mut tx, &settlement.items, now).await?;
        take_stock(&mut tx, &lines).await?;

        let adjustments = Adjustments {
            discount: Money::from_cents(settlement.discount_cents),
            additional_fee: Money::from_cents(settlement.additional_fee_cents),
            delivery_fee: Money::from_cents(settlement.delivery_fee_cents),
        };
        let prepared = prepare(
            &mut tx,
            lines,
            adjustments,
            settlement.customer_id.as_deref(),
            settlement.coupon_code.as_deref(),
            &settlement.payments,
            now,
        )
        .await?;

        let totals = prepared.totals;
        let delivery = DeliveryOrder {
            id: Uuid::new_v4().to_string(),
            order_number: order_number.clone(),
            cash_session_id: session.id.clone(),
            customer_id: prepared.customer_id().map(str::to_string),
            coupon_id: prepared.coupon_id(),
            status: DeliveryStatus::Received,
            recipient_name,
            phone,
            address,
            subtotal_cents: totals.subtotal.cents(),
            discount_cents: totals.discount.cents(),
            coupon_discount_cents: totals.coupon_discount.cents(),
            additional_fee_cents: totals.additional_fee.cents(),
            delivery_fee_cents: totals.delivery_fee.cents(),
            total_cents: totals.total.cents(),
            points_earned: prepared.accrual.points,
            cashback_earned_cents: prepared.accrual.cashback.cents(),
            created_by: settlement.operator_id.clone(),
            notes,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            delivered_at: None,
            cancelled_at: None,
        };
        let order = delivery_ref(&delivery.id);

        OrderRepository::insert_delivery(&mut tx, &delivery).await?;
        let items = order_items(&order, &prepared.lines, now);
        OrderRepository::insert_items(&mut tx, &items).await?;

        let (payments, balances) =
            commit_effects(&mut tx, &order, &order_number, &session.id, &prepared, now).await?;
        tx.commit().await?;

        info!(
            delivery_id = %delivery.id,
            number = %delivery.order_number,
            total = %totals.total,
            delivery_fee = %totals.delivery_fee,
            "Delivery order created"
        );

        self.book_card_fees(&order).await;

        Ok(SettlementReceipt {
            order: delivery,
            items,
            payments,
            totals,
            rewards: prepared.accrual,
            balances,
            change_due: prepared.change_due,
        })
    }

    /// One step along `received → preparing → out_for_delivery → delivered`.
    pub async fn advance_delivery(&self, delivery_id: &str) -> EngineResult<DeliveryOrder> {
        let mut tx = self.db.begin().await?;

        let delivery = OrderRepository::find_delivery(&mut tx, delivery_id)
            .await?
            .ok_or_else(|| CoreError::not_found("DeliveryOrder", delivery_id))?;
        let next = delivery.status.next().ok_or_else(|| {
            CoreError::invalid_state(
                "DeliveryOrder",
                delivery_id,
                format!("no step after {}", delivery.status.as_str()),
            )
        })?;

        if !OrderRepository::advance_delivery(&mut tx, delivery_id, delivery.status, next, Utc::now()).await? {
            return Err(CoreError::invalid_state("DeliveryOrder", delivery_id, "delivery changed concurrently").into());
        }
        let advanced = OrderRepository::find_delivery(&mut tx, delivery_id)
            .await?
            .ok_or_else(|| CoreError::not_found("DeliveryOrder", delivery_id))?;
        tx.commit().await?;

        info!(
            delivery_id = %delivery_id,
            from = delivery.status.as_str(),
            to = next.as_str(),
            "Delivery advanced"
        );
        Ok(advanced)
    }

    /// Any non-terminal status `→ cancelled`, undoing the settlement.
    pub async fn cancel_delivery(&self, delivery_id: &str, reason: &str) -> EngineResult<ReversalReceipt<DeliveryOrder>> {
        let reason = validate_text("reason", reason, 200)?;
        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let delivery = OrderRepository::find_delivery(&mut tx, delivery_id)
            .await?
            .ok_or_else(|| CoreError::not_found("DeliveryOrder", delivery_id))?;
        if delivery.status.is_terminal() {
            return Err(CoreError::invalid_state(
                "DeliveryOrder",
                delivery_id,
                format!("delivery is already {}", delivery.status.as_str()),
            )
            .into());
        }

        let target = ReversalTarget {
            order: delivery_ref(delivery_id),
            session_id: &delivery.cash_session_id,
            total: Money::from_cents(delivery.total_cents),
            customer_id: delivery.customer_id.as_deref(),
            points_earned: delivery.points_earned,
            cashback_earned: Money::from_cents(delivery.cashback_earned_cents),
        };
        let (restocked, session_delta, rewards, coupon_released) = reverse(&mut tx, &target).await?;

        if !OrderRepository::mark_delivery_cancelled(&mut tx, delivery_id, &reason, now).await? {
            return Err(CoreError::invalid_state("DeliveryOrder", delivery_id, "delivery changed concurrently").into());
        }
        let cancelled = OrderRepository::find_delivery(&mut tx, delivery_id)
            .await?
            .ok_or_else(|| CoreError::not_found("DeliveryOrder", delivery_id))?;
        tx.commit().await?;

        info!(delivery_id = %delivery_id, reason = %reason, "Delivery cancelled");
        Ok(ReversalReceipt {
            order: cancelled,
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
    use sorveteria_core::pricing::ItemRequest;
    use sorveteria_core::settlement::PaymentRequest;
    use sorveteria_core::{ErrorKind, PaymentMethod};

    fn request(session_id: &str, shop: &Shop) -> DeliveryRequest {
        let mut settlement = test_support::sale(session_id, vec![ItemRequest::unit(&shop.picole.id, 2)]);
        settlement.delivery_fee_cents = 700;
        settlement.payments = vec![PaymentRequest::new(PaymentMethod::Pix, 4300)];
        DeliveryRequest {
            settlement,
            recipient_name: "Fernanda".to_string(),
            phone: Some("11999990000".to_string()),
            address: "Rua das Flores, 10".to_string(),
        }
    }

    #[tokio::test]
    async fn test_delivery_walk() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        let receipt = shop.engine.create_delivery(request(&session.id, &shop)).await.unwrap();
        assert_eq!(receipt.order.status, DeliveryStatus::Received);
        assert_eq!(receipt.totals.total.cents(), 3600 + 700);

        let mut status = receipt.order.status;
        while status != DeliveryStatus::Delivered {
            status = shop.engine.advance_delivery(&receipt.order.id).await.unwrap().status;
        }
        let delivered = shop.db.orders().get_delivery(&receipt.order.id).await.unwrap().unwrap();
        assert!(delivered.delivered_at.is_some());

        let err = shop.engine.advance_delivery(&receipt.order.id).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
        let err = shop.engine.cancel_delivery(&receipt.order.id, "tarde demais").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_cancel_in_transit_reverses() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let stock_before = shop.stock(&shop.picole.id).await;

        let receipt = shop.engine.create_delivery(request(&session.id, &shop)).await.unwrap();
        shop.engine.advance_delivery(&receipt.order.id).await.unwrap();

        let reversal = shop.engine.cancel_delivery(&receipt.order.id, "endereço errado").await.unwrap();
        assert_eq!(reversal.order.status, DeliveryStatus::Cancelled);
        assert_eq!(reversal.session_delta.pix.cents(), -4300);
        assert_eq!(shop.stock(&shop.picole.id).await, stock_before);

        let session = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session.total_sales_cents, 0);
        assert_eq!(session.total_pix_cents, 0);
    }
}
