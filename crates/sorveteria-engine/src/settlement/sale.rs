//! Counter sales: settle, cancel and payment adjustment.

use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use super::{
    commit_effects, lock_session, next_order_number, order_items, order_payments, prepare, price_items,
    reverse, sale_ref, take_stock, Adjustments, ReversalReceipt, ReversalTarget, SettlementEngine, SettlementReceipt,
};
use crate::error::EngineResult;
use crate::reconciliation::CardFeeJob;
use sorveteria_core::session::SessionTotals;
use sorveteria_core::settlement::{apply_change, payments_sum, validate_payments, PaymentRequest, SettlementRequest};
use sorveteria_core::validation::validate_text;
use sorveteria_core::{CoreError, Money, OrderPayment, Sale, SaleStatus, ValidationError};
use sorveteria_db::{CashSessionRepository, OrderRepository};

impl SettlementEngine {
    /// Settles a counter sale. The sale is `completed` on return.
    pub async fn settle_sale(&self, request: SettlementRequest) -> EngineResult<SettlementReceipt<Sale>> {
        request.validate()?;
        if request.delivery_fee_cents != 0 {
            return Err(ValidationError::InvalidFormat {
                field: "delivery_fee".to_string(),
                reason: "only delivery orders carry a delivery fee".to_string(),
            }
            .into());
        }
        let notes = request.notes.as_deref().map(|n| validate_text("notes", n, 500)).transpose()?;

        self.preflight(&request.items).await?;

        let now = Utc::now();
        let mut tx = self.db.begin().await?;

        let session = lock_session(&mut tx, &request.cash_session_id).await?;
        let order_number = next_order_number(&mut tx, &session, now).await?;

        let lines = price_items(&mut tx, &request.items, now).await?;
        take_stock(&mut tx, &lines).await?;

        let adjustments = Adjustments {
            discount: Money::from_cents(request.discount_cents),
            additional_fee: Money::from_cents(request.additional_fee_cents),
            delivery_fee: Money::zero(),
        };
        let prepared = prepare(
            &mut tx,
            lines,
            adjustments,
            request.customer_id.as_deref(),
            request.coupon_code.as_deref(),
            &request.payments,
            now,
        )
        .await?;

        let totals = prepared.totals;
        let sale = Sale {
            id: Uuid::new_v4().to_string(),
            order_number: order_number.clone(),
            cash_session_id: session.id.clone(),
            customer_id: prepared.customer_id().map(str::to_string),
            coupon_id: prepared.coupon_id(),
            status: SaleStatus::Completed,
            subtotal_cents: totals.subtotal.cents(),
            discount_cents: totals.discount.cents(),
            coupon_discount_cents: totals.coupon_discount.cents(),
            additional_fee_cents: totals.additional_fee.cents(),
            total_cents: totals.total.cents(),
            points_earned: prepared.accrual.points,
            cashback_earned_cents: prepared.accrual.cashback.cents(),
            created_by: request.operator_id.clone(),
            notes,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
            cancelled_at: None,
        };
        let order = sale_ref(&sale.id);

        OrderRepository::insert_sale(&mut tx, &sale).await?;
        let items = order_items(&order, &prepared.lines, now);
        OrderRepository::insert_items(&mut tx, &items).await?;

        let (payments, balances) =
            commit_effects(&mut tx, &order, &order_number, &session.id, &prepared, now).await?;

        tx.commit().await?;

        info!(
            sale_id = %sale.id,
            number = %sale.order_number,
            session_id = %session.id,
            total = %totals.total,
            items = items.len(),
            "Sale settled"
        );

        self.book_card_fees(&order).await;

        Ok(SettlementReceipt {
            order: sale,
            items,
            payments,
            totals,
            rewards: prepared.accrual,
            balances,
            change_due: prepared.change_due,
        })
    }

    /// `completed | adjusted → cancelled`, undoing every effect of the sale.
    pub async fn cancel_sale(&self, sale_id: &str, reason: &str) -> EngineResult<ReversalReceipt<Sale>> {
        let reason = validate_text("reason", reason, 200)?;
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        let sale = OrderRepository::find_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Sale", sale_id))?;
        if !sale.status.is_settled() {
            return Err(CoreError::invalid_state("Sale", sale_id, "sale is already cancelled").into());
        }

        let target = ReversalTarget {
            order: sale_ref(&sale.id),
            session_id: &sale.cash_session_id,
            total: sale.total(),
            customer_id: sale.customer_id.as_deref(),
            points_earned: sale.points_earned,
            cashback_earned: Money::from_cents(sale.cashback_earned_cents),
        };
        let (restocked, session_delta, rewards, coupon_released) = reverse(&mut tx, &target).await?;

        if !OrderRepository::mark_sale_cancelled(&mut tx, sale_id, &reason, now).await? {
            return Err(CoreError::invalid_state("Sale", sale_id, "sale changed during cancellation").into());
        }
        let cancelled = OrderRepository::find_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Sale", sale_id))?;
        tx.commit().await?;

        info!(sale_id = %sale_id, total = %sale.total(), reason = %reason, "Sale cancelled");
        Ok(ReversalReceipt {
            order: cancelled,
            restocked,
            session_delta,
            rewards,
            coupon_released,
        })
    }

    /// Replaces the payment rows of a `completed` sale and moves the session's
    /// per-method totals with them. The sale becomes `adjusted`.
    pub async fn adjust_sale_payments(
        &self,
        sale_id: &str,
        payments: Vec<PaymentRequest>,
    ) -> EngineResult<(Sale, Vec<OrderPayment>)> {
        validate_payments(&payments)?;
        let now = Utc::now();

        let mut tx = self.db.begin().await?;
        let sale = OrderRepository::find_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Sale", sale_id))?;
        if sale.status != SaleStatus::Completed {
            return Err(CoreError::invalid_state(
                "Sale",
                sale_id,
                format!("only completed sales can be adjusted, sale is {:?}", sale.status),
            )
            .into());
        }
        lock_session(&mut tx, &sale.cash_session_id).await?;

        let order = sale_ref(&sale.id);
        let previous = OrderRepository::payments_for(&mut tx, order.channel, &order.order_id).await?;
        let applied = apply_change(&payments, sale.total())?;
        let rows = order_payments(&order, &applied.payments, now);

        let mut delta = SessionTotals::from_payments(&rows, Money::zero());
        delta.merge(&SessionTotals::from_payments(&previous, Money::zero()).negated());
        CashSessionRepository::apply_totals(&mut tx, &sale.cash_session_id, &delta).await?;

        OrderRepository::delete_payments(&mut tx, order.channel, &order.order_id).await?;
        OrderRepository::insert_payments(&mut tx, &rows).await?;
        CardFeeJob::cancel_for_order(&mut tx, &order).await?;

        if !OrderRepository::mark_sale_adjusted(&mut tx, sale_id, now).await? {
            return Err(CoreError::invalid_state("Sale", sale_id, "sale changed during adjustment").into());
        }
        let adjusted = OrderRepository::find_sale(&mut tx, sale_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Sale", sale_id))?;
        tx.commit().await?;

        let paid = payments_sum(&payments);
        if paid < sale.total() {
            warn!(sale_id = %sale_id, total = %sale.total(), paid = %paid, "Adjusted payments do not cover the sale");
        }
        info!(sale_id = %sale_id, payments = rows.len(), "Sale payments adjusted");

        self.book_card_fees(&order).await;
        Ok((adjusted, rows))
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use crate::test_support::{self, Shop};
    use crate::{CashSessionManager, SettlementEngine};
    use sorveteria_core::pricing::ItemRequest;
    use sorveteria_core::settlement::PaymentRequest;
    use sorveteria_core::{
        Channel, EligibilityPolicy, ErrorKind, FinancialStatus, Money, PaymentMethod, ProductEligibility, SaleStatus,
    };

    #[tokio::test]
    async fn test_cash_sale_and_cashier_close_scenario() {
        let shop = Shop::new().await;
        let sessions = CashSessionManager::new(shop.db.clone());
        let session = sessions.open("T1", Money::from_cents(10_000), "ana").await.unwrap();

        // Two picolés: 1800 + 1800 = 36.00
        let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 2)]);
        request.payments = vec![PaymentRequest::new(PaymentMethod::Cash, 3600)];
        let receipt = shop.engine.settle_sale(request).await.unwrap();
        assert_eq!(receipt.totals.total.cents(), 3600);

        let after = sessions.get(&session.id).await.unwrap();
        assert_eq!(after.total_cash_cents, 3600);
        assert_eq!(after.total_sales_cents, 3600);

        let closed = sessions
            .cashier_close(&session.id, Money::from_cents(13_600), vec![], "ana")
            .await
            .unwrap();
        assert_eq!(closed.cashier_difference_cents, Some(10_000));

        let validated = sessions.manager_close(&session.id, "gerente", None).await.unwrap();
        assert!(validated.manager_validated);
    }

    #[tokio::test]
    async fn test_change_is_not_counted_as_drawer_cash() {
        let shop = Shop::new().await;
        let sessions = CashSessionManager::new(shop.db.clone());
        let session = test_support::open_session(&shop.db, "T1").await;

        let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 2)]);
        request.payments = vec![PaymentRequest::new(PaymentMethod::Cash, 5000)];
        let receipt = shop.engine.settle_sale(request).await.unwrap();
        assert_eq!(receipt.totals.total.cents(), 3600);
        assert_eq!(receipt.change_due.cents(), 1400);
        assert_eq!(receipt.payments.len(), 1);
        assert_eq!(receipt.payments[0].amount_cents, 3600);

        let stored = shop.db.orders().payments(Channel::Sale, &receipt.order.id).await.unwrap();
        assert_eq!(stored.iter().map(|p| p.amount_cents).sum::<i64>(), 3600);

        let report = sessions.report(&session.id).await.unwrap();
        assert!(!report.drift);
        assert_eq!(report.stored.cash.cents(), 3600);
        assert_eq!(report.stored.sales.cents(), 3600);

        // The drawer holds exactly what the sale brought in
        let closed = sessions
            .cashier_close(&session.id, Money::from_cents(3600), vec![], "ana")
            .await
            .unwrap();
        assert_eq!(closed.cashier_difference_cents, Some(0));
    }

    #[tokio::test]
    async fn test_card_overpayment_is_rejected() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let stock_before = shop.stock(&shop.picole.id).await;

        let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 1)]);
        request.payments = vec![PaymentRequest::new(PaymentMethod::Credit, 2000)];
        let err = shop.engine.settle_sale(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        assert_eq!(shop.stock(&shop.picole.id).await, stock_before);
        let session = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session.total_credit_cents, 0);
    }

    #[tokio::test]
    async fn test_settlement_moves_stock_totals_and_sum() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let stock_before = shop.stock(&shop.picole.id).await;

        let mut request = test_support::sale(
            &session.id,
            vec![ItemRequest::unit(&shop.picole.id, 3), ItemRequest::weighed(&shop.kilo.id, 350)],
        );
        request.discount_cents = 200;
        request.additional_fee_cents = 150;
        request.payments = vec![
            PaymentRequest::new(PaymentMethod::Debit, 5000),
            PaymentRequest::new(PaymentMethod::Pix, 2000),
        ];
        let receipt = shop.engine.settle_sale(request).await.unwrap();

        let items_sum: i64 = receipt.items.iter().map(|i| i.subtotal_cents).sum();
        assert_eq!(items_sum + 150 - 200, receipt.order.total_cents);
        assert_eq!(receipt.order.status, SaleStatus::Completed);
        assert_eq!(shop.stock(&shop.picole.id).await, stock_before - 3);
        assert_eq!(shop.stock(&shop.kilo.id).await, 40_000 - 350);

        let session = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session.total_sales_cents, receipt.order.total_cents);
        assert_eq!(session.total_debit_cents, 5000);
        assert_eq!(session.total_pix_cents, 2000);
        assert_eq!(session.total_cash_cents, 0);
    }

    #[tokio::test]
    async fn test_insufficient_stock_leaves_no_trace() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let available = shop.stock(&shop.picole.id).await;

        let request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, available + 1)]);
        let err = shop.engine.settle_sale(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);

        assert_eq!(shop.stock(&shop.picole.id).await, available);
        let session = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session.total_sales_cents, 0);
    }

    #[tokio::test]
    async fn test_assembled_flavor_count_above_size_is_rejected() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        let request = test_support::sale(
            &session.id,
            vec![ItemRequest::assembled(&shop.copo.id, 1, &shop.size_g.id, 4)],
        );
        let err = shop.engine.settle_sale(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);

        // Three flavors in a G cup: 2400 / 3 = 800 per flavor
        let request = test_support::sale(
            &session.id,
            vec![ItemRequest::assembled(&shop.copo.id, 1, &shop.size_g.id, 3)],
        );
        let receipt = shop.engine.settle_sale(request).await.unwrap();
        assert_eq!(receipt.items[0].unit_price_cents, 800);
        assert_eq!(receipt.items[0].size_name.as_deref(), Some("G"));
    }

    #[tokio::test]
    async fn test_unknown_and_inactive_products() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        let request = test_support::sale(&session.id, vec![ItemRequest::unit("missing", 1)]);
        let err = shop.engine.settle_sale(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        shop.db.catalog().deactivate_product(&shop.picole.id).await.unwrap();
        let request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 1)]);
        let err = shop.engine.settle_sale(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_settling_against_closed_session_fails() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        CashSessionManager::new(shop.db.clone())
            .cashier_close(&session.id, Money::zero(), vec![], "ana")
            .await
            .unwrap();

        let request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 1)]);
        let err = shop.engine.settle_sale(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_negative_total_is_rejected() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 1)]);
        request.discount_cents = 10_000;
        let err = shop.engine.settle_sale(request).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValidationError);
    }

    #[tokio::test]
    async fn test_rewards_whole_total_and_pro_rated() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let customer = test_support::customer(&shop.db, "Dani").await;

        // Only the picolé earns; one picolé (1800) plus 500 g by weight (3495)
        let items = || {
            vec![
                ItemRequest::unit(&shop.picole.id, 1),
                ItemRequest::weighed(&shop.kilo.id, 500),
            ]
        };

        shop.loyalty(ProductEligibility::only([shop.picole.id.clone()], EligibilityPolicy::WholeTotal))
            .await;
        let mut request = test_support::sale(&session.id, items());
        request.customer_id = Some(customer.id.clone());
        let whole = shop.engine.settle_sale(request).await.unwrap();
        assert_eq!(whole.totals.total.cents(), 5295);
        assert_eq!(whole.rewards.points, 52);

        shop.loyalty(ProductEligibility::only([shop.picole.id.clone()], EligibilityPolicy::ProRated))
            .await;
        let mut request = test_support::sale(&session.id, items());
        request.customer_id = Some(customer.id.clone());
        let pro_rated = shop.engine.settle_sale(request).await.unwrap();
        assert_eq!(pro_rated.rewards.points, 18);

        let balances = pro_rated.balances.unwrap();
        assert_eq!(balances.loyalty_points, 70);

        let ledger = shop.db.customers().loyalty_ledger(&customer.id).await.unwrap();
        assert_eq!(ledger.iter().map(|t| t.points).sum::<i64>(), 70);
        assert!(ledger.iter().all(|t| t.expires_at.is_some()));
    }

    #[tokio::test]
    async fn test_cancel_reverses_everything() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let customer = test_support::customer(&shop.db, "Edu").await;
        shop.loyalty(ProductEligibility::all()).await;
        let stock_before = shop.stock(&shop.picole.id).await;

        let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 2)]);
        request.customer_id = Some(customer.id.clone());
        request.payments = vec![PaymentRequest::new(PaymentMethod::Credit, 3600)];
        let receipt = shop.engine.settle_sale(request).await.unwrap();
        assert_eq!(receipt.rewards.points, 36);

        let fees = shop
            .db
            .finance()
            .by_reference(&format!("CARD_FEE-SALE-{}-credit", receipt.order.id))
            .await
            .unwrap();
        assert_eq!(fees.len(), 1);

        let reversal = shop.engine.cancel_sale(&receipt.order.id, "cliente desistiu").await.unwrap();
        assert_eq!(reversal.order.status, SaleStatus::Cancelled);
        assert_eq!(reversal.rewards.points, 36);

        assert_eq!(shop.stock(&shop.picole.id).await, stock_before);
        let session = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session.total_sales_cents, 0);
        assert_eq!(session.total_credit_cents, 0);

        let stored = shop.db.customers().get(&customer.id).await.unwrap().unwrap();
        assert_eq!(stored.loyalty_points, 0);

        let fees = shop
            .db
            .finance()
            .by_reference(&format!("CARD_FEE-SALE-{}-credit", receipt.order.id))
            .await
            .unwrap();
        assert!(fees.iter().all(|f| f.status == FinancialStatus::Cancelled));

        let err = shop.engine.cancel_sale(&receipt.order.id, "de novo").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_adjust_payments_moves_session_totals() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 1)]);
        request.payments = vec![PaymentRequest::new(PaymentMethod::Cash, 1800)];
        let receipt = shop.engine.settle_sale(request).await.unwrap();

        let (adjusted, payments) = shop
            .engine
            .adjust_sale_payments(&receipt.order.id, vec![PaymentRequest::new(PaymentMethod::Debit, 1800)])
            .await
            .unwrap();
        assert_eq!(adjusted.status, SaleStatus::Adjusted);
        assert_eq!(payments.len(), 1);

        let session = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session.total_cash_cents, 0);
        assert_eq!(session.total_debit_cents, 1800);
        assert_eq!(session.total_sales_cents, 1800);

        let err = shop
            .engine
            .adjust_sale_payments(&receipt.order.id, vec![PaymentRequest::new(PaymentMethod::Pix, 1800)])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        // Adjusted sales can still be cancelled
        assert!(shop.engine.cancel_sale(&receipt.order.id, "estorno").await.is_ok());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_sales_never_oversell() {
        let dir = tempfile::tempdir().unwrap();
        let shop = Shop::with_database(test_support::file_database(&dir).await).await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let available = shop.stock(&shop.picole.id).await;

        // Each sale fits alone, both together do not
        let quantity = available / 2 + 1;
        let request = || {
            let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, quantity)]);
            request.payments = vec![PaymentRequest::new(PaymentMethod::Cash, quantity * 1800)];
            request
        };
        let (first, second) = tokio::join!(shop.engine.settle_sale(request()), shop.engine.settle_sale(request()));

        let (settled, failed): (Vec<_>, Vec<_>) = [first, second].into_iter().partition(|r| r.is_ok());
        assert_eq!(settled.len(), 1);
        let err = failed.into_iter().next().unwrap().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);

        let remaining = shop.stock(&shop.picole.id).await;
        assert!(remaining >= 0);
        assert_eq!(remaining, available - quantity);

        let session = shop.db.cash_sessions().get(&session.id).await.unwrap().unwrap();
        assert_eq!(session.total_sales_cents, quantity * 1800);
        assert_eq!(session.total_cash_cents, quantity * 1800);
    }

    #[tokio::test]
    async fn test_order_numbers_increase_per_terminal() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        let first = shop
            .engine
            .settle_sale(test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 1)]))
            .await
            .unwrap();
        let second = shop
            .engine
            .settle_sale(test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 1)]))
            .await
            .unwrap();
        assert!(first.order.order_number.ends_with("-T1-0001"));
        assert!(second.order.order_number.ends_with("-T1-0002"));
    }

    #[test]
    fn test_engine_is_cloneable() {
        fn assert_clone<T: Clone>() {}
        assert_clone::<SettlementEngine>();
    }
}
