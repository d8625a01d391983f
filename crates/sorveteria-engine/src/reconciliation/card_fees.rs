//! Card-fee expense rows, one per order and payment method.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{debug, info};

use super::live;
use crate::error::EngineResult;
use sorveteria_core::fees::{self, CARD_FEE_CATEGORY};
use sorveteria_core::reconcile::{JobReport, ReconcileOutcome};
use sorveteria_core::{FinancialStatus, Money, OrderRef, PaymentMethod, PaymentMethodConfig, TransactionType};
use sorveteria_db::{Database, FinanceRepository, NewFinancialTransaction, SettledOrder};

pub const JOB_NAME: &str = "card_fees";

#[derive(Debug, Clone)]
pub struct CardFeeJob {
    db: Database,
}

impl CardFeeJob {
    pub fn new(db: Database) -> Self {
        CardFeeJob { db }
    }

    /// Books the fees of one order. Orders that are not settled (cancelled,
    /// reopened, still open) yield an empty report.
    pub async fn run_for_order(&self, order: &OrderRef, dry_run: bool) -> EngineResult<JobReport> {
        let mut report = JobReport::new(JOB_NAME, dry_run);
        let Some(settled) = self.db.orders().get_settled(order.channel, &order.order_id).await? else {
            debug!(order = %order, "Order not settled, no card fees");
            return Ok(report);
        };

        let configs = self.db.config().payment_methods().await?;
        let payments = self.db.orders().payments(order.channel, &order.order_id).await?;
        let grouped: Vec<(PaymentMethod, Money)> =
            payments.iter().map(|p| (p.method, p.amount())).collect();

        let mut tx = self.db.begin().await?;
        report.extend(book_order(&mut tx, &settled, grouped, &configs, dry_run).await?);
        if !dry_run {
            tx.commit().await?;
        }
        Ok(report)
    }

    /// Books the fees of every settled order with `from <= settled_at < to`.
    pub async fn run_between(&self, from: DateTime<Utc>, to: DateTime<Utc>, dry_run: bool) -> EngineResult<JobReport> {
        let mut report = JobReport::new(JOB_NAME, dry_run);
        let orders = self.db.orders().settled_between(from, to).await?;
        let configs = self.db.config().payment_methods().await?;

        let mut work = Vec::with_capacity(orders.len());
        for order in orders {
            let payments = self.db.orders().payments(order.channel, &order.order_id).await?;
            let grouped: Vec<(PaymentMethod, Money)> =
                payments.iter().map(|p| (p.method, p.amount())).collect();
            work.push((order, grouped));
        }

        let mut tx = self.db.begin().await?;
        for (order, grouped) in work {
            report.extend(book_order(&mut tx, &order, grouped, &configs, dry_run).await?);
        }
        if !dry_run {
            tx.commit().await?;
        }

        info!(
            from = %from,
            to = %to,
            dry_run,
            created = report.counters.created,
            would_create = report.counters.would_create,
            existing = report.counters.skipped_existing,
            "Card fee job finished"
        );
        Ok(report)
    }

    /// Cancels the live card-fee rows of an order. Used inside reversals and
    /// payment adjustments; booking after commit recreates what still applies.
    pub(crate) async fn cancel_for_order(conn: &mut SqliteConnection, order: &OrderRef) -> EngineResult<usize> {
        let mut cancelled = 0;
        for method in PaymentMethod::ALL {
            let reference = fees::card_fee_reference(order.channel, &order.order_id, method);
            let rows = FinanceRepository::find_by_reference(conn, &reference).await?;
            let ids: Vec<String> = live(&rows).map(|row| row.id.clone()).collect();
            for id in ids {
                if FinanceRepository::update_status(conn, &id, FinancialStatus::Cancelled, None).await? {
                    cancelled += 1;
                }
            }
        }
        if cancelled > 0 {
            debug!(order = %order, cancelled, "Card fee rows cancelled");
        }
        Ok(cancelled)
    }
}

async fn book_order(
    conn: &mut SqliteConnection,
    order: &SettledOrder,
    payments: Vec<(PaymentMethod, Money)>,
    configs: &[PaymentMethodConfig],
    dry_run: bool,
) -> EngineResult<Vec<ReconcileOutcome>> {
    let mut outcomes = Vec::new();

    for (method, base) in fees::group_by_method(payments) {
        let rate = fees::fee_rate(configs, method);
        if rate.is_zero() {
            continue;
        }
        let reference = fees::card_fee_reference(order.channel, &order.order_id, method);
        let fee = base.apply_rate(rate);
        if !fee.is_positive() {
            outcomes.push(ReconcileOutcome::SkippedZero { reference });
            continue;
        }

        let rows = FinanceRepository::find_by_reference(conn, &reference).await?;
        if live(&rows).next().is_some() {
            outcomes.push(ReconcileOutcome::SkippedExisting { reference });
            continue;
        }

        if dry_run {
            outcomes.push(ReconcileOutcome::WouldCreate { reference, amount: fee });
            continue;
        }

        let row = FinanceRepository::insert_transaction(
            conn,
            NewFinancialTransaction {
                transaction_type: TransactionType::Expense,
                category: CARD_FEE_CATEGORY.to_string(),
                description: format!("Taxa {} pedido {}", method, order.order_number),
                amount: fee,
                status: FinancialStatus::Paid,
                transaction_date: order.settled_at,
                due_date: None,
                paid_at: Some(order.settled_at),
                reference_number: Some(reference.clone()),
            },
        )
        .await?;
        outcomes.push(ReconcileOutcome::Created {
            reference,
            transaction_id: row.id,
            amount: fee,
        });
    }

    Ok(outcomes)
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
    use sorveteria_core::Channel;

    #[tokio::test]
    async fn test_fees_booked_once_per_method() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 2)]);
        request.payments = vec![
            PaymentRequest::new(PaymentMethod::Credit, 2000),
            PaymentRequest::new(PaymentMethod::Debit, 1000),
            PaymentRequest::new(PaymentMethod::Cash, 600),
        ];
        let receipt = shop.engine.settle_sale(request).await.unwrap();
        let order = OrderRef::new(Channel::Sale, &receipt.order.id);

        // Booked after commit by the engine: a re-run finds both rows.
        let job = CardFeeJob::new(shop.db.clone());
        let report = job.run_for_order(&order, false).await.unwrap();
        assert_eq!(report.counters.created, 0);
        assert_eq!(report.counters.skipped_existing, 2);

        let credit = fees::card_fee_reference(Channel::Sale, &receipt.order.id, PaymentMethod::Credit);
        let rows = shop.db.finance().by_reference(&credit).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].amount(), Money::from_cents(70));
        assert_eq!(rows[0].category, CARD_FEE_CATEGORY);
        assert_eq!(rows[0].transaction_type, TransactionType::Expense);
    }

    #[tokio::test]
    async fn test_batch_fills_gaps_and_dry_run_writes_nothing() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 1)]);
        request.payments = vec![PaymentRequest::new(PaymentMethod::Credit, 1800)];
        let receipt = shop.engine.settle_sale(request).await.unwrap();
        let order = OrderRef::new(Channel::Sale, &receipt.order.id);

        let mut tx = shop.db.begin().await.unwrap();
        assert_eq!(CardFeeJob::cancel_for_order(&mut tx, &order).await.unwrap(), 1);
        tx.commit().await.unwrap();

        let job = CardFeeJob::new(shop.db.clone());
        let from = receipt.order.created_at - chrono::Duration::hours(1);
        let to = receipt.order.created_at + chrono::Duration::hours(1);

        let dry = job.run_between(from, to, true).await.unwrap();
        assert!(dry.dry_run);
        assert_eq!(dry.counters.would_create, 1);
        assert_eq!(
            dry.items[0],
            ReconcileOutcome::WouldCreate {
                reference: fees::card_fee_reference(Channel::Sale, &receipt.order.id, PaymentMethod::Credit),
                amount: Money::from_cents(63),
            }
        );

        let first = job.run_between(from, to, false).await.unwrap();
        assert_eq!(first.counters.created, 1);
        let second = job.run_between(from, to, false).await.unwrap();
        assert_eq!(second.counters.created, 0);
        assert_eq!(second.counters.skipped_existing, 1);
    }

    #[tokio::test]
    async fn test_unsettled_order_has_no_fees() {
        let shop = Shop::new().await;
        let job = CardFeeJob::new(shop.db.clone());
        let report = job
            .run_for_order(&OrderRef::new(Channel::Comanda, "missing"), false)
            .await
            .unwrap();
        assert!(report.items.is_empty());
    }
}
