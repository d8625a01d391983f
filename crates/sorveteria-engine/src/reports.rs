//! # Reporting Aggregators
//!
//! Read-only views over committed data. Periods are half-open
//! (`from <= t < to`) and only settled orders count.
//!
//! ## DRE
//! ```text
//! gross revenue        Σ subtotal + fees of settled orders
//! − discounts          manual + coupon
//! = net revenue        Σ order totals
//! − cost of goods      Σ item cost snapshots
//! = gross profit
//! − card fees          live `card_fee` expense rows
//! + other revenues     ledger rows not derived from orders or sessions
//! − other expenses     ledger rows not derived from orders or sessions
//! = net result
//! ```

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::BTreeMap;

use crate::cash_session::{CashSessionManager, SessionReport};
use crate::error::EngineResult;
use sorveteria_core::validation::validate_positive_cents;
use sorveteria_core::{Channel, Money, PaymentMethod, TransactionType, ValidationError};
use sorveteria_db::{CategoryTotal, Database, ProductSales};

/// Largest `limit` accepted by [`ReportService::top_products`].
pub const MAX_TOP_PRODUCTS: i64 = 100;

/// Figures of one channel, or of all channels combined.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ChannelFigures {
    pub orders: i64,
    pub gross: Money,
    pub discounts: Money,
    pub fees: Money,
    pub total: Money,
    pub payments: BTreeMap<PaymentMethod, Money>,
}

impl ChannelFigures {
    fn merge(&mut self, other: &ChannelFigures) {
        self.orders += other.orders;
        self.gross += other.gross;
        self.discounts += other.discounts;
        self.fees += other.fees;
        self.total += other.total;
        for (method, amount) in &other.payments {
            *self.payments.entry(*method).or_insert_with(Money::zero) += *amount;
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChannelSummary {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Every channel, including the ones without orders.
    pub channels: BTreeMap<Channel, ChannelFigures>,
    pub combined: ChannelFigures,
}

/// One ledger category line of the DRE.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DreLine {
    pub category: String,
    pub amount: Money,
}

/// Income statement for a period.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Dre {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub gross_revenue: Money,
    pub discounts: Money,
    pub net_revenue: Money,
    pub cost_of_goods: Money,
    pub gross_profit: Money,
    pub card_fees: Money,
    pub other_revenues: Vec<DreLine>,
    pub other_expenses: Vec<DreLine>,
    pub net_result: Money,
}

#[derive(Debug, Clone)]
pub struct ReportService {
    db: Database,
}

impl ReportService {
    pub fn new(db: Database) -> Self {
        ReportService { db }
    }

    pub async fn session_report(&self, session_id: &str) -> EngineResult<SessionReport> {
        CashSessionManager::new(self.db.clone()).report(session_id).await
    }

    pub async fn channel_summary(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> EngineResult<ChannelSummary> {
        ensure_period(from, to)?;
        let totals = self.db.reports().channel_totals(from, to).await?;
        let methods = self.db.reports().method_totals(from, to).await?;

        let mut channels: BTreeMap<Channel, ChannelFigures> =
            Channel::ALL.iter().map(|c| (*c, ChannelFigures::default())).collect();
        for row in totals {
            let figures = channels.entry(row.channel).or_default();
            figures.orders = row.orders;
            figures.gross = Money::from_cents(row.subtotal_cents + row.fee_cents);
            figures.discounts = Money::from_cents(row.discount_cents);
            figures.fees = Money::from_cents(row.fee_cents);
            figures.total = Money::from_cents(row.total_cents);
        }
        for row in methods {
            *channels
                .entry(row.channel)
                .or_default()
                .payments
                .entry(row.method)
                .or_insert_with(Money::zero) += Money::from_cents(row.amount_cents);
        }

        let mut combined = ChannelFigures::default();
        for figures in channels.values() {
            combined.merge(figures);
        }

        Ok(ChannelSummary {
            from,
            to,
            channels,
            combined,
        })
    }

    pub async fn dre(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> EngineResult<Dre> {
        let summary = self.channel_summary(from, to).await?;
        let cost_of_goods = self.db.reports().cost_of_goods(from, to).await?;
        let card_fees = self.db.reports().card_fees(from, to).await?;
        let ledger = self.db.reports().ledger_by_category(from, to).await?;

        let lines = |kind: TransactionType, rows: &[CategoryTotal]| -> Vec<DreLine> {
            rows.iter()
                .filter(|row| row.transaction_type == kind)
                .map(|row| DreLine {
                    category: row.category.clone(),
                    amount: Money::from_cents(row.amount_cents),
                })
                .collect()
        };
        let other_revenues = lines(TransactionType::Revenue, &ledger);
        let other_expenses = lines(TransactionType::Expense, &ledger);

        let gross_revenue = summary.combined.gross;
        let discounts = summary.combined.discounts;
        let net_revenue = summary.combined.total;
        let gross_profit = net_revenue - cost_of_goods;
        let net_result = gross_profit - card_fees + other_revenues.iter().map(|l| l.amount).sum::<Money>()
            - other_expenses.iter().map(|l| l.amount).sum::<Money>();

        Ok(Dre {
            from,
            to,
            gross_revenue,
            discounts,
            net_revenue,
            cost_of_goods,
            gross_profit,
            card_fees,
            other_revenues,
            other_expenses,
            net_result,
        })
    }

    /// Best sellers by revenue.
    pub async fn top_products(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        limit: i64,
    ) -> EngineResult<Vec<ProductSales>> {
        ensure_period(from, to)?;
        validate_positive_cents("limit", limit)?;
        Ok(self
            .db
            .reports()
            .top_products(from, to, limit.min(MAX_TOP_PRODUCTS))
            .await?)
    }
}

fn ensure_period(from: DateTime<Utc>, to: DateTime<Utc>) -> Result<(), ValidationError> {
    if from >= to {
        return Err(ValidationError::InvalidFormat {
            field: "period".to_string(),
            reason: "from must be before to".to_string(),
        });
    }
    Ok(())
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{AccountsService, PayableDraft};
    use crate::settlement::{CloseComanda, DeliveryRequest};
    use crate::test_support::{self, Shop};
    use chrono::Duration;
    use sorveteria_core::pricing::ItemRequest;
    use sorveteria_core::settlement::PaymentRequest;

    fn window() -> (DateTime<Utc>, DateTime<Utc>) {
        let now = Utc::now();
        (now - Duration::days(1), now + Duration::days(1))
    }

    #[tokio::test]
    async fn test_channel_summary_and_dre() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;

        // Sale: 2 picolés, 3600, paid by credit. Card fee 126.
        let mut sale = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 2)]);
        sale.payments = vec![PaymentRequest::new(PaymentMethod::Credit, 3600)];
        shop.engine.settle_sale(sale).await.unwrap();

        // Comanda: 1 picolé with a 200 discount, paid in cash.
        let comanda = shop.engine.open_comanda(&session.id, "5", None, "ana").await.unwrap();
        shop.engine
            .add_comanda_item(&comanda.id, ItemRequest::unit(&shop.picole.id, 1))
            .await
            .unwrap();
        shop.engine
            .close_comanda(
                &comanda.id,
                CloseComanda {
                    payments: vec![PaymentRequest::new(PaymentMethod::Cash, 1600)],
                    discount_cents: 200,
                    operator_id: "ana".to_string(),
                    ..CloseComanda::default()
                },
            )
            .await
            .unwrap();

        // Cancelled delivery: never counted.
        let mut settlement = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 1)]);
        settlement.delivery_fee_cents = 500;
        settlement.payments = vec![PaymentRequest::new(PaymentMethod::Pix, 2300)];
        let delivery = shop
            .engine
            .create_delivery(DeliveryRequest {
                settlement,
                recipient_name: "Rui".to_string(),
                phone: None,
                address: "Av. Brasil, 200".to_string(),
            })
            .await
            .unwrap();
        shop.engine.cancel_delivery(&delivery.order.id, "desistiu").await.unwrap();

        let reports = ReportService::new(shop.db.clone());
        let (from, to) = window();
        let summary = reports.channel_summary(from, to).await.unwrap();

        assert_eq!(summary.channels.len(), 3);
        assert_eq!(summary.channels[&Channel::Sale].orders, 1);
        assert_eq!(summary.channels[&Channel::Comanda].discounts.cents(), 200);
        assert_eq!(summary.channels[&Channel::Delivery].orders, 0);
        assert_eq!(summary.combined.orders, 2);
        assert_eq!(summary.combined.gross.cents(), 5400);
        assert_eq!(summary.combined.total.cents(), 5200);
        assert_eq!(summary.combined.payments[&PaymentMethod::Credit].cents(), 3600);
        assert_eq!(summary.combined.payments[&PaymentMethod::Cash].cents(), 1600);

        // An ordinary expense counts, derived rows do not.
        let accounts = AccountsService::new(shop.db.clone());
        let payable = accounts
            .create_payable(PayableDraft {
                supplier: "Gás Sul".to_string(),
                description: "Botijão".to_string(),
                category: "utilities".to_string(),
                amount_cents: 1000,
                due_date: Utc::now().date_naive(),
            })
            .await
            .unwrap();
        accounts.pay_payable(&payable.id, None).await.unwrap();

        let dre = reports.dre(from, to).await.unwrap();
        assert_eq!(dre.gross_revenue.cents(), 5400);
        assert_eq!(dre.discounts.cents(), 200);
        assert_eq!(dre.net_revenue.cents(), 5200);
        assert_eq!(dre.card_fees.cents(), 126);
        assert!(dre.other_revenues.is_empty());
        assert_eq!(dre.other_expenses.len(), 1);
        assert_eq!(dre.other_expenses[0].category, "utilities");
        assert_eq!(
            dre.net_result,
            dre.net_revenue - dre.cost_of_goods - Money::from_cents(126) - Money::from_cents(1000)
        );
    }

    #[tokio::test]
    async fn test_top_products() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        shop.engine
            .settle_sale(test_support::sale(
                &session.id,
                vec![ItemRequest::unit(&shop.picole.id, 3), ItemRequest::weighed(&shop.kilo.id, 500)],
            ))
            .await
            .unwrap();

        let reports = ReportService::new(shop.db.clone());
        let (from, to) = window();
        let top = reports.top_products(from, to, 1).await.unwrap();
        assert_eq!(top.len(), 1);
        assert_eq!(top[0].product_id, shop.picole.id);
        assert_eq!(top[0].quantity, 3);
        assert_eq!(top[0].revenue_cents, 5400);

        let err = reports.top_products(to, from, 5).await.unwrap_err();
        assert_eq!(err.kind(), sorveteria_core::ErrorKind::ValidationError);
    }
}
