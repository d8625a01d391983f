//! # Reward Service
//!
//! Loyalty points and cashback: redemption, manual adjustment, ledger audit,
//! and the postings the settlement engine makes inside its own transaction.
//!
//! ## Ledger Entries
//! ```text
//! earn        +points / +cents   settlement of an order with a customer
//! redeem      -points / -cents   customer spends the balance
//! reversal    -points / -cents   order cancelled or reopened (bounded by balance)
//! adjustment  ±points / ±cents   staff correction (never below zero)
//! ```
//!
//! The balance on `customers` always equals the sum of the ledger: every
//! change is a posting, and a posting is refused rather than taking a balance
//! below zero.

use serde::Serialize;
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use sorveteria_core::rewards::{self, LedgerAudit, RewardAccrual};
use sorveteria_core::validation::validate_text;
use sorveteria_core::{CoreError, Customer, Money, OrderRef, RewardEntryType, ValidationError};
use sorveteria_db::{CustomerRepository, Database, LedgerPosting};

/// Balances right after a posting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewardBalances {
    pub loyalty_points: i64,
    pub cashback: Money,
}

impl RewardBalances {
    pub fn of(customer: &Customer) -> Self {
        RewardBalances {
            loyalty_points: customer.loyalty_points,
            cashback: customer.cashback_balance(),
        }
    }
}

/// What was taken back when an order's earnings were reversed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RewardReversal {
    pub points: i64,
    pub cashback: Money,
}

#[derive(Debug, Clone)]
pub struct RewardService {
    db: Database,
}

impl RewardService {
    pub fn new(db: Database) -> Self {
        RewardService { db }
    }

    /// Spends loyalty points. Fails `InsufficientBalance` above the balance.
    pub async fn redeem_points(&self, customer_id: &str, points: i64, description: Option<&str>) -> EngineResult<i64> {
        if points <= 0 {
            return Err(ValidationError::MustBePositive {
                field: "points".to_string(),
            }
            .into());
        }

        let mut tx = self.db.begin().await?;
        let customer = find_customer(&mut tx, customer_id).await?;
        rewards::ensure_balance("loyalty points", customer.loyalty_points, points)?;

        let posting = LedgerPosting {
            customer_id: customer.id.clone(),
            entry_type: RewardEntryType::Redeem,
            amount: -points,
            channel: None,
            order_id: None,
            description: description.map(str::to_string),
            expires_at: None,
        };
        let balance = CustomerRepository::post_points(&mut tx, &posting)
            .await?
            .ok_or_else(|| insufficient("loyalty points", customer.loyalty_points, points))?;
        tx.commit().await?;

        info!(customer_id = %customer_id, points, balance, "Loyalty points redeemed");
        Ok(balance)
    }

    /// Spends cashback. Fails `InsufficientBalance` above the balance.
    pub async fn redeem_cashback(
        &self,
        customer_id: &str,
        amount: Money,
        description: Option<&str>,
    ) -> EngineResult<Money> {
        if !amount.is_positive() {
            return Err(ValidationError::MustBePositive {
                field: "amount".to_string(),
            }
            .into());
        }

        let mut tx = self.db.begin().await?;
        let customer = find_customer(&mut tx, customer_id).await?;
        rewards::ensure_balance("cashback", customer.cashback_balance_cents, amount.cents())?;

        let posting = LedgerPosting {
            customer_id: customer.id.clone(),
            entry_type: RewardEntryType::Redeem,
            amount: -amount.cents(),
            channel: None,
            order_id: None,
            description: description.map(str::to_string),
            expires_at: None,
        };
        let balance = CustomerRepository::post_cashback(&mut tx, &posting)
            .await?
            .ok_or_else(|| insufficient("cashback", customer.cashback_balance_cents, amount.cents()))?;
        tx.commit().await?;

        info!(customer_id = %customer_id, amount = %amount, "Cashback redeemed");
        Ok(Money::from_cents(balance))
    }

    /// Manual signed correction of the points balance.
    pub async fn adjust_points(&self, customer_id: &str, delta: i64, reason: &str) -> EngineResult<i64> {
        let reason = validate_text("reason", reason, 200)?;
        if delta == 0 {
            return Err(ValidationError::required("delta").into());
        }

        let mut tx = self.db.begin().await?;
        let customer = find_customer(&mut tx, customer_id).await?;
        rewards::adjusted_balance("loyalty points", customer.loyalty_points, delta)?;

        let posting = LedgerPosting {
            customer_id: customer.id.clone(),
            entry_type: RewardEntryType::Adjustment,
            amount: delta,
            channel: None,
            order_id: None,
            description: Some(reason),
            expires_at: None,
        };
        let balance = CustomerRepository::post_points(&mut tx, &posting)
            .await?
            .ok_or_else(|| insufficient("loyalty points", customer.loyalty_points, -delta))?;
        tx.commit().await?;

        info!(customer_id = %customer_id, delta, balance, "Loyalty points adjusted");
        Ok(balance)
    }

    /// Manual signed correction of the cashback balance, in centavos.
    pub async fn adjust_cashback(&self, customer_id: &str, delta: Money, reason: &str) -> EngineResult<Money> {
        let reason = validate_text("reason", reason, 200)?;
        if delta.is_zero() {
            return Err(ValidationError::required("delta").into());
        }

        let mut tx = self.db.begin().await?;
        let customer = find_customer(&mut tx, customer_id).await?;
        rewards::adjusted_balance("cashback", customer.cashback_balance_cents, delta.cents())?;

        let posting = LedgerPosting {
            customer_id: customer.id.clone(),
            entry_type: RewardEntryType::Adjustment,
            amount: delta.cents(),
            channel: None,
            order_id: None,
            description: Some(reason),
            expires_at: None,
        };
        let balance = CustomerRepository::post_cashback(&mut tx, &posting)
            .await?
            .ok_or_else(|| insufficient("cashback", customer.cashback_balance_cents, -delta.cents()))?;
        tx.commit().await?;

        info!(customer_id = %customer_id, delta = %delta, "Cashback adjusted");
        Ok(Money::from_cents(balance))
    }

    /// Recomputes both balances from the ledgers.
    pub async fn audit_customer(&self, customer_id: &str) -> EngineResult<LedgerAudit> {
        let customer = self
            .db
            .customers()
            .get(customer_id)
            .await?
            .ok_or_else(|| CoreError::not_found("Customer", customer_id))?;

        let loyalty = self.db.customers().loyalty_ledger(customer_id).await?;
        let cashback = self.db.customers().cashback_ledger(customer_id).await?;
        let audit = rewards::audit_ledgers(&customer, &loyalty, &cashback);

        if !audit.is_consistent() {
            warn!(
                customer_id = %customer_id,
                stored_points = audit.stored_points,
                ledger_points = audit.ledger_points,
                stored_cashback = audit.stored_cashback_cents,
                ledger_cashback = audit.ledger_cashback_cents,
                broken_snapshots = audit.broken_snapshots,
                "Reward ledger drift"
            );
        }
        Ok(audit)
    }

    /// Audits every customer and returns the inconsistent ones.
    pub async fn audit_all(&self) -> EngineResult<Vec<LedgerAudit>> {
        let mut drifted = Vec::new();
        for customer in self.db.customers().list().await? {
            let audit = self.audit_customer(&customer.id).await?;
            if !audit.is_consistent() {
                drifted.push(audit);
            }
        }
        Ok(drifted)
    }

    // =========================================================================
    // Inside a settlement transaction
    // =========================================================================

    /// Posts the earn rows of a settled order.
    pub(crate) async fn earn_for_order(
        conn: &mut SqliteConnection,
        customer_id: &str,
        order: &OrderRef,
        order_number: &str,
        accrual: &RewardAccrual,
    ) -> EngineResult<()> {
        let description = Some(format!("Pedido {}", order_number));

        if accrual.points > 0 {
            let posting = LedgerPosting {
                customer_id: customer_id.to_string(),
                entry_type: RewardEntryType::Earn,
                amount: accrual.points,
                channel: Some(order.channel),
                order_id: Some(order.order_id.clone()),
                description: description.clone(),
                expires_at: accrual.points_expire_at,
            };
            CustomerRepository::post_points(conn, &posting).await?;
        }

        if accrual.cashback.is_positive() {
            let posting = LedgerPosting {
                customer_id: customer_id.to_string(),
                entry_type: RewardEntryType::Earn,
                amount: accrual.cashback.cents(),
                channel: Some(order.channel),
                order_id: Some(order.order_id.clone()),
                description,
                expires_at: accrual.cashback_expires_at,
            };
            CustomerRepository::post_cashback(conn, &posting).await?;
        }

        Ok(())
    }

    /// Takes back what an order earned, never more than the current balance.
    pub(crate) async fn reverse_for_order(
        conn: &mut SqliteConnection,
        customer_id: &str,
        order: &OrderRef,
        points_earned: i64,
        cashback_earned: Money,
    ) -> EngineResult<RewardReversal> {
        let customer = find_customer(conn, customer_id).await?;
        let points = rewards::bounded_reversal(customer.loyalty_points, points_earned);
        let cents = rewards::bounded_reversal(customer.cashback_balance_cents, cashback_earned.cents());

        if points < points_earned || cents < cashback_earned.cents() {
            warn!(
                customer_id = %customer_id,
                order = %order,
                points_earned,
                points_reversed = points,
                "Reward reversal bounded by balance already spent"
            );
        }

        let description = Some(format!("Estorno {}", order));

        if points > 0 {
            let posting = LedgerPosting {
                customer_id: customer_id.to_string(),
                entry_type: RewardEntryType::Reversal,
                amount: -points,
                channel: Some(order.channel),
                order_id: Some(order.order_id.clone()),
                description: description.clone(),
                expires_at: None,
            };
            CustomerRepository::post_points(conn, &posting).await?;
        }

        if cents > 0 {
            let posting = LedgerPosting {
                customer_id: customer_id.to_string(),
                entry_type: RewardEntryType::Reversal,
                amount: -cents,
                channel: Some(order.channel),
                order_id: Some(order.order_id.clone()),
                description,
                expires_at: None,
            };
            CustomerRepository::post_cashback(conn, &posting).await?;
        }

        Ok(RewardReversal {
            points,
            cashback: Money::from_cents(cents),
        })
    }
}

pub(crate) async fn find_customer(conn: &mut SqliteConnection, customer_id: &str) -> EngineResult<Customer> {
    CustomerRepository::find(conn, customer_id)
        .await?
        .ok_or_else(|| CoreError::not_found("Customer", customer_id).into())
}

fn insufficient(balance: &str, available: i64, requested: i64) -> EngineError {
    CoreError::InsufficientBalance {
        balance: balance.to_string(),
        available,
        requested,
    }
    .into()
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
    async fn test_redeem_and_adjust_keep_ledger_in_sync() {
        let db = test_support::database().await;
        let customer = test_support::customer(&db, "Ana").await;
        let rewards = RewardService::new(db.clone());

        assert_eq!(rewards.adjust_points(&customer.id, 50, "campanha de abertura").await.unwrap(), 50);
        assert_eq!(rewards.redeem_points(&customer.id, 20, None).await.unwrap(), 30);

        let err = rewards.redeem_points(&customer.id, 31, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

        let err = rewards.adjust_points(&customer.id, -31, "correção").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientBalance);

        rewards
            .adjust_cashback(&customer.id, Money::from_cents(500), "cortesia")
            .await
            .unwrap();
        let balance = rewards
            .redeem_cashback(&customer.id, Money::from_cents(200), Some("troca"))
            .await
            .unwrap();
        assert_eq!(balance.cents(), 300);

        let audit = rewards.audit_customer(&customer.id).await.unwrap();
        assert!(audit.is_consistent());
        assert_eq!(audit.ledger_points, 30);
        assert_eq!(audit.ledger_cashback_cents, 300);
        assert!(rewards.audit_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_reversal_is_bounded_by_balance() {
        let db = test_support::database().await;
        let customer = test_support::customer(&db, "Bia").await;
        let rewards = RewardService::new(db.clone());
        rewards.adjust_points(&customer.id, 10, "saldo inicial").await.unwrap();

        let order = OrderRef::new(sorveteria_core::Channel::Sale, "s1");
        let mut tx = db.begin().await.unwrap();
        let reversed = RewardService::reverse_for_order(&mut tx, &customer.id, &order, 25, Money::from_cents(100))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(reversed.points, 10);
        assert!(reversed.cashback.is_zero());
        let stored = db.customers().get(&customer.id).await.unwrap().unwrap();
        assert_eq!(stored.loyalty_points, 0);
    }

    #[tokio::test]
    async fn test_unknown_customer() {
        let db = test_support::database().await;
        let err = RewardService::new(db).redeem_points("nobody", 1, None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
