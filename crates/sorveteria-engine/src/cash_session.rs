//! # Cash Session Manager
//!
//! Lifecycle of a terminal's cash drawer and the cross-check report.
//!
//! ## State Machine
//! ```text
//!   open(terminal, float)
//!        │
//!        ▼
//!   ┌─────────┐  cashier_close(counted)  ┌────────────────┐  manager_close  ┌────────────────┐
//!   │  open   │ ───────────────────────► │ cashier_closed │ ──────────────► │ manager_closed │
//!   └─────────┘                          └────────────────┘                 └────────────────┘
//!        ▲ settlements only land here
//! ```
//!
//! At most one `open` session per terminal: enforced by a partial unique
//! index, surfaced as `Conflict`.

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::EngineResult;
use sorveteria_core::session::{self, SessionTotals};
use sorveteria_core::validation::{validate_non_negative_cents, validate_terminal_id, validate_text};
use sorveteria_core::{CashBreakdownEntry, CashSession, CashSessionStatus, CoreError, Money, PaymentMethod};
use sorveteria_db::{CashSessionRepository, Database, OrderRepository};

/// Outcome of `recalculate_totals`.
#[derive(Debug, Clone, Serialize)]
pub struct Recalculation {
    pub session_id: String,
    pub before: SessionTotals,
    pub after: SessionTotals,
}

impl Recalculation {
    pub fn drifted(&self) -> bool {
        self.before != self.after
    }
}

/// Session figures next to the same figures re-derived from payment rows.
#[derive(Debug, Clone, Serialize)]
pub struct SessionReport {
    pub session: CashSession,
    /// Running totals kept on the session row.
    pub stored: SessionTotals,
    /// Sum of the payment rows of every settled order of the session.
    pub from_payments: SessionTotals,
    pub orders: usize,
    pub breakdown: Vec<CashBreakdownEntry>,
    pub drift: bool,
}

#[derive(Debug, Clone)]
pub struct CashSessionManager {
    db: Database,
}

impl CashSessionManager {
    pub fn new(db: Database) -> Self {
        CashSessionManager { db }
    }

    /// Opens a session on a terminal with all totals at zero.
    pub async fn open(&self, terminal_id: &str, initial_cash: Money, opened_by: &str) -> EngineResult<CashSession> {
        let terminal_id = validate_terminal_id(terminal_id)?;
        let opened_by = validate_text("opened_by", opened_by, 100)?;
        validate_non_negative_cents("initial_cash", initial_cash.cents())?;

        let sessions = self.db.cash_sessions();
        if let Some(existing) = sessions.find_open(&terminal_id).await? {
            return Err(already_open(&terminal_id, &existing.id).into());
        }

        let session = match sessions.insert_open(&terminal_id, &opened_by, initial_cash).await {
            Ok(session) => session,
            Err(err) if err.is_unique_violation() => {
                return Err(CoreError::conflict(
                    "CashSession",
                    format!("terminal {} already has an open session", terminal_id),
                )
                .into())
            }
            Err(err) => return Err(err.into()),
        };

        info!(
            session_id = %session.id,
            terminal_id = %terminal_id,
            initial_cash = %initial_cash,
            "Cash session opened"
        );
        Ok(session)
    }

    /// Most recent session of the terminal still open or awaiting the manager.
    pub async fn current(&self, terminal_id: &str) -> EngineResult<CashSession> {
        self.db
            .cash_sessions()
            .current_for_terminal(terminal_id)
            .await?
            .ok_or_else(|| CoreError::not_found("CashSession", format!("terminal {}", terminal_id)).into())
    }

    pub async fn get(&self, session_id: &str) -> EngineResult<CashSession> {
        self.db
            .cash_sessions()
            .get(session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("CashSession", session_id).into())
    }

    /// Records the operator's count and moves `open → cashier_closed`.
    ///
    /// The difference is `counted - total_cash`; the opening float is not part
    /// of `total_cash`.
    pub async fn cashier_close(
        &self,
        session_id: &str,
        counted_cash: Money,
        breakdown: Vec<(PaymentMethod, Money)>,
        closed_by: &str,
    ) -> EngineResult<CashSession> {
        validate_non_negative_cents("counted_cash", counted_cash.cents())?;
        for (method, amount) in &breakdown {
            validate_non_negative_cents(&format!("breakdown.{}", method), amount.cents())?;
        }
        let closed_by = validate_text("closed_by", closed_by, 100)?;

        let mut tx = self.db.begin().await?;
        let current = CashSessionRepository::find(&mut tx, session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("CashSession", session_id))?;
        session::ensure_transition(session_id, current.status, CashSessionStatus::CashierClosed)?;

        let difference = session::cashier_difference(counted_cash, current.total_cash());
        let now = Utc::now();

        CashSessionRepository::replace_breakdown(&mut tx, session_id, &breakdown).await?;
        if !CashSessionRepository::mark_cashier_closed(&mut tx, session_id, counted_cash, difference, &closed_by, now)
            .await?
        {
            return Err(lost_race(session_id, "open").into());
        }

        let closed = CashSessionRepository::find(&mut tx, session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("CashSession", session_id))?;
        tx.commit().await?;

        if !difference.is_zero() {
            warn!(session_id = %session_id, difference = %difference, "Cash drawer does not match");
        }
        info!(
            session_id = %session_id,
            counted = %counted_cash,
            total_cash = %current.total_cash(),
            "Cash session closed by cashier"
        );
        Ok(closed)
    }

    /// Supervisor validation: `cashier_closed → manager_closed`.
    pub async fn manager_close(
        &self,
        session_id: &str,
        manager_id: &str,
        notes: Option<&str>,
    ) -> EngineResult<CashSession> {
        let manager_id = validate_text("manager_id", manager_id, 100)?;
        let notes = notes.map(|n| validate_text("notes", n, 500)).transpose()?;

        let mut tx = self.db.begin().await?;
        let current = CashSessionRepository::find(&mut tx, session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("CashSession", session_id))?;
        session::ensure_transition(session_id, current.status, CashSessionStatus::ManagerClosed)?;

        if !CashSessionRepository::mark_manager_closed(&mut tx, session_id, &manager_id, notes.as_deref(), Utc::now())
            .await?
        {
            return Err(lost_race(session_id, "cashier_closed").into());
        }

        let closed = CashSessionRepository::find(&mut tx, session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("CashSession", session_id))?;
        tx.commit().await?;

        info!(session_id = %session_id, manager = %manager_id, "Cash session validated by manager");
        Ok(closed)
    }

    /// Re-derives the running totals from the settled orders and overwrites them.
    ///
    /// Idempotent: a second run finds nothing to correct.
    pub async fn recalculate_totals(&self, session_id: &str) -> EngineResult<Recalculation> {
        let mut tx = self.db.begin().await?;
        let current = CashSessionRepository::find(&mut tx, session_id)
            .await?
            .ok_or_else(|| CoreError::not_found("CashSession", session_id))?;

        let orders = OrderRepository::settled_for_session(&mut tx, session_id).await?;
        let payments = OrderRepository::settled_payments_for_session(&mut tx, session_id).await?;

        let mut after = SessionTotals::from_payments(&payments, Money::zero());
        after.sales = orders.iter().map(|o| o.total()).sum();

        let before = SessionTotals::of(&current);
        if before != after {
            CashSessionRepository::overwrite_totals(&mut tx, session_id, &after).await?;
        }
        tx.commit().await?;

        let recalculation = Recalculation {
            session_id: session_id.to_string(),
            before,
            after,
        };
        if recalculation.drifted() {
            warn!(
                session_id = %session_id,
                stored_sales = %before.sales,
                derived_sales = %after.sales,
                "Session totals drifted, overwritten"
            );
        } else {
            info!(session_id = %session_id, "Session totals already consistent");
        }
        Ok(recalculation)
    }

    pub async fn report(&self, session_id: &str) -> EngineResult<SessionReport> {
        let session = self.get(session_id).await?;
        let breakdown = self.db.cash_sessions().breakdown(session_id).await?;

        let mut conn = self.db.pool().acquire().await?;
        let orders = OrderRepository::settled_for_session(&mut conn, session_id).await?;
        let payments = OrderRepository::settled_payments_for_session(&mut conn, session_id).await?;
        drop(conn);

        let mut from_payments = SessionTotals::from_payments(&payments, Money::zero());
        from_payments.sales = orders.iter().map(|o| o.total()).sum();
        let stored = SessionTotals::of(&session);

        Ok(SessionReport {
            drift: stored != from_payments,
            stored,
            from_payments,
            orders: orders.len(),
            breakdown,
            session,
        })
    }
}

fn already_open(terminal_id: &str, session_id: &str) -> CoreError {
    CoreError::conflict(
        "CashSession",
        format!("terminal {} already has open session {}", terminal_id, session_id),
    )
}

fn lost_race(session_id: &str, expected: &str) -> CoreError {
    CoreError::invalid_state("CashSession", session_id, format!("session is no longer {}", expected))
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
    use sorveteria_core::ErrorKind;

    #[tokio::test]
    async fn test_second_open_session_conflicts() {
        let db = test_support::database().await;
        let sessions = CashSessionManager::new(db);

        let first = sessions.open("T1", Money::from_cents(10_000), "ana").await.unwrap();
        let err = sessions.open("T1", Money::zero(), "bia").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let untouched = sessions.get(&first.id).await.unwrap();
        assert_eq!(untouched.opened_by, "ana");
        assert_eq!(untouched.initial_cash_cents, 10_000);

        // Other terminals are independent
        assert!(sessions.open("T2", Money::zero(), "bia").await.is_ok());
    }

    #[tokio::test]
    async fn test_close_order_is_enforced() {
        let db = test_support::database().await;
        let sessions = CashSessionManager::new(db);
        let session = sessions.open("T1", Money::zero(), "ana").await.unwrap();

        let err = sessions.manager_close(&session.id, "gerente", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let closed = sessions
            .cashier_close(&session.id, Money::zero(), vec![], "ana")
            .await
            .unwrap();
        assert_eq!(closed.status, CashSessionStatus::CashierClosed);

        let err = sessions
            .cashier_close(&session.id, Money::zero(), vec![], "ana")
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);

        let validated = sessions
            .manager_close(&session.id, "gerente", Some("conferido"))
            .await
            .unwrap();
        assert_eq!(validated.status, CashSessionStatus::ManagerClosed);
        assert!(validated.manager_validated);

        let err = sessions.manager_close(&session.id, "gerente", None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidState);
    }

    #[tokio::test]
    async fn test_current_session() {
        let db = test_support::database().await;
        let sessions = CashSessionManager::new(db);

        let err = sessions.current("T9").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);

        let session = sessions.open("T9", Money::zero(), "ana").await.unwrap();
        sessions.cashier_close(&session.id, Money::zero(), vec![], "ana").await.unwrap();
        assert_eq!(sessions.current("T9").await.unwrap().id, session.id);

        sessions.manager_close(&session.id, "gerente", None).await.unwrap();
        assert!(sessions.current("T9").await.is_err());
    }

    #[tokio::test]
    async fn test_breakdown_is_replaced_on_close() {
        let db = test_support::database().await;
        let sessions = CashSessionManager::new(db);
        let session = sessions.open("T1", Money::zero(), "ana").await.unwrap();

        sessions
            .cashier_close(
                &session.id,
                Money::from_cents(1500),
                vec![
                    (PaymentMethod::Cash, Money::from_cents(1500)),
                    (PaymentMethod::Pix, Money::from_cents(700)),
                ],
                "ana",
            )
            .await
            .unwrap();

        let report = sessions.report(&session.id).await.unwrap();
        assert_eq!(report.breakdown.len(), 2);
        assert_eq!(report.orders, 0);
        assert!(!report.drift);
    }

    #[tokio::test]
    async fn test_recalculate_corrects_drift_once() {
        let shop = Shop::new().await;
        let session = test_support::open_session(&shop.db, "T1").await;
        let sessions = CashSessionManager::new(shop.db.clone());

        // Two picolés (3600) paid with 5000 in cash: 1400 back as change
        let mut request = test_support::sale(&session.id, vec![ItemRequest::unit(&shop.picole.id, 2)]);
        request.payments = vec![PaymentRequest::new(PaymentMethod::Cash, 5000)];
        shop.engine.settle_sale(request).await.unwrap();

        let clean = sessions.recalculate_totals(&session.id).await.unwrap();
        assert!(!clean.drifted());
        assert_eq!(clean.after.cash.cents(), 3600);

        let mut corrupted = clean.after;
        corrupted.cash = Money::from_cents(9_999);
        corrupted.sales = Money::from_cents(1);
        let mut tx = shop.db.begin().await.unwrap();
        CashSessionRepository::overwrite_totals(&mut tx, &session.id, &corrupted)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let first = sessions.recalculate_totals(&session.id).await.unwrap();
        assert!(first.drifted());
        assert_eq!(first.before.cash.cents(), 9_999);
        assert_eq!(first.after.cash.cents(), 3600);
        assert_eq!(first.after.sales.cents(), 3600);

        let stored = sessions.get(&session.id).await.unwrap();
        assert_eq!(stored.total_cash_cents, 3600);
        assert_eq!(stored.total_sales_cents, 3600);

        let second = sessions.recalculate_totals(&session.id).await.unwrap();
        assert!(!second.drifted());
        assert_eq!(second.after, first.after);
    }
}
