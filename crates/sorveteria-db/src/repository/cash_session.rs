//! # Cash Session Repository
//!
//! Till sessions, their running totals and the closing breakdown.
//!
//! ## Guarded Transitions
//! ```text
//! lock_open       UPDATE ... WHERE id = ? AND status = 'open'
//! cashier_close   UPDATE ... WHERE id = ? AND status = 'open'
//! manager_close   UPDATE ... WHERE id = ? AND status = 'cashier_closed'
//!
//! rows_affected == 0 → the session moved under us (or never existed)
//! ```
//!
//! `lock_open` is the first statement of every settlement transaction. It
//! takes the SQLite write lock, so concurrent settlements on any session run
//! one after the other and every later read in the transaction is current.

use chrono::{DateTime, Utc};
use sqlx::{SqliteConnection, SqlitePool};
use tracing::debug;

use super::new_id;
use crate::error::DbResult;
use sorveteria_core::session::SessionTotals;
use sorveteria_core::{CashBreakdownEntry, CashSession, CashSessionStatus, Money, PaymentMethod};

#[derive(Debug, Clone)]
pub struct CashSessionRepository {
    pool: SqlitePool,
}

impl CashSessionRepository {
    pub fn new(pool: SqlitePool) -> Self {
        CashSessionRepository { pool }
    }

    /// Inserts a new open session with zero totals.
    ///
    /// A second open session on the same terminal hits the partial unique
    /// index and surfaces as `DbError::UniqueViolation`.
    pub async fn insert_open(
        &self,
        terminal_id: &str,
        opened_by: &str,
        initial_cash: Money,
    ) -> DbResult<CashSession> {
        let now = Utc::now();
        let session = CashSession {
            id: new_id(),
            terminal_id: terminal_id.to_string(),
            opened_by: opened_by.to_string(),
            initial_cash_cents: initial_cash.cents(),
            total_cash_cents: 0,
            total_debit_cents: 0,
            total_credit_cents: 0,
            total_pix_cents: 0,
            total_other_cents: 0,
            total_sales_cents: 0,
            status: CashSessionStatus::Open,
            counted_cash_cents: None,
            cashier_difference_cents: None,
            cashier_closed_by: None,
            cashier_closed_at: None,
            manager_validated: false,
            manager_closed_by: None,
            manager_notes: None,
            manager_closed_at: None,
            opened_at: now,
            updated_at: now,
        };

        sqlx::query(
            r#"
            INSERT INTO cash_sessions (
                id, terminal_id, opened_by, initial_cash_cents, status, opened_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
        )
        .bind(&session.id)
        .bind(&session.terminal_id)
        .bind(&session.opened_by)
        .bind(session.initial_cash_cents)
        .bind(session.status)
        .bind(session.opened_at)
        .bind(session.updated_at)
        .execute(&self.pool)
        .await?;

        debug!(session_id = %session.id, terminal_id = %terminal_id, "Cash session inserted");
        Ok(session)
    }

    pub async fn get(&self, id: &str) -> DbResult<Option<CashSession>> {
        let mut conn = self.pool.acquire().await?;
        Self::find(&mut conn, id).await
    }

    /// The open session of a terminal, if any.
    pub async fn find_open(&self, terminal_id: &str) -> DbResult<Option<CashSession>> {
        let session = sqlx::query_as::<_, CashSession>(
            "SELECT * FROM cash_sessions WHERE terminal_id = ?1 AND status = 'open'",
        )
        .bind(terminal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Most recent session of a terminal that is not yet manager-closed.
    pub async fn current_for_terminal(&self, terminal_id: &str) -> DbResult<Option<CashSession>> {
        let session = sqlx::query_as::<_, CashSession>(
            r#"
            SELECT * FROM cash_sessions
            WHERE terminal_id = ?1 AND status IN ('open', 'cashier_closed')
            ORDER BY opened_at DESC
            LIMIT 1
            "#,
        )
        .bind(terminal_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(session)
    }

    /// Sessions past the cashier count, oldest first. Input of the revenue backfill.
    pub async fn list_closed(&self) -> DbResult<Vec<CashSession>> {
        let sessions = sqlx::query_as::<_, CashSession>(
            r#"
            SELECT * FROM cash_sessions
            WHERE status IN ('cashier_closed', 'manager_closed')
            ORDER BY opened_at
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(sessions)
    }

    pub async fn breakdown(&self, session_id: &str) -> DbResult<Vec<CashBreakdownEntry>> {
        let entries = sqlx::query_as::<_, CashBreakdownEntry>(
            "SELECT * FROM cash_session_breakdowns WHERE session_id = ?1 ORDER BY method",
        )
        .bind(session_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    // =========================================================================
    // Connection-scoped
    // =========================================================================

    pub async fn find(conn: &mut SqliteConnection, id: &str) -> DbResult<Option<CashSession>> {
        let session = sqlx::query_as::<_, CashSession>("SELECT * FROM cash_sessions WHERE id = ?1")
            .bind(id)
            .fetch_optional(&mut *conn)
            .await?;
        Ok(session)
    }

    /// Touches an open session, taking the write lock. False when not open.
    pub async fn lock_open(conn: &mut SqliteConnection, id: &str) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE cash_sessions SET updated_at = ?1 WHERE id = ?2 AND status = 'open'",
        )
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Adds a (possibly negative) movement to the running totals.
    pub async fn apply_totals(
        conn: &mut SqliteConnection,
        id: &str,
        delta: &SessionTotals,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE cash_sessions SET
                total_cash_cents   = total_cash_cents + ?1,
                total_debit_cents  = total_debit_cents + ?2,
                total_credit_cents = total_credit_cents + ?3,
                total_pix_cents    = total_pix_cents + ?4,
                total_other_cents  = total_other_cents + ?5,
                total_sales_cents  = total_sales_cents + ?6,
                updated_at = ?7
            WHERE id = ?8
            "#,
        )
        .bind(delta.cash.cents())
        .bind(delta.debit.cents())
        .bind(delta.credit.cents())
        .bind(delta.pix.cents())
        .bind(delta.other.cents())
        .bind(delta.sales.cents())
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Replaces the running totals with re-derived ones.
    pub async fn overwrite_totals(
        conn: &mut SqliteConnection,
        id: &str,
        totals: &SessionTotals,
    ) -> DbResult<()> {
        sqlx::query(
            r#"
            UPDATE cash_sessions SET
                total_cash_cents = ?1, total_debit_cents = ?2, total_credit_cents = ?3,
                total_pix_cents = ?4, total_other_cents = ?5, total_sales_cents = ?6,
                updated_at = ?7
            WHERE id = ?8
            "#,
        )
        .bind(totals.cash.cents())
        .bind(totals.debit.cents())
        .bind(totals.credit.cents())
        .bind(totals.pix.cents())
        .bind(totals.other.cents())
        .bind(totals.sales.cents())
        .bind(Utc::now())
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// `open → cashier_closed`. False when the session was not open.
    pub async fn mark_cashier_closed(
        conn: &mut SqliteConnection,
        id: &str,
        counted_cash: Money,
        difference: Money,
        closed_by: &str,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cash_sessions SET
                status = 'cashier_closed',
                counted_cash_cents = ?1,
                cashier_difference_cents = ?2,
                cashier_closed_by = ?3,
                cashier_closed_at = ?4,
                updated_at = ?4
            WHERE id = ?5 AND status = 'open'
            "#,
        )
        .bind(counted_cash.cents())
        .bind(difference.cents())
        .bind(closed_by)
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `cashier_closed → manager_closed`. False when the session was not cashier-closed.
    pub async fn mark_manager_closed(
        conn: &mut SqliteConnection,
        id: &str,
        closed_by: &str,
        notes: Option<&str>,
        at: DateTime<Utc>,
    ) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE cash_sessions SET
                status = 'manager_closed',
                manager_validated = 1,
                manager_closed_by = ?1,
                manager_notes = ?2,
                manager_closed_at = ?3,
                updated_at = ?3
            WHERE id = ?4 AND status = 'cashier_closed'
            "#,
        )
        .bind(closed_by)
        .bind(notes)
        .bind(at)
        .bind(id)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Drops any earlier count and stores the new per-method one.
    pub async fn replace_breakdown(
        conn: &mut SqliteConnection,
        session_id: &str,
        entries: &[(PaymentMethod, Money)],
    ) -> DbResult<()> {
        sqlx::query("DELETE FROM cash_session_breakdowns WHERE session_id = ?1")
            .bind(session_id)
            .execute(&mut *conn)
            .await?;

        let now = Utc::now();
        for (method, amount) in entries {
            sqlx::query(
                r#"
                INSERT INTO cash_session_breakdowns (id, session_id, method, amount_cents, created_at)
                VALUES (?1, ?2, ?3, ?4, ?5)
                "#,
            )
            .bind(new_id())
            .bind(session_id)
            .bind(*method)
            .bind(amount.cents())
            .bind(now)
            .execute(&mut *conn)
            .await?;
        }
        Ok(())
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
