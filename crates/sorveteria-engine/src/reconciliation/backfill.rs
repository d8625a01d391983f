//! Revenue rows for closed cash sessions that never got one.

use tracing::info;

use super::live;
use crate::error::EngineResult;
use sorveteria_core::fees::{self, SALES_CATEGORY};
use sorveteria_core::reconcile::{JobReport, ReconcileOutcome};
use sorveteria_core::{FinancialStatus, TransactionType};
use sorveteria_db::{Database, FinanceRepository, NewFinancialTransaction};

pub const JOB_NAME: &str = "cash_session_backfill";

#[derive(Debug, Clone)]
pub struct SessionBackfill {
    db: Database,
}

impl SessionBackfill {
    pub fn new(db: Database) -> Self {
        SessionBackfill { db }
    }

    /// One `sales` revenue row per closed session, dated at its close time,
    /// for the session's total sales.
    pub async fn run(&self, dry_run: bool) -> EngineResult<JobReport> {
        let mut report = JobReport::new(JOB_NAME, dry_run);
        let sessions = self.db.cash_sessions().list_closed().await?;

        let mut tx = self.db.begin().await?;
        for session in &sessions {
            let reference = fees::cash_session_reference(&session.id);

            let rows = FinanceRepository::find_by_reference(&mut tx, &reference).await?;
            if live(&rows).next().is_some() {
                report.record(ReconcileOutcome::SkippedExisting { reference });
                continue;
            }

            let amount = session.total_sales();
            if !amount.is_positive() {
                report.record(ReconcileOutcome::SkippedZero { reference });
                continue;
            }

            if dry_run {
                report.record(ReconcileOutcome::WouldCreate { reference, amount });
                continue;
            }

            let closed_at = session.closed_at().unwrap_or(session.updated_at);
            let row = FinanceRepository::insert_transaction(
                &mut tx,
                NewFinancialTransaction {
                    transaction_type: TransactionType::Revenue,
                    category: SALES_CATEGORY.to_string(),
                    description: format!("Vendas do caixa {} ({})", session.terminal_id, closed_at.date_naive()),
                    amount,
                    status: FinancialStatus::Paid,
                    transaction_date: closed_at,
                    due_date: None,
                    paid_at: Some(closed_at),
                    reference_number: Some(reference.clone()),
                },
            )
            .await?;
            report.record(ReconcileOutcome::Created {
                reference,
                transaction_id: row.id,
                amount,
            });
        }
        if !dry_run {
            tx.commit().await?;
        }

        info!(
            sessions = sessions.len(),
            dry_run,
            created = report.counters.created,
            would_create = report.counters.would_create,
            existing = report.counters.skipped_existing,
            zero = report.counters.skipped_zero,
            "Cash session backfill finished"
        );
        Ok(report)
    }
}
