//! Syncs ledger rows with the status of paid or cancelled obligations.

use chrono::{DateTime, Utc};
use sqlx::SqliteConnection;
use tracing::{info, warn};

use crate::error::EngineResult;
use sorveteria_core::fees;
use sorveteria_core::reconcile::{plan_status_sync, JobReport, ReconcileOutcome, StatusDecision};
use sorveteria_core::{AccountKind, FinancialStatus};
use sorveteria_db::{Database, FinanceRepository};

pub const JOB_NAME: &str = "status_sync";

/// The fields of an obligation the reconciler reads.
#[derive(Debug, Clone)]
struct Obligation {
    kind: AccountKind,
    id: String,
    status: FinancialStatus,
    paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct StatusSyncJob {
    db: Database,
    cancel_duplicates: bool,
}

impl StatusSyncJob {
    pub fn new(db: Database) -> Self {
        StatusSyncJob {
            db,
            cancel_duplicates: false,
        }
    }

    /// Also cancel live legacy-keyed rows shadowed by a primary-keyed row.
    pub fn cancel_duplicates(mut self, cancel: bool) -> Self {
        self.cancel_duplicates = cancel;
        self
    }

    pub async fn run(&self, dry_run: bool) -> EngineResult<JobReport> {
        let mut report = JobReport::new(JOB_NAME, dry_run);

        let mut obligations: Vec<Obligation> = self
            .db
            .finance()
            .settled_payables()
            .await?
            .into_iter()
            .map(|p| Obligation {
                kind: AccountKind::Payable,
                id: p.id,
                status: p.status,
                paid_at: p.paid_at,
            })
            .collect();
        obligations.extend(self.db.finance().settled_receivables().await?.into_iter().map(|r| Obligation {
            kind: AccountKind::Receivable,
            id: r.id,
            status: r.status,
            paid_at: r.paid_at,
        }));

        let mut tx = self.db.begin().await?;
        for obligation in &obligations {
            report.extend(self.sync(&mut tx, obligation, dry_run).await?);
        }
        if !dry_run {
            tx.commit().await?;
        }

        info!(
            obligations = obligations.len(),
            dry_run,
            updated = report.counters.updated,
            would_update = report.counters.would_update,
            duplicates = report.counters.cancelled_duplicates,
            ambiguous = report.counters.skipped_ambiguous,
            "Status sync finished"
        );
        Ok(report)
    }

    async fn sync(
        &self,
        conn: &mut SqliteConnection,
        obligation: &Obligation,
        dry_run: bool,
    ) -> EngineResult<Vec<ReconcileOutcome>> {
        let reference = fees::account_reference(obligation.kind, &obligation.id);
        let legacy_reference = fees::legacy_account_reference(obligation.kind, &obligation.id);

        let primary = FinanceRepository::find_by_reference(conn, &reference).await?;
        let legacy = FinanceRepository::find_by_reference(conn, &legacy_reference).await?;
        let plan = plan_status_sync(obligation.status, obligation.paid_at, &primary, &legacy);

        // The reference of the row actually targeted.
        let target_reference = |id: &str| {
            if primary.iter().any(|row| row.id == id) {
                reference.clone()
            } else {
                legacy_reference.clone()
            }
        };

        let mut outcomes = Vec::new();
        match plan.decision {
            StatusDecision::NoCandidate => {
                warn!(reference = %reference, "No ledger row for settled obligation");
                outcomes.push(ReconcileOutcome::SkippedAmbiguous {
                    subject: reference.clone(),
                    reason: "no ledger row carries the primary or legacy key".to_string(),
                });
            }
            StatusDecision::Ambiguous { reason } => {
                warn!(reference = %reference, reason = %reason, "Ambiguous ledger rows for obligation");
                outcomes.push(ReconcileOutcome::SkippedAmbiguous {
                    subject: reference.clone(),
                    reason,
                });
            }
            StatusDecision::UpToDate { transaction_id } => {
                outcomes.push(ReconcileOutcome::SkippedExisting {
                    reference: target_reference(&transaction_id),
                });
            }
            StatusDecision::Update {
                transaction_id,
                status,
                paid_at,
            } => {
                let row_reference = target_reference(&transaction_id);
                if dry_run {
                    outcomes.push(ReconcileOutcome::WouldUpdate {
                        reference: row_reference,
                        transaction_id,
                        status,
                    });
                } else {
                    FinanceRepository::update_status(conn, &transaction_id, status, paid_at).await?;
                    outcomes.push(ReconcileOutcome::Updated {
                        reference: row_reference,
                        transaction_id,
                        status,
                    });
                }
            }
        }

        if self.cancel_duplicates && !dry_run {
            for transaction_id in plan.duplicates {
                if FinanceRepository::update_status(conn, &transaction_id, FinancialStatus::Cancelled, None).await? {
                    outcomes.push(ReconcileOutcome::CancelledDuplicate {
                        reference: legacy_reference.clone(),
                        transaction_id,
                    });
                }
            }
        } else if !plan.duplicates.is_empty() {
            warn!(
                reference = %reference,
                duplicates = plan.duplicates.len(),
                "Legacy duplicates left in place"
            );
        }

        Ok(outcomes)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support;
    use chrono::{NaiveDate, Utc};
    use sorveteria_core::{Money, TransactionType};
    use sorveteria_db::{NewFinancialTransaction, NewPayable};

    async fn payable_with_rows(db: &Database, references: &[String]) -> String {
        let mut tx = db.begin().await.unwrap();
        let payable = FinanceRepository::insert_payable(
            &mut tx,
            NewPayable {
                supplier: "Laticínios Serra".to_string(),
                description: "Leite".to_string(),
                category: "supplies".to_string(),
                amount: Money::from_cents(50_000),
                due_date: NaiveDate::from_ymd_opt(2026, 3, 10).unwrap(),
            },
        )
        .await
        .unwrap();
        for reference in references {
            let reference = reference.replace("{id}", &payable.id);
            FinanceRepository::insert_transaction(
                &mut tx,
                NewFinancialTransaction {
                    transaction_type: TransactionType::Expense,
                    category: "supplies".to_string(),
                    description: "Leite".to_string(),
                    amount: Money::from_cents(50_000),
                    status: FinancialStatus::Pending,
                    transaction_date: Utc::now(),
                    due_date: None,
                    paid_at: None,
                    reference_number: Some(reference),
                },
            )
            .await
            .unwrap();
        }
        FinanceRepository::settle_payable(&mut tx, &payable.id, FinancialStatus::Paid, Some(Utc::now()))
            .await
            .unwrap();
        tx.commit().await.unwrap();
        payable.id
    }

    #[tokio::test]
    async fn test_legacy_row_is_synced() {
        let db = test_support::database().await;
        let id = payable_with_rows(&db, &["AP-{id}".to_string()]).await;

        let job = StatusSyncJob::new(db.clone());
        let dry = job.run(true).await.unwrap();
        assert_eq!(dry.counters.would_update, 1);

        let report = job.run(false).await.unwrap();
        assert_eq!(report.counters.updated, 1);
        let rows = db.finance().by_reference(&format!("AP-{}", id)).await.unwrap();
        assert_eq!(rows[0].status, FinancialStatus::Paid);
        assert!(rows[0].paid_at.is_some());

        let again = job.run(false).await.unwrap();
        assert_eq!(again.counters.updated, 0);
        assert_eq!(again.counters.skipped_existing, 1);
    }

    #[tokio::test]
    async fn test_duplicates_cancelled_on_request() {
        let db = test_support::database().await;
        let id = payable_with_rows(&db, &["PAYABLE-{id}".to_string(), "AP-{id}".to_string()]).await;

        let report = StatusSyncJob::new(db.clone()).run(false).await.unwrap();
        assert_eq!(report.counters.updated, 1);
        assert_eq!(report.counters.cancelled_duplicates, 0);

        let report = StatusSyncJob::new(db.clone()).cancel_duplicates(true).run(false).await.unwrap();
        assert_eq!(report.counters.skipped_existing, 1);
        assert_eq!(report.counters.cancelled_duplicates, 1);
        let legacy = db.finance().by_reference(&format!("AP-{}", id)).await.unwrap();
        assert_eq!(legacy[0].status, FinancialStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_no_candidate_and_ambiguous_are_reported_only() {
        let db = test_support::database().await;
        payable_with_rows(&db, &[]).await;
        payable_with_rows(&db, &["AP-{id}".to_string(), "AP-{id}".to_string()]).await;

        let report = StatusSyncJob::new(db.clone()).run(false).await.unwrap();
        assert_eq!(report.counters.skipped_ambiguous, 2);
        assert!(report.items.iter().all(|item| !item.is_write()));
    }
}
