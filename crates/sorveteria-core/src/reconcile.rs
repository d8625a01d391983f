//! # Reconciliation Outcomes
//!
//! Tagged results of the financial reconciliation jobs and the pure decision
//! logic of the status reconciler.
//!
//! Jobs never ask "have I run before?". Every decision is derived from the
//! reference keys already present in the ledger.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ts_rs::TS;

use crate::money::Money;
use crate::types::{FinancialStatus, FinancialTransaction};

// =============================================================================
// Outcomes
// =============================================================================

/// What a job did (or would do) for one source item.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReconcileOutcome {
    Created {
        reference: String,
        transaction_id: String,
        amount: Money,
    },
    /// Dry run: the row that would have been created.
    WouldCreate { reference: String, amount: Money },
    Updated {
        reference: String,
        transaction_id: String,
        status: FinancialStatus,
    },
    /// Dry run: the status change that would have been written.
    WouldUpdate {
        reference: String,
        transaction_id: String,
        status: FinancialStatus,
    },
    /// A duplicate legacy-keyed row was cancelled.
    CancelledDuplicate {
        reference: String,
        transaction_id: String,
    },
    /// Row with this key already exists and is in sync.
    SkippedExisting { reference: String },
    /// Nothing to book (zero amount).
    SkippedZero { reference: String },
    /// Could not attribute with confidence. Reported, never written.
    SkippedAmbiguous { subject: String, reason: String },
}

impl ReconcileOutcome {
    /// Whether this outcome wrote to the ledger.
    pub fn is_write(&self) -> bool {
        matches!(
            self,
            ReconcileOutcome::Created { .. }
                | ReconcileOutcome::Updated { .. }
                | ReconcileOutcome::CancelledDuplicate { .. }
        )
    }
}

/// Per-kind counters of a job run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct JobCounters {
    pub created: usize,
    pub would_create: usize,
    pub updated: usize,
    pub would_update: usize,
    pub cancelled_duplicates: usize,
    pub skipped_existing: usize,
    pub skipped_zero: usize,
    pub skipped_ambiguous: usize,
}

/// Items that can be tallied into [`JobCounters`].
pub trait Tally {
    fn tally(&self, counters: &mut JobCounters);
}

impl Tally for ReconcileOutcome {
    fn tally(&self, counters: &mut JobCounters) {
        match self {
            ReconcileOutcome::Created { .. } => counters.created += 1,
            ReconcileOutcome::WouldCreate { .. } => counters.would_create += 1,
            ReconcileOutcome::Updated { .. } => counters.updated += 1,
            ReconcileOutcome::WouldUpdate { .. } => counters.would_update += 1,
            ReconcileOutcome::CancelledDuplicate { .. } => counters.cancelled_duplicates += 1,
            ReconcileOutcome::SkippedExisting { .. } => counters.skipped_existing += 1,
            ReconcileOutcome::SkippedZero { .. } => counters.skipped_zero += 1,
            ReconcileOutcome::SkippedAmbiguous { .. } => counters.skipped_ambiguous += 1,
        }
    }
}

/// Result of one job run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobReport<T = ReconcileOutcome> {
    pub job: String,
    pub dry_run: bool,
    pub items: Vec<T>,
    pub counters: JobCounters,
}

impl<T: Tally> JobReport<T> {
    pub fn new(job: impl Into<String>, dry_run: bool) -> Self {
        JobReport {
            job: job.into(),
            dry_run,
            items: Vec::new(),
            counters: JobCounters::default(),
        }
    }

    pub fn record(&mut self, item: T) {
        item.tally(&mut self.counters);
        self.items.push(item);
    }

    pub fn extend(&mut self, items: impl IntoIterator<Item = T>) {
        for item in items {
            self.record(item);
        }
    }
}

// =============================================================================
// Status Reconciler Decisions
// =============================================================================

/// What to do with the ledger row mirroring a settled obligation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StatusDecision {
    /// No row carries either key. Reported, never created.
    NoCandidate,
    Ambiguous { reason: String },
    UpToDate { transaction_id: String },
    Update {
        transaction_id: String,
        status: FinancialStatus,
        paid_at: Option<DateTime<Utc>>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusPlan {
    pub decision: StatusDecision,
    /// Live legacy rows shadowed by a primary-keyed row.
    pub duplicates: Vec<String>,
}

/// Picks the ledger row to sync with an obligation's status.
///
/// ```text
/// primary live rows   legacy live rows   decision
/// ─────────────────   ────────────────   ───────────────────────────────
///        1                  any          target primary, legacy = duplicates
///       >1                  any          Ambiguous
///        0                   1           target legacy
///        0                  >1           Ambiguous
///        0                   0           NoCandidate
/// ```
///
/// A row is live unless it is already cancelled. When the obligation itself is
/// cancelled and only cancelled rows exist, those rows are the in-sync target.
pub fn plan_status_sync(
    status: FinancialStatus,
    paid_at: Option<DateTime<Utc>>,
    primary: &[FinancialTransaction],
    legacy: &[FinancialTransaction],
) -> StatusPlan {
    let live = |rows: &[FinancialTransaction]| -> Vec<FinancialTransaction> {
        let open: Vec<FinancialTransaction> = rows
            .iter()
            .filter(|r| r.status != FinancialStatus::Cancelled)
            .cloned()
            .collect();
        if open.is_empty() && status == FinancialStatus::Cancelled {
            rows.to_vec()
        } else {
            open
        }
    };

    let primary_rows = live(primary);
    let legacy_live: Vec<&FinancialTransaction> = legacy
        .iter()
        .filter(|r| r.status != FinancialStatus::Cancelled)
        .collect();

    let (target, duplicates) = match primary_rows.len() {
        1 => (
            primary_rows[0].clone(),
            legacy_live.iter().map(|r| r.id.clone()).collect(),
        ),
        0 => {
            let legacy_rows = live(legacy);
            match legacy_rows.len() {
                0 => {
                    return StatusPlan {
                        decision: StatusDecision::NoCandidate,
                        duplicates: Vec::new(),
                    }
                }
                1 => (legacy_rows[0].clone(), Vec::new()),
                n => {
                    return StatusPlan {
                        decision: StatusDecision::Ambiguous {
                            reason: format!("{} legacy-keyed rows", n),
                        },
                        duplicates: Vec::new(),
                    }
                }
            }
        }
        n => {
            return StatusPlan {
                decision: StatusDecision::Ambiguous {
                    reason: format!("{} primary-keyed rows", n),
                },
                duplicates: Vec::new(),
            }
        }
    };

    let in_sync = target.status == status
        && (status != FinancialStatus::Paid || target.paid_at.is_some());

    let decision = if in_sync {
        StatusDecision::UpToDate {
            transaction_id: target.id,
        }
    } else {
        StatusDecision::Update {
            transaction_id: target.id,
            status,
            paid_at: if status == FinancialStatus::Paid {
                paid_at.or(Some(Utc::now()))
            } else {
                None
            },
        }
    };

    StatusPlan {
        decision,
        duplicates,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
