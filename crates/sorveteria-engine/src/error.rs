//! # Engine Error Type
//!
//! One error for every service, split by origin.
//!
//! ## Error Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ValidationError ──► CoreError ──┐                                      │
//! │                                  ├──► EngineError ──► kind() ──► caller │
//! │  sqlx::Error ──────► DbError ────┘                                      │
//! │                                                                         │
//! │  kind():                                                                │
//! │    Domain(e)                    → e.kind()                              │
//! │    Store(UniqueViolation)       → Conflict                              │
//! │    Store(NotFound)              → NotFound                              │
//! │    Store(anything else)         → Store                                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Any error returned from inside a transaction drops the transaction, which
//! rolls it back. Nothing is ever half-applied.

use sorveteria_core::{CoreError, ErrorKind, ValidationError};
use sorveteria_db::DbError;
use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A business rule refused the operation.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] DbError),
}

impl EngineError {
    /// The typed kind callers branch on.
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::Domain(err) => err.kind(),
            EngineError::Store(DbError::UniqueViolation { .. }) => ErrorKind::Conflict,
            EngineError::Store(DbError::NotFound { .. }) => ErrorKind::NotFound,
            EngineError::Store(_) => ErrorKind::Store,
        }
    }
}

impl From<ValidationError> for EngineError {
    fn from(err: ValidationError) -> Self {
        EngineError::Domain(CoreError::Validation(err))
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Store(DbError::from(err))
    }
}
