//! Transactional ledger operations and their invariants.

pub mod account;
pub mod decision;
mod ledger;

pub use account::{
    Account, AccountStatus, CycleArchive, OperationKind, OperationRecord, QuotaRecord,
};
pub use decision::{
    AccountState, AccountSummary, Decision, DecisionTier, Estimate, ServiceStatus, ServiceUsage,
};
pub use ledger::{DEFAULT_HISTORY_LIMIT, LedgerEngine, LedgerEngineBuilder, UsageEntry};

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Account not found: {id}")]
    AccountNotFound { id: String },

    #[error("Unknown service key: {key}")]
    UnknownServiceKey { key: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Invalid operation id '{id}': {message}")]
    InvalidOperationId { id: String, message: String },

    #[error("Billing cycle not yet elapsed (ends at {ends_at})")]
    BillingCycleNotYetElapsed { ends_at: DateTime<Utc> },

    /// Reserved for storage backends that cannot serialize writers
    /// natively (optimistic-locking databases) and need the caller to
    /// retry. No bundled backend constructs it: [`MemoryStore`] and the
    /// engine's per-account locks already serialize every write.
    ///
    /// [`MemoryStore`]: crate::store::MemoryStore
    #[error("Concurrency conflict: {message}")]
    Conflict { message: String },

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
}

impl LedgerError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

pub type LedgerResult<T> = Result<T, LedgerError>;
