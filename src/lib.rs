//! # quota-ledger
//!
//! Usage-metering and quota-enforcement ledger: tracks, per tenant and per
//! billable service, how much of a recurring allotment has been consumed,
//! computes overage, and gates whether a requested operation may proceed
//! before it runs.
//!
//! Correctness guarantees: no lost updates under concurrent access, no
//! double application of an operation id, no negative balances, and a
//! consistent recurring billing-cycle lifecycle.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use quota_ledger::LedgerEngine;
//! use rust_decimal_macros::dec;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), quota_ledger::LedgerError> {
//!     let ledger = LedgerEngine::builder().build();
//!     ledger.create_account("tenant-1", "starter").await?;
//!
//!     let decision = ledger.can_execute("tenant-1", "searches", 25.0).await?;
//!     if decision.allowed {
//!         // ... perform the metered work, then debit exactly once:
//!         ledger
//!             .record_usage("tenant-1", "searches", 25.0, "op-42", dec!(0.125))
//!             .await?;
//!     }
//!     Ok(())
//! }
//! ```

#![allow(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod codec;
pub mod engine;
pub mod policy;
pub mod projection;
pub mod store;
pub mod tracker;

// Re-exports for convenience
pub use codec::{CodecError, ExportEnvelope, accounts_to_csv, export_accounts, import_accounts};
pub use engine::{
    Account, AccountState, AccountStatus, AccountSummary, CycleArchive, Decision, DecisionTier,
    Estimate, LedgerEngine, LedgerEngineBuilder, LedgerError, LedgerResult, OperationKind,
    OperationRecord, QuotaRecord, ServiceStatus, ServiceUsage, UsageEntry,
};
pub use policy::{Plan, PlanCatalog, PlanCatalogBuilder, ServiceSpec};
pub use projection::{Projection, Trend, project, project_with_tolerance};
pub use store::{AccountStore, MemoryStore, StoreError, StoreResult};
pub use tracker::{Breakdown, GlobalStats, SessionSummary, UsageEvent, UsageTracker, UserTotals};
