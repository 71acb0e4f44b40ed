//! Account persistence backends.
//!
//! The ledger specifies only the access pattern: whole-account load and
//! save, with `load` returning a self-consistent snapshot. The engine
//! serializes writers per account above this trait, so a backend only has
//! to make each individual `save` atomic.

mod memory;

pub use memory::MemoryStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::engine::account::Account;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Account not found: {id}")]
    NotFound { id: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Backend error: {message}")]
    Backend { message: String },
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Trait for account storage backends.
#[async_trait]
pub trait AccountStore: Send + Sync {
    fn name(&self) -> &str;

    /// Persist the full account state. Must replace the prior state
    /// atomically with respect to `load`.
    async fn save(&self, account: &Account) -> StoreResult<()>;

    async fn load(&self, id: &str) -> StoreResult<Option<Account>>;

    async fn delete(&self, id: &str) -> StoreResult<bool>;

    async fn list(&self) -> StoreResult<Vec<String>>;

    async fn count(&self) -> StoreResult<usize>;
}
