//! In-memory store for testing and single-instance deployments.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{AccountStore, StoreResult};
use crate::engine::account::Account;

#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: Arc<RwLock<HashMap<String, Account>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn clear(&self) {
        self.accounts.write().await.clear();
    }
}

#[async_trait]
impl AccountStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn save(&self, account: &Account) -> StoreResult<()> {
        let mut accounts = self.accounts.write().await;
        accounts.insert(account.id.clone(), account.clone());
        Ok(())
    }

    async fn load(&self, id: &str) -> StoreResult<Option<Account>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.get(id).cloned())
    }

    async fn delete(&self, id: &str) -> StoreResult<bool> {
        let mut accounts = self.accounts.write().await;
        Ok(accounts.remove(id).is_some())
    }

    async fn list(&self) -> StoreResult<Vec<String>> {
        let accounts = self.accounts.read().await;
        Ok(accounts.keys().cloned().collect())
    }

    async fn count(&self) -> StoreResult<usize> {
        Ok(self.accounts.read().await.len())
    }
}
