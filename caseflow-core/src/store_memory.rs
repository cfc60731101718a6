use std::collections::HashMap;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::store::CaseStore;
use crate::types::{CaseId, CaseState};

/// In-memory implementation of `CaseStore` for tests and POC hosts.
pub struct MemoryStore {
    inner: RwLock<HashMap<CaseId, CaseState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(HashMap::new()),
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CaseStore for MemoryStore {
    async fn put(&self, state: &CaseState) -> Result<()> {
        let mut w = self.inner.write().await;
        w.insert(state.case_id, state.clone());
        Ok(())
    }

    async fn get(&self, case_id: CaseId) -> Result<Option<CaseState>> {
        let r = self.inner.read().await;
        Ok(r.get(&case_id).cloned())
    }

    async fn delete(&self, case_id: CaseId) -> Result<()> {
        let mut w = self.inner.write().await;
        w.remove(&case_id);
        Ok(())
    }
}
