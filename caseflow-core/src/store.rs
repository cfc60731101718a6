use anyhow::Result;
use async_trait::async_trait;

use crate::types::{CaseId, CaseState};

/// Per-case durable snapshot I/O.
///
/// The engine issues one `put` per persistence point and requires it to be
/// an atomic replace: a reader (or a resuming engine) must observe either
/// the previous snapshot or the new one, never a blend.
#[async_trait]
pub trait CaseStore: Send + Sync {
    /// Atomic replace of the snapshot for `state.case_id`.
    async fn put(&self, state: &CaseState) -> Result<()>;

    async fn get(&self, case_id: CaseId) -> Result<Option<CaseState>>;

    async fn delete(&self, case_id: CaseId) -> Result<()>;
}
