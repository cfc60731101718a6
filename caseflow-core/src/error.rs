use thiserror::Error;

use crate::types::CaseId;

/// Engine error taxonomy.
///
/// Business and task errors never appear here: they pend the path and the
/// case keeps a valid durable snapshot. `EngineError` covers the global
/// kinds that suspend driving of a case, plus API misuse.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("case {0} already exists")]
    CaseExists(CaseId),

    #[error("case {0} not found")]
    CaseNotFound(CaseId),

    #[error("case {0} is already complete")]
    CaseComplete(CaseId),

    #[error("definition '{0}' is not registered")]
    DefinitionMissing(String),

    /// Structural fault in the definition discovered while driving: unknown
    /// step, undeclared branch, missing successor, illegal ticket target.
    /// Fatal for the case; the last durable snapshot is left intact.
    #[error("definition fault in '{definition}': {detail}")]
    DefinitionFault { definition: String, detail: String },

    /// A step's declared implementation is absent from the capability
    /// registry. Fatal, like a definition fault.
    #[error("no {kind} registered under '{unit}' for step '{step}'")]
    CapabilityMissing {
        kind: &'static str,
        unit: String,
        step: String,
    },

    /// The sanitizer could not restore a driveable configuration.
    #[error("case {case_id} cannot be repaired: {detail}")]
    Unrepairable { case_id: CaseId, detail: String },

    #[error("invalid engine configuration: {0}")]
    Config(String),

    #[error("engine invariant violated: {0}")]
    Internal(String),

    /// Durable store failure after bounded retries. In-memory state may be
    /// ahead of durable state; the case must be re-resumed.
    #[error("snapshot store failure: {0}")]
    Store(#[from] anyhow::Error),
}
