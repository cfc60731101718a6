use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use crate::types::{CaseId, UnitResponseType};

/// Lifecycle hooks emitted while a case is driven. Hooks are fire-and-forget
/// and receive values only; a sink cannot mutate case state.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EngineEvent {
    CaseStarted {
        case_id: CaseId,
        definition: String,
    },
    StepCompleted {
        case_id: CaseId,
        path: String,
        step: String,
        response: UnitResponseType,
    },
    PathSpawned {
        case_id: CaseId,
        parent: String,
        path: String,
        step: String,
    },
    TicketRaised {
        case_id: CaseId,
        path: String,
        target: String,
    },
    CasePended {
        case_id: CaseId,
        pend_exec_path: String,
    },
    CaseCompleted {
        case_id: CaseId,
    },
    CaseError {
        case_id: CaseId,
        detail: String,
    },
}

/// Structured notification that a path entered a work basket.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendNotice {
    pub case_id: CaseId,
    pub path: String,
    pub basket: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_desc: String,
}

#[async_trait]
pub trait EventSink: Send + Sync {
    async fn emit(&self, event: EngineEvent);
}

/// Receives pend notices. The engine does not own basket storage; it only
/// reports that a path is waiting in one.
#[async_trait]
pub trait WorkBasketSink: Send + Sync {
    async fn pended(&self, notice: PendNotice);
}

/// Discards everything. The default when the host wires no sinks.
pub struct NoopSink;

#[async_trait]
impl EventSink for NoopSink {
    async fn emit(&self, _event: EngineEvent) {}
}

#[async_trait]
impl WorkBasketSink for NoopSink {
    async fn pended(&self, _notice: PendNotice) {}
}

/// Records everything, for tests and embedding hosts that want an audit
/// trail without a real sink.
#[derive(Default)]
pub struct MemorySink {
    events: Mutex<Vec<EngineEvent>>,
    notices: Mutex<Vec<PendNotice>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn events(&self) -> Vec<EngineEvent> {
        self.events.lock().await.clone()
    }

    pub async fn notices(&self) -> Vec<PendNotice> {
        self.notices.lock().await.clone()
    }
}

#[async_trait]
impl EventSink for MemorySink {
    async fn emit(&self, event: EngineEvent) {
        self.events.lock().await.push(event);
    }
}

#[async_trait]
impl WorkBasketSink for MemorySink {
    async fn pended(&self, notice: PendNotice) {
        self.notices.lock().await.push(notice);
    }
}
