use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{CaseId, ProcessVariables};

/// Context handed to a task or route body for one dispatch call. The body
/// may read and mutate process variables; everything else is read-only.
/// `case_id`, `path_name` and `step_name` together form the idempotency key
/// a task should use for externally visible effects.
pub struct UnitContext<'a> {
    pub case_id: CaseId,
    pub path_name: &'a str,
    pub step_name: &'a str,
    pub vars: &'a mut ProcessVariables,
}

/// Outcome of one task invocation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Advance to the step's declared successor.
    Proceed,
    /// Park in `basket`; the step is considered done and resume continues
    /// at the successor.
    Pend { basket: String },
    /// Park in `basket`; resume re-executes this same step. Requires the
    /// step to be idempotent.
    PendEor { basket: String },
    /// Park in an error queue with diagnostics; resume re-executes.
    ErrorPend {
        basket: String,
        code: String,
        desc: String,
    },
}

/// Response returned by a task body. `ticket`, when non-empty, aborts the
/// surrounding parallel construct and reroutes the root path to the named
/// step, regardless of the outcome variant.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TaskResponse {
    pub outcome: TaskOutcome,
    pub ticket: String,
}

impl TaskResponse {
    pub fn proceed() -> Self {
        Self {
            outcome: TaskOutcome::Proceed,
            ticket: String::new(),
        }
    }

    pub fn pend(basket: impl Into<String>) -> Self {
        Self {
            outcome: TaskOutcome::Pend {
                basket: basket.into(),
            },
            ticket: String::new(),
        }
    }

    pub fn pend_eor(basket: impl Into<String>) -> Self {
        Self {
            outcome: TaskOutcome::PendEor {
                basket: basket.into(),
            },
            ticket: String::new(),
        }
    }

    pub fn error_pend(
        basket: impl Into<String>,
        code: impl Into<String>,
        desc: impl Into<String>,
    ) -> Self {
        Self {
            outcome: TaskOutcome::ErrorPend {
                basket: basket.into(),
                code: code.into(),
                desc: desc.into(),
            },
            ticket: String::new(),
        }
    }

    pub fn with_ticket(mut self, target: impl Into<String>) -> Self {
        self.ticket = target.into();
        self
    }
}

/// Response returned by a route body: the branch names control should
/// follow. A serial route must return exactly one; a parallel route one or
/// more. `ticket` behaves as on `TaskResponse`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RouteResponse {
    pub branches: Vec<String>,
    pub ticket: String,
}

impl RouteResponse {
    pub fn branch(name: impl Into<String>) -> Self {
        Self {
            branches: vec![name.into()],
            ticket: String::new(),
        }
    }

    pub fn branches<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            branches: names.into_iter().map(Into::into).collect(),
            ticket: String::new(),
        }
    }

    pub fn with_ticket(mut self, target: impl Into<String>) -> Self {
        self.ticket = target.into();
        self
    }
}

/// A user-supplied task implementation. Bodies may block on I/O inside the
/// call; suspension is expressed only through the returned response.
#[async_trait]
pub trait TaskBody: Send + Sync {
    async fn execute(&self, ctx: &mut UnitContext<'_>) -> Result<TaskResponse>;
}

/// A user-supplied route implementation.
#[async_trait]
pub trait RouteBody: Send + Sync {
    async fn choose(&self, ctx: &mut UnitContext<'_>) -> Result<RouteResponse>;
}

/// Resolves a step's declared implementation name to its body. Populated by
/// the host before the engine starts; read-only afterwards.
#[derive(Default)]
pub struct CapabilityRegistry {
    tasks: HashMap<String, Arc<dyn TaskBody>>,
    routes: HashMap<String, Arc<dyn RouteBody>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_task(&mut self, name: impl Into<String>, body: Arc<dyn TaskBody>) {
        self.tasks.insert(name.into(), body);
    }

    pub fn register_route(&mut self, name: impl Into<String>, body: Arc<dyn RouteBody>) {
        self.routes.insert(name.into(), body);
    }

    pub fn task(&self, name: &str) -> Option<Arc<dyn TaskBody>> {
        self.tasks.get(name).cloned()
    }

    pub fn route(&self, name: &str) -> Option<Arc<dyn RouteBody>> {
        self.routes.get(name).cloned()
    }
}
