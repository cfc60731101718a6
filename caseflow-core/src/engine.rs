//! The engine facade: wires the store, capability registry and sinks
//! together and exposes the host-facing surface (`start`, `resume`,
//! `inspect`).
//!
//! One engine drives many cases; a semaphore sized by `worker_pool_size`
//! bounds how many are driven at once. Within a case, dispatch is
//! single-threaded (see `driver`).

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::Semaphore;

use crate::defn::{DefinitionRef, WorkflowDefinition};
use crate::driver::{next_runnable, CaseDriver, CaseOutcome};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink, NoopSink, WorkBasketSink};
use crate::path;
use crate::registry::CapabilityRegistry;
use crate::sanitize;
use crate::store::CaseStore;
use crate::types::{CaseId, CaseState, ProcessVariables};

/// Engine initialization options.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    /// How many cases may be driven concurrently.
    pub worker_pool_size: usize,
    /// Sibling-wait budget for concurrent-sibling implementations; 0
    /// disables it. The single-threaded dispatcher never blocks on a join,
    /// so this is recorded but has no trigger point here.
    pub join_timeout_ms: u64,
    /// Eager (true) persists after every applied response; lazy (false)
    /// persists only at case creation, pend, and completion. Lazy requires
    /// every task body to be fully idempotent.
    pub persist_after_each_step: bool,
    /// Reserved to `.`.
    pub path_separator: char,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 4,
            join_timeout_ms: 0,
            persist_after_each_step: true,
            path_separator: path::SEPARATOR,
        }
    }
}

impl EngineConfig {
    fn validate(&self) -> Result<(), EngineError> {
        if self.worker_pool_size == 0 {
            return Err(EngineError::Config("workerPoolSize must be at least 1".into()));
        }
        if self.path_separator != path::SEPARATOR {
            return Err(EngineError::Config(format!(
                "pathSeparator is reserved to '{}'",
                path::SEPARATOR
            )));
        }
        Ok(())
    }
}

/// The workflow engine. Shared, read-mostly collaborators (store, registry,
/// sinks) outlive any case; each driven case is exclusively owned by its
/// drive cycle.
pub struct WorkflowEngine {
    config: EngineConfig,
    store: Arc<dyn CaseStore>,
    registry: Arc<CapabilityRegistry>,
    events: Arc<dyn EventSink>,
    baskets: Arc<dyn WorkBasketSink>,
    definitions: RwLock<HashMap<DefinitionRef, Arc<WorkflowDefinition>>>,
    pool: Arc<Semaphore>,
}

impl WorkflowEngine {
    pub fn new(
        config: EngineConfig,
        store: Arc<dyn CaseStore>,
        registry: Arc<CapabilityRegistry>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let pool = Arc::new(Semaphore::new(config.worker_pool_size));
        Ok(Self {
            config,
            store,
            registry,
            events: Arc::new(NoopSink),
            baskets: Arc::new(NoopSink),
            definitions: RwLock::new(HashMap::new()),
            pool,
        })
    }

    pub fn with_event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = sink;
        self
    }

    pub fn with_work_basket_sink(mut self, sink: Arc<dyn WorkBasketSink>) -> Self {
        self.baskets = sink;
        self
    }

    /// Make a definition startable under its name+version.
    pub fn register_definition(&self, defn: WorkflowDefinition) -> Result<(), EngineError> {
        let mut defs = self
            .definitions
            .write()
            .map_err(|e| EngineError::Internal(format!("definition registry lock: {e}")))?;
        defs.insert(defn.definition_ref(), Arc::new(defn));
        Ok(())
    }

    fn definition(&self, defn_ref: &DefinitionRef) -> Result<Arc<WorkflowDefinition>, EngineError> {
        let defs = self
            .definitions
            .read()
            .map_err(|e| EngineError::Internal(format!("definition registry lock: {e}")))?;
        defs.get(defn_ref)
            .cloned()
            .ok_or_else(|| EngineError::DefinitionMissing(defn_ref.to_string()))
    }

    fn driver<'a>(&'a self, defn: &'a WorkflowDefinition) -> CaseDriver<'a> {
        CaseDriver {
            defn,
            registry: self.registry.as_ref(),
            store: self.store.as_ref(),
            events: self.events.as_ref(),
            baskets: self.baskets.as_ref(),
            config: &self.config,
        }
    }

    /// Create a new case and drive it until it completes or pends.
    pub async fn start(
        &self,
        case_id: CaseId,
        defn_ref: &DefinitionRef,
        initial_vars: ProcessVariables,
    ) -> Result<CaseOutcome, EngineError> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| EngineError::Internal("worker pool closed".into()))?;

        let defn = self.definition(defn_ref)?;
        if self.store.get(case_id).await?.is_some() {
            return Err(EngineError::CaseExists(case_id));
        }

        let start_step = defn.start_step()?.name.clone();
        let mut case = CaseState::new(
            case_id,
            defn.definition_ref(),
            defn.fingerprint(),
            start_step,
            initial_vars,
        );

        let driver = self.driver(defn.as_ref());
        driver.persist(&mut case).await?;
        self.events
            .emit(EngineEvent::CaseStarted {
                case_id,
                definition: defn_ref.to_string(),
            })
            .await;
        tracing::info!(case_id = %case_id, definition = %defn_ref, "case started");
        driver.drive(&mut case).await
    }

    /// Load, sanitize and drive an existing case. The canonical pended path
    /// (if any) is released from its basket first; `var_overrides` merge
    /// into the process variables, override keys replacing existing values.
    pub async fn resume(
        &self,
        case_id: CaseId,
        var_overrides: Option<ProcessVariables>,
    ) -> Result<CaseOutcome, EngineError> {
        let _permit = self
            .pool
            .acquire()
            .await
            .map_err(|_| EngineError::Internal("worker pool closed".into()))?;

        let mut case = self
            .store
            .get(case_id)
            .await?
            .ok_or(EngineError::CaseNotFound(case_id))?;
        if case.is_complete {
            return Err(EngineError::CaseComplete(case_id));
        }

        let defn_ref = case.definition_ref.clone();
        let defn = self.definition(&defn_ref)?;
        if case.definition_fingerprint != [0u8; 32]
            && case.definition_fingerprint != defn.fingerprint()
        {
            tracing::warn!(
                case_id = %case_id,
                definition = %defn_ref,
                "registered definition differs from the one this case started with"
            );
        }

        sanitize::sanitize(defn.as_ref(), &mut case)?;
        let driver = self.driver(defn.as_ref());
        if case.is_complete {
            driver.persist(&mut case).await?;
            return Err(EngineError::CaseComplete(case_id));
        }

        if let Some(overrides) = var_overrides {
            case.process_variables.merge(overrides);
        }

        if case.pend_exec_path.is_empty() {
            if next_runnable(defn.as_ref(), &case).is_none() && !case.all_completed() {
                return Err(EngineError::Unrepairable {
                    case_id,
                    detail: "no pended or runnable path remains".into(),
                });
            }
        } else {
            let name = case.pend_exec_path.clone();
            let Some(p) = case.path_mut(&name) else {
                return Err(EngineError::Unrepairable {
                    case_id,
                    detail: format!("pendExecPath '{name}' names no path"),
                });
            };
            p.clear_pend();
            case.pend_exec_path.clear();
        }

        driver.persist(&mut case).await?;
        tracing::info!(case_id = %case_id, "case resumed");
        driver.drive(&mut case).await
    }

    /// Read-only snapshot of a case for diagnostics.
    pub async fn inspect(&self, case_id: CaseId) -> Result<CaseState, EngineError> {
        self.store
            .get(case_id)
            .await?
            .ok_or(EngineError::CaseNotFound(case_id))
    }
}
