//! The per-case run loop: repeatedly selects a runnable path, dispatches
//! its current step, applies fan-out/join/ticket effects, and persists.
//!
//! Picking is deterministic (smallest depth first, then lexicographic name)
//! so traces are reproducible. Within one case, dispatch is single-threaded;
//! throughput comes from driving many cases in parallel.

use std::time::Duration;

use crate::defn::{StepKind, WorkflowDefinition};
use crate::dispatch::{Dispatcher, StepOutcome};
use crate::engine::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventSink, PendNotice, WorkBasketSink};
use crate::join;
use crate::path;
use crate::registry::CapabilityRegistry;
use crate::sanitize;
use crate::store::CaseStore;
use crate::types::{now_ms, CaseState, UnitResponseType};

const PUT_ATTEMPTS: u32 = 3;
const PUT_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Terminal state of one drive cycle.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CaseOutcome {
    /// The root path reached END; the case will never run again.
    Completed,
    /// Every live path is waiting in a basket; resume from
    /// `pend_exec_path` once the external signal arrives.
    Pended { pend_exec_path: String },
}

pub(crate) struct CaseDriver<'a> {
    pub defn: &'a WorkflowDefinition,
    pub registry: &'a CapabilityRegistry,
    pub store: &'a dyn CaseStore,
    pub events: &'a dyn EventSink,
    pub baskets: &'a dyn WorkBasketSink,
    pub config: &'a EngineConfig,
}

impl<'a> CaseDriver<'a> {
    pub async fn drive(&self, case: &mut CaseState) -> Result<CaseOutcome, EngineError> {
        loop {
            if case.is_complete {
                self.persist(case).await?;
                self.events
                    .emit(EngineEvent::CaseCompleted {
                        case_id: case.case_id,
                    })
                    .await;
                tracing::info!(case_id = %case.case_id, "case completed");
                return Ok(CaseOutcome::Completed);
            }

            let Some(path_name) = next_runnable(self.defn, case) else {
                if case.all_completed() {
                    // the ticket path re-arms the root before this point, so
                    // an all-completed case has its root at END
                    case.is_complete = true;
                    case.pend_exec_path.clear();
                    continue;
                }
                case.pend_exec_path = sanitize::select_pend_path(case);
                self.persist(case).await?;
                self.events
                    .emit(EngineEvent::CasePended {
                        case_id: case.case_id,
                        pend_exec_path: case.pend_exec_path.clone(),
                    })
                    .await;
                tracing::info!(
                    case_id = %case.case_id,
                    pend_exec_path = %case.pend_exec_path,
                    "case pended"
                );
                return Ok(CaseOutcome::Pended {
                    pend_exec_path: case.pend_exec_path.clone(),
                });
            };

            let (dispatched_step, dispatched_unit) = {
                let p = case
                    .path(&path_name)
                    .ok_or_else(|| EngineError::Internal("runnable path vanished".into()))?;
                let unit = self
                    .defn
                    .step(&p.step)
                    .map(|s| s.unit.clone())
                    .unwrap_or_default();
                (p.step.clone(), unit)
            };

            if self.config.persist_after_each_step {
                // dispatch intent: an unset response on disk marks the crash
                // window the sanitizer repairs with end-of-resume semantics
                if let Some(p) = case.path_mut(&path_name) {
                    p.last_response = None;
                }
                self.persist(case).await?;
            }

            let dispatcher = Dispatcher {
                defn: self.defn,
                registry: self.registry,
            };
            let outcome = match dispatcher.dispatch(case, &path_name).await {
                Ok(outcome) => outcome,
                Err(err) => {
                    // definition/registry fault: leave the snapshot driveable
                    // for a resume after repair, surface fatally
                    self.persist(case).await?;
                    self.events
                        .emit(EngineEvent::CaseError {
                            case_id: case.case_id,
                            detail: err.to_string(),
                        })
                        .await;
                    tracing::error!(
                        case_id = %case.case_id,
                        path = %path_name,
                        step = %dispatched_step,
                        error = %err,
                        "fatal fault while dispatching"
                    );
                    return Err(err);
                }
            };

            case.last_executed_step = dispatched_step.clone();
            case.last_executed_component = dispatched_unit;

            match &outcome {
                StepOutcome::Advanced => {
                    self.events
                        .emit(EngineEvent::StepCompleted {
                            case_id: case.case_id,
                            path: path_name.clone(),
                            step: dispatched_step.clone(),
                            response: UnitResponseType::OkProceed,
                        })
                        .await;
                }
                StepOutcome::Pended { basket, response } => {
                    self.events
                        .emit(EngineEvent::StepCompleted {
                            case_id: case.case_id,
                            path: path_name.clone(),
                            step: dispatched_step.clone(),
                            response: *response,
                        })
                        .await;
                    let (error_code, error_desc) = case
                        .path(&path_name)
                        .map(|p| (p.error_code.clone(), p.error_desc.clone()))
                        .unwrap_or_default();
                    self.baskets
                        .pended(PendNotice {
                            case_id: case.case_id,
                            path: path_name.clone(),
                            basket: basket.clone(),
                            error_code,
                            error_desc,
                        })
                        .await;
                }
                StepOutcome::FannedOut { children } => {
                    for (child, step) in children {
                        self.events
                            .emit(EngineEvent::PathSpawned {
                                case_id: case.case_id,
                                parent: path_name.clone(),
                                path: child.clone(),
                                step: step.clone(),
                            })
                            .await;
                    }
                }
                StepOutcome::TicketRaised { target } => {
                    self.events
                        .emit(EngineEvent::TicketRaised {
                            case_id: case.case_id,
                            path: path_name.clone(),
                            target: target.clone(),
                        })
                        .await;
                    tracing::info!(
                        case_id = %case.case_id,
                        path = %path_name,
                        target = %target,
                        "ticket raised; cancelling open paths"
                    );
                    join::consume_ticket(case)?;
                }
            }

            if self.config.persist_after_each_step {
                self.persist(case).await?;
            }
        }
    }

    /// One atomic snapshot write, retried with bounded exponential backoff.
    pub async fn persist(&self, case: &mut CaseState) -> Result<(), EngineError> {
        case.ts = now_ms();
        let mut delay = PUT_BACKOFF_BASE;
        let mut attempt = 0;
        loop {
            match self.store.put(case).await {
                Ok(()) => return Ok(()),
                Err(err) => {
                    attempt += 1;
                    if attempt >= PUT_ATTEMPTS {
                        tracing::error!(
                            case_id = %case.case_id,
                            error = %err,
                            "snapshot put failed; abandoning case"
                        );
                        return Err(EngineError::Store(err));
                    }
                    tracing::warn!(
                        case_id = %case.case_id,
                        attempt,
                        error = %err,
                        "snapshot put failed; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                }
            }
        }
    }
}

/// The runnable set and picking policy: STARTED, basket-free paths, minus
/// parents waiting at a join that is not yet ready, ordered by
/// (depth, name).
pub(crate) fn next_runnable(defn: &WorkflowDefinition, case: &CaseState) -> Option<String> {
    case.exec_paths
        .iter()
        .filter(|p| p.is_started() && !p.is_pended())
        .filter(|p| {
            let Some(step) = defn.step(&p.step) else {
                // unknown step: runnable so the fault surfaces at dispatch
                return true;
            };
            if step.kind != StepKind::Join {
                return true;
            }
            if matches!(
                join::enclosing_join(defn, &p.name),
                Ok(Some(ref j)) if *j == p.step
            ) {
                // a child arriving at its own join completes on dispatch
                return true;
            }
            join::join_ready(defn, case, p)
        })
        .min_by(|a, b| {
            path::depth(&a.name)
                .cmp(&path::depth(&b.name))
                .then_with(|| a.name.cmp(&b.name))
        })
        .map(|p| p.name.clone())
}
