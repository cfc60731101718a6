//! The step dispatcher: executes exactly one step of one path and applies
//! the interpreted response to the case.
//!
//! Dispatch is strictly synchronous per call; suspension is expressed by
//! the returned response, never by blocking. Business and task errors pend
//! the path; only definition and registry faults escape as `EngineError`.

use crate::defn::{Step, StepKind, WorkflowDefinition};
use crate::error::EngineError;
use crate::join;
use crate::path;
use crate::registry::{
    CapabilityRegistry, RouteResponse, TaskOutcome, TaskResponse, UnitContext,
};
use crate::types::{CaseState, UnitResponseType, TEMP_HOLD_BASKET, UNIT_FAULT_CODE};

/// What one dispatch did to the case.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum StepOutcome {
    /// The path moved on (possibly completing itself or the whole case).
    Advanced,
    /// The path parked in a basket.
    Pended {
        basket: String,
        response: UnitResponseType,
    },
    /// A parallel route fired; children were created.
    FannedOut { children: Vec<(String, String)> },
    /// The response carried a ticket; `case.ticket` is set and the raising
    /// path is completed. The driver consumes the ticket next.
    TicketRaised { target: String },
}

pub(crate) struct Dispatcher<'a> {
    pub defn: &'a WorkflowDefinition,
    pub registry: &'a CapabilityRegistry,
}

impl<'a> Dispatcher<'a> {
    /// Dispatch the current step of `path_name`. The caller guarantees the
    /// path exists, is STARTED, unpended, and (for a parent at a join) that
    /// the join is ready.
    pub async fn dispatch(
        &self,
        case: &mut CaseState,
        path_name: &str,
    ) -> Result<StepOutcome, EngineError> {
        let step_name = case
            .path(path_name)
            .ok_or_else(|| EngineError::Internal(format!("dispatch of unknown path '{path_name}'")))?
            .step
            .clone();
        let step = self.defn.try_step(&step_name)?.clone();

        match step.kind {
            StepKind::Start => {
                let next = self.defn.successor_of(&step)?;
                apply_advance(self.defn, case, path_name, &next)?;
                Ok(StepOutcome::Advanced)
            }
            StepKind::End => {
                if !path::is_root(path_name) {
                    return Err(EngineError::DefinitionFault {
                        definition: self.defn.name.clone(),
                        detail: format!("END step '{step_name}' reached on non-root path '{path_name}'"),
                    });
                }
                complete_root(case, path_name)?;
                Ok(StepOutcome::Advanced)
            }
            StepKind::Join => {
                if join::enclosing_join(self.defn, path_name)?.as_deref() == Some(&step_name) {
                    // a child arriving at its own fan-out's join completes
                    let p = path_of(case, path_name)?;
                    p.last_response = Some(UnitResponseType::OkProceed);
                    p.error_code.clear();
                    p.error_desc.clear();
                    p.complete();
                    Ok(StepOutcome::Advanced)
                } else {
                    // a parent cleared past the barrier advances to the
                    // join's declared successor
                    let next = self.defn.successor_of(&step)?;
                    apply_advance(self.defn, case, path_name, &next)?;
                    Ok(StepOutcome::Advanced)
                }
            }
            StepKind::Task => self.dispatch_task(case, path_name, &step).await,
            StepKind::SRoute | StepKind::PRoute => {
                self.dispatch_route(case, path_name, &step).await
            }
        }
    }

    async fn dispatch_task(
        &self,
        case: &mut CaseState,
        path_name: &str,
        step: &Step,
    ) -> Result<StepOutcome, EngineError> {
        let body = self
            .registry
            .task(&step.unit)
            .ok_or_else(|| EngineError::CapabilityMissing {
                kind: "task",
                unit: step.unit.clone(),
                step: step.name.clone(),
            })?;

        let result = {
            let mut vars = std::mem::take(&mut case.process_variables);
            let mut ctx = UnitContext {
                case_id: case.case_id,
                path_name,
                step_name: &step.name,
                vars: &mut vars,
            };
            let r = body.execute(&mut ctx).await;
            case.process_variables = vars;
            r
        };

        let response = match result {
            Ok(r) => r,
            Err(fault) => {
                tracing::warn!(
                    case_id = %case.case_id,
                    path = path_name,
                    step = %step.name,
                    error = %fault,
                    "task body raised; converting to error-pend"
                );
                TaskResponse::error_pend(TEMP_HOLD_BASKET, UNIT_FAULT_CODE, fault.to_string())
            }
        };

        if let Some(target) = self.raise_ticket(case, path_name, &response.ticket)? {
            return Ok(StepOutcome::TicketRaised { target });
        }

        match response.outcome {
            TaskOutcome::Proceed => {
                let next = self.defn.successor_of(step)?;
                apply_advance(self.defn, case, path_name, &next)?;
                Ok(StepOutcome::Advanced)
            }
            TaskOutcome::Pend { basket } => {
                // the step is done: advance, then park at the successor
                let next = self.defn.successor_of(step)?;
                self.defn.try_step(&next)?;
                let p = path_of(case, path_name)?;
                p.step = next;
                p.pend(basket.clone(), UnitResponseType::OkPend);
                Ok(StepOutcome::Pended {
                    basket,
                    response: UnitResponseType::OkPend,
                })
            }
            TaskOutcome::PendEor { basket } => {
                let p = path_of(case, path_name)?;
                p.pend(basket.clone(), UnitResponseType::OkPendEor);
                Ok(StepOutcome::Pended {
                    basket,
                    response: UnitResponseType::OkPendEor,
                })
            }
            TaskOutcome::ErrorPend { basket, code, desc } => {
                let p = path_of(case, path_name)?;
                p.pend(basket.clone(), UnitResponseType::ErrorPend);
                p.error_code = code;
                p.error_desc = desc;
                Ok(StepOutcome::Pended {
                    basket,
                    response: UnitResponseType::ErrorPend,
                })
            }
        }
    }

    async fn dispatch_route(
        &self,
        case: &mut CaseState,
        path_name: &str,
        step: &Step,
    ) -> Result<StepOutcome, EngineError> {
        let body = self
            .registry
            .route(&step.unit)
            .ok_or_else(|| EngineError::CapabilityMissing {
                kind: "route",
                unit: step.unit.clone(),
                step: step.name.clone(),
            })?;

        let result = {
            let mut vars = std::mem::take(&mut case.process_variables);
            let mut ctx = UnitContext {
                case_id: case.case_id,
                path_name,
                step_name: &step.name,
                vars: &mut vars,
            };
            let r = body.choose(&mut ctx).await;
            case.process_variables = vars;
            r
        };

        let response = match result {
            Ok(r) => r,
            Err(fault) => {
                tracing::warn!(
                    case_id = %case.case_id,
                    path = path_name,
                    step = %step.name,
                    error = %fault,
                    "route body raised; converting to error-pend"
                );
                let p = path_of(case, path_name)?;
                p.pend(TEMP_HOLD_BASKET, UnitResponseType::ErrorPend);
                p.error_code = UNIT_FAULT_CODE.into();
                p.error_desc = fault.to_string();
                return Ok(StepOutcome::Pended {
                    basket: TEMP_HOLD_BASKET.into(),
                    response: UnitResponseType::ErrorPend,
                });
            }
        };

        if let Some(target) = self.raise_ticket(case, path_name, &response.ticket)? {
            return Ok(StepOutcome::TicketRaised { target });
        }

        match step.kind {
            StepKind::SRoute => {
                let branch = single_branch(self.defn, step, &response)?;
                let next = self.defn.branch_step(step, &branch)?;
                apply_advance(self.defn, case, path_name, &next)?;
                Ok(StepOutcome::Advanced)
            }
            StepKind::PRoute => {
                if response.branches.is_empty() {
                    return Err(EngineError::DefinitionFault {
                        definition: self.defn.name.clone(),
                        detail: format!("parallel route '{}' returned no branches", step.name),
                    });
                }
                let mut seen = std::collections::BTreeSet::new();
                for b in &response.branches {
                    if !seen.insert(b.as_str()) {
                        return Err(EngineError::DefinitionFault {
                            definition: self.defn.name.clone(),
                            detail: format!(
                                "parallel route '{}' returned branch '{b}' twice",
                                step.name
                            ),
                        });
                    }
                }
                let children = join::fan_out(
                    self.defn,
                    case,
                    path_name,
                    &step.name,
                    &response.branches,
                )?;
                Ok(StepOutcome::FannedOut { children })
            }
            _ => Err(EngineError::Internal(format!(
                "route dispatch on non-route step '{}'",
                step.name
            ))),
        }
    }

    /// Apply a non-empty ticket: validate the target, complete the raising
    /// path and publish the ticket on the case.
    fn raise_ticket(
        &self,
        case: &mut CaseState,
        path_name: &str,
        ticket: &str,
    ) -> Result<Option<String>, EngineError> {
        if ticket.is_empty() {
            return Ok(None);
        }
        self.defn.try_step(ticket)?;
        if self.defn.is_branch_start(ticket) {
            return Err(EngineError::DefinitionFault {
                definition: self.defn.name.clone(),
                detail: format!("ticket target '{ticket}' lies inside a parallel construct"),
            });
        }
        let p = path_of(case, path_name)?;
        p.last_response = Some(UnitResponseType::OkProceed);
        p.complete();
        // first-written wins; completed siblings cannot raise another
        if case.ticket.is_empty() {
            case.ticket = ticket.to_string();
        }
        Ok(Some(ticket.to_string()))
    }
}

fn path_of<'c>(
    case: &'c mut CaseState,
    path_name: &str,
) -> Result<&'c mut crate::types::ExecPath, EngineError> {
    case.path_mut(path_name)
        .ok_or_else(|| EngineError::Internal(format!("path '{path_name}' missing from case")))
}

fn single_branch(
    defn: &WorkflowDefinition,
    step: &Step,
    response: &RouteResponse,
) -> Result<String, EngineError> {
    if response.branches.len() != 1 {
        return Err(EngineError::DefinitionFault {
            definition: defn.name.clone(),
            detail: format!(
                "serial route '{}' returned {} branches",
                step.name,
                response.branches.len()
            ),
        });
    }
    Ok(response.branches[0].clone())
}

fn complete_root(case: &mut CaseState, path_name: &str) -> Result<(), EngineError> {
    let p = path_of(case, path_name)?;
    p.last_response = Some(UnitResponseType::OkProceed);
    p.error_code.clear();
    p.error_desc.clear();
    p.complete();
    case.is_complete = true;
    case.pend_exec_path.clear();
    Ok(())
}

/// Reassign a path's step to `next` after a completed response. Advancing
/// the root into END completes the case; advancing a child into its
/// enclosing join completes the child.
pub(crate) fn apply_advance(
    defn: &WorkflowDefinition,
    case: &mut CaseState,
    path_name: &str,
    next: &str,
) -> Result<(), EngineError> {
    let next_kind = defn.try_step(next)?.kind;
    let is_root = path::is_root(path_name);
    let encl_join = join::enclosing_join(defn, path_name)?;

    if next_kind == StepKind::End && !is_root {
        return Err(EngineError::DefinitionFault {
            definition: defn.name.clone(),
            detail: format!("END step '{next}' reached on non-root path '{path_name}'"),
        });
    }

    let p = path_of(case, path_name)?;
    p.step = next.to_string();
    p.last_response = Some(UnitResponseType::OkProceed);
    p.error_code.clear();
    p.error_desc.clear();

    if next_kind == StepKind::End {
        p.complete();
        case.is_complete = true;
        case.pend_exec_path.clear();
    } else if !is_root && encl_join.as_deref() == Some(next) {
        p.complete();
    }
    Ok(())
}
