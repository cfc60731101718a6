//! Snapshot sanitization: turns any persisted case state, including one cut
//! mid-dispatch by a crash, back into a configuration that satisfies the
//! path invariants and can be driven.
//!
//! The procedure is idempotent: every mutation lands on a canonical form,
//! so sanitizing an already-sanitized snapshot changes nothing.

use crate::defn::{StepKind, WorkflowDefinition};
use crate::dispatch;
use crate::error::EngineError;
use crate::join;
use crate::path;
use crate::types::{CaseState, PathStatus, UnitResponseType, TEMP_HOLD_BASKET};

/// The bookkeeping value a sanitized path carries for its current step:
/// a serial route is re-evaluated on resume, anything else is dispatched
/// as an already-advanced step.
fn canonical_response(kind: Option<StepKind>) -> UnitResponseType {
    match kind {
        Some(StepKind::SRoute) => UnitResponseType::OkPendEor,
        _ => UnitResponseType::OkPend,
    }
}

enum Repair {
    /// Unknown dispatch effect: deem the step pended end-of-resume so the
    /// idempotent step re-executes.
    DeemPend,
    /// The interrupted step was a parallel route whose fan-out already
    /// happened (children exist): finish the fan-out postcondition.
    FinalizeFanOut { join: String },
    /// A fully applied response survived; normalize its bookkeeping.
    Canonicalize(UnitResponseType),
}

pub(crate) fn sanitize(
    defn: &WorkflowDefinition,
    case: &mut CaseState,
) -> Result<(), EngineError> {
    if case.root().is_none() {
        return Err(EngineError::Unrepairable {
            case_id: case.case_id,
            detail: "snapshot has no root path".into(),
        });
    }

    // completion check
    if root_complete_at_end(defn, case) {
        case.is_complete = true;
        case.pend_exec_path.clear();
        return Ok(());
    }

    // ticket reconciliation
    if !case.ticket.is_empty() {
        tracing::warn!(
            case_id = %case.case_id,
            target = %case.ticket,
            "sanitize: consuming persisted ticket"
        );
        join::consume_ticket(case)?;
    }

    // partially-executed path repair
    let repairs: Vec<(String, Repair)> = case
        .exec_paths
        .iter()
        .filter(|p| p.status == PathStatus::Started)
        .filter_map(|p| {
            let step = defn.step(&p.step);
            match p.last_response {
                None => {
                    if let Some(s) = step {
                        if s.kind == StepKind::PRoute
                            && !s.join.is_empty()
                            && case.children_of(&p.name, &p.step).next().is_some()
                        {
                            return Some((
                                p.name.clone(),
                                Repair::FinalizeFanOut {
                                    join: s.join.clone(),
                                },
                            ));
                        }
                    }
                    Some((p.name.clone(), Repair::DeemPend))
                }
                Some(UnitResponseType::OkProceed) => Some((
                    p.name.clone(),
                    Repair::Canonicalize(canonical_response(step.map(|s| s.kind))),
                )),
                _ => None,
            }
        })
        .collect();

    for (name, repair) in repairs {
        let case_id = case.case_id;
        let Some(p) = case.path_mut(&name) else {
            continue;
        };
        match repair {
            Repair::DeemPend => {
                p.last_response = Some(UnitResponseType::OkPendEor);
                p.pend_basket = if p.prev_pend_basket.is_empty() {
                    TEMP_HOLD_BASKET.to_string()
                } else {
                    p.prev_pend_basket.clone()
                };
                p.error_code.clear();
                p.error_desc.clear();
                tracing::warn!(
                    case_id = %case_id,
                    path = %name,
                    step = %p.step,
                    basket = %p.pend_basket,
                    "sanitize: deemed pend for interrupted dispatch"
                );
            }
            Repair::FinalizeFanOut { join } => {
                p.step = join;
                p.last_response = Some(UnitResponseType::OkPend);
                p.pend_basket.clear();
                p.error_code.clear();
                p.error_desc.clear();
                tracing::warn!(
                    case_id = %case_id,
                    path = %name,
                    join = %p.step,
                    "sanitize: finalized interrupted fan-out"
                );
            }
            Repair::Canonicalize(resp) => {
                p.last_response = Some(resp);
            }
        }
    }

    // join readiness recheck, to a fixpoint: releasing an inner join can
    // complete a child and thereby release an outer one
    loop {
        let candidates: Vec<String> = case
            .exec_paths
            .iter()
            .filter(|p| p.is_started() && !p.is_pended())
            .filter(|p| {
                defn.step(&p.step)
                    .map(|s| s.kind == StepKind::Join)
                    .unwrap_or(false)
            })
            .filter(|p| {
                // child arrivals complete at dispatch time, not here
                !matches!(
                    join::enclosing_join(defn, &p.name),
                    Ok(Some(ref j)) if *j == p.step
                )
            })
            .map(|p| p.name.clone())
            .collect();

        let mut changed = false;
        for name in candidates {
            let Some(parent) = case.path(&name) else {
                continue;
            };
            if !join::join_ready(defn, case, parent) {
                continue;
            }
            let join_step = defn.try_step(&parent.step)?.clone();
            let next = defn.successor_of(&join_step)?;
            dispatch::apply_advance(defn, case, &name, &next)?;
            if let Some(p) = case.path_mut(&name) {
                if p.is_started() {
                    let canon = canonical_response(defn.step(&p.step).map(|s| s.kind));
                    p.last_response = Some(canon);
                }
            }
            changed = true;
        }
        if !changed {
            break;
        }
    }

    if root_complete_at_end(defn, case) {
        case.is_complete = true;
        case.pend_exec_path.clear();
        return Ok(());
    }

    if case.exec_paths.iter().all(|p| p.status == PathStatus::Completed) {
        return Err(EngineError::Unrepairable {
            case_id: case.case_id,
            detail: "every path is completed but the root never reached END".into(),
        });
    }

    // pend-path selection
    case.pend_exec_path = select_pend_path(case);
    Ok(())
}

fn root_complete_at_end(defn: &WorkflowDefinition, case: &CaseState) -> bool {
    case.root().is_some_and(|root| {
        root.status == PathStatus::Completed
            && defn
                .step(&root.step)
                .map(|s| s.kind == StepKind::End)
                .unwrap_or(false)
    })
}

/// The canonical resume point: among all pended paths, the one with the
/// greatest depth; ties break to the lexicographically smallest name.
/// Empty when nothing pends.
pub(crate) fn select_pend_path(case: &CaseState) -> String {
    case.exec_paths
        .iter()
        .filter(|p| p.is_pended())
        .max_by(|a, b| {
            path::depth(&a.name)
                .cmp(&path::depth(&b.name))
                .then_with(|| b.name.cmp(&a.name))
        })
        .map(|p| p.name.clone())
        .unwrap_or_default()
}
