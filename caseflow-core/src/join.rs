//! Fan-out and join coordination.
//!
//! There is no barrier primitive here: join readiness is a pure predicate
//! over the path table, recomputed from names whenever the driver looks for
//! runnable work.

use crate::defn::{StepKind, WorkflowDefinition};
use crate::error::EngineError;
use crate::path;
use crate::types::{CaseState, ExecPath, PathStatus, UnitResponseType};

/// The join step guarding this path's own fan-out level: the join declared
/// by the route segment in its name. `None` for the root.
pub(crate) fn enclosing_join(
    defn: &WorkflowDefinition,
    path_name: &str,
) -> Result<Option<String>, EngineError> {
    let Some(route) = path::route_segment(path_name) else {
        return Ok(None);
    };
    let step = defn.try_step(route)?;
    if step.join.is_empty() {
        return Ok(None);
    }
    Ok(Some(step.join.clone()))
}

/// Apply a parallel route's response on `parent_name`: create one child per
/// branch and park the parent at the route's join.
///
/// Creation is idempotent per child name, so replaying a route whose fan-out
/// partially survives in a snapshot cannot duplicate paths.
/// Returns `(name, first step)` of each child actually created.
pub(crate) fn fan_out(
    defn: &WorkflowDefinition,
    case: &mut CaseState,
    parent_name: &str,
    route_name: &str,
    branches: &[String],
) -> Result<Vec<(String, String)>, EngineError> {
    let route = defn.try_step(route_name)?;
    if route.join.is_empty() {
        return Err(EngineError::DefinitionFault {
            definition: defn.name.clone(),
            detail: format!("parallel route '{route_name}' declares no join"),
        });
    }
    let join_step = defn.try_step(&route.join)?;
    if join_step.kind != StepKind::Join {
        return Err(EngineError::DefinitionFault {
            definition: defn.name.clone(),
            detail: format!(
                "step '{}' referenced as join of '{route_name}' is not a JOIN",
                route.join
            ),
        });
    }

    // resolve every branch before touching the case, so a bad branch
    // surfaces without leaving a half-applied fan-out behind
    let mut planned = Vec::new();
    for branch in branches {
        let first = defn.branch_step(route, branch)?;
        defn.try_step(&first)?;
        planned.push((path::child_name(parent_name, route_name, branch), first));
    }

    let mut created = Vec::new();
    for (child, first) in planned {
        if case.path(&child).is_none() {
            case.add_path(ExecPath::new(child.clone(), first.clone()));
            created.push((child, first));
        }
    }

    let join_name = route.join.clone();
    let parent = case
        .path_mut(parent_name)
        .ok_or_else(|| EngineError::Internal(format!("fan-out parent '{parent_name}' missing")))?;
    parent.step = join_name;
    parent.last_response = Some(UnitResponseType::OkProceed);
    Ok(created)
}

/// A parent parked at a join may proceed once every sibling below the
/// route is completed with an empty basket and no ticket is outstanding.
/// Vacuously true when no children exist under the join.
pub(crate) fn join_ready(defn: &WorkflowDefinition, case: &CaseState, parent: &ExecPath) -> bool {
    if !case.ticket.is_empty() {
        return false;
    }
    for route in defn
        .steps
        .iter()
        .filter(|s| s.kind == StepKind::PRoute && s.join == parent.step)
    {
        for child in case.children_of(&parent.name, &route.name) {
            if child.status != PathStatus::Completed || child.is_pended() {
                return false;
            }
        }
    }
    true
}

/// Consume `case.ticket`: cooperatively complete every still-started path,
/// then re-arm the root at the ticket target. The target has already been
/// validated against the definition.
pub(crate) fn consume_ticket(case: &mut CaseState) -> Result<(), EngineError> {
    let target = std::mem::take(&mut case.ticket);
    if target.is_empty() {
        return Ok(());
    }
    for p in case.exec_paths.iter_mut() {
        if p.status == PathStatus::Started {
            p.complete();
        }
    }
    let root = case
        .path_mut(path::ROOT)
        .ok_or_else(|| EngineError::Internal("case has no root path".into()))?;
    root.status = PathStatus::Started;
    root.step = target;
    root.last_response = Some(UnitResponseType::OkProceed);
    root.error_code.clear();
    root.error_desc.clear();
    Ok(())
}
