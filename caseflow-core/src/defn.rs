use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::EngineError;

/// Reference to a registered definition: name plus version.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionRef {
    pub name: String,
    pub version: u32,
}

impl fmt::Display for DefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:v{}", self.name, self.version)
    }
}

/// The closed set of step kinds.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Start,
    End,
    Task,
    SRoute,
    PRoute,
    Join,
}

/// One node of the workflow graph. Edges are resolved by step name.
///
/// Field usage by kind:
/// - `TASK`, `START`, `JOIN`: `next` names the successor.
/// - `S_ROUTE`, `P_ROUTE`: `branches` maps branch name to the branch's first
///   step; `P_ROUTE` additionally names its matching `JOIN` in `join`.
/// - `TASK`, `S_ROUTE`, `P_ROUTE`: `unit` names the registered body.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Step {
    pub name: String,
    pub kind: StepKind,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub unit: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub next: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub join: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub branches: BTreeMap<String, String>,
}

/// An immutable, externally supplied workflow graph. Parsing and structural
/// validation happen upstream; the engine only resolves names and surfaces
/// a definition fault when a lookup misses.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowDefinition {
    pub name: String,
    pub version: u32,
    pub steps: Vec<Step>,
}

impl WorkflowDefinition {
    pub fn definition_ref(&self) -> DefinitionRef {
        DefinitionRef {
            name: self.name.clone(),
            version: self.version,
        }
    }

    pub fn step(&self, name: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn try_step(&self, name: &str) -> Result<&Step, EngineError> {
        self.step(name).ok_or_else(|| EngineError::DefinitionFault {
            definition: self.name.clone(),
            detail: format!("unknown step '{name}'"),
        })
    }

    /// The unique START node.
    pub fn start_step(&self) -> Result<&Step, EngineError> {
        let mut starts = self.steps.iter().filter(|s| s.kind == StepKind::Start);
        let first = starts.next().ok_or_else(|| EngineError::DefinitionFault {
            definition: self.name.clone(),
            detail: "definition has no START step".into(),
        })?;
        if starts.next().is_some() {
            return Err(EngineError::DefinitionFault {
                definition: self.name.clone(),
                detail: "definition has more than one START step".into(),
            });
        }
        Ok(first)
    }

    /// The declared successor of `step`, faulting when absent.
    pub fn successor_of(&self, step: &Step) -> Result<String, EngineError> {
        if step.next.is_empty() {
            return Err(EngineError::DefinitionFault {
                definition: self.name.clone(),
                detail: format!("step '{}' has no successor", step.name),
            });
        }
        Ok(step.next.clone())
    }

    /// The first step of `branch` under a route step, faulting when the
    /// branch is not declared.
    pub fn branch_step(&self, route: &Step, branch: &str) -> Result<String, EngineError> {
        route
            .branches
            .get(branch)
            .cloned()
            .ok_or_else(|| EngineError::DefinitionFault {
                definition: self.name.clone(),
                detail: format!("route '{}' has no branch '{branch}'", route.name),
            })
    }

    /// True when `step_name` is the declared first step of some parallel
    /// route's branch, i.e. lives inside a fan-out by construction.
    pub fn is_branch_start(&self, step_name: &str) -> bool {
        self.steps
            .iter()
            .filter(|s| s.kind == StepKind::PRoute)
            .any(|s| s.branches.values().any(|b| b == step_name))
    }

    /// SHA-256 over the canonical JSON form, used to detect definition drift
    /// between start and resume.
    pub fn fingerprint(&self) -> [u8; 32] {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        hasher.finalize().into()
    }
}
