use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::defn::DefinitionRef;
use crate::path;

// ─── Scalar aliases ───────────────────────────────────────────

/// Epoch milliseconds (UTC).
pub type Timestamp = i64;

/// Unique identifier of a case (one workflow instance).
pub type CaseId = Uuid;

/// Basket a path is parked in when the engine itself deems the pend
/// (crash repair, thrown task faults, join timeouts).
pub const TEMP_HOLD_BASKET: &str = "workflow_temp_hold";

/// Engine-synthetic error code recorded when a task or route body raises
/// instead of returning a well-formed response.
pub const UNIT_FAULT_CODE: &str = "unit_fault";

pub fn now_ms() -> Timestamp {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

// ─── Process variables ────────────────────────────────────────

/// A typed process-variable value. The tag set is closed; `Object` and
/// `ListOfObject` carry opaque JSON that the engine never interprets.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VarValue {
    String(String),
    Long(i64),
    Double(f64),
    Boolean(bool),
    Object(serde_json::Value),
    ListOfObject(Vec<serde_json::Value>),
}

impl VarValue {
    /// The wire name of this value's type tag.
    pub fn type_name(&self) -> &'static str {
        match self {
            VarValue::String(_) => "STRING",
            VarValue::Long(_) => "LONG",
            VarValue::Double(_) => "DOUBLE",
            VarValue::Boolean(_) => "BOOLEAN",
            VarValue::Object(_) => "OBJECT",
            VarValue::ListOfObject(_) => "LIST_OF_OBJECT",
        }
    }
}

/// One `{name, type, value}` record of the persisted variable list.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ProcessVariable {
    pub name: String,
    #[serde(flatten)]
    pub value: VarValue,
}

/// The case-scoped variable mapping. Keys are unique; the stored order is
/// insertion order, which the engine never relies on.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProcessVariables {
    vars: Vec<ProcessVariable>,
}

impl ProcessVariables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&VarValue> {
        self.vars.iter().find(|v| v.name == name).map(|v| &v.value)
    }

    /// Insert or replace the value under `name`.
    pub fn set(&mut self, name: impl Into<String>, value: VarValue) {
        let name = name.into();
        match self.vars.iter_mut().find(|v| v.name == name) {
            Some(existing) => existing.value = value,
            None => self.vars.push(ProcessVariable { name, value }),
        }
    }

    pub fn remove(&mut self, name: &str) -> Option<VarValue> {
        let idx = self.vars.iter().position(|v| v.name == name)?;
        Some(self.vars.remove(idx).value)
    }

    /// Merge `other` into self; keys present in `other` replace existing values.
    pub fn merge(&mut self, other: ProcessVariables) {
        for var in other.vars {
            self.set(var.name, var.value);
        }
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ProcessVariable> {
        self.vars.iter()
    }
}

impl FromIterator<(String, VarValue)> for ProcessVariables {
    fn from_iter<T: IntoIterator<Item = (String, VarValue)>>(iter: T) -> Self {
        let mut vars = ProcessVariables::new();
        for (name, value) in iter {
            vars.set(name, value);
        }
        vars
    }
}

// ─── Step responses (persisted form) ──────────────────────────

/// The last interpreted response on an execution path. Unset means the path
/// was mid-dispatch when the snapshot was taken.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum UnitResponseType {
    OkProceed,
    OkPend,
    OkPendEor,
    ErrorPend,
}

// ─── Execution paths ──────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PathStatus {
    Started,
    Completed,
}

/// One concurrent thread of control inside a case, identified by a
/// dot-delimited hierarchical name (see the `path` module).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecPath {
    pub name: String,
    pub status: PathStatus,
    /// Name of the step this path most recently touched.
    pub step: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_response: Option<UnitResponseType>,
    /// Non-empty iff the path is pended awaiting an external signal.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pend_basket: String,
    /// Last non-empty `pend_basket`, kept for crash-recovery fallback.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub prev_pend_basket: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_code: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub error_desc: String,
}

impl ExecPath {
    pub fn new(name: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: PathStatus::Started,
            step: step.into(),
            last_response: None,
            pend_basket: String::new(),
            prev_pend_basket: String::new(),
            error_code: String::new(),
            error_desc: String::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.status == PathStatus::Started
    }

    pub fn is_pended(&self) -> bool {
        !self.pend_basket.is_empty()
    }

    /// Park this path in `basket`, recording `response`. Any previously held
    /// basket moves to `prev_pend_basket`. Error fields are reset; an
    /// ERROR_PEND caller re-populates them afterwards.
    pub fn pend(&mut self, basket: impl Into<String>, response: UnitResponseType) {
        if !self.pend_basket.is_empty() {
            self.prev_pend_basket = std::mem::take(&mut self.pend_basket);
        }
        self.pend_basket = basket.into();
        self.last_response = Some(response);
        self.error_code.clear();
        self.error_desc.clear();
    }

    /// Release the path from its basket, remembering it in `prev_pend_basket`.
    pub fn clear_pend(&mut self) {
        if !self.pend_basket.is_empty() {
            self.prev_pend_basket = std::mem::take(&mut self.pend_basket);
        }
    }

    /// Freeze the path. Completed paths are never re-entered.
    pub fn complete(&mut self) {
        self.status = PathStatus::Completed;
        self.clear_pend();
    }
}

// ─── Case state (the persisted snapshot) ──────────────────────

/// The per-case snapshot, persisted atomically after every observable
/// transition. This is the single unit of durability: a crash at any moment
/// leaves the last written `CaseState` on disk, and the sanitizer can turn
/// any such snapshot back into a driveable configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CaseState {
    pub case_id: CaseId,
    pub definition_ref: DefinitionRef,
    /// SHA-256 of the definition the case was started with. Drift on resume
    /// is advisory only.
    #[serde(default, skip_serializing_if = "fingerprint_is_zero")]
    pub definition_fingerprint: [u8; 32],
    #[serde(default)]
    pub is_complete: bool,
    #[serde(default)]
    pub ts: Timestamp,
    /// Canonical resume point among pended branches, empty while running.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub pend_exec_path: String,
    /// Pending non-local jump target, empty when none.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub ticket: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_executed_step: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub last_executed_component: String,
    #[serde(default, skip_serializing_if = "ProcessVariables::is_empty")]
    pub process_variables: ProcessVariables,
    #[serde(default)]
    pub exec_paths: Vec<ExecPath>,
}

fn fingerprint_is_zero(fp: &[u8; 32]) -> bool {
    fp.iter().all(|b| *b == 0)
}

impl CaseState {
    pub fn new(
        case_id: CaseId,
        definition_ref: DefinitionRef,
        definition_fingerprint: [u8; 32],
        start_step: impl Into<String>,
        process_variables: ProcessVariables,
    ) -> Self {
        Self {
            case_id,
            definition_ref,
            definition_fingerprint,
            is_complete: false,
            ts: now_ms(),
            pend_exec_path: String::new(),
            ticket: String::new(),
            last_executed_step: String::new(),
            last_executed_component: String::new(),
            process_variables,
            exec_paths: vec![ExecPath::new(path::ROOT, start_step)],
        }
    }

    pub fn path(&self, name: &str) -> Option<&ExecPath> {
        self.exec_paths.iter().find(|p| p.name == name)
    }

    pub fn path_mut(&mut self, name: &str) -> Option<&mut ExecPath> {
        self.exec_paths.iter_mut().find(|p| p.name == name)
    }

    pub fn root(&self) -> Option<&ExecPath> {
        self.path(path::ROOT)
    }

    /// Insert a new path. The caller guarantees name uniqueness.
    pub fn add_path(&mut self, p: ExecPath) {
        self.exec_paths.push(p);
    }

    /// Children exactly one fan-out level below `parent` under `route`.
    pub fn children_of<'a>(
        &'a self,
        parent: &'a str,
        route: &'a str,
    ) -> impl Iterator<Item = &'a ExecPath> {
        self.exec_paths
            .iter()
            .filter(move |p| path::is_child_of(&p.name, parent, route))
    }

    pub fn all_completed(&self) -> bool {
        self.exec_paths.iter().all(|p| p.status == PathStatus::Completed)
    }
}
