//! Workflow templates, runs and action definitions

use crate::condition::Condition;
use crate::impl_resource;
use crate::meta::ObjectMeta;
use crate::resource::KEEL_API_VERSION;
use crate::values::Values;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Length of the generated per-run name suffix
pub const NAME_SUFFIX_LEN: usize = 8;

/// Immutable ordered list of deployment steps
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    pub metadata: ObjectMeta,

    #[serde(default)]
    pub spec: WorkflowSpec,
}

impl_resource!(Workflow, "Workflow", KEEL_API_VERSION);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSpec {
    #[serde(default)]
    pub actions: Vec<Action>,
}

/// A single templated step. `action_type` names an ActionDefinition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    pub name: String,

    #[serde(rename = "type")]
    pub action_type: String,

    #[serde(default)]
    pub values: Values,
}

/// One execution attempt of a Workflow against a target component
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub metadata: ObjectMeta,

    pub spec: WorkflowRunSpec,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<WorkflowRunStatus>,
}

impl_resource!(WorkflowRun, "WorkflowRun", KEEL_API_VERSION);

impl WorkflowRun {
    pub fn is_finished(&self) -> bool {
        self.status.as_ref().map(|s| s.finished).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunSpec {
    pub workflow_name: String,
    pub application_name: String,
    pub component_name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRunStatus {
    #[serde(default)]
    pub conditions: Vec<Condition>,

    /// Terminal flag; once set the run is never executed again
    #[serde(default)]
    pub finished: bool,

    #[serde(default)]
    pub phase: RunPhase,

    /// Generated once per run and reused by every attempt
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name_suffix: Option<String>,

    /// Execution passes started so far
    #[serde(default)]
    pub attempts: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_action: Option<String>,

    #[serde(default)]
    pub observed_generation: u64,
}

/// Coarse lifecycle of a WorkflowRun
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RunPhase {
    #[default]
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl RunPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RunPhase::Succeeded | RunPhase::Failed)
    }
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let phase = match self {
            RunPhase::Pending => "Pending",
            RunPhase::Running => "Running",
            RunPhase::Succeeded => "Succeeded",
            RunPhase::Failed => "Failed",
        };
        f.write_str(phase)
    }
}

/// Short lowercase identifier scoping names generated by one run
pub fn generate_name_suffix() -> String {
    let mut suffix = Uuid::new_v4().simple().to_string();
    suffix.truncate(NAME_SUFFIX_LEN);
    suffix
}

/// Registered action type, resolved by name from the system namespace
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionDefinition {
    pub metadata: ObjectMeta,
    pub spec: ActionDefinitionSpec,
}

impl_resource!(ActionDefinition, "ActionDefinition", KEEL_API_VERSION);

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionDefinitionSpec {
    pub repo_ref: String,

    pub tag: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_ref: Option<String>,
}
