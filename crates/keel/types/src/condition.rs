//! Status conditions

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Condition type reporting overall readiness
pub const READY: &str = "Ready";

/// Condition type reporting the action currently executing in a run
pub const RUNNING_ACTION: &str = "RunningAction";

/// Condition type reporting a terminal workflow run
pub const FINISHED: &str = "Finished";

/// Tri-state condition status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConditionStatus {
    True,
    False,
    #[default]
    Unknown,
}

impl fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConditionStatus::True => write!(f, "True"),
            ConditionStatus::False => write!(f, "False"),
            ConditionStatus::Unknown => write!(f, "Unknown"),
        }
    }
}

/// One observation about an object's state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    #[serde(rename = "type")]
    pub type_: String,

    pub status: ConditionStatus,

    #[serde(default)]
    pub reason: String,

    #[serde(default)]
    pub message: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_transition_time: Option<DateTime<Utc>>,
}

impl Condition {
    pub fn new(
        type_: impl Into<String>,
        status: ConditionStatus,
        reason: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            type_: type_.into(),
            status,
            reason: reason.into(),
            message: message.into(),
            last_transition_time: None,
        }
    }

    pub fn is_true(&self) -> bool {
        self.status == ConditionStatus::True
    }
}

/// Accessors over a list of conditions keyed by type
pub trait Conditions {
    /// Insert or update a condition. Returns whether anything changed.
    ///
    /// The transition time moves only when the status flips, so re-asserting
    /// an identical outcome leaves the list byte-for-byte unchanged.
    fn set_condition(&mut self, condition: Condition) -> bool;

    fn condition(&self, type_: &str) -> Option<&Condition>;

    fn is_condition_true(&self, type_: &str) -> bool {
        self.condition(type_).map(Condition::is_true).unwrap_or(false)
    }
}

impl Conditions for Vec<Condition> {
    fn set_condition(&mut self, mut condition: Condition) -> bool {
        match self.iter_mut().find(|c| c.type_ == condition.type_) {
            Some(existing) => {
                if existing.status == condition.status {
                    condition.last_transition_time = existing.last_transition_time;
                } else {
                    condition.last_transition_time = Some(Utc::now());
                }
                if *existing == condition {
                    return false;
                }
                *existing = condition;
                true
            }
            None => {
                condition.last_transition_time = Some(Utc::now());
                self.push(condition);
                true
            }
        }
    }

    fn condition(&self, type_: &str) -> Option<&Condition> {
        self.iter().find(|c| c.type_ == type_)
    }
}
