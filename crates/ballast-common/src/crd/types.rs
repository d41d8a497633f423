//! Supporting types shared by the ballast CRDs

use chrono::{DateTime, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Condition status following Kubernetes conventions
#[derive(Clone, Copy, Debug, Default, Deserialize, Serialize, JsonSchema, PartialEq, Eq)]
pub enum ConditionStatus {
    /// Condition is true
    True,
    /// Condition is false
    False,
    /// Condition status is unknown
    #[default]
    Unknown,
}

impl std::fmt::Display for ConditionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::True => write!(f, "True"),
            Self::False => write!(f, "False"),
            Self::Unknown => write!(f, "Unknown"),
        }
    }
}

/// Kubernetes-style condition for status reporting
#[derive(Clone, Debug, Deserialize, Serialize, JsonSchema, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Condition {
    /// Type of condition (e.g., ClusterAutoscalerDeploymentReady)
    #[serde(rename = "type")]
    pub type_: String,

    /// Status of the condition (True, False, Unknown)
    pub status: ConditionStatus,

    /// Machine-readable reason for the condition
    #[serde(default)]
    pub reason: String,

    /// Human-readable message
    #[serde(default)]
    pub message: String,

    /// Last time the condition transitioned
    pub last_transition_time: DateTime<Utc>,
}

impl Condition {
    /// Create a new condition with the current timestamp
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
            last_transition_time: Utc::now(),
        }
    }

    /// True when status and message match, ignoring reason and timestamp
    pub fn same_state(&self, other: &Condition) -> bool {
        self.type_ == other.type_ && self.status == other.status && self.message == other.message
    }
}

/// Replace or insert `condition` by type, keeping the transition time when the status is unchanged.
///
/// Returns true when anything observable changed.
pub fn upsert_condition(conditions: &mut Vec<Condition>, mut condition: Condition) -> bool {
    match conditions.iter_mut().find(|c| c.type_ == condition.type_) {
        Some(existing) if existing.same_state(&condition) => false,
        Some(existing) => {
            if existing.status == condition.status {
                condition.last_transition_time = existing.last_transition_time;
            }
            *existing = condition;
            true
        }
        None => {
            conditions.push(condition);
            true
        }
    }
}

/// Drop the condition with the given type. Returns true if one was removed.
pub fn remove_condition(conditions: &mut Vec<Condition>, type_: &str) -> bool {
    let before = conditions.len();
    conditions.retain(|c| c.type_ != type_);
    conditions.len() != before
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn condition_status_defaults_to_unknown() {
        assert_eq!(ConditionStatus::default(), ConditionStatus::Unknown);
        assert_eq!(ConditionStatus::True.to_string(), "True");
    }

    #[test]
    fn condition_serializes_with_kubernetes_field_names() {
        let condition = Condition::new("Ready", ConditionStatus::True, "Installed", "ok");
        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "Ready");
        assert_eq!(json["status"], "True");
        assert!(json.get("lastTransitionTime").is_some());
    }

    #[test]
    fn upsert_is_a_no_op_for_identical_state() {
        let mut conditions = vec![Condition::new("A", ConditionStatus::False, "R", "waiting")];
        let changed = upsert_condition(
            &mut conditions,
            Condition::new("A", ConditionStatus::False, "Other", "waiting"),
        );
        assert!(!changed);
        assert_eq!(conditions[0].reason, "R");
    }

    #[test]
    fn upsert_replaces_by_type_and_appends_new_types() {
        let mut conditions = vec![Condition::new("A", ConditionStatus::False, "R", "waiting")];
        assert!(upsert_condition(
            &mut conditions,
            Condition::new("A", ConditionStatus::True, "R", "ready")
        ));
        assert!(upsert_condition(
            &mut conditions,
            Condition::new("B", ConditionStatus::Unknown, "R", "")
        ));
        assert_eq!(conditions.len(), 2);
        assert_eq!(conditions[0].status, ConditionStatus::True);
    }

    #[test]
    fn remove_reports_whether_anything_was_removed() {
        let mut conditions = vec![Condition::new("A", ConditionStatus::True, "R", "")];
        assert!(!remove_condition(&mut conditions, "B"));
        assert!(remove_condition(&mut conditions, "A"));
        assert!(conditions.is_empty());
    }
}
