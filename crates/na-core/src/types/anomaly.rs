use crate::types::enums::AnomalyStatus;
use crate::types::ids::{AnomalyId, RepoId};
use crate::types::repo::Repository;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Keys the orchestrator writes into an anomaly's context object. Everything
/// else in the context is detector output and is never touched.
pub mod context_keys {
    pub const PRIORITY_SCORE: &str = "priority_score";
    pub const VERIFIED_CRITICAL: &str = "verified_critical";
    pub const JUDGE_REASONING: &str = "judge_reasoning";
    pub const ROOT_CAUSE_ANALYSIS: &str = "root_cause_analysis";
    pub const GENERATED_PATCH: &str = "generated_patch";
    pub const PROPOSAL_ID: &str = "proposal_id";
    pub const WORKFLOW_EXECUTION_ID: &str = "workflow_execution_id";
    pub const WORKFLOW_ENGINE_EXECUTION_ID: &str = "workflow_engine_execution_id";
    pub const WORKFLOW_ERROR: &str = "workflow_error";
    pub const REFINEMENTS: &str = "refinements";
    pub const SANDBOX_COMMIT: &str = "sandbox_commit";
    pub const MERGE_COMMIT: &str = "merge_commit";
    pub const MERGED_INTO: &str = "merged_into";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub id: AnomalyId,
    pub repo_id: RepoId,
    pub status: AnomalyStatus,
    pub context: Map<String, Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Anomaly {
    pub fn priority_score(&self) -> Option<i64> {
        self.context
            .get(context_keys::PRIORITY_SCORE)
            .and_then(Value::as_i64)
    }

    pub fn verified_critical(&self) -> bool {
        self.context
            .get(context_keys::VERIFIED_CRITICAL)
            .and_then(Value::as_bool)
            .unwrap_or(false)
    }

    pub fn generated_patch(&self) -> Option<&str> {
        self.context
            .get(context_keys::GENERATED_PATCH)
            .and_then(Value::as_str)
    }

    pub fn root_cause_analysis(&self) -> Option<&Value> {
        self.context
            .get(context_keys::ROOT_CAUSE_ANALYSIS)
            .filter(|value| !value.is_null())
    }

    /// Merges `fields` into the context, replacing only the given keys.
    pub fn merge_context(&mut self, fields: Map<String, Value>) {
        for (key, value) in fields {
            self.context.insert(key, value);
        }
    }

    /// Appends to an array-valued context key, starting a new array when the
    /// key is missing or holds something else.
    pub fn push_context(&mut self, key: &str, value: Value) {
        let entry = self
            .context
            .entry(key.to_string())
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = entry {
            items.push(value);
        } else {
            *entry = Value::Array(vec![value]);
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyWithRepo {
    #[serde(flatten)]
    pub anomaly: Anomaly,
    pub repository: Option<Repository>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn anomaly(context: Value) -> Anomaly {
        let Value::Object(context) = context else {
            panic!("context must be an object");
        };
        Anomaly {
            id: AnomalyId::generate(),
            repo_id: RepoId::new("repo-1".to_string()).unwrap(),
            status: AnomalyStatus::Pending,
            context,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn merge_keeps_unrelated_keys() {
        let mut anomaly = anomaly(json!({"type": "Latency Spike", "message": "slow"}));
        let mut fields = Map::new();
        fields.insert(context_keys::PRIORITY_SCORE.to_string(), json!(70));
        anomaly.merge_context(fields);
        assert_eq!(anomaly.context["type"], "Latency Spike");
        assert_eq!(anomaly.priority_score(), Some(70));
        assert!(!anomaly.verified_critical());
    }

    #[test]
    fn push_context_replaces_non_arrays() {
        let mut anomaly = anomaly(json!({"refinements": "garbage"}));
        anomaly.push_context(context_keys::REFINEMENTS, json!({"instruction": "a"}));
        anomaly.push_context(context_keys::REFINEMENTS, json!({"instruction": "b"}));
        assert_eq!(
            anomaly.context[context_keys::REFINEMENTS],
            json!([{"instruction": "a"}, {"instruction": "b"}])
        );
    }

    #[test]
    fn null_analysis_counts_as_missing() {
        let anomaly = anomaly(json!({"root_cause_analysis": null}));
        assert!(anomaly.root_cause_analysis().is_none());
    }
}
