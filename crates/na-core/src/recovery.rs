//! Rebuilding Fix rows from what the anomaly itself remembers.

use crate::types::{Anomaly, AnomalyId, Fix, FixId, FixStatus};
use chrono::{DateTime, Utc};
use serde_json::Value;

const SUMMARY_LIMIT: usize = 120;

/// Human-facing text derived from a root-cause analysis payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FixText {
    pub summary: String,
    pub explanation: String,
}

impl FixText {
    pub fn from_analysis(anomaly_id: &AnomalyId, analysis: Option<&Value>) -> Self {
        let field = |key: &str| {
            analysis
                .and_then(|value| value.get(key))
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|text| !text.is_empty())
        };
        let root_cause = field("root_cause").or_else(|| field("summary"));
        let suggested_fix = field("suggested_fix").or_else(|| field("explanation"));

        let summary = root_cause.map_or_else(
            || format!("Fix for anomaly {}", short_id(anomaly_id)),
            first_line,
        );
        let explanation = suggested_fix
            .or(root_cause)
            .map_or_else(String::new, str::to_string);
        Self {
            summary,
            explanation,
        }
    }
}

/// Accepts analysis either structured or as JSON text, as agents send both.
pub fn parse_analysis(analysis: Value) -> Value {
    match analysis {
        Value::String(text) => match serde_json::from_str::<Value>(&text) {
            Ok(parsed @ Value::Object(_)) => parsed,
            _ => Value::String(text),
        },
        other => other,
    }
}

/// Synthesizes the Fix an anomaly at a fix-bearing status must have had.
/// Returns `None` for statuses where no Fix is expected.
pub fn reconstruct_fix(anomaly: &Anomaly, repo_name: &str, now: DateTime<Utc>) -> Option<Fix> {
    if !anomaly.status.expects_fix() {
        return None;
    }
    let text = FixText::from_analysis(&anomaly.id, anomaly.root_cause_analysis());
    Some(Fix {
        id: FixId::for_anomaly(&anomaly.id),
        anomaly_id: anomaly.id.clone(),
        diff: anomaly.generated_patch().unwrap_or_default().to_string(),
        explanation: text.explanation,
        summary: text.summary,
        branch: na_git::fix_branch_name(repo_name, anomaly.id.as_str()),
        confidence: 1.0,
        status: FixStatus::for_anomaly(anomaly.status),
        created_at: now,
        updated_at: now,
    })
}

fn first_line(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default().trim();
    if line.chars().count() <= SUMMARY_LIMIT {
        return line.to_string();
    }
    let mut short: String = line.chars().take(SUMMARY_LIMIT - 3).collect();
    short.push_str("...");
    short
}

fn short_id(id: &AnomalyId) -> &str {
    let value = id.as_str();
    value.get(..8).unwrap_or(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AnomalyStatus, RepoId, context_keys};
    use serde_json::{Map, json};

    fn anomaly(status: AnomalyStatus, context: Map<String, Value>) -> Anomaly {
        Anomaly {
            id: AnomalyId::new("3f2a9c1e-1111-4222-8333-444455556666".to_string()).unwrap(),
            repo_id: RepoId::new("repo-1".to_string()).unwrap(),
            status,
            context,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn sandbox_ready_reconstructs_applied_fix() {
        let mut context = Map::new();
        context.insert(
            context_keys::GENERATED_PATCH.to_string(),
            json!("diff --git a/x b/x\n"),
        );
        context.insert(
            context_keys::ROOT_CAUSE_ANALYSIS.to_string(),
            json!({"root_cause": "Null user in handler", "suggested_fix": "Guard the lookup"}),
        );
        let anomaly = anomaly(AnomalyStatus::SandboxReady, context);

        let fix = reconstruct_fix(&anomaly, "acme-api", Utc::now()).unwrap();
        assert_eq!(fix.id.as_str(), anomaly.id.as_str());
        assert_eq!(fix.status, FixStatus::AppliedSandbox);
        assert_eq!(fix.branch, "fix/acme-api/3f2a9c1e");
        assert_eq!(fix.diff, "diff --git a/x b/x\n");
        assert!((fix.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(fix.summary, "Null user in handler");
        assert_eq!(fix.explanation, "Guard the lookup");
    }

    #[test]
    fn missing_patch_gives_empty_diff() {
        let fix = reconstruct_fix(
            &anomaly(AnomalyStatus::Resolved, Map::new()),
            "acme-api",
            Utc::now(),
        )
        .unwrap();
        assert_eq!(fix.status, FixStatus::Merged);
        assert!(fix.diff.is_empty());
        assert_eq!(fix.summary, "Fix for anomaly 3f2a9c1e");
    }

    #[test]
    fn early_statuses_expect_no_fix() {
        for status in [
            AnomalyStatus::Pending,
            AnomalyStatus::Ignored,
            AnomalyStatus::Validated,
            AnomalyStatus::Analyzed,
        ] {
            assert!(reconstruct_fix(&anomaly(status, Map::new()), "acme-api", Utc::now()).is_none());
        }
    }

    #[test]
    fn analysis_text_is_parsed() {
        let parsed = parse_analysis(json!("{\"root_cause\":\"leak\"}"));
        assert_eq!(parsed, json!({"root_cause": "leak"}));
        assert_eq!(parse_analysis(json!("plain words")), json!("plain words"));
        assert_eq!(parse_analysis(json!({"a": 1})), json!({"a": 1}));
    }

    #[test]
    fn long_root_causes_are_shortened() {
        let long = "x".repeat(300);
        let text = FixText::from_analysis(
            &AnomalyId::generate(),
            Some(&json!({"root_cause": long})),
        );
        assert_eq!(text.summary.chars().count(), SUMMARY_LIMIT);
        assert!(text.summary.ends_with("..."));
        assert_eq!(text.explanation.len(), 300);
    }
}
