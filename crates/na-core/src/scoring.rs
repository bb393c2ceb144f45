//! Noise filter and priority scoring for incoming anomaly reports.
//!
//! Reports arrive in whatever shape the detector produced. [`AnomalyReport`]
//! accepts every known alias; [`AnomalyReport::normalize`] folds them into a
//! [`NormalizedAnomaly`], and only that strict record is scored.

use crate::types::Severity;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_DISPATCH_THRESHOLD: i64 = 40;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnomalyReport {
    #[serde(rename = "type", default)]
    pub kind: Option<Value>,
    #[serde(default)]
    pub anomaly_type: Option<Value>,
    #[serde(default)]
    pub severity: Option<Value>,
    #[serde(default)]
    pub level: Option<Value>,
    #[serde(default)]
    pub message: Option<Value>,
    #[serde(default)]
    pub confidence: Option<Value>,
    #[serde(default)]
    pub user_id: Option<Value>,
    #[serde(default)]
    pub tenant_scope: Option<Value>,
    #[serde(default)]
    pub context: Option<Value>,
    #[serde(default, alias = "repoId")]
    pub repo_id: Option<Value>,
    #[serde(default, alias = "sidecarId")]
    pub sidecar_id: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NormalizedAnomaly {
    pub kind: String,
    pub severity: Severity,
    pub message: Option<String>,
    pub confidence: Option<f64>,
    pub user_impact: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ScoreDecision {
    pub process: bool,
    pub score: i64,
}

impl AnomalyReport {
    pub fn from_value(value: Value) -> Result<Self, serde_json::Error> {
        serde_json::from_value(value)
    }

    pub fn normalize(&self) -> NormalizedAnomaly {
        let nested = self.context.as_ref();
        let kind = first_text([self.kind.as_ref(), self.anomaly_type.as_ref()]).unwrap_or_default();
        let severity = first_text([
            self.severity.as_ref(),
            self.level.as_ref(),
            nested.and_then(|context| context.get("severity")),
        ])
        .and_then(|text| Severity::parse(&text))
        .unwrap_or(Severity::Info);
        let user_impact = [
            self.user_id.as_ref(),
            self.tenant_scope.as_ref(),
            nested.and_then(|context| context.get("user_id")),
            nested.and_then(|context| context.get("tenant_scope")),
        ]
        .into_iter()
        .flatten()
        .any(is_present);

        NormalizedAnomaly {
            kind,
            severity,
            message: first_text([self.message.as_ref()]),
            confidence: self.confidence.as_ref().and_then(Value::as_f64),
            user_impact,
        }
    }

    /// Repository named by the report: `repo_id` first, then a
    /// `sidecar-{repoId}` sidecar id.
    pub fn repository_hint(&self) -> Option<String> {
        if let Some(repo_id) = first_text([self.repo_id.as_ref()]) {
            return Some(repo_id);
        }
        first_text([self.sidecar_id.as_ref()]).map(|sidecar| {
            sidecar
                .strip_prefix("sidecar-")
                .map_or(sidecar.clone(), str::to_string)
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct KindFlags {
    novelty: bool,
    frequency: bool,
    latency: bool,
    sequence: bool,
}

impl KindFlags {
    fn classify(kind: &str) -> Self {
        let kind = kind.to_lowercase();
        Self {
            novelty: kind.contains("novel")
                || kind.contains("new pattern")
                || kind.contains("new_pattern"),
            frequency: kind.contains("frequency"),
            latency: kind.contains("latency"),
            sequence: kind.contains("sequence"),
        }
    }
}

pub fn score(anomaly: &NormalizedAnomaly) -> ScoreDecision {
    let flags = KindFlags::classify(&anomaly.kind);

    if flags.novelty && anomaly.severity.is_quiet() {
        return ScoreDecision {
            process: false,
            score: 0,
        };
    }

    let mut score = match anomaly.severity {
        Severity::Critical | Severity::Fatal => 100,
        Severity::Error => 80,
        Severity::Warn => 40,
        Severity::Info | Severity::Debug => 10,
    };

    if flags.frequency {
        score += 30;
    }
    if flags.latency {
        score += 30;
    }
    if flags.sequence {
        score += 20;
    }
    if flags.novelty && matches!(anomaly.severity, Severity::Error | Severity::Warn) {
        score += 20;
    }
    if anomaly.user_impact {
        score += 30;
    }
    match anomaly.confidence {
        Some(confidence) if confidence > 0.9 => score += 10,
        Some(confidence) if confidence < 0.5 => score -= 10,
        _ => {}
    }

    ScoreDecision {
        process: true,
        score,
    }
}

pub fn should_dispatch(decision: ScoreDecision, threshold: i64) -> bool {
    decision.process && decision.score >= threshold
}

fn first_text<const N: usize>(candidates: [Option<&Value>; N]) -> Option<String> {
    candidates
        .into_iter()
        .flatten()
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(str::to_string)
}

fn is_present(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(text) => !text.trim().is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(fields) => !fields.is_empty(),
        Value::Bool(_) | Value::Number(_) => true,
    }
}
