use crate::types::enums::{AnomalyStatus, FixStatus, JudgeDecision, Protocol};
use crate::types::fix::Fix;
use crate::types::ids::{AnomalyId, RepoId};
use na_git::BranchCleanup;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IngestStatus {
    Received,
    Dropped,
    Error,
}

/// Answer returned to the reporting agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestReceipt {
    pub status: IngestStatus,
    pub anomaly_id: Option<AnomalyId>,
    pub score: i64,
    pub execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReviewInput {
    pub decision: JudgeDecision,
    pub reasoning: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposalInput {
    /// Root-cause analysis, either structured or as JSON text.
    pub analysis: Value,
    pub patch: String,
    #[serde(default)]
    pub confidence: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterRepositoryInput {
    pub id: Option<RepoId>,
    pub url: String,
    pub protocol: Option<Protocol>,
    pub credential_ref: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnomalyFilter {
    pub status: Option<AnomalyStatus>,
    pub repo_id: Option<RepoId>,
    pub limit: Option<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeReport {
    pub fix: Fix,
    pub target: String,
    pub merge_commit: String,
    pub cleanup: BranchCleanup,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LifecycleStats {
    pub anomalies_total: u64,
    pub anomalies: BTreeMap<AnomalyStatus, u64>,
    pub fixes_total: u64,
    pub fixes: BTreeMap<FixStatus, u64>,
}

/// What is known about a queued workflow request, keyed by the execution id
/// returned at dispatch time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowTrace {
    pub execution_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub anomaly_id: Option<AnomalyId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub engine_execution_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
