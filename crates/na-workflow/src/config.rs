use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EngineKind {
    /// Record requests in the log only.
    #[default]
    Log,
    Kestra,
    Local,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub engine: EngineKind,
    pub kestra: KestraConfig,
    pub local: LocalConfig,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KestraConfig {
    pub url: String,
    pub namespace: String,
    /// Flow triggered for newly ingested anomalies.
    pub flow_id: String,
    pub timeout_secs: u64,
}

impl Default for KestraConfig {
    fn default() -> Self {
        Self {
            url: "http://localhost:8080".to_string(),
            namespace: "nightagent".to_string(),
            flow_id: "fix_anomaly".to_string(),
            timeout_secs: 30,
        }
    }
}

/// Runs flows as local processes. Commands are split with shell-words; the
/// request inputs are appended as a single JSON argument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalConfig {
    pub fix_command: Option<String>,
    pub flows: BTreeMap<String, String>,
    pub timeout_secs: u64,
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            fix_command: None,
            flows: BTreeMap::new(),
            timeout_secs: 600,
        }
    }
}
