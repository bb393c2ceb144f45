use crate::scoring::DEFAULT_DISPATCH_THRESHOLD;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Working copies live at `{workspace_root}/{owner}/{repo}`.
    pub workspace_root: PathBuf,
    pub dispatch_threshold: i64,
    pub default_target_branch: String,
    /// Push sandbox branches to origin after committing.
    pub push_sandbox_branches: bool,
    pub refine_proposal_flow: String,
    pub refine_sandbox_flow: String,
    /// Credential reference to access token.
    #[serde(skip)]
    pub credentials: BTreeMap<String, String>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workspace_root: PathBuf::from(".night-agent/workspaces"),
            dispatch_threshold: DEFAULT_DISPATCH_THRESHOLD,
            default_target_branch: "main".to_string(),
            push_sandbox_branches: true,
            refine_proposal_flow: "refine_fix_flow".to_string(),
            refine_sandbox_flow: "refine_sandbox_flow".to_string(),
            credentials: BTreeMap::new(),
        }
    }
}

impl OrchestratorConfig {
    pub fn token_for(&self, credential_ref: Option<&str>) -> Option<&str> {
        credential_ref
            .and_then(|key| self.credentials.get(key))
            .map(String::as_str)
    }
}
