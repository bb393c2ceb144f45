use crate::types::enums::Protocol;
use crate::types::ids::RepoId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: RepoId,
    pub url: String,
    pub protocol: Protocol,
    /// Key into the configured credential map; never the secret itself.
    pub credential_ref: Option<String>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerificationReport {
    pub repo_id: RepoId,
    pub connection: bool,
    pub read: bool,
    pub write: bool,
    pub verified: bool,
    pub logs: Vec<String>,
}
