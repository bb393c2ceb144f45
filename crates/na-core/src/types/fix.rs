use crate::types::enums::FixStatus;
use crate::types::ids::{AnomalyId, FixId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Fix {
    pub id: FixId,
    pub anomaly_id: AnomalyId,
    pub diff: String,
    pub explanation: String,
    pub summary: String,
    pub branch: String,
    pub confidence: f64,
    pub status: FixStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Fix {
    pub fn is_applied(&self) -> bool {
        matches!(self.status, FixStatus::AppliedSandbox | FixStatus::Merged)
    }
}
