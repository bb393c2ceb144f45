use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnomalyStatus {
    Pending,
    Ignored,
    Validated,
    Analyzed,
    ProposalReady,
    SandboxReady,
    Resolved,
}

impl AnomalyStatus {
    pub const ALL: [Self; 7] = [
        Self::Pending,
        Self::Ignored,
        Self::Validated,
        Self::Analyzed,
        Self::ProposalReady,
        Self::SandboxReady,
        Self::Resolved,
    ];

    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Ignored | Self::Resolved)
    }

    /// Statuses at which a Fix row must exist.
    pub fn expects_fix(self) -> bool {
        matches!(
            self,
            Self::ProposalReady | Self::SandboxReady | Self::Resolved
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Ignored => "IGNORED",
            Self::Validated => "VALIDATED",
            Self::Analyzed => "ANALYZED",
            Self::ProposalReady => "PROPOSAL_READY",
            Self::SandboxReady => "SANDBOX_READY",
            Self::Resolved => "RESOLVED",
        }
    }
}

impl fmt::Display for AnomalyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixStatus {
    Pending,
    Approved,
    Rejected,
    AppliedSandbox,
    Merged,
}

impl FixStatus {
    pub const ALL: [Self; 5] = [
        Self::Pending,
        Self::Approved,
        Self::Rejected,
        Self::AppliedSandbox,
        Self::Merged,
    ];

    /// Status a reconstructed Fix gets for an anomaly at `status`.
    pub fn for_anomaly(status: AnomalyStatus) -> Self {
        match status {
            AnomalyStatus::SandboxReady => Self::AppliedSandbox,
            AnomalyStatus::Resolved => Self::Merged,
            _ => Self::Pending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::AppliedSandbox => "applied_sandbox",
            Self::Merged => "merged",
        }
    }
}

impl fmt::Display for FixStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    Critical,
    Fatal,
    Error,
    Warn,
    Info,
    Debug,
}

impl Severity {
    /// Accepts the canonical names plus the HIGH/MEDIUM/LOW/WARNING synonyms
    /// some detectors emit. Case-insensitive.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_uppercase().as_str() {
            "CRITICAL" => Some(Self::Critical),
            "FATAL" => Some(Self::Fatal),
            "ERROR" | "HIGH" => Some(Self::Error),
            "WARN" | "WARNING" | "MEDIUM" => Some(Self::Warn),
            "INFO" | "LOW" => Some(Self::Info),
            "DEBUG" => Some(Self::Debug),
            _ => None,
        }
    }

    pub fn is_quiet(self) -> bool {
        matches!(self, Self::Info | Self::Debug)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JudgeDecision {
    Critical,
    Ignore,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    #[default]
    Https,
    Ssh,
}

impl Protocol {
    pub fn infer(url: &str) -> Self {
        if url.starts_with("ssh://") || url.starts_with("git@") {
            Self::Ssh
        } else {
            Self::Https
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefineStage {
    Proposal,
    Sandbox,
}
