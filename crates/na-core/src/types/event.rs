use crate::types::anomaly::Anomaly;
use crate::types::enums::{AnomalyStatus, JudgeDecision, RefineStage};
use crate::types::fix::Fix;
use crate::types::ids::AnomalyId;
use crate::types::repo::{Repository, VerificationReport};
use na_git::BranchCleanup;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum EventBody {
    AnomalyIngested {
        anomaly: Anomaly,
        score: i64,
    },
    AnomalyReviewed {
        anomaly_id: AnomalyId,
        decision: JudgeDecision,
        status: AnomalyStatus,
    },
    AnalysisSaved {
        anomaly_id: AnomalyId,
    },
    ProposalSaved {
        fix: Fix,
    },
    FixReconstructed {
        fix: Fix,
    },
    FixApproved {
        fix: Fix,
    },
    SandboxApplied {
        fix: Fix,
        changed_files: Vec<String>,
        commit: Option<String>,
    },
    FixMerged {
        fix: Fix,
        target: String,
        merge_commit: String,
    },
    FixRejected {
        fix: Fix,
        branch_cleanup: Option<BranchCleanup>,
    },
    RefinementRequested {
        anomaly_id: AnomalyId,
        stage: RefineStage,
        instruction: String,
    },
    WorkflowDispatched {
        anomaly_id: AnomalyId,
        execution_id: String,
    },
    WorkflowStarted {
        anomaly_id: Option<AnomalyId>,
        execution_id: String,
        flow: String,
        engine_execution_id: Option<String>,
    },
    WorkflowFailed {
        anomaly_id: Option<AnomalyId>,
        execution_id: String,
        flow: String,
        error: String,
    },

    RepositoryRegistered {
        repository: Repository,
    },
    RepositoryVerified {
        report: VerificationReport,
    },
}
