pub mod anomaly;
pub mod enums;
pub mod event;
pub mod fix;
pub mod ids;
pub mod io;
pub mod repo;

pub use anomaly::{Anomaly, AnomalyWithRepo, context_keys};
pub use enums::{AnomalyStatus, FixStatus, JudgeDecision, Protocol, RefineStage, Severity};
pub use event::EventBody;
pub use fix::Fix;
pub use ids::{AnomalyId, FixId, IdError, RepoId};
pub use io::{
    AnomalyFilter, IngestReceipt, IngestStatus, LifecycleStats, MergeReport, ProposalInput,
    RegisterRepositoryInput, ReviewInput, WorkflowTrace,
};
pub use repo::{Repository, VerificationReport};
