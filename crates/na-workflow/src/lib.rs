pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod worker;

pub use crate::config::{EngineKind, KestraConfig, LocalConfig, WorkflowConfig};
pub use crate::dispatcher::{QueueDispatcher, WorkflowDispatcher, WorkflowKind, WorkflowRequest};
pub use crate::engine::{Engine, WorkflowStatus};
pub use crate::error::DispatchError;
pub use crate::worker::{DispatchOutcome, WorkerStats, run_dispatch_worker};
