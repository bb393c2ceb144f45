pub mod anomalies;
pub mod config;
pub mod error;
pub mod events;
pub mod fixes;
pub mod locks;
pub mod orchestrator;
pub mod recovery;
pub mod repos;
pub mod scoring;
pub mod store;
pub mod validation;

pub mod types;

pub use crate::config::OrchestratorConfig;
pub use crate::error::OrchestratorError;
pub use crate::locks::{LockError, RepoLocks};
pub use crate::orchestrator::{Orchestrator, RequestContext};
pub use crate::store::Store;
