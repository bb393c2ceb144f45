use crate::locks::LockError;
use crate::types::enums::{AnomalyStatus, FixStatus};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AnomalyError {
    #[error("anomaly not found")]
    NotFound,
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition {
        from: AnomalyStatus,
        to: AnomalyStatus,
    },
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum FixError {
    #[error("fix not found")]
    NotFound,
    #[error("invalid transition from {from:?} to {to:?}")]
    InvalidTransition { from: FixStatus, to: FixStatus },
    #[error("fix already merged")]
    AlreadyMerged,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum RepoError {
    #[error("repository not found")]
    RepoNotFound,
    #[error("invalid input: {message}")]
    InvalidInput { message: String },
    #[error("storage error: {message}")]
    Storage { message: String },
}

#[derive(Debug, Error)]
pub enum GitError {
    #[error("git {command} timed out after {secs}s")]
    Timeout { command: String, secs: u64 },
    #[error("git {command} failed: {stderr}")]
    CommandFailed { command: String, stderr: String },
    #[error("patch rejected: {reason}")]
    PatchRejected { reason: String },
    #[error("merge of {from} into {to} failed: {reason}")]
    MergeConflict {
        from: String,
        to: String,
        reason: String,
    },
    #[error("no base branch (main or master) found")]
    NoBaseBranch,
    #[error("not a git repository: {path}")]
    NotARepository { path: String },
    #[error("git backend error: {reason}")]
    Backend { reason: String },
}

impl From<na_git::GitError> for GitError {
    fn from(value: na_git::GitError) -> Self {
        match value {
            na_git::GitError::Timeout { command, secs } => Self::Timeout { command, secs },
            na_git::GitError::CommandFailed { command, stderr } => {
                Self::CommandFailed { command, stderr }
            }
            na_git::GitError::PatchRejected { reason } => Self::PatchRejected { reason },
            na_git::GitError::MergeConflict { from, to, reason } => {
                Self::MergeConflict { from, to, reason }
            }
            na_git::GitError::NoBaseBranch => Self::NoBaseBranch,
            na_git::GitError::NotARepository { path } => Self::NotARepository { path },
            other @ (na_git::GitError::Spawn { .. }
            | na_git::GitError::Io { .. }
            | na_git::GitError::NothingToCommit
            | na_git::GitError::Backend { .. }) => Self::Backend {
                reason: other.to_string(),
            },
        }
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Anomaly(#[from] AnomalyError),
    #[error(transparent)]
    Fix(#[from] FixError),
    #[error(transparent)]
    Repo(#[from] RepoError),
    #[error(transparent)]
    Git(#[from] GitError),
    #[error(transparent)]
    Lock(#[from] LockError),
    #[error("internal error: {message}")]
    Internal { message: String },
}

impl From<na_git::GitError> for OrchestratorError {
    fn from(value: na_git::GitError) -> Self {
        OrchestratorError::Git(GitError::from(value))
    }
}

impl OrchestratorError {
    /// Stable machine-readable code for the error envelope.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Anomaly(AnomalyError::NotFound)
            | Self::Fix(FixError::NotFound)
            | Self::Repo(RepoError::RepoNotFound) => "not_found",
            Self::Anomaly(AnomalyError::InvalidTransition { .. })
            | Self::Fix(FixError::InvalidTransition { .. }) => "invalid_state",
            Self::Fix(FixError::AlreadyMerged) => "conflict",
            Self::Anomaly(AnomalyError::InvalidInput { .. })
            | Self::Fix(FixError::InvalidInput { .. })
            | Self::Repo(RepoError::InvalidInput { .. }) => "invalid_input",
            Self::Git(_) => "git_error",
            Self::Anomaly(AnomalyError::Storage { .. })
            | Self::Fix(FixError::Storage { .. })
            | Self::Repo(RepoError::Storage { .. })
            | Self::Lock(_)
            | Self::Internal { .. } => "internal_error",
        }
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}
