use crate::config::ConfigError;
use na_core::OrchestratorError;
use na_workflow::DispatchError;
use serde_json::{Value, json};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Orchestrator(#[from] OrchestratorError),
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
    #[error("{message}")]
    Input { message: String },
    #[error("{message}")]
    Internal { message: String },
}

impl CliError {
    pub fn input(message: impl Into<String>) -> Self {
        Self::Input {
            message: message.into(),
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            Self::Orchestrator(err) => err.code(),
            Self::Config(_) | Self::Input { .. } => "invalid_input",
            Self::Dispatch(_) => "workflow_error",
            Self::Database(_) | Self::Internal { .. } => "internal_error",
        }
    }

    /// `{"error": message, "code": code}`, printed on stdout for callers
    /// that parse command output.
    pub fn envelope(&self) -> Value {
        json!({
            "error": self.to_string(),
            "code": self.code(),
        })
    }
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        Self::Internal {
            message: err.to_string(),
        }
    }
}
