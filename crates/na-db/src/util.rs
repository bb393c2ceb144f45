use chrono::{DateTime, Utc};
use na_core::OrchestratorError;
use na_core::error::{AnomalyError, FixError, RepoError};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt::Display;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DbError {
    #[error("json encode failed: {message}")]
    JsonEncode { message: String },
    #[error("json decode failed: {message}")]
    JsonDecode { message: String },
    #[error("invalid enum value: {value}")]
    InvalidEnum { value: String },
    #[error("invalid timestamp: {value}")]
    InvalidTimestamp { value: String },
    #[error("invalid id: {message}")]
    InvalidId { message: String },
}

pub fn to_rfc3339(value: &DateTime<Utc>) -> String {
    value.to_rfc3339()
}

pub fn from_rfc3339(value: &str) -> Result<DateTime<Utc>, DbError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|_| DbError::InvalidTimestamp {
            value: value.to_string(),
        })
}

pub fn encode_json<T: Serialize>(value: &T) -> Result<String, DbError> {
    serde_json::to_string(value).map_err(|err| DbError::JsonEncode {
        message: err.to_string(),
    })
}

pub fn decode_json<T: DeserializeOwned>(value: &str) -> Result<T, DbError> {
    serde_json::from_str(value).map_err(|err| DbError::JsonDecode {
        message: err.to_string(),
    })
}

pub fn encode_enum<T: Serialize>(value: &T) -> Result<String, DbError> {
    let json = serde_json::to_value(value).map_err(|err| DbError::JsonEncode {
        message: err.to_string(),
    })?;
    match json {
        Value::String(value) => Ok(value),
        other => Err(DbError::InvalidEnum {
            value: other.to_string(),
        }),
    }
}

pub fn decode_enum<T: DeserializeOwned>(value: &str) -> Result<T, DbError> {
    let json = Value::String(value.to_string());
    serde_json::from_value(json).map_err(|_| DbError::InvalidEnum {
        value: value.to_string(),
    })
}

pub(crate) fn anomaly_storage(err: impl Display) -> AnomalyError {
    AnomalyError::Storage {
        message: err.to_string(),
    }
}

pub(crate) fn fix_storage(err: impl Display) -> FixError {
    FixError::Storage {
        message: err.to_string(),
    }
}

pub(crate) fn repo_storage(err: impl Display) -> RepoError {
    RepoError::Storage {
        message: err.to_string(),
    }
}

pub(crate) fn internal(err: impl Display) -> OrchestratorError {
    OrchestratorError::Internal {
        message: err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use na_core::types::{AnomalyStatus, FixStatus};

    #[test]
    fn enums_use_wire_names() {
        assert_eq!(encode_enum(&AnomalyStatus::SandboxReady).unwrap(), "SANDBOX_READY");
        assert_eq!(
            decode_enum::<FixStatus>("applied_sandbox").unwrap(),
            FixStatus::AppliedSandbox
        );
        assert!(matches!(
            decode_enum::<FixStatus>("APPLIED"),
            Err(DbError::InvalidEnum { .. })
        ));
    }

    #[test]
    fn timestamps_round_trip_to_utc() {
        let parsed = from_rfc3339("2026-03-01T10:00:00+02:00").unwrap();
        assert_eq!(to_rfc3339(&parsed), "2026-03-01T08:00:00+00:00");
        assert!(from_rfc3339("yesterday").is_err());
    }
}
