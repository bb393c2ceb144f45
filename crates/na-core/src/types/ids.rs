use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct AnomalyId(String);

/// Fixes are 1:1 with anomalies and share the anomaly's id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct FixId(String);

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct RepoId(String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdError {
    InvalidUuid { value: String },
    InvalidFormat { value: String },
}

impl fmt::Display for IdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidUuid { value } => write!(f, "invalid uuid: {value}"),
            Self::InvalidFormat { value } => write!(f, "invalid id format: {value}"),
        }
    }
}

impl std::error::Error for IdError {}

fn validate_uuid(value: &str) -> Result<(), IdError> {
    Uuid::parse_str(value).map_err(|_| IdError::InvalidUuid {
        value: value.to_string(),
    })?;
    Ok(())
}

/// Repository ids come from the onboarding side and are only required to be
/// usable as a path-free token.
fn validate_opaque(value: &str) -> Result<(), IdError> {
    let valid = !value.is_empty()
        && value.len() <= 128
        && value
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(IdError::InvalidFormat {
            value: value.to_string(),
        })
    }
}

macro_rules! id_type {
    ($name:ident, $validate:path) => {
        impl $name {
            pub fn new(value: String) -> Result<Self, IdError> {
                $validate(&value)?;
                Ok(Self(value))
            }

            pub fn generate() -> Self {
                Self(Uuid::new_v4().to_string())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = IdError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s.to_string())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
            where
                D: serde::Deserializer<'de>,
            {
                let value = String::deserialize(deserializer)?;
                Self::new(value).map_err(serde::de::Error::custom)
            }
        }
    };
}

id_type!(AnomalyId, validate_uuid);
id_type!(FixId, validate_uuid);
id_type!(RepoId, validate_opaque);

impl FixId {
    pub fn for_anomaly(anomaly_id: &AnomalyId) -> Self {
        Self(anomaly_id.0.clone())
    }

    pub fn anomaly_id(&self) -> AnomalyId {
        AnomalyId(self.0.clone())
    }
}

impl RepoId {
    /// Sidecars identify themselves as `sidecar-{repoId}`.
    pub fn from_sidecar(sidecar_id: &str) -> Result<Self, IdError> {
        let value = sidecar_id.strip_prefix("sidecar-").unwrap_or(sidecar_id);
        Self::new(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anomaly_ids_must_be_uuids() {
        let id = AnomalyId::generate();
        assert_eq!(AnomalyId::from_str(id.as_str()).unwrap(), id);
        assert!(matches!(
            AnomalyId::from_str("not-a-uuid"),
            Err(IdError::InvalidUuid { .. })
        ));
    }

    #[test]
    fn fix_id_mirrors_anomaly_id() {
        let anomaly_id = AnomalyId::generate();
        let fix_id = FixId::for_anomaly(&anomaly_id);
        assert_eq!(fix_id.as_str(), anomaly_id.as_str());
        assert_eq!(fix_id.anomaly_id(), anomaly_id);
    }

    #[test]
    fn repo_id_from_sidecar_strips_prefix() {
        let id = RepoId::from_sidecar("sidecar-acme-api").unwrap();
        assert_eq!(id.as_str(), "acme-api");
        let id = RepoId::from_sidecar("plain").unwrap();
        assert_eq!(id.as_str(), "plain");
        assert!(RepoId::from_sidecar("sidecar-../etc").is_err());
    }

    #[test]
    fn deserialize_validates() {
        let ok: Result<RepoId, _> = serde_json::from_str("\"repo-1\"");
        assert!(ok.is_ok());
        let bad: Result<AnomalyId, _> = serde_json::from_str("\"nope\"");
        assert!(bad.is_err());
    }
}
