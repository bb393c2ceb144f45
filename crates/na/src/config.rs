use na_core::OrchestratorConfig;
use na_git::GitOptions;
use na_workflow::WorkflowConfig;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "NA_CONFIG";
const DEFAULT_CONFIG_PATH: &str = ".night-agent/config.toml";
const DEFAULT_DB_PATH: &str = ".night-agent/night-agent.db";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: String,
        source: toml::de::Error,
    },
    #[error("invalid value for {name}: {value}")]
    InvalidEnv { name: String, value: String },
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub orchestrator: OrchestratorConfig,
    pub git: GitSettings,
    pub workflow: WorkflowConfig,
    /// Credential reference to access token.
    pub credentials: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from(DEFAULT_DB_PATH),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub clone_timeout_secs: u64,
    pub network_timeout_secs: u64,
    pub local_timeout_secs: u64,
    pub author_name: String,
    pub author_email: String,
    pub ssh_command: Option<String>,
}

impl Default for GitSettings {
    fn default() -> Self {
        let options = GitOptions::default();
        Self {
            clone_timeout_secs: options.clone_timeout.as_secs(),
            network_timeout_secs: options.network_timeout.as_secs(),
            local_timeout_secs: options.local_timeout.as_secs(),
            author_name: options.author_name,
            author_email: options.author_email,
            ssh_command: options.ssh_command,
        }
    }
}

impl GitSettings {
    pub fn options(&self) -> GitOptions {
        GitOptions {
            clone_timeout: Duration::from_secs(self.clone_timeout_secs),
            network_timeout: Duration::from_secs(self.network_timeout_secs),
            local_timeout: Duration::from_secs(self.local_timeout_secs),
            author_name: self.author_name.clone(),
            author_email: self.author_email.clone(),
            ssh_command: self.ssh_command.clone(),
        }
    }
}

impl AppConfig {
    /// Loads `explicit`, else `$NA_CONFIG`, else the default path. A missing
    /// default file yields the built-in defaults; a missing explicit file is
    /// an error.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let (path, required) = match (explicit, from_env) {
            (Some(path), _) => (path.to_path_buf(), true),
            (None, Some(path)) => (path, true),
            (None, None) => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };

        let mut config = match std::fs::read_to_string(&path) {
            Ok(text) => Self::parse(&text, &path)?,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound && !required => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.display().to_string(),
                    source,
                });
            }
        };
        config.apply_overrides(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn parse(text: &str, path: &Path) -> Result<Self, ConfigError> {
        let mut config: Self = toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })?;
        config.orchestrator.credentials = config.credentials.clone();
        Ok(config)
    }

    pub fn apply_overrides(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(path) = lookup("NA_DB_PATH") {
            self.database.path = PathBuf::from(path);
        }
        if let Some(root) = lookup("NA_WORKSPACE_ROOT") {
            self.orchestrator.workspace_root = PathBuf::from(root);
        }
        if let Some(value) = lookup("NA_DISPATCH_THRESHOLD") {
            self.orchestrator.dispatch_threshold =
                value.trim().parse().map_err(|_| ConfigError::InvalidEnv {
                    name: "NA_DISPATCH_THRESHOLD".to_string(),
                    value,
                })?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use na_workflow::EngineKind;

    const SAMPLE: &str = r#"
[database]
path = "/var/lib/night-agent/state.db"

[orchestrator]
workspace_root = "/srv/workspaces"
dispatch_threshold = 60

[git]
network_timeout_secs = 15

[workflow]
engine = "kestra"

[workflow.kestra]
url = "http://kestra.internal:8080"

[credentials]
github-main = "ghp_secret"
"#;

    #[test]
    fn sections_fill_in_defaults() {
        let config = AppConfig::parse(SAMPLE, Path::new("config.toml")).unwrap();
        assert_eq!(
            config.database.path,
            PathBuf::from("/var/lib/night-agent/state.db")
        );
        assert_eq!(config.orchestrator.dispatch_threshold, 60);
        assert_eq!(config.orchestrator.default_target_branch, "main");
        assert_eq!(config.workflow.engine, EngineKind::Kestra);
        assert_eq!(config.workflow.kestra.namespace, "nightagent");

        let options = config.git.options();
        assert_eq!(options.network_timeout, Duration::from_secs(15));
        assert_eq!(options.clone_timeout, GitOptions::default().clone_timeout);

        assert_eq!(
            config.orchestrator.token_for(Some("github-main")),
            Some("ghp_secret")
        );
    }

    #[test]
    fn env_overrides_win() {
        let mut config = AppConfig::parse(SAMPLE, Path::new("config.toml")).unwrap();
        config
            .apply_overrides(|name| match name {
                "NA_DB_PATH" => Some("/tmp/na.db".to_string()),
                "NA_DISPATCH_THRESHOLD" => Some("75".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.database.path, PathBuf::from("/tmp/na.db"));
        assert_eq!(config.orchestrator.dispatch_threshold, 75);
        assert_eq!(
            config.orchestrator.workspace_root,
            PathBuf::from("/srv/workspaces")
        );

        let err = config
            .apply_overrides(|name| (name == "NA_DISPATCH_THRESHOLD").then(|| "high".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { .. }));
    }

    #[test]
    fn explicit_file_is_loaded() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.workflow.kestra.url, "http://kestra.internal:8080");

        let missing = dir.path().join("absent.toml");
        assert!(matches!(
            AppConfig::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn malformed_toml_names_the_file() {
        let err = AppConfig::parse("[orchestrator\n", Path::new("broken.toml")).unwrap_err();
        assert!(err.to_string().contains("broken.toml"));
    }
}
