use crate::config::{EngineKind, KestraConfig, LocalConfig, WorkflowConfig};
use crate::dispatcher::{WorkflowKind, WorkflowRequest};
use crate::error::DispatchError;
use reqwest::multipart::Form;
use serde::Serialize;
use serde_json::{Map, Value};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::{Child, Command};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Running,
    Completed,
    Failed,
    /// Detached local flows are not tracked after they start.
    Unknown,
}

/// Consumer side of the dispatch queue.
pub enum Engine {
    Log,
    Kestra(KestraEngine),
    Local(LocalEngine),
}

impl Engine {
    pub fn from_config(config: &WorkflowConfig) -> Result<Self, DispatchError> {
        Ok(match config.engine {
            EngineKind::Log => Self::Log,
            EngineKind::Kestra => Self::Kestra(KestraEngine::new(config.kestra.clone())?),
            EngineKind::Local => Self::Local(LocalEngine::new(config.local.clone())),
        })
    }

    /// Hands the request to the engine. Returns the engine's own execution
    /// id when it reports one.
    pub async fn run(&self, request: &WorkflowRequest) -> Result<Option<String>, DispatchError> {
        match self {
            Self::Log => {
                tracing::info!(
                    execution_id = %request.execution_id,
                    flow = request.label(),
                    "workflow requested (log engine)"
                );
                Ok(None)
            }
            Self::Kestra(engine) => engine.run(request).await.map(Some),
            Self::Local(engine) => engine.run(request).await,
        }
    }

    pub async fn status(&self, execution_id: &str) -> Result<WorkflowStatus, DispatchError> {
        match self {
            Self::Kestra(engine) => engine.status(execution_id).await,
            Self::Log => Ok(WorkflowStatus::Completed),
            Self::Local(_) => Ok(WorkflowStatus::Unknown),
        }
    }
}

pub struct KestraEngine {
    config: KestraConfig,
    client: reqwest::Client,
}

impl KestraEngine {
    pub fn new(config: KestraConfig) -> Result<Self, DispatchError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, client })
    }

    pub fn execution_url(&self, flow_id: &str) -> String {
        format!(
            "{}/api/v1/executions/{}/{}",
            self.config.url.trim_end_matches('/'),
            self.config.namespace,
            flow_id
        )
    }

    async fn run(&self, request: &WorkflowRequest) -> Result<String, DispatchError> {
        let (flow_id, inputs) = match &request.kind {
            WorkflowKind::FixAnomaly { anomaly_id } => {
                let mut inputs = Map::new();
                inputs.insert("anomalyId".to_string(), Value::String(anomaly_id.clone()));
                (self.config.flow_id.as_str(), inputs)
            }
            WorkflowKind::Flow { flow_id, inputs } => (flow_id.as_str(), inputs.clone()),
        };
        let url = self.execution_url(flow_id);
        tracing::info!(url = %url, execution_id = %request.execution_id, "triggering kestra flow");

        let mut form = Form::new();
        for (key, value) in form_inputs(&inputs) {
            form = form.text(key, value);
        }
        let response = self.client.post(&url).multipart(form).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(DispatchError::Engine {
                message: format!("kestra returned {status}: {body}"),
            });
        }
        let body: Value = response.json().await?;
        body.get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| DispatchError::Engine {
                message: "kestra response missing execution id".to_string(),
            })
    }

    async fn status(&self, execution_id: &str) -> Result<WorkflowStatus, DispatchError> {
        let url = format!(
            "{}/api/v1/executions/{}",
            self.config.url.trim_end_matches('/'),
            execution_id
        );
        let body: Value = self
            .client
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;
        let state = body
            .pointer("/state/current")
            .and_then(Value::as_str)
            .unwrap_or_default();
        Ok(map_kestra_state(state))
    }
}

pub fn map_kestra_state(state: &str) -> WorkflowStatus {
    match state {
        "SUCCESS" => WorkflowStatus::Completed,
        "FAILED" | "KILLED" => WorkflowStatus::Failed,
        _ => WorkflowStatus::Running,
    }
}

/// Kestra takes flow inputs as form fields; non-string values are sent as
/// their JSON text.
pub fn form_inputs(inputs: &Map<String, Value>) -> Vec<(String, String)> {
    inputs
        .iter()
        .map(|(key, value)| {
            let text = match value {
                Value::String(text) => text.clone(),
                other => other.to_string(),
            };
            (key.clone(), text)
        })
        .collect()
}

pub struct LocalEngine {
    config: LocalConfig,
}

impl LocalEngine {
    pub fn new(config: LocalConfig) -> Self {
        Self { config }
    }

    fn command_for(&self, request: &WorkflowRequest) -> Option<&str> {
        match &request.kind {
            WorkflowKind::FixAnomaly { .. } => self.config.fix_command.as_deref(),
            WorkflowKind::Flow { flow_id, .. } => self.config.flows.get(flow_id).map(String::as_str),
        }
    }

    async fn run(&self, request: &WorkflowRequest) -> Result<Option<String>, DispatchError> {
        let Some(command_line) = self.command_for(request) else {
            tracing::warn!(flow = request.label(), "flow not mapped to a local command, skipping");
            return Ok(None);
        };
        let argv = shell_words::split(command_line).map_err(|err| {
            DispatchError::InvalidCommand {
                reason: err.to_string(),
            }
        })?;
        let (program, args) = argv.split_first().ok_or_else(|| DispatchError::InvalidCommand {
            reason: "command empty".to_string(),
        })?;

        let (anomaly_id, inputs) = match &request.kind {
            WorkflowKind::FixAnomaly { anomaly_id } => {
                let mut inputs = Map::new();
                inputs.insert("anomalyId".to_string(), Value::String(anomaly_id.clone()));
                (Some(anomaly_id.as_str()), inputs)
            }
            WorkflowKind::Flow { inputs, .. } => (None, inputs.clone()),
        };

        let mut command = Command::new(program);
        command
            .args(args)
            .arg(Value::Object(inputs).to_string())
            .env("NA_EXECUTION_ID", &request.execution_id)
            .env("NA_FLOW_ID", request.label())
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::inherit());
        if let Some(anomaly_id) = anomaly_id {
            command.env("NA_ANOMALY_ID", anomaly_id);
        }

        tracing::info!(program = %program, flow = request.label(), "spawning local flow");
        let child = command.spawn().map_err(|err| DispatchError::Spawn {
            reason: err.to_string(),
        })?;
        let local_id = format!("local-{}", request.execution_id);
        tokio::spawn(watch_local_flow(
            child,
            local_id.clone(),
            Duration::from_secs(self.config.timeout_secs),
        ));
        Ok(Some(local_id))
    }
}

/// Logs how a detached flow ended. Only runs while the host runtime is
/// alive; a flow outlives the command that started it.
async fn watch_local_flow(mut child: Child, local_id: String, limit: Duration) {
    match tokio::time::timeout(limit, child.wait()).await {
        Ok(Ok(status)) if status.success() => {
            tracing::info!(execution_id = %local_id, "local flow finished");
        }
        Ok(Ok(status)) => {
            tracing::warn!(execution_id = %local_id, status = %status, "local flow failed");
        }
        Ok(Err(err)) => {
            tracing::warn!(execution_id = %local_id, error = %err, "lost track of local flow");
        }
        Err(_) => {
            tracing::warn!(
                execution_id = %local_id,
                secs = limit.as_secs(),
                "local flow timed out; killing it"
            );
            let _ = child.kill().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn kestra_url_joins_namespace_and_flow() {
        let engine = KestraEngine::new(KestraConfig {
            url: "http://kestra:8080/".to_string(),
            ..KestraConfig::default()
        })
        .unwrap();
        assert_eq!(
            engine.execution_url("fix_anomaly"),
            "http://kestra:8080/api/v1/executions/nightagent/fix_anomaly"
        );
    }

    #[test]
    fn kestra_states_map_to_status() {
        assert_eq!(map_kestra_state("SUCCESS"), WorkflowStatus::Completed);
        assert_eq!(map_kestra_state("KILLED"), WorkflowStatus::Failed);
        assert_eq!(map_kestra_state("RUNNING"), WorkflowStatus::Running);
        assert_eq!(map_kestra_state(""), WorkflowStatus::Running);
    }

    #[tokio::test]
    async fn slow_local_flow_does_not_hold_up_dispatch() {
        let engine = LocalEngine::new(LocalConfig {
            fix_command: Some("sh -c 'sleep 5' flow".to_string()),
            ..LocalConfig::default()
        });
        let request = WorkflowRequest::new(WorkflowKind::FixAnomaly {
            anomaly_id: "a-1".to_string(),
        });

        let started = std::time::Instant::now();
        let local_id = engine.run(&request).await.unwrap();
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(local_id, Some(format!("local-{}", request.execution_id)));
    }

    #[tokio::test]
    async fn missing_program_fails_to_spawn() {
        let engine = LocalEngine::new(LocalConfig {
            fix_command: Some("/nonexistent/na-flow --fast".to_string()),
            ..LocalConfig::default()
        });
        let request = WorkflowRequest::new(WorkflowKind::FixAnomaly {
            anomaly_id: "a-1".to_string(),
        });
        assert!(matches!(
            engine.run(&request).await,
            Err(DispatchError::Spawn { .. })
        ));
    }

    #[test]
    fn form_inputs_stringify_non_strings() {
        let mut inputs = Map::new();
        inputs.insert("fixId".to_string(), json!("f-1"));
        inputs.insert("attempt".to_string(), json!(2));
        let fields = form_inputs(&inputs);
        assert!(fields.contains(&("fixId".to_string(), "f-1".to_string())));
        assert!(fields.contains(&("attempt".to_string(), "2".to_string())));
    }
}
