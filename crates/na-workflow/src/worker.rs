use crate::dispatcher::WorkflowRequest;
use crate::engine::Engine;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

/// What became of one queued request. `execution_id` is the id handed back
/// when the request was queued; `engine_execution_id` is the engine's own
/// id, when it reports one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchOutcome {
    pub execution_id: String,
    pub flow: String,
    pub anomaly_id: Option<String>,
    pub engine_execution_id: Option<String>,
    pub error: Option<String>,
}

impl DispatchOutcome {
    pub fn succeeded(&self) -> bool {
        self.error.is_none()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub succeeded: u32,
    pub failed: u32,
    pub outcomes: Vec<DispatchOutcome>,
}

/// Drains the dispatch queue until it is closed or every sender is dropped.
/// Engine failures are logged and recorded; they never stop the loop.
pub async fn run_dispatch_worker(
    mut receiver: mpsc::UnboundedReceiver<WorkflowRequest>,
    engine: Engine,
) -> WorkerStats {
    let mut stats = WorkerStats::default();
    while let Some(request) = receiver.recv().await {
        let mut outcome = DispatchOutcome {
            execution_id: request.execution_id.clone(),
            flow: request.label().to_string(),
            anomaly_id: request.anomaly_id().map(str::to_string),
            engine_execution_id: None,
            error: None,
        };
        match engine.run(&request).await {
            Ok(remote_id) => {
                stats.succeeded += 1;
                tracing::info!(
                    execution_id = %request.execution_id,
                    remote_id = remote_id.as_deref().unwrap_or("-"),
                    flow = request.label(),
                    "workflow dispatched"
                );
                outcome.engine_execution_id = remote_id;
            }
            Err(err) => {
                stats.failed += 1;
                tracing::warn!(
                    execution_id = %request.execution_id,
                    flow = request.label(),
                    error = %err,
                    "workflow dispatch failed"
                );
                outcome.error = Some(err.to_string());
            }
        }
        stats.outcomes.push(outcome);
    }
    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LocalConfig;
    use crate::dispatcher::{QueueDispatcher, WorkflowDispatcher};
    use crate::engine::LocalEngine;
    use serde_json::Map;

    #[tokio::test]
    async fn worker_drains_until_queue_closes() {
        let (dispatcher, rx) = QueueDispatcher::channel();
        let handle = tokio::spawn(run_dispatch_worker(rx, Engine::Log));
        let first = dispatcher.start_fix_workflow("a-1").unwrap();
        dispatcher.execute_flow("refine_fix_flow", Map::new()).unwrap();
        dispatcher.close();

        let stats = handle.await.unwrap();
        assert_eq!((stats.succeeded, stats.failed), (2, 0));
        assert_eq!(stats.outcomes[0].execution_id, first);
        assert_eq!(stats.outcomes[0].anomaly_id.as_deref(), Some("a-1"));
        assert!(stats.outcomes[0].engine_execution_id.is_none());
        assert_eq!(stats.outcomes[1].flow, "refine_fix_flow");
        assert!(stats.outcomes[1].anomaly_id.is_none());
    }

    #[tokio::test]
    async fn local_engine_failures_are_recorded() {
        let mut config = LocalConfig {
            fix_command: Some("true".to_string()),
            ..LocalConfig::default()
        };
        config
            .flows
            .insert("broken_flow".to_string(), "/nonexistent/na-flow".to_string());
        let engine = Engine::Local(LocalEngine::new(config));

        let (dispatcher, rx) = QueueDispatcher::channel();
        let fix = dispatcher.start_fix_workflow("a-1").unwrap();
        dispatcher.execute_flow("broken_flow", Map::new()).unwrap();
        dispatcher.execute_flow("unmapped_flow", Map::new()).unwrap();
        drop(dispatcher);

        let stats = run_dispatch_worker(rx, engine).await;
        assert_eq!((stats.succeeded, stats.failed), (2, 1));

        let started = &stats.outcomes[0];
        assert!(started.succeeded());
        assert_eq!(
            started.engine_execution_id.as_deref(),
            Some(format!("local-{fix}").as_str())
        );
        let broken = &stats.outcomes[1];
        assert!(!broken.succeeded());
        assert!(broken.error.as_deref().unwrap().contains("spawn"));
        assert!(broken.engine_execution_id.is_none());
    }
}
