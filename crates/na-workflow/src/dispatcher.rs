use crate::error::DispatchError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc;
use ulid::Ulid;

/// Fire-and-forget trigger for remediation workflows. Both calls return as
/// soon as the request is queued; completion is reported back later through
/// the judge, analysis and proposal callbacks.
pub trait WorkflowDispatcher: Send + Sync {
    fn start_fix_workflow(&self, anomaly_id: &str) -> Result<String, DispatchError>;

    fn execute_flow(&self, flow_id: &str, inputs: Map<String, Value>)
    -> Result<String, DispatchError>;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRequest {
    pub execution_id: String,
    pub requested_at: DateTime<Utc>,
    pub kind: WorkflowKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkflowKind {
    FixAnomaly {
        anomaly_id: String,
    },
    Flow {
        flow_id: String,
        inputs: Map<String, Value>,
    },
}

impl WorkflowRequest {
    pub fn new(kind: WorkflowKind) -> Self {
        Self {
            execution_id: format!("exec_{}", Ulid::new()),
            requested_at: Utc::now(),
            kind,
        }
    }

    pub fn label(&self) -> &str {
        match &self.kind {
            WorkflowKind::FixAnomaly { .. } => "fix_anomaly",
            WorkflowKind::Flow { flow_id, .. } => flow_id,
        }
    }

    /// The anomaly a request works on: the fix target, or a flow's
    /// `anomalyId` input.
    pub fn anomaly_id(&self) -> Option<&str> {
        match &self.kind {
            WorkflowKind::FixAnomaly { anomaly_id } => Some(anomaly_id.as_str()),
            WorkflowKind::Flow { inputs, .. } => inputs.get("anomalyId").and_then(Value::as_str),
        }
    }
}

/// Publishes requests onto an unbounded channel drained by
/// [`crate::run_dispatch_worker`].
#[derive(Debug)]
pub struct QueueDispatcher {
    sender: Mutex<Option<mpsc::UnboundedSender<WorkflowRequest>>>,
}

impl QueueDispatcher {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<WorkflowRequest>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        let dispatcher = Self {
            sender: Mutex::new(Some(sender)),
        };
        (dispatcher, receiver)
    }

    /// Stops accepting requests. The worker finishes what is already queued
    /// and then returns.
    pub fn close(&self) {
        self.sender
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn enqueue(&self, kind: WorkflowKind) -> Result<String, DispatchError> {
        let request = WorkflowRequest::new(kind);
        let execution_id = request.execution_id.clone();
        tracing::debug!(execution_id = %execution_id, flow = request.label(), "queueing workflow");
        let sender = self.sender.lock().unwrap_or_else(PoisonError::into_inner);
        sender
            .as_ref()
            .ok_or(DispatchError::ChannelClosed)?
            .send(request)
            .map_err(|_| DispatchError::ChannelClosed)?;
        Ok(execution_id)
    }
}

impl WorkflowDispatcher for QueueDispatcher {
    fn start_fix_workflow(&self, anomaly_id: &str) -> Result<String, DispatchError> {
        self.enqueue(WorkflowKind::FixAnomaly {
            anomaly_id: anomaly_id.to_string(),
        })
    }

    fn execute_flow(
        &self,
        flow_id: &str,
        inputs: Map<String, Value>,
    ) -> Result<String, DispatchError> {
        self.enqueue(WorkflowKind::Flow {
            flow_id: flow_id.to_string(),
            inputs,
        })
    }
}
