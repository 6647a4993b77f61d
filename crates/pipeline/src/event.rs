//! Lifecycle events emitted by execution engines.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Progress notification for observers of a run.
///
/// Engines send these on an optional `flume` channel; a disconnected
/// receiver is ignored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    NodeStarted { node: String },
    NodeCompleted { node: String },
    NodeFailed { node: String, error: String },
    /// Not run because required inputs were never produced.
    NodeBlocked { node: String, missing: Vec<String> },
    RunFinished {
        run_id: Uuid,
        completed: usize,
        failed: usize,
        blocked: usize,
    },
}

impl PipelineEvent {
    pub fn node(&self) -> Option<&str> {
        match self {
            PipelineEvent::NodeStarted { node }
            | PipelineEvent::NodeCompleted { node }
            | PipelineEvent::NodeFailed { node, .. }
            | PipelineEvent::NodeBlocked { node, .. } => Some(node),
            PipelineEvent::RunFinished { .. } => None,
        }
    }
}
