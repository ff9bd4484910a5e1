use serde::Serialize;

use crate::types::{RunId, RunStatus};

/// Lifecycle notifications emitted while runs are created and driven.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RunEvent {
    RunCreated { run_id: RunId, graph_id: String },
    RunStarted { run_id: RunId },
    NodeEntered { run_id: RunId, step: usize, node_id: String },
    RunCompleted { run_id: RunId, steps: usize },
    RunFailed { run_id: RunId, error: String },
}

impl RunEvent {
    pub fn run_id(&self) -> &RunId {
        match self {
            RunEvent::RunCreated { run_id, .. }
            | RunEvent::RunStarted { run_id }
            | RunEvent::NodeEntered { run_id, .. }
            | RunEvent::RunCompleted { run_id, .. }
            | RunEvent::RunFailed { run_id, .. } => run_id,
        }
    }

    /// Terminal status carried by this event, if any.
    pub fn terminal_status(&self) -> Option<RunStatus> {
        match self {
            RunEvent::RunCompleted { .. } => Some(RunStatus::Completed),
            RunEvent::RunFailed { .. } => Some(RunStatus::Failed),
            _ => None,
        }
    }
}

/// Event bus using tokio broadcast channel.
/// All subscribers receive all events.
pub struct EventBus {
    tx: tokio::sync::broadcast::Sender<RunEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = tokio::sync::broadcast::channel(capacity);
        Self { tx }
    }

    pub fn publish(&self, event: RunEvent) {
        // Ignore error if no receivers
        let _ = self.tx.send(event);
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<RunEvent> {
        self.tx.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
