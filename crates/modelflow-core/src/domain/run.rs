//! Run event tracking.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Classification of an event in a pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    /// Run execution started.
    RunStarted,

    /// Every node completed.
    RunCompleted,

    /// A node failed and the run stopped.
    RunFailed,

    /// The run was cancelled.
    RunCancelled,

    /// A node started executing.
    NodeEntered { node: String },

    /// A node finished and produced its declared outputs.
    NodeExited { node: String },

    /// A node failed.
    NodeFailed { node: String },

    /// A node never started because an upstream node did not complete.
    NodeSkipped { node: String },

    /// The external callback was invoked and is awaiting a signal.
    CallbackIssued { node: String },

    /// The external callback signalled success or failure.
    CallbackSignalled { node: String },
}

impl EventKind {
    /// Snake-case tag, identical to the serde `type` field.
    pub fn tag(&self) -> &'static str {
        match self {
            EventKind::RunStarted => "run_started",
            EventKind::RunCompleted => "run_completed",
            EventKind::RunFailed => "run_failed",
            EventKind::RunCancelled => "run_cancelled",
            EventKind::NodeEntered { .. } => "node_entered",
            EventKind::NodeExited { .. } => "node_exited",
            EventKind::NodeFailed { .. } => "node_failed",
            EventKind::NodeSkipped { .. } => "node_skipped",
            EventKind::CallbackIssued { .. } => "callback_issued",
            EventKind::CallbackSignalled { .. } => "callback_signalled",
        }
    }

    /// Node name for node-scoped events.
    pub fn node(&self) -> Option<&str> {
        match self {
            EventKind::NodeEntered { node }
            | EventKind::NodeExited { node }
            | EventKind::NodeFailed { node }
            | EventKind::NodeSkipped { node }
            | EventKind::CallbackIssued { node }
            | EventKind::CallbackSignalled { node } => Some(node),
            _ => None,
        }
    }
}

/// A single event in a run's execution trace.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Event {
    /// Monotonically increasing sequence number within the run.
    pub seq: u64,

    /// When the event occurred.
    pub timestamp: DateTime<Utc>,

    /// Event classification.
    pub kind: EventKind,

    /// Event-specific payload.
    pub payload: serde_json::Value,
}

impl Event {
    /// Create a new event.
    pub fn new(seq: u64, kind: EventKind, payload: serde_json::Value) -> Self {
        Self {
            seq,
            timestamp: Utc::now(),
            kind,
            payload,
        }
    }
}
