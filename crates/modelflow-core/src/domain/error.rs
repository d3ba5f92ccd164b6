//! Domain-level error taxonomy for modelflow.

use modelflow_state::StorageError;
use serde::{Deserialize, Serialize};

/// Stable, serializable classification of a [`PipelineError`].
///
/// Recorded in run events so a failed run can be reported without the
/// original error value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotFound,
    RegistryUnavailable,
    CallbackTimeout,
    CallbackFailed,
    InvalidTopology,
    InvalidParameter,
    Cancelled,
    Collaborator,
    Config,
    Storage,
    Serialization,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::NotFound => "not_found",
            ErrorKind::RegistryUnavailable => "registry_unavailable",
            ErrorKind::CallbackTimeout => "callback_timeout",
            ErrorKind::CallbackFailed => "callback_failed",
            ErrorKind::InvalidTopology => "invalid_topology",
            ErrorKind::InvalidParameter => "invalid_parameter",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Collaborator => "collaborator",
            ErrorKind::Config => "config",
            ErrorKind::Storage => "storage",
            ErrorKind::Serialization => "serialization",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// modelflow domain errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("no approved model package in group {group}")]
    NotFound { group: String },

    #[error("registry unavailable: {0}")]
    RegistryUnavailable(String),

    #[error("callback for node {node} not signalled within {timeout_secs}s")]
    CallbackTimeout { node: String, timeout_secs: u64 },

    #[error("callback for node {node} failed: {reason}")]
    CallbackFailed {
        node: String,
        reason: String,
        /// Kind reported by the handler, if it reported one.
        cause: Option<ErrorKind>,
    },

    #[error("invalid topology: {0}")]
    InvalidTopology(String),

    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    #[error("node {node} cancelled")]
    Cancelled { node: String },

    #[error("node {node} collaborator error: {reason}")]
    Collaborator { node: String, reason: String },

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::NotFound { .. } => ErrorKind::NotFound,
            PipelineError::RegistryUnavailable(_) => ErrorKind::RegistryUnavailable,
            PipelineError::CallbackTimeout { .. } => ErrorKind::CallbackTimeout,
            PipelineError::CallbackFailed { cause, .. } => {
                cause.unwrap_or(ErrorKind::CallbackFailed)
            }
            PipelineError::InvalidTopology(_) => ErrorKind::InvalidTopology,
            PipelineError::InvalidParameter(_) => ErrorKind::InvalidParameter,
            PipelineError::Cancelled { .. } => ErrorKind::Cancelled,
            PipelineError::Collaborator { .. } => ErrorKind::Collaborator,
            PipelineError::Config(_) => ErrorKind::Config,
            PipelineError::Storage(_) => ErrorKind::Storage,
            PipelineError::Serialization(_) => ErrorKind::Serialization,
        }
    }

    /// Wrap a run-ledger failure.
    ///
    /// Every ledger error is `Storage`, including `Unavailable`; the
    /// `From<StorageError>` conversion is for registry reads only.
    pub fn ledger(err: StorageError) -> Self {
        PipelineError::Storage(err.to_string())
    }
}

impl From<StorageError> for PipelineError {
    fn from(err: StorageError) -> Self {
        match err {
            StorageError::GroupNotFound { group } => PipelineError::NotFound { group },
            StorageError::Unavailable { reason } => PipelineError::RegistryUnavailable(reason),
            other => PipelineError::Storage(other.to_string()),
        }
    }
}

/// Result type for modelflow domain operations.
pub type Result<T> = std::result::Result<T, PipelineError>;
