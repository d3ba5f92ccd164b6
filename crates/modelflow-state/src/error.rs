//! Error types for modelflow-state

use thiserror::Error;

/// Errors raised by registry and run-ledger backends.
#[derive(Error, Debug)]
pub enum StorageError {
    /// The registry has no model-package group with this name
    #[error("model package group not found: {group}")]
    GroupNotFound { group: String },

    /// The registry listing could not be completed
    #[error("registry unavailable: {reason}")]
    Unavailable { reason: String },

    /// Run ID not present in the ledger
    #[error("run not found: {run_id}")]
    RunNotFound { run_id: String },

    /// Run is not in the state required for the operation
    #[error("run {run_id} is {status}, expected {expected}")]
    InvalidRunState {
        run_id: String,
        status: String,
        expected: String,
    },
}
