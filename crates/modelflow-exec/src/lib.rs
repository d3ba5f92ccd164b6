//! modelflow-exec - pipeline execution for modelflow
//!
//! Provides a pipeline orchestrator that:
//! - Executes nodes in definition order against pluggable collaborators
//! - Awaits external callbacks with a timeout and cancellation
//! - Records every run and node transition into a `RunLedger`
//! - Recomputes run verdicts from recorded events

pub mod collaborators;
pub mod digest;
pub mod local;
pub mod pipeline;
pub mod runner;
pub mod verdict;

// Re-export key types
pub use collaborators::{
    BatchTransformer, CreateModelRequest, ModelHost, TransformJob, TransformRequest,
};
pub use digest::{definition_digest, topology_digest};
pub use local::{dry_run_collaborators, DryRunModelHost, DryRunTransformer, LocalCallbackInvoker};
pub use pipeline::{PipelineRunResult, PipelineRunner, RunOptions};
pub use runner::{Collaborators, NodeFailure, NodeOutcome, NodeResult, NodeRunner, NodeStatus};
pub use verdict::RunVerdict;
