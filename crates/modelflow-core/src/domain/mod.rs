//! Domain models for modelflow.
//!
//! Canonical definitions for the core entities:
//! - `PipelineError` / `ErrorKind`: the failure taxonomy
//! - `NodeSpec` / `PipelineNode`: pipeline steps before and after resolution
//! - `Event`: entries of a recorded run

pub mod error;
pub mod node;
pub mod run;

pub use error::{ErrorKind, PipelineError, Result};
pub use node::{
    Edge, InputBinding, NodeId, NodeKind, NodeSpec, OutputDecl, OutputRef, OutputType,
    PipelineNode, PipelineParameter, ResolvedInput,
};
pub use run::{Event, EventKind};
