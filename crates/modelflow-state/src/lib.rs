//! modelflow-state: registry and run persistence for modelflow
//!
//! This crate owns every I/O seam the pipeline core reads from or writes to.
//!
//! ## Layer 0 - Data/Persistence
//!
//! Focus: read-only model registry access and append-only run recording.
//!
//! ## Key Components
//!
//! - `ModelRegistry`: lists the model packages of a group, newest first
//! - `RunLedger`: records pipeline runs and their node events
//! - `JsonFileModelRegistry`: registry backed by a JSON export on disk
//! - `fakes`: in-memory implementations for tests and dry runs

mod error;
pub mod fakes;
pub mod file_registry;
pub mod storage_traits;

pub use error::StorageError;
pub use file_registry::JsonFileModelRegistry;
pub use storage_traits::{
    sort_newest_first, ApprovalStatus, ContentDigest, ModelPackageRecord, ModelRegistry,
    RunEvent, RunId, RunLedger, RunMetadata, RunRecord, RunStatus, RunSummary, StorageResult,
};
