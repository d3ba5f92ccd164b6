//! In-memory fakes for storage traits (testing only)
//!
//! Provides `MemoryModelRegistry` and `MemoryRunLedger` that satisfy the
//! trait contracts without any external dependencies.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;

use crate::error::StorageError;
use crate::storage_traits::*;

// ---------------------------------------------------------------------------
// MemoryModelRegistry
// ---------------------------------------------------------------------------

/// In-memory registry backed by a `HashMap<group, Vec<ModelPackageRecord>>`.
///
/// Records are stored in insertion order and sorted newest first on read.
/// `set_unavailable(true)` makes every listing fail with `Unavailable`.
#[derive(Debug, Default)]
pub struct MemoryModelRegistry {
    groups: Mutex<HashMap<String, Vec<ModelPackageRecord>>>,
    unavailable: AtomicBool,
    list_calls: AtomicUsize,
}

impl MemoryModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a registry pre-populated with records.
    pub fn with_records(records: impl IntoIterator<Item = ModelPackageRecord>) -> Self {
        let registry = Self::new();
        for record in records {
            registry.insert(record);
        }
        registry
    }

    /// Register an empty group.
    pub fn create_group(&self, group_name: &str) {
        let mut groups = self.groups.lock().unwrap();
        groups.entry(group_name.to_string()).or_default();
    }

    /// Add a record to its group, creating the group if needed.
    pub fn insert(&self, record: ModelPackageRecord) {
        let mut groups = self.groups.lock().unwrap();
        groups
            .entry(record.group_name.clone())
            .or_default()
            .push(record);
    }

    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of `list_model_packages` calls served so far.
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ModelRegistry for MemoryModelRegistry {
    async fn list_model_packages(
        &self,
        group_name: &str,
    ) -> StorageResult<Vec<ModelPackageRecord>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable {
                reason: "registry marked unavailable".to_string(),
            });
        }
        let groups = self.groups.lock().unwrap();
        let mut records = groups
            .get(group_name)
            .cloned()
            .ok_or_else(|| StorageError::GroupNotFound {
                group: group_name.to_string(),
            })?;
        sort_newest_first(&mut records);
        Ok(records)
    }
}

// ---------------------------------------------------------------------------
// MemoryRunLedger
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct RunState {
    record: RunRecord,
    events: Vec<RunEvent>,
}

impl RunState {
    fn ensure_running(&self) -> StorageResult<()> {
        if self.record.status != RunStatus::Running {
            return Err(StorageError::InvalidRunState {
                run_id: self.record.run_id.0.clone(),
                status: format!("{:?}", self.record.status),
                expected: "Running".to_string(),
            });
        }
        Ok(())
    }

    fn finish(&mut self, status: RunStatus, summary: RunSummary) -> StorageResult<()> {
        self.ensure_running()?;
        self.record.status = status;
        self.record.summary = Some(summary);
        self.record.completed_at = Some(Utc::now());
        Ok(())
    }
}

/// In-memory run ledger backed by a `HashMap<RunId, RunState>`.
#[derive(Debug, Default)]
pub struct MemoryRunLedger {
    runs: Mutex<HashMap<String, RunState>>,
}

impl MemoryRunLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn with_run<T>(
        &self,
        run_id: &RunId,
        f: impl FnOnce(&mut RunState) -> StorageResult<T>,
    ) -> StorageResult<T> {
        let mut runs = self.runs.lock().unwrap();
        let state = runs
            .get_mut(&run_id.0)
            .ok_or_else(|| StorageError::RunNotFound {
                run_id: run_id.0.clone(),
            })?;
        f(state)
    }
}

#[async_trait]
impl RunLedger for MemoryRunLedger {
    async fn create_run(
        &self,
        definition_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<RunId> {
        let run_id = RunId::new();
        let record = RunRecord {
            run_id: run_id.clone(),
            definition_digest: definition_digest.clone(),
            metadata,
            status: RunStatus::Running,
            summary: None,
            created_at: Utc::now(),
            completed_at: None,
        };
        let mut runs = self.runs.lock().unwrap();
        runs.insert(
            run_id.0.clone(),
            RunState {
                record,
                events: Vec::new(),
            },
        );
        Ok(run_id)
    }

    async fn append_event(&self, run_id: &RunId, event: RunEvent) -> StorageResult<()> {
        self.with_run(run_id, |state| {
            state.ensure_running()?;
            state.events.push(event);
            Ok(())
        })
    }

    async fn complete_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.with_run(run_id, |state| state.finish(RunStatus::Completed, summary))
    }

    async fn fail_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.with_run(run_id, |state| state.finish(RunStatus::Failed, summary))
    }

    async fn cancel_run(&self, run_id: &RunId, summary: RunSummary) -> StorageResult<()> {
        self.with_run(run_id, |state| state.finish(RunStatus::Cancelled, summary))
    }

    async fn get_run(&self, run_id: &RunId) -> StorageResult<RunRecord> {
        self.with_run(run_id, |state| Ok(state.record.clone()))
    }

    async fn get_events(&self, run_id: &RunId) -> StorageResult<Vec<RunEvent>> {
        self.with_run(run_id, |state| {
            let mut events = state.events.clone();
            events.sort_by_key(|e| e.seq);
            Ok(events)
        })
    }

    async fn list_runs(
        &self,
        definition_digest: Option<&ContentDigest>,
    ) -> StorageResult<Vec<RunRecord>> {
        let runs = self.runs.lock().unwrap();
        let mut records: Vec<RunRecord> = runs
            .values()
            .filter(|s| {
                definition_digest
                    .map(|d| s.record.definition_digest == *d)
                    .unwrap_or(true)
            })
            .map(|s| s.record.clone())
            .collect();
        records.sort_by_key(|r| r.created_at);
        Ok(records)
    }
}
