//! `ModelRegistry` backed by a JSON export of model-package records.
//!
//! The file holds a JSON array of [`ModelPackageRecord`]s across any number
//! of groups. It is re-read on every listing so an operator can edit the
//! export between runs.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use crate::error::StorageError;
use crate::storage_traits::{sort_newest_first, ModelPackageRecord, ModelRegistry, StorageResult};

/// Registry that reads a JSON array of records from disk.
#[derive(Debug, Clone)]
pub struct JsonFileModelRegistry {
    path: PathBuf,
}

impl JsonFileModelRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load(&self) -> StorageResult<Vec<ModelPackageRecord>> {
        let bytes = tokio::fs::read(&self.path)
            .await
            .map_err(|e| StorageError::Unavailable {
                reason: format!("cannot read {}: {}", self.path.display(), e),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| StorageError::Unavailable {
            reason: format!("malformed registry export {}: {}", self.path.display(), e),
        })
    }
}

#[async_trait]
impl ModelRegistry for JsonFileModelRegistry {
    async fn list_model_packages(
        &self,
        group_name: &str,
    ) -> StorageResult<Vec<ModelPackageRecord>> {
        let all = self.load().await?;
        let total = all.len();
        let mut records: Vec<ModelPackageRecord> = all
            .into_iter()
            .filter(|r| r.group_name == group_name)
            .collect();
        if records.is_empty() {
            return Err(StorageError::GroupNotFound {
                group: group_name.to_string(),
            });
        }
        sort_newest_first(&mut records);
        debug!(
            path = %self.path.display(),
            group = group_name,
            matched = records.len(),
            total,
            "listed model packages"
        );
        Ok(records)
    }
}
