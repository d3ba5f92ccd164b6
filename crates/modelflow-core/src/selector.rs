//! Latest-approved model selection over a [`ModelRegistry`].

use std::collections::BTreeMap;
use std::sync::Arc;

use modelflow_state::{ModelPackageRecord, ModelRegistry};
use tracing::debug;

use crate::definition::{GROUP_NAME_INPUT, IMAGE_URI_OUTPUT, MODEL_URL_OUTPUT};
use crate::domain::error::{PipelineError, Result};

/// Pick the approved record with the latest `creation_time`.
///
/// Ties on `creation_time` go to the lexicographically greatest `arn`, so the
/// answer never depends on the order the registry returned records in.
pub fn pick_latest_approved(records: &[ModelPackageRecord]) -> Option<&ModelPackageRecord> {
    records
        .iter()
        .filter(|r| r.approval_status.is_approved())
        .max_by(|a, b| {
            a.creation_time
                .cmp(&b.creation_time)
                .then_with(|| a.arn.cmp(&b.arn))
        })
}

/// Callback outputs the fetch node declares, taken from a selected record.
pub fn callback_outputs(record: &ModelPackageRecord) -> BTreeMap<String, String> {
    let mut outputs = BTreeMap::new();
    outputs.insert(MODEL_URL_OUTPUT.to_string(), record.model_data_url.clone());
    outputs.insert(IMAGE_URI_OUTPUT.to_string(), record.image_uri.clone());
    outputs
}

/// Read-only selector over a registry backend.
#[derive(Clone)]
pub struct RegistrySelector {
    registry: Arc<dyn ModelRegistry>,
}

impl RegistrySelector {
    pub fn new(registry: Arc<dyn ModelRegistry>) -> Self {
        Self { registry }
    }

    /// Return the most recently created approved package of `group_name`.
    ///
    /// Fails with `NotFound` when the group has no approved package or the
    /// registry does not know the group, and with `RegistryUnavailable` when
    /// the listing call fails. Nothing is retried.
    pub async fn select_latest_approved(&self, group_name: &str) -> Result<ModelPackageRecord> {
        let records = self
            .registry
            .list_model_packages(group_name)
            .await
            .map_err(PipelineError::from)?;
        debug!(group = group_name, listed = records.len(), "registry listing");

        let selected = pick_latest_approved(&records)
            .cloned()
            .ok_or_else(|| PipelineError::NotFound {
                group: group_name.to_string(),
            })?;
        crate::obs::emit_model_selected(group_name, &selected.arn);
        Ok(selected)
    }
}

/// Callback-side handler for the fetch node.
///
/// Reads `group_name` from the invocation payload and answers with the
/// `ModelUrl` / `ImageUri` outputs of the latest approved package.
#[derive(Clone)]
pub struct FetchLatestModelHandler {
    selector: RegistrySelector,
}

impl FetchLatestModelHandler {
    pub fn new(selector: RegistrySelector) -> Self {
        Self { selector }
    }

    pub async fn handle(&self, payload: &serde_json::Value) -> Result<BTreeMap<String, String>> {
        let group = payload[GROUP_NAME_INPUT].as_str().ok_or_else(|| {
            PipelineError::InvalidParameter(format!(
                "callback payload is missing string field {}",
                GROUP_NAME_INPUT
            ))
        })?;
        let record = self.selector.select_latest_approved(group).await?;
        Ok(callback_outputs(&record))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use modelflow_state::fakes::MemoryModelRegistry;
    use modelflow_state::ApprovalStatus;

    fn record(arn: &str, secs: i64, status: ApprovalStatus) -> ModelPackageRecord {
        ModelPackageRecord {
            arn: arn.to_string(),
            group_name: "churn".to_string(),
            creation_time: Utc.timestamp_opt(secs, 0).unwrap(),
            approval_status: status,
            image_uri: format!("image-{}", arn),
            model_data_url: format!("s3://models/{}/model.tar.gz", arn),
        }
    }

    fn selector(records: Vec<ModelPackageRecord>) -> RegistrySelector {
        RegistrySelector::new(Arc::new(MemoryModelRegistry::with_records(records)))
    }

    #[test]
    fn pick_ignores_non_approved() {
        let records = vec![
            record("A", 10, ApprovalStatus::Approved),
            record("B", 20, ApprovalStatus::Rejected),
            record("C", 15, ApprovalStatus::Approved),
            record("D", 30, ApprovalStatus::PendingManualApproval),
        ];
        assert_eq!(pick_latest_approved(&records).unwrap().arn, "C");
    }

    #[test]
    fn pick_breaks_ties_by_arn() {
        let records = vec![
            record("pkg/1", 50, ApprovalStatus::Approved),
            record("pkg/3", 50, ApprovalStatus::Approved),
            record("pkg/2", 50, ApprovalStatus::Approved),
        ];
        assert_eq!(pick_latest_approved(&records).unwrap().arn, "pkg/3");

        let mut reversed = records.clone();
        reversed.reverse();
        assert_eq!(pick_latest_approved(&reversed).unwrap().arn, "pkg/3");
    }

    #[test]
    fn pick_empty_is_none() {
        assert!(pick_latest_approved(&[]).is_none());
    }

    #[tokio::test]
    async fn select_returns_latest_approved() {
        let selector = selector(vec![
            record("A", 10, ApprovalStatus::Approved),
            record("B", 20, ApprovalStatus::Rejected),
            record("C", 15, ApprovalStatus::Approved),
        ]);
        let selected = selector.select_latest_approved("churn").await.unwrap();
        assert_eq!(selected.arn, "C");
    }

    #[tokio::test]
    async fn select_without_approved_is_not_found() {
        let selector = selector(vec![
            record("A", 10, ApprovalStatus::Rejected),
            record("B", 20, ApprovalStatus::PendingManualApproval),
        ]);
        let err = selector.select_latest_approved("churn").await.unwrap_err();
        assert!(matches!(err, PipelineError::NotFound { .. }));
    }

    #[tokio::test]
    async fn handler_answers_with_callback_outputs() {
        let handler = FetchLatestModelHandler::new(selector(vec![record(
            "A",
            10,
            ApprovalStatus::Approved,
        )]));
        let outputs = handler
            .handle(&serde_json::json!({ "group_name": "churn" }))
            .await
            .unwrap();
        assert_eq!(outputs[MODEL_URL_OUTPUT], "s3://models/A/model.tar.gz");
        assert_eq!(outputs[IMAGE_URI_OUTPUT], "image-A");
    }

    #[tokio::test]
    async fn handler_rejects_payload_without_group() {
        let handler = FetchLatestModelHandler::new(selector(vec![]));
        let err = handler.handle(&serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, PipelineError::InvalidParameter(_)));
    }
}
