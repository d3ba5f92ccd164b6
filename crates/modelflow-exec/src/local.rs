//! In-process collaborators for dry runs and tests.
//!
//! Nothing here talks to a remote service. Every collaborator keeps a log of
//! the requests it received so callers can inspect what a run would have done.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use modelflow_core::{
    CallbackBroker, CallbackInvoker, CallbackRequest, FetchLatestModelHandler, RegistrySelector,
    Result,
};
use modelflow_state::ModelRegistry;
use tracing::{debug, warn};

use crate::collaborators::{
    BatchTransformer, CreateModelRequest, ModelHost, TransformJob, TransformRequest,
};
use crate::runner::Collaborators;

/// Runs [`FetchLatestModelHandler`] on a tokio task and signals the broker.
pub struct LocalCallbackInvoker {
    broker: Arc<CallbackBroker>,
    handler: FetchLatestModelHandler,
    invocations: Mutex<Vec<CallbackRequest>>,
}

impl LocalCallbackInvoker {
    pub fn new(broker: Arc<CallbackBroker>, handler: FetchLatestModelHandler) -> Self {
        Self {
            broker,
            handler,
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Requests received so far, oldest first.
    pub fn invocations(&self) -> Vec<CallbackRequest> {
        self.invocations.lock().unwrap().clone()
    }
}

#[async_trait]
impl CallbackInvoker for LocalCallbackInvoker {
    async fn invoke(&self, request: CallbackRequest) -> Result<()> {
        self.invocations.lock().unwrap().push(request.clone());

        let broker = self.broker.clone();
        let handler = self.handler.clone();
        tokio::spawn(async move {
            let signalled = match handler.handle(&request.payload).await {
                Ok(outputs) => broker.send_success(&request.token, outputs),
                Err(e) => broker.send_error(&request.token, &e),
            };
            if let Err(e) = signalled {
                warn!(node = %request.node, error = %e, "callback signal rejected");
            }
        });
        Ok(())
    }
}

/// Model host that only derives a name.
pub struct DryRunModelHost {
    prefix: String,
    requests: Mutex<Vec<CreateModelRequest>>,
}

impl DryRunModelHost {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<CreateModelRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelHost for DryRunModelHost {
    async fn create_model(&self, request: CreateModelRequest) -> anyhow::Result<String> {
        let name = format!("{}-{}", self.prefix, Utc::now().format("%Y%m%d%H%M%S%3f"));
        debug!(model = %name, image = %request.image_uri, "dry-run model created");
        self.requests.lock().unwrap().push(request);
        Ok(name)
    }
}

/// Transformer that records the request and reports where output would land.
#[derive(Default)]
pub struct DryRunTransformer {
    requests: Mutex<Vec<TransformRequest>>,
}

impl DryRunTransformer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<TransformRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl BatchTransformer for DryRunTransformer {
    async fn run_transform(&self, request: TransformRequest) -> anyhow::Result<TransformJob> {
        let output_location = request.output_location.clone().unwrap_or_else(|| {
            format!("{}/output", request.input_data_location.trim_end_matches('/'))
        });
        let job = TransformJob {
            job_name: format!("{}-{}", request.model_name, uuid::Uuid::new_v4().simple()),
            output_location,
        };
        debug!(job = %job.job_name, output = %job.output_location, "dry-run transform finished");
        self.requests.lock().unwrap().push(request);
        Ok(job)
    }
}

/// Collaborators that select from `registry` and perform nothing remote.
pub fn dry_run_collaborators(
    registry: Arc<dyn ModelRegistry>,
    model_name_prefix: &str,
) -> Collaborators {
    let broker = Arc::new(CallbackBroker::new());
    let handler = FetchLatestModelHandler::new(RegistrySelector::new(registry));
    Collaborators {
        invoker: Arc::new(LocalCallbackInvoker::new(broker.clone(), handler)),
        broker,
        model_host: Arc::new(DryRunModelHost::new(model_name_prefix)),
        transformer: Arc::new(DryRunTransformer::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use modelflow_core::{CallbackToken, ErrorKind, PipelineError};
    use modelflow_state::fakes::MemoryModelRegistry;
    use modelflow_state::{ApprovalStatus, ModelPackageRecord};
    use serde_json::json;
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn registry() -> Arc<MemoryModelRegistry> {
        Arc::new(MemoryModelRegistry::with_records(vec![ModelPackageRecord {
            arn: "arn:pkg/churn/1".to_string(),
            group_name: "churn".to_string(),
            creation_time: Utc.timestamp_opt(100, 0).unwrap(),
            approval_status: ApprovalStatus::Approved,
            image_uri: "registry/xgboost:1".to_string(),
            model_data_url: "s3://models/churn/1/model.tar.gz".to_string(),
        }]))
    }

    fn invoker(
        broker: Arc<CallbackBroker>,
        registry: Arc<MemoryModelRegistry>,
    ) -> LocalCallbackInvoker {
        LocalCallbackInvoker::new(
            broker,
            FetchLatestModelHandler::new(RegistrySelector::new(registry)),
        )
    }

    #[tokio::test]
    async fn local_invoker_signals_selected_outputs() {
        let broker = Arc::new(CallbackBroker::new());
        let invoker = invoker(broker.clone(), registry());
        let (token, pending) = broker.register();

        invoker
            .invoke(CallbackRequest {
                token: token.clone(),
                node: "FetchLatestModel".to_string(),
                payload: json!({ "group_name": "churn" }),
            })
            .await
            .unwrap();

        let outputs = pending
            .wait("FetchLatestModel", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(outputs["ImageUri"], "registry/xgboost:1");
        assert_eq!(outputs["ModelUrl"], "s3://models/churn/1/model.tar.gz");
        assert_eq!(invoker.invocations().len(), 1);
    }

    #[tokio::test]
    async fn local_invoker_forwards_handler_error_kind() {
        let broker = Arc::new(CallbackBroker::new());
        let invoker = invoker(broker.clone(), registry());
        let (token, pending) = broker.register();

        invoker
            .invoke(CallbackRequest {
                token,
                node: "FetchLatestModel".to_string(),
                payload: json!({ "group_name": "fraud" }),
            })
            .await
            .unwrap();

        let err = pending
            .wait("FetchLatestModel", Duration::from_secs(5), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
        assert!(matches!(err, PipelineError::CallbackFailed { .. }));
    }

    #[tokio::test]
    async fn local_invoker_tolerates_forgotten_token() {
        let broker = Arc::new(CallbackBroker::new());
        let invoker = invoker(broker.clone(), registry());

        invoker
            .invoke(CallbackRequest {
                token: CallbackToken::from("never-registered".to_string()),
                node: "FetchLatestModel".to_string(),
                payload: json!({ "group_name": "churn" }),
            })
            .await
            .unwrap();
        tokio::task::yield_now().await;
        assert_eq!(broker.pending_count(), 0);
    }

    #[tokio::test]
    async fn dry_run_model_host_uses_prefix() {
        let host = DryRunModelHost::new("latest-approved");
        let name = host
            .create_model(CreateModelRequest {
                run_id: "r".to_string(),
                image_uri: "img".to_string(),
                model_data_url: "s3://m".to_string(),
                instance_type: Some("ml.m5.large".to_string()),
            })
            .await
            .unwrap();
        assert!(name.starts_with("latest-approved-"));
        assert_eq!(host.requests().len(), 1);
    }

    #[tokio::test]
    async fn dry_run_transformer_derives_output_location() {
        let transformer = DryRunTransformer::new();
        let job = transformer
            .run_transform(TransformRequest {
                run_id: "r".to_string(),
                model_name: "m".to_string(),
                input_data_location: "s3://bucket/in/".to_string(),
                output_location: None,
                instance_type: None,
            })
            .await
            .unwrap();
        assert_eq!(job.output_location, "s3://bucket/in/output");
        assert!(job.job_name.starts_with("m-"));

        let job = transformer
            .run_transform(TransformRequest {
                run_id: "r".to_string(),
                model_name: "m".to_string(),
                input_data_location: "s3://bucket/in".to_string(),
                output_location: Some("s3://bucket/out".to_string()),
                instance_type: None,
            })
            .await
            .unwrap();
        assert_eq!(job.output_location, "s3://bucket/out");
        assert_eq!(transformer.requests().len(), 2);
    }
}
