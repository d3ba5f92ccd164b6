//! Single-node execution.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use modelflow_core::definition::{
    IMAGE_URI_INPUT, INPUT_DATA_LOCATION_INPUT, INSTANCE_TYPE_INPUT, MODEL_DATA_URL_INPUT,
    MODEL_NAME_INPUT, OUTPUT_LOCATION_INPUT,
};
use modelflow_core::{
    obs, CallbackBroker, CallbackInvoker, CallbackRequest, CallbackToken, ErrorKind, EventKind,
    NodeKind, PendingCallback, PipelineError, PipelineNode, Result, RunRecorder,
    DEFAULT_CALLBACK_TIMEOUT_SECS, MODEL_NAME_OUTPUT,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::collaborators::{BatchTransformer, CreateModelRequest, ModelHost, TransformRequest};

/// Everything a node may call out to.
#[derive(Clone)]
pub struct Collaborators {
    pub broker: Arc<CallbackBroker>,
    pub invoker: Arc<dyn CallbackInvoker>,
    pub model_host: Arc<dyn ModelHost>,
    pub transformer: Arc<dyn BatchTransformer>,
}

/// Terminal state of a node within one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    Succeeded,
    Failed,
    Cancelled,
    /// Never started because an earlier node did not succeed.
    Skipped,
}

/// Why a node did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeFailure {
    pub kind: ErrorKind,
    pub message: String,
}

impl From<&PipelineError> for NodeFailure {
    fn from(err: &PipelineError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

/// Result of one node in a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeResult {
    /// Node name.
    pub node: String,

    pub kind: NodeKind,

    pub status: NodeStatus,

    /// Declared outputs, present only when the node succeeded.
    pub outputs: BTreeMap<String, String>,

    pub failure: Option<NodeFailure>,

    /// Duration in milliseconds.
    pub duration_ms: u64,
}

impl NodeResult {
    pub fn succeeded(
        node: &PipelineNode,
        outputs: BTreeMap<String, String>,
        duration_ms: u64,
    ) -> Self {
        Self {
            node: node.name.clone(),
            kind: node.kind,
            status: NodeStatus::Succeeded,
            outputs,
            failure: None,
            duration_ms,
        }
    }

    pub fn failed(node: &PipelineNode, err: &PipelineError, duration_ms: u64) -> Self {
        let status = if err.kind() == ErrorKind::Cancelled {
            NodeStatus::Cancelled
        } else {
            NodeStatus::Failed
        };
        Self {
            node: node.name.clone(),
            kind: node.kind,
            status,
            outputs: BTreeMap::new(),
            failure: Some(NodeFailure::from(err)),
            duration_ms,
        }
    }

    pub fn skipped(node: &PipelineNode) -> Self {
        Self {
            node: node.name.clone(),
            kind: node.kind,
            status: NodeStatus::Skipped,
            outputs: BTreeMap::new(),
            failure: None,
            duration_ms: 0,
        }
    }

    /// Whether this node produced its outputs.
    pub fn passed(&self) -> bool {
        self.status == NodeStatus::Succeeded
    }
}

/// What a successful node hands back to the pipeline.
#[derive(Debug, Clone, PartialEq)]
pub struct NodeOutcome {
    /// Declared outputs, validated against their types.
    pub outputs: BTreeMap<String, String>,

    /// Collaborator details worth recording, e.g. a transform job name.
    pub details: Value,
}

/// Executes one node against its collaborators.
#[derive(Clone)]
pub struct NodeRunner {
    collaborators: Collaborators,
}

impl NodeRunner {
    pub fn new(collaborators: Collaborators) -> Self {
        Self { collaborators }
    }

    /// Execute `node` with its resolved `inputs`.
    ///
    /// Callback nodes record `callback_issued` and `callback_signalled`
    /// through `recorder`; the pipeline records entry and exit.
    pub async fn execute(
        &self,
        node: &PipelineNode,
        inputs: &BTreeMap<String, String>,
        recorder: &RunRecorder,
        cancel: &CancellationToken,
    ) -> Result<NodeOutcome> {
        let run_id = recorder.run_id().to_string();
        let (produced, details) = match node.kind {
            NodeKind::ExternalCallback => {
                let outputs = self.run_callback(node, inputs, recorder, cancel).await?;
                (outputs, Value::Null)
            }
            NodeKind::CreateModel => {
                let request = CreateModelRequest {
                    run_id,
                    image_uri: required(node, inputs, IMAGE_URI_INPUT)?,
                    model_data_url: required(node, inputs, MODEL_DATA_URL_INPUT)?,
                    instance_type: inputs.get(INSTANCE_TYPE_INPUT).cloned(),
                };
                let model_name = self
                    .collaborators
                    .model_host
                    .create_model(request)
                    .await
                    .map_err(|e| collaborator_error(node, e))?;
                let mut outputs = BTreeMap::new();
                outputs.insert(MODEL_NAME_OUTPUT.to_string(), model_name);
                (outputs, Value::Null)
            }
            NodeKind::Transform => {
                let request = TransformRequest {
                    run_id,
                    model_name: required(node, inputs, MODEL_NAME_INPUT)?,
                    input_data_location: required(node, inputs, INPUT_DATA_LOCATION_INPUT)?,
                    output_location: inputs.get(OUTPUT_LOCATION_INPUT).cloned(),
                    instance_type: inputs.get(INSTANCE_TYPE_INPUT).cloned(),
                };
                let job = self
                    .collaborators
                    .transformer
                    .run_transform(request)
                    .await
                    .map_err(|e| collaborator_error(node, e))?;
                (BTreeMap::new(), serde_json::to_value(&job)?)
            }
        };

        Ok(NodeOutcome {
            outputs: declared_outputs(node, produced)?,
            details,
        })
    }

    async fn run_callback(
        &self,
        node: &PipelineNode,
        inputs: &BTreeMap<String, String>,
        recorder: &RunRecorder,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        let timeout_secs = node
            .callback_timeout_secs
            .unwrap_or(DEFAULT_CALLBACK_TIMEOUT_SECS);
        let broker = &self.collaborators.broker;
        let (token, pending) = broker.register();

        let result = self
            .issue_and_wait(node, inputs, &token, pending, timeout_secs, recorder, cancel)
            .await;
        // Late signals for this token must be rejected from here on.
        broker.forget(&token);
        result
    }

    #[allow(clippy::too_many_arguments)]
    async fn issue_and_wait(
        &self,
        node: &PipelineNode,
        inputs: &BTreeMap<String, String>,
        token: &CallbackToken,
        pending: PendingCallback,
        timeout_secs: u64,
        recorder: &RunRecorder,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        recorder
            .emit(
                EventKind::CallbackIssued {
                    node: node.name.clone(),
                },
                json!({ "token": token.as_str(), "timeout_secs": timeout_secs }),
            )
            .await
            .map_err(PipelineError::ledger)?;
        obs::emit_callback_issued(&node.name, token.as_str(), timeout_secs);

        let request = CallbackRequest {
            token: token.clone(),
            node: node.name.clone(),
            payload: serde_json::to_value(inputs)?,
        };
        self.collaborators
            .invoker
            .invoke(request)
            .await
            .map_err(|e| PipelineError::CallbackFailed {
                node: node.name.clone(),
                reason: format!("invocation failed: {}", e),
                cause: Some(e.kind()),
            })?;

        let result = pending
            .wait(&node.name, Duration::from_secs(timeout_secs), cancel)
            .await;
        obs::emit_callback_signalled(&node.name, token.as_str(), result.is_ok());

        // Timeouts and cancellation mean no signal arrived.
        let signalled = match &result {
            Ok(_) => Some(json!({ "success": true })),
            Err(e @ PipelineError::CallbackFailed { .. }) => {
                Some(json!({ "success": false, "error_kind": e.kind() }))
            }
            Err(_) => None,
        };
        if let Some(payload) = signalled {
            recorder
                .emit(
                    EventKind::CallbackSignalled {
                        node: node.name.clone(),
                    },
                    payload,
                )
                .await
                .map_err(PipelineError::ledger)?;
        }
        result
    }
}

fn required(node: &PipelineNode, inputs: &BTreeMap<String, String>, name: &str) -> Result<String> {
    inputs.get(name).cloned().ok_or_else(|| {
        PipelineError::InvalidTopology(format!("node {} has no input {}", node.name, name))
    })
}

fn collaborator_error(node: &PipelineNode, err: anyhow::Error) -> PipelineError {
    PipelineError::Collaborator {
        node: node.name.clone(),
        reason: format!("{:#}", err),
    }
}

/// Keep exactly the declared outputs, each present and well-typed.
///
/// Anything the collaborator produced beyond the declaration is dropped.
fn declared_outputs(
    node: &PipelineNode,
    mut produced: BTreeMap<String, String>,
) -> Result<BTreeMap<String, String>> {
    let mut outputs = BTreeMap::new();
    for decl in &node.outputs {
        let problem = match produced.remove(&decl.name) {
            Some(value) if decl.output_type.accepts(&value) => {
                outputs.insert(decl.name.clone(), value);
                continue;
            }
            Some(value) => format!(
                "output {} = {:?} is not a valid {:?}",
                decl.name, value, decl.output_type
            ),
            None => format!("declared output {} was not produced", decl.name),
        };
        return Err(match node.kind {
            NodeKind::ExternalCallback => PipelineError::CallbackFailed {
                node: node.name.clone(),
                reason: problem,
                cause: None,
            },
            _ => PipelineError::Collaborator {
                node: node.name.clone(),
                reason: problem,
            },
        });
    }
    if !produced.is_empty() {
        debug!(
            node = %node.name,
            extra = ?produced.keys().collect::<Vec<_>>(),
            "ignoring undeclared outputs"
        );
    }
    Ok(outputs)
}
