//! Pipeline orchestration and run recording.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use anyhow::Context;
use modelflow_core::{
    obs, ErrorKind, EventKind, PipelineDefinition, PipelineError, PipelineNode, ResolvedInput,
    RunRecorder,
};
use modelflow_state::{RunLedger, RunMetadata, RunStatus, RunSummary};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{info, Instrument};

use crate::digest::{definition_digest, topology_digest};
use crate::runner::{Collaborators, NodeResult, NodeRunner, NodeStatus};

/// Per-run inputs.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// Parameter values replacing their defaults for this run.
    pub overrides: BTreeMap<String, String>,

    /// Cancelling this token stops the run at the next node boundary and
    /// releases a node awaiting a callback immediately.
    pub cancel: CancellationToken,

    /// Extra tags recorded with the run.
    pub tags: BTreeMap<String, String>,
}

impl RunOptions {
    pub fn with_override(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(name.into(), value.into());
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

/// Result of a complete pipeline run.
#[derive(Debug, Clone)]
pub struct PipelineRunResult {
    /// Run ID in the ledger.
    pub run_id: String,

    /// Terminal status the run was finalized with.
    pub status: RunStatus,

    /// One entry per node, in definition order.
    pub nodes: Vec<NodeResult>,

    /// Total duration in milliseconds.
    pub duration_ms: u64,

    /// Digest of the executed definition.
    pub definition_digest: String,
}

impl PipelineRunResult {
    /// Whether every node succeeded.
    pub fn success(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// The node that stopped the run, if any.
    pub fn failed_node(&self) -> Option<&NodeResult> {
        stopped_at(&self.nodes)
    }

    /// Error kind of the node that stopped the run.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.failed_node()
            .and_then(|n| n.failure.as_ref())
            .map(|f| f.kind)
    }

    pub fn node(&self, name: &str) -> Option<&NodeResult> {
        self.nodes.iter().find(|n| n.node == name)
    }

    /// Outputs a succeeded node produced.
    pub fn outputs_of(&self, name: &str) -> Option<&BTreeMap<String, String>> {
        self.node(name).filter(|n| n.passed()).map(|n| &n.outputs)
    }
}

/// Pipeline orchestrator.
///
/// Runs nodes strictly in definition order. A node starts only after every
/// earlier node succeeded; once one fails or the run is cancelled, the rest
/// are recorded as skipped and never started.
pub struct PipelineRunner {
    ledger: Arc<dyn RunLedger>,
    runner: NodeRunner,
}

impl PipelineRunner {
    pub fn new(ledger: Arc<dyn RunLedger>, collaborators: Collaborators) -> Self {
        Self {
            ledger,
            runner: NodeRunner::new(collaborators),
        }
    }

    /// Execute `definition` once and record it into the ledger.
    ///
    /// Node failures do not make this return `Err`; they are reported in the
    /// result and the run is finalized as Failed or Cancelled. `Err` means the
    /// run could not be started or recorded, or an override was invalid.
    pub async fn run(
        &self,
        definition: &PipelineDefinition,
        options: RunOptions,
    ) -> anyhow::Result<PipelineRunResult> {
        let start = Instant::now();

        let parameters = definition.resolve_parameters(&options.overrides)?;
        let digest = definition_digest(definition)?;

        let parameter_values: serde_json::Map<String, Value> = definition
            .parameters
            .iter()
            .zip(&parameters)
            .map(|(p, v)| (p.name.clone(), Value::String(v.clone())))
            .collect();
        let metadata = RunMetadata {
            pipeline_name: definition.name.clone(),
            parameters: Value::Object(parameter_values),
            tags: json!({
                "topology": topology_digest(definition),
                "nodes": definition.nodes.iter().map(|n| &n.name).collect::<Vec<_>>(),
                "extra": &options.tags,
            }),
        };

        let recorder = RunRecorder::start(self.ledger.clone(), &digest, metadata)
            .await
            .context("failed to create run")?;
        let run_id = recorder.run_id().to_string();

        let span = obs::run_span(&run_id);
        let (status, nodes) = self
            .execute(definition, &parameters, recorder, &options.cancel, start)
            .instrument(span)
            .await?;

        Ok(PipelineRunResult {
            run_id,
            status,
            nodes,
            duration_ms: start.elapsed().as_millis() as u64,
            definition_digest: digest.to_string(),
        })
    }

    async fn execute(
        &self,
        definition: &PipelineDefinition,
        parameters: &[String],
        recorder: RunRecorder,
        cancel: &CancellationToken,
        start: Instant,
    ) -> anyhow::Result<(RunStatus, Vec<NodeResult>)> {
        let run_id = recorder.run_id().to_string();
        info!(run_id = %run_id, pipeline = %definition.name, "Starting pipeline run");

        let (status, results) = match self.drive(definition, parameters, &recorder, cancel).await {
            Ok(done) => done,
            Err(e) => {
                // The event log is incomplete; the run must still leave Running.
                let summary = RunSummary {
                    total_events: recorder.events_emitted(),
                    failed_node: None,
                    duration_ms: start.elapsed().as_millis() as u64,
                    success: false,
                };
                if let Err(finalize) = recorder.finish_err(summary).await {
                    obs::emit_run_finalize_error(&run_id, &finalize);
                }
                return Err(e).context("failed to record run events");
            }
        };

        let summary = RunSummary {
            total_events: recorder.events_emitted(),
            failed_node: stopped_at(&results).map(|r| r.node.clone()),
            duration_ms: start.elapsed().as_millis() as u64,
            success: status == RunStatus::Completed,
        };

        let finalized = match status {
            RunStatus::Completed => recorder.finish_ok(summary).await,
            RunStatus::Cancelled => recorder.finish_cancelled(summary).await,
            _ => recorder.finish_err(summary).await,
        };
        if let Err(e) = finalized {
            obs::emit_run_finalize_error(&run_id, &e);
            return Err(e).context("failed to finalize run");
        }

        match status {
            RunStatus::Completed => info!(run_id = %run_id, "Pipeline run completed successfully"),
            _ => info!(run_id = %run_id, status = ?status, "Pipeline run did not complete"),
        }
        Ok((status, results))
    }

    /// Run every node and record the run's events, ending with its terminal event.
    ///
    /// `Err` is always a ledger failure; node failures are part of the result.
    async fn drive(
        &self,
        definition: &PipelineDefinition,
        parameters: &[String],
        recorder: &RunRecorder,
        cancel: &CancellationToken,
    ) -> modelflow_core::Result<(RunStatus, Vec<NodeResult>)> {
        let run_id = recorder.run_id().to_string();
        recorder
            .emit(
                EventKind::RunStarted,
                json!({ "pipeline": &definition.name, "parameters": parameters }),
            )
            .await
            .map_err(PipelineError::ledger)?;

        // Outputs of each succeeded node, aligned with its declared outputs.
        let mut produced: Vec<Option<Vec<String>>> = vec![None; definition.nodes.len()];
        let mut results = Vec::with_capacity(definition.nodes.len());
        let mut status = RunStatus::Completed;

        for node in &definition.nodes {
            if status == RunStatus::Completed && cancel.is_cancelled() {
                info!(run_id = %run_id, node = %node.name, "Run cancelled before node");
                status = RunStatus::Cancelled;
            }
            if status != RunStatus::Completed {
                recorder
                    .emit(
                        EventKind::NodeSkipped {
                            node: node.name.clone(),
                        },
                        json!({}),
                    )
                    .await
                    .map_err(PipelineError::ledger)?;
                results.push(NodeResult::skipped(node));
                continue;
            }

            recorder
                .emit(
                    EventKind::NodeEntered {
                        node: node.name.clone(),
                    },
                    json!({ "kind": node.kind.name() }),
                )
                .await
                .map_err(PipelineError::ledger)?;
            obs::emit_node_entered(&run_id, &node.name, node.kind.name());

            let node_start = Instant::now();
            let outcome = match resolve_inputs(node, parameters, &produced) {
                Ok(inputs) => self.runner.execute(node, &inputs, recorder, cancel).await,
                Err(e) => Err(e),
            };
            let node_ms = node_start.elapsed().as_millis() as u64;

            match outcome {
                Ok(outcome) => {
                    recorder
                        .emit(
                            EventKind::NodeExited {
                                node: node.name.clone(),
                            },
                            json!({
                                "outputs": &outcome.outputs,
                                "details": &outcome.details,
                                "duration_ms": node_ms,
                            }),
                        )
                        .await
                        .map_err(PipelineError::ledger)?;
                    produced[node.id.0] = Some(
                        node.outputs
                            .iter()
                            .map(|decl| outcome.outputs[&decl.name].clone())
                            .collect(),
                    );
                    results.push(NodeResult::succeeded(node, outcome.outputs, node_ms));
                }
                Err(e @ PipelineError::Storage(_)) => return Err(e),
                Err(e) => {
                    let kind = e.kind();
                    obs::emit_node_failed(&run_id, &node.name, kind.as_str(), &e);
                    recorder
                        .emit(
                            EventKind::NodeFailed {
                                node: node.name.clone(),
                            },
                            json!({
                                "error_kind": kind,
                                "error": e.to_string(),
                                "duration_ms": node_ms,
                            }),
                        )
                        .await
                        .map_err(PipelineError::ledger)?;
                    status = if kind == ErrorKind::Cancelled {
                        RunStatus::Cancelled
                    } else {
                        RunStatus::Failed
                    };
                    results.push(NodeResult::failed(node, &e, node_ms));
                }
            }
        }

        let stopped = stopped_at(&results);
        let final_kind = match status {
            RunStatus::Completed => EventKind::RunCompleted,
            RunStatus::Cancelled => EventKind::RunCancelled,
            _ => EventKind::RunFailed,
        };
        recorder
            .emit(
                final_kind,
                json!({
                    "failed_node": stopped.map(|r| &r.node),
                    "error_kind": stopped.and_then(|r| r.failure.as_ref()).map(|f| f.kind),
                }),
            )
            .await
            .map_err(PipelineError::ledger)?;

        Ok((status, results))
    }
}

/// The node that failed or was cancelled, if any.
fn stopped_at(results: &[NodeResult]) -> Option<&NodeResult> {
    results
        .iter()
        .find(|r| matches!(r.status, NodeStatus::Failed | NodeStatus::Cancelled))
}

/// Values for every input of `node`, taken from constants, this run's
/// parameter values, and upstream outputs.
fn resolve_inputs(
    node: &PipelineNode,
    parameters: &[String],
    produced: &[Option<Vec<String>>],
) -> modelflow_core::Result<BTreeMap<String, String>> {
    node.inputs
        .iter()
        .map(|(name, input)| {
            let value = match input {
                ResolvedInput::Constant { value } => Some(value.clone()),
                ResolvedInput::Parameter { index } => parameters.get(*index).cloned(),
                ResolvedInput::Output { source } => produced
                    .get(source.node.0)
                    .and_then(|outputs| outputs.as_ref())
                    .and_then(|outputs| outputs.get(source.index))
                    .cloned(),
            };
            value.map(|v| (name.clone(), v)).ok_or_else(|| {
                PipelineError::InvalidTopology(format!(
                    "node {} input {} has no value",
                    node.name, name
                ))
            })
        })
        .collect()
}
