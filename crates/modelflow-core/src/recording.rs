//! Run lifecycle adapter: bridges domain `Event` types to `RunLedger` persistence.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use modelflow_state::{
    ContentDigest, RunEvent, RunId, RunLedger, RunMetadata, RunSummary, StorageResult,
};
use serde_json::Value;

use crate::domain::run::{Event, EventKind};

/// Adapter that records pipeline [`Event`]s into a [`RunLedger`].
///
/// Usage:
/// 1. Call [`RunRecorder::start`] to create a new run.
/// 2. Call [`RunRecorder::emit`] (or [`RunRecorder::record`]) for each event.
/// 3. Call one of the `finish_*` methods to finalize.
///
/// Sequence numbers are assigned by the recorder and start at 1.
pub struct RunRecorder {
    ledger: Arc<dyn RunLedger>,
    run_id: RunId,
    seq: AtomicU64,
}

impl RunRecorder {
    /// Start a new run in the ledger, returning a recorder bound to that run.
    pub async fn start(
        ledger: Arc<dyn RunLedger>,
        definition_digest: &ContentDigest,
        metadata: RunMetadata,
    ) -> StorageResult<Self> {
        let run_id = ledger
            .create_run(definition_digest, metadata.clone())
            .await?;
        crate::obs::emit_run_started(run_id.to_string().as_str(), &metadata.pipeline_name);
        Ok(Self {
            ledger,
            run_id,
            seq: AtomicU64::new(0),
        })
    }

    /// Build and record the next event.
    pub async fn emit(&self, kind: EventKind, payload: Value) -> StorageResult<()> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        self.record(&Event::new(seq, kind, payload)).await
    }

    /// Record a single domain event into the ledger.
    pub async fn record(&self, event: &Event) -> StorageResult<()> {
        let kind_str = event.kind.tag();
        let mut payload = event.payload.clone();
        if let (Some(node), Value::Object(map)) = (event.kind.node(), &mut payload) {
            map.entry("node")
                .or_insert_with(|| Value::String(node.to_string()));
        }
        let run_event = RunEvent {
            seq: event.seq,
            kind: kind_str.to_string(),
            payload,
            timestamp: event.timestamp,
        };
        crate::obs::emit_event_appended(&self.run_id.to_string(), kind_str, event.seq);
        self.ledger.append_event(&self.run_id, run_event).await
    }

    /// Number of events emitted through [`RunRecorder::emit`].
    pub fn events_emitted(&self) -> u64 {
        self.seq.load(Ordering::SeqCst)
    }

    /// Finalize the run as completed.
    pub async fn finish_ok(self, summary: RunSummary) -> StorageResult<()> {
        self.announce(&summary);
        self.ledger.complete_run(&self.run_id, summary).await
    }

    /// Finalize the run as failed.
    pub async fn finish_err(self, summary: RunSummary) -> StorageResult<()> {
        self.announce(&summary);
        self.ledger.fail_run(&self.run_id, summary).await
    }

    /// Finalize the run as cancelled.
    pub async fn finish_cancelled(self, summary: RunSummary) -> StorageResult<()> {
        self.announce(&summary);
        self.ledger.cancel_run(&self.run_id, summary).await
    }

    fn announce(&self, summary: &RunSummary) {
        crate::obs::emit_run_finished(
            &self.run_id.to_string(),
            summary.duration_ms,
            summary.total_events,
            summary.success,
        );
    }

    /// Return a reference to the run ID.
    pub fn run_id(&self) -> &RunId {
        &self.run_id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use modelflow_state::fakes::MemoryRunLedger;
    use modelflow_state::RunStatus;
    use serde_json::json;

    fn metadata() -> RunMetadata {
        RunMetadata {
            pipeline_name: "p".to_string(),
            parameters: json!({}),
            tags: json!({}),
        }
    }

    #[tokio::test]
    async fn emit_assigns_sequence_and_node_payload() {
        let ledger = Arc::new(MemoryRunLedger::new());
        let recorder = RunRecorder::start(
            ledger.clone(),
            &ContentDigest::from_bytes(b"def"),
            metadata(),
        )
        .await
        .unwrap();

        recorder.emit(EventKind::RunStarted, json!({})).await.unwrap();
        recorder
            .emit(
                EventKind::NodeEntered {
                    node: "CreateModel".to_string(),
                },
                json!({ "kind": "create_model" }),
            )
            .await
            .unwrap();
        assert_eq!(recorder.events_emitted(), 2);

        let run_id = recorder.run_id().clone();
        recorder
            .finish_ok(RunSummary {
                total_events: 2,
                failed_node: None,
                duration_ms: 1,
                success: true,
            })
            .await
            .unwrap();

        let events = ledger.get_events(&run_id).await.unwrap();
        assert_eq!(events[0].seq, 1);
        assert_eq!(events[0].kind, "run_started");
        assert_eq!(events[1].kind, "node_entered");
        assert_eq!(events[1].payload["node"], "CreateModel");
        assert_eq!(events[1].payload["kind"], "create_model");

        let record = ledger.get_run(&run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Completed);
    }

    #[tokio::test]
    async fn finish_cancelled_marks_run() {
        let ledger = Arc::new(MemoryRunLedger::new());
        let recorder = RunRecorder::start(
            ledger.clone(),
            &ContentDigest::from_bytes(b"def"),
            metadata(),
        )
        .await
        .unwrap();
        let run_id = recorder.run_id().clone();
        recorder
            .finish_cancelled(RunSummary {
                total_events: 0,
                failed_node: Some("FetchLatestModel".to_string()),
                duration_ms: 1,
                success: false,
            })
            .await
            .unwrap();

        let record = ledger.get_run(&run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Cancelled);
    }
}
