//! Run verdicts recomputed from recorded events.

use std::collections::HashSet;

use modelflow_core::ErrorKind;
use modelflow_state::RunEvent;
use serde::{Deserialize, Serialize};

/// Outcome of a run as reconstructed from its event log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunVerdict {
    /// Whether the run passed.
    pub passed: bool,

    /// First node that failed or was cancelled.
    pub failed_node: Option<String>,

    pub error_kind: Option<ErrorKind>,

    pub cancelled: bool,

    /// Violations that caused failure (empty if passed).
    pub violations: Vec<String>,

    /// Summary message.
    pub message: String,
}

impl RunVerdict {
    /// Evaluate a run's events, ordered by `seq`.
    ///
    /// Rules:
    /// - Every `node_entered` must be followed by `node_exited` or `node_failed`.
    /// - Any `node_failed` is a violation; the first one names the failed node.
    /// - No node may be entered after a node failed.
    /// - The log must hold exactly one terminal run event; an empty log fails.
    pub fn evaluate(events: &[RunEvent]) -> RunVerdict {
        let mut violations = Vec::new();
        let mut entered: Vec<String> = Vec::new();
        let mut finished = HashSet::new();
        let mut failed_node: Option<String> = None;
        let mut error_kind = None;
        let mut cancelled = false;
        let mut terminal_events = 0usize;

        for event in events {
            let node = event.payload["node"].as_str().unwrap_or("unknown").to_string();
            match event.kind.as_str() {
                "node_entered" => {
                    if let Some(failed) = &failed_node {
                        violations.push(format!(
                            "Node '{}' started after '{}' failed",
                            node, failed
                        ));
                    }
                    entered.push(node);
                }
                "node_exited" => {
                    finished.insert(node);
                }
                "node_failed" => {
                    let kind: Option<ErrorKind> =
                        serde_json::from_value(event.payload["error_kind"].clone()).ok();
                    let error = event.payload["error"].as_str().unwrap_or("Unknown error");
                    violations.push(format!("Node '{}' failed: {}", node, error));
                    if failed_node.is_none() {
                        failed_node = Some(node.clone());
                        error_kind = kind;
                    }
                    finished.insert(node);
                }
                "run_cancelled" => {
                    cancelled = true;
                    terminal_events += 1;
                }
                "run_completed" | "run_failed" => terminal_events += 1,
                _ => {}
            }
        }

        for node in &entered {
            if !finished.contains(node) {
                violations.push(format!("Node '{}' was entered but never finished", node));
            }
        }

        if terminal_events != 1 {
            violations.push(format!(
                "Run has {} terminal events, expected 1",
                terminal_events
            ));
        }
        if cancelled && failed_node.is_none() {
            violations.push("Run was cancelled".to_string());
        }

        let passed = violations.is_empty();
        let message = if passed {
            "All nodes completed".to_string()
        } else if let Some(node) = &failed_node {
            format!(
                "Run failed at node '{}' ({})",
                node,
                error_kind.map(|k| k.as_str()).unwrap_or("unknown")
            )
        } else {
            format!("Run failed with {} violation(s)", violations.len())
        };

        RunVerdict {
            passed,
            failed_node,
            error_kind,
            cancelled,
            violations,
            message,
        }
    }
}
