//! External callback steps.
//!
//! A callback node hands its work to an externally invoked handler and then
//! waits for an explicit completion signal:
//!
//! 1. [`CallbackBroker::register`] mints a [`CallbackToken`] and a
//!    [`PendingCallback`].
//! 2. A [`CallbackInvoker`] delivers the token and payload to the handler.
//! 3. The handler later calls [`CallbackBroker::send_success`] or
//!    [`CallbackBroker::send_failure`] with that token.
//! 4. [`PendingCallback::wait`] resolves with the outputs, or fails on
//!    timeout, cancellation, or a failure signal.

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::domain::error::{ErrorKind, PipelineError, Result};

/// Opaque handle identifying one pending callback.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CallbackToken(String);

impl CallbackToken {
    fn generate() -> Self {
        CallbackToken(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for CallbackToken {
    fn from(s: String) -> Self {
        CallbackToken(s)
    }
}

impl std::fmt::Display for CallbackToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Terminal signal sent by a callback handler.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CallbackOutcome {
    Succeeded { outputs: BTreeMap<String, String> },
    Failed {
        reason: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_kind: Option<ErrorKind>,
    },
}

/// Errors returned to a handler that signals the broker.
#[derive(Debug, thiserror::Error)]
pub enum SignalError {
    #[error("unknown or already signalled callback token: {0}")]
    UnknownToken(String),

    #[error("callback {0} is no longer awaited")]
    NoLongerAwaited(String),
}

/// What the invoker hands to the external handler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CallbackRequest {
    pub token: CallbackToken,
    pub node: String,
    pub payload: serde_json::Value,
}

/// Delivers a callback request to the external handler.
///
/// `invoke` returns once the request is accepted; the result arrives later
/// through the [`CallbackBroker`].
#[async_trait]
pub trait CallbackInvoker: Send + Sync {
    async fn invoke(&self, request: CallbackRequest) -> Result<()>;
}

/// Registry of callbacks awaiting a signal.
#[derive(Debug, Default)]
pub struct CallbackBroker {
    pending: Mutex<HashMap<String, oneshot::Sender<CallbackOutcome>>>,
}

impl CallbackBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mint a token and the receiving half that will observe its signal.
    pub fn register(&self) -> (CallbackToken, PendingCallback) {
        let token = CallbackToken::generate();
        let (tx, rx) = oneshot::channel();
        self.pending
            .lock()
            .unwrap()
            .insert(token.0.clone(), tx);
        debug!(token = %token, "callback registered");
        (token.clone(), PendingCallback { token, rx })
    }

    pub fn send_success(
        &self,
        token: &CallbackToken,
        outputs: BTreeMap<String, String>,
    ) -> std::result::Result<(), SignalError> {
        self.signal(token, CallbackOutcome::Succeeded { outputs })
    }

    pub fn send_failure(
        &self,
        token: &CallbackToken,
        reason: impl Into<String>,
    ) -> std::result::Result<(), SignalError> {
        self.signal(
            token,
            CallbackOutcome::Failed {
                reason: reason.into(),
                error_kind: None,
            },
        )
    }

    /// Signal failure and carry the handler's own error classification.
    pub fn send_error(
        &self,
        token: &CallbackToken,
        error: &PipelineError,
    ) -> std::result::Result<(), SignalError> {
        self.signal(
            token,
            CallbackOutcome::Failed {
                reason: error.to_string(),
                error_kind: Some(error.kind()),
            },
        )
    }

    fn signal(
        &self,
        token: &CallbackToken,
        outcome: CallbackOutcome,
    ) -> std::result::Result<(), SignalError> {
        let sender = self
            .pending
            .lock()
            .unwrap()
            .remove(token.as_str())
            .ok_or_else(|| SignalError::UnknownToken(token.0.clone()))?;
        sender
            .send(outcome)
            .map_err(|_| SignalError::NoLongerAwaited(token.0.clone()))
    }

    /// Drop a token so late signals are rejected.
    pub fn forget(&self, token: &CallbackToken) {
        if self.pending.lock().unwrap().remove(token.as_str()).is_some() {
            debug!(token = %token, "callback forgotten before signal");
        }
    }

    /// Number of callbacks still awaiting a signal.
    pub fn pending_count(&self) -> usize {
        self.pending.lock().unwrap().len()
    }
}

/// Receiving half of a registered callback.
#[derive(Debug)]
pub struct PendingCallback {
    token: CallbackToken,
    rx: oneshot::Receiver<CallbackOutcome>,
}

impl PendingCallback {
    pub fn token(&self) -> &CallbackToken {
        &self.token
    }

    /// Wait for the handler's signal on behalf of `node`.
    ///
    /// Cancellation is checked first so a cancelled run is released even if a
    /// signal raced in at the same instant.
    pub async fn wait(
        self,
        node: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<BTreeMap<String, String>> {
        let PendingCallback { token, rx } = self;
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                warn!(node, token = %token, "callback wait cancelled");
                Err(PipelineError::Cancelled { node: node.to_string() })
            }
            received = tokio::time::timeout(timeout, rx) => match received {
                Err(_) => {
                    warn!(
                        node,
                        token = %token,
                        timeout_secs = timeout.as_secs(),
                        "callback timed out"
                    );
                    Err(PipelineError::CallbackTimeout {
                        node: node.to_string(),
                        timeout_secs: timeout.as_secs(),
                    })
                }
                Ok(Err(_)) => Err(PipelineError::CallbackFailed {
                    node: node.to_string(),
                    reason: "callback was dropped without a signal".to_string(),
                    cause: None,
                }),
                Ok(Ok(CallbackOutcome::Succeeded { outputs })) => Ok(outputs),
                Ok(Ok(CallbackOutcome::Failed { reason, error_kind })) => {
                    Err(PipelineError::CallbackFailed {
                        node: node.to_string(),
                        reason,
                        cause: error_kind,
                    })
                }
            }
        }
    }
}
