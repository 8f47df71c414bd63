use std::sync::Arc;

use serde_json::Value;
use tokio::sync::watch;

use llmux_protocol::Dialect;

/// Thinking/effort value parsed from a `(...)` model suffix.
#[derive(Debug, Clone, PartialEq)]
pub enum ThinkingValue {
    Budget(i64),
    Level(String),
}

/// Routing metadata carried from the router to the executor.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RouteMetadata {
    pub forced_provider: bool,
    pub temperature_suffix: Option<f64>,
    pub thinking_budget: Option<ThinkingValue>,
    /// The client's model string before any alias or suffix resolution.
    pub requested_model: String,
}

/// Per-request context flowing through the pipeline.
///
/// `original_body` is never mutated after router entry; executors derive
/// their own translated bodies from it.
#[derive(Clone)]
pub struct RequestContext {
    pub trace_id: String,
    pub source_dialect: Dialect,
    pub original_body: Arc<Value>,
    pub resolved_model: String,
    pub requested_model: String,
    pub metadata: RouteMetadata,
    pub stream: bool,
    pub pinned_auth_id: Option<String>,
    pub cancel: CancelToken,
}

impl RequestContext {
    pub fn new(source_dialect: Dialect, body: Value) -> (Self, CancelHandle) {
        let (handle, token) = CancelHandle::new();
        (
            Self {
                trace_id: String::new(),
                source_dialect,
                original_body: Arc::new(body),
                resolved_model: String::new(),
                requested_model: String::new(),
                metadata: RouteMetadata::default(),
                stream: false,
                pinned_auth_id: None,
                cancel: token,
            },
            handle,
        )
    }
}

/// Sender half of a request's cancellation signal. Dropping the handle does
/// not cancel; cancellation is explicit.
pub struct CancelHandle {
    tx: watch::Sender<bool>,
}

impl CancelHandle {
    pub fn new() -> (Self, CancelToken) {
        let (tx, rx) = watch::channel(false);
        (Self { tx }, CancelToken { rx })
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }
}

/// Receiver half, cloned into every suspension point of the pipeline.
#[derive(Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when the request is cancelled. Never resolves if it is not.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        loop {
            if *rx.borrow() {
                return;
            }
            if rx.changed().await.is_err() {
                // Sender gone without cancelling; park forever.
                std::future::pending::<()>().await;
            }
        }
    }
}
