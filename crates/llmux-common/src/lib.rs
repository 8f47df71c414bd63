//! Shared error taxonomy and usage accounting types.
//!
//! Every failure in llmux is a value with a discriminated kind; the dispatcher
//! alone decides the HTTP representation. Nothing in this crate does I/O.

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub type ProxyResult<T> = Result<T, ProxyError>;

/// Failure kinds. Errors bubble up through the pipeline unchanged in kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Invalid or missing configuration; fatal at startup.
    Config,
    /// Missing, expired or rejected credential.
    Auth,
    /// 5xx / 429 / transport failure; subject to retry.
    UpstreamTransient,
    /// Non-auth 4xx from upstream; surfaced directly.
    UpstreamPermanent,
    /// Request body could not be translated into the target dialect.
    Translation,
    /// Client went away; no response body is owed.
    Cancelled,
    /// Programmer error (nil auth, missing executor).
    Internal,
}

#[derive(Debug, Clone, thiserror::Error)]
#[error("{}", self.render())]
pub struct ProxyError {
    pub kind: ErrorKind,
    pub message: String,
    /// Upstream HTTP status, when one was observed.
    pub upstream_status: Option<u16>,
    pub retry_after: Option<Duration>,
    /// Machine-readable cause suffix (e.g. `copilot_auth_rejected`).
    pub cause: Option<&'static str>,
}

impl ProxyError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            upstream_status: None,
            retry_after: None,
            cause: None,
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Config, message)
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamTransient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::UpstreamPermanent, message)
    }

    pub fn translation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Translation, message)
    }

    pub fn cancelled() -> Self {
        Self::new(ErrorKind::Cancelled, "request cancelled by client")
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.upstream_status = Some(status);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    pub fn with_cause(mut self, cause: &'static str) -> Self {
        self.cause = Some(cause);
        self
    }

    /// HTTP status the dispatcher should answer with.
    pub fn http_status(&self) -> u16 {
        match self.kind {
            ErrorKind::Config => 500,
            ErrorKind::Auth => self.upstream_status.unwrap_or(401),
            ErrorKind::UpstreamTransient => self.upstream_status.unwrap_or(502),
            ErrorKind::UpstreamPermanent => self.upstream_status.unwrap_or(400),
            ErrorKind::Translation => 400,
            ErrorKind::Cancelled => 499,
            ErrorKind::Internal => 500,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, ErrorKind::UpstreamTransient)
    }

    fn render(&self) -> String {
        match self.cause {
            Some(cause) => format!("{} (cause: {cause})", self.message),
            None => self.message.clone(),
        }
    }
}

/// Token accounting published after every completed upstream call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub prompt_tokens: i64,
    pub completion_tokens: i64,
    pub total_tokens: i64,
}

impl UsageRecord {
    pub fn new(prompt_tokens: i64, completion_tokens: i64) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens: prompt_tokens + completion_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_status_follows_kind() {
        assert_eq!(ProxyError::auth("no key").http_status(), 401);
        assert_eq!(ProxyError::translation("bad body").http_status(), 400);
        assert_eq!(ProxyError::internal("nil auth").http_status(), 500);
        assert_eq!(
            ProxyError::transient("rate limited").with_status(429).http_status(),
            429
        );
        assert_eq!(ProxyError::transient("conn reset").http_status(), 502);
    }

    #[test]
    fn cause_suffix_is_rendered() {
        let err = ProxyError::auth("copilot token refresh rejected")
            .with_cause("copilot_auth_rejected");
        assert!(err.to_string().ends_with("(cause: copilot_auth_rejected)"));
    }

    #[test]
    fn usage_totals() {
        let usage = UsageRecord::new(10, 5);
        assert_eq!(usage.total_tokens, 15);
    }
}
