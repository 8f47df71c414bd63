use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use llmux_common::{ErrorKind, ProxyResult};
use llmux_provider_core::{CancelHandle, RetryPlan};
use llmux_provider_impl::transport::{
    Transport, TransportBody, TransportRequest, TransportResponse,
};
use llmux_provider_impl::upstream::{failure_from_response, send_with_retry};

/// Serves a scripted sequence of responses and counts upstream calls.
struct ScriptedTransport {
    script: Mutex<VecDeque<(u16, Vec<(String, String)>, &'static str)>>,
    calls: AtomicU32,
}

impl ScriptedTransport {
    fn new(script: Vec<(u16, Vec<(String, String)>, &'static str)>) -> Self {
        Self {
            script: Mutex::new(script.into_iter().collect()),
            calls: AtomicU32::new(0),
        }
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn round_trip(
        &self,
        _proxy: Option<&str>,
        _req: TransportRequest,
    ) -> ProxyResult<TransportResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let (status, headers, body) = self
            .script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or((599, Vec::new(), "script exhausted"));
        Ok(TransportResponse {
            status,
            headers,
            body: TransportBody::Bytes(Bytes::from_static(body.as_bytes())),
        })
    }
}

fn request() -> TransportRequest {
    TransportRequest {
        method: "POST".to_string(),
        url: "https://llm.chutes.ai/v1/chat/completions".to_string(),
        headers: Vec::new(),
        body: Some(Bytes::from_static(b"{}")),
        stream: false,
    }
}

fn millis_plan(max_retries: u32) -> RetryPlan {
    RetryPlan {
        max_retries,
        backoff: vec![Duration::from_millis(1); 4],
        ..RetryPlan::default()
    }
}

#[tokio::test]
async fn rate_limits_retry_until_success() {
    // 429, 429, 200 with max_retries=3: exactly three upstream calls, 200 out.
    let transport = ScriptedTransport::new(vec![
        (429, Vec::new(), "busy"),
        (429, Vec::new(), "busy"),
        (200, Vec::new(), "{\"ok\":true}"),
    ]);
    let (_handle, cancel) = CancelHandle::new();
    let response = send_with_retry(
        &transport,
        None,
        &millis_plan(3),
        &cancel,
        Duration::from_secs(5),
        request(),
    )
    .await
    .unwrap();
    assert_eq!(response.status, 200);
    assert_eq!(transport.calls(), 3);
}

#[tokio::test]
async fn exhausted_rate_limit_surfaces_capped_retry_after() {
    // max_retries=0 with Retry-After: 60 -> one call, 429 error, hint <= 5s.
    let transport = ScriptedTransport::new(vec![(
        429,
        vec![("retry-after".to_string(), "60".to_string())],
        "slow down",
    )]);
    let (_handle, cancel) = CancelHandle::new();
    let response = send_with_retry(
        &transport,
        None,
        &millis_plan(0),
        &cancel,
        Duration::from_secs(5),
        request(),
    )
    .await
    .unwrap();
    assert_eq!(transport.calls(), 1);
    assert_eq!(response.status, 429);

    let headers = response.headers.clone();
    let status = response.status;
    let body = response.collect_body().await;
    let err = failure_from_response(status, &headers, &body);
    assert_eq!(err.kind, ErrorKind::UpstreamTransient);
    assert_eq!(err.http_status(), 429);
    let retry_after = err.retry_after.expect("429 must carry retry_after");
    assert!(retry_after <= Duration::from_secs(5));
}

#[tokio::test]
async fn attempt_count_never_exceeds_plan() {
    // All attempts fail retryable; calls == max_retries + 1.
    let transport = ScriptedTransport::new(vec![
        (503, Vec::new(), "down"),
        (503, Vec::new(), "down"),
        (503, Vec::new(), "down"),
        (503, Vec::new(), "down"),
        (503, Vec::new(), "down"),
    ]);
    let (_handle, cancel) = CancelHandle::new();
    let response = send_with_retry(
        &transport,
        None,
        &millis_plan(3),
        &cancel,
        Duration::from_secs(5),
        request(),
    )
    .await
    .unwrap();
    assert_eq!(response.status, 503);
    assert_eq!(transport.calls(), 4);
}

#[tokio::test]
async fn non_retryable_statuses_return_immediately() {
    let transport = ScriptedTransport::new(vec![(400, Vec::new(), "bad request")]);
    let (_handle, cancel) = CancelHandle::new();
    let response = send_with_retry(
        &transport,
        None,
        &millis_plan(3),
        &cancel,
        Duration::from_secs(5),
        request(),
    )
    .await
    .unwrap();
    assert_eq!(response.status, 400);
    assert_eq!(transport.calls(), 1);
}

#[tokio::test]
async fn cancellation_aborts_a_pending_backoff() {
    struct SlowRateLimit;
    #[async_trait]
    impl Transport for SlowRateLimit {
        async fn round_trip(
            &self,
            _proxy: Option<&str>,
            _req: TransportRequest,
        ) -> ProxyResult<TransportResponse> {
            Ok(TransportResponse {
                status: 429,
                headers: Vec::new(),
                body: TransportBody::Bytes(Bytes::new()),
            })
        }
    }

    let plan = RetryPlan {
        max_retries: 1,
        backoff: vec![Duration::from_secs(60)],
        ..RetryPlan::default()
    };
    let (handle, cancel) = CancelHandle::new();
    let task = tokio::spawn(async move {
        send_with_retry(
            &SlowRateLimit,
            None,
            &plan,
            &cancel,
            Duration::from_secs(5),
            TransportRequest {
                method: "POST".to_string(),
                url: "https://example.com".to_string(),
                headers: Vec::new(),
                body: None,
                stream: false,
            },
        )
        .await
    });
    tokio::time::sleep(Duration::from_millis(50)).await;
    handle.cancel();
    let result = tokio::time::timeout(Duration::from_secs(1), task)
        .await
        .expect("cancel must preempt the 60s backoff")
        .unwrap();
    assert_eq!(result.unwrap_err().kind, ErrorKind::Cancelled);
}
