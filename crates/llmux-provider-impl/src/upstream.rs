use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::warn;

use llmux_common::{ProxyError, ProxyResult, UsageRecord};
use llmux_protocol::{Dialect, SseFramer, SseLineScanner};
use llmux_provider_core::{
    CancelToken, ChunkStream, Credential, ExecResponse, RequestContext, RetryPlan, UsageEvent,
    capped_retry_after, parse_retry_after,
};
use llmux_translate::{StreamContext, StreamTranslator, translate_nonstream};

use crate::client::host_of;
use crate::env::{ExecutorEnv, StreamTimeouts};
use crate::transport::{
    SharedTransport, Transport, TransportBody, TransportRequest, TransportResponse, WreqTransport,
};

/// A fully prepared upstream call: translated body, final URL and headers.
#[derive(Debug, Clone)]
pub struct PreparedCall {
    pub provider_dialect: Dialect,
    pub url: String,
    pub method: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Value>,
    pub stream: bool,
}

impl PreparedCall {
    pub fn post_json(provider_dialect: Dialect, url: String, body: Value, stream: bool) -> Self {
        Self {
            provider_dialect,
            url,
            method: "POST".to_string(),
            headers: Vec::new(),
            body: Some(body),
            stream,
        }
    }
}

pub fn transport_of(env: &ExecutorEnv) -> SharedTransport {
    env.transport
        .clone()
        .unwrap_or_else(|| Arc::new(WreqTransport) as SharedTransport)
}

/// Retry loop around one upstream call. Retryable statuses and transient
/// transport errors consume attempts; backoff follows the plan's schedule
/// with upstream `Retry-After` hints capped to the short cooldown. A pending
/// sleep returns early on cancellation.
pub async fn send_with_retry(
    transport: &dyn Transport,
    proxy: Option<&str>,
    plan: &RetryPlan,
    cancel: &CancelToken,
    request_deadline: Duration,
    req: TransportRequest,
) -> ProxyResult<TransportResponse> {
    let mut attempt: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            return Err(ProxyError::cancelled());
        }

        let outcome = tokio::select! {
            outcome = tokio::time::timeout(request_deadline, transport.round_trip(proxy, req.clone())) => outcome,
            _ = cancel.cancelled() => return Err(ProxyError::cancelled()),
        };

        let result = match outcome {
            Ok(result) => result,
            Err(_) => Err(ProxyError::transient("upstream deadline exceeded")),
        };

        match result {
            Ok(response) => {
                let retryable =
                    plan.is_retryable_status(response.status) && attempt < plan.max_retries;
                if !retryable {
                    return Ok(response);
                }
                let hint = parse_retry_after(&response.headers)
                    .map(|value| value.min(llmux_provider_core::SHORT_COOLDOWN));
                let delay = hint.unwrap_or_else(|| plan.backoff_for(attempt));
                sleep_or_cancel(delay, cancel).await?;
            }
            Err(err) if err.is_retryable() && attempt < plan.max_retries => {
                sleep_or_cancel(plan.backoff_for(attempt), cancel).await?;
            }
            Err(err) => return Err(err),
        }
        attempt += 1;
    }
}

async fn sleep_or_cancel(delay: Duration, cancel: &CancelToken) -> ProxyResult<()> {
    tokio::select! {
        _ = tokio::time::sleep(delay) => Ok(()),
        _ = cancel.cancelled() => Err(ProxyError::cancelled()),
    }
}

/// Converts a non-2xx upstream response into the error taxonomy. 429 carries
/// a capped `retry_after`.
pub fn failure_from_response(status: u16, headers: &[(String, String)], body: &Bytes) -> ProxyError {
    let message = body_excerpt(body);
    match status {
        401 => ProxyError::auth(format!("upstream rejected credential: {message}"))
            .with_status(status),
        403 => ProxyError::auth(format!("upstream denied access: {message}")).with_status(status),
        429 => {
            let retry_after = capped_retry_after(parse_retry_after(headers));
            ProxyError::transient(format!("upstream rate limited: {message}"))
                .with_status(429)
                .with_retry_after(retry_after)
        }
        500..=599 => {
            ProxyError::transient(format!("upstream error {status}: {message}")).with_status(status)
        }
        _ => ProxyError::permanent(format!("upstream error {status}: {message}"))
            .with_status(status),
    }
}

fn body_excerpt(body: &Bytes) -> String {
    const MAX: usize = 512;
    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.len() <= MAX {
        return text.to_string();
    }
    let mut end = MAX;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &text[..end])
}

/// `gpt-5*` models reject `temperature`; drop it with a warning.
pub fn strip_gpt5_temperature(model: &str, body: &mut Value) {
    if !model.starts_with("gpt-5") {
        return;
    }
    if let Some(obj) = body.as_object_mut()
        && obj.remove("temperature").is_some()
    {
        warn!(
            event = "parameter_dropped",
            model = %model,
            parameter = "temperature",
            "gpt-5 family rejects temperature"
        );
    }
}

pub fn stream_context(ctx: &RequestContext, translated: &Value) -> StreamContext {
    StreamContext {
        model: ctx.metadata.requested_model.clone(),
        response_id: format!("chatcmpl-{}", uuid::Uuid::new_v4().simple()),
        created: time::OffsetDateTime::now_utc().unix_timestamp(),
        instructions: translated
            .get("instructions")
            .and_then(Value::as_str)
            .map(str::to_string),
    }
}

/// Non-streaming path: send with retry, translate the body back into the
/// client dialect, publish usage.
pub async fn run_nonstream(
    env: &ExecutorEnv,
    provider: &str,
    ctx: &RequestContext,
    auth: &Credential,
    call: PreparedCall,
) -> ProxyResult<ExecResponse> {
    let transport = transport_of(env);
    let proxy = env
        .proxy
        .resolve(auth.proxy_url.as_deref(), provider, host_of(&call.url));
    let plan = env.retry_plan(provider);
    let sctx = stream_context(ctx, call.body.as_ref().unwrap_or(&Value::Null));

    let body_bytes = match &call.body {
        Some(body) => Some(Bytes::from(serde_json::to_vec(body).map_err(|err| {
            ProxyError::internal(format!("serialize upstream body: {err}"))
        })?)),
        None => None,
    };
    let response = send_with_retry(
        transport.as_ref(),
        proxy.as_deref(),
        &plan,
        &ctx.cancel,
        env.request_timeout(provider),
        TransportRequest {
            method: call.method.clone(),
            url: call.url.clone(),
            headers: call.headers.clone(),
            body: body_bytes,
            stream: false,
        },
    )
    .await?;

    let status = response.status;
    let headers = response.headers.clone();
    let body = response.collect_body().await;
    if !(200..300).contains(&status) {
        report_usage(env, provider, ctx, auth, UsageRecord::default(), false);
        return Err(failure_from_response(status, &headers, &body));
    }

    let upstream_value: Value = serde_json::from_slice(&body)
        .map_err(|err| ProxyError::transient(format!("upstream body not json: {err}")))?;
    let usage = usage_from_body(call.provider_dialect, &upstream_value);
    report_usage(env, provider, ctx, auth, usage, true);

    let translated = translate_nonstream(
        call.provider_dialect,
        ctx.source_dialect,
        &sctx,
        &upstream_value,
    )
    .map_err(|err| ProxyError::translation(err.to_string()))?;
    let payload = Bytes::from(
        serde_json::to_vec(&translated)
            .map_err(|err| ProxyError::internal(format!("serialize response: {err}")))?,
    );
    Ok(ExecResponse::json(payload))
}

/// Streaming path: connect with retry, then bridge upstream lines through
/// the per-stream translator and the SSE framer. Stream timeouts surface as
/// a synthetic terminal chunk, not a hard abort.
pub async fn run_stream(
    env: &ExecutorEnv,
    provider: &str,
    ctx: &RequestContext,
    auth: &Credential,
    call: PreparedCall,
) -> ProxyResult<ChunkStream> {
    let transport = transport_of(env);
    let proxy = env
        .proxy
        .resolve(auth.proxy_url.as_deref(), provider, host_of(&call.url));
    let plan = env.retry_plan(provider);
    let sctx = stream_context(ctx, call.body.as_ref().unwrap_or(&Value::Null));

    let body_bytes = match &call.body {
        Some(body) => Some(Bytes::from(serde_json::to_vec(body).map_err(|err| {
            ProxyError::internal(format!("serialize upstream body: {err}"))
        })?)),
        None => None,
    };
    let response = send_with_retry(
        transport.as_ref(),
        proxy.as_deref(),
        &plan,
        &ctx.cancel,
        env.request_timeout(provider),
        TransportRequest {
            method: call.method.clone(),
            url: call.url.clone(),
            headers: call.headers.clone(),
            body: body_bytes,
            stream: true,
        },
    )
    .await?;

    if !(200..300).contains(&response.status) {
        let status = response.status;
        let headers = response.headers.clone();
        let body = response.collect_body().await;
        report_usage(env, provider, ctx, auth, UsageRecord::default(), false);
        return Err(failure_from_response(status, &headers, &body));
    }

    let upstream_rx = match response.body {
        TransportBody::Stream(rx) => rx,
        TransportBody::Bytes(bytes) => {
            // Upstream answered non-streaming; feed the buffer through the
            // same bridge.
            let (tx, rx) = mpsc::channel(1);
            let _ = tx.try_send(Ok(bytes));
            rx
        }
    };

    let translator = StreamTranslator::new(call.provider_dialect, ctx.source_dialect, sctx)
        .map_err(|err| ProxyError::translation(err.to_string()))?;
    Ok(bridge_stream(
        env,
        provider,
        ctx,
        auth,
        upstream_rx,
        translator,
        env.timeouts(provider),
    ))
}

/// Drives one upstream byte stream through the translator and framer,
/// enforcing the first-chunk / idle / total thresholds.
#[allow(clippy::too_many_arguments)]
fn bridge_stream(
    env: &ExecutorEnv,
    provider: &str,
    ctx: &RequestContext,
    auth: &Credential,
    mut upstream_rx: mpsc::Receiver<Result<Bytes, ProxyError>>,
    mut translator: StreamTranslator,
    timeouts: StreamTimeouts,
) -> ChunkStream {
    let (tx, rx) = mpsc::channel::<Result<Bytes, ProxyError>>(16);
    let cancel = ctx.cancel.clone();
    let usage_reporter = env.usage.clone();
    let usage_event_base = UsageEvent {
        provider: provider.to_string(),
        model: ctx.metadata.requested_model.clone(),
        credential_id: auth.id.clone(),
        usage: UsageRecord::default(),
        success: false,
    };
    let client_dialect = ctx.source_dialect;

    tokio::spawn(async move {
        let mut scanner = SseLineScanner::new();
        let mut framer = SseFramer::new();
        let mut usage: Option<UsageRecord> = None;
        let started = Instant::now();
        let mut got_first_chunk = false;
        let mut timed_out: Option<&'static str> = None;

        loop {
            let wait = if got_first_chunk {
                timeouts.idle
            } else {
                timeouts.first_chunk
            };
            let remaining_total = timeouts
                .total
                .map(|total| total.saturating_sub(started.elapsed()));
            let effective = match (wait, remaining_total) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (Some(a), None) => Some(a),
                (None, Some(b)) => Some(b),
                (None, None) => None,
            };

            let received = tokio::select! {
                _ = cancel.cancelled() => break,
                received = recv_with_deadline(&mut upstream_rx, effective) => received,
            };

            match received {
                RecvOutcome::Chunk(bytes) => {
                    got_first_chunk = true;
                    let mut out = String::new();
                    for line in scanner.push_bytes(&bytes) {
                        for emitted in translator.push_line(&line) {
                            if let Some(found) = usage_from_line(client_dialect, &emitted) {
                                usage = Some(found);
                            }
                            out.push_str(&framer.push_line(&emitted));
                        }
                    }
                    if !out.is_empty() && tx.send(Ok(Bytes::from(out))).await.is_err() {
                        break;
                    }
                }
                RecvOutcome::Closed => {
                    let mut out = String::new();
                    if let Some(line) = scanner.finish() {
                        for emitted in translator.push_line(&line) {
                            if let Some(found) = usage_from_line(client_dialect, &emitted) {
                                usage = Some(found);
                            }
                            out.push_str(&framer.push_line(&emitted));
                        }
                    }
                    for emitted in translator.finish() {
                        if let Some(found) = usage_from_line(client_dialect, &emitted) {
                            usage = Some(found);
                        }
                        out.push_str(&framer.push_line(&emitted));
                    }
                    out.push_str(&framer.finish());
                    if !out.is_empty() {
                        let _ = tx.send(Ok(Bytes::from(out))).await;
                    }
                    break;
                }
                RecvOutcome::Error(err) => {
                    // A surfaced timeout takes precedence over late errors.
                    if timed_out.is_none() {
                        let _ = tx.send(Err(err)).await;
                    }
                    break;
                }
                RecvOutcome::Deadline => {
                    let which = if !got_first_chunk {
                        "no data before first-chunk timeout"
                    } else if timeouts
                        .total
                        .is_some_and(|total| started.elapsed() >= total)
                    {
                        "stream exceeded total timeout"
                    } else {
                        "stream idle timeout"
                    };
                    timed_out = Some(which);
                    let mut out = framer.finish();
                    out.push_str(&format!("data: {which}\n\ndata: [DONE]\n\n"));
                    let _ = tx.send(Ok(Bytes::from(out))).await;
                    break;
                }
            }
        }

        let mut event = usage_event_base;
        if let Some(usage) = usage {
            event.usage = usage;
            event.success = true;
        } else {
            event.success = timed_out.is_none() && !cancel.is_cancelled();
        }
        usage_reporter.record(event);
    });

    rx
}

enum RecvOutcome {
    Chunk(Bytes),
    Closed,
    Error(ProxyError),
    Deadline,
}

async fn recv_with_deadline(
    rx: &mut mpsc::Receiver<Result<Bytes, ProxyError>>,
    deadline: Option<Duration>,
) -> RecvOutcome {
    let next = match deadline {
        Some(deadline) => match tokio::time::timeout(deadline, rx.recv()).await {
            Ok(next) => next,
            Err(_) => return RecvOutcome::Deadline,
        },
        None => rx.recv().await,
    };
    match next {
        Some(Ok(bytes)) => RecvOutcome::Chunk(bytes),
        Some(Err(err)) => RecvOutcome::Error(err),
        None => RecvOutcome::Closed,
    }
}

fn report_usage(
    env: &ExecutorEnv,
    provider: &str,
    ctx: &RequestContext,
    auth: &Credential,
    usage: UsageRecord,
    success: bool,
) {
    env.usage.record(UsageEvent {
        provider: provider.to_string(),
        model: ctx.metadata.requested_model.clone(),
        credential_id: auth.id.clone(),
        usage,
        success,
    });
}

/// Extracts a usage record from a complete provider response body.
pub fn usage_from_body(dialect: Dialect, body: &Value) -> UsageRecord {
    match dialect {
        Dialect::Claude => {
            let usage = body.get("usage");
            UsageRecord::new(
                usage
                    .and_then(|u| u.get("input_tokens"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
                usage
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            )
        }
        Dialect::Gemini => {
            let usage = body.get("usageMetadata");
            UsageRecord::new(
                usage
                    .and_then(|u| u.get("promptTokenCount"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
                usage
                    .and_then(|u| u.get("candidatesTokenCount"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            )
        }
        Dialect::OpenAIResponses | Dialect::Codex => {
            let usage = body.get("usage");
            UsageRecord::new(
                usage
                    .and_then(|u| u.get("input_tokens"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
                usage
                    .and_then(|u| u.get("output_tokens"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            )
        }
        _ => {
            let usage = body.get("usage");
            UsageRecord::new(
                usage
                    .and_then(|u| u.get("prompt_tokens"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
                usage
                    .and_then(|u| u.get("completion_tokens"))
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            )
        }
    }
}

/// Extracts a usage record from a translated (client-dialect) stream line.
fn usage_from_line(dialect: Dialect, line: &str) -> Option<UsageRecord> {
    let payload = line.strip_prefix("data:").map(str::trim)?;
    if payload.is_empty() || payload == llmux_protocol::DONE_MARKER {
        return None;
    }
    let value: Value = serde_json::from_str(payload).ok()?;
    let usage = match dialect {
        Dialect::Claude => {
            let usage = value.get("usage")?;
            UsageRecord::new(
                usage.get("input_tokens").and_then(Value::as_i64).unwrap_or(0),
                usage
                    .get("output_tokens")
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            )
        }
        Dialect::Gemini => usage_from_body(Dialect::Gemini, &value),
        Dialect::OpenAIResponses | Dialect::Codex => {
            let usage = value.get("response")?.get("usage")?;
            UsageRecord::new(
                usage.get("input_tokens").and_then(Value::as_i64).unwrap_or(0),
                usage
                    .get("output_tokens")
                    .and_then(Value::as_i64)
                    .unwrap_or(0),
            )
        }
        _ => {
            let usage = value.get("usage")?;
            if !usage.is_object() {
                return None;
            }
            usage_from_body(Dialect::OpenAI, &value)
        }
    };
    (usage.total_tokens > 0).then_some(usage)
}
