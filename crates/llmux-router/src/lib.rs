//! Inbound HTTP surface: one route per dialect, the model listings, SSE
//! response plumbing and client-disconnect propagation.

mod stream_body;

use std::sync::Arc;

use axum::Router;
use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderValue, StatusCode, header};
use axum::response::Response;
use axum::routing::{get, post};
use bytes::Bytes;
use serde_json::Value;
use tracing::info;

use llmux_common::ProxyError;
use llmux_core::{ClientAuth, DispatchReply, Dispatcher, InboundRequest, error_document};
use llmux_protocol::Dialect;

use stream_body::CancellingStream;

pub struct AppState {
    pub dispatcher: Arc<Dispatcher>,
    pub client_auth: Arc<ClientAuth>,
    pub disable_proxy_buffering: bool,
    pub passthrough_headers: bool,
    pub request_log: bool,
}

pub fn proxy_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/chat/completions", post(openai_chat))
        .route("/v1/responses", post(openai_responses))
        .route("/v1/messages", post(claude_messages))
        .route("/v1/messages/count_tokens", post(claude_count_tokens))
        .route("/v1beta/models/{model_action}", post(gemini_generate))
        .route("/v1beta/models", get(gemini_models))
        .route("/v1/models", get(openai_models))
        // Codex tree: explicit prefix routing for chat-completions clients.
        .route("/codex/v1/chat/completions", post(codex_chat))
        .route("/codex/v1/responses", post(codex_responses))
        .with_state(state)
}

async fn openai_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_generate(state, headers, body, Dialect::OpenAI, None, None).await
}

async fn openai_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_generate(state, headers, body, Dialect::OpenAIResponses, None, None).await
}

async fn claude_messages(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_generate(state, headers, body, Dialect::Claude, None, None).await
}

async fn codex_chat(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_generate(state, headers, body, Dialect::OpenAI, None, Some("codex")).await
}

async fn codex_responses(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    handle_generate(state, headers, body, Dialect::OpenAIResponses, None, Some("codex")).await
}

async fn gemini_generate(
    State(state): State<Arc<AppState>>,
    Path(model_action): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((model, action)) = model_action.split_once(':') else {
        return error_response(
            ProxyError::permanent("expected models/{model}:{action}").with_status(404),
        );
    };
    let stream = match action {
        "generateContent" => Some(false),
        "streamGenerateContent" => Some(true),
        "countTokens" => None,
        _ => {
            return error_response(
                ProxyError::permanent(format!("unsupported action {action}")).with_status(404),
            );
        }
    };

    match stream {
        Some(stream) => {
            handle_generate(
                state,
                headers,
                body,
                Dialect::Gemini,
                Some((model.to_string(), stream)),
                None,
            )
            .await
        }
        None => {
            let header_pairs = header_pairs(&headers);
            if let Err(err) = state.client_auth.authenticate(&header_pairs) {
                return error_response(err);
            }
            let Ok(parsed) = serde_json::from_slice::<Value>(&body) else {
                return error_response(ProxyError::translation("request body is not JSON"));
            };
            let inbound = InboundRequest {
                dialect: Dialect::Gemini,
                body: parsed,
                requested_model: model.to_string(),
                stream: false,
                pinned_auth_id: llmux_core::pinned_auth_id(&header_pairs),
            };
            match state.dispatcher.dispatch_count(inbound).await {
                Ok(DispatchReply::Buffered {
                    status,
                    headers,
                    body,
                }) => buffered_response(&state, status, headers, body),
                Ok(DispatchReply::Streaming { .. }) => {
                    error_response(ProxyError::internal("count_tokens cannot stream"))
                }
                Err(err) => error_response(err),
            }
        }
    }
}

async fn claude_count_tokens(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let header_pairs = header_pairs(&headers);
    if let Err(err) = state.client_auth.authenticate(&header_pairs) {
        return error_response(err);
    }
    let Ok(parsed) = serde_json::from_slice::<Value>(&body) else {
        return error_response(ProxyError::translation("request body is not JSON"));
    };
    let Some(model) = parsed.get("model").and_then(Value::as_str) else {
        return error_response(ProxyError::translation("request has no model"));
    };
    let inbound = InboundRequest {
        dialect: Dialect::Claude,
        requested_model: model.to_string(),
        body: parsed.clone(),
        stream: false,
        pinned_auth_id: llmux_core::pinned_auth_id(&header_pairs),
    };
    match state.dispatcher.dispatch_count(inbound).await {
        Ok(DispatchReply::Buffered {
            status,
            headers,
            body,
        }) => buffered_response(&state, status, headers, body),
        Ok(DispatchReply::Streaming { .. }) => {
            error_response(ProxyError::internal("count_tokens cannot stream"))
        }
        Err(err) => error_response(err),
    }
}

async fn openai_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    models_listing(&state, &headers, Dialect::OpenAI)
}

async fn gemini_models(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Response {
    models_listing(&state, &headers, Dialect::Gemini)
}

fn models_listing(state: &AppState, headers: &HeaderMap, dialect: Dialect) -> Response {
    let header_pairs = header_pairs(headers);
    if let Err(err) = state.client_auth.authenticate(&header_pairs) {
        return error_response(err);
    }
    let models = state.dispatcher.registry().available_models(dialect);
    let payload = match dialect {
        Dialect::Gemini => serde_json::json!({"models": models}),
        _ => serde_json::json!({"object": "list", "data": models}),
    };
    json_response(StatusCode::OK, Bytes::from(payload.to_string()))
}

/// The shared generate-content path for every dialect.
async fn handle_generate(
    state: Arc<AppState>,
    headers: HeaderMap,
    body: Bytes,
    dialect: Dialect,
    gemini_route: Option<(String, bool)>,
    forced_prefix: Option<&str>,
) -> Response {
    let header_pairs = header_pairs(&headers);
    if let Err(err) = state.client_auth.authenticate(&header_pairs) {
        return error_response(err);
    }

    let Ok(parsed) = serde_json::from_slice::<Value>(&body) else {
        return error_response(ProxyError::translation("request body is not JSON"));
    };

    let (requested_model, stream) = match &gemini_route {
        Some((model, stream)) => (model.clone(), *stream),
        None => {
            let Some(model) = parsed.get("model").and_then(Value::as_str) else {
                return error_response(ProxyError::translation("request has no model"));
            };
            let stream = parsed
                .get("stream")
                .and_then(Value::as_bool)
                .unwrap_or(false);
            (model.to_string(), stream)
        }
    };
    // The codex tree forces the provider by prefixing the model id.
    let requested_model = match forced_prefix {
        Some(prefix) if !requested_model.starts_with(&format!("{prefix}-")) => {
            format!("{prefix}-{requested_model}")
        }
        _ => requested_model,
    };

    if state.request_log {
        info!(
            event = "inbound_request",
            dialect = %dialect,
            model = %requested_model,
            stream,
            body_bytes = body.len(),
        );
    }

    let inbound = InboundRequest {
        dialect,
        body: parsed,
        requested_model,
        stream,
        pinned_auth_id: llmux_core::pinned_auth_id(&header_pairs),
    };
    let (result, cancel_handle) = state.dispatcher.dispatch(inbound).await;

    match result {
        Ok(DispatchReply::Buffered {
            status,
            headers,
            body,
        }) => buffered_response(&state, status, headers, body),
        Ok(DispatchReply::Streaming { rx }) => {
            if stream {
                sse_response(&state, rx, cancel_handle)
            } else {
                // Keepalive-padded non-stream: JSON document after blank
                // lines.
                let body = Body::from_stream(CancellingStream::new(rx, cancel_handle));
                let mut response = Response::new(body);
                response.headers_mut().insert(
                    header::CONTENT_TYPE,
                    HeaderValue::from_static("application/json"),
                );
                response
            }
        }
        Err(err) => error_response(err),
    }
}

fn sse_response(
    state: &AppState,
    rx: tokio::sync::mpsc::Receiver<Result<Bytes, ProxyError>>,
    cancel_handle: llmux_provider_core::CancelHandle,
) -> Response {
    let body = Body::from_stream(CancellingStream::new(rx, cancel_handle));
    let mut response = Response::new(body);
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("text/event-stream; charset=utf-8"),
    );
    headers.insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-cache, no-transform"),
    );
    headers.insert(header::CONNECTION, HeaderValue::from_static("keep-alive"));
    if state.disable_proxy_buffering {
        headers.insert("x-accel-buffering", HeaderValue::from_static("no"));
    }
    response
}

fn buffered_response(
    state: &AppState,
    status: u16,
    upstream_headers: Vec<(String, String)>,
    body: Bytes,
) -> Response {
    let mut response = json_response(
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
        body,
    );
    if state.passthrough_headers {
        for (name, value) in upstream_headers {
            if is_hop_by_hop(&name) {
                continue;
            }
            if let (Ok(name), Ok(value)) = (
                header::HeaderName::from_bytes(name.as_bytes()),
                HeaderValue::from_str(&value),
            ) {
                response.headers_mut().insert(name, value);
            }
        }
    }
    response
}

fn is_hop_by_hop(name: &str) -> bool {
    matches!(
        name.to_ascii_lowercase().as_str(),
        "connection"
            | "keep-alive"
            | "transfer-encoding"
            | "upgrade"
            | "proxy-authenticate"
            | "proxy-authorization"
            | "te"
            | "trailer"
            | "content-length"
    )
}

fn json_response(status: StatusCode, body: Bytes) -> Response {
    let mut response = Response::new(Body::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    response
}

fn error_response(err: ProxyError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    let mut response = json_response(status, Bytes::from(error_document(&err).to_string()));
    if let Some(retry_after) = err.retry_after
        && let Ok(value) = HeaderValue::from_str(&retry_after.as_secs().to_string())
    {
        response.headers_mut().insert(header::RETRY_AFTER, value);
    }
    response
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
    headers
        .iter()
        .filter_map(|(name, value)| {
            value
                .to_str()
                .ok()
                .map(|value| (name.as_str().to_string(), value.to_string()))
        })
        .collect()
}
