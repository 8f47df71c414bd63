pub mod chutes;
pub mod claude;
pub mod codex;
pub mod copilot;
pub mod gemini;
pub mod grok;
pub mod openai_compat;

use bytes::Bytes;
use serde_json::Value;

use llmux_common::{ProxyError, ProxyResult};
use llmux_provider_core::{Credential, ExecResponse, RequestContext};

use crate::client::host_of;
use crate::env::ExecutorEnv;
use crate::headers::Headers;
use crate::transport::TransportRequest;
use crate::upstream::transport_of;

/// Raw upstream HTTP passthrough used by the `http_request` capability:
/// applies the credential's headers, sends once (no retry), returns the
/// response as-is.
pub(crate) async fn generic_http_request(
    env: &ExecutorEnv,
    provider: &str,
    auth: &Credential,
    method: String,
    url: String,
    mut headers: Headers,
    body: Option<Bytes>,
    apply_auth: impl FnOnce(&mut Headers, &Credential),
) -> ProxyResult<ExecResponse> {
    apply_auth(&mut headers, auth);
    let transport = transport_of(env);
    let proxy = env
        .proxy
        .resolve(auth.proxy_url.as_deref(), provider, host_of(&url));
    let response = transport
        .round_trip(
            proxy.as_deref(),
            TransportRequest {
                method,
                url,
                headers,
                body,
                stream: false,
            },
        )
        .await?;
    let status = response.status;
    let headers = response.headers.clone();
    let body = response.collect_body().await;
    Ok(ExecResponse {
        status,
        headers,
        body,
    })
}

/// Applies the `-temp-<float>` suffix recorded by the router onto the
/// upstream body.
pub(crate) fn apply_temperature_suffix(ctx: &RequestContext, body: &mut Value) {
    if let Some(temperature) = ctx.metadata.temperature_suffix
        && let Some(obj) = body.as_object_mut()
    {
        obj.insert(
            "temperature".to_string(),
            serde_json::Number::from_f64(temperature)
                .map(Value::Number)
                .unwrap_or(Value::Null),
        );
    }
}

/// Runs the configured payload rules with both resolved and requested model
/// names as match candidates.
pub(crate) fn apply_payload_rules(
    env: &ExecutorEnv,
    ctx: &RequestContext,
    dialect: llmux_protocol::Dialect,
    base_model: &str,
    body: &mut Value,
) {
    if env.payload_rules.is_empty() {
        return;
    }
    let requested = ctx.metadata.requested_model.as_str();
    let resolved = ctx.resolved_model.as_str();
    let candidates = [base_model, resolved, requested];
    env.payload_rules.apply(dialect, &candidates, body);
}

pub(crate) fn missing_api_key(provider: &str) -> ProxyError {
    ProxyError::auth(format!("{provider} credential has no api key"))
}
