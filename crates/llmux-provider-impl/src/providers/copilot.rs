use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};
use time::OffsetDateTime;

use llmux_common::{ProxyError, ProxyResult};
use llmux_protocol::Dialect;
use llmux_provider_core::{
    AccountType, ChunkStream, Credential, CredentialStorage, ExecResponse, Executor,
    HttpRequestSpec, RequestContext,
};
use llmux_translate::translate_request;

use crate::client::host_of;
use crate::effort::{copilot_effort, split_model_suffixes};
use crate::env::ExecutorEnv;
use crate::headers;
use crate::tokens;
use crate::transport::TransportRequest;
use crate::upstream::{
    PreparedCall, run_nonstream, run_stream, strip_gpt5_temperature, transport_of,
};

use super::{apply_payload_rules, apply_temperature_suffix, generic_http_request};

const PROVIDER_NAME: &str = "copilot";
const GITHUB_API_BASE: &str = "https://api.github.com";
const TOKEN_PATH: &str = "/copilot_internal/v2/token";
/// Refresh ahead of expiry by this margin.
const REFRESH_MARGIN: Duration = Duration::from_secs(60);
const EDITOR_VERSION: &str = "vscode/1.102.0";
const PLUGIN_VERSION: &str = "copilot-chat/0.29.1";

pub struct CopilotExecutor {
    env: Arc<ExecutorEnv>,
}

impl CopilotExecutor {
    pub fn new(env: Arc<ExecutorEnv>) -> Self {
        Self { env }
    }

    fn prepare(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
        stream: bool,
    ) -> ProxyResult<PreparedCall> {
        let (token, account_type) = copilot_token(auth)?;
        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let mut body = translate_request(
            ctx.source_dialect,
            Dialect::OpenAI,
            &suffixes.base,
            &ctx.original_body,
            stream,
        )
        .map_err(|err| ProxyError::translation(err.to_string()))?;

        if let Some(effort) = &suffixes.effort
            && let Some(obj) = body.as_object_mut()
        {
            let effort = copilot_effort(&suffixes.base, effort);
            obj.insert("reasoning".to_string(), json!({"effort": effort}));
        }
        apply_temperature_suffix(ctx, &mut body);
        apply_payload_rules(&self.env, ctx, Dialect::OpenAI, &suffixes.base, &mut body);
        strip_gpt5_temperature(&suffixes.base, &mut body);
        if let Some(obj) = body.as_object_mut() {
            // Copilot rejects both outright.
            obj.remove("max_tokens");
            obj.remove("parallel_tool_calls");
        }
        if suffixes.base.starts_with("gemini") {
            inject_cached_reasoning(auth, &mut body);
        }

        let url = format!("{}/chat/completions", api_base(account_type));
        let mut call = PreparedCall::post_json(Dialect::OpenAI, url, body, stream);
        headers::set_bearer(&mut call.headers, token);
        headers::set_content_type_json(&mut call.headers);
        headers::set_header(&mut call.headers, "copilot-integration-id", "vscode-chat");
        headers::set_header(&mut call.headers, "editor-version", EDITOR_VERSION);
        headers::set_header(&mut call.headers, "editor-plugin-version", PLUGIN_VERSION);
        headers::set_header(&mut call.headers, "openai-intent", "conversation-panel");
        if stream {
            headers::set_accept_sse(&mut call.headers);
        } else {
            headers::set_accept_json(&mut call.headers);
        }
        Ok(call)
    }
}

fn copilot_token(auth: &Credential) -> ProxyResult<(&str, AccountType)> {
    match &auth.storage {
        CredentialStorage::Copilot {
            copilot_token: Some(token),
            account_type,
            ..
        } if !token.is_empty() => Ok((token, *account_type)),
        CredentialStorage::Copilot { .. } => Err(ProxyError::auth(
            "copilot credential has no short-lived token; refresh required",
        )
        .with_cause("copilot_refresh_transient")),
        _ => Err(ProxyError::internal("expected a copilot credential")),
    }
}

fn api_base(account_type: AccountType) -> &'static str {
    match account_type {
        AccountType::Individual => "https://api.githubcopilot.com",
        AccountType::Business => "https://api.business.githubcopilot.com",
        AccountType::Enterprise => "https://api.enterprise.githubcopilot.com",
    }
}

/// Copilot's Gemini-family models round-trip opaque reasoning blobs on
/// assistant turns; replay the blob cached on the credential.
fn inject_cached_reasoning(auth: &Credential, body: &mut Value) {
    let Some(opaque) = auth
        .metadata
        .get("reasoning_opaque")
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
    else {
        return;
    };
    let Some(messages) = body.get_mut("messages").and_then(Value::as_array_mut) else {
        return;
    };
    let Some(last_assistant) = messages
        .iter_mut()
        .rev()
        .find(|message| message.get("role").and_then(Value::as_str) == Some("assistant"))
    else {
        return;
    };
    if let Some(obj) = last_assistant.as_object_mut() {
        obj.insert(
            "reasoning_opaque".to_string(),
            Value::String(opaque.to_string()),
        );
    }
}

/// Whether the cached short-lived token is still good for at least the
/// refresh margin.
pub fn token_is_fresh(auth: &Credential, now: OffsetDateTime) -> bool {
    match &auth.storage {
        CredentialStorage::Copilot {
            copilot_token: Some(token),
            copilot_token_expiry: Some(expiry),
            ..
        } if !token.is_empty() => *expiry > now + REFRESH_MARGIN,
        _ => false,
    }
}

/// Classifies a refresh failure per the copilot auth policy.
fn classify_refresh_failure(status: u16, body: &str) -> ProxyError {
    if status == 401 || status == 403 {
        if body.contains("subscription") {
            return ProxyError::auth("no GitHub Copilot subscription on this account")
                .with_status(401)
                .with_cause("copilot_no_subscription");
        }
        return ProxyError::auth("GitHub rejected the copilot token exchange")
            .with_status(401)
            .with_cause("copilot_auth_rejected");
    }
    if status >= 500 {
        return ProxyError::transient(format!("GitHub token service error {status}"))
            .with_status(503)
            .with_cause("copilot_upstream_error");
    }
    ProxyError::transient(format!("copilot token refresh failed with {status}: {body}"))
        .with_cause("copilot_refresh_transient")
}

#[async_trait]
impl Executor for CopilotExecutor {
    fn identifier(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
    ) -> ProxyResult<ExecResponse> {
        let call = self.prepare(ctx, auth, false)?;
        run_nonstream(&self.env, PROVIDER_NAME, ctx, auth, call).await
    }

    async fn execute_stream(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
    ) -> ProxyResult<ChunkStream> {
        let call = self.prepare(ctx, auth, true)?;
        run_stream(&self.env, PROVIDER_NAME, ctx, auth, call).await
    }

    /// GitHub -> Copilot two-step: exchange the long-lived GitHub token for
    /// the short-lived Copilot token when it is missing or about to expire.
    async fn refresh(&self, auth: &Credential) -> ProxyResult<Credential> {
        let CredentialStorage::Copilot {
            github_token,
            copilot_token: _,
            copilot_token_expiry,
            account_type,
            username,
            email,
        } = &auth.storage
        else {
            return Err(ProxyError::internal("expected a copilot credential"));
        };

        if token_is_fresh(auth, OffsetDateTime::now_utc()) {
            return Ok(auth.clone());
        }
        if github_token.is_empty() {
            return Err(ProxyError::auth("copilot credential has no GitHub token")
                .with_status(401)
                .with_cause("copilot_auth_rejected"));
        }

        let url = format!("{GITHUB_API_BASE}{TOKEN_PATH}");
        let mut request_headers = Vec::new();
        headers::set_header(&mut request_headers, "authorization", &format!("token {github_token}"));
        headers::set_accept_json(&mut request_headers);
        headers::set_header(&mut request_headers, "editor-version", EDITOR_VERSION);
        headers::set_header(&mut request_headers, "editor-plugin-version", PLUGIN_VERSION);

        let transport = transport_of(&self.env);
        let proxy = self
            .env
            .proxy
            .resolve(auth.proxy_url.as_deref(), PROVIDER_NAME, host_of(&url));
        let response = transport
            .round_trip(
                proxy.as_deref(),
                TransportRequest {
                    method: "GET".to_string(),
                    url,
                    headers: request_headers,
                    body: None,
                    stream: false,
                },
            )
            .await
            .map_err(|err| {
                ProxyError::transient(format!("copilot token exchange: {err}"))
                    .with_cause("copilot_refresh_transient")
            })?;

        let status = response.status;
        let body = response.collect_body().await;
        if !(200..300).contains(&status) {
            return Err(classify_refresh_failure(
                status,
                &String::from_utf8_lossy(&body),
            ));
        }

        let payload: Value = serde_json::from_slice(&body).map_err(|err| {
            ProxyError::transient(format!("copilot token payload: {err}"))
                .with_cause("copilot_refresh_transient")
        })?;
        let token = payload
            .get("token")
            .and_then(Value::as_str)
            .filter(|token| !token.is_empty())
            .ok_or_else(|| {
                ProxyError::auth("copilot token exchange returned no token")
                    .with_status(401)
                    .with_cause("copilot_auth_rejected")
            })?;
        let expiry = payload
            .get("expires_at")
            .and_then(Value::as_i64)
            .and_then(|ts| OffsetDateTime::from_unix_timestamp(ts).ok());

        let mut updated = auth.clone();
        updated.storage = CredentialStorage::Copilot {
            github_token: github_token.clone(),
            copilot_token: Some(token.to_string()),
            copilot_token_expiry: expiry.or(*copilot_token_expiry),
            account_type: *account_type,
            username: username.clone(),
            email: email.clone(),
        };
        updated.last_refresh_at = Some(OffsetDateTime::now_utc());
        Ok(updated)
    }

    async fn count_tokens(
        &self,
        ctx: &RequestContext,
        _auth: &Credential,
    ) -> ProxyResult<ExecResponse> {
        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let count = tokens::count_request(&suffixes.base, &ctx.original_body)?;
        let body = llmux_translate::translate_token_count(ctx.source_dialect, count, None);
        Ok(ExecResponse::json(Bytes::from(body.to_string())))
    }

    async fn http_request(
        &self,
        auth: &Credential,
        req: HttpRequestSpec,
    ) -> ProxyResult<ExecResponse> {
        generic_http_request(
            &self.env,
            PROVIDER_NAME,
            auth,
            req.method,
            req.url,
            req.headers,
            req.body,
            |headers, auth| {
                if let CredentialStorage::Copilot {
                    copilot_token: Some(token),
                    ..
                } = &auth.storage
                {
                    headers::set_bearer(headers, token);
                    headers::set_header(headers, "copilot-integration-id", "vscode-chat");
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;

    fn credential(token: Option<&str>, expiry: Option<OffsetDateTime>) -> Credential {
        Credential::new(
            "cp",
            PROVIDER_NAME,
            CredentialStorage::Copilot {
                github_token: "gho_x".to_string(),
                copilot_token: token.map(str::to_string),
                copilot_token_expiry: expiry,
                account_type: AccountType::Individual,
                username: "octocat".to_string(),
                email: String::new(),
            },
        )
    }

    fn context(model: &str, body: Value) -> RequestContext {
        let (mut ctx, _handle) = RequestContext::new(Dialect::OpenAI, body);
        ctx.resolved_model = model.to_string();
        ctx.metadata.requested_model = format!("copilot-{model}");
        ctx
    }

    #[test]
    fn effort_alias_resolves_model_and_reasoning() {
        let executor = CopilotExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context(
            "gpt-5.2-xhigh",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        let auth = credential(Some("tid"), None);
        let call = executor.prepare(&ctx, &auth, false).unwrap();
        let body = call.body.unwrap();
        assert_eq!(body["model"], "gpt-5.2");
        assert_eq!(body["reasoning"]["effort"], "xhigh");
    }

    #[test]
    fn xhigh_downgrades_outside_gated_families() {
        let executor = CopilotExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context(
            "gpt-4o-xhigh",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        let auth = credential(Some("tid"), None);
        let call = executor.prepare(&ctx, &auth, false).unwrap();
        assert_eq!(call.body.unwrap()["reasoning"]["effort"], "high");
    }

    #[test]
    fn rejected_parameters_are_stripped() {
        let executor = CopilotExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context(
            "gpt-4o",
            json!({
                "messages": [{"role": "user", "content": "hi"}],
                "max_tokens": 128,
                "parallel_tool_calls": false,
            }),
        );
        let auth = credential(Some("tid"), None);
        let call = executor.prepare(&ctx, &auth, false).unwrap();
        let body = call.body.unwrap();
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("parallel_tool_calls").is_none());
    }

    #[test]
    fn missing_short_lived_token_is_an_auth_error() {
        let executor = CopilotExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context("gpt-4o", json!({"messages": []}));
        let auth = credential(None, None);
        let err = executor.prepare(&ctx, &auth, false).unwrap_err();
        assert_eq!(err.http_status(), 401);
    }

    #[test]
    fn freshness_window_is_sixty_seconds() {
        let now = datetime!(2026-08-01 10:00:00 UTC);
        let fresh = credential(Some("tid"), Some(now + Duration::from_secs(120)));
        let stale = credential(Some("tid"), Some(now + Duration::from_secs(30)));
        assert!(token_is_fresh(&fresh, now));
        assert!(!token_is_fresh(&stale, now));
        assert!(!token_is_fresh(&credential(None, None), now));
    }

    #[test]
    fn refresh_failures_carry_causes() {
        let err = classify_refresh_failure(403, "forbidden");
        assert_eq!(err.http_status(), 401);
        assert_eq!(err.cause, Some("copilot_auth_rejected"));

        let err = classify_refresh_failure(401, "no copilot subscription for user");
        assert_eq!(err.cause, Some("copilot_no_subscription"));

        let err = classify_refresh_failure(502, "bad gateway");
        assert_eq!(err.http_status(), 503);
        assert_eq!(err.cause, Some("copilot_upstream_error"));

        let err = classify_refresh_failure(418, "teapot");
        assert_eq!(err.cause, Some("copilot_refresh_transient"));
    }

    #[test]
    fn cached_reasoning_is_injected_for_gemini_models() {
        let executor = CopilotExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context(
            "gemini-2.5-pro",
            json!({"messages": [
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "thinking done"},
                {"role": "user", "content": "continue"},
            ]}),
        );
        let mut auth = credential(Some("tid"), None);
        auth.metadata.insert(
            "reasoning_opaque".to_string(),
            Value::String("blob".to_string()),
        );
        let call = executor.prepare(&ctx, &auth, false).unwrap();
        let messages = call.body.unwrap()["messages"].clone();
        let assistant = messages
            .as_array()
            .unwrap()
            .iter()
            .find(|m| m["role"] == "assistant")
            .unwrap();
        assert_eq!(assistant["reasoning_opaque"], "blob");
    }
}
