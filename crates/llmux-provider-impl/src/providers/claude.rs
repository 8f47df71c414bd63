use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::{Value, json};

use llmux_common::{ProxyError, ProxyResult};
use llmux_protocol::Dialect;
use llmux_provider_core::{
    ChunkStream, Credential, ExecResponse, Executor, HttpRequestSpec, RequestContext,
    ThinkingValue,
};
use llmux_translate::translate_request;

use crate::client::host_of;
use crate::effort::split_model_suffixes;
use crate::env::ExecutorEnv;
use crate::headers;
use crate::transport::TransportRequest;
use crate::upstream::{
    PreparedCall, failure_from_response, run_nonstream, run_stream, send_with_retry, transport_of,
};

use super::{apply_payload_rules, apply_temperature_suffix, generic_http_request, missing_api_key};

const PROVIDER_NAME: &str = "claude";
const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";

pub struct ClaudeExecutor {
    env: Arc<ExecutorEnv>,
}

impl ClaudeExecutor {
    pub fn new(env: Arc<ExecutorEnv>) -> Self {
        Self { env }
    }

    fn base_url(&self, auth: &Credential) -> String {
        auth.base_url()
            .map(str::to_string)
            .or_else(|| self.env.base_url_override(PROVIDER_NAME))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn base_headers(&self, auth: &Credential) -> ProxyResult<Vec<(String, String)>> {
        let api_key = auth.api_key().ok_or_else(|| missing_api_key(PROVIDER_NAME))?;
        let mut out = Vec::new();
        headers::set_header(&mut out, "x-api-key", api_key);
        headers::set_header(&mut out, "anthropic-version", ANTHROPIC_VERSION);
        headers::set_content_type_json(&mut out);
        if let llmux_provider_core::CredentialStorage::ApiKey { extra_headers, .. } = &auth.storage
        {
            for (name, value) in extra_headers {
                headers::set_header(&mut out, name, value);
            }
        }
        Ok(out)
    }

    fn prepare(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
        stream: bool,
    ) -> ProxyResult<PreparedCall> {
        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let mut body = translate_request(
            ctx.source_dialect,
            Dialect::Claude,
            &suffixes.base,
            &ctx.original_body,
            stream,
        )
        .map_err(|err| ProxyError::translation(err.to_string()))?;

        // The thinking suffix maps onto Anthropic's extended-thinking knob.
        if let Some(thinking) = &suffixes.thinking
            && let Some(obj) = body.as_object_mut()
        {
            match thinking {
                ThinkingValue::Budget(budget) if *budget > 0 => {
                    obj.insert(
                        "thinking".to_string(),
                        json!({"type": "enabled", "budget_tokens": budget}),
                    );
                }
                ThinkingValue::Level(level) if level == "none" => {
                    obj.remove("thinking");
                }
                _ => {}
            }
        }
        apply_temperature_suffix(ctx, &mut body);
        apply_payload_rules(&self.env, ctx, Dialect::Claude, &suffixes.base, &mut body);

        let url = format!("{}/v1/messages", self.base_url(auth).trim_end_matches('/'));
        let mut call = PreparedCall::post_json(Dialect::Claude, url, body, stream);
        call.headers = self.base_headers(auth)?;
        if stream {
            headers::set_accept_sse(&mut call.headers);
        } else {
            headers::set_accept_json(&mut call.headers);
        }
        Ok(call)
    }
}

#[async_trait]
impl Executor for ClaudeExecutor {
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

    /// Anthropic has a first-class count endpoint; use it.
    async fn count_tokens(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
    ) -> ProxyResult<ExecResponse> {
        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let body = translate_request(
            ctx.source_dialect,
            Dialect::Claude,
            &suffixes.base,
            &ctx.original_body,
            false,
        )
        .map_err(|err| ProxyError::translation(err.to_string()))?;

        let url = format!(
            "{}/v1/messages/count_tokens",
            self.base_url(auth).trim_end_matches('/')
        );
        let mut request_headers = self.base_headers(auth)?;
        headers::set_accept_json(&mut request_headers);

        let transport = transport_of(&self.env);
        let proxy = self
            .env
            .proxy
            .resolve(auth.proxy_url.as_deref(), PROVIDER_NAME, host_of(&url));
        let response = send_with_retry(
            transport.as_ref(),
            proxy.as_deref(),
            &self.env.retry_plan(PROVIDER_NAME),
            &ctx.cancel,
            self.env.request_timeout(PROVIDER_NAME),
            TransportRequest {
                method: "POST".to_string(),
                url,
                headers: request_headers,
                body: Some(Bytes::from(body.to_string())),
                stream: false,
            },
        )
        .await?;

        let status = response.status;
        let resp_headers = response.headers.clone();
        let payload = response.collect_body().await;
        if !(200..300).contains(&status) {
            return Err(failure_from_response(status, &resp_headers, &payload));
        }
        let value: Value = serde_json::from_slice(&payload)
            .map_err(|err| ProxyError::transient(format!("count_tokens body: {err}")))?;
        let count = value
            .get("input_tokens")
            .and_then(Value::as_i64)
            .unwrap_or(0);
        let shaped =
            llmux_translate::translate_token_count(ctx.source_dialect, count, Some(&value));
        Ok(ExecResponse::json(Bytes::from(shaped.to_string())))
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
                if let Some(key) = auth.api_key() {
                    headers::set_header(headers, "x-api-key", key);
                    headers::set_header(headers, "anthropic-version", ANTHROPIC_VERSION);
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_provider_core::CredentialStorage;
    use serde_json::json;

    fn credential() -> Credential {
        Credential::new(
            "c",
            PROVIDER_NAME,
            CredentialStorage::ApiKey {
                api_key: "sk-ant".to_string(),
                base_url: None,
                extra_headers: Vec::new(),
            },
        )
    }

    fn context(model: &str, body: Value) -> RequestContext {
        let (mut ctx, _handle) = RequestContext::new(Dialect::OpenAI, body);
        ctx.resolved_model = model.to_string();
        ctx.metadata.requested_model = model.to_string();
        ctx
    }

    #[test]
    fn thinking_budget_suffix_maps_to_thinking_config() {
        let executor = ClaudeExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context(
            "claude-sonnet-4-5(16384)",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        let call = executor.prepare(&ctx, &credential(), false).unwrap();
        let body = call.body.unwrap();
        assert_eq!(body["model"], "claude-sonnet-4-5");
        assert_eq!(body["thinking"]["budget_tokens"], 16384);
        assert_eq!(call.url, "https://api.anthropic.com/v1/messages");
    }

    #[test]
    fn temperature_suffix_reaches_upstream_body() {
        let executor = ClaudeExecutor::new(Arc::new(ExecutorEnv::default()));
        let mut ctx = context(
            "claude-sonnet-4-5(16384)",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        ctx.metadata.temperature_suffix = Some(0.7);
        let call = executor.prepare(&ctx, &credential(), false).unwrap();
        let body = call.body.unwrap();
        assert_eq!(body["temperature"], 0.7);
        assert_eq!(body["model"], "claude-sonnet-4-5");
    }

    #[test]
    fn api_key_header_is_applied() {
        let executor = ClaudeExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context(
            "claude-sonnet-4-5",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        let call = executor.prepare(&ctx, &credential(), true).unwrap();
        assert!(call.headers.iter().any(|(k, v)| k == "x-api-key" && v == "sk-ant"));
        assert!(
            call.headers
                .iter()
                .any(|(k, v)| k == "anthropic-version" && v == ANTHROPIC_VERSION)
        );
    }
}
