use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use llmux_common::{ProxyError, ProxyResult};
use llmux_protocol::Dialect;
use llmux_provider_core::{
    ChunkStream, Credential, ExecResponse, Executor, HttpRequestSpec, RequestContext,
};
use llmux_translate::{translate_request, translate_token_count};

use crate::effort::split_model_suffixes;
use crate::env::ExecutorEnv;
use crate::headers;
use crate::tokens;
use crate::upstream::{PreparedCall, run_nonstream, run_stream, strip_gpt5_temperature};

use super::{apply_payload_rules, apply_temperature_suffix, generic_http_request, missing_api_key};

const PROVIDER_NAME: &str = "openai";

/// Generic executor for OpenAI-compatible upstreams configured with a static
/// key and base URL.
pub struct OpenAICompatExecutor {
    env: Arc<ExecutorEnv>,
}

impl OpenAICompatExecutor {
    pub fn new(env: Arc<ExecutorEnv>) -> Self {
        Self { env }
    }

    fn prepare(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
        stream: bool,
    ) -> ProxyResult<PreparedCall> {
        let api_key = auth.api_key().ok_or_else(|| missing_api_key(PROVIDER_NAME))?;
        let base_url = auth
            .base_url()
            .map(str::to_string)
            .or_else(|| self.env.base_url_override(PROVIDER_NAME))
            .ok_or_else(|| {
                ProxyError::config("openai-compat credential has no base_url")
            })?;

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
            obj.insert(
                "reasoning_effort".to_string(),
                Value::String(effort.clone()),
            );
        }
        apply_temperature_suffix(ctx, &mut body);
        apply_payload_rules(&self.env, ctx, Dialect::OpenAI, &suffixes.base, &mut body);
        strip_gpt5_temperature(&suffixes.base, &mut body);

        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let mut call = PreparedCall::post_json(Dialect::OpenAI, url, body, stream);
        headers::set_bearer(&mut call.headers, api_key);
        headers::set_content_type_json(&mut call.headers);
        if stream {
            headers::set_accept_sse(&mut call.headers);
        } else {
            headers::set_accept_json(&mut call.headers);
        }
        if let llmux_provider_core::CredentialStorage::ApiKey { extra_headers, .. } = &auth.storage
        {
            for (name, value) in extra_headers {
                headers::set_header(&mut call.headers, name, value);
            }
        }
        Ok(call)
    }
}

#[async_trait]
impl Executor for OpenAICompatExecutor {
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

    async fn count_tokens(
        &self,
        ctx: &RequestContext,
        _auth: &Credential,
    ) -> ProxyResult<ExecResponse> {
        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let count = tokens::count_request(&suffixes.base, &ctx.original_body)?;
        let body = translate_token_count(ctx.source_dialect, count, None);
        Ok(ExecResponse::json(bytes::Bytes::from(body.to_string())))
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
                    headers::set_bearer(headers, key);
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

    fn env() -> Arc<ExecutorEnv> {
        Arc::new(ExecutorEnv::default())
    }

    fn credential() -> Credential {
        Credential::new(
            "test",
            PROVIDER_NAME,
            CredentialStorage::ApiKey {
                api_key: "sk-test".to_string(),
                base_url: Some("https://llm.example.com/v1".to_string()),
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
    fn prepare_builds_chat_url_and_bearer() {
        let executor = OpenAICompatExecutor::new(env());
        let ctx = context("gpt-4o", json!({"messages": [{"role": "user", "content": "hi"}]}));
        let call = executor.prepare(&ctx, &credential(), true).unwrap();
        assert_eq!(call.url, "https://llm.example.com/v1/chat/completions");
        assert!(
            call.headers
                .iter()
                .any(|(k, v)| k == "authorization" && v == "Bearer sk-test")
        );
        assert_eq!(call.body.as_ref().unwrap()["stream"], true);
    }

    #[test]
    fn gpt5_temperature_is_suppressed() {
        let executor = OpenAICompatExecutor::new(env());
        let ctx = context(
            "gpt-5.2",
            json!({"messages": [{"role": "user", "content": "hi"}], "temperature": 0.9}),
        );
        let call = executor.prepare(&ctx, &credential(), false).unwrap();
        assert!(call.body.as_ref().unwrap().get("temperature").is_none());
    }

    #[test]
    fn gpt5_temperature_suffix_is_also_suppressed() {
        let executor = OpenAICompatExecutor::new(env());
        let mut ctx = context(
            "gpt-5",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        ctx.metadata.temperature_suffix = Some(0.7);
        let call = executor.prepare(&ctx, &credential(), false).unwrap();
        assert!(call.body.as_ref().unwrap().get("temperature").is_none());
    }

    #[test]
    fn effort_alias_becomes_reasoning_effort() {
        let executor = OpenAICompatExecutor::new(env());
        let ctx = context(
            "o4-mini-high",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        let call = executor.prepare(&ctx, &credential(), false).unwrap();
        let body = call.body.unwrap();
        assert_eq!(body["model"], "o4-mini");
        assert_eq!(body["reasoning_effort"], "high");
    }

    #[test]
    fn temperature_suffix_lands_in_body() {
        let executor = OpenAICompatExecutor::new(env());
        let mut ctx = context(
            "gpt-4o",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        ctx.metadata.temperature_suffix = Some(0.7);
        let call = executor.prepare(&ctx, &credential(), false).unwrap();
        assert_eq!(call.body.unwrap()["temperature"], 0.7);
    }
}
