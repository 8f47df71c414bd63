use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use llmux_common::{ProxyError, ProxyResult};
use llmux_protocol::Dialect;
use llmux_provider_core::{
    ChunkStream, Credential, ExecResponse, Executor, HttpRequestSpec, RequestContext,
};
use llmux_translate::translate_request;

use crate::effort::split_model_suffixes;
use crate::env::ExecutorEnv;
use crate::headers;
use crate::tokens;
use crate::upstream::{PreparedCall, run_nonstream, run_stream, strip_gpt5_temperature};

use super::{apply_payload_rules, apply_temperature_suffix, generic_http_request, missing_api_key};

const PROVIDER_NAME: &str = "codex";
const DEFAULT_BASE_URL: &str = "https://chatgpt.com/backend-api/codex";

pub struct CodexExecutor {
    env: Arc<ExecutorEnv>,
}

impl CodexExecutor {
    pub fn new(env: Arc<ExecutorEnv>) -> Self {
        Self { env }
    }

    fn base_url(&self, auth: &Credential) -> String {
        auth.base_url()
            .map(str::to_string)
            .or_else(|| self.env.base_url_override(PROVIDER_NAME))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn prepare(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
        stream: bool,
    ) -> ProxyResult<PreparedCall> {
        let access_token = auth.api_key().ok_or_else(|| missing_api_key(PROVIDER_NAME))?;
        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let mut body = translate_request(
            ctx.source_dialect,
            Dialect::Codex,
            &suffixes.base,
            &ctx.original_body,
            stream,
        )
        .map_err(|err| ProxyError::translation(err.to_string()))?;

        if let Some(effort) = &suffixes.effort
            && let Some(obj) = body.as_object_mut()
        {
            obj.insert(
                "reasoning".to_string(),
                serde_json::json!({"effort": effort}),
            );
        }
        apply_temperature_suffix(ctx, &mut body);
        apply_payload_rules(&self.env, ctx, Dialect::Codex, &suffixes.base, &mut body);
        strip_gpt5_temperature(&suffixes.base, &mut body);
        apply_codex_quirks(&mut body, stream);

        let url = format!("{}/responses", self.base_url(auth).trim_end_matches('/'));
        let mut call = PreparedCall::post_json(Dialect::Codex, url, body, stream);
        headers::set_bearer(&mut call.headers, access_token);
        headers::set_content_type_json(&mut call.headers);
        if stream {
            headers::set_accept_sse(&mut call.headers);
        } else {
            headers::set_accept_json(&mut call.headers);
        }
        if let Some(account_id) = auth.attributes.get("account_id") {
            headers::set_header(&mut call.headers, "chatgpt-account-id", account_id);
        }
        Ok(call)
    }
}

/// Codex upstream requirements: explicit non-persistent responses, no max
/// tokens parameter, no stream_options, and a present `instructions` field.
fn apply_codex_quirks(body: &mut Value, stream: bool) {
    let Some(obj) = body.as_object_mut() else {
        return;
    };
    obj.insert("store".to_string(), Value::Bool(false));
    obj.remove("max_output_tokens");
    obj.remove("stream_options");
    if stream {
        obj.insert("stream".to_string(), Value::Bool(true));
    }
    if !obj.contains_key("instructions") {
        obj.insert("instructions".to_string(), Value::String(String::new()));
    }
}

#[async_trait]
impl Executor for CodexExecutor {
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

    /// Codex has no count endpoint; count locally.
    async fn count_tokens(
        &self,
        ctx: &RequestContext,
        _auth: &Credential,
    ) -> ProxyResult<ExecResponse> {
        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let count = tokens::count_request(&suffixes.base, &ctx.original_body)?;
        let body = llmux_translate::translate_token_count(ctx.source_dialect, count, None);
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
                if let Some(token) = auth.api_key() {
                    headers::set_bearer(headers, token);
                }
                if let Some(account_id) = auth.attributes.get("account_id") {
                    headers::set_header(headers, "chatgpt-account-id", account_id);
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
        let mut cred = Credential::new(
            "cx",
            PROVIDER_NAME,
            CredentialStorage::ApiKey {
                api_key: "token".to_string(),
                base_url: None,
                extra_headers: Vec::new(),
            },
        );
        cred.attributes
            .insert("account_id".to_string(), "acct_1".to_string());
        cred
    }

    fn context(model: &str, body: Value) -> RequestContext {
        let (mut ctx, _handle) = RequestContext::new(Dialect::OpenAI, body);
        ctx.resolved_model = model.to_string();
        ctx.metadata.requested_model = model.to_string();
        ctx
    }

    #[test]
    fn quirks_are_applied() {
        let executor = CodexExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context(
            "gpt-5.2",
            json!({"messages": [{"role": "user", "content": "hi"}], "max_tokens": 100}),
        );
        let call = executor.prepare(&ctx, &credential(), true).unwrap();
        let body = call.body.unwrap();
        assert_eq!(body["store"], false);
        assert!(body.get("max_output_tokens").is_none());
        assert!(body.get("stream_options").is_none());
        assert_eq!(body["stream"], true);
        assert!(body.get("instructions").is_some());
        assert_eq!(call.url, "https://chatgpt.com/backend-api/codex/responses");
        assert!(
            call.headers
                .iter()
                .any(|(k, v)| k == "chatgpt-account-id" && v == "acct_1")
        );
    }

    #[test]
    fn effort_suffix_sets_reasoning() {
        let executor = CodexExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context(
            "gpt-5-high",
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        let call = executor.prepare(&ctx, &credential(), false).unwrap();
        let body = call.body.unwrap();
        assert_eq!(body["model"], "gpt-5");
        assert_eq!(body["reasoning"]["effort"], "high");
    }

    #[test]
    fn gpt5_never_sends_temperature() {
        let executor = CodexExecutor::new(Arc::new(ExecutorEnv::default()));
        let mut ctx = context(
            "gpt-5.2",
            json!({"messages": [{"role": "user", "content": "hi"}], "temperature": 1.0}),
        );
        ctx.metadata.temperature_suffix = Some(0.3);
        let call = executor.prepare(&ctx, &credential(), false).unwrap();
        assert!(call.body.unwrap().get("temperature").is_none());
    }

    #[test]
    fn system_messages_ride_instructions_for_the_reframer() {
        let executor = CodexExecutor::new(Arc::new(ExecutorEnv::default()));
        let ctx = context(
            "gpt-5",
            json!({"messages": [
                {"role": "system", "content": "follow the plan"},
                {"role": "user", "content": "hi"},
            ]}),
        );
        let call = executor.prepare(&ctx, &credential(), true).unwrap();
        assert_eq!(call.body.unwrap()["instructions"], "follow the plan");
    }
}
