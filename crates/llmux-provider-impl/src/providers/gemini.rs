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

use crate::effort::split_model_suffixes;
use crate::env::ExecutorEnv;
use crate::headers;
use crate::upstream::{PreparedCall, run_nonstream, run_stream};

use super::{apply_payload_rules, generic_http_request, missing_api_key};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Google AI Studio (`generativelanguage`) executor. The Vertex executor
/// wraps the same call shape with bearer auth and a per-credential base URL.
pub struct GeminiExecutor {
    env: Arc<ExecutorEnv>,
    name: &'static str,
    bearer_auth: bool,
}

impl GeminiExecutor {
    pub fn new(env: Arc<ExecutorEnv>) -> Self {
        Self {
            env,
            name: "gemini",
            bearer_auth: false,
        }
    }

    fn base_url(&self, auth: &Credential) -> ProxyResult<String> {
        if let Some(url) = auth.base_url() {
            return Ok(url.trim_end_matches('/').to_string());
        }
        if let Some(url) = self.env.base_url_override(self.name) {
            return Ok(url.trim_end_matches('/').to_string());
        }
        if self.bearer_auth {
            // Vertex endpoints embed project and region; there is no
            // meaningful default.
            return Err(ProxyError::config("vertex credential has no base_url"));
        }
        Ok(DEFAULT_BASE_URL.to_string())
    }

    fn prepare(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
        stream: bool,
    ) -> ProxyResult<PreparedCall> {
        let api_key = auth.api_key().ok_or_else(|| missing_api_key(self.name))?;
        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let mut body = translate_request(
            ctx.source_dialect,
            Dialect::Gemini,
            &suffixes.base,
            &ctx.original_body,
            stream,
        )
        .map_err(|err| ProxyError::translation(err.to_string()))?;

        if let Some(thinking) = &suffixes.thinking {
            apply_thinking_config(&mut body, thinking);
        }
        if let Some(temperature) = ctx.metadata.temperature_suffix
            && let Some(config) = generation_config(&mut body)
        {
            config.insert(
                "temperature".to_string(),
                serde_json::Number::from_f64(temperature)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            );
        }
        apply_payload_rules(&self.env, ctx, Dialect::Gemini, &suffixes.base, &mut body);

        let verb = if stream {
            "streamGenerateContent"
        } else {
            "generateContent"
        };
        let mut url = format!(
            "{}/v1beta/models/{}:{verb}",
            self.base_url(auth)?,
            suffixes.base
        );
        if stream {
            url.push_str("?alt=sse");
        }

        let mut call = PreparedCall::post_json(Dialect::Gemini, url, body, stream);
        if self.bearer_auth {
            headers::set_bearer(&mut call.headers, api_key);
        } else {
            headers::set_header(&mut call.headers, "x-goog-api-key", api_key);
        }
        headers::set_content_type_json(&mut call.headers);
        Ok(call)
    }
}

fn generation_config(body: &mut Value) -> Option<&mut serde_json::Map<String, Value>> {
    let obj = body.as_object_mut()?;
    obj.entry("generationConfig".to_string())
        .or_insert_with(|| Value::Object(serde_json::Map::new()))
        .as_object_mut()
}

fn apply_thinking_config(body: &mut Value, thinking: &ThinkingValue) {
    let Some(config) = generation_config(body) else {
        return;
    };
    let thinking_config = match thinking {
        ThinkingValue::Budget(budget) => json!({"thinkingBudget": budget}),
        ThinkingValue::Level(level) => match level.as_str() {
            // -1 requests dynamic thinking; 0 disables it.
            "auto" => json!({"thinkingBudget": -1}),
            "none" => json!({"thinkingBudget": 0}),
            _ => json!({"thinkingBudget": -1}),
        },
    };
    config.insert("thinkingConfig".to_string(), thinking_config);
}

#[async_trait]
impl Executor for GeminiExecutor {
    fn identifier(&self) -> &'static str {
        self.name
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
    ) -> ProxyResult<ExecResponse> {
        let call = self.prepare(ctx, auth, false)?;
        run_nonstream(&self.env, self.name, ctx, auth, call).await
    }

    async fn execute_stream(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
    ) -> ProxyResult<ChunkStream> {
        let call = self.prepare(ctx, auth, true)?;
        run_stream(&self.env, self.name, ctx, auth, call).await
    }

    async fn count_tokens(
        &self,
        ctx: &RequestContext,
        _auth: &Credential,
    ) -> ProxyResult<ExecResponse> {
        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let count = crate::tokens::count_request(&suffixes.base, &ctx.original_body)?;
        let body = llmux_translate::translate_token_count(ctx.source_dialect, count, None);
        Ok(ExecResponse::json(Bytes::from(body.to_string())))
    }

    async fn http_request(
        &self,
        auth: &Credential,
        req: HttpRequestSpec,
    ) -> ProxyResult<ExecResponse> {
        let bearer = self.bearer_auth;
        generic_http_request(
            &self.env,
            self.name,
            auth,
            req.method,
            req.url,
            req.headers,
            req.body,
            move |headers, auth| {
                if let Some(key) = auth.api_key() {
                    if bearer {
                        headers::set_bearer(headers, key);
                    } else {
                        headers::set_header(headers, "x-goog-api-key", key);
                    }
                }
            },
        )
        .await
    }
}

/// Vertex AI executor: same wire dialect, bearer auth, mandatory base URL.
pub struct VertexExecutor;

impl VertexExecutor {
    #[allow(clippy::new_ret_no_self)]
    pub fn new(env: Arc<ExecutorEnv>) -> GeminiExecutor {
        GeminiExecutor {
            env,
            name: "vertex",
            bearer_auth: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_provider_core::CredentialStorage;
    use serde_json::json;

    fn credential(base_url: Option<&str>) -> Credential {
        Credential::new(
            "g",
            "gemini",
            CredentialStorage::ApiKey {
                api_key: "AIza-test".to_string(),
                base_url: base_url.map(str::to_string),
                extra_headers: Vec::new(),
            },
        )
    }

    fn context(model: &str) -> RequestContext {
        let (mut ctx, _handle) = RequestContext::new(
            Dialect::OpenAI,
            json!({"messages": [{"role": "user", "content": "hi"}]}),
        );
        ctx.resolved_model = model.to_string();
        ctx.metadata.requested_model = model.to_string();
        ctx
    }

    #[test]
    fn stream_url_uses_sse_alt() {
        let executor = GeminiExecutor::new(Arc::new(ExecutorEnv::default()));
        let call = executor
            .prepare(&context("gemini-2.5-pro"), &credential(None), true)
            .unwrap();
        assert_eq!(
            call.url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-pro:streamGenerateContent?alt=sse"
        );
        assert!(call.headers.iter().any(|(k, _)| k == "x-goog-api-key"));
    }

    #[test]
    fn thinking_suffix_becomes_thinking_config() {
        let executor = GeminiExecutor::new(Arc::new(ExecutorEnv::default()));
        let call = executor
            .prepare(&context("gemini-2.5-pro(8192)"), &credential(None), false)
            .unwrap();
        let body = call.body.unwrap();
        assert_eq!(
            body["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            8192
        );
        assert!(call.url.contains("gemini-2.5-pro:generateContent"));
    }

    #[test]
    fn auto_level_requests_dynamic_thinking() {
        let executor = GeminiExecutor::new(Arc::new(ExecutorEnv::default()));
        let call = executor
            .prepare(&context("gemini-2.5-pro(auto)"), &credential(None), false)
            .unwrap();
        assert_eq!(
            call.body.unwrap()["generationConfig"]["thinkingConfig"]["thinkingBudget"],
            -1
        );
    }

    #[test]
    fn vertex_requires_base_url_and_uses_bearer() {
        let executor = VertexExecutor::new(Arc::new(ExecutorEnv::default()));
        let err = executor
            .prepare(&context("gemini-2.5-pro"), &credential(None), false)
            .unwrap_err();
        assert!(err.to_string().contains("base_url"));

        let call = executor
            .prepare(
                &context("gemini-2.5-pro"),
                &credential(Some("https://us-central1-aiplatform.googleapis.com/v1/projects/p/locations/us-central1/publishers/google")),
                false,
            )
            .unwrap();
        assert!(call.headers.iter().any(|(k, v)| k == "authorization" && v.starts_with("Bearer ")));
    }
}
