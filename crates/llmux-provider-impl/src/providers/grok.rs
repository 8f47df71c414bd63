use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use llmux_common::{ErrorKind, ProxyError, ProxyResult};
use llmux_protocol::Dialect;
use llmux_provider_core::{
    ChunkStream, Credential, CredentialStorage, ExecResponse, Executor, HttpRequestSpec,
    RequestContext,
};
use llmux_translate::translate_request;

use crate::effort::split_model_suffixes;
use crate::env::ExecutorEnv;
use crate::headers;
use crate::tokens;
use crate::upstream::{PreparedCall, run_nonstream, run_stream};

use super::{apply_payload_rules, generic_http_request};

const PROVIDER_NAME: &str = "grok";
const BASE_URL: &str = "https://grok.com";
const CONVERSATION_PATH: &str = "/rest/app-chat/conversations/new";
const RATE_LIMIT_RETRY: Duration = Duration::from_secs(30);
const BROWSER_UA: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// Grok web-session executor. Auth is a cookie pair (`sso` JWT plus the
/// Cloudflare clearance); there is no proactive refresh.
pub struct GrokExecutor {
    env: Arc<ExecutorEnv>,
}

impl GrokExecutor {
    pub fn new(env: Arc<ExecutorEnv>) -> Self {
        Self { env }
    }

    fn prepare(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
        stream: bool,
    ) -> ProxyResult<PreparedCall> {
        let CredentialStorage::Grok {
            sso_token,
            cf_clearance,
            ..
        } = &auth.storage
        else {
            return Err(ProxyError::internal("expected a grok credential"));
        };

        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let mut body = translate_request(
            ctx.source_dialect,
            Dialect::Grok,
            &suffixes.base,
            &ctx.original_body,
            stream,
        )
        .map_err(|err| ProxyError::translation(err.to_string()))?;
        apply_payload_rules(&self.env, ctx, Dialect::Grok, &suffixes.base, &mut body);

        let base = self
            .env
            .base_url_override(PROVIDER_NAME)
            .unwrap_or_else(|| BASE_URL.to_string());
        let url = format!("{}{CONVERSATION_PATH}", base.trim_end_matches('/'));

        let mut call = PreparedCall::post_json(Dialect::Grok, url, body, stream);
        let mut cookie = format!("sso={sso_token}");
        if !cf_clearance.is_empty() {
            cookie.push_str(&format!("; cf_clearance={cf_clearance}"));
        }
        headers::set_header(&mut call.headers, "cookie", &cookie);
        headers::set_header(&mut call.headers, "user-agent", BROWSER_UA);
        headers::set_header(&mut call.headers, "origin", BASE_URL);
        headers::set_header(&mut call.headers, "referer", &format!("{BASE_URL}/"));
        headers::set_content_type_json(&mut call.headers);
        headers::set_accept_json(&mut call.headers);
        Ok(call)
    }
}

/// Grok-specific error surfacing: 403 means Cloudflare got in the way, and
/// 429 carries a fixed 30-second retry hint.
pub fn map_grok_error(err: ProxyError) -> ProxyError {
    match err.upstream_status {
        Some(403) => ProxyError::auth("Cloudflare blocked — update cf_clearance or use proxy")
            .with_status(403),
        Some(429) => ProxyError {
            kind: ErrorKind::UpstreamTransient,
            message: "grok rate limit reached".to_string(),
            upstream_status: Some(429),
            retry_after: Some(RATE_LIMIT_RETRY),
            cause: None,
        },
        _ => err,
    }
}

#[async_trait]
impl Executor for GrokExecutor {
    fn identifier(&self) -> &'static str {
        PROVIDER_NAME
    }

    async fn execute(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
    ) -> ProxyResult<ExecResponse> {
        let call = self.prepare(ctx, auth, false)?;
        run_nonstream(&self.env, PROVIDER_NAME, ctx, auth, call)
            .await
            .map_err(map_grok_error)
    }

    async fn execute_stream(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
    ) -> ProxyResult<ChunkStream> {
        let call = self.prepare(ctx, auth, true)?;
        run_stream(&self.env, PROVIDER_NAME, ctx, auth, call)
            .await
            .map_err(map_grok_error)
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
                if let CredentialStorage::Grok {
                    sso_token,
                    cf_clearance,
                    ..
                } = &auth.storage
                {
                    let mut cookie = format!("sso={sso_token}");
                    if !cf_clearance.is_empty() {
                        cookie.push_str(&format!("; cf_clearance={cf_clearance}"));
                    }
                    headers::set_header(headers, "cookie", &cookie);
                    headers::set_header(headers, "user-agent", BROWSER_UA);
                }
            },
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_provider_core::GrokTokenType;
    use serde_json::json;

    fn credential() -> Credential {
        Credential::new(
            "gk",
            PROVIDER_NAME,
            CredentialStorage::Grok {
                sso_token: "jwt-token".to_string(),
                cf_clearance: "cf-cookie".to_string(),
                token_type: GrokTokenType::Normal,
                remaining_queries: -1,
                heavy_remaining_queries: -1,
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
    fn cookies_and_browser_headers_are_set() {
        let executor = GrokExecutor::new(Arc::new(ExecutorEnv::default()));
        let call = executor.prepare(&context("grok-4"), &credential(), true).unwrap();
        assert_eq!(call.url, "https://grok.com/rest/app-chat/conversations/new");
        let cookie = call
            .headers
            .iter()
            .find(|(k, _)| k == "cookie")
            .map(|(_, v)| v.as_str())
            .unwrap();
        assert!(cookie.contains("sso=jwt-token"));
        assert!(cookie.contains("cf_clearance=cf-cookie"));
        assert_eq!(call.body.as_ref().unwrap()["modelName"], "grok-4");
    }

    #[test]
    fn cloudflare_block_surfaces_actionable_message() {
        let err = map_grok_error(ProxyError::auth("denied").with_status(403));
        assert!(err.to_string().contains("cf_clearance"));
        assert_eq!(err.http_status(), 403);
    }

    #[test]
    fn rate_limit_carries_thirty_second_hint() {
        let err = map_grok_error(ProxyError::transient("slow down").with_status(429));
        assert_eq!(err.retry_after, Some(Duration::from_secs(30)));
        assert_eq!(err.http_status(), 429);
    }

    #[test]
    fn other_errors_pass_through() {
        let err = map_grok_error(ProxyError::transient("boom").with_status(500));
        assert_eq!(err.http_status(), 500);
    }
}
