use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use bytes::Bytes;

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
use crate::upstream::{PreparedCall, run_nonstream, run_stream};

use super::{apply_payload_rules, apply_temperature_suffix, generic_http_request, missing_api_key};

const PROVIDER_NAME: &str = "chutes";
const DEFAULT_BASE_URL: &str = "https://llm.chutes.ai/v1";

/// Chutes advertises namespaced ids (`deepseek-ai/DeepSeek-V3.1`); the alias
/// map lets clients use the short tail. Rebuilt atomically on model-list
/// refresh; readers take the read lock.
#[derive(Default)]
pub struct AliasMap {
    inner: RwLock<HashMap<String, String>>,
}

impl AliasMap {
    pub fn resolve(&self, model: &str) -> Option<String> {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.get(model).cloned()
    }

    /// Replaces the whole map in one store.
    pub fn rebuild(&self, canonical_ids: &[String]) {
        let mut fresh = HashMap::new();
        for id in canonical_ids {
            if let Some((_, tail)) = id.split_once('/') {
                fresh.insert(tail.to_string(), id.clone());
            }
            fresh.insert(id.clone(), id.clone());
        }
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        *inner = fresh;
    }
}

/// Per-credential model-list cache; entries are evicted when the credential
/// is removed.
#[derive(Default)]
pub struct ModelCache {
    inner: RwLock<HashMap<String, Vec<String>>>,
}

impl ModelCache {
    pub fn put(&self, credential_id: &str, models: Vec<String>) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.insert(credential_id.to_string(), models);
    }

    pub fn get(&self, credential_id: &str) -> Option<Vec<String>> {
        let inner = self
            .inner
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.get(credential_id).cloned()
    }

    pub fn evict(&self, credential_id: &str) {
        let mut inner = self
            .inner
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        inner.remove(credential_id);
    }
}

pub struct ChutesExecutor {
    env: Arc<ExecutorEnv>,
    aliases: AliasMap,
    model_cache: ModelCache,
}

impl ChutesExecutor {
    pub fn new(env: Arc<ExecutorEnv>) -> Self {
        Self {
            env,
            aliases: AliasMap::default(),
            model_cache: ModelCache::default(),
        }
    }

    pub fn aliases(&self) -> &AliasMap {
        &self.aliases
    }

    /// Called after an upstream model-list fetch.
    pub fn refresh_models(&self, credential_id: &str, canonical_ids: Vec<String>) {
        self.aliases.rebuild(&canonical_ids);
        self.model_cache.put(credential_id, canonical_ids);
    }

    pub fn evict_credential(&self, credential_id: &str) {
        self.model_cache.evict(credential_id);
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
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        let suffixes = split_model_suffixes(&ctx.resolved_model);
        let canonical = self
            .aliases
            .resolve(&suffixes.base)
            .unwrap_or_else(|| suffixes.base.clone());

        let mut body = translate_request(
            ctx.source_dialect,
            Dialect::OpenAI,
            &canonical,
            &ctx.original_body,
            stream,
        )
        .map_err(|err| ProxyError::translation(err.to_string()))?;
        apply_temperature_suffix(ctx, &mut body);
        apply_payload_rules(&self.env, ctx, Dialect::OpenAI, &canonical, &mut body);

        let url = format!("{}/chat/completions", base_url.trim_end_matches('/'));
        let mut call = PreparedCall::post_json(Dialect::OpenAI, url, body, stream);
        headers::set_bearer(&mut call.headers, api_key);
        headers::set_content_type_json(&mut call.headers);
        if stream {
            headers::set_accept_sse(&mut call.headers);
        } else {
            headers::set_accept_json(&mut call.headers);
        }
        Ok(call)
    }
}

#[async_trait]
impl Executor for ChutesExecutor {
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
                if let Some(key) = auth.api_key() {
                    headers::set_bearer(headers, key);
                }
            },
        )
        .await
    }
}
