use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;

use llmux_common::{ProxyError, ProxyResult};

use crate::context::RequestContext;
use crate::credential::Credential;

/// Translated response-chunk channel. Executors push client-dialect bytes;
/// a terminal error closes the stream.
pub type ChunkStream = tokio::sync::mpsc::Receiver<Result<Bytes, ProxyError>>;

#[derive(Debug, Clone)]
pub struct ExecResponse {
    pub status: u16,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl ExecResponse {
    pub fn json(body: Bytes) -> Self {
        Self {
            status: 200,
            headers: vec![("content-type".to_string(), "application/json".to_string())],
            body,
        }
    }
}

/// A raw upstream HTTP call on behalf of a credential, for passthrough
/// surfaces that bypass translation.
#[derive(Debug, Clone)]
pub struct HttpRequestSpec {
    pub method: String,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Bytes>,
}

/// The provider executor capability set. One implementation per provider;
/// the registry maps provider tag -> executor instance.
#[async_trait]
pub trait Executor: Send + Sync {
    fn identifier(&self) -> &'static str;

    /// Non-streaming execute: translate, call upstream, translate back.
    async fn execute(&self, ctx: &RequestContext, auth: &Credential)
    -> ProxyResult<ExecResponse>;

    /// Streaming execute: the returned channel yields client-dialect bytes.
    async fn execute_stream(
        &self,
        ctx: &RequestContext,
        auth: &Credential,
    ) -> ProxyResult<ChunkStream>;

    /// Provider-specific credential refresh; static-key providers return the
    /// credential unchanged.
    async fn refresh(&self, auth: &Credential) -> ProxyResult<Credential> {
        Ok(auth.clone())
    }

    async fn count_tokens(
        &self,
        _ctx: &RequestContext,
        _auth: &Credential,
    ) -> ProxyResult<ExecResponse> {
        Err(ProxyError::permanent("count_tokens not supported by this provider").with_status(404))
    }

    /// Raw upstream HTTP passthrough with the credential's auth applied.
    async fn http_request(
        &self,
        _auth: &Credential,
        _req: HttpRequestSpec,
    ) -> ProxyResult<ExecResponse> {
        Err(ProxyError::permanent("http passthrough not supported by this provider")
            .with_status(404))
    }
}

/// Provider tag -> executor instance.
#[derive(Default)]
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn Executor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, executor: Arc<dyn Executor>) {
        self.executors
            .insert(executor.identifier().to_string(), executor);
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn Executor>> {
        self.executors.get(provider).cloned()
    }

    pub fn providers(&self) -> Vec<String> {
        let mut names = self.executors.keys().cloned().collect::<Vec<_>>();
        names.sort();
        names
    }
}
