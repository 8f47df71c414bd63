use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde_json::{Value, json};
use tokio::sync::mpsc;
use tracing::{info, warn};

use llmux_common::{ErrorKind, ProxyError, ProxyResult};
use llmux_protocol::Dialect;
use llmux_provider_core::{
    CancelHandle, ChunkStream, Credential, ExecutorRegistry, ModelRegistry, RequestContext,
};

use crate::manager::{AuthManager, Outcome};
use crate::router::resolve_model;

/// One classified inbound request, as handed over by the HTTP layer.
#[derive(Debug, Clone)]
pub struct InboundRequest {
    pub dialect: Dialect,
    pub body: Value,
    pub requested_model: String,
    pub stream: bool,
    pub pinned_auth_id: Option<String>,
}

#[derive(Debug)]
pub enum DispatchReply {
    Buffered {
        status: u16,
        headers: Vec<(String, String)>,
        body: Bytes,
    },
    /// Channel of pre-framed bytes; used for SSE and for keepalive-padded
    /// non-streaming responses.
    Streaming {
        rx: mpsc::Receiver<Result<Bytes, ProxyError>>,
    },
}

/// Drives one request end-to-end: router -> auth manager -> executor ->
/// framer -> client.
pub struct Dispatcher {
    registry: Arc<ModelRegistry>,
    executors: Arc<ExecutorRegistry>,
    auth: Arc<AuthManager>,
    bootstrap_retries: u32,
    nonstream_keepalive: Option<Duration>,
    stream_keepalive: Option<Duration>,
}

impl Dispatcher {
    pub fn new(
        registry: Arc<ModelRegistry>,
        executors: Arc<ExecutorRegistry>,
        auth: Arc<AuthManager>,
        bootstrap_retries: u32,
        nonstream_keepalive: Option<Duration>,
        stream_keepalive: Option<Duration>,
    ) -> Self {
        Self {
            registry,
            executors,
            auth,
            bootstrap_retries,
            nonstream_keepalive,
            stream_keepalive,
        }
    }

    pub fn registry(&self) -> &Arc<ModelRegistry> {
        &self.registry
    }

    pub async fn dispatch(
        &self,
        inbound: InboundRequest,
    ) -> (ProxyResult<DispatchReply>, CancelHandle) {
        let (mut ctx, cancel_handle) = RequestContext::new(inbound.dialect, inbound.body);
        ctx.trace_id = uuid::Uuid::new_v4().to_string();
        ctx.stream = inbound.stream;
        ctx.pinned_auth_id = inbound.pinned_auth_id;

        let decision = match resolve_model(&self.registry, &inbound.requested_model) {
            Ok(decision) => decision,
            Err(err) => return (Err(err), cancel_handle),
        };
        ctx.resolved_model = decision.resolved_model.clone();
        ctx.requested_model = inbound.requested_model.clone();
        ctx.metadata = decision.metadata;

        info!(
            event = "request_routed",
            trace_id = %ctx.trace_id,
            dialect = %ctx.source_dialect,
            requested = %inbound.requested_model,
            resolved = %ctx.resolved_model,
            providers = ?decision.providers,
            stream = ctx.stream,
        );

        let result = if ctx.stream {
            self.dispatch_stream(&ctx, &decision.providers).await
        } else {
            self.dispatch_nonstream(&ctx, &decision.providers).await
        };
        (result, cancel_handle)
    }

    /// First provider with a registered executor wins; the router already
    /// ordered the candidates.
    fn select_provider(&self, providers: &[String]) -> ProxyResult<String> {
        providers
            .iter()
            .find(|provider| self.executors.get(provider).is_some())
            .cloned()
            .ok_or_else(|| {
                ProxyError::internal(format!("no executor for any of {providers:?}"))
            })
    }

    async fn acquire(
        &self,
        ctx: &RequestContext,
        provider: &str,
        exclude: &[String],
    ) -> ProxyResult<Credential> {
        let picked = self.auth.pick(
            provider,
            &ctx.metadata.requested_model,
            ctx.pinned_auth_id.as_deref(),
            exclude,
        )?;
        self.auth.refresh_if_needed(&picked).await
    }

    async fn dispatch_nonstream(
        &self,
        ctx: &RequestContext,
        providers: &[String],
    ) -> ProxyResult<DispatchReply> {
        let provider = self.select_provider(providers)?;
        let executor = self
            .executors
            .get(&provider)
            .ok_or_else(|| ProxyError::internal("executor vanished after selection"))?;
        let credential = self.acquire(ctx, &provider, &[]).await?;

        // Keepalive-padded variant keeps intermediaries from timing out
        // while the upstream call is in flight, for dialects that tolerate
        // leading blank lines before the JSON document.
        if let Some(interval) = self.nonstream_keepalive
            && ctx.source_dialect.tolerates_nonstream_keepalive()
        {
            let (tx, rx) = mpsc::channel::<Result<Bytes, ProxyError>>(4);
            let auth_manager = self.auth.clone();
            let ctx = ctx.clone();
            tokio::spawn(async move {
                let call = executor.execute(&ctx, &credential);
                tokio::pin!(call);
                let result = loop {
                    tokio::select! {
                        result = &mut call => break result,
                        _ = tokio::time::sleep(interval) => {
                            if tx.send(Ok(Bytes::from_static(b"\n"))).await.is_err() {
                                break Err(ProxyError::cancelled());
                            }
                        }
                        _ = ctx.cancel.cancelled() => break Err(ProxyError::cancelled()),
                    }
                };
                match result {
                    Ok(response) => {
                        auth_manager.report(&credential.id, Outcome::Success);
                        let _ = tx.send(Ok(response.body)).await;
                    }
                    Err(err) => {
                        if let Some(outcome) = outcome_of(&err) {
                            auth_manager.report(&credential.id, outcome);
                        }
                        // The 200 header is already on the wire; the error
                        // document is all that can still be said.
                        let _ = tx.send(Ok(Bytes::from(error_document(&err).to_string()))).await;
                    }
                }
            });
            return Ok(DispatchReply::Streaming { rx });
        }

        match executor.execute(ctx, &credential).await {
            Ok(response) => {
                self.auth.report(&credential.id, Outcome::Success);
                Ok(DispatchReply::Buffered {
                    status: response.status,
                    headers: response.headers,
                    body: response.body,
                })
            }
            Err(err) => {
                if let Some(outcome) = outcome_of(&err) {
                    self.auth.report(&credential.id, outcome);
                }
                Err(err)
            }
        }
    }

    /// Count-tokens path: same routing and credential acquisition, then the
    /// executor's count capability.
    pub async fn dispatch_count(&self, inbound: InboundRequest) -> ProxyResult<DispatchReply> {
        let (mut ctx, _cancel) = RequestContext::new(inbound.dialect, inbound.body);
        ctx.trace_id = uuid::Uuid::new_v4().to_string();
        ctx.pinned_auth_id = inbound.pinned_auth_id;

        let decision = resolve_model(&self.registry, &inbound.requested_model)?;
        ctx.resolved_model = decision.resolved_model;
        ctx.requested_model = inbound.requested_model;
        ctx.metadata = decision.metadata;

        let provider = self.select_provider(&decision.providers)?;
        let executor = self
            .executors
            .get(&provider)
            .ok_or_else(|| ProxyError::internal("executor vanished after selection"))?;
        let credential = self.acquire(&ctx, &provider, &[]).await?;
        let response = executor.count_tokens(&ctx, &credential).await?;
        Ok(DispatchReply::Buffered {
            status: response.status,
            headers: response.headers,
            body: response.body,
        })
    }

    /// Streaming: bootstrap retries apply only before any byte has been
    /// forwarded. The connect phase runs inline so pre-stream failures still
    /// produce a regular HTTP error response.
    async fn dispatch_stream(
        &self,
        ctx: &RequestContext,
        providers: &[String],
    ) -> ProxyResult<DispatchReply> {
        let provider = self.select_provider(providers)?;
        let executor = self
            .executors
            .get(&provider)
            .ok_or_else(|| ProxyError::internal("executor vanished after selection"))?;

        let mut tried: Vec<String> = Vec::new();
        let mut last_err: Option<ProxyError> = None;

        for attempt in 0..=self.bootstrap_retries {
            let credential = match self.acquire(ctx, &provider, &tried).await {
                Ok(credential) => credential,
                Err(err) => {
                    // No further credentials to rotate onto.
                    return Err(last_err.unwrap_or(err));
                }
            };
            tried.push(credential.id.clone());

            match executor.execute_stream(ctx, &credential).await {
                Ok(upstream) => {
                    return Ok(self.forward_stream(ctx, credential, upstream));
                }
                Err(err) => {
                    if let Some(outcome) = outcome_of(&err) {
                        self.auth.report(&credential.id, outcome);
                    }
                    warn!(
                        event = "stream_bootstrap_failed",
                        trace_id = %ctx.trace_id,
                        provider = %provider,
                        credential_id = %credential.id,
                        attempt,
                        error = %err,
                    );
                    if err.kind == ErrorKind::Cancelled {
                        return Err(err);
                    }
                    last_err = Some(err);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| ProxyError::internal("stream bootstrap loop fell through")))
    }

    /// Forwards upstream frames to the client. Once any byte has been
    /// written, errors are terminal and framed as a well-formed
    /// `event: error` block (plus `[DONE]` where the dialect uses it).
    fn forward_stream(
        &self,
        ctx: &RequestContext,
        credential: Credential,
        mut upstream: ChunkStream,
    ) -> DispatchReply {
        let (tx, rx) = mpsc::channel::<Result<Bytes, ProxyError>>(16);
        let auth_manager = self.auth.clone();
        let cancel = ctx.cancel.clone();
        let dialect = ctx.source_dialect;
        let keepalive = self.stream_keepalive;

        tokio::spawn(async move {
            let mut outcome = Outcome::Success;
            loop {
                let next = tokio::select! {
                    next = upstream.recv() => next,
                    _ = cancel.cancelled() => {
                        outcome = Outcome::Cancelled;
                        break;
                    }
                    _ = keepalive_tick(keepalive) => {
                        if tx.send(Ok(Bytes::from_static(b": keepalive\n\n"))).await.is_err() {
                            outcome = Outcome::Cancelled;
                            break;
                        }
                        continue;
                    }
                };
                match next {
                    Some(Ok(bytes)) => {
                        if tx.send(Ok(bytes)).await.is_err() {
                            outcome = Outcome::Cancelled;
                            break;
                        }
                    }
                    Some(Err(err)) => {
                        if let Some(observed) = outcome_of(&err) {
                            outcome = observed;
                        }
                        let _ = tx.send(Ok(error_event(dialect, &err))).await;
                        break;
                    }
                    None => break,
                }
            }
            auth_manager.report(&credential.id, outcome);
        });

        DispatchReply::Streaming { rx }
    }
}

async fn keepalive_tick(period: Option<Duration>) {
    match period {
        Some(period) => tokio::time::sleep(period).await,
        None => std::future::pending().await,
    }
}

/// Permanent 4xx and internal errors are not attributable to the
/// credential and report nothing.
fn outcome_of(err: &ProxyError) -> Option<Outcome> {
    match err.kind {
        ErrorKind::Auth => Some(Outcome::AuthFailure),
        ErrorKind::UpstreamTransient => Some(Outcome::Transient {
            retry_after: err.retry_after,
        }),
        ErrorKind::Cancelled => Some(Outcome::Cancelled),
        _ => None,
    }
}

pub fn error_document(err: &ProxyError) -> Value {
    json!({
        "error": {
            "message": err.to_string(),
            "type": format!("{:?}", err.kind),
            "code": err.http_status(),
        }
    })
}

/// A single well-formed error block; never an empty event.
fn error_event(dialect: Dialect, err: &ProxyError) -> Bytes {
    let mut out = format!("event: error\ndata: {}\n\n", error_document(err));
    if dialect.uses_done_marker() {
        out.push_str("data: [DONE]\n\n");
    }
    Bytes::from(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use llmux_provider_core::{
        CredentialStatus, CredentialStorage, CredentialStore, ExecResponse, Executor,
        ModelInfo,
    };
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Scripted executor: fails the first N stream bootstraps, then streams
    /// the given frames.
    struct ScriptedExecutor {
        fail_first: u32,
        calls: AtomicU32,
        used_credentials: Mutex<Vec<String>>,
    }

    impl ScriptedExecutor {
        fn new(fail_first: u32) -> Self {
            Self {
                fail_first,
                calls: AtomicU32::new(0),
                used_credentials: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl Executor for ScriptedExecutor {
        fn identifier(&self) -> &'static str {
            "claude"
        }

        async fn execute(
            &self,
            _ctx: &RequestContext,
            _auth: &Credential,
        ) -> ProxyResult<ExecResponse> {
            Ok(ExecResponse::json(Bytes::from_static(b"{\"ok\":true}")))
        }

        async fn execute_stream(
            &self,
            _ctx: &RequestContext,
            auth: &Credential,
        ) -> ProxyResult<ChunkStream> {
            self.used_credentials.lock().unwrap().push(auth.id.clone());
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(ProxyError::transient("connect refused").with_status(503));
            }
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                let _ = tx.send(Ok(Bytes::from_static(b"data: {\"x\":1}\n\n"))).await;
                let _ = tx.send(Ok(Bytes::from_static(b"data: [DONE]\n\n"))).await;
            });
            Ok(rx)
        }
    }

    fn fixture(
        executor: Arc<dyn Executor>,
        credentials: &[&str],
        bootstrap_retries: u32,
    ) -> (Dispatcher, Arc<CredentialStore>) {
        let registry = Arc::new(ModelRegistry::new());
        registry.register_client(
            "seed",
            "claude",
            vec![ModelInfo::new("claude-sonnet-4-5", "claude")],
        );
        let mut executors = ExecutorRegistry::new();
        executors.register(executor);
        let executors = Arc::new(executors);
        let store = Arc::new(CredentialStore::new());
        for id in credentials {
            store.register(Credential::new(
                *id,
                "claude",
                CredentialStorage::ApiKey {
                    api_key: "sk".to_string(),
                    base_url: None,
                    extra_headers: Vec::new(),
                },
            ));
        }
        let auth = Arc::new(AuthManager::new(store.clone(), executors.clone(), false));
        (
            Dispatcher::new(registry, executors, auth, bootstrap_retries, None, None),
            store,
        )
    }

    fn inbound(stream: bool) -> InboundRequest {
        InboundRequest {
            dialect: Dialect::OpenAI,
            body: json!({"messages": [{"role": "user", "content": "hi"}]}),
            requested_model: "claude-sonnet-4-5".to_string(),
            stream,
            pinned_auth_id: None,
        }
    }

    async fn drain(rx: &mut mpsc::Receiver<Result<Bytes, ProxyError>>) -> String {
        let mut out = String::new();
        while let Some(item) = rx.recv().await {
            match item {
                Ok(bytes) => out.push_str(&String::from_utf8_lossy(&bytes)),
                Err(err) => out.push_str(&format!("<err {err}>")),
            }
        }
        out
    }

    #[tokio::test]
    async fn nonstream_returns_buffered_json() {
        let (dispatcher, _store) = fixture(Arc::new(ScriptedExecutor::new(0)), &["c1"], 0);
        let (reply, _cancel) = dispatcher.dispatch(inbound(false)).await;
        match reply.unwrap() {
            DispatchReply::Buffered { status, body, .. } => {
                assert_eq!(status, 200);
                assert_eq!(&body[..], b"{\"ok\":true}");
            }
            _ => panic!("expected buffered reply"),
        }
    }

    #[tokio::test]
    async fn bootstrap_retries_rotate_to_the_next_credential() {
        let executor = Arc::new(ScriptedExecutor::new(1));
        let (dispatcher, _store) = fixture(executor.clone(), &["c1", "c2"], 1);
        let (reply, _cancel) = dispatcher.dispatch(inbound(true)).await;
        let mut rx = match reply.unwrap() {
            DispatchReply::Streaming { rx } => rx,
            _ => panic!("expected stream"),
        };
        let out = drain(&mut rx).await;
        assert!(out.contains("data: {\"x\":1}"));

        let used = executor.used_credentials.lock().unwrap().clone();
        assert_eq!(used.len(), 2);
        assert_ne!(used[0], used[1]);
    }

    #[tokio::test]
    async fn bootstrap_exhaustion_surfaces_the_error_as_http() {
        let (dispatcher, store) = fixture(Arc::new(ScriptedExecutor::new(10)), &["c1", "c2"], 1);
        let (reply, _cancel) = dispatcher.dispatch(inbound(true)).await;
        let err = match reply {
            Err(err) => err,
            Ok(_) => panic!("expected bootstrap failure"),
        };
        assert_eq!(err.http_status(), 503);
        // Failed credentials cooled down.
        assert!(matches!(
            store.get("c1").unwrap().status,
            CredentialStatus::Cooling { .. }
        ));
    }

    #[tokio::test]
    async fn unknown_model_is_a_routing_error() {
        let (dispatcher, _store) = fixture(Arc::new(ScriptedExecutor::new(0)), &["c1"], 0);
        let mut req = inbound(false);
        req.requested_model = "nope".to_string();
        let (reply, _cancel) = dispatcher.dispatch(req).await;
        assert_eq!(reply.unwrap_err().http_status(), 404);
    }

    /// Executor whose stream errors after the first forwarded byte.
    struct MidStreamFailure;

    #[async_trait]
    impl Executor for MidStreamFailure {
        fn identifier(&self) -> &'static str {
            "claude"
        }

        async fn execute(
            &self,
            _ctx: &RequestContext,
            _auth: &Credential,
        ) -> ProxyResult<ExecResponse> {
            Err(ProxyError::internal("not used"))
        }

        async fn execute_stream(
            &self,
            _ctx: &RequestContext,
            _auth: &Credential,
        ) -> ProxyResult<ChunkStream> {
            let (tx, rx) = mpsc::channel(4);
            tokio::spawn(async move {
                let _ = tx.send(Ok(Bytes::from_static(b"data: {\"x\":1}\n\n"))).await;
                let _ = tx
                    .send(Err(ProxyError::transient("upstream reset").with_status(502)))
                    .await;
            });
            Ok(rx)
        }
    }

    #[tokio::test]
    async fn after_first_byte_errors_become_error_events() {
        let (dispatcher, _store) = fixture(Arc::new(MidStreamFailure), &["c1"], 3);
        let (reply, _cancel) = dispatcher.dispatch(inbound(true)).await;
        let mut rx = match reply.unwrap() {
            DispatchReply::Streaming { rx } => rx,
            _ => panic!("expected stream"),
        };
        let out = drain(&mut rx).await;
        assert!(out.contains("data: {\"x\":1}"));
        assert!(out.contains("event: error\ndata: "));
        // The error block is well-formed and the OpenAI dialect gets [DONE].
        assert!(out.contains("data: [DONE]"));
        assert!(!out.contains("event: error\n\n"));
    }
}
