//! Core provider abstractions: the model registry, credential records and
//! store, the executor capability set, retry plans and payload rules.
//!
//! This crate deliberately does not depend on axum or any HTTP client;
//! executors construct and interpret requests while `llmux-provider-impl`
//! performs the I/O.

pub mod context;
pub mod credential;
pub mod executor;
pub mod payload;
pub mod registry;
pub mod retry;
pub mod usage;

pub use context::{CancelHandle, CancelToken, RequestContext, RouteMetadata, ThinkingValue};
pub use credential::store::{CredentialStore, StaticKeyConfig};
pub use credential::{
    AccountType, ApiKeyRecord, CopilotRecord, Credential, CredentialFile, CredentialStatus,
    CredentialStorage, GrokRecord, GrokTokenType, MAX_AUTH_FAILURES,
};
pub use executor::{
    ChunkStream, ExecResponse, Executor, ExecutorRegistry, HttpRequestSpec,
};
pub use payload::{PayloadRule, PayloadRules};
pub use registry::{
    ModelInfo, ModelRegistry, PROVIDER_PREFIXES, ThinkingSupport, strip_provider_prefix,
    with_prefix_aliases,
};
pub use retry::{RetryPlan, SHORT_COOLDOWN, capped_retry_after, parse_retry_after};
pub use usage::{NoopUsageReporter, SharedUsageReporter, TracingUsageReporter, UsageEvent, UsageReporter};
