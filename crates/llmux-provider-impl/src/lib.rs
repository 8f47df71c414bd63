//! Provider executors and their shared upstream plumbing: the HTTP client
//! cache, the retry/stream driver, reasoning-effort aliases and the optional
//! child-process transport.

pub mod client;
pub mod effort;
pub mod env;
pub mod headers;
pub mod tokens;
pub mod transport;
pub mod upstream;

pub mod providers;

use std::sync::Arc;

use llmux_provider_core::ExecutorRegistry;

pub use env::{ExecutorEnv, ProviderRuntimeConfig, ProxySettings, StreamTimeouts};

/// Builds the full executor registry: one instance per provider tag.
pub fn build_executors(env: Arc<ExecutorEnv>) -> ExecutorRegistry {
    let mut registry = ExecutorRegistry::new();
    registry.register(Arc::new(providers::claude::ClaudeExecutor::new(env.clone())));
    registry.register(Arc::new(providers::gemini::GeminiExecutor::new(env.clone())));
    registry.register(Arc::new(providers::gemini::VertexExecutor::new(env.clone())));
    registry.register(Arc::new(providers::codex::CodexExecutor::new(env.clone())));
    registry.register(Arc::new(providers::copilot::CopilotExecutor::new(env.clone())));
    registry.register(Arc::new(providers::grok::GrokExecutor::new(env.clone())));
    registry.register(Arc::new(providers::chutes::ChutesExecutor::new(env.clone())));
    registry.register(Arc::new(providers::openai_compat::OpenAICompatExecutor::new(env)));
    registry
}
