use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use llmux_provider_core::{
    NoopUsageReporter, PayloadRules, RetryPlan, SharedUsageReporter,
};

use crate::transport::SharedTransport;

/// Outbound proxy policy: a credential-scoped proxy wins over the global
/// one, and the global proxy only applies to allowlisted services.
#[derive(Debug, Clone, Default)]
pub struct ProxySettings {
    pub global_proxy: Option<String>,
    /// Services allowed to use the global proxy; empty means all.
    pub proxy_services: Vec<String>,
}

impl ProxySettings {
    /// Resolves the proxy for one call.
    pub fn resolve(
        &self,
        auth_proxy: Option<&str>,
        service: &str,
        target_host: &str,
    ) -> Option<String> {
        if crate::client::no_proxy_matches(target_host) {
            return None;
        }
        if let Some(proxy) = auth_proxy.map(str::trim).filter(|p| !p.is_empty()) {
            return Some(proxy.to_string());
        }
        let global = self.global_proxy.as_deref()?.trim();
        if global.is_empty() {
            return None;
        }
        if !self.proxy_services.is_empty()
            && !self.proxy_services.iter().any(|allowed| allowed == service)
        {
            return None;
        }
        Some(global.to_string())
    }
}

/// Stream timeout thresholds tracked per provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamTimeouts {
    pub first_chunk: Option<Duration>,
    pub idle: Option<Duration>,
    pub total: Option<Duration>,
}

impl Default for StreamTimeouts {
    fn default() -> Self {
        Self {
            first_chunk: Some(Duration::from_secs(30)),
            idle: Some(Duration::from_secs(60)),
            total: Some(Duration::from_secs(600)),
        }
    }
}

/// Per-provider runtime knobs from the provider config sections.
#[derive(Debug, Clone, Default)]
pub struct ProviderRuntimeConfig {
    pub retry: Option<RetryPlan>,
    pub timeouts: Option<StreamTimeouts>,
    pub base_url: Option<String>,
    /// Request deadline for non-streaming calls.
    pub request_timeout: Option<Duration>,
}

/// Shared environment handed to every executor at construction.
pub struct ExecutorEnv {
    pub proxy: ProxySettings,
    pub payload_rules: PayloadRules,
    pub usage: SharedUsageReporter,
    pub providers: HashMap<String, ProviderRuntimeConfig>,
    /// Overrides the wreq transport when the electron shim is configured.
    pub transport: Option<SharedTransport>,
}

impl Default for ExecutorEnv {
    fn default() -> Self {
        Self {
            proxy: ProxySettings::default(),
            payload_rules: PayloadRules::default(),
            usage: Arc::new(NoopUsageReporter),
            providers: HashMap::new(),
            transport: None,
        }
    }
}

impl ExecutorEnv {
    pub fn retry_plan(&self, provider: &str) -> RetryPlan {
        self.providers
            .get(provider)
            .and_then(|cfg| cfg.retry.clone())
            .unwrap_or_default()
    }

    pub fn timeouts(&self, provider: &str) -> StreamTimeouts {
        self.providers
            .get(provider)
            .and_then(|cfg| cfg.timeouts)
            .unwrap_or_default()
    }

    pub fn base_url_override(&self, provider: &str) -> Option<String> {
        self.providers
            .get(provider)
            .and_then(|cfg| cfg.base_url.clone())
    }

    pub fn request_timeout(&self, provider: &str) -> Duration {
        self.providers
            .get(provider)
            .and_then(|cfg| cfg.request_timeout)
            .unwrap_or(Duration::from_secs(300))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_proxy_wins_over_global() {
        let settings = ProxySettings {
            global_proxy: Some("http://global:8080".to_string()),
            proxy_services: Vec::new(),
        };
        assert_eq!(
            settings.resolve(Some("http://scoped:1080"), "claude", "api.anthropic.com"),
            Some("http://scoped:1080".to_string())
        );
    }

    #[test]
    fn global_proxy_requires_service_allowlisting() {
        let settings = ProxySettings {
            global_proxy: Some("http://global:8080".to_string()),
            proxy_services: vec!["grok".to_string()],
        };
        assert_eq!(
            settings.resolve(None, "grok", "grok.com"),
            Some("http://global:8080".to_string())
        );
        assert_eq!(settings.resolve(None, "claude", "api.anthropic.com"), None);
    }

    #[test]
    fn empty_allowlist_means_all_services() {
        let settings = ProxySettings {
            global_proxy: Some("http://global:8080".to_string()),
            proxy_services: Vec::new(),
        };
        assert!(settings.resolve(None, "claude", "api.anthropic.com").is_some());
    }
}
