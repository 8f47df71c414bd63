use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use llmux_common::{ProxyError, ProxyResult};
use llmux_provider_core::{PayloadRule, PayloadRules, RetryPlan, StaticKeyConfig};
use llmux_provider_impl::{ProviderRuntimeConfig, ProxySettings, StreamTimeouts};

/// The validated configuration object the core consumes. Loading (YAML,
/// flags) happens in the binary; env overrides are applied here so they win
/// over the file regardless of loader.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Directory of credential JSON files.
    pub auth_dir: Option<PathBuf>,
    /// Default outbound proxy; see `proxy-services`.
    pub proxy_url: Option<String>,
    /// Services allowed to use the global proxy; empty = all.
    pub proxy_services: Vec<String>,
    /// Restrict prefixed credentials to same-prefixed model ids.
    pub force_model_prefix: bool,
    /// Structured request/response logging.
    pub request_log: bool,
    /// Client bearer tokens; empty disables client auth.
    pub api_keys: Vec<String>,
    /// Forward upstream response headers to the client.
    pub passthrough_headers: bool,
    pub streaming: StreamingConfig,
    /// Blank-line keepalive period for non-streaming responses, seconds;
    /// <= 0 disables.
    pub nonstream_keepalive_interval: i64,
    pub payload: PayloadConfig,
    /// Static-key credentials synthesized into the store.
    pub credentials: Vec<StaticKeyConfig>,
    /// Per-provider runtime sections (timeouts, retry schedules, base URLs).
    pub providers: HashMap<String, ProviderSection>,
    /// Extra user-defined models seeded into the registry.
    pub models: Vec<ModelSeed>,
    /// Optional child-process transport for outbound HTTPS.
    pub electron_transport: Option<ElectronTransportConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8317,
            auth_dir: None,
            proxy_url: None,
            proxy_services: Vec::new(),
            force_model_prefix: false,
            request_log: false,
            api_keys: Vec::new(),
            passthrough_headers: false,
            streaming: StreamingConfig::default(),
            nonstream_keepalive_interval: 0,
            payload: PayloadConfig::default(),
            credentials: Vec::new(),
            providers: HashMap::new(),
            models: Vec::new(),
            electron_transport: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct StreamingConfig {
    /// SSE comment heartbeat period, seconds; <= 0 disables.
    pub keepalive_seconds: i64,
    /// Stream-bootstrap retries before the first byte; <= 0 disables.
    pub bootstrap_retries: i64,
    /// Adds `X-Accel-Buffering: no` to streaming responses.
    pub disable_proxy_buffering: bool,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            keepalive_seconds: 0,
            bootstrap_retries: 0,
            disable_proxy_buffering: false,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PayloadConfig {
    pub default: Vec<PayloadRuleEntry>,
    pub default_raw: Vec<PayloadRuleEntry>,
    #[serde(rename = "override")]
    pub override_: Vec<PayloadRuleEntry>,
    pub override_raw: Vec<PayloadRuleEntry>,
    pub filter: Vec<PayloadRuleEntry>,
}

/// One configured payload rule. Non-raw entries treat `value` as a string;
/// `-raw` entries carry arbitrary JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct PayloadRuleEntry {
    pub protocol: String,
    pub model: String,
    pub path: String,
    pub value: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ProviderSection {
    pub base_url: Option<String>,
    pub max_retries: Option<u32>,
    /// Backoff schedule in milliseconds; the last value repeats.
    pub backoff_ms: Option<Vec<u64>>,
    pub first_chunk_timeout_secs: Option<u64>,
    pub idle_timeout_secs: Option<u64>,
    pub total_timeout_secs: Option<u64>,
    pub request_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ModelSeed {
    pub id: String,
    pub provider: String,
    pub context_length: i64,
    pub max_completion_tokens: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", default)]
pub struct ElectronTransportConfig {
    pub program: String,
    pub args: Vec<String>,
}

impl Config {
    /// Fatal-at-startup validation.
    pub fn validate(&self) -> ProxyResult<()> {
        if self.port == 0 {
            return Err(ProxyError::config("port must be nonzero"));
        }
        for cred in &self.credentials {
            if cred.provider.is_empty() {
                return Err(ProxyError::config("static credential without provider"));
            }
            if cred.api_key.is_empty() {
                return Err(ProxyError::config(format!(
                    "static credential for {} without api_key",
                    cred.provider
                )));
            }
        }
        for seed in &self.models {
            if seed.id.is_empty() || seed.provider.is_empty() {
                return Err(ProxyError::config("model seed needs id and provider"));
            }
        }
        Ok(())
    }

    /// Environment overrides win over the file when set to a valid value.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("STREAMING_KEEPALIVE_SECONDS")
            && let Ok(value) = raw.trim().parse::<i64>()
        {
            self.streaming.keepalive_seconds = value;
        }
        if let Ok(raw) = std::env::var("STREAMING_DISABLE_PROXY_BUFFERING")
            && let Ok(value) = raw.trim().parse::<bool>()
        {
            self.streaming.disable_proxy_buffering = value;
        }
        if let Ok(raw) = std::env::var("PASSTHRU_MODELS_JSON")
            && let Ok(seeds) = serde_json::from_str::<Vec<ModelSeed>>(&raw)
        {
            self.models = seeds;
        }
    }

    pub fn payload_rules(&self) -> PayloadRules {
        fn convert(entries: &[PayloadRuleEntry], raw: bool) -> Vec<PayloadRule> {
            entries
                .iter()
                .map(|entry| PayloadRule {
                    protocol: if entry.protocol.is_empty() {
                        "*".to_string()
                    } else {
                        entry.protocol.clone()
                    },
                    model: if entry.model.is_empty() {
                        "*".to_string()
                    } else {
                        entry.model.clone()
                    },
                    path: entry.path.clone(),
                    value: entry.value.clone().map(|value| {
                        if raw {
                            value
                        } else {
                            // Non-raw rules are string-typed in the file.
                            match value {
                                Value::String(_) => value,
                                other => Value::String(other.to_string()),
                            }
                        }
                    }),
                })
                .collect()
        }

        let mut defaults = convert(&self.payload.default, false);
        defaults.extend(convert(&self.payload.default_raw, true));
        let mut overrides = convert(&self.payload.override_, false);
        overrides.extend(convert(&self.payload.override_raw, true));
        PayloadRules {
            defaults,
            overrides,
            filters: convert(&self.payload.filter, false),
        }
    }

    pub fn proxy_settings(&self) -> ProxySettings {
        ProxySettings {
            global_proxy: self.proxy_url.clone(),
            proxy_services: self.proxy_services.clone(),
        }
    }

    pub fn provider_runtime(&self) -> HashMap<String, ProviderRuntimeConfig> {
        self.providers
            .iter()
            .map(|(name, section)| {
                let retry = section.max_retries.map(|max_retries| RetryPlan {
                    max_retries,
                    backoff: section
                        .backoff_ms
                        .clone()
                        .unwrap_or_default()
                        .into_iter()
                        .map(Duration::from_millis)
                        .collect(),
                    ..RetryPlan::default()
                });
                let timeouts = if section.first_chunk_timeout_secs.is_some()
                    || section.idle_timeout_secs.is_some()
                    || section.total_timeout_secs.is_some()
                {
                    Some(StreamTimeouts {
                        first_chunk: section.first_chunk_timeout_secs.map(Duration::from_secs),
                        idle: section.idle_timeout_secs.map(Duration::from_secs),
                        total: section.total_timeout_secs.map(Duration::from_secs),
                    })
                } else {
                    None
                };
                (
                    name.clone(),
                    ProviderRuntimeConfig {
                        retry,
                        timeouts,
                        base_url: section.base_url.clone(),
                        request_timeout: section.request_timeout_secs.map(Duration::from_secs),
                    },
                )
            })
            .collect()
    }

    pub fn nonstream_keepalive(&self) -> Option<Duration> {
        (self.nonstream_keepalive_interval > 0)
            .then(|| Duration::from_secs(self.nonstream_keepalive_interval as u64))
    }

    pub fn stream_keepalive(&self) -> Option<Duration> {
        (self.streaming.keepalive_seconds > 0)
            .then(|| Duration::from_secs(self.streaming.keepalive_seconds as u64))
    }

    pub fn bootstrap_retries(&self) -> u32 {
        self.streaming.bootstrap_retries.max(0) as u32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        Config::default().validate().unwrap();
    }

    #[test]
    fn missing_api_key_is_fatal() {
        let config = Config {
            credentials: vec![StaticKeyConfig {
                provider: "claude".to_string(),
                api_key: String::new(),
                ..StaticKeyConfig::default()
            }],
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn payload_rules_are_partitioned() {
        let config = Config {
            payload: PayloadConfig {
                default: vec![PayloadRuleEntry {
                    protocol: String::new(),
                    model: "gpt-5*".to_string(),
                    path: "service_tier".to_string(),
                    value: Some(Value::String("flex".to_string())),
                }],
                override_raw: vec![PayloadRuleEntry {
                    protocol: "openai".to_string(),
                    model: "*".to_string(),
                    path: "reasoning.effort".to_string(),
                    value: Some(serde_json::json!("high")),
                }],
                filter: vec![PayloadRuleEntry {
                    protocol: String::new(),
                    model: "*".to_string(),
                    path: "user".to_string(),
                    value: None,
                }],
                ..PayloadConfig::default()
            },
            ..Config::default()
        };
        let rules = config.payload_rules();
        assert_eq!(rules.defaults.len(), 1);
        assert_eq!(rules.defaults[0].protocol, "*");
        assert_eq!(rules.overrides.len(), 1);
        assert_eq!(rules.filters.len(), 1);
    }

    #[test]
    fn env_overrides_take_precedence_when_valid() {
        let mut config = Config::default();
        // Invalid values must not clobber the file value.
        unsafe {
            std::env::set_var("STREAMING_KEEPALIVE_SECONDS", "not-a-number");
        }
        config.streaming.keepalive_seconds = 15;
        config.apply_env_overrides();
        assert_eq!(config.streaming.keepalive_seconds, 15);

        unsafe {
            std::env::set_var("STREAMING_KEEPALIVE_SECONDS", "25");
        }
        config.apply_env_overrides();
        assert_eq!(config.streaming.keepalive_seconds, 25);
        unsafe {
            std::env::remove_var("STREAMING_KEEPALIVE_SECONDS");
        }
    }

    #[test]
    fn keepalive_disabled_at_or_below_zero() {
        let mut config = Config::default();
        config.nonstream_keepalive_interval = 0;
        assert!(config.nonstream_keepalive().is_none());
        config.nonstream_keepalive_interval = 5;
        assert_eq!(config.nonstream_keepalive(), Some(Duration::from_secs(5)));
    }
}
