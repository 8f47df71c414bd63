use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use time::OffsetDateTime;

pub mod store;

pub const MAX_AUTH_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountType {
    Individual,
    Business,
    Enterprise,
}

impl Default for AccountType {
    fn default() -> Self {
        AccountType::Individual
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GrokTokenType {
    Normal,
    Super,
}

impl Default for GrokTokenType {
    fn default() -> Self {
        GrokTokenType::Normal
    }
}

/// Credential lifecycle. Only the auth manager transitions state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialStatus {
    Active,
    /// Transient backoff after 429/5xx; returns to Active after the deadline
    /// or on the next successful call.
    Cooling { until: OffsetDateTime },
    /// Terminal until operator action.
    Expired,
    Disabled,
}

impl CredentialStatus {
    /// Whether the credential may serve a request right now.
    pub fn is_eligible(&self, now: OffsetDateTime) -> bool {
        match self {
            CredentialStatus::Active => true,
            CredentialStatus::Cooling { until } => *until <= now,
            CredentialStatus::Expired | CredentialStatus::Disabled => false,
        }
    }
}

/// Provider-specific auth material.
#[derive(Debug, Clone, PartialEq)]
pub enum CredentialStorage {
    Copilot {
        github_token: String,
        copilot_token: Option<String>,
        copilot_token_expiry: Option<OffsetDateTime>,
        account_type: AccountType,
        username: String,
        email: String,
    },
    Grok {
        sso_token: String,
        cf_clearance: String,
        token_type: GrokTokenType,
        remaining_queries: i64,
        heavy_remaining_queries: i64,
    },
    ApiKey {
        api_key: String,
        base_url: Option<String>,
        extra_headers: Vec<(String, String)>,
    },
}

#[derive(Debug, Clone)]
pub struct Credential {
    /// Stable id: the on-disk filename stem, or a hash for synthesized
    /// entries.
    pub id: String,
    pub provider: String,
    pub label: String,
    /// Optional routing scope; see `force_model_prefix`.
    pub prefix: Option<String>,
    /// Flat map of adapter-specific knobs.
    pub attributes: BTreeMap<String, String>,
    /// Mutable runtime cache (e.g. cached reasoning tokens).
    pub metadata: Map<String, Value>,
    pub status: CredentialStatus,
    pub proxy_url: Option<String>,
    pub failed_count: u32,
    pub cooldown_until: Option<OffsetDateTime>,
    pub last_refresh_at: Option<OffsetDateTime>,
    pub last_failure_at: Option<OffsetDateTime>,
    pub storage: CredentialStorage,
}

impl Credential {
    pub fn new(id: impl Into<String>, provider: impl Into<String>, storage: CredentialStorage) -> Self {
        let id = id.into();
        Self {
            label: id.clone(),
            id,
            provider: provider.into(),
            prefix: None,
            attributes: BTreeMap::new(),
            metadata: Map::new(),
            status: CredentialStatus::Active,
            proxy_url: None,
            failed_count: 0,
            cooldown_until: None,
            last_refresh_at: None,
            last_failure_at: None,
            storage,
        }
    }

    pub fn api_key(&self) -> Option<&str> {
        match &self.storage {
            CredentialStorage::ApiKey { api_key, .. } => Some(api_key),
            _ => None,
        }
    }

    pub fn base_url(&self) -> Option<&str> {
        match &self.storage {
            CredentialStorage::ApiKey { base_url, .. } => base_url.as_deref(),
            _ => None,
        }
    }
}

/// On-disk credential record; the `type` field selects the variant and the
/// filename stem becomes the credential id.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CredentialFile {
    Copilot(CopilotRecord),
    Grok(GrokRecord),
    Claude(ApiKeyRecord),
    Codex(ApiKeyRecord),
    Gemini(ApiKeyRecord),
    Vertex(ApiKeyRecord),
    #[serde(rename = "openai")]
    OpenAICompat(ApiKeyRecord),
    Chutes(ApiKeyRecord),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CopilotRecord {
    pub github_token: String,
    #[serde(default)]
    pub copilot_token: Option<String>,
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub copilot_token_expiry: Option<OffsetDateTime>,
    #[serde(default)]
    pub account_type: AccountType,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
    #[serde(default, rename = "last_refresh", with = "time::serde::rfc3339::option")]
    pub last_refresh: Option<OffsetDateTime>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GrokRecord {
    pub sso_token: String,
    #[serde(default)]
    pub cf_clearance: String,
    #[serde(default)]
    pub token_type: GrokTokenType,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub failed_count: u32,
    #[serde(default = "default_remaining")]
    pub remaining_queries: i64,
    #[serde(default = "default_remaining")]
    pub heavy_remaining_queries: i64,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
}

fn default_remaining() -> i64 {
    -1
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApiKeyRecord {
    pub api_key: String,
    #[serde(default)]
    pub base_url: Option<String>,
    #[serde(default)]
    pub extra_headers: BTreeMap<String, String>,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default)]
    pub prefix: Option<String>,
    #[serde(default)]
    pub proxy_url: Option<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl CredentialFile {
    pub fn provider(&self) -> &'static str {
        match self {
            CredentialFile::Copilot(_) => "copilot",
            CredentialFile::Grok(_) => "grok",
            CredentialFile::Claude(_) => "claude",
            CredentialFile::Codex(_) => "codex",
            CredentialFile::Gemini(_) => "gemini",
            CredentialFile::Vertex(_) => "vertex",
            CredentialFile::OpenAICompat(_) => "openai",
            CredentialFile::Chutes(_) => "chutes",
        }
    }

    pub fn into_credential(self, id: &str) -> Credential {
        let provider = self.provider();
        match self {
            CredentialFile::Copilot(record) => {
                let mut cred = Credential::new(
                    id,
                    provider,
                    CredentialStorage::Copilot {
                        github_token: record.github_token,
                        copilot_token: record.copilot_token,
                        copilot_token_expiry: record.copilot_token_expiry,
                        account_type: record.account_type,
                        username: record.username.clone(),
                        email: record.email,
                    },
                );
                if !record.username.is_empty() {
                    cred.label = record.username;
                }
                cred.prefix = record.prefix;
                cred.proxy_url = record.proxy_url;
                cred.last_refresh_at = record.last_refresh;
                cred
            }
            CredentialFile::Grok(record) => {
                let mut cred = Credential::new(
                    id,
                    provider,
                    CredentialStorage::Grok {
                        sso_token: record.sso_token,
                        cf_clearance: record.cf_clearance,
                        token_type: record.token_type,
                        remaining_queries: record.remaining_queries,
                        heavy_remaining_queries: record.heavy_remaining_queries,
                    },
                );
                if record.status.as_deref() == Some("expired") {
                    cred.status = CredentialStatus::Expired;
                }
                cred.failed_count = record.failed_count;
                cred.prefix = record.prefix;
                cred.proxy_url = record.proxy_url;
                cred
            }
            CredentialFile::Claude(record)
            | CredentialFile::Codex(record)
            | CredentialFile::Gemini(record)
            | CredentialFile::Vertex(record)
            | CredentialFile::OpenAICompat(record)
            | CredentialFile::Chutes(record) => {
                let mut cred = Credential::new(
                    id,
                    provider,
                    CredentialStorage::ApiKey {
                        api_key: record.api_key,
                        base_url: record.base_url,
                        extra_headers: record.extra_headers.into_iter().collect(),
                    },
                );
                if let Some(label) = record.label {
                    cred.label = label;
                }
                cred.prefix = record.prefix;
                cred.proxy_url = record.proxy_url;
                cred.attributes = record.attributes;
                cred
            }
        }
    }
}
