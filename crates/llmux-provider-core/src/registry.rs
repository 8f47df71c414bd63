use std::collections::{BTreeSet, HashMap};
use std::sync::RwLock;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use llmux_protocol::Dialect;

/// Prefixes that force routing to a specific provider when prepended to a
/// model id.
pub const PROVIDER_PREFIXES: [&str; 5] = ["codex", "copilot", "chutes", "kimi", "iflow"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThinkingSupport {
    pub min: i64,
    pub max: i64,
    pub zero_allowed: bool,
    pub dynamic_allowed: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelInfo {
    pub id: String,
    pub provider: String,
    pub display_name: String,
    pub context_length: i64,
    pub max_completion_tokens: i64,
    #[serde(default)]
    pub supported_parameters: BTreeSet<String>,
    #[serde(default)]
    pub thinking_support: Option<ThinkingSupport>,
    #[serde(default)]
    pub user_defined: bool,
}

impl ModelInfo {
    pub fn new(id: impl Into<String>, provider: impl Into<String>) -> Self {
        let id = id.into();
        Self {
            display_name: id.clone(),
            id,
            provider: provider.into(),
            context_length: 0,
            max_completion_tokens: 0,
            supported_parameters: BTreeSet::new(),
            thinking_support: None,
            user_defined: false,
        }
    }
}

/// Emits `<prefix>-<id>` duplicates alongside the originals. The originals
/// are returned untouched; aliases are fresh entries pointing at the same
/// provider and underlying model.
pub fn with_prefix_aliases(models: &[ModelInfo], prefix: &str) -> Vec<ModelInfo> {
    let mut out = Vec::with_capacity(models.len() * 2);
    for model in models {
        out.push(model.clone());
        let mut alias = model.clone();
        alias.id = format!("{prefix}-{}", model.id);
        out.push(alias);
    }
    out
}

/// Strips a known provider-forcing prefix; returns the bare model and the
/// provider the prefix forces.
pub fn strip_provider_prefix(model: &str) -> Option<(&'static str, &str)> {
    for prefix in PROVIDER_PREFIXES {
        if let Some(rest) = model.strip_prefix(prefix)
            && let Some(rest) = rest.strip_prefix('-')
            && !rest.is_empty()
        {
            return Some((prefix, rest));
        }
    }
    None
}

#[derive(Default)]
struct RegistryInner {
    /// client id -> model ids it registered (for atomic replacement).
    by_client: HashMap<String, Vec<(String, String)>>,
    /// model id -> entries; duplicates across providers are permitted.
    models: HashMap<String, Vec<ModelInfo>>,
}

/// Concurrent model registry. Readers are common, writers serialized; each
/// client's entries are swapped atomically on re-registration.
#[derive(Default)]
pub struct ModelRegistry {
    inner: RwLock<RegistryInner>,
}

impl ModelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent per client: re-registration replaces the prior set.
    pub fn register_client(&self, client_id: &str, provider: &str, models: Vec<ModelInfo>) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        Self::remove_client_locked(&mut inner, client_id);
        let mut keys = Vec::with_capacity(models.len());
        for mut model in models {
            model.provider = provider.to_string();
            keys.push((model.id.clone(), provider.to_string()));
            inner.models.entry(model.id.clone()).or_default().push(model);
        }
        inner.by_client.insert(client_id.to_string(), keys);
    }

    pub fn unregister_client(&self, client_id: &str) {
        let mut inner = self.inner.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        Self::remove_client_locked(&mut inner, client_id);
    }

    fn remove_client_locked(inner: &mut RegistryInner, client_id: &str) {
        let Some(keys) = inner.by_client.remove(client_id) else {
            return;
        };
        for (id, provider) in keys {
            if let Some(entries) = inner.models.get_mut(&id) {
                // One entry per (client, id, provider); drop a single match so
                // another client advertising the same id survives.
                if let Some(pos) = entries.iter().position(|entry| entry.provider == provider) {
                    entries.remove(pos);
                }
                if entries.is_empty() {
                    inner.models.remove(&id);
                }
            }
        }
    }

    /// Providers advertising this model id; the router breaks ties.
    pub fn model_providers(&self, model_id: &str) -> Vec<String> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut providers = inner
            .models
            .get(model_id)
            .map(|entries| {
                entries
                    .iter()
                    .map(|entry| entry.provider.clone())
                    .collect::<Vec<_>>()
            })
            .unwrap_or_default();
        providers.dedup();
        providers
    }

    pub fn model_info(&self, model_id: &str, provider: &str) -> Option<ModelInfo> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .models
            .get(model_id)?
            .iter()
            .find(|entry| entry.provider == provider)
            .cloned()
    }

    /// The highest-context model registered for a provider; used by the
    /// `auto(...)` route.
    pub fn best_model_for_provider(&self, provider: &str) -> Option<String> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        inner
            .models
            .values()
            .flatten()
            .filter(|entry| entry.provider == provider)
            .max_by_key(|entry| entry.context_length)
            .map(|entry| entry.id.clone())
    }

    /// Projects the registry into a dialect-specific model listing.
    pub fn available_models(&self, dialect: Dialect) -> Vec<Value> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut ids = inner.models.keys().cloned().collect::<Vec<_>>();
        ids.sort();
        ids.iter()
            .filter_map(|id| inner.models.get(id).and_then(|entries| entries.first()))
            .map(|info| project_model(dialect, info))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<ModelInfo> {
        let inner = self.inner.read().unwrap_or_else(std::sync::PoisonError::into_inner);
        let mut all = inner.models.values().flatten().cloned().collect::<Vec<_>>();
        all.sort_by(|a, b| a.id.cmp(&b.id).then_with(|| a.provider.cmp(&b.provider)));
        all
    }
}

fn project_model(dialect: Dialect, info: &ModelInfo) -> Value {
    match dialect {
        Dialect::Claude => json!({
            "type": "model",
            "id": info.id,
            "display_name": info.display_name,
            "created_at": "1970-01-01T00:00:00Z",
        }),
        Dialect::Gemini => {
            let mut model = json!({
                "name": format!("models/{}", info.id),
                "displayName": info.display_name,
                "supportedGenerationMethods": ["generateContent", "streamGenerateContent"],
            });
            let obj = model.as_object_mut().expect("object literal");
            if info.context_length > 0 {
                obj.insert("inputTokenLimit".to_string(), json!(info.context_length));
            }
            if info.max_completion_tokens > 0 {
                obj.insert(
                    "outputTokenLimit".to_string(),
                    json!(info.max_completion_tokens),
                );
            }
            model
        }
        _ => {
            let mut model = json!({
                "id": info.id,
                "object": "model",
                "created": 0,
                "owned_by": info.provider,
            });
            let obj = model.as_object_mut().expect("object literal");
            if info.context_length > 0 {
                obj.insert("context_length".to_string(), json!(info.context_length));
                obj.insert("context_window".to_string(), json!(info.context_length));
            }
            if info.max_completion_tokens > 0 {
                obj.insert("max_tokens".to_string(), json!(info.max_completion_tokens));
                obj.insert(
                    "max_completion_tokens".to_string(),
                    json!(info.max_completion_tokens),
                );
            }
            model
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn model(id: &str) -> ModelInfo {
        ModelInfo {
            context_length: 128_000,
            max_completion_tokens: 8192,
            ..ModelInfo::new(id, "test")
        }
    }

    #[test]
    fn aliases_do_not_mutate_originals() {
        let originals = vec![model("gpt-5"), model("gpt-5-mini")];
        for prefix in PROVIDER_PREFIXES {
            let aliased = with_prefix_aliases(&originals, prefix);
            assert_eq!(aliased.len(), 4);
            // Each base and alias appears exactly once.
            for base in ["gpt-5", "gpt-5-mini"] {
                assert_eq!(aliased.iter().filter(|m| m.id == base).count(), 1);
                let alias = format!("{prefix}-{base}");
                assert_eq!(aliased.iter().filter(|m| m.id == alias).count(), 1);
            }
            assert_eq!(originals[0].id, "gpt-5");
        }
    }

    #[test]
    fn strip_prefix_round_trips() {
        for prefix in PROVIDER_PREFIXES {
            let full = format!("{prefix}-gpt-5");
            assert_eq!(strip_provider_prefix(&full), Some((prefix, "gpt-5")));
        }
        assert_eq!(strip_provider_prefix("gpt-5"), None);
        assert_eq!(strip_provider_prefix("copilot-"), None);
    }

    #[test]
    fn reregistration_replaces_atomically() {
        let registry = ModelRegistry::new();
        registry.register_client("c1", "claude", vec![model("a"), model("b")]);
        registry.register_client("c1", "claude", vec![model("b"), model("c")]);
        assert!(registry.model_providers("a").is_empty());
        assert_eq!(registry.model_providers("b"), vec!["claude"]);
        assert_eq!(registry.model_providers("c"), vec!["claude"]);
    }

    #[test]
    fn duplicate_ids_across_providers_are_kept() {
        let registry = ModelRegistry::new();
        registry.register_client("c1", "claude", vec![model("shared")]);
        registry.register_client("c2", "copilot", vec![model("shared")]);
        let providers = registry.model_providers("shared");
        assert_eq!(providers.len(), 2);
        registry.unregister_client("c1");
        assert_eq!(registry.model_providers("shared"), vec!["copilot"]);
    }

    #[test]
    fn openai_projection_carries_both_limit_aliases() {
        let registry = ModelRegistry::new();
        registry.register_client("c1", "claude", vec![model("m")]);
        let listing = registry.available_models(Dialect::OpenAI);
        assert_eq!(listing[0]["context_length"], 128_000);
        assert_eq!(listing[0]["context_window"], 128_000);
        assert_eq!(listing[0]["max_tokens"], 8192);
        assert_eq!(listing[0]["max_completion_tokens"], 8192);
    }

    #[test]
    fn zero_limits_are_omitted_from_projection() {
        let registry = ModelRegistry::new();
        registry.register_client("c1", "claude", vec![ModelInfo::new("m", "claude")]);
        let listing = registry.available_models(Dialect::OpenAI);
        assert!(listing[0].get("context_length").is_none());
        assert!(listing[0].get("max_tokens").is_none());
    }

    #[test]
    fn best_model_prefers_largest_context() {
        let registry = ModelRegistry::new();
        let mut small = model("gemini-flash");
        small.context_length = 1;
        registry.register_client("c1", "gemini", vec![small, model("gemini-pro")]);
        assert_eq!(
            registry.best_model_for_provider("gemini"),
            Some("gemini-pro".to_string())
        );
    }
}
