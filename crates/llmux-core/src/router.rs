use llmux_common::{ProxyError, ProxyResult};
use llmux_provider_core::{ModelRegistry, RouteMetadata, strip_provider_prefix};

/// Router output: eligible providers, the post-suffix model string (effort
/// and thinking tails preserved for the executor) and routing metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct RouteDecision {
    pub providers: Vec<String>,
    pub resolved_model: String,
    pub metadata: RouteMetadata,
}

/// Parses a client model string in order: provider-forcing prefix,
/// `-temp-<float>` suffix, `(...)`/bareword effort tail (preserved),
/// `auto(...)` default resolution.
pub fn resolve_model(registry: &ModelRegistry, requested: &str) -> ProxyResult<RouteDecision> {
    let mut metadata = RouteMetadata {
        requested_model: requested.to_string(),
        ..RouteMetadata::default()
    };

    // auto(...) resolves to the highest-priority Gemini model, keeping the
    // parenthesized suffix.
    if let Some(tail) = strip_auto(requested) {
        let base = registry
            .best_model_for_provider("gemini")
            .ok_or_else(|| not_found("auto"))?;
        return Ok(RouteDecision {
            providers: vec!["gemini".to_string()],
            resolved_model: format!("{base}{tail}"),
            metadata,
        });
    }

    let (forced_provider, rest) = match strip_provider_prefix(requested) {
        Some((prefix, rest)) => {
            metadata.forced_provider = true;
            (Some(prefix.to_string()), rest.to_string())
        }
        None => (None, requested.to_string()),
    };

    let (rest, temperature) = strip_temperature_suffix(&rest);
    if let Some(temperature) = temperature {
        metadata.temperature_suffix = Some(temperature);
    }
    let resolved_model = rest;

    let providers = match forced_provider {
        // A forced provider is returned even when the model is unknown to
        // the registry; executors handle unknown upstream models themselves.
        Some(provider) => vec![provider],
        None => {
            let providers = lookup_providers(registry, &resolved_model);
            if providers.is_empty() {
                return Err(not_found(&resolved_model));
            }
            providers
        }
    };

    Ok(RouteDecision {
        providers,
        resolved_model,
        metadata,
    })
}

fn not_found(model: &str) -> ProxyError {
    ProxyError::permanent(format!("model {model} is not available")).with_status(404)
}

fn strip_auto(model: &str) -> Option<String> {
    if model == "auto" {
        return Some(String::new());
    }
    let tail = model.strip_prefix("auto(")?;
    let inner = tail.strip_suffix(')')?;
    Some(format!("({inner})"))
}

/// `-temp-<float>` sits before any `(...)` thinking tail.
fn strip_temperature_suffix(model: &str) -> (String, Option<f64>) {
    let (head, tail) = match model.rfind('(') {
        Some(open) if model.ends_with(')') => (&model[..open], &model[open..]),
        _ => (model, ""),
    };
    let Some(pos) = head.rfind("-temp-") else {
        return (model.to_string(), None);
    };
    let value = &head[pos + "-temp-".len()..];
    match value.parse::<f64>() {
        Ok(temperature) if temperature.is_finite() => {
            (format!("{}{tail}", &head[..pos]), Some(temperature))
        }
        _ => (model.to_string(), None),
    }
}

/// Registry lookup tolerant of preserved suffixes: tries the resolved
/// string, then without the thinking tail, then without a bareword effort.
fn lookup_providers(registry: &ModelRegistry, model: &str) -> Vec<String> {
    let providers = registry.model_providers(model);
    if !providers.is_empty() {
        return providers;
    }
    let bare = match model.rfind('(') {
        Some(open) if model.ends_with(')') => &model[..open],
        _ => model,
    };
    let providers = registry.model_providers(bare);
    if !providers.is_empty() {
        return providers;
    }
    if let Some((head, tail)) = bare.rsplit_once('-')
        && ["minimal", "low", "medium", "high", "xhigh", "none", "auto"].contains(&tail)
    {
        return registry.model_providers(head);
    }
    Vec::new()
}

#[cfg(test)]
mod tests {
    use super::*;
    use llmux_provider_core::ModelInfo;

    fn registry() -> ModelRegistry {
        let registry = ModelRegistry::new();
        registry.register_client(
            "seed",
            "claude",
            vec![ModelInfo::new("claude-sonnet-4-5", "claude")],
        );
        let mut gemini = ModelInfo::new("gemini-2.5-pro", "gemini");
        gemini.context_length = 1_000_000;
        registry.register_client("gem", "gemini", vec![gemini]);
        registry.register_client("cp", "copilot", vec![ModelInfo::new("gpt-5.2", "copilot")]);
        registry
    }

    #[test]
    fn plain_model_routes_by_registry() {
        let decision = resolve_model(&registry(), "claude-sonnet-4-5").unwrap();
        assert_eq!(decision.providers, vec!["claude"]);
        assert_eq!(decision.resolved_model, "claude-sonnet-4-5");
        assert!(!decision.metadata.forced_provider);
    }

    #[test]
    fn prefix_forces_provider_and_is_stripped() {
        let decision = resolve_model(&registry(), "copilot-gpt-5.2-xhigh").unwrap();
        assert_eq!(decision.providers, vec!["copilot"]);
        assert_eq!(decision.resolved_model, "gpt-5.2-xhigh");
        assert!(decision.metadata.forced_provider);
        assert_eq!(decision.metadata.requested_model, "copilot-gpt-5.2-xhigh");
    }

    #[test]
    fn forced_provider_survives_unknown_models() {
        let decision = resolve_model(&registry(), "codex-not-registered").unwrap();
        assert_eq!(decision.providers, vec!["codex"]);
        assert_eq!(decision.resolved_model, "not-registered");
    }

    #[test]
    fn temperature_suffix_is_stripped_before_thinking_tail() {
        let decision =
            resolve_model(&registry(), "claude-sonnet-4-5-temp-0.7(16384)").unwrap();
        assert_eq!(decision.resolved_model, "claude-sonnet-4-5(16384)");
        assert_eq!(decision.metadata.temperature_suffix, Some(0.7));
        assert_eq!(decision.providers, vec!["claude"]);
    }

    #[test]
    fn thinking_tail_is_preserved_for_the_executor() {
        let decision = resolve_model(&registry(), "claude-sonnet-4-5(8192)").unwrap();
        assert_eq!(decision.resolved_model, "claude-sonnet-4-5(8192)");
        assert_eq!(decision.metadata.temperature_suffix, None);
    }

    #[test]
    fn auto_resolves_to_best_gemini_preserving_suffix() {
        let decision = resolve_model(&registry(), "auto(4096)").unwrap();
        assert_eq!(decision.providers, vec!["gemini"]);
        assert_eq!(decision.resolved_model, "gemini-2.5-pro(4096)");
    }

    #[test]
    fn unknown_unforced_model_is_404() {
        let err = resolve_model(&registry(), "mystery-model").unwrap_err();
        assert_eq!(err.http_status(), 404);
    }

    #[test]
    fn effort_suffix_still_finds_the_base_model() {
        let decision = resolve_model(&registry(), "gpt-5.2-xhigh").unwrap();
        assert_eq!(decision.providers, vec!["copilot"]);
        assert_eq!(decision.resolved_model, "gpt-5.2-xhigh");
    }

    #[test]
    fn malformed_temperature_is_left_alone() {
        let decision = resolve_model(&registry(), "claude-sonnet-4-5").unwrap();
        assert_eq!(decision.metadata.temperature_suffix, None);
        // "-temp-" with a non-numeric tail does not strip.
        let err = resolve_model(&registry(), "claude-temp-hot");
        assert!(err.is_err());
    }
}
