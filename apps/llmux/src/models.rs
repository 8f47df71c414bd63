use llmux_core::Config;
use llmux_provider_core::{ModelInfo, ModelRegistry, with_prefix_aliases};

/// Built-in model catalog per provider. Registered only for providers that
/// actually have a credential, so `/v1/models` reflects what can be served.
/// Prefix aliases are added on top; config-declared models land last with
/// `user_defined` set.
pub(crate) fn seed_registry(registry: &ModelRegistry, config: &Config, providers: &[String]) {
    for provider in providers {
        let models = builtin_models(provider);
        if models.is_empty() {
            continue;
        }
        let aliased = match alias_prefix(provider) {
            Some(prefix) => with_prefix_aliases(&models, prefix),
            None => models,
        };
        registry.register_client(&format!("builtin:{provider}"), provider, aliased);
    }

    let mut user_defined = Vec::new();
    for seed in &config.models {
        let mut info = ModelInfo::new(seed.id.clone(), seed.provider.clone());
        info.context_length = seed.context_length;
        info.max_completion_tokens = seed.max_completion_tokens;
        info.user_defined = true;
        user_defined.push((seed.provider.clone(), info));
    }
    for (provider, info) in user_defined {
        registry.register_client(&format!("config:{}:{}", provider, info.id), &provider, vec![info]);
    }
}

fn alias_prefix(provider: &str) -> Option<&'static str> {
    match provider {
        "codex" => Some("codex"),
        "copilot" => Some("copilot"),
        "chutes" => Some("chutes"),
        _ => None,
    }
}

fn builtin_models(provider: &str) -> Vec<ModelInfo> {
    let entries: &[(&str, i64, i64)] = match provider {
        "claude" => &[
            ("claude-opus-4-5", 200_000, 64_000),
            ("claude-sonnet-4-5", 200_000, 64_000),
            ("claude-haiku-4-5", 200_000, 64_000),
        ],
        "gemini" | "vertex" => &[
            ("gemini-2.5-pro", 1_048_576, 65_536),
            ("gemini-2.5-flash", 1_048_576, 65_536),
            ("gemini-2.5-flash-lite", 1_048_576, 65_536),
        ],
        "codex" => &[
            ("gpt-5.2-codex", 400_000, 128_000),
            ("gpt-5-codex", 400_000, 128_000),
            ("gpt-5", 400_000, 128_000),
        ],
        "copilot" => &[
            ("gpt-5.2", 264_000, 64_000),
            ("gpt-5.1", 264_000, 64_000),
            ("gpt-4o", 128_000, 16_384),
            ("claude-sonnet-4-5", 200_000, 64_000),
            ("gemini-2.5-pro", 1_048_576, 65_536),
        ],
        "grok" => &[("grok-4", 256_000, 32_768), ("grok-3", 131_072, 32_768)],
        "chutes" => &[
            ("deepseek-ai/DeepSeek-V3.1", 163_840, 32_768),
            ("Qwen/Qwen3-235B-A22B", 131_072, 32_768),
            ("zai-org/GLM-4.6", 131_072, 32_768),
        ],
        _ => &[],
    };
    entries
        .iter()
        .map(|(id, context, max_out)| {
            let mut info = ModelInfo::new(*id, provider);
            info.context_length = *context;
            info.max_completion_tokens = *max_out;
            info
        })
        .collect()
}
