use llmux_provider_core::ThinkingValue;
use tracing::warn;

/// Reasoning-effort aliases recognized as a trailing model-name segment.
pub const EFFORT_ALIASES: [&str; 7] =
    ["minimal", "low", "medium", "high", "xhigh", "none", "auto"];

/// Model families that accept `xhigh` on Copilot.
const XHIGH_FAMILIES: [&str; 2] = ["gpt-5.", "o4."];

/// A model string decomposed into its base name, an optional trailing effort
/// alias and an optional `(...)` thinking suffix.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelSuffixes {
    pub base: String,
    pub effort: Option<String>,
    pub thinking: Option<ThinkingValue>,
}

/// Splits `gpt-5.2-xhigh` / `claude-sonnet-4-5(16384)` style names. The
/// thinking tail is parsed first, then a bareword effort alias.
pub fn split_model_suffixes(model: &str) -> ModelSuffixes {
    let (rest, thinking) = split_thinking_tail(model);

    let (base, effort) = match rest.rsplit_once('-') {
        Some((head, tail))
            if !head.is_empty() && EFFORT_ALIASES.contains(&tail) =>
        {
            (head.to_string(), Some(tail.to_string()))
        }
        _ => (rest.to_string(), None),
    };

    ModelSuffixes {
        base,
        effort,
        thinking,
    }
}

fn split_thinking_tail(model: &str) -> (&str, Option<ThinkingValue>) {
    if !model.ends_with(')') {
        return (model, None);
    }
    let Some(open) = model.rfind('(') else {
        return (model, None);
    };
    let inside = &model[open + 1..model.len() - 1];
    let value = match inside.parse::<i64>() {
        Ok(budget) => ThinkingValue::Budget(budget),
        Err(_) if !inside.is_empty() => ThinkingValue::Level(inside.to_string()),
        Err(_) => return (model, None),
    };
    (&model[..open], Some(value))
}

/// Copilot gates `xhigh` to specific families; anything else is downgraded
/// to `high` with a warning rather than rejected.
pub fn copilot_effort(base: &str, effort: &str) -> String {
    if effort != "xhigh" {
        return effort.to_string();
    }
    if XHIGH_FAMILIES
        .iter()
        .any(|family| base.starts_with(family))
    {
        return effort.to_string();
    }
    warn!(
        event = "effort_downgraded",
        model = %base,
        requested = "xhigh",
        "model family does not accept xhigh"
    );
    "high".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bareword_effort_is_split() {
        let split = split_model_suffixes("gpt-5.2-xhigh");
        assert_eq!(split.base, "gpt-5.2");
        assert_eq!(split.effort.as_deref(), Some("xhigh"));
        assert_eq!(split.thinking, None);
    }

    #[test]
    fn plain_models_pass_through() {
        let split = split_model_suffixes("claude-sonnet-4-5");
        assert_eq!(split.base, "claude-sonnet-4-5");
        assert_eq!(split.effort, None);
    }

    #[test]
    fn numeric_thinking_tail_is_a_budget() {
        let split = split_model_suffixes("claude-sonnet-4-5(16384)");
        assert_eq!(split.base, "claude-sonnet-4-5");
        assert_eq!(split.thinking, Some(ThinkingValue::Budget(16384)));
    }

    #[test]
    fn word_thinking_tail_is_a_level() {
        let split = split_model_suffixes("gemini-2.5-pro(auto)");
        assert_eq!(split.base, "gemini-2.5-pro");
        assert_eq!(
            split.thinking,
            Some(ThinkingValue::Level("auto".to_string()))
        );
    }

    #[test]
    fn thinking_and_effort_compose() {
        let split = split_model_suffixes("gpt-5-high(2048)");
        assert_eq!(split.base, "gpt-5");
        assert_eq!(split.effort.as_deref(), Some("high"));
        assert_eq!(split.thinking, Some(ThinkingValue::Budget(2048)));
    }

    #[test]
    fn xhigh_gating_downgrades_unknown_families() {
        assert_eq!(copilot_effort("gpt-5.2", "xhigh"), "xhigh");
        assert_eq!(copilot_effort("gpt-4o", "xhigh"), "high");
        assert_eq!(copilot_effort("gpt-4o", "low"), "low");
    }
}
