use serde_json::Value;

use llmux_protocol::Dialect;

/// One payload-rewrite rule, matched by `(protocol, model-pattern)` with `*`
/// wildcards in the model pattern.
#[derive(Debug, Clone, PartialEq)]
pub struct PayloadRule {
    /// Dialect name or `*`.
    pub protocol: String,
    /// Model pattern; `*` matches any run of characters.
    pub model: String,
    /// Dot-separated path into the body (`reasoning.effort`).
    pub path: String,
    /// Value to write; `None` only makes sense for filter rules.
    pub value: Option<Value>,
}

impl PayloadRule {
    fn matches(&self, protocol: Dialect, models: &[&str]) -> bool {
        if self.protocol != "*" && Dialect::parse(&self.protocol) != Some(protocol) {
            return false;
        }
        models
            .iter()
            .any(|model| glob_match(&self.model, model))
    }
}

/// The configured rule sets, applied in order: defaults (first-wins, write
/// if absent), overrides (last-wins, write unconditionally), filters
/// (delete path).
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PayloadRules {
    pub defaults: Vec<PayloadRule>,
    pub overrides: Vec<PayloadRule>,
    pub filters: Vec<PayloadRule>,
}

impl PayloadRules {
    pub fn is_empty(&self) -> bool {
        self.defaults.is_empty() && self.overrides.is_empty() && self.filters.is_empty()
    }

    /// Applies the rule sets to a translated body. `models` carries every
    /// candidate name for matching (resolved and requested).
    pub fn apply(&self, protocol: Dialect, models: &[&str], body: &mut Value) {
        for rule in &self.defaults {
            if !rule.matches(protocol, models) {
                continue;
            }
            let Some(value) = &rule.value else {
                continue;
            };
            if path_get(body, &rule.path).is_none() {
                path_set(body, &rule.path, value.clone());
            }
        }
        for rule in &self.overrides {
            if !rule.matches(protocol, models) {
                continue;
            }
            if let Some(value) = &rule.value {
                path_set(body, &rule.path, value.clone());
            }
        }
        for rule in &self.filters {
            if rule.matches(protocol, models) {
                path_delete(body, &rule.path);
            }
        }
    }
}

/// `*`-wildcard match; `*` spans any run of characters including none.
pub fn glob_match(pattern: &str, value: &str) -> bool {
    fn inner(pattern: &[u8], value: &[u8]) -> bool {
        match pattern.first() {
            None => value.is_empty(),
            Some(b'*') => {
                (0..=value.len()).any(|skip| inner(&pattern[1..], &value[skip..]))
            }
            Some(byte) => value.first() == Some(byte) && inner(&pattern[1..], &value[1..]),
        }
    }
    inner(pattern.as_bytes(), value.as_bytes())
}

fn path_get<'a>(body: &'a Value, path: &str) -> Option<&'a Value> {
    let mut cursor = body;
    for segment in path.split('.') {
        cursor = cursor.get(segment)?;
    }
    Some(cursor)
}

fn path_set(body: &mut Value, path: &str, value: Value) {
    let mut cursor = body;
    let segments = path.split('.').collect::<Vec<_>>();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    for segment in parents {
        let Some(obj) = cursor.as_object_mut() else {
            return;
        };
        cursor = obj
            .entry((*segment).to_string())
            .or_insert_with(|| Value::Object(serde_json::Map::new()));
    }
    if let Some(obj) = cursor.as_object_mut() {
        obj.insert((*last).to_string(), value);
    }
}

fn path_delete(body: &mut Value, path: &str) {
    let mut cursor = body;
    let segments = path.split('.').collect::<Vec<_>>();
    let Some((last, parents)) = segments.split_last() else {
        return;
    };
    for segment in parents {
        let Some(next) = cursor.get_mut(*segment) else {
            return;
        };
        cursor = next;
    }
    if let Some(obj) = cursor.as_object_mut() {
        obj.remove(*last);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn rule(protocol: &str, model: &str, path: &str, value: Option<Value>) -> PayloadRule {
        PayloadRule {
            protocol: protocol.to_string(),
            model: model.to_string(),
            path: path.to_string(),
            value,
        }
    }

    #[test]
    fn glob_wildcards() {
        assert!(glob_match("*", "anything"));
        assert!(glob_match("gpt-5*", "gpt-5.2-codex"));
        assert!(glob_match("gpt-5*", "gpt-5"));
        assert!(!glob_match("gpt-5*", "gpt-4o"));
        assert!(glob_match("*-codex", "gpt-5.2-codex"));
        assert!(glob_match("claude-*-4-5", "claude-sonnet-4-5"));
    }

    #[test]
    fn defaults_write_only_when_absent_first_wins() {
        let rules = PayloadRules {
            defaults: vec![
                rule("*", "*", "temperature", Some(json!(0.5))),
                rule("*", "*", "temperature", Some(json!(0.9))),
            ],
            ..PayloadRules::default()
        };
        let mut body = json!({});
        rules.apply(Dialect::OpenAI, &["gpt-4o"], &mut body);
        assert_eq!(body["temperature"], 0.5);

        let mut body = json!({"temperature": 1.0});
        rules.apply(Dialect::OpenAI, &["gpt-4o"], &mut body);
        assert_eq!(body["temperature"], 1.0);
    }

    #[test]
    fn overrides_write_unconditionally_last_wins() {
        let rules = PayloadRules {
            overrides: vec![
                rule("*", "*", "reasoning.effort", Some(json!("low"))),
                rule("*", "*", "reasoning.effort", Some(json!("high"))),
            ],
            ..PayloadRules::default()
        };
        let mut body = json!({"reasoning": {"effort": "medium"}});
        rules.apply(Dialect::OpenAI, &["gpt-5"], &mut body);
        assert_eq!(body["reasoning"]["effort"], "high");
    }

    #[test]
    fn filters_delete_paths() {
        let rules = PayloadRules {
            filters: vec![rule("openai", "gpt-5*", "temperature", None)],
            ..PayloadRules::default()
        };
        let mut body = json!({"temperature": 0.7, "top_p": 0.9});
        rules.apply(Dialect::OpenAI, &["gpt-5.2"], &mut body);
        assert!(body.get("temperature").is_none());
        assert_eq!(body["top_p"], 0.9);
    }

    #[test]
    fn rules_match_any_model_candidate() {
        // The requested (pre-alias) name matches even when the resolved one
        // does not.
        let rules = PayloadRules {
            overrides: vec![rule("*", "copilot-*", "x", Some(json!(1)))],
            ..PayloadRules::default()
        };
        let mut body = json!({});
        rules.apply(Dialect::OpenAI, &["gpt-5", "copilot-gpt-5"], &mut body);
        assert_eq!(body["x"], 1);
    }

    #[test]
    fn protocol_must_match_when_not_wildcard() {
        let rules = PayloadRules {
            overrides: vec![rule("claude", "*", "x", Some(json!(1)))],
            ..PayloadRules::default()
        };
        let mut body = json!({});
        rules.apply(Dialect::OpenAI, &["m"], &mut body);
        assert!(body.get("x").is_none());
        rules.apply(Dialect::Claude, &["m"], &mut body);
        assert_eq!(body["x"], 1);
    }

    #[test]
    fn nested_paths_are_created_on_demand() {
        let rules = PayloadRules {
            overrides: vec![rule("*", "*", "a.b.c", Some(json!(true)))],
            ..PayloadRules::default()
        };
        let mut body = json!({});
        rules.apply(Dialect::OpenAI, &["m"], &mut body);
        assert_eq!(body["a"]["b"]["c"], true);
    }
}
