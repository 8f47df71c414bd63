use serde_json::{Value, json};

use llmux_protocol::Dialect;

/// Shapes a token count into the client dialect's count-tokens response.
/// `raw_usage` carries the upstream's own usage object when one exists and
/// is preferred over the bare count for dialects that can represent it.
pub fn translate_token_count(to: Dialect, count: i64, raw_usage: Option<&Value>) -> Value {
    match to {
        Dialect::Claude => {
            let count = raw_usage
                .and_then(|usage| usage.get("input_tokens"))
                .and_then(Value::as_i64)
                .unwrap_or(count);
            json!({"input_tokens": count})
        }
        Dialect::Gemini => {
            let count = raw_usage
                .and_then(|usage| usage.get("totalTokens"))
                .and_then(Value::as_i64)
                .unwrap_or(count);
            json!({"totalTokens": count})
        }
        _ => json!({"object": "response.input_tokens", "input_tokens": count}),
    }
}
