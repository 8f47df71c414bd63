use serde_json::Value;
use tiktoken_rs::{CoreBPE, get_bpe_from_model, o200k_base};

use llmux_common::{ProxyError, ProxyResult};

/// Counts tokens locally for providers without a count endpoint. Falls back
/// to the o200k encoding for unknown models.
pub fn count_text(model: &str, text: &str) -> ProxyResult<i64> {
    let bpe = bpe_for_model(model)?;
    Ok(bpe.encode_ordinary(text).len() as i64)
}

/// Approximates the prompt token count of a chat-shaped request body by
/// counting every textual message part.
pub fn count_request(model: &str, body: &Value) -> ProxyResult<i64> {
    let bpe = bpe_for_model(model)?;
    let mut total = 0i64;
    for text in collect_texts(body) {
        total += bpe.encode_ordinary(&text).len() as i64;
    }
    Ok(total)
}

fn bpe_for_model(model: &str) -> ProxyResult<CoreBPE> {
    if let Ok(bpe) = get_bpe_from_model(model) {
        return Ok(bpe);
    }
    o200k_base().map_err(|err| ProxyError::internal(format!("tokenizer init: {err}")))
}

fn collect_texts(body: &Value) -> Vec<String> {
    let mut out = Vec::new();
    if let Some(system) = body.get("system").and_then(Value::as_str) {
        out.push(system.to_string());
    }
    if let Some(instructions) = body.get("instructions").and_then(Value::as_str) {
        out.push(instructions.to_string());
    }
    for key in ["messages", "input", "contents"] {
        let Some(items) = body.get(key).and_then(Value::as_array) else {
            continue;
        };
        for item in items {
            collect_item_texts(item, &mut out);
        }
    }
    out
}

fn collect_item_texts(item: &Value, out: &mut Vec<String>) {
    match item.get("content") {
        Some(Value::String(text)) => out.push(text.clone()),
        Some(Value::Array(parts)) => {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push(text.to_string());
                }
            }
        }
        _ => {}
    }
    if let Some(parts) = item.get("parts").and_then(Value::as_array) {
        for part in parts {
            if let Some(text) = part.get("text").and_then(Value::as_str) {
                out.push(text.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn counts_are_positive_for_nonempty_text() {
        let count = count_text("gpt-4o", "hello world").unwrap();
        assert!(count >= 2);
    }

    #[test]
    fn unknown_models_fall_back_to_o200k() {
        let count = count_text("totally-made-up-model", "hello world").unwrap();
        assert!(count > 0);
    }

    #[test]
    fn request_counting_walks_message_shapes() {
        let body = json!({
            "system": "be brief",
            "messages": [
                {"role": "user", "content": "hello"},
                {"role": "user", "content": [{"type": "text", "text": "world"}]},
            ],
        });
        let count = count_request("gpt-4o", &body).unwrap();
        assert!(count >= 4);
    }
}
