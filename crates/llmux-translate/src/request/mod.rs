use serde_json::{Map, Value};

use llmux_protocol::Dialect;

use crate::{TranslateError, TranslateResult};

mod claude_to_openai;
mod gemini_to_codex;
mod gemini_to_openai;
mod openai_to_claude;
mod openai_to_gemini;
mod openai_to_grok;
mod openai_to_responses;
mod responses_to_openai;

/// Translates a request body from the client dialect into the provider
/// dialect. Pure; no I/O. The returned body carries `model` (where the
/// dialect embeds it) and the requested stream flag.
pub fn translate_request(
    from: Dialect,
    to: Dialect,
    model: &str,
    body: &Value,
    stream: bool,
) -> TranslateResult<Value> {
    if from == to {
        return Ok(identity(to, model, body, stream));
    }

    match (from, to) {
        (Dialect::OpenAI, Dialect::Claude) => openai_to_claude::translate(model, body, stream),
        (Dialect::Claude, Dialect::OpenAI) => claude_to_openai::translate(model, body, stream),
        (Dialect::OpenAI, Dialect::Gemini) => openai_to_gemini::translate(model, body),
        (Dialect::Gemini, Dialect::OpenAI) => gemini_to_openai::translate(model, body, stream),
        (Dialect::OpenAI, Dialect::OpenAIResponses) | (Dialect::OpenAI, Dialect::Codex) => {
            openai_to_responses::translate(model, body, stream)
        }
        (Dialect::OpenAIResponses, Dialect::OpenAI) => {
            responses_to_openai::translate(model, body, stream)
        }
        // The Responses and Codex schemas are one family; the codex executor
        // applies its endpoint quirks after translation.
        (Dialect::OpenAIResponses, Dialect::Codex) | (Dialect::Codex, Dialect::OpenAIResponses) => {
            Ok(identity(to, model, body, stream))
        }
        (Dialect::Gemini, Dialect::Codex) => gemini_to_codex::translate(model, body, stream),
        (Dialect::OpenAI, Dialect::Grok) => openai_to_grok::translate(model, body),
        _ => Err(TranslateError::UnsupportedPair { from, to }),
    }
}

fn identity(dialect: Dialect, model: &str, body: &Value, stream: bool) -> Value {
    let mut out = body.as_object().cloned().unwrap_or_default();
    match dialect {
        Dialect::Gemini => {
            // Gemini carries the model in the URL path, streaming in the verb.
        }
        Dialect::Grok => {
            out.insert("modelName".to_string(), Value::String(model.to_string()));
        }
        _ => {
            out.insert("model".to_string(), Value::String(model.to_string()));
            set_stream_flag(&mut out, stream);
        }
    }
    Value::Object(out)
}

pub(crate) fn set_stream_flag(out: &mut Map<String, Value>, stream: bool) {
    if stream {
        out.insert("stream".to_string(), Value::Bool(true));
    } else {
        out.remove("stream");
        out.remove("stream_options");
    }
}

/// Normalizes an OpenAI `stop` value (string or array) into an array.
pub(crate) fn stop_sequences(body: &Value, key: &str) -> Option<Value> {
    match body.get(key)? {
        Value::String(stop) => Some(Value::Array(vec![Value::String(stop.clone())])),
        Value::Array(stops) if !stops.is_empty() => Some(Value::Array(stops.clone())),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_sets_model_and_stream() {
        let body = json!({"messages": [], "model": "old", "stream_options": {"include_usage": true}});
        let out = translate_request(Dialect::OpenAI, Dialect::OpenAI, "gpt-4o", &body, false)
            .unwrap();
        assert_eq!(out["model"], "gpt-4o");
        assert!(out.get("stream").is_none());
        assert!(out.get("stream_options").is_none());
    }

    #[test]
    fn identity_stream_true_is_preserved() {
        let body = json!({"messages": []});
        let out =
            translate_request(Dialect::Claude, Dialect::Claude, "claude-sonnet-4-5", &body, true)
                .unwrap();
        assert_eq!(out["stream"], true);
    }

    #[test]
    fn unsupported_pair_is_reported() {
        let err = translate_request(Dialect::Claude, Dialect::Gemini, "m", &json!({}), false)
            .unwrap_err();
        assert!(matches!(err, TranslateError::UnsupportedPair { .. }));
    }
}
