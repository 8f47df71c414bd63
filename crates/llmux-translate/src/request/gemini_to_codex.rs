use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::callid::derive_call_id;
use crate::value_util::{arr_field, str_field};
use crate::{TranslateError, TranslateResult};

use super::gemini_to_openai::instruction_text;

/// Gemini function calls carry no ids, but the Responses schema requires a
/// `call_id` on both the call and its output. The id is derived by hashing
/// the call's name and key-order-normalized args, and the matching
/// `functionResponse` (correlated by name, most recent call wins) reuses it.
pub fn translate(model: &str, body: &Value, stream: bool) -> TranslateResult<Value> {
    let contents = arr_field(body, "contents")
        .ok_or_else(|| TranslateError::Invalid("generateContent has no contents".to_string()))?;

    let mut input = Vec::new();
    let mut last_call_ids: HashMap<String, String> = HashMap::new();

    for content in contents {
        let role = match str_field(content, "role") {
            Some("model") => "assistant",
            _ => "user",
        };
        let Some(parts) = arr_field(content, "parts") else {
            continue;
        };
        for part in parts {
            if let Some(text) = str_field(part, "text") {
                let part_type = if role == "assistant" {
                    "output_text"
                } else {
                    "input_text"
                };
                input.push(json!({
                    "type": "message",
                    "role": role,
                    "content": [{"type": part_type, "text": text}],
                }));
            }
            if let Some(call) = part.get("functionCall") {
                let name = str_field(call, "name").unwrap_or_default();
                let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                let call_id = derive_call_id(name, &args);
                last_call_ids.insert(name.to_string(), call_id.clone());
                input.push(json!({
                    "type": "function_call",
                    "call_id": call_id,
                    "name": name,
                    "arguments": args.to_string(),
                }));
            }
            if let Some(response) = part.get("functionResponse") {
                let name = str_field(response, "name").unwrap_or_default();
                let call_id = last_call_ids.get(name).cloned().unwrap_or_default();
                let output = response
                    .get("response")
                    .map(response_text)
                    .unwrap_or_default();
                input.push(json!({
                    "type": "function_call_output",
                    "call_id": call_id,
                    "output": output,
                }));
            }
        }
    }

    let mut out = Map::new();
    out.insert("model".to_string(), Value::String(model.to_string()));
    out.insert("input".to_string(), Value::Array(input));
    if let Some(text) = instruction_text(body.get("systemInstruction")) {
        out.insert("instructions".to_string(), Value::String(text));
    }
    if let Some(generation) = body.get("generationConfig") {
        if let Some(max) = generation.get("maxOutputTokens").filter(|v| v.is_number()) {
            out.insert("max_output_tokens".to_string(), max.clone());
        }
        if let Some(temperature) = generation.get("temperature").filter(|v| v.is_number()) {
            out.insert("temperature".to_string(), temperature.clone());
        }
        if let Some(top_p) = generation.get("topP").filter(|v| v.is_number()) {
            out.insert("top_p".to_string(), top_p.clone());
        }
    }
    let tools = body
        .get("tools")
        .and_then(Value::as_array)
        .map(|groups| {
            groups
                .iter()
                .filter_map(|group| group.get("functionDeclarations"))
                .filter_map(Value::as_array)
                .flatten()
                .filter_map(responses_tool)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if !tools.is_empty() {
        out.insert("tools".to_string(), Value::Array(tools));
    }
    if stream {
        out.insert("stream".to_string(), Value::Bool(true));
    }

    Ok(Value::Object(out))
}

fn response_text(response: &Value) -> String {
    if let Some(result) = response.get("result").and_then(Value::as_str) {
        return result.to_string();
    }
    response.to_string()
}

fn responses_tool(declaration: &Value) -> Option<Value> {
    Some(json!({
        "type": "function",
        "name": str_field(declaration, "name")?,
        "description": str_field(declaration, "description").unwrap_or_default(),
        "parameters": declaration.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"})),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call_body(args: Value) -> Value {
        json!({
            "contents": [
                {"role": "model", "parts": [{"functionCall": {"name": "lookup", "args": args}}]},
                {"role": "user", "parts": [{"functionResponse": {
                    "name": "lookup", "response": {"result": "found"},
                }}]},
            ],
        })
    }

    #[test]
    fn call_id_is_deterministic_across_key_order() {
        let a = translate("gpt-5", &call_body(json!({"a": 1, "b": 2})), false).unwrap();
        let b = translate("gpt-5", &call_body(json!({"b": 2, "a": 1})), false).unwrap();
        assert_eq!(a["input"][0]["call_id"], b["input"][0]["call_id"]);
        // Byte-identical output bodies for logically identical requests.
        assert_eq!(
            serde_json::to_vec(&a).unwrap(),
            serde_json::to_vec(&b).unwrap()
        );
    }

    #[test]
    fn function_output_reuses_the_call_id() {
        let out = translate("gpt-5", &call_body(json!({"q": "rust"})), false).unwrap();
        assert_eq!(out["input"][0]["type"], "function_call");
        assert_eq!(out["input"][1]["type"], "function_call_output");
        assert_eq!(out["input"][0]["call_id"], out["input"][1]["call_id"]);
        assert_eq!(out["input"][1]["output"], "found");
    }

    #[test]
    fn instructions_and_text_map() {
        let body = json!({
            "systemInstruction": {"parts": [{"text": "be brief"}]},
            "contents": [{"role": "user", "parts": [{"text": "hi"}]}],
            "generationConfig": {"maxOutputTokens": 99},
        });
        let out = translate("gpt-5", &body, true).unwrap();
        assert_eq!(out["instructions"], "be brief");
        assert_eq!(out["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(out["max_output_tokens"], 99);
        assert_eq!(out["stream"], true);
    }
}
