use serde_json::{Map, Value, json};

use crate::callid::derive_call_id;
use crate::value_util::{arr_field, str_field};
use crate::{TranslateError, TranslateResult};

use super::set_stream_flag;

pub fn translate(model: &str, body: &Value, stream: bool) -> TranslateResult<Value> {
    let contents = arr_field(body, "contents")
        .ok_or_else(|| TranslateError::Invalid("generateContent has no contents".to_string()))?;

    let mut messages = Vec::new();
    if let Some(text) = instruction_text(body.get("systemInstruction")) {
        messages.push(json!({"role": "system", "content": text}));
    }
    for content in contents {
        messages.extend(chat_messages(content));
    }

    let mut out = Map::new();
    out.insert("model".to_string(), Value::String(model.to_string()));
    out.insert("messages".to_string(), Value::Array(messages));

    if let Some(generation) = body.get("generationConfig") {
        if let Some(temperature) = generation.get("temperature").filter(|v| v.is_number()) {
            out.insert("temperature".to_string(), temperature.clone());
        }
        if let Some(top_p) = generation.get("topP").filter(|v| v.is_number()) {
            out.insert("top_p".to_string(), top_p.clone());
        }
        if let Some(max) = generation.get("maxOutputTokens").filter(|v| v.is_number()) {
            out.insert("max_tokens".to_string(), max.clone());
        }
        if let Some(stops) = generation.get("stopSequences").filter(|v| v.is_array()) {
            out.insert("stop".to_string(), stops.clone());
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
                .filter_map(chat_tool)
                .collect::<Vec<_>>()
        })
        .unwrap_or_default();
    if !tools.is_empty() {
        out.insert("tools".to_string(), Value::Array(tools));
    }

    set_stream_flag(&mut out, stream);
    Ok(Value::Object(out))
}

pub(crate) fn instruction_text(instruction: Option<&Value>) -> Option<String> {
    let instruction = instruction?;
    if let Some(text) = instruction.as_str() {
        return Some(text.to_string());
    }
    let parts = instruction.get("parts")?.as_array()?;
    let text = parts
        .iter()
        .filter_map(|part| str_field(part, "text"))
        .collect::<Vec<_>>()
        .join("\n");
    (!text.is_empty()).then_some(text)
}

fn chat_messages(content: &Value) -> Vec<Value> {
    let role = match str_field(content, "role") {
        Some("model") => "assistant",
        _ => "user",
    };
    let Some(parts) = arr_field(content, "parts") else {
        return Vec::new();
    };

    let mut out = Vec::new();
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for part in parts {
        if let Some(text) = str_field(part, "text") {
            text_parts.push(text.to_string());
        }
        if let Some(call) = part.get("functionCall") {
            let name = str_field(call, "name").unwrap_or_default();
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            tool_calls.push(json!({
                // Gemini function calls carry no id; derive one that the
                // matching functionResponse can reproduce.
                "id": derive_call_id(name, &args),
                "type": "function",
                "function": {"name": name, "arguments": args.to_string()},
            }));
        }
        if let Some(response) = part.get("functionResponse") {
            let name = str_field(response, "name").unwrap_or_default();
            let output = response
                .get("response")
                .map(Value::to_string)
                .unwrap_or_default();
            out.push(json!({
                "role": "tool",
                "tool_call_id": derive_call_id(name, &json!({})),
                "content": output,
            }));
        }
    }

    if !text_parts.is_empty() || !tool_calls.is_empty() {
        let mut message = Map::new();
        message.insert("role".to_string(), Value::String(role.to_string()));
        message.insert(
            "content".to_string(),
            Value::String(text_parts.join("")),
        );
        if !tool_calls.is_empty() {
            message.insert("tool_calls".to_string(), Value::Array(tool_calls));
        }
        out.insert(0, Value::Object(message));
    }

    out
}

fn chat_tool(declaration: &Value) -> Option<Value> {
    Some(json!({
        "type": "function",
        "function": {
            "name": str_field(declaration, "name")?,
            "description": str_field(declaration, "description").unwrap_or_default(),
            "parameters": declaration.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"})),
        },
    }))
}
