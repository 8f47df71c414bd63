use serde_json::{Map, Value, json};

use crate::value_util::{arr_field, copy_field, str_field};
use crate::{TranslateError, TranslateResult};

use super::set_stream_flag;

pub fn translate(model: &str, body: &Value, stream: bool) -> TranslateResult<Value> {
    let messages = arr_field(body, "messages")
        .ok_or_else(|| TranslateError::Invalid("messages request has no messages".to_string()))?;

    let mut out_messages = Vec::new();
    if let Some(system) = system_text(body.get("system")) {
        out_messages.push(json!({"role": "system", "content": system}));
    }
    for message in messages {
        out_messages.extend(chat_messages(message));
    }

    let mut out = Map::new();
    out.insert("model".to_string(), Value::String(model.to_string()));
    out.insert("messages".to_string(), Value::Array(out_messages));
    copy_field(body, &mut out, "max_tokens", "max_tokens");
    copy_field(body, &mut out, "temperature", "temperature");
    copy_field(body, &mut out, "top_p", "top_p");
    if let Some(stops) = body.get("stop_sequences").cloned() {
        out.insert("stop".to_string(), stops);
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let tools = tools.iter().filter_map(chat_tool).collect::<Vec<_>>();
        if !tools.is_empty() {
            out.insert("tools".to_string(), Value::Array(tools));
        }
    }
    if let Some(choice) = body.get("tool_choice").and_then(chat_tool_choice) {
        out.insert("tool_choice".to_string(), choice);
    }
    set_stream_flag(&mut out, stream);

    Ok(Value::Object(out))
}

fn system_text(system: Option<&Value>) -> Option<String> {
    match system? {
        Value::String(text) => Some(text.clone()),
        Value::Array(blocks) => {
            let text = blocks
                .iter()
                .filter_map(|block| str_field(block, "text"))
                .collect::<Vec<_>>()
                .join("\n\n");
            (!text.is_empty()).then_some(text)
        }
        _ => None,
    }
}

/// One Claude message may fan out into several chat messages: tool results
/// become their own `role: tool` entries.
fn chat_messages(message: &Value) -> Vec<Value> {
    let role = str_field(message, "role").unwrap_or("user");
    let content = message.get("content");

    let Some(Value::Array(blocks)) = content else {
        let text = content.and_then(Value::as_str).unwrap_or_default();
        return vec![json!({"role": role, "content": text})];
    };

    let mut out = Vec::new();
    let mut text_parts = Vec::new();
    let mut tool_calls = Vec::new();

    for block in blocks {
        match str_field(block, "type") {
            Some("text") => {
                if let Some(text) = str_field(block, "text") {
                    text_parts.push(text.to_string());
                }
            }
            Some("tool_use") => tool_calls.push(json!({
                "id": str_field(block, "id").unwrap_or_default(),
                "type": "function",
                "function": {
                    "name": str_field(block, "name").unwrap_or_default(),
                    "arguments": block.get("input").map(Value::to_string).unwrap_or_else(|| "{}".to_string()),
                },
            })),
            Some("tool_result") => out.push(json!({
                "role": "tool",
                "tool_call_id": str_field(block, "tool_use_id").unwrap_or_default(),
                "content": tool_result_text(block.get("content")),
            })),
            _ => {}
        }
    }

    if !text_parts.is_empty() || !tool_calls.is_empty() {
        let mut message = Map::new();
        message.insert("role".to_string(), Value::String(role.to_string()));
        message.insert("content".to_string(), Value::String(text_parts.join("")));
        if !tool_calls.is_empty() {
            message.insert("tool_calls".to_string(), Value::Array(tool_calls));
        }
        out.insert(0, Value::Object(message));
    }

    out
}

fn tool_result_text(content: Option<&Value>) -> String {
    match content {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(blocks)) => blocks
            .iter()
            .filter_map(|block| str_field(block, "text"))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn chat_tool(tool: &Value) -> Option<Value> {
    let name = str_field(tool, "name")?;
    Some(json!({
        "type": "function",
        "function": {
            "name": name,
            "description": str_field(tool, "description").unwrap_or_default(),
            "parameters": tool.get("input_schema").cloned().unwrap_or_else(|| json!({"type": "object"})),
        },
    }))
}

fn chat_tool_choice(choice: &Value) -> Option<Value> {
    match str_field(choice, "type") {
        Some("auto") => Some(Value::String("auto".to_string())),
        Some("any") => Some(Value::String("required".to_string())),
        Some("tool") => {
            let name = str_field(choice, "name")?;
            Some(json!({"type": "function", "function": {"name": name}}))
        }
        _ => None,
    }
}
