use serde_json::{Map, Value, json};

use crate::value_util::{arr_field, copy_field, first_number, parse_args, str_field};
use crate::{TranslateError, TranslateResult};

use super::{set_stream_flag, stop_sequences};

const DEFAULT_MAX_TOKENS: i64 = 4096;

pub fn translate(model: &str, body: &Value, stream: bool) -> TranslateResult<Value> {
    let messages = arr_field(body, "messages")
        .ok_or_else(|| TranslateError::Invalid("chat request has no messages".to_string()))?;

    let mut system_parts = Vec::new();
    let mut out_messages = Vec::new();

    for message in messages {
        let role = str_field(message, "role").unwrap_or("user");
        match role {
            "system" | "developer" => {
                if let Some(text) = content_text(message.get("content")) {
                    system_parts.push(text);
                }
            }
            "assistant" => out_messages.push(assistant_message(message)),
            "tool" => out_messages.push(tool_result_message(message)),
            _ => out_messages.push(user_message(message)),
        }
    }

    let mut out = Map::new();
    out.insert("model".to_string(), Value::String(model.to_string()));
    out.insert("messages".to_string(), Value::Array(out_messages));
    if !system_parts.is_empty() {
        out.insert("system".to_string(), Value::String(system_parts.join("\n\n")));
    }
    // Anthropic requires max_tokens.
    out.insert(
        "max_tokens".to_string(),
        first_number(body, &["max_completion_tokens", "max_tokens"])
            .unwrap_or_else(|| Value::from(DEFAULT_MAX_TOKENS)),
    );
    copy_field(body, &mut out, "temperature", "temperature");
    copy_field(body, &mut out, "top_p", "top_p");
    if let Some(stops) = stop_sequences(body, "stop") {
        out.insert("stop_sequences".to_string(), stops);
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let tools = tools.iter().filter_map(claude_tool).collect::<Vec<_>>();
        if !tools.is_empty() {
            out.insert("tools".to_string(), Value::Array(tools));
        }
    }
    if let Some(choice) = body.get("tool_choice").and_then(claude_tool_choice) {
        out.insert("tool_choice".to_string(), choice);
    }
    set_stream_flag(&mut out, stream);

    Ok(Value::Object(out))
}

fn user_message(message: &Value) -> Value {
    let content = match message.get("content") {
        Some(Value::String(text)) => Value::String(text.clone()),
        Some(Value::Array(parts)) => {
            Value::Array(parts.iter().filter_map(claude_content_block).collect())
        }
        _ => Value::String(String::new()),
    };
    json!({"role": "user", "content": content})
}

fn assistant_message(message: &Value) -> Value {
    let mut blocks = Vec::new();
    if let Some(text) = content_text(message.get("content"))
        && !text.is_empty()
    {
        blocks.push(json!({"type": "text", "text": text}));
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call.get("function").cloned().unwrap_or_default();
            let args = str_field(&function, "arguments")
                .map(parse_args)
                .unwrap_or_else(|| Value::Object(Map::new()));
            blocks.push(json!({
                "type": "tool_use",
                "id": str_field(call, "id").unwrap_or_default(),
                "name": str_field(&function, "name").unwrap_or_default(),
                "input": args,
            }));
        }
    }
    json!({"role": "assistant", "content": blocks})
}

fn tool_result_message(message: &Value) -> Value {
    let content = content_text(message.get("content")).unwrap_or_default();
    json!({
        "role": "user",
        "content": [{
            "type": "tool_result",
            "tool_use_id": str_field(message, "tool_call_id").unwrap_or_default(),
            "content": content,
        }],
    })
}

fn claude_content_block(part: &Value) -> Option<Value> {
    match str_field(part, "type") {
        Some("text") => Some(json!({"type": "text", "text": str_field(part, "text").unwrap_or_default()})),
        Some("image_url") => {
            let url = part.get("image_url").and_then(|img| str_field(img, "url"))?;
            Some(json!({"type": "image", "source": {"type": "url", "url": url}}))
        }
        _ => None,
    }
}

fn claude_tool(tool: &Value) -> Option<Value> {
    if str_field(tool, "type") != Some("function") {
        return None;
    }
    let function = tool.get("function")?;
    Some(json!({
        "name": str_field(function, "name")?,
        "description": str_field(function, "description").unwrap_or_default(),
        "input_schema": function.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"})),
    }))
}

fn claude_tool_choice(choice: &Value) -> Option<Value> {
    match choice {
        Value::String(mode) => match mode.as_str() {
            "auto" => Some(json!({"type": "auto"})),
            "required" => Some(json!({"type": "any"})),
            // "none": Anthropic has no equivalent; omitting tools disables them.
            _ => None,
        },
        Value::Object(_) => {
            let name = choice.get("function").and_then(|f| str_field(f, "name"))?;
            Some(json!({"type": "tool", "name": name}))
        }
        _ => None,
    }
}

/// Flattens a content value (string or text-part array) into plain text.
pub(crate) fn content_text(content: Option<&Value>) -> Option<String> {
    match content? {
        Value::String(text) => Some(text.clone()),
        Value::Array(parts) => {
            let text = parts
                .iter()
                .filter_map(|part| str_field(part, "text"))
                .collect::<Vec<_>>()
                .join("");
            Some(text)
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_messages_become_system_field() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
            ],
        });
        let out = translate("claude-sonnet-4-5", &body, false).unwrap();
        assert_eq!(out["system"], "be brief");
        assert_eq!(out["messages"].as_array().unwrap().len(), 1);
        assert_eq!(out["max_tokens"], DEFAULT_MAX_TOKENS);
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        let body = json!({
            "messages": [
                {"role": "assistant", "content": null, "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "lookup", "arguments": "{\"q\":\"rust\"}"},
                }]},
                {"role": "tool", "tool_call_id": "call_1", "content": "found"},
            ],
        });
        let out = translate("claude-sonnet-4-5", &body, false).unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0]["content"][0]["type"], "tool_use");
        assert_eq!(messages[0]["content"][0]["input"]["q"], "rust");
        assert_eq!(messages[1]["content"][0]["type"], "tool_result");
        assert_eq!(messages[1]["content"][0]["tool_use_id"], "call_1");
    }

    #[test]
    fn tools_and_stops_are_mapped() {
        let body = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "max_completion_tokens": 512,
            "stop": "END",
            "tools": [{"type": "function", "function": {
                "name": "lookup", "description": "d", "parameters": {"type": "object"},
            }}],
            "tool_choice": "required",
        });
        let out = translate("claude-sonnet-4-5", &body, true).unwrap();
        assert_eq!(out["max_tokens"], 512);
        assert_eq!(out["stop_sequences"][0], "END");
        assert_eq!(out["tools"][0]["name"], "lookup");
        assert_eq!(out["tool_choice"]["type"], "any");
        assert_eq!(out["stream"], true);
    }
}
