use serde_json::{Map, Value, json};

use crate::value_util::{arr_field, copy_field, first_number, str_field};
use crate::{TranslateError, TranslateResult};

use super::openai_to_claude::content_text;

pub fn translate(model: &str, body: &Value, stream: bool) -> TranslateResult<Value> {
    let messages = arr_field(body, "messages")
        .ok_or_else(|| TranslateError::Invalid("chat request has no messages".to_string()))?;

    let mut instructions = Vec::new();
    let mut input = Vec::new();

    for message in messages {
        let role = str_field(message, "role").unwrap_or("user");
        match role {
            "system" | "developer" => {
                if let Some(text) = content_text(message.get("content")) {
                    instructions.push(text);
                }
            }
            "assistant" => {
                if let Some(text) = content_text(message.get("content"))
                    && !text.is_empty()
                {
                    input.push(message_item("assistant", "output_text", &text));
                }
                if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
                    for call in calls {
                        let function = call.get("function").cloned().unwrap_or_default();
                        input.push(json!({
                            "type": "function_call",
                            "call_id": str_field(call, "id").unwrap_or_default(),
                            "name": str_field(&function, "name").unwrap_or_default(),
                            "arguments": str_field(&function, "arguments").unwrap_or("{}"),
                        }));
                    }
                }
            }
            "tool" => input.push(json!({
                "type": "function_call_output",
                "call_id": str_field(message, "tool_call_id").unwrap_or_default(),
                "output": content_text(message.get("content")).unwrap_or_default(),
            })),
            _ => {
                let text = content_text(message.get("content")).unwrap_or_default();
                input.push(message_item("user", "input_text", &text));
            }
        }
    }

    let mut out = Map::new();
    out.insert("model".to_string(), Value::String(model.to_string()));
    out.insert("input".to_string(), Value::Array(input));
    if !instructions.is_empty() {
        out.insert(
            "instructions".to_string(),
            Value::String(instructions.join("\n\n")),
        );
    }
    if let Some(max) = first_number(body, &["max_completion_tokens", "max_tokens"]) {
        out.insert("max_output_tokens".to_string(), max);
    }
    copy_field(body, &mut out, "temperature", "temperature");
    copy_field(body, &mut out, "top_p", "top_p");
    copy_field(body, &mut out, "parallel_tool_calls", "parallel_tool_calls");
    if let Some(effort) = str_field(body, "reasoning_effort") {
        out.insert("reasoning".to_string(), json!({"effort": effort}));
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let tools = chat_tools_to_responses(tools);
        if !tools.is_empty() {
            out.insert("tools".to_string(), Value::Array(tools));
        }
    }
    copy_field(body, &mut out, "tool_choice", "tool_choice");
    if stream {
        out.insert("stream".to_string(), Value::Bool(true));
    }

    Ok(Value::Object(out))
}

fn message_item(role: &str, part_type: &str, text: &str) -> Value {
    json!({
        "type": "message",
        "role": role,
        "content": [{"type": part_type, "text": text}],
    })
}

/// Chat function tools nest under `function`; Responses tools are flat.
pub(crate) fn chat_tools_to_responses(tools: &[Value]) -> Vec<Value> {
    tools
        .iter()
        .filter(|tool| str_field(tool, "type") == Some("function"))
        .filter_map(|tool| {
            let function = tool.get("function")?;
            Some(json!({
                "type": "function",
                "name": str_field(function, "name")?,
                "description": str_field(function, "description").unwrap_or_default(),
                "parameters": function.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"})),
            }))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn system_messages_become_instructions() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
            ],
            "max_tokens": 100,
            "reasoning_effort": "high",
        });
        let out = translate("gpt-5", &body, true).unwrap();
        assert_eq!(out["instructions"], "be brief");
        assert_eq!(out["input"][0]["type"], "message");
        assert_eq!(out["input"][0]["content"][0]["type"], "input_text");
        assert_eq!(out["max_output_tokens"], 100);
        assert_eq!(out["reasoning"]["effort"], "high");
        assert_eq!(out["stream"], true);
    }

    #[test]
    fn tool_calls_become_function_call_items() {
        let body = json!({
            "messages": [
                {"role": "assistant", "tool_calls": [{
                    "id": "call_1",
                    "type": "function",
                    "function": {"name": "lookup", "arguments": "{\"q\":1}"},
                }]},
                {"role": "tool", "tool_call_id": "call_1", "content": "found"},
            ],
        });
        let out = translate("gpt-5", &body, false).unwrap();
        assert_eq!(out["input"][0]["type"], "function_call");
        assert_eq!(out["input"][0]["call_id"], "call_1");
        assert_eq!(out["input"][1]["type"], "function_call_output");
        assert_eq!(out["input"][1]["output"], "found");
    }

    #[test]
    fn chat_tools_flatten() {
        let tools = vec![json!({"type": "function", "function": {
            "name": "lookup", "description": "d", "parameters": {"type": "object"},
        }})];
        let out = chat_tools_to_responses(&tools);
        assert_eq!(out[0]["name"], "lookup");
        assert!(out[0].get("function").is_none());
    }
}
