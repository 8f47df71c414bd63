use serde_json::{Map, Value, json};

use crate::value_util::{copy_field, str_field};
use crate::TranslateResult;

use super::set_stream_flag;

pub fn translate(model: &str, body: &Value, stream: bool) -> TranslateResult<Value> {
    let mut messages = Vec::new();
    if let Some(instructions) = instructions_text(body.get("instructions")) {
        messages.push(json!({"role": "system", "content": instructions}));
    }

    match body.get("input") {
        Some(Value::String(text)) => {
            messages.push(json!({"role": "user", "content": text}));
        }
        Some(Value::Array(items)) => {
            for item in items {
                messages.extend(chat_message(item));
            }
        }
        _ => {}
    }

    let mut out = Map::new();
    out.insert("model".to_string(), Value::String(model.to_string()));
    out.insert("messages".to_string(), Value::Array(messages));
    if let Some(max) = body.get("max_output_tokens").filter(|v| v.is_number()) {
        out.insert("max_completion_tokens".to_string(), max.clone());
    }
    copy_field(body, &mut out, "temperature", "temperature");
    copy_field(body, &mut out, "top_p", "top_p");
    copy_field(body, &mut out, "parallel_tool_calls", "parallel_tool_calls");
    if let Some(effort) = body
        .get("reasoning")
        .and_then(|reasoning| str_field(reasoning, "effort"))
    {
        out.insert(
            "reasoning_effort".to_string(),
            Value::String(effort.to_string()),
        );
    }
    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        // The Chat API has no built-in tools (web_search, file_search,
        // computer_use, ...); only function tools survive translation.
        let tools = tools.iter().filter_map(chat_tool).collect::<Vec<_>>();
        if !tools.is_empty() {
            out.insert("tools".to_string(), Value::Array(tools));
        }
    }
    set_stream_flag(&mut out, stream);

    Ok(Value::Object(out))
}

fn instructions_text(instructions: Option<&Value>) -> Option<String> {
    match instructions? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        _ => None,
    }
}

fn chat_message(item: &Value) -> Vec<Value> {
    match str_field(item, "type") {
        Some("message") | None => {
            let role = str_field(item, "role").unwrap_or("user");
            let text = match item.get("content") {
                Some(Value::String(text)) => text.clone(),
                Some(Value::Array(parts)) => parts
                    .iter()
                    .filter_map(|part| str_field(part, "text"))
                    .collect::<Vec<_>>()
                    .join(""),
                _ => String::new(),
            };
            vec![json!({"role": role, "content": text})]
        }
        Some("function_call") => vec![json!({
            "role": "assistant",
            "content": null,
            "tool_calls": [{
                "id": str_field(item, "call_id").unwrap_or_default(),
                "type": "function",
                "function": {
                    "name": str_field(item, "name").unwrap_or_default(),
                    "arguments": str_field(item, "arguments").unwrap_or("{}"),
                },
            }],
        })],
        Some("function_call_output") => vec![json!({
            "role": "tool",
            "tool_call_id": str_field(item, "call_id").unwrap_or_default(),
            "content": output_text(item.get("output")),
        })],
        // Reasoning items and references have no Chat representation.
        _ => Vec::new(),
    }
}

fn output_text(output: Option<&Value>) -> String {
    match output {
        Some(Value::String(text)) => text.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .filter_map(|part| str_field(part, "text"))
            .collect::<Vec<_>>()
            .join(""),
        _ => String::new(),
    }
}

fn chat_tool(tool: &Value) -> Option<Value> {
    if str_field(tool, "type") != Some("function") {
        return None;
    }
    Some(json!({
        "type": "function",
        "function": {
            "name": str_field(tool, "name")?,
            "description": str_field(tool, "description").unwrap_or_default(),
            "parameters": tool.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"})),
        },
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn string_input_becomes_user_message() {
        let body = json!({"instructions": "be brief", "input": "hi", "max_output_tokens": 64});
        let out = translate("gpt-4o", &body, false).unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0]["role"], "system");
        assert_eq!(messages[1]["content"], "hi");
        assert_eq!(out["max_completion_tokens"], 64);
    }

    #[test]
    fn builtin_tools_are_dropped() {
        let body = json!({
            "input": "hi",
            "tools": [
                {"type": "web_search"},
                {"type": "function", "name": "lookup", "parameters": {"type": "object"}},
                {"type": "file_search", "vector_store_ids": ["vs_1"]},
            ],
        });
        let out = translate("gpt-4o", &body, false).unwrap();
        let tools = out["tools"].as_array().unwrap();
        assert_eq!(tools.len(), 1);
        assert_eq!(tools[0]["function"]["name"], "lookup");
    }

    #[test]
    fn function_items_round_trip() {
        let body = json!({
            "input": [
                {"type": "function_call", "call_id": "call_1", "name": "f", "arguments": "{}"},
                {"type": "function_call_output", "call_id": "call_1", "output": "ok"},
            ],
        });
        let out = translate("gpt-4o", &body, true).unwrap();
        let messages = out["messages"].as_array().unwrap();
        assert_eq!(messages[0]["tool_calls"][0]["id"], "call_1");
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(out["stream"], true);
    }

    #[test]
    fn reasoning_effort_is_flattened() {
        let body = json!({"input": "hi", "reasoning": {"effort": "high"}});
        let out = translate("gpt-5", &body, false).unwrap();
        assert_eq!(out["reasoning_effort"], "high");
    }
}
