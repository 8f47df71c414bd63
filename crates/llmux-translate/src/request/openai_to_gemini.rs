use std::collections::HashMap;

use serde_json::{Map, Value, json};

use crate::value_util::{arr_field, first_number, parse_args, str_field};
use crate::{TranslateError, TranslateResult};

use super::openai_to_claude::content_text;
use super::stop_sequences;

/// Gemini carries the model in the URL and streaming in the verb, so the
/// translated body holds neither.
pub fn translate(_model: &str, body: &Value) -> TranslateResult<Value> {
    let messages = arr_field(body, "messages")
        .ok_or_else(|| TranslateError::Invalid("chat request has no messages".to_string()))?;

    let mut system_parts = Vec::new();
    let mut contents = Vec::new();
    // functionResponse parts need the original call's name; correlate by id.
    let mut call_names: HashMap<String, String> = HashMap::new();

    for message in messages {
        let role = str_field(message, "role").unwrap_or("user");
        match role {
            "system" | "developer" => {
                if let Some(text) = content_text(message.get("content")) {
                    system_parts.push(text);
                }
            }
            "assistant" => contents.push(model_content(message, &mut call_names)),
            "tool" => contents.push(function_response_content(message, &call_names)),
            _ => {
                let text = content_text(message.get("content")).unwrap_or_default();
                contents.push(json!({"role": "user", "parts": [{"text": text}]}));
            }
        }
    }

    let mut out = Map::new();
    out.insert("contents".to_string(), Value::Array(contents));
    if !system_parts.is_empty() {
        out.insert(
            "systemInstruction".to_string(),
            json!({"parts": [{"text": system_parts.join("\n\n")}]}),
        );
    }

    let mut generation = Map::new();
    if let Some(temperature) = body.get("temperature").filter(|v| v.is_number()) {
        generation.insert("temperature".to_string(), temperature.clone());
    }
    if let Some(top_p) = body.get("top_p").filter(|v| v.is_number()) {
        generation.insert("topP".to_string(), top_p.clone());
    }
    if let Some(max) = first_number(body, &["max_completion_tokens", "max_tokens"]) {
        generation.insert("maxOutputTokens".to_string(), max);
    }
    if let Some(stops) = stop_sequences(body, "stop") {
        generation.insert("stopSequences".to_string(), stops);
    }
    if !generation.is_empty() {
        out.insert("generationConfig".to_string(), Value::Object(generation));
    }

    if let Some(tools) = body.get("tools").and_then(Value::as_array) {
        let declarations = tools
            .iter()
            .filter_map(function_declaration)
            .collect::<Vec<_>>();
        if !declarations.is_empty() {
            out.insert(
                "tools".to_string(),
                json!([{"functionDeclarations": declarations}]),
            );
        }
    }
    if let Some(mode) = calling_mode(body.get("tool_choice")) {
        out.insert(
            "toolConfig".to_string(),
            json!({"functionCallingConfig": {"mode": mode}}),
        );
    }

    Ok(Value::Object(out))
}

fn model_content(message: &Value, call_names: &mut HashMap<String, String>) -> Value {
    let mut parts = Vec::new();
    if let Some(text) = content_text(message.get("content"))
        && !text.is_empty()
    {
        parts.push(json!({"text": text}));
    }
    if let Some(calls) = message.get("tool_calls").and_then(Value::as_array) {
        for call in calls {
            let function = call.get("function").cloned().unwrap_or_default();
            let name = str_field(&function, "name").unwrap_or_default().to_string();
            if let Some(id) = str_field(call, "id") {
                call_names.insert(id.to_string(), name.clone());
            }
            let args = str_field(&function, "arguments")
                .map(parse_args)
                .unwrap_or_else(|| Value::Object(Map::new()));
            parts.push(json!({"functionCall": {"name": name, "args": args}}));
        }
    }
    json!({"role": "model", "parts": parts})
}

fn function_response_content(message: &Value, call_names: &HashMap<String, String>) -> Value {
    let name = str_field(message, "tool_call_id")
        .and_then(|id| call_names.get(id))
        .cloned()
        .unwrap_or_default();
    let response = content_text(message.get("content")).unwrap_or_default();
    json!({
        "role": "user",
        "parts": [{"functionResponse": {"name": name, "response": {"result": response}}}],
    })
}

fn function_declaration(tool: &Value) -> Option<Value> {
    if str_field(tool, "type") != Some("function") {
        return None;
    }
    let function = tool.get("function")?;
    Some(json!({
        "name": str_field(function, "name")?,
        "description": str_field(function, "description").unwrap_or_default(),
        "parameters": function.get("parameters").cloned().unwrap_or_else(|| json!({"type": "object"})),
    }))
}

fn calling_mode(choice: Option<&Value>) -> Option<&'static str> {
    match choice? {
        Value::String(mode) => match mode.as_str() {
            "auto" => Some("AUTO"),
            "none" => Some("NONE"),
            "required" => Some("ANY"),
            _ => None,
        },
        Value::Object(_) => Some("ANY"),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn roles_and_generation_config_map() {
        let body = json!({
            "messages": [
                {"role": "system", "content": "be brief"},
                {"role": "user", "content": "hi"},
                {"role": "assistant", "content": "hello"},
            ],
            "temperature": 0.5,
            "max_tokens": 128,
            "stop": ["END"],
        });
        let out = translate("gemini-2.5-pro", &body).unwrap();
        assert_eq!(out["systemInstruction"]["parts"][0]["text"], "be brief");
        let contents = out["contents"].as_array().unwrap();
        assert_eq!(contents[0]["role"], "user");
        assert_eq!(contents[1]["role"], "model");
        assert_eq!(out["generationConfig"]["temperature"], 0.5);
        assert_eq!(out["generationConfig"]["maxOutputTokens"], 128);
        assert_eq!(out["generationConfig"]["stopSequences"][0], "END");
    }

    #[test]
    fn tool_calls_correlate_function_responses() {
        let body = json!({
            "messages": [
                {"role": "assistant", "tool_calls": [{
                    "id": "call_9",
                    "type": "function",
                    "function": {"name": "lookup", "arguments": "{\"q\":1}"},
                }]},
                {"role": "tool", "tool_call_id": "call_9", "content": "found"},
            ],
        });
        let out = translate("gemini-2.5-pro", &body).unwrap();
        let contents = out["contents"].as_array().unwrap();
        assert_eq!(contents[0]["parts"][0]["functionCall"]["name"], "lookup");
        assert_eq!(
            contents[1]["parts"][0]["functionResponse"]["name"],
            "lookup"
        );
        assert_eq!(
            contents[1]["parts"][0]["functionResponse"]["response"]["result"],
            "found"
        );
    }

    #[test]
    fn tool_choice_maps_to_calling_mode() {
        let body = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "tools": [{"type": "function", "function": {"name": "f", "parameters": {}}}],
            "tool_choice": "required",
        });
        let out = translate("gemini-2.5-pro", &body).unwrap();
        assert_eq!(out["toolConfig"]["functionCallingConfig"]["mode"], "ANY");
        assert_eq!(out["tools"][0]["functionDeclarations"][0]["name"], "f");
    }
}
