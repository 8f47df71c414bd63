use serde_json::{Value, json};

use crate::value_util::{arr_field, str_field};
use crate::{TranslateError, TranslateResult};

use super::openai_to_claude::content_text;

/// Grok's internal conversation API takes a single prompt string per turn,
/// so the chat transcript is rendered into one message.
pub fn translate(model: &str, body: &Value) -> TranslateResult<Value> {
    let messages = arr_field(body, "messages")
        .ok_or_else(|| TranslateError::Invalid("chat request has no messages".to_string()))?;

    let mut rendered = Vec::new();
    for message in messages {
        let role = str_field(message, "role").unwrap_or("user");
        let text = content_text(message.get("content")).unwrap_or_default();
        if text.is_empty() {
            continue;
        }
        let prefix = match role {
            "system" | "developer" => "System",
            "assistant" => "Assistant",
            _ => "User",
        };
        rendered.push(format!("{prefix}: {text}"));
    }

    Ok(json!({
        "temporary": true,
        "modelName": model,
        "message": rendered.join("\n\n"),
        "fileAttachments": [],
        "imageAttachments": [],
        "disableSearch": false,
        "enableImageGeneration": false,
        "returnImageBytes": false,
        "enableImageStreaming": false,
        "imageGenerationCount": 0,
        "forceConcise": false,
        "toolOverrides": {},
    }))
}
