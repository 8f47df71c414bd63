use serde_json::{Value, json};

use llmux_protocol::DONE_MARKER;

use super::{StreamContext, data_lines, data_payload};

/// Translates an OpenAI chat chunk stream into Gemini SSE data lines.
/// Gemini streams carry no terminal marker; the stream simply ends.
pub struct State {
    ctx: StreamContext,
    finish_reason: Option<&'static str>,
    usage: Option<Value>,
    finished: bool,
}

impl State {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            finish_reason: None,
            usage: None,
            finished: false,
        }
    }

    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        let Some(payload) = data_payload(line) else {
            return Vec::new();
        };
        if payload == DONE_MARKER {
            return self.finish();
        }
        let Ok(chunk) = serde_json::from_str::<Value>(payload) else {
            return Vec::new();
        };

        if let Some(usage) = chunk.get("usage").filter(|usage| usage.is_object()) {
            let prompt = usage
                .get("prompt_tokens")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let completion = usage
                .get("completion_tokens")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            self.usage = Some(json!({
                "promptTokenCount": prompt,
                "candidatesTokenCount": completion,
                "totalTokenCount": usage.get("total_tokens").and_then(Value::as_i64).unwrap_or(prompt + completion),
            }));
        }

        let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            return Vec::new();
        };

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.finish_reason = Some(map_finish_reason(reason));
        }

        let mut parts = Vec::new();
        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str)
                && !text.is_empty()
            {
                parts.push(json!({"text": text}));
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    let Some(function) = call.get("function") else {
                        continue;
                    };
                    let Some(name) = function.get("name").and_then(Value::as_str) else {
                        // Argument-only continuation chunks cannot be expressed
                        // as partial functionCall parts; Gemini callers get the
                        // call once its name is known with whatever arguments
                        // arrived in the same chunk.
                        continue;
                    };
                    let args = function
                        .get("arguments")
                        .and_then(Value::as_str)
                        .map(crate::value_util::parse_args)
                        .unwrap_or_else(|| json!({}));
                    parts.push(json!({"functionCall": {"name": name, "args": args}}));
                }
            }
        }

        if parts.is_empty() {
            return Vec::new();
        }
        data_lines(&json!({
            "candidates": [{
                "content": {"parts": parts, "role": "model"},
                "index": 0,
            }],
            "modelVersion": self.ctx.model,
        }))
    }

    pub fn finish(&mut self) -> Vec<String> {
        if self.finished {
            return Vec::new();
        }
        self.finished = true;
        let reason = self.finish_reason.unwrap_or("STOP");
        let mut closing = json!({
            "candidates": [{
                "content": {"parts": [], "role": "model"},
                "finishReason": reason,
                "index": 0,
            }],
            "modelVersion": self.ctx.model,
        });
        if let Some(usage) = self.usage.take()
            && let Some(obj) = closing.as_object_mut()
        {
            obj.insert("usageMetadata".to_string(), usage);
        }
        data_lines(&closing)
    }
}

fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "length" => "MAX_TOKENS",
        "content_filter" => "SAFETY",
        _ => "STOP",
    }
}
