use serde_json::{Value, json};

use llmux_protocol::SseEventAssembler;

use super::{StreamContext, data_lines};

/// Translates an OpenAI Responses (or codex) SSE stream into Gemini data
/// lines for `:streamGenerateContent` clients.
pub struct State {
    ctx: StreamContext,
    assembler: SseEventAssembler,
    done: bool,
}

impl State {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            assembler: SseEventAssembler::new(),
            done: false,
        }
    }

    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        let Some(event) = self.assembler.push_line(line) else {
            return Vec::new();
        };
        if self.done {
            return Vec::new();
        }
        let Ok(payload) = serde_json::from_str::<Value>(&event.data) else {
            return Vec::new();
        };
        let kind = payload.get("type").and_then(Value::as_str).unwrap_or("");

        match kind {
            "response.output_text.delta" => {
                let text = payload
                    .get("delta")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                if text.is_empty() {
                    return Vec::new();
                }
                data_lines(&json!({
                    "candidates": [{
                        "content": {"parts": [{"text": text}], "role": "model"},
                        "index": 0,
                    }],
                    "modelVersion": self.ctx.model,
                }))
            }
            "response.completed" | "response.incomplete" | "response.failed" => {
                self.done = true;
                let reason = if kind == "response.incomplete" {
                    "MAX_TOKENS"
                } else {
                    "STOP"
                };
                let mut closing = json!({
                    "candidates": [{
                        "content": {"parts": [], "role": "model"},
                        "finishReason": reason,
                        "index": 0,
                    }],
                    "modelVersion": self.ctx.model,
                });
                if let Some(usage) = payload
                    .get("response")
                    .and_then(|response| response.get("usage"))
                    && let Some(obj) = closing.as_object_mut()
                {
                    let prompt = usage
                        .get("input_tokens")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    let completion = usage
                        .get("output_tokens")
                        .and_then(Value::as_i64)
                        .unwrap_or(0);
                    obj.insert(
                        "usageMetadata".to_string(),
                        json!({
                            "promptTokenCount": prompt,
                            "candidatesTokenCount": completion,
                            "totalTokenCount": prompt + completion,
                        }),
                    );
                }
                data_lines(&closing)
            }
            _ => Vec::new(),
        }
    }

    pub fn finish(&mut self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        data_lines(&json!({
            "candidates": [{
                "content": {"parts": [], "role": "model"},
                "finishReason": "STOP",
                "index": 0,
            }],
            "modelVersion": self.ctx.model,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed(state: &mut State, payload: &Value) -> Vec<String> {
        let mut out = state.push_line(&format!("data: {payload}"));
        out.extend(state.push_line(""));
        out
    }

    #[test]
    fn deltas_become_candidates_and_completed_closes() {
        let mut state = State::new(StreamContext {
            model: "gemini-2.5-pro".to_string(),
            ..StreamContext::default()
        });
        let out = feed(
            &mut state,
            &json!({"type": "response.output_text.delta", "delta": "hi"}),
        );
        let chunk: Value = serde_json::from_str(out[0].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(chunk["candidates"][0]["content"]["parts"][0]["text"], "hi");

        let out = feed(
            &mut state,
            &json!({"type": "response.completed", "response": {"usage": {"input_tokens": 2, "output_tokens": 3}}}),
        );
        let chunk: Value = serde_json::from_str(out[0].strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(chunk["candidates"][0]["finishReason"], "STOP");
        assert_eq!(chunk["usageMetadata"]["totalTokenCount"], 5);
    }
}
