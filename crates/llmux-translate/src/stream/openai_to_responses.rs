use serde_json::{Value, json};

use llmux_protocol::DONE_MARKER;

use super::{StreamContext, data_payload, event_lines};

/// Translates an OpenAI chat chunk stream into Responses SSE events.
pub struct State {
    ctx: StreamContext,
    created_sent: bool,
    item_opened: bool,
    sequence: i64,
    output_tokens: i64,
    input_tokens: i64,
    text: String,
    completed: bool,
}

impl State {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            created_sent: false,
            item_opened: false,
            sequence: 0,
            output_tokens: 0,
            input_tokens: 0,
            text: String::new(),
            completed: false,
        }
    }

    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        if self.completed {
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

        let mut out = Vec::new();
        if !self.created_sent {
            self.created_sent = true;
            if let Some(id) = chunk.get("id").and_then(Value::as_str) {
                self.ctx.response_id = format!("resp_{id}");
            }
            out.extend(self.lifecycle_event("response.created", "in_progress"));
            out.extend(self.lifecycle_event("response.in_progress", "in_progress"));
        }

        if let Some(usage) = chunk.get("usage").filter(|usage| usage.is_object()) {
            if let Some(tokens) = usage.get("prompt_tokens").and_then(Value::as_i64) {
                self.input_tokens = tokens;
            }
            if let Some(tokens) = usage.get("completion_tokens").and_then(Value::as_i64) {
                self.output_tokens = tokens;
            }
        }

        let Some(choice) = chunk
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|choices| choices.first())
        else {
            return out;
        };

        if let Some(text) = choice
            .get("delta")
            .and_then(|delta| delta.get("content"))
            .and_then(Value::as_str)
            && !text.is_empty()
        {
            if !self.item_opened {
                self.item_opened = true;
                out.extend(self.event(
                    "response.output_item.added",
                    json!({
                        "output_index": 0,
                        "item": {"type": "message", "id": self.item_id(), "role": "assistant", "content": []},
                    }),
                ));
            }
            self.text.push_str(text);
            out.extend(self.event(
                "response.output_text.delta",
                json!({
                    "item_id": self.item_id(),
                    "output_index": 0,
                    "content_index": 0,
                    "delta": text,
                }),
            ));
        }

        if choice.get("finish_reason").and_then(Value::as_str).is_some() {
            out.extend(self.complete());
        }
        out
    }

    pub fn finish(&mut self) -> Vec<String> {
        if self.completed {
            return Vec::new();
        }
        self.complete()
    }

    fn complete(&mut self) -> Vec<String> {
        self.completed = true;
        let mut out = Vec::new();
        if self.item_opened {
            out.extend(self.event(
                "response.output_text.done",
                json!({
                    "item_id": self.item_id(),
                    "output_index": 0,
                    "content_index": 0,
                    "text": self.text,
                }),
            ));
        }
        out.extend(self.lifecycle_event("response.completed", "completed"));
        out
    }

    fn item_id(&self) -> String {
        format!("msg_{}", self.ctx.response_id)
    }

    fn lifecycle_event(&mut self, kind: &str, status: &str) -> Vec<String> {
        let mut response = json!({
            "id": self.ctx.response_id,
            "object": "response",
            "created_at": self.ctx.created,
            "status": status,
            "model": self.ctx.model,
            "output": [],
        });
        if let Some(instructions) = self.ctx.instructions.as_deref()
            && let Some(obj) = response.as_object_mut()
        {
            obj.insert(
                "instructions".to_string(),
                Value::String(instructions.to_string()),
            );
        }
        if status == "completed"
            && let Some(obj) = response.as_object_mut()
        {
            obj.insert(
                "usage".to_string(),
                json!({
                    "input_tokens": self.input_tokens,
                    "output_tokens": self.output_tokens,
                    "total_tokens": self.input_tokens + self.output_tokens,
                }),
            );
        }
        self.event(kind, json!({"response": response}))
    }

    fn event(&mut self, kind: &str, mut payload: Value) -> Vec<String> {
        if let Some(obj) = payload.as_object_mut() {
            obj.insert("type".to_string(), Value::String(kind.to_string()));
            obj.insert("sequence_number".to_string(), Value::from(self.sequence));
        }
        self.sequence += 1;
        event_lines(kind, &payload)
    }
}
