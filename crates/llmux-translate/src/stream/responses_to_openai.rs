use std::collections::HashMap;

use serde_json::{Value, json};

use llmux_protocol::SseEventAssembler;

use super::{StreamContext, chat_chunk_lines, done_lines};

/// Translates an OpenAI Responses (or codex) SSE stream into chat chunks.
pub struct State {
    ctx: StreamContext,
    assembler: SseEventAssembler,
    role_sent: bool,
    /// Responses output item id -> chat tool_calls index.
    tool_indexes: HashMap<String, i64>,
    next_tool_index: i64,
    saw_tool_call: bool,
    done: bool,
}

impl State {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            assembler: SseEventAssembler::new(),
            role_sent: false,
            tool_indexes: HashMap::new(),
            next_tool_index: 0,
            saw_tool_call: false,
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
        let kind = payload
            .get("type")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or(event.event)
            .unwrap_or_default();
        self.handle_event(&kind, &payload)
    }

    pub fn finish(&mut self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        let mut out = chat_chunk_lines(&self.ctx, json!({}), Some("stop"), None);
        out.extend(done_lines());
        out
    }

    fn handle_event(&mut self, kind: &str, payload: &Value) -> Vec<String> {
        match kind {
            "response.created" => {
                if let Some(id) = payload
                    .get("response")
                    .and_then(|response| response.get("id"))
                    .and_then(Value::as_str)
                {
                    self.ctx.response_id = id.to_string();
                }
                self.role_sent = true;
                chat_chunk_lines(
                    &self.ctx,
                    json!({"role": "assistant", "content": ""}),
                    None,
                    None,
                )
            }
            "response.output_text.delta" => {
                let text = payload
                    .get("delta")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                chat_chunk_lines(&self.ctx, json!({"content": text}), None, None)
            }
            "response.reasoning_summary_text.delta" | "response.reasoning_text.delta" => {
                let text = payload
                    .get("delta")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                chat_chunk_lines(&self.ctx, json!({"reasoning_content": text}), None, None)
            }
            "response.output_item.added" => self.output_item_added(payload),
            "response.function_call_arguments.delta" => {
                let item_id = payload
                    .get("item_id")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let Some(index) = self.tool_indexes.get(item_id).copied() else {
                    return Vec::new();
                };
                let delta = payload
                    .get("delta")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                chat_chunk_lines(
                    &self.ctx,
                    json!({"tool_calls": [{
                        "index": index,
                        "function": {"arguments": delta},
                    }]}),
                    None,
                    None,
                )
            }
            "response.completed" | "response.incomplete" | "response.failed" => {
                self.done = true;
                let usage = payload
                    .get("response")
                    .and_then(|response| response.get("usage"))
                    .map(chat_usage);
                let reason = if kind == "response.incomplete" {
                    "length"
                } else if self.saw_tool_call {
                    "tool_calls"
                } else {
                    "stop"
                };
                let mut out = chat_chunk_lines(&self.ctx, json!({}), Some(reason), usage);
                out.extend(done_lines());
                out
            }
            _ => Vec::new(),
        }
    }

    fn output_item_added(&mut self, payload: &Value) -> Vec<String> {
        let Some(item) = payload.get("item") else {
            return Vec::new();
        };
        if item.get("type").and_then(Value::as_str) != Some("function_call") {
            return Vec::new();
        }
        self.saw_tool_call = true;
        let item_id = item.get("id").and_then(Value::as_str).unwrap_or_default();
        let index = self.next_tool_index;
        self.next_tool_index += 1;
        self.tool_indexes.insert(item_id.to_string(), index);
        chat_chunk_lines(
            &self.ctx,
            json!({"tool_calls": [{
                "index": index,
                "id": item.get("call_id").and_then(Value::as_str).unwrap_or_default(),
                "type": "function",
                "function": {
                    "name": item.get("name").and_then(Value::as_str).unwrap_or_default(),
                    "arguments": "",
                },
            }]}),
            None,
            None,
        )
    }
}

fn chat_usage(usage: &Value) -> Value {
    let prompt = usage
        .get("input_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    let completion = usage
        .get("output_tokens")
        .and_then(Value::as_i64)
        .unwrap_or(0);
    json!({
        "prompt_tokens": prompt,
        "completion_tokens": completion,
        "total_tokens": usage.get("total_tokens").and_then(Value::as_i64).unwrap_or(prompt + completion),
    })
}
