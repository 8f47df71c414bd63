use std::collections::HashMap;

use serde_json::{Value, json};

use llmux_protocol::SseEventAssembler;

use super::{StreamContext, chat_chunk_lines, done_lines};

/// Translates a Claude Messages SSE stream into OpenAI chat chunks.
pub struct State {
    ctx: StreamContext,
    assembler: SseEventAssembler,
    /// Claude content-block index -> OpenAI tool_calls index.
    tool_indexes: HashMap<i64, i64>,
    next_tool_index: i64,
    prompt_tokens: i64,
    completion_tokens: i64,
    finish_reason: Option<&'static str>,
    done: bool,
}

impl State {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            assembler: SseEventAssembler::new(),
            tool_indexes: HashMap::new(),
            next_tool_index: 0,
            prompt_tokens: 0,
            completion_tokens: 0,
            finish_reason: None,
            done: false,
        }
    }

    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        let Some(event) = self.assembler.push_line(line) else {
            return Vec::new();
        };
        let Ok(payload) = serde_json::from_str::<Value>(&event.data) else {
            // Non-JSON framing lines are dropped, never wrapped.
            return Vec::new();
        };
        self.handle_event(&payload)
    }

    pub fn finish(&mut self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        let mut out = self.final_chunk();
        out.extend(done_lines());
        out
    }

    fn handle_event(&mut self, payload: &Value) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        match payload.get("type").and_then(Value::as_str) {
            Some("message_start") => {
                if let Some(id) = payload
                    .get("message")
                    .and_then(|message| message.get("id"))
                    .and_then(Value::as_str)
                {
                    self.ctx.response_id = id.to_string();
                }
                if let Some(tokens) = payload
                    .get("message")
                    .and_then(|message| message.get("usage"))
                    .and_then(|usage| usage.get("input_tokens"))
                    .and_then(Value::as_i64)
                {
                    self.prompt_tokens = tokens;
                }
                chat_chunk_lines(
                    &self.ctx,
                    json!({"role": "assistant", "content": ""}),
                    None,
                    None,
                )
            }
            Some("content_block_start") => self.content_block_start(payload),
            Some("content_block_delta") => self.content_block_delta(payload),
            Some("message_delta") => {
                if let Some(reason) = payload
                    .get("delta")
                    .and_then(|delta| delta.get("stop_reason"))
                    .and_then(Value::as_str)
                {
                    self.finish_reason = Some(map_stop_reason(reason));
                }
                if let Some(tokens) = payload
                    .get("usage")
                    .and_then(|usage| usage.get("output_tokens"))
                    .and_then(Value::as_i64)
                {
                    self.completion_tokens = tokens;
                }
                Vec::new()
            }
            Some("message_stop") => {
                self.done = true;
                let mut out = self.final_chunk();
                out.extend(done_lines());
                out
            }
            Some("error") => {
                self.done = true;
                let mut out = vec![
                    format!("data: {}", json!({"error": payload.get("error").cloned().unwrap_or_default()})),
                    String::new(),
                ];
                out.extend(done_lines());
                out
            }
            // ping and unknown events carry nothing for the chat dialect.
            _ => Vec::new(),
        }
    }

    fn content_block_start(&mut self, payload: &Value) -> Vec<String> {
        let index = payload.get("index").and_then(Value::as_i64).unwrap_or(0);
        let Some(block) = payload.get("content_block") else {
            return Vec::new();
        };
        if block.get("type").and_then(Value::as_str) != Some("tool_use") {
            return Vec::new();
        }
        let tool_index = self.next_tool_index;
        self.next_tool_index += 1;
        self.tool_indexes.insert(index, tool_index);
        chat_chunk_lines(
            &self.ctx,
            json!({"tool_calls": [{
                "index": tool_index,
                "id": block.get("id").and_then(Value::as_str).unwrap_or_default(),
                "type": "function",
                "function": {
                    "name": block.get("name").and_then(Value::as_str).unwrap_or_default(),
                    "arguments": "",
                },
            }]}),
            None,
            None,
        )
    }

    fn content_block_delta(&mut self, payload: &Value) -> Vec<String> {
        let index = payload.get("index").and_then(Value::as_i64).unwrap_or(0);
        let Some(delta) = payload.get("delta") else {
            return Vec::new();
        };
        match delta.get("type").and_then(Value::as_str) {
            Some("text_delta") => {
                let text = delta.get("text").and_then(Value::as_str).unwrap_or_default();
                chat_chunk_lines(&self.ctx, json!({"content": text}), None, None)
            }
            Some("thinking_delta") => {
                let text = delta
                    .get("thinking")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                chat_chunk_lines(&self.ctx, json!({"reasoning_content": text}), None, None)
            }
            Some("input_json_delta") => {
                let partial = delta
                    .get("partial_json")
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let tool_index = self.tool_indexes.get(&index).copied().unwrap_or(0);
                chat_chunk_lines(
                    &self.ctx,
                    json!({"tool_calls": [{
                        "index": tool_index,
                        "function": {"arguments": partial},
                    }]}),
                    None,
                    None,
                )
            }
            _ => Vec::new(),
        }
    }

    fn final_chunk(&self) -> Vec<String> {
        chat_chunk_lines(
            &self.ctx,
            json!({}),
            Some(self.finish_reason.unwrap_or("stop")),
            Some(json!({
                "prompt_tokens": self.prompt_tokens,
                "completion_tokens": self.completion_tokens,
                "total_tokens": self.prompt_tokens + self.completion_tokens,
            })),
        )
    }
}

fn map_stop_reason(reason: &str) -> &'static str {
    match reason {
        "max_tokens" => "length",
        "tool_use" => "tool_calls",
        _ => "stop",
    }
}
