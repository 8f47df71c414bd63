use std::collections::HashMap;

use serde_json::{Value, json};

use llmux_protocol::DONE_MARKER;

use super::{StreamContext, data_payload, event_lines};

/// Translates an OpenAI chat chunk stream into Claude Messages SSE events.
pub struct State {
    ctx: StreamContext,
    message_started: bool,
    next_block_index: i64,
    open_text_block: Option<i64>,
    /// OpenAI tool_calls index -> Claude content-block index.
    open_tool_blocks: HashMap<i64, i64>,
    stop_reason: Option<&'static str>,
    output_tokens: i64,
    input_tokens: i64,
    stopped: bool,
}

impl State {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            message_started: false,
            next_block_index: 0,
            open_text_block: None,
            open_tool_blocks: HashMap::new(),
            stop_reason: None,
            output_tokens: 0,
            input_tokens: 0,
            stopped: false,
        }
    }

    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        let Some(payload) = data_payload(line) else {
            return Vec::new();
        };
        if payload == DONE_MARKER {
            return self.finish();
        }
        let Ok(chunk) = serde_json::from_str::<Value>(payload) else {
            return Vec::new();
        };
        self.handle_chunk(&chunk)
    }

    pub fn finish(&mut self) -> Vec<String> {
        if self.stopped {
            return Vec::new();
        }
        self.stopped = true;
        let mut out = self.close_open_blocks();
        out.extend(event_lines(
            "message_delta",
            &json!({
                "type": "message_delta",
                "delta": {"stop_reason": self.stop_reason.unwrap_or("end_turn"), "stop_sequence": null},
                "usage": {"input_tokens": self.input_tokens, "output_tokens": self.output_tokens},
            }),
        ));
        out.extend(event_lines("message_stop", &json!({"type": "message_stop"})));
        out
    }

    fn handle_chunk(&mut self, chunk: &Value) -> Vec<String> {
        if self.stopped {
            return Vec::new();
        }
        let mut out = Vec::new();

        if !self.message_started {
            self.message_started = true;
            if let Some(id) = chunk.get("id").and_then(Value::as_str) {
                self.ctx.response_id = id.to_string();
            }
            out.extend(event_lines(
                "message_start",
                &json!({
                    "type": "message_start",
                    "message": {
                        "id": self.ctx.response_id,
                        "type": "message",
                        "role": "assistant",
                        "model": self.ctx.model,
                        "content": [],
                        "stop_reason": null,
                        "stop_sequence": null,
                        "usage": {"input_tokens": 0, "output_tokens": 0},
                    },
                }),
            ));
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

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str)
                && !text.is_empty()
            {
                out.extend(self.emit_text(text));
            }
            if let Some(text) = delta.get("reasoning_content").and_then(Value::as_str)
                && !text.is_empty()
            {
                out.extend(self.emit_thinking(text));
            }
            if let Some(calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for call in calls {
                    out.extend(self.emit_tool_call(call));
                }
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            self.stop_reason = Some(map_finish_reason(reason));
        }

        out
    }

    fn emit_text(&mut self, text: &str) -> Vec<String> {
        let mut out = Vec::new();
        let index = match self.open_text_block {
            Some(index) => index,
            None => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.open_text_block = Some(index);
                out.extend(event_lines(
                    "content_block_start",
                    &json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {"type": "text", "text": ""},
                    }),
                ));
                index
            }
        };
        out.extend(event_lines(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "text_delta", "text": text},
            }),
        ));
        out
    }

    fn emit_thinking(&mut self, text: &str) -> Vec<String> {
        // Reasoning rides in the open text block as a thinking delta.
        let index = self.open_text_block.unwrap_or(self.next_block_index);
        event_lines(
            "content_block_delta",
            &json!({
                "type": "content_block_delta",
                "index": index,
                "delta": {"type": "thinking_delta", "thinking": text},
            }),
        )
    }

    fn emit_tool_call(&mut self, call: &Value) -> Vec<String> {
        let mut out = Vec::new();
        let call_index = call.get("index").and_then(Value::as_i64).unwrap_or(0);
        let block_index = match self.open_tool_blocks.get(&call_index) {
            Some(index) => *index,
            None => {
                let index = self.next_block_index;
                self.next_block_index += 1;
                self.open_tool_blocks.insert(call_index, index);
                let function = call.get("function").cloned().unwrap_or_default();
                out.extend(event_lines(
                    "content_block_start",
                    &json!({
                        "type": "content_block_start",
                        "index": index,
                        "content_block": {
                            "type": "tool_use",
                            "id": call.get("id").and_then(Value::as_str).unwrap_or_default(),
                            "name": function.get("name").and_then(Value::as_str).unwrap_or_default(),
                            "input": {},
                        },
                    }),
                ));
                index
            }
        };
        let arguments = call
            .get("function")
            .and_then(|function| function.get("arguments"))
            .and_then(Value::as_str)
            .unwrap_or_default();
        if !arguments.is_empty() {
            out.extend(event_lines(
                "content_block_delta",
                &json!({
                    "type": "content_block_delta",
                    "index": block_index,
                    "delta": {"type": "input_json_delta", "partial_json": arguments},
                }),
            ));
        }
        out
    }

    fn close_open_blocks(&mut self) -> Vec<String> {
        let mut indexes = Vec::new();
        if let Some(index) = self.open_text_block.take() {
            indexes.push(index);
        }
        indexes.extend(self.open_tool_blocks.drain().map(|(_, index)| index));
        indexes.sort_unstable();
        indexes
            .into_iter()
            .flat_map(|index| {
                event_lines(
                    "content_block_stop",
                    &json!({"type": "content_block_stop", "index": index}),
                )
            })
            .collect()
    }
}

fn map_finish_reason(reason: &str) -> &'static str {
    match reason {
        "length" => "max_tokens",
        "tool_calls" | "function_call" => "tool_use",
        _ => "end_turn",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(delta: Value, finish: Option<&str>) -> String {
        format!(
            "data: {}",
            json!({
                "id": "chatcmpl-1",
                "choices": [{"index": 0, "delta": delta, "finish_reason": finish}],
            })
        )
    }

    fn event_names(lines: &[String]) -> Vec<String> {
        lines
            .iter()
            .filter_map(|line| line.strip_prefix("event: "))
            .map(str::to_string)
            .collect()
    }

    #[test]
    fn text_stream_produces_message_lifecycle() {
        let mut state = State::new(StreamContext {
            model: "gpt-4o".to_string(),
            ..StreamContext::default()
        });
        let mut lines = state.push_line(&chunk(json!({"role": "assistant"}), None));
        lines.extend(state.push_line(&chunk(json!({"content": "hi"}), None)));
        lines.extend(state.push_line(&chunk(json!({}), Some("stop"))));
        lines.extend(state.push_line("data: [DONE]"));

        assert_eq!(
            event_names(&lines),
            vec![
                "message_start",
                "content_block_start",
                "content_block_delta",
                "content_block_stop",
                "message_delta",
                "message_stop",
            ]
        );
    }

    #[test]
    fn finish_reason_maps_to_stop_reason() {
        let mut state = State::new(StreamContext::default());
        state.push_line(&chunk(json!({"content": "x"}), None));
        state.push_line(&chunk(json!({}), Some("length")));
        let lines = state.push_line("data: [DONE]");
        let delta_line = lines
            .iter()
            .find(|line| line.contains("message_delta") && line.starts_with("data:"))
            .unwrap();
        let payload: Value =
            serde_json::from_str(delta_line.strip_prefix("data: ").unwrap()).unwrap();
        assert_eq!(payload["delta"]["stop_reason"], "max_tokens");
    }

    #[test]
    fn tool_call_deltas_open_tool_use_blocks() {
        let mut state = State::new(StreamContext::default());
        let lines = state.push_line(&chunk(
            json!({"tool_calls": [{
                "index": 0, "id": "call_1", "type": "function",
                "function": {"name": "lookup", "arguments": ""},
            }]}),
            None,
        ));
        assert!(event_names(&lines).contains(&"content_block_start".to_string()));

        let lines = state.push_line(&chunk(
            json!({"tool_calls": [{"index": 0, "function": {"arguments": "{\"q\":1}"}}]}),
            None,
        ));
        let delta_line = lines.iter().find(|line| line.starts_with("data:")).unwrap();
        assert!(delta_line.contains("input_json_delta"));
    }

    #[test]
    fn non_json_data_lines_are_dropped() {
        let mut state = State::new(StreamContext::default());
        assert!(state.push_line("data: not json").is_empty());
        assert!(state.push_line(": comment").is_empty());
    }
}
