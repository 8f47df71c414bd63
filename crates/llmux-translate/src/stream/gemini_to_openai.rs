use serde_json::{Value, json};

use super::{StreamContext, chat_chunk_lines, data_payload, done_lines};

/// Translates a Gemini `streamGenerateContent` SSE stream (`alt=sse`) into
/// OpenAI chat chunks.
pub struct State {
    ctx: StreamContext,
    role_sent: bool,
    next_tool_index: i64,
    finish_reason: Option<&'static str>,
    usage: Option<Value>,
    done: bool,
}

impl State {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            role_sent: false,
            next_tool_index: 0,
            finish_reason: None,
            usage: None,
            done: false,
        }
    }

    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        let Some(payload) = data_payload(line) else {
            return Vec::new();
        };
        let Ok(chunk) = serde_json::from_str::<Value>(payload) else {
            return Vec::new();
        };

        let mut out = Vec::new();
        if !self.role_sent {
            self.role_sent = true;
            out.extend(chat_chunk_lines(
                &self.ctx,
                json!({"role": "assistant", "content": ""}),
                None,
                None,
            ));
        }

        if let Some(usage) = chunk.get("usageMetadata") {
            let prompt = usage
                .get("promptTokenCount")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            let completion = usage
                .get("candidatesTokenCount")
                .and_then(Value::as_i64)
                .unwrap_or(0);
            self.usage = Some(json!({
                "prompt_tokens": prompt,
                "completion_tokens": completion,
                "total_tokens": usage.get("totalTokenCount").and_then(Value::as_i64).unwrap_or(prompt + completion),
            }));
        }

        let Some(candidate) = chunk
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|candidates| candidates.first())
        else {
            return out;
        };

        if let Some(parts) = candidate
            .get("content")
            .and_then(|content| content.get("parts"))
            .and_then(Value::as_array)
        {
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str)
                    && !text.is_empty()
                {
                    out.extend(chat_chunk_lines(
                        &self.ctx,
                        json!({"content": text}),
                        None,
                        None,
                    ));
                }
                if let Some(call) = part.get("functionCall") {
                    let index = self.next_tool_index;
                    self.next_tool_index += 1;
                    let name = call.get("name").and_then(Value::as_str).unwrap_or_default();
                    let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
                    out.extend(chat_chunk_lines(
                        &self.ctx,
                        json!({"tool_calls": [{
                            "index": index,
                            "id": crate::callid::derive_call_id(name, &args),
                            "type": "function",
                            "function": {"name": name, "arguments": args.to_string()},
                        }]}),
                        None,
                        None,
                    ));
                }
            }
        }

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            self.finish_reason = Some(map_finish_reason(reason, self.next_tool_index > 0));
        }

        out
    }

    pub fn finish(&mut self) -> Vec<String> {
        if self.done {
            return Vec::new();
        }
        self.done = true;
        let mut out = chat_chunk_lines(
            &self.ctx,
            json!({}),
            Some(self.finish_reason.unwrap_or("stop")),
            self.usage.take(),
        );
        out.extend(done_lines());
        out
    }
}

fn map_finish_reason(reason: &str, saw_tool_call: bool) -> &'static str {
    match reason {
        "MAX_TOKENS" => "length",
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" => "content_filter",
        _ if saw_tool_call => "tool_calls",
        _ => "stop",
    }
}
