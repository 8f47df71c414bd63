use serde_json::{Value, json};

use super::{StreamContext, chat_chunk_lines, data_payload, done_lines};

/// Translates Grok's internal conversation stream into OpenAI chat chunks.
///
/// Grok emits one JSON object per data line; tokens stream under
/// `result.response.token` and the complete turn arrives at the end under
/// `result.response.modelResponse`. Tool usage is not token-streamed, so the
/// state buffers the final card list and emits it in one chunk.
pub struct State {
    ctx: StreamContext,
    role_sent: bool,
    streamed_text: bool,
    pending_tool_calls: Vec<Value>,
    finish_sent: bool,
}

impl State {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            role_sent: false,
            streamed_text: false,
            pending_tool_calls: Vec::new(),
            finish_sent: false,
        }
    }

    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        if self.finish_sent {
            return Vec::new();
        }
        let payload = data_payload(line).unwrap_or(line.trim());
        if payload.is_empty() {
            return Vec::new();
        }
        let Ok(value) = serde_json::from_str::<Value>(payload) else {
            return Vec::new();
        };
        let Some(response) = value
            .get("result")
            .and_then(|result| result.get("response"))
        else {
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

        if let Some(token) = response.get("token").and_then(Value::as_str)
            && !token.is_empty()
            && response
                .get("isThinking")
                .and_then(Value::as_bool)
                .unwrap_or(false)
        {
            out.extend(chat_chunk_lines(
                &self.ctx,
                json!({"reasoning_content": token}),
                None,
                None,
            ));
        } else if let Some(token) = response.get("token").and_then(Value::as_str)
            && !token.is_empty()
        {
            self.streamed_text = true;
            out.extend(chat_chunk_lines(
                &self.ctx,
                json!({"content": token}),
                None,
                None,
            ));
        }

        if let Some(model_response) = response.get("modelResponse") {
            out.extend(self.final_response(model_response));
        }
        out
    }

    pub fn finish(&mut self) -> Vec<String> {
        if self.finish_sent {
            return Vec::new();
        }
        self.finish_sent = true;
        let mut out = chat_chunk_lines(&self.ctx, json!({}), Some("stop"), None);
        out.extend(done_lines());
        out
    }

    fn final_response(&mut self, model_response: &Value) -> Vec<String> {
        let mut out = Vec::new();

        // Buffered tool cards surface as a single tool_calls chunk.
        if let Some(cards) = model_response
            .get("toolUsageCardList")
            .and_then(Value::as_array)
        {
            for (index, card) in cards.iter().enumerate() {
                let name = card
                    .get("toolName")
                    .or_else(|| card.get("name"))
                    .and_then(Value::as_str)
                    .unwrap_or_default();
                let args = card
                    .get("arguments")
                    .cloned()
                    .unwrap_or_else(|| json!({}));
                self.pending_tool_calls.push(json!({
                    "index": index,
                    "id": crate::callid::derive_call_id(name, &args),
                    "type": "function",
                    "function": {"name": name, "arguments": args.to_string()},
                }));
            }
        }
        if !self.pending_tool_calls.is_empty() {
            let calls = std::mem::take(&mut self.pending_tool_calls);
            out.extend(chat_chunk_lines(
                &self.ctx,
                json!({"tool_calls": calls}),
                None,
                None,
            ));
        }

        // When nothing was token-streamed, the full message arrives here.
        if !self.streamed_text
            && let Some(message) = model_response.get("message").and_then(Value::as_str)
            && !message.is_empty()
        {
            out.extend(chat_chunk_lines(
                &self.ctx,
                json!({"content": message}),
                None,
                None,
            ));
        }

        self.finish_sent = true;
        out.extend(chat_chunk_lines(&self.ctx, json!({}), Some("stop"), None));
        out.extend(done_lines());
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(lines: &[String], nth: usize) -> Value {
        let data = lines
            .iter()
            .filter(|line| line.starts_with("data: ") && !line.contains("[DONE]"))
            .nth(nth)
            .unwrap();
        serde_json::from_str(data.strip_prefix("data: ").unwrap()).unwrap()
    }

    #[test]
    fn tokens_stream_as_content_deltas() {
        let mut state = State::new(StreamContext::default());
        let lines = state.push_line(&format!(
            "data: {}",
            json!({"result": {"response": {"token": "hel", "isThinking": false}}})
        ));
        assert_eq!(parse(&lines, 0)["choices"][0]["delta"]["role"], "assistant");
        assert_eq!(parse(&lines, 1)["choices"][0]["delta"]["content"], "hel");
    }

    #[test]
    fn thinking_tokens_map_to_reasoning_content() {
        let mut state = State::new(StreamContext::default());
        let lines = state.push_line(&format!(
            "data: {}",
            json!({"result": {"response": {"token": "hmm", "isThinking": true}}})
        ));
        assert_eq!(
            parse(&lines, 1)["choices"][0]["delta"]["reasoning_content"],
            "hmm"
        );
    }

    #[test]
    fn model_response_closes_the_stream() {
        let mut state = State::new(StreamContext::default());
        state.push_line(&format!(
            "data: {}",
            json!({"result": {"response": {"token": "x", "isThinking": false}}})
        ));
        let lines = state.push_line(&format!(
            "data: {}",
            json!({"result": {"response": {"modelResponse": {"message": "x"}}}})
        ));
        assert_eq!(lines[lines.len() - 2], "data: [DONE]");
        // Streamed text is not repeated from the final message.
        assert!(!lines.iter().any(|line| line.contains("\"content\":\"x\"")));
        assert!(state.push_line("data: {}").is_empty());
    }

    #[test]
    fn buffered_tool_cards_emit_once() {
        let mut state = State::new(StreamContext::default());
        let lines = state.push_line(&format!(
            "data: {}",
            json!({"result": {"response": {"modelResponse": {
                "message": "",
                "toolUsageCardList": [{"toolName": "search", "arguments": {"q": "rust"}}],
            }}}})
        ));
        let chunk = parse(&lines, 1);
        assert_eq!(
            chunk["choices"][0]["delta"]["tool_calls"][0]["function"]["name"],
            "search"
        );
    }
}
