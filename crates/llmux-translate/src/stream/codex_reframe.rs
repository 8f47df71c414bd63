use serde_json::Value;

use llmux_protocol::DONE_MARKER;

use super::StreamContext;

/// Lifecycle events whose payload must carry the original request's
/// `instructions` field.
const LIFECYCLE_TYPES: [&str; 3] = [
    "response.created",
    "response.in_progress",
    "response.completed",
];

#[derive(Debug)]
enum Phase {
    /// Nothing forwarded yet.
    Fresh,
    /// An `event:` line is buffered, waiting for its data.
    AwaitingData { event_line: String },
    /// At least one data payload forwarded.
    Streaming,
    /// Upstream sent `[DONE]`; everything after it is dropped.
    Terminated,
}

/// Re-framer for the codex upstream's SSE, which interleaves empty data
/// lines, orphan event lines and stray delimiters. Guarantees the client
/// sees well-formed `event:`/`data:` pairs, with the request `instructions`
/// echoed into lifecycle events.
pub struct State {
    ctx: StreamContext,
    phase: Phase,
    block_has_data: bool,
    last_was_delimiter: bool,
}

impl State {
    pub fn new(ctx: StreamContext) -> Self {
        Self {
            ctx,
            phase: Phase::Fresh,
            block_has_data: false,
            last_was_delimiter: false,
        }
    }

    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        if matches!(self.phase, Phase::Terminated) {
            return Vec::new();
        }
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.boundary();
        }

        if line.starts_with("event:") {
            // A later event line overwrites a buffered one that got no data.
            self.phase = Phase::AwaitingData {
                event_line: line.to_string(),
            };
            return Vec::new();
        }

        if let Some(payload) = line.strip_prefix("data:") {
            let payload = payload.trim();
            if payload == DONE_MARKER {
                self.phase = Phase::Terminated;
                return Vec::new();
            }
            if payload.is_empty() {
                return Vec::new();
            }
            return self.emit_data(payload);
        }

        // Comments and other framing lines pass through untouched.
        self.last_was_delimiter = false;
        vec![line.to_string()]
    }

    pub fn finish(&mut self) -> Vec<String> {
        if self.block_has_data && !self.last_was_delimiter {
            self.block_has_data = false;
            self.last_was_delimiter = true;
            return vec![String::new()];
        }
        Vec::new()
    }

    fn boundary(&mut self) -> Vec<String> {
        // An event block that never produced data is suppressed entirely.
        if let Phase::AwaitingData { .. } = self.phase {
            self.phase = if self.block_has_data || self.last_was_delimiter {
                Phase::Streaming
            } else {
                Phase::Fresh
            };
        }
        if self.block_has_data && !self.last_was_delimiter {
            self.block_has_data = false;
            self.last_was_delimiter = true;
            return vec![String::new()];
        }
        Vec::new()
    }

    fn emit_data(&mut self, payload: &str) -> Vec<String> {
        let mut out = Vec::new();
        if let Phase::AwaitingData { event_line } =
            std::mem::replace(&mut self.phase, Phase::Streaming)
        {
            if self.block_has_data && !self.last_was_delimiter {
                out.push(String::new());
                self.block_has_data = false;
            }
            out.push(event_line);
        }
        out.push(format!("data: {}", self.echo_instructions(payload)));
        self.block_has_data = true;
        self.last_was_delimiter = false;
        out
    }

    /// Rewrites lifecycle payloads so `response.instructions` matches the
    /// original request.
    fn echo_instructions(&self, payload: &str) -> String {
        let Some(instructions) = self.ctx.instructions.as_deref() else {
            return payload.to_string();
        };
        let Ok(mut value) = serde_json::from_str::<Value>(payload) else {
            return payload.to_string();
        };
        let is_lifecycle = value
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(|kind| LIFECYCLE_TYPES.contains(&kind));
        if !is_lifecycle {
            return payload.to_string();
        }
        if let Some(response) = value.get_mut("response").and_then(Value::as_object_mut) {
            response.insert(
                "instructions".to_string(),
                Value::String(instructions.to_string()),
            );
        }
        value.to_string()
    }
}
