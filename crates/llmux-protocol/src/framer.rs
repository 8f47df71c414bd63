/// Stateful writer that owns the response side of an SSE stream.
///
/// Guarantees downstream parseability: no `data:` line with an empty payload,
/// no event block consisting solely of `event:` lines, no leading or doubled
/// blank-line delimiters, and a trailing delimiter exactly when a non-empty
/// data payload was written.
#[derive(Debug, Default)]
pub struct SseFramer {
    wrote_non_empty_data: bool,
    current_event_has_data: bool,
    last_was_delimiter: bool,
    pending_event_line: Option<String>,
}

impl SseFramer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Processes one chunk, which may carry several newline-separated lines.
    /// Returns the bytes to forward downstream.
    pub fn push_chunk(&mut self, chunk: &str) -> String {
        let mut out = String::new();
        let terminated = chunk.ends_with('\n');
        let mut segments = chunk.split('\n').collect::<Vec<_>>();
        if terminated {
            // The final segment after a trailing '\n' is an artifact of the
            // split, not an empty line.
            segments.pop();
        }
        for segment in segments {
            out.push_str(&self.push_line(segment));
        }
        out
    }

    /// Processes a single line (no terminating newline).
    pub fn push_line(&mut self, line: &str) -> String {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            // Event boundary. An event block that accumulated no data is
            // suppressed entirely, including its buffered event name.
            self.pending_event_line = None;
            if self.wrote_non_empty_data && self.current_event_has_data {
                self.current_event_has_data = false;
                self.last_was_delimiter = true;
                return "\n".to_string();
            }
            return String::new();
        }

        if line.starts_with("event:") {
            self.pending_event_line = Some(line.to_string());
            return String::new();
        }

        if let Some(payload) = line.strip_prefix("data:") {
            if payload.trim().is_empty() {
                // An empty payload would break downstream JSON parsers.
                return String::new();
            }
            let mut out = String::new();
            if let Some(event_line) = self.pending_event_line.take() {
                if self.current_event_has_data && !self.last_was_delimiter {
                    out.push('\n');
                }
                out.push_str(&event_line);
                out.push('\n');
            }
            out.push_str(line);
            out.push('\n');
            self.wrote_non_empty_data = true;
            self.current_event_has_data = true;
            self.last_was_delimiter = false;
            return out;
        }

        // Comments, id:, retry: and bare text pass through verbatim.
        self.last_was_delimiter = false;
        format!("{line}\n")
    }

    /// Closes the stream, emitting the final delimiter when one is owed.
    pub fn finish(&mut self) -> String {
        if self.current_event_has_data && !self.last_was_delimiter {
            self.current_event_has_data = false;
            self.last_was_delimiter = true;
            return "\n".to_string();
        }
        String::new()
    }

    pub fn wrote_non_empty_data(&self) -> bool {
        self.wrote_non_empty_data
    }
}

/// Data-only SSE writer for the OpenAI Chat and Gemini endpoints.
///
/// Every call emits a complete event: one `data:` line per payload line,
/// closed by the blank delimiter. Empty or whitespace payloads are rejected.
#[derive(Debug, Default)]
pub struct DataOnlyWriter;

impl DataOnlyWriter {
    pub fn new() -> Self {
        Self
    }

    pub fn event(&self, payload: &str) -> Option<String> {
        if payload.trim().is_empty() {
            return None;
        }
        let mut out = String::new();
        for line in payload.lines() {
            if line.trim().is_empty() {
                continue;
            }
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        Some(out)
    }
}
