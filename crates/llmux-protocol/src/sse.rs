use bytes::Bytes;

/// Splits an upstream byte stream into complete lines.
///
/// Lines are yielded without their terminating `\n`; a single trailing `\r`
/// is stripped. Incomplete tail bytes stay buffered until the next push or
/// `finish`.
#[derive(Debug, Default)]
pub struct SseLineScanner {
    buffer: String,
}

impl SseLineScanner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_bytes(&mut self, chunk: &Bytes) -> Vec<String> {
        match std::str::from_utf8(chunk) {
            Ok(text) => self.push_str(text),
            Err(_) => Vec::new(),
        }
    }

    pub fn push_str(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        let mut lines = Vec::new();

        while let Some(pos) = self.buffer.find('\n') {
            let mut line = self.buffer[..pos].to_string();
            self.buffer.drain(..=pos);
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }

        lines
    }

    /// Flushes any buffered partial line at end of stream.
    pub fn finish(&mut self) -> Option<String> {
        if self.buffer.is_empty() {
            return None;
        }
        let mut line = std::mem::take(&mut self.buffer);
        if line.ends_with('\r') {
            line.pop();
        }
        Some(line)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    pub event: Option<String>,
    pub data: String,
}

/// Assembles scanned lines into SSE events.
///
/// `event:` names and `data:` payloads accumulate until a blank line closes
/// the event. Comment lines (leading `:`) are ignored per the SSE spec.
#[derive(Debug, Default)]
pub struct SseEventAssembler {
    event: Option<String>,
    data_lines: Vec<String>,
}

impl SseEventAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line; returns a completed event when the line was a blank
    /// delimiter and the pending event carried any content.
    pub fn push_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }

        if line.starts_with(':') {
            return None;
        }

        if let Some(value) = line.strip_prefix("event:") {
            let value = value.trim_start();
            self.event = (!value.is_empty()).then(|| value.to_string());
            return None;
        }
        if line == "event" {
            self.event = None;
            return None;
        }

        if let Some(value) = line.strip_prefix("data:") {
            self.data_lines.push(value.trim_start().to_string());
            return None;
        }
        if line == "data" {
            self.data_lines.push(String::new());
        }

        None
    }

    /// Closes and returns the pending event, if any content accumulated.
    pub fn take_event(&mut self) -> Option<SseEvent> {
        if self.event.is_none() && self.data_lines.is_empty() {
            return None;
        }
        let data = self.data_lines.join("\n");
        self.data_lines.clear();
        Some(SseEvent {
            event: self.event.take(),
            data,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scanner_splits_and_buffers() {
        let mut scanner = SseLineScanner::new();
        assert_eq!(
            scanner.push_str("data: a\r\ndata: b\nda"),
            vec!["data: a".to_string(), "data: b".to_string()]
        );
        assert_eq!(scanner.push_str("ta: c\n"), vec!["data: c".to_string()]);
        assert_eq!(scanner.finish(), None);
    }

    #[test]
    fn scanner_finish_flushes_tail() {
        let mut scanner = SseLineScanner::new();
        assert!(scanner.push_str("data: tail").is_empty());
        assert_eq!(scanner.finish(), Some("data: tail".to_string()));
    }

    #[test]
    fn assembler_pairs_event_and_data() {
        let mut assembler = SseEventAssembler::new();
        assert_eq!(assembler.push_line("event: message_start"), None);
        assert_eq!(assembler.push_line("data: {\"a\":1}"), None);
        let event = assembler.push_line("").unwrap();
        assert_eq!(event.event.as_deref(), Some("message_start"));
        assert_eq!(event.data, "{\"a\":1}");
    }

    #[test]
    fn assembler_joins_multiline_data() {
        let mut assembler = SseEventAssembler::new();
        assembler.push_line("data: one");
        assembler.push_line("data: two");
        let event = assembler.push_line("").unwrap();
        assert_eq!(event.data, "one\ntwo");
    }

    #[test]
    fn assembler_skips_comments_and_empty_blocks() {
        let mut assembler = SseEventAssembler::new();
        assert_eq!(assembler.push_line(": keepalive"), None);
        assert_eq!(assembler.push_line(""), None);
    }
}
