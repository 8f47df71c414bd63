use serde::{Deserialize, Serialize};

/// A request/response schema family spoken by clients or providers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dialect {
    /// OpenAI Chat Completions.
    OpenAI,
    /// OpenAI Responses.
    OpenAIResponses,
    /// Anthropic Messages.
    Claude,
    /// Google Gemini GenerateContent.
    Gemini,
    /// The ChatGPT-backend "Codex" Responses variant.
    Codex,
    /// Grok's internal conversation API. Never exposed on the inbound surface.
    Grok,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamFormat {
    /// `event:` + `data:` pairs (Claude, Responses, Codex).
    SseNamedEvent,
    /// `data:`-only events (OpenAI Chat, Gemini with `alt=sse`).
    SseDataOnly,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::OpenAI => "openai",
            Dialect::OpenAIResponses => "openai_responses",
            Dialect::Claude => "claude",
            Dialect::Gemini => "gemini",
            Dialect::Codex => "codex",
            Dialect::Grok => "grok",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "openai" => Some(Dialect::OpenAI),
            "openai_responses" | "openai-responses" => Some(Dialect::OpenAIResponses),
            "claude" => Some(Dialect::Claude),
            "gemini" => Some(Dialect::Gemini),
            "codex" => Some(Dialect::Codex),
            "grok" => Some(Dialect::Grok),
            _ => None,
        }
    }

    pub fn stream_format(&self) -> StreamFormat {
        match self {
            Dialect::OpenAI | Dialect::Gemini | Dialect::Grok => StreamFormat::SseDataOnly,
            Dialect::OpenAIResponses | Dialect::Claude | Dialect::Codex => {
                StreamFormat::SseNamedEvent
            }
        }
    }

    /// Whether a blank-line keepalive may precede the JSON document of a
    /// non-streaming response in this dialect.
    pub fn tolerates_nonstream_keepalive(&self) -> bool {
        matches!(self, Dialect::OpenAI | Dialect::Claude)
    }

    /// Dialects that terminate streams with a `data: [DONE]` marker.
    pub fn uses_done_marker(&self) -> bool {
        matches!(self, Dialect::OpenAI | Dialect::Grok)
    }
}

impl std::fmt::Display for Dialect {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_round_trip() {
        for dialect in [
            Dialect::OpenAI,
            Dialect::OpenAIResponses,
            Dialect::Claude,
            Dialect::Gemini,
            Dialect::Codex,
            Dialect::Grok,
        ] {
            assert_eq!(Dialect::parse(dialect.as_str()), Some(dialect));
        }
        assert_eq!(Dialect::parse("mystery"), None);
    }

    #[test]
    fn stream_formats() {
        assert_eq!(Dialect::OpenAI.stream_format(), StreamFormat::SseDataOnly);
        assert_eq!(Dialect::Gemini.stream_format(), StreamFormat::SseDataOnly);
        assert_eq!(Dialect::Claude.stream_format(), StreamFormat::SseNamedEvent);
        assert_eq!(Dialect::Codex.stream_format(), StreamFormat::SseNamedEvent);
    }

    #[test]
    fn nonstream_keepalive_tolerance() {
        assert!(Dialect::OpenAI.tolerates_nonstream_keepalive());
        assert!(Dialect::Claude.tolerates_nonstream_keepalive());
        assert!(!Dialect::Gemini.tolerates_nonstream_keepalive());
        assert!(!Dialect::OpenAIResponses.tolerates_nonstream_keepalive());
    }
}
