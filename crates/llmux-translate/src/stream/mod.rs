use serde_json::Value;

use llmux_protocol::Dialect;

use crate::{TranslateError, TranslateResult};

mod claude_to_openai;
mod codex_reframe;
mod gemini_to_openai;
mod grok_to_openai;
mod openai_to_claude;
mod openai_to_gemini;
mod openai_to_responses;
mod responses_to_gemini;
mod responses_to_openai;

/// Per-stream context handed to the translator at construction.
#[derive(Debug, Clone, Default)]
pub struct StreamContext {
    /// Model name echoed into synthesized chunks.
    pub model: String,
    /// Response id for dialects that synthesize one (`chatcmpl-…`, `msg_…`).
    pub response_id: String,
    /// Creation timestamp echoed into synthesized chunks.
    pub created: i64,
    /// `instructions` from the translated request; the codex reframer echoes
    /// it into lifecycle events.
    pub instructions: Option<String>,
}

/// Stateful per-stream translator. Owned by the executor, fed one upstream
/// line at a time; emits zero or more wire lines in the client dialect
/// (`""` elements are event delimiters).
pub enum StreamTranslator {
    Identity,
    ClaudeToOpenAI(claude_to_openai::State),
    OpenAIToClaude(openai_to_claude::State),
    GeminiToOpenAI(gemini_to_openai::State),
    OpenAIToGemini(openai_to_gemini::State),
    ResponsesToOpenAI(responses_to_openai::State),
    OpenAIToResponses(openai_to_responses::State),
    ResponsesToGemini(responses_to_gemini::State),
    CodexReframe(codex_reframe::State),
    GrokToOpenAI(grok_to_openai::State),
}

impl StreamTranslator {
    pub fn new(from: Dialect, to: Dialect, ctx: StreamContext) -> TranslateResult<Self> {
        let translator = match (from, to) {
            // Codex upstream SSE needs reframing even for same-family clients.
            (Dialect::Codex, Dialect::OpenAIResponses) | (Dialect::Codex, Dialect::Codex) => {
                StreamTranslator::CodexReframe(codex_reframe::State::new(ctx))
            }
            _ if from == to => StreamTranslator::Identity,
            (Dialect::Claude, Dialect::OpenAI) => {
                StreamTranslator::ClaudeToOpenAI(claude_to_openai::State::new(ctx))
            }
            (Dialect::OpenAI, Dialect::Claude) => {
                StreamTranslator::OpenAIToClaude(openai_to_claude::State::new(ctx))
            }
            (Dialect::Gemini, Dialect::OpenAI) => {
                StreamTranslator::GeminiToOpenAI(gemini_to_openai::State::new(ctx))
            }
            (Dialect::OpenAI, Dialect::Gemini) => {
                StreamTranslator::OpenAIToGemini(openai_to_gemini::State::new(ctx))
            }
            (Dialect::OpenAIResponses, Dialect::OpenAI) | (Dialect::Codex, Dialect::OpenAI) => {
                StreamTranslator::ResponsesToOpenAI(responses_to_openai::State::new(ctx))
            }
            (Dialect::OpenAI, Dialect::OpenAIResponses) | (Dialect::OpenAI, Dialect::Codex) => {
                StreamTranslator::OpenAIToResponses(openai_to_responses::State::new(ctx))
            }
            (Dialect::OpenAIResponses, Dialect::Gemini) | (Dialect::Codex, Dialect::Gemini) => {
                StreamTranslator::ResponsesToGemini(responses_to_gemini::State::new(ctx))
            }
            (Dialect::Grok, Dialect::OpenAI) => {
                StreamTranslator::GrokToOpenAI(grok_to_openai::State::new(ctx))
            }
            _ => return Err(TranslateError::UnsupportedPair { from, to }),
        };
        Ok(translator)
    }

    pub fn push_line(&mut self, line: &str) -> Vec<String> {
        match self {
            StreamTranslator::Identity => vec![line.to_string()],
            StreamTranslator::ClaudeToOpenAI(state) => state.push_line(line),
            StreamTranslator::OpenAIToClaude(state) => state.push_line(line),
            StreamTranslator::GeminiToOpenAI(state) => state.push_line(line),
            StreamTranslator::OpenAIToGemini(state) => state.push_line(line),
            StreamTranslator::ResponsesToOpenAI(state) => state.push_line(line),
            StreamTranslator::OpenAIToResponses(state) => state.push_line(line),
            StreamTranslator::ResponsesToGemini(state) => state.push_line(line),
            StreamTranslator::CodexReframe(state) => state.push_line(line),
            StreamTranslator::GrokToOpenAI(state) => state.push_line(line),
        }
    }

    /// Upstream closed; flush whatever termination the client dialect owes.
    pub fn finish(&mut self) -> Vec<String> {
        match self {
            StreamTranslator::Identity => Vec::new(),
            StreamTranslator::ClaudeToOpenAI(state) => state.finish(),
            StreamTranslator::OpenAIToClaude(state) => state.finish(),
            StreamTranslator::GeminiToOpenAI(state) => state.finish(),
            StreamTranslator::OpenAIToGemini(state) => state.finish(),
            StreamTranslator::ResponsesToOpenAI(state) => state.finish(),
            StreamTranslator::OpenAIToResponses(state) => state.finish(),
            StreamTranslator::ResponsesToGemini(state) => state.finish(),
            StreamTranslator::CodexReframe(state) => state.finish(),
            StreamTranslator::GrokToOpenAI(state) => state.finish(),
        }
    }
}

/// Builds one OpenAI chat streaming chunk as a `data:` line + delimiter.
pub(crate) fn chat_chunk_lines(
    ctx: &StreamContext,
    delta: Value,
    finish_reason: Option<&str>,
    usage: Option<Value>,
) -> Vec<String> {
    let mut chunk = serde_json::json!({
        "id": ctx.response_id,
        "object": "chat.completion.chunk",
        "created": ctx.created,
        "model": ctx.model,
        "choices": [{
            "index": 0,
            "delta": delta,
            "finish_reason": finish_reason,
        }],
    });
    if let Some(usage) = usage
        && let Some(obj) = chunk.as_object_mut()
    {
        obj.insert("usage".to_string(), usage);
    }
    data_lines(&chunk)
}

/// Serializes a JSON payload as a `data:` line followed by the delimiter.
pub(crate) fn data_lines(payload: &Value) -> Vec<String> {
    vec![format!("data: {payload}"), String::new()]
}

/// Serializes a named event as `event:` + `data:` lines plus the delimiter.
pub(crate) fn event_lines(event: &str, payload: &Value) -> Vec<String> {
    vec![
        format!("event: {event}"),
        format!("data: {payload}"),
        String::new(),
    ]
}

pub(crate) fn done_lines() -> Vec<String> {
    vec![format!("data: {}", llmux_protocol::DONE_MARKER), String::new()]
}

/// Extracts the payload of a `data:` line, if the line is one.
pub(crate) fn data_payload(line: &str) -> Option<&str> {
    line.strip_prefix("data:").map(str::trim)
}
