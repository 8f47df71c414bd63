//! Wire-level protocol primitives: dialect tags, SSE scanning and SSE framing.
//!
//! This crate is pure; no I/O and no HTTP types. Executors feed it bytes and
//! lines, it hands back lines and frames.

pub mod dialect;
pub mod framer;
pub mod sse;

pub use dialect::{Dialect, StreamFormat};
pub use framer::{DataOnlyWriter, SseFramer};
pub use sse::{SseEvent, SseEventAssembler, SseLineScanner};

/// Terminal marker used by the OpenAI-style streaming dialects.
pub const DONE_MARKER: &str = "[DONE]";
