//! The translator matrix: request, response-chunk and non-stream response
//! translation between chat dialects.
//!
//! Request translation is pure and synchronous. Stream translation is a
//! per-stream state machine owned by the executor and fed one upstream line
//! at a time; it emits zero or more wire lines in the client dialect.

pub mod callid;
pub mod nonstream;
pub mod request;
pub mod stream;
pub mod tokencount;

mod value_util;

pub use llmux_protocol::Dialect;
pub use nonstream::translate_nonstream;
pub use request::translate_request;
pub use stream::{StreamContext, StreamTranslator};
pub use tokencount::translate_token_count;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranslateError {
    UnsupportedPair { from: Dialect, to: Dialect },
    Invalid(String),
}

impl std::fmt::Display for TranslateError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TranslateError::UnsupportedPair { from, to } => {
                write!(f, "no translator registered for {from} -> {to}")
            }
            TranslateError::Invalid(msg) => write!(f, "untranslatable body: {msg}"),
        }
    }
}

impl std::error::Error for TranslateError {}

pub type TranslateResult<T> = Result<T, TranslateError>;
