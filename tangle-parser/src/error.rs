/*!
The error surface.

Exhaustion of a matcher's result sequence is *not* an error: the trampoline
treats it as flow control and it never reaches the caller unless the
full-match rewriter wraps the root. Everything here is a genuine failure.
*/
pub use tangle_automata::RegexError;

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    /// The lexer could match neither a token nor a discard.
    #[error("no token recognised at {location}, before {rest:?}")]
    Lex { location: String, rest: String },

    /// Indent invariants broken, e.g. `Indent` without a block
    /// configuration.
    #[error("offside rule violation: {0}")]
    Offside(String),

    #[error(transparent)]
    Regex(#[from] RegexError),

    /// Contradictory builder or grammar state.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// A full-match parse found no result. The location is the furthest
    /// stream position observed across all attempted paths, including paths
    /// replayed from the memo caches.
    #[error("the parse failed at {location}, before {snippet:?}{expected}")]
    FullMatch {
        location: String,
        snippet: String,
        /// Hint from the deepest failed pattern; empty when unknown,
        /// otherwise ` (expected ...)`.
        expected: String,
    },

    /// A coroutine failed in a way the engine does not understand.
    #[error("internal failure: {0}")]
    Internal(String),

    /// A monitor requested cancellation.
    #[error("parse cancelled: {0}")]
    Cancelled(String),
}

impl ParseError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        ParseError::Configuration(message.into())
    }

    pub(crate) fn offside(message: impl Into<String>) -> Self {
        ParseError::Offside(message.into())
    }

    pub(crate) fn internal(message: impl Into<String>) -> Self {
        ParseError::Internal(message.into())
    }
}
