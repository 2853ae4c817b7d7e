use thiserror::Error;

pub type Result<T> = std::result::Result<T, BlocksError>;

#[derive(Debug, Error)]
pub enum BlocksError {
    #[error("{noun} `{id}` not found")]
    NotFound { noun: String, id: String },

    #[error("item `{0}` already exists")]
    DuplicateId(String),

    #[error("validation failed: {}", .0.join("; "))]
    ValidationFailed(Vec<String>),

    #[error("Unknown operation: {0}")]
    UnsupportedOperation(String),

    #[error("handler for `{kind}` failed: {message}")]
    HandlerFailure { kind: String, message: String },

    #[error("cannot change kind of `{id}` from `{from}` to `{to}`; delete and recreate it instead")]
    KindChange { id: String, from: String, to: String },

    #[error("invalid schema for field `{field}`: {message}")]
    InvalidSchema { field: String, message: String },

    #[error("session error: {0}")]
    Session(String),

    #[error("handler for `{kind}` timed out after {millis}ms")]
    Timeout { kind: String, millis: u64 },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Serde(#[from] serde_json::Error),
}

impl BlocksError {
    pub fn not_found(noun: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            noun: noun.into(),
            id: id.into(),
        }
    }

    pub fn handler(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::HandlerFailure {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Message surfaced in an error envelope.
    pub fn envelope_message(&self) -> String {
        match self {
            Self::NotFound { noun, .. } => format!("{} not found", capitalize(noun)),
            Self::HandlerFailure { message, .. } | Self::Session(message) => message.clone(),
            other => other.to_string(),
        }
    }
}

pub(crate) fn capitalize(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}
