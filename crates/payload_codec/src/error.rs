use thiserror::Error;

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("no codec configured for structured payloads")]
    NoCodec,

    #[error("unknown codec kind: {0}")]
    UnknownKind(String),

    #[error("insufficient data: expected at least {expected} bytes, got {actual}")]
    InsufficientData { expected: usize, actual: usize },

    #[error("unsupported sensor type: {0}")]
    UnsupportedType(u8),

    #[error("invalid field '{field}': {reason}")]
    InvalidField { field: String, reason: String },

    #[error("script compilation error: {0}")]
    ScriptCompilation(String),

    #[error("script execution error: {0}")]
    ScriptExecution(String),

    #[error("script returned an unsupported value: {0}")]
    InvalidScriptOutput(String),

    #[error("json serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, CodecError>;
