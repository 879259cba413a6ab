use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },
    #[error("provider unavailable: {0}")]
    ProviderUnavailable(String),
    #[error("authentication failed: {0}")]
    Auth(String),
    #[error("malformed stream frame: {0}")]
    StreamParse(String),
    #[error("bad request: {0}")]
    BadRequest(String),
    #[error("storage error: {0}")]
    Storage(String),
    #[error("conversion failed ({kind}): {message}")]
    Conversion { kind: String, message: String },
    #[error("internal error: {0}")]
    Internal(String),
}

impl EngineError {
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        EngineError::Internal(err.to_string())
    }

    pub fn conversion(kind: impl Into<String>, message: impl std::fmt::Display) -> Self {
        EngineError::Conversion {
            kind: kind.into(),
            message: message.to_string(),
        }
    }
}

impl From<sqlx::Error> for EngineError {
    fn from(err: sqlx::Error) -> Self {
        EngineError::Storage(err.to_string())
    }
}

// Every reqwest failure in this crate happens while talking to an external
// provider, so the whole class maps to ProviderUnavailable. Auth failures are
// raised explicitly at the call sites that inspect status codes.
impl From<reqwest::Error> for EngineError {
    fn from(err: reqwest::Error) -> Self {
        EngineError::ProviderUnavailable(err.to_string())
    }
}
