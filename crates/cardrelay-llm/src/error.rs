use thiserror::Error;

#[derive(Debug, Error)]
pub enum BackendError {
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("Backend returned status {status}: {body}")]
    Status { status: u16, body: String },

    #[error("Stream error: {0}")]
    Stream(String),

    #[error("Failed to parse event line `{line}`: {reason}")]
    Parse { line: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

impl BackendError {
    /// True for malformed event data, as opposed to transport failures
    pub fn is_parse(&self) -> bool {
        matches!(self, BackendError::Parse { .. })
    }
}

pub type Result<T> = std::result::Result<T, BackendError>;
