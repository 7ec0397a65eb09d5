use cardrelay_llm::BackendError;
use thiserror::Error;

/// Per-turn failures. None of these affect other turns or shared state.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("Placeholder pool exhausted: direct creation failed after {attempts} attempts: {reason}")]
    PoolExhausted { attempts: u32, reason: String },

    #[error("Placeholder delivery to {user_id} failed after retry")]
    PlaceholderDeliveryFailed { user_id: String },

    #[error("Upstream request failed: {0}")]
    UpstreamRequestFailed(String),

    #[error("Malformed upstream event: {0}")]
    StreamParseFailed(String),

    #[error("Session not found for user: {0}")]
    SessionNotFound(String),
}

impl From<BackendError> for RelayError {
    fn from(err: BackendError) -> Self {
        if err.is_parse() {
            RelayError::StreamParseFailed(err.to_string())
        } else {
            RelayError::UpstreamRequestFailed(err.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
