use thiserror::Error;

/// Errors from the AI gateway
#[derive(Debug, Error)]
pub(crate) enum GatewayError {
    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Invalid response from server: {0}")]
    InvalidResponse(String),

    #[error("Server error ({status}): {message}")]
    ServerError { status: u16, message: String },

    #[error("Audio is empty")]
    EmptyAudio,

    #[error("Audio too large: {size} bytes (max: {max_size})")]
    AudioTooLarge { size: usize, max_size: usize },
}
