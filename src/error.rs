//! Error Types
//!
//! Error handling for the DeepSeek client and its streaming consumer.

use thiserror::Error;

/// Main error type for client and stream operations
#[derive(Debug, Clone, Error)]
pub enum DeepSeekError {
    /// Configuration errors (invalid JSON, unreadable file, missing key)
    #[error("Configuration error: {0}")]
    Config(String),

    /// HTTP request could not be sent or was rejected
    #[error("Request failed: {0}")]
    Request(String),

    /// Authentication failed
    #[error("Authentication failed: {0}. Check your API key.")]
    Auth(String),

    /// Request timeout
    #[error("Request timeout: {0}")]
    Timeout(String),

    /// Connection error or unexpected close before the `[DONE]` sentinel
    #[error("Transport failure: {0}")]
    TransportFailure(String),

    /// A frame payload could not be decoded
    #[error("Malformed chunk: {0}")]
    MalformedChunk(String),

    /// The body ended inside a frame that never completed
    #[error("Truncated stream: {pending_bytes} bytes never formed a complete frame")]
    TruncatedStream { pending_bytes: usize },

    /// The server broke the append-only or finalization rules
    #[error("Stream protocol error: {0}")]
    StreamProtocol(String),

    /// The service reported an error inside the event stream
    #[error("Service error: {0}")]
    Service(String),

    /// The caller cancelled the stream
    #[error("Stream cancelled")]
    Cancelled,

    /// Generic internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl DeepSeekError {
    /// True for caller-initiated cancellation
    pub fn is_cancelled(&self) -> bool {
        matches!(self, DeepSeekError::Cancelled)
    }

    /// True for the errors that terminate a stream because of what the
    /// server sent (as opposed to cancellation or client setup)
    pub fn is_fatal_stream_error(&self) -> bool {
        matches!(
            self,
            DeepSeekError::TransportFailure(_)
                | DeepSeekError::MalformedChunk(_)
                | DeepSeekError::TruncatedStream { .. }
                | DeepSeekError::StreamProtocol(_)
                | DeepSeekError::Service(_)
        )
    }
}

impl From<reqwest::Error> for DeepSeekError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            DeepSeekError::Timeout(err.to_string())
        } else if err.is_connect() || err.is_request() || err.is_body() {
            DeepSeekError::TransportFailure(format!("Connection failed: {}", err))
        } else if err.is_decode() {
            DeepSeekError::MalformedChunk(format!("Failed to decode response: {}", err))
        } else {
            DeepSeekError::Request(err.to_string())
        }
    }
}

impl From<serde_json::Error> for DeepSeekError {
    fn from(err: serde_json::Error) -> Self {
        DeepSeekError::MalformedChunk(format!("JSON parsing error: {}", err))
    }
}

impl From<std::io::Error> for DeepSeekError {
    fn from(err: std::io::Error) -> Self {
        DeepSeekError::Config(format!("IO error: {}", err))
    }
}

/// Result type alias for DeepSeek operations
pub type Result<T> = std::result::Result<T, DeepSeekError>;
