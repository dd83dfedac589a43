//! Error types for the embedding system

/// Result type for embedding operations.
pub type Result<T> = std::result::Result<T, EmbedError>;

/// Error type covering configuration problems and provider failures.
///
/// The `retryable` flag on [`EmbedError::Provider`] is what the retry policy
/// keys on: rate limits, timeouts, and transport failures are worth retrying;
/// a malformed request or an authentication failure is not.
#[derive(Debug, thiserror::Error)]
pub enum EmbedError {
    /// The provider rejected or failed the request.
    #[error("embedding provider error: {message}")]
    Provider { message: String, retryable: bool },

    /// The provider returned a vector of the wrong length. This means the
    /// configured model and the index disagree about dimensionality and must
    /// be surfaced loudly rather than silently corrupting the index.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// The provider configuration is invalid.
    #[error("invalid embedding configuration: {message}")]
    InvalidConfig { message: String },
}

impl EmbedError {
    /// Create a retryable provider error (rate limit, network failure).
    pub fn transient<S: Into<String>>(message: S) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: true,
        }
    }

    /// Create a permanent provider error.
    pub fn permanent<S: Into<String>>(message: S) -> Self {
        Self::Provider {
            message: message.into(),
            retryable: false,
        }
    }

    /// Create an invalid configuration error with a custom message.
    pub fn invalid_config<S: Into<String>>(message: S) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Whether a retry with backoff could plausibly succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Provider { retryable: true, .. })
    }
}

impl From<reqwest::Error> for EmbedError {
    fn from(err: reqwest::Error) -> Self {
        let retryable = err.is_timeout() || err.is_connect() || err.is_request() || err.is_body();
        Self::Provider {
            message: err.to_string(),
            retryable,
        }
    }
}
