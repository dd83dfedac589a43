//! Error taxonomy for the retrieval pipeline.
//!
//! Each variant maps to a distinct failure policy:
//!
//! - [`RetrievalError::UnsupportedFormat`] is permanent and caller-fixable
//!   (re-upload in a supported format).
//! - [`RetrievalError::Extraction`] is permanent for the one document and
//!   never aborts a batch; the document is marked `failed` with detail.
//! - [`RetrievalError::EmbeddingProvider`] is transient; the service retries
//!   with bounded backoff before escalating to a permanent ingest failure.
//! - [`RetrievalError::EmbeddingDimensionMismatch`] is a configuration bug
//!   and is surfaced loudly, never silently dropped.
//! - [`RetrievalError::IndexUnavailable`] is fatal at the index layer; both
//!   ingest and query fail fast instead of queuing.

use agora_embed::EmbedError;

pub type Result<T> = std::result::Result<T, RetrievalError>;

#[derive(Debug, thiserror::Error)]
pub enum RetrievalError {
    /// The declared type matches no supported extractor.
    #[error("unsupported document format: {0}")]
    UnsupportedFormat(String),

    /// The document bytes could not be read as the declared format.
    #[error("text extraction failed: {0}")]
    Extraction(String),

    /// The embedding provider failed after the configured retries.
    #[error("embedding provider failed after {attempts} attempt(s): {source}")]
    EmbeddingProvider {
        attempts: u32,
        #[source]
        source: EmbedError,
    },

    /// A vector's length does not match the index's configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    EmbeddingDimensionMismatch { expected: usize, actual: usize },

    /// The vector index backend cannot be reached or is misconfigured.
    #[error("vector index unavailable: {0}")]
    IndexUnavailable(String),

    /// An ingest pipeline is already running for this document.
    #[error("ingest already in flight for document {0}")]
    IngestInFlight(String),

    /// No document with the given identifier exists.
    #[error("document {0} not found")]
    DocumentNotFound(String),

    /// An external call exceeded its deadline.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl RetrievalError {
    /// Whether a later retry of the whole ingest could succeed without any
    /// operator action. Recorded in the document's error detail.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::EmbeddingProvider { .. } | Self::Timeout { .. } | Self::IndexUnavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_failures_are_retryable() {
        assert!(
            RetrievalError::EmbeddingProvider {
                attempts: 4,
                source: EmbedError::transient("rate limited"),
            }
            .is_retryable()
        );
        assert!(
            RetrievalError::Timeout {
                operation: "embedding",
                seconds: 30
            }
            .is_retryable()
        );
        assert!(!RetrievalError::UnsupportedFormat("exe".into()).is_retryable());
        assert!(!RetrievalError::Extraction("truncated file".into()).is_retryable());
    }
}
