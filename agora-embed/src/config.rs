//! Configuration for embedding providers.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Default number of texts sent to the provider in one request.
pub const DEFAULT_MAX_BATCH_SIZE: usize = 64;

/// Default per-request timeout.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Configuration for a remote embedding endpoint.
///
/// The endpoint is expected to speak the common `/embeddings` JSON shape
/// (a `model` plus a list of `input` strings, answered by one vector per
/// input). The expected dimension is declared up front so a misconfigured
/// model is caught on the first response instead of corrupting the index.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbedConfig {
    /// Base URL of the provider, e.g. `https://api.example.com/v1`.
    pub endpoint: String,
    /// Bearer token for the provider, if it requires one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    /// Model identifier sent with each request.
    pub model: String,
    /// Expected output vector length.
    pub dimension: usize,
    /// Maximum texts per request; larger inputs are split into sub-batches.
    #[serde(default = "default_batch_size")]
    pub max_batch_size: usize,
    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_batch_size() -> usize {
    DEFAULT_MAX_BATCH_SIZE
}

fn default_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT.as_secs()
}

impl EmbedConfig {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>, dimension: usize) -> Self {
        Self {
            endpoint: endpoint.into(),
            api_key: None,
            model: model.into(),
            dimension,
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT.as_secs(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_max_batch_size(mut self, max_batch_size: usize) -> Self {
        self.max_batch_size = max_batch_size.max(1);
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }
}

/// Bounded retry with exponential backoff and jitter.
///
/// Wraps the provider call at the call site (see [`crate::retry_embed`])
/// instead of scattering sleeps through business logic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Delay before the second attempt; doubles each attempt after that.
    pub base_delay_ms: u64,
    /// Upper bound on any single delay.
    pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay_ms: 250,
            max_delay_ms: 8_000,
        }
    }
}

impl RetryPolicy {
    /// Delay before the attempt numbered `attempt` (1-based; attempt 1 has
    /// no delay). Jittered by up to half the base delay to avoid thundering
    /// herds against a rate-limited provider.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt <= 1 {
            return Duration::ZERO;
        }
        let exp = (attempt - 2).min(16);
        let backoff = self.base_delay_ms.saturating_mul(1u64 << exp);
        let jitter = if self.base_delay_ms > 1 {
            rand::random_range(0..self.base_delay_ms / 2)
        } else {
            0
        };
        Duration::from_millis(backoff.saturating_add(jitter).min(self.max_delay_ms))
    }
}
