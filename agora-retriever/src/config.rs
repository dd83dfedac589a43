//! Tunable configuration for the retrieval service.

use agora_embed::RetryPolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Configuration for chunking, querying, and external-call budgets.
///
/// Chunk size, overlap, and the relevance threshold are deployment-tunable
/// rather than hardcoded; the defaults here are reasonable for civic
/// documents (agendas, budgets, ordinances) embedded with sentence-level
/// models.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrieverConfig {
    /// Maximum chunk size in bytes, overlap included.
    pub chunk_size: usize,
    /// Overlap between consecutive chunks in bytes.
    pub chunk_overlap: usize,
    /// Default number of candidates returned by a query.
    pub top_k: usize,
    /// Minimum similarity score for a candidate to be returned. Weakly
    /// relevant chunks hurt answer quality more than returning fewer chunks,
    /// so this applies even when it leaves fewer than `top_k` results.
    pub relevance_threshold: f32,
    /// Retry policy for embedding-provider calls during ingest.
    pub embed_retry: RetryPolicy,
    /// Deadline for one embedding call (per batch) in seconds.
    pub embed_timeout_secs: u64,
    /// Deadline for a similarity query in seconds.
    pub query_timeout_secs: u64,
}

impl Default for RetrieverConfig {
    fn default() -> Self {
        Self {
            chunk_size: agora_chunk::DEFAULT_MAX_CHUNK_SIZE,
            chunk_overlap: agora_chunk::DEFAULT_OVERLAP,
            top_k: 5,
            relevance_threshold: 0.70,
            embed_retry: RetryPolicy::default(),
            embed_timeout_secs: 60,
            query_timeout_secs: 10,
        }
    }
}

impl RetrieverConfig {
    /// Load configuration from a TOML file.
    pub async fn load(path: &Path) -> Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: Self = toml::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn with_chunk_overlap(mut self, chunk_overlap: usize) -> Self {
        self.chunk_overlap = chunk_overlap;
        self
    }

    pub fn with_top_k(mut self, top_k: usize) -> Self {
        self.top_k = top_k.max(1);
        self
    }

    pub fn with_relevance_threshold(mut self, threshold: f32) -> Self {
        self.relevance_threshold = threshold.clamp(0.0, 1.0);
        self
    }

    pub fn embed_timeout(&self) -> Duration {
        Duration::from_secs(self.embed_timeout_secs)
    }

    pub fn query_timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_secs)
    }
}
