//! Deterministic local embedding provider for development and tests.

use crate::error::Result;
use crate::provider::{EmbeddingProvider, EmbeddingResult};
use async_trait::async_trait;
use fnv::FnvHasher;
use std::hash::Hasher;

/// Default vector length for the hashed provider.
pub const DEFAULT_HASHED_DIMENSION: usize = 384;

/// Character n-gram hashing embedder.
///
/// Lowercases the text, hashes every trigram (and whole word) with FNV into
/// a fixed-size bucket space, and L2-normalizes the counts. The same text
/// always produces the same vector, and texts sharing vocabulary land near
/// each other, which is enough to exercise the full indexing and query
/// pipeline with no network or model download.
///
/// This is not a semantic model; production deployments use
/// [`RemoteEmbeddingProvider`](crate::RemoteEmbeddingProvider).
#[derive(Debug, Clone)]
pub struct HashedNgramProvider {
    dimension: usize,
}

impl Default for HashedNgramProvider {
    fn default() -> Self {
        Self::new(DEFAULT_HASHED_DIMENSION)
    }
}

impl HashedNgramProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(8),
        }
    }

    fn embed_one(&self, text: &str) -> Vec<f32> {
        let mut buckets = vec![0.0f32; self.dimension];
        let normalized = text.to_lowercase();

        for word in normalized.split_whitespace() {
            self.bump(&mut buckets, word.as_bytes());

            let chars: Vec<char> = word.chars().collect();
            if chars.len() < 3 {
                continue;
            }
            for trigram in chars.windows(3) {
                let gram: String = trigram.iter().collect();
                self.bump(&mut buckets, gram.as_bytes());
            }
        }

        let norm: f32 = buckets.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for value in &mut buckets {
                *value /= norm;
            }
        }
        buckets
    }

    fn bump(&self, buckets: &mut [f32], token: &[u8]) {
        let mut hasher = FnvHasher::default();
        hasher.write(token);
        let bucket = (hasher.finish() % self.dimension as u64) as usize;
        buckets[bucket] += 1.0;
    }
}

#[async_trait]
impl EmbeddingProvider for HashedNgramProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        let embeddings = texts.iter().map(|text| self.embed_one(text)).collect();
        Ok(EmbeddingResult::new(embeddings))
    }

    fn embedding_dimension(&self) -> usize {
        self.dimension
    }

    fn provider_name(&self) -> &str {
        "hashed-ngram"
    }
}
