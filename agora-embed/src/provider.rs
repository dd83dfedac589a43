//! Embedding provider implementations

use crate::config::EmbedConfig;
use crate::error::{EmbedError, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Result of embedding generation
#[derive(Debug, Clone)]
pub struct EmbeddingResult {
    /// The generated embeddings, one per input text, in input order
    pub embeddings: Vec<Vec<f32>>,
    /// The dimension of each embedding vector
    pub dimension: usize,
}

impl EmbeddingResult {
    /// Create a new result, inferring the dimension from the first vector.
    pub fn new(embeddings: Vec<Vec<f32>>) -> Self {
        let dimension = embeddings.first().map(|e| e.len()).unwrap_or(0);
        Self {
            embeddings,
            dimension,
        }
    }

    pub fn len(&self) -> usize {
        self.embeddings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.embeddings.is_empty()
    }
}

/// Trait for embedding providers that can generate embeddings from text
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Generate an embedding for a single text
    async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let texts = vec![text.to_string()];
        let result = self.embed_texts(&texts).await?;
        result
            .embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbedError::permanent("provider returned no embedding for text"))
    }

    /// Generate embeddings for multiple texts, preserving input order
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult>;

    /// Get the dimension of embeddings produced by this provider
    fn embedding_dimension(&self) -> usize;

    /// Get the name/identifier of this provider
    fn provider_name(&self) -> &str;

    /// Model identifier/version, recorded with stored vectors so stale
    /// embeddings are detectable after a model change.
    fn model_id(&self) -> String {
        format!("{}:{}", self.provider_name(), self.embedding_dimension())
    }
}

/// HTTP client for an OpenAI-compatible `/embeddings` endpoint.
///
/// Batches larger than the configured limit are split into sequential
/// sub-batches and recombined in input order. Each request gets a bounded
/// timeout; rate limits (429), server errors, and transport failures are
/// reported as retryable so callers can wrap the call in a
/// [`RetryPolicy`](crate::RetryPolicy).
#[derive(Debug, Clone)]
pub struct RemoteEmbeddingProvider {
    config: EmbedConfig,
    client: reqwest::Client,
    endpoint: String,
}

impl RemoteEmbeddingProvider {
    pub fn new(config: EmbedConfig) -> Result<Self> {
        if config.endpoint.trim().is_empty() {
            return Err(EmbedError::invalid_config("missing embedding endpoint"));
        }
        if config.model.trim().is_empty() {
            return Err(EmbedError::invalid_config("missing embedding model name"));
        }
        if config.dimension == 0 {
            return Err(EmbedError::invalid_config(
                "embedding dimension must be nonzero",
            ));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(api_key) = &config.api_key {
            let value = reqwest::header::HeaderValue::from_str(&format!(
                "Bearer {}",
                api_key.trim()
            ))
            .map_err(|_| EmbedError::invalid_config("API key contains invalid characters"))?;
            headers.insert(reqwest::header::AUTHORIZATION, value);
        }

        let client = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .default_headers(headers)
            .build()
            .map_err(|e| EmbedError::invalid_config(format!("failed to build HTTP client: {e}")))?;

        let endpoint = format!("{}/embeddings", config.endpoint.trim_end_matches('/'));
        Ok(Self {
            config,
            client,
            endpoint,
        })
    }

    /// Send one sub-batch (already within the configured size limit).
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let request = EmbeddingRequest {
            model: &self.config.model,
            input: texts,
        };

        let response = self.client.post(&self.endpoint).json(&request).send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<body unavailable>".to_string());
            let retryable =
                status == reqwest::StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            return Err(EmbedError::Provider {
                message: format!("embedding request failed ({status}): {body}"),
                retryable,
            });
        }

        let mut parsed: EmbeddingResponse = response
            .json()
            .await
            .map_err(|e| EmbedError::permanent(format!("malformed embedding response: {e}")))?;

        if parsed.data.len() != texts.len() {
            return Err(EmbedError::permanent(format!(
                "provider returned {} embeddings for {} inputs",
                parsed.data.len(),
                texts.len()
            )));
        }
        parsed.data.sort_by_key(|entry| entry.index);

        let mut embeddings = Vec::with_capacity(parsed.data.len());
        for entry in parsed.data {
            if entry.embedding.len() != self.config.dimension {
                return Err(EmbedError::DimensionMismatch {
                    expected: self.config.dimension,
                    actual: entry.embedding.len(),
                });
            }
            embeddings.push(entry.embedding);
        }
        Ok(embeddings)
    }
}

#[async_trait]
impl EmbeddingProvider for RemoteEmbeddingProvider {
    async fn embed_texts(&self, texts: &[String]) -> Result<EmbeddingResult> {
        if texts.is_empty() {
            return Ok(EmbeddingResult::new(vec![]));
        }

        tracing::debug!(count = texts.len(), "generating embeddings");

        // Sub-batches run concurrently; try_join_all keeps their results in
        // submission order, so the output lines up with the input texts.
        let batches = texts
            .chunks(self.config.max_batch_size)
            .map(|batch| self.embed_batch(batch));
        let results = futures::future::try_join_all(batches).await?;

        Ok(EmbeddingResult::new(results.into_iter().flatten().collect()))
    }

    fn embedding_dimension(&self) -> usize {
        self.config.dimension
    }

    fn provider_name(&self) -> &str {
        "remote"
    }

    fn model_id(&self) -> String {
        format!("remote:{}:{}", self.config.model, self.config.dimension)
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
    #[serde(default)]
    index: usize,
}
