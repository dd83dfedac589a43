//! Qdrant-compatible HTTP vector index for production deployments.
//!
//! Talks to the Qdrant REST API: the collection is created on first health
//! check, points carry the chunk metadata as payload, deletion uses a
//! payload filter on `document_id`, and search pushes the type/collection
//! filter down to the server so top-`k` ranks the full qualifying set.

use super::{IndexFilter, SearchHit, VectorIndex, VectorPoint};
use crate::error::{RetrievalError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::time::Duration;

/// Default per-request timeout against the index service.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Clone, Debug)]
pub struct RemoteVectorIndex {
    client: reqwest::Client,
    base_url: String,
    collection: String,
    dimension: usize,
}

impl RemoteVectorIndex {
    pub fn new(
        base_url: impl Into<String>,
        api_key: Option<&str>,
        collection: impl Into<String>,
        dimension: usize,
    ) -> Result<Self> {
        let base_url = base_url.into();
        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RetrievalError::IndexUnavailable(format!(
                "index endpoint must be an http(s) URL, got {base_url}"
            )));
        }

        let mut headers = reqwest::header::HeaderMap::new();
        if let Some(key) = api_key {
            let value = reqwest::header::HeaderValue::from_str(key.trim()).map_err(|_| {
                RetrievalError::IndexUnavailable("index API key contains invalid characters".into())
            })?;
            headers.insert("api-key", value);
        }

        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .default_headers(headers)
            .build()
            .map_err(|e| {
                RetrievalError::IndexUnavailable(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection: collection.into(),
            dimension,
        })
    }

    fn collection_url(&self, suffix: &str) -> String {
        format!("{}/collections/{}{suffix}", self.base_url, self.collection)
    }

    async fn expect_success(response: reqwest::Response, operation: &str) -> Result<Value> {
        let status = response.status();
        let body: Value = response.json().await.unwrap_or(Value::Null);
        if !status.is_success() {
            return Err(RetrievalError::IndexUnavailable(format!(
                "{operation} failed ({status}): {body}"
            )));
        }
        Ok(body)
    }

    fn build_filter(filter: &IndexFilter) -> Option<Value> {
        let mut must = Vec::new();
        if let Some(doc_type) = filter.doc_type {
            must.push(json!({ "key": "doc_type", "match": { "value": doc_type.as_str() } }));
        }
        if let Some(collection) = &filter.collection {
            must.push(json!({ "key": "collection", "match": { "value": collection } }));
        }
        if must.is_empty() {
            None
        } else {
            Some(json!({ "must": must }))
        }
    }
}

#[async_trait]
impl VectorIndex for RemoteVectorIndex {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }
        for point in points {
            if point.vector.len() != self.dimension {
                return Err(RetrievalError::EmbeddingDimensionMismatch {
                    expected: self.dimension,
                    actual: point.vector.len(),
                });
            }
        }

        let body = json!({
            "points": points.iter().map(|point| json!({
                // Qdrant point ids must be UUIDs or integers; derive a stable
                // UUID from the chunk id so re-upserts overwrite in place.
                "id": stable_point_id(&point.chunk_id),
                "vector": point.vector,
                "payload": {
                    "chunk_id": point.chunk_id,
                    "document_id": point.document_id,
                    "doc_type": point.doc_type.as_str(),
                    "collection": point.collection,
                    "uploaded_at": point.uploaded_at,
                    "model_id": point.model_id,
                },
            })).collect::<Vec<_>>(),
        });

        let response = self
            .client
            .put(format!("{}?wait=true", self.collection_url("/points")))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::IndexUnavailable(format!("point upsert: {e}")))?;
        Self::expect_success(response, "point upsert").await?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let body = json!({
            "filter": {
                "must": [
                    { "key": "document_id", "match": { "value": document_id } }
                ]
            }
        });

        let response = self
            .client
            .post(format!(
                "{}?wait=true",
                self.collection_url("/points/delete")
            ))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::IndexUnavailable(format!("point delete: {e}")))?;
        Self::expect_success(response, "point delete").await?;
        // The delete API does not report a count.
        Ok(0)
    }

    async fn query(
        &self,
        vector: &[f32],
        k: usize,
        filter: &IndexFilter,
    ) -> Result<Vec<SearchHit>> {
        if vector.len() != self.dimension {
            return Err(RetrievalError::EmbeddingDimensionMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        if k == 0 {
            return Ok(Vec::new());
        }

        let mut body = json!({
            "vector": vector,
            "limit": k,
            "with_payload": true,
        });
        if let Some(filter) = Self::build_filter(filter) {
            body["filter"] = filter;
        }

        let response = self
            .client
            .post(self.collection_url("/points/search"))
            .json(&body)
            .send()
            .await
            .map_err(|e| RetrievalError::IndexUnavailable(format!("search: {e}")))?;
        let body = Self::expect_success(response, "search").await?;

        let results: Vec<ScoredPoint> = serde_json::from_value(body["result"].clone())
            .map_err(|e| RetrievalError::IndexUnavailable(format!("malformed search result: {e}")))?;

        Ok(results
            .into_iter()
            .map(|point| SearchHit {
                chunk_id: point.payload.chunk_id,
                document_id: point.payload.document_id,
                score: point.score.clamp(0.0, 1.0),
                uploaded_at: point.payload.uploaded_at,
            })
            .collect())
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    /// Create the collection if needed and confirm its dimensionality. Run
    /// at startup: a dead or misconfigured index fails the process here, not
    /// inside individual requests.
    async fn health_check(&self) -> Result<()> {
        let response = self
            .client
            .get(self.collection_url(""))
            .send()
            .await
            .map_err(|e| RetrievalError::IndexUnavailable(format!("index unreachable: {e}")))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            let body = json!({
                "vectors": { "size": self.dimension, "distance": "Cosine" }
            });
            let response = self
                .client
                .put(self.collection_url(""))
                .json(&body)
                .send()
                .await
                .map_err(|e| {
                    RetrievalError::IndexUnavailable(format!("collection create: {e}"))
                })?;
            Self::expect_success(response, "collection create").await?;
            return Ok(());
        }

        let body = Self::expect_success(response, "collection info").await?;
        let size = body["result"]["config"]["params"]["vectors"]["size"]
            .as_u64()
            .unwrap_or(0) as usize;
        if size != 0 && size != self.dimension {
            return Err(RetrievalError::IndexUnavailable(format!(
                "collection {} has dimension {size}, expected {}",
                self.collection, self.dimension
            )));
        }
        Ok(())
    }
}

// UUIDv5-style stable id from the chunk id, so the same chunk always maps to
// the same point.
fn stable_point_id(chunk_id: &str) -> String {
    let digest = blake3::hash(chunk_id.as_bytes());
    let bytes = digest.as_bytes();
    uuid::Uuid::from_slice(&bytes[..16])
        .expect("16 bytes always form a UUID")
        .to_string()
}

#[derive(Debug, Deserialize)]
struct ScoredPoint {
    score: f32,
    payload: PointPayload,
}

#[derive(Debug, Deserialize)]
struct PointPayload {
    chunk_id: String,
    document_id: String,
    #[serde(default)]
    uploaded_at: i64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::DocumentType;

    #[test]
    fn rejects_non_http_endpoints() {
        assert!(RemoteVectorIndex::new("qdrant.internal:6333", None, "chunks", 384).is_err());
        assert!(RemoteVectorIndex::new("http://localhost:6333", None, "chunks", 384).is_ok());
    }

    #[test]
    fn point_ids_are_stable_and_distinct() {
        assert_eq!(stable_point_id("doc:0"), stable_point_id("doc:0"));
        assert_ne!(stable_point_id("doc:0"), stable_point_id("doc:1"));
        // Must parse as a UUID for the index service to accept it.
        assert!(uuid::Uuid::parse_str(&stable_point_id("doc:0")).is_ok());
    }

    #[test]
    fn filters_translate_to_payload_matches() {
        assert!(RemoteVectorIndex::build_filter(&IndexFilter::default()).is_none());

        let filter = IndexFilter {
            doc_type: Some(DocumentType::Legislation),
            collection: Some("council".to_string()),
        };
        let value = RemoteVectorIndex::build_filter(&filter).unwrap();
        let must = value["must"].as_array().unwrap();
        assert_eq!(must.len(), 2);
        assert_eq!(must[0]["key"], "doc_type");
        assert_eq!(must[0]["match"]["value"], "legislation");
        assert_eq!(must[1]["key"], "collection");
    }
}
