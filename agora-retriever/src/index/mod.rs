//! Vector index abstraction and backends.
//!
//! The retrieval service depends only on the [`VectorIndex`] trait; which
//! backend sits behind it is a deployment decision:
//!
//! - [`EmbeddedVectorIndex`]: SQLite-backed, no external dependency, for
//!   single-process and development use.
//! - [`RemoteVectorIndex`]: a Qdrant-compatible HTTP service, for production
//!   deployments with concurrent writers.
//!
//! Both report cosine similarity clamped to `[0, 1]` so scores are
//! comparable across queries and backends, and both apply the optional
//! document-type/collection filter during the search itself — a filtered
//! query returns up to `k` qualifying hits, never a post-filtered remnant.

pub mod embedded;
pub mod remote;

pub use embedded::EmbeddedVectorIndex;
pub use remote::RemoteVectorIndex;

use crate::error::Result;
use crate::store::{DocumentId, DocumentType};
use async_trait::async_trait;

/// A chunk vector plus the metadata the index filters and ranks on.
#[derive(Debug, Clone)]
pub struct VectorPoint {
    pub chunk_id: String,
    pub document_id: DocumentId,
    pub doc_type: DocumentType,
    pub collection: String,
    /// Owning document's upload time, used for recency tie-breaking.
    pub uploaded_at: i64,
    /// Embedding model that produced this vector; vectors from a different
    /// model are stale and must not be mixed in one search.
    pub model_id: String,
    pub vector: Vec<f32>,
}

/// Restricts a search to a subset of documents. Applied during the search,
/// not afterwards.
#[derive(Debug, Clone, Default)]
pub struct IndexFilter {
    pub doc_type: Option<DocumentType>,
    pub collection: Option<String>,
}

impl IndexFilter {
    pub fn for_doc_type(doc_type: DocumentType) -> Self {
        Self {
            doc_type: Some(doc_type),
            collection: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.doc_type.is_none() && self.collection.is_none()
    }
}

/// One nearest-neighbor result.
#[derive(Debug, Clone)]
pub struct SearchHit {
    pub chunk_id: String,
    pub document_id: DocumentId,
    /// Similarity in `[0, 1]`, higher is more relevant.
    pub score: f32,
    pub uploaded_at: i64,
}

/// Nearest-neighbor storage for chunk embeddings.
///
/// Implementations must accept concurrent upserts for different documents
/// and must never return a torn vector to a concurrent reader.
#[async_trait]
pub trait VectorIndex: Send + Sync {
    /// Insert or replace vectors. Fails fast with a dimension-mismatch error
    /// if any vector's length differs from [`VectorIndex::dimension`].
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()>;

    /// Remove every vector belonging to the given document. Returns the
    /// number of vectors removed where the backend reports it.
    async fn delete_document(&self, document_id: &str) -> Result<usize>;

    /// Top-`k` nearest neighbors of `vector`, most similar first. An empty
    /// index yields an empty list, not an error.
    async fn query(&self, vector: &[f32], k: usize, filter: &IndexFilter)
    -> Result<Vec<SearchHit>>;

    /// The vector length this index was configured with.
    fn dimension(&self) -> usize;

    /// Verify the backend is reachable and correctly configured. Run at
    /// startup so a dead index fails the process, not individual requests.
    async fn health_check(&self) -> Result<()>;
}

/// Cosine similarity clamped to `[0, 1]`. Negative similarity carries no
/// useful relevance signal for retrieval, so it maps to zero.
pub(crate) fn cosine_score(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    (dot / (norm_a * norm_b)).clamp(0.0, 1.0)
}
