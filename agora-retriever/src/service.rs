//! Retrieval service: ingest orchestration and similarity queries.
//!
//! ## Ingest
//!
//! Each document moves through `pending → extracting → chunking → embedding
//! → indexed`, with `failed` reachable from any stage. Every transition is a
//! status compare-and-swap in the document store; the claim into
//! `extracting` is what guarantees at most one ingest pipeline per document
//! at a time. On failure the attempt's chunks and vectors are rolled back so
//! a retry starts clean, and the error detail lands on the document for the
//! status endpoint to report.
//!
//! Re-ingesting byte-identical content (same blake3 hash) while the document
//! is already `indexed` short-circuits before extraction — no provider calls
//! are spent on content that is already searchable.
//!
//! ## Query
//!
//! The question is embedded, the index is asked for top-`k` candidates with
//! the caller's filter applied during the search, candidates below the
//! relevance threshold are dropped (weakly relevant context hurts answer
//! quality more than fewer results), and the survivors are hydrated with
//! chunk text and provenance, ordered by score with recency as the
//! tie-break. Provider or index trouble at query time degrades to fewer or
//! zero results instead of failing the caller.

use crate::config::RetrieverConfig;
use crate::error::{RetrievalError, Result};
use crate::extract::{self, DocumentKind, ExtractedText};
use crate::index::{IndexFilter, VectorIndex, VectorPoint};
use crate::store::{
    ChunkRecord, Document, DocumentIndex, DocumentStatus, DocumentType, StoreStats,
};
use agora_chunk::{Chunker, ChunkerConfig};
use agora_embed::{EmbeddingProvider, retry_embed_counted};
use itertools::Itertools;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A document handed to [`RetrievalService::ingest`].
#[derive(Debug, Clone)]
pub struct DocumentUpload {
    pub filename: String,
    /// Declared MIME type or file extension, e.g. `application/pdf`.
    pub format_hint: String,
    pub doc_type: DocumentType,
    pub collection: String,
    pub bytes: Vec<u8>,
}

/// Outcome of an ingest run.
#[derive(Debug, Clone, Serialize)]
pub struct IngestReport {
    pub document_id: String,
    pub status: DocumentStatus,
    pub chunk_count: usize,
    /// True when byte-identical content was already indexed and the run was
    /// a no-op.
    pub reused: bool,
    /// Embedding-provider attempts spent (0 for reused or chunkless runs).
    pub embed_attempts: u32,
}

/// One retrieval query result, ready for the answer composer.
#[derive(Debug, Clone, Serialize)]
pub struct QueryResultItem {
    pub chunk_id: String,
    pub document_id: String,
    /// Similarity in `[0, 1]`, higher is more relevant.
    pub score: f32,
    pub text: String,
    pub filename: String,
    pub doc_type: DocumentType,
    pub collection: String,
    /// 1-based page number where the source format has pages.
    pub page: Option<i64>,
    pub start_offset: i64,
    pub end_offset: i64,
}

/// Orchestrates extraction, chunking, embedding, and indexing.
///
/// Cheap to clone-by-Arc and safe to share: concurrent ingest of different
/// documents and concurrent queries are independent, with the vector index
/// as the only shared mutable resource.
pub struct RetrievalService {
    store: DocumentIndex,
    index: Arc<dyn VectorIndex>,
    embedder: Arc<dyn EmbeddingProvider>,
    chunker: Chunker,
    config: RetrieverConfig,
}

impl std::fmt::Debug for RetrievalService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetrievalService")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl RetrievalService {
    pub fn new(
        store: DocumentIndex,
        index: Arc<dyn VectorIndex>,
        embedder: Arc<dyn EmbeddingProvider>,
        config: RetrieverConfig,
    ) -> Result<Self> {
        if embedder.embedding_dimension() != index.dimension() {
            return Err(RetrievalError::EmbeddingDimensionMismatch {
                expected: index.dimension(),
                actual: embedder.embedding_dimension(),
            });
        }
        let chunker = Chunker::new(
            ChunkerConfig::default()
                .with_max_chunk_size(config.chunk_size)
                .with_overlap(config.chunk_overlap),
        );
        Ok(Self {
            store,
            index,
            embedder,
            chunker,
            config,
        })
    }

    /// Verify the vector index at startup so a dead backend fails the
    /// process instead of every request.
    pub async fn startup_check(&self) -> Result<()> {
        self.index.health_check().await
    }

    /// Register an upload and run the ingest pipeline.
    ///
    /// Byte-identical content that is already indexed is a no-op: the
    /// existing document is reported and no extraction or embedding happens.
    pub async fn ingest(&self, upload: DocumentUpload) -> Result<IngestReport> {
        let content_hash = *blake3::hash(&upload.bytes).as_bytes();

        if let Some(existing) = self.store.find_indexed_by_hash(&content_hash).await? {
            info!(
                document_id = %existing.id,
                filename = %upload.filename,
                "identical content already indexed, skipping ingest"
            );
            return Ok(IngestReport {
                document_id: existing.id,
                status: DocumentStatus::Indexed,
                chunk_count: existing.chunk_count as usize,
                reused: true,
                embed_attempts: 0,
            });
        }

        let document = self.register(upload).await?;
        self.process_document(&document.id).await
    }

    /// Register an upload without processing it. The returned document is in
    /// `pending` state; run [`process_document`](Self::process_document) to
    /// index it.
    pub async fn register(&self, upload: DocumentUpload) -> Result<Document> {
        let content_hash = *blake3::hash(&upload.bytes).as_bytes();
        let document = Document {
            id: uuid::Uuid::new_v4().to_string(),
            filename: upload.filename,
            doc_type: upload.doc_type,
            format_hint: upload.format_hint,
            collection: upload.collection,
            content: upload.bytes,
            content_hash,
            status: DocumentStatus::Pending,
            error_detail: None,
            uploaded_at: chrono::Utc::now().timestamp(),
            indexed_at: None,
            chunk_count: 0,
        };
        self.store.insert_document(&document).await?;
        debug!(document_id = %document.id, "document registered");
        Ok(document)
    }

    /// Run (or re-run) the ingest pipeline for a registered document.
    ///
    /// Fails with [`RetrievalError::IngestInFlight`] if another pipeline
    /// already holds the document.
    pub async fn process_document(&self, document_id: &str) -> Result<IngestReport> {
        let document = self
            .store
            .get_document(document_id)
            .await?
            .ok_or_else(|| RetrievalError::DocumentNotFound(document_id.to_string()))?;

        if !self.store.try_claim(document_id).await? {
            return Err(RetrievalError::IngestInFlight(document_id.to_string()));
        }

        match self.run_pipeline(&document).await {
            Ok((chunk_count, embed_attempts)) => {
                self.store.mark_indexed(document_id, chunk_count).await?;
                info!(document_id, chunk_count, "document indexed");
                Ok(IngestReport {
                    document_id: document_id.to_string(),
                    status: DocumentStatus::Indexed,
                    chunk_count,
                    reused: false,
                    embed_attempts,
                })
            }
            Err(err) => {
                // Roll back partial state so a retry starts clean, then
                // record the failure for the status endpoint.
                self.rollback(document_id).await;
                let detail = if err.is_retryable() {
                    format!("{err} (retryable)")
                } else {
                    err.to_string()
                };
                self.store.mark_failed(document_id, &detail).await?;
                warn!(document_id, error = %err, "ingest failed");
                Err(err)
            }
        }
    }

    /// The claimed pipeline body: extraction through index upsert. Returns
    /// the chunk count and provider attempts spent. Any error here leaves
    /// the caller to roll back and mark the document failed.
    async fn run_pipeline(&self, document: &Document) -> Result<(usize, u32)> {
        // -- extracting --
        let kind = DocumentKind::from_hint(&document.format_hint)?;
        let bytes = document.content.clone();
        let extracted: ExtractedText =
            tokio::task::spawn_blocking(move || extract::extract(&bytes, kind))
                .await
                .map_err(|e| RetrievalError::Other(anyhow::anyhow!("extraction task: {e}")))??;
        for warning in &extracted.warnings {
            warn!(document_id = %document.id, warning = %warning, "extraction warning");
        }

        self.store
            .advance_status(&document.id, DocumentStatus::Extracting, DocumentStatus::Chunking)
            .await?;

        // -- chunking --
        let text_chunks = self.chunk_extracted(&extracted);
        let records: Vec<ChunkRecord> = text_chunks
            .iter()
            .map(|chunk| ChunkRecord {
                id: ChunkRecord::chunk_id(&document.id, chunk.sequence),
                document_id: document.id.clone(),
                sequence: chunk.sequence as i64,
                text: chunk.text.clone(),
                start_offset: chunk.start as i64,
                end_offset: chunk.end as i64,
                page: extracted.page_for_offset(chunk.start).map(i64::from),
                content_hash: *blake3::hash(chunk.text.as_bytes()).as_bytes(),
            })
            .collect();

        // Re-indexing replaces the prior chunk set entirely; stale vectors
        // from an earlier version must not survive into query results.
        self.index.delete_document(&document.id).await?;
        self.store.replace_chunks(&document.id, &records).await?;

        self.store
            .advance_status(&document.id, DocumentStatus::Chunking, DocumentStatus::Embedding)
            .await?;

        if records.is_empty() {
            // An empty document indexes successfully with zero chunks; the
            // caller decides whether that is acceptable.
            debug!(document_id = %document.id, "no text extracted, indexing empty document");
            return Ok((0, 0));
        }

        // -- embedding --
        let texts: Vec<String> = records.iter().map(|r| r.text.clone()).collect();
        let embed_call = retry_embed_counted(&self.config.embed_retry, || {
            self.embedder.embed_texts(&texts)
        });
        let outcome = tokio::time::timeout(self.config.embed_timeout(), embed_call)
            .await
            .map_err(|_| RetrievalError::Timeout {
                operation: "embedding",
                seconds: self.config.embed_timeout_secs,
            })?;
        let (result, attempts) = outcome.map_err(|(source, attempts)| {
            RetrievalError::EmbeddingProvider { attempts, source }
        })?;

        if result.dimension != self.index.dimension() {
            return Err(RetrievalError::EmbeddingDimensionMismatch {
                expected: self.index.dimension(),
                actual: result.dimension,
            });
        }

        // -- indexing --
        let model_id = self.embedder.model_id();
        let points: Vec<VectorPoint> = records
            .iter()
            .zip(result.embeddings)
            .map(|(record, vector)| VectorPoint {
                chunk_id: record.id.clone(),
                document_id: document.id.clone(),
                doc_type: document.doc_type,
                collection: document.collection.clone(),
                uploaded_at: document.uploaded_at,
                model_id: model_id.clone(),
                vector,
            })
            .collect();
        self.index.upsert(&points).await?;

        Ok((records.len(), attempts))
    }

    // Chunk extracted text. Page boundaries are hard chunk boundaries: a
    // chunk never spans pages, so each chunk's page provenance is exact.
    // Sequence numbers stay contiguous across the whole document and all
    // offsets are absolute into the extracted text.
    fn chunk_extracted(&self, extracted: &ExtractedText) -> Vec<agora_chunk::TextChunk> {
        if extracted.pages.is_empty() {
            return self.chunker.chunk(&extracted.text);
        }

        let mut all = Vec::new();
        for span in &extracted.pages {
            let page_text = &extracted.text[span.start..span.end];
            for mut chunk in self.chunker.chunk(page_text) {
                chunk.start += span.start;
                chunk.end += span.start;
                chunk.sequence = all.len();
                all.push(chunk);
            }
        }
        all
    }

    // Best-effort cleanup of a failed attempt. Errors are logged, not
    // propagated, so they never mask the original failure.
    async fn rollback(&self, document_id: &str) {
        if let Err(e) = self.index.delete_document(document_id).await {
            tracing::error!(document_id, error = %e, "rollback: failed to delete vectors");
        }
        if let Err(e) = self.store.delete_chunks(document_id).await {
            tracing::error!(document_id, error = %e, "rollback: failed to delete chunks");
        }
    }

    /// Answer a retrieval query with ordered, provenance-carrying chunks.
    ///
    /// Degrades to fewer or zero results on provider/index trouble rather
    /// than failing: a RAG query with no grounding context is still better
    /// handled as "no relevant documents" than as a crashed request.
    pub async fn query(
        &self,
        question: &str,
        filter: &IndexFilter,
        k: Option<usize>,
    ) -> Result<Vec<QueryResultItem>> {
        let k = k.unwrap_or(self.config.top_k).max(1);

        let query_vector = match tokio::time::timeout(
            self.config.query_timeout(),
            self.embedder.embed_text(question),
        )
        .await
        {
            Ok(Ok(vector)) => vector,
            Ok(Err(e)) => {
                warn!(error = %e, "query embedding failed, returning degraded result");
                return Ok(Vec::new());
            }
            Err(_) => {
                warn!("query embedding timed out, returning degraded result");
                return Ok(Vec::new());
            }
        };

        let hits = match tokio::time::timeout(
            self.config.query_timeout(),
            self.index.query(&query_vector, k, filter),
        )
        .await
        {
            Ok(Ok(hits)) => hits,
            Ok(Err(e)) => {
                warn!(error = %e, "index query failed, returning degraded result");
                return Ok(Vec::new());
            }
            Err(_) => {
                warn!("index query timed out, returning degraded result");
                return Ok(Vec::new());
            }
        };

        // Weakly relevant candidates are dropped even when that leaves
        // fewer than k results.
        let relevant: Vec<_> = hits
            .into_iter()
            .filter(|hit| hit.score >= self.config.relevance_threshold)
            .collect();
        if relevant.is_empty() {
            return Ok(Vec::new());
        }

        let chunk_ids: Vec<String> = relevant.iter().map(|hit| hit.chunk_id.clone()).collect();
        let hydrated = self.store.get_chunks_with_provenance(&chunk_ids).await?;
        let by_id: HashMap<&str, _> = hydrated
            .iter()
            .map(|entry| (entry.chunk.id.as_str(), entry))
            .collect();

        let items = relevant
            .iter()
            // A vector whose chunk row is gone belongs to a deleted
            // document; skip it rather than serving orphaned text.
            .filter_map(|hit| {
                by_id.get(hit.chunk_id.as_str()).map(|entry| QueryResultItem {
                    chunk_id: entry.chunk.id.clone(),
                    document_id: entry.chunk.document_id.clone(),
                    score: hit.score,
                    text: entry.chunk.text.clone(),
                    filename: entry.filename.clone(),
                    doc_type: entry.doc_type,
                    collection: entry.collection.clone(),
                    page: entry.chunk.page,
                    start_offset: entry.chunk.start_offset,
                    end_offset: entry.chunk.end_offset,
                })
            })
            .sorted_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| {
                        let recency_a = by_id[a.chunk_id.as_str()].uploaded_at;
                        let recency_b = by_id[b.chunk_id.as_str()].uploaded_at;
                        recency_b.cmp(&recency_a)
                    })
            })
            .collect();

        Ok(items)
    }

    /// Current status and error detail for a document.
    pub async fn document_status(&self, document_id: &str) -> Result<Document> {
        self.store
            .get_document(document_id)
            .await?
            .ok_or_else(|| RetrievalError::DocumentNotFound(document_id.to_string()))
    }

    /// Delete a document and everything derived from it: chunk rows cascade
    /// in the store, and the document's vectors leave the index.
    pub async fn delete_document(&self, document_id: &str) -> Result<bool> {
        self.index.delete_document(document_id).await?;
        let deleted = self.store.delete_document(document_id).await?;
        if deleted {
            info!(document_id, "document deleted");
        }
        Ok(deleted)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        self.store.stats().await
    }

    pub fn config(&self) -> &RetrieverConfig {
        &self.config
    }
}
