//! SQLite-backed vector index for local and single-process use.
//!
//! Vectors are stored as little-endian f32 blobs and scanned with a
//! brute-force cosine pass. Filters are pushed into the SQL `WHERE` clause so
//! a filtered query ranks the full qualifying set, and WAL mode keeps
//! concurrent readers consistent while a writer replaces a document's
//! vectors. Brute force is the right trade-off at civic-archive scale
//! (thousands of chunks, not millions); production-scale deployments use
//! [`RemoteVectorIndex`](super::RemoteVectorIndex) instead.

use super::{IndexFilter, SearchHit, VectorIndex, VectorPoint, cosine_score};
use crate::error::{RetrievalError, Result};
use async_trait::async_trait;
use itertools::Itertools;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Database file name, created inside the base directory.
const DB_FILE: &str = ".agora-vectors.db";

#[derive(Clone, Debug)]
pub struct EmbeddedVectorIndex {
    pool: SqlitePool,
    dimension: usize,
}

impl EmbeddedVectorIndex {
    /// Open (or create) the vector database under `base`.
    pub async fn open(base: &Path, dimension: usize) -> Result<Self> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(base.join(DB_FILE))
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .create_if_missing(true)
                // 64 KiB pages suit the embedding blobs.
                .page_size(1 << 16),
        )
        .await?;
        Self::new_with_pool(pool, dimension).await
    }

    /// Open an in-memory index, for tests.
    pub async fn open_memory(dimension: usize) -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?;
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::new_with_pool(pool, dimension).await
    }

    async fn new_with_pool(pool: SqlitePool, dimension: usize) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS vectors (
                chunk_id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                collection TEXT NOT NULL,
                uploaded_at INTEGER NOT NULL,
                model_id TEXT NOT NULL,
                embedding BLOB NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_document ON vectors(document_id)")
            .execute(&pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_vectors_doc_type ON vectors(doc_type)")
            .execute(&pool)
            .await?;

        Ok(Self { pool, dimension })
    }
}

#[async_trait]
impl VectorIndex for EmbeddedVectorIndex {
    async fn upsert(&self, points: &[VectorPoint]) -> Result<()> {
        for point in points {
            if point.vector.len() != self.dimension {
                return Err(RetrievalError::EmbeddingDimensionMismatch {
                    expected: self.dimension,
                    actual: point.vector.len(),
                });
            }
        }

        let mut tx = self.pool.begin().await?;
        for point in points {
            let embedding_bytes = bytemuck::cast_slice::<f32, u8>(&point.vector);
            sqlx::query(
                r#"
                INSERT INTO vectors
                (chunk_id, document_id, doc_type, collection, uploaded_at, model_id, embedding)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                ON CONFLICT(chunk_id) DO UPDATE SET
                    document_id = excluded.document_id,
                    doc_type = excluded.doc_type,
                    collection = excluded.collection,
                    uploaded_at = excluded.uploaded_at,
                    model_id = excluded.model_id,
                    embedding = excluded.embedding
                "#,
            )
            .bind(&point.chunk_id)
            .bind(&point.document_id)
            .bind(point.doc_type.as_str())
            .bind(&point.collection)
            .bind(point.uploaded_at)
            .bind(&point.model_id)
            .bind(embedding_bytes)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn delete_document(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM vectors WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
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

        // Filters participate in the scan, so the top-k is taken over the
        // full qualifying set.
        let mut sql = String::from(
            "SELECT chunk_id, document_id, uploaded_at, embedding FROM vectors WHERE 1=1",
        );
        if filter.doc_type.is_some() {
            sql.push_str(" AND doc_type = ?1");
        }
        if filter.collection.is_some() {
            sql.push_str(if filter.doc_type.is_some() {
                " AND collection = ?2"
            } else {
                " AND collection = ?1"
            });
        }

        let mut query = sqlx::query(&sql);
        if let Some(doc_type) = filter.doc_type {
            query = query.bind(doc_type.as_str());
        }
        if let Some(collection) = &filter.collection {
            query = query.bind(collection);
        }
        let rows = query.fetch_all(&self.pool).await?;

        let hits = rows
            .into_iter()
            .map(|row| {
                let embedding_bytes: Vec<u8> = row.get("embedding");
                // Blob alignment is not guaranteed, so copy out rather than
                // reinterpreting in place.
                let embedding: Vec<f32> = bytemuck::pod_collect_to_vec(&embedding_bytes);
                SearchHit {
                    chunk_id: row.get("chunk_id"),
                    document_id: row.get("document_id"),
                    score: cosine_score(vector, &embedding),
                    uploaded_at: row.get("uploaded_at"),
                }
            })
            .sorted_by(|a, b| {
                b.score
                    .partial_cmp(&a.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| b.uploaded_at.cmp(&a.uploaded_at))
            })
            .take(k)
            .collect();

        Ok(hits)
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    async fn health_check(&self) -> Result<()> {
        sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM vectors")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| RetrievalError::IndexUnavailable(format!("embedded index: {e}")))?;
        Ok(())
    }
}
