//! SQLite persistence for documents and chunks.
//!
//! ## Schema
//!
//! ```sql
//! CREATE TABLE documents (
//!     id TEXT PRIMARY KEY,             -- UUID
//!     filename TEXT NOT NULL,
//!     doc_type TEXT NOT NULL,          -- budget | legislation | minutes | report | policy
//!     collection TEXT NOT NULL,
//!     content BLOB NOT NULL,           -- raw uploaded bytes
//!     content_hash BLOB NOT NULL,      -- blake3 (32 bytes)
//!     status TEXT NOT NULL,            -- processing state machine
//!     error_detail TEXT,
//!     uploaded_at INTEGER NOT NULL,
//!     indexed_at INTEGER,
//!     chunk_count INTEGER NOT NULL DEFAULT 0
//! );
//!
//! CREATE TABLE chunks (
//!     id TEXT PRIMARY KEY,             -- "{document_id}:{sequence}"
//!     document_id TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
//!     sequence INTEGER NOT NULL,
//!     content TEXT NOT NULL,
//!     start_offset INTEGER NOT NULL,
//!     end_offset INTEGER NOT NULL,
//!     page INTEGER,
//!     content_hash BLOB NOT NULL
//! );
//! ```
//!
//! Status transitions are compare-and-swap UPDATEs on the `status` column.
//! Because SQLite serializes writers, a successful CAS is atomic: the claim
//! into `extracting` is what enforces at-most-one ingest pipeline per
//! document, in this process or any other sharing the database file.

use super::{
    ChunkRecord, ChunkWithProvenance, ContentHash, Document, DocumentStatus, DocumentType,
    StoreStats,
};
use crate::error::{RetrievalError, Result};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;

/// Database file name, created inside the base directory.
const DB_FILE: &str = ".agora.db";

#[derive(Clone, Debug)]
pub struct DocumentIndex {
    pool: SqlitePool,
}

impl DocumentIndex {
    /// Open (or create) the document database under `base`.
    pub async fn open(base: &Path) -> Result<Self> {
        let pool = SqlitePool::connect_with(
            SqliteConnectOptions::new()
                .filename(base.join(DB_FILE))
                .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
                .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
                .busy_timeout(std::time::Duration::from_secs(5))
                .foreign_keys(true)
                .create_if_missing(true),
        )
        .await?;
        Self::new_with_pool(pool).await
    }

    /// Open an in-memory database, for tests. A single pooled connection is
    /// used so every handle sees the same memory database, and foreign keys
    /// are enabled so deletion cascades behave as they do on disk.
    pub async fn open_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(sqlx::Error::from)?
            .foreign_keys(true);
        let pool = sqlx::sqlite::SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::new_with_pool(pool).await
    }

    async fn new_with_pool(pool: SqlitePool) -> Result<Self> {
        Self::create_tables(&pool).await?;
        Ok(Self { pool })
    }

    async fn create_tables(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS documents (
                id TEXT PRIMARY KEY,
                filename TEXT NOT NULL,
                doc_type TEXT NOT NULL,
                format_hint TEXT NOT NULL,
                collection TEXT NOT NULL,
                content BLOB NOT NULL,
                content_hash BLOB NOT NULL,
                status TEXT NOT NULL,
                error_detail TEXT,
                uploaded_at INTEGER NOT NULL,
                indexed_at INTEGER,
                chunk_count INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS chunks (
                id TEXT PRIMARY KEY,
                document_id TEXT NOT NULL,
                sequence INTEGER NOT NULL,
                content TEXT NOT NULL,
                start_offset INTEGER NOT NULL,
                end_offset INTEGER NOT NULL,
                page INTEGER,
                content_hash BLOB NOT NULL,
                CONSTRAINT unique_chunk UNIQUE(document_id, sequence),
                FOREIGN KEY (document_id) REFERENCES documents(id) ON DELETE CASCADE
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_id)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_hash ON documents(content_hash)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status)")
            .execute(pool)
            .await?;

        Ok(())
    }

    /// Register a freshly uploaded document.
    pub async fn insert_document(&self, document: &Document) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO documents
            (id, filename, doc_type, format_hint, collection, content, content_hash,
             status, error_detail, uploaded_at, indexed_at, chunk_count)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)
            "#,
        )
        .bind(&document.id)
        .bind(&document.filename)
        .bind(document.doc_type.as_str())
        .bind(&document.format_hint)
        .bind(&document.collection)
        .bind(&document.content)
        .bind(&document.content_hash[..])
        .bind(document.status.as_str())
        .bind(document.error_detail.as_deref())
        .bind(document.uploaded_at)
        .bind(document.indexed_at)
        .bind(document.chunk_count)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let row = sqlx::query("SELECT * FROM documents WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.map(document_from_row).transpose()
    }

    /// Find an already-indexed document with the given content hash, for the
    /// idempotent re-ingest check.
    pub async fn find_indexed_by_hash(&self, hash: &ContentHash) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT * FROM documents WHERE content_hash = ?1 AND status = 'indexed' LIMIT 1",
        )
        .bind(&hash[..])
        .fetch_optional(&self.pool)
        .await?;
        row.map(document_from_row).transpose()
    }

    /// Atomically claim a document for processing by moving it into
    /// `extracting`. Succeeds only from `pending`, `failed`, or `indexed`;
    /// returns `false` when another pipeline already holds the document.
    pub async fn try_claim(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'extracting', error_detail = NULL
            WHERE id = ?1 AND status IN ('pending', 'failed', 'indexed')
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Advance the state machine one step. Fails if the document is not in
    /// the expected state, which catches skipped stages and lost claims.
    pub async fn advance_status(
        &self,
        id: &str,
        from: DocumentStatus,
        to: DocumentStatus,
    ) -> Result<()> {
        let result = sqlx::query("UPDATE documents SET status = ?2 WHERE id = ?1 AND status = ?3")
            .bind(id)
            .bind(to.as_str())
            .bind(from.as_str())
            .execute(&self.pool)
            .await?;
        if result.rows_affected() != 1 {
            return Err(RetrievalError::Other(anyhow::anyhow!(
                "document {id} was not in state {from} when advancing to {to}"
            )));
        }
        Ok(())
    }

    /// Mark a document failed with human-readable detail, from any state.
    pub async fn mark_failed(&self, id: &str, detail: &str) -> Result<()> {
        sqlx::query("UPDATE documents SET status = 'failed', error_detail = ?2 WHERE id = ?1")
            .bind(id)
            .bind(detail)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Record successful ingest completion.
    pub async fn mark_indexed(&self, id: &str, chunk_count: usize) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE documents
            SET status = 'indexed', error_detail = NULL, chunk_count = ?2,
                indexed_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(id)
        .bind(chunk_count as i64)
        .bind(chrono::Utc::now().timestamp())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() != 1 {
            return Err(RetrievalError::DocumentNotFound(id.to_string()));
        }
        Ok(())
    }

    /// Replace the document's chunk set in one transaction. Old rows are
    /// deleted first so sequence numbers never mix across versions.
    pub async fn replace_chunks(&self, document_id: &str, chunks: &[ChunkRecord]) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&mut *tx)
            .await?;

        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks
                (id, document_id, sequence, content, start_offset, end_offset, page, content_hash)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                "#,
            )
            .bind(&chunk.id)
            .bind(&chunk.document_id)
            .bind(chunk.sequence)
            .bind(&chunk.text)
            .bind(chunk.start_offset)
            .bind(chunk.end_offset)
            .bind(chunk.page)
            .bind(&chunk.content_hash[..])
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Delete all chunk rows for a document (rollback after a failed run).
    pub async fn delete_chunks(&self, document_id: &str) -> Result<usize> {
        let result = sqlx::query("DELETE FROM chunks WHERE document_id = ?1")
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() as usize)
    }

    /// Get a document's chunks in sequence order.
    pub async fn get_chunks(&self, document_id: &str) -> Result<Vec<ChunkRecord>> {
        let rows = sqlx::query("SELECT * FROM chunks WHERE document_id = ?1 ORDER BY sequence")
            .bind(document_id)
            .fetch_all(&self.pool)
            .await?;
        rows.into_iter().map(chunk_from_row).collect()
    }

    /// Hydrate chunk text and provenance for the given chunk ids. Order of
    /// the result is unspecified; the caller reorders by score.
    pub async fn get_chunks_with_provenance(
        &self,
        chunk_ids: &[String],
    ) -> Result<Vec<ChunkWithProvenance>> {
        if chunk_ids.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = chunk_ids
            .iter()
            .enumerate()
            .map(|(i, _)| format!("?{}", i + 1))
            .collect::<Vec<_>>()
            .join(", ");
        let query = format!(
            r#"
            SELECT c.id, c.document_id, c.sequence, c.content, c.start_offset,
                   c.end_offset, c.page, c.content_hash,
                   d.filename, d.doc_type, d.collection, d.uploaded_at
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.id IN ({placeholders})
            "#
        );

        let mut query_builder = sqlx::query(&query);
        for id in chunk_ids {
            query_builder = query_builder.bind(id);
        }
        let rows = query_builder.fetch_all(&self.pool).await?;

        rows.into_iter()
            .map(|row| {
                let chunk = chunk_from_row_prefixed(&row)?;
                let doc_type: String = row.get("doc_type");
                Ok(ChunkWithProvenance {
                    chunk,
                    filename: row.get("filename"),
                    doc_type: DocumentType::from_str(&doc_type)?,
                    collection: row.get("collection"),
                    uploaded_at: row.get("uploaded_at"),
                })
            })
            .collect()
    }

    /// Delete a document. Chunk rows cascade; the caller is responsible for
    /// removing the document's vectors from the index.
    pub async fn delete_document(&self, id: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM documents WHERE id = ?1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let indexed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE status = 'indexed'")
                .fetch_one(&self.pool)
                .await?;
        let failed: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE status = 'failed'")
                .fetch_one(&self.pool)
                .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            documents: documents as usize,
            indexed_documents: indexed as usize,
            failed_documents: failed as usize,
            chunks: chunks as usize,
        })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}

fn document_from_row(row: sqlx::sqlite::SqliteRow) -> Result<Document> {
    let doc_type: String = row.get("doc_type");
    let status: String = row.get("status");
    let hash_bytes: Vec<u8> = row.get("content_hash");

    Ok(Document {
        id: row.get("id"),
        filename: row.get("filename"),
        doc_type: DocumentType::from_str(&doc_type)?,
        format_hint: row.get("format_hint"),
        collection: row.get("collection"),
        content: row.get("content"),
        content_hash: hash_from_bytes(&hash_bytes)?,
        status: DocumentStatus::from_str(&status)?,
        error_detail: row.get("error_detail"),
        uploaded_at: row.get("uploaded_at"),
        indexed_at: row.get("indexed_at"),
        chunk_count: row.get("chunk_count"),
    })
}

fn chunk_from_row(row: sqlx::sqlite::SqliteRow) -> Result<ChunkRecord> {
    chunk_from_row_prefixed(&row)
}

fn chunk_from_row_prefixed(row: &sqlx::sqlite::SqliteRow) -> Result<ChunkRecord> {
    let hash_bytes: Vec<u8> = row.get("content_hash");
    Ok(ChunkRecord {
        id: row.get("id"),
        document_id: row.get("document_id"),
        sequence: row.get("sequence"),
        text: row.get("content"),
        start_offset: row.get("start_offset"),
        end_offset: row.get("end_offset"),
        page: row.get("page"),
        content_hash: hash_from_bytes(&hash_bytes)?,
    })
}

fn hash_from_bytes(bytes: &[u8]) -> Result<ContentHash> {
    let mut hash = [0u8; 32];
    if bytes.len() != 32 {
        return Err(RetrievalError::Other(anyhow::anyhow!(
            "stored hash has length {}, expected 32",
            bytes.len()
        )));
    }
    hash.copy_from_slice(bytes);
    Ok(hash)
}
