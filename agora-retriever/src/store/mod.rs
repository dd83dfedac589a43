//! Document and chunk persistence.
//!
//! This module owns the document lifecycle: upload metadata, the processing
//! status state machine, and the chunk rows derived from each document.
//! Vectors live in the [`index`](crate::index) layer; everything here is
//! plain relational state in SQLite.

use crate::error::{RetrievalError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

pub mod document_index;

pub use document_index::DocumentIndex;

/// UUID string identifying a document.
pub type DocumentId = String;

/// Blake3 hash of document or chunk content (32 bytes).
pub type ContentHash = [u8; 32];

/// Declared category of an uploaded civic document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentType {
    Budget,
    Legislation,
    Minutes,
    Report,
    Policy,
}

impl DocumentType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Budget => "budget",
            Self::Legislation => "legislation",
            Self::Minutes => "minutes",
            Self::Report => "report",
            Self::Policy => "policy",
        }
    }
}

impl FromStr for DocumentType {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "budget" => Ok(Self::Budget),
            "legislation" => Ok(Self::Legislation),
            "minutes" => Ok(Self::Minutes),
            "report" => Ok(Self::Report),
            "policy" => Ok(Self::Policy),
            other => Err(RetrievalError::Other(anyhow::anyhow!(
                "unknown document type: {other}"
            ))),
        }
    }
}

impl fmt::Display for DocumentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Processing status of a document.
///
/// Legal transitions are strictly sequential:
/// `pending → extracting → chunking → embedding → indexed`, with `failed`
/// reachable from any state. A new ingest run may only be claimed from
/// `pending`, `failed`, or `indexed` — never while another run is in one of
/// the in-flight states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentStatus {
    Pending,
    Extracting,
    Chunking,
    Embedding,
    Indexed,
    Failed,
}

impl DocumentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Extracting => "extracting",
            Self::Chunking => "chunking",
            Self::Embedding => "embedding",
            Self::Indexed => "indexed",
            Self::Failed => "failed",
        }
    }

    /// Whether an ingest pipeline is currently running for the document.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, Self::Extracting | Self::Chunking | Self::Embedding)
    }
}

impl FromStr for DocumentStatus {
    type Err = RetrievalError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "extracting" => Ok(Self::Extracting),
            "chunking" => Ok(Self::Chunking),
            "embedding" => Ok(Self::Embedding),
            "indexed" => Ok(Self::Indexed),
            "failed" => Ok(Self::Failed),
            other => Err(RetrievalError::Other(anyhow::anyhow!(
                "unknown document status: {other}"
            ))),
        }
    }
}

impl fmt::Display for DocumentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An uploaded document and its processing state.
#[derive(Debug, Clone)]
pub struct Document {
    pub id: DocumentId,
    pub filename: String,
    pub doc_type: DocumentType,
    /// Declared MIME type or extension, resolved to an extractor when the
    /// ingest pipeline runs. Kept verbatim so an unsupported declaration
    /// surfaces as a `failed` document rather than a rejected upload.
    pub format_hint: String,
    pub collection: String,
    /// Raw uploaded bytes, kept so a document can be re-processed without a
    /// re-upload.
    pub content: Vec<u8>,
    /// Blake3 hash of `content`, used for idempotent re-ingest.
    pub content_hash: ContentHash,
    pub status: DocumentStatus,
    pub error_detail: Option<String>,
    /// Upload time, Unix seconds.
    pub uploaded_at: i64,
    /// Completion time of the last successful ingest, Unix seconds.
    pub indexed_at: Option<i64>,
    pub chunk_count: i64,
}

/// One chunk row derived from a document. Immutable once written; replaced
/// wholesale when the document is re-processed.
#[derive(Debug, Clone)]
pub struct ChunkRecord {
    /// `{document_id}:{sequence}`.
    pub id: String,
    pub document_id: DocumentId,
    /// 0-based, contiguous within the document, assigned in extraction order.
    pub sequence: i64,
    pub text: String,
    /// Byte offsets into the extracted document text.
    pub start_offset: i64,
    pub end_offset: i64,
    /// 1-based page number where the source format has page structure.
    pub page: Option<i64>,
    /// Blake3 hash of `text`.
    pub content_hash: ContentHash,
}

impl ChunkRecord {
    pub fn chunk_id(document_id: &str, sequence: usize) -> String {
        format!("{document_id}:{sequence}")
    }
}

/// A chunk joined with the provenance fields of its owning document, as
/// needed to assemble query results.
#[derive(Debug, Clone)]
pub struct ChunkWithProvenance {
    pub chunk: ChunkRecord,
    pub filename: String,
    pub doc_type: DocumentType,
    pub collection: String,
    pub uploaded_at: i64,
}

/// Counts reported by the `stats` CLI command.
#[derive(Debug, Clone, Serialize)]
pub struct StoreStats {
    pub documents: usize,
    pub indexed_documents: usize,
    pub failed_documents: usize,
    pub chunks: usize,
}
