//! agora-retriever: document indexing and similarity search for a civic
//! document archive.
//!
//! This crate is the retrieval core behind a RAG chatbot: it ingests
//! uploaded documents (PDF, DOCX, plain text), chunks and embeds them, and
//! answers similarity queries with scored, provenance-carrying passages for
//! an answer composer to ground its responses on.
//!
//! ## Key Modules
//!
//! - **[`extract`]**: format dispatch and text extraction with page
//!   provenance
//! - **[`store`]**: document lifecycle and chunk persistence (SQLite)
//! - **[`index`]**: the [`VectorIndex`](index::VectorIndex) trait with
//!   embedded (SQLite) and remote (Qdrant-compatible) backends
//! - **[`service`]**: the ingest state machine and query orchestration
//!
//! ## Architecture
//!
//! ```text
//! Upload → Extractor → Chunker → EmbeddingProvider → VectorIndex
//!              ↑           ↑            ↑                ↓
//!         page spans   agora-chunk  agora-embed     Query → ranked chunks
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use agora_retriever::config::RetrieverConfig;
//! use agora_retriever::index::EmbeddedVectorIndex;
//! use agora_retriever::service::{DocumentUpload, RetrievalService};
//! use agora_retriever::store::{DocumentIndex, DocumentType};
//! use agora_embed::HashedNgramProvider;
//! use std::path::Path;
//! use std::sync::Arc;
//!
//! # async fn example() -> agora_retriever::error::Result<()> {
//! let embedder = Arc::new(HashedNgramProvider::default());
//! let store = DocumentIndex::open(Path::new(".")).await?;
//! let index = Arc::new(EmbeddedVectorIndex::open(Path::new("."), 384).await?);
//! let service = RetrievalService::new(store, index, embedder, RetrieverConfig::default())?;
//!
//! service.startup_check().await?;
//! service
//!     .ingest(DocumentUpload {
//!         filename: "minutes.txt".into(),
//!         format_hint: "text/plain".into(),
//!         doc_type: DocumentType::Minutes,
//!         collection: "council".into(),
//!         bytes: b"Meeting called to order.".to_vec(),
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod extract;
pub mod index;
pub mod service;
pub mod store;
