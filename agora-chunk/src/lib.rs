//! agora-chunk: boundary-aware text chunking for retrieval.
//!
//! This crate turns normalized document text into the bounded, overlapping
//! passages that the indexing pipeline embeds and searches. It is pure
//! computation with no I/O, so it can be used from sync and async contexts
//! alike.

pub mod text;

pub use text::{Chunker, ChunkerConfig, DEFAULT_MAX_CHUNK_SIZE, DEFAULT_OVERLAP, TextChunk};
