//! Core data models used throughout the indexer.
//!
//! These types represent the paths, documents, chunks, and search results
//! that flow through the ingestion and retrieval pipelines. Row shapes read
//! back from SQLite are converted into these structs at the store boundary.

use serde::Serialize;

/// A directory or file visited during ingestion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathRecord {
    pub path: String,
    pub is_directory: bool,
    /// Unix seconds.
    pub last_indexed: i64,
}

/// The full raw text of one indexed file. `doc_id` equals the source path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    pub doc_id: String,
    pub path: String,
    pub raw_text: String,
    /// File modification time, unix seconds.
    pub last_modified: i64,
}

/// A window of a document's text with its embedding.
///
/// Offsets count chars, so `raw_text.chars().skip(start_offset)` starts at
/// the chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct Chunk {
    pub chunk_id: String,
    pub doc_id: String,
    pub ordinal: usize,
    pub start_offset: usize,
    pub end_offset: usize,
    pub text: String,
    pub embedding: Vec<f32>,
}

/// Everything the store writes for one file in a single transaction.
#[derive(Debug, Clone)]
pub struct IndexedFile {
    pub paths: Vec<PathRecord>,
    pub document: Document,
    pub chunks: Vec<Chunk>,
}

/// A ranked chunk returned by a similarity query.
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkHit {
    pub chunk_id: String,
    pub doc_id: String,
    pub chunk_text: String,
    pub start_offset: usize,
    /// Cosine distance, smaller is closer.
    pub distance: f32,
}

/// A search result as returned to clients.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct SearchResultItem {
    #[serde(rename = "docId")]
    pub doc_id: String,
    /// Document text preceding the matched chunk.
    pub before: String,
    #[serde(rename = "match")]
    pub matched: String,
    /// Full document text.
    pub text: String,
}

/// Per-document row used by `ldocs stats`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentSummary {
    pub doc_id: String,
    pub path: String,
    pub chunk_count: i64,
    pub last_modified: i64,
}

/// Row counts for `ldocs stats`.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
pub struct StoreStats {
    pub paths: i64,
    pub documents: i64,
    pub chunks: i64,
    pub vectors: i64,
    pub embedding_dims: i64,
}
