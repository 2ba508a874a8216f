//! Core data models used throughout the engine.
//!
//! A [`Document`] owns its [`Chunk`]s; each chunk owns at most one
//! [`Embedding`]. Search and answer types carry copies of the fields they
//! need so they stay meaningful after the underlying rows are deleted.

use serde::Serialize;

/// One indexed file, as stored.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Document {
    pub id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_size_bytes: i64,
    pub last_modified_ms: i64,
    pub content_hash: String,
    pub indexed_at_ms: i64,
    pub file_type: String,
}

/// Document fields known before the row exists.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub file_path: String,
    pub file_name: String,
    pub file_size_bytes: i64,
    pub last_modified_ms: i64,
    pub content_hash: String,
    pub file_type: String,
}

/// A contiguous span of a document's text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub id: i64,
    pub document_id: i64,
    pub chunk_index: i64,
    pub content: String,
    /// Half-open character offsets into the original text.
    pub start_char: i64,
    pub end_char: i64,
    pub token_count: Option<i64>,
    pub created_at_ms: i64,
}

/// Output of the chunkers, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkInfo {
    pub content: String,
    pub start_char: usize,
    pub end_char: usize,
    pub chunk_index: usize,
}

/// Vector representation of one chunk under one model.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub chunk_id: i64,
    pub vector: Vec<f32>,
    pub model_name: String,
    pub dimension: usize,
    pub created_at_ms: i64,
}

/// A `(chunk_id, vector)` pair loaded for a similarity scan.
#[derive(Debug, Clone)]
pub struct StoredVector {
    pub chunk_id: i64,
    pub vector: Vec<f32>,
}

/// A chunk matched by semantic search, joined with its document.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResult {
    pub chunk: Chunk,
    pub document: Document,
    pub similarity: f32,
}

/// A search result scored by the reranker.
#[derive(Debug, Clone, Serialize)]
pub struct RerankedResult {
    pub result: SearchResult,
    pub rerank_score: f32,
}

/// Provenance for an answer. Holds copies, not references, so it survives
/// deletion of the document it points at.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourceInfo {
    pub document_id: i64,
    pub file_path: String,
    pub file_name: String,
    pub file_type: String,
    pub chunk_index: i64,
    pub score: f32,
}

/// Cardinality of the candidate set after each RAG stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RagStats {
    pub initial_count: usize,
    pub after_pre_filter: Option<usize>,
    pub after_rerank: Option<usize>,
    pub after_filter: Option<usize>,
    pub final_count: usize,
    pub rerank_enabled: bool,
    pub filter_enabled: bool,
    pub pre_filter_threshold: Option<f32>,
}

/// Result of a full indexing run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct IndexSummary {
    pub total: usize,
    pub indexed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub removed: usize,
    pub chunks_written: usize,
}
