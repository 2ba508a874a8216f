//! Exact cosine-similarity search over every stored embedding.
//!
//! The query is embedded once, compared against the full `(chunk_id,
//! vector)` scan, ordered by similarity (descending) then chunk id
//! (ascending), truncated to `top_k`, and joined back to chunk and
//! document rows. A chunk deleted between the scan and the join is
//! skipped.

use std::cmp::Ordering;
use std::sync::Arc;

use anyhow::bail;
use tracing::debug;

use crate::config::Config;
use crate::db;
use crate::embedding::{self, EmbeddingClient};
use crate::error::Result;
use crate::models::{SearchResult, StoredVector};
use crate::similarity::cosine_similarity;
use crate::store::SqliteStore;

pub struct SemanticSearch<'a> {
    store: &'a SqliteStore,
    embedder: Arc<dyn EmbeddingClient>,
}

impl<'a> SemanticSearch<'a> {
    pub fn new(store: &'a SqliteStore, embedder: Arc<dyn EmbeddingClient>) -> Self {
        Self { store, embedder }
    }

    /// Top `top_k` chunks for `query`. A blank query returns nothing
    /// without calling the embedding service.
    pub async fn search(&self, query: &str, top_k: usize) -> Result<Vec<SearchResult>> {
        if query.trim().is_empty() || top_k == 0 {
            return Ok(Vec::new());
        }
        let query_vector = self.embedder.embed(query).await?;
        self.search_vector(&query_vector, top_k).await
    }

    pub async fn search_vector(
        &self,
        query_vector: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchResult>> {
        let stored = self.store.all_vectors().await?;
        let ranked = rank(query_vector, &stored, top_k)?;
        let results = self.load_ranked(ranked).await?;
        debug!(scanned = stored.len(), returned = results.len(), "search");
        Ok(results)
    }

    /// Join ranked chunk ids back to their rows, skipping withdrawn chunks.
    async fn load_ranked(&self, ranked: Vec<(i64, f32)>) -> Result<Vec<SearchResult>> {
        let mut results = Vec::with_capacity(ranked.len());
        for (chunk_id, similarity) in ranked {
            match self.store.chunk_with_document(chunk_id).await? {
                Some((chunk, document)) => results.push(SearchResult {
                    chunk,
                    document,
                    similarity,
                }),
                None => debug!(chunk_id, "chunk withdrawn during search, skipping"),
            }
        }
        Ok(results)
    }
}

fn by_score_then_id(a: &(i64, f32), b: &(i64, f32)) -> Ordering {
    b.1.total_cmp(&a.1).then(a.0.cmp(&b.0))
}

/// Score every stored vector against `query` and keep the best `top_k`.
/// Any dimension mismatch or non-finite component fails the whole ranking.
pub fn rank(query: &[f32], stored: &[StoredVector], top_k: usize) -> Result<Vec<(i64, f32)>> {
    let mut scored = Vec::with_capacity(stored.len());
    for sv in stored {
        scored.push((sv.chunk_id, cosine_similarity(query, &sv.vector)?));
    }
    if top_k == 0 {
        return Ok(Vec::new());
    }
    if top_k < scored.len() {
        scored.select_nth_unstable_by(top_k - 1, by_score_then_id);
        scored.truncate(top_k);
    }
    scored.sort_by(by_score_then_id);
    Ok(scored)
}

pub async fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> anyhow::Result<()> {
    if query.trim().is_empty() {
        println!("No results.");
        return Ok(());
    }
    if !config.embedding.is_enabled() {
        bail!("Search requires embeddings. Set [embedding] provider in config.");
    }

    let store = db::open_store(config).await?;
    let embedder = embedding::create_client(&config.embedding)?;
    let search = SemanticSearch::new(&store, embedder);
    let results = search
        .search(query, top_k.unwrap_or(config.retrieval.top_k))
        .await?;

    if results.is_empty() {
        println!("No results.");
        store.close().await;
        return Ok(());
    }

    for (i, result) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} (chunk {})",
            i + 1,
            result.similarity,
            result.document.file_name,
            result.chunk.chunk_index
        );
        println!("    path: {}", result.document.file_path);
        println!(
            "    chars: {}-{}",
            result.chunk.start_char, result.chunk.end_char
        );
        println!("    excerpt: \"{}\"", excerpt(&result.chunk.content, 200));
        println!();
    }

    store.close().await;
    Ok(())
}

/// First `max_chars` characters on one line.
pub(crate) fn excerpt(content: &str, max_chars: usize) -> String {
    let flat = content.replace('\n', " ");
    let trimmed = flat.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    let cut: String = trimmed.chars().take(max_chars).collect();
    format!("{}...", cut)
}
