//! Document inspection and removal by path.
//!
//! Paths are resolved the way the indexer stores them: canonical and
//! absolute when the file still exists, otherwise as given.

use anyhow::{bail, Result};
use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::db;
use crate::models::{Chunk, Document};
use crate::store::SqliteStore;

#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub document: Document,
    pub chunks: Vec<Chunk>,
    pub embeddings: i64,
}

/// Canonical form of `path` when it exists on disk.
pub fn resolve_path(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

pub async fn get_document(store: &SqliteStore, path: &Path) -> Result<Option<DocumentView>> {
    let resolved = resolve_path(path);
    let document = match store
        .find_document_by_path(&resolved.to_string_lossy())
        .await?
    {
        Some(doc) => doc,
        None => return Ok(None),
    };
    let chunks = store.chunks_for_document(document.id).await?;
    let embeddings = store.count_embeddings(document.id).await?;
    Ok(Some(DocumentView {
        document,
        chunks,
        embeddings,
    }))
}

pub async fn run_get(config: &Config, path: &Path) -> Result<()> {
    let store = db::open_store(config).await?;
    let view = get_document(&store, path).await?;
    store.close().await;

    let view = match view {
        Some(v) => v,
        None => bail!("document not found: {}", path.display()),
    };
    let doc = &view.document;

    println!("--- Document ---");
    println!("id:            {}", doc.id);
    println!("path:          {}", doc.file_path);
    println!("name:          {}", doc.file_name);
    println!("type:          {}", doc.file_type);
    println!("size:          {} bytes", doc.file_size_bytes);
    println!("modified:      {}", format_ms(doc.last_modified_ms));
    println!("indexed:       {}", format_ms(doc.indexed_at_ms));
    println!("sha256:        {}", doc.content_hash);
    println!("embeddings:    {} / {}", view.embeddings, view.chunks.len());
    println!();

    println!("--- Chunks ({}) ---", view.chunks.len());
    for chunk in &view.chunks {
        println!(
            "[chunk {}] chars {}-{}, ~{} tokens",
            chunk.chunk_index,
            chunk.start_char,
            chunk.end_char,
            chunk.token_count.unwrap_or(0)
        );
        println!("{}", chunk.content);
        println!();
    }

    Ok(())
}

pub async fn run_remove(config: &Config, path: &Path) -> Result<()> {
    let store = db::open_store(config).await?;
    let resolved = resolve_path(path);
    let removed = store
        .delete_document_by_path(&resolved.to_string_lossy())
        .await?;
    store.close().await;

    if !removed {
        bail!("document not found: {}", path.display());
    }
    println!("removed {}", resolved.display());
    Ok(())
}

fn format_ms(ms: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%Y-%m-%dT%H:%M:%SZ").to_string())
        .unwrap_or_else(|| ms.to_string())
}
