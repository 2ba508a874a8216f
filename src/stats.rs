//! Index statistics and maintenance.
//!
//! `crag stats` gives a quick summary of what's indexed: document, chunk and
//! embedding counts, embedding coverage, models in use, per-file-type
//! breakdowns, and an integrity check. `crag clear` empties the index.

use anyhow::Result;

use crate::config::Config;
use crate::db;

pub async fn run_stats(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;

    let counts = store.counts().await?;
    let models = store.model_stats().await?;
    let file_types = store.file_type_stats().await?;
    let integrity = store.check_integrity().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("crag index stats");
    println!("================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!();
    println!("  Documents:   {}", counts.documents);
    println!("  Chunks:      {}", counts.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        counts.embeddings,
        counts.chunks,
        if counts.chunks > 0 {
            (counts.embeddings * 100) / counts.chunks
        } else {
            0
        }
    );

    if !models.is_empty() {
        println!();
        println!("  Models:");
        for m in &models {
            println!(
                "    {} ({} dims): {} vectors",
                m.model_name, m.dimension, m.count
            );
        }
        if models.len() > 1 {
            println!("    warning: more than one model is indexed; run `crag index --full` to re-embed");
        }
    }

    if !file_types.is_empty() {
        println!();
        println!("  By file type:");
        println!("  {:<12} {:>8} {:>8}", "TYPE", "DOCS", "CHUNKS");
        println!("  {}", "-".repeat(30));
        for t in &file_types {
            let label = if t.file_type.is_empty() {
                "(none)"
            } else {
                t.file_type.as_str()
            };
            println!("  {:<12} {:>8} {:>8}", label, t.documents, t.chunks);
        }
    }

    println!();
    if integrity.is_clean() {
        println!("  Integrity:   ok");
    } else {
        println!("  Integrity:   FAILED");
        println!("    orphan embeddings:        {}", integrity.orphan_embeddings);
        println!("    orphan chunks:            {}", integrity.orphan_chunks);
        println!(
            "    chunks without embedding: {}",
            integrity.chunks_without_embedding
        );
        println!("    malformed vectors:        {}", integrity.malformed_vectors);
    }
    println!();

    store.close().await;
    Ok(())
}

pub async fn run_clear(config: &Config) -> Result<()> {
    let store = db::open_store(config).await?;
    let removed = store.clear().await?;
    println!("clear");
    println!("  documents removed: {}", removed.documents);
    println!("  chunks removed: {}", removed.chunks);
    println!("  embeddings removed: {}", removed.embeddings);
    println!("ok");
    store.close().await;
    Ok(())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}
