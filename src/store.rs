//! SQLite repository for documents, chunks, and embeddings.
//!
//! [`SqliteStore`] is the single storage handle. It is built once from a
//! pool and passed by reference to the indexer, search, and CLI commands.
//!
//! # Atomicity
//!
//! [`replace_document`](SqliteStore::replace_document) writes a document and
//! its whole chunk and embedding set in one transaction: either every row
//! for that document is visible or none of them is. Deletes cascade
//! explicitly (embeddings, then chunks, then the document) inside one
//! transaction as well.
//!
//! Each write transaction starts with a write statement so SQLite takes the
//! write lock up front and waits on `busy_timeout` instead of failing a
//! read-to-write upgrade.

use std::collections::HashMap;

use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{RagError, Result};
use crate::models::{Chunk, ChunkInfo, Document, Embedding, NewDocument, StoredVector};

/// Rows per multi-row `INSERT`, well under SQLite's bound-parameter limit.
const BULK_ROWS: usize = 100;

const DOCUMENT_COLUMNS: &str = "id, file_path, file_name, file_size_bytes, last_modified_ms, \
     content_hash, indexed_at_ms, file_type";

/// Row totals across the index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IndexCounts {
    pub documents: i64,
    pub chunks: i64,
    pub embeddings: i64,
}

/// Embedding count for one `(model, dimension)` pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelStats {
    pub model_name: String,
    pub dimension: i64,
    pub count: i64,
}

/// Document and chunk counts for one file type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileTypeStats {
    pub file_type: String,
    pub documents: i64,
    pub chunks: i64,
}

/// Violations of the ownership model. All zero on a healthy index.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IntegrityReport {
    pub orphan_embeddings: i64,
    pub orphan_chunks: i64,
    pub chunks_without_embedding: i64,
    pub malformed_vectors: i64,
}

impl IntegrityReport {
    pub fn is_clean(&self) -> bool {
        *self == IntegrityReport::default()
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
}

fn document_from_row(row: &SqliteRow, id_column: &str) -> Document {
    Document {
        id: row.get(id_column),
        file_path: row.get("file_path"),
        file_name: row.get("file_name"),
        file_size_bytes: row.get("file_size_bytes"),
        last_modified_ms: row.get("last_modified_ms"),
        content_hash: row.get("content_hash"),
        indexed_at_ms: row.get("indexed_at_ms"),
        file_type: row.get("file_type"),
    }
}

fn chunk_from_row(row: &SqliteRow, id_column: &str, created_column: &str) -> Chunk {
    Chunk {
        id: row.get(id_column),
        document_id: row.get("document_id"),
        chunk_index: row.get("chunk_index"),
        content: row.get("content"),
        start_char: row.get("start_char"),
        end_char: row.get("end_char"),
        token_count: row.get("token_count"),
        created_at_ms: row.get(created_column),
    }
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub async fn find_document_by_path(&self, file_path: &str) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE file_path = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(file_path)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| document_from_row(&r, "id")))
    }

    pub async fn get_document(&self, id: i64) -> Result<Option<Document>> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM documents WHERE id = ?",
            DOCUMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| document_from_row(&r, "id")))
    }

    pub async fn list_documents(&self) -> Result<Vec<Document>> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM documents ORDER BY file_path",
            DOCUMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.iter().map(|r| document_from_row(r, "id")).collect())
    }

    /// Insert or update the document for `doc.file_path` and replace its
    /// chunks and embeddings, all in one transaction. The document keeps its
    /// id across replacements. Returns that id.
    ///
    /// `vectors[i]` is the embedding of `chunks[i]`; every vector must have
    /// the same length.
    pub async fn replace_document(
        &self,
        doc: &NewDocument,
        chunks: &[ChunkInfo],
        vectors: &[Vec<f32>],
        model_name: &str,
    ) -> Result<i64> {
        if chunks.len() != vectors.len() {
            return Err(RagError::InvalidInput(format!(
                "{} chunks but {} vectors",
                chunks.len(),
                vectors.len()
            )));
        }
        if let Some(first) = vectors.first() {
            if let Some(other) = vectors.iter().find(|v| v.len() != first.len()) {
                return Err(RagError::DimensionMismatch {
                    left: first.len(),
                    right: other.len(),
                });
            }
        }
        if vectors.iter().flatten().any(|x| !x.is_finite()) {
            return Err(RagError::InvalidInput(format!(
                "non-finite embedding value for {}",
                doc.file_path
            )));
        }

        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;

        let doc_id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO documents (file_path, file_name, file_size_bytes, last_modified_ms,
                                   content_hash, indexed_at_ms, file_type)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(file_path) DO UPDATE SET
                file_name = excluded.file_name,
                file_size_bytes = excluded.file_size_bytes,
                last_modified_ms = excluded.last_modified_ms,
                content_hash = excluded.content_hash,
                indexed_at_ms = excluded.indexed_at_ms,
                file_type = excluded.file_type
            RETURNING id
            "#,
        )
        .bind(&doc.file_path)
        .bind(&doc.file_name)
        .bind(doc.file_size_bytes)
        .bind(doc.last_modified_ms)
        .bind(&doc.content_hash)
        .bind(now)
        .bind(&doc.file_type)
        .fetch_one(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM embeddings WHERE chunk_id IN (SELECT id FROM chunks WHERE document_id = ?)",
        )
        .bind(doc_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE document_id = ?")
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;

        for batch in chunks.chunks(BULK_ROWS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO chunks (document_id, chunk_index, content, start_char, end_char, \
                 token_count, created_at_ms) ",
            );
            qb.push_values(batch, |mut row, chunk| {
                let chars = chunk.end_char - chunk.start_char;
                row.push_bind(doc_id)
                    .push_bind(chunk.chunk_index as i64)
                    .push_bind(chunk.content.as_str())
                    .push_bind(chunk.start_char as i64)
                    .push_bind(chunk.end_char as i64)
                    .push_bind(crate::chunk::estimate_tokens(chars) as i64)
                    .push_bind(now);
            });
            qb.build().execute(&mut *tx).await?;
        }

        let chunk_ids: HashMap<i64, i64> = sqlx::query_as::<_, (i64, i64)>(
            "SELECT chunk_index, id FROM chunks WHERE document_id = ?",
        )
        .bind(doc_id)
        .fetch_all(&mut *tx)
        .await?
        .into_iter()
        .collect();

        let mut rows: Vec<(i64, &Vec<f32>)> = Vec::with_capacity(vectors.len());
        for (chunk, vector) in chunks.iter().zip(vectors.iter()) {
            let chunk_id = chunk_ids
                .get(&(chunk.chunk_index as i64))
                .copied()
                .ok_or_else(|| {
                    RagError::Integrity(format!(
                        "chunk {} of {} missing after insert",
                        chunk.chunk_index, doc.file_path
                    ))
                })?;
            rows.push((chunk_id, vector));
        }

        for batch in rows.chunks(BULK_ROWS) {
            let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(
                "INSERT INTO embeddings (chunk_id, vector, model_name, dimension, created_at_ms) ",
            );
            qb.push_values(batch, |mut row, (chunk_id, vector)| {
                row.push_bind(*chunk_id)
                    .push_bind(vec_to_blob(vector))
                    .push_bind(model_name)
                    .push_bind(vector.len() as i64)
                    .push_bind(now);
            });
            qb.build().execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(doc_id)
    }

    /// Delete a document with its chunks and embeddings. Returns `false` if
    /// no document has that path.
    pub async fn delete_document_by_path(&self, file_path: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            DELETE FROM embeddings WHERE chunk_id IN (
                SELECT c.id FROM chunks c JOIN documents d ON d.id = c.document_id
                WHERE d.file_path = ?
            )
            "#,
        )
        .bind(file_path)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM chunks WHERE document_id IN (SELECT id FROM documents WHERE file_path = ?)",
        )
        .bind(file_path)
        .execute(&mut *tx)
        .await?;

        let deleted = sqlx::query("DELETE FROM documents WHERE file_path = ?")
            .bind(file_path)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;
        Ok(deleted > 0)
    }

    /// Remove every document, chunk, and embedding.
    pub async fn clear(&self) -> Result<IndexCounts> {
        let mut tx = self.pool.begin().await?;
        let embeddings = sqlx::query("DELETE FROM embeddings")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let chunks = sqlx::query("DELETE FROM chunks")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        let documents = sqlx::query("DELETE FROM documents")
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        Ok(IndexCounts {
            documents: documents as i64,
            chunks: chunks as i64,
            embeddings: embeddings as i64,
        })
    }

    /// Full scan of every stored vector, ordered by chunk id.
    pub async fn all_vectors(&self) -> Result<Vec<StoredVector>> {
        let rows = sqlx::query("SELECT chunk_id, vector FROM embeddings ORDER BY chunk_id")
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| {
                let blob: Vec<u8> = row.get("vector");
                Ok(StoredVector {
                    chunk_id: row.get("chunk_id"),
                    vector: blob_to_vec(&blob)?,
                })
            })
            .collect()
    }

    /// Resolve a chunk and its owning document in one query. `None` when the
    /// chunk (or its document) has been deleted since it was loaded.
    pub async fn chunk_with_document(&self, chunk_id: i64) -> Result<Option<(Chunk, Document)>> {
        let row = sqlx::query(
            r#"
            SELECT c.id AS chunk_id, c.document_id, c.chunk_index, c.content,
                   c.start_char, c.end_char, c.token_count, c.created_at_ms AS chunk_created_at_ms,
                   d.file_path, d.file_name, d.file_size_bytes, d.last_modified_ms,
                   d.content_hash, d.indexed_at_ms, d.file_type
            FROM chunks c
            JOIN documents d ON d.id = c.document_id
            WHERE c.id = ?
            "#,
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            (
                chunk_from_row(&r, "chunk_id", "chunk_created_at_ms"),
                document_from_row(&r, "document_id"),
            )
        }))
    }

    pub async fn chunks_for_document(&self, document_id: i64) -> Result<Vec<Chunk>> {
        let rows = sqlx::query(
            r#"
            SELECT id, document_id, chunk_index, content, start_char, end_char,
                   token_count, created_at_ms
            FROM chunks WHERE document_id = ? ORDER BY chunk_index
            "#,
        )
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| chunk_from_row(r, "id", "created_at_ms"))
            .collect())
    }

    pub async fn get_embedding(&self, chunk_id: i64) -> Result<Option<Embedding>> {
        let row = sqlx::query(
            "SELECT chunk_id, vector, model_name, dimension, created_at_ms FROM embeddings WHERE chunk_id = ?",
        )
        .bind(chunk_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => {
                let blob: Vec<u8> = r.get("vector");
                let dimension: i64 = r.get("dimension");
                Ok(Some(Embedding {
                    chunk_id: r.get("chunk_id"),
                    vector: blob_to_vec(&blob)?,
                    model_name: r.get("model_name"),
                    dimension: dimension as usize,
                    created_at_ms: r.get("created_at_ms"),
                }))
            }
            None => Ok(None),
        }
    }

    pub async fn count_chunks(&self, document_id: i64) -> Result<i64> {
        Ok(
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE document_id = ?")
                .bind(document_id)
                .fetch_one(&self.pool)
                .await?,
        )
    }

    pub async fn count_embeddings(&self, document_id: i64) -> Result<i64> {
        Ok(sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings e JOIN chunks c ON c.id = e.chunk_id WHERE c.document_id = ?",
        )
        .bind(document_id)
        .fetch_one(&self.pool)
        .await?)
    }

    pub async fn counts(&self) -> Result<IndexCounts> {
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let embeddings: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embeddings")
            .fetch_one(&self.pool)
            .await?;
        Ok(IndexCounts {
            documents,
            chunks,
            embeddings,
        })
    }

    pub async fn model_stats(&self) -> Result<Vec<ModelStats>> {
        let rows = sqlx::query(
            r#"
            SELECT model_name, dimension, COUNT(*) AS count
            FROM embeddings
            GROUP BY model_name, dimension
            ORDER BY count DESC, model_name
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| ModelStats {
                model_name: r.get("model_name"),
                dimension: r.get("dimension"),
                count: r.get("count"),
            })
            .collect())
    }

    pub async fn file_type_stats(&self) -> Result<Vec<FileTypeStats>> {
        let rows = sqlx::query(
            r#"
            SELECT d.file_type,
                   COUNT(DISTINCT d.id) AS doc_count,
                   COUNT(c.id) AS chunk_count
            FROM documents d
            LEFT JOIN chunks c ON c.document_id = d.id
            GROUP BY d.file_type
            ORDER BY doc_count DESC, d.file_type
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .iter()
            .map(|r| FileTypeStats {
                file_type: r.get("file_type"),
                documents: r.get("doc_count"),
                chunks: r.get("chunk_count"),
            })
            .collect())
    }

    pub async fn check_integrity(&self) -> Result<IntegrityReport> {
        let orphan_embeddings: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings e LEFT JOIN chunks c ON c.id = e.chunk_id WHERE c.id IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        let orphan_chunks: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks c LEFT JOIN documents d ON d.id = c.document_id WHERE d.id IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        let chunks_without_embedding: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM chunks c LEFT JOIN embeddings e ON e.chunk_id = c.id WHERE e.chunk_id IS NULL",
        )
        .fetch_one(&self.pool)
        .await?;
        let malformed_vectors: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM embeddings WHERE length(vector) != dimension * 4",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(IntegrityReport {
            orphan_embeddings,
            orphan_chunks,
            chunks_without_embedding,
            malformed_vectors,
        })
    }

    /// Like [`check_integrity`](Self::check_integrity), but any violation is
    /// an error.
    pub async fn verify_integrity(&self) -> Result<()> {
        let report = self.check_integrity().await?;
        if report.is_clean() {
            return Ok(());
        }
        Err(RagError::Integrity(format!(
            "{} orphan embeddings, {} orphan chunks, {} chunks without embedding, {} malformed vectors",
            report.orphan_embeddings,
            report.orphan_chunks,
            report.chunks_without_embedding,
            report.malformed_vectors
        )))
    }
}
