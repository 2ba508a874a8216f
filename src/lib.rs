//! # context-rag
//!
//! Local semantic search and retrieval-augmented answering over a directory
//! of documents.
//!
//! Files are split into overlapping character chunks, embedded through an
//! external embedding service, and stored in SQLite. Queries are embedded
//! the same way and ranked by exact cosine similarity over every stored
//! vector, optionally rescored by an LLM, thresholded, and handed to a chat
//! model as grounding context.
//!
//! ## Architecture
//!
//! ```text
//!  files ──▶ indexer ──▶ chunk ──▶ embedding ──▶ store (SQLite)
//!                                                   │
//!  question ──▶ search ──▶ [rerank] ──▶ filter ──▶ rag ──▶ llm ──▶ answer
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! crag init
//! crag index ./docs
//! crag search "connection pooling"
//! crag ask "How are connections pooled?" --rerank --threshold 0.4
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`chunk`] | Eager and streaming overlapping chunkers |
//! | [`similarity`] | Cosine similarity and normalization |
//! | [`embedding`] | Embedding client trait, HTTP backends, vector BLOB codec |
//! | [`llm`] | Chat client trait and HTTP backends |
//! | [`http`] | Retrying JSON POST shared by both clients |
//! | [`store`] | SQLite repository for documents, chunks, embeddings |
//! | [`db`] / [`migrate`] | Connection pool and schema |
//! | [`ignore`] | Gitignore-style exclusion rules |
//! | [`indexer`] | Incremental directory indexing |
//! | [`search`] | Exact semantic search |
//! | [`rerank`] | LLM relevance scoring |
//! | [`filter`] | Relevance thresholds |
//! | [`rag`] | Query pipeline and answer generation |
//! | [`stats`] / [`get`] | Index inspection commands |
//! | [`progress`] | Indexing progress on stderr |
//! | [`config`] | TOML configuration |
//! | [`error`] | Error types |
//! | [`logging`] | `tracing` subscriber setup |

pub mod chunk;
pub mod config;
pub mod db;
pub mod embedding;
pub mod error;
pub mod filter;
pub mod get;
pub mod http;
pub mod ignore;
pub mod indexer;
pub mod llm;
pub mod logging;
pub mod migrate;
pub mod models;
pub mod progress;
pub mod rag;
pub mod rerank;
pub mod search;
pub mod similarity;
pub mod stats;
pub mod store;
