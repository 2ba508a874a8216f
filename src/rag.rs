//! Retrieval-augmented answering.
//!
//! [`RagOrchestrator::answer`] runs the query pipeline:
//!
//! ```text
//! search(search_top_k)
//!   └─► pre-filter     only with rerank + threshold: min(t × factor, cap)
//!        └─► rerank    optional
//!             └─► filter    optional, on rerank score or similarity
//!                  └─► select top_k ─► context ─► LLM answer
//! ```
//!
//! Every stage records its output size in [`RagStats`]. When nothing
//! survives selection the LLM is not called and a fixed
//! insufficient-context answer is returned.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::bail;
use serde::Serialize;
use tracing::debug;

use crate::config::{Config, RetrievalConfig};
use crate::db;
use crate::embedding::{self, EmbeddingClient};
use crate::error::Result;
use crate::filter::{filter_by_threshold, validate_threshold};
use crate::llm::{self, ChatClient};
use crate::models::{RagStats, SearchResult, SourceInfo};
use crate::rerank::Reranker;
use crate::search::SemanticSearch;
use crate::store::SqliteStore;

pub const CONTEXT_DELIMITER: &str = "\n\n---\n\n";

pub const INSUFFICIENT_CONTEXT_ANSWER: &str =
    "I could not find enough relevant information in the indexed documents to answer this question.";

const RAG_SYSTEM_PROMPT: &str = "You answer questions using only the provided context. \
Do not use outside knowledge. If the context does not contain enough information to answer, \
say explicitly that the context is insufficient. Be concise.";

const PLAIN_SYSTEM_PROMPT: &str = "You are a helpful assistant. Be concise.";

/// Knobs for one query.
#[derive(Debug, Clone, PartialEq)]
pub struct RagOptions {
    pub top_k: usize,
    pub rerank: bool,
    /// Candidate pool when reranking; `None` means `top_k × pool_multiplier`.
    pub rerank_top_k: Option<usize>,
    pub pool_multiplier: usize,
    pub relevance_threshold: Option<f32>,
    pub pre_filter_factor: f32,
    pub pre_filter_cap: f32,
}

impl RagOptions {
    pub fn from_config(retrieval: &RetrievalConfig) -> Self {
        Self {
            top_k: retrieval.top_k,
            rerank: retrieval.rerank,
            rerank_top_k: retrieval.rerank_top_k,
            pool_multiplier: retrieval.rerank_pool_multiplier,
            relevance_threshold: retrieval.relevance_threshold,
            pre_filter_factor: retrieval.pre_filter_factor,
            pre_filter_cap: retrieval.pre_filter_cap,
        }
    }

    pub fn search_top_k(&self) -> usize {
        if self.rerank {
            self.rerank_top_k
                .unwrap_or(self.top_k.saturating_mul(self.pool_multiplier.max(1)))
        } else {
            self.top_k
        }
    }

    /// Looser threshold applied before reranking. `None` unless reranking
    /// and a threshold are both set.
    pub fn pre_filter_threshold(&self) -> Option<f32> {
        if !self.rerank {
            return None;
        }
        self.relevance_threshold.map(|t| {
            (t * self.pre_filter_factor)
                .min(self.pre_filter_cap)
                .clamp(0.0, 1.0)
        })
    }
}

impl Default for RagOptions {
    fn default() -> Self {
        Self::from_config(&RetrievalConfig::default())
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RagAnswer {
    pub answer: String,
    pub sources: Vec<SourceInfo>,
    pub stats: RagStats,
    #[serde(skip)]
    pub context: String,
}

/// A selected chunk with whichever score ranked it.
struct Candidate {
    result: SearchResult,
    score: f32,
}

pub struct RagOrchestrator<'a> {
    search: SemanticSearch<'a>,
    reranker: Reranker,
    llm: Arc<dyn ChatClient>,
}

impl<'a> RagOrchestrator<'a> {
    pub fn new(
        store: &'a SqliteStore,
        embedder: Arc<dyn EmbeddingClient>,
        llm: Arc<dyn ChatClient>,
    ) -> Self {
        Self {
            search: SemanticSearch::new(store, embedder),
            reranker: Reranker::new(llm.clone()),
            llm,
        }
    }

    pub async fn answer(&self, question: &str, options: &RagOptions) -> Result<RagAnswer> {
        let threshold = options.relevance_threshold.map(validate_threshold).transpose()?;

        let mut stats = RagStats {
            rerank_enabled: options.rerank,
            filter_enabled: threshold.is_some(),
            ..RagStats::default()
        };

        let results = self.search.search(question, options.search_top_k()).await?;
        stats.initial_count = results.len();
        debug!(stage = "search", count = results.len(), top_k = options.search_top_k());

        let mut candidates: Vec<Candidate> = if options.rerank {
            let mut pool = results;
            if let Some(pre) = options.pre_filter_threshold() {
                pool = filter_by_threshold(pool, pre)?;
                stats.after_pre_filter = Some(pool.len());
                stats.pre_filter_threshold = Some(pre);
                debug!(stage = "pre_filter", count = pool.len(), threshold = pre);
            }

            let mut reranked = self.reranker.rerank(question, pool).await;
            stats.after_rerank = Some(reranked.len());
            debug!(stage = "rerank", count = reranked.len());

            if let Some(t) = threshold {
                reranked = filter_by_threshold(reranked, t)?;
                stats.after_filter = Some(reranked.len());
                debug!(stage = "filter", count = reranked.len(), threshold = t);
            }
            reranked
                .into_iter()
                .map(|r| Candidate {
                    score: r.rerank_score,
                    result: r.result,
                })
                .collect()
        } else {
            let mut results = results;
            if let Some(t) = threshold {
                results = filter_by_threshold(results, t)?;
                stats.after_filter = Some(results.len());
                debug!(stage = "filter", count = results.len(), threshold = t);
            }
            results
                .into_iter()
                .map(|r| Candidate {
                    score: r.similarity,
                    result: r,
                })
                .collect()
        };

        candidates.truncate(options.top_k);
        stats.final_count = candidates.len();
        debug!(stage = "select", count = candidates.len());

        let context = assemble_context(&candidates);
        let sources = collect_sources(&candidates);

        let answer = if candidates.is_empty() {
            INSUFFICIENT_CONTEXT_ANSWER.to_string()
        } else {
            let message = format!("Context:\n{}\n\nQuestion: {}", context, question);
            self.llm.generate_answer(RAG_SYSTEM_PROMPT, &message).await?
        };

        Ok(RagAnswer {
            answer,
            sources,
            stats,
            context,
        })
    }
}

fn assemble_context(candidates: &[Candidate]) -> String {
    candidates
        .iter()
        .map(|c| c.result.chunk.content.as_str())
        .collect::<Vec<_>>()
        .join(CONTEXT_DELIMITER)
}

/// One entry per document, from its best-ranked chunk.
fn collect_sources(candidates: &[Candidate]) -> Vec<SourceInfo> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|c| seen.insert(c.result.document.id))
        .map(|c| SourceInfo {
            document_id: c.result.document.id,
            file_path: c.result.document.file_path.clone(),
            file_name: c.result.document.file_name.clone(),
            file_type: c.result.document.file_type.clone(),
            chunk_index: c.result.chunk.chunk_index,
            score: c.score,
        })
        .collect()
}

/// Send the question straight to the LLM, without retrieval.
pub async fn ask_plain(llm: &dyn ChatClient, question: &str) -> Result<String> {
    Ok(llm.generate_answer(PLAIN_SYSTEM_PROMPT, question).await?)
}

/// CLI overrides for `crag ask`.
#[derive(Debug, Clone, Default)]
pub struct AskArgs {
    pub plain: bool,
    pub top_k: Option<usize>,
    pub rerank: Option<bool>,
    pub threshold: Option<f32>,
    pub rerank_top_k: Option<usize>,
    pub json: bool,
}

pub async fn run_ask(config: &Config, question: &str, args: &AskArgs) -> anyhow::Result<()> {
    if let Some(t) = args.threshold {
        validate_threshold(t)?;
    }
    if question.trim().is_empty() {
        bail!("Question must not be empty.");
    }
    if !config.llm.is_enabled() {
        bail!("LLM provider is disabled. Set [llm] provider in config.");
    }
    let chat = llm::create_client(&config.llm)?;

    if args.plain {
        let answer = ask_plain(chat.as_ref(), question).await?;
        if args.json {
            println!("{}", serde_json::json!({ "answer": answer }));
        } else {
            println!("{}", answer);
        }
        return Ok(());
    }

    if !config.embedding.is_enabled() {
        bail!("Retrieval requires embeddings. Set [embedding] provider in config, or use --plain.");
    }

    let mut options = RagOptions::from_config(&config.retrieval);
    if let Some(k) = args.top_k {
        if k == 0 {
            bail!("--top-k must be >= 1");
        }
        options.top_k = k;
    }
    if let Some(rerank) = args.rerank {
        options.rerank = rerank;
    }
    if args.threshold.is_some() {
        options.relevance_threshold = args.threshold;
    }
    if args.rerank_top_k.is_some() {
        options.rerank_top_k = args.rerank_top_k;
    }

    let store = db::open_store(config).await?;
    let embedder = embedding::create_client(&config.embedding)?;
    let orchestrator = RagOrchestrator::new(&store, embedder, chat);
    let result = orchestrator.answer(question, &options).await?;
    store.close().await;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&result)?);
        return Ok(());
    }

    println!("{}", result.answer);
    if !result.sources.is_empty() {
        println!();
        println!("Sources:");
        for (i, source) in result.sources.iter().enumerate() {
            println!(
                "  {}. {} (chunk {}, score {:.3})",
                i + 1,
                source.file_path,
                source.chunk_index,
                source.score
            );
        }
    }
    println!();
    println!("{}", format_stats(&result.stats));
    Ok(())
}

fn format_stats(stats: &RagStats) -> String {
    let mut stages = vec![format!("search {}", stats.initial_count)];
    if let Some(n) = stats.after_pre_filter {
        stages.push(format!("pre-filter {}", n));
    }
    if let Some(n) = stats.after_rerank {
        stages.push(format!("rerank {}", n));
    }
    if let Some(n) = stats.after_filter {
        stages.push(format!("filter {}", n));
    }
    stages.push(format!("final {}", stats.final_count));
    format!("retrieval: {}", stages.join(" -> "))
}
