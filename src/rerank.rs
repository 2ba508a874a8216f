//! LLM relevance scoring of search candidates.
//!
//! Each candidate gets one chat request asking for a bare score in
//! `[0.0, 1.0]`. The reply is parsed leniently:
//!
//! 1. the first number in the reply that lies in `[0, 1]`;
//! 2. otherwise the first number at all, clamped into `[0, 1]`;
//! 3. otherwise the candidate is dropped.
//!
//! A failed request also drops the candidate. Dropping shrinks the result
//! set; it never invents a score.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::llm::ChatClient;
use crate::models::{RerankedResult, SearchResult};

const RERANK_SYSTEM_PROMPT: &str = "You rate how relevant a passage is to a search query. \
Reply with a single number between 0.0 and 1.0, where 0.0 means unrelated and 1.0 means \
the passage directly answers the query. Reply with the number only.";

/// Passage characters sent per candidate.
const DEFAULT_MAX_PASSAGE_CHARS: usize = 2000;

pub struct Reranker {
    llm: Arc<dyn ChatClient>,
    max_passage_chars: usize,
}

impl Reranker {
    pub fn new(llm: Arc<dyn ChatClient>) -> Self {
        Self {
            llm,
            max_passage_chars: DEFAULT_MAX_PASSAGE_CHARS,
        }
    }

    pub fn with_max_passage_chars(mut self, max: usize) -> Self {
        self.max_passage_chars = max.max(1);
        self
    }

    /// Score candidates one at a time and return the survivors sorted by
    /// score, descending. Equal scores keep their input order.
    pub async fn rerank(&self, query: &str, results: Vec<SearchResult>) -> Vec<RerankedResult> {
        let mut scored = Vec::with_capacity(results.len());

        for result in results {
            let message = self.user_message(query, &result.chunk.content);
            let reply = match self.llm.generate_answer(RERANK_SYSTEM_PROMPT, &message).await {
                Ok(reply) => reply,
                Err(e) => {
                    warn!(chunk_id = result.chunk.id, error = %e, "rerank request failed, dropping candidate");
                    continue;
                }
            };
            match parse_score(&reply) {
                Some(score) => {
                    debug!(chunk_id = result.chunk.id, score, "reranked");
                    scored.push(RerankedResult {
                        result,
                        rerank_score: score,
                    });
                }
                None => {
                    warn!(chunk_id = result.chunk.id, reply = %reply.trim(), "unparsable rerank score, dropping candidate");
                }
            }
        }

        scored.sort_by(|a, b| b.rerank_score.total_cmp(&a.rerank_score));
        scored
    }

    fn user_message(&self, query: &str, content: &str) -> String {
        let passage: String = content.chars().take(self.max_passage_chars).collect();
        format!(
            "Query: {}\n\nPassage:\n{}\n\nRelevance score (0.0-1.0):",
            query, passage
        )
    }
}

/// Extract a relevance score from free-form model output.
pub fn parse_score(reply: &str) -> Option<f32> {
    let numbers = numbers_in(reply);
    numbers
        .iter()
        .copied()
        .find(|n| (0.0..=1.0).contains(n))
        .or_else(|| numbers.first().map(|n| n.clamp(0.0, 1.0)))
}

/// Decimal numbers appearing in `text`, in order.
fn numbers_in(text: &str) -> Vec<f32> {
    let chars: Vec<char> = text.chars().collect();
    let mut out = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let starts_number = chars[i].is_ascii_digit()
            || (chars[i] == '.' && chars.get(i + 1).is_some_and(|c| c.is_ascii_digit()))
            || (chars[i] == '-'
                && chars
                    .get(i + 1)
                    .is_some_and(|c| c.is_ascii_digit() || *c == '.'));
        if !starts_number {
            i += 1;
            continue;
        }

        let start = i;
        i += 1;
        let mut seen_dot = chars[start] == '.';
        while i < chars.len() {
            let c = chars[i];
            if c.is_ascii_digit() {
                i += 1;
            } else if c == '.' && !seen_dot {
                seen_dot = true;
                i += 1;
            } else {
                break;
            }
        }

        let token: String = chars[start..i].iter().collect();
        if let Ok(value) = token.trim_end_matches('.').parse::<f32>() {
            if value.is_finite() {
                out.push(value);
            }
        }
    }
    out
}
