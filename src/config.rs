//! TOML configuration.
//!
//! Every section except `[db]` is optional and falls back to defaults, so a
//! minimal config only needs a database path. [`load_config`] validates the
//! values that the library would otherwise reject at call time.

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::chunk::ChunkParams;
use crate::http::RetryPolicy;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub indexing: IndexingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    /// Files larger than this are chunked with the streaming chunker.
    #[serde(default = "default_streaming_threshold")]
    pub streaming_threshold_bytes: u64,
    /// Streaming buffer in characters; `0` selects the minimum.
    #[serde(default)]
    pub buffer_size: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            streaming_threshold_bytes: default_streaming_threshold(),
            buffer_size: 0,
        }
    }
}

impl ChunkingConfig {
    pub fn params(&self) -> Result<ChunkParams> {
        Ok(ChunkParams::new(self.chunk_size, self.overlap)?)
    }
}

fn default_chunk_size() -> usize {
    1000
}
fn default_overlap() -> usize {
    200
}
fn default_streaming_threshold() -> u64 {
    1024 * 1024
}

#[derive(Debug, Deserialize, Clone)]
pub struct IndexingConfig {
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,
    #[serde(default = "default_max_file_size")]
    pub max_file_size_bytes: u64,
    #[serde(default)]
    pub ignore_patterns: Vec<String>,
    /// Ignore file read from the index root, if present.
    #[serde(default = "default_ignore_file")]
    pub ignore_file: String,
    #[serde(default)]
    pub follow_symlinks: bool,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_true")]
    pub prune_missing: bool,
}

impl Default for IndexingConfig {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            max_file_size_bytes: default_max_file_size(),
            ignore_patterns: Vec::new(),
            ignore_file: default_ignore_file(),
            follow_symlinks: false,
            workers: default_workers(),
            prune_missing: true,
        }
    }
}

fn default_extensions() -> Vec<String> {
    ["md", "txt", "rs", "py", "js", "ts", "java", "kt", "go", "toml", "yaml", "yml", "json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}
fn default_max_file_size() -> u64 {
    10 * 1024 * 1024
}
fn default_ignore_file() -> String {
    ".cragignore".to_string()
}
fn default_workers() -> usize {
    4
}
fn default_true() -> bool {
    true
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    /// Expected dimension. Responses of any other length are rejected.
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            dims: None,
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_base_ms, self.max_backoff_ms)
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct LlmConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_llm_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: None,
            url: None,
            max_retries: default_max_retries(),
            timeout_secs: default_llm_timeout_secs(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            temperature: default_temperature(),
        }
    }
}

impl LlmConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, self.backoff_base_ms, self.max_backoff_ms)
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    32
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_llm_timeout_secs() -> u64 {
    120
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_max_backoff_ms() -> u64 {
    32_000
}
fn default_temperature() -> f32 {
    0.2
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub rerank: bool,
    /// Candidate pool for reranking; defaults to `top_k × rerank_pool_multiplier`.
    #[serde(default)]
    pub rerank_top_k: Option<usize>,
    #[serde(default = "default_pool_multiplier")]
    pub rerank_pool_multiplier: usize,
    #[serde(default)]
    pub relevance_threshold: Option<f32>,
    #[serde(default = "default_pre_filter_factor")]
    pub pre_filter_factor: f32,
    #[serde(default = "default_pre_filter_cap")]
    pub pre_filter_cap: f32,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            rerank: false,
            rerank_top_k: None,
            rerank_pool_multiplier: default_pool_multiplier(),
            relevance_threshold: None,
            pre_filter_factor: default_pre_filter_factor(),
            pre_filter_cap: default_pre_filter_cap(),
        }
    }
}

fn default_top_k() -> usize {
    5
}
fn default_pool_multiplier() -> usize {
    2
}
fn default_pre_filter_factor() -> f32 {
    0.5
}
fn default_pre_filter_cap() -> f32 {
    0.1
}

#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Config with every default and the given database path.
    pub fn with_db_path(path: impl Into<PathBuf>) -> Self {
        Self {
            db: DbConfig { path: path.into() },
            chunking: ChunkingConfig::default(),
            indexing: IndexingConfig::default(),
            embedding: EmbeddingConfig::default(),
            llm: LlmConfig::default(),
            retrieval: RetrievalConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    config
        .chunking
        .params()
        .context("invalid [chunking] section")?;

    if config.indexing.workers == 0 {
        bail!("indexing.workers must be >= 1");
    }

    let retrieval = &config.retrieval;
    if retrieval.top_k < 1 {
        bail!("retrieval.top_k must be >= 1");
    }
    if retrieval.rerank_pool_multiplier < 1 {
        bail!("retrieval.rerank_pool_multiplier must be >= 1");
    }
    if let Some(t) = retrieval.relevance_threshold {
        if !(0.0..=1.0).contains(&t) {
            bail!("retrieval.relevance_threshold must be in [0.0, 1.0]");
        }
    }
    if !(0.0..=1.0).contains(&retrieval.pre_filter_factor) {
        bail!("retrieval.pre_filter_factor must be in [0.0, 1.0]");
    }
    if !(0.0..=1.0).contains(&retrieval.pre_filter_cap) {
        bail!("retrieval.pre_filter_cap must be in [0.0, 1.0]");
    }

    for (section, provider, model) in [
        ("embedding", &config.embedding.provider, &config.embedding.model),
        ("llm", &config.llm.provider, &config.llm.model),
    ] {
        match provider.as_str() {
            "disabled" => {}
            "openai" | "ollama" => {
                if model.is_none() {
                    bail!(
                        "{}.model must be specified when provider is '{}'",
                        section,
                        provider
                    );
                }
            }
            other => bail!(
                "Unknown {} provider: '{}'. Must be disabled, openai, or ollama.",
                section,
                other
            ),
        }
    }

    if config.embedding.dims == Some(0) {
        bail!("embedding.dims must be > 0 when set");
    }
    if config.embedding.batch_size == 0 {
        bail!("embedding.batch_size must be > 0");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_config_uses_defaults() {
        let cfg = parse_config("[db]\npath = \"./data/crag.sqlite\"\n").unwrap();
        assert_eq!(cfg.chunking.chunk_size, 1000);
        assert_eq!(cfg.chunking.overlap, 200);
        assert_eq!(cfg.retrieval.top_k, 5);
        assert_eq!(cfg.retrieval.rerank_pool_multiplier, 2);
        assert!((cfg.retrieval.pre_filter_factor - 0.5).abs() < f32::EPSILON);
        assert!((cfg.retrieval.pre_filter_cap - 0.1).abs() < f32::EPSILON);
        assert!(!cfg.embedding.is_enabled());
        assert!(!cfg.llm.is_enabled());
        assert!(cfg.indexing.extensions.iter().any(|e| e == "md"));
    }

    #[test]
    fn test_overlap_must_be_smaller_than_chunk() {
        let err = parse_config("[db]\npath = \"x\"\n[chunking]\nchunk_size = 10\noverlap = 10\n")
            .unwrap_err();
        assert!(format!("{:#}", err).contains("overlap"));
    }

    #[test]
    fn test_threshold_out_of_range_rejected() {
        let err = parse_config("[db]\npath = \"x\"\n[retrieval]\nrelevance_threshold = 1.5\n")
            .unwrap_err();
        assert!(err.to_string().contains("relevance_threshold"));
    }

    #[test]
    fn test_enabled_provider_requires_model() {
        let err =
            parse_config("[db]\npath = \"x\"\n[embedding]\nprovider = \"ollama\"\n").unwrap_err();
        assert!(err.to_string().contains("embedding.model"));
    }

    #[test]
    fn test_unknown_provider_rejected() {
        let err = parse_config("[db]\npath = \"x\"\n[llm]\nprovider = \"magic\"\nmodel = \"m\"\n")
            .unwrap_err();
        assert!(err.to_string().contains("Unknown llm provider"));
    }

    #[test]
    fn test_full_config_parses() {
        let cfg = parse_config(
            r#"
[db]
path = "/tmp/crag.sqlite"

[chunking]
chunk_size = 500
overlap = 50

[indexing]
extensions = ["md"]
ignore_patterns = ["/build/", "*.log"]
workers = 2

[embedding]
provider = "ollama"
model = "nomic-embed-text"
dims = 768

[llm]
provider = "openai"
model = "gpt-4o-mini"

[retrieval]
top_k = 3
rerank = true
relevance_threshold = 0.4

[logging]
level = "debug"
"#,
        )
        .unwrap();
        assert_eq!(cfg.chunking.params().unwrap().step(), 450);
        assert_eq!(cfg.indexing.ignore_patterns.len(), 2);
        assert_eq!(cfg.embedding.dims, Some(768));
        assert!(cfg.retrieval.rerank);
        assert_eq!(cfg.logging.level, "debug");
    }
}
