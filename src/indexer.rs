//! Incremental indexing of a directory tree.
//!
//! For each eligible file the indexer hashes the current bytes, compares
//! `(content_hash, last_modified_ms)` with the stored document, and either
//! skips it or re-chunks, re-embeds, and atomically replaces it:
//!
//! ```text
//! discover ─► hash ─► unchanged? ─yes─► skip
//!                        │no
//!                        ▼
//!                 chunk ─► embed ─► replace_document (one transaction)
//! ```
//!
//! Files are processed with bounded parallelism (`indexing.workers`). A
//! failure on one file is logged and counted; the run continues. Reindexing
//! of one path is serialized through [`PathLocks`], and embedding requests
//! finish before the storage transaction opens.

use std::collections::{HashMap, HashSet};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::UNIX_EPOCH;

use anyhow::bail;
use futures::stream::{self, StreamExt};
use sha2::{Digest, Sha256};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::chunk::{chunk_text, ChunkParams, StreamingChunker};
use crate::config::{Config, IndexingConfig};
use crate::db;
use crate::embedding::{self, EmbeddingClient};
use crate::error::{RagError, Result, ServiceError};
use crate::ignore::IgnoreRules;
use crate::models::{ChunkInfo, IndexSummary, NewDocument};
use crate::progress::{IndexProgressEvent, ProgressMode};
use crate::store::SqliteStore;

/// `(processed, total)` callback, invoked once before the first file and
/// once per handled file. `processed` never decreases.
pub type ProgressFn = Arc<dyn Fn(usize, usize) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexOutcome {
    Indexed { chunks: usize },
    Unchanged,
}

/// Registry of per-path async mutexes. An entry lives only while some
/// task holds or waits on its lock.
#[derive(Clone, Default)]
pub struct PathLocks {
    inner: Arc<StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl PathLocks {
    pub async fn acquire(&self, path: &Path) -> PathGuard {
        let lock = {
            let mut map = self.inner.lock().unwrap_or_else(|e| e.into_inner());
            map.entry(path.to_path_buf()).or_default().clone()
        };
        PathGuard {
            guard: Some(lock.lock_owned().await),
            path: path.to_path_buf(),
            registry: self.inner.clone(),
        }
    }

    /// Number of paths currently locked or awaited.
    pub fn len(&self) -> usize {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Held lock on one path. Dropping it removes the registry entry when no
/// other task references that path's mutex.
pub struct PathGuard {
    guard: Option<OwnedMutexGuard<()>>,
    path: PathBuf,
    registry: Arc<StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
}

impl Drop for PathGuard {
    fn drop(&mut self) {
        self.guard.take();
        let mut map = self.registry.lock().unwrap_or_else(|e| e.into_inner());
        if map
            .get(&self.path)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            map.remove(&self.path);
        }
    }
}

pub struct DocumentIndexer<'a> {
    store: &'a SqliteStore,
    embedder: Arc<dyn EmbeddingClient>,
    params: ChunkParams,
    streaming_threshold: u64,
    buffer_size: usize,
    indexing: IndexingConfig,
    force: bool,
    locks: PathLocks,
    progress: Option<ProgressFn>,
}

impl<'a> DocumentIndexer<'a> {
    pub fn new(
        store: &'a SqliteStore,
        embedder: Arc<dyn EmbeddingClient>,
        config: &Config,
    ) -> Result<Self> {
        Ok(Self {
            store,
            embedder,
            params: ChunkParams::new(config.chunking.chunk_size, config.chunking.overlap)?,
            streaming_threshold: config.chunking.streaming_threshold_bytes,
            buffer_size: config.chunking.buffer_size,
            indexing: config.indexing.clone(),
            force: false,
            locks: PathLocks::default(),
            progress: None,
        })
    }

    /// Reindex every file even when its hash and mtime are unchanged.
    pub fn force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn with_progress(mut self, progress: impl Fn(usize, usize) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(progress));
        self
    }

    /// Share a lock registry with other indexers in the same process.
    pub fn with_locks(mut self, locks: PathLocks) -> Self {
        self.locks = locks;
        self
    }

    fn notify(&self, processed: usize, total: usize) {
        if let Some(progress) = &self.progress {
            progress(processed, total);
        }
    }

    /// Eligible files under `root`, sorted. Ignored directories are pruned
    /// without being descended into.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>> {
        if !root.is_dir() {
            return Err(RagError::InvalidInput(format!(
                "not a directory: {}",
                root.display()
            )));
        }
        let rules = IgnoreRules::load(
            root,
            &self.indexing.ignore_patterns,
            &self.indexing.ignore_file,
        )?;

        let walker = WalkDir::new(root)
            .follow_links(self.indexing.follow_symlinks)
            .into_iter()
            .filter_entry(|entry| {
                if entry.depth() == 0 {
                    return true;
                }
                let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
                !rules.matches(relative, entry.file_type().is_dir())
            });

        let mut files = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "skipping unreadable entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if self.is_eligible(entry.path()) {
                files.push(entry.into_path());
            }
        }
        files.sort();
        debug!(root = %root.display(), files = files.len(), "discovered files");
        Ok(files)
    }

    fn is_eligible(&self, path: &Path) -> bool {
        let extension = match path.extension() {
            Some(ext) => ext.to_string_lossy().to_lowercase(),
            None => return false,
        };
        if !self
            .indexing
            .extensions
            .iter()
            .any(|allowed| allowed.trim_start_matches('.').eq_ignore_ascii_case(&extension))
        {
            return false;
        }
        match std::fs::metadata(path) {
            Ok(meta) => {
                if meta.len() > self.indexing.max_file_size_bytes {
                    debug!(path = %path.display(), size = meta.len(), "skipping oversized file");
                    false
                } else {
                    true
                }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cannot stat file");
                false
            }
        }
    }

    /// Index one file. The stored `file_path` is `path` as given.
    pub async fn index_file(&self, path: &Path) -> Result<IndexOutcome> {
        let _guard = self.locks.acquire(path).await;
        let file_path = path.to_string_lossy().into_owned();

        let metadata = tokio::fs::metadata(path).await?;
        if !metadata.is_file() {
            return Err(RagError::InvalidInput(format!("not a file: {}", file_path)));
        }
        let last_modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as i64)
            .unwrap_or(0);

        let streamed = metadata.len() > self.streaming_threshold;
        let loaded = if streamed {
            None
        } else {
            Some(tokio::fs::read(path).await?)
        };
        let content_hash = match &loaded {
            Some(bytes) => sha256_hex(bytes),
            None => {
                let owned = path.to_path_buf();
                run_blocking(move || hash_file(&owned)).await?
            }
        };

        if !self.force {
            if let Some(existing) = self.store.find_document_by_path(&file_path).await? {
                if existing.content_hash == content_hash
                    && existing.last_modified_ms == last_modified_ms
                {
                    debug!(path = %file_path, "unchanged");
                    return Ok(IndexOutcome::Unchanged);
                }
            }
        }

        let chunks = match loaded {
            Some(bytes) => chunk_text(&String::from_utf8_lossy(&bytes), self.params),
            None => {
                let owned = path.to_path_buf();
                let (params, capacity) = (self.params, self.buffer_size);
                run_blocking(move || stream_chunks(&owned, params, capacity)).await?
            }
        };

        let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = if texts.is_empty() {
            Vec::new()
        } else {
            self.embedder.embed_batch(&texts).await?
        };
        if vectors.len() != chunks.len() {
            return Err(ServiceError::malformed(
                "embedding",
                format!("expected {} vectors, got {}", chunks.len(), vectors.len()),
            )
            .into());
        }

        let doc = NewDocument {
            file_name: path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default(),
            file_type: path
                .extension()
                .map(|e| e.to_string_lossy().to_lowercase())
                .unwrap_or_default(),
            file_path,
            file_size_bytes: metadata.len() as i64,
            last_modified_ms,
            content_hash,
        };
        self.store
            .replace_document(&doc, &chunks, &vectors, self.embedder.model_name())
            .await?;

        debug!(path = %doc.file_path, chunks = chunks.len(), streamed, "indexed");
        Ok(IndexOutcome::Indexed {
            chunks: chunks.len(),
        })
    }

    /// Remove one document, waiting for any in-flight reindex of that path.
    pub async fn remove_file(&self, path: &Path) -> Result<bool> {
        let _guard = self.locks.acquire(path).await;
        self.store
            .delete_document_by_path(&path.to_string_lossy())
            .await
    }

    /// Index every eligible file under `root`, then prune documents under
    /// `root` whose files are gone or no longer eligible.
    pub async fn index_directory(&self, root: &Path) -> Result<IndexSummary> {
        let root = tokio::fs::canonicalize(root).await?;
        let files = self.discover(&root)?;
        let total = files.len();
        let mut summary = IndexSummary {
            total,
            ..IndexSummary::default()
        };
        info!(root = %root.display(), files = total, force = self.force, "indexing");
        self.notify(0, total);

        let results = stream::iter(files.iter())
            .map(|path| async move { (path, self.index_file(path).await) })
            .buffer_unordered(self.indexing.workers.max(1));
        futures::pin_mut!(results);

        let mut processed = 0;
        while let Some((path, result)) = results.next().await {
            match result {
                Ok(IndexOutcome::Indexed { chunks }) => {
                    summary.indexed += 1;
                    summary.chunks_written += chunks;
                }
                Ok(IndexOutcome::Unchanged) => summary.skipped += 1,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to index file");
                    summary.failed += 1;
                }
            }
            processed += 1;
            self.notify(processed, total);
        }

        if self.indexing.prune_missing {
            summary.removed = self.prune(&root, &files).await?;
        }

        info!(
            indexed = summary.indexed,
            skipped = summary.skipped,
            failed = summary.failed,
            removed = summary.removed,
            "indexing finished"
        );
        Ok(summary)
    }

    async fn prune(&self, root: &Path, keep: &[PathBuf]) -> Result<usize> {
        let keep: HashSet<String> = keep
            .iter()
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        let mut removed = 0;
        for doc in self.store.list_documents().await? {
            let path = Path::new(&doc.file_path);
            if !path.starts_with(root) || keep.contains(&doc.file_path) {
                continue;
            }
            if self.remove_file(path).await? {
                debug!(path = %doc.file_path, "pruned");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

async fn run_blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> std::io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| RagError::Io(std::io::Error::other(e)))?
        .map_err(RagError::from)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

fn hash_file(path: &Path) -> std::io::Result<String> {
    let mut file = std::fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

fn stream_chunks(path: &Path, params: ChunkParams, capacity: usize) -> std::io::Result<Vec<ChunkInfo>> {
    let file = std::fs::File::open(path)?;
    let chunker = if capacity == 0 {
        StreamingChunker::new(file, params)
    } else {
        StreamingChunker::with_capacity(file, params, capacity)
    };
    chunker.collect()
}

pub async fn run_index(
    config: &Config,
    dir: &Path,
    full: bool,
    mode: ProgressMode,
) -> anyhow::Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Embedding provider is disabled. Set [embedding] provider in the config to index documents.");
    }
    let store = db::open_store(config).await?;
    let embedder = embedding::create_client(&config.embedding)?;

    let reporter = mode.reporter();
    reporter.report(IndexProgressEvent::Discovering {
        root: dir.display().to_string(),
    });
    let bridge = reporter.clone();
    let indexer = DocumentIndexer::new(&store, embedder, config)?
        .force(full)
        .with_progress(move |processed, total| {
            bridge.report(IndexProgressEvent::Indexing { processed, total })
        });

    let summary = indexer.index_directory(dir).await?;

    println!("index {}", dir.display());
    println!("  files found: {}", summary.total);
    println!("  indexed: {}", summary.indexed);
    println!("  unchanged: {}", summary.skipped);
    println!("  failed: {}", summary.failed);
    println!("  removed: {}", summary.removed);
    println!("  chunks written: {}", summary.chunks_written);
    if summary.failed > 0 {
        println!("partial ({} files failed, see log)", summary.failed);
    } else {
        println!("ok");
    }
    Ok(())
}
