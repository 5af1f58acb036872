//! Ingestion pipeline orchestration.
//!
//! Coordinates the flow for one root directory: crawl → extract → chunk →
//! embed → store. Files are processed one at a time; the chunks of a single
//! file are embedded concurrently (up to `embedding.max_concurrency` calls in
//! flight) and written in one store transaction once every embedding is in.
//!
//! Failure handling:
//!
//! - Crawl or read failures ([`Error::Io`]) abort the whole run.
//! - A provider failure or timeout aborts the current file only. None of its
//!   new chunks are written; the run moves on and the report records the
//!   failure.
//! - Dropping the returned future mid-file rolls back the open transaction.

use chrono::{DateTime, Utc};
use futures::{StreamExt, TryStreamExt};
use serde::Serialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf, MAIN_SEPARATOR};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::chunk::{chunk_id, chunk_text};
use crate::config::Config;
use crate::crawl::{crawl, extract};
use crate::embedding::{embed_with_timeout, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::{Chunk, Document, IndexedFile, PathRecord};
use crate::store::Store;

/// Tunables for one ingestion run, usually taken from [`Config`].
#[derive(Debug, Clone)]
pub struct IndexOptions {
    pub chunk_size: usize,
    pub overlap: usize,
    pub embed_timeout: Duration,
    pub max_concurrency: usize,
    pub prune_missing: bool,
}

impl IndexOptions {
    pub fn from_config(config: &Config) -> Self {
        Self {
            chunk_size: config.chunking.chunk_size,
            overlap: config.chunking.overlap,
            embed_timeout: Duration::from_secs(config.embedding.timeout_secs),
            max_concurrency: config.embedding.max_concurrency.max(1),
            prune_missing: config.ingest.prune_missing,
        }
    }
}

/// A file whose chunks could not be embedded.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FileFailure {
    pub path: String,
    pub cause: String,
}

/// Outcome of [`index_directory`].
#[derive(Debug, Clone, Default, Serialize)]
pub struct IndexReport {
    pub root: String,
    pub files_seen: usize,
    pub documents_indexed: usize,
    /// Files with an unsupported suffix.
    pub skipped: usize,
    pub chunks_written: usize,
    pub pruned: u64,
    pub failures: Vec<FileFailure>,
}

impl IndexReport {
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn first_failure(&self) -> Option<&FileFailure> {
        self.failures.first()
    }

    /// One-line summary used by the CLI and the `index` tool.
    pub fn summary(&self) -> String {
        format!(
            "{} files seen, {} documents indexed, {} skipped, {} chunks written, {} failed",
            self.files_seen,
            self.documents_indexed,
            self.skipped,
            self.chunks_written,
            self.failures.len()
        )
    }
}

/// Index every supported file under `root`.
///
/// Returns `Err` for failures that abort the run (I/O, store, invalid
/// chunking parameters). Per-file provider failures are collected in
/// [`IndexReport::failures`] instead.
pub async fn index_directory(
    store: &Store,
    provider: &dyn EmbeddingProvider,
    options: &IndexOptions,
    root: &Path,
) -> Result<IndexReport> {
    // Reject bad parameters before touching the filesystem.
    crate::chunk::chunk_step(options.chunk_size, options.overlap)?;

    let root = std::path::absolute(root).map_err(|e| Error::io(root, e))?;
    let files = crawl(&root)?;
    let now = Utc::now().timestamp();

    info!(root = %root.display(), files = files.len(), "indexing directory");

    let mut report = IndexReport {
        root: root.display().to_string(),
        files_seen: files.len(),
        ..Default::default()
    };

    for path in &files {
        match index_file(store, provider, options, path, now).await {
            Ok(Some(chunks)) => {
                report.documents_indexed += 1;
                report.chunks_written += chunks;
            }
            Ok(None) => report.skipped += 1,
            Err(e) if e.is_provider_failure() => {
                warn!(path = %path.display(), error = %e, "embedding failed, file not indexed");
                report.failures.push(FileFailure {
                    path: path.display().to_string(),
                    cause: e.to_string(),
                });
            }
            Err(e) => return Err(e),
        }
    }

    if options.prune_missing {
        report.pruned = prune_missing(store, &root, &files).await?;
    }

    info!(
        root = %report.root,
        indexed = report.documents_indexed,
        skipped = report.skipped,
        chunks = report.chunks_written,
        failed = report.failures.len(),
        pruned = report.pruned,
        "indexing finished"
    );

    Ok(report)
}

/// Index one file. `Ok(None)` means the file type is not supported.
async fn index_file(
    store: &Store,
    provider: &dyn EmbeddingProvider,
    options: &IndexOptions,
    path: &Path,
    now: i64,
) -> Result<Option<usize>> {
    let Some(raw_text) = extract(path)? else {
        debug!(path = %path.display(), "unsupported file type, skipping");
        return Ok(None);
    };

    let modified = std::fs::metadata(path)
        .and_then(|m| m.modified())
        .map_err(|e| Error::io(path, e))?;
    let last_modified = DateTime::<Utc>::from(modified).timestamp();

    let doc_id = path.display().to_string();
    let windows = chunk_text(&raw_text, options.chunk_size, options.overlap)?;

    // Collected up front so the stream holds no borrowing closure across
    // the await. `buffered` keeps results in window order; the first error wins.
    let pending: Vec<_> = windows
        .iter()
        .map(|w| embed_with_timeout(provider, &w.text, options.embed_timeout))
        .collect();
    let embeddings: Vec<Vec<f32>> = futures::stream::iter(pending)
        .buffered(options.max_concurrency)
    .try_collect()
    .await?;

    let chunks: Vec<Chunk> = windows
        .into_iter()
        .zip(embeddings)
        .enumerate()
        .map(|(ordinal, (window, embedding))| Chunk {
            chunk_id: chunk_id(&doc_id, ordinal),
            doc_id: doc_id.clone(),
            ordinal,
            start_offset: window.offset,
            end_offset: window.offset + window.text.chars().count(),
            text: window.text,
            embedding,
        })
        .collect();
    let chunk_count = chunks.len();

    let mut paths = Vec::with_capacity(2);
    if let Some(parent) = path.parent() {
        paths.push(PathRecord {
            path: parent.display().to_string(),
            is_directory: true,
            last_indexed: now,
        });
    }
    paths.push(PathRecord {
        path: doc_id.clone(),
        is_directory: false,
        last_indexed: now,
    });

    let file = IndexedFile {
        paths,
        document: Document {
            doc_id: doc_id.clone(),
            path: doc_id,
            raw_text,
            last_modified,
        },
        chunks,
    };
    store.upsert_file(&file).await?;

    debug!(path = %path.display(), chunks = chunk_count, "indexed file");
    Ok(Some(chunk_count))
}

/// Remove stored documents under `root` whose files were not crawled.
async fn prune_missing(store: &Store, root: &Path, seen: &[PathBuf]) -> Result<u64> {
    let mut prefix = root.display().to_string();
    if !prefix.ends_with(MAIN_SEPARATOR) {
        prefix.push(MAIN_SEPARATOR);
    }

    let seen: HashSet<String> = seen.iter().map(|p| p.display().to_string()).collect();
    let stale: Vec<String> = store
        .indexed_documents_under(&prefix)
        .await?
        .into_iter()
        .filter(|doc_id| !seen.contains(doc_id))
        .collect();

    if stale.is_empty() {
        return Ok(0);
    }
    let removed = store.remove_documents(&stale).await?;
    info!(removed, "pruned documents for vanished files");
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashingProvider;
    use async_trait::async_trait;
    use std::fs;
    use tempfile::TempDir;

    const DIMS: usize = 32;

    /// Fails for any chunk containing "poison".
    struct Poisoned(HashingProvider);

    #[async_trait]
    impl EmbeddingProvider for Poisoned {
        fn model_name(&self) -> &str {
            "poisoned"
        }
        fn dims(&self) -> usize {
            self.0.dims()
        }
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("poison") {
                return Err(Error::Provider("refused".to_string()));
            }
            Ok(self.0.embed_sync(text))
        }
    }

    fn options() -> IndexOptions {
        IndexOptions {
            chunk_size: 20,
            overlap: 5,
            embed_timeout: Duration::from_secs(5),
            max_concurrency: 3,
            prune_missing: false,
        }
    }

    async fn setup() -> (TempDir, Store) {
        let tmp = TempDir::new().unwrap();
        fs::create_dir_all(tmp.path().join("docs/sub")).unwrap();
        fs::write(
            tmp.path().join("docs/a.md"),
            "Rust ownership rules keep memory safe without a garbage collector.",
        )
        .unwrap();
        fs::write(tmp.path().join("docs/sub/b.txt"), "short note").unwrap();
        fs::write(tmp.path().join("docs/sub/c.rs"), "fn main() {}").unwrap();
        let store = Store::open_at(&tmp.path().join("db/test.sqlite"), DIMS)
            .await
            .unwrap();
        (tmp, store)
    }

    #[tokio::test]
    async fn test_index_directory_counts() {
        let (tmp, store) = setup().await;
        let provider = HashingProvider::new(DIMS);
        let report = index_directory(&store, &provider, &options(), &tmp.path().join("docs"))
            .await
            .unwrap();

        assert!(report.is_success());
        assert_eq!(report.files_seen, 3);
        assert_eq!(report.documents_indexed, 2);
        assert_eq!(report.skipped, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 2);
        assert_eq!(stats.chunks as usize, report.chunks_written);
        assert_eq!(stats.vectors, stats.chunks);
    }

    #[tokio::test]
    async fn test_reindex_is_idempotent() {
        let (tmp, store) = setup().await;
        let provider = HashingProvider::new(DIMS);
        let root = tmp.path().join("docs");

        index_directory(&store, &provider, &options(), &root)
            .await
            .unwrap();
        let first = store.stats().await.unwrap();
        index_directory(&store, &provider, &options(), &root)
            .await
            .unwrap();
        let second = store.stats().await.unwrap();

        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_chunk_offsets_follow_step() {
        let (tmp, store) = setup().await;
        let provider = HashingProvider::new(DIMS);
        let root = tmp.path().join("docs");
        index_directory(&store, &provider, &options(), &root)
            .await
            .unwrap();

        let doc_id = std::path::absolute(root.join("a.md"))
            .unwrap()
            .display()
            .to_string();
        let doc = store.get_document(&doc_id).await.unwrap().unwrap();
        let query = HashingProvider::new(DIMS).embed_sync("ownership");
        let hits = store.query(&query, 100, Some(&doc_id)).await.unwrap();

        let mut offsets: Vec<usize> = hits.iter().map(|h| h.start_offset).collect();
        offsets.sort();
        let expected: Vec<usize> = (0..offsets.len()).map(|i| i * 15).collect();
        assert_eq!(offsets, expected);
        for hit in &hits {
            let from_doc: String = doc
                .raw_text
                .chars()
                .skip(hit.start_offset)
                .take(hit.chunk_text.chars().count())
                .collect();
            assert_eq!(from_doc, hit.chunk_text);
        }
    }

    #[tokio::test]
    async fn test_provider_failure_skips_only_that_file() {
        let (tmp, store) = setup().await;
        fs::write(tmp.path().join("docs/bad.md"), "this file is poison").unwrap();
        let provider = Poisoned(HashingProvider::new(DIMS));

        let report = index_directory(&store, &provider, &options(), &tmp.path().join("docs"))
            .await
            .unwrap();

        assert!(!report.is_success());
        assert_eq!(report.failures.len(), 1);
        assert!(report.first_failure().unwrap().path.ends_with("bad.md"));
        assert_eq!(report.documents_indexed, 2);

        let bad = std::path::absolute(tmp.path().join("docs/bad.md"))
            .unwrap()
            .display()
            .to_string();
        assert!(store.get_document(&bad).await.unwrap().is_none());
        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 2);
    }

    #[tokio::test]
    async fn test_invalid_utf8_aborts_run() {
        let (tmp, store) = setup().await;
        fs::write(tmp.path().join("docs/broken.txt"), [0xffu8, 0xfe]).unwrap();
        let provider = HashingProvider::new(DIMS);

        let err = index_directory(&store, &provider, &options(), &tmp.path().join("docs"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[tokio::test]
    async fn test_missing_root_is_io_error() {
        let (tmp, store) = setup().await;
        let provider = HashingProvider::new(DIMS);
        let err = index_directory(&store, &provider, &options(), &tmp.path().join("nope"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }

    #[tokio::test]
    async fn test_bad_chunking_rejected() {
        let (tmp, store) = setup().await;
        let provider = HashingProvider::new(DIMS);
        let mut opts = options();
        opts.overlap = opts.chunk_size;
        let err = index_directory(&store, &provider, &opts, &tmp.path().join("docs"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::InvalidArgument(_)));
    }

    #[tokio::test]
    async fn test_prune_missing_removes_vanished_files() {
        let (tmp, store) = setup().await;
        let provider = HashingProvider::new(DIMS);
        let root = tmp.path().join("docs");
        let mut opts = options();
        opts.prune_missing = true;

        index_directory(&store, &provider, &opts, &root)
            .await
            .unwrap();
        fs::remove_file(root.join("sub/b.txt")).unwrap();
        let report = index_directory(&store, &provider, &opts, &root)
            .await
            .unwrap();

        assert_eq!(report.pruned, 1);
        assert_eq!(store.stats().await.unwrap().documents, 1);
    }

    #[tokio::test]
    async fn test_empty_file_stores_document_without_chunks() {
        let tmp = TempDir::new().unwrap();
        fs::write(tmp.path().join("empty.md"), "").unwrap();
        let store = Store::open_at(&tmp.path().join("s.sqlite"), DIMS)
            .await
            .unwrap();
        let provider = HashingProvider::new(DIMS);

        let report = index_directory(&store, &provider, &options(), tmp.path())
            .await
            .unwrap();
        assert_eq!(report.documents_indexed, 1);
        assert_eq!(report.chunks_written, 0);
    }
}
