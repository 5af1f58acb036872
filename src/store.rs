//! SQLite-backed document store and vector index.
//!
//! The [`Store`] owns the `paths`, `documents`, `chunks` and `chunk_vectors`
//! tables. It is created once at startup and shared as `Arc<Store>` by the
//! pipelines and the tool layer.
//!
//! # Concurrency
//!
//! Writers are serialized by an internal async mutex and every file is
//! written inside one transaction, so chunk rows and their vectors always
//! land (or vanish) together. Readers never take the mutex: the database
//! runs in WAL mode and each query reads from a committed snapshot, so a
//! query never observes a document with only some of its chunks.
//!
//! # Similarity
//!
//! Vectors are stored as little-endian f32 BLOBs. [`Store::query`] ranks
//! them by cosine distance (`1 - cosine_similarity`) in Rust, ascending,
//! breaking ties by `chunk_id`, and returns at most `limit` hits.

use sqlx::{Row, Sqlite, SqlitePool};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::debug;

use crate::config::Config;
use crate::db;
use crate::embedding::{blob_to_vec, cosine_similarity, vec_to_blob};
use crate::error::{Error, Result};
use crate::migrate;
use crate::models::{ChunkHit, Document, DocumentSummary, IndexedFile, StoreStats};

pub struct Store {
    pool: SqlitePool,
    dims: usize,
    write_lock: Mutex<()>,
}

impl Store {
    /// Open (creating if needed) the database named in `config`.
    pub async fn open(config: &Config) -> Result<Self> {
        Self::open_at(&config.db.path, config.embedding.dims).await
    }

    /// Open the database at `path`, checking that its vector index was
    /// built for `dims`-wide embeddings.
    pub async fn open_at(path: &Path, dims: usize) -> Result<Self> {
        let pool = db::connect(path).await?;
        if let Err(e) = migrate::run_migrations(&pool, dims).await {
            pool.close().await;
            return Err(e);
        }
        Ok(Self {
            pool,
            dims,
            write_lock: Mutex::new(()),
        })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// Write one file's path, document, chunk and vector rows atomically.
    ///
    /// The document row is overwritten and all of its previous chunks and
    /// vectors are replaced, so re-indexing an unchanged file leaves the
    /// same rows behind.
    pub async fn upsert_file(&self, file: &IndexedFile) -> Result<()> {
        for chunk in &file.chunks {
            if chunk.embedding.len() != self.dims {
                return Err(Error::InvalidArgument(format!(
                    "chunk {} has {} dimensions, index expects {}",
                    chunk.chunk_id,
                    chunk.embedding.len(),
                    self.dims
                )));
            }
            if chunk.doc_id != file.document.doc_id {
                return Err(Error::InvalidArgument(format!(
                    "chunk {} does not belong to document {}",
                    chunk.chunk_id, file.document.doc_id
                )));
            }
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;

        for path in &file.paths {
            sqlx::query(
                r#"
                INSERT INTO paths (path, is_directory, last_indexed)
                VALUES (?, ?, ?)
                ON CONFLICT(path) DO UPDATE SET
                    is_directory = excluded.is_directory,
                    last_indexed = excluded.last_indexed
                "#,
            )
            .bind(&path.path)
            .bind(path.is_directory)
            .bind(path.last_indexed)
            .execute(&mut *tx)
            .await?;
        }

        let doc = &file.document;
        sqlx::query(
            r#"
            INSERT INTO documents (doc_id, path, raw_text, last_modified)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(doc_id) DO UPDATE SET
                path = excluded.path,
                raw_text = excluded.raw_text,
                last_modified = excluded.last_modified
            "#,
        )
        .bind(&doc.doc_id)
        .bind(&doc.path)
        .bind(&doc.raw_text)
        .bind(doc.last_modified)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT chunk_id FROM chunks WHERE doc_id = ?)",
        )
        .bind(&doc.doc_id)
        .execute(&mut *tx)
        .await?;
        sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
            .bind(&doc.doc_id)
            .execute(&mut *tx)
            .await?;

        for chunk in &file.chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (chunk_id, doc_id, ordinal, start_offset, end_offset, text)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&chunk.chunk_id)
            .bind(&chunk.doc_id)
            .bind(chunk.ordinal as i64)
            .bind(chunk.start_offset as i64)
            .bind(chunk.end_offset as i64)
            .bind(&chunk.text)
            .execute(&mut *tx)
            .await?;

            sqlx::query("INSERT INTO chunk_vectors (chunk_id, embedding) VALUES (?, ?)")
                .bind(&chunk.chunk_id)
                .bind(vec_to_blob(&chunk.embedding))
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        debug!(doc_id = %doc.doc_id, chunks = file.chunks.len(), "stored document");
        Ok(())
    }

    /// The `limit` chunks nearest to `vector`, ascending by cosine distance.
    ///
    /// With `path_prefix`, only chunks of documents whose path starts with
    /// the prefix are eligible. The prefix is compared literally.
    pub async fn query(
        &self,
        vector: &[f32],
        limit: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<ChunkHit>> {
        self.check_width(vector)?;
        if limit == 0 {
            return Ok(Vec::new());
        }
        rank_chunks(&self.pool, vector, limit, path_prefix).await
    }

    /// Like [`Store::query`], but also returns the raw text of every hit's
    /// document, read in the same transaction as the ranking so offsets and
    /// text always come from one committed version of the document.
    pub async fn query_with_text(
        &self,
        vector: &[f32],
        limit: usize,
        path_prefix: Option<&str>,
    ) -> Result<Vec<(ChunkHit, Arc<str>)>> {
        self.check_width(vector)?;
        if limit == 0 {
            return Ok(Vec::new());
        }

        let mut tx = self.pool.begin().await?;
        let hits = rank_chunks(&mut *tx, vector, limit, path_prefix).await?;

        let mut texts: HashMap<String, Arc<str>> = HashMap::new();
        let mut results = Vec::with_capacity(hits.len());
        for hit in hits {
            let text = match texts.get(&hit.doc_id) {
                Some(text) => text.clone(),
                None => {
                    let raw: String =
                        sqlx::query_scalar("SELECT raw_text FROM documents WHERE doc_id = ?")
                            .bind(&hit.doc_id)
                            .fetch_one(&mut *tx)
                            .await?;
                    let text: Arc<str> = Arc::from(raw);
                    texts.insert(hit.doc_id.clone(), text.clone());
                    text
                }
            };
            results.push((hit, text));
        }
        tx.commit().await?;

        Ok(results)
    }

    fn check_width(&self, vector: &[f32]) -> Result<()> {
        if vector.len() != self.dims {
            return Err(Error::InvalidArgument(format!(
                "query vector has {} dimensions, index expects {}",
                vector.len(),
                self.dims
            )));
        }
        Ok(())
    }

    pub async fn get_document(&self, doc_id: &str) -> Result<Option<Document>> {
        let row = sqlx::query(
            "SELECT doc_id, path, raw_text, last_modified FROM documents WHERE doc_id = ?",
        )
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| Document {
            doc_id: r.get("doc_id"),
            path: r.get("path"),
            raw_text: r.get("raw_text"),
            last_modified: r.get("last_modified"),
        }))
    }

    /// Ids of stored documents whose path starts with `prefix`, sorted.
    pub async fn indexed_documents_under(&self, prefix: &str) -> Result<Vec<String>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT doc_id FROM documents WHERE substr(path, 1, length(?)) = ? ORDER BY doc_id",
        )
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&self.pool)
        .await?;
        Ok(ids)
    }

    /// Delete documents with their chunks, vectors and file path rows.
    ///
    /// Returns the number of documents removed.
    pub async fn remove_documents(&self, doc_ids: &[String]) -> Result<u64> {
        if doc_ids.is_empty() {
            return Ok(0);
        }

        let _guard = self.write_lock.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;

        for doc_id in doc_ids {
            let path: Option<String> =
                sqlx::query_scalar("SELECT path FROM documents WHERE doc_id = ?")
                    .bind(doc_id)
                    .fetch_optional(&mut *tx)
                    .await?;

            sqlx::query(
                "DELETE FROM chunk_vectors WHERE chunk_id IN (SELECT chunk_id FROM chunks WHERE doc_id = ?)",
            )
            .bind(doc_id)
            .execute(&mut *tx)
            .await?;
            sqlx::query("DELETE FROM chunks WHERE doc_id = ?")
                .bind(doc_id)
                .execute(&mut *tx)
                .await?;
            removed += sqlx::query("DELETE FROM documents WHERE doc_id = ?")
                .bind(doc_id)
                .execute(&mut *tx)
                .await?
                .rows_affected();

            if let Some(path) = path {
                sqlx::query(
                    "DELETE FROM paths WHERE path = ? AND is_directory = 0 AND NOT EXISTS (SELECT 1 FROM documents WHERE path = ?)",
                )
                .bind(&path)
                .bind(&path)
                .execute(&mut *tx)
                .await?;
            }
        }

        tx.commit().await?;
        Ok(removed)
    }

    /// Every document with its chunk count, ordered by path.
    pub async fn document_summaries(&self) -> Result<Vec<DocumentSummary>> {
        let rows = sqlx::query(
            r#"
            SELECT d.doc_id, d.path, d.last_modified, COUNT(c.chunk_id) AS chunk_count
            FROM documents d
            LEFT JOIN chunks c ON c.doc_id = d.doc_id
            GROUP BY d.doc_id
            ORDER BY d.path
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .iter()
            .map(|r| DocumentSummary {
                doc_id: r.get("doc_id"),
                path: r.get("path"),
                chunk_count: r.get("chunk_count"),
                last_modified: r.get("last_modified"),
            })
            .collect())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let paths: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM paths")
            .fetch_one(&self.pool)
            .await?;
        let documents: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents")
            .fetch_one(&self.pool)
            .await?;
        let chunks: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunks")
            .fetch_one(&self.pool)
            .await?;
        let vectors: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chunk_vectors")
            .fetch_one(&self.pool)
            .await?;

        Ok(StoreStats {
            paths,
            documents,
            chunks,
            vectors,
            embedding_dims: self.dims as i64,
        })
    }
}

/// Rank every eligible chunk against `vector` and keep the nearest `limit`.
async fn rank_chunks<'e, E>(
    executor: E,
    vector: &[f32],
    limit: usize,
    path_prefix: Option<&str>,
) -> Result<Vec<ChunkHit>>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let rows = sqlx::query(
        r#"
        SELECT c.chunk_id, c.doc_id, c.text, c.start_offset, cv.embedding
        FROM chunk_vectors cv
        JOIN chunks c ON c.chunk_id = cv.chunk_id
        JOIN documents d ON d.doc_id = c.doc_id
        WHERE ? IS NULL OR substr(d.path, 1, length(?)) = ?
        "#,
    )
    .bind(path_prefix)
    .bind(path_prefix)
    .bind(path_prefix)
    .fetch_all(executor)
    .await?;

    let mut hits: Vec<ChunkHit> = rows
        .iter()
        .map(|row| {
            let blob: Vec<u8> = row.get("embedding");
            let stored = blob_to_vec(&blob);
            let start: i64 = row.get("start_offset");
            ChunkHit {
                chunk_id: row.get("chunk_id"),
                doc_id: row.get("doc_id"),
                chunk_text: row.get("text"),
                start_offset: start.max(0) as usize,
                distance: 1.0 - cosine_similarity(vector, &stored),
            }
        })
        .collect();

    hits.sort_by(|a, b| {
        a.distance
            .total_cmp(&b.distance)
            .then_with(|| a.chunk_id.cmp(&b.chunk_id))
    });
    hits.truncate(limit);

    Ok(hits)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Chunk, PathRecord};
    use tempfile::TempDir;

    fn file(doc_id: &str, texts: &[(&str, Vec<f32>)]) -> IndexedFile {
        let mut offset = 0;
        let chunks = texts
            .iter()
            .enumerate()
            .map(|(i, (text, emb))| {
                let c = Chunk {
                    chunk_id: format!("{}-{}", doc_id, i),
                    doc_id: doc_id.to_string(),
                    ordinal: i,
                    start_offset: offset,
                    end_offset: offset + text.chars().count(),
                    text: text.to_string(),
                    embedding: emb.clone(),
                };
                offset += text.chars().count();
                c
            })
            .collect();
        IndexedFile {
            paths: vec![PathRecord {
                path: doc_id.to_string(),
                is_directory: false,
                last_indexed: 1,
            }],
            document: Document {
                doc_id: doc_id.to_string(),
                path: doc_id.to_string(),
                raw_text: texts.iter().map(|(t, _)| *t).collect(),
                last_modified: 1,
            },
            chunks,
        }
    }

    #[tokio::test]
    async fn test_upsert_replaces_chunks() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open_at(&tmp.path().join("s.sqlite"), 2).await.unwrap();

        store
            .upsert_file(&file("/a.md", &[("one", vec![1.0, 0.0]), ("two", vec![0.0, 1.0])]))
            .await
            .unwrap();
        store
            .upsert_file(&file("/a.md", &[("only", vec![1.0, 0.0])]))
            .await
            .unwrap();

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.vectors, 1);
        assert_eq!(
            store.get_document("/a.md").await.unwrap().unwrap().raw_text,
            "only"
        );
    }

    #[tokio::test]
    async fn test_query_orders_by_distance_then_id() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open_at(&tmp.path().join("s.sqlite"), 2).await.unwrap();
        store
            .upsert_file(&file("/b.md", &[("same", vec![1.0, 0.0])]))
            .await
            .unwrap();
        store
            .upsert_file(&file("/a.md", &[("same", vec![1.0, 0.0]), ("far", vec![0.0, 1.0])]))
            .await
            .unwrap();

        let hits = store.query(&[1.0, 0.0], 10, None).await.unwrap();
        let ids: Vec<&str> = hits.iter().map(|h| h.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["/a.md-0", "/b.md-0", "/a.md-1"]);
        assert!(hits[0].distance.abs() < 1e-6);
        assert!((hits[2].distance - 1.0).abs() < 1e-6);

        let limited = store.query(&[1.0, 0.0], 1, None).await.unwrap();
        assert_eq!(limited.len(), 1);
    }

    #[tokio::test]
    async fn test_query_with_text_pairs_hits_with_their_document() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open_at(&tmp.path().join("s.sqlite"), 2).await.unwrap();
        store
            .upsert_file(&file("/a.md", &[("near", vec![1.0, 0.0]), ("far", vec![0.0, 1.0])]))
            .await
            .unwrap();
        store
            .upsert_file(&file("/b.md", &[("mid", vec![1.0, 1.0])]))
            .await
            .unwrap();

        let results = store.query_with_text(&[1.0, 0.0], 10, None).await.unwrap();
        assert_eq!(results.len(), 3);
        for (hit, text) in &results {
            let doc = store.get_document(&hit.doc_id).await.unwrap().unwrap();
            assert_eq!(&**text, doc.raw_text.as_str());
        }
        // Hits of one document share a single copy of its text.
        let a: Vec<&Arc<str>> = results
            .iter()
            .filter(|(h, _)| h.doc_id == "/a.md")
            .map(|(_, t)| t)
            .collect();
        assert!(Arc::ptr_eq(a[0], a[1]));

        assert!(store.query_with_text(&[1.0, 0.0], 0, None).await.unwrap().is_empty());
        assert!(matches!(
            store.query_with_text(&[1.0], 5, None).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_query_prefix_is_literal() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open_at(&tmp.path().join("s.sqlite"), 2).await.unwrap();
        store
            .upsert_file(&file("/docs_1/a.md", &[("x", vec![1.0, 0.0])]))
            .await
            .unwrap();
        store
            .upsert_file(&file("/docsX1/b.md", &[("y", vec![1.0, 0.0])]))
            .await
            .unwrap();

        // '_' would be a LIKE wildcard; the prefix must match literally.
        let hits = store.query(&[1.0, 0.0], 10, Some("/docs_1/")).await.unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, "/docs_1/a.md");
    }

    #[tokio::test]
    async fn test_wrong_width_rejected() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open_at(&tmp.path().join("s.sqlite"), 3).await.unwrap();
        assert!(matches!(
            store.query(&[1.0], 5, None).await,
            Err(Error::InvalidArgument(_))
        ));
        assert!(matches!(
            store.upsert_file(&file("/a.md", &[("x", vec![1.0])])).await,
            Err(Error::InvalidArgument(_))
        ));
    }

    #[tokio::test]
    async fn test_dims_mismatch_detected_at_open() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("s.sqlite");
        let store = Store::open_at(&path, 4).await.unwrap();
        store.close().await;

        assert!(matches!(
            Store::open_at(&path, 8).await,
            Err(Error::Config(_))
        ));
        assert!(Store::open_at(&path, 4).await.is_ok());
    }

    #[tokio::test]
    async fn test_remove_documents() {
        let tmp = TempDir::new().unwrap();
        let store = Store::open_at(&tmp.path().join("s.sqlite"), 2).await.unwrap();
        store
            .upsert_file(&file("/r/a.md", &[("x", vec![1.0, 0.0])]))
            .await
            .unwrap();
        store
            .upsert_file(&file("/r/b.md", &[("y", vec![0.0, 1.0])]))
            .await
            .unwrap();

        assert_eq!(
            store.indexed_documents_under("/r/").await.unwrap(),
            vec!["/r/a.md".to_string(), "/r/b.md".to_string()]
        );
        let removed = store
            .remove_documents(&["/r/a.md".to_string()])
            .await
            .unwrap();
        assert_eq!(removed, 1);

        let stats = store.stats().await.unwrap();
        assert_eq!(stats.documents, 1);
        assert_eq!(stats.chunks, 1);
        assert_eq!(stats.vectors, 1);
        assert_eq!(stats.paths, 1);
    }
}
