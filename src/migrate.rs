//! Idempotent schema migrations.
//!
//! Creates the `paths`, `documents`, `chunks` tables, the `chunk_vectors`
//! vector index keyed by `chunk_id`, and `index_meta`, which pins the
//! embedding width the index was created with.

use sqlx::SqlitePool;

use crate::error::{Error, Result};

const DIMS_KEY: &str = "embedding_dims";

pub async fn run_migrations(pool: &SqlitePool, dims: usize) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS paths (
            path TEXT PRIMARY KEY,
            is_directory INTEGER NOT NULL,
            last_indexed INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            doc_id TEXT PRIMARY KEY,
            path TEXT NOT NULL,
            raw_text TEXT NOT NULL,
            last_modified INTEGER NOT NULL,
            FOREIGN KEY (path) REFERENCES paths(path)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunks (
            chunk_id TEXT PRIMARY KEY,
            doc_id TEXT NOT NULL,
            ordinal INTEGER NOT NULL,
            start_offset INTEGER NOT NULL,
            end_offset INTEGER NOT NULL,
            text TEXT NOT NULL,
            UNIQUE(doc_id, ordinal),
            FOREIGN KEY (doc_id) REFERENCES documents(doc_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS chunk_vectors (
            chunk_id TEXT PRIMARY KEY,
            embedding BLOB NOT NULL,
            FOREIGN KEY (chunk_id) REFERENCES chunks(chunk_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS index_meta (
            key TEXT PRIMARY KEY,
            value TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_chunks_doc_id ON chunks(doc_id)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_documents_path ON documents(path)")
        .execute(pool)
        .await?;

    check_dims(pool, dims).await
}

/// Pin the embedding width on first use; refuse to open an index built
/// with a different width.
async fn check_dims(pool: &SqlitePool, dims: usize) -> Result<()> {
    sqlx::query("INSERT OR IGNORE INTO index_meta (key, value) VALUES (?, ?)")
        .bind(DIMS_KEY)
        .bind(dims.to_string())
        .execute(pool)
        .await?;

    let stored: String = sqlx::query_scalar("SELECT value FROM index_meta WHERE key = ?")
        .bind(DIMS_KEY)
        .fetch_one(pool)
        .await?;

    let stored_dims: usize = stored
        .parse()
        .map_err(|_| Error::Config(format!("corrupt {} value: {}", DIMS_KEY, stored)))?;

    if stored_dims != dims {
        return Err(Error::Config(format!(
            "vector index was created with {} dimensions but embedding.dims is {}",
            stored_dims, dims
        )));
    }
    Ok(())
}
