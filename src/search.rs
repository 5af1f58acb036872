//! Retrieval pipeline: embed the query, rank stored chunks, assemble results.

use std::path::MAIN_SEPARATOR;
use std::time::Duration;

use crate::embedding::{embed_with_timeout, EmbeddingProvider};
use crate::error::{Error, Result};
use crate::models::SearchResultItem;
use crate::store::Store;

/// Run a similarity search.
///
/// Results come back nearest first, at most `limit` of them. With
/// `path_prefix`, only documents whose path starts with the prefix are
/// searched; a relative prefix is resolved against the working directory
/// the same way [`index_directory`](crate::ingest::index_directory)
/// resolves its root. No matches is an empty list, not an error.
pub async fn search(
    store: &Store,
    provider: &dyn EmbeddingProvider,
    query: &str,
    path_prefix: Option<&str>,
    limit: usize,
    timeout: Duration,
) -> Result<Vec<SearchResultItem>> {
    if query.trim().is_empty() {
        return Err(Error::InvalidArgument("query must not be empty".to_string()));
    }
    if limit == 0 {
        return Err(Error::InvalidArgument("limit must be >= 1".to_string()));
    }
    let path_prefix = match path_prefix.filter(|p| !p.is_empty()) {
        Some(p) => Some(absolute_prefix(p)?),
        None => None,
    };

    let vector = embed_with_timeout(provider, query, timeout).await?;
    let hits = store
        .query_with_text(&vector, limit, path_prefix.as_deref())
        .await?;

    Ok(hits
        .into_iter()
        .map(|(hit, raw_text)| SearchResultItem {
            doc_id: hit.doc_id,
            before: text_before(&raw_text, hit.start_offset),
            matched: hit.chunk_text,
            text: raw_text.to_string(),
        })
        .collect())
}

/// Resolve `prefix` to an absolute path string, keeping a trailing separator.
pub fn absolute_prefix(prefix: &str) -> Result<String> {
    let mut resolved = std::path::absolute(prefix)
        .map_err(|e| Error::io(prefix, e))?
        .display()
        .to_string();
    let wants_separator = prefix.ends_with('/') || prefix.ends_with(MAIN_SEPARATOR);
    if wants_separator && !resolved.ends_with(MAIN_SEPARATOR) {
        resolved.push(MAIN_SEPARATOR);
    }
    Ok(resolved)
}

/// The first `offset` chars of `text` (all of it if shorter).
pub fn text_before(text: &str, offset: usize) -> String {
    match text.char_indices().nth(offset) {
        Some((byte, _)) => text[..byte].to_string(),
        None => text.to_string(),
    }
}
