//! Index statistics.
//!
//! Prints what is indexed: path, document, chunk and vector counts, the
//! embedding width the index is pinned to, and a per-directory breakdown.
//! Used by `ldocs stats`.

use anyhow::Result;
use std::collections::BTreeMap;
use std::path::Path;

use crate::config::Config;
use crate::store::Store;

#[derive(Default)]
struct DirStats {
    doc_count: i64,
    chunk_count: i64,
    last_modified: i64,
}

/// Run the stats command: query the database and print a summary.
pub async fn run_stats(config: &Config) -> Result<()> {
    let store = Store::open(config).await?;
    let stats = store.stats().await?;

    let db_size = std::fs::metadata(&config.db.path)
        .map(|m| m.len())
        .unwrap_or(0);

    println!("Local Docs: Index Stats");
    println!("=======================");
    println!();
    println!("  Database:    {}", config.db.path.display());
    println!("  Size:        {}", format_bytes(db_size));
    println!("  Dimensions:  {}", stats.embedding_dims);
    println!();
    println!("  Paths:       {}", stats.paths);
    println!("  Documents:   {}", stats.documents);
    println!("  Chunks:      {}", stats.chunks);
    println!(
        "  Embedded:    {} / {} ({}%)",
        stats.vectors,
        stats.chunks,
        if stats.chunks > 0 {
            (stats.vectors * 100) / stats.chunks
        } else {
            0
        }
    );

    let dirs = directory_stats(&store).await?;
    if !dirs.is_empty() {
        println!();
        println!("  By directory:");
        println!(
            "  {:<48} {:>6} {:>8}   {}",
            "DIRECTORY", "DOCS", "CHUNKS", "LAST MODIFIED"
        );
        println!("  {}", "-".repeat(80));
        for (directory, d) in &dirs {
            println!(
                "  {:<48} {:>6} {:>8}   {}",
                directory,
                d.doc_count,
                d.chunk_count,
                format_ts_relative(d.last_modified)
            );
        }
    }

    println!();
    store.close().await;
    Ok(())
}

/// Documents and chunks grouped by parent directory, sorted by directory.
async fn directory_stats(store: &Store) -> Result<Vec<(String, DirStats)>> {
    let mut dirs: BTreeMap<String, DirStats> = BTreeMap::new();
    for doc in store.document_summaries().await? {
        let directory = Path::new(&doc.path)
            .parent()
            .map(|p| p.display().to_string())
            .unwrap_or_default();
        let entry = dirs.entry(directory).or_default();
        entry.doc_count += 1;
        entry.chunk_count += doc.chunk_count;
        entry.last_modified = entry.last_modified.max(doc.last_modified);
    }
    Ok(dirs.into_iter().collect())
}

/// Format a byte count as a human-readable string.
fn format_bytes(bytes: u64) -> String {
    if bytes < 1024 {
        format!("{} B", bytes)
    } else if bytes < 1024 * 1024 {
        format!("{:.1} KB", bytes as f64 / 1024.0)
    } else if bytes < 1024 * 1024 * 1024 {
        format!("{:.1} MB", bytes as f64 / (1024.0 * 1024.0))
    } else {
        format!("{:.2} GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    }
}

/// Format a Unix timestamp relative to now (e.g. "3 hours ago").
fn format_ts_relative(ts: i64) -> String {
    let delta = chrono::Utc::now().timestamp() - ts;
    if delta < 0 {
        return format_ts_iso(ts);
    }
    match delta {
        d if d < 60 => "just now".to_string(),
        d if d < 3600 => plural(d / 60, "min"),
        d if d < 86400 => plural(d / 3600, "hour"),
        d if d < 86400 * 30 => plural(d / 86400, "day"),
        _ => format_ts_iso(ts),
    }
}

fn plural(n: i64, unit: &str) -> String {
    format!("{} {}{} ago", n, unit, if n == 1 { "" } else { "s" })
}

fn format_ts_iso(ts: i64) -> String {
    chrono::DateTime::from_timestamp(ts, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M").to_string())
        .unwrap_or_else(|| ts.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.0 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.0 MB");
    }

    #[test]
    fn test_format_ts_relative() {
        let now = chrono::Utc::now().timestamp();
        assert_eq!(format_ts_relative(now), "just now");
        assert_eq!(format_ts_relative(now - 7200), "2 hours ago");
        assert_eq!(format_ts_relative(now - 86400), "1 day ago");
    }
}
