//! Directory crawler and text extractor.
//!
//! [`crawl`] lists every file under a root, whatever its type. [`extract`]
//! decides per file whether it is indexable text: only the suffixes in
//! [`TEXT_EXTENSIONS`] are read, everything else yields `Ok(None)` and is
//! skipped by the ingestion pipeline.

use std::path::{Path, PathBuf};

use walkdir::WalkDir;

use crate::error::{Error, Result};

/// File suffixes treated as plain text.
pub const TEXT_EXTENSIONS: &[&str] = &["md", "txt"];

/// Recursively enumerate all files under `root` as absolute paths.
///
/// Traversal is depth-first; order within a directory is not part of the
/// contract. Symlinks are not followed. Any unreadable entry fails the
/// whole crawl.
pub fn crawl(root: &Path) -> Result<Vec<PathBuf>> {
    let root = std::path::absolute(root).map_err(|e| Error::io(root, e))?;
    let meta = std::fs::metadata(&root).map_err(|e| Error::io(&root, e))?;
    if !meta.is_dir() {
        return Err(Error::io(&root, std::io::Error::other("not a directory")));
    }

    let mut files = Vec::new();
    for entry in WalkDir::new(&root).follow_links(false) {
        let entry = entry.map_err(|e| {
            let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.clone());
            let source = e
                .into_io_error()
                .unwrap_or_else(|| std::io::Error::other("filesystem loop detected"));
            Error::io(path, source)
        })?;
        if entry.file_type().is_file() {
            files.push(entry.into_path());
        }
    }

    Ok(files)
}

/// Whether `path` carries one of the [`TEXT_EXTENSIONS`].
pub fn is_supported(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| TEXT_EXTENSIONS.contains(&ext))
        .unwrap_or(false)
}

/// Return the file's text, or `None` when its suffix is not supported.
///
/// Unreadable or non-UTF-8 files are an [`Error::Io`].
pub fn extract(path: &Path) -> Result<Option<String>> {
    if !is_supported(path) {
        return Ok(None);
    }
    std::fs::read_to_string(path)
        .map(Some)
        .map_err(|e| Error::io(path, e))
}
