//! Fixed-size overlapping text chunker.
//!
//! Splits text into windows of `chunk_size` chars, advancing by
//! `chunk_size - overlap` each step. The window shorter than `chunk_size`
//! is the last one. Offsets are measured in chars so slicing never lands
//! inside a UTF-8 sequence.

use crate::error::{Error, Result};

/// One window produced by [`chunk_text`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextWindow {
    pub offset: usize,
    pub text: String,
}

/// Split `text` into ordered, overlapping windows.
///
/// Empty text yields no windows. Fails with [`Error::InvalidArgument`] when
/// `chunk_size` is zero or `overlap >= chunk_size`.
pub fn chunk_text(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<TextWindow>> {
    let step = chunk_step(chunk_size, overlap)?;

    // Byte index of every char boundary, plus the end of the string.
    let boundaries: Vec<usize> = text
        .char_indices()
        .map(|(i, _)| i)
        .chain(std::iter::once(text.len()))
        .collect();
    let char_len = boundaries.len() - 1;

    let mut windows = Vec::new();
    let mut offset = 0;
    while offset < char_len {
        let end = (offset + chunk_size).min(char_len);
        windows.push(TextWindow {
            offset,
            text: text[boundaries[offset]..boundaries[end]].to_string(),
        });
        if end - offset < chunk_size {
            break;
        }
        offset += step;
    }

    Ok(windows)
}

/// Distance between consecutive window offsets.
pub fn chunk_step(chunk_size: usize, overlap: usize) -> Result<usize> {
    if chunk_size == 0 {
        return Err(Error::InvalidArgument("chunk size must be > 0".to_string()));
    }
    if overlap >= chunk_size {
        return Err(Error::InvalidArgument(format!(
            "overlap ({}) must be smaller than chunk size ({})",
            overlap, chunk_size
        )));
    }
    Ok(chunk_size - overlap)
}

/// Chunk identity: the document id followed by the ordinal.
pub fn chunk_id(doc_id: &str, ordinal: usize) -> String {
    format!("{}-{}", doc_id, ordinal)
}
