//! Document splitting.
//!
//! Documents are cut into semantic segments with `semchunk-rs`, sized in characters. Adjacent
//! segments then receive a sliding overlap taken from the tail of their predecessor, trimmed so
//! no chunk exceeds the budget. Finally, exact duplicates across the run are dropped and each
//! surviving chunk is numbered `<source>_<ordinal>` in corpus order.

use crate::document::{Chunk, Document};
use semchunk_rs::Chunker;
use sha2::{Digest, Sha256};
use std::collections::HashSet;
use thiserror::Error;

/// Splitter configuration errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ChunkingError {
    /// A chunk budget of zero characters cannot hold any text.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Character budgets for the splitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitSettings {
    /// Maximum characters per chunk.
    pub chunk_size: usize,
    /// Characters carried over from the previous chunk.
    pub chunk_overlap: usize,
}

/// Split `documents` into chunks carrying their parent's provenance.
pub fn split_documents(
    documents: Vec<Document>,
    settings: SplitSettings,
) -> Result<Vec<Chunk>, ChunkingError> {
    if settings.chunk_size == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }

    let chunker = Chunker::new(settings.chunk_size, Box::new(char_count));
    let mut seen = HashSet::new();
    let mut skipped = 0_usize;
    let mut chunks = Vec::new();

    for document in documents {
        if document.text.trim().is_empty() {
            continue;
        }
        let pieces = apply_overlap(
            chunker.chunk(&document.text),
            settings.chunk_size,
            settings.chunk_overlap,
        );
        for text in pieces {
            if text.trim().is_empty() {
                continue;
            }
            if !seen.insert(digest(&text)) {
                skipped += 1;
                continue;
            }
            chunks.push(Chunk {
                text,
                metadata: document.metadata.clone(),
            });
        }
    }

    for (ordinal, chunk) in chunks.iter_mut().enumerate() {
        if chunk.metadata.chunk_id.is_empty() {
            chunk.metadata.chunk_id = format!("{}_{ordinal}", chunk.metadata.source);
        }
    }

    if skipped > 0 {
        tracing::debug!(skipped, "Dropped duplicate chunks");
    }
    tracing::info!(
        chunks = chunks.len(),
        chunk_size = settings.chunk_size,
        chunk_overlap = settings.chunk_overlap,
        "Split documents"
    );
    Ok(chunks)
}

fn char_count(segment: &str) -> usize {
    segment.chars().count()
}

fn digest(text: &str) -> String {
    hex::encode(Sha256::digest(text.as_bytes()))
}

fn apply_overlap(pieces: Vec<String>, chunk_size: usize, overlap: usize) -> Vec<String> {
    let overlap = overlap.min(chunk_size.saturating_sub(1));
    if overlap == 0 || pieces.len() < 2 {
        return pieces;
    }

    let mut result = Vec::with_capacity(pieces.len());
    let mut previous: Option<String> = None;
    for current in pieces {
        let combined = match &previous {
            Some(prev) => join_with_tail(prev, &current, overlap, chunk_size),
            None => current.clone(),
        };
        result.push(combined);
        previous = Some(current);
    }
    result
}

fn join_with_tail(previous: &str, current: &str, overlap: usize, chunk_size: usize) -> String {
    let tail = char_suffix(previous, overlap).trim_start();
    let mut combined = String::with_capacity(tail.len() + current.len() + 1);
    if !tail.is_empty() {
        combined.push_str(tail);
        let needs_space = !tail.ends_with(char::is_whitespace)
            && !current.starts_with(char::is_whitespace);
        if needs_space {
            combined.push(' ');
        }
    }
    combined.push_str(current);

    if char_count(&combined) <= chunk_size {
        combined
    } else {
        char_suffix(&combined, chunk_size).trim_start().to_string()
    }
}

// Last `limit` characters of `text`, on a char boundary.
fn char_suffix(text: &str, limit: usize) -> &str {
    let total = char_count(text);
    if total <= limit {
        return text;
    }
    let start = text
        .char_indices()
        .nth(total - limit)
        .map_or(text.len(), |(offset, _)| offset);
    &text[start..]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::ChunkMetadata;

    fn document(source: &str, text: &str) -> Document {
        Document {
            text: text.into(),
            metadata: ChunkMetadata {
                source: source.into(),
                page: Some(0),
                ..ChunkMetadata::default()
            },
        }
    }

    #[test]
    fn zero_chunk_size_is_rejected() {
        let settings = SplitSettings {
            chunk_size: 0,
            chunk_overlap: 0,
        };
        assert_eq!(
            split_documents(vec![document("a", "text")], settings),
            Err(ChunkingError::InvalidChunkSize)
        );
    }

    #[test]
    fn chunks_respect_budget_and_carry_overlap() {
        let text = "Revenue grew in the first quarter. Margins expanded on lower costs. \
                    Guidance for the year was raised. The board approved a buyback.";
        let settings = SplitSettings {
            chunk_size: 40,
            chunk_overlap: 10,
        };
        let chunks = split_documents(vec![document("report.pdf", text)], settings).expect("split");

        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.text.chars().count() <= 40, "chunk too long: {:?}", chunk.text);
            assert_eq!(chunk.metadata.page, Some(0));
        }
    }

    #[test]
    fn ids_are_sequential_across_documents_and_duplicates_dropped() {
        let settings = SplitSettings {
            chunk_size: 1000,
            chunk_overlap: 200,
        };
        let chunks = split_documents(
            vec![
                document("a.pdf", "Alpha page."),
                document("b.pdf", "Alpha page."),
                document("b.pdf", "Beta page."),
            ],
            settings,
        )
        .expect("split");

        let ids: Vec<_> = chunks.iter().map(|c| c.metadata.chunk_id.as_str()).collect();
        assert_eq!(ids, vec!["a.pdf_0", "b.pdf_1"]);
    }

    #[test]
    fn char_suffix_is_boundary_safe() {
        assert_eq!(char_suffix("añob", 2), "ob");
        assert_eq!(char_suffix("ñ", 5), "ñ");
        assert_eq!(join_with_tail("one two", "three", 3, 100), "two three");
    }
}
