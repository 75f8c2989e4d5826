//! Documents and chunks flowing from the corpus loader into the index.

use serde::{Deserialize, Serialize};

/// One unit of extracted corpus text (a PDF page or a whole text file).
#[derive(Debug, Clone, PartialEq)]
pub struct Document {
    /// Extracted text.
    pub text: String,
    /// Origin of the text.
    pub metadata: ChunkMetadata,
}

/// Provenance carried by every chunk and surfaced in citations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkMetadata {
    /// Path of the source file.
    pub source: String,
    /// Stable chunk identifier, `<source>_<ordinal>` unless the loader supplied one.
    #[serde(default)]
    pub chunk_id: String,
    /// Zero-based page number for paginated sources.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page: Option<u32>,
    /// Section heading when the source exposes one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub section: Option<String>,
}

/// Indexable slice of a document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    /// Chunk text.
    pub text: String,
    /// Provenance inherited from the parent document.
    pub metadata: ChunkMetadata,
}
