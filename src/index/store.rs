//! On-disk persistence for built indexes.
//!
//! Layout under the index directory:
//! - `index.json` – serialized [`VectorIndex`]
//! - `metadata.json` – the embedding provider, model, and vector dimension the index was built with
//!
//! Files are written to a temporary sibling and renamed into place so a crash mid-write never
//! leaves a truncated index behind.

use super::{EmbeddingIdentity, IndexError, VectorIndex};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use time::OffsetDateTime;

const INDEX_FILE: &str = "index.json";
const METADATA_FILE: &str = "metadata.json";

/// Metadata record used for the compatibility check on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexMetadata {
    /// Embedding provider label (for example `openai`).
    pub provider: String,
    /// Embedding model identifier.
    pub model: String,
    /// Build time, absent in metadata written by older builds.
    #[serde(default, with = "time::serde::rfc3339::option")]
    pub created_at: Option<OffsetDateTime>,
    /// Number of indexed chunks, absent in metadata written by older builds.
    #[serde(default)]
    pub chunk_count: Option<usize>,
    /// Vector dimension, absent in metadata written by older builds.
    #[serde(default)]
    pub dimension: Option<usize>,
}

impl IndexMetadata {
    /// Metadata describing `index`, built at `created_at` with `identity`.
    pub fn new(identity: &EmbeddingIdentity, created_at: OffsetDateTime, index: &VectorIndex) -> Self {
        Self {
            provider: identity.provider.as_str().to_string(),
            model: identity.model.clone(),
            created_at: Some(created_at),
            chunk_count: Some(index.len()),
            dimension: Some(index.dimension()),
        }
    }
}

/// Directory-backed index persistence.
#[derive(Debug, Clone)]
pub struct IndexStore {
    dir: PathBuf,
}

impl IndexStore {
    /// Address an index directory; nothing is touched until a read or write.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Index directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Persist `index` and its metadata, creating the directory as needed.
    pub fn save(&self, index: &VectorIndex, metadata: &IndexMetadata) -> Result<(), IndexError> {
        fs::create_dir_all(&self.dir).map_err(|source| IndexError::Io {
            path: self.dir.clone(),
            source,
        })?;
        write_json(&self.dir.join(INDEX_FILE), index)?;
        write_json(&self.dir.join(METADATA_FILE), metadata)?;
        tracing::info!(
            path = %self.dir.display(),
            chunks = index.len(),
            provider = %metadata.provider,
            model = %metadata.model,
            dimension = index.dimension(),
            "Index saved"
        );
        Ok(())
    }

    /// Read the metadata record, `None` when the index predates metadata files.
    pub fn load_metadata(&self) -> Result<Option<IndexMetadata>, IndexError> {
        self.ensure_exists()?;
        let path = self.dir.join(METADATA_FILE);
        if !path.exists() {
            return Ok(None);
        }
        read_json(&path).map(Some)
    }

    /// Read the serialized index.
    pub fn load_index(&self) -> Result<VectorIndex, IndexError> {
        self.ensure_exists()?;
        let index: VectorIndex = read_json(&self.dir.join(INDEX_FILE))?;
        tracing::info!(path = %self.dir.display(), chunks = index.len(), "Index loaded");
        Ok(index)
    }

    fn ensure_exists(&self) -> Result<(), IndexError> {
        if self.dir.is_dir() {
            Ok(())
        } else {
            Err(IndexError::NotFound(self.dir.clone()))
        }
    }
}

fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), IndexError> {
    let bytes = serde_json::to_vec(value).map_err(|source| IndexError::Corrupt {
        path: path.to_path_buf(),
        source,
    })?;
    let staging = path.with_extension("json.tmp");
    fs::write(&staging, bytes).map_err(|source| IndexError::Io {
        path: staging.clone(),
        source,
    })?;
    fs::rename(&staging, path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, IndexError> {
    let bytes = fs::read(path).map_err(|source| IndexError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    serde_json::from_slice(&bytes).map_err(|source| IndexError::Corrupt {
        path: path.to_path_buf(),
        source,
    })
}
