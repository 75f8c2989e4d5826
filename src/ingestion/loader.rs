//! Corpus discovery and text extraction.

use crate::document::{ChunkMetadata, Document};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

/// Failures while reading the corpus directory.
#[derive(Debug, Error)]
pub enum LoaderError {
    /// Corpus directory does not exist.
    #[error("Data directory not found: {}", .0.display())]
    SourceNotFound(PathBuf),
    /// A corpus file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// A PDF could not be parsed.
    #[error("Failed to extract text from {}: {message}", path.display())]
    Pdf {
        /// Offending PDF.
        path: PathBuf,
        /// Extractor message.
        message: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceKind {
    Pdf,
    Text,
}

impl SourceKind {
    fn detect(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "pdf" => Some(Self::Pdf),
            "txt" | "md" => Some(Self::Text),
            _ => None,
        }
    }
}

/// Read every supported file directly inside `dir` (PDF pages, `.txt`, `.md`), sorted by path.
///
/// Subdirectories are not descended into. A path that exists but is not a directory yields no
/// documents.
pub fn load_documents(dir: &Path) -> Result<Vec<Document>, LoaderError> {
    if !dir.exists() {
        return Err(LoaderError::SourceNotFound(dir.to_path_buf()));
    }

    let mut files: Vec<(PathBuf, SourceKind)> = WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(error) => {
                tracing::warn!(error = %error, "Skipping unreadable corpus entry");
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| {
            let kind = SourceKind::detect(entry.path())?;
            Some((entry.into_path(), kind))
        })
        .collect();
    files.sort_by(|left, right| left.0.cmp(&right.0));

    let mut documents = Vec::new();
    for (path, kind) in &files {
        let before = documents.len();
        match kind {
            SourceKind::Pdf => documents.extend(load_pdf(path)?),
            SourceKind::Text => documents.extend(load_text(path)?),
        }
        tracing::debug!(path = %path.display(), documents = documents.len() - before, "Loaded corpus file");
    }

    tracing::info!(
        dir = %dir.display(),
        files = files.len(),
        documents = documents.len(),
        "Loaded corpus"
    );
    Ok(documents)
}

fn load_pdf(path: &Path) -> Result<Vec<Document>, LoaderError> {
    let bytes = read_bytes(path)?;
    let pages =
        pdf_extract::extract_text_from_mem_by_pages(&bytes).map_err(|error| LoaderError::Pdf {
            path: path.to_path_buf(),
            message: error.to_string(),
        })?;
    let source = path.display().to_string();

    Ok(pages
        .into_iter()
        .enumerate()
        .filter(|(_, text)| !text.trim().is_empty())
        .map(|(page, text)| Document {
            text,
            metadata: ChunkMetadata {
                source: source.clone(),
                page: u32::try_from(page).ok(),
                ..ChunkMetadata::default()
            },
        })
        .collect())
}

fn load_text(path: &Path) -> Result<Vec<Document>, LoaderError> {
    let bytes = read_bytes(path)?;
    let text = String::from_utf8_lossy(&bytes).into_owned();
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let is_markdown = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("md"));
    let section = if is_markdown { first_heading(&text) } else { None };

    Ok(vec![Document {
        text,
        metadata: ChunkMetadata {
            source: path.display().to_string(),
            section,
            ..ChunkMetadata::default()
        },
    }])
}

// Markdown files surface their first `#` heading as the citation section.
fn first_heading(text: &str) -> Option<String> {
    text.lines()
        .map(str::trim)
        .find(|line| line.starts_with('#'))
        .map(|line| line.trim_start_matches('#').trim().to_string())
        .filter(|heading| !heading.is_empty())
}

fn read_bytes(path: &Path) -> Result<Vec<u8>, LoaderError> {
    fs::read(path).map_err(|source| LoaderError::Read {
        path: path.to_path_buf(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_directory_is_source_not_found() {
        let dir = tempfile::tempdir().expect("tempdir");
        let error = load_documents(&dir.path().join("nope")).expect_err("missing");
        assert!(matches!(error, LoaderError::SourceNotFound(_)));
        assert!(error.to_string().starts_with("Data directory not found"));
    }

    #[test]
    fn reads_supported_files_without_recursing() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("b.txt"), "Revenue grew 12%.").expect("write");
        fs::write(dir.path().join("a.md"), "# Outlook\n\nGuidance raised.").expect("write");
        fs::write(dir.path().join("ignored.csv"), "x,y").expect("write");
        fs::write(dir.path().join("empty.txt"), "   ").expect("write");
        fs::create_dir(dir.path().join("nested")).expect("mkdir");
        fs::write(dir.path().join("nested").join("deep.txt"), "hidden").expect("write");

        let documents = load_documents(dir.path()).expect("load");

        assert_eq!(documents.len(), 2);
        assert!(documents[0].metadata.source.ends_with("a.md"));
        assert_eq!(documents[0].metadata.section.as_deref(), Some("Outlook"));
        assert!(documents[1].metadata.source.ends_with("b.txt"));
        assert_eq!(documents[1].metadata.section, None);
        assert_eq!(documents[1].text, "Revenue grew 12%.");
    }

    #[test]
    fn file_path_and_empty_directory_yield_nothing() {
        let dir = tempfile::tempdir().expect("tempdir");
        assert!(load_documents(dir.path()).expect("empty dir").is_empty());

        let file = dir.path().join("single.txt");
        fs::write(&file, "content").expect("write");
        assert!(load_documents(&file).expect("file path").is_empty());
    }

    #[test]
    fn unparseable_pdf_is_reported() {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::write(dir.path().join("broken.pdf"), b"not a pdf").expect("write");
        let error = load_documents(dir.path()).expect_err("broken pdf");
        assert!(matches!(error, LoaderError::Pdf { .. }));
    }
}
