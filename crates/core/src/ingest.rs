use crate::chunking::{build_chunks, ChunkingConfig};
use crate::error::{ChunkingError, ExtractionError};
use crate::models::{Chunk, Document};
use crate::traits::TextExtractor;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};
use walkdir::WalkDir;

pub fn discover_pdf_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let is_pdf = entry
            .path()
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("pdf"));

        if is_pdf {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

impl Document {
    pub fn from_path(path: &Path) -> Result<Self, ExtractionError> {
        let bytes = fs::read(path)?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self { filename, bytes })
    }
}

#[derive(Debug, Clone)]
pub struct SkippedDocument {
    pub filename: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub chunks: Vec<Chunk>,
    pub indexed_documents: Vec<String>,
    pub skipped_documents: Vec<SkippedDocument>,
}

/// Extracts and chunks every document. A document that fails extraction is
/// recorded in `skipped_documents` and the rest of the batch proceeds.
pub fn ingest_documents(
    extractor: &dyn TextExtractor,
    documents: Vec<Document>,
    config: ChunkingConfig,
) -> Result<IngestionReport, ChunkingError> {
    config.validate()?;
    let mut report = IngestionReport::default();

    for document in documents {
        match extractor.extract(&document) {
            Ok(text) => {
                let chunks = build_chunks(&document.filename, &text, config)?;
                info!(
                    filename = %document.filename,
                    chunk_count = chunks.len(),
                    "document chunked"
                );
                report.chunks.extend(chunks);
                report.indexed_documents.push(document.filename);
            }
            Err(error) => {
                warn!(filename = %document.filename, reason = %error, "skipped document");
                report.skipped_documents.push(SkippedDocument {
                    filename: document.filename,
                    reason: error.to_string(),
                });
            }
        }
    }

    Ok(report)
}
