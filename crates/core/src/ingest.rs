use crate::chunking::{chunk_text, ChunkingConfig};
use crate::extractor::{extract_bytes, SourceFormat};
use crate::models::{PassageSet, PassageSetMetadata};
use crate::normalize::clean;
use crate::store::write_passage_set;
use crate::IngestError;
use chrono::Utc;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

/// Cleaned text shorter than this is not worth chunking.
pub const MIN_DOCUMENT_CHARS: usize = 100;

/// Lists the supported source files directly inside `folder`, sorted by path.
pub fn discover_source_files(folder: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();

    for entry in WalkDir::new(folder)
        .max_depth(1)
        .into_iter()
        .filter_map(|item| item.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        if SourceFormat::from_path(entry.path()).is_some() {
            files.push(entry.path().to_path_buf());
        }
    }

    files.sort_unstable();
    files
}

pub fn digest_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Summary of one successfully processed document.
#[derive(Debug, Clone, PartialEq)]
pub struct ProcessedDocument {
    pub record_path: PathBuf,
    pub passages: usize,
}

/// Extracts, cleans, chunks and persists one source document.
///
/// Fails when the format is unsupported, no text could be recovered, the
/// cleaned text is under [`MIN_DOCUMENT_CHARS`], or chunking yields nothing.
pub fn process_document(
    path: &Path,
    output_dir: &Path,
    chunking: ChunkingConfig,
) -> Result<ProcessedDocument, IngestError> {
    let original_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| IngestError::MissingFileName(path.display().to_string()))?
        .to_string();

    let format = SourceFormat::from_path(path)
        .ok_or_else(|| IngestError::UnsupportedFormat(path.display().to_string()))?;
    let bytes = fs::read(path)?;
    let extracted = extract_bytes(format, &bytes, path)?;

    let cleaned = clean(&extracted.text);
    let cleaned_chars = cleaned.chars().count();
    if cleaned_chars < MIN_DOCUMENT_CHARS {
        return Err(IngestError::ExtractionEmpty(format!(
            "{original_name}: only {cleaned_chars} characters after cleaning"
        )));
    }
    debug!(file = %original_name, method = %extracted.method, chars = cleaned_chars, "text extracted");

    let chunks = chunk_text(&cleaned, chunking);
    if chunks.is_empty() {
        return Err(IngestError::ExtractionEmpty(format!(
            "{original_name}: no passages produced"
        )));
    }

    let record = PassageSet {
        metadata: PassageSetMetadata {
            original_name: original_name.clone(),
            method: extracted.method.to_string(),
            processed_at: Utc::now(),
            total_chunks: chunks.len(),
            total_chars: cleaned_chars,
            checksum: Some(digest_bytes(&bytes)),
        },
        chunks,
    };

    let record_path = write_passage_set(output_dir, path, &record)?;
    info!(file = %original_name, chunks = record.chunks.len(), "document processed");

    Ok(ProcessedDocument {
        record_path,
        passages: record.chunks.len(),
    })
}
