use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How the text of a source document was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExtractionMethod {
    PlainText,
    Json,
    PdfTextLayer,
    PdfRawLines,
    PdfBracketScrape,
}

impl ExtractionMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExtractionMethod::PlainText => "plain-text",
            ExtractionMethod::Json => "json",
            ExtractionMethod::PdfTextLayer => "pdf-text-layer",
            ExtractionMethod::PdfRawLines => "pdf-raw-lines",
            ExtractionMethod::PdfBracketScrape => "pdf-bracket-scrape",
        }
    }
}

impl fmt::Display for ExtractionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aliases accept the Spanish field names of existing `_chunks.json`
/// records (`nombreOriginal`, `fechaProcesamiento`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassageSetMetadata {
    #[serde(alias = "nombreOriginal")]
    pub original_name: String,
    /// Free-text tag; legacy records carry values such as `directo`.
    #[serde(alias = "metodo")]
    pub method: String,
    #[serde(alias = "fechaProcesamiento")]
    pub processed_at: DateTime<Utc>,
    #[serde(alias = "totalChunks")]
    pub total_chunks: usize,
    #[serde(alias = "totalCaracteres")]
    pub total_chars: usize,
    #[serde(default)]
    pub checksum: Option<String>,
}

/// Persisted record: one per source document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PassageSet {
    pub metadata: PassageSetMetadata,
    pub chunks: Vec<String>,
}

/// A location in the corpus: document name plus passage position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Posting {
    pub document: String,
    pub passage: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub document: String,
    pub passage_index: usize,
    pub text: String,
    pub score: usize,
    pub matched_terms: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct SkippedFile {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct IngestionReport {
    pub discovered: usize,
    pub succeeded: usize,
    pub total_passages: usize,
    pub skipped: Vec<SkippedFile>,
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub enum IngestionOutcome {
    /// Another pass holds the single-flight permit.
    Busy,
    NoSourceFiles,
    Completed(IngestionReport),
}

impl IngestionOutcome {
    pub fn succeeded(&self) -> bool {
        matches!(self, IngestionOutcome::Completed(report) if report.succeeded > 0)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceStatus {
    pub documents: usize,
    pub total_passages: usize,
    pub busy: bool,
    pub last_ingestion: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct AskOutcome {
    pub answer: String,
    pub matches: Vec<SearchMatch>,
}
