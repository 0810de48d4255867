use crate::error::IngestError;
use crate::models::ExtractionMethod;
use crate::normalize::{clean, compile};
use lopdf::Document;
use regex::Regex;
use std::path::Path;
use std::sync::OnceLock;
use tracing::debug;

/// Text-layer output must exceed this many characters after cleaning.
const TEXT_LAYER_MIN_CHARS: usize = 100;
const RAW_LINE_MIN_CHARS: usize = 10;
const RAW_LINE_MIN_WORDS: usize = 3;
/// The raw-line tier needs strictly more surviving lines than this.
const RAW_LINES_REQUIRED: usize = 5;
const FRAGMENT_MIN_CHARS: usize = 10;

const PDF_SYNTAX_TOKENS: [&str; 6] = ["stream", "endstream", "obj", "endobj", "xref", "trailer"];

#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedText {
    pub text: String,
    pub method: ExtractionMethod,
}

/// One way of recovering text from PDF bytes.
///
/// `Ok(None)` means the strategy ran but its output was not good enough, so
/// the next strategy in the chain should be tried.
pub trait PdfStrategy: Send + Sync {
    fn method(&self) -> ExtractionMethod;
    fn attempt(&self, bytes: &[u8]) -> Result<Option<String>, IngestError>;
}

/// Structured extraction through the PDF text layer.
#[derive(Debug, Default)]
pub struct TextLayerStrategy;

impl PdfStrategy for TextLayerStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PdfTextLayer
    }

    fn attempt(&self, bytes: &[u8]) -> Result<Option<String>, IngestError> {
        let document =
            Document::load_mem(bytes).map_err(|error| IngestError::PdfParse(error.to_string()))?;

        let mut pages = Vec::new();
        for page_no in document.get_pages().keys() {
            let text = document
                .extract_text(&[*page_no])
                .map_err(|error| IngestError::PdfParse(error.to_string()))?;
            if !text.trim().is_empty() {
                pages.push(text);
            }
        }

        let cleaned = clean(&pages.join("\n\n"));
        if cleaned.chars().count() > TEXT_LAYER_MIN_CHARS {
            Ok(Some(cleaned))
        } else {
            Ok(None)
        }
    }
}

/// Keeps raw-byte lines that read like prose rather than PDF syntax.
#[derive(Debug, Default)]
pub struct RawLineStrategy;

impl RawLineStrategy {
    fn looks_like_prose(line: &str) -> bool {
        line.chars().count() > RAW_LINE_MIN_CHARS
            && !line.starts_with('%')
            && !PDF_SYNTAX_TOKENS.iter().any(|token| line.contains(token))
            && line.chars().any(is_latin_letter)
            && line.split(' ').count() >= RAW_LINE_MIN_WORDS
    }
}

impl PdfStrategy for RawLineStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PdfRawLines
    }

    fn attempt(&self, bytes: &[u8]) -> Result<Option<String>, IngestError> {
        let decoded = String::from_utf8_lossy(bytes);
        let lines = decoded
            .split('\n')
            .map(str::trim)
            .filter(|line| Self::looks_like_prose(line))
            .map(clean)
            .filter(|line| !line.is_empty())
            .collect::<Vec<_>>();

        if lines.len() > RAW_LINES_REQUIRED {
            Ok(Some(clean(&lines.join("\n"))))
        } else {
            Ok(None)
        }
    }
}

/// Scrapes `(...)` and `<...>` string operands straight out of the content.
#[derive(Debug, Default)]
pub struct BracketScrapeStrategy;

fn parenthesized() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| compile(r"\(([^)]+)\)"))
}

fn angle_bracketed() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| compile(r"<([^>]+)>"))
}

impl PdfStrategy for BracketScrapeStrategy {
    fn method(&self) -> ExtractionMethod {
        ExtractionMethod::PdfBracketScrape
    }

    fn attempt(&self, bytes: &[u8]) -> Result<Option<String>, IngestError> {
        let decoded = String::from_utf8_lossy(bytes);
        let fragments = parenthesized()
            .captures_iter(&decoded)
            .chain(angle_bracketed().captures_iter(&decoded))
            .filter_map(|capture| capture.get(1).map(|inner| inner.as_str()))
            .filter(|fragment| {
                fragment.chars().count() > FRAGMENT_MIN_CHARS
                    && fragment.chars().any(|ch| ch.is_ascii_alphabetic())
            })
            .collect::<Vec<_>>();

        if fragments.is_empty() {
            return Ok(None);
        }

        let text = clean(&fragments.join(" "));
        Ok((!text.is_empty()).then_some(text))
    }
}

fn is_latin_letter(ch: char) -> bool {
    ch.is_ascii_alphabetic() || "áéíóúÁÉÍÓÚñÑüÜ".contains(ch)
}

/// Ordered PDF extraction strategies; the first acceptable output wins.
pub struct PdfExtractionChain {
    strategies: Vec<Box<dyn PdfStrategy>>,
}

impl Default for PdfExtractionChain {
    fn default() -> Self {
        Self::new(vec![
            Box::new(TextLayerStrategy),
            Box::new(RawLineStrategy),
            Box::new(BracketScrapeStrategy),
        ])
    }
}

impl PdfExtractionChain {
    pub fn new(strategies: Vec<Box<dyn PdfStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn extract(&self, bytes: &[u8]) -> Option<ExtractedText> {
        for strategy in &self.strategies {
            match strategy.attempt(bytes) {
                Ok(Some(text)) => {
                    return Some(ExtractedText {
                        text,
                        method: strategy.method(),
                    })
                }
                Ok(None) => debug!(method = %strategy.method(), "pdf strategy output insufficient"),
                Err(error) => debug!(method = %strategy.method(), %error, "pdf strategy failed"),
            }
        }

        None
    }
}

/// Supported source formats, keyed by file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Text,
    Json,
    Pdf,
}

impl SourceFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        let extension = path.extension()?.to_str()?.to_ascii_lowercase();
        match extension.as_str() {
            "txt" => Some(SourceFormat::Text),
            "json" => Some(SourceFormat::Json),
            "pdf" => Some(SourceFormat::Pdf),
            _ => None,
        }
    }
}

pub fn extract_document(path: &Path) -> Result<ExtractedText, IngestError> {
    let format = SourceFormat::from_path(path)
        .ok_or_else(|| IngestError::UnsupportedFormat(path.display().to_string()))?;
    let bytes = std::fs::read(path)?;
    extract_bytes(format, &bytes, path)
}

pub fn extract_bytes(
    format: SourceFormat,
    bytes: &[u8],
    path: &Path,
) -> Result<ExtractedText, IngestError> {
    match format {
        SourceFormat::Text => Ok(ExtractedText {
            text: String::from_utf8_lossy(bytes).into_owned(),
            method: ExtractionMethod::PlainText,
        }),
        SourceFormat::Json => {
            let value: serde_json::Value = serde_json::from_slice(bytes)?;
            Ok(ExtractedText {
                text: json_to_text(&value)?,
                method: ExtractionMethod::Json,
            })
        }
        SourceFormat::Pdf => PdfExtractionChain::default()
            .extract(bytes)
            .ok_or_else(|| IngestError::ExtractionEmpty(path.display().to_string())),
    }
}

fn json_to_text(value: &serde_json::Value) -> Result<String, IngestError> {
    use serde_json::Value;

    Ok(match value {
        Value::Object(_) | Value::Array(_) => serde_json::to_string_pretty(value)?,
        Value::String(text) => text.clone(),
        scalar => scalar.to_string(),
    })
}
