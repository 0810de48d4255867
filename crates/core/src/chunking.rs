use crate::error::IngestError;
use crate::normalize::{clean, compile};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Passages shorter than this are never indexed.
pub const MIN_PASSAGE_CHARS: usize = 50;

pub const DEFAULT_CHUNK_CHARS: usize = 1_000;
pub const DEFAULT_OVERLAP_CHARS: usize = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkingConfig {
    pub max_chars: usize,
    pub overlap_chars: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            max_chars: DEFAULT_CHUNK_CHARS,
            overlap_chars: DEFAULT_OVERLAP_CHARS,
        }
    }
}

impl ChunkingConfig {
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.max_chars == 0 {
            return Err(IngestError::InvalidChunkConfig(
                "max_chars must be greater than zero".to_string(),
            ));
        }
        if self.overlap_chars >= self.max_chars {
            return Err(IngestError::InvalidChunkConfig(format!(
                "overlap_chars ({}) must be smaller than max_chars ({})",
                self.overlap_chars, self.max_chars
            )));
        }
        Ok(())
    }

    /// A running chunk under 30% of `max_chars` is replaced rather than emitted.
    fn meets_retention_floor(&self, chars: usize) -> bool {
        chars * 10 >= self.max_chars * 3
    }

    /// Words carried from a flushed chunk into the next one in sentence mode.
    fn overlap_words(&self) -> usize {
        self.overlap_chars / 10
    }
}

fn paragraph_break() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| compile(r"\n\s*\n"))
}

fn sentence_end() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| compile(r"[.!?]\s+"))
}

fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Splits after each `.`, `!` or `?` that is followed by whitespace.
pub fn split_sentences(paragraph: &str) -> Vec<&str> {
    let mut sentences = Vec::new();
    let mut start = 0;

    for boundary in sentence_end().find_iter(paragraph) {
        let end = boundary.start() + 1;
        if end > start {
            sentences.push(&paragraph[start..end]);
        }
        start = boundary.end();
    }

    if start < paragraph.len() {
        sentences.push(&paragraph[start..]);
    }

    sentences
        .into_iter()
        .filter(|sentence| !sentence.is_empty())
        .collect()
}

/// Accumulates pieces into passages, flushing once the next piece no longer fits.
struct PassageBuilder {
    config: ChunkingConfig,
    passages: Vec<String>,
    current: String,
}

impl PassageBuilder {
    fn new(config: ChunkingConfig) -> Self {
        Self {
            config,
            passages: Vec::new(),
            current: String::new(),
        }
    }

    fn push_paragraph(&mut self, paragraph: &str) {
        if char_len(&self.current) + 2 + char_len(paragraph) <= self.config.max_chars {
            if !self.current.is_empty() {
                self.current.push_str("\n\n");
            }
            self.current.push_str(paragraph);
            return;
        }

        if self.config.meets_retention_floor(char_len(&self.current)) {
            self.passages.push(std::mem::take(&mut self.current));
        }
        self.current = paragraph.to_string();
    }

    fn push_sentence(&mut self, sentence: &str) {
        if char_len(&self.current) + 1 + char_len(sentence) <= self.config.max_chars {
            if !self.current.is_empty() {
                self.current.push(' ');
            }
            self.current.push_str(sentence);
            return;
        }

        if !self.config.meets_retention_floor(char_len(&self.current)) {
            self.current = sentence.to_string();
            return;
        }

        let flushed = std::mem::take(&mut self.current);
        let tail = overlap_tail(&flushed, self.config.overlap_words());
        self.passages.push(flushed);

        self.current = if tail.is_empty() {
            sentence.to_string()
        } else {
            format!("{tail} {sentence}")
        };
    }

    fn finish(mut self) -> Vec<String> {
        if !self.current.is_empty() && self.config.meets_retention_floor(char_len(&self.current)) {
            self.passages.push(self.current);
        }

        self.passages
            .into_iter()
            .filter(|passage| char_len(passage) >= MIN_PASSAGE_CHARS)
            .collect()
    }
}

fn overlap_tail(text: &str, words: usize) -> String {
    if words == 0 {
        return String::new();
    }

    let all = text.split(' ').collect::<Vec<_>>();
    let skip = all.len().saturating_sub(words);
    all[skip..].join(" ")
}

/// Splits text into passages along paragraph, then sentence, boundaries.
///
/// Text that already fits in `max_chars` comes back as a single cleaned
/// passage. Otherwise paragraphs are packed greedily; a paragraph that is
/// larger than `max_chars` on its own is packed sentence by sentence, and each
/// flush in that mode carries the last `overlap_chars / 10` words forward.
pub fn chunk_text(text: &str, config: ChunkingConfig) -> Vec<String> {
    let cleaned = clean(text);
    if cleaned.is_empty() {
        return Vec::new();
    }

    if char_len(&cleaned) <= config.max_chars {
        return vec![cleaned];
    }

    let mut builder = PassageBuilder::new(config);

    for paragraph in paragraph_break()
        .split(&cleaned)
        .map(str::trim)
        .filter(|paragraph| !paragraph.is_empty())
    {
        if char_len(paragraph) > config.max_chars {
            for sentence in split_sentences(paragraph) {
                builder.push_sentence(sentence);
            }
        } else {
            builder.push_paragraph(paragraph);
        }
    }

    builder.finish()
}
