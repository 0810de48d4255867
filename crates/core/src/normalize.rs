//! Text cleanup for extracted documents and term extraction for the index.

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;
use unicode_normalization::UnicodeNormalization;

/// Minimum number of letters a run needs to become an index term.
pub const MIN_TERM_CHARS: usize = 3;

struct CleanPatterns {
    disallowed: Regex,
    horizontal_space: Regex,
    around_newline: Regex,
    blank_runs: Regex,
}

fn clean_patterns() -> &'static CleanPatterns {
    static PATTERNS: OnceLock<CleanPatterns> = OnceLock::new();
    PATTERNS.get_or_init(|| CleanPatterns {
        // Letters (ASCII and Latin-1 accented), digits, punctuation, bracket and math symbols.
        disallowed: compile(r#"[^A-Za-z0-9_À-ÖØ-öø-ÿ \t\n.,;:!?¿¡()\[\]{}<>"'/\\|+\-–—°#$%&*=]"#),
        horizontal_space: compile(r"[ \t]+"),
        around_newline: compile(r" *\n *"),
        blank_runs: compile(r"\n{3,}"),
    })
}

fn term_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| compile(r"\p{L}{3,}"))
}

pub(crate) fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in pattern compiles")
}

/// Canonicalizes extracted text. The result is stable under a second pass.
pub fn clean(text: &str) -> String {
    if text.is_empty() {
        return String::new();
    }

    let patterns = clean_patterns();
    let unified = text
        .replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\u{a0}', " ");

    let allowed = patterns.disallowed.replace_all(&unified, "");
    let spaced = patterns.horizontal_space.replace_all(&allowed, " ");
    let trimmed_lines = patterns.around_newline.replace_all(&spaced, "\n");
    let collapsed = patterns.blank_runs.replace_all(&trimmed_lines, "\n\n");

    collapsed.trim().to_string()
}

/// Lowercases, strips combining diacritics and returns the distinct letter
/// runs of at least [`MIN_TERM_CHARS`] characters.
pub fn tokenize(text: &str) -> BTreeSet<String> {
    if text.is_empty() {
        return BTreeSet::new();
    }

    let folded = fold_diacritics(&text.to_lowercase());
    term_pattern()
        .find_iter(&folded)
        .map(|term| term.as_str().to_string())
        .filter(|term| term.chars().count() >= MIN_TERM_CHARS)
        .collect()
}

fn fold_diacritics(text: &str) -> String {
    text.nfd()
        .filter(|ch| !('\u{0300}'..='\u{036f}').contains(ch))
        .collect()
}
