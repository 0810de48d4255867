//! In-memory corpus and inverted index, built together as one immutable snapshot.

use crate::models::{Posting, SearchMatch};
use crate::normalize::{clean, tokenize};
use std::collections::{BTreeMap, HashMap};

pub const DEFAULT_SEARCH_LIMIT: usize = 8;
/// Passage text in a search match is cut to this many characters.
pub const MATCH_TEXT_CHARS: usize = 1_200;

/// Points per posting hit; distinct matched terms break ties below this.
const HIT_WEIGHT: usize = 10;

#[derive(Debug, Default)]
pub struct CorpusSnapshot {
    corpus: BTreeMap<String, Vec<String>>,
    index: HashMap<String, Vec<Posting>>,
    total_passages: usize,
}

impl CorpusSnapshot {
    /// Builds the inverted index over `corpus`. Postings are appended in
    /// document-name order, then passage order.
    pub fn build(corpus: BTreeMap<String, Vec<String>>) -> Self {
        let mut index: HashMap<String, Vec<Posting>> = HashMap::new();
        let mut total_passages = 0;

        for (document, passages) in &corpus {
            total_passages += passages.len();
            for (passage, text) in passages.iter().enumerate() {
                for term in tokenize(text) {
                    index.entry(term).or_default().push(Posting {
                        document: document.clone(),
                        passage,
                    });
                }
            }
        }

        Self {
            corpus,
            index,
            total_passages,
        }
    }

    pub fn documents(&self) -> usize {
        self.corpus.len()
    }

    pub fn total_passages(&self) -> usize {
        self.total_passages
    }

    pub fn term_count(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn passage(&self, document: &str, passage: usize) -> Option<&str> {
        self.corpus
            .get(document)
            .and_then(|passages| passages.get(passage))
            .map(String::as_str)
    }

    pub fn postings(&self, term: &str) -> &[Posting] {
        self.index.get(term).map(Vec::as_slice).unwrap_or_default()
    }

    /// Ranks passages by term overlap with `query`.
    ///
    /// Score is `hits * 10 + matched terms`. A query with no indexable terms,
    /// or an empty index, yields no matches.
    pub fn search(&self, query: &str, limit: usize) -> Vec<SearchMatch> {
        let terms = tokenize(&clean(query));
        if terms.is_empty() || self.index.is_empty() {
            return Vec::new();
        }

        let mut accumulated: BTreeMap<&Posting, (usize, Vec<&str>)> = BTreeMap::new();
        for term in &terms {
            for posting in self.postings(term) {
                let entry = accumulated.entry(posting).or_default();
                entry.0 += 1;
                entry.1.push(term.as_str());
            }
        }

        let mut matches = accumulated
            .into_iter()
            .filter_map(|(posting, (hits, matched))| {
                let text = self.passage(&posting.document, posting.passage)?;
                let score = hits * HIT_WEIGHT + matched.len();

                let mut matched_terms = matched
                    .into_iter()
                    .map(str::to_string)
                    .collect::<Vec<_>>();
                matched_terms.dedup();

                Some(SearchMatch {
                    document: posting.document.clone(),
                    passage_index: posting.passage,
                    text: text.chars().take(MATCH_TEXT_CHARS).collect(),
                    score,
                    matched_terms,
                })
            })
            .collect::<Vec<_>>();

        matches.sort_by(|left, right| right.score.cmp(&left.score));
        matches.truncate(limit);
        matches
    }
}
