//! BM25 lexical index (C4): tokenizer, in-memory inverted index, and
//! classical Okapi scoring.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, OnceLock};

const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "for", "from", "has", "have",
    "he", "her", "his", "i", "in", "into", "is", "it", "its", "of", "on", "or", "our", "she",
    "that", "the", "their", "them", "there", "these", "they", "this", "those", "to", "was",
    "we", "were", "will", "with", "you", "your",
];

const MIN_TOKEN_LEN: usize = 2;
const MIN_STEM_LEN: usize = 4;
const MIN_DOCUMENT_TOKENS: usize = 10;

/// Tokenize, lowercase, strip stopwords and short tokens, and apply a
/// conservative suffix-stripping stemmer. Deterministic and pure.
pub fn tokenize(text: &str) -> Vec<String> {
    let lower = text.to_lowercase();
    let stopwords: HashSet<&str> = STOPWORDS.iter().copied().collect();

    lower
        .split(|c: char| !(c.is_alphanumeric() || c == '_'))
        .filter(|w| !w.is_empty())
        .filter(|w| w.chars().count() >= MIN_TOKEN_LEN)
        .filter(|w| !stopwords.contains(w))
        .map(stem)
        .collect()
}

/// A conservative Porter-subset stemmer. Suffix removal is non-overlapping
/// in a single pass, tried in the documented order; tokens shorter than
/// `MIN_STEM_LEN` are left unchanged.
fn stem(word: &str) -> String {
    if word.chars().count() < MIN_STEM_LEN {
        return word.to_string();
    }

    const SUFFIXES: &[(&str, &str)] = &[
        ("ies", "i"),
        ("es", ""),
        ("s", ""),
        ("ing", ""),
        ("ed", ""),
        ("tion", "t"),
        ("ment", ""),
        ("ness", ""),
        ("able", ""),
        ("ful", ""),
        ("less", ""),
    ];

    for (suffix, replacement) in SUFFIXES {
        if word.len() > suffix.len() && word.ends_with(suffix) {
            let stem_len = word.len() - suffix.len();
            // Never strip a suffix down to nothing.
            if stem_len == 0 {
                continue;
            }
            return format!("{}{}", &word[..stem_len], replacement);
        }
    }
    word.to_string()
}

/// A document registered with the index.
#[derive(Debug, Clone)]
struct Document {
    tokens: Vec<String>,
    length: usize,
    term_freqs: HashMap<String, usize>,
    spec_folder: Option<String>,
}

/// One scored search hit.
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    pub doc_id: i64,
    pub score: f64,
}

/// Options for `Bm25Index::search`.
#[derive(Debug, Clone, Default)]
pub struct Bm25SearchOptions {
    pub limit: Option<usize>,
    pub spec_folder: Option<String>,
}

/// Classical Okapi BM25 inverted index.
pub struct Bm25Index {
    k1: f64,
    b: f64,
    enabled: bool,
    documents: HashMap<i64, Document>,
    inverted_index: HashMap<String, HashSet<i64>>,
    doc_frequencies: HashMap<String, usize>,
    total_length: usize,
}

impl Default for Bm25Index {
    fn default() -> Self {
        Self::new()
    }
}

impl Bm25Index {
    pub fn new() -> Self {
        Self {
            k1: 1.2,
            b: 0.75,
            enabled: true,
            documents: HashMap::new(),
            inverted_index: HashMap::new(),
            doc_frequencies: HashMap::new(),
            total_length: 0,
        }
    }

    pub fn with_params(k1: f64, b: f64) -> Self {
        Self {
            k1,
            b,
            ..Self::new()
        }
    }

    /// Disable the index, causing `search` to return an empty result
    /// regardless of content (the `ENABLE_BM25` feature flag).
    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn total_docs(&self) -> usize {
        self.documents.len()
    }

    pub fn avg_doc_length(&self) -> f64 {
        if self.documents.is_empty() {
            0.0
        } else {
            self.total_length as f64 / self.documents.len() as f64
        }
    }

    /// Register a document. Rejects inputs shorter than `MIN_DOCUMENT_TOKENS`
    /// tokens, returning `false`.
    pub fn add_document(&mut self, doc_id: i64, text: &str, spec_folder: Option<String>) -> bool {
        let tokens = tokenize(text);
        if tokens.len() < MIN_DOCUMENT_TOKENS {
            return false;
        }

        // Replace any existing document with the same id first.
        self.remove_document(doc_id);

        let mut term_freqs: HashMap<String, usize> = HashMap::new();
        for t in &tokens {
            *term_freqs.entry(t.clone()).or_default() += 1;
        }

        for term in term_freqs.keys() {
            self.inverted_index
                .entry(term.clone())
                .or_default()
                .insert(doc_id);
            *self.doc_frequencies.entry(term.clone()).or_default() += 1;
        }

        self.total_length += tokens.len();
        self.documents.insert(
            doc_id,
            Document {
                length: tokens.len(),
                tokens,
                term_freqs,
                spec_folder,
            },
        );
        true
    }

    /// Remove a document, updating document frequencies, totals, and the
    /// running average length.
    pub fn remove_document(&mut self, doc_id: i64) -> bool {
        let Some(doc) = self.documents.remove(&doc_id) else {
            return false;
        };
        self.total_length = self.total_length.saturating_sub(doc.length);
        for term in doc.term_freqs.keys() {
            if let Some(ids) = self.inverted_index.get_mut(term) {
                ids.remove(&doc_id);
                if ids.is_empty() {
                    self.inverted_index.remove(term);
                }
            }
            if let Some(df) = self.doc_frequencies.get_mut(term) {
                *df = df.saturating_sub(1);
                if *df == 0 {
                    self.doc_frequencies.remove(term);
                }
            }
        }
        true
    }

    /// IDF for a term. Always `>= 0` thanks to the `+1` smoothing term.
    /// Unknown terms use `df = 0`.
    pub fn idf(&self, term: &str) -> f64 {
        let n = self.documents.len() as f64;
        let df = *self.doc_frequencies.get(term).unwrap_or(&0) as f64;
        ((n - df + 0.5) / (df + 0.5) + 1.0).ln()
    }

    fn score_document(&self, doc: &Document, query_tokens: &[String]) -> f64 {
        let avg_len = self.avg_doc_length().max(1.0);
        query_tokens
            .iter()
            .map(|term| {
                let tf = *doc.term_freqs.get(term).unwrap_or(&0) as f64;
                if tf == 0.0 {
                    return 0.0;
                }
                let idf = self.idf(term);
                let numerator = tf * (self.k1 + 1.0);
                let denominator =
                    tf + self.k1 * (1.0 - self.b + self.b * doc.length as f64 / avg_len);
                idf * numerator / denominator
            })
            .sum()
    }

    /// Search the index. Honors the feature flag (disabled -> empty),
    /// tokenizes the query, and returns results sorted by score
    /// descending, respecting an optional `spec_folder` filter and limit.
    pub fn search(&self, query: &str, options: &Bm25SearchOptions) -> Vec<Bm25Hit> {
        if !self.enabled {
            return Vec::new();
        }
        let query_tokens = tokenize(query);
        if query_tokens.is_empty() || self.documents.is_empty() {
            return Vec::new();
        }

        let mut hits: Vec<Bm25Hit> = self
            .documents
            .iter()
            .filter(|(_, doc)| match (&options.spec_folder, &doc.spec_folder) {
                (Some(want), Some(have)) => want == have,
                (Some(_), None) => false,
                (None, _) => true,
            })
            .filter_map(|(doc_id, doc)| {
                let score = self.score_document(doc, &query_tokens);
                if score > 0.0 {
                    Some(Bm25Hit {
                        doc_id: *doc_id,
                        score,
                    })
                } else {
                    None
                }
            })
            .collect();

        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        if let Some(limit) = options.limit {
            hits.truncate(limit);
        }
        hits
    }
}

static GLOBAL_INDEX: OnceLock<Mutex<Bm25Index>> = OnceLock::new();

/// Process-wide singleton instance.
pub fn get_index() -> &'static Mutex<Bm25Index> {
    GLOBAL_INDEX.get_or_init(|| Mutex::new(Bm25Index::new()))
}

/// Reset the process-wide singleton to a fresh, empty index.
pub fn reset_index() {
    let mut guard = get_index().lock().expect("bm25 index mutex poisoned");
    *guard = Bm25Index::new();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tokenizer_lowercases_and_drops_stopwords() {
        let tokens = tokenize("The Quick Brown Fox is jumping");
        assert!(!tokens.contains(&"the".to_string()));
        assert!(!tokens.contains(&"is".to_string()));
        assert!(tokens.contains(&"quick".to_string()));
    }

    #[test]
    fn tokenizer_preserves_underscores() {
        let tokens = tokenize("memory_store function_call");
        assert!(tokens.contains(&"memory_stor".to_string()) || tokens.iter().any(|t| t.starts_with("memory_stor")));
    }

    #[test]
    fn stemmer_matches_spec_examples() {
        assert_eq!(stem("studies"), "studi");
        assert_eq!(stem("boxes"), "box");
        assert_eq!(stem("action"), "act");
        assert_eq!(stem("agreement"), "agree");
    }

    #[test]
    fn stemmer_leaves_short_words_unchanged() {
        assert_eq!(stem("cat"), "cat");
        assert_eq!(stem("dog"), "dog");
    }

    #[test]
    fn idf_is_always_non_negative() {
        let mut idx = Bm25Index::new();
        idx.add_document(1, &"memory recall retrieval storage engine agent loop write read cache".repeat(1), None);
        assert!(idx.idf("memory") >= 0.0);
        assert!(idx.idf("nonexistent-term") >= 0.0);
    }

    #[test]
    fn add_document_rejects_short_input() {
        let mut idx = Bm25Index::new();
        assert!(!idx.add_document(1, "too short", None));
    }

    #[test]
    fn bm25_ordering_matches_spec_scenario() {
        let mut idx = Bm25Index::new();
        let ten_tokens_a = "memory memory memory agent store recall cache index write read";
        let ten_tokens_b = "memory agent store recall cache index write read plan act";
        let ten_tokens_c = "agent store recall cache index write read plan act think";
        idx.add_document(1, ten_tokens_a, None);
        idx.add_document(2, ten_tokens_b, None);
        idx.add_document(3, ten_tokens_c, None);

        let hits = idx.search("memory", &Bm25SearchOptions::default());
        let ids: Vec<i64> = hits.iter().map(|h| h.doc_id).collect();
        assert_eq!(ids.first(), Some(&1));
        assert!(ids.contains(&2));
        assert!(!ids.contains(&3));
    }

    #[test]
    fn search_respects_spec_folder_filter_and_limit() {
        let mut idx = Bm25Index::new();
        idx.add_document(1, "alpha beta gamma delta epsilon zeta eta theta iota kappa", Some("proj-a".into()));
        idx.add_document(2, "alpha beta gamma delta epsilon zeta eta theta iota lambda", Some("proj-b".into()));

        let opts = Bm25SearchOptions {
            limit: Some(1),
            spec_folder: Some("proj-a".into()),
        };
        let hits = idx.search("alpha", &opts);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].doc_id, 1);
    }

    #[test]
    fn disabled_flag_yields_empty_results() {
        let mut idx = Bm25Index::new();
        idx.add_document(1, "alpha beta gamma delta epsilon zeta eta theta iota kappa", None);
        idx.set_enabled(false);
        assert!(idx.search("alpha", &Bm25SearchOptions::default()).is_empty());
    }

    #[test]
    fn remove_document_updates_frequencies() {
        let mut idx = Bm25Index::new();
        idx.add_document(1, "alpha beta gamma delta epsilon zeta eta theta iota kappa", None);
        assert_eq!(idx.total_docs(), 1);
        assert!(idx.remove_document(1));
        assert_eq!(idx.total_docs(), 0);
        assert_eq!(idx.idf("alpha"), idx.idf("totally-unknown-term"));
    }
}
