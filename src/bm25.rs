//! Okapi BM25 lexical index
//!
//! The lexical half of hybrid candidate search. Documents are graph nodes
//! (name + path + content); at query time BM25 scoring ranks them by term
//! relevance. Parameters k1=1.5, b=0.75.

use ahash::{AHashMap, AHashSet};
use once_cell::sync::Lazy;

/// Term frequency saturation
const K1: f64 = 1.5;
/// Document length normalisation
const B: f64 = 0.75;
/// Tokens shorter than this are dropped
const MIN_TOKEN_LEN: usize = 2;

/// A scored document id
#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    pub id: String,
    pub score: f64,
}

/// BM25 inverted index
///
/// `add_document` replaces any prior entry for the same id, so the index can
/// be rebuilt incrementally without drift between postings and lengths.
#[derive(Debug, Clone, Default)]
pub struct Bm25Index {
    /// term -> (doc id -> term frequency)
    postings: AHashMap<String, AHashMap<String, u32>>,
    /// doc id -> distinct terms, for O(terms) removal on replace
    doc_terms: AHashMap<String, Vec<String>>,
    /// doc id -> token count
    doc_lengths: AHashMap<String, u32>,
    total_length: u64,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc_lengths.is_empty()
    }

    /// Index a document, replacing any prior entry with the same id
    pub fn add_document(&mut self, id: &str, text: &str) {
        self.remove_document(id);

        let tokens = tokenize(text);
        let doc_length = tokens.len() as u32;

        let mut freqs: AHashMap<String, u32> = AHashMap::new();
        for token in tokens {
            *freqs.entry(token).or_insert(0) += 1;
        }

        let mut terms = Vec::with_capacity(freqs.len());
        for (term, tf) in freqs {
            self.postings
                .entry(term.clone())
                .or_default()
                .insert(id.to_string(), tf);
            terms.push(term);
        }

        self.doc_terms.insert(id.to_string(), terms);
        self.doc_lengths.insert(id.to_string(), doc_length);
        self.total_length += u64::from(doc_length);
    }

    /// Drop a document and its postings
    pub fn remove_document(&mut self, id: &str) {
        let Some(terms) = self.doc_terms.remove(id) else {
            return;
        };
        for term in terms {
            if let Some(docs) = self.postings.get_mut(&term) {
                docs.remove(id);
                if docs.is_empty() {
                    self.postings.remove(&term);
                }
            }
        }
        if let Some(len) = self.doc_lengths.remove(id) {
            self.total_length -= u64::from(len);
        }
    }

    /// Rank documents against a query. Only positive scores are returned,
    /// sorted descending; an empty index yields an empty list.
    pub fn search(&self, query: &str, top_k: usize) -> Vec<Bm25Hit> {
        let query_terms = tokenize(query);
        if query_terms.is_empty() || self.is_empty() {
            return Vec::new();
        }

        let total_docs = self.doc_lengths.len() as f64;
        let avg_length = self.total_length as f64 / total_docs;

        let mut scores: AHashMap<&str, f64> = AHashMap::new();
        // Query terms are deduplicated; repeating a term in the query does
        // not multiply its contribution.
        let distinct: AHashSet<&str> = query_terms.iter().map(String::as_str).collect();

        for term in distinct {
            let Some(docs) = self.postings.get(term) else {
                continue;
            };
            let df = docs.len() as f64;
            let idf = ((total_docs - df + 0.5) / (df + 0.5) + 1.0).ln();

            for (doc_id, tf) in docs {
                let doc_len = f64::from(self.doc_lengths[doc_id.as_str()]);
                let tf = f64::from(*tf);
                let numerator = tf * (K1 + 1.0);
                let denominator = tf + K1 * (1.0 - B + B * doc_len / avg_length);
                *scores.entry(doc_id.as_str()).or_insert(0.0) += idf * numerator / denominator;
            }
        }

        let mut hits: Vec<Bm25Hit> = scores
            .into_iter()
            .filter(|(_, score)| *score > 0.0)
            .map(|(id, score)| Bm25Hit {
                id: id.to_string(),
                score,
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(top_k);
        hits
    }
}

/// Tokenize text into searchable terms
///
/// Lowercases, splits on non-alphanumeric characters (underscore allowed),
/// drops stop words and tokens shorter than two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|t| t.len() >= MIN_TOKEN_LEN)
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(t.as_str()))
        .collect()
}

static STOP_WORDS: Lazy<AHashSet<&'static str>> = Lazy::new(|| {
    [
        // Common English words with little search value
        "the", "a", "an", "is", "are", "was", "be", "to", "of", "and", "in", "it", "for", "on",
        "with", "as", "at", "by", "or", "if", "this", "that", "from",
        // Very common code terms
        "fn", "let", "var", "const", "function", "return", "new", "pub",
    ]
    .into_iter()
    .collect()
});

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_keeps_underscores() {
        let terms = tokenize("handle_user.authenticate(token)");
        assert!(terms.contains(&"handle_user".to_string()));
        assert!(terms.contains(&"authenticate".to_string()));
        assert!(terms.contains(&"token".to_string()));
    }

    #[test]
    fn test_tokenize_drops_short_and_stop_words() {
        let terms = tokenize("the x of a session");
        assert_eq!(terms, vec!["session".to_string()]);
    }

    #[test]
    fn test_search_ranks_matching_document_first() {
        let mut index = Bm25Index::new();
        index.add_document("auth", "authenticate user login session token");
        index.add_document("render", "render output display format widget");

        let hits = index.search("login session", 10);
        assert!(!hits.is_empty());
        assert_eq!(hits[0].id, "auth");
        assert!(hits[0].score > 0.0);
        // The second document shares no terms and must not appear
        assert!(hits.iter().all(|h| h.id != "render"));
    }

    #[test]
    fn test_add_document_replaces() {
        let mut index = Bm25Index::new();
        index.add_document("doc", "alpha beta");
        index.add_document("doc", "gamma delta");
        assert_eq!(index.len(), 1);

        assert!(index.search("alpha", 10).is_empty());
        let hits = index.search("gamma", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "doc");
    }

    #[test]
    fn test_empty_index_returns_empty() {
        let index = Bm25Index::new();
        assert!(index.search("anything", 5).is_empty());
    }

    #[test]
    fn test_remove_document() {
        let mut index = Bm25Index::new();
        index.add_document("one", "alpha beta");
        index.add_document("two", "alpha gamma");
        index.remove_document("one");

        let hits = index.search("alpha", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "two");
    }
}
