//! In-memory BM25 inverted index
//!
//! Postings are rebuilt from chunk contents on snapshot load, so only the
//! owning chunk list is persisted. Scores are raw BM25; the hybrid layer
//! normalizes per query.

use std::collections::HashMap;

/// Term frequency saturation
pub const BM25_K1: f32 = 1.2;
/// Document length normalization
pub const BM25_B: f32 = 0.75;

/// Lowercase, strip non-alphanumerics to whitespace, split, and drop
/// tokens shorter than two characters.
pub fn tokenize(text: &str) -> Vec<String> {
    text.to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect::<String>()
        .split_whitespace()
        .filter(|t| t.len() >= 2)
        .map(String::from)
        .collect()
}

/// BM25 inverted index over documents addressed by dense ordinals
#[derive(Debug, Default, Clone)]
pub struct Bm25Index {
    /// token -> (doc ordinal, term frequency)
    postings: HashMap<String, Vec<(usize, u32)>>,
    doc_lengths: Vec<u32>,
    total_tokens: u64,
}

impl Bm25Index {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild the index from document contents, in ordinal order
    pub fn from_contents<'a, I: IntoIterator<Item = &'a str>>(contents: I) -> Self {
        let mut index = Self::new();
        for content in contents {
            index.add_document(content);
        }
        index
    }

    /// Index the next document; ordinals are assigned densely from 0
    pub fn add_document(&mut self, content: &str) -> usize {
        let ordinal = self.doc_lengths.len();
        let tokens = tokenize(content);

        let mut freqs: HashMap<String, u32> = HashMap::new();
        for token in &tokens {
            *freqs.entry(token.clone()).or_insert(0) += 1;
        }
        for (token, freq) in freqs {
            self.postings.entry(token).or_default().push((ordinal, freq));
        }

        self.doc_lengths.push(tokens.len() as u32);
        self.total_tokens += tokens.len() as u64;
        ordinal
    }

    pub fn doc_count(&self) -> usize {
        self.doc_lengths.len()
    }

    pub fn clear(&mut self) {
        self.postings.clear();
        self.doc_lengths.clear();
        self.total_tokens = 0;
    }

    /// Score every document against the raw query. Returns one score per
    /// ordinal; documents matching no query token score 0.
    pub fn score_all(&self, query: &str) -> Vec<f32> {
        let n = self.doc_lengths.len();
        let mut scores = vec![0.0f32; n];
        if n == 0 {
            return scores;
        }

        let avgdl = self.total_tokens as f32 / n as f32;
        let query_tokens = tokenize(query);

        for token in &query_tokens {
            let Some(postings) = self.postings.get(token) else {
                continue;
            };
            let df = postings.len() as f32;
            let idf = ((n as f32 - df + 0.5) / (df + 0.5) + 1.0).ln();

            for &(ordinal, tf) in postings {
                let tf = tf as f32;
                let dl = self.doc_lengths[ordinal] as f32;
                let denom = tf + BM25_K1 * (1.0 - BM25_B + BM25_B * dl / avgdl.max(1.0));
                scores[ordinal] += idf * tf * (BM25_K1 + 1.0) / denom;
            }
        }

        scores
    }
}
