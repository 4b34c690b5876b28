//! Deterministic lexical vectors used when the embedding provider is unavailable.
//!
//! Terms are lowercased alphanumeric tokens with English stop words removed,
//! plus adjacent-token bigrams. Each term is hashed (FNV-1a) into a fixed number
//! of buckets, weighted by raw count times smoothed inverse document frequency
//! fitted on the chunk corpus, and the vector is L2-normalized.

use std::collections::HashSet;

const STOP_WORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "been", "but", "by", "can", "could", "did", "do",
    "does", "for", "from", "had", "has", "have", "he", "her", "him", "his", "i", "if", "in",
    "into", "is", "it", "its", "may", "me", "might", "must", "my", "no", "not", "of", "on", "or",
    "our", "shall", "she", "should", "so", "than", "that", "the", "their", "them", "then",
    "there", "these", "they", "this", "those", "to", "us", "was", "we", "were", "what", "when",
    "which", "who", "will", "with", "would", "yes", "you", "your",
];

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |hash, b| (hash ^ u64::from(*b)).wrapping_mul(FNV_PRIME))
}

/// Lowercased content tokens of `text`, stop words removed.
pub(crate) fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .collect()
}

/// Unigram and bigram terms of `text`.
fn terms(text: &str) -> Vec<String> {
    let tokens = tokenize(text);
    let mut terms = Vec::with_capacity(tokens.len() * 2);
    for pair in tokens.windows(2) {
        terms.push(format!("{} {}", pair[0], pair[1]));
    }
    terms.extend(tokens);
    terms
}

/// A TF-IDF vectorizer over hashed unigram and bigram features.
#[derive(Debug, Clone)]
pub struct LexicalVectorizer {
    idf: Vec<f32>,
}

impl LexicalVectorizer {
    /// Fit inverse document frequencies on `corpus`.
    ///
    /// `dimensions` is clamped to at least 1.
    pub fn fit(corpus: &[&str], dimensions: usize) -> Self {
        let dimensions = dimensions.max(1);
        let mut doc_freq = vec![0u32; dimensions];
        for text in corpus {
            let buckets: HashSet<usize> =
                terms(text).iter().map(|t| bucket(t, dimensions)).collect();
            for b in buckets {
                doc_freq[b] += 1;
            }
        }

        let n = corpus.len() as f32;
        let idf = doc_freq.iter().map(|&df| ((1.0 + n) / (1.0 + df as f32)).ln() + 1.0).collect();
        Self { idf }
    }

    /// Length of every vector this vectorizer produces.
    pub fn dimensions(&self) -> usize {
        self.idf.len()
    }

    /// Vectorize `text`. Text without content terms maps to the zero vector.
    pub fn transform(&self, text: &str) -> Vec<f32> {
        let dims = self.dimensions();
        let mut vector = vec![0.0f32; dims];
        for term in terms(text) {
            let b = bucket(&term, dims);
            vector[b] += self.idf[b];
        }

        let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
        if norm > 0.0 {
            vector.iter_mut().for_each(|x| *x /= norm);
        }
        vector
    }
}

fn bucket(term: &str, dimensions: usize) -> usize {
    (fnv1a(term.as_bytes()) % dimensions as u64) as usize
}
