//! The boundary between raw sentences and the flat buffers convolutions consume.

use std::collections::HashMap;

use crate::{Error, Result};

/// Splits a sentence into word tokens.
pub trait Tokenizer {
    fn tokenize(&self, sentence: &str) -> Vec<String>;
}

impl<F> Tokenizer for F
where
    F: Fn(&str) -> Vec<String>,
{
    fn tokenize(&self, sentence: &str) -> Vec<String> {
        self(sentence)
    }
}

/// Whitespace tokenizer that also splits off trailing punctuation.
#[derive(Debug, Clone, Copy, Default)]
pub struct WhitespaceTokenizer;

impl Tokenizer for WhitespaceTokenizer {
    fn tokenize(&self, sentence: &str) -> Vec<String> {
        let mut tokens = Vec::new();
        for word in sentence.split_whitespace() {
            let trimmed = word.trim_end_matches(|c: char| c.is_ascii_punctuation());
            if !trimmed.is_empty() {
                tokens.push(trimmed.to_string());
            }
            if trimmed.len() < word.len() {
                tokens.push(word[trimmed.len()..].to_string());
            }
        }
        tokens
    }
}

/// Dense word vectors of one fixed dimension.
pub trait EmbeddingProvider {
    fn dim(&self) -> usize;

    /// Vector of an already lowercased word, `None` if the word is unknown.
    fn vector(&self, word: &str) -> Option<&[f64]>;
}

/// In-memory word vectors keyed by lowercase word.
#[derive(Debug, Clone)]
pub struct WordVectors {
    dim: usize,
    vectors: HashMap<String, Box<[f64]>>,
}

impl WordVectors {
    pub fn new(dim: usize) -> Self {
        assert!(dim != 0);
        Self {
            dim,
            vectors: HashMap::new(),
        }
    }

    pub fn insert(&mut self, word: &str, vector: &[f64]) -> Result<()> {
        if vector.len() != self.dim {
            return Err(Error::LengthMismatch {
                expected: self.dim,
                found: vector.len(),
            });
        }
        self.vectors.insert(word.to_lowercase(), vector.into());
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }
}

impl EmbeddingProvider for WordVectors {
    fn dim(&self) -> usize {
        self.dim
    }

    fn vector(&self, word: &str) -> Option<&[f64]> {
        self.vectors.get(word).map(|vector| &vector[..])
    }
}

/// Truncation and zero-padding applied to a token sequence, in tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Padding {
    pub min_tokens: usize,
    pub max_tokens: usize,
}

impl Default for Padding {
    fn default() -> Self {
        Self {
            min_tokens: 3,
            max_tokens: 64,
        }
    }
}

/// Row-major `n_rows x dim` matrix of word vectors, one row per token.
#[derive(Debug, Clone, PartialEq)]
pub struct SentenceMatrix {
    dim: usize,
    n_known: usize,
    values: Vec<f64>,
}

impl SentenceMatrix {
    pub fn build<S: AsRef<str>>(
        tokens: &[S],
        provider: &impl EmbeddingProvider,
        padding: Padding,
    ) -> Self {
        let dim = provider.dim();
        assert!(dim != 0, "word vectors must not be empty");
        let n_tokens = tokens.len().min(padding.max_tokens);
        let n_rows = n_tokens.max(padding.min_tokens);
        let mut values = vec![0.0; n_rows * dim];
        let mut n_known = 0;
        for (row, token) in values.chunks_exact_mut(dim).zip(&tokens[..n_tokens]) {
            if let Some(vector) = provider.vector(&token.as_ref().to_lowercase()) {
                row.copy_from_slice(vector);
                n_known += 1;
            }
        }
        Self { dim, n_known, values }
    }

    /// Tokenizes `sentence` and builds its matrix.
    pub fn from_sentence(
        sentence: &str,
        tokenizer: &impl Tokenizer,
        provider: &impl EmbeddingProvider,
        padding: Padding,
    ) -> Self {
        Self::build(&tokenizer.tokenize(sentence), provider, padding)
    }

    pub fn dim(&self) -> usize {
        self.dim
    }

    pub fn n_rows(&self) -> usize {
        self.values.len() / self.dim
    }

    /// Rows that came from a known word.
    pub fn n_known(&self) -> usize {
        self.n_known
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.dim..(i + 1) * self.dim]
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.values
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vectors() -> WordVectors {
        let mut vectors = WordVectors::new(2);
        vectors.insert("good", &[1.0, 0.0]).unwrap();
        vectors.insert("Bad", &[0.0, 1.0]).unwrap();
        vectors
    }

    #[test]
    fn lowercases_and_zeroes_misses() {
        let matrix = SentenceMatrix::build(&["GOOD", "weird", "bad"], &vectors(), Padding::default());
        assert_eq!(matrix.n_rows(), 3);
        assert_eq!(matrix.n_known(), 2);
        assert_eq!(matrix.as_slice(), &[1.0, 0.0, 0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn pads_and_truncates() {
        let padding = Padding {
            min_tokens: 3,
            max_tokens: 4,
        };
        let short = SentenceMatrix::build(&["good"], &vectors(), padding);
        assert_eq!(short.n_rows(), 3);
        assert_eq!(short.row(2), &[0.0, 0.0]);
        let long = SentenceMatrix::build(&["bad"; 6], &vectors(), padding);
        assert_eq!(long.n_rows(), 4);
        assert_eq!(long.n_known(), 4);
    }

    #[test]
    fn tokenizes_with_closures_and_whitespace() {
        let split = |s: &str| s.split(',').map(str::to_string).collect::<Vec<_>>();
        assert_eq!(split.tokenize("a,b"), ["a", "b"]);
        assert_eq!(WhitespaceTokenizer.tokenize("Not good ."), ["Not", "good", "."]);
        assert_eq!(WhitespaceTokenizer.tokenize("great!"), ["great", "!"]);
    }

    #[test]
    fn rejects_vectors_of_the_wrong_dimension() {
        let mut vectors = WordVectors::new(3);
        assert!(matches!(
            vectors.insert("x", &[1.0]),
            Err(Error::LengthMismatch { expected: 3, found: 1 })
        ));
        assert!(vectors.is_empty());
    }
}
