//! N-gram tokenizer
//!
//! - `tokenize`: one window per character position; windows near the end
//!   are shorter than `n` (a text of length L yields exactly L windows)
//! - `distinct_ngrams`: non-overlapping chunks of `n` (last may be shorter)
//!
//! Both case-fold with a per-character simple lowercase mapping. A character
//! whose lowercase form is not a single character is kept as is, so folding
//! never changes the character count and offsets stay aligned with the
//! original text.

/// Character offset of a token in the tokenized text
pub type Position = u32;

/// Token produced by tokenizer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub text: String,
    pub position: Position,
}

/// Tokenizer trait for pluggable text analysis
pub trait Tokenizer: Send + Sync {
    /// Tokenize text into a list of tokens
    fn tokenize(&self, text: &str) -> Vec<Token>;

    /// Get tokenizer name
    fn name(&self) -> &str;
}

#[inline]
pub fn fold_char(c: char) -> char {
    let mut lower = c.to_lowercase();
    match (lower.next(), lower.next()) {
        (Some(l), None) => l,
        _ => c,
    }
}

/// Case-folds a whole string with [`fold_char`].
pub fn fold(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

/// Reusable scratch buffer holding the folded characters of one text.
///
/// Owned by an indexing pass and lent to the tokenizer per text.
#[derive(Debug, Default)]
pub struct TokenBuffer {
    chars: Vec<char>,
}

impl TokenBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    fn load(&mut self, text: &str) -> &[char] {
        self.chars.clear();
        self.chars.extend(text.chars().map(fold_char));
        &self.chars
    }
}

#[derive(Debug, Clone)]
pub struct NGramTokenizer {
    n: usize,
}

impl NGramTokenizer {
    /// `n` is clamped to at least 1.
    pub fn new(n: usize) -> Self {
        Self { n: n.max(1) }
    }

    pub fn n(&self) -> usize {
        self.n
    }

    /// Lazily yields the overlapping windows of `text`.
    ///
    /// The iterator is `Clone`, so a sequence can be restarted.
    pub fn ngrams<'b>(&self, text: &str, buffer: &'b mut TokenBuffer) -> NGrams<'b> {
        NGrams {
            chars: buffer.load(text),
            n: self.n,
            pos: 0,
            step: 1,
        }
    }

    /// Lazily yields the non-overlapping chunks of `text`.
    pub fn distinct<'b>(&self, text: &str, buffer: &'b mut TokenBuffer) -> NGrams<'b> {
        NGrams {
            chars: buffer.load(text),
            n: self.n,
            pos: 0,
            step: self.n,
        }
    }

    pub fn distinct_ngrams(&self, text: &str) -> Vec<String> {
        let mut buffer = TokenBuffer::new();
        self.distinct(text, &mut buffer).map(|t| t.text).collect()
    }
}

impl Tokenizer for NGramTokenizer {
    fn tokenize(&self, text: &str) -> Vec<Token> {
        let mut buffer = TokenBuffer::new();
        self.ngrams(text, &mut buffer).collect()
    }

    fn name(&self) -> &str {
        "ngram"
    }
}

/// Window iterator over a folded character buffer.
#[derive(Debug, Clone)]
pub struct NGrams<'b> {
    chars: &'b [char],
    n: usize,
    pos: usize,
    step: usize,
}

impl<'b> Iterator for NGrams<'b> {
    type Item = Token;

    fn next(&mut self) -> Option<Token> {
        if self.pos >= self.chars.len() {
            return None;
        }
        let end = (self.pos + self.n).min(self.chars.len());
        let token = Token {
            text: self.chars[self.pos..end].iter().collect(),
            position: self.pos as Position,
        };
        self.pos += self.step;
        Some(token)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let left = self.chars.len().saturating_sub(self.pos);
        let count = (left + self.step - 1) / self.step;
        (count, Some(count))
    }
}

impl ExactSizeIterator for NGrams<'_> {}
