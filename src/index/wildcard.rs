//! Wildcard query syntax
//!
//! - `.` matches one character, `.?` zero or one, `.*` any number, `.+` at
//!   least one and `.{m,n}` between `m` and `n`.
//! - `[abc]` matches one of the enclosed characters. The class cannot be
//!   empty, so a `]` right after `[` is literal, and nothing inside the
//!   brackets is special.
//! - A leading `^` anchors at the start of the node's content and a trailing
//!   `$` at its end; anywhere else both are literal.
//! - `\` removes the special meaning of the next character.
//!
//! `?`, `*`, `+` and `{m,n}` only qualify a preceding unescaped `.`.

use super::matches::Offset;
use super::tokenizer::{fold, fold_char};
use crate::{Result, StorageError};
use std::fmt;

/// Upper bound of `.*` and `.+`.
pub const UNBOUNDED: u32 = u32::MAX;

/// Number of arbitrary characters allowed between two terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Gap {
    pub min: u32,
    pub max: u32,
}

impl Gap {
    /// Terms directly adjacent.
    pub const NONE: Gap = Gap { min: 0, max: 0 };

    pub fn new(min: u32, max: u32) -> Self {
        Self { min, max }
    }

    /// Two wildcards in a row.
    pub fn then(self, other: Gap) -> Gap {
        Gap {
            min: self.min.saturating_add(other.min),
            max: self.max.saturating_add(other.max),
        }
    }

    #[inline]
    pub fn allows(&self, distance: u32) -> bool {
        distance >= self.min && distance <= self.max
    }
}

impl Default for Gap {
    fn default() -> Self {
        Gap::NONE
    }
}

impl fmt::Display for Gap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.min, self.max) {
            (0, 0) => Ok(()),
            (1, 1) => f.write_str("."),
            (0, 1) => f.write_str(".?"),
            (0, UNBOUNDED) => f.write_str(".*"),
            (1, UNBOUNDED) => f.write_str(".+"),
            (min, UNBOUNDED) => write!(f, ".{{{},}}", min),
            (min, max) => write!(f, ".{{{},{}}}", min, max),
        }
    }
}

/// Part of a query that is looked up in the index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Term {
    /// Case-folded, unescaped text.
    Literal(String),
    /// One of these (case-folded) characters.
    Alternatives(Vec<char>),
}

#[derive(Debug)]
enum Token {
    Text(String),
    Wildcard(Gap),
    Class(Vec<char>),
    Caret,
    Dollar,
}

/// Parsed wildcard query: `leading`, then terms separated by gaps, then
/// `trailing`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WildcardQuery {
    pub start_anchor: bool,
    pub end_anchor: bool,
    pub leading: Gap,
    terms: Vec<Term>,
    /// `gaps[i]` separates `terms[i]` and `terms[i + 1]`
    gaps: Vec<Gap>,
    pub trailing: Gap,
}

impl WildcardQuery {
    pub fn parse(query: &str) -> Result<Self> {
        let mut tokens = tokenize(query)?;

        let mut parsed = WildcardQuery::default();
        if matches!(tokens.first(), Some(Token::Caret)) {
            parsed.start_anchor = true;
            tokens.remove(0);
        }
        if matches!(tokens.last(), Some(Token::Dollar)) {
            parsed.end_anchor = true;
            tokens.pop();
        }

        let mut gap = Gap::NONE;
        let mut text = String::new();
        let mut has_wildcard = false;
        for token in tokens {
            match token {
                Token::Text(s) => text.push_str(&s),
                Token::Caret => text.push('^'),
                Token::Dollar => text.push('$'),
                Token::Wildcard(g) => {
                    parsed.push_literal(&mut text, &mut gap);
                    gap = gap.then(g);
                    has_wildcard = true;
                }
                Token::Class(chars) => {
                    parsed.push_literal(&mut text, &mut gap);
                    let mut folded: Vec<char> = chars.into_iter().map(fold_char).collect();
                    folded.sort_unstable();
                    folded.dedup();
                    parsed.push_term(Term::Alternatives(folded), &mut gap);
                }
            }
        }
        parsed.push_literal(&mut text, &mut gap);
        parsed.trailing = gap;

        if parsed.terms.is_empty() && has_wildcard {
            return Err(StorageError::InvalidArgument(format!(
                "wildcard query '{}' has nothing to look up",
                query
            )));
        }
        Ok(parsed)
    }

    fn push_literal(&mut self, text: &mut String, gap: &mut Gap) {
        if !text.is_empty() {
            let literal = fold(text);
            text.clear();
            self.push_term(Term::Literal(literal), gap);
        }
    }

    fn push_term(&mut self, term: Term, gap: &mut Gap) {
        if self.terms.is_empty() {
            self.leading = *gap;
        } else {
            self.gaps.push(*gap);
        }
        self.terms.push(term);
        *gap = Gap::NONE;
    }

    /// True when nothing remains to be searched (`""`, `"^"`, `"^$"`).
    pub fn is_empty(&self) -> bool {
        self.terms.is_empty()
    }

    pub fn first(&self) -> Option<&Term> {
        self.terms.first()
    }

    /// Every term after the first, with the gap in front of it.
    pub fn steps(&self) -> impl Iterator<Item = (Gap, &Term)> {
        self.gaps.iter().copied().zip(self.terms.iter().skip(1))
    }

    /// Whether [`WildcardQuery::anchor`] needs the node's content length.
    pub fn needs_length(&self) -> bool {
        self.end_anchor || self.trailing.min > 0
    }

    /// Applies anchors and the outer gaps to one occurrence of the chained
    /// terms. Anchored occurrences are widened to the anchor.
    ///
    /// `len` is the character length of the node's content; an occurrence
    /// that needs it is dropped when it is unknown.
    pub fn anchor(&self, occurrence: Offset, len: Option<u32>) -> Option<Offset> {
        let mut o = occurrence;
        if self.start_anchor {
            if !self.leading.allows(o.offset) {
                return None;
            }
            o = Offset::new(0, o.end());
        } else if o.offset < self.leading.min {
            return None;
        }

        if self.needs_length() {
            let len = len?;
            let rest = len.checked_sub(o.end())?;
            if self.end_anchor {
                if !self.trailing.allows(rest) {
                    return None;
                }
                o = Offset::new(o.offset, len - o.offset);
            } else if rest < self.trailing.min {
                return None;
            }
        }
        Some(o)
    }
}

fn syntax_error(query: &str, reason: &str) -> StorageError {
    StorageError::InvalidArgument(format!("wildcard query '{}': {}", query, reason))
}

fn tokenize(query: &str) -> Result<Vec<Token>> {
    let chars: Vec<char> = query.chars().collect();
    let mut tokens = Vec::new();
    let mut text = String::new();

    let mut i = 0;
    while i < chars.len() {
        match chars[i] {
            '\\' => {
                let escaped = chars
                    .get(i + 1)
                    .ok_or_else(|| syntax_error(query, "ends with an unescaped backslash"))?;
                text.push(*escaped);
                i += 2;
                continue;
            }
            '.' => {
                flush_text(&mut text, &mut tokens);
                let (gap, used) = qualifier(query, &chars[i + 1..])?;
                tokens.push(Token::Wildcard(gap));
                i += used;
            }
            '[' => {
                // a class is never empty: the closing bracket is searched from i + 2
                let end = chars
                    .get(i + 2..)
                    .and_then(|rest| rest.iter().position(|&c| c == ']'))
                    .map(|pos| i + 2 + pos)
                    .ok_or_else(|| syntax_error(query, "unmatched ["))?;
                flush_text(&mut text, &mut tokens);
                tokens.push(Token::Class(chars[i + 1..end].to_vec()));
                i = end;
            }
            '^' => {
                flush_text(&mut text, &mut tokens);
                tokens.push(Token::Caret);
            }
            '$' => {
                flush_text(&mut text, &mut tokens);
                tokens.push(Token::Dollar);
            }
            c => text.push(c),
        }
        i += 1;
    }
    flush_text(&mut text, &mut tokens);
    Ok(tokens)
}

fn flush_text(text: &mut String, tokens: &mut Vec<Token>) {
    if !text.is_empty() {
        tokens.push(Token::Text(std::mem::take(text)));
    }
}

/// Qualifier following a `.`; returns the gap and the characters consumed.
fn qualifier(query: &str, rest: &[char]) -> Result<(Gap, usize)> {
    match rest.first() {
        Some('?') => Ok((Gap::new(0, 1), 1)),
        Some('*') => Ok((Gap::new(0, UNBOUNDED), 1)),
        Some('+') => Ok((Gap::new(1, UNBOUNDED), 1)),
        Some('{') => {
            let close = rest
                .iter()
                .position(|&c| c == '}')
                .ok_or_else(|| syntax_error(query, "unmatched { in qualifier"))?;
            let body: String = rest[1..close].iter().collect();
            let bounds = body.split_once(',').and_then(|(min, max)| {
                let digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
                if digits(min) && digits(max) {
                    Some((min.parse::<u32>().ok()?, max.parse::<u32>().ok()?))
                } else {
                    None
                }
            });
            match bounds {
                Some((min, max)) if min <= max => Ok((Gap::new(min, max), close + 1)),
                _ => Err(syntax_error(query, &format!("invalid qualifier {{{}}}", body))),
            }
        }
        _ => Ok((Gap::new(1, 1), 0)),
    }
}
