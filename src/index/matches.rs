//! Match metadata attached to query results
//!
//! Offsets are character positions within the string value of the node the
//! match is attached to.

use super::wildcard::Gap;
use crate::types::NodeId;
use std::fmt;

/// Identifies the query expression that produced a match.
pub type ContextId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Offset {
    pub offset: u32,
    pub length: u32,
}

impl Offset {
    pub fn new(offset: u32, length: u32) -> Self {
        Self { offset, length }
    }

    #[inline]
    pub fn end(&self) -> u32 {
        self.offset + self.length
    }

    pub fn overlaps(&self, other: &Offset) -> bool {
        self.offset < other.end() && other.offset < self.end()
    }
}

/// N-gram match found in one node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Match {
    context_id: ContextId,
    node_id: NodeId,
    term: String,
    offsets: Vec<Offset>,
}

impl Match {
    pub fn new(context_id: ContextId, node_id: NodeId, term: impl Into<String>) -> Self {
        Self {
            context_id,
            node_id,
            term: term.into(),
            offsets: Vec::new(),
        }
    }

    pub fn context_id(&self) -> ContextId {
        self.context_id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn term(&self) -> &str {
        &self.term
    }

    pub fn offsets(&self) -> &[Offset] {
        &self.offsets
    }

    /// Number of recorded occurrences.
    pub fn frequency(&self) -> usize {
        self.offsets.len()
    }

    pub fn add_offset(&mut self, offset: u32, length: u32) {
        self.offsets.push(Offset::new(offset, length));
    }

    /// Same expression, node and term.
    pub fn same_target(&self, other: &Match) -> bool {
        self.context_id == other.context_id && self.node_id == other.node_id && self.term == other.term
    }

    /// Absorbs the offsets of a match for the same target.
    pub fn merge_offsets(&mut self, other: &Match) {
        for offset in &other.offsets {
            if !self.offsets.contains(offset) {
                self.offsets.push(*offset);
            }
        }
    }

    /// Joins this match with one that starts exactly where an occurrence of
    /// this one ends, yielding the longer term at the earlier offsets.
    ///
    /// Returns `None` when the two never touch.
    pub fn continued_by(&self, other: &Match) -> Option<Match> {
        self.followed_by(other, Gap::NONE)
    }

    /// Joins every occurrence of this match with every occurrence of `other`
    /// that starts after it, `gap` characters later. The joined offset spans
    /// both occurrences and the characters between them.
    pub fn followed_by(&self, other: &Match, gap: Gap) -> Option<Match> {
        if self.node_id != other.node_id {
            return None;
        }
        let mut joined: Option<Match> = None;
        for head in &self.offsets {
            for tail in &other.offsets {
                if tail.offset >= head.end() && gap.allows(tail.offset - head.end()) {
                    joined
                        .get_or_insert_with(|| {
                            Match::new(
                                self.context_id,
                                self.node_id.clone(),
                                format!("{}{}{}", self.term, gap, other.term),
                            )
                        })
                        .add_offset(head.offset, tail.end() - head.offset);
                }
            }
        }
        joined
    }

    /// Rewrites each offset, dropping those mapped to `None`. Returns `None`
    /// when no offset is left.
    pub fn map_offsets(&self, mut f: impl FnMut(Offset) -> Option<Offset>) -> Option<Match> {
        let mut offsets: Vec<Offset> = Vec::with_capacity(self.offsets.len());
        for mapped in self.offsets.iter().filter_map(|o| f(*o)) {
            if !offsets.contains(&mapped) {
                offsets.push(mapped);
            }
        }
        if offsets.is_empty() {
            return None;
        }
        Some(Match {
            context_id: self.context_id,
            node_id: self.node_id.clone(),
            term: self.term.clone(),
            offsets,
        })
    }

    /// Keeps the first of any run of overlapping offsets (in offset order).
    pub fn filter_out_overlapping_offsets(&self) -> Match {
        let mut sorted = self.offsets.clone();
        sorted.sort();
        let mut kept: Vec<Offset> = Vec::with_capacity(sorted.len());
        for offset in sorted {
            if kept.last().map_or(true, |last| !last.overlaps(&offset)) {
                kept.push(offset);
            }
        }
        Match {
            context_id: self.context_id,
            node_id: self.node_id.clone(),
            term: self.term.clone(),
            offsets: kept,
        }
    }
}

impl fmt::Display for Match {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{} [", self.term, self.node_id)?;
        for (i, o) in self.offsets.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}+{}", o.offset, o.length)?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node() -> NodeId {
        "1.2".parse().unwrap()
    }

    #[test]
    fn test_continued_by() {
        let mut head = Match::new(1, node(), "hel");
        head.add_offset(0, 3);
        head.add_offset(10, 3);
        let mut tail = Match::new(1, node(), "lo");
        tail.add_offset(3, 2);
        tail.add_offset(20, 2);

        let joined = head.continued_by(&tail).unwrap();
        assert_eq!(joined.term(), "hello");
        assert_eq!(joined.offsets(), &[Offset::new(0, 5)]);

        let mut elsewhere = Match::new(1, "1.3".parse().unwrap(), "lo");
        elsewhere.add_offset(3, 2);
        assert!(head.continued_by(&elsewhere).is_none());

        let mut apart = Match::new(1, node(), "lo");
        apart.add_offset(4, 2);
        assert!(head.continued_by(&apart).is_none());
    }

    #[test]
    fn test_followed_by_gap() {
        let mut head = Match::new(1, node(), "c");
        head.add_offset(0, 1);
        head.add_offset(8, 1);
        let mut tail = Match::new(1, node(), "t");
        tail.add_offset(2, 1);
        tail.add_offset(5, 1);

        let one = head.followed_by(&tail, Gap::new(1, 1)).unwrap();
        assert_eq!(one.term(), "c.t");
        assert_eq!(one.offsets(), &[Offset::new(0, 3)]);

        let some = head.followed_by(&tail, Gap::new(1, 4)).unwrap();
        assert_eq!(some.term(), "c.{1,4}t");
        assert_eq!(some.offsets(), &[Offset::new(0, 3), Offset::new(0, 6)]);

        // tails before the head never join
        assert!(head.followed_by(&tail, Gap::new(10, 20)).is_none());
    }

    #[test]
    fn test_map_offsets() {
        let mut m = Match::new(1, node(), "cat");
        m.add_offset(0, 3);
        m.add_offset(4, 3);
        m.add_offset(9, 3);
        let shifted = m
            .map_offsets(|o| (o.offset > 0).then(|| Offset::new(0, o.end())))
            .unwrap();
        assert_eq!(shifted.offsets(), &[Offset::new(0, 7), Offset::new(0, 12)]);
        assert!(m.map_offsets(|_| None).is_none());
    }

    #[test]
    fn test_filter_overlapping() {
        let mut m = Match::new(1, node(), "aaa");
        m.add_offset(2, 3);
        m.add_offset(0, 3);
        m.add_offset(1, 3);
        m.add_offset(3, 3);
        m.add_offset(6, 3);
        let filtered = m.filter_out_overlapping_offsets();
        assert_eq!(filtered.offsets(), &[Offset::new(0, 3), Offset::new(3, 3), Offset::new(6, 3)]);
    }

    #[test]
    fn test_merge_offsets() {
        let mut a = Match::new(1, node(), "cat");
        a.add_offset(4, 3);
        let mut b = Match::new(1, node(), "cat");
        b.add_offset(4, 3);
        b.add_offset(12, 3);
        assert!(a.same_target(&b));
        a.merge_offsets(&b);
        assert_eq!(a.frequency(), 2);
        assert_eq!(a.to_string(), "cat@1.2 [4+3, 12+3]");
    }
}
