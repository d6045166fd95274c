//! Per-document occurrence list
//!
//! Collects (node id, offset) pairs for one key while a document is being
//! traversed. After [`OccurrenceList::sort`] entries of the same node form a
//! contiguous run; the run view (`term_count`, `occurrences_at`, `offset_at`)
//! is what the posting codec serializes.

use crate::types::NodeId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OccurrenceList {
    entries: Vec<(NodeId, u32)>,
    sorted: bool,
}

impl OccurrenceList {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            sorted: true,
        }
    }

    /// Appends without deduplication.
    pub fn add(&mut self, node_id: NodeId, offset: u32) {
        if let Some((last, last_offset)) = self.entries.last() {
            if (last, *last_offset) > (&node_id, offset) {
                self.sorted = false;
            }
        }
        self.entries.push((node_id, offset));
    }

    /// Appends every entry of `other`.
    pub fn merge(&mut self, other: &OccurrenceList) {
        for (node_id, offset) in &other.entries {
            self.add(node_id.clone(), *offset);
        }
    }

    /// Stable sort by (node id, offset).
    pub fn sort(&mut self) {
        if !self.sorted {
            self.entries.sort_by(|a, b| a.cmp(b));
            self.sorted = true;
        }
    }

    pub fn is_sorted(&self) -> bool {
        self.sorted
    }

    pub fn contains(&self, node_id: &NodeId) -> bool {
        if self.sorted {
            self.entries
                .binary_search_by(|(n, _)| n.cmp(node_id))
                .is_ok()
        } else {
            self.entries.iter().any(|(n, _)| n == node_id)
        }
    }

    /// Number of entries.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of distinct node runs.
    pub fn term_count(&self) -> usize {
        self.runs().count()
    }

    /// Length of the run starting at entry `start`.
    pub fn occurrences_at(&self, start: usize) -> usize {
        match self.entries.get(start) {
            Some((node_id, _)) => self.entries[start..]
                .iter()
                .take_while(|(n, _)| n == node_id)
                .count(),
            None => 0,
        }
    }

    pub fn offset_at(&self, i: usize) -> Option<u32> {
        self.entries.get(i).map(|(_, offset)| *offset)
    }

    /// Iterates runs as (node id, offsets of that run).
    pub fn runs(&self) -> Runs<'_> {
        Runs {
            entries: &self.entries,
            pos: 0,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&NodeId, u32)> {
        self.entries.iter().map(|(n, o)| (n, *o))
    }
}

impl Default for OccurrenceList {
    fn default() -> Self {
        Self::new()
    }
}

pub struct Runs<'a> {
    entries: &'a [(NodeId, u32)],
    pos: usize,
}

impl<'a> Iterator for Runs<'a> {
    type Item = (&'a NodeId, Vec<u32>);

    fn next(&mut self) -> Option<Self::Item> {
        let (node_id, _) = self.entries.get(self.pos)?;
        let run: Vec<u32> = self.entries[self.pos..]
            .iter()
            .take_while(|(n, _)| n == node_id)
            .map(|(_, offset)| *offset)
            .collect();
        self.pos += run.len();
        Some((node_id, run))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::seq::SliceRandom;
    use rand::Rng;

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    #[test]
    fn test_runs_after_sort() {
        let mut list = OccurrenceList::new();
        list.add(id("1.2"), 4);
        list.add(id("1.1"), 0);
        list.add(id("1.2"), 1);
        list.add(id("1.1"), 7);
        list.add(id("1.2"), 1);
        assert!(!list.is_sorted());
        assert!(list.contains(&id("1.1")));

        list.sort();
        assert_eq!(list.size(), 5);
        assert_eq!(list.term_count(), 2);
        assert_eq!(list.occurrences_at(0), 2);
        assert_eq!(list.occurrences_at(2), 3);
        assert_eq!(list.occurrences_at(5), 0);
        assert_eq!(list.offset_at(2), Some(1));
        assert_eq!(list.offset_at(4), Some(4));

        let runs: Vec<_> = list.runs().map(|(n, o)| (n.to_string(), o)).collect();
        assert_eq!(runs, vec![("1.1".to_string(), vec![0, 7]), ("1.2".to_string(), vec![1, 1, 4])]);

        assert!(list.contains(&id("1.2")));
        assert!(!list.contains(&id("1.3")));
    }

    #[test]
    fn test_sort_is_idempotent() {
        let mut rng = rand::thread_rng();
        let mut pairs: Vec<(NodeId, u32)> = (0..200)
            .map(|_| (id(&format!("1.{}", rng.gen_range(1..20))), rng.gen_range(0..50)))
            .collect();
        pairs.shuffle(&mut rng);

        let mut list = OccurrenceList::new();
        for (n, o) in pairs {
            list.add(n, o);
        }
        list.sort();
        let once = list.clone();
        list.sort();
        assert_eq!(list, once);
        assert!(list.iter().zip(list.iter().skip(1)).all(|(a, b)| a <= b));
    }

    #[test]
    fn test_merge_and_empty() {
        let empty = OccurrenceList::new();
        assert!(empty.is_empty());
        assert_eq!(empty.term_count(), 0);
        assert!(!empty.contains(&id("1")));

        let mut a = OccurrenceList::new();
        a.add(id("1.3"), 2);
        let mut b = OccurrenceList::new();
        b.add(id("1.1"), 0);
        a.merge(&b);
        a.sort();
        assert_eq!(a.iter().next(), Some((&id("1.1"), 0)));
    }
}
