//! Hierarchical node identifiers (dynamic level numbering)
//!
//! A node id is the path of 1-based child positions from the document root,
//! e.g. `1.3.2` is the second child of the third child of the root element.
//! Document order is the lexicographic order of the paths, so an ancestor
//! always sorts before its descendants.
//!
//! On disk ids are delta-encoded against the previously written id:
//! `[shared_prefix_len: varint][suffix_len: varint][suffix levels: varint...]`.
//! Decoding the N-th id of a run therefore needs the (N-1)-th.

use crate::storage::byte_stream::{VariableByteInput, VariableByteOutput};
use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId {
    levels: Vec<u32>,
}

impl NodeId {
    /// Id of the document element.
    pub fn root() -> Self {
        Self { levels: vec![1] }
    }

    pub fn from_levels(levels: Vec<u32>) -> Result<Self> {
        if levels.is_empty() || levels.contains(&0) {
            return Err(StorageError::InvalidArgument(format!(
                "invalid node id levels {:?}",
                levels
            )));
        }
        Ok(Self { levels })
    }

    /// Id of the `position`-th (1-based) child of this node.
    pub fn child(&self, position: u32) -> Self {
        let mut levels = Vec::with_capacity(self.levels.len() + 1);
        levels.extend_from_slice(&self.levels);
        levels.push(position.max(1));
        Self { levels }
    }

    pub fn parent(&self) -> Option<Self> {
        if self.levels.len() <= 1 {
            return None;
        }
        Some(Self {
            levels: self.levels[..self.levels.len() - 1].to_vec(),
        })
    }

    /// Depth in the tree; the document element is at level 1.
    pub fn tree_level(&self) -> usize {
        self.levels.len()
    }

    pub fn levels(&self) -> &[u32] {
        &self.levels
    }

    pub fn is_child_of(&self, other: &NodeId) -> bool {
        self.levels.len() == other.levels.len() + 1 && self.levels.starts_with(&other.levels)
    }

    pub fn is_descendant_of(&self, other: &NodeId) -> bool {
        self.levels.len() > other.levels.len() && self.levels.starts_with(&other.levels)
    }

    pub fn is_descendant_or_self_of(&self, other: &NodeId) -> bool {
        self.levels.starts_with(&other.levels)
    }

    pub fn is_sibling_of(&self, other: &NodeId) -> bool {
        let n = self.levels.len();
        n > 1
            && n == other.levels.len()
            && self != other
            && self.levels[..n - 1] == other.levels[..n - 1]
    }

    /// Delta-encodes this id against `previous` (None at the start of a run).
    pub fn write(&self, previous: Option<&NodeId>, out: &mut VariableByteOutput) {
        let shared = previous.map_or(0, |prev| {
            self.levels
                .iter()
                .zip(prev.levels.iter())
                .take_while(|(a, b)| a == b)
                .count()
        });
        out.write_int(shared as u32);
        out.write_int((self.levels.len() - shared) as u32);
        for &level in &self.levels[shared..] {
            out.write_int(level);
        }
    }

    /// Decodes an id written by [`NodeId::write`] with the same `previous`.
    pub fn read(previous: Option<&NodeId>, input: &mut VariableByteInput<'_>) -> Result<Self> {
        let shared = input.read_int()? as usize;
        let suffix = input.read_int()? as usize;

        let prefix: &[u32] = match previous {
            Some(prev) if shared <= prev.levels.len() => &prev.levels[..shared],
            None if shared == 0 => &[],
            _ => {
                return Err(StorageError::InvalidData(format!(
                    "node id shares {} levels with a {}-level predecessor",
                    shared,
                    previous.map_or(0, |p| p.levels.len())
                )))
            }
        };
        if shared + suffix == 0 || suffix > input.available() {
            return Err(StorageError::InvalidData(format!(
                "bad node id suffix length {}",
                suffix
            )));
        }

        let mut levels = Vec::with_capacity(shared + suffix);
        levels.extend_from_slice(prefix);
        for _ in 0..suffix {
            levels.push(input.read_int()?);
        }
        Self::from_levels(levels)
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, level) in self.levels.iter().enumerate() {
            if i > 0 {
                f.write_str(".")?;
            }
            write!(f, "{}", level)?;
        }
        Ok(())
    }
}

impl FromStr for NodeId {
    type Err = StorageError;

    fn from_str(s: &str) -> Result<Self> {
        let levels = s
            .split('.')
            .map(|part| {
                part.parse::<u32>()
                    .map_err(|_| StorageError::InvalidArgument(format!("invalid node id '{}'", s)))
            })
            .collect::<Result<Vec<_>>>()?;
        Self::from_levels(levels)
    }
}
