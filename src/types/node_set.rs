//! Node proxies and node sets

use super::{DocumentId, NameType, NodeId};
use crate::index::matches::{ContextId, Match};
use std::collections::BTreeMap;

/// Reference to a node of a stored document plus the matches found in it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeProxy {
    doc_id: DocumentId,
    node_id: NodeId,
    name_type: Option<NameType>,
    matches: Vec<Match>,
}

impl NodeProxy {
    pub fn new(doc_id: DocumentId, node_id: NodeId) -> Self {
        Self {
            doc_id,
            node_id,
            name_type: None,
            matches: Vec::new(),
        }
    }

    pub fn with_name_type(mut self, name_type: NameType) -> Self {
        self.name_type = Some(name_type);
        self
    }

    pub fn doc_id(&self) -> DocumentId {
        self.doc_id
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    pub fn name_type(&self) -> Option<NameType> {
        self.name_type
    }

    pub fn matches(&self) -> &[Match] {
        &self.matches
    }

    /// Adds a match; offsets of a match for the same target are merged.
    pub fn add_match(&mut self, m: Match) {
        match self.matches.iter_mut().find(|existing| existing.same_target(&m)) {
            Some(existing) => existing.merge_offsets(&m),
            None => self.matches.push(m),
        }
    }

    /// Removes and returns the matches produced by `context_id`.
    pub fn take_matches(&mut self, context_id: ContextId) -> Vec<Match> {
        let (taken, kept) = std::mem::take(&mut self.matches)
            .into_iter()
            .partition(|m| m.context_id() == context_id);
        self.matches = kept;
        taken
    }

    pub fn has_match_for(&self, context_id: ContextId) -> bool {
        self.matches.iter().any(|m| m.context_id() == context_id)
    }
}

/// Nodes in document order, keyed by (document, node id).
#[derive(Debug, Clone, Default)]
pub struct NodeSet {
    nodes: BTreeMap<(DocumentId, NodeId), NodeProxy>,
}

impl NodeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a proxy, merging its matches into an existing entry.
    pub fn add(&mut self, proxy: NodeProxy) {
        let key = (proxy.doc_id, proxy.node_id.clone());
        match self.nodes.get_mut(&key) {
            Some(existing) => {
                if existing.name_type.is_none() {
                    existing.name_type = proxy.name_type;
                }
                for m in proxy.matches {
                    existing.add_match(m);
                }
            }
            None => {
                self.nodes.insert(key, proxy);
            }
        }
    }

    pub fn get(&self, doc_id: DocumentId, node_id: &NodeId) -> Option<&NodeProxy> {
        self.nodes.get(&(doc_id, node_id.clone()))
    }

    pub fn contains(&self, doc_id: DocumentId, node_id: &NodeId) -> bool {
        self.get(doc_id, node_id).is_some()
    }

    /// Finds the member that is the parent (`direct_parent`) or any
    /// ancestor of `node_id`, optionally accepting the node itself.
    pub fn parent_with_child(
        &self,
        doc_id: DocumentId,
        node_id: &NodeId,
        direct_parent: bool,
        include_self: bool,
    ) -> Option<&NodeProxy> {
        if include_self {
            if let Some(found) = self.get(doc_id, node_id) {
                return Some(found);
            }
        }
        let mut current = node_id.parent();
        while let Some(ancestor) = current {
            if let Some(found) = self.get(doc_id, &ancestor) {
                return Some(found);
            }
            if direct_parent {
                return None;
            }
            current = ancestor.parent();
        }
        None
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &NodeProxy> {
        self.nodes.values()
    }

    pub fn remove(&mut self, doc_id: DocumentId, node_id: &NodeId) -> Option<NodeProxy> {
        self.nodes.remove(&(doc_id, node_id.clone()))
    }

    pub fn retain<F: FnMut(&NodeProxy) -> bool>(&mut self, mut keep: F) {
        self.nodes.retain(|_, proxy| keep(proxy));
    }

    pub fn into_vec(self) -> Vec<NodeProxy> {
        self.nodes.into_values().collect()
    }
}

impl FromIterator<NodeProxy> for NodeSet {
    fn from_iter<I: IntoIterator<Item = NodeProxy>>(iter: I) -> Self {
        let mut set = NodeSet::new();
        for proxy in iter {
            set.add(proxy);
        }
        set
    }
}

impl IntoIterator for NodeSet {
    type Item = NodeProxy;
    type IntoIter = std::collections::btree_map::IntoValues<(DocumentId, NodeId), NodeProxy>;

    fn into_iter(self) -> Self::IntoIter {
        self.nodes.into_values()
    }
}
