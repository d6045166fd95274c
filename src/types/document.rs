//! In-memory document model
//!
//! Just enough of a hierarchical document for the index to be driven and
//! inspected: elements with attributes and text children, numbered with
//! [`NodeId`]s. Attributes and children share one numbering sequence under
//! their element (attributes first), so `<p id="x">t</p>` as the root gives
//! `p=1`, `@id=1.1`, `t=1.2`.

use super::{CollectionId, DocumentId, NodeId, QName};
use crate::{Result, StorageError};
use roaring::RoaringBitmap;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::ControlFlow;

/// Node kind discriminant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeKind {
    Element,
    Attribute,
    Text,
}

/// Traversal event delivered to index listeners.
#[derive(Debug, Clone, Copy)]
pub enum NodeEvent<'a> {
    StartElement { node_id: &'a NodeId, qname: &'a QName },
    Attribute { node_id: &'a NodeId, qname: &'a QName, value: &'a str },
    Characters { node_id: &'a NodeId, text: &'a str },
    EndElement { node_id: &'a NodeId, qname: &'a QName },
}

impl<'a> NodeEvent<'a> {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeEvent::StartElement { .. } | NodeEvent::EndElement { .. } => NodeKind::Element,
            NodeEvent::Attribute { .. } => NodeKind::Attribute,
            NodeEvent::Characters { .. } => NodeKind::Text,
        }
    }

    pub fn node_id(&self) -> &'a NodeId {
        match *self {
            NodeEvent::StartElement { node_id, .. }
            | NodeEvent::Attribute { node_id, .. }
            | NodeEvent::Characters { node_id, .. }
            | NodeEvent::EndElement { node_id, .. } => node_id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Attribute {
    pub node_id: NodeId,
    pub qname: QName,
    pub value: String,
}

#[derive(Debug, Clone)]
pub struct Text {
    pub node_id: NodeId,
    pub text: String,
}

#[derive(Debug, Clone)]
pub enum Node {
    Element(Element),
    Text(Text),
}

#[derive(Debug, Clone)]
pub struct Element {
    pub node_id: NodeId,
    pub qname: QName,
    pub attributes: Vec<Attribute>,
    pub children: Vec<Node>,
}

/// Borrowed view of any node.
#[derive(Debug, Clone, Copy)]
pub enum NodeRef<'a> {
    Element(&'a Element),
    Attribute(&'a Attribute),
    Text(&'a Text),
}

impl<'a> NodeRef<'a> {
    pub fn kind(&self) -> NodeKind {
        match self {
            NodeRef::Element(_) => NodeKind::Element,
            NodeRef::Attribute(_) => NodeKind::Attribute,
            NodeRef::Text(_) => NodeKind::Text,
        }
    }

    pub fn node_id(&self) -> &'a NodeId {
        match *self {
            NodeRef::Element(e) => &e.node_id,
            NodeRef::Attribute(a) => &a.node_id,
            NodeRef::Text(t) => &t.node_id,
        }
    }

    pub fn qname(&self) -> Option<&'a QName> {
        match *self {
            NodeRef::Element(e) => Some(&e.qname),
            NodeRef::Attribute(a) => Some(&a.qname),
            NodeRef::Text(_) => None,
        }
    }

    /// Concatenated descendant text (attribute value for attributes).
    pub fn string_value(&self) -> String {
        let mut value = String::new();
        let _ = self.walk(&mut |event: &NodeEvent<'_>| {
            match event {
                NodeEvent::Characters { text, .. } => value.push_str(text),
                NodeEvent::Attribute { value: v, .. } if self.kind() == NodeKind::Attribute => {
                    value.push_str(v)
                }
                _ => {}
            }
            ControlFlow::Continue(())
        });
        value
    }

    /// Streams the events of this subtree in document order.
    pub fn walk<F>(&self, visitor: &mut F) -> ControlFlow<()>
    where
        F: FnMut(&NodeEvent<'_>) -> ControlFlow<()>,
    {
        match *self {
            NodeRef::Element(e) => walk_element(e, visitor),
            NodeRef::Attribute(a) => visitor(&NodeEvent::Attribute {
                node_id: &a.node_id,
                qname: &a.qname,
                value: &a.value,
            }),
            NodeRef::Text(t) => visitor(&NodeEvent::Characters {
                node_id: &t.node_id,
                text: &t.text,
            }),
        }
    }
}

fn walk_element<F>(element: &Element, visitor: &mut F) -> ControlFlow<()>
where
    F: FnMut(&NodeEvent<'_>) -> ControlFlow<()>,
{
    visitor(&NodeEvent::StartElement {
        node_id: &element.node_id,
        qname: &element.qname,
    })?;
    for attr in &element.attributes {
        visitor(&NodeEvent::Attribute {
            node_id: &attr.node_id,
            qname: &attr.qname,
            value: &attr.value,
        })?;
    }
    for child in &element.children {
        match child {
            Node::Element(e) => walk_element(e, visitor)?,
            Node::Text(t) => visitor(&NodeEvent::Characters {
                node_id: &t.node_id,
                text: &t.text,
            })?,
        }
    }
    visitor(&NodeEvent::EndElement {
        node_id: &element.node_id,
        qname: &element.qname,
    })
}

#[derive(Debug, Clone)]
pub struct Document {
    id: DocumentId,
    collection_id: CollectionId,
    root: Element,
}

impl Document {
    pub fn builder(id: DocumentId, collection_id: CollectionId) -> DocumentBuilder {
        DocumentBuilder::new(id, collection_id)
    }

    pub fn id(&self) -> DocumentId {
        self.id
    }

    pub fn collection_id(&self) -> CollectionId {
        self.collection_id
    }

    pub fn root(&self) -> &Element {
        &self.root
    }

    /// Resolves a node id by walking its levels from the document element.
    pub fn node(&self, node_id: &NodeId) -> Option<NodeRef<'_>> {
        let levels = node_id.levels();
        if levels.first() != Some(&1) {
            return None;
        }
        let mut current = &self.root;
        for (depth, &position) in levels.iter().enumerate().skip(1) {
            let last = depth + 1 == levels.len();
            let index = position as usize - 1;
            if index < current.attributes.len() {
                return if last {
                    Some(NodeRef::Attribute(&current.attributes[index]))
                } else {
                    None
                };
            }
            match current.children.get(index - current.attributes.len())? {
                Node::Element(e) => current = e,
                Node::Text(t) => return if last { Some(NodeRef::Text(t)) } else { None },
            }
        }
        Some(NodeRef::Element(current))
    }

    /// Streams the whole document.
    pub fn walk<F>(&self, visitor: &mut F) -> ControlFlow<()>
    where
        F: FnMut(&NodeEvent<'_>) -> ControlFlow<()>,
    {
        walk_element(&self.root, visitor)
    }

    /// Streams the subtree rooted at `node_id`.
    pub fn walk_node<F>(&self, node_id: &NodeId, visitor: &mut F) -> Result<ControlFlow<()>>
    where
        F: FnMut(&NodeEvent<'_>) -> ControlFlow<()>,
    {
        let node = self.node(node_id).ok_or_else(|| {
            StorageError::InvalidArgument(format!("node {} not found in document {}", node_id, self.id))
        })?;
        Ok(node.walk(visitor))
    }

    pub fn string_value(&self, node_id: &NodeId) -> Option<String> {
        self.node(node_id).map(|n| n.string_value())
    }
}

/// Incremental document construction with automatic node numbering.
///
/// Misuse (text outside an element, attributes after content, a second
/// document element) is reported by [`DocumentBuilder::build`].
pub struct DocumentBuilder {
    id: DocumentId,
    collection_id: CollectionId,
    stack: Vec<Element>,
    root: Option<Element>,
    error: Option<String>,
}

impl DocumentBuilder {
    pub fn new(id: DocumentId, collection_id: CollectionId) -> Self {
        Self {
            id,
            collection_id,
            stack: Vec::new(),
            root: None,
            error: None,
        }
    }

    fn next_child_id(parent: &Element) -> NodeId {
        let position = parent.attributes.len() + parent.children.len() + 1;
        parent.node_id.child(position as u32)
    }

    fn fail(&mut self, message: String) -> &mut Self {
        if self.error.is_none() {
            self.error = Some(message);
        }
        self
    }

    pub fn start_element(&mut self, qname: QName) -> &mut Self {
        let node_id = match self.stack.last() {
            Some(parent) => Self::next_child_id(parent),
            None if self.root.is_some() => {
                return self.fail(format!("second document element <{}>", qname))
            }
            None => NodeId::root(),
        };
        self.stack.push(Element {
            node_id,
            qname,
            attributes: Vec::new(),
            children: Vec::new(),
        });
        self
    }

    pub fn attribute(&mut self, qname: QName, value: impl Into<String>) -> &mut Self {
        let Some(parent) = self.stack.last_mut() else {
            return self.fail(format!("attribute {} outside an element", qname));
        };
        if !parent.children.is_empty() {
            return self.fail(format!("attribute {} after element content", qname));
        }
        let node_id = Self::next_child_id(parent);
        parent.attributes.push(Attribute {
            node_id,
            qname,
            value: value.into(),
        });
        self
    }

    /// Appends text; adjacent text is merged into one text node.
    pub fn text(&mut self, text: &str) -> &mut Self {
        if text.is_empty() {
            return self;
        }
        let Some(parent) = self.stack.last_mut() else {
            return self.fail("text outside the document element".to_string());
        };
        if let Some(Node::Text(last)) = parent.children.last_mut() {
            last.text.push_str(text);
            return self;
        }
        let node_id = Self::next_child_id(parent);
        parent.children.push(Node::Text(Text {
            node_id,
            text: text.to_string(),
        }));
        self
    }

    pub fn end_element(&mut self) -> &mut Self {
        let Some(element) = self.stack.pop() else {
            return self.fail("unbalanced end element".to_string());
        };
        match self.stack.last_mut() {
            Some(parent) => parent.children.push(Node::Element(element)),
            None => self.root = Some(element),
        }
        self
    }

    /// `<name>text</name>` in one call.
    pub fn leaf(&mut self, qname: QName, text: &str) -> &mut Self {
        self.start_element(qname).text(text).end_element()
    }

    pub fn build(&mut self) -> Result<Document> {
        if let Some(error) = self.error.take() {
            return Err(StorageError::InvalidArgument(error));
        }
        if !self.stack.is_empty() {
            return Err(StorageError::InvalidArgument(format!(
                "{} unclosed element(s)",
                self.stack.len()
            )));
        }
        let root = self
            .root
            .take()
            .ok_or_else(|| StorageError::InvalidArgument("document has no element".into()))?;
        Ok(Document {
            id: self.id,
            collection_id: self.collection_id,
            root,
        })
    }
}

//=============================================================================
// Document sets
//=============================================================================

/// Set of documents in scope for a query, with their collections.
#[derive(Debug, Clone, Default)]
pub struct DocumentSet {
    ids: RoaringBitmap,
    collections: BTreeMap<DocumentId, CollectionId>,
}

impl DocumentSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, doc_id: DocumentId, collection_id: CollectionId) {
        self.ids.insert(doc_id);
        self.collections.insert(doc_id, collection_id);
    }

    pub fn add_document(&mut self, document: &Document) {
        self.add(document.id(), document.collection_id());
    }

    #[inline]
    pub fn contains(&self, doc_id: DocumentId) -> bool {
        self.ids.contains(doc_id)
    }

    pub fn collection_of(&self, doc_id: DocumentId) -> Option<CollectionId> {
        self.collections.get(&doc_id).copied()
    }

    /// Distinct collections, ascending.
    pub fn collection_ids(&self) -> BTreeSet<CollectionId> {
        self.collections.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.ids.len() as usize
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.ids.iter()
    }
}

impl<'a> FromIterator<&'a Document> for DocumentSet {
    fn from_iter<I: IntoIterator<Item = &'a Document>>(iter: I) -> Self {
        let mut set = DocumentSet::new();
        for doc in iter {
            set.add_document(doc);
        }
        set
    }
}

/// Lookup of stored documents by id.
pub trait DocumentSource {
    fn document(&self, id: DocumentId) -> Option<&Document>;
}

impl DocumentSource for Document {
    fn document(&self, id: DocumentId) -> Option<&Document> {
        (self.id == id).then_some(self)
    }
}

impl DocumentSource for HashMap<DocumentId, Document> {
    fn document(&self, id: DocumentId) -> Option<&Document> {
        self.get(&id)
    }
}

impl DocumentSource for BTreeMap<DocumentId, Document> {
    fn document(&self, id: DocumentId) -> Option<&Document> {
        self.get(&id)
    }
}

impl DocumentSource for [Document] {
    fn document(&self, id: DocumentId) -> Option<&Document> {
        self.iter().find(|d| d.id == id)
    }
}
