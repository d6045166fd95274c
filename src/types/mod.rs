//! Host document model types consumed by the index

pub mod document;
pub mod node_id;
pub mod node_set;
pub mod qname;

pub use document::{
    Document, DocumentBuilder, DocumentSet, DocumentSource, Element, NodeEvent, NodeKind, NodeRef,
};
pub use node_id::NodeId;
pub use node_set::{NodeProxy, NodeSet};
pub use qname::{NameType, QName, SymbolTable};

/// Collection ID (32-bit, big-endian in keys)
pub type CollectionId = u32;

/// Document ID
pub type DocumentId = u32;
