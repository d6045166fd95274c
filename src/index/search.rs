//! Query engine
//!
//! Architecture:
//! - One scan per (collection, qname) pair of the request scope, each under
//!   the store's read lock
//! - Query terms shorter than `n` are prefix scans (`TruncRight`), others
//!   exact lookups (`Eq`)
//! - Every decoded node is a cancellation checkpoint ([`QueryContext::proceed`])
//!
//! Failure isolation: a key whose record fails to decode is logged and
//! skipped, a scope whose lock times out is logged and skipped. Only
//! [`StorageError::Terminated`] leaves the scan.

use super::key::NGramKey;
use super::matches::{ContextId, Match};
use super::ngram_index::NGramIndex;
use super::posting::SegmentReader;
use super::tokenizer::fold;
use crate::storage::{IndexQuery, IndexStore};
use crate::types::{DocumentId, DocumentSet, NameType, NodeId, NodeProxy, NodeSet, QName};
use crate::{Result, StorageError};
use log::{error, warn};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

//=============================================================================
// Cancellation
//=============================================================================

/// Cooperative cancellation checkpoint of a running query.
pub trait QueryContext {
    /// Returns `Err(StorageError::Terminated)` once the query must stop.
    fn proceed(&self) -> Result<()>;
}

/// Cancellation flag shared between a query and its controller, with an
/// optional deadline.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            cancelled: Arc::default(),
            deadline: Some(Instant::now() + timeout),
        }
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

impl QueryContext for CancellationToken {
    fn proceed(&self) -> Result<()> {
        if self.is_cancelled() {
            return Err(StorageError::Terminated("query cancelled".into()));
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Err(StorageError::Terminated("query deadline exceeded".into()))
            }
            _ => Ok(()),
        }
    }
}

//=============================================================================
// Requests
//=============================================================================

/// Which node a context-set hit reports.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Axis {
    /// The matching node itself.
    #[default]
    Descendant,
    /// The context node containing the match.
    Ancestor,
}

#[derive(Debug, Clone)]
pub struct SearchRequest<'a> {
    pub context_id: ContextId,
    pub docs: &'a DocumentSet,
    /// `None` (or empty) searches every qname configured for `docs`.
    pub qnames: Option<&'a [QName]>,
    /// Scanned term (case-folded).
    pub query: String,
    /// Term recorded in the matches; a suffix of `query`.
    pub ngram: String,
    pub context_set: Option<&'a NodeSet>,
    pub axis: Axis,
}

impl<'a> SearchRequest<'a> {
    pub fn new(context_id: ContextId, docs: &'a DocumentSet, query: &str) -> Self {
        let query = fold(query);
        Self {
            context_id,
            docs,
            qnames: None,
            ngram: query.clone(),
            query,
            context_set: None,
            axis: Axis::Descendant,
        }
    }

    /// Records matches for `ngram` (the tail of the scanned term).
    pub fn with_match_term(mut self, ngram: &str) -> Self {
        self.ngram = fold(ngram);
        self
    }

    pub fn with_qnames(mut self, qnames: &'a [QName]) -> Self {
        self.qnames = Some(qnames);
        self
    }

    pub fn with_context(mut self, context_set: &'a NodeSet, axis: Axis) -> Self {
        self.context_set = Some(context_set);
        self.axis = axis;
        self
    }
}

/// Per-term statistics of [`NGramIndex::scan_index`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrences {
    pub term: String,
    pub documents: BTreeSet<DocumentId>,
    /// Sum of the node frequencies.
    pub occurrences: u64,
}

impl Occurrences {
    fn new(term: &str) -> Self {
        Self {
            term: term.to_string(),
            documents: BTreeSet::new(),
            occurrences: 0,
        }
    }

    pub fn document_count(&self) -> usize {
        self.documents.len()
    }

    fn merge(&mut self, other: Occurrences) {
        self.documents.extend(other.documents);
        self.occurrences += other.occurrences;
    }
}

//=============================================================================
// Search
//=============================================================================

impl NGramIndex {
    fn scope_qnames(&self, docs: &DocumentSet, qnames: Option<&[QName]>) -> Vec<QName> {
        match qnames {
            Some(qnames) if !qnames.is_empty() => qnames.to_vec(),
            _ => self.defined_qnames(docs),
        }
    }

    /// Finds the nodes containing `request.query`.
    pub fn search(&self, request: &SearchRequest<'_>, ctx: &dyn QueryContext) -> Result<NodeSet> {
        let mut result = NodeSet::new();
        if request.query.is_empty() {
            return Ok(result);
        }
        let qnames = self.scope_qnames(request.docs, request.qnames);
        let prefix_scan = request.query.chars().count() < self.n();
        let lock = self.store();

        for collection_id in request.docs.collection_ids() {
            for qname in &qnames {
                let key = match NGramKey::term(collection_id, qname, self.symbols(), &request.query) {
                    Ok(key) => key.into_bytes(),
                    Err(e) => {
                        warn!("{}: no key for '{}' in {}: {}", lock.name(), request.query, qname, e);
                        continue;
                    }
                };
                let query = if prefix_scan {
                    IndexQuery::TruncRight(key)
                } else {
                    IndexQuery::Eq(key)
                };

                let store = match lock.read() {
                    Ok(store) => store,
                    Err(e) => {
                        warn!("Failed to acquire lock for '{}': {}", lock.name(), e);
                        continue;
                    }
                };
                let scanned = store.query(&query, &mut |key: &[u8], record: &[u8]| {
                    match self.read_matches(request, key, record, ctx) {
                        Ok(found) => {
                            for proxy in found {
                                result.add(proxy);
                            }
                            Ok(true)
                        }
                        Err(e) if e.is_terminated() => Err(e),
                        Err(e) => {
                            error!(
                                "{} in '{}' (key {})",
                                e,
                                store.file_path().display(),
                                describe_key(key)
                            );
                            Ok(true)
                        }
                    }
                });
                if let Err(e) = scanned {
                    if e.is_terminated() {
                        return Err(e);
                    }
                    error!("{} in '{}'", e, store.file_path().display());
                }
            }
        }
        Ok(result)
    }

    /// Decodes one record into result proxies; nothing is kept on error.
    fn read_matches(
        &self,
        request: &SearchRequest<'_>,
        key: &[u8],
        record: &[u8],
        ctx: &dyn QueryContext,
    ) -> Result<NodeSet> {
        let current = NGramKey::ngram_of(key)?;
        // a longer stored n-gram matched by prefix: shift to the term's position in it
        let diff = if current.len() > request.ngram.len() {
            current
                .rfind(request.ngram.as_str())
                .map_or(0, |pos| current[..pos].chars().count() as u32)
        } else {
            0
        };
        let length = request.ngram.chars().count() as u32;

        let mut found = NodeSet::new();
        let mut reader = SegmentReader::new(record);
        while let Some(segment) = reader.next_segment()? {
            let doc_id = segment.header.doc_id;
            if !request.docs.contains(doc_id) {
                continue;
            }
            let mut runs = segment.entries();
            while let Some((node_id, frequency)) = runs.next_node()? {
                match self.result_proxy(request, doc_id, &node_id, segment.header.name_type) {
                    Some(mut proxy) => {
                        let mut m = Match::new(request.context_id, node_id, request.ngram.as_str());
                        for offset in runs.read_offsets(frequency)? {
                            m.add_offset(offset + diff, length);
                        }
                        proxy.add_match(m);
                        found.add(proxy);
                    }
                    None => runs.skip_offsets(frequency)?,
                }
                ctx.proceed()?;
            }
        }
        Ok(found)
    }

    fn result_proxy(
        &self,
        request: &SearchRequest<'_>,
        doc_id: DocumentId,
        node_id: &NodeId,
        name_type: NameType,
    ) -> Option<NodeProxy> {
        let Some(context_set) = request.context_set else {
            return Some(NodeProxy::new(doc_id, node_id.clone()).with_name_type(name_type));
        };
        let parent = context_set.parent_with_child(doc_id, node_id, false, true)?;
        Some(match request.axis {
            Axis::Descendant => NodeProxy::new(doc_id, node_id.clone()).with_name_type(name_type),
            // keeps the matches the context node already carries
            Axis::Ancestor => parent.clone(),
        })
    }

    //=========================================================================
    // Index statistics
    //=========================================================================

    /// Lists the indexed terms of `docs` with their document and occurrence
    /// counts, in term order.
    ///
    /// Without `start` every term of each (collection, qname) is listed;
    /// `start` alone lists the terms it prefixes; `end` bounds the range
    /// (inclusive).
    pub fn scan_index(
        &self,
        docs: &DocumentSet,
        context_set: Option<&NodeSet>,
        qnames: Option<&[QName]>,
        start: Option<&str>,
        end: Option<&str>,
        ctx: &dyn QueryContext,
    ) -> Result<Vec<Occurrences>> {
        let qnames = self.scope_qnames(docs, qnames);
        let start = start.map(fold);
        let end = end.map(fold);
        let lock = self.store();
        let mut terms: BTreeMap<String, Occurrences> = BTreeMap::new();

        for qname in &qnames {
            for collection_id in docs.collection_ids() {
                let query = match self.scan_query(collection_id, qname, start.as_deref(), end.as_deref()) {
                    Ok(query) => query,
                    Err(e) => {
                        warn!("{}: cannot scan {}: {}", lock.name(), qname, e);
                        continue;
                    }
                };
                let store = match lock.read() {
                    Ok(store) => store,
                    Err(e) => {
                        warn!("Failed to acquire lock for '{}': {}", lock.name(), e);
                        continue;
                    }
                };
                let scanned = store.query(&query, &mut |key: &[u8], record: &[u8]| {
                    match count_occurrences(docs, context_set, key, record, ctx) {
                        Ok(found) => {
                            match terms.get_mut(&found.term) {
                                Some(existing) => existing.merge(found),
                                None => {
                                    terms.insert(found.term.clone(), found);
                                }
                            }
                            Ok(true)
                        }
                        Err(e) if e.is_terminated() => Err(e),
                        Err(e) => {
                            error!(
                                "{} in '{}' (key {})",
                                e,
                                store.file_path().display(),
                                describe_key(key)
                            );
                            Ok(true)
                        }
                    }
                });
                if let Err(e) = scanned {
                    if e.is_terminated() {
                        return Err(e);
                    }
                    error!("{} in '{}'", e, store.file_path().display());
                }
            }
        }
        Ok(terms
            .into_values()
            .filter(|o| !o.documents.is_empty())
            .collect())
    }

    fn scan_query(
        &self,
        collection_id: u32,
        qname: &QName,
        start: Option<&str>,
        end: Option<&str>,
    ) -> Result<IndexQuery> {
        let symbols = self.symbols();
        Ok(match (start, end) {
            (None, None) => IndexQuery::TruncRight(NGramKey::qname(collection_id, qname, symbols)?.into_bytes()),
            (Some(start), None) => {
                IndexQuery::TruncRight(NGramKey::term(collection_id, qname, symbols, start)?.into_bytes())
            }
            (start, Some(end)) => IndexQuery::Between(
                NGramKey::term(collection_id, qname, symbols, start.unwrap_or(""))?.into_bytes(),
                NGramKey::term(collection_id, qname, symbols, end)?.into_bytes(),
            ),
        })
    }
}

fn count_occurrences(
    docs: &DocumentSet,
    context_set: Option<&NodeSet>,
    key: &[u8],
    record: &[u8],
    ctx: &dyn QueryContext,
) -> Result<Occurrences> {
    let mut found = Occurrences::new(NGramKey::ngram_of(key)?);
    let mut reader = SegmentReader::new(record);
    while let Some(segment) = reader.next_segment()? {
        let doc_id = segment.header.doc_id;
        if !docs.contains(doc_id) {
            continue;
        }
        let mut runs = segment.entries();
        while let Some((node_id, frequency)) = runs.next_node()? {
            runs.skip_offsets(frequency)?;
            let include = context_set.map_or(true, |set| {
                set.parent_with_child(doc_id, &node_id, false, true).is_some()
            });
            if include {
                found.documents.insert(doc_id);
                found.occurrences += u64::from(frequency);
            }
            ctx.proceed()?;
        }
    }
    Ok(found)
}

fn describe_key(key: &[u8]) -> String {
    match NGramKey::decode(key) {
        Ok(parts) => parts.to_string(),
        Err(_) => format!("{:02x?}", key),
    }
}
