//! Index maintenance
//!
//! Each (document, mode) pass gets its own [`IndexPass`]. Traversal events
//! fill one [`OccurrenceList`] per (qname, n-gram); `flush` consumes the
//! pass and writes or prunes the postings:
//! - `Store`: append a fresh segment for the document under every key
//! - `RemoveAllNodes`: drop the document's segment from every key
//! - `RemoveSomeNodes`: rebuild the document's segment without the nodes
//!   streamed through this pass
//!
//! Failures are isolated per key: the key is logged and skipped, and the
//! remaining keys are still processed.

use super::key::NGramKey;
use super::ngram_index::NGramIndex;
use super::occurrences::OccurrenceList;
use super::posting::{encode_segment, SegmentReader};
use super::tokenizer::TokenBuffer;
use crate::config::CollectionIndexConfig;
use crate::storage::byte_stream::VariableByteOutput;
use crate::storage::IndexStore;
use crate::types::{CollectionId, Document, DocumentId, NodeEvent, NodeId, QName};
use crate::Result;
use log::{error, trace, warn};
use std::collections::BTreeMap;
use std::ops::ControlFlow;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReindexMode {
    Store,
    RemoveSomeNodes,
    RemoveAllNodes,
}

/// Outcome of one flush.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Keys appended to or rewritten.
    pub keys_written: usize,
    /// Keys deleted because their last segment went away.
    pub keys_removed: usize,
    /// Keys skipped after a lock, codec or I/O failure.
    pub keys_failed: usize,
}

/// Indexed element whose text is still being collected.
struct PendingElement {
    node_id: NodeId,
    qname: QName,
    content: String,
}

/// Result of pruning one record.
#[derive(Debug, PartialEq, Eq)]
pub enum RecordRewrite {
    /// The document had no segment in the record.
    Unchanged,
    Replace(Vec<u8>),
    /// Nothing is left under the key.
    Delete,
}

/// State of one indexing pass.
pub struct IndexPass<'i> {
    index: &'i NGramIndex,
    doc_id: DocumentId,
    collection_id: CollectionId,
    mode: ReindexMode,
    config: Option<Arc<CollectionIndexConfig>>,
    content_stack: Vec<PendingElement>,
    ngrams: BTreeMap<(QName, String), OccurrenceList>,
    buffer: TokenBuffer,
}

impl<'i> IndexPass<'i> {
    pub(crate) fn new(
        index: &'i NGramIndex,
        doc_id: DocumentId,
        collection_id: CollectionId,
        mode: ReindexMode,
    ) -> Self {
        Self {
            index,
            doc_id,
            collection_id,
            mode,
            config: index.collection_config(collection_id),
            content_stack: Vec::new(),
            ngrams: BTreeMap::new(),
            buffer: TokenBuffer::new(),
        }
    }

    pub fn doc_id(&self) -> DocumentId {
        self.doc_id
    }

    pub fn mode(&self) -> ReindexMode {
        self.mode
    }

    /// Number of (qname, n-gram) keys buffered so far.
    pub fn pending_keys(&self) -> usize {
        self.ngrams.len()
    }

    fn is_indexed(&self, qname: &QName) -> bool {
        self.config.as_ref().map_or(false, |c| c.is_indexed(qname))
    }

    /// Feeds one traversal event.
    pub fn on_event(&mut self, event: &NodeEvent<'_>) {
        match *event {
            NodeEvent::StartElement { node_id, qname } => {
                if self.is_indexed(qname) {
                    self.content_stack.push(PendingElement {
                        node_id: node_id.clone(),
                        qname: qname.clone(),
                        content: String::new(),
                    });
                }
            }
            NodeEvent::Attribute { node_id, qname, value } => {
                if self.is_indexed(qname) {
                    self.index_text(node_id, qname, value);
                }
            }
            NodeEvent::Characters { text, .. } => {
                for pending in &mut self.content_stack {
                    pending.content.push_str(text);
                }
            }
            NodeEvent::EndElement { node_id, .. } => {
                if self.content_stack.last().map_or(false, |p| &p.node_id == node_id) {
                    if let Some(pending) = self.content_stack.pop() {
                        self.index_text(&pending.node_id, &pending.qname, &pending.content);
                    }
                }
            }
        }
    }

    fn index_text(&mut self, node_id: &NodeId, qname: &QName, text: &str) {
        let tokenizer = self.index.tokenizer();
        for token in tokenizer.ngrams(text, &mut self.buffer) {
            self.ngrams
                .entry((qname.clone(), token.text))
                .or_default()
                .add(node_id.clone(), token.position);
        }
    }

    /// Streams a whole document through the pass.
    pub fn index_document(&mut self, document: &Document) {
        let _ = document.walk(&mut |event: &NodeEvent<'_>| {
            self.on_event(event);
            ControlFlow::Continue(())
        });
    }

    /// Streams the subtree rooted at `node_id` through the pass.
    pub fn index_node(&mut self, document: &Document, node_id: &NodeId) -> Result<()> {
        document.walk_node(node_id, &mut |event: &NodeEvent<'_>| {
            self.on_event(event);
            ControlFlow::Continue(())
        })?;
        Ok(())
    }

    /// Writes or prunes the buffered postings and ends the pass.
    pub fn flush(mut self) -> FlushReport {
        if self.ngrams.is_empty() {
            return FlushReport::default();
        }
        trace!(
            "flushing {} keys of document {} ({:?})",
            self.pending_keys(),
            self.doc_id,
            self.mode
        );
        let ngrams = std::mem::take(&mut self.ngrams);
        let report = match self.mode {
            ReindexMode::Store => self.save_index(ngrams),
            ReindexMode::RemoveSomeNodes | ReindexMode::RemoveAllNodes => self.drop_index(ngrams),
        };
        trace!(
            "flushed document {} ({:?}): {:?}",
            self.doc_id,
            self.mode,
            report
        );
        report
    }

    fn key_for(&self, qname: &QName, term: &str) -> Result<NGramKey> {
        NGramKey::term(self.collection_id, qname, self.index.symbols(), term)
    }

    fn save_index(&self, ngrams: BTreeMap<(QName, String), OccurrenceList>) -> FlushReport {
        let mut report = FlushReport::default();
        let lock = self.index.store();
        let mut out = VariableByteOutput::new();

        for ((qname, term), mut occurrences) in ngrams {
            if occurrences.is_empty() {
                continue;
            }
            occurrences.sort();
            out.clear();

            let key = match self
                .key_for(&qname, &term)
                .and_then(|key| encode_segment(&mut out, self.doc_id, qname.name_type(), &occurrences).map(|_| key))
            {
                Ok(key) => key,
                Err(e) => {
                    warn!("{}: failed to encode '{}' for {}: {}", lock.name(), term, qname, e);
                    report.keys_failed += 1;
                    continue;
                }
            };

            let mut store = match lock.write() {
                Ok(store) => store,
                Err(e) => {
                    warn!("{}: skipping '{}': {}", lock.name(), term, e);
                    report.keys_failed += 1;
                    continue;
                }
            };
            match store.append(key.as_bytes(), out.as_slice()) {
                Ok(()) => report.keys_written += 1,
                Err(e) => {
                    warn!(
                        "{}: failed to append postings of '{}': {}",
                        store.file_path().display(),
                        term,
                        e
                    );
                    report.keys_failed += 1;
                }
            }
        }
        report
    }

    fn drop_index(&self, ngrams: BTreeMap<(QName, String), OccurrenceList>) -> FlushReport {
        let mut report = FlushReport::default();
        let lock = self.index.store();

        for ((qname, term), mut removed) in ngrams {
            removed.sort();
            let key = match self.key_for(&qname, &term) {
                Ok(key) => key,
                Err(e) => {
                    warn!("{}: no key for '{}' in {}: {}", lock.name(), term, qname, e);
                    report.keys_failed += 1;
                    continue;
                }
            };

            let mut store = match lock.write() {
                Ok(store) => store,
                Err(e) => {
                    warn!("{}: skipping removal of '{}': {}", lock.name(), term, e);
                    report.keys_failed += 1;
                    continue;
                }
            };
            let filter = match self.mode {
                ReindexMode::RemoveSomeNodes => Some(&removed),
                _ => None,
            };
            match prune_key(&mut *store, key.as_bytes(), self.doc_id, filter) {
                Ok(RecordRewrite::Unchanged) => {}
                Ok(RecordRewrite::Replace(_)) => report.keys_written += 1,
                Ok(RecordRewrite::Delete) => report.keys_removed += 1,
                Err(e) => {
                    error!(
                        "{}: failed to remove document {} from '{}': {}",
                        store.file_path().display(),
                        self.doc_id,
                        term,
                        e
                    );
                    report.keys_failed += 1;
                }
            }
        }
        report
    }
}

/// Read-merge-write of one key; the caller holds the write lock.
fn prune_key<S: IndexStore + ?Sized>(
    store: &mut S,
    key: &[u8],
    doc_id: DocumentId,
    removed: Option<&OccurrenceList>,
) -> Result<RecordRewrite> {
    let Some(record) = store.get(key)? else {
        return Ok(RecordRewrite::Unchanged);
    };
    let rewrite = rebuild_record(&record, doc_id, removed)?;
    match &rewrite {
        RecordRewrite::Unchanged => {}
        RecordRewrite::Replace(body) => store.put(key, body)?,
        RecordRewrite::Delete => {
            store.remove(key)?;
        }
    }
    Ok(rewrite)
}

/// Rebuilds a record without `doc_id`'s segment (`removed == None`) or
/// without the nodes of that segment contained in `removed`.
///
/// Segments of other documents are copied verbatim.
pub fn rebuild_record(
    record: &[u8],
    doc_id: DocumentId,
    removed: Option<&OccurrenceList>,
) -> Result<RecordRewrite> {
    let mut out = VariableByteOutput::with_capacity(record.len());
    let mut changed = false;
    let mut reader = SegmentReader::new(record);

    while let Some(segment) = reader.next_segment()? {
        if segment.header.doc_id != doc_id {
            segment.copy_to(&mut out);
            continue;
        }
        changed = true;
        let Some(removed) = removed else {
            continue;
        };

        let mut retained = OccurrenceList::new();
        let mut runs = segment.entries();
        while let Some((node_id, frequency)) = runs.next_node()? {
            if removed.contains(&node_id) {
                runs.skip_offsets(frequency)?;
            } else {
                for offset in runs.read_offsets(frequency)? {
                    retained.add(node_id.clone(), offset);
                }
            }
        }
        if !retained.is_empty() {
            retained.sort();
            encode_segment(&mut out, doc_id, segment.header.name_type, &retained)?;
        }
    }

    Ok(match (changed, out.is_empty()) {
        (false, _) => RecordRewrite::Unchanged,
        (true, true) => RecordRewrite::Delete,
        (true, false) => RecordRewrite::Replace(out.into_vec()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::posting::{encode_entries, PostingEntry};
    use crate::types::NameType;

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    fn segment(doc: DocumentId, runs: &[(&str, &[u32])]) -> Vec<u8> {
        let entries: Vec<PostingEntry> = runs
            .iter()
            .map(|(n, o)| PostingEntry {
                node_id: id(n),
                offsets: o.to_vec(),
            })
            .collect();
        let mut out = VariableByteOutput::new();
        encode_entries(&mut out, doc, NameType::Element, &entries).unwrap();
        out.into_vec()
    }

    #[test]
    fn test_remove_all_keeps_other_documents_verbatim() {
        let a = segment(1, &[("1.1", &[0, 4]), ("1.2", &[1])]);
        let b = segment(2, &[("1.3", &[2])]);
        let record = [a.clone(), b.clone()].concat();

        assert_eq!(rebuild_record(&record, 1, None).unwrap(), RecordRewrite::Replace(b.clone()));
        assert_eq!(rebuild_record(&record, 2, None).unwrap(), RecordRewrite::Replace(a));
        assert_eq!(rebuild_record(&b, 2, None).unwrap(), RecordRewrite::Delete);
        assert_eq!(rebuild_record(&b, 9, None).unwrap(), RecordRewrite::Unchanged);
    }

    #[test]
    fn test_remove_some_nodes() {
        let a = segment(1, &[("1.1", &[0, 4]), ("1.2", &[1]), ("1.2.5", &[3])]);
        let b = segment(2, &[("1.3", &[2])]);
        let record = [b.clone(), a].concat();

        let mut removed = OccurrenceList::new();
        removed.add(id("1.2"), 1);
        removed.sort();

        let expected = [b, segment(1, &[("1.1", &[0, 4]), ("1.2.5", &[3])])].concat();
        assert_eq!(rebuild_record(&record, 1, Some(&removed)).unwrap(), RecordRewrite::Replace(expected));

        // removing every node of the only segment deletes the key
        let only = segment(1, &[("1.2", &[1])]);
        assert_eq!(rebuild_record(&only, 1, Some(&removed)).unwrap(), RecordRewrite::Delete);
    }

    #[test]
    fn test_corrupt_record_is_an_error() {
        let record = segment(1, &[("1.1", &[0])]);
        assert!(rebuild_record(&record[..record.len() - 1], 1, None).is_err());
    }
}
