//! N-gram index instance
//!
//! Owns the store (one [`BFile`] behind one [`StoreLock`]), the instance
//! settings and the per-collection index configurations. Indexing goes
//! through [`IndexPass`]es handed out by [`NGramIndex::begin_pass`]; queries
//! live in `search` and `fixed_string`.

use super::tokenizer::NGramTokenizer;
use super::worker::{FlushReport, IndexPass, ReindexMode};
use super::key::NGramKey;
use crate::config::{CollectionIndexConfig, IndexSettings};
use crate::storage::{BFile, BFileStats, IndexQuery, IndexStore, StoreLock};
use crate::types::{
    CollectionId, Document, DocumentId, DocumentSet, NodeId, NodeKind, NodeRef, QName, SymbolTable,
};
use crate::Result;
use ahash::AHashMap;
use log::debug;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Identifier of this index kind.
pub const INDEX_ID: &str = "ngram-index";

/// Symbol table file written by [`NGramIndex::open_standalone`].
pub const SYMBOLS_FILE: &str = "symbols.json";

pub struct NGramIndex {
    /// Index directory
    dir: PathBuf,

    settings: IndexSettings,

    /// Store (key → posting record), shared by all passes and queries
    store: StoreLock<BFile>,

    /// Host symbol table (namespace / local name → u16)
    symbols: Arc<SymbolTable>,

    /// Per-collection configuration snapshots
    configs: RwLock<AHashMap<CollectionId, Arc<CollectionIndexConfig>>>,

    tokenizer: NGramTokenizer,
}

impl NGramIndex {
    /// Opens (or creates) the index in `dir`.
    ///
    /// Keys embed the symbol ids handed out by `symbols`, so an existing
    /// index must be reopened with the table it was written with (the
    /// host's shared table, or one loaded with [`SymbolTable::open`]).
    /// A fresh in-memory table silently misses every stored key.
    pub fn open(dir: impl AsRef<Path>, settings: IndexSettings, symbols: Arc<SymbolTable>) -> Result<Self> {
        settings.validate()?;
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;

        let path = dir.join(&settings.file_name);
        let file = BFile::open(&path, settings.durability, settings.checksum)?;
        debug!("{} opened at {} with n={}", INDEX_ID, path.display(), settings.n);

        Ok(Self {
            store: StoreLock::new(path.display().to_string(), file, settings.lock_timeout()),
            tokenizer: NGramTokenizer::new(settings.n),
            configs: RwLock::new(AHashMap::new()),
            symbols,
            settings,
            dir,
        })
    }

    /// Opens the index with its own symbol table persisted in
    /// `dir/`[`SYMBOLS_FILE`], for hosts that do not share one.
    pub fn open_standalone(dir: impl AsRef<Path>, settings: IndexSettings) -> Result<Self> {
        let dir = dir.as_ref();
        std::fs::create_dir_all(dir)?;
        let symbols = SymbolTable::open(dir.join(SYMBOLS_FILE))?;
        Self::open(dir, settings, Arc::new(symbols))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn settings(&self) -> &IndexSettings {
        &self.settings
    }

    /// N-gram width.
    pub fn n(&self) -> usize {
        self.tokenizer.n()
    }

    pub fn tokenizer(&self) -> &NGramTokenizer {
        &self.tokenizer
    }

    pub fn symbols(&self) -> &SymbolTable {
        &self.symbols
    }

    pub(crate) fn store(&self) -> &StoreLock<BFile> {
        &self.store
    }

    /// Installs (or replaces) the configuration of a collection.
    pub fn configure_collection(&self, collection_id: CollectionId, config: CollectionIndexConfig) {
        self.configs.write().insert(collection_id, Arc::new(config));
    }

    pub fn collection_config(&self, collection_id: CollectionId) -> Option<Arc<CollectionIndexConfig>> {
        self.configs.read().get(&collection_id).cloned()
    }

    /// Every qname indexed in any collection of `docs`.
    pub fn defined_qnames(&self, docs: &DocumentSet) -> Vec<QName> {
        let configs = self.configs.read();
        let mut qnames = BTreeSet::new();
        for collection_id in docs.collection_ids() {
            if let Some(config) = configs.get(&collection_id) {
                qnames.extend(config.qnames().cloned());
            }
        }
        qnames.into_iter().collect()
    }

    /// Starts an indexing pass for one document.
    pub fn begin_pass(&self, doc_id: DocumentId, collection_id: CollectionId, mode: ReindexMode) -> IndexPass<'_> {
        IndexPass::new(self, doc_id, collection_id, mode)
    }

    /// Indexes a whole document.
    pub fn store_document(&self, document: &Document) -> FlushReport {
        let mut pass = self.begin_pass(document.id(), document.collection_id(), ReindexMode::Store);
        pass.index_document(document);
        pass.flush()
    }

    /// Removes every posting of a document.
    pub fn remove_document(&self, document: &Document) -> FlushReport {
        let mut pass = self.begin_pass(document.id(), document.collection_id(), ReindexMode::RemoveAllNodes);
        pass.index_document(document);
        pass.flush()
    }

    /// Removes the postings of the nodes under `node_id`.
    pub fn remove_nodes(&self, document: &Document, node_id: &NodeId) -> Result<FlushReport> {
        let mut pass = self.begin_pass(document.id(), document.collection_id(), ReindexMode::RemoveSomeNodes);
        pass.index_node(document, node_id)?;
        Ok(pass.flush())
    }

    /// Drops every key of a collection.
    pub fn remove_collection(&self, collection_id: CollectionId) -> Result<usize> {
        let prefix = NGramKey::collection(collection_id);
        let removed = self
            .store
            .write()?
            .remove_all(&IndexQuery::TruncRight(prefix.into_bytes()))?;
        debug!("{}: dropped {} keys of collection {}", self.store.name(), removed, collection_id);
        Ok(removed)
    }

    /// Top-most indexed element containing `node_id` (or `node_id` itself
    /// when `include_self`), i.e. the subtree to re-stream after an edit.
    pub fn reindex_root(&self, document: &Document, node_id: &NodeId, include_self: bool) -> Option<NodeId> {
        let node = document.node(node_id)?;
        if node.kind() == NodeKind::Attribute {
            return None;
        }
        let config = self.collection_config(document.collection_id())?;

        let mut root = None;
        let mut current = if include_self { Some(node_id.clone()) } else { node_id.parent() };
        while let Some(id) = current {
            if let Some(NodeRef::Element(element)) = document.node(&id) {
                if config.is_indexed(&element.qname) {
                    root = Some(id.clone());
                }
            }
            current = id.parent();
        }
        root
    }

    /// Copies the raw store file into `sink`.
    pub fn backup(&self, sink: &mut dyn Write) -> Result<u64> {
        let mut store = self.store.write()?;
        store.flush()?;
        store.backup(sink)
    }

    pub fn sync(&self) -> Result<()> {
        self.store.write()?.flush()
    }

    pub fn compact(&self) -> Result<()> {
        self.store.write()?.compact()
    }

    pub fn stats(&self) -> Result<BFileStats> {
        Ok(self.store.read()?.stats())
    }

    pub fn close(self) -> Result<()> {
        let mut store = self.store.into_inner();
        store.flush()
    }
}
