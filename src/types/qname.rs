//! Qualified names and the symbol table
//!
//! Keys never carry namespace URIs or local names as strings: both are
//! mapped to compact `u16` symbols by the [`SymbolTable`], which the host
//! shares across every index instance of a database.
//!
//! Symbols are assigned in first-seen order, so a table opened from a file
//! ([`SymbolTable::open`]) is the only way to get the same ids back after a
//! restart.

use crate::{Result, StorageError};
use ahash::AHashMap;
use log::debug;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::path::{Path, PathBuf};

/// Element vs attribute; the discriminant is the on-disk name-type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(u8)]
pub enum NameType {
    Element = 1,
    Attribute = 2,
}

impl NameType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(NameType::Element),
            2 => Some(NameType::Attribute),
            _ => None,
        }
    }
}

/// Qualified name. The prefix is informational only and takes no part in
/// equality, hashing or ordering.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QName {
    namespace: String,
    local_name: String,
    prefix: Option<String>,
    name_type: NameType,
}

impl QName {
    /// Element name in no namespace.
    pub fn element(local_name: impl Into<String>) -> Self {
        Self::new("", local_name, NameType::Element)
    }

    /// Attribute name in no namespace.
    pub fn attribute(local_name: impl Into<String>) -> Self {
        Self::new("", local_name, NameType::Attribute)
    }

    pub fn new(namespace: impl Into<String>, local_name: impl Into<String>, name_type: NameType) -> Self {
        Self {
            namespace: namespace.into(),
            local_name: local_name.into(),
            prefix: None,
            name_type,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    pub fn prefix(&self) -> Option<&str> {
        self.prefix.as_deref()
    }

    pub fn name_type(&self) -> NameType {
        self.name_type
    }

    pub fn is_attribute(&self) -> bool {
        self.name_type == NameType::Attribute
    }

    fn sort_key(&self) -> (NameType, &str, &str) {
        (self.name_type, &self.namespace, &self.local_name)
    }
}

impl PartialEq for QName {
    fn eq(&self, other: &Self) -> bool {
        self.sort_key() == other.sort_key()
    }
}

impl Eq for QName {}

impl Hash for QName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sort_key().hash(state);
    }
}

impl PartialOrd for QName {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QName {
    fn cmp(&self, other: &Self) -> Ordering {
        self.sort_key().cmp(&other.sort_key())
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_attribute() {
            f.write_str("@")?;
        }
        match (&self.prefix, self.namespace.is_empty()) {
            (Some(prefix), _) => write!(f, "{}:{}", prefix, self.local_name),
            (None, true) => f.write_str(&self.local_name),
            (None, false) => write!(f, "{{{}}}{}", self.namespace, self.local_name),
        }
    }
}

//=============================================================================
// Symbol table
//=============================================================================

#[derive(Default)]
struct SymbolMap {
    ids: AHashMap<String, u16>,
    names: Vec<String>,
}

impl SymbolMap {
    fn get_or_insert(&mut self, name: &str, kind: &str) -> Result<u16> {
        if let Some(&id) = self.ids.get(name) {
            return Ok(id);
        }
        // id 0 is reserved for the empty string
        let next = self.names.len() + 1;
        let id = u16::try_from(next).map_err(|_| {
            StorageError::ResourceExhausted(format!("{} symbol space exhausted", kind))
        })?;
        self.ids.insert(name.to_string(), id);
        self.names.push(name.to_string());
        Ok(id)
    }

    fn name(&self, id: u16) -> Option<&str> {
        match id {
            0 => Some(""),
            _ => self.names.get(id as usize - 1).map(String::as_str),
        }
    }
}

/// On-disk form: names in id order, starting at id 1.
#[derive(Debug, Default, Serialize, Deserialize)]
struct SymbolSnapshot {
    namespaces: Vec<String>,
    names: Vec<String>,
}

/// Thread-safe namespace/local-name symbol table.
///
/// Lookups take the read lock; only first-seen names take the write lock.
#[derive(Default)]
pub struct SymbolTable {
    namespaces: RwLock<SymbolMap>,
    names: RwLock<SymbolMap>,

    /// Backing file, rewritten whenever a symbol is assigned
    path: Option<PathBuf>,
    save_lock: Mutex<()>,
}

impl SymbolTable {
    /// In-memory table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Table backed by `path`; existing symbols are loaded with their ids.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut table = Self {
            path: Some(path.clone()),
            ..Self::default()
        };
        if !path.exists() {
            return Ok(table);
        }

        let snapshot: SymbolSnapshot = serde_json::from_slice(&std::fs::read(&path)?)?;
        for (map, names, kind) in [
            (table.namespaces.get_mut(), &snapshot.namespaces, "namespace"),
            (table.names.get_mut(), &snapshot.names, "local name"),
        ] {
            for name in names {
                if name.is_empty() || map.ids.contains_key(name) {
                    return Err(StorageError::CorruptedFile(path));
                }
                map.get_or_insert(name, kind)?;
            }
        }
        debug!(
            "loaded {} namespaces and {} names from {}",
            snapshot.namespaces.len(),
            snapshot.names.len(),
            path.display()
        );
        Ok(table)
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Symbol of a namespace URI; the empty namespace is always 0.
    pub fn ns_symbol(&self, namespace: &str) -> Result<u16> {
        self.resolve(&self.namespaces, namespace, "namespace")
    }

    /// Symbol of a local name.
    pub fn symbol(&self, local_name: &str) -> Result<u16> {
        self.resolve(&self.names, local_name, "local name")
    }

    pub fn namespace(&self, id: u16) -> Option<String> {
        self.namespaces.read().name(id).map(str::to_string)
    }

    pub fn name(&self, id: u16) -> Option<String> {
        self.names.read().name(id).map(str::to_string)
    }

    fn resolve(&self, map: &RwLock<SymbolMap>, name: &str, kind: &str) -> Result<u16> {
        if name.is_empty() {
            return Ok(0);
        }
        if let Some(&id) = map.read().ids.get(name) {
            return Ok(id);
        }
        let (id, assigned) = {
            let mut map = map.write();
            let known = map.names.len();
            let id = map.get_or_insert(name, kind)?;
            (id, map.names.len() > known)
        };
        if assigned {
            self.save()?;
        }
        Ok(id)
    }

    /// Rewrites the backing file (temp file + rename).
    fn save(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _guard = self.save_lock.lock();
        let snapshot = SymbolSnapshot {
            namespaces: self.namespaces.read().names.clone(),
            names: self.names.read().names.clone(),
        };
        let temp_path = path.with_extension("tmp");
        std::fs::write(&temp_path, serde_json::to_vec_pretty(&snapshot)?)?;
        std::fs::rename(&temp_path, path)?;
        Ok(())
    }
}
