//! Storage layer
//!
//! The index persists into an ordered byte-key → byte-value store accessed
//! through [`IndexStore`]. All access is serialized by one coarse
//! reader-writer [`StoreLock`] per store instance.

pub mod bfile;
pub mod byte_stream;
pub mod checksum;

pub use bfile::{BFile, BFileStats};
pub use byte_stream::{VariableByteInput, VariableByteOutput};
pub use checksum::{Checksum, ChecksumError, ChecksumType};

use crate::{Result, StorageError};
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

/// Key selection for scans and bulk removal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IndexQuery {
    /// Exactly this key.
    Eq(Vec<u8>),
    /// Every key starting with this prefix.
    TruncRight(Vec<u8>),
    /// Every key in `[start, end]` (inclusive).
    Between(Vec<u8>, Vec<u8>),
}

impl IndexQuery {
    pub fn matches(&self, key: &[u8]) -> bool {
        match self {
            IndexQuery::Eq(k) => key == k.as_slice(),
            IndexQuery::TruncRight(prefix) => key.starts_with(prefix),
            IndexQuery::Between(start, end) => key >= start.as_slice() && key <= end.as_slice(),
        }
    }

    /// Smallest key the query can match.
    pub fn lower_bound(&self) -> &[u8] {
        match self {
            IndexQuery::Eq(k) | IndexQuery::TruncRight(k) | IndexQuery::Between(k, _) => k,
        }
    }

    /// True once keys at or beyond `key` (in key order) can no longer match.
    pub fn is_exhausted_at(&self, key: &[u8]) -> bool {
        match self {
            IndexQuery::Eq(k) => key > k.as_slice(),
            IndexQuery::TruncRight(prefix) => key > prefix.as_slice() && !key.starts_with(prefix),
            IndexQuery::Between(_, end) => key > end.as_slice(),
        }
    }
}

/// Scan callback: receives each matching (key, value) in key order and
/// returns `Ok(false)` to stop the scan early.
pub type ScanCallback<'a> = dyn FnMut(&[u8], &[u8]) -> Result<bool> + 'a;

/// Ordered byte store contract.
pub trait IndexStore: Send + Sync {
    /// Grows the value under `key` (creating it if absent).
    fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Replaces the value under `key` wholesale.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()>;

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>>;

    /// Returns whether the key existed.
    fn remove(&mut self, key: &[u8]) -> Result<bool>;

    /// Removes every key selected by `query`, returning how many were removed.
    fn remove_all(&mut self, query: &IndexQuery) -> Result<usize>;

    /// Visits every key selected by `query` in key order.
    ///
    /// An error returned by the callback aborts the scan and is returned.
    fn query(&self, query: &IndexQuery, callback: &mut ScanCallback<'_>) -> Result<()>;

    /// Backing file, for log context.
    fn file_path(&self) -> &Path;

    /// Copies the backing file verbatim into `sink`.
    fn backup(&self, sink: &mut dyn Write) -> Result<u64>;

    fn flush(&mut self) -> Result<()>;
}

/// Reader-writer lock guarding one store, with bounded acquisition.
pub struct StoreLock<S> {
    name: String,
    timeout: Duration,
    inner: RwLock<S>,
}

impl<S> StoreLock<S> {
    pub fn new(name: impl Into<String>, store: S, timeout: Duration) -> Self {
        Self {
            name: name.into(),
            timeout,
            inner: RwLock::new(store),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, S>> {
        self.inner.try_read_for(self.timeout).ok_or_else(|| {
            StorageError::Lock(format!(
                "failed to acquire read lock on {} within {:?}",
                self.name, self.timeout
            ))
        })
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, S>> {
        self.inner.try_write_for(self.timeout).ok_or_else(|| {
            StorageError::Lock(format!(
                "failed to acquire write lock on {} within {:?}",
                self.name, self.timeout
            ))
        })
    }

    pub fn into_inner(self) -> S {
        self.inner.into_inner()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_matching() {
        let prefix = IndexQuery::TruncRight(b"ca".to_vec());
        assert!(prefix.matches(b"cat"));
        assert!(prefix.matches(b"ca"));
        assert!(!prefix.matches(b"cb"));
        assert!(!prefix.is_exhausted_at(b"cat"));
        assert!(prefix.is_exhausted_at(b"cb"));

        let range = IndexQuery::Between(b"b".to_vec(), b"d".to_vec());
        assert!(range.matches(b"c"));
        assert!(range.matches(b"d"));
        assert!(!range.matches(b"da"));
        assert!(range.is_exhausted_at(b"da"));
    }

    #[test]
    fn test_lock_timeout() {
        let lock = StoreLock::new("test.dbx", 0u32, Duration::from_millis(10));
        let writer = lock.write().unwrap();
        assert!(matches!(lock.read(), Err(StorageError::Lock(_))));
        drop(writer);

        let r1 = lock.read().unwrap();
        let r2 = lock.read().unwrap();
        assert_eq!(*r1 + *r2, 0);
        assert!(lock.write().is_err());
    }
}
