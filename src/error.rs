//! Error types for the n-gram index

use crate::storage::checksum::ChecksumError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StorageError>;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("Data corruption: {0}")]
    Corruption(String),

    #[error("Checksum error: {0}")]
    Checksum(#[from] ChecksumError),

    #[error("Lock error: {0}")]
    Lock(String),

    #[error("Corrupted file: {0}")]
    CorruptedFile(std::path::PathBuf),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 查询被外部取消（唯一会穿透扫描向上传播的错误）
    #[error("Query terminated: {0}")]
    Terminated(String),
}

impl StorageError {
    /// Cancellation is never swallowed by per-key error handling.
    pub fn is_terminated(&self) -> bool {
        matches!(self, StorageError::Terminated(_))
    }
}

impl From<bincode::Error> for StorageError {
    fn from(err: bincode::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for StorageError {
    fn from(err: serde_json::Error) -> Self {
        StorageError::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_termination_is_terminated() {
        assert!(StorageError::Terminated("query cancelled".into()).is_terminated());
        assert!(!StorageError::Lock("timeout".into()).is_terminated());

        let io: StorageError = std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read").into();
        assert!(!io.is_terminated());
        assert_eq!(io.to_string(), "IO error: short read");

        let json: StorageError = serde_json::from_str::<u32>("nope").unwrap_err().into();
        assert!(matches!(json, StorageError::Serialization(_)));
    }
}
