//! Index configuration
//!
//! Two layers:
//! - [`IndexSettings`]: one per index instance (n-gram width, file name,
//!   locking and durability of the store)
//! - [`CollectionIndexConfig`]: per collection, which element/attribute
//!   names are indexed. Authored as a [`CollectionConfigDef`] and resolved
//!   once; a bad definition is rejected as a whole.

use crate::storage::checksum::ChecksumType;
use crate::types::{NameType, QName};
use crate::{Result, StorageError};
use log::trace;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::time::Duration;

/// Default n-gram width
pub const DEFAULT_NGRAM_SIZE: usize = 3;

/// Default store file name
pub const DEFAULT_FILE_NAME: &str = "ngram.dbx";

/// 持久性级别（Durability Level）
///
/// - Synchronous: 每次写入后立即 fsync
/// - NoSync: 只写入 OS 缓冲区，由宿主数据库负责恢复
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DurabilityLevel {
    Synchronous,
    #[default]
    NoSync,
}

impl DurabilityLevel {
    /// 判断是否需要立即刷盘
    pub fn requires_immediate_sync(&self) -> bool {
        matches!(self, Self::Synchronous)
    }
}

/// 索引实例配置
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    /// n-gram 窗口宽度（默认 3）
    pub n: usize,

    /// 存储文件名（位于索引目录内）
    pub file_name: String,

    /// 获取存储读写锁的超时（毫秒）
    pub lock_timeout_ms: u64,

    /// 持久性级别
    pub durability: DurabilityLevel,

    /// 日志记录校验类型
    pub checksum: ChecksumType,
}

impl Default for IndexSettings {
    fn default() -> Self {
        Self {
            n: DEFAULT_NGRAM_SIZE,
            file_name: DEFAULT_FILE_NAME.to_string(),
            lock_timeout_ms: 5000,
            durability: DurabilityLevel::NoSync,
            checksum: ChecksumType::CRC32C,
        }
    }
}

impl IndexSettings {
    /// 测试配置：短锁超时
    pub fn for_testing() -> Self {
        Self {
            lock_timeout_ms: 200,
            ..Default::default()
        }
    }

    pub fn with_ngram_size(mut self, n: usize) -> Self {
        self.n = n;
        self
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn validate(&self) -> Result<()> {
        if self.n == 0 {
            return Err(StorageError::Config("n-gram size must be at least 1".into()));
        }
        if self.file_name.is_empty() {
            return Err(StorageError::Config("index file name is empty".into()));
        }
        if self.file_name.contains(['/', '\\']) {
            return Err(StorageError::Config(format!(
                "index file name '{}' must not contain a path separator",
                self.file_name
            )));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let settings: Self =
            serde_json::from_str(json).map_err(|e| StorageError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_json(&std::fs::read_to_string(path)?)
    }
}

//=============================================================================
// Collection index definitions
//=============================================================================

/// One `{"qname": "..."}` entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDefinition {
    pub qname: String,
}

/// Per-collection definition as authored by an administrator.
///
/// ```json
/// { "namespaces": { "tei": "http://www.tei-c.org/ns/1.0" },
///   "ngram": [ { "qname": "tei:p" }, { "qname": "@id" } ] }
/// ```
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectionConfigDef {
    pub namespaces: BTreeMap<String, String>,
    pub ngram: Vec<IndexDefinition>,
}

impl CollectionConfigDef {
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| StorageError::Config(e.to_string()))
    }

    pub fn with_qname(mut self, qname: impl Into<String>) -> Self {
        self.ngram.push(IndexDefinition { qname: qname.into() });
        self
    }

    pub fn with_namespace(mut self, prefix: impl Into<String>, uri: impl Into<String>) -> Self {
        self.namespaces.insert(prefix.into(), uri.into());
        self
    }
}

/// Resolved, immutable set of indexed names for one collection.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CollectionIndexConfig {
    qnames: BTreeSet<QName>,
}

impl CollectionIndexConfig {
    pub fn from_def(def: &CollectionConfigDef) -> Result<Self> {
        let mut qnames = BTreeSet::new();
        for entry in &def.ngram {
            let qname = parse_qname(&entry.qname, &def.namespaces)?;
            trace!("ngram index defined on {}", qname);
            qnames.insert(qname);
        }
        Ok(Self { qnames })
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Self::from_def(&CollectionConfigDef::from_json(json)?)
    }

    /// Builds a config from already-resolved names.
    pub fn from_qnames(qnames: impl IntoIterator<Item = QName>) -> Self {
        Self {
            qnames: qnames.into_iter().collect(),
        }
    }

    #[inline]
    pub fn is_indexed(&self, qname: &QName) -> bool {
        self.qnames.contains(qname)
    }

    pub fn qnames(&self) -> impl Iterator<Item = &QName> {
        self.qnames.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.qnames.is_empty()
    }
}

/// `p` | `prefix:p` | `@id` | `@prefix:id`
fn parse_qname(raw: &str, namespaces: &BTreeMap<String, String>) -> Result<QName> {
    let raw = raw.trim();
    let (name_type, name) = match raw.strip_prefix('@') {
        Some(rest) => (NameType::Attribute, rest),
        None => (NameType::Element, raw),
    };
    if name.is_empty() {
        return Err(StorageError::Config(
            "ngram index definition needs a non-empty qname".into(),
        ));
    }

    match name.split_once(':') {
        None => Ok(QName::new("", name, name_type)),
        Some((prefix, local)) => {
            if prefix.is_empty() || local.is_empty() || local.contains(':') {
                return Err(StorageError::Config(format!("malformed qname '{}'", raw)));
            }
            let uri = namespaces.get(prefix).ok_or_else(|| {
                StorageError::Config(format!(
                    "no namespace defined for prefix '{}' in qname '{}'",
                    prefix, raw
                ))
            })?;
            Ok(QName::new(uri.clone(), local, name_type).with_prefix(prefix))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEI: &str = "http://www.tei-c.org/ns/1.0";

    #[test]
    fn test_settings_defaults_and_validation() {
        let settings = IndexSettings::default();
        assert_eq!(settings.n, 3);
        assert_eq!(settings.file_name, "ngram.dbx");
        assert!(settings.validate().is_ok());

        assert!(IndexSettings::default().with_ngram_size(0).validate().is_err());
        let settings = IndexSettings {
            file_name: "../escape.dbx".into(),
            ..Default::default()
        };
        assert!(matches!(settings.validate(), Err(StorageError::Config(_))));
    }

    #[test]
    fn test_settings_from_json() {
        let settings = IndexSettings::from_json(r#"{ "n": 2, "durability": "Synchronous" }"#).unwrap();
        assert_eq!(settings.n, 2);
        assert_eq!(settings.file_name, DEFAULT_FILE_NAME);
        assert!(settings.durability.requires_immediate_sync());

        assert!(IndexSettings::from_json(r#"{ "n": 0 }"#).is_err());
        assert!(IndexSettings::from_json("not json").is_err());
    }

    #[test]
    fn test_collection_config() {
        let config = CollectionIndexConfig::from_json(&format!(
            r#"{{ "namespaces": {{ "tei": "{}" }},
                 "ngram": [ {{ "qname": "p" }}, {{ "qname": "tei:head" }}, {{ "qname": "@tei:id" }} ] }}"#,
            TEI
        ))
        .unwrap();

        assert!(config.is_indexed(&QName::element("p")));
        assert!(config.is_indexed(&QName::new(TEI, "head", NameType::Element)));
        assert!(config.is_indexed(&QName::new(TEI, "id", NameType::Attribute)));
        assert!(!config.is_indexed(&QName::element("head")));
        assert!(!config.is_indexed(&QName::attribute("p")));
        assert_eq!(config.qnames().count(), 3);
    }

    #[test]
    fn test_config_errors() {
        let empty = CollectionConfigDef::default().with_qname("");
        assert!(matches!(CollectionIndexConfig::from_def(&empty), Err(StorageError::Config(_))));

        let bare_attr = CollectionConfigDef::default().with_qname("@");
        assert!(CollectionIndexConfig::from_def(&bare_attr).is_err());

        let unbound = CollectionConfigDef::default().with_qname("p").with_qname("tei:p");
        let err = CollectionIndexConfig::from_def(&unbound).unwrap_err();
        assert!(err.to_string().contains("tei"));

        let bound = unbound.with_namespace("tei", TEI);
        assert!(CollectionIndexConfig::from_def(&bound).is_ok());

        let malformed = CollectionConfigDef::default().with_qname("a:b:c").with_namespace("a", TEI);
        assert!(CollectionIndexConfig::from_def(&malformed).is_err());
    }
}
