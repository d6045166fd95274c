//! ngramdb: N-gram substring index for hierarchical documents
//!
//! 为层次化文档（元素 / 属性）提供基于 N-gram 的子串检索
//!
//! ## 核心特性
//! - 固定宽度 N-gram（默认 3），大小写折叠，按字符偏移记录出现位置
//! - 按 (集合, 限定名, N-gram) 组织的有序键空间，支持前缀与区间扫描
//! - 按文档分段的倒排记录，可跳过整段而无需解码
//! - 包含 / 前缀 / 后缀固定字符串检索，命中高亮
//!
//! ## 架构
//! - 存储层: `BFile` (有序 B-Tree 镜像 + CRC 校验的追加日志) + 读写锁
//! - 索引层: Tokenizer → OccurrenceList → Posting codec → IndexPass (flush)
//! - 查询层: search / scan_index / fixed-string / MatchListener

pub mod config;
pub mod index;
pub mod storage;
pub mod types;

mod error;

pub use config::{CollectionConfigDef, CollectionIndexConfig, DurabilityLevel, IndexSettings};
pub use error::{Result, StorageError};

// 主要对外 API
pub use index::{
    Axis, CancellationToken, FlushReport, IndexPass, NGramIndex, QueryContext, ReindexMode, SearchRequest,
    StringMatch,
};
pub use types::{Document, DocumentSet, NodeId, NodeProxy, NodeSet, QName, SymbolTable};
