//! Checksum 验证模块
//!
//! 为索引存储日志提供记录级完整性校验。
//!
//! ## 记录格式
//! ```text
//! [payload_len: u32 LE][payload: [u8]][checksum: u32 LE]
//! ```
//!
//! 日志尾部的残缺记录（进程在写入中途崩溃）与校验失败的记录区分开来：
//! 前者在重放时被截断，后者视为数据损坏。

use crc32fast::Hasher;
use serde::{Deserialize, Serialize};

/// Frame overhead: length prefix + trailing checksum.
pub const FRAME_OVERHEAD: usize = 8;

/// Checksum 类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum ChecksumType {
    /// CRC32 (crc32fast, 硬件加速)
    #[default]
    CRC32C,
    /// 无校验（仅测试用）
    None,
}

/// Checksum 计算器
pub struct Checksum;

impl Checksum {
    /// 计算数据的 checksum
    pub fn compute(checksum_type: ChecksumType, data: &[u8]) -> u32 {
        match checksum_type {
            ChecksumType::CRC32C => {
                let mut hasher = Hasher::new();
                hasher.update(data);
                hasher.finalize()
            }
            ChecksumType::None => 0,
        }
    }

    /// 验证数据的 checksum
    pub fn verify(
        checksum_type: ChecksumType,
        data: &[u8],
        expected: u32,
    ) -> Result<(), ChecksumError> {
        if checksum_type == ChecksumType::None {
            return Ok(());
        }

        let actual = Self::compute(checksum_type, data);
        if actual != expected {
            return Err(ChecksumError::Mismatch {
                expected,
                actual,
                data_len: data.len(),
            });
        }

        Ok(())
    }

    /// 编码一条带 checksum 的日志记录
    pub fn frame(checksum_type: ChecksumType, payload: &[u8]) -> Vec<u8> {
        let checksum = Self::compute(checksum_type, payload);
        let mut encoded = Vec::with_capacity(FRAME_OVERHEAD + payload.len());
        encoded.extend_from_slice(&(payload.len() as u32).to_le_bytes());
        encoded.extend_from_slice(payload);
        encoded.extend_from_slice(&checksum.to_le_bytes());
        encoded
    }

    /// 从缓冲区头部读取一条记录
    ///
    /// # 返回
    /// - `Ok(Frame::Complete { payload, consumed })`: 校验通过
    /// - `Ok(Frame::Truncated)`: 缓冲区不足一条完整记录（残缺尾部）
    /// - `Err(ChecksumError::Mismatch)`: 记录完整但校验失败
    pub fn read_frame(
        checksum_type: ChecksumType,
        buf: &[u8],
    ) -> Result<Frame<'_>, ChecksumError> {
        if buf.len() < 4 {
            return Ok(Frame::Truncated);
        }
        let len = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        let total = FRAME_OVERHEAD + len;
        if buf.len() < total {
            return Ok(Frame::Truncated);
        }

        let payload = &buf[4..4 + len];
        let tail = &buf[4 + len..total];
        let expected = u32::from_le_bytes([tail[0], tail[1], tail[2], tail[3]]);
        Self::verify(checksum_type, payload, expected)?;

        Ok(Frame::Complete {
            payload,
            consumed: total,
        })
    }
}

/// 读取结果
#[derive(Debug, PartialEq, Eq)]
pub enum Frame<'a> {
    Complete { payload: &'a [u8], consumed: usize },
    Truncated,
}

/// Checksum 错误类型
#[derive(Debug, thiserror::Error)]
pub enum ChecksumError {
    #[error("Checksum mismatch: expected {expected:#010x}, got {actual:#010x} (data_len={data_len})")]
    Mismatch {
        expected: u32,
        actual: u32,
        data_len: usize,
    },

    #[error("Invalid checksum format: {0}")]
    InvalidFormat(String),
}
