//! BFile: ordered byte store backed by an append-only record log
//!
//! Architecture:
//! - In-memory `BTreeMap<key, value>` image (key order == scan order)
//! - Every mutation is appended to the log as one CRC-framed bincode record
//! - Open = replay the log; a torn tail record is truncated with a warning
//! - `compact()` rewrites the log as one `Put` per live key
//!
//! File layout:
//! ```text
//! [magic "NGRF"][version: u32 LE]
//! [len: u32][bincode(LogRecord)][crc32: u32]   (repeated)
//! ```

use super::checksum::{Checksum, ChecksumType, Frame};
use super::{IndexQuery, IndexStore, ScanCallback};
use crate::config::DurabilityLevel;
use crate::{Result, StorageError};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Bound;
use std::path::{Path, PathBuf};

const BFILE_MAGIC: [u8; 4] = *b"NGRF";
const BFILE_VERSION: u32 = 1;
const HEADER_LEN: usize = 8;

#[derive(Debug, Serialize, Deserialize)]
enum LogRecord<'a> {
    Put { key: Cow<'a, [u8]>, value: Cow<'a, [u8]> },
    Append { key: Cow<'a, [u8]>, value: Cow<'a, [u8]> },
    Remove { key: Cow<'a, [u8]> },
}

/// Store statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct BFileStats {
    pub keys: usize,
    pub value_bytes: usize,
    pub log_bytes: u64,
    pub log_records: u64,
}

pub struct BFile {
    path: PathBuf,
    file: File,
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    durability: DurabilityLevel,
    checksum: ChecksumType,
    log_bytes: u64,
    log_records: u64,
}

impl BFile {
    /// Opens (or creates) the store at `path` and replays its log.
    pub fn open(path: impl AsRef<Path>, durability: DurabilityLevel, checksum: ChecksumType) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;

        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        let mut store = Self {
            path,
            file,
            entries: BTreeMap::new(),
            durability,
            checksum,
            log_bytes: 0,
            log_records: 0,
        };

        if data.is_empty() {
            store.file.write_all(&Self::header())?;
            store.file.sync_all()?;
            store.log_bytes = HEADER_LEN as u64;
        } else {
            store.replay(&data)?;
        }
        store.file.seek(SeekFrom::End(0))?;

        debug!(
            "opened {} ({} keys, {} log records)",
            store.path.display(),
            store.entries.len(),
            store.log_records
        );
        Ok(store)
    }

    fn header() -> [u8; HEADER_LEN] {
        let mut header = [0u8; HEADER_LEN];
        header[..4].copy_from_slice(&BFILE_MAGIC);
        header[4..].copy_from_slice(&BFILE_VERSION.to_le_bytes());
        header
    }

    fn replay(&mut self, data: &[u8]) -> Result<()> {
        if data.len() < HEADER_LEN || data[..4] != BFILE_MAGIC {
            return Err(StorageError::CorruptedFile(self.path.clone()));
        }
        let version = u32::from_le_bytes([data[4], data[5], data[6], data[7]]);
        if version != BFILE_VERSION {
            return Err(StorageError::CorruptedFile(self.path.clone()));
        }

        let mut pos = HEADER_LEN;
        while pos < data.len() {
            match Checksum::read_frame(self.checksum, &data[pos..]) {
                Ok(Frame::Complete { payload, consumed }) => {
                    let record: LogRecord<'_> = bincode::deserialize(payload)?;
                    self.apply(record);
                    self.log_records += 1;
                    pos += consumed;
                }
                Ok(Frame::Truncated) => break,
                Err(e) => {
                    let remaining = &data[pos..];
                    let frame_len = u32::from_le_bytes([remaining[0], remaining[1], remaining[2], remaining[3]]) as usize;
                    if pos + super::checksum::FRAME_OVERHEAD + frame_len < data.len() {
                        // a bad record followed by more records is not a torn write
                        return Err(e.into());
                    }
                    break;
                }
            }
        }

        if pos < data.len() {
            warn!(
                "{}: truncating {} bytes of incomplete log tail at offset {}",
                self.path.display(),
                data.len() - pos,
                pos
            );
            self.file.set_len(pos as u64)?;
        }
        self.log_bytes = pos as u64;
        Ok(())
    }

    fn apply(&mut self, record: LogRecord<'_>) {
        match record {
            LogRecord::Put { key, value } => {
                self.entries.insert(key.into_owned(), value.into_owned());
            }
            LogRecord::Append { key, value } => {
                self.entries.entry(key.into_owned()).or_default().extend_from_slice(&value);
            }
            LogRecord::Remove { key } => {
                self.entries.remove(key.as_ref());
            }
        }
    }

    fn write_record(&mut self, record: &LogRecord<'_>) -> Result<()> {
        let payload = bincode::serialize(record)?;
        let framed = Checksum::frame(self.checksum, &payload);
        self.file.write_all(&framed)?;
        if self.durability.requires_immediate_sync() {
            self.file.sync_data()?;
        }
        self.log_bytes += framed.len() as u64;
        self.log_records += 1;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn stats(&self) -> BFileStats {
        BFileStats {
            keys: self.entries.len(),
            value_bytes: self.entries.values().map(Vec::len).sum(),
            log_bytes: self.log_bytes,
            log_records: self.log_records,
        }
    }

    /// Rewrites the log so it holds exactly one `Put` per live key.
    pub fn compact(&mut self) -> Result<()> {
        let tmp_path = self.path.with_extension("compact");
        let mut log_bytes = HEADER_LEN as u64;
        {
            let mut tmp = File::create(&tmp_path)?;
            let mut writer = io::BufWriter::new(&mut tmp);
            writer.write_all(&Self::header())?;
            for (key, value) in &self.entries {
                let record = LogRecord::Put {
                    key: Cow::Borrowed(key),
                    value: Cow::Borrowed(value),
                };
                let framed = Checksum::frame(self.checksum, &bincode::serialize(&record)?);
                writer.write_all(&framed)?;
                log_bytes += framed.len() as u64;
            }
            writer.flush()?;
            drop(writer);
            tmp.sync_all()?;
        }
        fs::rename(&tmp_path, &self.path)?;

        self.file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        self.file.seek(SeekFrom::End(0))?;
        debug!(
            "compacted {}: {} -> {} bytes",
            self.path.display(),
            self.log_bytes,
            log_bytes
        );
        self.log_bytes = log_bytes;
        self.log_records = self.entries.len() as u64;
        Ok(())
    }
}

impl IndexStore for BFile {
    fn append(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_record(&LogRecord::Append {
            key: Cow::Borrowed(key),
            value: Cow::Borrowed(value),
        })?;
        self.entries.entry(key.to_vec()).or_default().extend_from_slice(value);
        Ok(())
    }

    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.write_record(&LogRecord::Put {
            key: Cow::Borrowed(key),
            value: Cow::Borrowed(value),
        })?;
        self.entries.insert(key.to_vec(), value.to_vec());
        Ok(())
    }

    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.get(key).cloned())
    }

    fn remove(&mut self, key: &[u8]) -> Result<bool> {
        if !self.entries.contains_key(key) {
            return Ok(false);
        }
        self.write_record(&LogRecord::Remove {
            key: Cow::Borrowed(key),
        })?;
        self.entries.remove(key);
        Ok(true)
    }

    fn remove_all(&mut self, query: &IndexQuery) -> Result<usize> {
        let mut doomed = Vec::new();
        self.query(query, &mut |key, _| {
            doomed.push(key.to_vec());
            Ok(true)
        })?;
        for key in &doomed {
            self.remove(key)?;
        }
        Ok(doomed.len())
    }

    fn query(&self, query: &IndexQuery, callback: &mut ScanCallback<'_>) -> Result<()> {
        let range = self
            .entries
            .range::<[u8], _>((Bound::Included(query.lower_bound()), Bound::Unbounded));
        for (key, value) in range {
            if query.is_exhausted_at(key) {
                break;
            }
            if query.matches(key) && !callback(key, value)? {
                break;
            }
        }
        Ok(())
    }

    fn file_path(&self) -> &Path {
        &self.path
    }

    fn backup(&self, sink: &mut dyn Write) -> Result<u64> {
        let mut source = File::open(&self.path)?;
        Ok(io::copy(&mut source, sink)?)
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        self.file.sync_data()?;
        Ok(())
    }
}
