//! Posting record codec
//!
//! A record is the concatenation of per-document segments:
//! ```text
//! [doc_id: varint][name_type: u8][occurrence_count: varint][length: u32 BE]
//! length bytes of:
//!   occurrence_count × ( [node_id: delta vs previous run][freq: varint][offset: varint] × freq )
//! ```
//! `length` is backpatched after the runs are written, which lets a reader
//! step over a whole segment without decoding its node ids. Node ids are
//! delta-encoded within a segment, so runs decode strictly in order.

use super::occurrences::OccurrenceList;
use crate::storage::byte_stream::{VariableByteInput, VariableByteOutput};
use crate::types::{DocumentId, NameType, NodeId};
use crate::{Result, StorageError};

/// Fixed part of a segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SegmentHeader {
    pub doc_id: DocumentId,
    pub name_type: NameType,
    /// Number of node runs.
    pub occurrence_count: u32,
    /// Byte length of the runs.
    pub length: u32,
}

impl SegmentHeader {
    fn write(&self, out: &mut VariableByteOutput) {
        out.write_int(self.doc_id);
        out.write_byte(self.name_type.as_u8());
        out.write_int(self.occurrence_count);
        out.write_fixed_int(self.length);
    }
}

/// One decoded run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostingEntry {
    pub node_id: NodeId,
    pub offsets: Vec<u32>,
}

impl PostingEntry {
    pub fn frequency(&self) -> usize {
        self.offsets.len()
    }
}

/// Appends one document's segment for a sorted occurrence list.
pub fn encode_segment(
    out: &mut VariableByteOutput,
    doc_id: DocumentId,
    name_type: NameType,
    occurrences: &OccurrenceList,
) -> Result<()> {
    if !occurrences.is_sorted() {
        return Err(StorageError::InvalidArgument(
            "occurrence list must be sorted before encoding".into(),
        ));
    }

    out.write_int(doc_id);
    out.write_byte(name_type.as_u8());
    out.write_int(occurrences.term_count() as u32);
    let length_pos = out.position();
    out.write_fixed_int(0);

    let start = out.position();
    let mut previous: Option<&NodeId> = None;
    for (node_id, offsets) in occurrences.runs() {
        node_id.write(previous, out);
        out.write_int(offsets.len() as u32);
        for offset in offsets {
            out.write_int(offset);
        }
        previous = Some(node_id);
    }

    let length = u32::try_from(out.position() - start).map_err(|_| {
        StorageError::ResourceExhausted(format!("segment of document {} exceeds 4 GiB", doc_id))
    })?;
    out.write_fixed_int_at(length_pos, length)
}

/// Encodes pre-grouped runs (strictly increasing node ids).
pub fn encode_entries(
    out: &mut VariableByteOutput,
    doc_id: DocumentId,
    name_type: NameType,
    entries: &[PostingEntry],
) -> Result<()> {
    let mut occurrences = OccurrenceList::new();
    for entry in entries {
        for &offset in &entry.offsets {
            occurrences.add(entry.node_id.clone(), offset);
        }
    }
    occurrences.sort();
    encode_segment(out, doc_id, name_type, &occurrences)
}

/// Walks the segments of one record.
pub struct SegmentReader<'a> {
    input: VariableByteInput<'a>,
}

impl<'a> SegmentReader<'a> {
    pub fn new(record: &'a [u8]) -> Self {
        Self {
            input: VariableByteInput::new(record),
        }
    }

    pub fn next_segment(&mut self) -> Result<Option<Segment<'a>>> {
        if self.input.available() == 0 {
            return Ok(None);
        }
        let doc_id = self.input.read_int()?;
        let raw_type = self.input.read_byte()?;
        let name_type = NameType::from_u8(raw_type).ok_or_else(|| {
            StorageError::Corruption(format!("segment of document {} has name type {}", doc_id, raw_type))
        })?;
        let occurrence_count = self.input.read_int()?;
        let length = self.input.read_fixed_int()?;
        let body = self.input.read_slice(length as usize).map_err(|_| {
            StorageError::Corruption(format!(
                "segment of document {} claims {} bytes, {} left",
                doc_id,
                length,
                self.input.available()
            ))
        })?;

        Ok(Some(Segment {
            header: SegmentHeader {
                doc_id,
                name_type,
                occurrence_count,
                length,
            },
            body,
        }))
    }
}

impl<'a> Iterator for SegmentReader<'a> {
    type Item = Result<Segment<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_segment().transpose()
    }
}

/// One document's segment; the runs are decoded on demand.
#[derive(Debug, Clone, Copy)]
pub struct Segment<'a> {
    pub header: SegmentHeader,
    body: &'a [u8],
}

impl<'a> Segment<'a> {
    pub fn entries(&self) -> SegmentEntries<'a> {
        SegmentEntries {
            input: VariableByteInput::new(self.body),
            previous: None,
            remaining: self.header.occurrence_count,
        }
    }

    pub fn decode(&self) -> Result<Vec<PostingEntry>> {
        self.entries().collect()
    }

    /// Copies the segment verbatim, without decoding its runs.
    pub fn copy_to(&self, out: &mut VariableByteOutput) {
        self.header.write(out);
        out.write_bytes(self.body);
    }
}

/// Sequential run decoder.
///
/// After [`SegmentEntries::next_node`] the caller must consume the run's
/// offsets with either `read_offsets` or `skip_offsets`.
pub struct SegmentEntries<'a> {
    input: VariableByteInput<'a>,
    previous: Option<NodeId>,
    remaining: u32,
}

impl<'a> SegmentEntries<'a> {
    /// Next run's node id and frequency.
    pub fn next_node(&mut self) -> Result<Option<(NodeId, u32)>> {
        if self.remaining == 0 {
            return Ok(None);
        }
        let node_id = NodeId::read(self.previous.as_ref(), &mut self.input)?;
        let frequency = self.input.read_int()?;
        self.previous = Some(node_id.clone());
        self.remaining -= 1;
        Ok(Some((node_id, frequency)))
    }

    pub fn read_offsets(&mut self, frequency: u32) -> Result<Vec<u32>> {
        let mut offsets = Vec::with_capacity(frequency.min(1024) as usize);
        for _ in 0..frequency {
            offsets.push(self.input.read_int()?);
        }
        Ok(offsets)
    }

    pub fn skip_offsets(&mut self, frequency: u32) -> Result<()> {
        self.input.skip(frequency as usize)
    }
}

impl<'a> Iterator for SegmentEntries<'a> {
    type Item = Result<PostingEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        let (node_id, frequency) = match self.next_node() {
            Ok(Some(next)) => next,
            Ok(None) => return None,
            Err(e) => {
                self.remaining = 0;
                return Some(Err(e));
            }
        };
        Some(self.read_offsets(frequency).map(|offsets| PostingEntry { node_id, offsets }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn id(s: &str) -> NodeId {
        s.parse().unwrap()
    }

    fn entries(layout: &[(&str, &[u32])]) -> Vec<PostingEntry> {
        layout.iter()
            .map(|(n, o)| PostingEntry {
                node_id: id(n),
                offsets: o.to_vec(),
            })
            .collect()
    }

    #[test]
    fn test_segment_layout() {
        let mut list = OccurrenceList::new();
        list.add(id("1.2"), 4);
        list.add(id("1.2"), 9);
        list.add(id("1.5.1"), 0);

        let mut out = VariableByteOutput::new();
        encode_segment(&mut out, 42, NameType::Element, &list).unwrap();
        let bytes = out.as_slice();
        // doc id, name type, run count, then the 4-byte length
        assert_eq!(&bytes[..3], &[42, 1, 2]);
        let length = u32::from_be_bytes([bytes[3], bytes[4], bytes[5], bytes[6]]);
        assert_eq!(length as usize, bytes.len() - 7);

        let segment = SegmentReader::new(bytes).next_segment().unwrap().unwrap();
        assert_eq!(segment.header.doc_id, 42);
        assert_eq!(segment.header.occurrence_count, 2);
        assert_eq!(segment.decode().unwrap(), entries(&[("1.2", &[4, 9]), ("1.5.1", &[0])]));
    }

    #[test]
    fn test_unsorted_list_rejected() {
        let mut list = OccurrenceList::new();
        list.add(id("1.3"), 0);
        list.add(id("1.2"), 0);
        let mut out = VariableByteOutput::new();
        assert!(encode_segment(&mut out, 1, NameType::Element, &list).is_err());
    }

    #[test]
    fn test_multi_segment_skip_and_copy() {
        let mut record = VariableByteOutput::new();
        encode_entries(&mut record, 1, NameType::Element, &entries(&[("1.1", &[0, 3]), ("1.4.2", &[7])])).unwrap();
        encode_entries(&mut record, 2, NameType::Attribute, &entries(&[("1.1.1", &[1])])).unwrap();
        encode_entries(&mut record, 3, NameType::Element, &entries(&[("1", &[5])])).unwrap();

        let mut reader = SegmentReader::new(record.as_slice());
        let mut copy = VariableByteOutput::new();
        let mut docs = Vec::new();
        while let Some(segment) = reader.next_segment().unwrap() {
            docs.push(segment.header.doc_id);
            segment.copy_to(&mut copy);
        }
        assert_eq!(docs, vec![1, 2, 3]);
        assert_eq!(copy.as_slice(), record.as_slice());

        // decode only the nodes, skipping offsets
        let segment = SegmentReader::new(record.as_slice()).next_segment().unwrap().unwrap();
        let mut runs = segment.entries();
        let mut nodes = Vec::new();
        while let Some((node_id, freq)) = runs.next_node().unwrap() {
            runs.skip_offsets(freq).unwrap();
            nodes.push(node_id.to_string());
        }
        assert_eq!(nodes, vec!["1.1", "1.4.2"]);
    }

    #[test]
    fn test_randomized_runs_decode() {
        let mut rng = rand::thread_rng();
        for _ in 0..20 {
            let mut expected: Vec<PostingEntry> = Vec::new();
            let mut levels = vec![1u32];
            for _ in 0..rng.gen_range(1..30) {
                // move to a following node in document order
                if rng.gen_bool(0.5) || levels.len() == 1 {
                    levels.push(rng.gen_range(1..5));
                } else {
                    levels.pop();
                    let last = levels.len() - 1;
                    levels[last] += rng.gen_range(1..300);
                }
                let mut offsets: Vec<u32> = (0..rng.gen_range(1..6)).map(|_| rng.gen_range(0..10_000)).collect();
                offsets.sort();
                expected.push(PostingEntry {
                    node_id: NodeId::from_levels(levels.clone()).unwrap(),
                    offsets,
                });
            }

            let mut out = VariableByteOutput::new();
            encode_entries(&mut out, 9, NameType::Element, &expected).unwrap();
            let segment = SegmentReader::new(out.as_slice()).next_segment().unwrap().unwrap();
            assert_eq!(segment.decode().unwrap(), expected);
        }
    }

    #[test]
    fn test_truncated_record_is_corruption() {
        let mut out = VariableByteOutput::new();
        encode_entries(&mut out, 1, NameType::Element, &entries(&[("1.1", &[0])])).unwrap();
        let bytes = &out.as_slice()[..out.position() - 1];
        assert!(matches!(SegmentReader::new(bytes).next_segment(), Err(StorageError::Corruption(_))));

        let mut bad_type = out.as_slice().to_vec();
        bad_type[1] = 7;
        assert!(SegmentReader::new(&bad_type).next_segment().is_err());
    }
}
