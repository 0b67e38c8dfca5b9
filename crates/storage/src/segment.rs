//! Segment binary format
//!
//! A segment is an immutable block of records. Records are addressed by the
//! byte offset of their header, so a [`RecordId`] stays valid for as long as
//! the segment exists.
//!
//! # Format
//!
//! ```text
//! +----------------------+
//! | Magic: "ASEG"        | 4 bytes
//! | Version              | 1 byte
//! | Generation           | 4 bytes (u32 LE)
//! | Full generation      | 4 bytes (u32 LE)
//! | Compacted            | 1 byte
//! | Record count         | 4 bytes (u32 LE)
//! +----------------------+
//! | Record type          | 1 byte   \
//! | Payload length       | 4 bytes   | repeated
//! | Payload              | variable /
//! +----------------------+
//! ```

use arbor_core::{Error, GcGeneration, RecordId, Result, SegmentId};
use byteorder::{ByteOrder, LittleEndian, WriteBytesExt};
use std::fmt;

/// Segment magic bytes: "ASEG"
pub const SEGMENT_MAGIC: [u8; 4] = *b"ASEG";

/// Current segment format version
pub const SEGMENT_VERSION: u8 = 1;

/// Size of the segment header
pub const SEGMENT_HEADER_SIZE: usize = 18;

/// Size of a record header (type + length)
pub const RECORD_HEADER_SIZE: usize = 5;

/// Kind of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RecordType {
    /// Node: properties and child references
    Node = 1,
    /// Binary content
    Blob = 2,
}

impl RecordType {
    /// Decode a record type tag
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(RecordType::Node),
            2 => Some(RecordType::Blob),
            _ => None,
        }
    }
}

/// An immutable, parsed segment
pub struct Segment {
    id: SegmentId,
    generation: GcGeneration,
    record_count: u32,
    data: Vec<u8>,
}

impl Segment {
    /// Parse and validate segment bytes
    ///
    /// Checks the header and that every record lies within the segment.
    pub fn parse(id: SegmentId, data: Vec<u8>) -> Result<Self> {
        let (generation, record_count) = Self::read_header(&data)
            .map_err(|reason| Error::storage(format!("segment {}: {}", id, reason)))?;
        let segment = Segment {
            id,
            generation,
            record_count,
            data,
        };
        let mut seen = 0u32;
        for entry in segment.records() {
            entry?;
            seen += 1;
        }
        if seen != record_count {
            return Err(Error::storage(format!(
                "segment {}: header claims {} records, found {}",
                id, record_count, seen
            )));
        }
        Ok(segment)
    }

    /// Decode the generation and record count from a segment header
    pub fn read_header(data: &[u8]) -> std::result::Result<(GcGeneration, u32), String> {
        if data.len() < SEGMENT_HEADER_SIZE {
            return Err(format!("too short ({} bytes)", data.len()));
        }
        if data[0..4] != SEGMENT_MAGIC {
            return Err("invalid magic".to_string());
        }
        if data[4] != SEGMENT_VERSION {
            return Err(format!("unsupported version {}", data[4]));
        }
        let generation = GcGeneration::new(
            LittleEndian::read_u32(&data[5..9]),
            LittleEndian::read_u32(&data[9..13]),
            data[13] != 0,
        );
        Ok((generation, LittleEndian::read_u32(&data[14..18])))
    }

    /// Segment id
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Generation the segment was written in
    pub fn generation(&self) -> GcGeneration {
        self.generation
    }

    /// Number of records
    pub fn record_count(&self) -> u32 {
        self.record_count
    }

    /// Raw segment bytes
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the segment has no bytes (never the case for parsed segments)
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Record at `offset`
    pub fn record(&self, offset: u32) -> Result<(RecordType, &[u8])> {
        let id = RecordId::new(self.id, offset);
        self.record_at(offset as usize)
            .map(|(record_type, payload, _)| (record_type, payload))
            .map_err(|reason| Error::invalid_record(id, reason))
    }

    fn record_at(&self, offset: usize) -> std::result::Result<(RecordType, &[u8], usize), String> {
        if offset < SEGMENT_HEADER_SIZE || offset + RECORD_HEADER_SIZE > self.data.len() {
            return Err(format!("offset {} out of bounds", offset));
        }
        let record_type = RecordType::from_u8(self.data[offset])
            .ok_or_else(|| format!("unknown record type {}", self.data[offset]))?;
        let length = LittleEndian::read_u32(&self.data[offset + 1..offset + 5]) as usize;
        let start = offset + RECORD_HEADER_SIZE;
        let end = start
            .checked_add(length)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| format!("record length {} exceeds segment", length))?;
        Ok((record_type, &self.data[start..end], end))
    }

    /// Iterate over `(offset, type, payload)` of every record
    pub fn records(&self) -> Records<'_> {
        Records {
            segment: self,
            offset: SEGMENT_HEADER_SIZE,
        }
    }
}

impl fmt::Debug for Segment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Segment")
            .field("id", &self.id)
            .field("generation", &self.generation)
            .field("records", &self.record_count)
            .field("len", &self.data.len())
            .finish()
    }
}

/// Iterator over the records of a segment
pub struct Records<'a> {
    segment: &'a Segment,
    offset: usize,
}

impl<'a> Iterator for Records<'a> {
    type Item = Result<(u32, RecordType, &'a [u8])>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset >= self.segment.data.len() {
            return None;
        }
        let offset = self.offset;
        match self.segment.record_at(offset) {
            Ok((record_type, payload, end)) => {
                self.offset = end;
                Some(Ok((offset as u32, record_type, payload)))
            }
            Err(reason) => {
                self.offset = self.segment.data.len();
                Some(Err(Error::invalid_record(
                    RecordId::new(self.segment.id, offset as u32),
                    reason,
                )))
            }
        }
    }
}

/// Segment under construction
pub struct SegmentBuffer {
    id: SegmentId,
    generation: GcGeneration,
    record_count: u32,
    data: Vec<u8>,
}

impl SegmentBuffer {
    /// Start a new segment with a fresh random id
    pub fn new(generation: GcGeneration) -> Self {
        let mut data = Vec::with_capacity(4096);
        data.extend_from_slice(&SEGMENT_MAGIC);
        data.push(SEGMENT_VERSION);
        data.extend_from_slice(&generation.generation.to_le_bytes());
        data.extend_from_slice(&generation.full_generation.to_le_bytes());
        data.push(generation.compacted as u8);
        data.extend_from_slice(&0u32.to_le_bytes());
        Self {
            id: SegmentId::random(),
            generation,
            record_count: 0,
            data,
        }
    }

    /// Id the segment will be stored under
    pub fn id(&self) -> SegmentId {
        self.id
    }

    /// Generation stamped on the segment
    pub fn generation(&self) -> GcGeneration {
        self.generation
    }

    /// Current size in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if no record was appended yet
    pub fn is_empty(&self) -> bool {
        self.record_count == 0
    }

    /// True if appending `payload_len` bytes would exceed `max_size`
    pub fn would_overflow(&self, payload_len: usize, max_size: usize) -> bool {
        self.data.len() + RECORD_HEADER_SIZE + payload_len > max_size
    }

    /// Append a record, returning its id
    pub fn append(&mut self, record_type: RecordType, payload: &[u8]) -> Result<RecordId> {
        let offset = u32::try_from(self.data.len())
            .map_err(|_| Error::storage("segment exceeds 4 GiB"))?;
        let length = u32::try_from(payload.len())
            .map_err(|_| Error::storage("record exceeds 4 GiB"))?;
        self.data.write_u8(record_type as u8)?;
        self.data.write_u32::<LittleEndian>(length)?;
        self.data.extend_from_slice(payload);
        self.record_count += 1;
        Ok(RecordId::new(self.id, offset))
    }

    /// Finish the segment
    pub fn seal(mut self) -> Segment {
        LittleEndian::write_u32(&mut self.data[14..18], self.record_count);
        Segment {
            id: self.id,
            generation: self.generation,
            record_count: self.record_count,
            data: self.data,
        }
    }
}
