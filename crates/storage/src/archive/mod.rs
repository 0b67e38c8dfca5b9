//! Tar archives of segments
//!
//! Segments are appended to a tar file as one entry each, named
//! `<segment uuid>.<crc32 of data>`. Closing an archive appends an index
//! entry describing every segment, padded at the front so that its footer
//! ends exactly where the tar trailer starts. A closed archive can therefore
//! be indexed by reading its tail only.
//!
//! # Index entry
//!
//! ```text
//! +--------------------------+
//! | Zero padding             | to a multiple of 512 bytes
//! | Entries                  | 29 bytes each, archive order:
//! |   msb                    |   8 bytes (u64 LE)
//! |   lsb                    |   8 bytes (u64 LE)
//! |   length                 |   4 bytes (u32 LE)
//! |   generation             |   4 bytes (u32 LE)
//! |   full generation        |   4 bytes (u32 LE)
//! |   compacted              |   1 byte
//! | Footer                   |
//! |   CRC32 of entries       |   4 bytes (u32 LE)
//! |   entry count            |   4 bytes (u32 LE)
//! |   index size             |   4 bytes (u32 LE, padding included)
//! |   magic "AIDX"           |   4 bytes
//! +--------------------------+
//! ```

pub mod reader;
pub mod writer;

use crate::segment::Segment;
use arbor_core::{GcGeneration, SegmentId};
use byteorder::{ByteOrder, LittleEndian};

pub use reader::ArchiveReader;
pub use writer::ArchiveWriter;

/// Size of one serialized index entry
pub const ENTRY_SIZE: usize = 29;

/// Size of the index footer
pub const FOOTER_SIZE: usize = 16;

/// Index footer magic bytes: "AIDX"
pub const INDEX_MAGIC: [u8; 4] = *b"AIDX";

/// Tar block size
pub const BLOCK_SIZE: u64 = 512;

/// Two zero blocks closing a tar file
pub const TRAILER_SIZE: u64 = 2 * BLOCK_SIZE;

/// One segment entry of an archive index
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArchiveEntry {
    /// Most significant half of the segment id
    pub msb: u64,
    /// Least significant half of the segment id
    pub lsb: u64,
    /// Segment size in bytes
    pub length: u32,
    /// Segment generation
    pub generation: u32,
    /// Segment full generation
    pub full_generation: u32,
    /// Written by the compactor
    pub compacted: bool,
}

impl ArchiveEntry {
    /// Entry describing `segment`
    pub fn for_segment(segment: &Segment) -> Self {
        let id = segment.id();
        let generation = segment.generation();
        Self {
            msb: id.msb,
            lsb: id.lsb,
            length: segment.len() as u32,
            generation: generation.generation,
            full_generation: generation.full_generation,
            compacted: generation.compacted,
        }
    }

    /// Segment id
    pub fn segment_id(&self) -> SegmentId {
        SegmentId::new(self.msb, self.lsb)
    }

    /// Segment generation
    pub fn gc_generation(&self) -> GcGeneration {
        GcGeneration::new(self.generation, self.full_generation, self.compacted)
    }

    /// Serialize to the 29-byte index layout
    pub fn to_bytes(&self) -> [u8; ENTRY_SIZE] {
        let mut bytes = [0u8; ENTRY_SIZE];
        LittleEndian::write_u64(&mut bytes[0..8], self.msb);
        LittleEndian::write_u64(&mut bytes[8..16], self.lsb);
        LittleEndian::write_u32(&mut bytes[16..20], self.length);
        LittleEndian::write_u32(&mut bytes[20..24], self.generation);
        LittleEndian::write_u32(&mut bytes[24..28], self.full_generation);
        bytes[28] = self.compacted as u8;
        bytes
    }

    /// Deserialize from the 29-byte index layout
    pub fn from_bytes(bytes: &[u8; ENTRY_SIZE]) -> Self {
        Self {
            msb: LittleEndian::read_u64(&bytes[0..8]),
            lsb: LittleEndian::read_u64(&bytes[8..16]),
            length: LittleEndian::read_u32(&bytes[16..20]),
            generation: LittleEndian::read_u32(&bytes[20..24]),
            full_generation: LittleEndian::read_u32(&bytes[24..28]),
            compacted: bytes[28] != 0,
        }
    }
}

/// Bytes a tar entry of `length` data bytes occupies, header included
pub fn tar_entry_size(length: u64) -> u64 {
    BLOCK_SIZE + round_to_block(length)
}

/// Round up to a whole number of tar blocks
pub fn round_to_block(length: u64) -> u64 {
    (length + BLOCK_SIZE - 1) / BLOCK_SIZE * BLOCK_SIZE
}

/// Tar entry name of a segment
pub fn segment_entry_name(id: &SegmentId, data: &[u8]) -> String {
    format!("{}.{:08x}", id, crc32fast::hash(data))
}

/// Parse a segment entry name into the id and data checksum
pub fn parse_segment_entry_name(name: &str) -> Option<(SegmentId, u32)> {
    let (uuid, crc) = name.rsplit_once('.')?;
    let id = SegmentId::parse(uuid)?;
    let crc = u32::from_str_radix(crc, 16).ok()?;
    Some((id, crc))
}

/// Serialize an index entry for `entries`, padded to whole tar blocks
pub fn encode_index(entries: &[ArchiveEntry]) -> Vec<u8> {
    let body = entries.len() * ENTRY_SIZE + FOOTER_SIZE;
    let size = round_to_block(body as u64);
    let mut data = vec![0u8; size as usize - body];
    let start = data.len();
    for entry in entries {
        data.extend_from_slice(&entry.to_bytes());
    }
    let crc = crc32fast::hash(&data[start..]);
    data.extend_from_slice(&crc.to_le_bytes());
    data.extend_from_slice(&(entries.len() as u32).to_le_bytes());
    data.extend_from_slice(&(size as u32).to_le_bytes());
    data.extend_from_slice(&INDEX_MAGIC);
    data
}

/// Parsed index footer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IndexFooter {
    /// CRC32 of the entry bytes
    pub crc: u32,
    /// Number of entries
    pub count: u32,
    /// Total index size including padding and footer
    pub size: u32,
}

/// Parse an index footer; `None` if the magic is absent
pub fn decode_footer(bytes: &[u8; FOOTER_SIZE]) -> Option<IndexFooter> {
    if bytes[12..16] != INDEX_MAGIC {
        return None;
    }
    Some(IndexFooter {
        crc: LittleEndian::read_u32(&bytes[0..4]),
        count: LittleEndian::read_u32(&bytes[4..8]),
        size: LittleEndian::read_u32(&bytes[8..12]),
    })
}

/// Archive file name for an archive number and rewrite letter
pub fn archive_name(index: u32, letter: char) -> String {
    format!("data{:05}{}.tar", index, letter)
}

/// Parse `dataNNNNNx.tar` into its number and letter
pub fn parse_archive_name(name: &str) -> Option<(u32, char)> {
    let stem = name.strip_prefix("data")?.strip_suffix(".tar")?;
    if stem.len() != 6 {
        return None;
    }
    let letter = stem.chars().last()?;
    if !letter.is_ascii_lowercase() {
        return None;
    }
    let index = stem[..5].parse().ok()?;
    Some((index, letter))
}
