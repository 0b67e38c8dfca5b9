//! Identity types for persisted records
//!
//! - SegmentId: 128-bit random identifier of an immutable segment
//! - RecordId: segment plus byte offset of a record inside it
//! - GcGeneration: compaction generation stamped on every segment

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Identifier of an immutable segment
///
/// A SegmentId is a random (v4) UUID split into its most and least
/// significant halves, which is how it is laid out in archive indexes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SegmentId {
    /// Most significant 64 bits
    pub msb: u64,
    /// Least significant 64 bits
    pub lsb: u64,
}

impl SegmentId {
    /// Create a SegmentId from its two halves
    pub const fn new(msb: u64, lsb: u64) -> Self {
        Self { msb, lsb }
    }

    /// Create a new random SegmentId
    pub fn random() -> Self {
        Self::from_uuid(Uuid::new_v4())
    }

    /// Create a SegmentId from a UUID
    pub fn from_uuid(uuid: Uuid) -> Self {
        let value = uuid.as_u128();
        Self {
            msb: (value >> 64) as u64,
            lsb: value as u64,
        }
    }

    /// The UUID form of this id
    pub fn to_uuid(&self) -> Uuid {
        Uuid::from_u128(((self.msb as u128) << 64) | self.lsb as u128)
    }

    /// Parse a hyphenated or simple UUID string
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self::from_uuid)
    }
}

impl fmt::Display for SegmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_uuid())
    }
}

/// Address of a record: segment plus byte offset of its record header
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId {
    /// Segment holding the record
    pub segment: SegmentId,
    /// Offset of the record header inside the segment
    pub offset: u32,
}

impl RecordId {
    /// Create a RecordId
    pub const fn new(segment: SegmentId, offset: u32) -> Self {
        Self { segment, offset }
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.offset)
    }
}

impl FromStr for RecordId {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (segment, offset) = s
            .rsplit_once(':')
            .ok_or_else(|| format!("missing offset in record id '{}'", s))?;
        let segment =
            SegmentId::parse(segment).ok_or_else(|| format!("bad segment id in '{}'", s))?;
        let offset = offset
            .parse::<u32>()
            .map_err(|e| format!("bad offset in '{}': {}", s, e))?;
        Ok(RecordId::new(segment, offset))
    }
}

/// Compaction generation of a segment
///
/// `generation` increases with every compaction, `full_generation` only with
/// full compactions. `compacted` marks segments written by the compactor
/// rather than by regular commits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct GcGeneration {
    /// Generation bumped by every compaction
    pub generation: u32,
    /// Generation bumped by full compactions only
    pub full_generation: u32,
    /// Written by the compactor
    pub compacted: bool,
}

impl GcGeneration {
    /// Generation of a freshly initialized store
    pub const INITIAL: GcGeneration = GcGeneration {
        generation: 0,
        full_generation: 0,
        compacted: false,
    };

    /// Create a generation
    pub const fn new(generation: u32, full_generation: u32, compacted: bool) -> Self {
        Self {
            generation,
            full_generation,
            compacted,
        }
    }

    /// Generation produced by a tail compaction of this one
    pub fn next_tail(&self) -> Self {
        Self::new(self.generation + 1, self.full_generation, true)
    }

    /// Generation produced by a full compaction of this one
    pub fn next_full(&self) -> Self {
        Self::new(self.generation + 1, self.full_generation + 1, true)
    }

    /// Same generation, as written by regular commits
    pub fn uncompacted(&self) -> Self {
        Self::new(self.generation, self.full_generation, false)
    }
}

impl fmt::Display for GcGeneration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}{}",
            self.generation,
            self.full_generation,
            if self.compacted { "c" } else { "" }
        )
    }
}

/// Milliseconds since the Unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_segment_id_uuid_roundtrip() {
        let id = SegmentId::random();
        assert_eq!(SegmentId::from_uuid(id.to_uuid()), id);
        assert_eq!(SegmentId::parse(&id.to_string()), Some(id));
    }

    #[test]
    fn test_segment_ids_are_unique() {
        let a = SegmentId::random();
        let b = SegmentId::random();
        assert_ne!(a, b);
    }

    #[test]
    fn test_record_id_parse() {
        let id = RecordId::new(SegmentId::new(0x0123_4567_89ab_cdef, 42), 1024);
        let text = id.to_string();
        assert!(text.ends_with(":1024"));
        assert_eq!(text.parse::<RecordId>().unwrap(), id);
    }

    #[test]
    fn test_record_id_parse_rejects_garbage() {
        assert!("not-a-record".parse::<RecordId>().is_err());
        assert!("1234:xyz".parse::<RecordId>().is_err());
    }

    #[test]
    fn test_generation_progression() {
        let g = GcGeneration::INITIAL;
        let tail = g.next_tail();
        assert_eq!(tail, GcGeneration::new(1, 0, true));
        let full = tail.next_full();
        assert_eq!(full, GcGeneration::new(2, 1, true));
        assert!(!full.uncompacted().compacted);
    }
}
