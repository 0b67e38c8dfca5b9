//! Node record encoding
//!
//! A node record stores a node's properties and the record ids of its
//! children. Binary values are stored in separate blob records and only
//! referenced from the node.
//!
//! # Format
//!
//! ```text
//! property count            u32
//!   name length             u16, name bytes (UTF-8)
//!   type                    u8
//!   multi                   u8
//!   value count             u32
//!   values                  per type:
//!     Boolean               u8
//!     Long                  i64
//!     Double                f64
//!     String                u32 length, bytes
//!     Binary                u64 msb, u64 lsb, u32 offset, u64 length
//! child count               u32
//!   name length             u16, name bytes
//!   record id               u64 msb, u64 lsb, u32 offset
//! ```
//!
//! All integers are little endian.

use arbor_core::{Error, PropertyType, RecordId, Result, SegmentId};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Cursor, Read};

/// One stored property value
#[derive(Debug, Clone, PartialEq)]
pub enum ValueRecord {
    /// Boolean
    Boolean(bool),
    /// Signed integer
    Long(i64),
    /// Float
    Double(f64),
    /// String
    String(String),
    /// Reference to a blob record and its length
    Binary(RecordId, u64),
}

impl ValueRecord {
    fn property_type(&self) -> PropertyType {
        match self {
            ValueRecord::Boolean(_) => PropertyType::Boolean,
            ValueRecord::Long(_) => PropertyType::Long,
            ValueRecord::Double(_) => PropertyType::Double,
            ValueRecord::String(_) => PropertyType::String,
            ValueRecord::Binary(..) => PropertyType::Binary,
        }
    }
}

/// One stored property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyRecord {
    /// Property name
    pub name: String,
    /// Value type
    pub property_type: PropertyType,
    /// Multi-valued
    pub multi: bool,
    /// Values; exactly one for single-valued properties
    pub values: Vec<ValueRecord>,
}

/// Decoded node record
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeRecord {
    /// Properties in name order
    pub properties: Vec<PropertyRecord>,
    /// Children in order
    pub children: Vec<(String, RecordId)>,
}

/// Kind of reference held by a node record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference {
    /// Child node record
    Child,
    /// Blob record of a binary value
    Blob,
}

impl NodeRecord {
    /// Every record id referenced by this node
    pub fn references(&self) -> Vec<(Reference, RecordId)> {
        let mut refs: Vec<(Reference, RecordId)> = self
            .children
            .iter()
            .map(|(_, id)| (Reference::Child, *id))
            .collect();
        for property in &self.properties {
            for value in &property.values {
                if let ValueRecord::Binary(id, _) = value {
                    refs.push((Reference::Blob, *id));
                }
            }
        }
        refs
    }

    /// Copy of this record with every reference passed through `f`
    pub fn map_references(
        &self,
        mut f: impl FnMut(Reference, RecordId) -> Result<RecordId>,
    ) -> Result<NodeRecord> {
        let mut properties = Vec::with_capacity(self.properties.len());
        for property in &self.properties {
            let mut values = Vec::with_capacity(property.values.len());
            for value in &property.values {
                values.push(match value {
                    ValueRecord::Binary(id, len) => ValueRecord::Binary(f(Reference::Blob, *id)?, *len),
                    other => other.clone(),
                });
            }
            properties.push(PropertyRecord {
                name: property.name.clone(),
                property_type: property.property_type,
                multi: property.multi,
                values,
            });
        }
        let mut children = Vec::with_capacity(self.children.len());
        for (name, id) in &self.children {
            children.push((name.clone(), f(Reference::Child, *id)?));
        }
        Ok(NodeRecord {
            properties,
            children,
        })
    }

    /// Index of the named child
    pub fn child_index(&self, name: &str) -> Option<usize> {
        self.children.iter().position(|(n, _)| n == name)
    }

    /// Serialize
    pub fn encode(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(64);
        out.write_u32::<LittleEndian>(self.properties.len() as u32)?;
        for property in &self.properties {
            if property.values.iter().any(|v| v.property_type() != property.property_type) {
                return Err(Error::Serialization(format!(
                    "property '{}' mixes value types",
                    property.name
                )));
            }
            write_name(&mut out, &property.name)?;
            out.write_u8(property.property_type as u8)?;
            out.write_u8(property.multi as u8)?;
            out.write_u32::<LittleEndian>(property.values.len() as u32)?;
            for value in &property.values {
                match value {
                    ValueRecord::Boolean(v) => out.write_u8(*v as u8)?,
                    ValueRecord::Long(v) => out.write_i64::<LittleEndian>(*v)?,
                    ValueRecord::Double(v) => out.write_f64::<LittleEndian>(*v)?,
                    ValueRecord::String(v) => {
                        out.write_u32::<LittleEndian>(v.len() as u32)?;
                        out.extend_from_slice(v.as_bytes());
                    }
                    ValueRecord::Binary(id, len) => {
                        write_record_id(&mut out, id)?;
                        out.write_u64::<LittleEndian>(*len)?;
                    }
                }
            }
        }
        out.write_u32::<LittleEndian>(self.children.len() as u32)?;
        for (name, id) in &self.children {
            write_name(&mut out, name)?;
            write_record_id(&mut out, id)?;
        }
        Ok(out)
    }

    /// Deserialize the payload of record `id`
    pub fn decode(id: RecordId, payload: &[u8]) -> Result<NodeRecord> {
        let mut cursor = Cursor::new(payload);
        let record = decode_from(&mut cursor)
            .map_err(|e| Error::invalid_record(id, e.to_string()))?;
        if (cursor.position() as usize) != payload.len() {
            return Err(Error::invalid_record(id, "trailing bytes after node record"));
        }
        Ok(record)
    }
}

fn write_name(out: &mut Vec<u8>, name: &str) -> Result<()> {
    let len = u16::try_from(name.len())
        .map_err(|_| Error::Serialization(format!("name too long: {} bytes", name.len())))?;
    out.write_u16::<LittleEndian>(len)?;
    out.extend_from_slice(name.as_bytes());
    Ok(())
}

fn write_record_id(out: &mut Vec<u8>, id: &RecordId) -> Result<()> {
    out.write_u64::<LittleEndian>(id.segment.msb)?;
    out.write_u64::<LittleEndian>(id.segment.lsb)?;
    out.write_u32::<LittleEndian>(id.offset)?;
    Ok(())
}

fn read_string(cursor: &mut Cursor<&[u8]>, len: usize) -> std::io::Result<String> {
    let remaining = cursor.get_ref().len() - cursor.position() as usize;
    if len > remaining {
        return Err(std::io::Error::new(
            std::io::ErrorKind::UnexpectedEof,
            "string exceeds record",
        ));
    }
    let mut bytes = vec![0u8; len];
    cursor.read_exact(&mut bytes)?;
    String::from_utf8(bytes)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
}

fn read_record_id(cursor: &mut Cursor<&[u8]>) -> std::io::Result<RecordId> {
    let msb = cursor.read_u64::<LittleEndian>()?;
    let lsb = cursor.read_u64::<LittleEndian>()?;
    let offset = cursor.read_u32::<LittleEndian>()?;
    Ok(RecordId::new(SegmentId::new(msb, lsb), offset))
}

fn decode_from(cursor: &mut Cursor<&[u8]>) -> std::io::Result<NodeRecord> {
    let invalid = |msg: String| std::io::Error::new(std::io::ErrorKind::InvalidData, msg);

    let property_count = cursor.read_u32::<LittleEndian>()? as usize;
    let mut properties = Vec::with_capacity(property_count.min(1024));
    for _ in 0..property_count {
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let name = read_string(cursor, name_len)?;
        let tag = cursor.read_u8()?;
        let property_type = PropertyType::from_u8(tag)
            .ok_or_else(|| invalid(format!("unknown property type {}", tag)))?;
        let multi = cursor.read_u8()? != 0;
        let count = cursor.read_u32::<LittleEndian>()? as usize;
        if !multi && count != 1 {
            return Err(invalid(format!(
                "single-valued property '{}' has {} values",
                name, count
            )));
        }
        let mut values = Vec::with_capacity(count.min(1024));
        for _ in 0..count {
            values.push(match property_type {
                PropertyType::Boolean => ValueRecord::Boolean(cursor.read_u8()? != 0),
                PropertyType::Long => ValueRecord::Long(cursor.read_i64::<LittleEndian>()?),
                PropertyType::Double => ValueRecord::Double(cursor.read_f64::<LittleEndian>()?),
                PropertyType::String => {
                    let len = cursor.read_u32::<LittleEndian>()? as usize;
                    ValueRecord::String(read_string(cursor, len)?)
                }
                PropertyType::Binary => {
                    let id = read_record_id(cursor)?;
                    ValueRecord::Binary(id, cursor.read_u64::<LittleEndian>()?)
                }
            });
        }
        properties.push(PropertyRecord {
            name,
            property_type,
            multi,
            values,
        });
    }

    let child_count = cursor.read_u32::<LittleEndian>()? as usize;
    let mut children = Vec::with_capacity(child_count.min(4096));
    for _ in 0..child_count {
        let name_len = cursor.read_u16::<LittleEndian>()? as usize;
        let name = read_string(cursor, name_len)?;
        children.push((name, read_record_id(cursor)?));
    }
    Ok(NodeRecord {
        properties,
        children,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn rid(offset: u32) -> RecordId {
        RecordId::new(SegmentId::new(0xAB, 0xCD), offset)
    }

    fn sample() -> NodeRecord {
        NodeRecord {
            properties: vec![
                PropertyRecord {
                    name: "flag".into(),
                    property_type: PropertyType::Boolean,
                    multi: false,
                    values: vec![ValueRecord::Boolean(true)],
                },
                PropertyRecord {
                    name: "tags".into(),
                    property_type: PropertyType::String,
                    multi: true,
                    values: vec![ValueRecord::String("a".into()), ValueRecord::String("ü".into())],
                },
                PropertyRecord {
                    name: "data".into(),
                    property_type: PropertyType::Binary,
                    multi: false,
                    values: vec![ValueRecord::Binary(rid(99), 4096)],
                },
            ],
            children: vec![("x".into(), rid(18)), ("y".into(), rid(40))],
        }
    }

    #[test]
    fn test_encode_decode() {
        let record = sample();
        let bytes = record.encode().unwrap();
        assert_eq!(NodeRecord::decode(rid(0), &bytes).unwrap(), record);
    }

    #[test]
    fn test_references_include_children_and_blobs() {
        let refs = sample().references();
        assert_eq!(refs.len(), 3);
        assert!(refs.contains(&(Reference::Blob, rid(99))));
        assert!(refs.contains(&(Reference::Child, rid(40))));
    }

    #[test]
    fn test_map_references() {
        let mapped = sample()
            .map_references(|_, id| Ok(RecordId::new(SegmentId::new(1, 1), id.offset)))
            .unwrap();
        assert!(mapped.references().iter().all(|(_, id)| id.segment == SegmentId::new(1, 1)));
        assert_eq!(mapped.children[0].0, "x");
    }

    #[test]
    fn test_truncated_payload_is_invalid() {
        let bytes = sample().encode().unwrap();
        let err = NodeRecord::decode(rid(0), &bytes[..bytes.len() - 3]).unwrap_err();
        assert!(matches!(err, Error::InvalidRecord { .. }));
    }

    #[test]
    fn test_mixed_types_rejected() {
        let record = NodeRecord {
            properties: vec![PropertyRecord {
                name: "bad".into(),
                property_type: PropertyType::Long,
                multi: true,
                values: vec![ValueRecord::Long(1), ValueRecord::String("x".into())],
            }],
            children: vec![],
        };
        assert!(record.encode().is_err());
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(
            longs in proptest::collection::vec(any::<i64>(), 1..5),
            text in "\\PC{0,40}",
            names in proptest::collection::vec("[a-z]{1,12}", 0..6),
        ) {
            let record = NodeRecord {
                properties: vec![
                    PropertyRecord {
                        name: "n".into(),
                        property_type: PropertyType::Long,
                        multi: true,
                        values: longs.into_iter().map(ValueRecord::Long).collect(),
                    },
                    PropertyRecord {
                        name: "s".into(),
                        property_type: PropertyType::String,
                        multi: false,
                        values: vec![ValueRecord::String(text)],
                    },
                ],
                children: names.into_iter().enumerate().map(|(i, n)| (n, rid(i as u32))).collect(),
            };
            let bytes = record.encode().unwrap();
            prop_assert_eq!(NodeRecord::decode(rid(0), &bytes).unwrap(), record);
        }
    }
}
