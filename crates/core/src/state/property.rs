//! Property values
//!
//! A property is a name plus either a single [`Value`] or a homogeneous list
//! of them. Binary values are [`Blob`]s, which may remember the record they
//! were read from so that rewriting an unchanged blob is free.

use crate::types::RecordId;
use std::fmt;
use std::sync::Arc;

/// Type tag of a property value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PropertyType {
    /// UTF-8 string
    String = 1,
    /// Binary content
    Binary = 2,
    /// Signed 64-bit integer
    Long = 3,
    /// 64-bit float
    Double = 4,
    /// Boolean
    Boolean = 6,
}

impl PropertyType {
    /// Decode a type tag
    pub fn from_u8(tag: u8) -> Option<Self> {
        match tag {
            1 => Some(PropertyType::String),
            2 => Some(PropertyType::Binary),
            3 => Some(PropertyType::Long),
            4 => Some(PropertyType::Double),
            6 => Some(PropertyType::Boolean),
            _ => None,
        }
    }

    /// Type name
    pub fn name(&self) -> &'static str {
        match self {
            PropertyType::String => "String",
            PropertyType::Binary => "Binary",
            PropertyType::Long => "Long",
            PropertyType::Double => "Double",
            PropertyType::Boolean => "Boolean",
        }
    }
}

/// Immutable binary content
#[derive(Clone)]
pub struct Blob {
    data: Arc<[u8]>,
    record_id: Option<RecordId>,
}

impl Blob {
    /// Create a blob from bytes
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            data: Arc::from(data.into()),
            record_id: None,
        }
    }

    /// Create a blob that is known to be stored at `id`
    pub fn stored(id: RecordId, data: Arc<[u8]>) -> Self {
        Self {
            data,
            record_id: Some(id),
        }
    }

    /// Blob content
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Content length in bytes
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True if the blob has no content
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Record holding this blob, if it was read from a segment
    pub fn record_id(&self) -> Option<RecordId> {
        self.record_id
    }
}

impl PartialEq for Blob {
    fn eq(&self, other: &Self) -> bool {
        if let (Some(a), Some(b)) = (self.record_id, other.record_id) {
            if a == b {
                return true;
            }
        }
        Arc::ptr_eq(&self.data, &other.data) || self.data[..] == other.data[..]
    }
}

impl fmt::Debug for Blob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Blob")
            .field("len", &self.data.len())
            .field("record_id", &self.record_id)
            .finish()
    }
}

/// A single typed value
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Boolean
    Boolean(bool),
    /// Signed 64-bit integer
    Long(i64),
    /// 64-bit float
    Double(f64),
    /// UTF-8 string
    String(String),
    /// Binary content
    Binary(Blob),
}

impl Value {
    /// Type of this value
    pub fn property_type(&self) -> PropertyType {
        match self {
            Value::Boolean(_) => PropertyType::Boolean,
            Value::Long(_) => PropertyType::Long,
            Value::Double(_) => PropertyType::Double,
            Value::String(_) => PropertyType::String,
            Value::Binary(_) => PropertyType::Binary,
        }
    }

    /// String content, if this is a string
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    /// Integer content, if this is a long
    pub fn as_long(&self) -> Option<i64> {
        match self {
            Value::Long(v) => Some(*v),
            _ => None,
        }
    }

    /// Boolean content, if this is a boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(v) => Some(*v),
            _ => None,
        }
    }

    /// Blob content, if this is binary
    pub fn as_blob(&self) -> Option<&Blob> {
        match self {
            Value::Binary(b) => Some(b),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Boolean(v) => write!(f, "{}", v),
            Value::Long(v) => write!(f, "{}", v),
            Value::Double(v) => write!(f, "{}", v),
            Value::String(v) => write!(f, "{}", v),
            Value::Binary(b) => write!(f, "<binary {} bytes>", b.len()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Boolean(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Long(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Long(v as i64)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::String(v)
    }
}

impl From<Blob> for Value {
    fn from(v: Blob) -> Self {
        Value::Binary(v)
    }
}

/// Value of a property: one value or an ordered list of values
#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    /// Single-valued property
    Single(Value),
    /// Multi-valued property; all values share one type
    Multi(PropertyType, Vec<Value>),
}

impl PropertyValue {
    /// Build a multi-valued property
    ///
    /// Returns `None` if the values do not share a single type.
    pub fn multi(property_type: PropertyType, values: Vec<Value>) -> Option<Self> {
        if values.iter().all(|v| v.property_type() == property_type) {
            Some(PropertyValue::Multi(property_type, values))
        } else {
            None
        }
    }

    /// Type of the value(s)
    pub fn property_type(&self) -> PropertyType {
        match self {
            PropertyValue::Single(v) => v.property_type(),
            PropertyValue::Multi(t, _) => *t,
        }
    }

    /// True for multi-valued properties
    pub fn is_multi(&self) -> bool {
        matches!(self, PropertyValue::Multi(..))
    }

    /// Number of values
    pub fn count(&self) -> usize {
        match self {
            PropertyValue::Single(_) => 1,
            PropertyValue::Multi(_, values) => values.len(),
        }
    }

    /// The values as a slice
    pub fn values(&self) -> &[Value] {
        match self {
            PropertyValue::Single(v) => std::slice::from_ref(v),
            PropertyValue::Multi(_, values) => values,
        }
    }

    /// The single value, or the first value of a multi-valued property
    pub fn value(&self) -> Option<&Value> {
        self.values().first()
    }
}

impl<T: Into<Value>> From<T> for PropertyValue {
    fn from(v: T) -> Self {
        PropertyValue::Single(v.into())
    }
}

impl fmt::Display for PropertyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PropertyValue::Single(v) => write!(f, "{}", v),
            PropertyValue::Multi(_, values) => {
                write!(f, "[")?;
                for (i, v) in values.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", v)?;
                }
                write!(f, "]")
            }
        }
    }
}

/// A named property
#[derive(Debug, Clone, PartialEq)]
pub struct PropertyState {
    name: String,
    value: PropertyValue,
}

impl PropertyState {
    /// Create a property
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Property name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Property value
    pub fn value(&self) -> &PropertyValue {
        &self.value
    }

    /// Type of the value(s)
    pub fn property_type(&self) -> PropertyType {
        self.value.property_type()
    }

    /// String value of a single-valued string property
    pub fn as_str(&self) -> Option<&str> {
        match &self.value {
            PropertyValue::Single(v) => v.as_str(),
            PropertyValue::Multi(..) => None,
        }
    }

    /// Integer value of a single-valued long property
    pub fn as_long(&self) -> Option<i64> {
        match &self.value {
            PropertyValue::Single(v) => v.as_long(),
            PropertyValue::Multi(..) => None,
        }
    }

    /// Split into name and value
    pub fn into_parts(self) -> (String, PropertyValue) {
        (self.name, self.value)
    }
}
