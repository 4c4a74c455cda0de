//! Entry Module
//!
//! Typed key-value records and their on-page encoding.
//!
//! ## Entry Layout
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header slot (64 bytes)                                       │
//! │   Namespace [16] | Key [16]           (≤ 15 bytes, NUL pad)  │
//! │   Type (1) | Rsvd (1) | Span (2) | Len (4) | Seq (8)         │
//! │   Inline scalar [8] | Header CRC32 (4) | CRC32 (4)           │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload slots (STR/BLOB only, zero padded to 64 bytes)       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! The header CRC32 covers header bytes 0..56, so the span of a record
//! whose payload is damaged can still be trusted. The record CRC32 covers
//! header bytes 0..60 and the unpadded payload.

mod buffer;
pub mod codec;

use std::fmt;
use std::str::FromStr;

pub use buffer::DecodeBuffer;

use crate::error::{FlashError, Result};

// =============================================================================
// Layout Constants
// =============================================================================

/// Allocation unit on a page
pub const SLOT_SIZE: usize = 64;

/// Entry header size (one slot)
pub const HEADER_SIZE: usize = SLOT_SIZE;

/// Width of the namespace and key fields
pub const NAME_FIELD_SIZE: usize = 16;

/// Longest namespace or key (one byte is kept for the NUL pad)
pub const MAX_NAME_LEN: usize = NAME_FIELD_SIZE - 1;

/// Largest STR/BLOB payload the format can describe
pub const MAX_PAYLOAD_LEN: usize = 4096;

/// Largest encoded entry (header + maximum payload)
pub const MAX_ENTRY_SIZE: usize = HEADER_SIZE + MAX_PAYLOAD_LEN;

/// Type tag of a delete marker
pub(crate) const TAG_TOMBSTONE: u8 = 0xFE;

/// Type tag of the record that closes a page
pub(crate) const TAG_SEAL: u8 = 0xFD;

// =============================================================================
// Entry Types
// =============================================================================

/// Type of a stored value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EntryType {
    U8 = 0x01,
    I8 = 0x11,
    U16 = 0x02,
    I16 = 0x12,
    U32 = 0x04,
    I32 = 0x14,
    U64 = 0x08,
    I64 = 0x18,
    Str = 0x21,
    Blob = 0x42,
}

impl EntryType {
    /// Every value type, in tag order of the scalar widths first
    pub const ALL: [EntryType; 10] = [
        EntryType::U8,
        EntryType::I8,
        EntryType::U16,
        EntryType::I16,
        EntryType::U32,
        EntryType::I32,
        EntryType::U64,
        EntryType::I64,
        EntryType::Str,
        EntryType::Blob,
    ];

    /// On-page type tag
    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }

    /// Human-readable name used by the dump output
    pub fn name(self) -> &'static str {
        match self {
            EntryType::U8 => "uint8",
            EntryType::I8 => "int8",
            EntryType::U16 => "uint16",
            EntryType::I16 => "int16",
            EntryType::U32 => "uint32",
            EntryType::I32 => "int32",
            EntryType::U64 => "uint64",
            EntryType::I64 => "int64",
            EntryType::Str => "str",
            EntryType::Blob => "blob",
        }
    }

    /// Width in bytes for scalar types, `None` for STR/BLOB
    pub fn scalar_width(self) -> Option<usize> {
        match self {
            EntryType::U8 | EntryType::I8 => Some(1),
            EntryType::U16 | EntryType::I16 => Some(2),
            EntryType::U32 | EntryType::I32 => Some(4),
            EntryType::U64 | EntryType::I64 => Some(8),
            EntryType::Str | EntryType::Blob => None,
        }
    }
}

impl fmt::Display for EntryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for EntryType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let ty = match s.to_ascii_lowercase().as_str() {
            "u8" | "uint8" => EntryType::U8,
            "i8" | "int8" => EntryType::I8,
            "u16" | "uint16" => EntryType::U16,
            "i16" | "int16" => EntryType::I16,
            "u32" | "uint32" => EntryType::U32,
            "i32" | "int32" => EntryType::I32,
            "u64" | "uint64" => EntryType::U64,
            "i64" | "int64" => EntryType::I64,
            "str" | "string" => EntryType::Str,
            "blob" => EntryType::Blob,
            other => return Err(format!("unknown entry type '{}'", other)),
        };
        Ok(ty)
    }
}

// =============================================================================
// Values
// =============================================================================

/// A typed value
///
/// Strings are raw bytes: no encoding or terminator is imposed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    Str(Vec<u8>),
    Blob(Vec<u8>),
}

impl Value {
    /// Build a STR value from text
    pub fn string(s: impl Into<String>) -> Self {
        Value::Str(s.into().into_bytes())
    }

    pub fn entry_type(&self) -> EntryType {
        match self {
            Value::U8(_) => EntryType::U8,
            Value::I8(_) => EntryType::I8,
            Value::U16(_) => EntryType::U16,
            Value::I16(_) => EntryType::I16,
            Value::U32(_) => EntryType::U32,
            Value::I32(_) => EntryType::I32,
            Value::U64(_) => EntryType::U64,
            Value::I64(_) => EntryType::I64,
            Value::Str(_) => EntryType::Str,
            Value::Blob(_) => EntryType::Blob,
        }
    }

    /// Payload bytes for STR/BLOB values
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::Str(b) | Value::Blob(b) => Some(b),
            _ => None,
        }
    }

    /// Parse text into a value of the given type
    ///
    /// Integers accept decimal (and `0x` hex for unsigned types), STR takes
    /// the text verbatim, BLOB takes a hex string.
    pub fn parse(ty: EntryType, text: &str) -> Result<Self> {
        let bad = |e: &dyn fmt::Display| {
            FlashError::InvalidValue(format!("'{}' is not a valid {}: {}", text, ty, e))
        };

        let value = match ty {
            EntryType::U8 => Value::U8(parse_unsigned(text).and_then(narrow).map_err(|e| bad(&e))?),
            EntryType::U16 => Value::U16(parse_unsigned(text).and_then(narrow).map_err(|e| bad(&e))?),
            EntryType::U32 => Value::U32(parse_unsigned(text).and_then(narrow).map_err(|e| bad(&e))?),
            EntryType::U64 => Value::U64(parse_unsigned(text).map_err(|e| bad(&e))?),
            EntryType::I8 => Value::I8(text.parse().map_err(|e| bad(&e))?),
            EntryType::I16 => Value::I16(text.parse().map_err(|e| bad(&e))?),
            EntryType::I32 => Value::I32(text.parse().map_err(|e| bad(&e))?),
            EntryType::I64 => Value::I64(text.parse().map_err(|e| bad(&e))?),
            EntryType::Str => Value::Str(text.as_bytes().to_vec()),
            EntryType::Blob => Value::Blob(decode_hex(text).map_err(|e| bad(&e))?),
        };
        Ok(value)
    }

    /// Scalar value packed little-endian into the inline field
    pub(crate) fn inline_bytes(&self) -> [u8; 8] {
        let mut out = [0u8; 8];
        match self {
            Value::U8(v) => out[..1].copy_from_slice(&v.to_le_bytes()),
            Value::I8(v) => out[..1].copy_from_slice(&v.to_le_bytes()),
            Value::U16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Value::I16(v) => out[..2].copy_from_slice(&v.to_le_bytes()),
            Value::U32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Value::I32(v) => out[..4].copy_from_slice(&v.to_le_bytes()),
            Value::U64(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::I64(v) => out.copy_from_slice(&v.to_le_bytes()),
            Value::Str(_) | Value::Blob(_) => {}
        }
        out
    }

    /// Inverse of `inline_bytes` for scalar types
    pub(crate) fn from_inline(ty: EntryType, b: [u8; 8]) -> Option<Self> {
        let value = match ty {
            EntryType::U8 => Value::U8(b[0]),
            EntryType::I8 => Value::I8(b[0] as i8),
            EntryType::U16 => Value::U16(u16::from_le_bytes([b[0], b[1]])),
            EntryType::I16 => Value::I16(i16::from_le_bytes([b[0], b[1]])),
            EntryType::U32 => Value::U32(u32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            EntryType::I32 => Value::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            EntryType::U64 => Value::U64(u64::from_le_bytes(b)),
            EntryType::I64 => Value::I64(i64::from_le_bytes(b)),
            EntryType::Str | EntryType::Blob => return None,
        };
        Some(value)
    }
}

/// Integers in decimal, 64-bit unsigned in hex, strings lossily as text,
/// blobs as lowercase hex
impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::U8(v) => write!(f, "{}", v),
            Value::I8(v) => write!(f, "{}", v),
            Value::U16(v) => write!(f, "{}", v),
            Value::I16(v) => write!(f, "{}", v),
            Value::U32(v) => write!(f, "{}", v),
            Value::I32(v) => write!(f, "{}", v),
            Value::U64(v) => write!(f, "{:x}", v),
            Value::I64(v) => write!(f, "{}", v),
            Value::Str(b) => f.write_str(&String::from_utf8_lossy(b)),
            Value::Blob(b) => b.iter().try_for_each(|byte| write!(f, "{:02x}", byte)),
        }
    }
}

macro_rules! value_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

value_from! {
    u8 => U8,
    i8 => I8,
    u16 => U16,
    i16 => I16,
    u32 => U32,
    i32 => I32,
    u64 => U64,
    i64 => I64,
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.as_bytes().to_vec())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s.into_bytes())
    }
}

impl From<&[u8]> for Value {
    fn from(b: &[u8]) -> Self {
        Value::Blob(b.to_vec())
    }
}

impl From<Vec<u8>> for Value {
    fn from(b: Vec<u8>) -> Self {
        Value::Blob(b)
    }
}

fn parse_unsigned(text: &str) -> std::result::Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => text.parse(),
    };
    parsed.map_err(|e| e.to_string())
}

fn narrow<T: TryFrom<u64>>(v: u64) -> std::result::Result<T, String> {
    T::try_from(v).map_err(|_| "out of range".to_string())
}

fn decode_hex(text: &str) -> std::result::Result<Vec<u8>, String> {
    if text.len() % 2 != 0 {
        return Err("odd number of hex digits".to_string());
    }

    (0..text.len())
        .step_by(2)
        .map(|i| {
            text.get(i..i + 2)
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("bad hex digit near position {}", i))
        })
        .collect()
}

// =============================================================================
// Records
// =============================================================================

/// A live key-value pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entry {
    pub namespace: String,
    pub key: String,
    pub value: Value,
}

impl Entry {
    pub fn new(namespace: impl Into<String>, key: impl Into<String>, value: Value) -> Self {
        Self {
            namespace: namespace.into(),
            key: key.into(),
            value,
        }
    }
}

/// Anything the codec can put on a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Record {
    /// A value for (namespace, key)
    Entry(Entry),

    /// Delete marker for (namespace, key)
    Tombstone { namespace: String, key: String },

    /// Closes a page (WRITING → FULL)
    Seal,
}

/// What iteration yields: one live entry with its type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub namespace: String,
    pub key: String,
    pub entry_type: EntryType,
    pub value: Value,
}

impl From<Entry> for EntryInfo {
    fn from(entry: Entry) -> Self {
        Self {
            entry_type: entry.value.entry_type(),
            namespace: entry.namespace,
            key: entry.key,
            value: entry.value,
        }
    }
}

/// Reject names the fixed-width header cannot hold
pub fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FlashError::InvalidName("name must not be empty".to_string()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(FlashError::InvalidName(format!(
            "'{}' is {} bytes (max {})",
            name,
            name.len(),
            MAX_NAME_LEN
        )));
    }
    if name.as_bytes().contains(&0) {
        return Err(FlashError::InvalidName(format!("'{}' contains NUL", name.escape_default())));
    }
    Ok(())
}
