//! Entry codec
//!
//! Encoding and decoding of records into whole slots.
//!
//! Decoding never looks past the slice it is handed; callers pass the bytes
//! from the record's offset to the end of the page (or to the end of the
//! indexed record), so a damaged length field cannot run off the page.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::device::ERASED_BYTE;
use crate::error::{DecodeError, FlashError, Result};

use super::{
    validate_name, Entry, EntryType, Record, Value, HEADER_SIZE, MAX_NAME_LEN, MAX_PAYLOAD_LEN,
    NAME_FIELD_SIZE, SLOT_SIZE, TAG_SEAL, TAG_TOMBSTONE,
};

/// Offset of the type tag inside the header
const TYPE_OFFSET: usize = 2 * NAME_FIELD_SIZE;

/// Offset of the span field inside the header
const SPAN_OFFSET: usize = TYPE_OFFSET + 2;

/// Header bytes covered by the header checksum
const HEADER_CRC_COVERED: usize = HEADER_SIZE - 8;

/// Bytes of the header covered by the record checksum
const CRC_COVERED: usize = HEADER_SIZE - 4;

/// A record read back from a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decoded {
    pub record: Record,
    /// Sequence number assigned when the record was appended
    pub seq: u64,
    /// Slots occupied, header included
    pub span: usize,
}

impl Decoded {
    /// Bytes occupied on the page
    pub fn size(&self) -> usize {
        self.span * SLOT_SIZE
    }
}

/// Slots needed for a record carrying `payload_len` out-of-line bytes
pub fn span_for(payload_len: usize) -> usize {
    1 + payload_len.div_ceil(SLOT_SIZE)
}

/// Encoded size of `record`, validating names and payload length
pub fn encoded_len(record: &Record) -> Result<usize> {
    let parts = Parts::of(record)?;
    Ok(span_for(parts.payload.len()) * SLOT_SIZE)
}

/// Encode `record` with sequence number `seq`
///
/// The result is a whole number of slots; payload padding is zeroed.
pub fn encode(record: &Record, seq: u64) -> Result<Bytes> {
    let parts = Parts::of(record)?;
    let span = span_for(parts.payload.len());

    let mut buf = BytesMut::with_capacity(span * SLOT_SIZE);
    put_name(&mut buf, parts.namespace);
    put_name(&mut buf, parts.key);
    buf.put_u8(parts.tag);
    buf.put_u8(0);
    buf.put_u16_le(span as u16);
    buf.put_u32_le(parts.len as u32);
    buf.put_u64_le(seq);
    buf.put_slice(&parts.inline);
    let header_crc = crc32fast::hash(&buf[..HEADER_CRC_COVERED]);
    buf.put_u32_le(header_crc);

    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&buf[..CRC_COVERED]);
    hasher.update(parts.payload);
    buf.put_u32_le(hasher.finalize());

    buf.put_slice(parts.payload);
    buf.put_bytes(0, span * SLOT_SIZE - buf.len());

    Ok(buf.freeze())
}

/// Decode the record at the start of `bytes`
pub fn decode(bytes: &[u8]) -> std::result::Result<Decoded, DecodeError> {
    if bytes.len() < HEADER_SIZE {
        return Err(DecodeError::LengthOverflow {
            declared: HEADER_SIZE,
            available: bytes.len(),
        });
    }

    let header = &bytes[..HEADER_SIZE];
    if is_erased(header) {
        return Err(DecodeError::Erased);
    }

    let mut fields = &header[TYPE_OFFSET..];
    let tag = fields.get_u8();
    fields.advance(1);
    let span = fields.get_u16_le() as usize;
    let len = fields.get_u32_le() as usize;
    let seq = fields.get_u64_le();
    let mut inline = [0u8; 8];
    fields.copy_to_slice(&mut inline);
    let stored_header_crc = fields.get_u32_le();
    let stored_crc = fields.get_u32_le();

    // Nothing in the header is trusted before its own checksum holds
    let computed = crc32fast::hash(&header[..HEADER_CRC_COVERED]);
    if computed != stored_header_crc {
        return Err(DecodeError::ChecksumMismatch {
            stored: stored_header_crc,
            computed,
        });
    }

    if span == 0 {
        return Err(DecodeError::InvalidSpan(span));
    }

    let size = span * SLOT_SIZE;
    if size > bytes.len() {
        return Err(DecodeError::LengthOverflow {
            declared: size,
            available: bytes.len(),
        });
    }

    let out_of_line = tag == EntryType::Str.tag() || tag == EntryType::Blob.tag();
    let payload_len = if out_of_line { len } else { 0 };
    let room = size - HEADER_SIZE;
    if payload_len > room || payload_len > MAX_PAYLOAD_LEN {
        return Err(DecodeError::LengthOverflow {
            declared: payload_len,
            available: room.min(MAX_PAYLOAD_LEN),
        });
    }

    let payload = &bytes[HEADER_SIZE..HEADER_SIZE + payload_len];
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&header[..CRC_COVERED]);
    hasher.update(payload);
    let computed = hasher.finalize();
    if computed != stored_crc {
        return Err(DecodeError::ChecksumMismatch {
            stored: stored_crc,
            computed,
        });
    }

    if span != span_for(payload_len) {
        return Err(DecodeError::InvalidSpan(span));
    }

    let record = match tag {
        TAG_SEAL => Record::Seal,
        TAG_TOMBSTONE => Record::Tombstone {
            namespace: read_name(&header[..NAME_FIELD_SIZE])?,
            key: read_name(&header[NAME_FIELD_SIZE..TYPE_OFFSET])?,
        },
        _ => {
            let ty = EntryType::from_tag(tag).ok_or(DecodeError::UnknownType(tag))?;
            let value = match ty {
                EntryType::Str => Value::Str(payload.to_vec()),
                EntryType::Blob => Value::Blob(payload.to_vec()),
                scalar => {
                    if Some(len) != scalar.scalar_width() {
                        return Err(DecodeError::LengthOverflow {
                            declared: len,
                            available: scalar.scalar_width().unwrap_or(0),
                        });
                    }
                    Value::from_inline(scalar, inline).ok_or(DecodeError::UnknownType(tag))?
                }
            };
            Record::Entry(Entry {
                namespace: read_name(&header[..NAME_FIELD_SIZE])?,
                key: read_name(&header[NAME_FIELD_SIZE..TYPE_OFFSET])?,
                value,
            })
        }
    };

    Ok(Decoded { record, seq, span })
}

/// Slots to skip past an undecodable record
///
/// The span field is only used when the header checksum holds and the span
/// stays inside `bytes`. A damaged header is skipped together with every
/// following slot up to the next intact header or erased slot, so the walk
/// resynchronizes without reading payload bytes as headers.
pub fn skip_span(bytes: &[u8]) -> usize {
    if header_intact(bytes) {
        let span = u16::from_le_bytes([bytes[SPAN_OFFSET], bytes[SPAN_OFFSET + 1]]) as usize;
        return if span >= 1 && span * SLOT_SIZE <= bytes.len() { span } else { 1 };
    }

    let mut slots = 1;
    while let Some(slot) = bytes.get(slots * SLOT_SIZE..(slots + 1) * SLOT_SIZE) {
        if is_erased(slot) || header_intact(slot) {
            break;
        }
        slots += 1;
    }
    slots
}

/// True if `bytes` starts with a header whose own checksum holds
pub fn header_intact(bytes: &[u8]) -> bool {
    let Some(header) = bytes.get(..HEADER_SIZE) else {
        return false;
    };
    if is_erased(header) {
        return false;
    }
    let stored = u32::from_le_bytes([
        header[HEADER_CRC_COVERED],
        header[HEADER_CRC_COVERED + 1],
        header[HEADER_CRC_COVERED + 2],
        header[HEADER_CRC_COVERED + 3],
    ]);
    crc32fast::hash(&header[..HEADER_CRC_COVERED]) == stored
}

/// True if every byte still holds the erased pattern
pub fn is_erased(bytes: &[u8]) -> bool {
    bytes.iter().all(|&b| b == ERASED_BYTE)
}

// =============================================================================
// Private Helpers
// =============================================================================

/// Borrowed view of the fields that go into a header
struct Parts<'a> {
    namespace: &'a str,
    key: &'a str,
    tag: u8,
    len: usize,
    inline: [u8; 8],
    payload: &'a [u8],
}

impl<'a> Parts<'a> {
    fn of(record: &'a Record) -> Result<Self> {
        let parts = match record {
            Record::Entry(entry) => {
                validate_name(&entry.namespace)?;
                validate_name(&entry.key)?;
                let ty = entry.value.entry_type();
                let payload = entry.value.as_bytes().unwrap_or(&[]);
                if payload.len() > MAX_PAYLOAD_LEN {
                    return Err(FlashError::ValueTooLarge {
                        len: payload.len(),
                        max: MAX_PAYLOAD_LEN,
                    });
                }
                Parts {
                    namespace: &entry.namespace,
                    key: &entry.key,
                    tag: ty.tag(),
                    len: ty.scalar_width().unwrap_or(payload.len()),
                    inline: entry.value.inline_bytes(),
                    payload,
                }
            }
            Record::Tombstone { namespace, key } => {
                validate_name(namespace)?;
                validate_name(key)?;
                Parts {
                    namespace,
                    key,
                    tag: TAG_TOMBSTONE,
                    len: 0,
                    inline: [0; 8],
                    payload: &[],
                }
            }
            Record::Seal => Parts {
                namespace: "",
                key: "",
                tag: TAG_SEAL,
                len: 0,
                inline: [0; 8],
                payload: &[],
            },
        };
        Ok(parts)
    }
}

fn put_name(buf: &mut BytesMut, name: &str) {
    buf.put_slice(name.as_bytes());
    buf.put_bytes(0, NAME_FIELD_SIZE - name.len());
}

fn read_name(field: &[u8]) -> std::result::Result<String, DecodeError> {
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    if end == 0 || end > MAX_NAME_LEN || field[end..].iter().any(|&b| b != 0) {
        return Err(DecodeError::InvalidName);
    }
    String::from_utf8(field[..end].to_vec()).map_err(|_| DecodeError::InvalidName)
}
