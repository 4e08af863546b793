//! Minimal protobuf wire codec for the peer protocol messages.
//!
//! The peer transport itself lives outside this crate; what the core needs
//! is a byte-exact encoding of the two messages exchanged between peers.
//! This implements just enough of the protobuf wire format (varints, field
//! tags, length-delimited fields) to encode and decode them without a
//! protobuf code generator. Unknown fields are skipped on decode so a newer
//! peer can talk to an older one.
//!
//! Messages:
//!
//! | message       | field | type   | meaning            |
//! |---------------|-------|--------|--------------------|
//! | [`GetRequest`]  | 1   | string | group name         |
//! | [`GetRequest`]  | 2   | string | key                |
//! | [`GetResponse`] | 1   | bytes  | value              |

use bytes::Bytes;

use crate::error::WireError;

/// Wire type for varint fields (int32, int64, uint32, uint64, bool, enum).
const WIRE_TYPE_VARINT: u8 = 0;
/// Wire type for length-delimited fields (string, bytes, embedded messages).
const WIRE_TYPE_LEN: u8 = 2;

// ---------------------------------------------------------------------------
// Wire primitives
// ---------------------------------------------------------------------------

/// Encodes a varint.
pub fn encode_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let mut byte = (value & 0x7F) as u8;
        value >>= 7;
        if value != 0 {
            byte |= 0x80;
        }
        buf.push(byte);
        if value == 0 {
            break;
        }
    }
}

/// Decodes a varint from the front of `buf`, advancing it.
pub fn decode_varint(buf: &mut &[u8]) -> Result<u64, WireError> {
    let mut result: u64 = 0;
    let mut shift = 0;

    loop {
        if buf.is_empty() {
            return Err(WireError::new("truncated varint"));
        }
        let byte = buf[0];
        *buf = &buf[1..];

        result |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Ok(result);
        }
        shift += 7;
        if shift >= 64 {
            return Err(WireError::new("varint overflows u64"));
        }
    }
}

/// Encodes a field tag.
fn encode_tag(field_number: u32, wire_type: u8, buf: &mut Vec<u8>) {
    encode_varint(((field_number as u64) << 3) | (wire_type as u64), buf);
}

/// Decodes a field tag, returning `(field_number, wire_type)`.
fn decode_tag(buf: &mut &[u8]) -> Result<(u32, u8), WireError> {
    let tag = decode_varint(buf)?;
    Ok(((tag >> 3) as u32, (tag & 0x07) as u8))
}

/// Encodes a bytes field.
fn encode_bytes(field_number: u32, data: &[u8], buf: &mut Vec<u8>) {
    encode_tag(field_number, WIRE_TYPE_LEN, buf);
    encode_varint(data.len() as u64, buf);
    buf.extend_from_slice(data);
}

/// Encodes a string field (identical to bytes on the wire).
fn encode_string(field_number: u32, s: &str, buf: &mut Vec<u8>) {
    encode_bytes(field_number, s.as_bytes(), buf);
}

/// Decodes a length-delimited field, returning the raw bytes.
fn decode_length_delimited<'a>(buf: &mut &'a [u8]) -> Result<&'a [u8], WireError> {
    let len = decode_varint(buf)? as usize;
    if buf.len() < len {
        return Err(WireError::new("length-delimited field past end of buffer"));
    }
    let data = &buf[..len];
    *buf = &buf[len..];
    Ok(data)
}

/// Skips a field based on its wire type.
fn skip_field(wire_type: u8, buf: &mut &[u8]) -> Result<(), WireError> {
    match wire_type {
        WIRE_TYPE_VARINT => {
            decode_varint(buf)?;
        }
        WIRE_TYPE_LEN => {
            decode_length_delimited(buf)?;
        }
        // 64-bit fixed
        1 => {
            if buf.len() < 8 {
                return Err(WireError::new("truncated fixed64 field"));
            }
            *buf = &buf[8..];
        }
        // 32-bit fixed
        5 => {
            if buf.len() < 4 {
                return Err(WireError::new("truncated fixed32 field"));
            }
            *buf = &buf[4..];
        }
        other => return Err(WireError::new(format!("unsupported wire type {other}"))),
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Message trait
// ---------------------------------------------------------------------------

/// A peer-protocol message that can be written to and parsed from the
/// protobuf wire format.
///
/// The trait is object-safe so sinks can accept `&dyn Message`.
pub trait Message {
    /// Appends the wire encoding of `self` to `buf`.
    fn encode(&self, buf: &mut Vec<u8>);

    /// Merges the wire-encoded fields in `buf` into `self`.
    fn merge(&mut self, buf: &[u8]) -> Result<(), WireError>;

    /// Returns the wire encoding of `self` as a fresh buffer.
    fn encode_to_vec(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(64);
        self.encode(&mut buf);
        buf
    }

    /// Parses a message from `buf`.
    fn decode(buf: &[u8]) -> Result<Self, WireError>
    where
        Self: Default + Sized,
    {
        let mut msg = Self::default();
        msg.merge(buf)?;
        Ok(msg)
    }
}

// ---------------------------------------------------------------------------
// Peer messages
// ---------------------------------------------------------------------------

/// Request sent to the owner of a key.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetRequest {
    /// Name of the cache group.
    pub group: String,
    /// Key being requested.
    pub key: String,
}

impl Message for GetRequest {
    fn encode(&self, buf: &mut Vec<u8>) {
        if !self.group.is_empty() {
            encode_string(1, &self.group, buf);
        }
        if !self.key.is_empty() {
            encode_string(2, &self.key, buf);
        }
    }

    fn merge(&mut self, mut buf: &[u8]) -> Result<(), WireError> {
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 => {
                    let raw = decode_length_delimited(&mut buf)?;
                    self.group = String::from_utf8(raw.to_vec())
                        .map_err(|_| WireError::new("group is not valid UTF-8"))?;
                }
                2 => {
                    let raw = decode_length_delimited(&mut buf)?;
                    self.key = String::from_utf8(raw.to_vec())
                        .map_err(|_| WireError::new("key is not valid UTF-8"))?;
                }
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(())
    }
}

/// Response carrying the value for a [`GetRequest`].
///
/// The value round-trips byte-for-byte; the codec never inspects it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GetResponse {
    /// The requested value.
    pub value: Bytes,
}

impl Message for GetResponse {
    fn encode(&self, buf: &mut Vec<u8>) {
        if !self.value.is_empty() {
            encode_bytes(1, &self.value, buf);
        }
    }

    fn merge(&mut self, mut buf: &[u8]) -> Result<(), WireError> {
        while !buf.is_empty() {
            let (field_number, wire_type) = decode_tag(&mut buf)?;
            match field_number {
                1 => {
                    let raw = decode_length_delimited(&mut buf)?;
                    self.value = Bytes::copy_from_slice(raw);
                }
                _ => skip_field(wire_type, &mut buf)?,
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
