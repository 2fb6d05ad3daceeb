//! Packed composite primary keys.
//!
//! A packed key is a self-describing byte string:
//!
//! ```text
//! [count: u8] ( [tag: u8] [payload] )*
//!
//! tag 0  NULL     no payload
//! tag 1  INTEGER  8 bytes, big-endian i64
//! tag 2  REAL     8 bytes, big-endian IEEE-754 bits
//! tag 3  TEXT     4 byte big-endian length, then UTF-8 bytes
//! tag 4  BLOB     4 byte big-endian length, then raw bytes
//! ```
//!
//! Every component carries its own length, so no escaping is involved and
//! separator-looking bytes inside text or blobs cannot bleed into the next
//! component. Components appear in the table's primary-key order.

use crate::error::{CoreError, Result};
use crate::value::Value;
use serde::{Deserialize, Serialize};
use std::fmt;

const TAG_NULL: u8 = 0;
const TAG_INTEGER: u8 = 1;
const TAG_REAL: u8 = 2;
const TAG_TEXT: u8 = 3;
const TAG_BLOB: u8 = 4;

/// Encoded primary-key values of one row.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackedKey(Vec<u8>);

impl PackedKey {
    /// Pack the given primary-key values in order.
    ///
    /// Fails if more than 255 components are given, or a text/blob component
    /// is larger than `u32::MAX` bytes.
    pub fn pack(values: &[Value]) -> Result<Self> {
        let count = u8::try_from(values.len()).map_err(|_| CoreError::KeyEncode {
            reason: format!("{} components exceed {}", values.len(), u8::MAX),
        })?;

        let mut out = Vec::with_capacity(1 + values.len() * 9);
        out.push(count);
        for value in values {
            match value {
                Value::Null => out.push(TAG_NULL),
                Value::Integer(i) => {
                    out.push(TAG_INTEGER);
                    out.extend_from_slice(&i.to_be_bytes());
                }
                Value::Real(r) => {
                    out.push(TAG_REAL);
                    out.extend_from_slice(&r.to_bits().to_be_bytes());
                }
                Value::Text(s) => {
                    out.push(TAG_TEXT);
                    push_len_prefixed(&mut out, s.as_bytes())?;
                }
                Value::Blob(b) => {
                    out.push(TAG_BLOB);
                    push_len_prefixed(&mut out, b)?;
                }
            }
        }
        Ok(PackedKey(out))
    }

    /// Wrap bytes received from elsewhere. The bytes are validated lazily by
    /// [`PackedKey::unpack`].
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        PackedKey(bytes.into())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.0
    }

    /// Decode all components.
    pub fn unpack(&self) -> Result<Vec<Value>> {
        let mut reader = Reader {
            bytes: &self.0,
            pos: 0,
        };

        let count = reader.take(1)?[0] as usize;
        let mut values = Vec::with_capacity(count);
        for _ in 0..count {
            let tag = reader.take(1)?[0];
            let value = match tag {
                TAG_NULL => Value::Null,
                TAG_INTEGER => Value::Integer(i64::from_be_bytes(reader.take_array()?)),
                TAG_REAL => Value::Real(f64::from_bits(u64::from_be_bytes(reader.take_array()?))),
                TAG_TEXT => {
                    let len = u32::from_be_bytes(reader.take_array()?) as usize;
                    let raw = reader.take(len)?;
                    let text = std::str::from_utf8(raw)
                        .map_err(|_| self.decode_error("text component is not valid UTF-8"))?;
                    Value::Text(text.to_string())
                }
                TAG_BLOB => {
                    let len = u32::from_be_bytes(reader.take_array()?) as usize;
                    Value::Blob(reader.take(len)?.to_vec())
                }
                other => return Err(self.decode_error(&format!("unknown type tag {}", other))),
            };
            values.push(value);
        }

        if reader.pos != self.0.len() {
            return Err(self.decode_error("trailing bytes after last component"));
        }
        Ok(values)
    }

    /// Decode and check the number of components against a table's
    /// primary-key arity.
    pub fn unpack_for(&self, table: &str, expected: usize) -> Result<Vec<Value>> {
        let values = self.unpack()?;
        if values.len() != expected {
            return Err(CoreError::KeyArity {
                table: table.to_string(),
                expected,
                found: values.len(),
                raw: self.0.clone(),
            });
        }
        Ok(values)
    }

    fn decode_error(&self, reason: &str) -> CoreError {
        CoreError::KeyDecode {
            reason: reason.to_string(),
            raw: self.0.clone(),
        }
    }
}

fn push_len_prefixed(out: &mut Vec<u8>, bytes: &[u8]) -> Result<()> {
    let len = u32::try_from(bytes.len()).map_err(|_| CoreError::KeyEncode {
        reason: format!("component of {} bytes exceeds u32::MAX", bytes.len()),
    })?;
    out.extend_from_slice(&len.to_be_bytes());
    out.extend_from_slice(bytes);
    Ok(())
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        let end = self.pos.checked_add(n).filter(|end| *end <= self.bytes.len());
        match end {
            Some(end) => {
                let out = &self.bytes[self.pos..end];
                self.pos = end;
                Ok(out)
            }
            None => Err(CoreError::KeyDecode {
                reason: "truncated key".to_string(),
                raw: self.bytes.to_vec(),
            }),
        }
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }
}

impl fmt::Debug for PackedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unpack() {
            Ok(values) => f.debug_tuple("PackedKey").field(&values).finish(),
            Err(_) => write!(f, "PackedKey({:02x?})", self.0),
        }
    }
}

impl fmt::Display for PackedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.unpack() {
            Ok(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "({})", parts.join(", "))
            }
            Err(_) => write!(f, "<malformed key>"),
        }
    }
}
