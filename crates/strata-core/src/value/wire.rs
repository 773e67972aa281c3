use crate::value::{Float32, Float64, Value, ValueKind};
use chrono::DateTime;
use thiserror::Error as ThisError;

///
/// Tagged value encoding
///
/// Self-describing form for values whose kind is not known from schema
/// position: a 1-byte `ValueKind` tag followed by the value in its natural
/// width (scalars), a u32 length prefix (text/bytes), or a u32 count of
/// recursively tagged elements (lists). Nested collections are not
/// representable here; they always carry a schema and use the positional
/// binary format instead.
///

#[derive(Debug, ThisError)]
pub enum WireError {
    #[error("tagged encoding does not support {kind} values")]
    UnsupportedKind { kind: ValueKind },

    #[error("unknown value tag byte {tag}")]
    UnknownTag { tag: u8 },

    #[error("tagged payload truncated: needed {needed} more bytes")]
    Truncated { needed: usize },

    #[error("tagged payload carries invalid {kind}: {message}")]
    Invalid {
        kind: ValueKind,
        message: &'static str,
    },

    #[error("tagged payload has {trailing} trailing bytes")]
    TrailingBytes { trailing: usize },
}

/// Encode a value in tagged form.
pub fn encode_tagged(value: &Value) -> Result<Vec<u8>, WireError> {
    let mut out = Vec::new();
    encode_into(value, &mut out)?;

    Ok(out)
}

/// Decode a complete tagged payload; trailing bytes are an error.
pub fn decode_tagged(bytes: &[u8]) -> Result<Value, WireError> {
    let mut pos = 0;
    let value = decode_from(bytes, &mut pos)?;
    if pos != bytes.len() {
        return Err(WireError::TrailingBytes {
            trailing: bytes.len() - pos,
        });
    }

    Ok(value)
}

fn encode_into(value: &Value, out: &mut Vec<u8>) -> Result<(), WireError> {
    out.push(value.kind().to_u8());

    match value {
        Value::Null => {}
        Value::Bool(v) => out.push(u8::from(*v)),
        Value::I8(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::I16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::I32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::I64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::U8(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::U16(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::U32(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::U64(v) => out.extend_from_slice(&v.to_le_bytes()),
        Value::F32(v) => out.extend_from_slice(&v.get().to_le_bytes()),
        Value::F64(v) => out.extend_from_slice(&v.get().to_le_bytes()),
        Value::Text(v) => {
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            out.extend_from_slice(v.as_bytes());
        }
        Value::Bytes(v) => {
            out.extend_from_slice(&(v.len() as u32).to_le_bytes());
            out.extend_from_slice(v);
        }
        Value::Timestamp(v) => out.extend_from_slice(&v.timestamp_micros().to_le_bytes()),
        Value::List(elements) => {
            out.extend_from_slice(&(elements.len() as u32).to_le_bytes());
            for element in elements {
                encode_into(element, out)?;
            }
        }
        Value::Nested(_) => {
            return Err(WireError::UnsupportedKind {
                kind: ValueKind::Nested,
            });
        }
    }

    Ok(())
}

fn take<'a>(bytes: &'a [u8], pos: &mut usize, len: usize) -> Result<&'a [u8], WireError> {
    let end = *pos + len;
    if end > bytes.len() {
        return Err(WireError::Truncated {
            needed: end - bytes.len(),
        });
    }

    let slice = &bytes[*pos..end];
    *pos = end;

    Ok(slice)
}

fn take_u32(bytes: &[u8], pos: &mut usize) -> Result<u32, WireError> {
    let slice = take(bytes, pos, 4)?;
    Ok(u32::from_le_bytes([slice[0], slice[1], slice[2], slice[3]]))
}

fn decode_from(bytes: &[u8], pos: &mut usize) -> Result<Value, WireError> {
    let tag = take(bytes, pos, 1)?[0];
    let kind = ValueKind::from_u8(tag).ok_or(WireError::UnknownTag { tag })?;

    let value = match kind {
        ValueKind::Null => Value::Null,
        ValueKind::Bool => Value::Bool(take(bytes, pos, 1)?[0] != 0),
        ValueKind::I8 => Value::I8(take(bytes, pos, 1)?[0] as i8),
        ValueKind::I16 => {
            let b = take(bytes, pos, 2)?;
            Value::I16(i16::from_le_bytes([b[0], b[1]]))
        }
        ValueKind::I32 => {
            let b = take(bytes, pos, 4)?;
            Value::I32(i32::from_le_bytes([b[0], b[1], b[2], b[3]]))
        }
        ValueKind::I64 => {
            let b = take(bytes, pos, 8)?;
            Value::I64(i64::from_le_bytes(b.try_into().unwrap_or_default()))
        }
        ValueKind::U8 => Value::U8(take(bytes, pos, 1)?[0]),
        ValueKind::U16 => {
            let b = take(bytes, pos, 2)?;
            Value::U16(u16::from_le_bytes([b[0], b[1]]))
        }
        ValueKind::U32 => Value::U32(take_u32(bytes, pos)?),
        ValueKind::U64 => {
            let b = take(bytes, pos, 8)?;
            Value::U64(u64::from_le_bytes(b.try_into().unwrap_or_default()))
        }
        ValueKind::F32 => {
            let b = take(bytes, pos, 4)?;
            let raw = f32::from_le_bytes([b[0], b[1], b[2], b[3]]);
            Value::F32(Float32::try_new(raw).ok_or(WireError::Invalid {
                kind: ValueKind::F32,
                message: "non-finite float",
            })?)
        }
        ValueKind::F64 => {
            let b = take(bytes, pos, 8)?;
            let raw = f64::from_le_bytes(b.try_into().unwrap_or_default());
            Value::F64(Float64::try_new(raw).ok_or(WireError::Invalid {
                kind: ValueKind::F64,
                message: "non-finite float",
            })?)
        }
        ValueKind::Text => {
            let len = take_u32(bytes, pos)? as usize;
            let raw = take(bytes, pos, len)?;
            Value::Text(
                std::str::from_utf8(raw)
                    .map_err(|_| WireError::Invalid {
                        kind: ValueKind::Text,
                        message: "invalid utf-8",
                    })?
                    .to_string(),
            )
        }
        ValueKind::Bytes => {
            let len = take_u32(bytes, pos)? as usize;
            Value::Bytes(take(bytes, pos, len)?.to_vec())
        }
        ValueKind::Timestamp => {
            let b = take(bytes, pos, 8)?;
            let micros = i64::from_le_bytes(b.try_into().unwrap_or_default());
            Value::Timestamp(DateTime::from_timestamp_micros(micros).ok_or(
                WireError::Invalid {
                    kind: ValueKind::Timestamp,
                    message: "timestamp out of range",
                },
            )?)
        }
        ValueKind::List => {
            let count = take_u32(bytes, pos)? as usize;
            let mut elements = Vec::with_capacity(count.min(4096));
            for _ in 0..count {
                elements.push(decode_from(bytes, pos)?);
            }
            Value::List(elements)
        }
        ValueKind::Nested | ValueKind::Dynamic => {
            return Err(WireError::UnsupportedKind { kind });
        }
    };

    Ok(value)
}
