//! Bidirectional conversion between typed [`OdValue`]s and the little-endian
//! byte strings carried on the wire. Integer and float types are always
//! byte-aligned in the OD (`bit_length` a multiple of 8); fractional widths
//! only ever occur inside a PDO frame, which the PDO engine packs directly
//! without going through this module.

use thiserror::Error;

use crate::dictionary::{DataType, OdValue, Variable};

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("0x{index:04X}:{subindex} expects {expected} byte(s) of data_type {data_type:?}, got a value of a different type")]
    WrongValueType { index: u16, subindex: u8, data_type: DataType, expected: usize },

    #[error("0x{index:04X}:{subindex} cannot encode a {len}-byte string/domain value into {max} bytes")]
    StringTooLong { index: u16, subindex: u8, len: usize, max: usize },
}

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("0x{index:04X}:{subindex} expected {expected} bytes for data_type {data_type:?}, got {actual}")]
    WrongLength { index: u16, subindex: u8, data_type: DataType, expected: usize, actual: usize },

    #[error("0x{index:04X}:{subindex} is not valid UTF-8")]
    InvalidUtf8 { index: u16, subindex: u8 },
}

/// Encodes `value` as the little-endian wire bytes for `entry`. Integers are
/// clamped to `[entry.min, entry.max]` only when `clamp` is set; otherwise an
/// out-of-range integer is encoded as-is (two's complement truncation).
pub fn encode(entry: &Variable, value: &OdValue, clamp: bool) -> Result<Vec<u8>, EncodeError> {
    let width = entry.byte_length();

    macro_rules! numeric {
        ($got:expr, $ty:ty, $cast:expr) => {{
            let raw: $ty = if clamp { clamp_value($got, entry) as $ty } else { $cast };
            Ok(raw.to_le_bytes().to_vec())
        }};
    }

    match (entry.data_type, value) {
        (DataType::Boolean, OdValue::Bool(v)) => Ok(vec![*v as u8]),
        (DataType::Integer8, OdValue::I8(v)) => numeric!(*v as i128, i8, *v),
        (DataType::Integer16, OdValue::I16(v)) => numeric!(*v as i128, i16, *v),
        (DataType::Integer32, OdValue::I32(v)) => numeric!(*v as i128, i32, *v),
        (DataType::Integer64, OdValue::I64(v)) => numeric!(*v as i128, i64, *v),
        (DataType::Unsigned8, OdValue::U8(v)) => numeric!(*v as i128, u8, *v),
        (DataType::Unsigned16, OdValue::U16(v)) => numeric!(*v as i128, u16, *v),
        (DataType::Unsigned32, OdValue::U32(v)) => numeric!(*v as i128, u32, *v),
        (DataType::Unsigned64, OdValue::U64(v)) => numeric!(*v as i128, u64, *v),
        (DataType::Real32, OdValue::F32(v)) => Ok(v.to_le_bytes().to_vec()),
        (DataType::Real64, OdValue::F64(v)) => Ok(v.to_le_bytes().to_vec()),
        (DataType::VisibleString, OdValue::VisibleString(s))
        | (DataType::UnicodeString, OdValue::UnicodeString(s)) => {
            Ok(pad_or_truncate(s.as_bytes(), width))
        }
        (DataType::OctetString, OdValue::OctetString(bytes))
        | (DataType::Domain, OdValue::Domain(bytes)) => {
            if width != 0 && bytes.len() > width {
                return Err(EncodeError::StringTooLong { index: entry.index, subindex: entry.subindex, len: bytes.len(), max: width });
            }
            Ok(bytes.clone())
        }
        _ => Err(EncodeError::WrongValueType { index: entry.index, subindex: entry.subindex, data_type: entry.data_type, expected: width }),
    }
}

/// Decodes the wire bytes for `entry` back into a typed value. Out-of-range
/// integers are returned as-is: validity is only enforced by callers who
/// explicitly ask for it (the codec never rejects a well-sized blob).
pub fn decode(entry: &Variable, bytes: &[u8]) -> Result<OdValue, DecodeError> {
    macro_rules! fixed_width {
        ($expected:expr) => {
            if bytes.len() != $expected {
                return Err(DecodeError::WrongLength {
                    index: entry.index,
                    subindex: entry.subindex,
                    data_type: entry.data_type,
                    expected: $expected,
                    actual: bytes.len(),
                });
            }
        };
    }

    Ok(match entry.data_type {
        DataType::Boolean => {
            fixed_width!(1);
            OdValue::Bool(bytes[0] != 0)
        }
        DataType::Integer8 => { fixed_width!(1); OdValue::I8(i8::from_le_bytes([bytes[0]])) }
        DataType::Integer16 => { fixed_width!(2); OdValue::I16(i16::from_le_bytes(bytes.try_into().unwrap())) }
        DataType::Integer32 => { fixed_width!(4); OdValue::I32(i32::from_le_bytes(bytes.try_into().unwrap())) }
        DataType::Integer64 => { fixed_width!(8); OdValue::I64(i64::from_le_bytes(bytes.try_into().unwrap())) }
        DataType::Unsigned8 => { fixed_width!(1); OdValue::U8(bytes[0]) }
        DataType::Unsigned16 => { fixed_width!(2); OdValue::U16(u16::from_le_bytes(bytes.try_into().unwrap())) }
        DataType::Unsigned32 => { fixed_width!(4); OdValue::U32(u32::from_le_bytes(bytes.try_into().unwrap())) }
        DataType::Unsigned64 => { fixed_width!(8); OdValue::U64(u64::from_le_bytes(bytes.try_into().unwrap())) }
        DataType::Real32 => { fixed_width!(4); OdValue::F32(f32::from_le_bytes(bytes.try_into().unwrap())) }
        DataType::Real64 => { fixed_width!(8); OdValue::F64(f64::from_le_bytes(bytes.try_into().unwrap())) }
        DataType::VisibleString => OdValue::VisibleString(
            decode_string(bytes).ok_or(DecodeError::InvalidUtf8 { index: entry.index, subindex: entry.subindex })?,
        ),
        DataType::UnicodeString => OdValue::UnicodeString(
            decode_string(bytes).ok_or(DecodeError::InvalidUtf8 { index: entry.index, subindex: entry.subindex })?,
        ),
        DataType::OctetString => OdValue::OctetString(bytes.to_vec()),
        DataType::Domain => OdValue::Domain(bytes.to_vec()),
    })
}

/// Converts a raw encoded integer to its physical value: `phys = raw * factor`.
pub fn raw_to_physical(entry: &Variable, raw: &OdValue) -> f64 {
    raw.as_i128().map(|raw| raw as f64 * entry.factor).unwrap_or(f64::NAN)
}

/// Converts a physical value back to its raw encoded form: `raw =
/// round(phys / factor)`. Returns `None` for non-integer data types,
/// mirroring the domain of [`OdValue::as_i128`].
pub fn physical_to_raw(entry: &Variable, phys: f64) -> Option<OdValue> {
    let raw = (phys / entry.factor).round() as i128;
    Some(match entry.data_type {
        DataType::Integer8 => OdValue::I8(raw as i8),
        DataType::Integer16 => OdValue::I16(raw as i16),
        DataType::Integer32 => OdValue::I32(raw as i32),
        DataType::Integer64 => OdValue::I64(raw as i64),
        DataType::Unsigned8 => OdValue::U8(raw as u8),
        DataType::Unsigned16 => OdValue::U16(raw as u16),
        DataType::Unsigned32 => OdValue::U32(raw as u32),
        DataType::Unsigned64 => OdValue::U64(raw as u64),
        _ => return None,
    })
}

fn clamp_value(value: i128, entry: &Variable) -> i128 {
    let min = entry.min.as_ref().and_then(OdValue::as_i128);
    let max = entry.max.as_ref().and_then(OdValue::as_i128);
    let mut value = value;
    if let Some(min) = min {
        value = value.max(min);
    }
    if let Some(max) = max {
        value = value.min(max);
    }
    value
}

fn pad_or_truncate(bytes: &[u8], width: usize) -> Vec<u8> {
    if width == 0 {
        return bytes.to_vec();
    }
    let mut out = vec![0u8; width];
    let n = bytes.len().min(width);
    out[..n].copy_from_slice(&bytes[..n]);
    out
}

fn decode_string(bytes: &[u8]) -> Option<String> {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    std::str::from_utf8(&bytes[..end]).ok().map(str::to_owned)
}
