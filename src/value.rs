use std::cmp::Ordering;
use std::fmt;

use crate::error::{Error, Result};

/// Declared type of a record field
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Int32,
    Uint32,
    Int64,
    Uint64,
    Float64,
    Str,
}

impl FieldType {
    pub fn is_numeric(self) -> bool {
        self != FieldType::Str
    }

    /// Zero value of this type
    pub fn default_value(self) -> FieldValue {
        match self {
            FieldType::Int32 => FieldValue::Int32(0),
            FieldType::Uint32 => FieldValue::Uint32(0),
            FieldType::Int64 => FieldValue::Int64(0),
            FieldType::Uint64 => FieldValue::Uint64(0),
            FieldType::Float64 => FieldValue::Float64(0.0),
            FieldType::Str => FieldValue::Str(String::new()),
        }
    }
}

impl fmt::Display for FieldType {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let name = match self {
            FieldType::Int32 => "int32",
            FieldType::Uint32 => "uint32",
            FieldType::Int64 => "int64",
            FieldType::Uint64 => "uint64",
            FieldType::Float64 => "float64",
            FieldType::Str => "string",
        };
        f.write_str(name)
    }
}

/// A typed field value
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Int32(i32),
    Uint32(u32),
    Int64(i64),
    Uint64(u64),
    Float64(f64),
    Str(String),
}

impl From<i32> for FieldValue {
    fn from(v: i32) -> Self {
        FieldValue::Int32(v)
    }
}

impl From<u32> for FieldValue {
    fn from(v: u32) -> Self {
        FieldValue::Uint32(v)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        FieldValue::Int64(v)
    }
}

impl From<u64> for FieldValue {
    fn from(v: u64) -> Self {
        FieldValue::Uint64(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        FieldValue::Float64(v)
    }
}

impl From<&str> for FieldValue {
    fn from(v: &str) -> Self {
        FieldValue::Str(v.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(v: String) -> Self {
        FieldValue::Str(v)
    }
}

impl fmt::Display for FieldValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            FieldValue::Int32(v) => write!(f, "{}", v),
            FieldValue::Uint32(v) => write!(f, "{}", v),
            FieldValue::Int64(v) => write!(f, "{}", v),
            FieldValue::Uint64(v) => write!(f, "{}", v),
            FieldValue::Float64(v) => write!(f, "{}", v),
            FieldValue::Str(v) => f.write_str(v),
        }
    }
}

fn out_of_range(value: &FieldValue, ty: FieldType) -> Error {
    Error::invalid(format!("{} does not fit a {} field", value, ty))
}

impl FieldValue {
    pub fn field_type(&self) -> FieldType {
        match self {
            FieldValue::Int32(_) => FieldType::Int32,
            FieldValue::Uint32(_) => FieldType::Uint32,
            FieldValue::Int64(_) => FieldType::Int64,
            FieldValue::Uint64(_) => FieldType::Uint64,
            FieldValue::Float64(_) => FieldType::Float64,
            FieldValue::Str(_) => FieldType::Str,
        }
    }

    /// Parse `text` as a value of type `ty`.
    pub fn parse(ty: FieldType, text: &str) -> Result<FieldValue> {
        let bad = || Error::invalid(format!("{:?} is not a valid {}", text, ty));
        let trimmed = text.trim();
        Ok(match ty {
            FieldType::Int32 => FieldValue::Int32(trimmed.parse().map_err(|_| bad())?),
            FieldType::Uint32 => FieldValue::Uint32(trimmed.parse().map_err(|_| bad())?),
            FieldType::Int64 => FieldValue::Int64(trimmed.parse().map_err(|_| bad())?),
            FieldType::Uint64 => FieldValue::Uint64(trimmed.parse().map_err(|_| bad())?),
            FieldType::Float64 => FieldValue::Float64(trimmed.parse().map_err(|_| bad())?),
            FieldType::Str => FieldValue::Str(text.to_string()),
        })
    }

    /// Widen to i128 for lossless integer conversion checks
    fn as_i128(&self) -> Option<i128> {
        match *self {
            FieldValue::Int32(v) => Some(v as i128),
            FieldValue::Uint32(v) => Some(v as i128),
            FieldValue::Int64(v) => Some(v as i128),
            FieldValue::Uint64(v) => Some(v as i128),
            _ => None,
        }
    }

    /// Convert to `ty`, failing on anything lossy.
    pub fn convert(&self, ty: FieldType) -> Result<FieldValue> {
        if self.field_type() == ty {
            return Ok(self.clone());
        }
        if let FieldValue::Str(s) = self {
            return FieldValue::parse(ty, s);
        }
        if ty == FieldType::Str {
            return Ok(FieldValue::Str(self.to_string()));
        }
        if ty == FieldType::Float64 {
            return match self.as_i128() {
                Some(v) => Ok(FieldValue::Float64(v as f64)),
                None => Err(out_of_range(self, ty)),
            };
        }
        let wide = match self {
            FieldValue::Float64(v) if v.fract() == 0.0 && v.is_finite() => *v as i128,
            _ => self.as_i128().ok_or_else(|| out_of_range(self, ty))?,
        };
        let converted = match ty {
            FieldType::Int32 => i32::try_from(wide).ok().map(FieldValue::Int32),
            FieldType::Uint32 => u32::try_from(wide).ok().map(FieldValue::Uint32),
            FieldType::Int64 => i64::try_from(wide).ok().map(FieldValue::Int64),
            FieldType::Uint64 => u64::try_from(wide).ok().map(FieldValue::Uint64),
            FieldType::Float64 | FieldType::Str => None,
        };
        converted.ok_or_else(|| out_of_range(self, ty))
    }

    /// Native ordering: numerically for numbers, bytewise for strings.
    /// Values of different types are compared after converting `other` to
    /// this value's type.
    pub fn compare(&self, other: &FieldValue) -> Result<Ordering> {
        let converted;
        let other = if other.field_type() == self.field_type() {
            other
        } else {
            converted = other.convert(self.field_type())?;
            &converted
        };
        Ok(match (self, other) {
            (FieldValue::Int32(a), FieldValue::Int32(b)) => a.cmp(b),
            (FieldValue::Uint32(a), FieldValue::Uint32(b)) => a.cmp(b),
            (FieldValue::Int64(a), FieldValue::Int64(b)) => a.cmp(b),
            (FieldValue::Uint64(a), FieldValue::Uint64(b)) => a.cmp(b),
            (FieldValue::Float64(a), FieldValue::Float64(b)) => a.total_cmp(b),
            (FieldValue::Str(a), FieldValue::Str(b)) => a.as_bytes().cmp(b.as_bytes()),
            (a, b) => {
                return Err(Error::invalid(format!(
                    "cannot compare {} with {}",
                    a.field_type(),
                    b.field_type()
                )))
            }
        })
    }

    /// Append the order-preserving key encoding: bytewise order of the
    /// output equals `compare` order, and a composite key's prefix encodes
    /// its leading fields.
    pub(crate) fn encode_key(&self, out: &mut Vec<u8>) -> Result<()> {
        match self {
            FieldValue::Int32(v) => out.extend_from_slice(&((*v as u32) ^ 0x8000_0000).to_be_bytes()),
            FieldValue::Uint32(v) => out.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Int64(v) => out.extend_from_slice(&((*v as u64) ^ (1 << 63)).to_be_bytes()),
            FieldValue::Uint64(v) => out.extend_from_slice(&v.to_be_bytes()),
            FieldValue::Float64(v) => {
                let bits = v.to_bits();
                let ordered = if bits >> 63 == 1 { !bits } else { bits ^ (1 << 63) };
                out.extend_from_slice(&ordered.to_be_bytes());
            }
            FieldValue::Str(s) => {
                if s.as_bytes().contains(&0) {
                    return Err(Error::invalid("key strings may not contain NUL"));
                }
                out.extend_from_slice(s.as_bytes());
                out.push(0);
            }
        }
        Ok(())
    }

    /// Decode one key field of type `ty` from the front of `buf`.
    pub(crate) fn decode_key(ty: FieldType, buf: &[u8], off: &mut usize) -> Result<FieldValue> {
        let rest = buf.get(*off..).unwrap_or_default();
        let short = || Error::Corrupted(format!("key too short for {} field", ty));
        let value = match ty {
            FieldType::Int32 | FieldType::Uint32 => {
                let raw = u32::from_be_bytes(rest.get(..4).and_then(|b| <[u8; 4]>::try_from(b).ok()).ok_or_else(short)?);
                *off += 4;
                if ty == FieldType::Int32 {
                    FieldValue::Int32((raw ^ 0x8000_0000) as i32)
                } else {
                    FieldValue::Uint32(raw)
                }
            }
            FieldType::Int64 | FieldType::Uint64 | FieldType::Float64 => {
                let raw = u64::from_be_bytes(rest.get(..8).and_then(|b| <[u8; 8]>::try_from(b).ok()).ok_or_else(short)?);
                *off += 8;
                match ty {
                    FieldType::Int64 => FieldValue::Int64((raw ^ (1 << 63)) as i64),
                    FieldType::Uint64 => FieldValue::Uint64(raw),
                    _ => {
                        let bits = if raw >> 63 == 1 { raw ^ (1 << 63) } else { !raw };
                        FieldValue::Float64(f64::from_bits(bits))
                    }
                }
            }
            FieldType::Str => {
                let end = rest.iter().position(|&b| b == 0).ok_or_else(short)?;
                let s = std::str::from_utf8(&rest[..end])
                    .map_err(|_| Error::Corrupted("key string is not UTF-8".into()))?;
                *off += end + 1;
                FieldValue::Str(s.to_string())
            }
        };
        Ok(value)
    }

    /// Append the little-endian data encoding
    pub(crate) fn encode_data(&self, out: &mut Vec<u8>) {
        match self {
            FieldValue::Int32(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::Uint32(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::Int64(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::Uint64(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::Float64(v) => out.extend_from_slice(&v.to_le_bytes()),
            FieldValue::Str(s) => {
                out.extend_from_slice(&(s.len() as u32).to_le_bytes());
                out.extend_from_slice(s.as_bytes());
            }
        }
    }

    pub(crate) fn decode_data(ty: FieldType, buf: &[u8], off: &mut usize) -> Result<FieldValue> {
        let value = match ty {
            FieldType::Int32 => FieldValue::Int32(i32::from_le_bytes(take_array(buf, off, ty)?)),
            FieldType::Uint32 => FieldValue::Uint32(u32::from_le_bytes(take_array(buf, off, ty)?)),
            FieldType::Int64 => FieldValue::Int64(i64::from_le_bytes(take_array(buf, off, ty)?)),
            FieldType::Uint64 => FieldValue::Uint64(u64::from_le_bytes(take_array(buf, off, ty)?)),
            FieldType::Float64 => FieldValue::Float64(f64::from_le_bytes(take_array(buf, off, ty)?)),
            FieldType::Str => {
                let len = u32::from_le_bytes(take_array(buf, off, ty)?) as usize;
                let s = std::str::from_utf8(take(buf, off, len, ty)?)
                    .map_err(|_| Error::Corrupted("data string is not UTF-8".into()))?;
                FieldValue::Str(s.to_string())
            }
        };
        Ok(value)
    }
}

fn take<'a>(buf: &'a [u8], off: &mut usize, n: usize, ty: FieldType) -> Result<&'a [u8]> {
    let bytes = buf
        .get(*off..*off + n)
        .ok_or_else(|| Error::Corrupted(format!("data too short for {} field", ty)))?;
    *off += n;
    Ok(bytes)
}

fn take_array<const N: usize>(buf: &[u8], off: &mut usize, ty: FieldType) -> Result<[u8; N]> {
    let mut arr = [0u8; N];
    arr.copy_from_slice(take(buf, off, N, ty)?);
    Ok(arr)
}
