//! TIFF tag value reading.
//!
//! Values are stored either inline in the IFD entry or at an offset in the
//! file. Stacks are read whole, so the reader works over the file buffer.

use crate::error::TiffError;
use crate::io::ByteOrder;

use super::parser::{IfdEntry, TiffHeader};
use super::tags::{FieldType, TiffTag};

// =============================================================================
// ValueReader
// =============================================================================

/// Reads tag values respecting the file's byte order.
pub struct ValueReader<'a> {
    data: &'a [u8],
    header: &'a TiffHeader,
}

impl<'a> ValueReader<'a> {
    pub fn new(data: &'a [u8], header: &'a TiffHeader) -> Self {
        Self { data, header }
    }

    #[inline]
    pub fn header(&self) -> &'a TiffHeader {
        self.header
    }

    #[inline]
    pub fn byte_order(&self) -> ByteOrder {
        self.header.byte_order
    }

    /// Value bytes of an entry, inline or at its offset.
    pub fn read_bytes(&self, entry: &IfdEntry) -> Result<Vec<u8>, TiffError> {
        let size = entry
            .value_byte_size()
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))? as usize;

        if entry.is_inline {
            return Ok(entry.value_offset_bytes[..size].to_vec());
        }

        let offset = entry.value_offset(self.header) as usize;
        self.slice(offset, size).map(<[u8]>::to_vec)
    }

    /// Borrow `len` bytes at `offset` of the file.
    pub fn slice(&self, offset: usize, len: usize) -> Result<&'a [u8], TiffError> {
        let end = offset.saturating_add(len);
        self.data.get(offset..end).ok_or(TiffError::FileTooSmall {
            required: end as u64,
            actual: self.data.len() as u64,
        })
    }

    /// Integer values widened to u64. Accepts Byte, Short, Long and Long8.
    pub fn read_u64_array(&self, entry: &IfdEntry) -> Result<Vec<u64>, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let bytes = self.read_bytes(entry)?;
        parse_u64_array(&bytes, field_type, self.byte_order()).ok_or_else(|| {
            TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: format!("expected an integer type, got {:?}", field_type),
            }
        })
    }

    /// First integer value of an entry.
    pub fn read_u64(&self, entry: &IfdEntry) -> Result<u64, TiffError> {
        self.read_u64_array(entry)?
            .first()
            .copied()
            .ok_or(TiffError::InvalidTagValue {
                tag: tag_name(entry),
                message: "entry has no values".to_string(),
            })
    }

    pub fn read_u32(&self, entry: &IfdEntry) -> Result<u32, TiffError> {
        let value = self.read_u64(entry)?;
        u32::try_from(value).map_err(|_| TiffError::InvalidTagValue {
            tag: tag_name(entry),
            message: format!("value {} does not fit in 32 bits", value),
        })
    }

    /// First rational (or float) value as f64.
    pub fn read_f64(&self, entry: &IfdEntry) -> Result<f64, TiffError> {
        let field_type = entry
            .field_type
            .ok_or(TiffError::UnknownFieldType(entry.field_type_raw))?;
        let bytes = self.read_bytes(entry)?;
        let order = self.byte_order();
        let value = match field_type {
            FieldType::Rational if bytes.len() >= 8 => {
                let num = order.read_u32(&bytes[0..4]) as f64;
                let den = order.read_u32(&bytes[4..8]) as f64;
                if den == 0.0 {
                    return Err(TiffError::InvalidTagValue {
                        tag: tag_name(entry),
                        message: "zero denominator".to_string(),
                    });
                }
                num / den
            }
            FieldType::Float if bytes.len() >= 4 => order.read_f32(&bytes[0..4]) as f64,
            FieldType::Double if bytes.len() >= 8 => order.read_f64(&bytes[0..8]),
            _ => self.read_u64(entry)? as f64,
        };
        Ok(value)
    }

    /// ASCII value, trimmed at the first NUL.
    pub fn read_string(&self, entry: &IfdEntry) -> Result<String, TiffError> {
        let bytes = self.read_bytes(entry)?;
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
        Ok(String::from_utf8_lossy(&bytes[..end]).into_owned())
    }
}

fn tag_name(entry: &IfdEntry) -> &'static str {
    TiffTag::from_u16(entry.tag_id)
        .map(TiffTag::name)
        .unwrap_or("unknown")
}

/// Decode integer values of `field_type`. `None` for non-integer types.
pub fn parse_u64_array(bytes: &[u8], field_type: FieldType, order: ByteOrder) -> Option<Vec<u64>> {
    let values = match field_type {
        FieldType::Byte | FieldType::Undefined => bytes.iter().map(|&b| b as u64).collect(),
        FieldType::Short => bytes
            .chunks_exact(2)
            .map(|c| order.read_u16(c) as u64)
            .collect(),
        FieldType::Long => bytes
            .chunks_exact(4)
            .map(|c| order.read_u32(c) as u64)
            .collect(),
        FieldType::Long8 => bytes.chunks_exact(8).map(|c| order.read_u64(c)).collect(),
        _ => return None,
    };
    Some(values)
}
