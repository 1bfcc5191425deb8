//! TIFF header and directory parsing.
//!
//! # Header
//!
//! ```text
//! Classic TIFF (8 bytes)           BigTIFF (16 bytes)
//! 0-1  byte order (II / MM)        0-1   byte order
//! 2-3  version 42                  2-3   version 43
//! 4-7  first IFD offset            4-5   offset size (8)
//!                                  6-7   reserved
//!                                  8-15  first IFD offset
//! ```
//!
//! A stack is a chain of IFDs, one per page. Each IFD holds a count of
//! entries, the entries, and the offset of the next IFD (0 ends the chain).

use std::collections::HashSet;

use super::tags::{FieldType, TiffTag};
use crate::error::TiffError;
use crate::io::ByteOrder;

const BYTE_ORDER_LITTLE_ENDIAN: u16 = 0x4949;
const BYTE_ORDER_BIG_ENDIAN: u16 = 0x4D4D;
const VERSION_TIFF: u16 = 42;
const VERSION_BIGTIFF: u16 = 43;

/// Size of classic TIFF header in bytes
pub const TIFF_HEADER_SIZE: usize = 8;

/// Size of BigTIFF header in bytes
pub const BIGTIFF_HEADER_SIZE: usize = 16;

/// Upper bound on pages followed in one file.
const MAX_PAGES: usize = 65_536;

// =============================================================================
// TiffHeader
// =============================================================================

/// Parsed TIFF file header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TiffHeader {
    pub byte_order: ByteOrder,
    pub is_bigtiff: bool,
    pub first_ifd_offset: u64,
}

impl TiffHeader {
    /// Parse the header at the start of `data`.
    ///
    /// # Errors
    /// - `InvalidMagic` if byte order bytes are not II or MM
    /// - `InvalidVersion` if version is not 42 or 43
    /// - `InvalidBigTiffOffsetSize` if BigTIFF offset size is not 8
    /// - `FileTooSmall` if there aren't enough bytes for the header
    /// - `InvalidIfdOffset` if the first IFD offset is outside the file
    pub fn parse(data: &[u8]) -> Result<Self, TiffError> {
        if data.len() < TIFF_HEADER_SIZE {
            return Err(TiffError::FileTooSmall {
                required: TIFF_HEADER_SIZE as u64,
                actual: data.len() as u64,
            });
        }

        let magic = u16::from_le_bytes([data[0], data[1]]);
        let byte_order = match magic {
            BYTE_ORDER_LITTLE_ENDIAN => ByteOrder::LittleEndian,
            BYTE_ORDER_BIG_ENDIAN => ByteOrder::BigEndian,
            _ => return Err(TiffError::InvalidMagic(magic)),
        };

        let version = byte_order.read_u16(&data[2..4]);
        let (is_bigtiff, first_ifd_offset) = match version {
            VERSION_TIFF => (false, byte_order.read_u32(&data[4..8]) as u64),
            VERSION_BIGTIFF => {
                if data.len() < BIGTIFF_HEADER_SIZE {
                    return Err(TiffError::FileTooSmall {
                        required: BIGTIFF_HEADER_SIZE as u64,
                        actual: data.len() as u64,
                    });
                }
                let offset_size = byte_order.read_u16(&data[4..6]);
                if offset_size != 8 {
                    return Err(TiffError::InvalidBigTiffOffsetSize(offset_size));
                }
                (true, byte_order.read_u64(&data[8..16]))
            }
            _ => return Err(TiffError::InvalidVersion(version)),
        };

        if first_ifd_offset >= data.len() as u64 {
            return Err(TiffError::InvalidIfdOffset(first_ifd_offset));
        }

        Ok(TiffHeader {
            byte_order,
            is_bigtiff,
            first_ifd_offset,
        })
    }

    /// 12 bytes for classic TIFF, 20 for BigTIFF.
    #[inline]
    pub const fn ifd_entry_size(&self) -> usize {
        if self.is_bigtiff {
            20
        } else {
            12
        }
    }

    #[inline]
    const fn ifd_count_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            2
        }
    }

    #[inline]
    const fn offset_size(&self) -> usize {
        if self.is_bigtiff {
            8
        } else {
            4
        }
    }

    fn read_offset(&self, bytes: &[u8]) -> u64 {
        if self.is_bigtiff {
            self.byte_order.read_u64(bytes)
        } else {
            self.byte_order.read_u32(bytes) as u64
        }
    }
}

// =============================================================================
// IFD
// =============================================================================

/// One directory entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IfdEntry {
    pub tag_id: u16,
    pub field_type: Option<FieldType>,
    pub field_type_raw: u16,
    pub count: u64,
    /// Raw value/offset field, zero-padded to 8 bytes.
    pub value_offset_bytes: [u8; 8],
    pub is_inline: bool,
}

impl IfdEntry {
    /// Total size of the entry's values, `None` for unknown field types.
    pub fn value_byte_size(&self) -> Option<u64> {
        self.field_type
            .map(|t| t.size_in_bytes() as u64 * self.count)
    }

    /// Offset of out-of-line values.
    pub fn value_offset(&self, header: &TiffHeader) -> u64 {
        header.read_offset(&self.value_offset_bytes)
    }
}

/// One parsed directory: a page of the stack.
#[derive(Debug, Clone)]
pub struct Ifd {
    pub offset: u64,
    pub entries: Vec<IfdEntry>,
    pub next_ifd_offset: u64,
}

impl Ifd {
    /// Parse the IFD at `offset`.
    pub fn parse(data: &[u8], offset: u64, header: &TiffHeader) -> Result<Self, TiffError> {
        let start = usize::try_from(offset).map_err(|_| TiffError::InvalidIfdOffset(offset))?;
        let count_size = header.ifd_count_size();
        let count_bytes = data
            .get(start..start + count_size)
            .ok_or(TiffError::InvalidIfdOffset(offset))?;
        let entry_count = if header.is_bigtiff {
            header.byte_order.read_u64(count_bytes)
        } else {
            header.byte_order.read_u16(count_bytes) as u64
        } as usize;

        let entry_size = header.ifd_entry_size();
        let entries_start = start + count_size;
        let entries_end = entries_start + entry_count * entry_size;
        let next_end = entries_end + header.offset_size();
        if next_end > data.len() {
            return Err(TiffError::FileTooSmall {
                required: next_end as u64,
                actual: data.len() as u64,
            });
        }

        let mut entries = Vec::with_capacity(entry_count);
        for raw in data[entries_start..entries_end].chunks_exact(entry_size) {
            entries.push(parse_entry(raw, header));
        }

        let next_ifd_offset = header.read_offset(&data[entries_end..next_end]);

        Ok(Ifd {
            offset,
            entries,
            next_ifd_offset,
        })
    }

    pub fn get(&self, tag: TiffTag) -> Option<&IfdEntry> {
        self.entries.iter().find(|e| e.tag_id == tag.as_u16())
    }
}

fn parse_entry(raw: &[u8], header: &TiffHeader) -> IfdEntry {
    let order = header.byte_order;
    let tag_id = order.read_u16(&raw[0..2]);
    let field_type_raw = order.read_u16(&raw[2..4]);
    let field_type = FieldType::from_u16(field_type_raw);

    let (count, value_field) = if header.is_bigtiff {
        (order.read_u64(&raw[4..12]), &raw[12..20])
    } else {
        (order.read_u32(&raw[4..8]) as u64, &raw[8..12])
    };

    let mut value_offset_bytes = [0u8; 8];
    value_offset_bytes[..value_field.len()].copy_from_slice(value_field);

    let is_inline = field_type
        .map(|t| t.fits_inline(count, header.is_bigtiff))
        .unwrap_or(false);

    IfdEntry {
        tag_id,
        field_type,
        field_type_raw,
        count,
        value_offset_bytes,
        is_inline,
    }
}

/// Follow the IFD chain from the header, rejecting loops.
pub fn read_ifd_chain(data: &[u8], header: &TiffHeader) -> Result<Vec<Ifd>, TiffError> {
    let mut ifds = Vec::new();
    let mut seen = HashSet::new();
    let mut offset = header.first_ifd_offset;

    while offset != 0 {
        if !seen.insert(offset) || ifds.len() >= MAX_PAGES {
            return Err(TiffError::InvalidIfdOffset(offset));
        }
        let ifd = Ifd::parse(data, offset, header)?;
        offset = ifd.next_ifd_offset;
        ifds.push(ifd);
    }

    Ok(ifds)
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_tiff_little_endian() {
        let mut data = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        data.resize(32, 0);
        let header = TiffHeader::parse(&data).unwrap();
        assert_eq!(header.byte_order, ByteOrder::LittleEndian);
        assert!(!header.is_bigtiff);
        assert_eq!(header.first_ifd_offset, 8);
    }

    #[test]
    fn test_parse_bigtiff_big_endian() {
        let mut data = vec![
            0x4D, 0x4D, 0x00, 0x2B, 0x00, 0x08, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0x10,
        ];
        data.resize(64, 0);
        let header = TiffHeader::parse(&data).unwrap();
        assert_eq!(header.byte_order, ByteOrder::BigEndian);
        assert!(header.is_bigtiff);
        assert_eq!(header.first_ifd_offset, 16);
    }

    #[test]
    fn test_header_errors() {
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 0x2A]),
            Err(TiffError::FileTooSmall { .. })
        ));
        assert!(matches!(
            TiffHeader::parse(&[0x12, 0x34, 0x2A, 0, 8, 0, 0, 0, 0]),
            Err(TiffError::InvalidMagic(0x3412))
        ));
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 0x2C, 0, 8, 0, 0, 0, 0]),
            Err(TiffError::InvalidVersion(44))
        ));
        assert!(matches!(
            TiffHeader::parse(&[0x49, 0x49, 0x2A, 0, 0xFF, 0, 0, 0, 0]),
            Err(TiffError::InvalidIfdOffset(255))
        ));
    }

    fn entry(tag: u16, ty: u16, count: u32, value: u32) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&tag.to_le_bytes());
        out.extend_from_slice(&ty.to_le_bytes());
        out.extend_from_slice(&count.to_le_bytes());
        out.extend_from_slice(&value.to_le_bytes());
        out
    }

    #[test]
    fn test_parse_ifd_entries() {
        let mut data = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        data.extend_from_slice(&2u16.to_le_bytes());
        data.extend(entry(256, 3, 1, 640));
        data.extend(entry(282, 5, 1, 100));
        data.extend_from_slice(&0u32.to_le_bytes());

        let header = TiffHeader::parse(&data).unwrap();
        let ifds = read_ifd_chain(&data, &header).unwrap();
        assert_eq!(ifds.len(), 1);

        let width = ifds[0].get(TiffTag::ImageWidth).unwrap();
        assert!(width.is_inline);
        assert_eq!(width.field_type, Some(FieldType::Short));

        let res = ifds[0].get(TiffTag::XResolution).unwrap();
        assert!(!res.is_inline);
        assert_eq!(res.value_offset(&header), 100);
    }

    #[test]
    fn test_ifd_loop_rejected() {
        let mut data = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(&8u32.to_le_bytes()); // points back at itself
        let header = TiffHeader::parse(&data).unwrap();
        assert!(matches!(
            read_ifd_chain(&data, &header),
            Err(TiffError::InvalidIfdOffset(8))
        ));
    }

    #[test]
    fn test_truncated_ifd() {
        let mut data = vec![0x49, 0x49, 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00];
        data.extend_from_slice(&5u16.to_le_bytes());
        let header = TiffHeader::parse(&data).unwrap();
        assert!(matches!(
            Ifd::parse(&data, 8, &header),
            Err(TiffError::FileTooSmall { .. })
        ));
    }
}
