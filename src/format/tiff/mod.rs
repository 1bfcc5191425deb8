//! TIFF z-stack reader.
//!
//! Microscope stacks written by ImageJ, Fiji and Zeiss (LSM) are ordinary
//! TIFF files with one page per Z slice.
//!
//! # Key Concepts
//!
//! - **Byte order**: TIFF files declare their endianness (II = little-endian,
//!   MM = big-endian) in the header. Every multi-byte value respects it.
//!
//! - **Classic TIFF vs BigTIFF**: 32-bit versus 64-bit offsets. Both are read.
//!
//! - **IFD chain**: each page's directory links to the next. Pages flagged as
//!   reduced-resolution are thumbnails and are not part of the stack.
//!
//! - **Inline vs offset values**: small values live in the IFD entry, larger
//!   ones at an offset pointed to by the entry.

mod parser;
mod stack;
mod tags;
mod values;

pub use parser::{
    read_ifd_chain, Ifd, IfdEntry, TiffHeader, BIGTIFF_HEADER_SIZE, TIFF_HEADER_SIZE,
};
pub use stack::load_tiff_stack;
pub use tags::{Compression, FieldType, TiffTag};
pub use values::{parse_u64_array, ValueReader};

#[cfg(test)]
pub(crate) use stack::tests::{build_tiff, TestPage};
