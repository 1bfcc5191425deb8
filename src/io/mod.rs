//! Byte-level access to stored volumes.
//!
//! - [`RangeReader`] abstracts random access to a remote object
//! - [`S3RangeReader`] implements it over S3 range requests
//! - [`ByteOrder`] and the endian helpers decode fixed-width header fields

mod range_reader;
mod s3_reader;

pub use range_reader::{
    read_u16_be, read_u16_le, read_u32_be, read_u32_le, read_u64_be, read_u64_le, ByteOrder,
    RangeReader,
};
pub use s3_reader::{create_s3_client, S3RangeReader};
