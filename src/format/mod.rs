//! Volume file formats.
//!
//! Every loader produces the same canonical [`VolumeBuffer`]: dimensions,
//! voxel width and byte order, physical voxel size, color space and the
//! packed voxel bytes.
//!
//! # Supported formats
//!
//! - **Raw stacks** (`.v3draw`, `.raw`, `.v3dpbd`): literal or PBD8 payloads
//! - **Masks** (`.mask` + `.chan`): ray-run voxel lists with channel samples
//! - **TIFF / LSM stacks**: one uncompressed page per Z slice
//! - **Movies** (`.gif`): one frame per Z slice
//!
//! Use [`detect::load_volume_file`] to load by path, or
//! [`detect::load_volume_bytes`] when the bytes are already in memory.

pub mod cache;
pub mod detect;
pub mod label;
pub mod mask;
pub mod movie;
pub mod normalize;
pub mod raw;
pub mod tiff;
pub mod volume;

pub use cache::{VolumeCache, DEFAULT_VOLUME_CACHE_CAPACITY};
pub use detect::{
    decode, default_color_space, detect_format, is_label_name, is_tiff_header, load_volume_bytes,
    load_volume_file, VolumeFormat,
};
pub use label::{LabelMaskBuilder, LabelVolumeFileBuilder, MaskFileBuilder};
pub use raw::{read_raw_volume, write_raw_volume, Encoding, RawHeader};
pub use volume::{ColorSpace, LabelColorTable, LabelMaskBuffer, VolumeBuffer, VoxelKind};
