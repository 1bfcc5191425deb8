//! Movie-frame volumes.
//!
//! Each frame of an animated GIF becomes one Z slice of an RGBA volume.
//! Frames are composited onto the full canvas by the decoder, so every slice
//! has the same size.
//!
//! GIF stands in for the MP4 and H5J movie stacks other viewers of this data
//! read. Those need an H.264/HEVC decoder, which this crate does not link;
//! [`detect_format`](super::detect_format) rejects them with a message naming
//! GIF as the supported container.

use std::io::Cursor;

use image::codecs::gif::GifDecoder;
use image::AnimationDecoder;
use tracing::debug;

use super::volume::{ColorSpace, VolumeBuffer, VoxelKind};
use crate::error::FormatError;
use crate::io::ByteOrder;

/// Decode animation frames into a packed RGBA volume in sRGB.
pub fn load_movie_frames(data: &[u8]) -> Result<VolumeBuffer, FormatError> {
    let decoder =
        GifDecoder::new(Cursor::new(data)).map_err(|e| FormatError::Decode(e.to_string()))?;
    let frames = decoder
        .into_frames()
        .collect_frames()
        .map_err(|e| FormatError::Decode(e.to_string()))?;

    let first = frames.first().ok_or_else(|| FormatError::MalformedHeader {
        reason: "movie has no frames".to_string(),
    })?;
    let (width, height) = first.buffer().dimensions();

    let mut voxels = Vec::with_capacity(width as usize * height as usize * 4 * frames.len());
    for (index, frame) in frames.iter().enumerate() {
        let buffer = frame.buffer();
        if buffer.dimensions() != (width, height) {
            return Err(FormatError::MalformedHeader {
                reason: format!(
                    "frame {} is {:?}, expected {:?}",
                    index,
                    buffer.dimensions(),
                    (width, height)
                ),
            });
        }
        voxels.extend_from_slice(buffer.as_raw());
    }

    debug!(width, height, frames = frames.len(), "decoded movie frames");

    Ok(VolumeBuffer::new(
        [width as usize, height as usize, frames.len()],
        4,
        ByteOrder::LittleEndian,
        VoxelKind::PackedRgba,
        voxels,
    )?
    .with_color_space(ColorSpace::Srgb))
}
