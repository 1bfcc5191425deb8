//! Channel normalization.
//!
//! Source files store channels as separate planes of 8-bit, 16-bit or
//! 32-bit float samples. This folds them into the two voxel layouts the
//! renderer understands: single-channel intensity, or packed RGBA bytes.

use tracing::{debug, warn};

use super::volume::{VolumeBuffer, VoxelKind};
use crate::error::FormatError;
use crate::io::ByteOrder;

/// Sample encoding within one channel plane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SampleType {
    U8,
    U16,
    F32,
}

impl SampleType {
    /// Map a per-sample byte count to a sample type.
    pub fn from_byte_count(bytes: usize) -> Result<Self, FormatError> {
        match bytes {
            1 => Ok(SampleType::U8),
            2 => Ok(SampleType::U16),
            4 => Ok(SampleType::F32),
            other => Err(FormatError::MalformedHeader {
                reason: format!("unsupported sample size of {} bytes", other),
            }),
        }
    }

    pub fn byte_count(self) -> usize {
        match self {
            SampleType::U8 => 1,
            SampleType::U16 => 2,
            SampleType::F32 => 4,
        }
    }
}

/// Channel-major planes as read from a file.
#[derive(Debug, Clone)]
pub struct ChannelPlanes {
    pub dims: [usize; 3],
    pub channels: usize,
    pub sample: SampleType,
    pub byte_order: ByteOrder,
    /// `channels` consecutive planes of `dims` voxels each.
    pub data: Vec<u8>,
}

impl ChannelPlanes {
    fn plane_len(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2] * self.sample.byte_count()
    }

    fn plane(&self, channel: usize) -> &[u8] {
        let len = self.plane_len();
        &self.data[channel * len..(channel + 1) * len]
    }
}

/// Fold channel planes into a [`VolumeBuffer`].
///
/// - one channel stays an intensity volume (float is rescaled to 16 bits)
/// - two or more channels pack into RGBA bytes, 16-bit samples keep their
///   high byte, missing channels are zero and channels past the fourth are
///   dropped
pub fn normalize_channels(planes: ChannelPlanes) -> Result<VolumeBuffer, FormatError> {
    if planes.channels == 0 {
        return Err(FormatError::MalformedHeader {
            reason: "volume declares zero channels".to_string(),
        });
    }

    let expected = planes.plane_len() * planes.channels;
    if planes.data.len() != expected {
        return Err(FormatError::SizeMismatch {
            expected,
            actual: planes.data.len(),
        });
    }

    if planes.channels == 1 {
        return single_channel(planes);
    }

    if planes.channels > 4 {
        warn!(
            channels = planes.channels,
            "volume has more than four channels, keeping the first four"
        );
    }

    let voxels = planes.dims[0] * planes.dims[1] * planes.dims[2];
    let used = planes.channels.min(4);
    let mut packed = vec![0u8; voxels * 4];

    for channel in 0..used {
        let bytes = to_u8_plane(&planes, channel);
        for (voxel, value) in bytes.into_iter().enumerate() {
            packed[voxel * 4 + channel] = value;
        }
    }

    debug!(channels = used, sample = ?planes.sample, "packed channels into RGBA");

    Ok(VolumeBuffer::new(
        planes.dims,
        4,
        ByteOrder::LittleEndian,
        VoxelKind::PackedRgba,
        packed,
    )?
    .with_source_channels(used))
}

fn single_channel(planes: ChannelPlanes) -> Result<VolumeBuffer, FormatError> {
    match planes.sample {
        SampleType::U8 | SampleType::U16 => VolumeBuffer::new(
            planes.dims,
            planes.sample.byte_count(),
            planes.byte_order,
            VoxelKind::Intensity,
            planes.data,
        ),
        SampleType::F32 => {
            let rescaled: Vec<u8> = rescale_floats(planes.plane(0), planes.byte_order)
                .into_iter()
                .flat_map(u16::to_le_bytes)
                .collect();
            VolumeBuffer::new(
                planes.dims,
                2,
                ByteOrder::LittleEndian,
                VoxelKind::Intensity,
                rescaled,
            )
        }
    }
}

/// Reduce one channel plane to 8 bits per voxel.
fn to_u8_plane(planes: &ChannelPlanes, channel: usize) -> Vec<u8> {
    let plane = planes.plane(channel);
    match planes.sample {
        SampleType::U8 => plane.to_vec(),
        SampleType::U16 => plane
            .chunks_exact(2)
            .map(|s| (planes.byte_order.read_u16(s) >> 8) as u8)
            .collect(),
        SampleType::F32 => rescale_floats(plane, planes.byte_order)
            .into_iter()
            .map(|v| (v >> 8) as u8)
            .collect(),
    }
}

/// Map float samples onto `0..=u16::MAX` using the finite data range.
fn rescale_floats(plane: &[u8], order: ByteOrder) -> Vec<u16> {
    let values: Vec<f32> = plane.chunks_exact(4).map(|s| order.read_f32(s)).collect();

    let (min, max) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((f32::INFINITY, f32::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });

    let span = max - min;
    values
        .into_iter()
        .map(|v| {
            if !v.is_finite() || !(span > 0.0) {
                0
            } else {
                (((v - min) / span) * u16::MAX as f32).round() as u16
            }
        })
        .collect()
}
