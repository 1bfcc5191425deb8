//! Ray-run segmentation masks (`.mask`) and their channel companions (`.chan`).
//!
//! A mask stores the voxels of one segmented object as runs along rays
//! parallel to one axis. All fields are little-endian.
//!
//! ```text
//! .mask header
//!   sx, sy, sz           i64 x3   volume dimensions
//!   x/y/z microns        f32 x3   voxel size
//!   x, y, z bounds       i64 x6   (min, max) per axis
//!   total voxels         i64
//!   ray axis             u8       0 = yz(x), 1 = xz(y), 2 = xy(z)
//! .mask body, repeated until total voxels are consumed
//!   skipped rays         i64
//!   pair count           i64
//!   (start, end)         i64 x2 per pair, end exclusive
//!
//! .chan
//!   total voxels         i64      must match the mask
//!   channel count        u8
//!   red, blue, green     u8 x3    channel indices
//!   byte count           u8       bytes per sample
//!   channel planes       channel count x total voxels x byte count
//! ```
//!
//! Channel samples are listed in the same order the mask body visits voxels.

use std::io::{BufReader, Read};

use tracing::{debug, warn};

use super::volume::{VolumeBuffer, VoxelKind};
use crate::error::FormatError;
use crate::io::{read_u64_le, ByteOrder};

/// Axis the mask rays run along.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RayAxis {
    X = 0,
    Y = 1,
    Z = 2,
}

impl RayAxis {
    fn from_u8(value: u8) -> Result<Self, FormatError> {
        match value {
            0 => Ok(RayAxis::X),
            1 => Ok(RayAxis::Y),
            2 => Ok(RayAxis::Z),
            other => Err(FormatError::MalformedHeader {
                reason: format!("mask ray axis must be 0, 1 or 2, got {}", other),
            }),
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Fixed header of a `.mask` file.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskHeader {
    pub dims: [usize; 3],
    pub voxel_micrometers: [f32; 3],
    pub bounds: [[i64; 2]; 3],
    pub total_voxels: usize,
    pub axis: RayAxis,
}

impl MaskHeader {
    /// Volume-order linear index of position `along` on ray `ray`.
    fn voxel_index(&self, ray: u64, along: usize) -> Option<usize> {
        let [sx, sy, sz] = self.dims;
        // Rays step through the second-fastest axis, then the slowest.
        let (second, slowest) = match self.axis {
            RayAxis::X => (sz, sy),
            RayAxis::Y => (sz, sx),
            RayAxis::Z => (sy, sx),
        };
        let line = (ray % second as u64) as usize;
        let slab = (ray / second as u64) as usize;
        if slab >= slowest {
            return None;
        }

        let (x, y, z) = match self.axis {
            RayAxis::X => (along, slab, line),
            RayAxis::Y => (slab, along, line),
            RayAxis::Z => (slab, line, along),
        };
        if x >= sx || y >= sy || z >= sz {
            return None;
        }
        Some((z * sy + y) * sx + x)
    }
}

/// A decoded mask: its header plus every covered voxel in file order.
#[derive(Debug, Clone)]
pub struct MaskRays {
    pub header: MaskHeader,
    /// Linear voxel indices (X fastest) in the order the rays list them.
    pub voxels: Vec<usize>,
}

/// Channel data from a `.chan` companion.
#[derive(Debug, Clone)]
pub struct MaskChannels {
    pub channel_count: usize,
    pub red: usize,
    pub green: usize,
    pub blue: usize,
    pub byte_count: usize,
    /// One plane per channel, `total_voxels * byte_count` bytes each.
    pub planes: Vec<Vec<u8>>,
}

impl MaskChannels {
    /// High byte of channel `channel` for the `nth` listed voxel.
    fn sample(&self, channel: usize, nth: usize) -> u8 {
        // Samples are little-endian; the last byte is the most significant.
        self.planes[channel][nth * self.byte_count + self.byte_count - 1]
    }
}

struct LeReader<R> {
    inner: R,
}

impl<R: Read> LeReader<R> {
    fn i64(&mut self) -> Result<i64, FormatError> {
        let mut buf = [0u8; 8];
        self.inner.read_exact(&mut buf)?;
        Ok(read_u64_le(&buf) as i64)
    }

    fn f32(&mut self) -> Result<f32, FormatError> {
        let mut buf = [0u8; 4];
        self.inner.read_exact(&mut buf)?;
        Ok(ByteOrder::LittleEndian.read_f32(&buf))
    }

    fn u8(&mut self) -> Result<u8, FormatError> {
        let mut buf = [0u8; 1];
        self.inner.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    fn count(&mut self, what: &str) -> Result<usize, FormatError> {
        let value = self.i64()?;
        usize::try_from(value).map_err(|_| FormatError::MalformedHeader {
            reason: format!("{} must be non-negative, got {}", what, value),
        })
    }
}

/// Decode a `.mask` stream.
pub fn read_mask<R: Read>(reader: R) -> Result<MaskRays, FormatError> {
    let mut r = LeReader {
        inner: BufReader::new(reader),
    };

    let dims = [
        r.count("mask width")?,
        r.count("mask height")?,
        r.count("mask depth")?,
    ];
    if dims.iter().any(|&d| d == 0) {
        return Err(FormatError::MalformedHeader {
            reason: format!("mask dimensions must be non-zero, got {:?}", dims),
        });
    }
    let voxel_micrometers = [r.f32()?, r.f32()?, r.f32()?];
    let mut bounds = [[0i64; 2]; 3];
    for axis in bounds.iter_mut() {
        *axis = [r.i64()?, r.i64()?];
    }
    let total_voxels = r.count("mask voxel total")?;
    let axis = RayAxis::from_u8(r.u8()?)?;

    let header = MaskHeader {
        dims,
        voxel_micrometers,
        bounds,
        total_voxels,
        axis,
    };
    debug!(?dims, total_voxels, ?axis, "reading mask rays");

    let ray_length = dims[axis.index()];
    let mut voxels = Vec::with_capacity(total_voxels);
    let mut ray: u64 = 0;

    while voxels.len() < total_voxels {
        let skipped = r.count("skipped ray count")? as u64;
        let pairs = r.count("ray pair count")?;
        ray += skipped;

        for _ in 0..pairs {
            let start = r.count("ray run start")?;
            let end = r.count("ray run end")?;
            if start > end || end > ray_length {
                return Err(FormatError::MalformedHeader {
                    reason: format!(
                        "ray run {}..{} on ray {} exceeds ray length {}",
                        start, end, ray, ray_length
                    ),
                });
            }
            for along in start..end {
                let index =
                    header
                        .voxel_index(ray, along)
                        .ok_or_else(|| FormatError::MalformedHeader {
                            reason: format!("ray {} lies outside the {:?} volume", ray, dims),
                        })?;
                voxels.push(index);
            }
        }

        ray += 1;
    }

    if voxels.len() != total_voxels {
        warn!(
            declared = total_voxels,
            found = voxels.len(),
            "mask rays overran the declared voxel total"
        );
        voxels.truncate(total_voxels);
    }

    Ok(MaskRays { header, voxels })
}

/// Decode a `.chan` stream for a mask with `total_voxels` voxels.
pub fn read_channels<R: Read>(reader: R, total_voxels: usize) -> Result<MaskChannels, FormatError> {
    let mut r = LeReader {
        inner: BufReader::new(reader),
    };

    let declared = r.count("channel voxel total")?;
    if declared != total_voxels {
        return Err(FormatError::MalformedHeader {
            reason: format!(
                "channel file covers {} voxels but mask has {}",
                declared, total_voxels
            ),
        });
    }

    let channel_count = r.u8()? as usize;
    let red = r.u8()? as usize;
    let blue = r.u8()? as usize;
    let green = r.u8()? as usize;
    let byte_count = r.u8()? as usize;

    if channel_count == 0 || !matches!(byte_count, 1 | 2) {
        return Err(FormatError::MalformedHeader {
            reason: format!(
                "channel file declares {} channel(s) of {} byte(s)",
                channel_count, byte_count
            ),
        });
    }
    for index in [red, green, blue] {
        if index >= channel_count && channel_count > 1 {
            return Err(FormatError::MalformedHeader {
                reason: format!(
                    "channel index {} out of range for {} channels",
                    index, channel_count
                ),
            });
        }
    }

    let mut planes = Vec::with_capacity(channel_count);
    for _ in 0..channel_count {
        let mut plane = vec![0u8; total_voxels * byte_count];
        r.inner.read_exact(&mut plane)?;
        planes.push(plane);
    }

    Ok(MaskChannels {
        channel_count,
        red,
        green,
        blue,
        byte_count,
        planes,
    })
}

/// Fill `label` into every voxel the mask covers.
pub fn paint_label(rays: &MaskRays, target: &mut [u32], label: u32) {
    for &index in &rays.voxels {
        if let Some(slot) = target.get_mut(index) {
            *slot = label;
        }
    }
}

/// Build the displayable signal volume for a mask.
///
/// With channel data the covered voxels carry their channel colors (a single
/// channel becomes intensity); without it they are drawn at full intensity.
pub fn mask_signal_volume(
    rays: &MaskRays,
    channels: Option<&MaskChannels>,
) -> Result<VolumeBuffer, FormatError> {
    let dims = rays.header.dims;
    let voxel_count = dims[0] * dims[1] * dims[2];

    let volume = match channels {
        Some(chan) if chan.channel_count > 1 => {
            let mut packed = vec![0u8; voxel_count * 4];
            for (nth, &index) in rays.voxels.iter().enumerate() {
                let texel = &mut packed[index * 4..index * 4 + 4];
                texel[0] = chan.sample(chan.red, nth);
                texel[1] = chan.sample(chan.green, nth);
                texel[2] = chan.sample(chan.blue, nth);
            }
            VolumeBuffer::new(
                dims,
                4,
                ByteOrder::LittleEndian,
                VoxelKind::PackedRgba,
                packed,
            )?
            .with_source_channels(3)
        }
        Some(chan) => {
            let mut intensity = vec![0u8; voxel_count];
            for (nth, &index) in rays.voxels.iter().enumerate() {
                intensity[index] = chan.sample(0, nth);
            }
            VolumeBuffer::new(
                dims,
                1,
                ByteOrder::LittleEndian,
                VoxelKind::Intensity,
                intensity,
            )?
        }
        None => {
            let mut intensity = vec![0u8; voxel_count];
            for &index in &rays.voxels {
                intensity[index] = u8::MAX;
            }
            VolumeBuffer::new(
                dims,
                1,
                ByteOrder::LittleEndian,
                VoxelKind::Intensity,
                intensity,
            )?
        }
    };

    Ok(volume.with_voxel_size(rays.header.voxel_micrometers))
}
