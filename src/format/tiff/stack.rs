//! TIFF and LSM z-stacks.
//!
//! Each full-resolution page is one Z slice. Reduced-resolution pages
//! (`NewSubfileType & 1`, the thumbnails LSM files interleave with the
//! slices) are skipped. Pixel data must be uncompressed strips.

use tracing::debug;

use super::parser::{read_ifd_chain, Ifd, TiffHeader};
use super::tags::{Compression, TiffTag};
use super::values::ValueReader;
use crate::error::{FormatError, TiffError};
use crate::format::normalize::{normalize_channels, ChannelPlanes, SampleType};
use crate::format::volume::VolumeBuffer;

const MICROMETERS_PER_INCH: f64 = 25_400.0;
const MICROMETERS_PER_CENTIMETER: f64 = 10_000.0;

/// Byte offsets of the voxel sizes (f64 meters) inside `CZ_LSMINFO`.
const LSM_VOXEL_SIZE_OFFSETS: [usize; 3] = [40, 48, 56];

// =============================================================================
// Page layout
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct PageLayout {
    width: usize,
    height: usize,
    samples: usize,
    sample: SampleType,
    planar: bool,
}

impl PageLayout {
    fn read(ifd: &Ifd, reader: &ValueReader<'_>) -> Result<Self, TiffError> {
        let width = required_u32(ifd, reader, TiffTag::ImageWidth)? as usize;
        let height = required_u32(ifd, reader, TiffTag::ImageLength)? as usize;
        let samples = optional_u32(ifd, reader, TiffTag::SamplesPerPixel)?.unwrap_or(1) as usize;

        let bits = match ifd.get(TiffTag::BitsPerSample) {
            Some(entry) => reader.read_u64_array(entry)?,
            None => vec![1],
        };
        let first_bits = bits.first().copied().unwrap_or(1);
        if bits.iter().any(|&b| b != first_bits) {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::BitsPerSample.name(),
                message: format!("mixed sample depths {:?}", bits),
            });
        }

        let format = optional_u32(ifd, reader, TiffTag::SampleFormat)?.unwrap_or(1);
        let sample = match (first_bits, format) {
            (8, 1) => SampleType::U8,
            (16, 1) => SampleType::U16,
            (32, 3) => SampleType::F32,
            _ => {
                return Err(TiffError::InvalidTagValue {
                    tag: TiffTag::BitsPerSample.name(),
                    message: format!(
                        "unsupported sample layout: {} bits, sample format {}",
                        first_bits, format
                    ),
                })
            }
        };

        let compression = optional_u32(ifd, reader, TiffTag::Compression)?.unwrap_or(1);
        match Compression::from_u16(compression as u16) {
            Some(c) if c.is_supported() => {}
            Some(c) => return Err(TiffError::UnsupportedCompression(c.name().to_string())),
            None => return Err(TiffError::UnsupportedCompression(compression.to_string())),
        }

        let planar = optional_u32(ifd, reader, TiffTag::PlanarConfiguration)?.unwrap_or(1) == 2;

        if width == 0 || height == 0 || samples == 0 {
            return Err(TiffError::InvalidTagValue {
                tag: TiffTag::ImageWidth.name(),
                message: format!("empty page {}x{}x{}", width, height, samples),
            });
        }

        Ok(PageLayout {
            width,
            height,
            samples,
            sample,
            planar,
        })
    }

    fn page_bytes(&self) -> usize {
        self.width * self.height * self.samples * self.sample.byte_count()
    }

    fn describe(&self) -> String {
        format!(
            "{}x{} with {} {:?} sample(s){}",
            self.width,
            self.height,
            self.samples,
            self.sample,
            if self.planar { ", planar" } else { "" }
        )
    }
}

fn required_u32(ifd: &Ifd, reader: &ValueReader<'_>, tag: TiffTag) -> Result<u32, TiffError> {
    let entry = ifd.get(tag).ok_or(TiffError::MissingTag(tag.name()))?;
    reader.read_u32(entry)
}

fn optional_u32(
    ifd: &Ifd,
    reader: &ValueReader<'_>,
    tag: TiffTag,
) -> Result<Option<u32>, TiffError> {
    ifd.get(tag).map(|entry| reader.read_u32(entry)).transpose()
}

// =============================================================================
// Loading
// =============================================================================

/// Decode a TIFF (or LSM) z-stack held in memory.
pub fn load_tiff_stack(data: &[u8]) -> Result<VolumeBuffer, FormatError> {
    let header = TiffHeader::parse(data)?;
    let ifds = read_ifd_chain(data, &header)?;
    let reader = ValueReader::new(data, &header);

    let mut pages = Vec::with_capacity(ifds.len());
    for ifd in &ifds {
        let subfile = optional_u32(ifd, &reader, TiffTag::NewSubfileType)?.unwrap_or(0);
        if subfile & 1 == 0 {
            pages.push(ifd);
        }
    }

    let first = pages.first().ok_or_else(|| FormatError::MalformedHeader {
        reason: "TIFF file has no full-resolution pages".to_string(),
    })?;
    let layout = PageLayout::read(first, &reader)?;

    let depth = pages.len();
    let plane_bytes = layout.width * layout.height * layout.sample.byte_count();
    let mut planes = vec![0u8; plane_bytes * depth * layout.samples];

    for (z, ifd) in pages.iter().enumerate() {
        let page_layout = PageLayout::read(ifd, &reader)?;
        if page_layout != layout {
            return Err(TiffError::InconsistentStack {
                page: z,
                expected: layout.describe(),
                found: page_layout.describe(),
            }
            .into());
        }

        let pixels = read_strips(ifd, &reader, layout.page_bytes())?;
        scatter_page(&layout, &pixels, z, depth, &mut planes);
    }

    let voxel_size = voxel_size(first, &reader, data);
    debug!(
        width = layout.width,
        height = layout.height,
        depth,
        samples = layout.samples,
        ?voxel_size,
        "decoded TIFF stack"
    );

    let volume = normalize_channels(ChannelPlanes {
        dims: [layout.width, layout.height, depth],
        channels: layout.samples,
        sample: layout.sample,
        byte_order: header.byte_order,
        data: planes,
    })?;

    Ok(volume.with_voxel_size(voxel_size))
}

/// Concatenate a page's strips, truncated to the page size.
fn read_strips(
    ifd: &Ifd,
    reader: &ValueReader<'_>,
    page_bytes: usize,
) -> Result<Vec<u8>, TiffError> {
    let offsets_entry = ifd
        .get(TiffTag::StripOffsets)
        .ok_or(TiffError::MissingTag(TiffTag::StripOffsets.name()))?;
    let counts_entry = ifd
        .get(TiffTag::StripByteCounts)
        .ok_or(TiffError::MissingTag(TiffTag::StripByteCounts.name()))?;

    let offsets = reader.read_u64_array(offsets_entry)?;
    let counts = reader.read_u64_array(counts_entry)?;
    if offsets.len() != counts.len() {
        return Err(TiffError::InvalidTagValue {
            tag: TiffTag::StripByteCounts.name(),
            message: format!("{} offsets but {} byte counts", offsets.len(), counts.len()),
        });
    }

    let mut pixels = Vec::with_capacity(page_bytes);
    for (&offset, &count) in offsets.iter().zip(&counts) {
        let remaining = page_bytes - pixels.len();
        if remaining == 0 {
            break;
        }
        let take = (count as usize).min(remaining);
        pixels.extend_from_slice(reader.slice(offset as usize, take)?);
    }

    if pixels.len() < page_bytes {
        return Err(TiffError::FileTooSmall {
            required: page_bytes as u64,
            actual: pixels.len() as u64,
        });
    }
    Ok(pixels)
}

/// Copy one page into the channel-major plane buffer at slice `z`.
fn scatter_page(layout: &PageLayout, pixels: &[u8], z: usize, depth: usize, planes: &mut [u8]) {
    let sample_bytes = layout.sample.byte_count();
    let slice_bytes = layout.width * layout.height * sample_bytes;
    let channel_bytes = slice_bytes * depth;

    for channel in 0..layout.samples {
        let dst_start = channel * channel_bytes + z * slice_bytes;
        let dst = &mut planes[dst_start..dst_start + slice_bytes];

        if layout.planar {
            dst.copy_from_slice(&pixels[channel * slice_bytes..(channel + 1) * slice_bytes]);
        } else {
            let stride = layout.samples * sample_bytes;
            for (pixel, out) in dst.chunks_exact_mut(sample_bytes).enumerate() {
                let src = pixel * stride + channel * sample_bytes;
                out.copy_from_slice(&pixels[src..src + sample_bytes]);
            }
        }
    }
}

// =============================================================================
// Voxel size
// =============================================================================

/// Voxel size in micrometers. Unknown axes stay at 1 µm.
///
/// Precedence: `CZ_LSMINFO`, then resolution tags for X/Y and the ImageJ
/// `spacing=` key for Z.
fn voxel_size(ifd: &Ifd, reader: &ValueReader<'_>, data: &[u8]) -> [f32; 3] {
    if let Some(size) = lsm_voxel_size(ifd, reader, data) {
        return size;
    }

    let description = ifd
        .get(TiffTag::ImageDescription)
        .and_then(|e| reader.read_string(e).ok())
        .unwrap_or_default();

    let unit = ifd
        .get(TiffTag::ResolutionUnit)
        .and_then(|e| reader.read_u32(e).ok())
        .unwrap_or(2);
    let per_unit = match unit {
        2 => Some(MICROMETERS_PER_INCH),
        3 => Some(MICROMETERS_PER_CENTIMETER),
        // ImageJ stores pixels per micron with no unit and says so in the description
        1 if imagej_value(&description, "unit").is_some_and(is_micron) => Some(1.0),
        _ => None,
    };

    let axis = |tag: TiffTag| -> f32 {
        let resolution = ifd.get(tag).and_then(|e| reader.read_f64(e).ok());
        match (per_unit, resolution) {
            (Some(per_unit), Some(res)) if res > 0.0 => (per_unit / res) as f32,
            _ => 1.0,
        }
    };

    let z = imagej_value(&description, "spacing")
        .and_then(|v| v.parse::<f32>().ok())
        .unwrap_or(1.0);

    [axis(TiffTag::XResolution), axis(TiffTag::YResolution), z]
}

fn lsm_voxel_size(ifd: &Ifd, reader: &ValueReader<'_>, data: &[u8]) -> Option<[f32; 3]> {
    let entry = ifd.get(TiffTag::CzLsmInfo)?;
    let base = entry.value_offset(reader.header()) as usize;
    let end = base + LSM_VOXEL_SIZE_OFFSETS[2] + 8;
    let block = data.get(base..end)?;

    let mut size = [1.0f32; 3];
    for (slot, offset) in size.iter_mut().zip(LSM_VOXEL_SIZE_OFFSETS) {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&block[offset..offset + 8]);
        let meters = f64::from_le_bytes(raw);
        if meters.is_finite() && meters > 0.0 {
            *slot = (meters * 1e6) as f32;
        }
    }
    Some(size)
}

/// Value of a `key=value` line in an ImageJ description.
fn imagej_value<'a>(description: &'a str, key: &str) -> Option<&'a str> {
    description.lines().find_map(|line| {
        let (k, v) = line.split_once('=')?;
        (k.trim() == key).then(|| v.trim())
    })
}

fn is_micron(unit: &str) -> bool {
    matches!(unit, "micron" | "um" | "µm" | "\\u00B5m")
}

// =============================================================================
// Tests
// =============================================================================
