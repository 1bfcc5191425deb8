//! Format detection and dispatch.
//!
//! Volumes are identified by file extension; the raw container additionally
//! checks its magic cookie, and files whose name starts with
//! `ConsolidatedLabel` are read as label stacks.
//!
//! Unsupported extensions and extension/content mismatches are hard
//! `UnsupportedFormat` errors.

use std::io::Cursor;
use std::path::Path;

use tracing::{debug, info};

use super::mask::{mask_signal_volume, read_channels, read_mask, MaskChannels};
use super::movie::load_movie_frames;
use super::raw::{read_raw_volume, Encoding, RawHeader, RAW_HEADER_SIZE};
use super::tiff::load_tiff_stack;
use super::volume::{ColorSpace, VolumeBuffer, VoxelKind};
use crate::error::FormatError;

/// Filename prefix of precomputed label stacks.
pub const LABEL_NAME_PREFIX: &str = "ConsolidatedLabel";

// =============================================================================
// VolumeFormat
// =============================================================================

/// Detected volume format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VolumeFormat {
    /// Literal raw stack (`.v3draw`, `.raw`)
    RawStack,

    /// PBD8 compressed raw stack (`.v3dpbd`)
    PbdStack,

    /// Ray-run mask with optional `.chan` companion
    Mask,

    /// TIFF z-stack
    Tiff,

    /// Zeiss LSM z-stack
    Lsm,

    /// Animated GIF, one frame per slice
    Movie,
}

impl VolumeFormat {
    pub const fn name(&self) -> &'static str {
        match self {
            VolumeFormat::RawStack => "raw stack",
            VolumeFormat::PbdStack => "PBD8 stack",
            VolumeFormat::Mask => "mask",
            VolumeFormat::Tiff => "TIFF stack",
            VolumeFormat::Lsm => "LSM stack",
            VolumeFormat::Movie => "movie frames",
        }
    }

    /// Raw container encoding this format expects, if it is one.
    fn raw_encoding(&self) -> Option<Encoding> {
        match self {
            VolumeFormat::RawStack => Some(Encoding::Literal),
            VolumeFormat::PbdStack => Some(Encoding::Pbd8),
            _ => None,
        }
    }
}

/// Identify the format of `name` from its extension.
pub fn detect_format(name: &str) -> Result<VolumeFormat, FormatError> {
    let extension = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match extension.as_str() {
        "v3draw" | "raw" => Ok(VolumeFormat::RawStack),
        "v3dpbd" => Ok(VolumeFormat::PbdStack),
        "mask" => Ok(VolumeFormat::Mask),
        "tif" | "tiff" => Ok(VolumeFormat::Tiff),
        "lsm" => Ok(VolumeFormat::Lsm),
        "gif" => Ok(VolumeFormat::Movie),
        "mp4" | "h5j" => Err(FormatError::UnsupportedFormat {
            reason: format!(
                "{}: .{} movies need a video decoder; convert the frames to GIF",
                name, extension
            ),
        }),
        "" => Err(FormatError::UnsupportedFormat {
            reason: format!("{} has no file extension", name),
        }),
        other => Err(FormatError::UnsupportedFormat {
            reason: format!("unsupported volume extension .{}", other),
        }),
    }
}

/// Whether `name` refers to a precomputed label stack.
pub fn is_label_name(name: &str) -> bool {
    Path::new(name)
        .file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with(LABEL_NAME_PREFIX))
}

/// Color space assigned to a freshly decoded volume.
pub fn default_color_space(format: VolumeFormat, volume: &VolumeBuffer) -> ColorSpace {
    if format == VolumeFormat::Movie {
        ColorSpace::Srgb
    } else if volume.kind() == VoxelKind::PackedRgba {
        ColorSpace::Rgb
    } else {
        ColorSpace::Linear
    }
}

/// Check the TIFF byte-order mark and version.
pub fn is_tiff_header(bytes: &[u8]) -> bool {
    if bytes.len() < 4 {
        return false;
    }
    let version = match &bytes[0..2] {
        b"II" => u16::from_le_bytes([bytes[2], bytes[3]]),
        b"MM" => u16::from_be_bytes([bytes[2], bytes[3]]),
        _ => return false,
    };
    version == 42 || version == 43
}

// =============================================================================
// Loading
// =============================================================================

/// Decode a volume held in memory.
///
/// A mask loaded this way has no channel data; use [`load_volume_file`] to
/// pick up the `.chan` companion.
pub fn load_volume_bytes(name: &str, data: &[u8]) -> Result<VolumeBuffer, FormatError> {
    let format = detect_format(name)?;
    decode(name, format, data, None)
}

/// Read and decode a volume from the local filesystem.
pub fn load_volume_file(path: &Path) -> Result<VolumeBuffer, FormatError> {
    let name = path.to_string_lossy();
    let format = detect_format(&name)?;
    let data = std::fs::read(path)?;

    let channels = if format == VolumeFormat::Mask {
        let chan_path = path.with_extension("chan");
        if chan_path.is_file() {
            debug!(path = %chan_path.display(), "reading mask channels");
            Some(std::fs::read(chan_path)?)
        } else {
            None
        }
    } else {
        None
    };

    decode(&name, format, &data, channels.as_deref())
}

/// Decode with an optional `.chan` companion for masks.
pub fn decode(
    name: &str,
    format: VolumeFormat,
    data: &[u8],
    chan: Option<&[u8]>,
) -> Result<VolumeBuffer, FormatError> {
    let volume = match format {
        VolumeFormat::RawStack | VolumeFormat::PbdStack => {
            let header_bytes = data.get(..RAW_HEADER_SIZE).ok_or_else(|| {
                FormatError::MalformedHeader {
                    reason: format!(
                        "raw stack needs a {}-byte header, file has {} bytes",
                        RAW_HEADER_SIZE,
                        data.len()
                    ),
                }
            })?;
            let header = RawHeader::parse(header_bytes)?;
            if Some(header.encoding) != format.raw_encoding() {
                return Err(FormatError::UnsupportedFormat {
                    reason: format!(
                        "{} has a {:?} header but its extension says {}",
                        name,
                        header.encoding,
                        format.name()
                    ),
                });
            }
            let available = data.len() - RAW_HEADER_SIZE;
            let needed = header.payload_len()?;
            if header.encoding == Encoding::Literal && available < needed {
                return Err(FormatError::SizeMismatch {
                    expected: needed,
                    actual: available,
                });
            }
            read_raw_volume(Cursor::new(data), is_label_name(name))?
        }
        VolumeFormat::Mask => {
            let rays = read_mask(data)?;
            let channels: Option<MaskChannels> = chan
                .map(|bytes| read_channels(bytes, rays.header.total_voxels))
                .transpose()?;
            mask_signal_volume(&rays, channels.as_ref())?
        }
        VolumeFormat::Tiff | VolumeFormat::Lsm => {
            if !is_tiff_header(data) {
                return Err(FormatError::UnsupportedFormat {
                    reason: format!("{} is not a TIFF file", name),
                });
            }
            load_tiff_stack(data)?
        }
        VolumeFormat::Movie => load_movie_frames(data)?,
    };

    let color_space = default_color_space(format, &volume);
    info!(
        name,
        format = format.name(),
        dims = ?volume.dims(),
        bytes_per_voxel = volume.bytes_per_voxel(),
        color_space = color_space.as_str(),
        "decoded volume"
    );
    Ok(volume.with_color_space(color_space))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::mask::tests::mask_bytes;
    use crate::format::raw::{RAW_MAGIC, PBD_MAGIC};
    use crate::format::tiff::{build_tiff, TestPage};

    fn raw_bytes(magic: &[u8; 24], dims: [u32; 4], payload: &[u8]) -> Vec<u8> {
        let mut out = magic.to_vec();
        out.push(b'L');
        out.extend_from_slice(&1u16.to_le_bytes());
        for d in dims {
            out.extend_from_slice(&d.to_le_bytes());
        }
        out.extend_from_slice(payload);
        out
    }

    // -------------------------------------------------------------------------
    // detect_format tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_extensions() {
        assert_eq!(detect_format("a.v3draw").unwrap(), VolumeFormat::RawStack);
        assert_eq!(detect_format("a.RAW").unwrap(), VolumeFormat::RawStack);
        assert_eq!(detect_format("a.v3dpbd").unwrap(), VolumeFormat::PbdStack);
        assert_eq!(detect_format("dir/a.mask").unwrap(), VolumeFormat::Mask);
        assert_eq!(detect_format("a.tif").unwrap(), VolumeFormat::Tiff);
        assert_eq!(detect_format("a.TIFF").unwrap(), VolumeFormat::Tiff);
        assert_eq!(detect_format("a.lsm").unwrap(), VolumeFormat::Lsm);
        assert_eq!(detect_format("a.gif").unwrap(), VolumeFormat::Movie);
    }

    #[test]
    fn test_unsupported_extensions() {
        assert!(matches!(
            detect_format("a.png"),
            Err(FormatError::UnsupportedFormat { .. })
        ));
        assert!(matches!(
            detect_format("noextension"),
            Err(FormatError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_video_movies_point_to_gif() {
        for name in ["sample.mp4", "sample.H5J"] {
            match detect_format(name) {
                Err(FormatError::UnsupportedFormat { reason }) => {
                    assert!(reason.contains("GIF"), "{}", reason)
                }
                other => panic!("{} detected as {:?}", name, other),
            }
        }
    }

    #[test]
    fn test_label_names() {
        assert!(is_label_name("ConsolidatedLabel.v3dpbd"));
        assert!(is_label_name("/data/sample/ConsolidatedLabel2.v3draw"));
        assert!(!is_label_name("ConsolidatedSignal.v3dpbd"));
        assert!(!is_label_name("ConsolidatedLabel/signal.v3draw"));
    }

    #[test]
    fn test_is_tiff_header() {
        assert!(is_tiff_header(&[0x49, 0x49, 0x2A, 0x00]));
        assert!(is_tiff_header(&[0x4D, 0x4D, 0x00, 0x2B]));
        assert!(!is_tiff_header(&[0x89, 0x50, 0x4E, 0x47]));
        assert!(!is_tiff_header(&[0x49, 0x49, 0x2C, 0x00]));
        assert!(!is_tiff_header(&[0x49, 0x49]));
    }

    // -------------------------------------------------------------------------
    // decoding tests
    // -------------------------------------------------------------------------

    #[test]
    fn test_literal_stack_is_linear() {
        let data = raw_bytes(RAW_MAGIC, [2, 1, 1, 1], &[1, 2]);
        let volume = load_volume_bytes("sample.v3draw", &data).unwrap();
        assert_eq!(volume.color_space(), ColorSpace::Linear);
        assert_eq!(volume.kind(), VoxelKind::Intensity);
    }

    #[test]
    fn test_cookie_mismatch_rejected() {
        let data = raw_bytes(PBD_MAGIC, [2, 1, 1, 1], &[1, 1, 2]);
        assert!(matches!(
            load_volume_bytes("sample.v3draw", &data),
            Err(FormatError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_short_raw_header() {
        assert!(matches!(
            load_volume_bytes("sample.v3draw", b"raw_image"),
            Err(FormatError::MalformedHeader { .. })
        ));
    }

    #[test]
    fn test_literal_payload_shorter_than_header_claims() {
        let data = raw_bytes(RAW_MAGIC, [4, 4, 4, 1], &[0; 10]);
        assert!(matches!(
            load_volume_bytes("sample.v3draw", &data),
            Err(FormatError::SizeMismatch {
                expected: 64,
                actual: 10
            })
        ));
    }

    #[test]
    fn test_consolidated_label_is_label_kind() {
        let data = raw_bytes(RAW_MAGIC, [2, 1, 1, 1], &[0, 3]);
        let volume = load_volume_bytes("ConsolidatedLabel.v3draw", &data).unwrap();
        assert_eq!(volume.kind(), VoxelKind::Label);
    }

    #[test]
    fn test_multichannel_raw_is_rgb() {
        let data = raw_bytes(RAW_MAGIC, [1, 1, 1, 3], &[10, 20, 30]);
        let volume = load_volume_bytes("sample.v3draw", &data).unwrap();
        assert_eq!(volume.kind(), VoxelKind::PackedRgba);
        assert_eq!(volume.color_space(), ColorSpace::Rgb);
    }

    #[test]
    fn test_tiff_dispatch() {
        let data = build_tiff(&[TestPage::gray8(1, 1, vec![9])]);
        let volume = load_volume_bytes("stack.tif", &data).unwrap();
        assert_eq!(volume.value_at(0, 0, 0), Some(9));

        assert!(matches!(
            load_volume_bytes("stack.lsm", b"GIF89a.."),
            Err(FormatError::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_mask_without_channels() {
        let data = mask_bytes([2, 1, 1], 0, 1, &[(0, vec![(1, 2)])]);
        let volume = load_volume_bytes("neuron.mask", &data).unwrap();
        assert_eq!(volume.value_at(0, 0, 0), Some(0));
        assert_eq!(volume.value_at(1, 0, 0), Some(255));
    }

    #[test]
    fn test_mask_file_picks_up_chan() {
        let dir = std::env::temp_dir().join(format!("volscope-detect-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let mask_path = dir.join("neuron.mask");
        std::fs::write(&mask_path, mask_bytes([2, 1, 1], 0, 1, &[(0, vec![(0, 1)])])).unwrap();

        // one voxel, one channel of one byte
        let mut chan = 1i64.to_le_bytes().to_vec();
        chan.extend_from_slice(&[1, 0, 0, 0, 1]);
        chan.push(77);
        std::fs::write(dir.join("neuron.chan"), chan).unwrap();

        let volume = load_volume_file(&mask_path).unwrap();
        assert_eq!(volume.value_at(0, 0, 0), Some(77));

        std::fs::remove_dir_all(dir).ok();
    }
}
