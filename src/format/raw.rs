//! Raw voxel stack container (`.v3draw` / `.v3dpbd`).
//!
//! # Header layout (43 bytes)
//!
//! ```text
//! Bytes  0-23: magic cookie
//!              "raw_image_stack_by_hpeng"  literal voxel payload
//!              "v3d_volume_pkbitdf_encod"  PBD8 compressed payload
//! Byte     24: endian flag ('B' big-endian, 'L' little-endian)
//! Bytes 25-26: bytes per sample (1, 2 or 4 = float)
//! Bytes 27-42: X, Y, Z, C dimensions as u32
//! ```
//!
//! Multi-byte header fields use the declared byte order. The payload is
//! channel-major, each channel a stack of Z slices of Y rows of X samples.
//! A PBD8 payload is one continuous stream over all channels.

use std::io::{BufReader, Read, Write};

use tracing::debug;

use super::normalize::{normalize_channels, ChannelPlanes, SampleType};
use super::volume::{VolumeBuffer, VoxelKind};
use crate::codec::{encode_pbd8, Pbd8Decoder};
use crate::error::{FormatError, IoError};
use crate::io::ByteOrder;

/// Magic cookie of a literal raw stack.
pub const RAW_MAGIC: &[u8; 24] = b"raw_image_stack_by_hpeng";

/// Magic cookie of a PBD8 compressed stack.
pub const PBD_MAGIC: &[u8; 24] = b"v3d_volume_pkbitdf_encod";

/// Size of the fixed header in bytes.
pub const RAW_HEADER_SIZE: usize = 43;

/// Largest decoded payload accepted from a stack header (16 GiB).
pub const MAX_PAYLOAD_BYTES: u64 = 16 << 30;

/// Payload encoding selected by the magic cookie.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Encoding {
    Literal,
    Pbd8,
}

/// Parsed raw stack header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawHeader {
    pub encoding: Encoding,
    pub byte_order: ByteOrder,
    pub sample: SampleType,
    /// X, Y, Z, channel count.
    pub dims: [u32; 4],
}

impl RawHeader {
    /// Parse the first [`RAW_HEADER_SIZE`] bytes of a stack.
    ///
    /// # Errors
    /// - `UnsupportedFormat` for an unknown magic cookie, or a PBD8 stack
    ///   with samples wider than one byte
    /// - `MalformedHeader` for a bad endian flag, sample size or zero dimension
    pub fn parse(bytes: &[u8]) -> Result<Self, FormatError> {
        if bytes.len() < RAW_HEADER_SIZE {
            return Err(FormatError::MalformedHeader {
                reason: format!(
                    "raw stack header needs {} bytes, got {}",
                    RAW_HEADER_SIZE,
                    bytes.len()
                ),
            });
        }

        let encoding = match &bytes[..24] {
            m if m == RAW_MAGIC => Encoding::Literal,
            m if m == PBD_MAGIC => Encoding::Pbd8,
            m => {
                return Err(FormatError::UnsupportedFormat {
                    reason: format!(
                        "unrecognized stack cookie {:?}",
                        String::from_utf8_lossy(m)
                    ),
                })
            }
        };

        let byte_order = match bytes[24] {
            b'B' => ByteOrder::BigEndian,
            b'L' => ByteOrder::LittleEndian,
            flag => {
                return Err(FormatError::MalformedHeader {
                    reason: format!("endian flag must be 'B' or 'L', got 0x{:02X}", flag),
                })
            }
        };

        let sample_bytes = byte_order.read_u16(&bytes[25..27]) as usize;
        let sample = SampleType::from_byte_count(sample_bytes)?;

        let mut dims = [0u32; 4];
        for (i, dim) in dims.iter_mut().enumerate() {
            let at = 27 + i * 4;
            *dim = byte_order.read_u32(&bytes[at..at + 4]);
        }
        if dims.iter().any(|&d| d == 0) {
            return Err(FormatError::MalformedHeader {
                reason: format!("stack dimensions must be non-zero, got {:?}", dims),
            });
        }

        if encoding == Encoding::Pbd8 && sample != SampleType::U8 {
            return Err(FormatError::UnsupportedFormat {
                reason: format!(
                    "PBD8 stacks with {}-byte samples are not supported",
                    sample.byte_count()
                ),
            });
        }

        Ok(Self {
            encoding,
            byte_order,
            sample,
            dims,
        })
    }

    pub fn to_bytes(&self) -> [u8; RAW_HEADER_SIZE] {
        let mut out = [0u8; RAW_HEADER_SIZE];
        out[..24].copy_from_slice(match self.encoding {
            Encoding::Literal => RAW_MAGIC,
            Encoding::Pbd8 => PBD_MAGIC,
        });
        out[24] = match self.byte_order {
            ByteOrder::BigEndian => b'B',
            ByteOrder::LittleEndian => b'L',
        };
        out[25..27].copy_from_slice(&self.byte_order.u16_bytes(self.sample.byte_count() as u16));
        for (i, dim) in self.dims.iter().enumerate() {
            let at = 27 + i * 4;
            out[at..at + 4].copy_from_slice(&self.byte_order.u32_bytes(*dim));
        }
        out
    }

    /// Bytes in one Z slice of one channel.
    ///
    /// # Errors
    /// `MalformedHeader` if the slice size overflows.
    pub fn slice_len(&self) -> Result<usize, FormatError> {
        let bytes = (self.dims[0] as u64)
            .checked_mul(self.dims[1] as u64)
            .and_then(|n| n.checked_mul(self.sample.byte_count() as u64));
        self.checked_size(bytes)
    }

    /// Bytes of decoded payload across all channels.
    ///
    /// # Errors
    /// `MalformedHeader` if the size overflows or exceeds [`MAX_PAYLOAD_BYTES`].
    pub fn payload_len(&self) -> Result<usize, FormatError> {
        let bytes = (self.slice_len()? as u64)
            .checked_mul(self.dims[2] as u64)
            .and_then(|n| n.checked_mul(self.dims[3] as u64));
        self.checked_size(bytes)
    }

    fn checked_size(&self, bytes: Option<u64>) -> Result<usize, FormatError> {
        bytes
            .filter(|&n| n <= MAX_PAYLOAD_BYTES)
            .and_then(|n| usize::try_from(n).ok())
            .ok_or_else(|| FormatError::MalformedHeader {
                reason: format!(
                    "stack dimensions {:?} with {}-byte samples exceed the {} byte limit",
                    self.dims,
                    self.sample.byte_count(),
                    MAX_PAYLOAD_BYTES
                ),
            })
    }
}

/// Read a raw stack into a volume.
///
/// `as_label` marks a single-channel stack as a label mask instead of an
/// intensity volume.
pub fn read_raw_volume<R: Read>(reader: R, as_label: bool) -> Result<VolumeBuffer, FormatError> {
    let mut reader = BufReader::new(reader);

    let mut header_bytes = [0u8; RAW_HEADER_SIZE];
    reader.read_exact(&mut header_bytes)?;
    let header = RawHeader::parse(&header_bytes)?;

    debug!(
        encoding = ?header.encoding,
        dims = ?header.dims,
        sample_bytes = header.sample.byte_count(),
        "reading raw stack"
    );

    // Sized by the bytes actually read, not by the header.
    let payload_len = header.payload_len()?;
    let mut payload = Vec::new();
    match header.encoding {
        Encoding::Literal => reader.take(payload_len as u64).read_to_end(&mut payload)?,
        Encoding::Pbd8 => Pbd8Decoder::new(reader)
            .take(payload_len as u64)
            .read_to_end(&mut payload)?,
    };
    if payload.len() < payload_len {
        return Err(FormatError::Io(IoError::UnexpectedEof(format!(
            "{:?} stack payload ended after {} of {} bytes",
            header.encoding,
            payload.len(),
            payload_len
        ))));
    }

    let dims = [
        header.dims[0] as usize,
        header.dims[1] as usize,
        header.dims[2] as usize,
    ];

    if as_label {
        if header.dims[3] != 1 || header.sample == SampleType::F32 {
            return Err(FormatError::MalformedHeader {
                reason: format!(
                    "label stacks must have one integer channel, got {} channel(s) of {} bytes",
                    header.dims[3],
                    header.sample.byte_count()
                ),
            });
        }
        return VolumeBuffer::new(
            dims,
            header.sample.byte_count(),
            header.byte_order,
            VoxelKind::Label,
            payload,
        );
    }

    normalize_channels(ChannelPlanes {
        dims,
        channels: header.dims[3] as usize,
        sample: header.sample,
        byte_order: header.byte_order,
        data: payload,
    })
}

/// Write a volume as a raw stack.
///
/// Packed RGBA volumes are split back into one plane per source channel.
pub fn write_raw_volume<W: Write>(
    mut writer: W,
    volume: &VolumeBuffer,
    encoding: Encoding,
) -> Result<(), FormatError> {
    let [sx, sy, sz] = volume.dims();

    let (sample, channels, payload): (SampleType, usize, Vec<u8>) = match volume.kind() {
        VoxelKind::PackedRgba => {
            let channels = volume.channels();
            let mut planes = Vec::with_capacity(volume.voxel_count() * channels);
            for channel in 0..channels {
                planes.extend(volume.data().chunks_exact(4).map(|texel| texel[channel]));
            }
            (SampleType::U8, channels, planes)
        }
        VoxelKind::Intensity | VoxelKind::Label => (
            SampleType::from_byte_count(volume.bytes_per_voxel())?,
            1,
            volume.data().to_vec(),
        ),
    };

    if encoding == Encoding::Pbd8 && sample != SampleType::U8 {
        return Err(FormatError::UnsupportedFormat {
            reason: format!(
                "PBD8 can only encode 1-byte samples, volume has {}",
                sample.byte_count()
            ),
        });
    }

    let header = RawHeader {
        encoding,
        byte_order: volume.byte_order(),
        sample,
        dims: [sx as u32, sy as u32, sz as u32, channels as u32],
    };
    writer.write_all(&header.to_bytes())?;

    match encoding {
        Encoding::Literal => writer.write_all(&payload)?,
        Encoding::Pbd8 => writer.write_all(&encode_pbd8(&payload))?,
    }
    writer.flush()?;
    Ok(())
}
