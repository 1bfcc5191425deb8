//! Canonical in-memory volume representation.
//!
//! Every loader produces a [`VolumeBuffer`]: packed integer voxels in
//! X-fastest, then Y, then Z order, tagged with byte order, physical voxel
//! size and the color space used when the data is displayed.

use std::borrow::Cow;
use std::collections::BTreeMap;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::FormatError;
use crate::io::ByteOrder;

/// How voxel values map to displayed color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorSpace {
    /// Values are linear intensities.
    Linear,
    /// Values are per-channel fluorescence intensities shown as RGB.
    Rgb,
    /// Values are already gamma-encoded display colors.
    Srgb,
}

impl ColorSpace {
    pub fn as_str(self) -> &'static str {
        match self {
            ColorSpace::Linear => "linear",
            ColorSpace::Rgb => "rgb",
            ColorSpace::Srgb => "srgb",
        }
    }
}

/// Interpretation of the packed integers in a volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoxelKind {
    /// Single-channel intensity, 1 or 2 bytes per voxel.
    Intensity,
    /// Up to four 8-bit channels packed as R, G, B, A bytes.
    PackedRgba,
    /// Object label ids, 1, 2 or 4 bytes per voxel.
    Label,
}

impl VoxelKind {
    fn allows(self, bytes_per_voxel: usize) -> bool {
        match self {
            VoxelKind::Intensity => matches!(bytes_per_voxel, 1 | 2),
            VoxelKind::PackedRgba => bytes_per_voxel == 4,
            VoxelKind::Label => matches!(bytes_per_voxel, 1 | 2 | 4),
        }
    }
}

// =============================================================================
// VolumeBuffer
// =============================================================================

/// A decoded volume ready for upload.
///
/// The physical extent is always derived from the voxel count and the voxel
/// size, so the two can never drift apart.
#[derive(Debug, Clone)]
pub struct VolumeBuffer {
    dims: [usize; 3],
    bytes_per_voxel: usize,
    byte_order: ByteOrder,
    kind: VoxelKind,
    channels: usize,
    voxel_micrometers: [f32; 3],
    color_space: ColorSpace,
    data: Bytes,
}

impl VolumeBuffer {
    /// Wrap voxel data, checking that its length matches the dimensions.
    ///
    /// The voxel size defaults to one micrometer and the color space to
    /// linear.
    pub fn new(
        dims: [usize; 3],
        bytes_per_voxel: usize,
        byte_order: ByteOrder,
        kind: VoxelKind,
        data: impl Into<Bytes>,
    ) -> Result<Self, FormatError> {
        let data = data.into();

        if dims.iter().any(|&d| d == 0) {
            return Err(FormatError::MalformedHeader {
                reason: format!("volume dimensions must be non-zero, got {:?}", dims),
            });
        }
        if !kind.allows(bytes_per_voxel) {
            return Err(FormatError::MalformedHeader {
                reason: format!(
                    "{:?} voxels cannot be {} bytes wide",
                    kind, bytes_per_voxel
                ),
            });
        }

        let expected = dims[0]
            .checked_mul(dims[1])
            .and_then(|n| n.checked_mul(dims[2]))
            .and_then(|n| n.checked_mul(bytes_per_voxel))
            .ok_or_else(|| FormatError::MalformedHeader {
                reason: format!("volume {:?} is too large to address", dims),
            })?;
        if data.len() != expected {
            return Err(FormatError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let channels = if kind == VoxelKind::PackedRgba { 4 } else { 1 };

        Ok(Self {
            dims,
            bytes_per_voxel,
            byte_order,
            kind,
            channels,
            voxel_micrometers: [1.0; 3],
            color_space: ColorSpace::Linear,
            data,
        })
    }

    /// Set the physical voxel size; non-positive or non-finite sizes fall back to 1 µm.
    pub fn with_voxel_size(mut self, micrometers: [f32; 3]) -> Self {
        for (slot, size) in self.voxel_micrometers.iter_mut().zip(micrometers) {
            *slot = if size.is_finite() && size > 0.0 { size } else { 1.0 };
        }
        self
    }

    pub fn with_color_space(mut self, color_space: ColorSpace) -> Self {
        self.color_space = color_space;
        self
    }

    /// Record how many source channels were packed into an RGBA volume.
    pub fn with_source_channels(mut self, channels: usize) -> Self {
        if self.kind == VoxelKind::PackedRgba {
            self.channels = channels.clamp(1, 4);
        }
        self
    }

    pub fn dims(&self) -> [usize; 3] {
        self.dims
    }

    pub fn bytes_per_voxel(&self) -> usize {
        self.bytes_per_voxel
    }

    pub fn byte_order(&self) -> ByteOrder {
        self.byte_order
    }

    pub fn kind(&self) -> VoxelKind {
        self.kind
    }

    /// Source channels represented; 1 unless the volume is packed RGBA.
    pub fn channels(&self) -> usize {
        self.channels
    }

    pub fn voxel_micrometers(&self) -> [f32; 3] {
        self.voxel_micrometers
    }

    /// Physical extent: dimensions times voxel size on each axis.
    pub fn volume_micrometers(&self) -> [f32; 3] {
        [
            self.dims[0] as f32 * self.voxel_micrometers[0],
            self.dims[1] as f32 * self.voxel_micrometers[1],
            self.dims[2] as f32 * self.voxel_micrometers[2],
        ]
    }

    pub fn color_space(&self) -> ColorSpace {
        self.color_space
    }

    pub fn set_color_space(&mut self, color_space: ColorSpace) {
        self.color_space = color_space;
    }

    pub fn voxel_count(&self) -> usize {
        self.dims[0] * self.dims[1] * self.dims[2]
    }

    /// Raw voxel bytes in the declared byte order.
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Voxel bytes in little-endian order, as GPU uploads expect.
    ///
    /// Borrows when no swap is needed.
    pub fn texel_bytes(&self) -> Cow<'_, [u8]> {
        let multi_byte_values = self.kind != VoxelKind::PackedRgba && self.bytes_per_voxel > 1;
        if !multi_byte_values || self.byte_order == ByteOrder::LittleEndian {
            return Cow::Borrowed(&self.data);
        }

        let mut swapped = self.data.to_vec();
        for value in swapped.chunks_exact_mut(self.bytes_per_voxel) {
            value.reverse();
        }
        Cow::Owned(swapped)
    }

    /// Voxel value at `(x, y, z)`; packed RGBA voxels read as a little-endian u32.
    pub fn value_at(&self, x: usize, y: usize, z: usize) -> Option<u32> {
        if x >= self.dims[0] || y >= self.dims[1] || z >= self.dims[2] {
            return None;
        }
        let index = (z * self.dims[1] + y) * self.dims[0] + x;
        let start = index * self.bytes_per_voxel;
        let bytes = &self.data[start..start + self.bytes_per_voxel];

        let order = if self.kind == VoxelKind::PackedRgba {
            ByteOrder::LittleEndian
        } else {
            self.byte_order
        };
        Some(match self.bytes_per_voxel {
            1 => bytes[0] as u32,
            2 => order.read_u16(bytes) as u32,
            _ => order.read_u32(bytes),
        })
    }
}

// =============================================================================
// Label masks
// =============================================================================

/// Display color per label id.
///
/// Serialized as a JSON object mapping label ids to `[r, g, b]`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LabelColorTable {
    colors: BTreeMap<u32, [u8; 3]>,
}

impl LabelColorTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, label: u32, rgb: [u8; 3]) {
        self.colors.insert(label, rgb);
    }

    pub fn get(&self, label: u32) -> Option<[u8; 3]> {
        self.colors.get(&label).copied()
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }

    pub fn from_json(text: &str) -> Result<Self, FormatError> {
        serde_json::from_str(text).map_err(|e| FormatError::MalformedHeader {
            reason: format!("label color table: {}", e),
        })
    }

    /// Distinct fallback color for labels without an explicit entry.
    pub fn default_color(label: u32) -> [u8; 3] {
        // Spread hues with the golden ratio so neighbours differ.
        let hue = (label as f32 * 0.618_034).fract() * 6.0;
        let x = 1.0 - ((hue % 2.0) - 1.0).abs();
        let (r, g, b) = match hue as u32 {
            0 => (1.0, x, 0.0),
            1 => (x, 1.0, 0.0),
            2 => (0.0, 1.0, x),
            3 => (0.0, x, 1.0),
            4 => (x, 0.0, 1.0),
            _ => (1.0, 0.0, x),
        };
        [(r * 255.0) as u8, (g * 255.0) as u8, (b * 255.0) as u8]
    }

    /// Dense lookup indexed by label id, each entry packed as RGBA8 in a u32.
    ///
    /// Alpha is 0 for label 0 (background) and 255 for everything else.
    pub fn packed_lookup(&self, max_label: u32) -> Vec<u32> {
        (0..=max_label)
            .map(|label| {
                if label == 0 {
                    return 0;
                }
                let [r, g, b] = self.get(label).unwrap_or_else(|| Self::default_color(label));
                u32::from_le_bytes([r, g, b, 255])
            })
            .collect()
    }
}

/// Per-voxel object labels with their display colors.
#[derive(Debug, Clone)]
pub struct LabelMaskBuffer {
    volume: VolumeBuffer,
    colors: Option<LabelColorTable>,
    max_label: u32,
}

impl LabelMaskBuffer {
    pub fn new(volume: VolumeBuffer, colors: Option<LabelColorTable>) -> Result<Self, FormatError> {
        if volume.kind() != VoxelKind::Label {
            return Err(FormatError::UnsupportedFormat {
                reason: format!("{:?} volume cannot be used as a label mask", volume.kind()),
            });
        }

        let [sx, sy, sz] = volume.dims();
        let mut max_label = 0;
        for z in 0..sz {
            for y in 0..sy {
                for x in 0..sx {
                    max_label = max_label.max(volume.value_at(x, y, z).unwrap_or(0));
                }
            }
        }

        Ok(Self {
            volume,
            colors,
            max_label,
        })
    }

    pub fn volume(&self) -> &VolumeBuffer {
        &self.volume
    }

    pub fn colors(&self) -> Option<&LabelColorTable> {
        self.colors.as_ref()
    }

    pub fn set_colors(&mut self, colors: Option<LabelColorTable>) {
        self.colors = colors;
    }

    /// Highest label id present in the mask.
    pub fn max_label(&self) -> u32 {
        self.max_label
    }

    /// GPU lookup table covering every label id present.
    pub fn packed_colors(&self) -> Vec<u32> {
        match &self.colors {
            Some(table) => table.packed_lookup(self.max_label),
            None => LabelColorTable::new().packed_lookup(self.max_label),
        }
    }
}
