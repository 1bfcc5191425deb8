//! The seam between the slice renderer and a GPU API.
//!
//! Everything the renderer needs from the GPU goes through [`RenderBackend`]:
//! texture allocation, label tables, program compilation and frame
//! submission. Two implementations exist:
//!
//! - [`WgpuBackend`]: renders offscreen with `wgpu` and reads frames back
//! - [`RecordingBackend`]: keeps everything in memory and records frames

mod recording;
mod wgpu_backend;

use bytemuck::{Pod, Zeroable};

use crate::error::RenderError;
use crate::format::{ColorSpace, VolumeBuffer, VoxelKind};
use crate::scene::BlendMode;

use super::arena::ResourceKey;
use super::shader::{ShaderKind, UniformBlock};

pub use recording::{RecordedTexture, RecordingBackend};
pub use wgpu_backend::{WgpuBackend, WgpuBackendOptions};

/// Limits negotiated once when a backend is created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuCapabilities {
    pub max_texture_dimension_3d: u32,
    pub supports_r16_unorm: bool,
}

impl GpuCapabilities {
    /// Whether a volume of `dims` voxels fits in one 3D texture.
    pub fn fits(&self, dims: [usize; 3]) -> bool {
        dims.iter()
            .all(|&d| d as u64 <= self.max_texture_dimension_3d as u64)
    }
}

impl Default for GpuCapabilities {
    fn default() -> Self {
        Self {
            max_texture_dimension_3d: 2048,
            supports_r16_unorm: false,
        }
    }
}

/// Texel layouts a volume texture can use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TexelFormat {
    R8Unorm,
    R16Unorm,
    Rgba8Unorm,
    Rgba8UnormSrgb,
    R8Uint,
    R16Uint,
    R32Uint,
}

impl TexelFormat {
    pub const fn bytes_per_texel(&self) -> usize {
        match self {
            TexelFormat::R8Unorm | TexelFormat::R8Uint => 1,
            TexelFormat::R16Unorm | TexelFormat::R16Uint => 2,
            TexelFormat::Rgba8Unorm | TexelFormat::Rgba8UnormSrgb | TexelFormat::R32Uint => 4,
        }
    }

    /// Integer formats are read with exact loads, never filtered.
    pub const fn is_integer(&self) -> bool {
        matches!(
            self,
            TexelFormat::R8Uint | TexelFormat::R16Uint | TexelFormat::R32Uint
        )
    }

    /// Format for `volume` as it will be uploaded.
    ///
    /// 16-bit intensities fall back to 8 bits when the device cannot sample
    /// normalized 16-bit textures.
    pub fn for_volume(volume: &VolumeBuffer, caps: &GpuCapabilities) -> TexelFormat {
        match (volume.kind(), volume.bytes_per_voxel()) {
            (VoxelKind::Intensity, 2) if caps.supports_r16_unorm => TexelFormat::R16Unorm,
            (VoxelKind::Intensity, _) => TexelFormat::R8Unorm,
            (VoxelKind::PackedRgba, _) if volume.color_space() == ColorSpace::Srgb => {
                TexelFormat::Rgba8UnormSrgb
            }
            (VoxelKind::PackedRgba, _) => TexelFormat::Rgba8Unorm,
            (VoxelKind::Label, 1) => TexelFormat::R8Uint,
            (VoxelKind::Label, 2) => TexelFormat::R16Uint,
            (VoxelKind::Label, _) => TexelFormat::R32Uint,
        }
    }
}

/// Request for a 3D texture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextureDesc {
    pub label: String,
    pub dims: [u32; 3],
    pub format: TexelFormat,
}

impl TextureDesc {
    pub fn byte_len(&self) -> usize {
        self.dims.iter().map(|&d| d as usize).product::<usize>() * self.format.bytes_per_texel()
    }
}

/// What a compiled program exposes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramInfo {
    pub kind: ShaderKind,
    pub uniforms: Vec<String>,
}

impl ProgramInfo {
    pub fn has_uniform(&self, name: &str) -> bool {
        self.uniforms.iter().any(|u| u == name)
    }
}

/// Slice quad vertex: world position and 3D texture coordinate.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: [f32; 3],
    pub tex_coord: [f32; 3],
}

/// One slice: a 4-vertex triangle strip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DrawCall {
    pub vertices: [Vertex; 4],
}

/// A texture bound to a shader texture unit for one pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextureBinding {
    pub unit: u32,
    pub texture: ResourceKey,
}

/// Everything needed to draw one volume.
#[derive(Debug, Clone)]
pub struct BrickPass {
    pub program: ShaderKind,
    pub blend: BlendMode,
    pub uniforms: UniformBlock,
    pub signal: TextureBinding,
    pub mask: Option<TextureBinding>,
    pub label_table: Option<ResourceKey>,
    pub draws: Vec<DrawCall>,
}

/// One frame: clear, then draw each pass in order.
#[derive(Debug, Clone)]
pub struct FramePacket {
    pub clear_color: [f32; 4],
    pub passes: Vec<BrickPass>,
}

impl FramePacket {
    pub fn new(clear_color: [f32; 4]) -> Self {
        Self {
            clear_color,
            passes: Vec::new(),
        }
    }

    pub fn draw_count(&self) -> usize {
        self.passes.iter().map(|p| p.draws.len()).sum()
    }
}

/// GPU operations used by the renderer.
///
/// Keys returned by a backend are only meaningful to that backend.
pub trait RenderBackend {
    fn capabilities(&self) -> &GpuCapabilities;

    /// Allocate a 3D texture and fill it with `texels`.
    ///
    /// `texels` must hold exactly `desc.byte_len()` bytes, little-endian.
    fn create_volume_texture(
        &mut self,
        desc: &TextureDesc,
        texels: &[u8],
    ) -> Result<ResourceKey, RenderError>;

    /// Free a texture. Returns false for stale keys.
    fn release_texture(&mut self, key: ResourceKey) -> bool;

    /// Upload a label id → packed RGBA8 lookup table.
    fn upload_label_table(&mut self, colors: &[u32]) -> Result<ResourceKey, RenderError>;

    fn release_label_table(&mut self, key: ResourceKey) -> bool;

    fn compile_program(&mut self, kind: ShaderKind) -> Result<ProgramInfo, RenderError>;

    fn submit_frame(&mut self, frame: &FramePacket) -> Result<(), RenderError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::ByteOrder;

    fn volume(kind: VoxelKind, bytes: usize) -> VolumeBuffer {
        VolumeBuffer::new([2, 1, 1], bytes, ByteOrder::LittleEndian, kind, vec![0u8; 2 * bytes])
            .unwrap()
    }

    #[test]
    fn test_texel_format_selection() {
        let caps = GpuCapabilities::default();
        let r16 = GpuCapabilities {
            supports_r16_unorm: true,
            ..caps
        };

        assert_eq!(
            TexelFormat::for_volume(&volume(VoxelKind::Intensity, 1), &caps),
            TexelFormat::R8Unorm
        );
        assert_eq!(
            TexelFormat::for_volume(&volume(VoxelKind::Intensity, 2), &caps),
            TexelFormat::R8Unorm
        );
        assert_eq!(
            TexelFormat::for_volume(&volume(VoxelKind::Intensity, 2), &r16),
            TexelFormat::R16Unorm
        );
        assert_eq!(
            TexelFormat::for_volume(&volume(VoxelKind::Label, 2), &caps),
            TexelFormat::R16Uint
        );

        let srgb = volume(VoxelKind::PackedRgba, 4).with_color_space(ColorSpace::Srgb);
        assert_eq!(
            TexelFormat::for_volume(&srgb, &caps),
            TexelFormat::Rgba8UnormSrgb
        );
    }

    #[test]
    fn test_capabilities_fit() {
        let caps = GpuCapabilities {
            max_texture_dimension_3d: 256,
            supports_r16_unorm: false,
        };
        assert!(caps.fits([256, 10, 1]));
        assert!(!caps.fits([257, 10, 1]));
    }

    #[test]
    fn test_desc_byte_len() {
        let desc = TextureDesc {
            label: "signal".into(),
            dims: [4, 3, 2],
            format: TexelFormat::Rgba8Unorm,
        };
        assert_eq!(desc.byte_len(), 96);
        assert!(!desc.format.is_integer());
    }
}
