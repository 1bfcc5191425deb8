//! Shader kinds, uniform layout and compile-failure fallback.

use std::collections::HashMap;

use bytemuck::{Pod, Zeroable};
use glam::Mat4;
use tracing::{debug, warn};

use super::backend::{ProgramInfo, RenderBackend};
use crate::error::RenderError;
use crate::format::VoxelKind;
use crate::scene::CropBox;

/// Uniforms every program uses.
const BASE_UNIFORMS: &[&str] = &["view_proj", "voxel_kind"];
const FILTER_UNIFORMS: &[&str] = &[
    "view_proj",
    "voxel_kind",
    "color_mask",
    "gamma",
    "crop_min",
    "crop_max",
];
const COMPOSITE_UNIFORMS: &[&str] = &[
    "view_proj",
    "voxel_kind",
    "color_mask",
    "gamma",
    "crop_min",
    "crop_max",
    "has_mask",
    "label_count",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ShaderKind {
    /// Plain texturing, no color processing
    PassThrough,
    /// Channel weighting, gamma and crop
    ColorFilter,
    /// Color filter plus label-mask tinting
    VolumeComposite,
}

impl ShaderKind {
    pub const fn name(&self) -> &'static str {
        match self {
            ShaderKind::PassThrough => "pass-through",
            ShaderKind::ColorFilter => "color-filter",
            ShaderKind::VolumeComposite => "volume-composite",
        }
    }

    pub const fn required_uniforms(&self) -> &'static [&'static str] {
        match self {
            ShaderKind::PassThrough => BASE_UNIFORMS,
            ShaderKind::ColorFilter => FILTER_UNIFORMS,
            ShaderKind::VolumeComposite => COMPOSITE_UNIFORMS,
        }
    }

    /// Fragment entry point in the volume shader module.
    pub const fn entry_point(&self) -> &'static str {
        match self {
            ShaderKind::PassThrough => "fs_pass_through",
            ShaderKind::ColorFilter => "fs_color_filter",
            ShaderKind::VolumeComposite => "fs_composite",
        }
    }

    /// Fill the uniform block from `frame`. Fields the kind does not use keep
    /// neutral values.
    pub fn write_uniforms(&self, frame: &FrameState) -> UniformBlock {
        let mut block = UniformBlock::neutral(frame.view_proj, frame.voxel_kind);
        match self {
            ShaderKind::PassThrough => {}
            ShaderKind::ColorFilter => block.apply_filter(frame),
            ShaderKind::VolumeComposite => {
                block.apply_filter(frame);
                block.has_mask = frame.has_mask as u32;
                block.label_count = frame.label_count;
            }
        }
        block
    }
}

/// Per-frame values pushed to the shader.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrameState {
    pub view_proj: Mat4,
    pub color_mask: [f32; 3],
    pub gamma: f32,
    pub crop: CropBox,
    pub voxel_kind: VoxelKind,
    pub has_mask: bool,
    pub label_count: u32,
}

/// The 128-byte uniform buffer shared by all shader kinds.
///
/// Field order matches `struct Uniforms` in `volume.wgsl`: each `vec3`
/// shares its 16-byte slot with the scalar after it.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct UniformBlock {
    pub view_proj: [[f32; 4]; 4],
    pub color_mask: [f32; 3],
    pub gamma: f32,
    pub crop_min: [f32; 3],
    pub has_mask: u32,
    pub crop_max: [f32; 3],
    pub label_count: u32,
    pub voxel_kind: u32,
    pub _pad: [u32; 3],
}

impl UniformBlock {
    fn neutral(view_proj: Mat4, voxel_kind: VoxelKind) -> Self {
        Self {
            view_proj: view_proj.to_cols_array_2d(),
            color_mask: [1.0; 3],
            gamma: 1.0,
            crop_min: CropBox::FULL.min,
            has_mask: 0,
            crop_max: CropBox::FULL.max,
            label_count: 0,
            voxel_kind: voxel_kind_code(voxel_kind),
            _pad: [0; 3],
        }
    }

    fn apply_filter(&mut self, frame: &FrameState) {
        self.color_mask = frame.color_mask;
        self.gamma = frame.gamma;
        self.crop_min = frame.crop.min;
        self.crop_max = frame.crop.max;
    }
}

fn voxel_kind_code(kind: VoxelKind) -> u32 {
    match kind {
        VoxelKind::Intensity => 0,
        VoxelKind::PackedRgba => 1,
        VoxelKind::Label => 2,
    }
}

// =============================================================================
// ShaderPipeline
// =============================================================================

/// Compiles programs on first use and degrades to pass-through on failure.
///
/// After any compile failure, compositing stays off for the rest of the
/// session and every request is served by [`ShaderKind::PassThrough`].
#[derive(Debug, Default)]
pub struct ShaderPipeline {
    programs: HashMap<ShaderKind, ProgramInfo>,
    compositing_disabled: bool,
}

impl ShaderPipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_degraded(&self) -> bool {
        self.compositing_disabled
    }

    /// The program that will actually serve `wanted`, compiling it if needed.
    ///
    /// Compile failures are absorbed; a compiled program lacking a required
    /// uniform is an error.
    pub fn program_for<B: RenderBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        wanted: ShaderKind,
    ) -> Result<ShaderKind, RenderError> {
        let kind = if self.compositing_disabled {
            ShaderKind::PassThrough
        } else {
            wanted
        };
        if self.programs.contains_key(&kind) {
            return Ok(kind);
        }

        match backend.compile_program(kind) {
            Ok(info) => {
                check_uniforms(kind, &info)?;
                debug!(kind = kind.name(), "shader program ready");
                self.programs.insert(kind, info);
                Ok(kind)
            }
            Err(RenderError::ShaderCompile { message, .. }) if kind != ShaderKind::PassThrough => {
                warn!(
                    kind = kind.name(),
                    error = %message,
                    "shader compile failed, falling back to pass-through for this session"
                );
                self.compositing_disabled = true;
                self.program_for(backend, ShaderKind::PassThrough)
            }
            Err(e) => Err(e),
        }
    }
}

fn check_uniforms(kind: ShaderKind, info: &ProgramInfo) -> Result<(), RenderError> {
    match kind
        .required_uniforms()
        .iter()
        .find(|name| !info.has_uniform(name))
    {
        Some(name) => Err(RenderError::MissingUniform {
            kind: kind.name(),
            name: *name,
        }),
        None => Ok(()),
    }
}
