//! A renderable volume: signal texture, optional label mask and its colors.

use std::sync::Arc;

use glam::{Mat4, Vec3};
use tracing::{debug, warn};

use super::arena::ResourceKey;
use super::backend::{BrickPass, RenderBackend};
use super::shader::{FrameState, ShaderKind};
use super::slicer::build_slices;
use super::texture::TextureMediator;
use crate::error::RenderError;
use crate::format::{ColorSpace, LabelMaskBuffer, VolumeBuffer};
use crate::scene::{BlendMode, BoundingBox, CropBox, LoadedVolume};

/// Texture unit of the signal volume
pub const SIGNAL_TEXTURE_UNIT: u32 = 0;

/// Texture unit of the label mask
pub const MASK_TEXTURE_UNIT: u32 = 1;

/// Display settings applied to every brick in a frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplaySettings {
    pub gamma: f32,
    pub crop: CropBox,
    pub blend: BlendMode,
}

impl Default for DisplaySettings {
    fn default() -> Self {
        Self {
            gamma: 1.0,
            crop: CropBox::FULL,
            blend: BlendMode::default(),
        }
    }
}

#[derive(Debug)]
struct LabelTable {
    colors: Vec<u32>,
    key: Option<ResourceKey>,
    dirty: bool,
}

/// GPU-side state for one loaded volume.
///
/// Textures are created on the first [`upload`](Self::upload) and must be
/// released with [`dispose`](Self::dispose) before the brick is dropped.
#[derive(Debug)]
pub struct VolumeBrick {
    name: String,
    signal: TextureMediator,
    mask: Option<TextureMediator>,
    labels: Option<LabelTable>,
    color_mask: [f32; 3],
    bounds: BoundingBox,
}

impl VolumeBrick {
    pub fn new(volume: &LoadedVolume) -> Self {
        let mut signal = TextureMediator::new(format!("{} signal", volume.name));
        signal.init(SIGNAL_TEXTURE_UNIT);
        signal.set_buffer_data(Arc::clone(&volume.signal));

        let mut brick = Self {
            name: volume.name.clone(),
            signal,
            mask: None,
            labels: None,
            color_mask: [1.0; 3],
            bounds: BoundingBox::from_extent(Vec3::from(volume.signal.volume_micrometers())),
        };
        if let Some(mask) = &volume.mask {
            brick.attach_mask(mask);
        }
        brick
    }

    fn attach_mask(&mut self, mask: &Arc<LabelMaskBuffer>) {
        let signal_dims = self.signal.buffer().map(|b| b.dims());
        if signal_dims != Some(mask.volume().dims()) {
            warn!(
                volume = %self.name,
                signal = ?signal_dims,
                mask = ?mask.volume().dims(),
                "label mask does not match the signal volume, ignoring it"
            );
            return;
        }

        let mut mediator = TextureMediator::new(format!("{} mask", self.name));
        mediator.init(MASK_TEXTURE_UNIT);
        mediator.set_buffer_data(Arc::new(mask.volume().clone()));
        self.mask = Some(mediator);
        self.labels = Some(LabelTable {
            colors: mask.packed_colors(),
            key: None,
            dirty: true,
        });
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bounds(&self) -> BoundingBox {
        self.bounds
    }

    pub fn has_mask(&self) -> bool {
        self.mask.is_some()
    }

    pub fn color_mask(&self) -> [f32; 3] {
        self.color_mask
    }

    pub fn set_color_mask(&mut self, color_mask: [f32; 3]) {
        self.color_mask = color_mask;
    }

    /// Reinterpret the signal in `color_space`; re-uploads when it differs.
    pub fn set_color_space(&mut self, color_space: ColorSpace) -> bool {
        let Some(current) = self.signal.buffer() else {
            return false;
        };
        if current.color_space() == color_space {
            return false;
        }
        let mut buffer = VolumeBuffer::clone(current);
        buffer.set_color_space(color_space);
        self.signal.set_buffer_data(Arc::new(buffer));
        true
    }

    /// Replace the label colors; they are re-sent on the next upload.
    pub fn set_label_colors(&mut self, colors: Vec<u32>) {
        if let Some(labels) = &mut self.labels {
            labels.colors = colors;
            labels.dirty = true;
        }
    }

    /// Program this brick asks for before any fallback.
    pub fn preferred_program(&self) -> ShaderKind {
        if self.has_mask() {
            ShaderKind::VolumeComposite
        } else {
            ShaderKind::ColorFilter
        }
    }

    /// Send whatever changed since the last upload.
    pub fn upload<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> Result<(), RenderError> {
        self.signal.upload(backend)?;
        if let Some(mask) = &mut self.mask {
            mask.upload(backend)?;
        }
        if let Some(labels) = &mut self.labels {
            if labels.dirty {
                if let Some(old) = labels.key.take() {
                    backend.release_label_table(old);
                }
                labels.key = Some(backend.upload_label_table(&labels.colors)?);
                labels.dirty = false;
                debug!(volume = %self.name, labels = labels.colors.len(), "label table uploaded");
            }
        }
        Ok(())
    }

    /// Geometry, bindings and uniforms for one frame.
    pub fn frame_pass(
        &self,
        program: ShaderKind,
        view: Vec3,
        view_proj: Mat4,
        display: &DisplaySettings,
    ) -> Result<BrickPass, RenderError> {
        let signal = self.signal.bind_for_draw()?;
        let mask = self.mask.as_ref().map(|m| m.bind_for_draw()).transpose()?;
        let label_table = self.labels.as_ref().and_then(|l| l.key);
        let label_count = self
            .labels
            .as_ref()
            .map(|l| l.colors.len() as u32)
            .unwrap_or(0);

        let voxel_kind = self
            .signal
            .buffer()
            .map(|b| b.kind())
            .ok_or_else(|| RenderError::GpuResource(format!("{} has no signal", self.name)))?;

        let state = FrameState {
            view_proj,
            color_mask: self.color_mask,
            gamma: display.gamma,
            crop: display.crop,
            voxel_kind,
            has_mask: mask.is_some(),
            label_count,
        };

        Ok(BrickPass {
            program,
            blend: display.blend,
            uniforms: program.write_uniforms(&state),
            signal,
            mask,
            label_table,
            draws: build_slices(view, &self.signal).draws,
        })
    }

    /// Release every GPU resource the brick holds.
    pub fn dispose<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        self.signal.dispose(backend);
        if let Some(mask) = &mut self.mask {
            mask.dispose(backend);
        }
        if let Some(key) = self.labels.as_mut().and_then(|l| l.key.take()) {
            backend.release_label_table(key);
        }
        debug!(volume = %self.name, "brick disposed");
    }
}
