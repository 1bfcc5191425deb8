//! One GPU volume texture and its world-to-texture mapping.

use std::borrow::Cow;
use std::sync::Arc;

use glam::Vec3;
use tracing::{debug, warn};

use super::arena::ResourceKey;
use super::backend::{RenderBackend, TexelFormat, TextureBinding, TextureDesc};
use crate::error::RenderError;
use crate::format::VolumeBuffer;

/// What happens to coordinates that fall outside the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BorderPolicy {
    /// Pin to the nearest texel center on the edge.
    #[default]
    ClampToEdge,
}

/// Owns the GPU copy of one volume.
///
/// The volume spans `[0, volume_micrometers]` in world space. Data set with
/// [`set_buffer_data`](Self::set_buffer_data) reaches the GPU on the next
/// [`upload`](Self::upload); uploads are skipped while nothing changed.
#[derive(Debug)]
pub struct TextureMediator {
    label: String,
    unit: Option<u32>,
    buffer: Option<Arc<VolumeBuffer>>,
    texture: Option<ResourceKey>,
    dirty: bool,
    border: BorderPolicy,
}

impl TextureMediator {
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            unit: None,
            buffer: None,
            texture: None,
            dirty: false,
            border: BorderPolicy::default(),
        }
    }

    /// Assign the shader texture unit this mediator binds to.
    pub fn init(&mut self, texture_unit: u32) {
        self.unit = Some(texture_unit);
    }

    pub fn texture_unit(&self) -> Option<u32> {
        self.unit
    }

    pub fn set_buffer_data(&mut self, buffer: Arc<VolumeBuffer>) {
        self.buffer = Some(buffer);
        self.dirty = true;
    }

    /// Force the next upload, e.g. after a label color change.
    pub fn mark_dirty(&mut self) {
        self.dirty = self.buffer.is_some();
    }

    pub fn buffer(&self) -> Option<&Arc<VolumeBuffer>> {
        self.buffer.as_ref()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn is_uploaded(&self) -> bool {
        self.texture.is_some()
    }

    pub fn texture_key(&self) -> Option<ResourceKey> {
        self.texture
    }

    /// Upload the buffer if it changed. Returns whether anything was sent.
    ///
    /// The previous texture is released before the new one is allocated.
    pub fn upload<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) -> Result<bool, RenderError> {
        if !self.dirty {
            return Ok(false);
        }
        let buffer = self
            .buffer
            .clone()
            .ok_or_else(|| RenderError::GpuResource(format!("{} has no data", self.label)))?;

        let caps = *backend.capabilities();
        let dims = buffer.dims();
        if !caps.fits(dims) {
            return Err(RenderError::GpuResource(format!(
                "{} volume {:?} exceeds the 3D texture limit of {}",
                self.label, dims, caps.max_texture_dimension_3d
            )));
        }

        if let Some(old) = self.texture.take() {
            backend.release_texture(old);
        }

        let format = TexelFormat::for_volume(&buffer, &caps);
        let texels = texel_data(&buffer, format);
        let desc = TextureDesc {
            label: self.label.clone(),
            dims: [dims[0] as u32, dims[1] as u32, dims[2] as u32],
            format,
        };
        let key = backend.create_volume_texture(&desc, &texels)?;

        debug!(
            texture = %self.label,
            dims = ?dims,
            format = ?format,
            bytes = texels.len(),
            "volume texture uploaded"
        );
        self.texture = Some(key);
        self.dirty = false;
        Ok(true)
    }

    /// Linear world-to-texture mapping, `point / volume_extent`.
    ///
    /// Unbounded: points outside the volume map outside `[0, 1]`. Vertex
    /// texture coordinates use this so interpolation across a slice stays
    /// linear; the sampler applies the border policy per fragment.
    pub fn linear_coordinate(&self, point: Vec3) -> Vec3 {
        match &self.buffer {
            Some(buffer) => point / Vec3::from(buffer.volume_micrometers()),
            None => Vec3::ZERO,
        }
    }

    /// Map a world point to texture space, applying the border policy.
    ///
    /// The volume's corners map to 0 and 1. Points outside the volume are
    /// pinned to the nearest edge texel center.
    pub fn texture_coordinate(&self, point: Vec3) -> Vec3 {
        let Some(buffer) = &self.buffer else {
            return Vec3::ZERO;
        };
        let raw = self.linear_coordinate(point);
        let dims = buffer.dims();

        match self.border {
            BorderPolicy::ClampToEdge => {
                let mut out = raw;
                for axis in 0..3 {
                    if !(0.0..=1.0).contains(&raw[axis]) {
                        let half_texel = 0.5 / dims[axis] as f32;
                        out[axis] = raw[axis].clamp(half_texel, 1.0 - half_texel);
                    }
                }
                out
            }
        }
    }

    pub fn bind_for_draw(&self) -> Result<TextureBinding, RenderError> {
        let unit = self.unit.ok_or_else(|| {
            RenderError::GpuResource(format!("{} has no texture unit", self.label))
        })?;
        let texture = self
            .texture
            .ok_or_else(|| RenderError::StaleHandle(format!("{} is not uploaded", self.label)))?;
        Ok(TextureBinding { unit, texture })
    }

    /// Release the GPU texture and drop the buffer.
    pub fn dispose<B: RenderBackend + ?Sized>(&mut self, backend: &mut B) {
        if let Some(key) = self.texture.take() {
            backend.release_texture(key);
            debug!(texture = %self.label, "volume texture released");
        }
        self.buffer = None;
        self.dirty = false;
    }
}

impl Drop for TextureMediator {
    fn drop(&mut self) {
        if self.texture.is_some() {
            warn!(texture = %self.label, "texture mediator dropped without dispose");
        }
    }
}

/// Bytes to upload for `buffer` in `format`.
fn texel_data(buffer: &VolumeBuffer, format: TexelFormat) -> Cow<'_, [u8]> {
    let texels = buffer.texel_bytes();
    if format == TexelFormat::R8Unorm && buffer.bytes_per_voxel() == 2 {
        // Keep the high byte of each little-endian sample.
        return Cow::Owned(texels.chunks_exact(2).map(|v| v[1]).collect());
    }
    texels
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::VoxelKind;
    use crate::io::ByteOrder;
    use crate::render::backend::{GpuCapabilities, RecordingBackend};

    fn volume(dims: [usize; 3], voxel: [f32; 3]) -> Arc<VolumeBuffer> {
        let len = dims.iter().product();
        Arc::new(
            VolumeBuffer::new(dims, 1, ByteOrder::LittleEndian, VoxelKind::Intensity, vec![7u8; len])
                .unwrap()
                .with_voxel_size(voxel),
        )
    }

    fn mediator(buffer: Arc<VolumeBuffer>) -> TextureMediator {
        let mut mediator = TextureMediator::new("signal");
        mediator.init(0);
        mediator.set_buffer_data(buffer);
        mediator
    }

    #[test]
    fn test_upload_is_idempotent() {
        let mut backend = RecordingBackend::default();
        let mut m = mediator(volume([4, 4, 2], [1.0; 3]));

        assert!(m.upload(&mut backend).unwrap());
        assert!(!m.upload(&mut backend).unwrap());
        assert_eq!(backend.texture_uploads(), 1);

        m.set_buffer_data(volume([2, 2, 2], [1.0; 3]));
        assert!(m.upload(&mut backend).unwrap());
        assert_eq!(backend.live_textures(), 1);

        m.dispose(&mut backend);
        assert_eq!(backend.live_textures(), 0);
        assert!(!m.is_uploaded());
    }

    #[test]
    fn test_oversize_volume_rejected() {
        let mut backend = RecordingBackend::new(GpuCapabilities {
            max_texture_dimension_3d: 8,
            supports_r16_unorm: false,
        });
        let mut m = mediator(volume([16, 2, 2], [1.0; 3]));
        assert!(matches!(
            m.upload(&mut backend),
            Err(RenderError::GpuResource(_))
        ));
        assert!(m.is_dirty());
    }

    #[test]
    fn test_texture_coordinates() {
        let m = mediator(volume([10, 20, 5], [2.0, 1.0, 4.0]));
        assert_eq!(m.texture_coordinate(Vec3::ZERO), Vec3::ZERO);
        assert_eq!(m.texture_coordinate(Vec3::new(20.0, 20.0, 20.0)), Vec3::ONE);
        assert_eq!(
            m.texture_coordinate(Vec3::new(10.0, 5.0, 10.0)),
            Vec3::new(0.5, 0.25, 0.5)
        );

        // One voxel outside on x pins to the first texel center.
        let outside = m.texture_coordinate(Vec3::new(-2.0, 21.0, 10.0));
        assert!((outside.x - 0.05).abs() < 1e-6);
        assert!((outside.y - (1.0 - 0.025)).abs() < 1e-6);
        assert_eq!(outside.z, 0.5);
    }

    #[test]
    fn test_linear_coordinate_is_unbounded() {
        let m = mediator(volume([10, 20, 5], [2.0, 1.0, 4.0]));
        let outside = m.linear_coordinate(Vec3::new(-2.0, 21.0, 10.0));
        assert!((outside - Vec3::new(-0.1, 1.05, 0.5)).length() < 1e-6);
        assert_eq!(TextureMediator::new("empty").linear_coordinate(Vec3::ONE), Vec3::ZERO);
    }

    #[test]
    fn test_bind_requires_upload() {
        let mut backend = RecordingBackend::default();
        let mut m = mediator(volume([2, 2, 2], [1.0; 3]));
        assert!(matches!(m.bind_for_draw(), Err(RenderError::StaleHandle(_))));

        m.upload(&mut backend).unwrap();
        let binding = m.bind_for_draw().unwrap();
        assert_eq!(binding.unit, 0);
        assert!(backend.texture(binding.texture).is_some());
        m.dispose(&mut backend);
    }

    #[test]
    fn test_sixteen_bit_downconverted_without_r16() {
        let mut backend = RecordingBackend::default();
        let data = vec![0x34, 0x12, 0xFF, 0xAB];
        let buffer = Arc::new(
            VolumeBuffer::new([2, 1, 1], 2, ByteOrder::LittleEndian, VoxelKind::Intensity, data)
                .unwrap(),
        );
        let mut m = mediator(buffer);
        m.upload(&mut backend).unwrap();

        let key = m.texture_key().unwrap();
        let texture = backend.texture(key).unwrap();
        assert_eq!(texture.desc.format, TexelFormat::R8Unorm);
        assert_eq!(texture.texels, vec![0x12, 0xAB]);
        m.dispose(&mut backend);
    }
}
