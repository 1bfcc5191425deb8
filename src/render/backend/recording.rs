//! In-memory backend.
//!
//! Stores textures and label tables as plain bytes and keeps every submitted
//! frame, so renderer behavior can be checked without a GPU. Failures can be
//! injected per shader kind or for texture allocation.

use std::collections::{HashMap, HashSet};

use tracing::debug;

use super::{FramePacket, GpuCapabilities, ProgramInfo, RenderBackend, TextureDesc};
use crate::error::RenderError;
use crate::render::arena::{ResourceArena, ResourceKey};
use crate::render::shader::ShaderKind;

#[derive(Debug, Clone)]
pub struct RecordedTexture {
    pub desc: TextureDesc,
    pub texels: Vec<u8>,
}

#[derive(Default)]
pub struct RecordingBackend {
    caps: GpuCapabilities,
    textures: ResourceArena<RecordedTexture>,
    tables: ResourceArena<Vec<u32>>,
    frames: Vec<FramePacket>,
    compiled: Vec<ShaderKind>,
    texture_uploads: usize,
    failing_shaders: HashSet<ShaderKind>,
    missing_uniforms: HashMap<ShaderKind, Vec<&'static str>>,
    fail_allocations: bool,
}

impl RecordingBackend {
    pub fn new(caps: GpuCapabilities) -> Self {
        Self {
            caps,
            ..Default::default()
        }
    }

    /// Make `compile_program(kind)` fail with a compile error.
    pub fn with_failing_shader(mut self, kind: ShaderKind) -> Self {
        self.failing_shaders.insert(kind);
        self
    }

    /// Compile `kind` without exposing uniform `name`.
    pub fn without_uniform(mut self, kind: ShaderKind, name: &'static str) -> Self {
        self.missing_uniforms.entry(kind).or_default().push(name);
        self
    }

    pub fn fail_allocations(&mut self, fail: bool) {
        self.fail_allocations = fail;
    }

    pub fn frames(&self) -> &[FramePacket] {
        &self.frames
    }

    pub fn last_frame(&self) -> Option<&FramePacket> {
        self.frames.last()
    }

    /// Kinds passed to `compile_program`, in call order.
    pub fn compiled(&self) -> &[ShaderKind] {
        &self.compiled
    }

    pub fn texture(&self, key: ResourceKey) -> Option<&RecordedTexture> {
        self.textures.get(key)
    }

    pub fn label_table(&self, key: ResourceKey) -> Option<&[u32]> {
        self.tables.get(key).map(Vec::as_slice)
    }

    pub fn live_textures(&self) -> usize {
        self.textures.len()
    }

    pub fn live_label_tables(&self) -> usize {
        self.tables.len()
    }

    /// Successful texture uploads over the backend's lifetime.
    pub fn texture_uploads(&self) -> usize {
        self.texture_uploads
    }
}

impl RenderBackend for RecordingBackend {
    fn capabilities(&self) -> &GpuCapabilities {
        &self.caps
    }

    fn create_volume_texture(
        &mut self,
        desc: &TextureDesc,
        texels: &[u8],
    ) -> Result<ResourceKey, RenderError> {
        if self.fail_allocations {
            return Err(RenderError::GpuResource(format!(
                "allocation of {} refused",
                desc.label
            )));
        }
        if texels.len() != desc.byte_len() {
            return Err(RenderError::GpuResource(format!(
                "{} expects {} bytes, got {}",
                desc.label,
                desc.byte_len(),
                texels.len()
            )));
        }
        self.texture_uploads += 1;
        Ok(self.textures.insert(RecordedTexture {
            desc: desc.clone(),
            texels: texels.to_vec(),
        }))
    }

    fn release_texture(&mut self, key: ResourceKey) -> bool {
        self.textures.remove(key).is_some()
    }

    fn upload_label_table(&mut self, colors: &[u32]) -> Result<ResourceKey, RenderError> {
        Ok(self.tables.insert(colors.to_vec()))
    }

    fn release_label_table(&mut self, key: ResourceKey) -> bool {
        self.tables.remove(key).is_some()
    }

    fn compile_program(&mut self, kind: ShaderKind) -> Result<ProgramInfo, RenderError> {
        self.compiled.push(kind);
        if self.failing_shaders.contains(&kind) {
            return Err(RenderError::ShaderCompile {
                kind: kind.name(),
                message: "injected failure".into(),
            });
        }

        let missing = self.missing_uniforms.get(&kind);
        let uniforms = kind
            .required_uniforms()
            .iter()
            .filter(|name| !missing.is_some_and(|m| m.contains(*name)))
            .map(|name| name.to_string())
            .collect();
        Ok(ProgramInfo { kind, uniforms })
    }

    fn submit_frame(&mut self, frame: &FramePacket) -> Result<(), RenderError> {
        for pass in &frame.passes {
            let textures = std::iter::once(pass.signal).chain(pass.mask);
            for binding in textures {
                if !self.textures.contains(binding.texture) {
                    return Err(RenderError::StaleHandle(binding.texture.to_string()));
                }
            }
            if let Some(table) = pass.label_table {
                if !self.tables.contains(table) {
                    return Err(RenderError::StaleHandle(table.to_string()));
                }
            }
        }
        debug!(passes = frame.passes.len(), draws = frame.draw_count(), "frame recorded");
        self.frames.push(frame.clone());
        Ok(())
    }
}
