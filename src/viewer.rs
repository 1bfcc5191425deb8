//! Viewer facade.
//!
//! The viewer is split along the thread boundary:
//!
//! ```text
//! ┌─────────────────────────────┐        ModelEvent queue        ┌──────────────────────────┐
//! │        VolumeViewer         │ ─────────────────────────────▶ │      ViewerRenderer      │
//! │  load_volume / settings     │                                │  owns backend + bricks   │
//! │  pointer input → camera     │ ─────── watch<CameraPose> ───▶ │  render_frame()          │
//! └─────────────────────────────┘                                └──────────────────────────┘
//! ```
//!
//! [`VolumeViewer`] lives on the UI side. Loads resolve, read and decode
//! off the render thread and only publish the finished volume. The
//! [`ViewerRenderer`] drains events at the start of each frame and is the
//! only owner of GPU state.

use std::path::Path;
use std::sync::Arc;

use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::error::{FormatError, IoError, LoadError, RenderError};
use crate::format::{
    decode, detect_format, ColorSpace, LabelColorTable, LabelMaskBuffer, LabelMaskBuilder,
    VolumeBuffer, VolumeCache, VolumeFormat, VoxelKind,
};
use crate::io::ByteOrder;
use crate::render::{
    BrickPass, DisplaySettings, FramePacket, RenderBackend, ShaderKind, ShaderPipeline, VolumeBrick,
};
use crate::resolve::{FileResolver, LocalFileResolver, RetryFailure, RetryPolicy};
use crate::scene::{
    apply_pointer, BlendMode, BoundingBox, CameraController, CameraPose, LoadedVolume,
    ModelEvent, PointerEvent, Viewport, VolumeModel,
};

/// Background color of an empty frame.
pub const DEFAULT_CLEAR_COLOR: [f32; 4] = [0.0, 0.0, 0.0, 1.0];

// =============================================================================
// VolumeViewer
// =============================================================================

/// Construction options for [`VolumeViewer`].
#[derive(Clone)]
pub struct ViewerOptions {
    pub retry: RetryPolicy,
    pub cache: Option<Arc<VolumeCache>>,
    pub resolver: Arc<dyn FileResolver>,
    pub viewport: Viewport,
    /// Primary drags orbit about the up axis instead of rotating freely.
    pub constrain_up: bool,
}

impl Default for ViewerOptions {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::default(),
            cache: None,
            resolver: Arc::new(LocalFileResolver::new()),
            viewport: Viewport::default(),
            constrain_up: true,
        }
    }
}

/// Receiving ends handed to the render thread.
pub struct RendererLink {
    pub events: mpsc::UnboundedReceiver<ModelEvent>,
    pub camera: watch::Receiver<CameraPose>,
}

/// UI-side handle: loads volumes, holds display settings and drives the camera.
pub struct VolumeViewer {
    model: VolumeModel,
    camera: CameraController,
    resolver: Arc<dyn FileResolver>,
    retry: RetryPolicy,
    cache: Option<Arc<VolumeCache>>,
}

impl VolumeViewer {
    pub fn new(options: ViewerOptions) -> (Self, RendererLink) {
        let (model, events) = VolumeModel::new();
        let mut camera = CameraController::new(CameraPose {
            viewport: options.viewport,
            ..Default::default()
        });
        camera.set_constrain_up(options.constrain_up);
        let link = RendererLink {
            events,
            camera: camera.subscribe(),
        };

        let viewer = Self {
            model,
            camera,
            resolver: options.resolver,
            retry: options.retry,
            cache: options.cache,
        };
        (viewer, link)
    }

    pub fn model(&self) -> &VolumeModel {
        &self.model
    }

    pub fn camera(&self) -> &CameraController {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut CameraController {
        &mut self.camera
    }

    /// Load `name` and make it the displayed volume.
    ///
    /// Failures are logged and leave the current volume and camera untouched.
    pub async fn load_volume(
        &mut self,
        name: &str,
        mask_builder: Option<Arc<dyn LabelMaskBuilder>>,
        resolver: Option<Arc<dyn FileResolver>>,
    ) -> bool {
        match self.try_load_volume(name, mask_builder, resolver).await {
            Ok(_) => true,
            Err(err) => {
                error!(name, error = %err, "volume load failed");
                false
            }
        }
    }

    /// Like [`load_volume`](Self::load_volume) but returns the cause of failure.
    pub async fn try_load_volume(
        &mut self,
        name: &str,
        mask_builder: Option<Arc<dyn LabelMaskBuilder>>,
        resolver: Option<Arc<dyn FileResolver>>,
    ) -> Result<Arc<LoadedVolume>, LoadError> {
        let resolver = resolver.unwrap_or_else(|| Arc::clone(&self.resolver));
        let loaded = Arc::new(
            fetch_volume(name, resolver.as_ref(), &self.retry, self.cache.as_deref(), mask_builder)
                .await?,
        );

        let bounds = BoundingBox::from_extent(loaded.signal.volume_micrometers().into());
        self.model.set_volume(Arc::clone(&loaded));
        self.camera.reset_view(&bounds);
        info!(
            name,
            dims = ?loaded.signal.dims(),
            has_mask = loaded.mask.is_some(),
            "volume loaded"
        );
        Ok(loaded)
    }

    /// Drop the displayed volume.
    pub fn clear(&mut self) -> bool {
        self.model.clear()
    }

    /// Ask the renderer for a new frame without changing any state.
    pub fn refresh(&self) {
        self.model.request_refresh();
    }

    pub fn set_color_channel_mask(&mut self, r: f32, g: f32, b: f32) -> bool {
        self.model.set_color_mask(r, g, b)
    }

    pub fn set_gamma(&mut self, gamma: f32) -> bool {
        self.model.set_gamma(gamma)
    }

    /// Crop to a normalized sub-box of the volume.
    pub fn set_crop(&mut self, min: [f32; 3], max: [f32; 3]) -> bool {
        self.model.set_crop(min, max)
    }

    pub fn set_blend_mode(&mut self, blend: BlendMode) -> bool {
        self.model.set_blend_mode(blend)
    }

    pub fn set_color_space(&mut self, color_space: ColorSpace) -> bool {
        self.model.set_color_space(color_space)
    }

    /// Recolor the label mask overlay, if one is loaded.
    pub fn set_label_colors(&mut self, colors: LabelColorTable) -> bool {
        self.model.set_label_colors(colors)
    }

    /// Route pointer input to the camera. Returns whether a repaint is needed.
    pub fn on_pointer(&mut self, event: PointerEvent) -> bool {
        apply_pointer(&mut self.camera, event)
    }

    /// Frame the loaded volume. Does nothing while the viewer is empty.
    pub fn reset_view(&mut self) -> bool {
        let Some(volume) = self.model.volume() else {
            return false;
        };
        let bounds = BoundingBox::from_extent(volume.signal.volume_micrometers().into());
        self.camera.reset_view(&bounds)
    }

    pub fn resize(&mut self, width: u32, height: u32) -> bool {
        self.camera.set_viewport(Viewport::new(width, height))
    }
}

// =============================================================================
// Loading
// =============================================================================

fn load_failed(name: &str, failure: RetryFailure) -> LoadError {
    LoadError::LoadFailed {
        name: name.to_string(),
        attempts: failure.attempts,
        source: failure.error,
    }
}

fn format_error(name: &str, source: FormatError) -> LoadError {
    LoadError::Format {
        name: name.to_string(),
        source,
    }
}

async fn run_blocking<T, F>(name: &str, work: F) -> Result<T, LoadError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, FormatError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| LoadError::Worker {
            name: name.to_string(),
            message: err.to_string(),
        })?
        .map_err(|err| format_error(name, err))
}

/// Resolve, read, decode and pair a volume with its label mask.
async fn fetch_volume(
    name: &str,
    resolver: &dyn FileResolver,
    retry: &RetryPolicy,
    cache: Option<&VolumeCache>,
    mask_builder: Option<Arc<dyn LabelMaskBuilder>>,
) -> Result<LoadedVolume, LoadError> {
    let path = retry
        .run(name, || resolver.resolve(name))
        .await
        .map_err(|failure| load_failed(name, failure))?;
    debug!(name, path = %path.display(), "resolved volume");

    let cached = match cache {
        Some(cache) => cache.get(&path).await,
        None => None,
    };
    let signal = match cached {
        Some(volume) => {
            debug!(name, "volume cache hit");
            volume
        }
        None => {
            let volume = Arc::new(read_and_decode(name, &path, retry).await?);
            if let Some(cache) = cache {
                cache.put(path.clone(), Arc::clone(&volume)).await;
            }
            volume
        }
    };

    let (signal, mask) = match mask_builder {
        Some(builder) => {
            let source = Arc::clone(&signal);
            let mask = run_blocking(name, move || builder.build(&source)).await?;
            (signal, Some(Arc::new(mask)))
        }
        None if signal.kind() == VoxelKind::Label => {
            let source = Arc::clone(&signal);
            let (coverage, mask) = run_blocking(name, move || split_label_volume(&source)).await?;
            (Arc::new(coverage), Some(Arc::new(mask)))
        }
        None => (signal, None),
    };

    Ok(LoadedVolume {
        name: name.to_string(),
        signal,
        mask,
    })
}

async fn read_and_decode(
    name: &str,
    path: &Path,
    retry: &RetryPolicy,
) -> Result<VolumeBuffer, LoadError> {
    let file_name = path.to_string_lossy().into_owned();
    let format = detect_format(&file_name).map_err(|err| format_error(name, err))?;

    let data = retry
        .run(name, || async move { tokio::fs::read(path).await.map_err(IoError::from) })
        .await
        .map_err(|failure| load_failed(name, failure))?;

    let chan = if format == VolumeFormat::Mask {
        let chan_path = path.with_extension("chan");
        match tokio::fs::read(&chan_path).await {
            Ok(bytes) => Some(bytes),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %chan_path.display(), "mask has no channel file");
                None
            }
            Err(err) => {
                return Err(LoadError::LoadFailed {
                    name: name.to_string(),
                    attempts: 1,
                    source: err.into(),
                })
            }
        }
    } else {
        None
    };

    run_blocking(name, move || decode(&file_name, format, &data, chan.as_deref())).await
}

/// Split a label stack into a binary coverage signal and the label mask.
fn split_label_volume(labels: &VolumeBuffer) -> Result<(VolumeBuffer, LabelMaskBuffer), FormatError> {
    let coverage: Vec<u8> = labels
        .data()
        .chunks_exact(labels.bytes_per_voxel())
        .map(|voxel| if voxel.iter().any(|&b| b != 0) { 255 } else { 0 })
        .collect();
    let signal = VolumeBuffer::new(
        labels.dims(),
        1,
        ByteOrder::LittleEndian,
        VoxelKind::Intensity,
        coverage,
    )?
    .with_voxel_size(labels.voxel_micrometers());
    let mask = LabelMaskBuffer::new(labels.clone(), None)?;
    Ok((signal, mask))
}

// =============================================================================
// ViewerRenderer
// =============================================================================

/// Summary of one submitted frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameStats {
    pub passes: usize,
    pub draws: usize,
    /// Program actually used, after any fallback
    pub program: Option<ShaderKind>,
}

/// Render-thread owner of the backend and every GPU resource.
pub struct ViewerRenderer<B: RenderBackend> {
    backend: B,
    events: mpsc::UnboundedReceiver<ModelEvent>,
    camera: watch::Receiver<CameraPose>,
    pipeline: ShaderPipeline,
    brick: Option<VolumeBrick>,
    display: DisplaySettings,
    color_mask: [f32; 3],
    clear_color: [f32; 4],
    needs_redraw: bool,
}

impl<B: RenderBackend> ViewerRenderer<B> {
    pub fn new(backend: B, link: RendererLink) -> Self {
        Self {
            backend,
            events: link.events,
            camera: link.camera,
            pipeline: ShaderPipeline::new(),
            brick: None,
            display: DisplaySettings::default(),
            color_mask: [1.0; 3],
            clear_color: DEFAULT_CLEAR_COLOR,
            needs_redraw: true,
        }
    }

    pub fn with_clear_color(mut self, clear_color: [f32; 4]) -> Self {
        self.clear_color = clear_color;
        self
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn brick(&self) -> Option<&VolumeBrick> {
        self.brick.as_ref()
    }

    pub fn display(&self) -> DisplaySettings {
        self.display
    }

    /// Whether compositing was disabled by a shader failure.
    pub fn is_degraded(&self) -> bool {
        self.pipeline.is_degraded()
    }

    /// Apply every queued model event. Returns how many were handled.
    pub fn process_events(&mut self) -> usize {
        let mut handled = 0;
        while let Ok(event) = self.events.try_recv() {
            self.apply_event(event);
            handled += 1;
        }
        handled
    }

    fn apply_event(&mut self, event: ModelEvent) {
        match event {
            ModelEvent::VolumeLoaded(volume) => {
                self.dispose_brick();
                let mut brick = VolumeBrick::new(&volume);
                brick.set_color_mask(self.color_mask);
                debug!(volume = %volume.name, "brick created");
                self.brick = Some(brick);
            }
            ModelEvent::Cleared => self.dispose_brick(),
            ModelEvent::ColorMaskChanged(mask) => {
                self.color_mask = mask;
                if let Some(brick) = &mut self.brick {
                    brick.set_color_mask(mask);
                }
            }
            ModelEvent::GammaChanged(gamma) => self.display.gamma = gamma,
            ModelEvent::CropChanged(crop) => self.display.crop = crop,
            ModelEvent::BlendModeChanged(blend) => self.display.blend = blend,
            ModelEvent::ColorSpaceChanged(color_space) => {
                if let Some(brick) = &mut self.brick {
                    brick.set_color_space(color_space);
                }
            }
            ModelEvent::LabelColorsChanged(lookup) => {
                if let Some(brick) = &mut self.brick {
                    brick.set_label_colors(lookup);
                }
            }
            ModelEvent::RefreshRequested => {}
        }
        self.needs_redraw = true;
    }

    /// Whether state changed since the last frame.
    pub fn needs_redraw(&self) -> bool {
        self.needs_redraw || self.camera.has_changed().unwrap_or(false)
    }

    /// Drain events, upload what changed and submit one frame.
    ///
    /// A volume whose textures cannot be allocated is dropped and the frame
    /// is still drawn without it.
    pub fn render_frame(&mut self) -> Result<FrameStats, RenderError> {
        self.process_events();
        let pose = *self.camera.borrow_and_update();

        let mut packet = FramePacket::new(self.clear_color);
        let mut program = None;
        let mut failed = false;
        if let Some(brick) = &mut self.brick {
            match prepare_pass(&mut self.backend, &mut self.pipeline, brick, &pose, &self.display) {
                Ok(pass) => {
                    program = Some(pass.program);
                    packet.passes.push(pass);
                }
                Err(RenderError::GpuResource(message)) => {
                    error!(volume = %brick.name(), %message, "dropping volume after GPU failure");
                    failed = true;
                }
                Err(err) => return Err(err),
            }
        }
        if failed {
            self.dispose_brick();
        }

        self.backend.submit_frame(&packet)?;
        self.needs_redraw = false;
        Ok(FrameStats {
            passes: packet.passes.len(),
            draws: packet.draw_count(),
            program,
        })
    }

    fn dispose_brick(&mut self) {
        if let Some(mut brick) = self.brick.take() {
            brick.dispose(&mut self.backend);
        }
    }

    /// Release all GPU resources. The renderer can still draw empty frames.
    pub fn dispose(&mut self) {
        self.dispose_brick();
    }
}

impl<B: RenderBackend> Drop for ViewerRenderer<B> {
    fn drop(&mut self) {
        if self.brick.is_some() {
            warn!("renderer dropped with a live volume, releasing it");
            self.dispose_brick();
        }
    }
}

fn prepare_pass<B: RenderBackend>(
    backend: &mut B,
    pipeline: &mut ShaderPipeline,
    brick: &mut VolumeBrick,
    pose: &CameraPose,
    display: &DisplaySettings,
) -> Result<BrickPass, RenderError> {
    brick.upload(backend)?;
    let program = pipeline.program_for(backend, brick.preferred_program())?;
    let bounds = brick.bounds();
    brick.frame_pass(
        program,
        pose.rotation.view_direction(),
        pose.view_projection(&bounds),
        display,
    )
}
