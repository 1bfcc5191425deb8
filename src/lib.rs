//! # volscope
//!
//! The core of a volumetric microscopy viewer: it decodes compressed voxel
//! stacks, loads several volume formats into one canonical buffer and
//! renders them as view-aligned slice stacks.
//!
//! ## Features
//!
//! - **PBD8 codec**: streaming decoder for literal, 2-bit difference and repeat runs
//! - **Format support**: raw stacks, ray-run masks, TIFF/LSM stacks and GIF frames
//! - **Resolvers**: local files or S3 downloads with bounded retry
//! - **Camera**: quaternion orbit, free rotation, pan and zoom published as snapshots
//! - **Rendering**: slice compositing with color masks, gamma, crop and label tinting
//!
//! ## Architecture
//!
//! - [`codec`] - PBD8 decoder and reference encoder
//! - [`mod@format`] - per-format loaders producing a [`VolumeBuffer`]
//! - [`resolve`] - resource name to local path
//! - [`scene`] - camera math and the viewer model
//! - [`render`] - textures, slicing, shaders and GPU backends
//! - [`viewer`] - the UI-side [`VolumeViewer`] and render-side [`ViewerRenderer`]
//! - [`config`] - CLI configuration
//!
//! ## Example
//!
//! ```rust,no_run
//! use volscope::{RecordingBackend, ViewerOptions, ViewerRenderer, VolumeViewer};
//!
//! #[tokio::main]
//! async fn main() {
//!     let (mut viewer, link) = VolumeViewer::new(ViewerOptions::default());
//!     let mut renderer = ViewerRenderer::new(RecordingBackend::default(), link);
//!
//!     if viewer.load_volume("stack.v3dpbd", None, None).await {
//!         viewer.set_gamma(1.5);
//!         renderer.render_frame().unwrap();
//!     }
//! }
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod io;
pub mod render;
pub mod resolve;
pub mod scene;
pub mod viewer;

// Re-export commonly used types
pub use codec::{decode_pbd8, encode_pbd8, Pbd8Decoder};
pub use config::{Cli, Command, CompressConfig, InfoConfig, RenderConfig, SourceOptions};
pub use error::{FormatError, IoError, LoadError, RenderError, TiffError};
pub use format::{
    decode, detect_format, load_volume_bytes, load_volume_file, read_raw_volume,
    write_raw_volume, ColorSpace, Encoding, LabelColorTable, LabelMaskBuffer, LabelMaskBuilder,
    LabelVolumeFileBuilder, MaskFileBuilder, RawHeader, VolumeBuffer, VolumeCache, VolumeFormat,
    VoxelKind,
};
pub use io::{create_s3_client, ByteOrder, RangeReader, S3RangeReader};
pub use render::{
    DisplaySettings, GpuCapabilities, RecordingBackend, RenderBackend, ShaderKind,
    ShaderPipeline, TextureMediator, VolumeBrick, WgpuBackend, WgpuBackendOptions,
};
pub use resolve::{FileResolver, LocalFileResolver, RetryPolicy, S3FileResolver};
pub use scene::{
    BlendMode, BoundingBox, CameraController, CameraPose, CropBox, LoadedVolume, ModelEvent,
    PointerButton, PointerEvent, Rotation, Viewport, VolumeModel,
};
pub use viewer::{FrameStats, RendererLink, ViewerOptions, ViewerRenderer, VolumeViewer};
