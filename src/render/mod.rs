//! Volume rendering.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │               VolumeBrick                │
//! │  ┌────────────────┐  ┌────────────────┐  │
//! │  │TextureMediator │  │TextureMediator │  │
//! │  │   (signal)     │  │  (label mask)  │  │
//! │  └────────────────┘  └────────────────┘  │
//! │   slicer: view-aligned quads per frame   │
//! └────────────────────┬─────────────────────┘
//!                      │ BrickPass
//!                      ▼
//! ┌──────────────────────────────────────────┐
//! │  ShaderPipeline → RenderBackend (wgpu or │
//! │                   recording)             │
//! └──────────────────────────────────────────┘
//! ```
//!
//! # Components
//!
//! - [`TextureMediator`]: one GPU texture, dirty tracking and world-to-texture mapping
//! - [`VolumeBrick`]: signal plus optional label mask and label color table
//! - [`build_slices`]: principal-axis slice stack, back to front
//! - [`ShaderPipeline`]: lazy program compilation with pass-through fallback
//! - [`RenderBackend`]: the GPU seam, with [`WgpuBackend`] and [`RecordingBackend`]
//! - [`ResourceArena`]: generation-keyed handles for GPU resources

pub mod arena;
pub mod backend;
pub mod brick;
pub mod shader;
pub mod slicer;
pub mod texture;

pub use arena::{ResourceArena, ResourceKey};
pub use backend::{
    BrickPass, DrawCall, FramePacket, GpuCapabilities, ProgramInfo, RecordedTexture,
    RecordingBackend, RenderBackend, TexelFormat, TextureBinding, TextureDesc, Vertex,
    WgpuBackend, WgpuBackendOptions,
};
pub use brick::{DisplaySettings, VolumeBrick, MASK_TEXTURE_UNIT, SIGNAL_TEXTURE_UNIT};
pub use shader::{FrameState, ShaderKind, ShaderPipeline, UniformBlock};
pub use slicer::{build_slices, principal_axis, slice_count, SliceGeometry};
pub use texture::{BorderPolicy, TextureMediator};
