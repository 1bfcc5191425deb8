//! Scene state: camera and viewer model.
//!
//! ```text
//!  pointer input ──▶ interaction ──▶ CameraController ──watch──▶ renderer
//!  UI setters ─────────────────────▶ VolumeModel ──────mpsc───▶ renderer
//! ```
//!
//! # Components
//!
//! - [`CameraPose`]: focus, rotation and scale, with the orbit/rotate/pan/zoom math
//! - [`CameraController`]: owns the live pose and publishes snapshots
//! - [`VolumeModel`]: crop, gamma, color mask and blend mode, publishing [`ModelEvent`]s
//! - [`apply_pointer`]: maps pointer drags and wheel notches to camera operations

pub mod camera;
pub mod interaction;
pub mod model;

pub use camera::{
    wheel_zoom_ratio, BoundingBox, CameraController, CameraPose, Rotation, Viewport,
    DEFAULT_FOV_Y, DEFAULT_RADIANS_PER_SCREEN, DEFAULT_WHEEL_SENSITIVITY, RESET_VIEW_MARGIN,
};
pub use interaction::{apply_pointer, PointerButton, PointerEvent};
pub use model::{BlendMode, CropBox, LoadedVolume, ModelEvent, VolumeModel, DEFAULT_GAMMA};
