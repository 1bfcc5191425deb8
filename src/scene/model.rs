//! Viewer state shared between the UI side and the render thread.
//!
//! The UI mutates a [`VolumeModel`]; each effective change is published as a
//! [`ModelEvent`] on an unbounded queue that the renderer drains at the start
//! of its next frame. Setters return whether anything changed, and unchanged
//! values publish nothing.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

use crate::format::{ColorSpace, LabelColorTable, LabelMaskBuffer, VolumeBuffer};

/// Default gamma: no correction
pub const DEFAULT_GAMMA: f32 = 1.0;

// =============================================================================
// Value types
// =============================================================================

/// How slices are combined in the framebuffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BlendMode {
    /// Keep the brightest sample along each ray
    #[default]
    MaximumIntensity,

    /// Back-to-front premultiplied "over" compositing
    Alpha,
}

impl BlendMode {
    pub const fn name(&self) -> &'static str {
        match self {
            BlendMode::MaximumIntensity => "maximum-intensity",
            BlendMode::Alpha => "alpha",
        }
    }
}

/// Visible sub-box in normalized texture coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CropBox {
    pub min: [f32; 3],
    pub max: [f32; 3],
}

impl CropBox {
    pub const FULL: CropBox = CropBox {
        min: [0.0; 3],
        max: [1.0; 3],
    };

    /// Clamp to the unit cube and order each axis. `None` if any bound is NaN.
    pub fn normalized(min: [f32; 3], max: [f32; 3]) -> Option<Self> {
        let mut out = CropBox::FULL;
        for axis in 0..3 {
            if min[axis].is_nan() || max[axis].is_nan() {
                return None;
            }
            let a = min[axis].clamp(0.0, 1.0);
            let b = max[axis].clamp(0.0, 1.0);
            out.min[axis] = a.min(b);
            out.max[axis] = a.max(b);
        }
        Some(out)
    }
}

impl Default for CropBox {
    fn default() -> Self {
        CropBox::FULL
    }
}

/// A decoded signal volume with its optional label mask.
#[derive(Debug, Clone)]
pub struct LoadedVolume {
    pub name: String,
    pub signal: Arc<VolumeBuffer>,
    pub mask: Option<Arc<LabelMaskBuffer>>,
}

/// State change published to the renderer.
#[derive(Debug, Clone)]
pub enum ModelEvent {
    VolumeLoaded(Arc<LoadedVolume>),
    Cleared,
    ColorMaskChanged([f32; 3]),
    GammaChanged(f32),
    CropChanged(CropBox),
    BlendModeChanged(BlendMode),
    ColorSpaceChanged(ColorSpace),
    /// Packed RGBA lookup indexed by label id.
    LabelColorsChanged(Vec<u32>),
    RefreshRequested,
}

// =============================================================================
// VolumeModel
// =============================================================================

pub struct VolumeModel {
    volume: Option<Arc<LoadedVolume>>,
    color_mask: [f32; 3],
    gamma: f32,
    crop: CropBox,
    blend: BlendMode,
    color_space: Option<ColorSpace>,
    events: mpsc::UnboundedSender<ModelEvent>,
}

impl VolumeModel {
    /// Create a model and the receiving end of its event queue.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ModelEvent>) {
        let (events, rx) = mpsc::unbounded_channel();
        let model = Self {
            volume: None,
            color_mask: [1.0; 3],
            gamma: DEFAULT_GAMMA,
            crop: CropBox::FULL,
            blend: BlendMode::default(),
            color_space: None,
            events,
        };
        (model, rx)
    }

    fn publish(&self, event: ModelEvent) {
        if self.events.send(event).is_err() {
            debug!("renderer is gone, model event dropped");
        }
    }

    pub fn volume(&self) -> Option<&Arc<LoadedVolume>> {
        self.volume.as_ref()
    }

    pub fn color_mask(&self) -> [f32; 3] {
        self.color_mask
    }

    pub fn gamma(&self) -> f32 {
        self.gamma
    }

    pub fn crop(&self) -> CropBox {
        self.crop
    }

    pub fn blend_mode(&self) -> BlendMode {
        self.blend
    }

    /// Color space in effect: the override if set, else the volume's own.
    pub fn color_space(&self) -> Option<ColorSpace> {
        self.color_space
            .or_else(|| self.volume.as_ref().map(|v| v.signal.color_space()))
    }

    /// Replace the current volume. Always publishes.
    pub fn set_volume(&mut self, volume: Arc<LoadedVolume>) {
        self.volume = Some(Arc::clone(&volume));
        self.color_space = None;
        self.publish(ModelEvent::VolumeLoaded(volume));
    }

    pub fn clear(&mut self) -> bool {
        if self.volume.take().is_none() {
            return false;
        }
        self.color_space = None;
        self.publish(ModelEvent::Cleared);
        true
    }

    /// Per-channel weights; negative and NaN weights become 0.
    pub fn set_color_mask(&mut self, r: f32, g: f32, b: f32) -> bool {
        let clean = |v: f32| if v.is_nan() { 0.0 } else { v.max(0.0) };
        let mask = [clean(r), clean(g), clean(b)];
        if mask == self.color_mask {
            return false;
        }
        self.color_mask = mask;
        self.publish(ModelEvent::ColorMaskChanged(mask));
        true
    }

    /// Gamma must be finite and positive.
    pub fn set_gamma(&mut self, gamma: f32) -> bool {
        if !gamma.is_finite() || gamma <= 0.0 || gamma == self.gamma {
            return false;
        }
        self.gamma = gamma;
        self.publish(ModelEvent::GammaChanged(gamma));
        true
    }

    pub fn set_crop(&mut self, min: [f32; 3], max: [f32; 3]) -> bool {
        let Some(crop) = CropBox::normalized(min, max) else {
            return false;
        };
        if crop == self.crop {
            return false;
        }
        self.crop = crop;
        self.publish(ModelEvent::CropChanged(crop));
        true
    }

    pub fn set_blend_mode(&mut self, blend: BlendMode) -> bool {
        if blend == self.blend {
            return false;
        }
        self.blend = blend;
        self.publish(ModelEvent::BlendModeChanged(blend));
        true
    }

    pub fn set_color_space(&mut self, color_space: ColorSpace) -> bool {
        if self.color_space() == Some(color_space) {
            return false;
        }
        self.color_space = Some(color_space);
        self.publish(ModelEvent::ColorSpaceChanged(color_space));
        true
    }

    /// Recolor the loaded label mask. Does nothing without one.
    pub fn set_label_colors(&mut self, colors: LabelColorTable) -> bool {
        let Some(volume) = &self.volume else {
            return false;
        };
        let Some(mask) = &volume.mask else {
            return false;
        };
        if mask.colors() == Some(&colors) {
            return false;
        }

        let mut recolored = LabelMaskBuffer::clone(mask);
        recolored.set_colors(Some(colors));
        let lookup = recolored.packed_colors();
        let updated = Arc::new(LoadedVolume {
            name: volume.name.clone(),
            signal: Arc::clone(&volume.signal),
            mask: Some(Arc::new(recolored)),
        });
        self.volume = Some(updated);
        self.publish(ModelEvent::LabelColorsChanged(lookup));
        true
    }

    pub fn request_refresh(&self) {
        self.publish(ModelEvent::RefreshRequested);
    }
}
