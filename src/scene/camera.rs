//! Orbit camera math.
//!
//! A [`CameraPose`] is a focus point, a rotation and a scale (scene units
//! visible across the viewport height). The camera sits on the rotated +Z
//! axis behind the focus and looks down -Z, right-handed, the way glam's
//! `look_at_rh` expects.
//!
//! Every mutating operation reports whether the pose changed so callers
//! can skip repaints and notifications for no-op input.

use glam::{Mat3, Mat4, Quat, Vec3};
use tokio::sync::watch;
use tracing::trace;

/// Default vertical field of view: 30 degrees
pub const DEFAULT_FOV_Y: f32 = std::f32::consts::PI / 6.0;

/// Margin applied around the volume by `reset_view`.
pub const RESET_VIEW_MARGIN: f32 = 1.05;

/// Default drag sensitivity: half a turn per viewport
pub const DEFAULT_RADIANS_PER_SCREEN: f32 = std::f32::consts::PI;

/// Default wheel sensitivity in zoom doublings per notch
pub const DEFAULT_WHEEL_SENSITIVITY: f32 = 0.25;

// =============================================================================
// Rotation
// =============================================================================

/// Camera-to-world rotation held as a unit quaternion.
///
/// Renormalized after every composition so rounding never accumulates into
/// shear or scale.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rotation(Quat);

impl Rotation {
    pub const IDENTITY: Rotation = Rotation(Quat::IDENTITY);

    pub fn from_quat(q: Quat) -> Self {
        Rotation(q.normalize())
    }

    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        Rotation(Quat::from_axis_angle(axis.normalize(), angle))
    }

    #[inline]
    pub fn quat(&self) -> Quat {
        self.0
    }

    /// `self · other`, renormalized.
    pub fn then(&self, other: Rotation) -> Rotation {
        Rotation((self.0 * other.0).normalize())
    }

    pub fn apply(&self, v: Vec3) -> Vec3 {
        self.0 * v
    }

    pub fn matrix(&self) -> Mat3 {
        Mat3::from_quat(self.0)
    }

    /// World direction from the focus toward the eye.
    pub fn view_direction(&self) -> Vec3 {
        self.apply(Vec3::Z)
    }

    pub fn up(&self) -> Vec3 {
        self.apply(Vec3::Y)
    }

    /// Whether the matrix form is orthonormal with determinant +1.
    pub fn is_orthonormal(&self, tolerance: f32) -> bool {
        let m = self.matrix();
        let cols = [m.x_axis, m.y_axis, m.z_axis];
        for (i, a) in cols.iter().enumerate() {
            if (a.length() - 1.0).abs() > tolerance {
                return false;
            }
            for b in &cols[i + 1..] {
                if a.dot(*b).abs() > tolerance {
                    return false;
                }
            }
        }
        (m.determinant() - 1.0).abs() <= tolerance
    }
}

impl Default for Rotation {
    fn default() -> Self {
        Rotation::IDENTITY
    }
}

// =============================================================================
// Geometry helpers
// =============================================================================

/// Axis-aligned box in scene units (micrometers).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoundingBox {
    pub min: Vec3,
    pub max: Vec3,
}

impl BoundingBox {
    pub fn new(min: Vec3, max: Vec3) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    /// Box from the origin to `extent`.
    pub fn from_extent(extent: Vec3) -> Self {
        Self::new(Vec3::ZERO, extent)
    }

    pub fn center(&self) -> Vec3 {
        (self.min + self.max) * 0.5
    }

    pub fn extent(&self) -> Vec3 {
        self.max - self.min
    }

    pub fn max_extent(&self) -> f32 {
        self.extent().max_element()
    }

    /// Half the diagonal.
    pub fn radius(&self) -> f32 {
        self.extent().length() * 0.5
    }
}

/// Viewport size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Viewport {
    pub width: u32,
    pub height: u32,
}

impl Viewport {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn aspect(&self) -> f32 {
        self.width as f32 / self.height as f32
    }

    pub fn diagonal(&self) -> f32 {
        (self.width as f32).hypot(self.height as f32)
    }
}

impl Default for Viewport {
    fn default() -> Self {
        Viewport::new(800, 600)
    }
}

// =============================================================================
// CameraPose
// =============================================================================

/// Snapshot of the camera state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CameraPose {
    pub focus: Vec3,
    pub rotation: Rotation,
    /// Scene units spanned by the viewport height at the focus; always > 0.
    pub scale: f32,
    pub viewport: Viewport,
    pub fov_y: f32,
}

impl Default for CameraPose {
    fn default() -> Self {
        Self {
            focus: Vec3::ZERO,
            rotation: Rotation::IDENTITY,
            scale: 1.0,
            viewport: Viewport::default(),
            fov_y: DEFAULT_FOV_Y,
        }
    }
}

impl CameraPose {
    /// Translate by a pixel delta in camera space.
    pub fn pan(&mut self, dx: f32, dy: f32, dz: f32) -> bool {
        if dx == 0.0 && dy == 0.0 && dz == 0.0 {
            return false;
        }
        let pixels = Vec3::new(dx, dy, dz);
        if !pixels.is_finite() {
            return false;
        }
        let world = self.rotation.apply(pixels * (self.scale / self.viewport.height as f32));
        self.focus += world;
        true
    }

    /// Constrained orbit about the world Y axis.
    pub fn orbit(&mut self, dx: f32, dy: f32, radians_per_screen: f32) -> bool {
        self.orbit_about(Vec3::Y, dx, dy, radians_per_screen)
    }

    /// Azimuth about `up` (world), elevation about camera-local X.
    pub fn orbit_about(&mut self, up: Vec3, dx: f32, dy: f32, radians_per_screen: f32) -> bool {
        let azimuth = dx / self.viewport.width as f32 * radians_per_screen;
        let elevation = dy / self.viewport.height as f32 * radians_per_screen;
        if (azimuth == 0.0 && elevation == 0.0) || !azimuth.is_finite() || !elevation.is_finite()
        {
            return false;
        }
        if up.length_squared() == 0.0 {
            return false;
        }

        let az = Rotation::from_axis_angle(up, azimuth);
        let el = Rotation::from_axis_angle(Vec3::X, elevation);
        self.rotation = az.then(self.rotation.then(el));
        true
    }

    /// Free trackball rotation about the camera-space axis `(-dy, dx, 0)`.
    pub fn rotate(&mut self, dx: f32, dy: f32, radians_per_screen: f32) -> bool {
        let distance = dx.hypot(dy);
        if distance == 0.0 || radians_per_screen == 0.0 || !distance.is_finite() {
            return false;
        }
        let angle = distance / self.viewport.diagonal() * radians_per_screen;
        let axis = Vec3::new(-dy, dx, 0.0);
        self.rotation = self.rotation.then(Rotation::from_axis_angle(axis, angle));
        true
    }

    /// Divide the scale by `ratio`; ratios above 1 zoom in.
    pub fn zoom(&mut self, ratio: f32) -> bool {
        if !ratio.is_finite() || ratio <= 0.0 || ratio == 1.0 {
            return false;
        }
        let scale = self.scale / ratio;
        if !scale.is_finite() || scale <= 0.0 {
            return false;
        }
        self.scale = scale;
        true
    }

    /// Zoom by wheel notches; positive notches zoom out.
    pub fn zoom_wheel(&mut self, notches: f32, sensitivity: f32) -> bool {
        self.zoom(wheel_zoom_ratio(notches, sensitivity))
    }

    /// Frame `bounds`: center it, fit its largest side, face down -Z.
    pub fn reset_view(&mut self, bounds: &BoundingBox) -> bool {
        let before = *self;
        self.focus = bounds.center();
        let extent = bounds.max_extent();
        if extent.is_finite() && extent > 0.0 {
            self.scale = RESET_VIEW_MARGIN * extent;
        }
        self.rotation = Rotation::IDENTITY;
        *self != before
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        if self.viewport == viewport {
            return false;
        }
        self.viewport = viewport;
        true
    }

    /// Distance from eye to focus that makes `scale` fill the viewport height.
    pub fn eye_distance(&self) -> f32 {
        self.scale / (2.0 * (self.fov_y * 0.5).tan())
    }

    pub fn eye(&self) -> Vec3 {
        self.focus + self.rotation.view_direction() * self.eye_distance()
    }

    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.focus, self.rotation.up())
    }

    /// Perspective projection with clip planes enclosing `scene`.
    pub fn projection_matrix(&self, scene: &BoundingBox) -> Mat4 {
        let distance = (self.eye() - scene.center()).length();
        let radius = scene.radius().max(self.scale);
        let far = distance + radius * 1.5;
        let near = (distance - radius * 1.5).max(far * 1e-4);
        Mat4::perspective_rh(self.fov_y, self.viewport.aspect(), near, far)
    }

    pub fn view_projection(&self, scene: &BoundingBox) -> Mat4 {
        self.projection_matrix(scene) * self.view_matrix()
    }
}

/// `2^(-notches · sensitivity)`
pub fn wheel_zoom_ratio(notches: f32, sensitivity: f32) -> f32 {
    (-notches * sensitivity).exp2()
}

// =============================================================================
// CameraController
// =============================================================================

/// Owns the live pose and publishes every change to the renderer.
///
/// The renderer holds a `watch::Receiver` and reads a whole pose per frame,
/// so it never sees a half-applied update.
pub struct CameraController {
    pose: CameraPose,
    publisher: watch::Sender<CameraPose>,
    constrain_up: bool,
    up: Vec3,
    radians_per_screen: f32,
    wheel_sensitivity: f32,
}

impl CameraController {
    pub fn new(pose: CameraPose) -> Self {
        let (publisher, _) = watch::channel(pose);
        Self {
            pose,
            publisher,
            constrain_up: true,
            up: Vec3::Y,
            radians_per_screen: DEFAULT_RADIANS_PER_SCREEN,
            wheel_sensitivity: DEFAULT_WHEEL_SENSITIVITY,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<CameraPose> {
        self.publisher.subscribe()
    }

    pub fn pose(&self) -> CameraPose {
        self.pose
    }

    /// Drags orbit about the up axis when set, otherwise rotate freely.
    pub fn set_constrain_up(&mut self, constrain: bool) {
        self.constrain_up = constrain;
    }

    pub fn constrain_up(&self) -> bool {
        self.constrain_up
    }

    /// Azimuth axis for constrained orbits. Zero vectors are ignored.
    pub fn set_up_axis(&mut self, up: Vec3) {
        if up.length_squared() > 0.0 && up.is_finite() {
            self.up = up.normalize();
        }
    }

    pub fn up_axis(&self) -> Vec3 {
        self.up
    }

    pub fn set_radians_per_screen(&mut self, radians: f32) {
        self.radians_per_screen = radians;
    }

    pub fn set_wheel_sensitivity(&mut self, sensitivity: f32) {
        self.wheel_sensitivity = sensitivity;
    }

    fn publish_if(&mut self, changed: bool) -> bool {
        if changed {
            trace!(scale = self.pose.scale, focus = ?self.pose.focus, "camera moved");
            self.publisher.send_replace(self.pose);
        }
        changed
    }

    pub fn pan(&mut self, dx: f32, dy: f32, dz: f32) -> bool {
        let changed = self.pose.pan(dx, dy, dz);
        self.publish_if(changed)
    }

    pub fn orbit(&mut self, dx: f32, dy: f32) -> bool {
        let changed = self
            .pose
            .orbit_about(self.up, dx, dy, self.radians_per_screen);
        self.publish_if(changed)
    }

    pub fn rotate(&mut self, dx: f32, dy: f32) -> bool {
        let changed = self.pose.rotate(dx, dy, self.radians_per_screen);
        self.publish_if(changed)
    }

    /// Rotation drag, orbit or free depending on `constrain_up`.
    pub fn drag(&mut self, dx: f32, dy: f32) -> bool {
        if self.constrain_up {
            self.orbit(dx, dy)
        } else {
            self.rotate(dx, dy)
        }
    }

    pub fn zoom(&mut self, ratio: f32) -> bool {
        let changed = self.pose.zoom(ratio);
        self.publish_if(changed)
    }

    pub fn wheel(&mut self, notches: f32) -> bool {
        let changed = self.pose.zoom_wheel(notches, self.wheel_sensitivity);
        self.publish_if(changed)
    }

    pub fn reset_view(&mut self, bounds: &BoundingBox) -> bool {
        let changed = self.pose.reset_view(bounds);
        self.publish_if(changed)
    }

    pub fn set_viewport(&mut self, viewport: Viewport) -> bool {
        let changed = self.pose.set_viewport(viewport);
        self.publish_if(changed)
    }
}

impl Default for CameraController {
    fn default() -> Self {
        Self::new(CameraPose::default())
    }
}

// =============================================================================
// Tests
// =============================================================================
