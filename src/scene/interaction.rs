//! Pointer input mapped onto camera operations.
//!
//! | input                         | camera operation              |
//! |-------------------------------|-------------------------------|
//! | primary drag                  | orbit (or free rotate)        |
//! | secondary / middle drag       | pan                           |
//! | primary drag with shift       | pan                           |
//! | wheel                         | zoom by `2^(-notches · sens)` |

use serde::{Deserialize, Serialize};

use super::camera::CameraController;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PointerButton {
    Primary,
    Secondary,
    Middle,
}

/// A pointer event in window pixels; `dy` grows downward.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PointerEvent {
    Drag {
        button: PointerButton,
        dx: f32,
        dy: f32,
        shift: bool,
    },
    Wheel {
        notches: f32,
    },
}

/// Apply `event` to the camera. Returns whether a repaint is needed.
pub fn apply_pointer(camera: &mut CameraController, event: PointerEvent) -> bool {
    match event {
        PointerEvent::Drag {
            button: PointerButton::Primary,
            dx,
            dy,
            shift: false,
        } => camera.drag(dx, dy),
        // The scene follows the pointer, so the focus moves the other way;
        // screen Y points down while camera Y points up.
        PointerEvent::Drag { dx, dy, .. } => camera.pan(-dx, dy, 0.0),
        PointerEvent::Wheel { notches } => camera.wheel(notches),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::camera::{CameraPose, Viewport};
    use glam::Vec3;

    fn controller() -> CameraController {
        CameraController::new(CameraPose {
            viewport: Viewport::new(100, 100),
            scale: 100.0,
            ..Default::default()
        })
    }

    #[test]
    fn test_secondary_drag_pans_against_pointer() {
        let mut camera = controller();
        let changed = apply_pointer(
            &mut camera,
            PointerEvent::Drag {
                button: PointerButton::Secondary,
                dx: 10.0,
                dy: 5.0,
                shift: false,
            },
        );
        assert!(changed);
        let focus = camera.pose().focus;
        assert!((focus - Vec3::new(-10.0, 5.0, 0.0)).length() < 1e-4);
    }

    #[test]
    fn test_primary_drag_rotates() {
        let mut camera = controller();
        let before = camera.pose().rotation;
        assert!(apply_pointer(
            &mut camera,
            PointerEvent::Drag {
                button: PointerButton::Primary,
                dx: 20.0,
                dy: 0.0,
                shift: false,
            },
        ));
        assert_ne!(camera.pose().rotation, before);
        assert_eq!(camera.pose().focus, Vec3::ZERO);
    }

    #[test]
    fn test_shift_drag_pans() {
        let mut camera = controller();
        apply_pointer(
            &mut camera,
            PointerEvent::Drag {
                button: PointerButton::Primary,
                dx: 0.0,
                dy: 10.0,
                shift: true,
            },
        );
        assert!(camera.pose().focus.y > 0.0);
    }

    #[test]
    fn test_wheel_zooms_and_zero_drag_is_noop() {
        let mut camera = controller();
        assert!(apply_pointer(&mut camera, PointerEvent::Wheel { notches: -4.0 }));
        assert!(camera.pose().scale < 100.0);

        assert!(!apply_pointer(&mut camera, PointerEvent::Wheel { notches: 0.0 }));
        assert!(!apply_pointer(
            &mut camera,
            PointerEvent::Drag {
                button: PointerButton::Middle,
                dx: 0.0,
                dy: 0.0,
                shift: false,
            },
        ));
    }
}
