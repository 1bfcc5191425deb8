//! Camera math and pointer handling.

use glam::Vec3;
use volscope::scene::{
    apply_pointer, BoundingBox, CameraController, CameraPose, PointerButton, PointerEvent,
    Rotation, Viewport,
};

use super::test_utils::Lcg;

fn controller() -> CameraController {
    CameraController::new(CameraPose {
        viewport: Viewport::new(640, 480),
        scale: 50.0,
        ..Default::default()
    })
}

#[test]
fn test_thousand_random_moves_stay_orthonormal() {
    let mut rng = Lcg::new(0x5EED);
    let mut camera = controller();
    camera.set_constrain_up(false);

    for step in 0..1000 {
        let dx = rng.range(-400.0, 400.0);
        let dy = rng.range(-400.0, 400.0);
        if step % 2 == 0 {
            camera.orbit(dx, dy);
        } else {
            camera.rotate(dx, dy);
        }
    }

    let rotation = camera.pose().rotation;
    assert!(rotation.is_orthonormal(1e-5));
    assert!((rotation.matrix().determinant() - 1.0).abs() < 1e-5);
}

#[test]
fn test_no_op_moves_publish_nothing() {
    let mut camera = controller();
    let mut rx = camera.subscribe();
    rx.borrow_and_update();

    assert!(!camera.pan(0.0, 0.0, 0.0));
    assert!(!camera.rotate(0.0, 0.0));
    assert!(!camera.orbit(0.0, 0.0));
    assert!(!camera.zoom(1.0));
    assert!(!rx.has_changed().unwrap());

    assert!(camera.zoom(2.0));
    assert!(rx.has_changed().unwrap());
    assert_eq!(rx.borrow_and_update().scale, 25.0);
}

#[test]
fn test_reset_view_frames_the_box() {
    let mut camera = controller();
    camera.rotate(120.0, -40.0);
    camera.pan(10.0, 5.0, 0.0);

    let bounds = BoundingBox::from_extent(Vec3::new(10.0, 20.0, 4.0));
    assert!(camera.reset_view(&bounds));
    let pose = camera.pose();
    assert_eq!(pose.focus, Vec3::new(5.0, 10.0, 2.0));
    assert!((pose.scale - 21.0).abs() < 1e-4);
    assert_eq!(pose.rotation, Rotation::IDENTITY);
    assert!(!camera.reset_view(&bounds));
}

#[test]
fn test_quarter_orbit_turns_view_onto_x() {
    let mut camera = controller();
    // Half the viewport width at pi radians per screen is a quarter turn.
    camera.orbit(320.0, 0.0);
    let view = camera.pose().rotation.view_direction();
    assert!((view - Vec3::X).length() < 1e-5, "view {:?}", view);
}

#[test]
fn test_pointer_routes() {
    let mut camera = controller();
    let start = camera.pose();

    let drag = PointerEvent::Drag {
        button: PointerButton::Primary,
        dx: 30.0,
        dy: 0.0,
        shift: false,
    };
    assert!(apply_pointer(&mut camera, drag));
    assert_ne!(camera.pose().rotation, start.rotation);
    assert_eq!(camera.pose().focus, start.focus);

    let rotated = camera.pose();
    let pan = PointerEvent::Drag {
        button: PointerButton::Primary,
        dx: 48.0,
        dy: 0.0,
        shift: true,
    };
    assert!(apply_pointer(&mut camera, pan));
    assert_eq!(camera.pose().rotation, rotated.rotation);
    assert_ne!(camera.pose().focus, rotated.focus);

    assert!(apply_pointer(&mut camera, PointerEvent::Wheel { notches: -2.0 }));
    assert!(camera.pose().scale < rotated.scale);
    assert!(!apply_pointer(&mut camera, PointerEvent::Wheel { notches: 0.0 }));
}

#[test]
fn test_projection_stays_finite_at_extremes() {
    let mut camera = controller();
    let bounds = BoundingBox::from_extent(Vec3::new(1000.0, 1000.0, 5.0));
    camera.reset_view(&bounds);
    camera.zoom(1e4);

    let matrix = camera.pose().view_projection(&bounds);
    assert!(matrix.is_finite());
}
