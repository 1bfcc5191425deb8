//! Viewer behavior: retries, failure isolation and renderer notifications.

use std::sync::Arc;
use std::time::Duration;

use volscope::error::{IoError, LoadError};
use volscope::format::ColorSpace;
use volscope::render::RecordingBackend;
use volscope::resolve::RetryPolicy;
use volscope::scene::Viewport;
use volscope::viewer::{ViewerOptions, ViewerRenderer, VolumeViewer};

use super::test_utils::{path_str, raw_stack, FlakyResolver, Scratch};

fn retrying_viewer() -> VolumeViewer {
    let (viewer, _link) = VolumeViewer::new(ViewerOptions {
        retry: RetryPolicy::new(3, Duration::ZERO),
        ..Default::default()
    });
    viewer
}

// =============================================================================
// Retries
// =============================================================================

#[tokio::test]
async fn test_transient_failures_are_retried() {
    let scratch = Scratch::new("retry");
    let path = scratch.write("stack.v3draw", &raw_stack([2, 2, 2, 1], &[9; 8]));
    let resolver = Arc::new(FlakyResolver::new(&path, 2, true));

    let mut viewer = retrying_viewer();
    assert!(viewer.load_volume("remote/stack.v3draw", None, Some(resolver.clone())).await);
    assert_eq!(resolver.calls(), 3);
    assert_eq!(viewer.model().volume().unwrap().signal.dims(), [2, 2, 2]);
}

#[tokio::test]
async fn test_retry_budget_exhausted() {
    let scratch = Scratch::new("exhausted");
    let path = scratch.write("stack.v3draw", &raw_stack([2, 2, 2, 1], &[9; 8]));
    let resolver = Arc::new(FlakyResolver::new(&path, 5, true));

    let mut viewer = retrying_viewer();
    let before = viewer.camera().pose();
    let err = viewer
        .try_load_volume("remote/stack.v3draw", None, Some(resolver.clone()))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        LoadError::LoadFailed {
            attempts: 3,
            source: IoError::Connection(_),
            ..
        }
    ));
    assert_eq!(resolver.calls(), 3);
    assert!(viewer.model().volume().is_none());
    assert_eq!(viewer.camera().pose(), before);
}

#[tokio::test]
async fn test_permanent_failure_is_not_retried() {
    let scratch = Scratch::new("permanent");
    let path = scratch.write("stack.v3draw", &raw_stack([2, 2, 2, 1], &[9; 8]));
    let resolver = Arc::new(FlakyResolver::new(&path, 1, false));

    let err = retrying_viewer()
        .try_load_volume("missing.v3draw", None, Some(resolver.clone()))
        .await
        .unwrap_err();
    assert!(matches!(err, LoadError::LoadFailed { attempts: 1, .. }));
    assert_eq!(resolver.calls(), 1);
}

#[tokio::test]
async fn test_failed_reload_keeps_previous_volume() {
    let scratch = Scratch::new("keep");
    let good = scratch.write("good.v3draw", &raw_stack([3, 2, 1, 1], &[4; 6]));
    let mut viewer = retrying_viewer();
    assert!(viewer.load_volume(path_str(&good), None, None).await);
    let pose = viewer.camera().pose();

    let resolver = Arc::new(FlakyResolver::new(&good, 1, false));
    assert!(!viewer.load_volume("other.v3draw", None, Some(resolver)).await);
    assert_eq!(viewer.model().volume().unwrap().signal.dims(), [3, 2, 1]);
    assert_eq!(viewer.camera().pose(), pose);
}

// =============================================================================
// Renderer notifications
// =============================================================================

#[tokio::test]
async fn test_model_changes_reach_the_renderer() {
    let scratch = Scratch::new("events");
    let path = scratch.write("stack.v3draw", &raw_stack([2, 2, 2, 1], &[30; 8]));
    let (mut viewer, link) = VolumeViewer::new(ViewerOptions {
        retry: RetryPolicy::none(),
        viewport: Viewport::new(64, 64),
        ..Default::default()
    });
    let mut renderer = ViewerRenderer::new(RecordingBackend::default(), link);
    assert!(renderer.needs_redraw());
    assert_eq!(renderer.render_frame().unwrap().passes, 0);
    assert!(!renderer.needs_redraw());

    viewer.load_volume(path_str(&path), None, None).await;
    assert!(renderer.needs_redraw());
    renderer.render_frame().unwrap();
    assert!(!renderer.needs_redraw());
    assert_eq!(renderer.backend().texture_uploads(), 1);

    viewer.refresh();
    assert_eq!(renderer.process_events(), 1);
    assert!(renderer.needs_redraw());
    renderer.render_frame().unwrap();
    assert_eq!(renderer.backend().texture_uploads(), 1);

    assert!(viewer.set_color_space(ColorSpace::Srgb));
    assert!(!viewer.set_color_space(ColorSpace::Srgb));
    renderer.render_frame().unwrap();
    assert_eq!(renderer.backend().texture_uploads(), 2);
    assert_eq!(renderer.backend().live_textures(), 1);

    assert!(viewer.clear());
    assert!(!viewer.clear());
    let stats = renderer.render_frame().unwrap();
    assert_eq!(stats.passes, 0);
    assert!(renderer.brick().is_none());
    assert_eq!(renderer.backend().live_textures(), 0);
}

#[tokio::test]
async fn test_resize_reaches_the_renderer() {
    let (mut viewer, link) = VolumeViewer::new(ViewerOptions::default());
    let mut renderer = ViewerRenderer::new(RecordingBackend::default(), link);
    renderer.render_frame().unwrap();

    assert!(viewer.resize(1024, 768));
    assert!(renderer.needs_redraw());
    assert!(!viewer.resize(1024, 768));
}
