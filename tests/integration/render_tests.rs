//! Rendering through the recording backend.

use std::sync::Arc;

use glam::Vec3;
use volscope::error::RenderError;
use volscope::format::{
    LabelColorTable, LabelMaskBuilder, MaskFileBuilder, VolumeBuffer, VoxelKind,
};
use volscope::io::ByteOrder;
use volscope::render::{RecordingBackend, ShaderKind, TextureMediator};
use volscope::resolve::RetryPolicy;
use volscope::scene::{BlendMode, Viewport};
use volscope::viewer::{ViewerOptions, ViewerRenderer, VolumeViewer};

use super::test_utils::{mask_file, path_str, raw_stack, Scratch};

fn pair(backend: RecordingBackend) -> (VolumeViewer, ViewerRenderer<RecordingBackend>) {
    let (viewer, link) = VolumeViewer::new(ViewerOptions {
        retry: RetryPolicy::none(),
        viewport: Viewport::new(200, 100),
        ..Default::default()
    });
    (viewer, ViewerRenderer::new(backend, link))
}

#[tokio::test]
async fn test_slice_count_follows_principal_axis() {
    let scratch = Scratch::new("slices");
    let path = scratch.write("stack.v3draw", &raw_stack([8, 4, 6, 1], &[90; 8 * 4 * 6]));
    let (mut viewer, mut renderer) = pair(RecordingBackend::default());
    assert!(viewer.load_volume(path_str(&path), None, None).await);

    let stats = renderer.render_frame().unwrap();
    assert_eq!(stats.draws, 6);

    // A quarter turn about the up axis puts the view along X.
    viewer.camera_mut().orbit(100.0, 0.0);
    let stats = renderer.render_frame().unwrap();
    assert_eq!(stats.draws, 8);
    renderer.dispose();
}

#[test]
fn test_texture_coordinates_map_corners_and_pin_overhang() {
    let volume = VolumeBuffer::new(
        [4, 2, 8],
        1,
        ByteOrder::LittleEndian,
        VoxelKind::Intensity,
        vec![0u8; 64],
    )
    .unwrap()
    .with_voxel_size([0.5, 1.0, 2.0]);
    let mut mediator = TextureMediator::new("signal");
    mediator.init(0);
    mediator.set_buffer_data(Arc::new(volume));

    assert_eq!(mediator.texture_coordinate(Vec3::ZERO), Vec3::ZERO);
    assert_eq!(mediator.texture_coordinate(Vec3::new(2.0, 2.0, 16.0)), Vec3::ONE);

    let outside = mediator.texture_coordinate(Vec3::new(-0.5, 3.0, 8.0));
    assert_eq!(outside, Vec3::new(0.125, 0.75, 0.5));
}

#[tokio::test]
async fn test_submitted_slices_map_volume_faces_to_unit_range() {
    let scratch = Scratch::new("linear");
    let path = scratch.write("stack.v3draw", &raw_stack([4, 2, 2, 1], &[60; 16]));
    let (mut viewer, mut renderer) = pair(RecordingBackend::default());
    viewer.load_volume(path_str(&path), None, None).await;
    renderer.render_frame().unwrap();

    let pass = &renderer.backend().last_frame().unwrap().passes[0];
    let [left, right, ..] = pass.draws[0].vertices;
    let u_at = |x: f32| {
        let t = (x - left.position[0]) / (right.position[0] - left.position[0]);
        left.tex_coord[0] + t * (right.tex_coord[0] - left.tex_coord[0])
    };
    assert!(u_at(0.0).abs() < 1e-6, "u at x=0: {}", u_at(0.0));
    assert!((u_at(4.0) - 1.0).abs() < 1e-6, "u at x=4: {}", u_at(4.0));
    renderer.dispose();
}

#[tokio::test]
async fn test_display_settings_reach_uniforms() {
    let scratch = Scratch::new("uniforms");
    let path = scratch.write("stack.v3draw", &raw_stack([2, 2, 2, 1], &[120; 8]));
    let (mut viewer, mut renderer) = pair(RecordingBackend::default());
    viewer.load_volume(path_str(&path), None, None).await;

    viewer.set_color_channel_mask(0.0, 1.0, 0.25);
    viewer.set_gamma(1.8);
    viewer.set_crop([0.25, 0.0, 0.0], [0.75, 1.0, 0.5]);
    viewer.set_blend_mode(BlendMode::Alpha);
    renderer.render_frame().unwrap();

    let pass = &renderer.backend().last_frame().unwrap().passes[0];
    assert_eq!(pass.program, ShaderKind::ColorFilter);
    assert_eq!(pass.blend, BlendMode::Alpha);
    assert_eq!(pass.uniforms.color_mask, [0.0, 1.0, 0.25]);
    assert_eq!(pass.uniforms.gamma, 1.8);
    assert_eq!(pass.uniforms.crop_min, [0.25, 0.0, 0.0]);
    assert_eq!(pass.uniforms.crop_max, [0.75, 1.0, 0.5]);
    assert_eq!(pass.uniforms.has_mask, 0);
    renderer.dispose();
}

#[tokio::test]
async fn test_label_mask_uses_composite_program() {
    let scratch = Scratch::new("composite");
    let signal = scratch.write("signal.v3draw", &raw_stack([2, 2, 1, 1], &[200; 4]));
    let mask = scratch.write("a.mask", &mask_file([2, 2, 1], 0, &[(0, vec![(0, 2)])]));
    let builder: Arc<dyn LabelMaskBuilder> = Arc::new(MaskFileBuilder::new(vec![mask]));

    let (mut viewer, mut renderer) = pair(RecordingBackend::default());
    assert!(viewer.load_volume(path_str(&signal), Some(builder), None).await);
    let stats = renderer.render_frame().unwrap();
    assert_eq!(stats.program, Some(ShaderKind::VolumeComposite));

    let frame = renderer.backend().last_frame().unwrap();
    let pass = &frame.passes[0];
    assert_eq!(pass.uniforms.has_mask, 1);
    assert_eq!(pass.uniforms.label_count, 2);
    assert!(pass.mask.is_some());
    let table = renderer.backend().label_table(pass.label_table.unwrap()).unwrap();
    assert_eq!(table.len(), 2);
    assert_eq!(renderer.backend().live_textures(), 2);

    viewer.clear();
    renderer.render_frame().unwrap();
    assert_eq!(renderer.backend().live_textures(), 0);
    assert_eq!(renderer.backend().live_label_tables(), 0);
}

#[tokio::test]
async fn test_label_recolor_reuploads_table() {
    let scratch = Scratch::new("recolor");
    let signal = scratch.write("signal.v3draw", &raw_stack([2, 2, 1, 1], &[200; 4]));
    let mask = scratch.write("a.mask", &mask_file([2, 2, 1], 0, &[(0, vec![(0, 2)])]));
    let builder: Arc<dyn LabelMaskBuilder> = Arc::new(MaskFileBuilder::new(vec![mask]));

    let (mut viewer, mut renderer) = pair(RecordingBackend::default());
    assert!(viewer.load_volume(path_str(&signal), Some(builder), None).await);
    renderer.render_frame().unwrap();

    let mut colors = LabelColorTable::new();
    colors.insert(1, [0, 0, 255]);
    assert!(viewer.set_label_colors(colors.clone()));
    assert!(!viewer.set_label_colors(colors));
    renderer.render_frame().unwrap();

    let pass = &renderer.backend().last_frame().unwrap().passes[0];
    let table = renderer.backend().label_table(pass.label_table.unwrap()).unwrap();
    assert_eq!(table[1], u32::from_le_bytes([0, 0, 255, 255]));
    assert_eq!(renderer.backend().live_label_tables(), 1);
    renderer.dispose();
}

#[tokio::test]
async fn test_missing_uniform_is_fatal() {
    let scratch = Scratch::new("uniform");
    let path = scratch.write("stack.v3draw", &raw_stack([2, 2, 2, 1], &[1; 8]));
    let backend = RecordingBackend::default().without_uniform(ShaderKind::ColorFilter, "gamma");
    let (mut viewer, mut renderer) = pair(backend);
    viewer.load_volume(path_str(&path), None, None).await;

    let err = renderer.render_frame().unwrap_err();
    assert!(matches!(
        err,
        RenderError::MissingUniform {
            name: "gamma",
            ..
        }
    ));
    renderer.dispose();
}

#[tokio::test]
async fn test_compile_failure_degrades_for_the_session() {
    let scratch = Scratch::new("degrade");
    let path = scratch.write("stack.v3draw", &raw_stack([2, 2, 2, 1], &[1; 8]));
    let backend = RecordingBackend::default().with_failing_shader(ShaderKind::ColorFilter);
    let (mut viewer, mut renderer) = pair(backend);
    viewer.load_volume(path_str(&path), None, None).await;

    assert_eq!(renderer.render_frame().unwrap().program, Some(ShaderKind::PassThrough));
    viewer.set_gamma(2.0);
    assert_eq!(renderer.render_frame().unwrap().program, Some(ShaderKind::PassThrough));
    assert!(renderer.is_degraded());
    renderer.dispose();
}
