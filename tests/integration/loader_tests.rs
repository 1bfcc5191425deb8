//! Volume loading across formats, through the viewer.

use std::path::PathBuf;
use std::sync::Arc;

use glam::Vec3;
use volscope::codec::encode_pbd8;
use volscope::error::{FormatError, LoadError};
use volscope::format::{
    load_volume_bytes, ColorSpace, LabelMaskBuilder, MaskFileBuilder, VoxelKind,
};
use volscope::resolve::RetryPolicy;
use volscope::viewer::{ViewerOptions, VolumeViewer};

use super::test_utils::{
    chan_file, gif_frames, mask_file, path_str, pbd_stack, raw_header, raw_stack, tiff_stack,
    FlakyResolver, Scratch, RAW_MAGIC,
};

fn viewer() -> VolumeViewer {
    let (viewer, _link) = VolumeViewer::new(ViewerOptions {
        retry: RetryPolicy::none(),
        ..Default::default()
    });
    viewer
}

// =============================================================================
// Raw stacks
// =============================================================================

#[tokio::test]
async fn test_literal_stack_end_to_end() {
    let scratch = Scratch::new("literal");
    let bytes = raw_stack([2, 2, 3, 1], &[0x40; 12]);

    let volume = load_volume_bytes("stack.v3draw", &bytes).unwrap();
    assert_eq!(volume.dims(), [2, 2, 3]);
    assert_eq!(&volume.data()[..], &[0x40; 12]);

    let path = scratch.write("stack.v3draw", &bytes);
    let mut viewer = viewer();
    assert!(viewer.load_volume(path_str(&path), None, None).await);

    let pose = viewer.camera().pose();
    assert!((pose.focus - Vec3::new(1.0, 1.0, 1.5)).length() < 1e-5);
    assert!((pose.scale - 1.05 * 3.0).abs() < 1e-4);
}

#[tokio::test]
async fn test_pbd_stack_matches_source() {
    let scratch = Scratch::new("pbd");
    let payload: Vec<u8> = (0..4 * 3 * 5).map(|i| (i / 4) as u8).collect();
    let path = scratch.write(
        "stack.v3dpbd",
        &pbd_stack([4, 3, 5, 1], &encode_pbd8(&payload)),
    );

    let loaded = viewer()
        .try_load_volume(path_str(&path), None, None)
        .await
        .unwrap();
    assert_eq!(loaded.signal.dims(), [4, 3, 5]);
    assert_eq!(&loaded.signal.data()[..], &payload[..]);
    assert_eq!(loaded.signal.color_space(), ColorSpace::Linear);
}

#[tokio::test]
async fn test_multichannel_stack_is_packed() {
    let scratch = Scratch::new("rgb");
    let mut payload = vec![10u8; 4];
    payload.extend([20u8; 4]);
    payload.extend([30u8; 4]);
    let path = scratch.write("rgb.v3draw", &raw_stack([2, 2, 1, 3], &payload));

    let loaded = viewer()
        .try_load_volume(path_str(&path), None, None)
        .await
        .unwrap();
    assert_eq!(loaded.signal.kind(), VoxelKind::PackedRgba);
    assert_eq!(loaded.signal.color_space(), ColorSpace::Rgb);
    assert_eq!(&loaded.signal.data()[..4], &[10, 20, 30, 0]);
}

#[tokio::test]
async fn test_header_extension_mismatch() {
    let scratch = Scratch::new("mismatch");
    let path = scratch.write("stack.v3dpbd", &raw_stack([1, 1, 1, 1], &[7]));

    let err = viewer()
        .try_load_volume(path_str(&path), None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Format {
            source: FormatError::UnsupportedFormat { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_malformed_header_is_not_retried() {
    let scratch = Scratch::new("malformed");
    let mut bytes = raw_header(RAW_MAGIC, 1, [2, 2, 2, 1]);
    bytes.truncate(30);
    let path = scratch.write("short.v3draw", &bytes);

    let resolver = Arc::new(FlakyResolver::new(&path, 0, true));
    let (mut viewer, _link) = VolumeViewer::new(ViewerOptions {
        retry: RetryPolicy::new(3, std::time::Duration::ZERO),
        ..Default::default()
    });
    let err = viewer
        .try_load_volume("short.v3draw", None, Some(resolver.clone()))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Format {
            source: FormatError::MalformedHeader { .. },
            ..
        }
    ));
    assert_eq!(resolver.calls(), 1);
    assert!(viewer.model().volume().is_none());
}

#[tokio::test]
async fn test_huge_dimensions_fail_cleanly() {
    let scratch = Scratch::new("huge");
    let path = scratch.write("huge.v3draw", &raw_header(RAW_MAGIC, 1, [u32::MAX; 4]));

    let err = viewer()
        .try_load_volume(path_str(&path), None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LoadError::Format {
            source: FormatError::MalformedHeader { .. },
            ..
        }
    ));
}

#[tokio::test]
async fn test_unsupported_extension() {
    let scratch = Scratch::new("unsupported");
    let path = scratch.write("notes.txt", b"not a volume");
    let err = viewer()
        .try_load_volume(path_str(&path), None, None)
        .await
        .unwrap_err();
    assert!(err.to_string().contains("notes.txt"));
}

// =============================================================================
// Masks
// =============================================================================

#[tokio::test]
async fn test_mask_without_channels_renders_full_intensity() {
    let scratch = Scratch::new("mask");
    let path = scratch.write(
        "cell.mask",
        &mask_file([3, 2, 1], 0, &[(0, vec![(0, 2)]), (0, vec![(2, 3)])]),
    );

    let loaded = viewer()
        .try_load_volume(path_str(&path), None, None)
        .await
        .unwrap();
    assert_eq!(loaded.signal.kind(), VoxelKind::Intensity);
    assert_eq!(&loaded.signal.data()[..], &[255, 255, 0, 0, 0, 255]);
}

#[tokio::test]
async fn test_mask_with_channel_file() {
    let scratch = Scratch::new("chan");
    let path = scratch.write("cell.mask", &mask_file([2, 1, 1], 0, &[(0, vec![(0, 2)])]));
    // Planes in file order: red, green, blue.
    scratch.write("cell.chan", &chan_file(&[vec![1, 2], vec![3, 4], vec![5, 6]]));

    let loaded = viewer()
        .try_load_volume(path_str(&path), None, None)
        .await
        .unwrap();
    assert_eq!(loaded.signal.kind(), VoxelKind::PackedRgba);
    assert_eq!(&loaded.signal.data()[..], &[1, 3, 5, 0, 2, 4, 6, 0]);
}

#[tokio::test]
async fn test_mask_files_become_label_mask() {
    let scratch = Scratch::new("labels");
    let signal = scratch.write("signal.v3draw", &raw_stack([2, 2, 1, 1], &[50; 4]));
    let first = scratch.write("a.mask", &mask_file([2, 2, 1], 0, &[(0, vec![(0, 1)])]));
    let second = scratch.write("b.mask", &mask_file([2, 2, 1], 0, &[(1, vec![(1, 2)])]));

    let builder: Arc<dyn LabelMaskBuilder> =
        Arc::new(MaskFileBuilder::new(vec![first, second]));
    let loaded = viewer()
        .try_load_volume(path_str(&signal), Some(builder), None)
        .await
        .unwrap();

    let mask = loaded.mask.as_ref().unwrap();
    assert_eq!(mask.max_label(), 2);
    assert_eq!(mask.volume().value_at(0, 0, 0), Some(1));
    assert_eq!(mask.volume().value_at(1, 1, 0), Some(2));
    assert_eq!(mask.volume().value_at(1, 0, 0), Some(0));
}

#[tokio::test]
async fn test_mismatched_mask_fails_the_load() {
    let scratch = Scratch::new("badmask");
    let signal = scratch.write("signal.v3draw", &raw_stack([2, 2, 1, 1], &[50; 4]));
    let mask: PathBuf = scratch.write("a.mask", &mask_file([3, 1, 1], 0, &[(0, vec![(0, 1)])]));

    let builder: Arc<dyn LabelMaskBuilder> = Arc::new(MaskFileBuilder::new(vec![mask]));
    let mut viewer = viewer();
    assert!(!viewer.load_volume(path_str(&signal), Some(builder), None).await);
    assert!(viewer.model().volume().is_none());
}

// =============================================================================
// TIFF and movies
// =============================================================================

#[tokio::test]
async fn test_tiff_pages_become_slices() {
    let scratch = Scratch::new("tiff");
    let pages = vec![vec![1u8, 2, 3, 4], vec![5, 6, 7, 8], vec![9, 10, 11, 12]];
    let path = scratch.write("stack.tif", &tiff_stack(2, 2, &pages));

    let loaded = viewer()
        .try_load_volume(path_str(&path), None, None)
        .await
        .unwrap();
    assert_eq!(loaded.signal.dims(), [2, 2, 3]);
    assert_eq!(loaded.signal.value_at(1, 1, 2), Some(12));
}

#[tokio::test]
async fn test_gif_frames_are_srgb_slices() {
    let scratch = Scratch::new("gif");
    let path = scratch.write("movie.gif", &gif_frames(3, 2, &[[255, 0, 0], [0, 0, 255]]));

    let loaded = viewer()
        .try_load_volume(path_str(&path), None, None)
        .await
        .unwrap();
    assert_eq!(loaded.signal.dims(), [3, 2, 2]);
    assert_eq!(loaded.signal.kind(), VoxelKind::PackedRgba);
    assert_eq!(loaded.signal.color_space(), ColorSpace::Srgb);
}
