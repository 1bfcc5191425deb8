//! volscope - headless driver for the volume viewer core.
//!
//! `info` inspects a volume, `render` draws it offscreen to a PNG and
//! `compress` re-encodes it as PBD8.

use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use volscope::{
    config::{Cli, Command, CompressConfig, InfoConfig, RenderConfig, SourceOptions},
    create_s3_client,
    format::{
        detect_format, load_volume_file, read_raw_volume, write_raw_volume, Encoding,
        LabelColorTable, LabelMaskBuilder, LabelVolumeFileBuilder, MaskFileBuilder, VolumeBuffer,
        VolumeFormat,
    },
    render::{WgpuBackend, WgpuBackendOptions},
    resolve::{parse_s3_url, FileResolver, LocalFileResolver, S3FileResolver},
    scene::{LoadedVolume, Viewport, DEFAULT_RADIANS_PER_SCREEN},
    viewer::{VolumeViewer, ViewerOptions, ViewerRenderer},
};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.into_command() {
        Command::Info(config) => run_info(config).await,
        Command::Render(config) => run_render(config).await,
        Command::Compress(config) => run_compress(config).await,
    }
}

/// Initialize the tracing/logging subsystem.
fn init_logging(verbose: bool) {
    let env_filter = if verbose {
        "volscope=debug"
    } else {
        "volscope=info"
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| env_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

// =============================================================================
// Shared setup
// =============================================================================

/// Local files, or S3 downloads when a bucket or `s3://` name is given.
async fn build_resolver(source: &SourceOptions, name: &str) -> Result<Arc<dyn FileResolver>, String> {
    if !source.uses_s3(name) {
        return Ok(Arc::new(LocalFileResolver::new()));
    }

    let bucket = match &source.s3_bucket {
        Some(bucket) => bucket.clone(),
        None => parse_s3_url(name).map_err(|e| e.to_string())?.bucket,
    };
    info!(bucket = %bucket, region = %source.s3_region, "using S3 resolver");
    if let Some(endpoint) = &source.s3_endpoint {
        info!(endpoint = %endpoint, "custom S3 endpoint");
    }

    let client = create_s3_client(source.s3_endpoint.as_deref(), &source.s3_region).await;
    let mut resolver = S3FileResolver::new(client, bucket, &source.cache_dir);
    if let Some(prefix) = &source.s3_prefix {
        resolver = resolver.with_prefix(prefix.clone());
    }
    Ok(Arc::new(resolver))
}

/// `.mask` files combine into one label volume; any other file is a label stack.
fn build_mask_builder(source: &SourceOptions) -> Result<Option<Arc<dyn LabelMaskBuilder>>, String> {
    let colors = match &source.label_colors {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
            Some(LabelColorTable::from_json(&text).map_err(|e| e.to_string())?)
        }
        None => None,
    };

    let all_masks = source
        .masks
        .iter()
        .all(|p| matches!(detect_format(&p.to_string_lossy()), Ok(VolumeFormat::Mask)));

    let builder: Arc<dyn LabelMaskBuilder> = match source.masks.as_slice() {
        [] => {
            if colors.is_some() {
                warn!("label colors given without a mask, ignoring them");
            }
            return Ok(None);
        }
        [stack] if !all_masks => {
            let builder = LabelVolumeFileBuilder::new(stack);
            Arc::new(match colors {
                Some(colors) => builder.with_colors(colors),
                None => builder,
            })
        }
        paths if all_masks => {
            let builder = MaskFileBuilder::new(paths.to_vec());
            Arc::new(match colors {
                Some(colors) => builder.with_colors(colors),
                None => builder,
            })
        }
        _ => return Err("combine either .mask files or a single label stack".to_string()),
    };
    Ok(Some(builder))
}

async fn load_into(
    viewer: &mut VolumeViewer,
    name: &str,
    source: &SourceOptions,
) -> Result<Arc<LoadedVolume>, String> {
    let resolver = build_resolver(source, name).await?;
    let mask_builder = build_mask_builder(source)?;
    viewer
        .try_load_volume(name, mask_builder, Some(resolver))
        .await
        .map_err(|e| e.to_string())
}

// =============================================================================
// Info Command
// =============================================================================

/// Minimum, maximum and mean voxel value of the first channel.
fn value_range(volume: &VolumeBuffer) -> (u32, u32, f64) {
    let [sx, sy, sz] = volume.dims();
    let mut min = u32::MAX;
    let mut max = 0;
    let mut sum = 0u64;
    for z in 0..sz {
        for y in 0..sy {
            for x in 0..sx {
                let value = volume.value_at(x, y, z).unwrap_or(0);
                let value = if volume.channels() > 1 { value & 0xFF } else { value };
                min = min.min(value);
                max = max.max(value);
                sum += u64::from(value);
            }
        }
    }
    (min, max, sum as f64 / volume.voxel_count().max(1) as f64)
}

async fn run_info(config: InfoConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let (mut viewer, _link) = VolumeViewer::new(ViewerOptions {
        retry: config.source.retry_policy(),
        ..Default::default()
    });
    let loaded = match load_into(&mut viewer, &config.volume, &config.source).await {
        Ok(loaded) => loaded,
        Err(e) => {
            error!("{}", e);
            return ExitCode::FAILURE;
        }
    };

    let signal = &loaded.signal;
    let (min, max, mean) = value_range(signal);
    let mask = loaded.mask.as_ref();

    if config.json {
        let json = serde_json::json!({
            "name": loaded.name,
            "dims": signal.dims(),
            "bytes_per_voxel": signal.bytes_per_voxel(),
            "channels": signal.channels(),
            "kind": signal.kind(),
            "color_space": signal.color_space(),
            "voxel_micrometers": signal.voxel_micrometers(),
            "volume_micrometers": signal.volume_micrometers(),
            "min": min,
            "max": max,
            "mean": mean,
            "max_label": mask.map(|m| m.max_label()),
        });
        match serde_json::to_string_pretty(&json) {
            Ok(text) => println!("{}", text),
            Err(e) => {
                error!("Cannot serialize volume info: {}", e);
                return ExitCode::FAILURE;
            }
        }
        return ExitCode::SUCCESS;
    }

    let [sx, sy, sz] = signal.dims();
    let [vx, vy, vz] = signal.voxel_micrometers();
    let [ex, ey, ez] = signal.volume_micrometers();
    println!("Volume:      {}", loaded.name);
    println!("Dimensions:  {} x {} x {}", sx, sy, sz);
    println!(
        "Voxels:      {:?}, {} byte(s), {} channel(s), {}",
        signal.kind(),
        signal.bytes_per_voxel(),
        signal.channels(),
        signal.color_space().as_str()
    );
    println!("Voxel size:  {:.3} x {:.3} x {:.3} um", vx, vy, vz);
    println!("Extent:      {:.1} x {:.1} x {:.1} um", ex, ey, ez);
    println!("Values:      min {}, max {}, mean {:.2}", min, max, mean);
    if let Some(mask) = mask {
        println!("Labels:      1..={}", mask.max_label());
    }

    ExitCode::SUCCESS
}

// =============================================================================
// Render Command
// =============================================================================

async fn run_render(config: RenderConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let backend = match WgpuBackend::new(WgpuBackendOptions {
        width: config.width,
        height: config.height,
    })
    .await
    {
        Ok(backend) => backend,
        Err(e) => {
            error!("Cannot create a GPU device: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let (mut viewer, link) = VolumeViewer::new(ViewerOptions {
        retry: config.source.retry_policy(),
        viewport: Viewport::new(config.width, config.height),
        ..Default::default()
    });
    let mut renderer = ViewerRenderer::new(backend, link);

    if let Err(e) = load_into(&mut viewer, &config.volume, &config.source).await {
        error!("{}", e);
        return ExitCode::FAILURE;
    }

    let [r, g, b] = config.color_mask();
    viewer.set_color_channel_mask(r, g, b);
    viewer.set_gamma(config.gamma);
    viewer.set_blend_mode(config.blend.into());
    if let Some(crop) = config.crop() {
        viewer.set_crop(crop.min, crop.max);
    }

    // Orbit deltas are in pixels; convert the requested angles.
    let dx = config.azimuth.to_radians() / DEFAULT_RADIANS_PER_SCREEN * config.width as f32;
    let dy = config.elevation.to_radians() / DEFAULT_RADIANS_PER_SCREEN * config.height as f32;
    viewer.camera_mut().orbit(dx, dy);
    viewer.camera_mut().zoom(config.zoom);

    let stats = match renderer.render_frame() {
        Ok(stats) => stats,
        Err(e) => {
            error!("Render failed: {}", e);
            return ExitCode::FAILURE;
        }
    };
    if renderer.is_degraded() {
        warn!("compositing unavailable, rendered with plain texturing");
    }

    let saved = renderer.backend().save_png(&config.output);
    renderer.dispose();
    if let Err(e) = saved {
        error!("Cannot write {}: {}", config.output.display(), e);
        return ExitCode::FAILURE;
    }

    info!(
        output = %config.output.display(),
        slices = stats.draws,
        program = ?stats.program,
        "frame saved"
    );
    ExitCode::SUCCESS
}

// =============================================================================
// Compress Command
// =============================================================================

fn compress_file(input: &Path, output: &Path) -> Result<(u64, u64), String> {
    let volume = load_volume_file(input).map_err(|e| e.to_string())?;
    let file = File::create(output).map_err(|e| format!("cannot create {}: {}", output.display(), e))?;
    write_raw_volume(BufWriter::new(file), &volume, Encoding::Pbd8).map_err(|e| e.to_string())?;

    // Read the result back so a bad encoding never goes unnoticed.
    let reread = File::open(output).map_err(|e| e.to_string())?;
    let decoded = read_raw_volume(BufReader::new(reread), false)
        .map_err(|e| format!("written file does not decode: {}", e))?;
    if decoded.dims() != volume.dims() {
        return Err("written file has different dimensions".to_string());
    }

    let before = std::fs::metadata(input).map_err(|e| e.to_string())?.len();
    let after = std::fs::metadata(output).map_err(|e| e.to_string())?.len();
    Ok((before, after))
}

async fn run_compress(config: CompressConfig) -> ExitCode {
    init_logging(config.verbose);

    if let Err(e) = config.validate() {
        error!("Configuration error: {}", e);
        return ExitCode::FAILURE;
    }

    let output = config.output_path();
    if output.exists() && !config.force {
        error!("{} exists; pass --force to overwrite it", output.display());
        return ExitCode::FAILURE;
    }

    let input = config.input.clone();
    let target = output.clone();
    let result = tokio::task::spawn_blocking(move || compress_file(&input, &target)).await;

    match result {
        Ok(Ok((before, after))) => {
            let ratio = if after > 0 { before as f64 / after as f64 } else { 0.0 };
            info!(
                input = %config.input.display(),
                output = %output.display(),
                before,
                after,
                "compressed {:.2}x",
                ratio
            );
            ExitCode::SUCCESS
        }
        Ok(Err(e)) => {
            error!("Compression failed: {}", e);
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("Compression worker stopped: {}", e);
            ExitCode::FAILURE
        }
    }
}
