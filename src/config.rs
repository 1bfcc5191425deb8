//! Command-line configuration for volscope.
//!
//! Every option can also be set through a `VOLSCOPE_` environment variable:
//!
//! - `VOLSCOPE_S3_BUCKET` - Bucket for relative volume names (enables S3)
//! - `VOLSCOPE_S3_ENDPOINT` - Custom endpoint for S3-compatible stores
//! - `VOLSCOPE_S3_REGION` - AWS region (default: us-east-1)
//! - `VOLSCOPE_CACHE_DIR` - Local directory for downloaded volumes
//! - `VOLSCOPE_RETRIES` - Transfer attempts per file (default: 3)
//! - `VOLSCOPE_RETRY_DELAY_MS` - Pause between attempts (default: 500)
//! - `VOLSCOPE_WIDTH` / `VOLSCOPE_HEIGHT` - Render size (default: 800x600)
//! - `VOLSCOPE_GAMMA` - Display gamma (default: 1.0)

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand, ValueEnum};

use crate::resolve::{RetryPolicy, DEFAULT_MAX_ATTEMPTS, DEFAULT_RETRY_DELAY};
use crate::scene::{BlendMode, CropBox, DEFAULT_GAMMA};

// =============================================================================
// Default Values
// =============================================================================

/// Default AWS region.
pub const DEFAULT_REGION: &str = "us-east-1";

/// Default directory for downloaded volumes.
pub const DEFAULT_CACHE_DIR: &str = "volscope-cache";

/// Default render width in pixels.
pub const DEFAULT_WIDTH: u32 = 800;

/// Default render height in pixels.
pub const DEFAULT_HEIGHT: u32 = 600;

/// Default output image.
pub const DEFAULT_OUTPUT: &str = "volscope.png";

/// Largest accepted render edge in pixels.
pub const MAX_RENDER_EDGE: u32 = 8192;

// =============================================================================
// CLI Arguments
// =============================================================================

/// volscope - inspect, render and re-encode microscopy volumes.
#[derive(Parser, Debug, Clone)]
#[command(name = "volscope")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    pub fn into_command(self) -> Command {
        self.command
    }
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Print dimensions, voxel size and value statistics of a volume.
    Info(InfoConfig),

    /// Render a volume offscreen and save the frame as PNG.
    Render(RenderConfig),

    /// Re-encode a volume as a PBD8 raw stack.
    Compress(CompressConfig),
}

// =============================================================================
// Shared options
// =============================================================================

/// Where volumes come from and how hard to try.
#[derive(Args, Debug, Clone)]
pub struct SourceOptions {
    /// S3 bucket for relative volume names.
    ///
    /// Names given as `s3://bucket/key` use S3 even without this option.
    #[arg(long, env = "VOLSCOPE_S3_BUCKET")]
    pub s3_bucket: Option<String>,

    /// Key prefix prepended to relative names in the bucket.
    #[arg(long, env = "VOLSCOPE_S3_PREFIX")]
    pub s3_prefix: Option<String>,

    /// Custom S3 endpoint URL for S3-compatible services (MinIO, etc.).
    #[arg(long, env = "VOLSCOPE_S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    /// AWS region for S3.
    #[arg(long, default_value = DEFAULT_REGION, env = "VOLSCOPE_S3_REGION")]
    pub s3_region: String,

    /// Local directory downloaded volumes are kept in.
    #[arg(long, default_value = DEFAULT_CACHE_DIR, env = "VOLSCOPE_CACHE_DIR")]
    pub cache_dir: PathBuf,

    /// Attempts per transfer before giving up.
    #[arg(long, default_value_t = DEFAULT_MAX_ATTEMPTS, env = "VOLSCOPE_RETRIES")]
    pub retries: u32,

    /// Pause between transfer attempts in milliseconds.
    #[arg(
        long,
        default_value_t = DEFAULT_RETRY_DELAY.as_millis() as u64,
        env = "VOLSCOPE_RETRY_DELAY_MS"
    )]
    pub retry_delay_ms: u64,

    /// Label mask files; file N paints label N.
    #[arg(long = "mask", value_name = "FILE")]
    pub masks: Vec<PathBuf>,

    /// JSON label color table (`{"1": [255, 0, 0]}`).
    #[arg(long, value_name = "FILE")]
    pub label_colors: Option<PathBuf>,
}

impl SourceOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.retries == 0 {
            return Err("retries must be greater than 0".to_string());
        }
        if matches!(&self.s3_bucket, Some(b) if b.is_empty()) {
            return Err("S3 bucket name must not be empty".to_string());
        }
        if self.s3_region.is_empty() {
            return Err("S3 region must not be empty".to_string());
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retries, Duration::from_millis(self.retry_delay_ms))
    }

    /// Whether `name` should be fetched from S3.
    pub fn uses_s3(&self, name: &str) -> bool {
        name.starts_with("s3://") || self.s3_bucket.is_some()
    }
}

// =============================================================================
// Info
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct InfoConfig {
    /// Volume path, S3 key or `s3://` URL.
    pub volume: String,

    /// Print JSON instead of text.
    #[arg(long, default_value_t = false)]
    pub json: bool,

    #[command(flatten)]
    pub source: SourceOptions,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl InfoConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.volume.is_empty() {
            return Err("a volume name is required".to_string());
        }
        self.source.validate()
    }
}

// =============================================================================
// Render
// =============================================================================

/// Compositing choice on the command line.
#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlendChoice {
    /// Maximum intensity projection
    #[default]
    Mip,
    /// Back-to-front alpha compositing
    Alpha,
}

impl From<BlendChoice> for BlendMode {
    fn from(choice: BlendChoice) -> Self {
        match choice {
            BlendChoice::Mip => BlendMode::MaximumIntensity,
            BlendChoice::Alpha => BlendMode::Alpha,
        }
    }
}

#[derive(Args, Debug, Clone)]
pub struct RenderConfig {
    /// Volume path, S3 key or `s3://` URL.
    pub volume: String,

    /// Output PNG file.
    #[arg(short, long, default_value = DEFAULT_OUTPUT)]
    pub output: PathBuf,

    /// Frame width in pixels.
    #[arg(long, default_value_t = DEFAULT_WIDTH, env = "VOLSCOPE_WIDTH")]
    pub width: u32,

    /// Frame height in pixels.
    #[arg(long, default_value_t = DEFAULT_HEIGHT, env = "VOLSCOPE_HEIGHT")]
    pub height: u32,

    /// Display gamma; values above 1 brighten dim voxels.
    #[arg(long, default_value_t = DEFAULT_GAMMA, env = "VOLSCOPE_GAMMA")]
    pub gamma: f32,

    /// Red, green and blue channel weights.
    #[arg(long, value_delimiter = ',', default_values_t = [1.0, 1.0, 1.0])]
    pub channels: Vec<f32>,

    /// Lower crop corner in normalized coordinates.
    #[arg(long, value_delimiter = ',')]
    pub crop_min: Option<Vec<f32>>,

    /// Upper crop corner in normalized coordinates.
    #[arg(long, value_delimiter = ',')]
    pub crop_max: Option<Vec<f32>>,

    /// Compositing mode.
    #[arg(long, value_enum, default_value_t = BlendChoice::Mip)]
    pub blend: BlendChoice,

    /// Turn about the up axis, in degrees.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub azimuth: f32,

    /// Tilt toward or away from the viewer, in degrees.
    #[arg(long, default_value_t = 0.0, allow_negative_numbers = true)]
    pub elevation: f32,

    /// Zoom ratio applied after framing the volume.
    #[arg(long, default_value_t = 1.0)]
    pub zoom: f32,

    #[command(flatten)]
    pub source: SourceOptions,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl RenderConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.volume.is_empty() {
            return Err("a volume name is required".to_string());
        }
        if self.width == 0 || self.height == 0 {
            return Err("width and height must be greater than 0".to_string());
        }
        if self.width > MAX_RENDER_EDGE || self.height > MAX_RENDER_EDGE {
            return Err(format!(
                "width and height must be at most {}",
                MAX_RENDER_EDGE
            ));
        }
        if !(self.gamma.is_finite() && self.gamma > 0.0) {
            return Err("gamma must be a positive number".to_string());
        }
        if !(self.zoom.is_finite() && self.zoom > 0.0) {
            return Err("zoom must be a positive number".to_string());
        }
        if self.channels.len() != 3 {
            return Err("channels takes exactly three weights".to_string());
        }
        for corner in [&self.crop_min, &self.crop_max].into_iter().flatten() {
            if corner.len() != 3 {
                return Err("crop corners take exactly three coordinates".to_string());
            }
        }
        if self.crop().is_none() {
            return Err("crop corners must be numbers".to_string());
        }
        self.source.validate()
    }

    pub fn color_mask(&self) -> [f32; 3] {
        let mut mask = [1.0; 3];
        for (slot, value) in mask.iter_mut().zip(&self.channels) {
            *slot = *value;
        }
        mask
    }

    /// Normalized crop box; missing corners default to the full volume.
    pub fn crop(&self) -> Option<CropBox> {
        let corner = |v: &Option<Vec<f32>>, fallback: [f32; 3]| match v {
            Some(values) if values.len() == 3 => [values[0], values[1], values[2]],
            _ => fallback,
        };
        CropBox::normalized(
            corner(&self.crop_min, CropBox::FULL.min),
            corner(&self.crop_max, CropBox::FULL.max),
        )
    }
}

// =============================================================================
// Compress
// =============================================================================

#[derive(Args, Debug, Clone)]
pub struct CompressConfig {
    /// Volume to re-encode; any readable format with 1-byte samples.
    pub input: PathBuf,

    /// PBD8 file to write; defaults to the input with a `.v3dpbd` extension.
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Overwrite the output if it exists.
    #[arg(long, default_value_t = false)]
    pub force: bool,

    /// Enable verbose logging (debug level).
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl CompressConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.output_path() == self.input {
            return Err("output must differ from the input".to_string());
        }
        Ok(())
    }

    pub fn output_path(&self) -> PathBuf {
        self.output
            .clone()
            .unwrap_or_else(|| self.input.with_extension("v3dpbd"))
    }
}

// =============================================================================
// Tests
// =============================================================================
