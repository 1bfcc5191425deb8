//! Test utilities for integration tests.
//!
//! Builders for small volume files in every supported format, a scratch
//! directory that cleans up after itself, and a resolver that fails on
//! demand.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use volscope::error::IoError;
use volscope::resolve::FileResolver;

// =============================================================================
// Scratch directory
// =============================================================================

static SCRATCH_COUNTER: AtomicUsize = AtomicUsize::new(0);

/// A unique temporary directory, removed on drop.
pub struct Scratch {
    dir: PathBuf,
}

impl Scratch {
    pub fn new(tag: &str) -> Self {
        let n = SCRATCH_COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!(
            "volscope-it-{}-{}-{}",
            tag,
            std::process::id(),
            n
        ));
        std::fs::create_dir_all(&dir).unwrap();
        Self { dir }
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.join(name)
    }

    /// Write `bytes` to `name` and return the full path.
    pub fn write(&self, name: &str, bytes: &[u8]) -> PathBuf {
        let path = self.path(name);
        std::fs::write(&path, bytes).unwrap();
        path
    }
}

impl Drop for Scratch {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.dir);
    }
}

pub fn path_str(path: &Path) -> &str {
    path.to_str().unwrap()
}

// =============================================================================
// Raw stacks
// =============================================================================

pub const RAW_MAGIC: &[u8; 24] = b"raw_image_stack_by_hpeng";
pub const PBD_MAGIC: &[u8; 24] = b"v3d_volume_pkbitdf_encod";

/// A 43-byte little-endian raw header.
pub fn raw_header(magic: &[u8; 24], bytes_per_sample: u16, dims: [u32; 4]) -> Vec<u8> {
    let mut out = magic.to_vec();
    out.push(b'L');
    out.extend_from_slice(&bytes_per_sample.to_le_bytes());
    for d in dims {
        out.extend_from_slice(&d.to_le_bytes());
    }
    out
}

/// A literal 1-byte raw stack holding `payload`.
pub fn raw_stack(dims: [u32; 4], payload: &[u8]) -> Vec<u8> {
    let mut out = raw_header(RAW_MAGIC, 1, dims);
    out.extend_from_slice(payload);
    out
}

/// A PBD8 stack whose payload is already compressed.
pub fn pbd_stack(dims: [u32; 4], compressed: &[u8]) -> Vec<u8> {
    let mut out = raw_header(PBD_MAGIC, 1, dims);
    out.extend_from_slice(compressed);
    out
}

// =============================================================================
// Masks
// =============================================================================

/// A `.mask` file with rays along `axis`; pairs are end-exclusive.
pub fn mask_file(dims: [i64; 3], axis: u8, records: &[(i64, Vec<(i64, i64)>)]) -> Vec<u8> {
    let total: i64 = records
        .iter()
        .flat_map(|(_, pairs)| pairs.iter().map(|(s, e)| e - s))
        .sum();

    let mut out = Vec::new();
    for d in dims {
        out.extend_from_slice(&d.to_le_bytes());
    }
    for m in [1.0f32, 1.0, 1.0] {
        out.extend_from_slice(&m.to_le_bytes());
    }
    for b in [0i64, dims[0], 0, dims[1], 0, dims[2]] {
        out.extend_from_slice(&b.to_le_bytes());
    }
    out.extend_from_slice(&total.to_le_bytes());
    out.push(axis);
    for (skip, pairs) in records {
        out.extend_from_slice(&skip.to_le_bytes());
        out.extend_from_slice(&(pairs.len() as i64).to_le_bytes());
        for (s, e) in pairs {
            out.extend_from_slice(&s.to_le_bytes());
            out.extend_from_slice(&e.to_le_bytes());
        }
    }
    out
}

/// A `.chan` file with one byte per sample; channel order red, blue, green.
pub fn chan_file(planes: &[Vec<u8>]) -> Vec<u8> {
    let total = planes.first().map(|p| p.len()).unwrap_or(0) as i64;
    let mut out = total.to_le_bytes().to_vec();
    let count = planes.len() as u8;
    let (red, blue, green) = if count > 1 { (0, 2, 1) } else { (0, 0, 0) };
    out.extend_from_slice(&[count, red, blue, green, 1]);
    for plane in planes {
        out.extend_from_slice(plane);
    }
    out
}

// =============================================================================
// TIFF
// =============================================================================

fn entry(out: &mut Vec<u8>, tag: u16, field_type: u16, value: u32) {
    out.extend_from_slice(&tag.to_le_bytes());
    out.extend_from_slice(&field_type.to_le_bytes());
    out.extend_from_slice(&1u32.to_le_bytes());
    match field_type {
        3 => {
            out.extend_from_slice(&(value as u16).to_le_bytes());
            out.extend_from_slice(&[0, 0]);
        }
        _ => out.extend_from_slice(&value.to_le_bytes()),
    }
}

/// A little-endian, uncompressed, 8-bit grayscale TIFF with one strip per page.
pub fn tiff_stack(width: u32, height: u32, pages: &[Vec<u8>]) -> Vec<u8> {
    let mut out = b"II".to_vec();
    out.extend_from_slice(&42u16.to_le_bytes());
    out.extend_from_slice(&8u32.to_le_bytes());

    const ENTRIES: u16 = 8;
    let ifd_len = 2 + ENTRIES as usize * 12 + 4;
    for (index, page) in pages.iter().enumerate() {
        let ifd_start = out.len();
        let data_start = ifd_start + ifd_len;
        let next = if index + 1 < pages.len() {
            (data_start + page.len()) as u32
        } else {
            0
        };

        out.extend_from_slice(&ENTRIES.to_le_bytes());
        entry(&mut out, 256, 4, width);
        entry(&mut out, 257, 4, height);
        entry(&mut out, 258, 3, 8);
        entry(&mut out, 259, 3, 1);
        entry(&mut out, 262, 3, 1);
        entry(&mut out, 273, 4, data_start as u32);
        entry(&mut out, 277, 3, 1);
        entry(&mut out, 279, 4, page.len() as u32);
        out.extend_from_slice(&next.to_le_bytes());
        out.extend_from_slice(page);
    }
    out
}

// =============================================================================
// Movies
// =============================================================================

/// An animated GIF with one solid-color frame per entry.
pub fn gif_frames(width: u32, height: u32, colors: &[[u8; 3]]) -> Vec<u8> {
    use image::codecs::gif::GifEncoder;
    use image::{Frame, Rgba, RgbaImage};

    let mut buf = Vec::new();
    {
        let mut encoder = GifEncoder::new(&mut buf);
        let frames = colors.iter().map(|&[r, g, b]| {
            Frame::new(RgbaImage::from_pixel(width, height, Rgba([r, g, b, 255])))
        });
        encoder.encode_frames(frames).unwrap();
    }
    buf
}

// =============================================================================
// Resolvers
// =============================================================================

/// Resolves every name to `target`, failing the first `failures` calls.
pub struct FlakyResolver {
    target: PathBuf,
    failures: usize,
    transient: bool,
    calls: Arc<AtomicUsize>,
}

impl FlakyResolver {
    pub fn new(target: impl Into<PathBuf>, failures: usize, transient: bool) -> Self {
        Self {
            target: target.into(),
            failures,
            transient,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileResolver for FlakyResolver {
    async fn resolve(&self, name: &str) -> Result<PathBuf, IoError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(if self.transient {
                IoError::Connection(format!("connection reset while fetching {}", name))
            } else {
                IoError::NotFound(name.to_string())
            });
        }
        Ok(self.target.clone())
    }
}

// =============================================================================
// Random numbers
// =============================================================================

/// Small deterministic generator for property-style tests.
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self(seed)
    }

    pub fn next_u32(&mut self) -> u32 {
        self.0 = self
            .0
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        (self.0 >> 33) as u32
    }

    /// Uniform in `[lo, hi)`.
    pub fn range(&mut self, lo: f32, hi: f32) -> f32 {
        let unit = self.next_u32() as f32 / (1u64 << 31) as f32;
        lo + unit * (hi - lo)
    }
}
