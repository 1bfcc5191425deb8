//! Label-mask builders.
//!
//! A label mask is built against a loaded signal volume and must match its
//! dimensions voxel for voxel.

use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use tracing::{debug, info};

use super::mask::{paint_label, read_mask};
use super::raw::read_raw_volume;
use super::volume::{LabelColorTable, LabelMaskBuffer, VolumeBuffer, VoxelKind};
use crate::error::FormatError;
use crate::io::ByteOrder;

/// Produces the label mask paired with a signal volume.
///
/// Builders run on a blocking worker after the signal volume is decoded.
pub trait LabelMaskBuilder: Send + Sync {
    fn build(&self, signal: &VolumeBuffer) -> Result<LabelMaskBuffer, FormatError>;
}

fn check_dims(path: &Path, dims: [usize; 3], signal: &VolumeBuffer) -> Result<(), FormatError> {
    if dims != signal.dims() {
        return Err(FormatError::MalformedHeader {
            reason: format!(
                "mask {} is {:?} but the signal volume is {:?}",
                path.display(),
                dims,
                signal.dims()
            ),
        });
    }
    Ok(())
}

// =============================================================================
// MaskFileBuilder
// =============================================================================

/// Combines `.mask` files into one label volume; file `i` paints label `i + 1`.
///
/// Later files win where masks overlap.
#[derive(Debug, Clone)]
pub struct MaskFileBuilder {
    paths: Vec<PathBuf>,
    colors: Option<LabelColorTable>,
}

impl MaskFileBuilder {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self {
            paths,
            colors: None,
        }
    }

    pub fn with_colors(mut self, colors: LabelColorTable) -> Self {
        self.colors = Some(colors);
        self
    }
}

impl LabelMaskBuilder for MaskFileBuilder {
    fn build(&self, signal: &VolumeBuffer) -> Result<LabelMaskBuffer, FormatError> {
        if self.paths.is_empty() {
            return Err(FormatError::MalformedHeader {
                reason: "no mask files given".to_string(),
            });
        }

        let mut labels = vec![0u32; signal.voxel_count()];
        for (index, path) in self.paths.iter().enumerate() {
            let rays = read_mask(BufReader::new(File::open(path)?))?;
            check_dims(path, rays.header.dims, signal)?;
            let label = index as u32 + 1;
            paint_label(&rays, &mut labels, label);
            debug!(path = %path.display(), label, voxels = rays.voxels.len(), "painted mask");
        }

        let max_label = self.paths.len() as u32;
        let bytes_per_voxel = label_width(max_label);
        let data: Vec<u8> = match bytes_per_voxel {
            1 => labels.iter().map(|&l| l as u8).collect(),
            2 => labels.iter().flat_map(|&l| (l as u16).to_le_bytes()).collect(),
            _ => labels.iter().flat_map(|&l| l.to_le_bytes()).collect(),
        };

        let volume = VolumeBuffer::new(
            signal.dims(),
            bytes_per_voxel,
            ByteOrder::LittleEndian,
            VoxelKind::Label,
            data,
        )?
        .with_voxel_size(signal.voxel_micrometers());

        info!(masks = self.paths.len(), "built label mask");
        LabelMaskBuffer::new(volume, self.colors.clone())
    }
}

/// Narrowest label width holding `max_label`.
fn label_width(max_label: u32) -> usize {
    if max_label <= u8::MAX as u32 {
        1
    } else if max_label <= u16::MAX as u32 {
        2
    } else {
        4
    }
}

// =============================================================================
// LabelVolumeFileBuilder
// =============================================================================

/// Reads a precomputed label stack (a `ConsolidatedLabel` raw file).
#[derive(Debug, Clone)]
pub struct LabelVolumeFileBuilder {
    path: PathBuf,
    colors: Option<LabelColorTable>,
}

impl LabelVolumeFileBuilder {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            colors: None,
        }
    }

    pub fn with_colors(mut self, colors: LabelColorTable) -> Self {
        self.colors = Some(colors);
        self
    }
}

impl LabelMaskBuilder for LabelVolumeFileBuilder {
    fn build(&self, signal: &VolumeBuffer) -> Result<LabelMaskBuffer, FormatError> {
        let volume = read_raw_volume(File::open(&self.path)?, true)?;
        check_dims(&self.path, volume.dims(), signal)?;
        let volume = volume.with_voxel_size(signal.voxel_micrometers());
        LabelMaskBuffer::new(volume, self.colors.clone())
    }
}
