//! # Country Tiles
//!
//! Clips a global raster into per-country tiles along administrative boundaries,
//! rescales every tile to 0–100 from its own pixel statistics, and mosaics the
//! tiles back into one raster.
//!
//! The main components are:
//! - [`rescale`]: z-score outlier filtering and the 0–100 linear map.
//! - [`split`]: the tile splitter, one GeoTIFF per intersecting boundary feature.
//! - [`merge`]: the tile merger, a nearest-neighbour mosaic of a tile directory.
//! - [`pipeline`]: split then merge for each configured year.

pub mod config;
pub mod manifest;
pub mod merge;
pub mod pipeline;
pub mod raster;
pub mod rescale;
pub mod split;
pub mod text;

use anyhow::{Context, Result};
use std::path::Path;

pub use config::{parse_years, PipelineConfig};
pub use manifest::{TileManifest, TileRecord};
pub use merge::{merge_countries, MergeSummary};
pub use rescale::rescale;
pub use split::{split_countries, SkipReason, SplitOptions, SplitOutcome};

// --- Filesystem Utilities ---

/// Deletes `path` with everything in it, if it exists, and recreates it empty.
pub fn reset_output_dir(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)
            .with_context(|| format!("Failed to remove directory: {:?}", path))?;
    }
    std::fs::create_dir_all(path)
        .with_context(|| format!("Failed to create directory: {:?}", path))?;
    Ok(())
}
