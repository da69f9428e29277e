//! Tile Merger: mosaics the per-country tiles of one run back into a single raster.

use anyhow::{bail, Context, Result};
use ndarray::Array3;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::manifest::{TileManifest, MANIFEST_FILE};
use crate::raster::{
    self, OutputProfile, PixelWindow, RasterMeta, OUTPUT_DATA_TYPE, OUTPUT_DRIVER, TILE_EXTENSION,
};
use crate::text;

#[derive(Debug, Clone, PartialEq)]
pub struct MergeSummary {
    pub output: PathBuf,
    pub tile_count: usize,
    pub width: usize,
    pub height: usize,
    /// Tile whose resolution, projection and no-data value the mosaic inherits.
    pub reference: PathBuf,
    pub input_removed: bool,
}

/// Lists the tiles of `input_dir`, sorted by file name.
///
/// The splitter's manifest is used when present; otherwise every `.tif` in the directory.
pub fn collect_tiles(input_dir: &Path) -> Result<Vec<PathBuf>> {
    if let Some(manifest) = TileManifest::load(input_dir)? {
        return Ok(manifest.tile_paths(input_dir));
    }

    let mut tiles = Vec::new();
    for entry in fs::read_dir(input_dir)
        .with_context(|| format!("Failed to list tile directory {:?}", input_dir))?
    {
        let path = entry?.path();
        let is_tile = path
            .extension()
            .map_or(false, |ext| ext.eq_ignore_ascii_case(TILE_EXTENSION));
        if path.is_file() && is_tile {
            tiles.push(path);
        }
    }
    tiles.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(tiles)
}

/// Copies the valid pixels of `tile` onto `mosaic` with nearest-neighbour sampling.
/// Later calls overwrite earlier ones where both carry valid pixels.
fn paint(
    mosaic: &mut Array3<i16>,
    mosaic_gt: &[f64; 6],
    tile: &Array3<i16>,
    tile_meta: &RasterMeta,
) {
    let (bands, rows, cols) = mosaic.dim();
    let window = PixelWindow::covering(mosaic_gt, (cols, rows), &tile_meta.bounds());
    let gt = &tile_meta.geo_transform;
    let tile_nodata = raster::nodata_as_i16(tile_meta.nodata);

    for row in window.row_off..window.row_off + window.height {
        let y = mosaic_gt[3] + (row as f64 + 0.5) * mosaic_gt[5];
        let src_row = ((y - gt[3]) / gt[5]).floor();
        if src_row < 0.0 || src_row >= tile_meta.height as f64 {
            continue;
        }

        for col in window.col_off..window.col_off + window.width {
            let x = mosaic_gt[0] + (col as f64 + 0.5) * mosaic_gt[1];
            let src_col = ((x - gt[0]) / gt[1]).floor();
            if src_col < 0.0 || src_col >= tile_meta.width as f64 {
                continue;
            }

            let (src_row, src_col) = (src_row as usize, src_col as usize);
            for b in 0..bands {
                let value = tile[[b, src_row, src_col]];
                if value != tile_nodata {
                    mosaic[[b, row, col]] = value;
                }
            }
        }
    }
}

/// Builds the Int16 mosaic of `tiles` in memory.
///
/// The first tile is the reference: the mosaic takes its resolution, band count,
/// projection and no-data value, and covers the union of all tile footprints.
/// Tiles are read one at a time.
pub fn mosaic_tiles(tiles: &[PathBuf]) -> Result<(RasterMeta, Array3<i16>)> {
    if tiles.is_empty() {
        bail!("No tiles to merge");
    }

    let mut metas = Vec::with_capacity(tiles.len());
    for path in tiles {
        let dataset = raster::open_raster(path)?;
        metas.push(RasterMeta::from_dataset(&dataset)?);
    }

    let reference = &metas[0];
    for (path, meta) in tiles.iter().zip(&metas) {
        if meta.band_count != reference.band_count {
            bail!(
                "Tile {:?} has {} band(s), expected {}",
                path,
                meta.band_count,
                reference.band_count
            );
        }
    }

    let (res_x, res_y) = (reference.geo_transform[1], reference.geo_transform[5]);
    let union = metas
        .iter()
        .skip(1)
        .fold(reference.bounds(), |acc, meta| acc.union(&meta.bounds()));
    let width = ((union.east - union.west) / res_x).round() as usize;
    let height = ((union.south - union.north) / res_y).round() as usize;
    let geo_transform = [union.west, res_x, 0.0, union.north, 0.0, res_y];
    let nodata = raster::nodata_as_i16(reference.nodata);

    let mut mosaic = Array3::from_elem((reference.band_count, height, width), nodata);
    for path in tiles {
        let (meta, data) = raster::read_raster::<i16>(path)?;
        paint(&mut mosaic, &geo_transform, &data, &meta);
    }

    let meta = RasterMeta {
        driver: OUTPUT_DRIVER.to_string(),
        width,
        height,
        band_count: reference.band_count,
        geo_transform,
        projection: reference.projection.clone(),
        nodata: f64::from(nodata),
        data_type: OUTPUT_DATA_TYPE.name(),
    };
    Ok((meta, mosaic))
}

/// Unique sibling of `output` to write into before the final rename.
fn temporary_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "mosaic".to_string());
    let ts = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let pid = std::process::id();
    output.with_file_name(format!("{}.tmp.{}.{}.{}", stem, pid, ts, TILE_EXTENSION))
}

fn remove_input(input_dir: &Path, tiles: &[PathBuf]) -> Result<()> {
    for tile in tiles {
        fs::remove_file(tile).with_context(|| format!("Failed to remove tile {:?}", tile))?;
    }
    let manifest = input_dir.join(MANIFEST_FILE);
    if manifest.exists() {
        fs::remove_file(&manifest)?;
    }
    fs::remove_dir_all(input_dir)
        .with_context(|| format!("Failed to remove tile directory {:?}", input_dir))?;
    Ok(())
}

/// Merges the tiles of `input_dir` into `output_path`.
///
/// The mosaic is written to a temporary file and renamed into place. Inputs are
/// removed only when `delete_input` is set and that rename succeeded.
pub fn merge_countries(
    input_dir: &Path,
    output_path: &Path,
    delete_input: bool,
) -> Result<MergeSummary> {
    let tiles = collect_tiles(input_dir)?;
    if tiles.is_empty() {
        bail!("No .{} tiles found in {:?}", TILE_EXTENSION, input_dir);
    }
    println!("Merging {} tiles...", tiles.len());

    let (meta, mosaic) = mosaic_tiles(&tiles)?;

    if let Some(parent) = output_path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create directory {:?}", parent))?;
    }

    let tmp_path = temporary_path(output_path);
    let profile = OutputProfile::mosaic();
    let written = raster::write_int16_pixels(&tmp_path, &meta, &mosaic, &profile)
        .and_then(|_| {
            fs::rename(&tmp_path, output_path)
                .with_context(|| format!("Failed to move mosaic into {:?}", output_path))
        });
    if let Err(e) = written {
        if tmp_path.exists() {
            if let Err(rem_e) = fs::remove_file(&tmp_path) {
                eprintln!(
                    "{}: failed to remove temp file {:?}: {}",
                    text::warning("Warning"),
                    tmp_path,
                    rem_e
                );
            }
        }
        return Err(e);
    }
    println!(
        "{} Merged TIFF file ({} x {}) saved at {:?}",
        text::check_icon(),
        meta.width,
        meta.height,
        output_path
    );

    if delete_input {
        remove_input(input_dir, &tiles)?;
        println!("{} Removed tile directory {:?}", text::check_icon(), input_dir);
    }

    Ok(MergeSummary {
        output: output_path.to_path_buf(),
        tile_count: tiles.len(),
        width: meta.width,
        height: meta.height,
        reference: tiles[0].clone(),
        input_removed: delete_input,
    })
}
