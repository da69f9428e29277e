//! Tile Splitter: clips the source raster to each boundary feature, rescales the
//! clipped pixels and writes one GeoTIFF per country.

use anyhow::{Context, Result};
use gdal::raster::{rasterize, Buffer, RasterizeOptions};
use gdal::vector::{Geometry, LayerAccess};
use gdal::{Dataset, DriverManager};
use ndarray::{Array3, Axis};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;
use std::time::Instant;

use crate::manifest::{TileManifest, TileRecord};
use crate::raster::{self, Bounds, OutputProfile, PixelWindow, RasterMeta, TILE_EXTENSION};
use crate::rescale::{self, DEFAULT_OUTLIER_THRESHOLD};
use crate::{reset_output_dir, text};

/// Attribute holding the ISO3 code in GADM level-0 boundaries.
pub const DEFAULT_COUNTRY_FIELD: &str = "GID_0";

#[derive(Debug, Clone)]
pub struct SplitOptions {
    pub country_field: String,
    pub outlier_threshold: f64,
}

impl Default for SplitOptions {
    fn default() -> Self {
        SplitOptions {
            country_field: DEFAULT_COUNTRY_FIELD.to_string(),
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
        }
    }
}

/// Why a boundary feature produced no tile. None of these are errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    MissingCountryCode,
    MissingGeometry,
    OutsideRaster,
    AllNodata,
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            SkipReason::MissingCountryCode => "has no country code",
            SkipReason::MissingGeometry => "has no geometry",
            SkipReason::OutsideRaster => "does not overlap with raster",
            SkipReason::AllNodata => "is entirely No Data",
        };
        write!(f, "{}", msg)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedFeature {
    /// Country code, or the feature id when the code is missing.
    pub label: String,
    pub reason: SkipReason,
}

#[derive(Debug, Clone)]
pub struct SplitOutcome {
    pub manifest: TileManifest,
    pub skipped: Vec<SkippedFeature>,
}

/// Name of the tile written for `country` from `source_path`.
pub fn tile_file_name(source_path: &Path, country: &str) -> String {
    let stem = source_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "raster".to_string());
    format!("{}_{}.{}", stem, country, TILE_EXTENSION)
}

/// Burns `geometries` into a `width` x `height` grid; 1 where a pixel centre is inside any of them.
fn burn_mask(
    geometries: &[Geometry],
    transform: &[f64; 6],
    width: usize,
    height: usize,
) -> Result<Vec<u8>> {
    let driver = DriverManager::get_driver_by_name("MEM")?;
    let mut mask_ds = driver.create_with_band_type::<u8, _>("", width, height, 1)?;
    mask_ds.set_geo_transform(transform)?;

    let burn_values = vec![1.0; geometries.len()];
    rasterize(
        &mut mask_ds,
        &[1],
        geometries,
        &burn_values,
        Some(RasterizeOptions::default()),
    )
    .context("Failed to rasterize boundary geometry")?;

    let band = mask_ds.rasterband(1)?;
    let buffer: Buffer<u8> = band.read_band_as()?;
    Ok(buffer.into_shape_and_vec().1)
}

/// Sets every pixel outside `inside` to `nodata`, in all bands.
fn mask_outside(tile: &mut Array3<f64>, inside: &[u8], nodata: f64) {
    for mut plane in tile.axis_iter_mut(Axis(0)) {
        for (value, &flag) in plane.iter_mut().zip(inside.iter()) {
            if flag == 0 {
                *value = nodata;
            }
        }
    }
}

fn skip(skipped: &mut Vec<SkippedFeature>, label: String, reason: SkipReason) {
    println!("{} Skipping {} as it {}", text::skip_icon(), label, reason);
    skipped.push(SkippedFeature { label, reason });
}

/// Splits `source_path` into one rescaled tile per country of `admin_path`.
///
/// `output_dir` is deleted and recreated first. Features sharing a country code are
/// parts of one country and end up in a single tile. Countries are visited in the
/// order their first feature appears in the layer; countries that miss the raster or
/// only cover no-data pixels are skipped. A `manifest.json` listing the written tiles
/// is kept up to date in `output_dir` after every tile.
pub fn split_countries(
    admin_path: &Path,
    source_path: &Path,
    output_dir: &Path,
    options: &SplitOptions,
) -> Result<SplitOutcome> {
    reset_output_dir(output_dir)?;

    let boundaries = Dataset::open(admin_path)
        .with_context(|| format!("Failed to open boundaries {:?}", admin_path))?;
    let mut layer = boundaries
        .layer(0)
        .with_context(|| format!("No vector layer in {:?}", admin_path))?;

    let source = raster::open_raster(source_path)?;
    let meta = RasterMeta::from_dataset(&source)?;
    let footprint = meta.bounds().to_geometry()?;
    let nodata = meta.nodata;

    println!(
        "{} Source raster ({} x {}, {} band(s)), {} boundary features.",
        text::check_icon(),
        meta.width,
        meta.height,
        meta.band_count,
        layer.feature_count()
    );
    if raster::nodata_in_scale(nodata) {
        println!(
            "{} {}",
            text::skip_icon(),
            text::warning(format!(
                "No Data value {} lies within 0-100 and will mask rescaled pixels.",
                raster::int16_nodata(nodata)
            ))
        );
    }

    let mut skipped = Vec::new();
    let mut countries: Vec<(String, Vec<Geometry>)> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for feature in layer.features() {
        let country = match feature.field_as_string_by_name(&options.country_field)? {
            Some(code) if !code.trim().is_empty() => code.trim().to_string(),
            _ => {
                let label = format!("feature {:?}", feature.fid());
                skip(&mut skipped, label, SkipReason::MissingCountryCode);
                continue;
            }
        };

        let geometry = match feature.geometry() {
            Some(geometry) if !geometry.is_empty() => geometry.clone(),
            _ => {
                skip(&mut skipped, country, SkipReason::MissingGeometry);
                continue;
            }
        };

        match index.get(&country) {
            Some(&i) => countries[i].1.push(geometry),
            None => {
                index.insert(country.clone(), countries.len());
                countries.push((country, vec![geometry]));
            }
        }
    }

    let profile = OutputProfile::country_tile();
    let mut manifest = TileManifest::new(source_path, raster::int16_nodata(nodata));

    for (country, parts) in countries {
        let parts: Vec<Geometry> = parts
            .into_iter()
            .filter(|part| part.intersects(&footprint))
            .collect();
        let Some(first) = parts.first() else {
            skip(&mut skipped, country, SkipReason::OutsideRaster);
            continue;
        };

        let part_time = Instant::now();
        if parts.len() > 1 {
            println!("Processing {} ({} parts)...", text::bold(&country), parts.len());
        } else {
            println!("Processing {}...", text::bold(&country));
        }

        let extent = parts
            .iter()
            .skip(1)
            .fold(Bounds::from_geometry(first), |acc, part| {
                acc.union(&Bounds::from_geometry(part))
            });
        let size = (meta.width, meta.height);
        let window = PixelWindow::covering(&meta.geo_transform, size, &extent);
        if window.is_empty() {
            skip(&mut skipped, country, SkipReason::AllNodata);
            continue;
        }

        let tile_meta = meta.for_window(&window);
        let mut tile = raster::read_window::<f64>(&source, &window)
            .with_context(|| format!("Failed to read window for {}", country))?;
        let inside = burn_mask(&parts, &tile_meta.geo_transform, window.width, window.height)?;
        mask_outside(&mut tile, &inside, nodata);

        if tile.iter().all(|&v| rescale::is_nodata(v, Some(nodata))) {
            skip(&mut skipped, country, SkipReason::AllNodata);
            continue;
        }

        let bounds = rescale::rescale_bounds(&tile, Some(nodata), options.outlier_threshold);
        match bounds {
            Some((min_val, max_val)) => println!(
                "  {}",
                text::light(format!("Rescale range: min = {}, max = {}", min_val, max_val))
            ),
            None => println!(
                "  {}",
                text::warning("Degenerate pixel statistics, writing an all-zero tile.")
            ),
        }
        let rescaled = rescale::apply_bounds(&tile, Some(nodata), bounds);

        let file_name = tile_file_name(source_path, &country);
        let output_path = output_dir.join(&file_name);
        raster::write_int16(&output_path, &tile_meta, &rescaled, &profile)?;

        manifest.push(TileRecord {
            country: country.clone(),
            file_name,
            width: tile_meta.width,
            height: tile_meta.height,
            geo_transform: tile_meta.geo_transform,
        });
        manifest.save(output_dir)?;

        println!(
            "{} Saved {} {:?} in {:.2} seconds.",
            text::check_icon(),
            text::arrow_icon(),
            output_path,
            part_time.elapsed().as_secs_f64()
        );
    }

    Ok(SplitOutcome { manifest, skipped })
}
