//! GeoTIFF plumbing shared by the splitter and the merger: metadata records,
//! north-up transform math, pixel windows and Int16 output with creation profiles.

use anyhow::{bail, Context, Result};
use gdal::raster::{Buffer, GdalDataType, GdalType, RasterCreationOptions};
use gdal::vector::Geometry;
use gdal::{Dataset, DriverManager};
use ndarray::{Array3, ArrayView2, Axis};
use std::path::Path;

use crate::rescale::{is_nodata, SCALE_MAX};

/// Sentinel used when a source raster declares none, or declares one that Int16 cannot hold.
pub const FALLBACK_NODATA: f64 = -9999.0;

/// Driver used for every file this crate writes.
pub const OUTPUT_DRIVER: &str = "GTiff";

/// Extension of tile and mosaic files.
pub const TILE_EXTENSION: &str = "tif";

/// Pixel type of every file this crate writes.
pub const OUTPUT_DATA_TYPE: GdalDataType = GdalDataType::Int16;

/// Internal block size of merged mosaics.
pub const MOSAIC_BLOCK_SIZE: usize = 512;

/// Geographic rectangle in the raster's coordinate system.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bounds {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl Bounds {
    /// Footprint of a north-up raster of `size` (cols, rows).
    pub fn from_transform(gt: &[f64; 6], size: (usize, usize)) -> Self {
        Bounds {
            west: gt[0],
            north: gt[3],
            east: gt[0] + size.0 as f64 * gt[1],
            south: gt[3] + size.1 as f64 * gt[5],
        }
    }

    pub fn from_geometry(geometry: &Geometry) -> Self {
        let env = geometry.envelope();
        Bounds {
            west: env.MinX,
            south: env.MinY,
            east: env.MaxX,
            north: env.MaxY,
        }
    }

    pub fn union(&self, other: &Bounds) -> Bounds {
        Bounds {
            west: self.west.min(other.west),
            south: self.south.min(other.south),
            east: self.east.max(other.east),
            north: self.north.max(other.north),
        }
    }

    pub fn to_geometry(&self) -> Result<Geometry> {
        Geometry::bbox(self.west, self.south, self.east, self.north)
            .context("Failed to build footprint geometry")
    }
}

/// Rejects rotated or south-up transforms; reprojection is out of scope.
pub fn ensure_north_up(gt: &[f64; 6]) -> Result<()> {
    if gt[2] != 0.0 || gt[4] != 0.0 {
        bail!("Rotated geotransforms are not supported: {:?}", gt);
    }
    if gt[1] <= 0.0 || gt[5] >= 0.0 {
        bail!("Only north-up rasters are supported: {:?}", gt);
    }
    Ok(())
}

// Pixel coordinates within 1e-6 of a grid line are treated as on it.
fn snap(v: f64) -> f64 {
    let r = v.round();
    if (v - r).abs() < 1e-6 {
        r
    } else {
        v
    }
}

/// Rectangular block of pixels, in (col, row) order like GDAL windows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PixelWindow {
    pub col_off: usize,
    pub row_off: usize,
    pub width: usize,
    pub height: usize,
}

impl PixelWindow {
    /// Smallest window of a raster (`gt`, `size`) covering `bounds`, clipped to the raster.
    pub fn covering(gt: &[f64; 6], size: (usize, usize), bounds: &Bounds) -> Self {
        let col_start = snap((bounds.west - gt[0]) / gt[1]).floor();
        let col_stop = snap((bounds.east - gt[0]) / gt[1]).ceil();
        let row_start = snap((bounds.north - gt[3]) / gt[5]).floor();
        let row_stop = snap((bounds.south - gt[3]) / gt[5]).ceil();

        let clip = |v: f64, max: usize| v.max(0.0).min(max as f64) as usize;
        let c0 = clip(col_start, size.0);
        let c1 = clip(col_stop, size.0);
        let r0 = clip(row_start, size.1);
        let r1 = clip(row_stop, size.1);

        PixelWindow {
            col_off: c0,
            row_off: r0,
            width: c1.saturating_sub(c0),
            height: r1.saturating_sub(r0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Geotransform of the window, i.e. `gt` shifted to the window origin.
    pub fn transform(&self, gt: &[f64; 6]) -> [f64; 6] {
        [
            gt[0] + self.col_off as f64 * gt[1],
            gt[1],
            0.0,
            gt[3] + self.row_off as f64 * gt[5],
            0.0,
            gt[5],
        ]
    }
}

/// Creation options for written GeoTIFFs.
#[derive(Debug, Clone, PartialEq)]
pub struct OutputProfile {
    pub compress: String,
    /// Internal tiling block edge; `None` keeps GDAL's striped layout.
    pub block_size: Option<usize>,
    /// `BIGTIFF=IF_SAFER`, for mosaics that may cross the 4 GiB limit.
    pub big_tiff_if_safer: bool,
}

impl OutputProfile {
    /// Profile of per-country tiles.
    pub fn country_tile() -> Self {
        OutputProfile {
            compress: "DEFLATE".to_string(),
            block_size: None,
            big_tiff_if_safer: false,
        }
    }

    /// Profile of merged mosaics.
    pub fn mosaic() -> Self {
        OutputProfile {
            compress: "DEFLATE".to_string(),
            block_size: Some(MOSAIC_BLOCK_SIZE),
            big_tiff_if_safer: true,
        }
    }

    pub fn creation_options(&self) -> Result<RasterCreationOptions> {
        let mut options = RasterCreationOptions::new();
        options.set_name_value("COMPRESS", &self.compress)?;
        if let Some(block) = self.block_size {
            options.set_name_value("TILED", "YES")?;
            options.set_name_value("BLOCKXSIZE", &block.to_string())?;
            options.set_name_value("BLOCKYSIZE", &block.to_string())?;
        }
        if self.big_tiff_if_safer {
            options.set_name_value("BIGTIFF", "IF_SAFER")?;
        }
        Ok(options)
    }
}

/// Metadata record of a raster: everything needed to write a matching file.
#[derive(Debug, Clone, PartialEq)]
pub struct RasterMeta {
    pub driver: String,
    pub width: usize,
    pub height: usize,
    pub band_count: usize,
    pub geo_transform: [f64; 6],
    pub projection: String,
    pub nodata: f64,
    pub data_type: String,
}

impl RasterMeta {
    /// Reads the record from an open dataset. A missing no-data value becomes [`FALLBACK_NODATA`].
    pub fn from_dataset(dataset: &Dataset) -> Result<Self> {
        let band = dataset.rasterband(1)?;
        let (width, height) = dataset.raster_size();
        let geo_transform = dataset.geo_transform()?;
        ensure_north_up(&geo_transform)?;

        Ok(RasterMeta {
            driver: dataset.driver().short_name(),
            width,
            height,
            band_count: dataset.raster_count(),
            geo_transform,
            projection: dataset.projection(),
            nodata: band.no_data_value().unwrap_or(FALLBACK_NODATA),
            data_type: band.band_type().name(),
        })
    }

    pub fn bounds(&self) -> Bounds {
        Bounds::from_transform(&self.geo_transform, (self.width, self.height))
    }

    /// Record of the given window of this raster, as it will be written.
    ///
    /// `nodata` stays the sentinel carried by the pixel data; [`write_int16`] maps it
    /// through [`int16_nodata`] on the way out.
    pub fn for_window(&self, window: &PixelWindow) -> Self {
        RasterMeta {
            driver: OUTPUT_DRIVER.to_string(),
            width: window.width,
            height: window.height,
            geo_transform: window.transform(&self.geo_transform),
            data_type: OUTPUT_DATA_TYPE.name(),
            ..self.clone()
        }
    }
}

/// Opens a raster with the path in the error context.
pub fn open_raster(path: &Path) -> Result<Dataset> {
    Dataset::open(path).with_context(|| format!("Failed to open raster {:?}", path))
}

/// The sentinel written into Int16 outputs for a given source sentinel.
pub fn int16_nodata(nodata: f64) -> f64 {
    if nodata.fract() == 0.0 && nodata >= i16::MIN as f64 && nodata <= i16::MAX as f64 {
        nodata
    } else {
        FALLBACK_NODATA
    }
}

/// True when the Int16 sentinel for `nodata` is also a valid rescaled value.
/// Such rasters lose their zero-valued (or other in-range) pixels to No Data.
pub fn nodata_in_scale(nodata: f64) -> bool {
    let out = int16_nodata(nodata);
    (0.0..=SCALE_MAX).contains(&out)
}

/// `nodata` as GDAL hands it back when reading the band as Int16: rounded and saturated.
pub fn nodata_as_i16(nodata: f64) -> i16 {
    nodata.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

fn to_int16(value: f64, nodata: f64, out_nodata: i16) -> i16 {
    if is_nodata(value, Some(nodata)) {
        out_nodata
    } else {
        value.round() as i16
    }
}

/// Reads a window of every band as `(bands, rows, cols)`, converted to `T` by GDAL.
pub fn read_window<T>(dataset: &Dataset, window: &PixelWindow) -> Result<Array3<T>>
where
    T: GdalType + Copy + Default,
{
    let band_count = dataset.raster_count();
    let shape = (band_count, window.height, window.width);
    let mut data = Array3::<T>::from_elem(shape, T::default());

    for b in 0..band_count {
        let band = dataset.rasterband(b + 1)?;
        let buffer: Buffer<T> = band.read_as(
            (window.col_off as isize, window.row_off as isize),
            (window.width, window.height),
            (window.width, window.height),
            None,
        )?;
        let plane = ArrayView2::from_shape((window.height, window.width), buffer.data())?;
        data.index_axis_mut(Axis(0), b).assign(&plane);
    }

    Ok(data)
}

/// Reads a whole raster as `(bands, rows, cols)` together with its metadata record.
pub fn read_raster<T>(path: &Path) -> Result<(RasterMeta, Array3<T>)>
where
    T: GdalType + Copy + Default,
{
    let dataset = open_raster(path)?;
    let meta = RasterMeta::from_dataset(&dataset)?;
    let window = PixelWindow {
        col_off: 0,
        row_off: 0,
        width: meta.width,
        height: meta.height,
    };
    let data = read_window(&dataset, &window)?;
    Ok((meta, data))
}

/// Writes `data` (`(bands, rows, cols)`) as an Int16 GeoTIFF described by `meta`.
///
/// Pixels equal to `meta.nodata` are written as the Int16 sentinel; all others are
/// rounded to the nearest integer.
pub fn write_int16(
    path: &Path,
    meta: &RasterMeta,
    data: &Array3<f64>,
    profile: &OutputProfile,
) -> Result<()> {
    let out_nodata = int16_nodata(meta.nodata);
    let pixels = data.mapv(|v| to_int16(v, meta.nodata, out_nodata as i16));
    let out_meta = RasterMeta {
        nodata: out_nodata,
        ..meta.clone()
    };
    write_int16_pixels(path, &out_meta, &pixels, profile)
}

/// Writes Int16 pixels as they are, with `meta.nodata` as the band sentinel.
/// The dataset is closed before returning.
pub fn write_int16_pixels(
    path: &Path,
    meta: &RasterMeta,
    data: &Array3<i16>,
    profile: &OutputProfile,
) -> Result<()> {
    let (bands, rows, cols) = data.dim();
    let driver = DriverManager::get_driver_by_name(OUTPUT_DRIVER)?;
    let options = profile.creation_options()?;
    let mut out_ds = driver
        .create_with_band_type_with_options::<i16, _>(path, cols, rows, bands, &options)
        .with_context(|| format!("Failed to create {:?}", path))?;

    out_ds.set_geo_transform(&meta.geo_transform)?;
    if !meta.projection.is_empty() {
        out_ds.set_projection(&meta.projection)?;
    }

    for b in 0..bands {
        let mut out_band = out_ds.rasterband(b + 1)?;
        out_band.set_no_data_value(Some(meta.nodata))?;
        let pixels: Vec<i16> = data.index_axis(Axis(0), b).iter().copied().collect();
        let mut buffer = Buffer::new((cols, rows), pixels);
        out_band.write((0, 0), (cols, rows), &mut buffer)?;
    }

    out_ds.flush_cache()?;
    out_ds
        .close()
        .with_context(|| format!("Failed to close {:?}", path))?;
    Ok(())
}
