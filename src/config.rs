use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::rescale::DEFAULT_OUTLIER_THRESHOLD;
use crate::split::{SplitOptions, DEFAULT_COUNTRY_FIELD};

/// Configuration of a multi-year run.
///
/// For a year `Y` the source raster is `source_dir/<source_prefix>_Y.tif`, tiles go to
/// `output_root/Y/` and the mosaic to `output_root/<source_prefix>_Y.tif`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub source_dir: PathBuf,
    pub source_prefix: String,
    pub admin_path: PathBuf,
    pub output_root: PathBuf,
    pub years: Vec<u16>,
    /// Remove each year's tile directory once its mosaic is in place.
    pub cleanup: bool,
    pub outlier_threshold: f64,
    pub country_field: String,
    /// Report a failed year and continue with the next one instead of aborting.
    pub keep_going: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        PipelineConfig {
            source_dir: PathBuf::from("data"),
            source_prefix: "Electricity_access".to_string(),
            admin_path: PathBuf::from("data/adm0_3857.fgb"),
            output_root: PathBuf::from("output"),
            years: (2012..=2019).collect(),
            cleanup: true,
            outlier_threshold: DEFAULT_OUTLIER_THRESHOLD,
            country_field: DEFAULT_COUNTRY_FIELD.to_string(),
            keep_going: false,
        }
    }
}

impl PipelineConfig {
    /// Loads a JSON configuration; missing keys take their default values.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read configuration {:?}", path))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Malformed configuration {:?}", path))?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.years.is_empty() {
            bail!("No years to process");
        }
        if !self.outlier_threshold.is_finite() || self.outlier_threshold <= 0.0 {
            bail!(
                "Outlier threshold must be a positive number, got {}",
                self.outlier_threshold
            );
        }
        if self.country_field.trim().is_empty() {
            bail!("Country field name must not be empty");
        }
        Ok(())
    }

    pub fn source_path(&self, year: u16) -> PathBuf {
        self.source_dir
            .join(format!("{}_{}.tif", self.source_prefix, year))
    }

    pub fn work_dir(&self, year: u16) -> PathBuf {
        self.output_root.join(year.to_string())
    }

    pub fn merged_path(&self, year: u16) -> PathBuf {
        self.output_root
            .join(format!("{}_{}.tif", self.source_prefix, year))
    }

    pub fn split_options(&self) -> SplitOptions {
        SplitOptions {
            country_field: self.country_field.clone(),
            outlier_threshold: self.outlier_threshold,
        }
    }
}

/// Parses `2019`, `2012-2019` (inclusive) or comma-separated mixes of both.
/// Duplicates are dropped, first occurrence wins.
pub fn parse_years(input: &str) -> Result<Vec<u16>> {
    let mut years: Vec<u16> = Vec::new();

    for part in input.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        let range = match part.split_once('-') {
            Some((start, end)) => {
                let start: u16 = start
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid start year in {:?}", part))?;
                let end: u16 = end
                    .trim()
                    .parse()
                    .with_context(|| format!("Invalid end year in {:?}", part))?;
                if start > end {
                    bail!("Year range {:?} is reversed", part);
                }
                start..=end
            }
            None => {
                let year: u16 = part
                    .parse()
                    .with_context(|| format!("Invalid year {:?}", part))?;
                year..=year
            }
        };

        for year in range {
            if !years.contains(&year) {
                years.push(year);
            }
        }
    }

    if years.is_empty() {
        bail!("No years given in {:?}", input);
    }
    Ok(years)
}
