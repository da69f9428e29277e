use anyhow::{bail, Result};
use std::path::PathBuf;
use std::time::Instant;

use crate::config::PipelineConfig;
use crate::merge::merge_countries;
use crate::split::split_countries;
use crate::text;

/// What one year produced.
#[derive(Debug, Clone, PartialEq)]
pub struct YearOutcome {
    pub year: u16,
    pub tiles: usize,
    pub skipped: usize,
    pub merged: PathBuf,
}

/// Splits and merges a single year.
pub fn run_year(config: &PipelineConfig, year: u16) -> Result<YearOutcome> {
    let source = config.source_path(year);
    if !source.is_file() {
        bail!("Input file {:?} does not exist", source);
    }
    let work_dir = config.work_dir(year);
    let merged = config.merged_path(year);

    let part_time = Instant::now();
    println!(
        "\n{} {} {} {:?}",
        text::highlight(format!("Year {}", year)),
        text::light(format!("{:?}", source)),
        text::arrow_icon(),
        work_dir
    );
    let outcome = split_countries(
        &config.admin_path,
        &source,
        &work_dir,
        &config.split_options(),
    )?;
    println!(
        "{} {} tiles written, {} features skipped in {:.2} seconds.",
        text::check_icon(),
        outcome.manifest.len(),
        outcome.skipped.len(),
        part_time.elapsed().as_secs_f64()
    );

    let part_time = Instant::now();
    let summary = merge_countries(&work_dir, &merged, config.cleanup)?;
    println!(
        "{} Mosaic created in {:.2} seconds.",
        text::check_icon(),
        part_time.elapsed().as_secs_f64()
    );

    Ok(YearOutcome {
        year,
        tiles: summary.tile_count,
        skipped: outcome.skipped.len(),
        merged,
    })
}

/// Runs every configured year in order.
///
/// The first failure aborts the run unless `keep_going` is set, in which case
/// failed years are reported and the run fails once all years were attempted.
pub fn run(config: &PipelineConfig) -> Result<Vec<YearOutcome>> {
    config.validate()?;

    let mut outcomes = Vec::with_capacity(config.years.len());
    let mut failed = Vec::new();

    for &year in &config.years {
        match run_year(config, year) {
            Ok(outcome) => outcomes.push(outcome),
            Err(e) if config.keep_going => {
                eprintln!("{} Year {} failed: {:#}", text::error_icon(), year, e);
                failed.push(year);
            }
            Err(e) => return Err(e.context(format!("Year {} failed", year))),
        }
    }

    if !failed.is_empty() {
        bail!("{} year(s) failed: {:?}", failed.len(), failed);
    }
    Ok(outcomes)
}
