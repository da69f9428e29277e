use anyhow::Result;
use clap::Parser;
use country_tiles::{parse_years, pipeline, text, PipelineConfig};
use std::path::PathBuf;
use std::time::Instant;

/// Command-line arguments for the country-tiles tool.
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "Clips a global raster into rescaled per-country tiles and mosaics them back, year by year."
)]
struct Args {
    /// JSON configuration file. Command-line options override its values.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Directory holding the yearly source rasters.
    #[arg(long)]
    source_dir: Option<PathBuf>,
    /// File name prefix of the source rasters (<prefix>_<year>.tif).
    #[arg(long)]
    prefix: Option<String>,
    /// Administrative boundary file, in any vector format GDAL reads.
    #[arg(long)]
    admin: Option<PathBuf>,
    /// Output root directory for tiles and mosaics.
    #[arg(long)]
    output: Option<PathBuf>,
    /// Years to process: 2019, 2012-2019 or 2012,2015,2019.
    #[arg(long)]
    years: Option<String>,
    /// Remove the per-country tiles after each successful merge.
    #[arg(long, conflicts_with = "keep_tiles")]
    cleanup: bool,
    /// Keep the per-country tiles after merging.
    #[arg(long)]
    keep_tiles: bool,
    /// Z-score above which pixel values are left out of the rescale bounds.
    #[arg(long)]
    threshold: Option<f64>,
    /// Boundary attribute holding the country code.
    #[arg(long)]
    country_field: Option<String>,
    /// Report a failed year and continue with the next one.
    #[arg(long)]
    keep_going: bool,
}

fn build_config(args: Args) -> Result<PipelineConfig> {
    let mut config = match &args.config {
        Some(path) => PipelineConfig::load(path)?,
        None => PipelineConfig::default(),
    };

    if let Some(dir) = args.source_dir {
        config.source_dir = dir;
    }
    if let Some(prefix) = args.prefix {
        config.source_prefix = prefix;
    }
    if let Some(admin) = args.admin {
        config.admin_path = admin;
    }
    if let Some(output) = args.output {
        config.output_root = output;
    }
    if let Some(years) = args.years {
        config.years = parse_years(&years)?;
    }
    if args.cleanup {
        config.cleanup = true;
    }
    if args.keep_tiles {
        config.cleanup = false;
    }
    if let Some(threshold) = args.threshold {
        config.outlier_threshold = threshold;
    }
    if let Some(field) = args.country_field {
        config.country_field = field;
    }
    if args.keep_going {
        config.keep_going = true;
    }

    config.validate()?;
    Ok(config)
}

fn main() {
    let start_time = Instant::now();
    let args = Args::parse();

    let line = "-".repeat(72);
    let dline = "=".repeat(72);

    println!(
        "\n{}\n{}\nTool for clipping a global raster into rescaled per-country tiles\nand mosaicking them back together.\n{}\n",
        format!(
            "{} {}",
            text::highlight("Country Tiles"),
            text::highlight(env!("CARGO_PKG_VERSION"))
        ),
        line,
        dline
    );

    let config = match build_config(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{} {:#}", text::error_icon(), e);
            std::process::exit(2);
        }
    };

    println!("{} Configuration:", text::bold("Processing"));
    println!("  {:<20} {}", "Source Directory:", config.source_dir.display());
    println!("  {:<20} {}", "Source Prefix:", config.source_prefix);
    println!("  {:<20} {}", "Boundaries:", config.admin_path.display());
    println!("  {:<20} {}", "Country Field:", config.country_field);
    println!("  {:<20} {}", "Output Root:", config.output_root.display());
    println!("  {:<20} {:?}", "Years:", config.years);
    println!("  {:<20} {}", "Outlier Threshold:", config.outlier_threshold);
    println!("  {:<20} {}", "Remove Tiles:", config.cleanup);
    println!("  {:<20} {}", "Keep Going:", config.keep_going);
    println!("{}", dline);

    match pipeline::run(&config) {
        Ok(outcomes) => {
            println!("\n{}", dline);
            for outcome in &outcomes {
                println!(
                    "{} {}: {} tiles, {} skipped {} {:?}",
                    text::check_icon(),
                    outcome.year,
                    outcome.tiles,
                    outcome.skipped,
                    text::arrow_icon(),
                    outcome.merged
                );
            }
            println!("{}", text::success("Pipeline completed successfully."));
            println!(
                "Total elapsed time: {:.2} seconds.",
                start_time.elapsed().as_secs_f64()
            );
        }
        Err(e) => {
            eprintln!("\n{} {}", text::error_icon(), text::error(format!("{:#}", e)));
            std::process::exit(1);
        }
    }
}
