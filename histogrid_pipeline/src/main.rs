//! HistoGrid CLI
//!
//! Operator entrypoint for the annotation pipeline: ingest annotation
//! sets, run precompute sweeps, and query cells or raw viewport geometry
//! straight from the embedded database.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use histogrid_core::Resolution;
use histogrid_pipeline::{PrecomputeService, RequestedBounds, ViewportRequest};
use histogrid_store::{AnnotationSet, AnnotationStore, StoreHandle};
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

/// HistoGrid annotation density pipeline
#[derive(Parser, Debug)]
#[command(name = "histogrid")]
#[command(about = "Precompute and query hexagonal annotation density grids", long_about = None)]
struct Args {
    /// Directory for the embedded database
    #[arg(long, default_value = "histogrid_data")]
    data_dir: PathBuf,

    /// Verbose output
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest an annotation file and precompute its cells
    Ingest {
        /// Path to the GeoJSON annotation file
        file: PathBuf,

        /// Slide the annotations belong to
        #[arg(short, long)]
        slide: String,

        /// Stored set name (defaults to the file's name)
        #[arg(long)]
        name: Option<String>,

        /// Analysis model that produced the set
        #[arg(long)]
        model: Option<String>,

        /// Slide width in pixels
        #[arg(long)]
        width: u32,

        /// Slide height in pixels
        #[arg(long)]
        height: u32,

        /// Comma-separated H3 resolutions (0-15)
        #[arg(short, long, default_value = "2")]
        resolutions: String,

        /// Replace an existing set with the same name
        #[arg(long)]
        overwrite: bool,
    },

    /// Recompute the cells of one stored annotation set
    Precompute {
        /// Stored set name
        name: String,

        /// Slide the set belongs to
        #[arg(short, long)]
        slide: String,

        /// Comma-separated H3 resolutions (0-15)
        #[arg(short, long, default_value = "2")]
        resolutions: String,
    },

    /// Recompute every stored annotation set
    PrecomputeAll {
        /// Comma-separated H3 resolutions (0-15)
        #[arg(short, long, default_value = "2")]
        resolutions: String,

        /// JSON report for CI parsing
        #[arg(long)]
        json: bool,
    },

    /// Print the stored cells of a slide at one resolution
    Cells {
        /// Slide to query
        slide: String,

        /// H3 resolution (0-15)
        #[arg(short, long, default_value = "2")]
        resolution: u8,
    },

    /// Print the raw features inside a viewport
    Viewport {
        /// Slide to query
        slide: String,

        /// Bounds as xMin,xMax,yMin,yMax in unit slide coordinates
        #[arg(short, long)]
        bounds: String,

        /// Restrict sources to this analysis model
        #[arg(long)]
        model: Option<String>,

        /// Patch mode: return every feature whole
        #[arg(long)]
        patch: bool,
    },

    /// List the stored annotation sets
    List,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder().with_max_level(level).finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    let handle = StoreHandle::open(&args.data_dir)
        .with_context(|| format!("opening database at {}", args.data_dir.display()))?;
    let annotations = Arc::new(handle.annotations()?);
    let hex_cells = Arc::new(handle.hex_cells()?);
    let service = PrecomputeService::new(annotations.clone(), hex_cells);

    match args.command {
        Command::Ingest {
            file,
            slide,
            name,
            model,
            width,
            height,
            resolutions,
            overwrite,
        } => {
            let resolutions = parse_resolutions(&resolutions)?;
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let features: serde_json::Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;
            let filename = match name {
                Some(name) => name,
                None => file
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .context("annotation path has no filename")?,
            };

            let set = AnnotationSet {
                filename,
                slide_id: slide,
                model,
                image_width: width,
                image_height: height,
                features,
            };
            let report = service.ingest(&set, Some(resolutions.as_slice()), overwrite)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Precompute {
            name,
            slide,
            resolutions,
        } => {
            let resolutions = parse_resolutions(&resolutions)?;
            let report = service.compute_for_unit(&name, &slide, Some(resolutions.as_slice()))?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::PrecomputeAll { resolutions, json } => {
            let resolutions = parse_resolutions(&resolutions)?;
            let report = service.compute_for_all_units(Some(resolutions.as_slice()))?;

            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                for unit in &report.completed {
                    info!(
                        "✓ '{}' on slide '{}': {} cells",
                        unit.filename,
                        unit.slide_id,
                        unit.cells_written()
                    );
                }
                for skipped in &report.skipped {
                    error!(
                        "✗ '{}' on slide '{}' failed at stage {}: {}",
                        skipped.filename, skipped.slide_id, skipped.stage, skipped.reason
                    );
                }
                info!(
                    "Run {}: {} completed, {} skipped",
                    report.run_id,
                    report.completed.len(),
                    report.skipped.len()
                );
            }

            // Exit with proper code for CI
            if !report.all_completed() {
                std::process::exit(1);
            }
        }

        Command::Cells { slide, resolution } => {
            let resolution = Resolution::try_from(resolution)
                .with_context(|| format!("resolution {} is outside the H3 range 0-15", resolution))?;
            let cells = service.query_hex_cells(&slide, resolution)?;
            println!("{}", serde_json::to_string_pretty(&cells)?);
        }

        Command::Viewport {
            slide,
            bounds,
            model,
            patch,
        } => {
            let request = ViewportRequest {
                slide_id: Some(slide),
                bounds: Some(parse_bounds(&bounds)?),
                model,
                patch,
            };
            let sources = service.query_viewport(&request)?;
            println!("{}", serde_json::to_string_pretty(&sources)?);
        }

        Command::List => {
            let sets = annotations.all()?;
            if sets.is_empty() {
                info!("No annotation sets stored");
            }
            for set in &sets {
                println!(
                    "{}\t{}\t{}x{}\t{}",
                    set.slide_id,
                    set.filename,
                    set.image_width,
                    set.image_height,
                    set.model.as_deref().unwrap_or("-")
                );
            }
        }
    }

    Ok(())
}

fn parse_resolutions(raw: &str) -> Result<Vec<Resolution>> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            let level: u8 = part
                .parse()
                .with_context(|| format!("invalid resolution '{}'", part))?;
            Resolution::try_from(level)
                .with_context(|| format!("resolution {} is outside the H3 range 0-15", level))
        })
        .collect()
}

fn parse_bounds(raw: &str) -> Result<RequestedBounds> {
    let parts = raw
        .split(',')
        .map(|part| {
            part.trim()
                .parse::<f64>()
                .with_context(|| format!("invalid bound '{}'", part))
        })
        .collect::<Result<Vec<f64>>>()?;
    if parts.len() != 4 {
        bail!("bounds must be xMin,xMax,yMin,yMax, got {} values", parts.len());
    }
    Ok(RequestedBounds {
        x_min: parts[0],
        x_max: parts[1],
        y_min: parts[2],
        y_max: parts[3],
    })
}
