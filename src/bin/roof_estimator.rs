//! Roof estimation for swissBUILDINGS3D: roof/wall/footprint areas, roof
//! shape and optional green-roof detection, chunked over a worker pool.

use anyhow::{bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use log::{info, warn, LevelFilter};
use openbuildings::gdb::{list_layers, GdbSource};
use openbuildings::green_roof::{GreenRoofAnalyzer, ImageryIndex};
use openbuildings::logging;
use openbuildings::pipeline::{
    log_final_summary, merge_chunks, process_chunk, worker_count, write_chunk_csv, ChunkSummary,
    DEFAULT_CHUNK_SIZE,
};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Extract roof characteristics from swissBUILDINGS3D building meshes.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Args {
    /// Path to the input file geodatabase (swissBUILDINGS3D)
    input_gdb: PathBuf,

    /// Output directory for results
    output_dir: PathBuf,

    /// Geodatabase layer name
    #[arg(long, default_value = "Building_solid")]
    layer: String,

    /// Limit number of buildings to process
    #[arg(long)]
    limit: Option<usize>,

    /// Number of parallel workers (default: CPU count - 1, max 8)
    #[arg(long)]
    workers: Option<usize>,

    /// Number of buildings per chunk
    #[arg(long, default_value_t = DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,

    /// List available layers in the geodatabase and exit
    #[arg(long)]
    list_layers: bool,

    /// Keep individual chunk CSV files after merging
    #[arg(long)]
    keep_chunks: bool,

    /// Directory containing SWISSIMAGE RS GeoTIFFs for green roof estimation
    #[arg(long)]
    rs_dir: Option<PathBuf>,

    /// Do not filter buildings by imagery coverage (process all)
    #[arg(long)]
    no_filter: bool,
}

fn main() {
    let args = Args::parse();
    if let Err(e) = run(&args) {
        eprintln!("{} {e:#}", "Error:".red().bold());
        std::process::exit(1);
    }
}

fn run(args: &Args) -> Result<()> {
    if args.list_layers {
        let layers = list_layers(&args.input_gdb)?;
        println!("Available layers in {}:", args.input_gdb.display());
        for layer in layers {
            println!("  - {layer}");
        }
        return Ok(());
    }

    if !args.input_gdb.exists() {
        bail!("Input geodatabase not found: {}", args.input_gdb.display());
    }
    std::fs::create_dir_all(&args.output_dir)
        .with_context(|| format!("creating output directory {}", args.output_dir.display()))?;

    logging::init(&args.output_dir.join("roof_estimator.log"), LevelFilter::Info)?;

    info!("{}", "=".repeat(60));
    info!("ROOF ESTIMATOR FOR SWISSBUILDINGS3D");
    info!("{}", "=".repeat(60));
    info!("Input: {}", args.input_gdb.display());
    info!("Output: {}", args.output_dir.display());
    info!("Layer: {}", args.layer);
    info!("Chunk size: {}", args.chunk_size);
    if let Some(limit) = args.limit {
        info!("Limit: {limit} buildings");
    }

    // Optional green-roof analyzer; its tile index doubles as the spatial
    // pre-filter for the geodatabase read.
    let analyzer = match &args.rs_dir {
        Some(rs_dir) => {
            if !rs_dir.is_dir() {
                bail!("RS directory not found: {}", rs_dir.display());
            }
            info!("Green roof analysis: enabled (RS data: {})", rs_dir.display());
            Some(GreenRoofAnalyzer::new(ImageryIndex::build(rs_dir)?))
        }
        None => None,
    };

    let filter_bbox = match (&analyzer, args.no_filter) {
        (Some(analyzer), false) => {
            let bounds = analyzer.coverage_bounds();
            match bounds {
                Some(bounds) => info!("Filtering buildings within RS bounds: {bounds:?}"),
                None => warn!("Could not determine RS bounds. Processing all buildings."),
            }
            bounds
        }
        _ => None,
    };

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = stop.clone();
        ctrlc::set_handler(move || {
            stop.store(true, Ordering::SeqCst);
        })
        .context("installing shutdown handler")?;
    }

    let workers = worker_count(args.workers);
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(workers)
        .build()
        .context("building worker pool")?;

    let stem = args.output_dir.join(format!(
        "roof_analysis_{}",
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ));

    let start = Instant::now();
    let mut source = GdbSource::open(&args.input_gdb, &args.layer)?;
    let mut summaries: Vec<ChunkSummary> = Vec::new();

    source.stream_chunks(args.chunk_size, args.limit, filter_bbox, |chunk_num, chunk| {
        if stop.load(Ordering::SeqCst) {
            warn!("Shutdown requested, stopping after completed chunks");
            return Ok(false);
        }

        let records = process_chunk(&chunk, chunk_num, &pool, analyzer.as_ref());
        drop(chunk);

        let summary = write_chunk_csv(&records, &stem, chunk_num)?;
        info!(
            "Chunk {chunk_num} complete: {}/{} successful",
            summary.successful, summary.total
        );
        if !summary.roof_shapes.is_empty() {
            info!("Roof shapes: {:?}", summary.roof_shapes);
        }
        summaries.push(summary);

        Ok(!stop.load(Ordering::SeqCst))
    })?;

    if !summaries.is_empty() {
        let final_path = merge_chunks(&summaries, &stem, args.keep_chunks)?;
        info!("Saved complete CSV to {}", final_path.display());
        log_final_summary(&summaries);
        if args.keep_chunks {
            info!("Keeping individual chunk files as requested");
        }
    }

    let elapsed = start.elapsed().as_secs_f64();
    info!(
        "Processing completed in {elapsed:.1} seconds ({:.1} minutes)",
        elapsed / 60.0
    );

    Ok(())
}
