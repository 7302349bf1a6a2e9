//! Chunked parallel processing for the roof estimator.
//!
//! Chunks are processed strictly in sequence; within a chunk the buildings
//! fan out over a rayon pool and the results are reassembled in input
//! order. Every completed chunk is flushed to a numbered CSV before the
//! next chunk is read, so peak memory stays bounded by the chunk size.

use crate::gdb::BuildingSolid;
use crate::green_roof::{GreenRoofAnalyzer, GreenRoofResult, GreenRoofStatus};
use crate::mesh::convex_hull_footprint;
use crate::roof_analysis::{analyze_building_roof, AnalysisStatus, RoofAnalysis, RoofShape};
use anyhow::{Context, Result};
use log::info;
use rayon::prelude::*;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

/// Buildings per chunk; one chunk of meshes and results is alive at a time.
pub const DEFAULT_CHUNK_SIZE: usize = 100_000;

/// Maximum worker threads regardless of core count.
const MAX_WORKERS: usize = 8;

/// Worker count: the requested value capped at the core count, or
/// cores − 1 capped at eight when unspecified.
pub fn worker_count(requested: Option<usize>) -> usize {
    let cores = num_cpus::get();
    match requested {
        Some(n) if n > 0 => n.min(cores).max(1),
        _ => cores.saturating_sub(1).clamp(1, MAX_WORKERS),
    }
}

/// One output row of the roof pipeline: feature identity plus analysis.
#[derive(Debug, Clone, Serialize)]
pub struct RoofRecord {
    pub fid: u64,
    pub uuid: Option<String>,
    pub objektart: Option<String>,
    pub name_komplett: Option<String>,

    pub roof_area_m2: Option<f64>,
    pub wall_area_m2: Option<f64>,
    pub footprint_area_m2: Option<f64>,
    pub sloped_roof_area_m2: Option<f64>,
    pub flat_roof_area_m2: Option<f64>,
    pub total_surface_area_m2: Option<f64>,
    pub roof_shape: Option<RoofShape>,
    pub roof_shape_confidence: Option<f64>,
    pub roof_slope_primary_deg: Option<f64>,
    pub roof_slope_secondary_deg: Option<f64>,
    pub roof_azimuth_primary_deg: Option<f64>,
    pub roof_ridge_orientation: Option<f64>,
    pub roof_face_count: Option<usize>,
    pub building_height_m: Option<f64>,
    pub eave_height_m: Option<f64>,
    pub ridge_height_m: Option<f64>,
    pub wall_perimeter_m: Option<f64>,
    pub min_elevation_m: Option<f64>,
    pub max_elevation_m: Option<f64>,
    pub horizontal_face_count: Option<usize>,
    pub vertical_face_count: Option<usize>,
    pub sloped_face_count: Option<usize>,
    pub analysis_status: AnalysisStatus,
    pub analysis_error: Option<String>,

    pub green_roof_area_m2: Option<f64>,
    pub green_roof_percentage: Option<f64>,
    pub ndvi_mean: Option<f64>,
    pub ndvi_max: Option<f64>,
    pub green_roof_status: Option<GreenRoofStatus>,
}

impl RoofRecord {
    fn new(solid: &BuildingSolid, analysis: RoofAnalysis, green: Option<GreenRoofResult>) -> Self {
        Self {
            fid: solid.fid,
            uuid: solid.uuid.clone(),
            objektart: solid.objektart.clone(),
            name_komplett: solid.name_komplett.clone(),
            roof_area_m2: analysis.roof_area_m2,
            wall_area_m2: analysis.wall_area_m2,
            footprint_area_m2: analysis.footprint_area_m2,
            sloped_roof_area_m2: analysis.sloped_roof_area_m2,
            flat_roof_area_m2: analysis.flat_roof_area_m2,
            total_surface_area_m2: analysis.total_surface_area_m2,
            roof_shape: analysis.roof_shape,
            roof_shape_confidence: analysis.roof_shape_confidence,
            roof_slope_primary_deg: analysis.roof_slope_primary_deg,
            roof_slope_secondary_deg: analysis.roof_slope_secondary_deg,
            roof_azimuth_primary_deg: analysis.roof_azimuth_primary_deg,
            roof_ridge_orientation: analysis.roof_ridge_orientation,
            roof_face_count: analysis.roof_face_count,
            building_height_m: analysis.building_height_m,
            eave_height_m: analysis.eave_height_m,
            ridge_height_m: analysis.ridge_height_m,
            wall_perimeter_m: analysis.wall_perimeter_m,
            min_elevation_m: analysis.min_elevation_m,
            max_elevation_m: analysis.max_elevation_m,
            horizontal_face_count: analysis.horizontal_face_count,
            vertical_face_count: analysis.vertical_face_count,
            sloped_face_count: analysis.sloped_face_count,
            analysis_status: analysis.analysis_status,
            analysis_error: analysis.analysis_error,
            green_roof_area_m2: green.as_ref().map(|g| g.green_roof_area_m2),
            green_roof_percentage: green.as_ref().map(|g| g.green_roof_percentage),
            ndvi_mean: green.as_ref().and_then(|g| g.ndvi_mean),
            ndvi_max: green.as_ref().and_then(|g| g.ndvi_max),
            green_roof_status: green.map(|g| g.green_roof_status),
        }
    }
}

/// Analyzes one building; per-building failures land in the record status.
fn process_single(solid: &BuildingSolid, analyzer: Option<&GreenRoofAnalyzer>) -> RoofRecord {
    if solid.mesh.is_empty() {
        let analysis = RoofAnalysis::failed(format!(
            "Empty geometry: {} vertices, {} faces",
            solid.mesh.vertex_count(),
            solid.mesh.face_count()
        ));
        return RoofRecord::new(solid, analysis, None);
    }

    let analysis = analyze_building_roof(&solid.mesh);

    let green = analyzer.map(|analyzer| {
        let footprint = solid
            .footprint
            .clone()
            .or_else(|| convex_hull_footprint(&solid.mesh.vertices));
        match footprint {
            Some(footprint) => analyzer.analyze(&footprint),
            None => GreenRoofResult {
                green_roof_area_m2: 0.0,
                green_roof_percentage: 0.0,
                ndvi_mean: None,
                ndvi_max: None,
                green_roof_status: GreenRoofStatus::Error,
            },
        }
    });

    RoofRecord::new(solid, analysis, green)
}

/// Processes one chunk on the given pool, preserving input order.
pub fn process_chunk(
    chunk: &[BuildingSolid],
    chunk_num: usize,
    pool: &rayon::ThreadPool,
    analyzer: Option<&GreenRoofAnalyzer>,
) -> Vec<RoofRecord> {
    info!(
        "Processing chunk {chunk_num} with {} buildings using {} workers",
        chunk.len(),
        pool.current_num_threads()
    );

    pool.install(|| {
        chunk
            .par_iter()
            .enumerate()
            .map(|(i, solid)| {
                let record = process_single(solid, analyzer);
                if (i + 1) % 1000 == 0 {
                    info!("Chunk {chunk_num}: processed {}/{} buildings", i + 1, chunk.len());
                }
                record
            })
            .collect()
    })
}

/// Summary of one flushed chunk.
#[derive(Debug)]
pub struct ChunkSummary {
    pub chunk_num: usize,
    pub total: usize,
    pub successful: usize,
    pub roof_shapes: BTreeMap<String, usize>,
    pub csv_path: PathBuf,
}

/// Writes one chunk to `<stem>_chunk_NNNN.csv` and summarizes it.
pub fn write_chunk_csv(
    records: &[RoofRecord],
    stem: &Path,
    chunk_num: usize,
) -> Result<ChunkSummary> {
    let csv_path = chunk_csv_path(stem, chunk_num);
    let mut writer = csv::Writer::from_path(&csv_path)
        .with_context(|| format!("creating {}", csv_path.display()))?;
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    info!(
        "Saved chunk {chunk_num} with {} records to {}",
        records.len(),
        csv_path.display()
    );

    let successful = records
        .iter()
        .filter(|r| r.analysis_status == AnalysisStatus::Success)
        .count();
    let mut roof_shapes: BTreeMap<String, usize> = BTreeMap::new();
    for record in records {
        if let Some(shape) = record.roof_shape {
            *roof_shapes.entry(format!("{shape:?}").to_lowercase()).or_default() += 1;
        }
    }

    Ok(ChunkSummary {
        chunk_num,
        total: records.len(),
        successful,
        roof_shapes,
        csv_path,
    })
}

fn chunk_csv_path(stem: &Path, chunk_num: usize) -> PathBuf {
    let name = format!(
        "{}_chunk_{chunk_num:04}.csv",
        stem.file_name().and_then(|s| s.to_str()).unwrap_or("roof_analysis")
    );
    stem.with_file_name(name)
}

/// Concatenates the chunk CSVs into `<stem>.csv`, preserving chunk order,
/// and deletes the chunk files unless asked to keep them.
pub fn merge_chunks(summaries: &[ChunkSummary], stem: &Path, keep_chunks: bool) -> Result<PathBuf> {
    let final_path = stem.with_extension("csv");
    let mut output = fs::File::create(&final_path)
        .with_context(|| format!("creating {}", final_path.display()))?;

    let mut header_written = false;
    for summary in summaries {
        let reader = BufReader::new(
            fs::File::open(&summary.csv_path)
                .with_context(|| format!("opening {}", summary.csv_path.display()))?,
        );
        for (line_num, line) in reader.lines().enumerate() {
            let line = line?;
            if line_num == 0 {
                if header_written {
                    continue;
                }
                header_written = true;
            }
            writeln!(output, "{line}")?;
        }
        info!("Merged {} into final CSV", summary.csv_path.display());
    }
    output.flush()?;

    if !keep_chunks {
        for summary in summaries {
            if let Err(e) = fs::remove_file(&summary.csv_path) {
                log::warn!("Could not delete {}: {e}", summary.csv_path.display());
            }
        }
    }

    Ok(final_path)
}

/// Logs the end-of-run distribution over all chunk summaries.
pub fn log_final_summary(summaries: &[ChunkSummary]) {
    let total: usize = summaries.iter().map(|s| s.total).sum();
    let successful: usize = summaries.iter().map(|s| s.successful).sum();

    info!("{}", "=".repeat(60));
    info!("FINAL PROCESSING SUMMARY");
    info!("{}", "=".repeat(60));
    info!("Total buildings processed: {total}");
    if total > 0 {
        info!(
            "Successfully analyzed: {successful} ({:.1}%)",
            successful as f64 / total as f64 * 100.0
        );
    }

    let mut shapes: BTreeMap<&str, usize> = BTreeMap::new();
    for summary in summaries {
        for (shape, count) in &summary.roof_shapes {
            *shapes.entry(shape.as_str()).or_default() += count;
        }
    }
    if !shapes.is_empty() {
        info!("Roof shape distribution:");
        for (shape, count) in &shapes {
            let pct = if total > 0 {
                *count as f64 / total as f64 * 100.0
            } else {
                0.0
            };
            info!("  {shape}: {count} ({pct:.1}%)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mesh::TriangleMesh;

    fn solid(fid: u64, rings: &[crate::mesh::Ring]) -> BuildingSolid {
        BuildingSolid {
            fid,
            uuid: Some(format!("{{B{fid:04}}}")),
            objektart: Some("Gebaeude".to_string()),
            name_komplett: None,
            mesh: TriangleMesh::from_rings(rings),
            footprint: None,
        }
    }

    fn box_solid(fid: u64) -> BuildingSolid {
        let rings = vec![
            vec![(0.0, 0.0, 500.0), (10.0, 0.0, 500.0), (10.0, 8.0, 500.0), (0.0, 8.0, 500.0), (0.0, 0.0, 500.0)],
            vec![(0.0, 0.0, 506.0), (10.0, 0.0, 506.0), (10.0, 8.0, 506.0), (0.0, 8.0, 506.0), (0.0, 0.0, 506.0)],
            vec![(0.0, 0.0, 500.0), (10.0, 0.0, 500.0), (10.0, 0.0, 506.0), (0.0, 0.0, 506.0), (0.0, 0.0, 500.0)],
            vec![(10.0, 0.0, 500.0), (10.0, 8.0, 500.0), (10.0, 8.0, 506.0), (10.0, 0.0, 506.0), (10.0, 0.0, 500.0)],
            vec![(10.0, 8.0, 500.0), (0.0, 8.0, 500.0), (0.0, 8.0, 506.0), (10.0, 8.0, 506.0), (10.0, 8.0, 500.0)],
            vec![(0.0, 8.0, 500.0), (0.0, 0.0, 500.0), (0.0, 0.0, 506.0), (0.0, 8.0, 506.0), (0.0, 8.0, 500.0)],
        ];
        solid(fid, &rings)
    }

    #[test]
    fn test_worker_count_defaults() {
        let n = worker_count(None);
        assert!(n >= 1 && n <= MAX_WORKERS);

        assert_eq!(worker_count(Some(1)), 1);
        let capped = worker_count(Some(10_000));
        assert!(capped <= num_cpus::get());
    }

    #[test]
    fn test_process_chunk_preserves_order_and_status() {
        let pool = rayon::ThreadPoolBuilder::new().num_threads(2).build().unwrap();
        let chunk = vec![
            box_solid(3),
            solid(7, &[]), // empty geometry
            box_solid(12),
        ];

        let records = process_chunk(&chunk, 0, &pool, None);
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].fid, 3);
        assert_eq!(records[1].fid, 7);
        assert_eq!(records[2].fid, 12);

        assert_eq!(records[0].analysis_status, AnalysisStatus::Success);
        assert_eq!(records[1].analysis_status, AnalysisStatus::Failed);
        assert!(records[1].analysis_error.as_deref().unwrap().starts_with("Empty geometry"));
        assert_eq!(records[2].analysis_status, AnalysisStatus::Success);
        // No green-roof analyzer: the green columns stay empty.
        assert!(records[0].green_roof_status.is_none());
    }

    #[test]
    fn test_chunk_csv_roundtrip_and_merge() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("roof_analysis_20250101_120000");
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();

        let first = process_chunk(&[box_solid(1), box_solid(2)], 0, &pool, None);
        let second = process_chunk(&[box_solid(3)], 1, &pool, None);

        let s0 = write_chunk_csv(&first, &stem, 0).unwrap();
        let s1 = write_chunk_csv(&second, &stem, 1).unwrap();
        assert!(s0.csv_path.ends_with("roof_analysis_20250101_120000_chunk_0000.csv"));
        assert_eq!(s0.total, 2);
        assert_eq!(s0.successful, 2);
        assert_eq!(s0.roof_shapes.get("flat"), Some(&2));

        let final_path = merge_chunks(&[s0, s1], &stem, false).unwrap();
        assert!(final_path.ends_with("roof_analysis_20250101_120000.csv"));

        let content = fs::read_to_string(&final_path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        // one header + three data rows
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("fid,uuid,"));
        assert_eq!(content.matches("fid,uuid,").count(), 1);

        // chunk files deleted after the merge
        assert!(!dir.path().join("roof_analysis_20250101_120000_chunk_0000.csv").exists());
        assert!(!dir.path().join("roof_analysis_20250101_120000_chunk_0001.csv").exists());
    }

    #[test]
    fn test_keep_chunks_leaves_files() {
        let dir = tempfile::tempdir().unwrap();
        let stem = dir.path().join("run");
        let pool = rayon::ThreadPoolBuilder::new().num_threads(1).build().unwrap();

        let records = process_chunk(&[box_solid(1)], 0, &pool, None);
        let summary = write_chunk_csv(&records, &stem, 0).unwrap();
        let chunk_path = summary.csv_path.clone();

        merge_chunks(&[summary], &stem, true).unwrap();
        assert!(chunk_path.exists());
    }
}
