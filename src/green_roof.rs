//! Green-roof detection against SWISSIMAGE RS multispectral imagery.
//!
//! A bulk-loaded R-tree over the imagery tile bounds answers which tile
//! covers a footprint; the footprint is then rasterized against that tile
//! and NDVI = (NIR − Red) / (NIR + Red) is evaluated per pixel.

use anyhow::{Context, Result};
use gdal::Dataset;
use geo::{BoundingRect, Intersects, Point, Polygon};
use log::{info, warn};
use rstar::{RTree, RTreeObject, AABB};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// 1-based imagery band carrying red reflectance.
pub const BAND_RED: usize = 1;
/// 1-based imagery band carrying near-infrared reflectance.
pub const BAND_NIR: usize = 4;
/// Pixels with NDVI above this count as vegetated.
pub const NDVI_THRESHOLD: f64 = 0.2;

/// One imagery tile: path plus geographic bounds (minx, miny, maxx, maxy).
#[derive(Debug, Clone)]
pub struct ImageryTile {
    pub path: PathBuf,
    bounds: [f64; 4],
}

impl ImageryTile {
    pub fn new(path: PathBuf, bounds: [f64; 4]) -> Self {
        Self { path, bounds }
    }
}

impl RTreeObject for ImageryTile {
    type Envelope = AABB<[f64; 2]>;

    fn envelope(&self) -> Self::Envelope {
        AABB::from_corners(
            [self.bounds[0], self.bounds[1]],
            [self.bounds[2], self.bounds[3]],
        )
    }
}

/// Spatial index over the imagery tiles of one directory.
pub struct ImageryIndex {
    tree: RTree<ImageryTile>,
}

impl ImageryIndex {
    /// Scans a directory for GeoTIFFs and indexes them by their bounds.
    ///
    /// Tiles whose georeferencing cannot be read are skipped with a warning.
    /// Tile coordinates are corner-referenced: bounds come straight from the
    /// geotransform and raster size.
    pub fn build(directory: &Path) -> Result<Self> {
        let mut tiles = Vec::new();

        let entries = std::fs::read_dir(directory)
            .with_context(|| format!("reading imagery directory {}", directory.display()))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_tif = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| e.eq_ignore_ascii_case("tif") || e.eq_ignore_ascii_case("tiff"));
            if !is_tif {
                continue;
            }
            match Self::tile_bounds(&path) {
                Ok(bounds) => tiles.push(ImageryTile::new(path, bounds)),
                Err(e) => warn!("Failed to read bounds for {}: {e}", path.display()),
            }
        }

        info!("Indexed {} imagery tiles", tiles.len());
        Ok(Self::from_tiles(tiles))
    }

    pub fn from_tiles(tiles: Vec<ImageryTile>) -> Self {
        Self {
            tree: RTree::bulk_load(tiles),
        }
    }

    fn tile_bounds(path: &Path) -> Result<[f64; 4]> {
        let dataset = Dataset::open(path)?;
        let gt = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();
        let min_x = gt[0];
        let max_x = gt[0] + width as f64 * gt[1];
        let max_y = gt[3];
        let min_y = gt[3] + height as f64 * gt[5];
        Ok([min_x.min(max_x), min_y.min(max_y), min_x.max(max_x), min_y.max(max_y)])
    }

    /// Tiles whose bounds intersect the given rectangle.
    pub fn query(&self, min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Vec<&ImageryTile> {
        let envelope = AABB::from_corners([min_x, min_y], [max_x, max_y]);
        self.tree.locate_in_envelope_intersecting(&envelope).collect()
    }

    /// Union bounds of all indexed tiles, if any.
    pub fn coverage_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        let mut iter = self.tree.iter();
        let first = iter.next()?;
        let mut bounds = first.bounds;
        for tile in iter {
            bounds[0] = bounds[0].min(tile.bounds[0]);
            bounds[1] = bounds[1].min(tile.bounds[1]);
            bounds[2] = bounds[2].max(tile.bounds[2]);
            bounds[3] = bounds[3].max(tile.bounds[3]);
        }
        Some((bounds[0], bounds[1], bounds[2], bounds[3]))
    }

    pub fn is_empty(&self) -> bool {
        self.tree.size() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GreenRoofStatus {
    Analyzed,
    NoCoverage,
    EmptyMask,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct GreenRoofResult {
    pub green_roof_area_m2: f64,
    pub green_roof_percentage: f64,
    pub ndvi_mean: Option<f64>,
    pub ndvi_max: Option<f64>,
    pub green_roof_status: GreenRoofStatus,
}

impl GreenRoofResult {
    fn status_only(status: GreenRoofStatus) -> Self {
        Self {
            green_roof_area_m2: 0.0,
            green_roof_percentage: 0.0,
            ndvi_mean: None,
            ndvi_max: None,
            green_roof_status: status,
        }
    }
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round3(v: f64) -> f64 {
    (v * 1000.0).round() / 1000.0
}

/// NDVI statistics over a masked pixel block.
///
/// A pixel participates when its mask flag is set and red + NIR is nonzero;
/// it counts as green when its NDVI exceeds the threshold.
fn ndvi_stats(red: &[f64], nir: &[f64], inside: &[bool], pixel_area_m2: f64) -> GreenRoofResult {
    let mut valid_pixels = 0usize;
    let mut green_pixels = 0usize;
    let mut ndvi_sum = 0.0;
    let mut ndvi_max = f64::NEG_INFINITY;

    for ((&r, &n), &keep) in red.iter().zip(nir).zip(inside) {
        if !keep {
            continue;
        }
        let denominator = n + r;
        if denominator == 0.0 {
            continue;
        }
        let ndvi = (n - r) / denominator;
        valid_pixels += 1;
        ndvi_sum += ndvi;
        ndvi_max = ndvi_max.max(ndvi);
        if ndvi > NDVI_THRESHOLD {
            green_pixels += 1;
        }
    }

    if valid_pixels == 0 {
        return GreenRoofResult::status_only(GreenRoofStatus::EmptyMask);
    }

    let green_area = green_pixels as f64 * pixel_area_m2;
    let total_area = valid_pixels as f64 * pixel_area_m2;
    GreenRoofResult {
        green_roof_area_m2: round2(green_area),
        green_roof_percentage: round1(green_area / total_area * 100.0),
        ndvi_mean: Some(round3(ndvi_sum / valid_pixels as f64)),
        ndvi_max: Some(round3(ndvi_max)),
        green_roof_status: GreenRoofStatus::Analyzed,
    }
}

/// Analyzes building footprints against an imagery tile index.
pub struct GreenRoofAnalyzer {
    index: ImageryIndex,
}

impl GreenRoofAnalyzer {
    pub fn new(index: ImageryIndex) -> Self {
        Self { index }
    }

    pub fn coverage_bounds(&self) -> Option<(f64, f64, f64, f64)> {
        self.index.coverage_bounds()
    }

    /// Computes green area and NDVI statistics for one footprint.
    ///
    /// Buildings are far smaller than an imagery tile, so the first
    /// intersecting tile is used. The tile is opened on demand and dropped
    /// again; workers therefore never share decoder handles.
    pub fn analyze(&self, footprint: &Polygon<f64>) -> GreenRoofResult {
        let Some(bounds) = footprint.bounding_rect() else {
            return GreenRoofResult::status_only(GreenRoofStatus::Error);
        };

        let tiles = self.index.query(
            bounds.min().x,
            bounds.min().y,
            bounds.max().x,
            bounds.max().y,
        );
        let Some(tile) = tiles.first() else {
            return GreenRoofResult::status_only(GreenRoofStatus::NoCoverage);
        };

        match self.analyze_against_tile(footprint, &tile.path, &bounds) {
            Ok(result) => result,
            Err(e) => {
                warn!("Green roof analysis failed for {}: {e}", tile.path.display());
                GreenRoofResult::status_only(GreenRoofStatus::Error)
            }
        }
    }

    fn analyze_against_tile(
        &self,
        footprint: &Polygon<f64>,
        path: &Path,
        bounds: &geo::Rect<f64>,
    ) -> Result<GreenRoofResult> {
        let dataset = Dataset::open(path)?;
        if dataset.raster_count() < BAND_NIR {
            anyhow::bail!("insufficient bands: {}", dataset.raster_count());
        }
        let gt = dataset.geo_transform()?;
        let (width, height) = dataset.raster_size();

        // Pixel window covering the footprint bounds, clamped to the tile.
        let col0 = (((bounds.min().x - gt[0]) / gt[1]).floor().max(0.0) as usize).min(width);
        let col1 = (((bounds.max().x - gt[0]) / gt[1]).ceil().max(0.0) as usize).min(width);
        let row0 = (((bounds.max().y - gt[3]) / gt[5]).floor().max(0.0) as usize).min(height);
        let row1 = (((bounds.min().y - gt[3]) / gt[5]).ceil().max(0.0) as usize).min(height);
        if col1 <= col0 || row1 <= row0 {
            return Ok(GreenRoofResult::status_only(GreenRoofStatus::EmptyMask));
        }
        let (win_w, win_h) = (col1 - col0, row1 - row0);

        let red = dataset.rasterband(BAND_RED)?.read_as::<f64>(
            (col0 as isize, row0 as isize),
            (win_w, win_h),
            (win_w, win_h),
            None,
        )?;
        let nir = dataset.rasterband(BAND_NIR)?.read_as::<f64>(
            (col0 as isize, row0 as isize),
            (win_w, win_h),
            (win_w, win_h),
            None,
        )?;

        // Rasterize the footprint over the window: a pixel belongs to the
        // mask when its centre falls inside the polygon.
        let mut red_values = Vec::with_capacity(win_w * win_h);
        let mut nir_values = Vec::with_capacity(win_w * win_h);
        let mut inside = Vec::with_capacity(win_w * win_h);
        for row in 0..win_h {
            for col in 0..win_w {
                let x = gt[0] + (col0 + col) as f64 * gt[1] + gt[1] / 2.0;
                let y = gt[3] + (row0 + row) as f64 * gt[5] + gt[5] / 2.0;
                red_values.push(red[(row, col)]);
                nir_values.push(nir[(row, col)]);
                inside.push(footprint.intersects(&Point::new(x, y)));
            }
        }

        let pixel_area = (gt[1] * gt[5]).abs();
        Ok(ndvi_stats(&red_values, &nir_values, &inside, pixel_area))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_query_and_coverage() {
        let tiles = vec![
            ImageryTile::new("a.tif".into(), [2600000.0, 1200000.0, 2601000.0, 1201000.0]),
            ImageryTile::new("b.tif".into(), [2601000.0, 1200000.0, 2602000.0, 1201000.0]),
        ];
        let index = ImageryIndex::from_tiles(tiles);

        let hits = index.query(2600500.0, 1200500.0, 2600510.0, 1200510.0);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].path, PathBuf::from("a.tif"));

        assert!(index
            .query(2605000.0, 1200500.0, 2605010.0, 1200510.0)
            .is_empty());

        assert_eq!(
            index.coverage_bounds(),
            Some((2600000.0, 1200000.0, 2602000.0, 1201000.0))
        );
    }

    #[test]
    fn test_empty_index() {
        let index = ImageryIndex::from_tiles(Vec::new());
        assert!(index.is_empty());
        assert_eq!(index.coverage_bounds(), None);
    }

    #[test]
    fn test_ndvi_stats_counts_vegetation() {
        // Four pixels: strongly green, weakly green (below threshold),
        // bare, and zero-reflectance (ignored).
        let red = [10.0, 80.0, 100.0, 0.0];
        let nir = [90.0, 100.0, 90.0, 0.0];
        let inside = [true, true, true, true];

        let result = ndvi_stats(&red, &nir, &inside, 0.0625);
        assert_eq!(result.green_roof_status, GreenRoofStatus::Analyzed);
        // Only the first pixel clears NDVI > 0.2.
        assert!((result.green_roof_area_m2 - 0.06).abs() < 1e-9);
        assert!((result.green_roof_percentage - 33.3).abs() < 0.05);
        assert_eq!(result.ndvi_max, Some(0.8));
    }

    #[test]
    fn test_ndvi_stays_in_range() {
        let red = [0.0, 255.0, 100.0, 1.0];
        let nir = [255.0, 0.0, 100.0, 254.0];
        let inside = [true; 4];
        let result = ndvi_stats(&red, &nir, &inside, 1.0);
        let mean = result.ndvi_mean.unwrap();
        let max = result.ndvi_max.unwrap();
        assert!((-1.0..=1.0).contains(&mean));
        assert!((-1.0..=1.0).contains(&max));
        assert_eq!(max, 1.0);
    }

    #[test]
    fn test_mask_outside_pixels_are_ignored() {
        let red = [10.0, 10.0];
        let nir = [90.0, 90.0];
        let inside = [true, false];
        let result = ndvi_stats(&red, &nir, &inside, 1.0);
        assert_eq!(result.green_roof_area_m2, 1.0);
        assert_eq!(result.green_roof_percentage, 100.0);
    }

    #[test]
    fn test_empty_mask_status() {
        let result = ndvi_stats(&[0.0], &[0.0], &[true], 1.0);
        assert_eq!(result.green_roof_status, GreenRoofStatus::EmptyMask);
        assert_eq!(result.ndvi_mean, None);
    }
}
