//! Tile index for the swisstopo 1 km x 1 km height model rasters.
//!
//! Tiles are named after their SW corner in LV95 kilometres ("2609-1176").
//! The index is built once per run by scanning a directory; decoder handles
//! are opened lazily elsewhere (see [`crate::raster`]).

use geo::Rect;
use log::warn;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Edge length of one swisstopo raster tile in metres.
pub const TILE_SIZE_M: f64 = 1000.0;

/// Tile ID for the tile containing a point in LV95 coordinates.
///
/// Tiles are keyed by their SW corner divided by 1000, zero-padded to four
/// digits: point (2609500, 1176300) lies in tile "2609-1176".
pub fn tile_id_for_point(x: f64, y: f64) -> String {
    let tile_x = (x / TILE_SIZE_M).floor() as i64;
    let tile_y = (y / TILE_SIZE_M).floor() as i64;
    format!("{tile_x:04}-{tile_y:04}")
}

/// SW corner in LV95 metres for a tile ID, if the ID is well-formed.
pub fn tile_sw_corner(tile_id: &str) -> Option<(f64, f64)> {
    let (x, y) = tile_id.split_once('-')?;
    let x: i64 = x.parse().ok()?;
    let y: i64 = y.parse().ok()?;
    Some((x as f64 * TILE_SIZE_M, y as f64 * TILE_SIZE_M))
}

/// All tile IDs covering a bounding box, inclusive on both edges.
pub fn tiles_covering(bounds: &Rect<f64>) -> Vec<String> {
    let min_tile_x = (bounds.min().x / TILE_SIZE_M).floor() as i64;
    let min_tile_y = (bounds.min().y / TILE_SIZE_M).floor() as i64;
    let max_tile_x = (bounds.max().x / TILE_SIZE_M).floor() as i64;
    let max_tile_y = (bounds.max().y / TILE_SIZE_M).floor() as i64;

    let mut tiles = Vec::new();
    for x in min_tile_x..=max_tile_x {
        for y in min_tile_y..=max_tile_y {
            tiles.push(format!("{x:04}-{y:04}"));
        }
    }
    tiles
}

/// Extracts the tile ID from a swisstopo raster file stem.
///
/// Expected stems look like `swissalti3d_2023_2609-1176_0.5_2056_5728`; the
/// tile ID is the third underscore-separated token. Returns `None` when the
/// token is missing or not of the `<digits>-<digits>` shape.
pub fn tile_id_from_stem(stem: &str) -> Option<String> {
    let token = stem.split('_').nth(2)?;
    let (x, y) = token.split_once('-')?;
    if x.is_empty() || y.is_empty() {
        return None;
    }
    if !x.bytes().all(|b| b.is_ascii_digit()) || !y.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(token.to_string())
}

/// Mapping from tile ID to raster file path for one height model collection.
#[derive(Debug, Default)]
pub struct TileIndex {
    tiles: HashMap<String, PathBuf>,
}

impl TileIndex {
    /// Scans a directory for `*.tif` files and indexes them by tile ID.
    ///
    /// Files whose names do not carry a recognizable tile ID are skipped
    /// with a warning; a missing directory yields an empty index.
    pub fn scan(directory: &Path) -> Self {
        let mut tiles = HashMap::new();

        let entries = match std::fs::read_dir(directory) {
            Ok(entries) => entries,
            Err(e) => {
                warn!("Could not read tile directory {}: {e}", directory.display());
                return Self { tiles };
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("tif") {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            match tile_id_from_stem(stem) {
                Some(tile_id) => {
                    tiles.insert(tile_id, path);
                }
                None => {
                    warn!("Unexpected tile ID format in {}", path.display());
                }
            }
        }

        Self { tiles }
    }

    pub fn lookup(&self, tile_id: &str) -> Option<&Path> {
        self.tiles.get(tile_id).map(PathBuf::as_path)
    }

    pub fn len(&self) -> usize {
        self.tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tiles.is_empty()
    }
}
