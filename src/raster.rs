//! Lazily opened, cached GeoTIFF handles and nodata-aware point sampling.
//!
//! Handles stay open for the lifetime of a [`TileSet`] (one pipeline run)
//! and are dropped together at teardown, bounding open file descriptors to
//! the number of distinct tiles touched.

use crate::tile_index::TileIndex;
use anyhow::{Context, Result};
use gdal::Dataset;
use geo::Coord;
use log::warn;
use std::collections::HashMap;
use std::path::Path;

/// The two height model collections sampled by the volume estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    /// swissALTI3D digital terrain model.
    Terrain,
    /// swissSURFACE3D digital surface model.
    Surface,
}

/// An open single-band raster with its georeferencing and nodata value.
pub struct CachedRaster {
    dataset: Dataset,
    geo_transform: [f64; 6],
    width: usize,
    height: usize,
    nodata: Option<f64>,
}

impl CachedRaster {
    pub fn open(path: &Path) -> Result<Self> {
        let dataset =
            Dataset::open(path).with_context(|| format!("opening raster {}", path.display()))?;
        let geo_transform = dataset.geo_transform()?;
        let band = dataset.rasterband(1)?;
        let (width, height) = band.size();
        let nodata = band.no_data_value();
        Ok(Self {
            dataset,
            geo_transform,
            width,
            height,
            nodata,
        })
    }

    /// Samples the pixel containing an LV95 point.
    ///
    /// Returns `None` when the point falls outside the raster or the pixel
    /// holds the declared nodata value (or NaN).
    pub fn sample(&self, x: f64, y: f64) -> Option<f64> {
        let gt = &self.geo_transform;
        let px = ((x - gt[0]) / gt[1]).floor();
        let py = ((y - gt[3]) / gt[5]).floor();

        if px < 0.0 || py < 0.0 || px >= self.width as f64 || py >= self.height as f64 {
            return None;
        }

        let band = self.dataset.rasterband(1).ok()?;
        let buf = band
            .read_as::<f64>((px as isize, py as isize), (1, 1), (1, 1), None)
            .ok()?;
        let value = buf[(0, 0)];

        if value.is_nan() {
            return None;
        }
        if let Some(nodata) = self.nodata {
            if value == nodata {
                return None;
            }
        }
        Some(value)
    }
}

/// Source of terrain/surface heights for grid points.
///
/// The volume worker only depends on this seam; tests substitute synthetic
/// surfaces for the tile-backed implementation.
pub trait HeightSampler {
    /// Samples one collection at each point; entries stay NaN where no tile
    /// covers the point or every covering tile holds nodata there.
    fn sample(&mut self, points: &[Coord<f64>], tiles: &[String], collection: Collection)
        -> Vec<f64>;
}

/// The DTM/DSM tile pair with a cache of opened decoder handles.
pub struct TileSet {
    terrain: TileIndex,
    surface: TileIndex,
    cache: HashMap<(Collection, String), Option<CachedRaster>>,
}

impl TileSet {
    pub fn new(terrain: TileIndex, surface: TileIndex) -> Self {
        Self {
            terrain,
            surface,
            cache: HashMap::new(),
        }
    }

    fn index(&self, collection: Collection) -> &TileIndex {
        match collection {
            Collection::Terrain => &self.terrain,
            Collection::Surface => &self.surface,
        }
    }

    /// Opens (or reuses) the decoder for one tile. A tile missing from the
    /// index is not an error; a tile that fails to open is warned about once
    /// and treated as missing afterwards.
    fn open_tile(&mut self, collection: Collection, tile_id: &str) -> Option<&CachedRaster> {
        let key = (collection, tile_id.to_string());
        if !self.cache.contains_key(&key) {
            let opened = match self.index(collection).lookup(tile_id) {
                Some(path) => match CachedRaster::open(path) {
                    Ok(raster) => Some(raster),
                    Err(e) => {
                        warn!("Could not open tile {tile_id}: {e}");
                        None
                    }
                },
                None => return None,
            };
            self.cache.insert(key.clone(), opened);
        }
        self.cache.get(&key).and_then(Option::as_ref)
    }
}

impl HeightSampler for TileSet {
    /// Visits the covering tiles in order and fills in each point from the
    /// pixels it finds. A valid sample is never overwritten by nodata from a
    /// later tile; where two tiles both carry data at a seam, the later one
    /// wins, keeping the result deterministic for a given tile order.
    fn sample(
        &mut self,
        points: &[Coord<f64>],
        tiles: &[String],
        collection: Collection,
    ) -> Vec<f64> {
        let mut heights = vec![f64::NAN; points.len()];

        for tile_id in tiles {
            let Some(raster) = self.open_tile(collection, tile_id) else {
                continue;
            };
            for (height, point) in heights.iter_mut().zip(points) {
                if let Some(value) = raster.sample(point.x, point.y) {
                    *height = value;
                }
            }
        }

        heights
    }
}
