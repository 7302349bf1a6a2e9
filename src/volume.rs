//! Above-ground building volume from the DTM/DSM tile pair.
//!
//! The reference ground plane is the lowest terrain point under the
//! footprint, so a hillside building's volume spans from valley elevation
//! to roof; below-base surface samples clamp to zero.

use crate::grid::{aligned_grid_points, VOXEL_SIZE_M};
use crate::raster::{Collection, HeightSampler};
use crate::tile_index::tiles_covering;
use geo::{Area, BoundingRect, MultiPolygon};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VolumeStatus {
    Success,
    NoGridPoints,
    NoHeightData,
    Error,
}

impl VolumeStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            VolumeStatus::Success => "success",
            VolumeStatus::NoGridPoints => "no_grid_points",
            VolumeStatus::NoHeightData => "no_height_data",
            VolumeStatus::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct VolumeResult {
    pub id: i64,
    pub egid: Option<i64>,
    pub volume_m3: f64,
    pub footprint_area_m2: f64,
    pub mean_height_m: f64,
    pub max_height_m: f64,
    pub base_height_m: Option<f64>,
    pub grid_points_count: usize,
    pub status: VolumeStatus,
}

impl VolumeResult {
    fn empty(id: i64, egid: Option<i64>, footprint_area: f64, status: VolumeStatus) -> Self {
        Self {
            id,
            egid,
            volume_m3: 0.0,
            footprint_area_m2: round2(footprint_area),
            mean_height_m: 0.0,
            max_height_m: 0.0,
            base_height_m: None,
            grid_points_count: 0,
            status,
        }
    }

    pub fn error(id: i64, egid: Option<i64>) -> Self {
        Self::empty(id, egid, 0.0, VolumeStatus::Error)
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Estimates the above-ground volume of one footprint.
///
/// Generates the aligned grid, samples terrain and surface heights at every
/// point, takes the minimum terrain elevation as the base, and sums
/// `max(0, surface − base)` over the valid points times the 1 m² cell area.
pub fn estimate_volume(
    footprint: &MultiPolygon<f64>,
    id: i64,
    egid: Option<i64>,
    sampler: &mut impl HeightSampler,
) -> VolumeResult {
    let footprint_area = footprint.unsigned_area();

    let grid_points = aligned_grid_points(footprint);
    if grid_points.is_empty() {
        return VolumeResult::empty(id, egid, footprint_area, VolumeStatus::NoGridPoints);
    }

    let Some(bounds) = footprint.bounding_rect() else {
        return VolumeResult::empty(id, egid, footprint_area, VolumeStatus::NoGridPoints);
    };
    let tiles = tiles_covering(&bounds);

    let terrain = sampler.sample(&grid_points, &tiles, Collection::Terrain);
    let surface = sampler.sample(&grid_points, &tiles, Collection::Surface);

    // Keep only points where both height models carry data.
    let valid: Vec<(f64, f64)> = terrain
        .iter()
        .zip(&surface)
        .filter(|(t, s)| !t.is_nan() && !s.is_nan())
        .map(|(t, s)| (*t, *s))
        .collect();

    if valid.is_empty() {
        let mut result = VolumeResult::empty(id, egid, footprint_area, VolumeStatus::NoHeightData);
        result.grid_points_count = grid_points.len();
        return result;
    }

    let base_height = valid.iter().map(|(t, _)| *t).fold(f64::INFINITY, f64::min);
    let heights: Vec<f64> = valid
        .iter()
        .map(|(_, s)| (s - base_height).max(0.0))
        .collect();

    let cell_area = VOXEL_SIZE_M * VOXEL_SIZE_M;
    let volume: f64 = heights.iter().sum::<f64>() * cell_area;
    let mean_height = heights.iter().sum::<f64>() / heights.len() as f64;
    let max_height = heights.iter().fold(f64::NEG_INFINITY, |a, &h| a.max(h));

    VolumeResult {
        id,
        egid,
        volume_m3: round2(volume),
        footprint_area_m2: round2(footprint_area),
        mean_height_m: round2(mean_height),
        max_height_m: round2(max_height),
        base_height_m: Some(round2(base_height)),
        grid_points_count: valid.len(),
        status: VolumeStatus::Success,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::{polygon, Coord};

    /// Synthetic height models backed by closures over LV95 coordinates.
    struct SyntheticSampler<T, S>
    where
        T: Fn(f64, f64) -> f64,
        S: Fn(f64, f64) -> f64,
    {
        terrain: T,
        surface: S,
    }

    impl<T, S> HeightSampler for SyntheticSampler<T, S>
    where
        T: Fn(f64, f64) -> f64,
        S: Fn(f64, f64) -> f64,
    {
        fn sample(
            &mut self,
            points: &[Coord<f64>],
            _tiles: &[String],
            collection: Collection,
        ) -> Vec<f64> {
            points
                .iter()
                .map(|p| match collection {
                    Collection::Terrain => (self.terrain)(p.x, p.y),
                    Collection::Surface => (self.surface)(p.x, p.y),
                })
                .collect()
        }
    }

    fn unit_square() -> MultiPolygon<f64> {
        MultiPolygon::new(vec![polygon![
            (x: 0.0, y: 0.0),
            (x: 10.0, y: 0.0),
            (x: 10.0, y: 10.0),
            (x: 0.0, y: 10.0),
        ]])
    }

    #[test]
    fn test_flat_square_building() {
        let mut sampler = SyntheticSampler {
            terrain: |_, _| 500.0,
            surface: |_, _| 510.0,
        };
        let result = estimate_volume(&unit_square(), 1, Some(190001), &mut sampler);

        assert_eq!(result.status, VolumeStatus::Success);
        assert_eq!(result.grid_points_count, 100);
        assert_eq!(result.base_height_m, Some(500.0));
        assert_eq!(result.volume_m3, 1000.0);
        assert_eq!(result.mean_height_m, 10.0);
        assert_eq!(result.max_height_m, 10.0);
        assert_eq!(result.footprint_area_m2, 100.0);
    }

    #[test]
    fn test_hillside_building() {
        // Terrain rises linearly from 500 at y=0 to 510 at y=10, the roof is
        // level at 515. The base is the lowest sampled terrain point (cell
        // centres start at y=0.5), and every cell measures surface - base.
        let mut sampler = SyntheticSampler {
            terrain: |_, y| 500.0 + y,
            surface: |_, _| 515.0,
        };
        let result = estimate_volume(&unit_square(), 2, None, &mut sampler);

        assert_eq!(result.status, VolumeStatus::Success);
        assert_eq!(result.base_height_m, Some(500.5));
        assert_eq!(result.volume_m3, 1450.0);
        assert_eq!(result.mean_height_m, 14.5);
        assert_eq!(result.max_height_m, 14.5);
    }

    #[test]
    fn test_surface_shift_shifts_volume_exactly() {
        // With the DTM fixed, lifting the DSM by d adds d per valid cell.
        let mut low = SyntheticSampler {
            terrain: |_, _| 500.0,
            surface: |_, _| 505.0,
        };
        let mut high = SyntheticSampler {
            terrain: |_, _| 500.0,
            surface: |_, _| 510.0,
        };
        let a = estimate_volume(&unit_square(), 3, None, &mut low);
        let b = estimate_volume(&unit_square(), 3, None, &mut high);

        assert_eq!(a.grid_points_count, b.grid_points_count);
        let per_cell = 5.0 * a.grid_points_count as f64;
        assert!((b.volume_m3 - a.volume_m3 - per_cell).abs() < 1e-9);
        assert!((b.volume_m3 - 2.0 * a.volume_m3).abs() < 1e-9);
    }

    #[test]
    fn test_no_height_data() {
        let mut sampler = SyntheticSampler {
            terrain: |_, _| f64::NAN,
            surface: |_, _| 510.0,
        };
        let result = estimate_volume(&unit_square(), 4, None, &mut sampler);

        assert_eq!(result.status, VolumeStatus::NoHeightData);
        assert_eq!(result.volume_m3, 0.0);
        assert_eq!(result.base_height_m, None);
        assert_eq!(result.grid_points_count, 100);
    }

    #[test]
    fn test_underground_is_clamped() {
        // Surface below the lowest terrain point contributes nothing.
        let mut sampler = SyntheticSampler {
            terrain: |_, _| 500.0,
            surface: |_, _| 495.0,
        };
        let result = estimate_volume(&unit_square(), 5, None, &mut sampler);

        assert_eq!(result.status, VolumeStatus::Success);
        assert_eq!(result.volume_m3, 0.0);
        assert_eq!(result.max_height_m, 0.0);
    }

    #[test]
    fn test_mean_never_exceeds_max() {
        let mut sampler = SyntheticSampler {
            terrain: |_, y| 500.0 + y * 0.7,
            surface: |x, _| 512.0 + x * 0.3,
        };
        let result = estimate_volume(&unit_square(), 6, None, &mut sampler);
        assert_eq!(result.status, VolumeStatus::Success);
        assert!(result.mean_height_m <= result.max_height_m);
        assert!(result.volume_m3 >= 0.0);
    }
}
