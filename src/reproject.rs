//! One-shot reprojection of database footprints from WGS84 to LV95.
//!
//! All raster and mesh inputs already arrive in EPSG:2056; only the
//! PostGIS geography column needs projecting, once, at load time.

use anyhow::{anyhow, Result};
use geo::{Coord, LineString, MultiPolygon, Polygon};
use proj4rs::Proj;

const WGS84: &str = "+proj=longlat +datum=WGS84 +no_defs";
const LV95: &str = "+proj=somerc +lat_0=46.9524055555556 +lon_0=7.43958333333333 \
     +k_0=1 +x_0=2600000 +y_0=1200000 +ellps=bessel \
     +towgs84=674.374,15.056,405.346,0,0,0,0 +units=m +no_defs";

/// Projects WGS84 longitude/latitude coordinates to LV95 (EPSG:2056).
pub struct Wgs84ToLv95 {
    src: Proj,
    dst: Proj,
}

impl Wgs84ToLv95 {
    pub fn new() -> Result<Self> {
        let src = Proj::from_proj_string(WGS84).map_err(|e| anyhow!("WGS84 setup: {e}"))?;
        let dst = Proj::from_proj_string(LV95).map_err(|e| anyhow!("LV95 setup: {e}"))?;
        Ok(Self { src, dst })
    }

    pub fn project(&self, lon: f64, lat: f64) -> Result<(f64, f64)> {
        let mut point = (lon.to_radians(), lat.to_radians(), 0.0);
        proj4rs::transform::transform(&self.src, &self.dst, &mut point)
            .map_err(|e| anyhow!("projecting ({lon}, {lat}): {e}"))?;
        Ok((point.0, point.1))
    }

    fn project_line_string(&self, line: &LineString<f64>) -> Result<LineString<f64>> {
        let coords: Result<Vec<Coord<f64>>> = line
            .coords()
            .map(|c| self.project(c.x, c.y).map(|(x, y)| Coord { x, y }))
            .collect();
        Ok(LineString::new(coords?))
    }

    pub fn project_polygon(&self, polygon: &Polygon<f64>) -> Result<Polygon<f64>> {
        let exterior = self.project_line_string(polygon.exterior())?;
        let interiors: Result<Vec<LineString<f64>>> = polygon
            .interiors()
            .iter()
            .map(|ring| self.project_line_string(ring))
            .collect();
        Ok(Polygon::new(exterior, interiors?))
    }

    pub fn project_multi_polygon(&self, mp: &MultiPolygon<f64>) -> Result<MultiPolygon<f64>> {
        let polygons: Result<Vec<Polygon<f64>>> =
            mp.iter().map(|p| self.project_polygon(p)).collect();
        Ok(MultiPolygon::new(polygons?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::polygon;

    #[test]
    fn test_projection_origin() {
        // The old Bern observatory defines the LV95 false origin.
        let transformer = Wgs84ToLv95::new().unwrap();
        let (x, y) = transformer
            .project(7.43958333333333, 46.9524055555556)
            .unwrap();
        assert!((x - 2_600_000.0).abs() < 1.0, "x = {x}");
        assert!((y - 1_200_000.0).abs() < 1.0, "y = {y}");
    }

    #[test]
    fn test_projection_is_monotonic_eastwards() {
        let transformer = Wgs84ToLv95::new().unwrap();
        let (x1, _) = transformer.project(7.0, 47.0).unwrap();
        let (x2, _) = transformer.project(7.1, 47.0).unwrap();
        assert!(x2 > x1);
    }

    #[test]
    fn test_project_polygon_keeps_shape() {
        let transformer = Wgs84ToLv95::new().unwrap();
        let footprint = polygon![
            (x: 7.4390, y: 46.9520),
            (x: 7.4395, y: 46.9520),
            (x: 7.4395, y: 46.9524),
            (x: 7.4390, y: 46.9524),
        ];
        let projected = transformer.project_polygon(&footprint).unwrap();
        assert_eq!(
            projected.exterior().coords().count(),
            footprint.exterior().coords().count()
        );
        // ~0.0005 degrees of longitude is a few dozen metres here.
        let width = projected.exterior().coords().map(|c| c.x).fold(f64::NEG_INFINITY, f64::max)
            - projected.exterior().coords().map(|c| c.x).fold(f64::INFINITY, f64::min);
        assert!(width > 20.0 && width < 60.0, "width = {width}");
    }
}
