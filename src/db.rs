//! PostGIS access for the buildings table.
//!
//! The driver owns the single connection; workers only ever see plain
//! structs. Numeric columns are cast to double precision on read, and the
//! update statements rely on the assignment cast back to numeric.

use crate::floor_area::{FloorAreaEstimate, FloorAreaInput, FloorAreaStatus};
use crate::volume::{VolumeResult, VolumeStatus};
use anyhow::{Context, Result};
use geo::MultiPolygon;
use postgres::{Client, NoTls};
use wkt::TryFromWkt;

pub const DEFAULT_TABLE: &str = "public.buildings";
pub const DEFAULT_GEOMETRY_COLUMN: &str = "geog";

/// One building footprint row, geometry still in WKT.
#[derive(Debug, Clone)]
pub struct FootprintRow {
    pub id: i64,
    pub egid: Option<i64>,
    pub geom_wkt: String,
}

impl FootprintRow {
    /// Parses the WKT into a multipolygon (single polygons are wrapped).
    pub fn multi_polygon(&self) -> Result<MultiPolygon<f64>> {
        let geometry = geo_types::Geometry::<f64>::try_from_wkt_str(&self.geom_wkt)
            .map_err(|e| anyhow::anyhow!("invalid WKT for building {}: {e}", self.id))?;
        match geometry {
            geo_types::Geometry::Polygon(p) => Ok(MultiPolygon::new(vec![p])),
            geo_types::Geometry::MultiPolygon(mp) => Ok(mp),
            _ => anyhow::bail!("unsupported geometry type for building {}", self.id),
        }
    }
}

/// Builds the footprint SELECT with optional id, bbox and limit filters.
fn footprint_query(
    table: &str,
    geometry_column: &str,
    building_ids: &[i64],
    bbox: Option<[f64; 4]>,
    limit: Option<usize>,
) -> String {
    let mut query = format!(
        "SELECT id::bigint AS id, egid::bigint AS egid, \
         ST_AsText({geometry_column}::geometry) AS geom_wkt \
         FROM {table} WHERE {geometry_column} IS NOT NULL"
    );

    if !building_ids.is_empty() {
        let ids = building_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        query.push_str(&format!(" AND id IN ({ids})"));
    }

    if let Some([min_lon, min_lat, max_lon, max_lat]) = bbox {
        query.push_str(&format!(
            " AND ST_Intersects({geometry_column}, \
             ST_MakeEnvelope({min_lon}, {min_lat}, {max_lon}, {max_lat}, 4326))"
        ));
    }

    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {limit}"));
    }

    query
}

/// Builds the floor-area input SELECT.
fn floor_input_query(
    table: &str,
    building_ids: &[i64],
    bbox: Option<[f64; 4]>,
    limit: Option<usize>,
    only_with_volume: bool,
) -> String {
    let mut query = format!(
        "SELECT id::bigint AS id, egid::bigint AS egid, \
         area_footprint_m2::double precision AS area_footprint_m2, \
         volume_above_ground_m3::double precision AS volume_above_ground_m3, \
         height_mean_m::double precision AS height_mean_m, \
         category::text AS category, class::text AS class \
         FROM {table} WHERE 1=1"
    );

    if only_with_volume {
        query.push_str(
            " AND volume_above_ground_m3 IS NOT NULL AND volume_above_ground_m3 > 0 \
             AND area_footprint_m2 IS NOT NULL AND area_footprint_m2 > 0",
        );
    }

    if !building_ids.is_empty() {
        let ids = building_ids
            .iter()
            .map(i64::to_string)
            .collect::<Vec<_>>()
            .join(",");
        query.push_str(&format!(" AND id IN ({ids})"));
    }

    if let Some([min_lon, min_lat, max_lon, max_lat]) = bbox {
        query.push_str(&format!(
            " AND ST_Intersects(geog, \
             ST_MakeEnvelope({min_lon}, {min_lat}, {max_lon}, {max_lat}, 4326))"
        ));
    }

    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {limit}"));
    }

    query
}

/// Connection wrapper owned by the pipeline driver.
pub struct BuildingsDb {
    client: Client,
}

impl BuildingsDb {
    pub fn connect(connection_string: &str) -> Result<Self> {
        let client = Client::connect(connection_string, NoTls)
            .context("connecting to buildings database")?;
        Ok(Self { client })
    }

    /// Loads building footprints as WKT rows.
    pub fn load_footprints(
        &mut self,
        table: &str,
        geometry_column: &str,
        building_ids: &[i64],
        bbox: Option<[f64; 4]>,
        limit: Option<usize>,
    ) -> Result<Vec<FootprintRow>> {
        let query = footprint_query(table, geometry_column, building_ids, bbox, limit);
        let rows = self
            .client
            .query(query.as_str(), &[])
            .context("loading building footprints")?;

        Ok(rows
            .iter()
            .map(|row| FootprintRow {
                id: row.get("id"),
                egid: row.get("egid"),
                geom_wkt: row.get("geom_wkt"),
            })
            .collect())
    }

    /// Loads the inputs for floor-area estimation.
    pub fn load_floor_inputs(
        &mut self,
        table: &str,
        building_ids: &[i64],
        bbox: Option<[f64; 4]>,
        limit: Option<usize>,
        only_with_volume: bool,
    ) -> Result<Vec<FloorAreaInput>> {
        let query = floor_input_query(table, building_ids, bbox, limit, only_with_volume);
        let rows = self
            .client
            .query(query.as_str(), &[])
            .context("loading floor-area inputs")?;

        Ok(rows
            .iter()
            .map(|row| FloorAreaInput {
                id: row.get("id"),
                egid: row.get("egid"),
                footprint_area_m2: row.get("area_footprint_m2"),
                volume_above_ground_m3: row.get("volume_above_ground_m3"),
                height_mean_m: row.get("height_mean_m"),
                category: row.get("category"),
                class: row.get("class"),
            })
            .collect())
    }

    /// Writes successful volume results back, creating the output columns on
    /// demand. All updates run in one transaction; returns the update count.
    pub fn write_volume_results(&mut self, table: &str, results: &[VolumeResult]) -> Result<usize> {
        for (column, column_type) in [
            ("volume_above_ground_m3", "numeric"),
            ("elevation_base_m", "numeric"),
            ("height_mean_m", "numeric"),
            ("height_max_m", "numeric"),
        ] {
            self.client
                .execute(
                    format!("ALTER TABLE {table} ADD COLUMN IF NOT EXISTS {column} {column_type}")
                        .as_str(),
                    &[],
                )
                .with_context(|| format!("adding column {column}"))?;
        }

        let statement = format!(
            "UPDATE {table} SET volume_above_ground_m3 = $1, elevation_base_m = $2, \
             height_mean_m = $3, height_max_m = $4, updated_at = NOW() WHERE id = $5"
        );

        let mut transaction = self.client.transaction()?;
        let mut updated = 0usize;
        for result in results {
            if result.status != VolumeStatus::Success {
                continue;
            }
            transaction
                .execute(
                    statement.as_str(),
                    &[
                        &result.volume_m3,
                        &result.base_height_m,
                        &result.mean_height_m,
                        &result.max_height_m,
                        &result.id,
                    ],
                )
                .with_context(|| format!("updating building {}", result.id))?;
            updated += 1;
        }
        transaction.commit()?;

        Ok(updated)
    }

    /// Writes successful floor-area estimates back; returns the update count.
    pub fn write_floor_results(
        &mut self,
        table: &str,
        results: &[FloorAreaEstimate],
    ) -> Result<usize> {
        let statement = format!(
            "UPDATE {table} SET area_floor_total_m2 = $1, area_floor_above_ground_m2 = $2, \
             area_accuracy = $3, floors_total = $4, floors_above = $5, floors_accuracy = $6, \
             updated_at = NOW() WHERE id = $7"
        );

        let mut transaction = self.client.transaction()?;
        let mut updated = 0usize;
        for result in results {
            if result.status != FloorAreaStatus::Success {
                continue;
            }
            let area_accuracy = result.area_accuracy.map(|a| a.as_str());
            let floors_accuracy = result.floors_accuracy.map(|a| a.as_str());
            transaction
                .execute(
                    statement.as_str(),
                    &[
                        &result.area_floor_total_m2,
                        &result.area_floor_above_ground_m2,
                        &area_accuracy,
                        &result.floors_total,
                        &result.floors_above,
                        &floors_accuracy,
                        &result.id,
                    ],
                )
                .with_context(|| format!("updating building {}", result.id))?;
            updated += 1;
        }
        transaction.commit()?;

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use geo::Area;

    #[test]
    fn test_footprint_query_plain() {
        let query = footprint_query("public.buildings", "geog", &[], None, None);
        assert_eq!(
            query,
            "SELECT id::bigint AS id, egid::bigint AS egid, \
             ST_AsText(geog::geometry) AS geom_wkt \
             FROM public.buildings WHERE geog IS NOT NULL"
        );
    }

    #[test]
    fn test_footprint_query_filters() {
        let query = footprint_query(
            "public.buildings",
            "geog",
            &[7, 11],
            Some([7.0, 46.0, 8.0, 47.0]),
            Some(50),
        );
        assert!(query.contains("AND id IN (7,11)"));
        assert!(query.contains("ST_MakeEnvelope(7, 46, 8, 47, 4326)"));
        assert!(query.ends_with("LIMIT 50"));
    }

    #[test]
    fn test_floor_query_volume_filter() {
        let with_volume = floor_input_query("public.buildings", &[], None, None, true);
        assert!(with_volume.contains("volume_above_ground_m3 > 0"));
        assert!(with_volume.contains("area_footprint_m2 > 0"));

        let without = floor_input_query("public.buildings", &[], None, None, false);
        assert!(!without.contains("volume_above_ground_m3 > 0"));
    }

    #[test]
    fn test_wkt_polygon_parsing() {
        let row = FootprintRow {
            id: 1,
            egid: None,
            geom_wkt: "POLYGON((0 0, 10 0, 10 10, 0 10, 0 0))".to_string(),
        };
        let mp = row.multi_polygon().unwrap();
        assert_eq!(mp.0.len(), 1);
        assert!((mp.unsigned_area() - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_wkt_multipolygon_parsing() {
        let row = FootprintRow {
            id: 2,
            egid: Some(3),
            geom_wkt: "MULTIPOLYGON(((0 0, 5 0, 5 5, 0 5, 0 0)), ((10 10, 12 10, 12 12, 10 12, 10 10)))"
                .to_string(),
        };
        let mp = row.multi_polygon().unwrap();
        assert_eq!(mp.0.len(), 2);
    }

    #[test]
    fn test_wkt_rejects_non_polygons() {
        let row = FootprintRow {
            id: 3,
            egid: None,
            geom_wkt: "POINT(1 2)".to_string(),
        };
        assert!(row.multi_polygon().is_err());
    }
}
