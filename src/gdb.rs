//! Reading building solids from an ESRI file geodatabase.
//!
//! swissBUILDINGS3D ships as a `Building_solid` layer of MultiPolygon-Z
//! multipatches. Features are streamed into fixed-size chunks so that only
//! one chunk of parsed meshes is alive at a time.

use crate::mesh::{convex_hull_footprint, footprint_from_rings, Ring, TriangleMesh};
use anyhow::{bail, Context, Result};
use gdal::vector::{Geometry, LayerAccess, OGRwkbGeometryType};
use gdal::Dataset;
use geo::Polygon;
use itertools::Itertools;
use log::info;
use std::path::Path;

/// One building solid as read from the geodatabase.
#[derive(Debug, Clone)]
pub struct BuildingSolid {
    pub fid: u64,
    pub uuid: Option<String>,
    pub objektart: Option<String>,
    pub name_komplett: Option<String>,
    pub mesh: TriangleMesh,
    pub footprint: Option<Polygon<f64>>,
}

/// Names of all layers in the geodatabase.
pub fn list_layers(path: &Path) -> Result<Vec<String>> {
    let dataset = Dataset::open(path)
        .with_context(|| format!("opening geodatabase {}", path.display()))?;
    Ok(dataset.layers().map(|layer| layer.name()).collect())
}

/// Resolves a requested layer name against the available ones with a
/// case-insensitive substring match in either direction.
pub fn resolve_layer(available: &[String], requested: &str) -> Option<String> {
    let requested_lower = requested.to_lowercase();
    available
        .iter()
        .find(|name| {
            let name_lower = name.to_lowercase();
            name_lower.contains(&requested_lower) || requested_lower.contains(&name_lower)
        })
        .cloned()
}

/// Strips the Z/M and 2.5D markers off an OGR geometry type code.
fn flatten_geometry_type(geometry_type: u32) -> u32 {
    if geometry_type & 0x8000_0000 != 0 {
        geometry_type & 0x7FFF_FFFF
    } else {
        geometry_type % 1000
    }
}

/// Collects every ring of a (Multi)Polygon geometry as raw 3D coordinates.
fn collect_rings(geometry: &Geometry, rings: &mut Vec<Ring>) {
    match flatten_geometry_type(geometry.geometry_type()) {
        OGRwkbGeometryType::wkbMultiPolygon => {
            for i in 0..geometry.geometry_count() {
                let polygon = geometry.get_geometry(i);
                collect_rings(&polygon, rings);
            }
        }
        OGRwkbGeometryType::wkbPolygon => {
            for i in 0..geometry.geometry_count() {
                let ring = geometry.get_geometry(i);
                rings.push(ring.get_point_vec());
            }
        }
        _ => {}
    }
}

/// Streaming reader over the building layer of one geodatabase.
pub struct GdbSource {
    dataset: Dataset,
    layer_name: String,
}

impl GdbSource {
    /// Opens the geodatabase and resolves the building layer.
    pub fn open(path: &Path, requested_layer: &str) -> Result<Self> {
        let dataset = Dataset::open(path)
            .with_context(|| format!("opening geodatabase {}", path.display()))?;

        let available: Vec<String> = dataset.layers().map(|layer| layer.name()).collect();
        info!("Available layers: {}", available.join(", "));

        let Some(layer_name) = resolve_layer(&available, requested_layer) else {
            bail!(
                "Layer '{requested_layer}' not found. Available: {}",
                available.iter().sorted().join(", ")
            );
        };
        info!("Using layer: {layer_name}");

        Ok(Self {
            dataset,
            layer_name,
        })
    }

    pub fn layer_name(&self) -> &str {
        &self.layer_name
    }

    /// Streams the layer's features in chunks of `chunk_size`.
    ///
    /// `on_chunk` receives the chunk number and its parsed solids; returning
    /// `Ok(false)` stops the stream (shutdown-driven cancellation). The
    /// spatial filter and limit are applied while reading, so at most one
    /// chunk of meshes is in memory.
    pub fn stream_chunks<F>(
        &mut self,
        chunk_size: usize,
        limit: Option<usize>,
        bbox: Option<(f64, f64, f64, f64)>,
        mut on_chunk: F,
    ) -> Result<()>
    where
        F: FnMut(usize, Vec<BuildingSolid>) -> Result<bool>,
    {
        let mut layer = self
            .dataset
            .layer_by_name(&self.layer_name)
            .with_context(|| format!("opening layer {}", self.layer_name))?;

        if let Some((min_x, min_y, max_x, max_y)) = bbox {
            layer.set_spatial_filter_rect(min_x, min_y, max_x, max_y);
        }

        info!("Layer feature count: {}", layer.feature_count());

        let mut chunk: Vec<BuildingSolid> = Vec::with_capacity(chunk_size.min(1024));
        let mut chunk_num = 0usize;
        let mut total = 0usize;

        for feature in layer.features() {
            if limit.is_some_and(|l| total >= l) {
                break;
            }

            let uuid = feature.field_as_string_by_name("UUID").ok().flatten();
            let objektart = feature.field_as_string_by_name("OBJEKTART").ok().flatten();
            let name_komplett = feature
                .field_as_string_by_name("NAME_KOMPLETT")
                .ok()
                .flatten();

            let mut rings: Vec<Ring> = Vec::new();
            if let Some(geometry) = feature.geometry() {
                collect_rings(geometry, &mut rings);
            }
            let mesh = TriangleMesh::from_rings(&rings);
            let footprint =
                footprint_from_rings(&rings).or_else(|| convex_hull_footprint(&mesh.vertices));

            chunk.push(BuildingSolid {
                fid: feature.fid().unwrap_or(total as u64),
                uuid,
                objektart,
                name_komplett,
                mesh,
                footprint,
            });
            total += 1;

            if total % 1000 == 0 {
                info!("Read {total} buildings...");
            }

            if chunk.len() >= chunk_size {
                let full = std::mem::take(&mut chunk);
                if !on_chunk(chunk_num, full)? {
                    return Ok(());
                }
                chunk_num += 1;
            }
        }

        if !chunk.is_empty() {
            on_chunk(chunk_num, chunk)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_layer_substring_match() {
        let available = vec![
            "main.Building_solid".to_string(),
            "main.Roof_surface".to_string(),
        ];
        assert_eq!(
            resolve_layer(&available, "Building_solid"),
            Some("main.Building_solid".to_string())
        );
        assert_eq!(
            resolve_layer(&available, "building_SOLID"),
            Some("main.Building_solid".to_string())
        );
        // The requested name may also contain the layer name.
        let short = vec!["Buildings".to_string()];
        assert_eq!(
            resolve_layer(&short, "some_Buildings_layer"),
            Some("Buildings".to_string())
        );
        assert_eq!(resolve_layer(&available, "Bridges"), None);
    }

    #[test]
    fn test_flatten_geometry_type() {
        // plain, Z (ISO), M, ZM and 2.5D variants of MultiPolygon
        assert_eq!(flatten_geometry_type(6), OGRwkbGeometryType::wkbMultiPolygon);
        assert_eq!(flatten_geometry_type(1006), OGRwkbGeometryType::wkbMultiPolygon);
        assert_eq!(flatten_geometry_type(2006), OGRwkbGeometryType::wkbMultiPolygon);
        assert_eq!(flatten_geometry_type(3006), OGRwkbGeometryType::wkbMultiPolygon);
        assert_eq!(
            flatten_geometry_type(0x8000_0006),
            OGRwkbGeometryType::wkbMultiPolygon
        );
        assert_eq!(flatten_geometry_type(3), OGRwkbGeometryType::wkbPolygon);
        assert_eq!(flatten_geometry_type(0x8000_0003), OGRwkbGeometryType::wkbPolygon);
    }
}
