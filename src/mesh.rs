//! Indexed triangle meshes built from multipatch building solids.
//!
//! swissBUILDINGS3D stores each solid as a MultiPolygon with 3D rings. Every
//! ring becomes a triangle fan over its non-closing vertices; duplicate
//! vertices are merged afterwards so shared edges actually share indices.

use geo::{Coord, LineString, Polygon};
use std::collections::HashMap;

/// One ring of a multipatch geometry: (x, y, elevation) in LV95 metres.
pub type Ring = Vec<(f64, f64, f64)>;

#[derive(Debug, Clone, Default)]
pub struct TriangleMesh {
    pub vertices: Vec<[f64; 3]>,
    pub faces: Vec<[usize; 3]>,
}

impl TriangleMesh {
    /// Builds a mesh from multipatch rings by fan triangulation.
    ///
    /// The last coordinate of each ring repeats the first and is dropped; a
    /// ring of n coordinates contributes n−1 vertices and n−3 triangles
    /// anchored at its first vertex. Rings with fewer than three distinct
    /// vertices are skipped.
    pub fn from_rings(rings: &[Ring]) -> Self {
        let mut mesh = Self::default();

        for ring in rings {
            if ring.len() < 2 {
                continue;
            }
            let open = &ring[..ring.len() - 1];
            if open.len() < 3 {
                continue;
            }

            let start = mesh.vertices.len();
            for &(x, y, z) in open {
                mesh.vertices.push([x, y, z]);
            }
            for i in 1..open.len() - 1 {
                mesh.faces.push([start, start + i, start + i + 1]);
            }
        }

        mesh.merge_duplicate_vertices();
        mesh
    }

    /// Merges vertices that coincide to within a micrometre and drops faces
    /// that collapse in the process.
    pub fn merge_duplicate_vertices(&mut self) {
        let mut remap = vec![0usize; self.vertices.len()];
        let mut seen: HashMap<[i64; 3], usize> = HashMap::new();
        let mut merged: Vec<[f64; 3]> = Vec::with_capacity(self.vertices.len());

        for (i, vertex) in self.vertices.iter().enumerate() {
            let key = [
                (vertex[0] * 1e6).round() as i64,
                (vertex[1] * 1e6).round() as i64,
                (vertex[2] * 1e6).round() as i64,
            ];
            let index = *seen.entry(key).or_insert_with(|| {
                merged.push(*vertex);
                merged.len() - 1
            });
            remap[i] = index;
        }

        self.vertices = merged;
        self.faces = self
            .faces
            .iter()
            .map(|f| [remap[f[0]], remap[f[1]], remap[f[2]]])
            .filter(|f| f[0] != f[1] && f[1] != f[2] && f[0] != f[2])
            .collect();
    }

    pub fn is_empty(&self) -> bool {
        self.vertices.len() < 3 || self.faces.is_empty()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn face_count(&self) -> usize {
        self.faces.len()
    }
}

/// XY projection of the ring with the lowest mean elevation.
///
/// That ring is the solid's ground face in swissBUILDINGS3D, which makes it
/// the best available 2D footprint; the convex hull of all vertices is only
/// a fallback and over-covers L-shaped buildings.
pub fn footprint_from_rings(rings: &[Ring]) -> Option<Polygon<f64>> {
    let lowest = rings
        .iter()
        .filter(|ring| ring.len() >= 4)
        .min_by(|a, b| {
            let mean_a = a.iter().map(|c| c.2).sum::<f64>() / a.len() as f64;
            let mean_b = b.iter().map(|c| c.2).sum::<f64>() / b.len() as f64;
            mean_a.partial_cmp(&mean_b).unwrap_or(std::cmp::Ordering::Equal)
        })?;

    let coords: Vec<Coord<f64>> = lowest
        .iter()
        .map(|&(x, y, _)| Coord { x, y })
        .collect();
    if coords.len() < 4 {
        return None;
    }
    Some(Polygon::new(LineString::new(coords), vec![]))
}

/// Convex hull of the mesh vertices' XY projection, as a footprint of last
/// resort when no ground ring could be recovered.
pub fn convex_hull_footprint(vertices: &[[f64; 3]]) -> Option<Polygon<f64>> {
    use geo::{ConvexHull, MultiPoint, Point};

    if vertices.len() < 3 {
        return None;
    }
    let points: MultiPoint<f64> = vertices
        .iter()
        .map(|v| Point::new(v[0], v[1]))
        .collect::<Vec<_>>()
        .into();
    Some(points.convex_hull())
}
