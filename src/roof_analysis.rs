//! Roof analysis for swissBUILDINGS3D solids.
//!
//! Classifies the faces of a triangulated building mesh into footprint,
//! wall, flat-roof and sloped-roof surfaces, derives height metrics, and
//! classifies the roof shape from the azimuthal distribution of its sloped
//! faces.

use crate::mesh::TriangleMesh;
use serde::Serialize;

/// Faces within this angle of horizontal count as horizontal.
pub const HORIZONTAL_TOLERANCE_DEG: f64 = 10.0;
/// Faces within this angle of vertical count as vertical.
pub const VERTICAL_TOLERANCE_DEG: f64 = 10.0;

/// Sloped faces less than this far above the footprint level are discarded
/// as below-eave geometry.
const SLOPED_ROOF_MIN_RISE_M: f64 = 0.5;

/// Azimuth sectors used when grouping sloped roof faces.
const AZIMUTH_SECTOR_DEG: f64 = 45.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaceOrientation {
    HorizontalUp,
    HorizontalDown,
    Vertical,
    Sloped,
}

/// Classifies a face by the Z component of its unit normal.
pub fn classify_face_orientation(normal_z: f64) -> FaceOrientation {
    let abs_z = normal_z.abs();

    if abs_z > HORIZONTAL_TOLERANCE_DEG.to_radians().cos() {
        if normal_z > 0.0 {
            FaceOrientation::HorizontalUp
        } else {
            FaceOrientation::HorizontalDown
        }
    } else if abs_z < VERTICAL_TOLERANCE_DEG.to_radians().sin() {
        FaceOrientation::Vertical
    } else {
        FaceOrientation::Sloped
    }
}

/// Slope of a face in degrees from horizontal (0 = flat, 90 = vertical).
pub fn face_slope_deg(normal: [f64; 3]) -> f64 {
    normal[2].abs().clamp(-1.0, 1.0).acos().to_degrees()
}

/// Compass direction the face points towards, degrees clockwise from north.
pub fn face_azimuth_deg(normal: [f64; 3]) -> f64 {
    let azimuth = normal[0].atan2(normal[1]).to_degrees();
    if azimuth < 0.0 {
        azimuth + 360.0
    } else {
        azimuth
    }
}

/// Per-face quantities used throughout the analysis.
#[derive(Debug, Clone, Copy)]
struct FaceInfo {
    area: f64,
    z: f64,
    slope: f64,
    azimuth: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoofShape {
    Flat,
    Gable,
    Hip,
    Shed,
    Mansard,
    Complex,
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisStatus {
    Success,
    Failed,
}

/// Result of the roof-shape decision tree.
#[derive(Debug, Clone)]
struct RoofClassification {
    shape: RoofShape,
    confidence: f64,
    slope_primary_deg: Option<f64>,
    slope_secondary_deg: Option<f64>,
    azimuth_primary_deg: Option<f64>,
    ridge_orientation_deg: Option<f64>,
    roof_face_count: usize,
}

/// Full per-building roof analysis, shaped for CSV output.
#[derive(Debug, Clone, Serialize)]
pub struct RoofAnalysis {
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
}

impl RoofAnalysis {
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            roof_area_m2: None,
            wall_area_m2: None,
            footprint_area_m2: None,
            sloped_roof_area_m2: None,
            flat_roof_area_m2: None,
            total_surface_area_m2: None,
            roof_shape: None,
            roof_shape_confidence: None,
            roof_slope_primary_deg: None,
            roof_slope_secondary_deg: None,
            roof_azimuth_primary_deg: None,
            roof_ridge_orientation: None,
            roof_face_count: None,
            building_height_m: None,
            eave_height_m: None,
            ridge_height_m: None,
            wall_perimeter_m: None,
            min_elevation_m: None,
            max_elevation_m: None,
            horizontal_face_count: None,
            vertical_face_count: None,
            sloped_face_count: None,
            analysis_status: AnalysisStatus::Failed,
            analysis_error: Some(error.into()),
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

fn round1(v: f64) -> f64 {
    (v * 10.0).round() / 10.0
}

/// Area, unit normal and centroid elevation of one triangle. `None` for
/// degenerate triangles whose normal is undefined.
fn face_quantities(mesh: &TriangleMesh, face: [usize; 3]) -> Option<(f64, [f64; 3], f64)> {
    let a = mesh.vertices[face[0]];
    let b = mesh.vertices[face[1]];
    let c = mesh.vertices[face[2]];

    let e1 = [b[0] - a[0], b[1] - a[1], b[2] - a[2]];
    let e2 = [c[0] - a[0], c[1] - a[1], c[2] - a[2]];
    let cross = [
        e1[1] * e2[2] - e1[2] * e2[1],
        e1[2] * e2[0] - e1[0] * e2[2],
        e1[0] * e2[1] - e1[1] * e2[0],
    ];
    let norm = (cross[0] * cross[0] + cross[1] * cross[1] + cross[2] * cross[2]).sqrt();
    if norm < 1e-12 {
        return None;
    }

    let area = norm / 2.0;
    let normal = [cross[0] / norm, cross[1] / norm, cross[2] / norm];
    let centroid_z = (a[2] + b[2] + c[2]) / 3.0;
    Some((area, normal, centroid_z))
}

/// Analyzes a building mesh: area allocation, height metrics and roof shape.
pub fn analyze_building_roof(mesh: &TriangleMesh) -> RoofAnalysis {
    if mesh.is_empty() {
        return RoofAnalysis::failed("No vertices or faces provided");
    }

    let mut horizontal_faces: Vec<FaceInfo> = Vec::new();
    let mut vertical_faces: Vec<FaceInfo> = Vec::new();
    let mut sloped_faces: Vec<FaceInfo> = Vec::new();
    let mut wall_area = 0.0;
    let mut total_surface_area = 0.0;

    for &face in &mesh.faces {
        let Some((area, normal, z)) = face_quantities(mesh, face) else {
            continue;
        };
        total_surface_area += area;

        let info = FaceInfo {
            area,
            z,
            slope: face_slope_deg(normal),
            azimuth: face_azimuth_deg(normal),
        };

        match classify_face_orientation(normal[2]) {
            FaceOrientation::HorizontalUp | FaceOrientation::HorizontalDown => {
                horizontal_faces.push(info);
            }
            FaceOrientation::Vertical => {
                vertical_faces.push(info);
                wall_area += area;
            }
            FaceOrientation::Sloped => sloped_faces.push(info),
        }
    }

    // Split horizontal faces into footprint and flat roof by elevation: the
    // bottom tenth of the Z range belongs to the footprint.
    let mut footprint_area = 0.0;
    let mut flat_roof_area = 0.0;
    let mut flat_roof_faces: Vec<FaceInfo> = Vec::new();

    if !horizontal_faces.is_empty() {
        let min_z = horizontal_faces.iter().map(|f| f.z).fold(f64::INFINITY, f64::min);
        let max_z = horizontal_faces.iter().map(|f| f.z).fold(f64::NEG_INFINITY, f64::max);
        let z_range = max_z - min_z;
        let threshold = if z_range > 0.01 {
            min_z + 0.1 * z_range
        } else {
            min_z + 0.1
        };

        for face in &horizontal_faces {
            if face.z <= threshold {
                footprint_area += face.area;
            } else {
                flat_roof_area += face.area;
                flat_roof_faces.push(*face);
            }
        }
    }

    // Sloped faces above the footprint level are roof; lower ones are
    // below-eave geometry and discarded.
    let footprint_z = if !horizontal_faces.is_empty() {
        horizontal_faces.iter().map(|f| f.z).fold(f64::INFINITY, f64::min)
    } else if !sloped_faces.is_empty() {
        sloped_faces.iter().map(|f| f.z).fold(f64::INFINITY, f64::min)
    } else {
        0.0
    };

    let mut sloped_roof_area = 0.0;
    let mut sloped_roof_faces: Vec<FaceInfo> = Vec::new();
    for face in &sloped_faces {
        if face.z > footprint_z + SLOPED_ROOF_MIN_RISE_M {
            sloped_roof_area += face.area;
            sloped_roof_faces.push(*face);
        }
    }

    // Height metrics over all mesh vertices.
    let min_elevation = mesh.vertices.iter().map(|v| v[2]).fold(f64::INFINITY, f64::min);
    let max_elevation = mesh.vertices.iter().map(|v| v[2]).fold(f64::NEG_INFINITY, f64::max);
    let building_height = max_elevation - min_elevation;

    let eave_height = if wall_area > 0.0 && !vertical_faces.is_empty() {
        let wall_top_z = vertical_faces.iter().map(|f| f.z).fold(f64::NEG_INFINITY, f64::max);
        Some(round2(wall_top_z - min_elevation))
    } else {
        None
    };

    let wall_perimeter = if wall_area > 0.0 && building_height > 0.0 {
        Some(round2(wall_area / building_height))
    } else {
        None
    };

    let classification = classify_roof_shape(&sloped_roof_faces, &flat_roof_faces);

    RoofAnalysis {
        roof_area_m2: Some(round2(flat_roof_area + sloped_roof_area)),
        wall_area_m2: Some(round2(wall_area)),
        footprint_area_m2: Some(round2(footprint_area)),
        sloped_roof_area_m2: Some(round2(sloped_roof_area)),
        flat_roof_area_m2: Some(round2(flat_roof_area)),
        total_surface_area_m2: Some(round2(total_surface_area)),
        roof_shape: Some(classification.shape),
        roof_shape_confidence: Some(round2(classification.confidence)),
        roof_slope_primary_deg: classification.slope_primary_deg.map(round1),
        roof_slope_secondary_deg: classification.slope_secondary_deg.map(round1),
        roof_azimuth_primary_deg: classification.azimuth_primary_deg.map(round1),
        roof_ridge_orientation: classification.ridge_orientation_deg.map(round1),
        roof_face_count: Some(classification.roof_face_count),
        building_height_m: Some(round2(building_height)),
        eave_height_m: eave_height,
        ridge_height_m: Some(round2(max_elevation)),
        wall_perimeter_m: wall_perimeter,
        min_elevation_m: Some(round2(min_elevation)),
        max_elevation_m: Some(round2(max_elevation)),
        horizontal_face_count: Some(horizontal_faces.len()),
        vertical_face_count: Some(vertical_faces.len()),
        sloped_face_count: Some(sloped_faces.len()),
        analysis_status: AnalysisStatus::Success,
        analysis_error: None,
    }
}

/// One significant azimuth sector of sloped roof faces.
#[derive(Debug, Clone)]
struct AzimuthGroup {
    area: f64,
    avg_slope: f64,
    avg_azimuth: f64,
}

/// Classifies the roof shape from sloped and flat roof faces.
///
/// Sloped faces are binned into 45° azimuth sectors; sectors holding more
/// than 10% of the sloped area form the significant groups the decision
/// tree runs on. The branches short-circuit in order: flat, shed, gable,
/// hip, mansard, complex.
fn classify_roof_shape(sloped_roof: &[FaceInfo], flat_roof: &[FaceInfo]) -> RoofClassification {
    let mut result = RoofClassification {
        shape: RoofShape::Unknown,
        confidence: 0.0,
        slope_primary_deg: None,
        slope_secondary_deg: None,
        azimuth_primary_deg: None,
        ridge_orientation_deg: None,
        roof_face_count: 0,
    };

    let total_sloped_area: f64 = sloped_roof.iter().map(|f| f.area).sum();
    let total_flat_area: f64 = flat_roof.iter().map(|f| f.area).sum();
    let total_roof_area = total_sloped_area + total_flat_area;

    if total_roof_area == 0.0 {
        return result;
    }

    result.roof_face_count = sloped_roof.len() + flat_roof.len();
    let flat_ratio = total_flat_area / total_roof_area;

    if flat_ratio > 0.85 {
        result.shape = RoofShape::Flat;
        result.confidence = flat_ratio.min(1.0);
        result.slope_primary_deg = Some(if sloped_roof.is_empty() {
            0.0
        } else {
            sloped_roof.iter().map(|f| f.slope).sum::<f64>() / sloped_roof.len() as f64
        });
        return result;
    }

    if sloped_roof.is_empty() {
        result.shape = RoofShape::Flat;
        result.confidence = 1.0;
        result.slope_primary_deg = Some(0.0);
        return result;
    }

    // Bin by 45° sector, then keep sectors carrying >10% of the sloped area.
    let mut sectors: [Vec<&FaceInfo>; 8] = Default::default();
    for face in sloped_roof {
        let sector = (((face.azimuth + AZIMUTH_SECTOR_DEG / 2.0) / AZIMUTH_SECTOR_DEG) as usize) % 8;
        sectors[sector].push(face);
    }

    let mut groups: Vec<AzimuthGroup> = Vec::new();
    for faces in &sectors {
        let group_area: f64 = faces.iter().map(|f| f.area).sum();
        if group_area > 0.1 * total_sloped_area {
            let avg_slope = faces.iter().map(|f| f.slope * f.area).sum::<f64>() / group_area;
            let avg_azimuth = faces.iter().map(|f| f.azimuth * f.area).sum::<f64>() / group_area;
            groups.push(AzimuthGroup {
                area: group_area,
                avg_slope,
                avg_azimuth,
            });
        }
    }
    groups.sort_by(|a, b| b.area.total_cmp(&a.area));
    let num_groups = groups.len();

    if let Some(primary) = groups.first() {
        result.slope_primary_deg = Some(primary.avg_slope);
        result.azimuth_primary_deg = Some(primary.avg_azimuth);
    }
    if let Some(secondary) = groups.get(1) {
        result.slope_secondary_deg = Some(secondary.avg_slope);
    }

    // Shed: one dominant slope direction.
    if num_groups == 1 {
        result.shape = RoofShape::Shed;
        result.confidence = 0.8;
        return result;
    }

    // Gable: two roughly opposite slope directions.
    if num_groups == 2 {
        let mut azimuth_diff = (groups[0].avg_azimuth - groups[1].avg_azimuth).abs();
        if azimuth_diff > 180.0 {
            azimuth_diff = 360.0 - azimuth_diff;
        }
        if azimuth_diff > 150.0 && azimuth_diff < 210.0 {
            result.shape = RoofShape::Gable;
            result.confidence = 0.85;
            result.ridge_orientation_deg = Some((groups[0].avg_azimuth + 90.0) % 360.0);
            return result;
        }
    }

    if num_groups >= 3 {
        // Hip: four or more directions with evenly distributed areas.
        let mean_area = groups.iter().map(|g| g.area).sum::<f64>() / num_groups as f64;
        let variance = groups
            .iter()
            .map(|g| (g.area - mean_area).powi(2))
            .sum::<f64>()
            / num_groups as f64;
        let area_cv = if mean_area > 0.0 {
            variance.sqrt() / mean_area
        } else {
            1.0
        };
        if num_groups >= 4 && area_cv < 0.5 {
            result.shape = RoofShape::Hip;
            result.confidence = 0.8;
            return result;
        }

        // Mansard: steep lower slopes combined with flatter upper ones.
        let max_slope = groups.iter().map(|g| g.avg_slope).fold(f64::NEG_INFINITY, f64::max);
        let min_slope = groups.iter().map(|g| g.avg_slope).fold(f64::INFINITY, f64::min);
        if max_slope > 60.0 && min_slope < 40.0 {
            result.shape = RoofShape::Mansard;
            result.confidence = 0.7;
            return result;
        }
    }

    // Complex: many directions, or several directions with a sizeable flat
    // share.
    if num_groups > 4 || (num_groups > 2 && flat_ratio > 0.2) {
        result.shape = RoofShape::Complex;
        result.confidence = 0.6;
        return result;
    }

    result.shape = RoofShape::Complex;
    result.confidence = 0.5;
    result
}
