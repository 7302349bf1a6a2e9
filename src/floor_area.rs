//! Gross floor area and floor count estimation from building volume,
//! footprint and GWR classification codes.
//!
//! Floor heights follow the Canton Zurich methodology (SEILER & SEILER
//! GmbH, December 2020): each GKAT/GKLAS code maps to a ground-floor and
//! regular-floor height range, averaged into a min/max storey height.

use once_cell::sync::Lazy;
use serde::Serialize;
use std::collections::HashMap;

/// Mean heights above this are rejected as implausible.
const MAX_PLAUSIBLE_HEIGHT_M: f64 = 200.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CodeSchema {
    Gkat,
    Gklas,
    Default,
}

impl CodeSchema {
    pub fn as_str(self) -> &'static str {
        match self {
            CodeSchema::Gkat => "GKAT",
            CodeSchema::Gklas => "GKLAS",
            CodeSchema::Default => "DEFAULT",
        }
    }
}

/// Floor height parameters for one building code.
/// EG = Erdgeschoss (ground floor), RG = Regelgeschoss (regular floor).
#[derive(Debug, Clone, Copy)]
pub struct FloorHeightEntry {
    pub eg_min: f64,
    pub eg_max: f64,
    pub rg_min: f64,
    pub rg_max: f64,
    pub schema: CodeSchema,
    pub label: &'static str,
}

impl FloorHeightEntry {
    const fn new(
        eg_min: f64,
        eg_max: f64,
        rg_min: f64,
        rg_max: f64,
        schema: CodeSchema,
        label: &'static str,
    ) -> Self {
        Self {
            eg_min,
            eg_max,
            rg_min,
            rg_max,
            schema,
            label,
        }
    }

    /// Storey height range as the mean of ground- and regular-floor ranges.
    pub fn storey_heights(&self) -> (f64, f64) {
        (
            (self.eg_min + self.rg_min) / 2.0,
            (self.eg_max + self.rg_max) / 2.0,
        )
    }
}

const DEFAULT_FLOOR_HEIGHT: FloorHeightEntry = FloorHeightEntry::new(
    2.70,
    3.30,
    2.70,
    3.30,
    CodeSchema::Default,
    "Unknown/Fallback",
);

static FLOOR_HEIGHT_LOOKUP: Lazy<HashMap<&'static str, FloorHeightEntry>> = Lazy::new(|| {
    use CodeSchema::{Gkat, Gklas};
    HashMap::from([
        // GKAT (category)
        ("1010", FloorHeightEntry::new(2.70, 3.30, 2.70, 3.30, Gkat, "Provisorische Unterkunft")),
        ("1030", FloorHeightEntry::new(2.70, 3.30, 2.70, 3.30, Gkat, "Wohngebäude mit Nebennutzung")),
        ("1040", FloorHeightEntry::new(3.30, 3.70, 2.70, 3.70, Gkat, "Gebäude mit teilweiser Wohnnutzung")),
        ("1060", FloorHeightEntry::new(3.30, 5.00, 3.00, 5.00, Gkat, "Gebäude ohne Wohnnutzung")),
        ("1080", FloorHeightEntry::new(3.00, 4.00, 3.00, 4.00, Gkat, "Sonderbauten")),
        // GKLAS (class) - residential
        ("1110", FloorHeightEntry::new(2.70, 3.30, 2.70, 3.30, Gklas, "Einfamilienhaus")),
        ("1121", FloorHeightEntry::new(2.70, 3.30, 2.70, 3.30, Gklas, "Zweifamilienhaus")),
        ("1122", FloorHeightEntry::new(2.70, 3.30, 2.70, 3.30, Gklas, "Mehrfamilienhaus")),
        ("1130", FloorHeightEntry::new(2.70, 3.30, 2.70, 3.30, Gklas, "Wohngebäude für Gemeinschaften")),
        // GKLAS - hotels and tourism
        ("1211", FloorHeightEntry::new(3.30, 3.70, 3.00, 3.50, Gklas, "Hotelgebäude")),
        ("1212", FloorHeightEntry::new(3.00, 3.50, 3.00, 3.50, Gklas, "Kurzfristige Beherbergung")),
        // GKLAS - commercial and industrial
        ("1220", FloorHeightEntry::new(3.40, 4.20, 3.40, 4.20, Gklas, "Bürogebäude")),
        ("1230", FloorHeightEntry::new(3.40, 5.00, 3.40, 5.00, Gklas, "Gross- und Einzelhandel")),
        ("1231", FloorHeightEntry::new(3.30, 4.00, 3.30, 4.00, Gklas, "Restaurants und Bars")),
        ("1241", FloorHeightEntry::new(4.00, 6.00, 4.00, 6.00, Gklas, "Bahnhöfe, Terminals")),
        ("1242", FloorHeightEntry::new(2.80, 3.20, 2.80, 3.20, Gklas, "Parkhäuser")),
        ("1251", FloorHeightEntry::new(4.00, 7.00, 4.00, 7.00, Gklas, "Industriegebäude")),
        ("1252", FloorHeightEntry::new(3.50, 6.00, 3.50, 6.00, Gklas, "Behälter, Silos, Lager")),
        ("1261", FloorHeightEntry::new(3.50, 5.00, 3.50, 5.00, Gklas, "Kultur und Freizeit")),
        ("1262", FloorHeightEntry::new(3.50, 5.00, 3.50, 5.00, Gklas, "Museen und Bibliotheken")),
        ("1263", FloorHeightEntry::new(3.30, 4.00, 3.30, 4.00, Gklas, "Schulen und Hochschulen")),
        ("1264", FloorHeightEntry::new(3.30, 4.00, 3.30, 4.00, Gklas, "Spitäler und Kliniken")),
        ("1265", FloorHeightEntry::new(3.00, 6.00, 3.00, 6.00, Gklas, "Sporthallen")),
        ("1271", FloorHeightEntry::new(3.50, 5.00, 3.50, 5.00, Gklas, "Landwirtschaftliche Betriebsgebäude")),
        ("1272", FloorHeightEntry::new(3.00, 6.00, 3.00, 6.00, Gklas, "Kirchen und Sakralbauten")),
        ("1273", FloorHeightEntry::new(3.00, 4.00, 3.00, 4.00, Gklas, "Denkmäler, geschützte Gebäude")),
        ("1274", FloorHeightEntry::new(3.00, 4.00, 3.00, 4.00, Gklas, "Andere Hochbauten")),
    ])
});

/// Resolves the storey height range for a building.
///
/// GKLAS (the more specific class) wins over GKAT; unknown codes fall back
/// to residential defaults.
pub fn floor_height(
    category: Option<&str>,
    class: Option<&str>,
) -> (f64, f64, CodeSchema, &'static str) {
    if let Some(class) = class {
        if let Some(entry) = FLOOR_HEIGHT_LOOKUP.get(class) {
            if entry.schema == CodeSchema::Gklas {
                let (min, max) = entry.storey_heights();
                return (min, max, CodeSchema::Gklas, entry.label);
            }
        }
    }

    if let Some(category) = category {
        if let Some(entry) = FLOOR_HEIGHT_LOOKUP.get(category) {
            if entry.schema == CodeSchema::Gkat {
                let (min, max) = entry.storey_heights();
                return (min, max, CodeSchema::Gkat, entry.label);
            }
        }
    }

    let (min, max) = DEFAULT_FLOOR_HEIGHT.storey_heights();
    (min, max, CodeSchema::Default, DEFAULT_FLOOR_HEIGHT.label)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Accuracy {
    /// ±10-15%: residential buildings with clear classification.
    High,
    /// ±15-25%: commercial/office buildings.
    Medium,
    /// ±25-40%: industrial, special use, or missing classification.
    Low,
}

impl Accuracy {
    pub fn as_str(self) -> &'static str {
        match self {
            Accuracy::High => "high",
            Accuracy::Medium => "medium",
            Accuracy::Low => "low",
        }
    }
}

/// Accuracy band from data completeness and building type.
pub fn determine_accuracy(
    category: Option<&str>,
    class: Option<&str>,
    has_volume: bool,
    has_footprint: bool,
) -> Accuracy {
    if !has_volume || !has_footprint {
        return Accuracy::Low;
    }
    if category.is_none() && class.is_none() {
        return Accuracy::Low;
    }

    let cat = category.unwrap_or("");
    let class = class.unwrap_or("");

    if cat == "1020" || class.starts_with("11") {
        return Accuracy::High;
    }
    if ["1220", "1230", "1231", "1263", "1264"].contains(&class) {
        return Accuracy::Medium;
    }
    if ["1251", "1252", "1265", "1272"].contains(&class) || ["1060", "1080"].contains(&cat) {
        return Accuracy::Low;
    }
    Accuracy::Medium
}

/// One building row as loaded for floor-area estimation.
#[derive(Debug, Clone)]
pub struct FloorAreaInput {
    pub id: i64,
    pub egid: Option<i64>,
    pub footprint_area_m2: Option<f64>,
    pub volume_above_ground_m3: Option<f64>,
    pub height_mean_m: Option<f64>,
    pub category: Option<String>,
    pub class: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FloorAreaStatus {
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize)]
pub struct FloorAreaEstimate {
    pub id: i64,
    pub area_floor_total_m2: Option<f64>,
    pub area_floor_above_ground_m2: Option<f64>,
    pub area_accuracy: Option<Accuracy>,
    pub floors_total: Option<i32>,
    pub floors_above: Option<i32>,
    pub floors_accuracy: Option<Accuracy>,
    pub status: FloorAreaStatus,
    pub error_message: Option<String>,
    #[serde(rename = "_height_mean_m")]
    pub height_mean_m: Option<f64>,
    #[serde(rename = "_floor_height_used")]
    pub floor_height_used: Option<f64>,
    #[serde(rename = "_schema_used")]
    pub schema_used: Option<CodeSchema>,
    #[serde(rename = "_building_type")]
    pub building_type: Option<&'static str>,
}

impl FloorAreaEstimate {
    fn error(id: i64, message: impl Into<String>) -> Self {
        Self {
            id,
            area_floor_total_m2: None,
            area_floor_above_ground_m2: None,
            area_accuracy: None,
            floors_total: None,
            floors_above: None,
            floors_accuracy: None,
            status: FloorAreaStatus::Error,
            error_message: Some(message.into()),
            height_mean_m: None,
            floor_height_used: None,
            schema_used: None,
            building_type: None,
        }
    }
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Estimates floor count and gross floor area for one building.
///
/// Mean height falls back to volume / footprint. The storey-height range
/// brackets the floor count (taller storeys mean fewer floors); the
/// estimate is the bracket midpoint, clamped to at least one floor. The
/// above-ground figures equal the totals: there is no underground estimate.
pub fn estimate_floor_area(row: &FloorAreaInput) -> FloorAreaEstimate {
    let Some(footprint_area) = row.footprint_area_m2.filter(|a| *a > 0.0) else {
        return FloorAreaEstimate::error(row.id, "Missing or invalid footprint area");
    };

    let volume = row.volume_above_ground_m3.filter(|v| *v > 0.0);
    let mut height_mean = row.height_mean_m.filter(|h| *h > 0.0);

    if height_mean.is_none() {
        height_mean = volume.map(|v| v / footprint_area);
    }
    let Some(height_mean) = height_mean else {
        return FloorAreaEstimate::error(row.id, "Missing volume and height data");
    };

    if height_mean > MAX_PLAUSIBLE_HEIGHT_M {
        return FloorAreaEstimate::error(
            row.id,
            format!("Implausible mean height: {height_mean:.1}m"),
        );
    }

    let (floor_height_min, floor_height_max, schema, label) =
        floor_height(row.category.as_deref(), row.class.as_deref());

    let floors_min = height_mean / floor_height_max;
    let floors_max = height_mean / floor_height_min;
    let floors_estimate = ((floors_min + floors_max) / 2.0).max(1.0);
    let floors_rounded = floors_estimate.round() as i32;

    let area_estimate = footprint_area * floors_estimate;

    let accuracy = determine_accuracy(
        row.category.as_deref(),
        row.class.as_deref(),
        volume.is_some(),
        true,
    );

    FloorAreaEstimate {
        id: row.id,
        area_floor_total_m2: Some(round2(area_estimate)),
        area_floor_above_ground_m2: Some(round2(area_estimate)),
        area_accuracy: Some(accuracy),
        floors_total: Some(floors_rounded),
        floors_above: Some(floors_rounded),
        floors_accuracy: Some(accuracy),
        status: FloorAreaStatus::Success,
        error_message: None,
        height_mean_m: Some(round2(height_mean)),
        floor_height_used: Some(round2((floor_height_min + floor_height_max) / 2.0)),
        schema_used: Some(schema),
        building_type: Some(label),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(
        footprint: Option<f64>,
        volume: Option<f64>,
        height: Option<f64>,
        category: Option<&str>,
        class: Option<&str>,
    ) -> FloorAreaInput {
        FloorAreaInput {
            id: 42,
            egid: None,
            footprint_area_m2: footprint,
            volume_above_ground_m3: volume,
            height_mean_m: height,
            category: category.map(String::from),
            class: class.map(String::from),
        }
    }

    #[test]
    fn test_lookup_prefers_gklas_over_gkat() {
        let (min, max, schema, _) = floor_height(Some("1060"), Some("1110"));
        assert_eq!(schema, CodeSchema::Gklas);
        assert_eq!((min, max), (2.70, 3.30));
    }

    #[test]
    fn test_lookup_falls_back_to_gkat() {
        let (min, max, schema, _) = floor_height(Some("1060"), Some("9999"));
        assert_eq!(schema, CodeSchema::Gkat);
        assert!((min - 3.15).abs() < 1e-9);
        assert!((max - 5.0).abs() < 1e-9);
    }

    #[test]
    fn test_lookup_default_is_residential() {
        let (min, max, schema, _) = floor_height(None, None);
        assert_eq!(schema, CodeSchema::Default);
        assert_eq!((min, max), (2.70, 3.30));
    }

    #[test]
    fn test_gkat_code_does_not_match_as_gklas() {
        // "1030" is a GKAT entry; presented as a class it must not match.
        let (_, _, schema, _) = floor_height(None, Some("1030"));
        assert_eq!(schema, CodeSchema::Default);
    }

    #[test]
    fn test_mid_rise_office() {
        // GKLAS 1220: storey height 3.4-4.2 m. 24 m mean height over 400 m²
        // gives 5.71..7.06 floors, estimate 6.39 -> 6 floors, ~2555 m²
        // (the area uses the unrounded floor estimate).
        let result = estimate_floor_area(&input(
            Some(400.0),
            Some(9600.0),
            Some(24.0),
            None,
            Some("1220"),
        ));

        assert_eq!(result.status, FloorAreaStatus::Success);
        assert_eq!(result.floors_total, Some(6));
        let area = result.area_floor_total_m2.unwrap();
        assert!((area - 2554.62).abs() < 0.5, "area {area}");
        assert_eq!(result.area_accuracy, Some(Accuracy::Medium));
        assert_eq!(result.schema_used, Some(CodeSchema::Gklas));
    }

    #[test]
    fn test_height_derived_from_volume() {
        // No stored mean height: 3000 m³ over 300 m² is 10 m.
        let result = estimate_floor_area(&input(Some(300.0), Some(3000.0), None, None, Some("1110")));
        assert_eq!(result.status, FloorAreaStatus::Success);
        assert_eq!(result.height_mean_m, Some(10.0));
        assert_eq!(result.area_accuracy, Some(Accuracy::High));
    }

    #[test]
    fn test_small_building_has_at_least_one_floor() {
        let result = estimate_floor_area(&input(Some(50.0), None, Some(2.0), None, Some("1110")));
        assert_eq!(result.status, FloorAreaStatus::Success);
        assert_eq!(result.floors_total, Some(1));
        assert_eq!(result.area_floor_total_m2, Some(50.0));
    }

    #[test]
    fn test_missing_footprint_is_an_error() {
        let result = estimate_floor_area(&input(None, Some(3000.0), None, None, None));
        assert_eq!(result.status, FloorAreaStatus::Error);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Missing or invalid footprint area")
        );
    }

    #[test]
    fn test_missing_volume_and_height_is_an_error() {
        let result = estimate_floor_area(&input(Some(300.0), None, None, None, None));
        assert_eq!(result.status, FloorAreaStatus::Error);
        assert_eq!(
            result.error_message.as_deref(),
            Some("Missing volume and height data")
        );
    }

    #[test]
    fn test_implausible_height_is_rejected() {
        let result = estimate_floor_area(&input(Some(10.0), Some(5000.0), None, None, None));
        assert_eq!(result.status, FloorAreaStatus::Error);
        assert!(result
            .error_message
            .as_deref()
            .unwrap()
            .starts_with("Implausible mean height"));
    }

    #[test]
    fn test_accuracy_bands() {
        assert_eq!(
            determine_accuracy(Some("1020"), None, true, true),
            Accuracy::High
        );
        assert_eq!(
            determine_accuracy(None, Some("1122"), true, true),
            Accuracy::High
        );
        assert_eq!(
            determine_accuracy(None, Some("1230"), true, true),
            Accuracy::Medium
        );
        assert_eq!(
            determine_accuracy(None, Some("1251"), true, true),
            Accuracy::Low
        );
        assert_eq!(
            determine_accuracy(Some("1060"), Some("1221"), true, true),
            Accuracy::Low
        );
        assert_eq!(
            determine_accuracy(None, Some("1211"), true, true),
            Accuracy::Medium
        );
        // Missing inputs dominate everything else.
        assert_eq!(
            determine_accuracy(Some("1020"), None, false, true),
            Accuracy::Low
        );
        assert_eq!(determine_accuracy(None, None, true, true), Accuracy::Low);
    }
}
