//! Core data models used throughout the service.
//!
//! [`FortRecord`] is the catalog row. The result types wrap a record with
//! the per-query value that ranked it and serialize flat, so API clients see
//! the record fields alongside `distance_km`, `score` or `cluster`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// One fort in the catalog.
///
/// Numeric fields are `None` when the source row lacks a usable value;
/// a missing value is never stored as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FortRecord {
    pub fort_id: i64,
    pub name: String,
    #[serde(default)]
    pub alternate_names: String,
    #[serde(default)]
    pub district: String,
    #[serde(default)]
    pub taluka: String,
    #[serde(rename = "type", default)]
    pub fort_type: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub elevation_m: Option<f64>,
    #[serde(default)]
    pub trek_difficulty: String,
    pub trek_time_hours: Option<f64>,
    #[serde(default)]
    pub best_season: String,
    #[serde(default)]
    pub built_by: String,
    #[serde(default)]
    pub era: String,
    #[serde(default)]
    pub water_availability: String,
    #[serde(default)]
    pub key_events: String,
    #[serde(default)]
    pub notes: String,
    #[serde(default)]
    pub description: String,
}

impl FortRecord {
    /// Both coordinates, when present and finite.
    pub fn coordinates(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) if lat.is_finite() && lon.is_finite() => Some((lat, lon)),
            _ => None,
        }
    }
}

/// A fort ranked by distance from a query coordinate.
#[derive(Debug, Clone, Serialize)]
pub struct DistanceResult {
    #[serde(flatten)]
    pub fort: FortRecord,
    pub distance_km: f64,
}

/// A fort ranked by similarity to a query fort.
#[derive(Debug, Clone, Serialize)]
pub struct SimilarityResult {
    #[serde(flatten)]
    pub fort: FortRecord,
    pub score: f64,
}

/// A fort with its cluster label.
#[derive(Debug, Clone, Serialize)]
pub struct ClusteredFort {
    #[serde(flatten)]
    pub fort: FortRecord,
    pub cluster: usize,
}

/// A fort returned by semantic search with its cosine similarity.
#[derive(Debug, Clone, Serialize)]
pub struct SemanticHit {
    #[serde(flatten)]
    pub fort: FortRecord,
    pub score: f32,
}

/// `fort_id → cluster_id`, rebuilt wholesale on every clustering run.
pub type ClusterAssignment = BTreeMap<i64, usize>;

/// `cluster_id → member count`.
pub type ClusterCounts = BTreeMap<usize, usize>;

#[cfg(test)]
pub(crate) fn fort(id: i64, name: &str) -> FortRecord {
    FortRecord {
        fort_id: id,
        name: name.to_string(),
        alternate_names: String::new(),
        district: String::new(),
        taluka: String::new(),
        fort_type: String::new(),
        latitude: None,
        longitude: None,
        elevation_m: None,
        trek_difficulty: String::new(),
        trek_time_hours: None,
        best_season: String::new(),
        built_by: String::new(),
        era: String::new(),
        water_availability: String::new(),
        key_events: String::new(),
        notes: String::new(),
        description: String::new(),
    }
}
