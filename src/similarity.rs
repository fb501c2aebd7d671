//! Similarity recommendations: forts ranked by a type/elevation heuristic.
//!
//! ```text
//! score = type_match − ELEVATION_WEIGHT × |elev_candidate − elev_query|
//! ```
//!
//! `type_match` is 1 for an exact `type` match and 0 otherwise. With a weight
//! of 0.001 per metre, an elevation gap below 1000 m can never lift a
//! non-matching fort above a matching one; at exactly 1000 m the two terms
//! cancel and the id tie-break decides.

use std::cmp::Ordering;

use crate::catalog::Catalog;
use crate::error::{FortError, Result};
use crate::models::{FortRecord, SimilarityResult};

/// Score penalty per metre of elevation difference.
pub const ELEVATION_WEIGHT: f64 = 0.001;

/// Elevation assumed for a fort whose elevation is unknown.
///
/// Zero keeps compatibility with the scores the dataset has always produced,
/// but it makes unknown-elevation forts look like sea forts. Change here only.
pub const MISSING_ELEVATION_FALLBACK_M: f64 = 0.0;

/// Similarity of `candidate` to `base`.
pub fn score(base: &FortRecord, candidate: &FortRecord) -> f64 {
    let type_match = if candidate.fort_type == base.fort_type {
        1.0
    } else {
        0.0
    };
    let base_elev = base.elevation_m.unwrap_or(MISSING_ELEVATION_FALLBACK_M);
    let cand_elev = candidate
        .elevation_m
        .unwrap_or(MISSING_ELEVATION_FALLBACK_M);
    type_match - ELEVATION_WEIGHT * (cand_elev - base_elev).abs()
}

/// The `k` forts most similar to `fort_id`, best first, excluding itself.
pub fn similar_to(catalog: &Catalog, fort_id: i64, k: usize) -> Result<Vec<SimilarityResult>> {
    if k == 0 {
        return Err(FortError::InvalidArgument("k must be >= 1".to_string()));
    }
    let base = catalog.find_by_id(fort_id)?;

    let mut ranked: Vec<SimilarityResult> = catalog
        .all()
        .iter()
        .filter(|f| f.fort_id != fort_id)
        .map(|f| SimilarityResult {
            fort: f.clone(),
            score: score(base, f),
        })
        .collect();

    ranked.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(Ordering::Equal)
            .then(a.fort.fort_id.cmp(&b.fort.fort_id))
    });
    ranked.truncate(k);
    Ok(ranked)
}
