//! Proximity recommendations: forts ranked by geodesic distance.
//!
//! Distances are computed on the WGS-84 ellipsoid (Karney's geodesic
//! algorithm via the `geo` crate). Forts without both coordinates are left
//! out of the ranking entirely.

use geo::{GeodesicDistance, Point};
use std::cmp::Ordering;

use crate::catalog::Catalog;
use crate::error::{FortError, Result};
use crate::models::DistanceResult;

/// Geodesic distance in kilometres between two `(lat, lon)` pairs.
pub fn geodesic_km(a: (f64, f64), b: (f64, f64)) -> f64 {
    // geo points are (x, y) = (lon, lat)
    let pa = Point::new(a.1, a.0);
    let pb = Point::new(b.1, b.0);
    pa.geodesic_distance(&pb) / 1000.0
}

/// The `k` forts closest to `origin`, nearest first, ties by `fort_id`.
pub fn nearest(catalog: &Catalog, origin: (f64, f64), k: usize) -> Result<Vec<DistanceResult>> {
    validate_origin(origin)?;
    if k == 0 {
        return Err(FortError::InvalidArgument("k must be >= 1".to_string()));
    }

    let mut ranked: Vec<DistanceResult> = catalog
        .all()
        .iter()
        .filter_map(|f| {
            f.coordinates().map(|coords| DistanceResult {
                fort: f.clone(),
                distance_km: geodesic_km(origin, coords),
            })
        })
        .collect();

    ranked.sort_by(|a, b| {
        a.distance_km
            .partial_cmp(&b.distance_km)
            .unwrap_or(Ordering::Equal)
            .then(a.fort.fort_id.cmp(&b.fort.fort_id))
    });
    ranked.truncate(k);
    Ok(ranked)
}

pub(crate) fn validate_origin((lat, lon): (f64, f64)) -> Result<()> {
    if !lat.is_finite() || !(-90.0..=90.0).contains(&lat) {
        return Err(FortError::InvalidArgument(format!(
            "latitude out of range: {}",
            lat
        )));
    }
    if !lon.is_finite() || !(-180.0..=180.0).contains(&lon) {
        return Err(FortError::InvalidArgument(format!(
            "longitude out of range: {}",
            lon
        )));
    }
    Ok(())
}
