//! Clustering facade: seeded k-means over standardized fort features.
//!
//! Each fort becomes a five-element feature vector:
//!
//! | # | Feature | Source |
//! |---|---------|--------|
//! | 0 | latitude | `latitude` |
//! | 1 | longitude | `longitude` |
//! | 2 | elevation | `elevation_m` |
//! | 3 | trek time | `trek_time_hours` |
//! | 4 | difficulty rank | `trek_difficulty` via [`difficulty_rank`] |
//!
//! Missing values are imputed with the column median, then every column is
//! standardized to zero mean and unit variance. Partitioning uses k-means++
//! seeding from a fixed seed followed by Lloyd iterations, restarted
//! `n_init` times; the lowest-inertia run wins. Identical input and
//! parameters always produce the identical assignment.
//!
//! When fewer forts have both coordinates than clusters were requested,
//! clustering is skipped: every fort lands in cluster `0` and the outcome
//! carries a warning instead of a model.
//!
//! [`ClusterService`] owns the current outcome as an immutable snapshot.
//! Rebuilds compute a complete new snapshot before swapping it in, so a
//! concurrent [`ClusterService::predict_cluster`] always sees one whole model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::cmp::Ordering;
use std::sync::{Arc, Mutex, RwLock};

use crate::catalog::{Catalog, CatalogHandle};
use crate::config::ClusteringConfig;
use crate::error::{FortError, Result};
use crate::models::{ClusterAssignment, ClusterCounts, ClusteredFort, FortRecord};

pub const N_FEATURES: usize = 5;

/// Sum of squared centroid movement below which Lloyd iterations stop.
const TOLERANCE: f64 = 1e-4;

type Features = [f64; N_FEATURES];
type RawFeatures = [Option<f64>; N_FEATURES];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClusterParams {
    pub n_clusters: usize,
    pub seed: u64,
    pub max_iter: usize,
    pub n_init: usize,
}

impl From<&ClusteringConfig> for ClusterParams {
    fn from(c: &ClusteringConfig) -> Self {
        Self {
            n_clusters: c.n_clusters,
            seed: c.seed,
            max_iter: c.max_iter,
            n_init: c.n_init,
        }
    }
}

impl Default for ClusterParams {
    fn default() -> Self {
        Self::from(&ClusteringConfig::default())
    }
}

/// Ordinal for a textual trek difficulty.
///
/// `easy`/`medium`/`hard` map to 1/2/3 (`moderate` is read as `medium`);
/// anything else is parsed as a number. `None` means unknown.
pub fn difficulty_rank(text: &str) -> Option<f64> {
    let t = text.trim().to_lowercase();
    match t.as_str() {
        "easy" => Some(1.0),
        "medium" | "moderate" => Some(2.0),
        "hard" => Some(3.0),
        _ => t.parse::<f64>().ok().filter(|v| v.is_finite()),
    }
}

fn raw_features(f: &FortRecord) -> RawFeatures {
    [
        f.latitude,
        f.longitude,
        f.elevation_m,
        f.trek_time_hours,
        difficulty_rank(&f.trek_difficulty),
    ]
}

fn median(values: &mut [f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal));
    let mid = values.len() / 2;
    Some(if values.len() % 2 == 0 {
        (values[mid - 1] + values[mid]) / 2.0
    } else {
        values[mid]
    })
}

/// Median imputation followed by standardization, fitted on the training rows.
#[derive(Debug, Clone, PartialEq)]
pub struct Preprocessor {
    medians: Features,
    means: Features,
    scales: Features,
}

impl Preprocessor {
    fn fit(rows: &[RawFeatures]) -> Self {
        let mut medians = [0.0; N_FEATURES];
        for (col, m) in medians.iter_mut().enumerate() {
            let mut present: Vec<f64> = rows.iter().filter_map(|r| r[col]).collect();
            *m = median(&mut present).unwrap_or(0.0);
        }

        let imputed: Vec<Features> = rows.iter().map(|r| impute(r, &medians)).collect();
        let n = imputed.len().max(1) as f64;
        let mut means = [0.0; N_FEATURES];
        let mut scales = [1.0; N_FEATURES];
        for col in 0..N_FEATURES {
            let mean = imputed.iter().map(|r| r[col]).sum::<f64>() / n;
            let var = imputed.iter().map(|r| (r[col] - mean).powi(2)).sum::<f64>() / n;
            means[col] = mean;
            let std = var.sqrt();
            scales[col] = if std > f64::EPSILON { std } else { 1.0 };
        }

        Self {
            medians,
            means,
            scales,
        }
    }

    fn transform(&self, raw: &RawFeatures) -> Features {
        let mut out = impute(raw, &self.medians);
        for (col, v) in out.iter_mut().enumerate() {
            *v = (*v - self.means[col]) / self.scales[col];
        }
        out
    }

    pub fn medians(&self) -> &[f64; N_FEATURES] {
        &self.medians
    }
}

fn impute(raw: &RawFeatures, medians: &Features) -> Features {
    let mut out = [0.0; N_FEATURES];
    for col in 0..N_FEATURES {
        out[col] = raw[col].unwrap_or(medians[col]);
    }
    out
}

fn sq_dist(a: &Features, b: &Features) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| (x - y).powi(2)).sum()
}

fn nearest_centroid(centroids: &[Features], x: &Features) -> (usize, f64) {
    let mut best = (0, f64::INFINITY);
    for (i, c) in centroids.iter().enumerate() {
        let d = sq_dist(c, x);
        if d < best.1 {
            best = (i, d);
        }
    }
    best
}

/// A fitted k-means model: preprocessing plus centroids in standardized space.
#[derive(Debug, Clone)]
pub struct KMeansModel {
    preprocessor: Preprocessor,
    centroids: Vec<Features>,
    inertia: f64,
}

impl KMeansModel {
    pub fn inertia(&self) -> f64 {
        self.inertia
    }

    fn predict_raw(&self, raw: &RawFeatures) -> usize {
        nearest_centroid(&self.centroids, &self.preprocessor.transform(raw)).0
    }

    /// Cluster for a bare coordinate; the other features take training medians.
    pub fn predict_point(&self, lat: f64, lon: f64) -> usize {
        self.predict_raw(&[Some(lat), Some(lon), None, None, None])
    }
}

struct Run {
    centroids: Vec<Features>,
    labels: Vec<usize>,
    inertia: f64,
}

fn kmeans_plus_plus(points: &[Features], k: usize, rng: &mut StdRng) -> Vec<Features> {
    let mut centroids = Vec::with_capacity(k);
    centroids.push(points[rng.gen_range(0..points.len())]);

    let mut dist: Vec<f64> = points.iter().map(|p| sq_dist(p, &centroids[0])).collect();
    while centroids.len() < k {
        let total: f64 = dist.iter().sum();
        let next = if total <= f64::EPSILON {
            rng.gen_range(0..points.len())
        } else {
            let mut target = rng.gen::<f64>() * total;
            let mut chosen = points.len() - 1;
            for (i, d) in dist.iter().enumerate() {
                if target < *d {
                    chosen = i;
                    break;
                }
                target -= d;
            }
            chosen
        };
        let c = points[next];
        for (d, p) in dist.iter_mut().zip(points.iter()) {
            *d = d.min(sq_dist(p, &c));
        }
        centroids.push(c);
    }
    centroids
}

fn lloyd(points: &[Features], mut centroids: Vec<Features>, max_iter: usize) -> Run {
    let k = centroids.len();
    let mut labels = vec![0usize; points.len()];

    for _ in 0..max_iter {
        for (label, p) in labels.iter_mut().zip(points.iter()) {
            *label = nearest_centroid(&centroids, p).0;
        }

        let mut sums = vec![[0.0; N_FEATURES]; k];
        let mut counts = vec![0usize; k];
        for (label, p) in labels.iter().zip(points.iter()) {
            counts[*label] += 1;
            for col in 0..N_FEATURES {
                sums[*label][col] += p[col];
            }
        }

        let mut next = centroids.clone();
        for c in 0..k {
            if counts[c] > 0 {
                for col in 0..N_FEATURES {
                    next[c][col] = sums[c][col] / counts[c] as f64;
                }
            }
        }

        // Re-seed empty clusters with the points worst served by their centroid.
        for c in 0..k {
            if counts[c] > 0 {
                continue;
            }
            let far = labels
                .iter()
                .zip(points.iter())
                .enumerate()
                .filter(|(_, (l, _))| counts[**l] > 1)
                .map(|(i, (l, p))| (i, sq_dist(p, &next[*l])))
                .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(Ordering::Equal));
            if let Some((i, _)) = far {
                counts[labels[i]] -= 1;
                labels[i] = c;
                counts[c] = 1;
                next[c] = points[i];
            }
        }

        let shift: f64 = centroids
            .iter()
            .zip(next.iter())
            .map(|(a, b)| sq_dist(a, b))
            .sum();
        centroids = next;
        if shift <= TOLERANCE {
            break;
        }
    }

    let mut inertia = 0.0;
    for (label, p) in labels.iter_mut().zip(points.iter()) {
        let (c, d) = nearest_centroid(&centroids, p);
        *label = c;
        inertia += d;
    }

    Run {
        centroids,
        labels,
        inertia,
    }
}

fn fit(points: &[Features], params: &ClusterParams) -> Run {
    let mut rng = StdRng::seed_from_u64(params.seed);
    let mut best = lloyd(
        points,
        kmeans_plus_plus(points, params.n_clusters, &mut rng),
        params.max_iter,
    );
    for _ in 1..params.n_init {
        let seeds = kmeans_plus_plus(points, params.n_clusters, &mut rng);
        let run = lloyd(points, seeds, params.max_iter);
        if run.inertia < best.inertia {
            best = run;
        }
    }
    best
}

/// Result of one clustering run.
#[derive(Debug, Clone)]
pub struct ClusterOutcome {
    pub n_clusters: usize,
    pub assignment: ClusterAssignment,
    pub counts: ClusterCounts,
    /// `None` when the degenerate-input fallback was taken.
    pub model: Option<KMeansModel>,
    pub warning: Option<String>,
}

/// Partitions the catalog into `params.n_clusters` groups.
///
/// Fails only on invalid parameters; insufficient data falls back to a
/// single cluster with a warning.
pub fn assign_clusters(catalog: &Catalog, params: &ClusterParams) -> Result<ClusterOutcome> {
    if params.n_clusters == 0 {
        return Err(FortError::InvalidArgument(
            "n_clusters must be >= 1".to_string(),
        ));
    }
    if params.max_iter == 0 || params.n_init == 0 {
        return Err(FortError::InvalidArgument(
            "max_iter and n_init must be >= 1".to_string(),
        ));
    }

    let forts = catalog.all();
    let usable = forts.iter().filter(|f| f.coordinates().is_some()).count();
    if usable < params.n_clusters {
        let reason = FortError::InsufficientData {
            usable,
            requested: params.n_clusters,
        };
        tracing::warn!(%reason, "falling back to a single cluster");
        let assignment: ClusterAssignment = forts.iter().map(|f| (f.fort_id, 0)).collect();
        let mut counts = ClusterCounts::new();
        counts.insert(0, forts.len());
        return Ok(ClusterOutcome {
            n_clusters: params.n_clusters,
            assignment,
            counts,
            model: None,
            warning: Some(reason.to_string()),
        });
    }

    let raw: Vec<RawFeatures> = forts.iter().map(raw_features).collect();
    let preprocessor = Preprocessor::fit(&raw);
    let points: Vec<Features> = raw.iter().map(|r| preprocessor.transform(r)).collect();

    let run = fit(&points, params);

    let mut counts = ClusterCounts::new();
    for label in &run.labels {
        *counts.entry(*label).or_insert(0) += 1;
    }
    let assignment: ClusterAssignment = forts
        .iter()
        .zip(run.labels.iter())
        .map(|(f, l)| (f.fort_id, *l))
        .collect();

    tracing::info!(
        n_clusters = params.n_clusters,
        forts = forts.len(),
        inertia = run.inertia,
        "fitted fort clusters"
    );

    Ok(ClusterOutcome {
        n_clusters: params.n_clusters,
        assignment,
        counts,
        model: Some(KMeansModel {
            preprocessor,
            centroids: run.centroids,
            inertia: run.inertia,
        }),
        warning: None,
    })
}

/// An outcome paired with the catalog and parameters it was computed from.
#[derive(Debug)]
pub struct ClusterSnapshot {
    catalog: Arc<Catalog>,
    params: ClusterParams,
    outcome: ClusterOutcome,
}

impl ClusterSnapshot {
    pub fn outcome(&self) -> &ClusterOutcome {
        &self.outcome
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    /// Every fort of the snapshot's catalog with its cluster label.
    pub fn clustered_forts(&self) -> Vec<ClusteredFort> {
        self.catalog
            .all()
            .iter()
            .map(|f| ClusteredFort {
                fort: f.clone(),
                cluster: self.outcome.assignment.get(&f.fort_id).copied().unwrap_or(0),
            })
            .collect()
    }
}

/// Single-writer, multi-reader owner of the current clustering snapshot.
///
/// Rebuilds are serialized by `writer`. Each one reads the catalog only
/// after acquiring it, so the last rebuild to finish always fits the
/// catalog that was current when it started computing.
pub struct ClusterService {
    writer: Mutex<()>,
    current: RwLock<Arc<ClusterSnapshot>>,
}

impl ClusterService {
    /// Fits an initial snapshot.
    pub fn new(catalog: Arc<Catalog>, params: ClusterParams) -> Result<Self> {
        let outcome = assign_clusters(&catalog, &params)?;
        Ok(Self {
            writer: Mutex::new(()),
            current: RwLock::new(Arc::new(ClusterSnapshot {
                catalog,
                params,
                outcome,
            })),
        })
    }

    pub fn snapshot(&self) -> Arc<ClusterSnapshot> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Parameters of the live snapshot.
    pub fn params(&self) -> ClusterParams {
        self.snapshot().params
    }

    /// Refits against the handle's current catalog with `n_clusters` (or the
    /// live count) and swaps the result in. The previous snapshot is
    /// untouched on failure.
    pub fn rebuild(
        &self,
        catalogs: &CatalogHandle,
        n_clusters: Option<usize>,
    ) -> Result<Arc<ClusterSnapshot>> {
        let _writer = self
            .writer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let mut params = self.params();
        if let Some(n) = n_clusters {
            params.n_clusters = n;
        }
        let catalog = catalogs.snapshot();
        let outcome = assign_clusters(&catalog, &params)?;
        let fresh = Arc::new(ClusterSnapshot {
            catalog,
            params,
            outcome,
        });

        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = fresh.clone();
        Ok(fresh)
    }

    /// Cluster id for a coordinate under the current model.
    pub fn predict_cluster(&self, lat: f64, lon: f64) -> Result<usize> {
        crate::proximity::validate_origin((lat, lon))?;
        let snapshot = self.snapshot();
        let model = snapshot.outcome.model.as_ref().ok_or_else(|| {
            FortError::ModelNotFitted(
                snapshot
                    .outcome
                    .warning
                    .clone()
                    .unwrap_or_else(|| "no successful fit".to_string()),
            )
        })?;
        Ok(model.predict_point(lat, lon))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::fort;
    use std::time::Duration;
    use tempfile::TempDir;

    fn located(id: i64, lat: f64, lon: f64, elev: f64, difficulty: &str) -> FortRecord {
        let mut f = fort(id, &format!("fort-{}", id));
        f.latitude = Some(lat);
        f.longitude = Some(lon);
        f.elevation_m = Some(elev);
        f.trek_time_hours = Some(2.0);
        f.trek_difficulty = difficulty.to_string();
        f
    }

    /// Two tight groups: coastal lowland forts in the south-west and
    /// highland forts in the north-east.
    fn two_regions() -> Catalog {
        let mut forts = Vec::new();
        for i in 0..6 {
            let d = i as f64 * 0.01;
            forts.push(located(i + 1, 16.0 + d, 73.3 + d, 20.0 + d * 100.0, "Easy"));
            forts.push(located(i + 101, 20.0 + d, 75.0 + d, 1200.0 + d * 100.0, "Hard"));
        }
        Catalog::from_records(forts).unwrap()
    }

    fn params(n: usize) -> ClusterParams {
        ClusterParams {
            n_clusters: n,
            ..ClusterParams::default()
        }
    }

    #[test]
    fn test_difficulty_rank() {
        assert_eq!(difficulty_rank("Easy"), Some(1.0));
        assert_eq!(difficulty_rank(" medium "), Some(2.0));
        assert_eq!(difficulty_rank("Moderate"), Some(2.0));
        assert_eq!(difficulty_rank("HARD"), Some(3.0));
        assert_eq!(difficulty_rank("2.5"), Some(2.5));
        assert_eq!(difficulty_rank("extreme"), None);
        assert_eq!(difficulty_rank(""), None);
    }

    #[test]
    fn test_median() {
        assert_eq!(median(&mut [3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(&mut [4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(&mut []), None);
    }

    #[test]
    fn test_preprocessor_imputes_median_and_standardizes() {
        let rows: Vec<RawFeatures> = vec![
            [Some(1.0), Some(10.0), Some(100.0), None, Some(1.0)],
            [Some(3.0), Some(10.0), None, None, Some(3.0)],
            [Some(5.0), Some(10.0), Some(300.0), None, None],
        ];
        let p = Preprocessor::fit(&rows);
        assert_eq!(p.medians(), &[3.0, 10.0, 200.0, 0.0, 2.0]);

        let t = p.transform(&rows[1]);
        // Column 0 mean 3 → 0; constant column 1 keeps scale 1 → 0.
        assert!(t[0].abs() < 1e-12);
        assert!(t[1].abs() < 1e-12);
        // Imputed elevation equals the column mean → 0.
        assert!(t[2].abs() < 1e-12);

        let col0: Vec<f64> = rows.iter().map(|r| p.transform(r)[0]).collect();
        let var = col0.iter().map(|v| v * v).sum::<f64>() / 3.0;
        assert!((var - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_separates_two_regions() {
        let c = two_regions();
        let out = assign_clusters(&c, &params(2)).unwrap();
        assert!(out.warning.is_none());
        assert!(out.model.is_some());
        let south = out.assignment[&1];
        let north = out.assignment[&101];
        assert_ne!(south, north);
        for i in 1..=6 {
            assert_eq!(out.assignment[&i], south);
            assert_eq!(out.assignment[&(i + 100)], north);
        }
        assert_eq!(out.counts.values().sum::<usize>(), 12);
        assert_eq!(out.counts.get(&south), Some(&6));
    }

    #[test]
    fn test_same_input_same_assignment() {
        let c = two_regions();
        for n in [1, 2, 3, 5] {
            let a = assign_clusters(&c, &params(n)).unwrap();
            let b = assign_clusters(&c, &params(n)).unwrap();
            assert_eq!(a.assignment, b.assignment);
            assert_eq!(a.counts, b.counts);
        }
    }

    #[test]
    fn test_labels_within_range() {
        let c = two_regions();
        let out = assign_clusters(&c, &params(4)).unwrap();
        assert!(out.assignment.values().all(|&l| l < 4));
    }

    #[test]
    fn test_degenerate_input_single_cluster() {
        let mut forts = vec![
            located(1, 18.0, 73.0, 500.0, "Easy"),
            located(2, 18.1, 73.1, 600.0, "Easy"),
            located(3, 18.2, 73.2, 700.0, "Hard"),
        ];
        // A fort without coordinates does not count as usable.
        forts.push(fort(4, "unplaced"));
        let c = Catalog::from_records(forts).unwrap();

        let out = assign_clusters(&c, &params(6)).unwrap();
        assert!(out.model.is_none());
        assert!(out.warning.as_deref().unwrap().contains("3 usable rows"));
        assert_eq!(out.counts.len(), 1);
        assert_eq!(out.counts[&0], 4);
        assert!(out.assignment.values().all(|&l| l == 0));
    }

    #[test]
    fn test_zero_clusters_rejected() {
        let c = two_regions();
        assert!(matches!(
            assign_clusters(&c, &params(0)),
            Err(FortError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_missing_features_are_imputed() {
        let mut forts: Vec<FortRecord> = (1..=4)
            .map(|i| located(i, 18.0 + i as f64, 73.0, 400.0, "Medium"))
            .collect();
        let mut bare = fort(5, "bare");
        bare.latitude = Some(18.5);
        bare.longitude = Some(73.0);
        forts.push(bare);
        let c = Catalog::from_records(forts).unwrap();
        let out = assign_clusters(&c, &params(2)).unwrap();
        assert!(out.assignment.contains_key(&5));
    }

    #[test]
    fn test_predict_before_fit_fails() {
        let c = Arc::new(Catalog::from_records(vec![located(1, 18.0, 73.0, 1.0, "Easy")]).unwrap());
        let svc = ClusterService::new(c, params(3)).unwrap();
        assert!(matches!(
            svc.predict_cluster(18.0, 73.0),
            Err(FortError::ModelNotFitted(_))
        ));
    }

    #[test]
    fn test_predict_after_fit() {
        let c = Arc::new(two_regions());
        let svc = ClusterService::new(c.clone(), params(2)).unwrap();
        let snap = svc.snapshot();
        let south = snap.outcome().assignment[&1];
        assert_eq!(svc.predict_cluster(16.02, 73.32).unwrap(), south);
        assert!(svc.predict_cluster(20.0, 75.0).unwrap() < 2);
        assert!(matches!(
            svc.predict_cluster(120.0, 75.0),
            Err(FortError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_rebuild_swaps_whole_snapshot() {
        let handle = CatalogHandle::from_catalog("unused.csv", two_regions());
        let svc = ClusterService::new(handle.snapshot(), params(2)).unwrap();
        let before = svc.snapshot();

        let after = svc.rebuild(&handle, Some(3)).unwrap();
        assert_eq!(before.outcome().n_clusters, 2);
        assert_eq!(after.outcome().n_clusters, 3);
        assert_eq!(svc.snapshot().outcome().n_clusters, 3);
        assert_eq!(svc.params().n_clusters, 3);

        // A failed rebuild leaves the current snapshot in place.
        assert!(svc.rebuild(&handle, Some(0)).is_err());
        assert_eq!(svc.snapshot().outcome().n_clusters, 3);
    }

    #[test]
    fn test_rebuild_into_degenerate_drops_model() {
        let handle = CatalogHandle::from_catalog("unused.csv", two_regions());
        let svc = ClusterService::new(handle.snapshot(), params(2)).unwrap();
        svc.rebuild(&handle, Some(50)).unwrap();
        assert!(svc.predict_cluster(16.0, 73.3).is_err());
        let data = svc.snapshot().clustered_forts();
        assert_eq!(data.len(), 12);
        assert!(data.iter().all(|f| f.cluster == 0));
    }

    /// `n` forts alternating between two regions, every one with coordinates.
    fn regions_csv(n: usize) -> String {
        let mut csv = String::from(
            "fort_id,name,latitude,longitude,elevation_m,trek_time_hours,trek_difficulty\n",
        );
        for i in 0..n {
            let d = (i % 50) as f64 * 0.01;
            let (lat, lon, elev, difficulty) = if i % 2 == 0 {
                (16.0 + d, 73.3 + d, 20.0 + d * 100.0, "Easy")
            } else {
                (20.0 + d, 75.0 + d, 1200.0 + d * 100.0, "Hard")
            };
            csv.push_str(&format!(
                "{},fort-{},{},{},{},2,{}\n",
                i + 1,
                i + 1,
                lat,
                lon,
                elev,
                difficulty
            ));
        }
        csv
    }

    #[test]
    fn test_queued_rebuild_fits_catalog_reloaded_meanwhile() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("forts.csv");
        std::fs::write(&path, regions_csv(12)).unwrap();
        let handle = CatalogHandle::open(&path).unwrap();
        let svc = ClusterService::new(handle.snapshot(), params(2)).unwrap();

        // Hold the writer so the rebuild below queues before reading the catalog.
        let writer = svc.writer.lock().unwrap();
        std::thread::scope(|s| {
            let queued = s.spawn(|| svc.rebuild(&handle, Some(3)));
            std::thread::sleep(Duration::from_millis(50));
            std::fs::write(&path, regions_csv(13)).unwrap();
            handle.reload().unwrap();
            drop(writer);
            queued.join().unwrap().unwrap();
        });

        let snap = svc.snapshot();
        assert_eq!(snap.catalog().len(), 13);
        assert_eq!(snap.outcome().assignment.len(), 13);
        assert_eq!(snap.outcome().n_clusters, 3);
    }

    #[test]
    fn test_rebuild_racing_reload_ends_on_current_catalog() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("forts.csv");
        std::fs::write(&path, regions_csv(600)).unwrap();
        let handle = CatalogHandle::open(&path).unwrap();
        let svc = ClusterService::new(handle.snapshot(), params(2)).unwrap();

        std::thread::scope(|s| {
            let slow = s.spawn(|| svc.rebuild(&handle, Some(8)));
            let reload = s.spawn(|| {
                std::fs::write(&path, regions_csv(601)).unwrap();
                handle.reload().unwrap();
                svc.rebuild(&handle, None)
            });
            slow.join().unwrap().unwrap();
            reload.join().unwrap().unwrap();
        });

        let snap = svc.snapshot();
        assert_eq!(snap.catalog().len(), handle.snapshot().len());
        assert_eq!(snap.catalog().len(), 601);
        assert_eq!(svc.params().n_clusters, snap.outcome().n_clusters);
    }
}
