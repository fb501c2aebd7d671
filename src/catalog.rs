//! The fort catalog: an immutable in-memory table loaded from CSV.
//!
//! Loading normalizes header names (trimmed, lowercased), parses numeric
//! columns leniently (blank or unparseable cells become `None`), and fills
//! missing text with the empty string. Queries never mutate the table.
//!
//! [`CatalogHandle`] is the process-wide owner. A reload builds a complete
//! new [`Catalog`] and swaps the `Arc`; readers holding the previous
//! snapshot finish against it undisturbed.

use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::error::{FortError, Result};
use crate::models::FortRecord;

pub struct Catalog {
    forts: Vec<FortRecord>,
    by_id: HashMap<i64, usize>,
}

impl std::fmt::Debug for Catalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Catalog").field("forts", &self.len()).finish()
    }
}

/// Optional filters for listing forts. Text comparisons ignore case.
#[derive(Debug, Clone, Default)]
pub struct FortFilter {
    /// Substring matched against name, notes and key events.
    pub q: Option<String>,
    pub district: Option<String>,
    pub fort_type: Option<String>,
    pub difficulty: Option<String>,
    pub season: Option<String>,
    pub limit: usize,
}

/// Distinct values of the categorical columns, sorted.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct Facets {
    pub districts: Vec<String>,
    pub types: Vec<String>,
    pub difficulties: Vec<String>,
    pub seasons: Vec<String>,
}

impl Catalog {
    /// Reads and normalizes the CSV at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(FortError::DataUnavailable(format!(
                "CSV not found at: {}",
                path.display()
            )));
        }
        let file = std::fs::File::open(path).map_err(|e| {
            FortError::DataUnavailable(format!("cannot open {}: {}", path.display(), e))
        })?;
        let catalog = Self::from_reader(file)?;
        tracing::info!(
            path = %path.display(),
            forts = catalog.len(),
            "loaded fort catalog"
        );
        Ok(catalog)
    }

    /// Parses CSV from any reader. Used by [`Catalog::load`] and tests.
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let headers = rdr
            .headers()
            .map_err(|e| FortError::DataUnavailable(format!("unreadable CSV header: {}", e)))?
            .clone();
        let columns: HashMap<String, usize> = headers
            .iter()
            .enumerate()
            .map(|(i, h)| (h.trim().to_lowercase(), i))
            .collect();

        if !columns.contains_key("name") {
            return Err(FortError::DataUnavailable(
                "CSV has no 'name' column".to_string(),
            ));
        }

        let mut forts = Vec::new();
        let mut ids = Vec::new();
        for (row, result) in rdr.records().enumerate() {
            let record = result.map_err(|e| {
                FortError::DataUnavailable(format!("malformed CSV row {}: {}", row + 1, e))
            })?;
            let cells = Row {
                columns: &columns,
                record: &record,
            };
            ids.push(cells.id());
            forts.push(FortRecord {
                fort_id: 0,
                name: cells.text("name"),
                alternate_names: cells.text("alternate_names"),
                district: cells.text("district"),
                taluka: cells.text("taluka"),
                fort_type: cells.text("type"),
                latitude: cells.number("latitude"),
                longitude: cells.number("longitude"),
                elevation_m: cells.number("elevation_m"),
                trek_difficulty: cells.text("trek_difficulty"),
                trek_time_hours: cells.number("trek_time_hours"),
                best_season: cells.text("best_season"),
                built_by: cells.text("built_by"),
                era: cells.text("era"),
                water_availability: cells.text("water_availability"),
                key_events: cells.text("key_events"),
                notes: cells.text("notes"),
                description: cells.text("description"),
            });
        }

        // Rows without a usable id are numbered after the largest parsed one.
        let mut next_id = ids.iter().flatten().copied().max().unwrap_or(0);
        for (fort, id) in forts.iter_mut().zip(ids) {
            fort.fort_id = id.unwrap_or_else(|| {
                next_id += 1;
                next_id
            });
        }

        Self::from_records(forts)
    }

    /// Builds a catalog from already-parsed records, enforcing unique ids.
    pub fn from_records(forts: Vec<FortRecord>) -> Result<Self> {
        let mut by_id = HashMap::with_capacity(forts.len());
        for (i, f) in forts.iter().enumerate() {
            if by_id.insert(f.fort_id, i).is_some() {
                return Err(FortError::DataUnavailable(format!(
                    "duplicate fort_id {}",
                    f.fort_id
                )));
            }
        }
        Ok(Self { forts, by_id })
    }

    pub fn all(&self) -> &[FortRecord] {
        &self.forts
    }

    pub fn len(&self) -> usize {
        self.forts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.forts.is_empty()
    }

    pub fn find_by_id(&self, id: i64) -> Result<&FortRecord> {
        self.by_id
            .get(&id)
            .map(|&i| &self.forts[i])
            .ok_or(FortError::NotFound(id))
    }

    /// Forts matching every supplied filter, in catalog order, at most `limit`.
    pub fn filter(&self, filter: &FortFilter) -> Vec<FortRecord> {
        let q = filter.q.as_deref().map(str::to_lowercase);
        self.forts
            .iter()
            .filter(|f| match &q {
                Some(q) => {
                    f.name.to_lowercase().contains(q)
                        || f.notes.to_lowercase().contains(q)
                        || f.key_events.to_lowercase().contains(q)
                }
                None => true,
            })
            .filter(|f| matches_ci(&f.district, filter.district.as_deref()))
            .filter(|f| matches_ci(&f.fort_type, filter.fort_type.as_deref()))
            .filter(|f| matches_ci(&f.trek_difficulty, filter.difficulty.as_deref()))
            .filter(|f| matches_ci(&f.best_season, filter.season.as_deref()))
            .take(filter.limit)
            .cloned()
            .collect()
    }

    pub fn facets(&self) -> Facets {
        fn distinct<'a>(values: impl Iterator<Item = &'a String>) -> Vec<String> {
            values
                .map(|v| v.trim())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
                .collect::<BTreeSet<_>>()
                .into_iter()
                .collect()
        }
        Facets {
            districts: distinct(self.forts.iter().map(|f| &f.district)),
            types: distinct(self.forts.iter().map(|f| &f.fort_type)),
            difficulties: distinct(self.forts.iter().map(|f| &f.trek_difficulty)),
            seasons: distinct(self.forts.iter().map(|f| &f.best_season)),
        }
    }
}

fn matches_ci(value: &str, wanted: Option<&str>) -> bool {
    match wanted {
        Some(w) if !w.trim().is_empty() => value.to_lowercase() == w.trim().to_lowercase(),
        _ => true,
    }
}

/// Cell accessor over one CSV row keyed by normalized header name.
struct Row<'a> {
    columns: &'a HashMap<String, usize>,
    record: &'a csv::StringRecord,
}

impl Row<'_> {
    fn raw(&self, column: &str) -> Option<&str> {
        self.columns
            .get(column)
            .and_then(|&i| self.record.get(i))
            .map(str::trim)
    }

    fn text(&self, column: &str) -> String {
        self.raw(column).unwrap_or_default().to_string()
    }

    fn number(&self, column: &str) -> Option<f64> {
        self.raw(column)
            .filter(|s| !s.is_empty())
            .and_then(|s| s.parse::<f64>().ok())
            .filter(|v| v.is_finite())
    }

    /// Integer id; accepts `12` and `12.0`.
    fn id(&self) -> Option<i64> {
        let raw = self.raw("fort_id")?;
        raw.parse::<i64>().ok().or_else(|| {
            raw.parse::<f64>()
                .ok()
                .filter(|v| v.is_finite() && v.fract() == 0.0)
                .map(|v| v as i64)
        })
    }
}

/// Shared, reloadable owner of the current catalog snapshot.
pub struct CatalogHandle {
    path: PathBuf,
    current: RwLock<Arc<Catalog>>,
}

impl CatalogHandle {
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let catalog = Catalog::load(&path)?;
        Ok(Self {
            path,
            current: RwLock::new(Arc::new(catalog)),
        })
    }

    /// Wraps an already-built catalog; `reload` will read from `path`.
    pub fn from_catalog(path: impl Into<PathBuf>, catalog: Catalog) -> Self {
        Self {
            path: path.into(),
            current: RwLock::new(Arc::new(catalog)),
        }
    }

    pub fn snapshot(&self) -> Arc<Catalog> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Re-reads the source file. On failure the current snapshot stays.
    pub fn reload(&self) -> Result<Arc<Catalog>> {
        let fresh = Arc::new(Catalog::load(&self.path)?);
        let mut guard = self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *guard = fresh.clone();
        Ok(fresh)
    }
}
