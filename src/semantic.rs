//! Semantic retrieval: embedding similarity over a per-fort text corpus.
//!
//! Each fort contributes one corpus string, its descriptive fields joined
//! in a fixed order (see [`CORPUS_FIELDS`]). The corpus is embedded once
//! and queries rank forts by cosine similarity to the embedded query.
//!
//! # Cache
//!
//! Embedding the corpus is the expensive step, so [`IndexCache`] persists it:
//!
//! ```text
//! <cache_dir>/
//!   manifest.json    model, dims, count, corpus_hash, created_at
//!   corpus.json      JSON array of corpus strings
//!   embeddings.bin   little-endian f32, one row per corpus entry
//! ```
//!
//! `corpus_hash` is the SHA-256 of `corpus.json`. A manifest whose model or
//! hash differs from the current ones is a miss; the index is rebuilt and
//! the cache overwritten. A hit yields bit-identical vectors.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::catalog::Catalog;
use crate::config::EmbeddingConfig;
use crate::embedding::{self, Embedder};
use crate::error::{FortError, Result};
use crate::models::{FortRecord, SemanticHit};

/// Fields concatenated into a fort's corpus string, in order.
pub const CORPUS_FIELDS: [&str; 10] = [
    "name",
    "district",
    "type",
    "built_by",
    "era",
    "key_events",
    "notes",
    "water_availability",
    "trek_difficulty",
    "description",
];

pub const CORPUS_SEPARATOR: &str = " | ";

const MANIFEST_FILE: &str = "manifest.json";
const CORPUS_FILE: &str = "corpus.json";
const EMBEDDINGS_FILE: &str = "embeddings.bin";

fn field<'a>(f: &'a FortRecord, name: &str) -> &'a str {
    match name {
        "name" => &f.name,
        "district" => &f.district,
        "type" => &f.fort_type,
        "built_by" => &f.built_by,
        "era" => &f.era,
        "key_events" => &f.key_events,
        "notes" => &f.notes,
        "water_availability" => &f.water_availability,
        "trek_difficulty" => &f.trek_difficulty,
        "description" => &f.description,
        _ => "",
    }
}

pub fn corpus_text(fort: &FortRecord) -> String {
    CORPUS_FIELDS
        .iter()
        .map(|name| field(fort, name))
        .collect::<Vec<_>>()
        .join(CORPUS_SEPARATOR)
}

pub fn build_corpus(forts: &[FortRecord]) -> Vec<String> {
    forts.iter().map(corpus_text).collect()
}

fn corpus_json(corpus: &[String]) -> Result<Vec<u8>> {
    serde_json::to_vec(corpus)
        .map_err(|e| FortError::IndexUnavailable(format!("cannot serialize corpus: {}", e)))
}

/// Hex SHA-256 of the corpus as stored in `corpus.json`.
pub fn corpus_hash(corpus: &[String]) -> Result<String> {
    Ok(hex::encode(Sha256::digest(corpus_json(corpus)?)))
}

fn unavailable(context: &str) -> impl FnOnce(anyhow::Error) -> FortError + '_ {
    move |e| FortError::IndexUnavailable(format!("{}: {:#}", context, e))
}

/// Embedded corpus, one vector per entry.
#[derive(Debug, Clone, PartialEq)]
pub struct SemanticIndex {
    model: String,
    dims: usize,
    corpus: Vec<String>,
    embeddings: Vec<Vec<f32>>,
}

impl SemanticIndex {
    /// Embeds `corpus` in batches of `batch_size`.
    pub fn build(embedder: &dyn Embedder, corpus: Vec<String>, batch_size: usize) -> Result<Self> {
        let mut embeddings = Vec::with_capacity(corpus.len());
        for batch in corpus.chunks(batch_size.max(1)) {
            let vectors = embedder
                .embed(batch)
                .map_err(unavailable("embedding corpus"))?;
            if vectors.len() != batch.len() {
                return Err(FortError::IndexUnavailable(format!(
                    "embedder returned {} vectors for {} texts",
                    vectors.len(),
                    batch.len()
                )));
            }
            embeddings.extend(vectors);
        }

        let dims = embeddings.first().map_or(embedder.dims(), Vec::len);
        if embeddings.iter().any(|v| v.len() != dims) {
            return Err(FortError::IndexUnavailable(
                "embedder returned vectors of differing length".to_string(),
            ));
        }

        tracing::info!(
            model = embedder.model_name(),
            entries = corpus.len(),
            dims,
            "built semantic index"
        );
        Ok(Self {
            model: embedder.model_name().to_string(),
            dims,
            corpus,
            embeddings,
        })
    }

    pub fn len(&self) -> usize {
        self.corpus.len()
    }

    pub fn is_empty(&self) -> bool {
        self.corpus.is_empty()
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn corpus(&self) -> &[String] {
        &self.corpus
    }

    /// Embeds `text` and returns the `k` best `(row, score)` pairs.
    pub fn query(&self, embedder: &dyn Embedder, text: &str, k: usize) -> Result<Vec<(usize, f32)>> {
        let q = embedder
            .embed(&[text.to_string()])
            .map_err(unavailable("embedding query"))?
            .into_iter()
            .next()
            .ok_or_else(|| FortError::IndexUnavailable("empty embedding response".to_string()))?;
        if !self.is_empty() && q.len() != self.dims {
            return Err(FortError::IndexUnavailable(format!(
                "query vector has {} dims, index has {}",
                q.len(),
                self.dims
            )));
        }
        Ok(self.query_vector(&q, k))
    }

    /// Rows ranked by cosine similarity to `q`, best first, ties by row.
    pub fn query_vector(&self, q: &[f32], k: usize) -> Vec<(usize, f32)> {
        let mut scored: Vec<(usize, f32)> = self
            .embeddings
            .iter()
            .enumerate()
            .map(|(i, v)| (i, embedding::cosine_similarity(q, v)))
            .collect();
        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(Ordering::Equal)
                .then(a.0.cmp(&b.0))
        });
        scored.truncate(k);
        scored
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct CacheManifest {
    model: String,
    dims: usize,
    count: usize,
    corpus_hash: String,
    created_at: DateTime<Utc>,
}

/// On-disk cache for one [`SemanticIndex`].
#[derive(Debug, Clone)]
pub struct IndexCache {
    dir: PathBuf,
}

impl IndexCache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// The cached index for this model and corpus, or `None` on a miss.
    pub fn load(&self, model: &str, corpus: &[String]) -> Result<Option<SemanticIndex>> {
        let manifest_path = self.dir.join(MANIFEST_FILE);
        if !manifest_path.exists() {
            return Ok(None);
        }
        let manifest: CacheManifest = match std::fs::read(&manifest_path)
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
        {
            Some(m) => m,
            None => {
                tracing::warn!(path = %manifest_path.display(), "unreadable cache manifest, ignoring");
                return Ok(None);
            }
        };

        let hash = corpus_hash(corpus)?;
        if manifest.model != model || manifest.corpus_hash != hash || manifest.count != corpus.len() {
            tracing::info!(
                cached_model = %manifest.model,
                model,
                "embedding cache is stale"
            );
            return Ok(None);
        }

        let stored_corpus: Vec<String> = std::fs::read(self.dir.join(CORPUS_FILE))
            .ok()
            .and_then(|b| serde_json::from_slice(&b).ok())
            .unwrap_or_default();
        if stored_corpus != corpus {
            return Ok(None);
        }

        let bytes = match std::fs::read(self.dir.join(EMBEDDINGS_FILE)) {
            Ok(b) => b,
            Err(_) => return Ok(None),
        };
        let embeddings = if corpus.is_empty() {
            Vec::new()
        } else {
            match embedding::bytes_to_vectors(&bytes, manifest.dims) {
                Ok(v) if v.len() == corpus.len() => v,
                _ => return Ok(None),
            }
        };

        tracing::info!(dir = %self.dir.display(), entries = corpus.len(), "loaded embedding cache");
        Ok(Some(SemanticIndex {
            model: manifest.model,
            dims: manifest.dims,
            corpus: stored_corpus,
            embeddings,
        }))
    }

    /// Writes `index`, manifest last so a partial write reads as a miss.
    pub fn store(&self, index: &SemanticIndex) -> Result<()> {
        let io = |e: std::io::Error| {
            FortError::IndexUnavailable(format!(
                "cannot write embedding cache {}: {}",
                self.dir.display(),
                e
            ))
        };
        std::fs::create_dir_all(&self.dir).map_err(io)?;
        let _ = std::fs::remove_file(self.dir.join(MANIFEST_FILE));

        let corpus = corpus_json(&index.corpus)?;
        let manifest = CacheManifest {
            model: index.model.clone(),
            dims: index.dims,
            count: index.corpus.len(),
            corpus_hash: hex::encode(Sha256::digest(&corpus)),
            created_at: Utc::now(),
        };
        let manifest = serde_json::to_vec_pretty(&manifest)
            .map_err(|e| FortError::IndexUnavailable(format!("cannot serialize manifest: {}", e)))?;

        write_atomic(&self.dir.join(EMBEDDINGS_FILE), &embedding::vectors_to_bytes(&index.embeddings)).map_err(io)?;
        write_atomic(&self.dir.join(CORPUS_FILE), &corpus).map_err(io)?;
        write_atomic(&self.dir.join(MANIFEST_FILE), &manifest).map_err(io)?;
        Ok(())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let tmp = path.with_extension("tmp");
    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Cache hit, or build and then populate the cache.
pub fn load_or_build(
    embedder: &dyn Embedder,
    corpus: Vec<String>,
    cache: Option<&IndexCache>,
    batch_size: usize,
) -> Result<SemanticIndex> {
    if let Some(cache) = cache {
        if let Some(index) = cache.load(embedder.model_name(), &corpus)? {
            return Ok(index);
        }
    }
    let index = SemanticIndex::build(embedder, corpus, batch_size)?;
    if let Some(cache) = cache {
        // A failed write only costs the next start a rebuild.
        if let Err(e) = cache.store(&index) {
            tracing::warn!(error = %e, "could not persist embedding cache");
        }
    }
    Ok(index)
}

struct IndexedCatalog {
    catalog: Arc<Catalog>,
    index: SemanticIndex,
}

/// Owner of the embedder and the current index snapshot.
///
/// Initialization never fails: when the embedder or the index cannot be
/// built, the service stays up and every search reports `IndexUnavailable`.
pub struct SemanticService {
    embedder: std::result::Result<Arc<dyn Embedder>, String>,
    cache: Option<IndexCache>,
    batch_size: usize,
    current: RwLock<Arc<std::result::Result<IndexedCatalog, String>>>,
}

impl SemanticService {
    /// Creates the configured embedder and indexes `catalog`. Blocking.
    pub fn initialize(config: &EmbeddingConfig, catalog: Arc<Catalog>) -> Self {
        let embedder: std::result::Result<Arc<dyn Embedder>, String> =
            embedding::create_embedder(config)
                .map(Arc::from)
                .map_err(|e| format!("{:#}", e));
        if let Err(reason) = &embedder {
            tracing::warn!(%reason, "semantic search unavailable");
        }
        let cache = config.cache_dir.as_ref().map(IndexCache::new);
        Self::with_embedder(embedder, cache, config.batch_size, catalog)
    }

    /// Builds the service around an existing embedder. Blocking.
    pub fn with_embedder(
        embedder: std::result::Result<Arc<dyn Embedder>, String>,
        cache: Option<IndexCache>,
        batch_size: usize,
        catalog: Arc<Catalog>,
    ) -> Self {
        let service = Self {
            embedder,
            cache,
            batch_size,
            current: RwLock::new(Arc::new(Err("semantic index not built".to_string()))),
        };
        if let Err(e) = service.rebuild(catalog) {
            tracing::warn!(error = %e, "semantic search unavailable");
        }
        service
    }

    /// Re-indexes `catalog` and swaps the snapshot in. Blocking.
    ///
    /// On failure the service becomes unavailable until the next successful rebuild.
    pub fn rebuild(&self, catalog: Arc<Catalog>) -> Result<()> {
        let outcome = match &self.embedder {
            Ok(embedder) => load_or_build(
                embedder.as_ref(),
                build_corpus(catalog.all()),
                self.cache.as_ref(),
                self.batch_size,
            )
            .map(|index| IndexedCatalog { catalog, index }),
            Err(reason) => Err(FortError::IndexUnavailable(reason.clone())),
        };

        let (snapshot, result) = match outcome {
            Ok(indexed) => (Ok(indexed), Ok(())),
            Err(e) => (Err(e.to_string()), Err(e)),
        };
        *self
            .current
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(snapshot);
        result
    }

    pub fn is_available(&self) -> bool {
        self.snapshot().is_ok()
    }

    fn snapshot(&self) -> Arc<std::result::Result<IndexedCatalog, String>> {
        self.current
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// The `top_k` forts closest in meaning to `query`. Blocking.
    pub fn search(&self, query: &str, top_k: usize) -> Result<Vec<SemanticHit>> {
        if query.trim().is_empty() {
            return Err(FortError::InvalidArgument(
                "query must not be empty".to_string(),
            ));
        }
        if top_k == 0 {
            return Err(FortError::InvalidArgument("top_k must be >= 1".to_string()));
        }

        let snapshot = self.snapshot();
        let indexed = snapshot
            .as_ref()
            .as_ref()
            .map_err(|reason| FortError::IndexUnavailable(reason.clone()))?;
        let embedder = self
            .embedder
            .as_ref()
            .map_err(|reason| FortError::IndexUnavailable(reason.clone()))?;

        let hits = indexed.index.query(embedder.as_ref(), query, top_k)?;
        Ok(hits
            .into_iter()
            .filter_map(|(row, score)| {
                indexed.catalog.all().get(row).map(|f| SemanticHit {
                    fort: f.clone(),
                    score,
                })
            })
            .collect())
    }
}
