//! CLI command implementations.
//!
//! Each `run_*` function loads what it needs from the configuration, runs one
//! query against the core, and prints human-readable output to stdout. All of
//! them block; the binary calls them from the blocking pool.

use anyhow::{bail, Context, Result};

use crate::catalog::{Catalog, FortFilter};
use crate::cluster::{self, ClusterParams, ClusterService};
use crate::config::Config;
use crate::embedding;
use crate::models::FortRecord;
use crate::semantic::{self, IndexCache, SemanticService};
use crate::{proximity, similarity};

fn load_catalog(config: &Config) -> Result<Catalog> {
    Catalog::load(&config.data.path)
        .with_context(|| format!("Failed to load fort catalog from {}", config.data.path.display()))
}

fn or_dash(value: &str) -> &str {
    if value.is_empty() {
        "-"
    } else {
        value
    }
}

fn opt(value: Option<f64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_else(|| "-".to_string())
}

pub fn run_list(
    config: &Config,
    q: Option<String>,
    district: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let catalog = load_catalog(config)?;
    let limit = limit.unwrap_or(config.retrieval.list_limit);
    if limit == 0 {
        bail!("--limit must be >= 1");
    }
    let forts = catalog.filter(&FortFilter {
        q,
        district,
        limit,
        ..Default::default()
    });

    if forts.is_empty() {
        println!("No results.");
        return Ok(());
    }

    println!(
        "{:<6} {:<28} {:<18} {:<8} {}",
        "ID", "NAME", "DISTRICT", "TYPE", "DIFFICULTY"
    );
    for f in &forts {
        println!(
            "{:<6} {:<28} {:<18} {:<8} {}",
            f.fort_id,
            f.name,
            or_dash(&f.district),
            or_dash(&f.fort_type),
            or_dash(&f.trek_difficulty)
        );
    }
    Ok(())
}

pub fn run_get(config: &Config, id: i64) -> Result<()> {
    let catalog = load_catalog(config)?;
    let f = catalog.find_by_id(id)?;
    print_fort(f);
    Ok(())
}

fn print_fort(f: &FortRecord) {
    println!("--- Fort ---");
    println!("id:          {}", f.fort_id);
    println!("name:        {}", f.name);
    if !f.alternate_names.is_empty() {
        println!("also known:  {}", f.alternate_names);
    }
    println!("district:    {}", or_dash(&f.district));
    println!("taluka:      {}", or_dash(&f.taluka));
    println!("type:        {}", or_dash(&f.fort_type));
    println!("latitude:    {}", opt(f.latitude));
    println!("longitude:   {}", opt(f.longitude));
    println!("elevation_m: {}", opt(f.elevation_m));
    println!("difficulty:  {}", or_dash(&f.trek_difficulty));
    println!("trek_hours:  {}", opt(f.trek_time_hours));
    println!("season:      {}", or_dash(&f.best_season));
    println!("built_by:    {}", or_dash(&f.built_by));
    println!("era:         {}", or_dash(&f.era));
    println!("water:       {}", or_dash(&f.water_availability));
    println!();
    if !f.key_events.is_empty() {
        println!("--- Key events ---");
        println!("{}", f.key_events);
        println!();
    }
    if !f.notes.is_empty() {
        println!("--- Notes ---");
        println!("{}", f.notes);
        println!();
    }
    if !f.description.is_empty() {
        println!("--- Description ---");
        println!("{}", f.description);
        println!();
    }
}

pub fn run_facets(config: &Config) -> Result<()> {
    let facets = load_catalog(config)?.facets();
    for (label, values) in [
        ("Districts", &facets.districts),
        ("Types", &facets.types),
        ("Difficulties", &facets.difficulties),
        ("Seasons", &facets.seasons),
    ] {
        println!("{} ({}):", label, values.len());
        for v in values {
            println!("  {}", v);
        }
    }
    Ok(())
}

pub fn run_nearby(config: &Config, lat: f64, lon: f64, k: Option<usize>) -> Result<()> {
    let catalog = load_catalog(config)?;
    let k = k.unwrap_or(config.retrieval.nearby_k);
    let results = proximity::nearest(&catalog, (lat, lon), k)?;

    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.2} km] {} ({})",
            i + 1,
            r.distance_km,
            r.fort.name,
            or_dash(&r.fort.district)
        );
        println!("    id: {}", r.fort.fort_id);
    }
    Ok(())
}

pub fn run_similar(config: &Config, id: i64, k: Option<usize>) -> Result<()> {
    let catalog = load_catalog(config)?;
    let k = k.unwrap_or(config.retrieval.similar_k);
    let base = catalog.find_by_id(id)?;
    let results = similarity::similar_to(&catalog, id, k)?;

    println!("Similar to {} ({}):", base.name, or_dash(&base.fort_type));
    if results.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, r) in results.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({}, {} m)",
            i + 1,
            r.score,
            r.fort.name,
            or_dash(&r.fort.fort_type),
            opt(r.fort.elevation_m)
        );
        println!("    id: {}", r.fort.fort_id);
    }
    Ok(())
}

fn params_with(config: &Config, n: Option<usize>) -> ClusterParams {
    let mut params = ClusterParams::from(&config.clustering);
    if let Some(n) = n {
        params.n_clusters = n;
    }
    params
}

pub fn run_clusters(config: &Config, n: Option<usize>) -> Result<()> {
    let catalog = load_catalog(config)?;
    let outcome = cluster::assign_clusters(&catalog, &params_with(config, n))?;

    if let Some(warning) = &outcome.warning {
        println!("warning: {}", warning);
    }
    println!("{:<8} {}", "CLUSTER", "FORTS");
    for (cluster, count) in &outcome.counts {
        println!("{:<8} {}", cluster, count);
    }
    if let Some(model) = &outcome.model {
        println!();
        println!("inertia: {:.4}", model.inertia());
    }
    Ok(())
}

pub fn run_predict(config: &Config, lat: f64, lon: f64, n: Option<usize>) -> Result<()> {
    let catalog = std::sync::Arc::new(load_catalog(config)?);
    let service = ClusterService::new(catalog, params_with(config, n))?;
    let cluster = service.predict_cluster(lat, lon)?;
    println!("cluster: {}", cluster);
    Ok(())
}

pub fn run_search(config: &Config, query: &str, top_k: Option<usize>) -> Result<()> {
    if !config.embedding.is_enabled() {
        bail!("Semantic search requires an embedding provider. Set [embedding] provider in config.");
    }
    let catalog = std::sync::Arc::new(load_catalog(config)?);
    let service = SemanticService::initialize(&config.embedding, catalog);
    let top_k = top_k.unwrap_or(config.retrieval.semantic_top_k);
    let hits = service.search(query, top_k)?;

    if hits.is_empty() {
        println!("No results.");
        return Ok(());
    }
    for (i, hit) in hits.iter().enumerate() {
        println!(
            "{}. [{:.3}] {} ({})",
            i + 1,
            hit.score,
            hit.fort.name,
            or_dash(&hit.fort.district)
        );
        if !hit.fort.notes.is_empty() {
            println!("    notes: \"{}\"", hit.fort.notes.replace('\n', " ").trim());
        }
        println!("    id: {}", hit.fort.fort_id);
    }
    Ok(())
}

/// Embeds the catalog and writes the cache, so the server starts warm.
pub fn run_index_build(config: &Config) -> Result<()> {
    let cache_dir = match &config.embedding.cache_dir {
        Some(dir) => dir.clone(),
        None => bail!("[embedding] cache_dir is not set; nothing to build."),
    };
    let catalog = load_catalog(config)?;
    let embedder = embedding::create_embedder(&config.embedding)?;
    let cache = IndexCache::new(&cache_dir);
    let corpus = semantic::build_corpus(catalog.all());

    let index = semantic::load_or_build(
        embedder.as_ref(),
        corpus,
        Some(&cache),
        config.embedding.batch_size,
    )?;
    // load_or_build only logs a failed write; surface it here.
    if cache.load(index.model(), index.corpus())?.is_none() {
        bail!("Embedding cache at {} could not be written", cache_dir.display());
    }

    println!(
        "Indexed {} forts with {} (cache: {})",
        index.len(),
        index.model(),
        cache_dir.display()
    );
    Ok(())
}
