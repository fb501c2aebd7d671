//! # Sahyadri CLI (`sahyadri`)
//!
//! Browse the fort catalog, get recommendations, inspect clusters, run
//! semantic search, and start the HTTP API.
//!
//! ## Usage
//!
//! ```bash
//! sahyadri --config ./config/sahyadri.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `sahyadri forts list` | List forts, optionally filtered |
//! | `sahyadri forts get <id>` | Show one fort in full |
//! | `sahyadri forts facets` | Distinct districts, types, difficulties, seasons |
//! | `sahyadri nearby <lat> <lon>` | Nearest forts to a coordinate |
//! | `sahyadri similar <id>` | Forts similar to a given fort |
//! | `sahyadri clusters` | Cluster sizes |
//! | `sahyadri predict <lat> <lon>` | Cluster for a coordinate |
//! | `sahyadri search "<query>"` | Semantic search over fort descriptions |
//! | `sahyadri index build` | Build and cache the embedding index |
//! | `sahyadri serve` | Start the HTTP server |
//!
//! Logging goes to stderr and honours `RUST_LOG` (default `info`).

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use sahyadri::{commands, config, server};

/// Sahyadri: explore and get recommendations over Maharashtra's forts.
///
/// All commands accept a `--config` flag pointing to a TOML configuration
/// file. See `config/sahyadri.example.toml` for a full example.
#[derive(Parser)]
#[command(
    name = "sahyadri",
    about = "Sahyadri: explore, cluster and search a catalog of Maharashtra's forts",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true, default_value = "./config/sahyadri.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Browse the catalog.
    Forts {
        #[command(subcommand)]
        action: FortsAction,
    },

    /// Forts nearest to a coordinate, by geodesic distance.
    Nearby {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        /// Number of results (defaults to `[retrieval].nearby_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Forts most similar to the given fort by type and elevation.
    Similar {
        id: i64,
        /// Number of results (defaults to `[retrieval].similar_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Fit the clustering and print cluster sizes.
    Clusters {
        /// Number of clusters (defaults to `[clustering].n_clusters`).
        #[arg(long)]
        n: Option<usize>,
    },

    /// Fit the clustering and print the cluster a coordinate falls in.
    Predict {
        #[arg(allow_negative_numbers = true)]
        lat: f64,
        #[arg(allow_negative_numbers = true)]
        lon: f64,
        #[arg(long)]
        n: Option<usize>,
    },

    /// Semantic search over the fort corpus.
    ///
    /// Requires an embedding provider in `[embedding]`.
    Search {
        query: String,
        /// Number of results (defaults to `[retrieval].semantic_top_k`).
        #[arg(long)]
        top_k: Option<usize>,
    },

    /// Manage the embedding index.
    Index {
        #[command(subcommand)]
        action: IndexAction,
    },

    /// Start the HTTP server on `[server].bind`.
    Serve,
}

#[derive(Subcommand)]
enum FortsAction {
    /// List forts, optionally filtered.
    List {
        /// Case-insensitive substring of name, notes or key events.
        #[arg(long)]
        q: Option<String>,
        #[arg(long)]
        district: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Show a single fort.
    Get { id: i64 },
    /// Distinct values of the categorical columns.
    Facets,
}

#[derive(Subcommand)]
enum IndexAction {
    /// Embed the catalog and write the cache to `[embedding].cache_dir`.
    Build,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load_config(&cli.config)?;

    if let Commands::Serve = cli.command {
        return server::run_server(&cfg).await;
    }

    // Everything else may block (model loading, HTTP embedding calls).
    tokio::task::spawn_blocking(move || run_command(&cfg, cli.command)).await?
}

fn run_command(cfg: &config::Config, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Forts { action } => match action {
            FortsAction::List { q, district, limit } => commands::run_list(cfg, q, district, limit),
            FortsAction::Get { id } => commands::run_get(cfg, id),
            FortsAction::Facets => commands::run_facets(cfg),
        },
        Commands::Nearby { lat, lon, k } => commands::run_nearby(cfg, lat, lon, k),
        Commands::Similar { id, k } => commands::run_similar(cfg, id, k),
        Commands::Clusters { n } => commands::run_clusters(cfg, n),
        Commands::Predict { lat, lon, n } => commands::run_predict(cfg, lat, lon, n),
        Commands::Search { query, top_k } => commands::run_search(cfg, &query, top_k),
        Commands::Index {
            action: IndexAction::Build,
        } => commands::run_index_build(cfg),
        Commands::Serve => unreachable!("serve runs on the async runtime"),
    }
}
