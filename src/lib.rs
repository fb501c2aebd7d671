//! # Sahyadri
//!
//! Exploration and recommendation service over a catalog of Maharashtra's
//! forts.
//!
//! The catalog is a CSV table loaded once into memory. Everything else is
//! derived from it: distance and similarity recommendations per request,
//! a k-means partition of the forts, and an embedding index for free-text
//! search. Both a CLI and an HTTP API sit on top.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌──────────────────────────┐
//! │  CSV table  │──▶│  Catalog (Arc snapshot)  │
//! └─────────────┘   └────────────┬─────────────┘
//!                                │
//!        ┌──────────────┬────────┴─────┬───────────────┐
//!        ▼              ▼              ▼               ▼
//!  ┌───────────┐  ┌────────────┐ ┌───────────┐  ┌─────────────┐
//!  │ Proximity │  │ Similarity │ │ Clusters  │  │  Semantic   │
//!  │ geodesic  │  │ type/elev  │ │ k-means   │  │ embeddings  │
//!  └───────────┘  └────────────┘ └───────────┘  └─────────────┘
//!                                │
//!                      ┌─────────┴─────────┐
//!                      ▼                   ▼
//!                 ┌──────────┐       ┌──────────┐
//!                 │   CLI    │       │   HTTP   │
//!                 └──────────┘       └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! sahyadri forts list --district Pune
//! sahyadri nearby 18.52 73.85 --k 5
//! sahyadri similar 12
//! sahyadri clusters --n 6
//! sahyadri index build          # warm the embedding cache
//! sahyadri serve                # start HTTP server
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Error kinds shared by every component |
//! | [`catalog`] | CSV loading, lookup, filtering and reload |
//! | [`proximity`] | Nearest forts by geodesic distance |
//! | [`similarity`] | Type/elevation similarity ranking |
//! | [`cluster`] | k-means clustering and cluster prediction |
//! | [`embedding`] | Embedding provider abstraction |
//! | [`semantic`] | Corpus, semantic index and its on-disk cache |
//! | [`server`] | HTTP server |
//! | [`commands`] | CLI command implementations |

pub mod catalog;
pub mod cluster;
pub mod commands;
pub mod config;
pub mod embedding;
pub mod error;
pub mod models;
pub mod proximity;
pub mod semantic;
pub mod server;
pub mod similarity;
