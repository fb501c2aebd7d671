//! Error kinds surfaced by the catalog, recommenders, clustering and
//! semantic retrieval layers.
//!
//! Library failures (CSV parsing, I/O, embedding backends) are translated
//! into one of these kinds at the component boundary. The HTTP layer maps
//! each kind to a status code and a machine-readable error code.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, FortError>;

#[derive(Error, Debug)]
pub enum FortError {
    /// The backing table is missing or unreadable. Fatal at startup.
    #[error("fort data unavailable: {0}")]
    DataUnavailable(String),

    #[error("fort not found: {0}")]
    NotFound(i64),

    /// Cluster prediction was requested without a fitted model.
    #[error("cluster model not fitted: {0}")]
    ModelNotFitted(String),

    /// Not enough usable rows to form the requested clusters. Callers
    /// downgrade this to a single-cluster fallback plus a warning.
    #[error("insufficient data for clustering: {usable} usable rows for {requested} clusters")]
    InsufficientData { usable: usize, requested: usize },

    /// The semantic index could not be initialized or queried.
    #[error("semantic index unavailable: {0}")]
    IndexUnavailable(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl FortError {
    /// Stable machine-readable code used in HTTP error bodies.
    pub fn code(&self) -> &'static str {
        match self {
            FortError::DataUnavailable(_) => "data_unavailable",
            FortError::NotFound(_) => "not_found",
            FortError::ModelNotFitted(_) => "model_not_fitted",
            FortError::InsufficientData { .. } => "insufficient_data",
            FortError::IndexUnavailable(_) => "index_unavailable",
            FortError::InvalidArgument(_) => "bad_request",
        }
    }
}
