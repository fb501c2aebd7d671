//! HTTP API over the catalog, recommenders, clustering and semantic search.
//!
//! # Endpoints
//!
//! | Method | Path | Description |
//! |--------|------|-------------|
//! | `GET`  | `/` | Banner |
//! | `GET`  | `/health` | Health check (returns version) |
//! | `GET`  | `/forts` | Filtered listing (`q`, `district`, `type`, `difficulty`, `season`, `limit`) |
//! | `GET`  | `/forts/facets` | Distinct districts, types, difficulties and seasons |
//! | `GET`  | `/forts/{id}` | One fort |
//! | `POST` | `/forts/reload` | Re-read the CSV, refit clusters, re-index |
//! | `GET`  | `/recommend/nearby` | Nearest forts to `lat`/`lon` |
//! | `GET`  | `/recommend/similar/{id}` | Forts similar to `id` |
//! | `GET`  | `/clusters` | `cluster_id → count` |
//! | `GET`  | `/clusters/data` | Every fort with its cluster |
//! | `POST` | `/clusters/rebuild/{n}` | Refit with `n` clusters |
//! | `GET`  | `/clusters/predict` | Cluster for `lat`/`lon` |
//! | `GET`  | `/search/semantic_search` | Semantic search (`q`, `top_k`) |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "not_found", "message": "fort not found: 42" } }
//! ```
//!
//! Error codes: `bad_request` (400), `not_found` (404), `model_not_fitted` (409),
//! `index_unavailable` (503), `internal` (500).
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted so the browser dashboard
//! can call the API from another port.

use axum::{
    extract::{
        rejection::{PathRejection, QueryRejection},
        Path, Query, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::catalog::{CatalogHandle, Facets, FortFilter};
use crate::cluster::{ClusterParams, ClusterService};
use crate::config::Config;
use crate::error::FortError;
use crate::models::{
    ClusterCounts, ClusteredFort, DistanceResult, FortRecord, SemanticHit, SimilarityResult,
};
use crate::semantic::SemanticService;
use crate::{proximity, similarity};

/// Shared application state passed to all route handlers via Axum's `State` extractor.
#[derive(Clone)]
pub struct AppState {
    config: Arc<Config>,
    catalog: Arc<CatalogHandle>,
    clusters: Arc<ClusterService>,
    semantic: Arc<SemanticService>,
}

impl AppState {
    pub fn new(
        config: Config,
        catalog: CatalogHandle,
        clusters: ClusterService,
        semantic: SemanticService,
    ) -> Self {
        Self {
            config: Arc::new(config),
            catalog: Arc::new(catalog),
            clusters: Arc::new(clusters),
            semantic: Arc::new(semantic),
        }
    }

    /// Loads the catalog and builds every derived service. Blocking: the
    /// clustering fit and the semantic index build run inline.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let catalog = CatalogHandle::open(&config.data.path)?;
        let snapshot = catalog.snapshot();
        let clusters = ClusterService::new(snapshot.clone(), ClusterParams::from(&config.clustering))?;
        let semantic = SemanticService::initialize(&config.embedding, snapshot);
        Ok(Self::new(config.clone(), catalog, clusters, semantic))
    }
}

/// All routes with CORS applied.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(handle_root))
        .route("/health", get(handle_health))
        .route("/forts", get(handle_list_forts))
        .route("/forts/facets", get(handle_facets))
        .route("/forts/reload", post(handle_reload))
        .route("/forts/{id}", get(handle_get_fort))
        .route("/recommend/nearby", get(handle_nearby))
        .route("/recommend/similar/{id}", get(handle_similar))
        .route("/clusters", get(handle_clusters))
        .route("/clusters/data", get(handle_cluster_data))
        .route("/clusters/rebuild/{n}", post(handle_rebuild))
        .route("/clusters/predict", get(handle_predict))
        .route("/search/semantic_search", get(handle_semantic_search))
        .layer(cors)
        .with_state(state)
}

/// Starts the HTTP server on `[server].bind` and serves until terminated.
pub async fn run_server(config: &Config) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let owned = config.clone();
    let state = tokio::task::spawn_blocking(move || AppState::from_config(&owned)).await??;

    let app = build_router(state);

    tracing::info!(addr = %bind_addr, "fort API listening");
    println!("Fort API listening on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: String,
    message: String,
}

/// Internal error type that converts into an Axum HTTP response.
#[derive(Debug)]
pub struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        if self.status.is_server_error() {
            tracing::error!(code = %self.code, message = %self.message, "request failed");
        }
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::BAD_REQUEST,
        code: "bad_request".to_string(),
        message: message.into(),
    }
}

fn internal(message: impl Into<String>) -> AppError {
    AppError {
        status: StatusCode::INTERNAL_SERVER_ERROR,
        code: "internal".to_string(),
        message: message.into(),
    }
}

impl From<FortError> for AppError {
    fn from(err: FortError) -> Self {
        let status = match &err {
            FortError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            FortError::NotFound(_) => StatusCode::NOT_FOUND,
            FortError::ModelNotFitted(_) => StatusCode::CONFLICT,
            FortError::IndexUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            FortError::DataUnavailable(_) | FortError::InsufficientData { .. } => {
                return internal(err.to_string())
            }
        };
        AppError {
            status,
            code: err.code().to_string(),
            message: err.to_string(),
        }
    }
}

impl From<tokio::task::JoinError> for AppError {
    fn from(err: tokio::task::JoinError) -> Self {
        internal(format!("background task failed: {}", err))
    }
}

/// Unwraps an extractor, turning its rejection into the JSON error body.
fn query<T>(extracted: Result<Query<T>, QueryRejection>) -> Result<T, AppError> {
    extracted
        .map(|Query(q)| q)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn path<T>(extracted: Result<Path<T>, PathRejection>) -> Result<T, AppError> {
    extracted
        .map(|Path(p)| p)
        .map_err(|rejection| bad_request(rejection.body_text()))
}

fn at_least_one(name: &str, value: usize) -> Result<usize, AppError> {
    if value == 0 {
        return Err(bad_request(format!("{} must be >= 1", name)));
    }
    Ok(value)
}

// ============ GET / and /health ============

#[derive(Serialize)]
struct RootResponse {
    msg: &'static str,
}

async fn handle_root() -> Json<RootResponse> {
    Json(RootResponse {
        msg: "Maharashtra Forts API is up and running",
    })
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ /forts ============

#[derive(Deserialize)]
struct ListParams {
    q: Option<String>,
    district: Option<String>,
    #[serde(rename = "type")]
    fort_type: Option<String>,
    difficulty: Option<String>,
    season: Option<String>,
    limit: Option<usize>,
}

/// Blank query values (`?district=`) mean "no filter", as the dashboard's
/// "All" option sends them.
fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

async fn handle_list_forts(
    State(state): State<AppState>,
    params: Result<Query<ListParams>, QueryRejection>,
) -> Result<Json<Vec<FortRecord>>, AppError> {
    let params = query(params)?;
    let limit = at_least_one(
        "limit",
        params.limit.unwrap_or(state.config.retrieval.list_limit),
    )?;
    let filter = FortFilter {
        q: non_blank(params.q),
        district: non_blank(params.district),
        fort_type: non_blank(params.fort_type),
        difficulty: non_blank(params.difficulty),
        season: non_blank(params.season),
        limit,
    };
    Ok(Json(state.catalog.snapshot().filter(&filter)))
}

async fn handle_facets(State(state): State<AppState>) -> Json<Facets> {
    Json(state.catalog.snapshot().facets())
}

async fn handle_get_fort(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
) -> Result<Json<FortRecord>, AppError> {
    let id = path(id)?;
    let catalog = state.catalog.snapshot();
    Ok(Json(catalog.find_by_id(id)?.clone()))
}

#[derive(Serialize)]
struct ReloadResponse {
    forts: usize,
}

async fn handle_reload(State(state): State<AppState>) -> Result<Json<ReloadResponse>, AppError> {
    let forts = tokio::task::spawn_blocking(move || -> Result<usize, FortError> {
        let catalog = state.catalog.reload()?;
        state.clusters.rebuild(&state.catalog, None)?;
        // An index failure leaves search unavailable but the reload stands.
        if let Err(e) = state.semantic.rebuild(catalog.clone()) {
            tracing::warn!(error = %e, "semantic index not rebuilt after reload");
        }
        Ok(catalog.len())
    })
    .await??;

    tracing::info!(forts, "catalog reloaded");
    Ok(Json(ReloadResponse { forts }))
}

// ============ /recommend ============

#[derive(Deserialize)]
struct NearbyParams {
    lat: f64,
    lon: f64,
    k: Option<usize>,
}

async fn handle_nearby(
    State(state): State<AppState>,
    params: Result<Query<NearbyParams>, QueryRejection>,
) -> Result<Json<Vec<DistanceResult>>, AppError> {
    let params = query(params)?;
    let k = params.k.unwrap_or(state.config.retrieval.nearby_k);
    let catalog = state.catalog.snapshot();
    Ok(Json(proximity::nearest(
        &catalog,
        (params.lat, params.lon),
        k,
    )?))
}

#[derive(Deserialize)]
struct SimilarParams {
    k: Option<usize>,
}

async fn handle_similar(
    State(state): State<AppState>,
    id: Result<Path<i64>, PathRejection>,
    params: Result<Query<SimilarParams>, QueryRejection>,
) -> Result<Json<Vec<SimilarityResult>>, AppError> {
    let id = path(id)?;
    let params = query(params)?;
    let k = params.k.unwrap_or(state.config.retrieval.similar_k);
    let catalog = state.catalog.snapshot();
    Ok(Json(similarity::similar_to(&catalog, id, k)?))
}

// ============ /clusters ============

async fn handle_clusters(State(state): State<AppState>) -> Json<ClusterCounts> {
    Json(state.clusters.snapshot().outcome().counts.clone())
}

async fn handle_cluster_data(State(state): State<AppState>) -> Json<Vec<ClusteredFort>> {
    Json(state.clusters.snapshot().clustered_forts())
}

#[derive(Serialize)]
struct RebuildResponse {
    clusters: ClusterCounts,
    n_clusters: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    warning: Option<String>,
}

async fn handle_rebuild(
    State(state): State<AppState>,
    n: Result<Path<usize>, PathRejection>,
) -> Result<Json<RebuildResponse>, AppError> {
    let n = at_least_one("n_clusters", path(n)?)?;
    let snapshot = tokio::task::spawn_blocking(move || {
        state.clusters.rebuild(&state.catalog, Some(n))
    })
    .await??;

    let outcome = snapshot.outcome();
    Ok(Json(RebuildResponse {
        clusters: outcome.counts.clone(),
        n_clusters: outcome.n_clusters,
        warning: outcome.warning.clone(),
    }))
}

#[derive(Deserialize)]
struct PredictParams {
    lat: f64,
    lon: f64,
}

#[derive(Serialize)]
struct PredictResponse {
    cluster: usize,
}

async fn handle_predict(
    State(state): State<AppState>,
    params: Result<Query<PredictParams>, QueryRejection>,
) -> Result<Json<PredictResponse>, AppError> {
    let params = query(params)?;
    let cluster = state.clusters.predict_cluster(params.lat, params.lon)?;
    Ok(Json(PredictResponse { cluster }))
}

// ============ /search ============

#[derive(Deserialize)]
struct SemanticParams {
    q: String,
    top_k: Option<usize>,
}

async fn handle_semantic_search(
    State(state): State<AppState>,
    params: Result<Query<SemanticParams>, QueryRejection>,
) -> Result<Json<Vec<SemanticHit>>, AppError> {
    let params = query(params)?;
    let top_k = params.top_k.unwrap_or(state.config.retrieval.semantic_top_k);
    let hits = tokio::task::spawn_blocking(move || state.semantic.search(&params.q, top_k)).await??;
    Ok(Json(hits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_status_mapping() {
        let cases = [
            (FortError::InvalidArgument("k".into()), 400, "bad_request"),
            (FortError::NotFound(7), 404, "not_found"),
            (FortError::ModelNotFitted("x".into()), 409, "model_not_fitted"),
            (FortError::IndexUnavailable("x".into()), 503, "index_unavailable"),
            (FortError::DataUnavailable("x".into()), 500, "internal"),
        ];
        for (err, status, code) in cases {
            let app: AppError = err.into();
            assert_eq!(app.status.as_u16(), status);
            assert_eq!(app.code, code);
        }
    }

    #[test]
    fn test_non_blank_drops_empty_filters() {
        assert_eq!(non_blank(Some("  ".into())), None);
        assert_eq!(non_blank(Some("Pune".into())), Some("Pune".into()));
        assert_eq!(non_blank(None), None);
    }
}
