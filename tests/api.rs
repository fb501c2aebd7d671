use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use std::sync::Arc;
use tempfile::TempDir;
use tower::ServiceExt;

use sahyadri::catalog::{Catalog, CatalogHandle};
use sahyadri::cluster::{ClusterParams, ClusterService};
use sahyadri::config::Config;
use sahyadri::embedding::Embedder;
use sahyadri::semantic::SemanticService;
use sahyadri::server::{build_router, AppState};

const FORTS_CSV: &str = "\
fort_id,name,district,type,latitude,longitude,elevation_m,trek_difficulty,trek_time_hours,best_season,notes,key_events
1,Raigad,Raigad,Hill,18.2335,73.4406,820,Medium,2,Winter,Capital of the Maratha empire,Coronation of Shivaji
2,Sinhagad,Pune,Hill,18.3663,73.7559,1312,Easy,1.5,Monsoon,Tanaji's last stand,Battle of Sinhagad
3,Sindhudurg,Sindhudurg,Sea,16.0427,73.4630,5,Easy,,Winter,Island sea fort off Malvan,
4,Torna,Pune,Hill,18.2760,73.6226,1403,Hard,3,Winter,First fort captured,
5,Lohagad,Pune,Hill,18.7097,73.4760,1033,Easy,2,Monsoon,Near Lonavala,
6,Murud-Janjira,Raigad,Sea,18.2999,72.9641,10,Easy,1,Winter,Never conquered,
7,Harihar,Nashik,Hill,,,1120,Hard,3,Monsoon,Rock-cut steps,
";

/// Counts letters; enough to make notes about the sea look alike.
struct LetterCounts;

impl Embedder for LetterCounts {
    fn model_name(&self) -> &str {
        "letter-counts"
    }
    fn dims(&self) -> usize {
        26
    }
    fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|t| {
                let mut v = vec![0.0f32; 26];
                for c in t.to_ascii_lowercase().bytes().filter(u8::is_ascii_lowercase) {
                    v[(c - b'a') as usize] += 1.0;
                }
                v
            })
            .collect())
    }
}

fn state_with(n_clusters: usize, embedder: Result<Arc<dyn Embedder>, String>) -> AppState {
    let mut config = Config::with_data_path("unused.csv");
    config.clustering.n_clusters = n_clusters;
    let catalog = Catalog::from_reader(FORTS_CSV.as_bytes()).unwrap();
    let handle = CatalogHandle::from_catalog("unused.csv", catalog);
    let snapshot = handle.snapshot();
    let clusters =
        ClusterService::new(snapshot.clone(), ClusterParams::from(&config.clustering)).unwrap();
    let semantic = SemanticService::with_embedder(embedder, None, 8, snapshot);
    AppState::new(config, handle, clusters, semantic)
}

fn app() -> Router {
    build_router(state_with(2, Err("embeddings disabled".to_string())))
}

async fn send(app: Router, method: Method, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(
            Request::builder()
                .method(method)
                .uri(uri)
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

async fn get(app: Router, uri: &str) -> (StatusCode, Value) {
    send(app, Method::GET, uri).await
}

fn ids(body: &Value) -> Vec<i64> {
    body.as_array()
        .unwrap()
        .iter()
        .map(|f| f["fort_id"].as_i64().unwrap())
        .collect()
}

#[tokio::test]
async fn test_root_and_health() {
    let (status, body) = get(app(), "/").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["msg"].as_str().unwrap().contains("up and running"));

    let (status, body) = get(app(), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn test_list_forts_filters() {
    let (status, body) = get(app(), "/forts?district=PUNE&type=hill&limit=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![2, 4]);

    let (_, body) = get(app(), "/forts?q=coronation").await;
    assert_eq!(ids(&body), vec![1]);

    let (_, body) = get(app(), "/forts?season=monsoon&difficulty=hard").await;
    assert_eq!(ids(&body), vec![7]);

    // Blank values mean no filter.
    let (_, body) = get(app(), "/forts?district=&limit=100").await;
    assert_eq!(body.as_array().unwrap().len(), 7);
}

#[tokio::test]
async fn test_list_forts_record_shape() {
    let (_, body) = get(app(), "/forts?q=harihar").await;
    let harihar = &body[0];
    assert_eq!(harihar["type"], "Hill");
    assert!(harihar["latitude"].is_null());
    assert_eq!(harihar["elevation_m"], 1120.0);
}

#[tokio::test]
async fn test_facets() {
    let (status, body) = get(app(), "/forts/facets").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["districts"],
        serde_json::json!(["Nashik", "Pune", "Raigad", "Sindhudurg"])
    );
    assert_eq!(body["types"], serde_json::json!(["Hill", "Sea"]));
}

#[tokio::test]
async fn test_get_fort_and_not_found() {
    let (status, body) = get(app(), "/forts/4").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Torna");

    let (status, body) = get(app(), "/forts/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error"]["code"], "not_found");

    let (status, body) = get(app(), "/forts/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_nearby_sorted_and_excludes_missing_coordinates() {
    let (status, body) = get(app(), "/recommend/nearby?lat=18.3663&lon=73.7559&k=10").await;
    assert_eq!(status, StatusCode::OK);
    let results = body.as_array().unwrap();
    assert_eq!(results.len(), 6);
    assert_eq!(results[0]["fort_id"], 2);
    assert_eq!(results[1]["fort_id"], 4);
    let distances: Vec<f64> = results
        .iter()
        .map(|r| r["distance_km"].as_f64().unwrap())
        .collect();
    assert!(distances.windows(2).all(|w| w[0] <= w[1]));
    assert!(!ids(&body).contains(&7));
}

#[tokio::test]
async fn test_nearby_bad_requests() {
    let (status, body) = get(app(), "/recommend/nearby?lat=18.5&lon=73.8&k=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");

    let (status, _) = get(app(), "/recommend/nearby?lat=18.5").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = get(app(), "/recommend/nearby?lat=95&lon=73.8").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_similar() {
    let (status, body) = get(app(), "/recommend/similar/2?k=2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(ids(&body), vec![4, 7]);
    assert!((body[0]["score"].as_f64().unwrap() - 0.909).abs() < 1e-9);

    let (status, _) = get(app(), "/recommend/similar/999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = get(app(), "/recommend/similar/2?k=0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_clusters_and_data() {
    let (status, counts) = get(app(), "/clusters").await;
    assert_eq!(status, StatusCode::OK);
    let total: u64 = counts
        .as_object()
        .unwrap()
        .values()
        .map(|v| v.as_u64().unwrap())
        .sum();
    assert_eq!(total, 7);

    let (_, data) = get(app(), "/clusters/data").await;
    let rows = data.as_array().unwrap();
    assert_eq!(rows.len(), 7);
    assert!(rows.iter().all(|r| r["cluster"].as_u64().unwrap() < 2));
}

#[tokio::test]
async fn test_rebuild_degenerate_then_predict_conflict() {
    let app = app();

    let (status, body) = send(app.clone(), Method::POST, "/clusters/rebuild/10").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["n_clusters"], 10);
    assert_eq!(body["clusters"], serde_json::json!({"0": 7}));
    assert!(body["warning"].as_str().unwrap().contains("insufficient data"));

    let (status, body) = get(app.clone(), "/clusters/predict?lat=18.5&lon=73.8").await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error"]["code"], "model_not_fitted");

    let (status, body) = send(app.clone(), Method::POST, "/clusters/rebuild/3").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body.get("warning").is_none());

    let (status, body) = get(app, "/clusters/predict?lat=18.5&lon=73.8").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["cluster"].as_u64().unwrap() < 3);
}

#[tokio::test]
async fn test_rebuild_zero_rejected() {
    let (status, body) = send(app(), Method::POST, "/clusters/rebuild/0").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"]["code"], "bad_request");
}

#[tokio::test]
async fn test_semantic_search_unavailable() {
    let (status, body) = get(app(), "/search/semantic_search?q=sea%20fort").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["error"]["code"], "index_unavailable");

    // Other endpoints keep working.
    let (status, _) = get(app(), "/forts/1").await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_semantic_search_available() {
    let app = build_router(state_with(2, Ok(Arc::new(LetterCounts))));

    let (status, body) = get(app.clone(), "/search/semantic_search?q=island%20sea%20fort").await;
    assert_eq!(status, StatusCode::OK);
    let hits = body.as_array().unwrap();
    assert_eq!(hits.len(), 3);
    let scores: Vec<f64> = hits.iter().map(|h| h["score"].as_f64().unwrap()).collect();
    assert!(scores.windows(2).all(|w| w[0] >= w[1]));
    assert!(hits[0]["name"].is_string());

    let (status, _) = get(app, "/search/semantic_search?q=%20").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_reload_picks_up_new_rows() {
    let tmp = TempDir::new().unwrap();
    let csv_path = tmp.path().join("forts.csv");
    std::fs::write(&csv_path, FORTS_CSV).unwrap();

    let mut config = Config::with_data_path(&csv_path);
    config.clustering.n_clusters = 2;
    let state = AppState::from_config(&config).unwrap();
    let app = build_router(state);

    let (_, body) = get(app.clone(), "/forts?limit=100").await;
    assert_eq!(body.as_array().unwrap().len(), 7);

    let mut extended = FORTS_CSV.to_string();
    extended.push_str("8,Rajgad,Pune,Hill,18.2460,73.6820,1376,Hard,3,Winter,Former capital,\n");
    std::fs::write(&csv_path, extended).unwrap();

    let (status, body) = send(app.clone(), Method::POST, "/forts/reload").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["forts"], 8);

    let (status, body) = get(app.clone(), "/forts/8").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "Rajgad");

    let (_, data) = get(app.clone(), "/clusters/data").await;
    assert_eq!(data.as_array().unwrap().len(), 8);

    // A failed reload keeps serving the previous catalog.
    std::fs::remove_file(&csv_path).unwrap();
    let (status, body) = send(app.clone(), Method::POST, "/forts/reload").await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["error"]["code"], "internal");
    let (status, _) = get(app, "/forts/8").await;
    assert_eq!(status, StatusCode::OK);
}
