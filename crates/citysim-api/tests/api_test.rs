//! HTTP surface tests driving the router with in-memory stores

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use citysim_api::{create_router, AppState};
use citysim_core::config::LayeredConfig;
use citysim_store::cache::{Cache, CacheConfig};
use citysim_store::memory::{MemoryGeometryStore, MemoryRunStore};
use serde_json::{json, Value};
use tower::ServiceExt;

fn app(cache_dir: &std::path::Path) -> Router {
    let cache = Arc::new(Cache::new(CacheConfig::new(
        cache_dir,
        Duration::from_secs(60),
        Duration::from_secs(3600),
    )));
    let state = AppState::compose(
        Arc::new(MemoryRunStore::new()),
        Arc::new(MemoryGeometryStore::new()),
        cache,
        LayeredConfig::with_defaults(),
    );
    create_router(state)
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(match body {
            Some(body) => Body::from(body.to_string()),
            None => Body::empty(),
        })
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

async fn seed(app: &Router) {
    let (status, _) = send(
        app,
        "POST",
        "/api/v1/projects/p1/groups",
        Some(json!({
            "id": "g-wind",
            "name": "westerly",
            "analysis_type": "urban-wind",
            "area_of_interest": {
                "type": "Polygon",
                "coordinates": [[[0.0, 0.0], [40.0, 0.0], [40.0, 30.0], [0.0, 30.0], [0.0, 0.0]]]
            },
            "parameters": { "wind_speed": 6.0 }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);

    let (status, scene) = send(
        app,
        "POST",
        "/api/v1/projects/p1/scenes",
        Some(json!({ "id": "s-baseline", "name": "baseline" })),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(scene["project_id"], "p1");
}

async fn wait_for_status(app: &Router, run_id: &str, status: &str) -> Value {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let (_, run) = send(app, "GET", &format!("/api/v1/runs/{}", run_id), None).await;
            if run["status"] == status {
                return run;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("run never reached {}", status))
}

#[tokio::test]
async fn test_health() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(&app(dir.path()), "GET", "/health", None).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["service"], "citysim-api");
}

#[tokio::test]
async fn test_submitted_run_completes_with_wind_results() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());
    seed(&app).await;

    let (status, run) = send(
        &app,
        "POST",
        "/api/v1/runs",
        Some(json!({ "group_id": "g-wind", "scene_id": "s-baseline", "creator": "alice" })),
    )
    .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let run_id = run["id"].as_str().unwrap().to_string();

    let run = wait_for_status(&app, &run_id, "COMPLETED").await;
    assert_eq!(run["progress"], 100);
    assert_eq!(run["creator"], "alice");
    let names: Vec<&str> = run["results"]
        .as_array()
        .unwrap()
        .iter()
        .map(|r| r["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, ["wind-speed", "wind-comfort"]);

    let (status, runs) = send(&app, "GET", "/api/v1/projects/p1/runs", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(runs.as_array().unwrap().len(), 1);

    // Cancelling a finished run leaves it untouched
    let (status, run) = send(&app, "POST", &format!("/api/v1/runs/{}/cancel", run_id), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(run["status"], "COMPLETED");

    let (status, _) = send(&app, "DELETE", &format!("/api/v1/runs/{}", run_id), None).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&app, "GET", &format!("/api/v1/runs/{}", run_id), None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body["details"].as_str().unwrap().contains(&run_id));
}

#[tokio::test]
async fn test_invalid_requests_are_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let app = app(dir.path());
    seed(&app).await;

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/projects/p1/groups",
        Some(json!({
            "name": "cooling",
            "analysis_type": "district-cooling",
            "area_of_interest": { "type": "Point", "coordinates": [1.0, 2.0] }
        })),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, _) = send(
        &app,
        "POST",
        "/api/v1/runs",
        Some(json!({ "group_id": "missing", "scene_id": "s-baseline" })),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(&app, "POST", "/api/v1/runs/unknown/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_engine_config_lists_sources() {
    let dir = tempfile::tempdir().unwrap();
    let (status, body) = send(&app(dir.path()), "GET", "/api/v1/config", None).await;

    assert_eq!(status, StatusCode::OK);
    let entries = body.as_array().unwrap();
    assert!(entries
        .iter()
        .any(|e| e["key"] == "max_concurrent_runs" && e["source"] == "Default"));
}
