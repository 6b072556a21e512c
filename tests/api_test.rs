//! HTTP API integration tests
//!
//! Drives the axum router directly with an in-process fake engine, no
//! network or external daemon involved. Reconciliation ticks are triggered
//! by hand so the tests control exactly what the store has seen.

use axum::{
    Router,
    body::Body,
    http::{Request, StatusCode, header},
};
use downlink::api::{router, state::AppState};
use downlink::config::Config;
use downlink::engine::{EngineClient, EngineError, EngineJobSnapshot};
use downlink::handlers::HandlerRegistry;
use downlink::jobs::{Coordinator, JobStore, Reconciler};
use downlink::observability::Metrics;
use serde_json::{Value, json};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tower::ServiceExt;

/// Engine fake: submissions become active jobs that the next list_all
/// reports back, the way the real daemon behaves.
#[derive(Default)]
struct FakeEngine {
    jobs: Mutex<Vec<EngineJobSnapshot>>,
}

impl FakeEngine {
    fn set_jobs(&self, jobs: Vec<EngineJobSnapshot>) {
        *self.jobs.lock().unwrap() = jobs;
    }
}

#[async_trait::async_trait]
impl EngineClient for FakeEngine {
    async fn list_all(&self) -> Result<Vec<EngineJobSnapshot>, EngineError> {
        Ok(self.jobs.lock().unwrap().clone())
    }

    async fn submit(&self, url: &str, _dest_dir: &str) -> Result<String, EngineError> {
        let gid = format!("gid{:04}", self.jobs.lock().unwrap().len() + 1);
        self.jobs.lock().unwrap().push(EngineJobSnapshot {
            gid: gid.clone(),
            name: url.rsplit('/').next().unwrap_or("Unknown").to_string(),
            status: "active".to_string(),
            completed_bytes: 0,
            total_bytes: 1_000,
            rate_bps: 100,
            eta_seconds: Some(10),
            file_path: String::new(),
        });
        Ok(gid)
    }

    async fn pause(&self, gid: &str) -> Result<(), EngineError> {
        self.lookup(gid)
    }

    async fn resume(&self, gid: &str) -> Result<(), EngineError> {
        self.lookup(gid)
    }

    async fn remove(&self, gid: &str) -> Result<(), EngineError> {
        self.lookup(gid)?;
        self.jobs.lock().unwrap().retain(|j| j.gid != gid);
        Ok(())
    }
}

impl FakeEngine {
    fn lookup(&self, gid: &str) -> Result<(), EngineError> {
        if self.jobs.lock().unwrap().iter().any(|j| j.gid == gid) {
            Ok(())
        } else {
            Err(EngineError::Rpc(format!("GID {gid} is not found")))
        }
    }
}

struct Harness {
    app: Router,
    engine: Arc<FakeEngine>,
    reconciler: Reconciler,
    store: Arc<JobStore>,
}

fn harness() -> Harness {
    harness_with_config(Config::default())
}

fn harness_with_config(config: Config) -> Harness {
    let engine = Arc::new(FakeEngine::default());
    let store = Arc::new(JobStore::new());
    let registry = Arc::new(RwLock::new(HandlerRegistry::from_handlers(Vec::new())));
    let metrics = Arc::new(Metrics::new());

    let coordinator = Arc::new(Coordinator::new(
        store.clone(),
        registry.clone(),
        Some(engine.clone() as Arc<dyn EngineClient>),
        PathBuf::from("/tmp/downlink-test"),
        metrics.clone(),
    ));

    let reconciler = Reconciler::new(
        store.clone(),
        Some(engine.clone() as Arc<dyn EngineClient>),
        registry,
        metrics.clone(),
        Duration::from_millis(1_000),
    );

    let state = AppState::new(Arc::new(config), coordinator, store.clone(), metrics);

    Harness {
        app: router(state),
        engine,
        reconciler,
        store,
    }
}

async fn request(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");

    let request = match body {
        Some(value) => builder.body(Body::from(value.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, value)
}

/// GET returning the raw body, for endpoints that serve file payloads.
async fn raw_get(app: &Router, uri: &str) -> (StatusCode, Vec<u8>) {
    let request = Request::builder()
        .method("GET")
        .uri(uri)
        .body(Body::empty())
        .unwrap();

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();

    (status, bytes.to_vec())
}

#[tokio::test]
async fn test_submit_and_list() {
    let h = harness();

    let (status, body) = request(
        &h.app,
        "POST",
        "/api/download",
        Some(json!({"url": "https://example.com/archive.zip"})),
    )
    .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["backend"], "engine");
    let id = body["id"].as_str().unwrap().to_string();

    // Nothing visible until the reconciler has run.
    let (_, body) = request(&h.app, "GET", "/api/downloads", None).await;
    assert_eq!(body["active"].as_array().unwrap().len(), 0);

    h.reconciler.tick().await;

    let (status, body) = request(&h.app, "GET", "/api/downloads", None).await;
    assert_eq!(status, StatusCode::OK);
    let active = body["active"].as_array().unwrap();
    assert_eq!(active.len(), 1);
    assert_eq!(active[0]["id"], id);
    assert_eq!(active[0]["status"], "active");
    assert_eq!(active[0]["progress"], 0.0);
    assert_eq!(active[0]["eta"], "10s");
}

#[tokio::test]
async fn test_submit_empty_url_rejected() {
    let h = harness();

    let (status, body) =
        request(&h.app, "POST", "/api/download", Some(json!({"url": "  "}))).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "INVALID_PAYLOAD");
}

#[tokio::test]
async fn test_pause_resume_cancel_engine_job() {
    let h = harness();

    let (_, body) = request(
        &h.app,
        "POST",
        "/api/download",
        Some(json!({"url": "https://example.com/a.iso"})),
    )
    .await;
    let id = body["id"].as_str().unwrap().to_string();
    h.reconciler.tick().await;

    let (status, body) =
        request(&h.app, "POST", &format!("/api/download/{id}/pause"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "paused");

    let (status, _) =
        request(&h.app, "POST", &format!("/api/download/{id}/resume"), None).await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) =
        request(&h.app, "POST", &format!("/api/download/{id}/cancel"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "cancelled");

    // The active record is gone immediately, not a tick later.
    assert!(h.store.list_active().await.is_empty());
}

#[tokio::test]
async fn test_control_unknown_job_is_404() {
    let h = harness();

    let (status, body) =
        request(&h.app, "POST", "/api/download/gid9999/pause", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "NOT_FOUND");

    let (status, _) =
        request(&h.app, "POST", "/api/download/handler:nope/cancel", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_completed_lifecycle_and_delete() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("done.bin");
    std::fs::write(&file_path, b"payload").unwrap();

    h.engine.set_jobs(vec![EngineJobSnapshot {
        gid: "gid0001".to_string(),
        name: "done.bin".to_string(),
        status: "complete".to_string(),
        completed_bytes: 7,
        total_bytes: 7,
        rate_bps: 0,
        eta_seconds: None,
        file_path: file_path.display().to_string(),
    }]);
    h.reconciler.tick().await;

    let (_, body) = request(&h.app, "GET", "/api/downloads", None).await;
    assert_eq!(body["active"].as_array().unwrap().len(), 0);
    let completed = body["completed"].as_array().unwrap();
    assert_eq!(completed.len(), 1);
    assert_eq!(completed[0]["name"], "done.bin");

    let (status, _) = request(
        &h.app,
        "POST",
        "/api/completed/gid0001/delete",
        Some(json!({"delete_file": true})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert!(!file_path.exists());

    // Second delete: the record is gone.
    let (status, _) = request(
        &h.app,
        "POST",
        "/api/completed/gid0001/delete",
        Some(json!({"delete_file": false})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_file_endpoint_serves_completed_download() {
    let h = harness();
    let dir = tempfile::tempdir().unwrap();
    let file_path = dir.path().join("done.bin");
    std::fs::write(&file_path, b"payload").unwrap();

    h.engine.set_jobs(vec![EngineJobSnapshot {
        gid: "gid0001".to_string(),
        name: "done.bin".to_string(),
        status: "complete".to_string(),
        completed_bytes: 7,
        total_bytes: 7,
        rate_bps: 0,
        eta_seconds: None,
        file_path: file_path.display().to_string(),
    }]);
    h.reconciler.tick().await;

    let (status, body) = raw_get(&h.app, "/api/file/gid0001").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"payload");

    let (status, _) = raw_get(&h.app, "/api/file/gid9999").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // History entry intact but the file itself is gone from disk.
    std::fs::remove_file(&file_path).unwrap();
    let (status, _) = raw_get(&h.app, "/api/file/gid0001").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reload_handlers_endpoint() {
    let mut config = Config::default();
    config.handlers.media_enabled = false;
    let h = harness_with_config(config);

    // Built empty by the harness; the reload rebuilds from configuration.
    let (_, body) = request(&h.app, "GET", "/api/handlers", None).await;
    assert_eq!(body["handlers"].as_array().unwrap().len(), 0);

    let (status, body) = request(&h.app, "POST", "/api/handlers/reload", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handlers"], json!(["http"]));

    let (_, body) = request(&h.app, "GET", "/api/handlers", None).await;
    assert_eq!(body["handlers"], json!(["http"]));
}

#[tokio::test]
async fn test_stats_endpoint() {
    let h = harness();

    for url in ["https://example.com/a.bin", "https://example.com/b.bin"] {
        request(&h.app, "POST", "/api/download", Some(json!({"url": url}))).await;
    }
    h.reconciler.tick().await;

    let (status, body) = request(&h.app, "GET", "/api/stats", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_count"], 2);
    assert_eq!(body["completed_count"], 0);
    assert_eq!(body["aggregate_rate_bps"], 200);
    assert_eq!(body["aggregate_rate"], "200B/s");
}

#[tokio::test]
async fn test_handlers_and_config_endpoints() {
    let h = harness();

    let (status, body) = request(&h.app, "GET", "/api/handlers", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["handlers"].as_array().unwrap().len(), 0);
    assert_eq!(body["engine_available"], true);

    let (status, body) = request(&h.app, "GET", "/api/config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["download_dir"], "downloads");
    assert_eq!(body["engine_enabled"], true);
    assert_eq!(body["reconcile_interval_ms"], 1000);
    // The RPC secret must never leak through this endpoint.
    assert!(body.get("secret").is_none());
}

#[tokio::test]
async fn test_health_endpoint() {
    let h = harness();

    let (status, body) = request(&h.app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["components"]["engine"], "configured");
}
