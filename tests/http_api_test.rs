// Integration tests for the REST facade, driven in-process through the router

mod common;

use axum::body::{to_bytes, Body};
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use labkeeper::http::router;
use serde_json::{json, Value};
use std::fs;
use tempfile::TempDir;
use tower::ServiceExt;

async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    let body = match body {
        Some(value) => {
            builder = builder.header("content-type", "application/json");
            Body::from(value.to_string())
        }
        None => Body::empty(),
    };

    let response = app
        .clone()
        .oneshot(builder.body(body).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };

    (status, value)
}

#[tokio::test]
async fn test_health_and_root() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18901));

    let (status, body) = call(&app, Method::GET, "/api/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
    assert!(body["timestamp"].as_str().unwrap().contains('T'));

    let (status, body) = call(&app, Method::GET, "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "labkeeper");
    assert!(body["endpoints"]["ai_ask"].is_string());
}

#[tokio::test]
async fn test_status_when_stopped() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18902));

    let (status, body) = call(&app, Method::GET, "/api/status", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    assert_eq!(body["phase"], "stopped");
    assert_eq!(body["port"], 18902);
    assert_eq!(body["uptime"], 0);
    assert!(body["url"].is_null());
    assert_eq!(body["process_protection"], "disabled");
    assert_eq!(body["config"]["python_executable"], "/bin/sh");
}

#[tokio::test]
async fn test_stop_when_not_running_is_success() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18903));

    let (status, body) = call(&app, Method::POST, "/api/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["was_running"], false);
    assert_eq!(body["message"], "Notebook server is not running");
}

#[tokio::test]
async fn test_start_rejects_privileged_port() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18904));

    let (status, body) = call(&app, Method::POST, "/api/start", Some(json!({"port": 80}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("port"));
}

#[tokio::test]
async fn test_start_rejects_missing_path() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18905));

    let request = json!({"project_dir": "/nonexistent/labkeeper/notebooks"});
    let (status, body) = call(&app, Method::POST, "/api/start", Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_malformed_body_is_bad_request() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18906));

    let request = Request::builder()
        .method(Method::POST)
        .uri("/api/start")
        .header("content-type", "application/json")
        .body(Body::from("{not json"))
        .unwrap();
    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_start_status_stop_cycle() {
    let dir = TempDir::new().unwrap();
    let state = common::create_state(&dir, 18907);
    let supervisor = state.supervisor.clone();
    let app = router(state);

    let request = json!({"project_dir": dir.path().to_string_lossy()});
    let (status, body) = call(&app, Method::POST, "/api/start", Some(request.clone())).await;
    assert_eq!(status, StatusCode::OK, "start failed: {}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["port"], 18907);
    assert_eq!(body["url"], "http://localhost:18907/lab");
    assert!(body["pid"].as_u64().is_some());

    // A second start while running is a conflict
    let (status, body) = call(&app, Method::POST, "/api/start", Some(request)).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["success"], false);

    let (_, body) = call(&app, Method::GET, "/api/status", None).await;
    assert_eq!(body["running"], true);
    assert_eq!(body["phase"], "running");
    assert_eq!(body["url"], "http://localhost:18907/lab");
    assert_eq!(body["restart_count"], 0);

    let (status, body) = call(&app, Method::POST, "/api/stop", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["was_running"], true);

    let (_, body) = call(&app, Method::GET, "/api/status", None).await;
    assert_eq!(body["running"], false);

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_start_with_notebook_file() {
    let dir = TempDir::new().unwrap();
    let state = common::create_state(&dir, 18908);
    let supervisor = state.supervisor.clone();
    let app = router(state);

    let notebook = dir.path().join("analysis.ipynb");
    fs::write(&notebook, "{}").unwrap();

    let request = json!({
        "target_path": notebook.to_string_lossy(),
        "use_notebook": true
    });
    let (status, body) = call(&app, Method::POST, "/api/restart", Some(request)).await;
    assert_eq!(status, StatusCode::OK, "restart failed: {}", body);
    assert_eq!(body["url"], "http://localhost:18908/tree");
    assert!(body["open_file"]
        .as_str()
        .unwrap()
        .ends_with("analysis.ipynb"));

    supervisor.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_save_and_load_config() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18909));

    let patch = json!({"max_restarts": 5, "auto_start": true, "theme": "dark"});
    let (status, body) = call(&app, Method::POST, "/api/save_config", Some(patch)).await;
    assert_eq!(status, StatusCode::OK, "save failed: {}", body);
    assert_eq!(body["success"], true);
    assert_eq!(body["config"]["max_restarts"], 5);
    assert!(dir.path().join("labkeeper.json").exists());

    let (status, body) = call(&app, Method::GET, "/api/load_config", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["config"]["max_restarts"], 5);
    assert_eq!(body["config"]["auto_start"], true);
    assert_eq!(body["config"]["theme"], "dark");
    assert_eq!(body["config"]["jupyter_port"], 18909);
}

#[tokio::test]
async fn test_concurrent_saves_are_all_kept() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18914));

    let saves = (0..8).map(|i| {
        let app = app.clone();
        async move {
            let patch = json!({ (format!("panel_{}", i)): i });
            call(&app, Method::POST, "/api/save_config", Some(patch)).await
        }
    });
    for (status, body) in run_concurrently(saves).await {
        assert_eq!(status, StatusCode::OK, "save failed: {}", body);
    }

    let (_, body) = call(&app, Method::GET, "/api/load_config", None).await;
    for i in 0..8 {
        assert_eq!(body["config"][format!("panel_{}", i)], i);
    }

    let on_disk: Value =
        serde_json::from_str(&fs::read_to_string(dir.path().join("labkeeper.json")).unwrap())
            .unwrap();
    for i in 0..8 {
        assert_eq!(on_disk[format!("panel_{}", i)], i);
    }
}

/// Run request futures concurrently on spawned tasks
async fn run_concurrently<F>(futures: impl Iterator<Item = F>) -> Vec<F::Output>
where
    F: std::future::Future + Send + 'static,
    F::Output: Send + 'static,
{
    let handles: Vec<_> = futures.map(tokio::spawn).collect();
    let mut results = Vec::new();
    for handle in handles {
        results.push(handle.await.unwrap());
    }
    results
}

#[tokio::test]
async fn test_save_config_rejects_missing_directory() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18910));

    let patch = json!({"project_dir": "/nonexistent/labkeeper/project"});
    let (status, body) = call(&app, Method::POST, "/api/save_config", Some(patch)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(!dir.path().join("labkeeper.json").exists());

    let (status, _) = call(&app, Method::POST, "/api/save_config", Some(json!([1, 2]))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_detect_with_non_python_interpreter() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18911));

    let (status, body) = call(&app, Method::GET, "/api/detect_python", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], false);
    assert_eq!(body["info"]["jupyterlab_installed"], false);
}

#[tokio::test]
async fn test_ai_ask_requires_fields() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18912));

    let (status, body) = call(&app, Method::POST, "/api/ai/ask", Some(json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["success"], false);
    assert!(body["message"].as_str().unwrap().contains("image"));

    let request = json!({"image": "aGVsbG8=", "question": "what is this?"});
    let (status, body) = call(&app, Method::POST, "/api/ai/ask", Some(request)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"].as_str().unwrap().contains("api_key"));
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let dir = TempDir::new().unwrap();
    let app = router(common::create_state(&dir, 18913));

    let request = Request::builder()
        .method(Method::GET)
        .uri("/api/health")
        .header("origin", "http://example.com")
        .body(Body::empty())
        .unwrap();
    let response = app.oneshot(request).await.unwrap();

    assert_eq!(
        response.headers().get("access-control-allow-origin").unwrap(),
        "*"
    );
}
