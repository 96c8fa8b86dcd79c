use super::*;
use crate::Config;
use crate::service::tests::{test_service, test_service_with_config};
use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use axum::response::Response;
use std::time::Duration;
use tempfile::tempdir;
use tower::ServiceExt;


/// Router over a `fake` engine with `available` results, writing under a fresh tempdir
fn test_router(available: usize) -> (Router, tempfile::TempDir) {
    let dir = tempdir().unwrap();
    let service = Arc::new(test_service(dir.path(), available));
    (create_router(service), dir)
}

async fn body_bytes(response: Response) -> Vec<u8> {
    to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap()
        .to_vec()
}

async fn body_json(response: Response) -> serde_json::Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .header("host", "localhost:8157")
        .body(Body::empty())
        .unwrap()
}

#[tokio::test]
async fn test_api_server_spawns() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.service.base_dir = dir.path().to_path_buf();
    config.api.bind_address = "127.0.0.1:0".parse().unwrap();
    let service = Arc::new(test_service_with_config(config, 0));

    let (tx, rx) = tokio::sync::oneshot::channel::<()>();
    let handle = tokio::spawn(start_api_server_with_shutdown(service, async move {
        let _ = rx.await;
    }));

    tokio::time::sleep(Duration::from_millis(100)).await;
    tx.send(()).unwrap();

    let result = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("server should stop after the shutdown signal")
        .unwrap();
    assert!(result.is_ok());
}

#[tokio::test]
async fn test_cors_enabled() {
    let (app, _dir) = test_router(0);

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    assert!(
        response
            .headers()
            .contains_key("access-control-allow-origin"),
        "CORS header should be present when CORS is enabled"
    );
}

#[tokio::test]
async fn test_cors_disabled() {
    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.service.base_dir = dir.path().to_path_buf();
    config.api.cors_enabled = false;
    let app = create_router(Arc::new(test_service_with_config(config, 0)));

    let request = Request::builder()
        .uri("/health")
        .header("Origin", "http://localhost:3000")
        .body(Body::empty())
        .unwrap();

    let response = app.oneshot(request).await.unwrap();
    assert!(
        !response
            .headers()
            .contains_key("access-control-allow-origin")
    );
}

#[tokio::test]
async fn test_swagger_ui_only_when_enabled() {
    let (app, _dir) = test_router(0);
    let response = app.oneshot(get("/swagger-ui/")).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let dir = tempdir().unwrap();
    let mut config = Config::default();
    config.service.base_dir = dir.path().to_path_buf();
    config.api.swagger_ui = true;
    let app = create_router(Arc::new(test_service_with_config(config, 0)));

    let response = app.oneshot(get("/api-docs/openapi.json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}
