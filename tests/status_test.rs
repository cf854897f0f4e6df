mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use bill_acceptor::interfaces::status::{StatusServer, router};
use common::Harness;
use serde_json::Value;
use tower::ServiceExt;

async fn get_status(h: &Harness) -> (StatusCode, Value) {
    let response = router(h.controller.clone())
        .oneshot(
            Request::builder()
                .uri("/api/status")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_idle_controller_reports_success() {
    let h = Harness::new();
    let (status, body) = get_status(&h).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");
    assert!(body.get("transaction").is_none());
}

#[tokio::test]
async fn test_active_transaction_reports_conflict() {
    let h = Harness::new();
    h.start("t1", 5000).await;

    let (status, body) = get_status(&h).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["status"], "error");
    assert_eq!(body["state"], "active");
    assert_eq!(body["transaction"]["payment_token"], "t1");
    assert_eq!(body["transaction"]["product_price"], 5000);

    h.controller.reset();
    let (status, _) = get_status(&h).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_status_server_serves_and_shuts_down() {
    let h = Harness::new();
    let server = StatusServer::new("127.0.0.1:0".parse().unwrap(), h.controller.clone());
    let addr = server.start().await.unwrap();

    let response = reqwest::get(format!("http://{addr}/api/status")).await.unwrap();
    assert_eq!(response.status(), reqwest::StatusCode::OK);

    server.shutdown();
}
