//! HTTP API tests driving the router directly.

mod common;

use std::sync::Arc;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use etcdscout::http::types::ErrorResponse;
use etcdscout::http::{create_router, AppState};
use etcdscout::ingestor::Ingestor;
use etcdscout::service::ScoutService;

use common::{FakeEtcd, FakeStore};

fn router_over(etcd: FakeEtcd) -> Router {
    let etcd = Arc::new(etcd);
    let store = Arc::new(FakeStore::new());
    let ingestor = Arc::new(Ingestor::new(etcd.clone(), store.clone()));
    let service = Arc::new(ScoutService::new(etcd, store, ingestor));
    create_router(AppState { service })
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let app = router_over(FakeEtcd::new(10));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/health")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["healthy"], json!(true));
}

#[tokio::test]
async fn get_of_a_missing_key_is_404() {
    let app = router_over(FakeEtcd::new(10));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/key?key=/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let err: ErrorResponse = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(err.code, "KEY_NOT_FOUND");
}

#[tokio::test]
async fn put_then_get_round_trips() {
    let app = router_over(FakeEtcd::new(10));

    let put = app
        .clone()
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/key")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(
                    json!({"key": "/apps/web", "value": "running"}).to_string(),
                ))
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(put.status(), StatusCode::OK);

    let get = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/key?key=/apps/web")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(get.status(), StatusCode::OK);
    let body = body_json(get).await;
    assert_eq!(body["value"], json!("running"));
}

#[tokio::test]
async fn put_without_a_key_is_400() {
    let app = router_over(FakeEtcd::new(10));
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/key")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"value": "v"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], json!("KEY_REQUIRED"));
}

#[tokio::test]
async fn put_without_a_value_is_400() {
    let app = router_over(FakeEtcd::new(10));
    let response = app
        .oneshot(
            Request::builder()
                .method("PUT")
                .uri("/api/v1/key")
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(json!({"key": "/k"}).to_string()))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], json!("VALUE_REQUIRED"));
}

#[tokio::test]
async fn search_returns_matching_keys() {
    let app = router_over(FakeEtcd::new(10));

    for (key, value) in [("/apps/web", "a"), ("/apps/jobs", "b"), ("/infra/db", "c")] {
        let put = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("PUT")
                    .uri("/api/v1/key")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(Body::from(json!({"key": key, "value": value}).to_string()))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(put.status(), StatusCode::OK);
    }

    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/search?q=apps")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["count"], json!(2));
    let keys = body["keys"].as_array().unwrap();
    assert!(keys.contains(&json!("/apps/web")));
    assert!(keys.contains(&json!("/apps/jobs")));
}

#[tokio::test]
async fn empty_search_string_is_400() {
    let app = router_over(FakeEtcd::new(10));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/search?q=")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["code"], json!("MALFORMED_SEARCH_STRING"));
}

#[tokio::test]
async fn delete_of_an_absent_key_is_200() {
    let app = router_over(FakeEtcd::new(10));
    let response = app
        .oneshot(
            Request::builder()
                .method("DELETE")
                .uri("/api/v1/key?key=/missing")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn ingestion_delay_is_reported() {
    let app = router_over(FakeEtcd::new(10));
    let response = app
        .oneshot(
            Request::builder()
                .uri("/api/v1/ingestion-delay")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["delay"], json!(0));
}
