//! HTTP Handlers
//!
//! Thin handlers over the service facade; all validation lives in the
//! service layer.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use tracing::{debug, error};

use crate::error::ScoutError;
use crate::service::ScoutService;

use super::types::*;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<ScoutService>,
}

pub async fn health() -> impl IntoResponse {
    Json(HealthResponse {
        healthy: true,
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

pub async fn get_key(
    State(state): State<AppState>,
    Query(params): Query<KeyQuery>,
) -> Response {
    debug!(key = %params.key, "http get key");
    match state.service.get_key(&params.key).await {
        Ok(value) => (
            StatusCode::OK,
            Json(KeyResponse {
                key: params.key,
                value,
            }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn put_key(
    State(state): State<AppState>,
    Json(request): Json<PutKeyRequest>,
) -> Response {
    debug!(key = %request.key, "http put key");
    match state.service.put_key(&request.key, &request.value).await {
        Ok(()) => (StatusCode::OK, Json(PutKeyResponse { key: request.key })).into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn delete_key(
    State(state): State<AppState>,
    Query(params): Query<KeyQuery>,
) -> Response {
    debug!(key = %params.key, "http delete key");
    match state.service.delete_key(&params.key).await {
        Ok(()) => (
            StatusCode::OK,
            Json(DeleteKeyResponse { key: params.key }),
        )
            .into_response(),
        Err(err) => error_response(err),
    }
}

pub async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
) -> Response {
    debug!(query = %params.q, "http search");
    match state.service.search_keys(&params.q).await {
        Ok(keys) => {
            let count = keys.len();
            (StatusCode::OK, Json(SearchResponse { keys, count })).into_response()
        }
        Err(err) => error_response(err),
    }
}

pub async fn ingestion_delay(State(state): State<AppState>) -> impl IntoResponse {
    Json(IngestionDelayResponse {
        delay: state.service.ingestion_delay(),
    })
}

/// Maps domain errors onto HTTP statuses and the error envelope.
fn error_response(err: ScoutError) -> Response {
    let status = match &err {
        ScoutError::KeyRequired | ScoutError::ValueRequired | ScoutError::MalformedSearchString => {
            StatusCode::BAD_REQUEST
        }
        ScoutError::KeyNotFound => StatusCode::NOT_FOUND,
        ScoutError::KeyNotPut | ScoutError::KeyNotDeleted | ScoutError::Backend(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    if status.is_server_error() {
        error!(error = %err, "request failed");
    }
    (status, Json(ErrorResponse::new(err.code(), err.to_string()))).into_response()
}
