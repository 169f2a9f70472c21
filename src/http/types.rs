//! HTTP API Request/Response Types
//!
//! JSON-serializable types for the REST API.

use serde::{Deserialize, Serialize};

/// Query parameters naming a key
#[derive(Debug, Clone, Deserialize)]
pub struct KeyQuery {
    #[serde(default)]
    pub key: String,
}

/// Query parameters for substring search
#[derive(Debug, Clone, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub q: String,
}

/// Put request body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutKeyRequest {
    #[serde(default)]
    pub key: String,
    #[serde(default)]
    pub value: String,
}

/// Exact-read response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyResponse {
    pub key: String,
    pub value: String,
}

/// Put response echoing the written key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutKeyResponse {
    pub key: String,
}

/// Delete response echoing the requested key
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteKeyResponse {
    pub key: String,
}

/// Search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    /// Matching keys, ordering backend-defined
    pub keys: Vec<String>,
    pub count: usize,
}

/// Ingestion delay response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestionDelayResponse {
    /// Change events received but not yet applied to the index
    pub delay: u64,
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub healthy: bool,
    pub version: String,
}

/// Error response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Machine-readable error code
    pub code: String,
    /// Human-readable error message
    pub message: String,
}

impl ErrorResponse {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }
}
