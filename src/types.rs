//! Core Types
//!
//! Shared data types for keys, values, and change events.

use serde::{Deserialize, Serialize};

/// A single record from the etcd keyspace. Keys and values are opaque
/// strings; keys are unique and compared as raw bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Kv {
    pub key: String,
    pub value: String,
}

impl Kv {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// One page of keys returned by paginated enumeration.
#[derive(Debug, Clone, Default)]
pub struct KeyPage {
    /// Records in strictly ascending key order.
    pub kvs: Vec<Kv>,
    /// Cursor for the next call; empty when the keyspace is exhausted.
    pub next_key: String,
}

/// A change observed on the etcd keyspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    Put { key: String, value: String },
    Delete { key: String },
}

impl WatchEvent {
    /// The key the event applies to.
    pub fn key(&self) -> &str {
        match self {
            Self::Put { key, .. } | Self::Delete { key } => key,
        }
    }
}

/// Which etcd wire protocol a cluster speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EtcdVersion {
    V2,
    V3,
}
