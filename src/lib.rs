//! etcdscout: Search-Accelerated Mirror over etcd
//!
//! etcd supports exact lookup and prefix scans but no substring search over
//! keys. etcdscout maintains a full-text-indexed replica of the keyspace and
//! serves search from it, while writes and exact reads keep flowing through
//! etcd as the source of truth:
//! - A versioned etcd client (v2 node tree / v3 flat keyspace) with point
//!   operations, paginated enumeration, a gap-detecting watch, and a
//!   periodic connection auditor
//! - An ingestor that bulk-seeds the index and continuously applies the
//!   change stream, exposing its lag
//! - A write-through service facade behind a thin axum HTTP API
//!
//! The index is eventually consistent by design; it only ever lags etcd.

pub mod config;
pub mod error;
pub mod etcd;
pub mod http;
pub mod ingestor;
pub mod kvstore;
pub mod metrics;
pub mod service;
pub mod types;

pub use config::Config;
pub use error::{Result, ScoutError};
pub use types::*;
