//! Secondary Index Adapter
//!
//! Write-through key-value store that backs substring search over the etcd
//! keyspace. The index is authoritative for search and advisory for reads;
//! exact gets are always answered by etcd.

mod meilisearch;

pub use meilisearch::MeilisearchStore;

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;

use crate::config::DatastoreConfig;
use crate::error::Result;
use crate::types::Kv;

/// Capability set of the secondary index.
#[async_trait]
pub trait KvStore: Send + Sync {
    async fn put(&self, key: &str, value: &str) -> Result<()>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Records whose indexed content matches `query`; ordering is
    /// backend-defined.
    async fn search(&self, query: &str) -> Result<Vec<Kv>>;

    /// Releases backend resources.
    async fn close(&self) -> Result<()>;
}

/// Opens the configured datastore backend. Only Meilisearch is supported;
/// any other type aborts startup.
pub fn open(config: &DatastoreConfig) -> Result<Arc<dyn KvStore>> {
    match config.kind.as_str() {
        "meilisearch" => Ok(Arc::new(MeilisearchStore::new(&config.meilisearch)?)),
        other => Err(anyhow!("unsupported datastore type: {other}").into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MeilisearchConfig;

    #[test]
    fn open_rejects_unknown_backend_types() {
        let config = DatastoreConfig {
            kind: "elasticsearch".to_string(),
            meilisearch: MeilisearchConfig::default(),
        };
        let err = match open(&config) {
            Ok(_) => panic!("expected an error"),
            Err(err) => err,
        };
        assert!(err.to_string().contains("unsupported datastore type"));
    }
}
