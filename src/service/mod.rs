//! Service Facade
//!
//! Routes reads and writes between etcd (the source of truth) and the search
//! index. Mutations go to etcd first, then the index, so searches served
//! from the change-stream feedback path observe their own writes; the index
//! only ever lags etcd, never leads it.

use std::sync::Arc;

use crate::error::{Result, ScoutError};
use crate::etcd::EtcdClient;
use crate::ingestor::Ingestor;
use crate::kvstore::KvStore;

pub struct ScoutService {
    etcd: Arc<dyn EtcdClient>,
    store: Arc<dyn KvStore>,
    ingestor: Arc<Ingestor>,
}

impl ScoutService {
    pub fn new(
        etcd: Arc<dyn EtcdClient>,
        store: Arc<dyn KvStore>,
        ingestor: Arc<Ingestor>,
    ) -> Self {
        Self {
            etcd,
            store,
            ingestor,
        }
    }

    /// Exact read, answered by etcd.
    pub async fn get_key(&self, key: &str) -> Result<String> {
        if key.is_empty() {
            return Err(ScoutError::KeyRequired);
        }
        self.etcd.get(key).await
    }

    /// Substring search, answered by the index; returns keys only.
    pub async fn search_keys(&self, query: &str) -> Result<Vec<String>> {
        if query.is_empty() {
            return Err(ScoutError::MalformedSearchString);
        }
        let kvs = self.store.search(query).await?;
        Ok(kvs.into_iter().map(|kv| kv.key).collect())
    }

    /// Write-through put: etcd first, then the index. A failure between the
    /// two leaves the index stale until the next change event for the key.
    pub async fn put_key(&self, key: &str, value: &str) -> Result<()> {
        if key.is_empty() {
            return Err(ScoutError::KeyRequired);
        }
        if value.is_empty() {
            return Err(ScoutError::ValueRequired);
        }
        let written = self.etcd.put(key, value).await?;
        self.store.put(&written, value).await
    }

    /// Write-through delete: etcd first, then the index.
    pub async fn delete_key(&self, key: &str) -> Result<()> {
        if key.is_empty() {
            return Err(ScoutError::KeyRequired);
        }
        let deleted = self.etcd.delete(key).await?;
        self.store.delete(&deleted).await
    }

    /// Change events received but not yet applied to the index.
    pub fn ingestion_delay(&self) -> u64 {
        self.ingestor.ingestion_delay()
    }
}
