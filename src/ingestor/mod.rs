//! Ingestor
//!
//! Keeps the secondary index consistent with etcd: a paginated bulk seed at
//! startup plus a continuous change-stream apply, with an observable
//! ingestion lag. Holds references to the etcd client and the index; neither
//! holds a reference back.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::error::Result;
use crate::etcd::EtcdClient;
use crate::kvstore::KvStore;
use crate::metrics::{Counter, Gauge};
use crate::types::WatchEvent;

pub struct Ingestor {
    etcd: Arc<dyn EtcdClient>,
    store: Arc<dyn KvStore>,
    /// Events received from the watch but not yet applied to the index.
    pending: Gauge,
    applied: Counter,
    seeded: Counter,
}

impl Ingestor {
    pub fn new(etcd: Arc<dyn EtcdClient>, store: Arc<dyn KvStore>) -> Self {
        Self {
            etcd,
            store,
            pending: Gauge::new(),
            applied: Counter::new(),
            seeded: Counter::new(),
        }
    }

    /// Bulk-copies the current keyspace into the index, page by page. Must
    /// complete before the service starts answering search traffic; any
    /// error aborts initialization.
    pub async fn init_kv_store(&self) -> Result<()> {
        let mut from_key = String::new();
        loop {
            let page = self.etcd.keys_page(&from_key).await?;
            if page.kvs.is_empty() {
                break;
            }
            for kv in &page.kvs {
                self.store.put(&kv.key, &kv.value).await?;
            }
            self.seeded.add(page.kvs.len() as u64);
            debug!(count = page.kvs.len(), next_key = %page.next_key, "seeded page");
            from_key = page.next_key;
        }
        info!(total = self.seeded.get(), "kv store seeded from etcd");
        Ok(())
    }

    /// Applies the etcd change stream to the index until shutdown or a
    /// fatal watch error. Events are applied sequentially in cursor order.
    pub async fn change_updater(&self, shutdown: broadcast::Receiver<()>) -> Result<()> {
        let (mut events, mut errors) = self.etcd.watch(shutdown);
        loop {
            tokio::select! {
                maybe_event = events.recv() => {
                    let Some(event) = maybe_event else {
                        // producer closed the stream; surface its final error if any
                        return match errors.recv().await {
                            Some(err) => Err(err),
                            None => Ok(()),
                        };
                    };
                    self.pending.inc();
                    let outcome = match &event {
                        WatchEvent::Put { key, value } => self.store.put(key, value).await,
                        WatchEvent::Delete { key } => self.store.delete(key).await,
                    };
                    self.pending.dec();
                    outcome?;
                    self.applied.inc();
                    debug!(key = event.key(), "applied change event");
                }
                Some(err) = errors.recv() => return Err(err),
            }
        }
    }

    /// Number of change events received but not yet applied.
    pub fn ingestion_delay(&self) -> u64 {
        self.pending.get()
    }

    /// Total change events applied to the index since startup.
    pub fn applied_total(&self) -> u64 {
        self.applied.get()
    }
}
