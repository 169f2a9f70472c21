//! Versioned etcd Client
//!
//! One contract over two incompatible etcd protocols: the v2 node tree
//! (monotonic modified index) and the v3 flat keyspace (monotonic
//! modification revision). Offers point operations, paginated enumeration of
//! the full keyspace, a gap-detecting change-stream watch, and a periodic
//! connection auditor. The backend is chosen once at startup; nothing deeper
//! in the call graph branches on the protocol version.

mod cursor;
mod v2;
mod v3;

pub use cursor::{WatchCursor, WatchPhase, WatchStep};
pub use v2::V2Client;
pub use v3::V3Client;

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::config::EtcdConfig;
use crate::error::{Result, ScoutError};
use crate::types::{EtcdVersion, KeyPage, WatchEvent};

/// How long a single auditor probe may take.
pub(crate) const AUDIT_PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// Capability set shared by both etcd backends.
#[async_trait]
pub trait EtcdClient: Send + Sync {
    /// Current value of `key`; `KeyNotFound` when absent.
    async fn get(&self, key: &str) -> Result<String>;

    /// Unconditional set; returns the key that was written.
    async fn put(&self, key: &str, value: &str) -> Result<String>;

    /// Deletes `key` and returns it. Deleting an absent key is not an
    /// error; the returned key is empty in that case.
    async fn delete(&self, key: &str) -> Result<String>;

    /// Bounded, cursor-ordered change stream plus its error channel. The
    /// producer task closes both channels on exit; a full event channel
    /// blocks the producer rather than dropping events.
    fn watch(
        &self,
        shutdown: broadcast::Receiver<()>,
    ) -> (mpsc::Receiver<WatchEvent>, mpsc::Receiver<ScoutError>);

    /// Up to `pagination_limit` records in strictly ascending key order,
    /// starting strictly after `from_key` (or at the root prefix when
    /// `from_key` is empty). An empty page signals exhaustion.
    async fn keys_page(&self, from_key: &str) -> Result<KeyPage>;

    /// Periodic liveness probe. The first failed probe pushes one error onto
    /// the returned channel and stops the auditor; shutdown exits quietly.
    fn start_auditor(&self, shutdown: broadcast::Receiver<()>) -> mpsc::Receiver<ScoutError>;

    /// Releases backend resources.
    async fn close(&self) -> Result<()>;
}

/// Construction parameters shared by both backends.
#[derive(Debug, Clone)]
pub struct EtcdOptions {
    pub endpoints: Vec<String>,
    pub watch_channel_size: usize,
    pub root_prefix: String,
    pub pagination_limit: i64,
    pub audit_period: Duration,
    pub max_watch_retries: u64,
}

impl EtcdOptions {
    pub fn from_config(config: &EtcdConfig) -> Result<Self> {
        let options = Self {
            endpoints: config.endpoint_list(),
            watch_channel_size: config.watch_event_channel_size,
            root_prefix: config.root_etcd_prefix.clone(),
            pagination_limit: config.pagination_limit,
            audit_period: Duration::from_secs(config.etcd_audit_period),
            max_watch_retries: config.max_watch_retries,
        };
        options.ensure_valid()?;
        Ok(options)
    }

    /// Construction-time invariants; every backend constructor calls this.
    pub(crate) fn ensure_valid(&self) -> Result<()> {
        if self.pagination_limit <= 0 {
            return Err(anyhow!("pagination limit must be greater than 0").into());
        }
        if self.endpoints.is_empty() {
            return Err(anyhow!("at least one etcd endpoint is required").into());
        }
        Ok(())
    }
}

/// Connect to etcd, dispatching on the configured protocol version once.
pub async fn connect(config: &EtcdConfig) -> Result<Arc<dyn EtcdClient>> {
    let options = EtcdOptions::from_config(config)?;
    match config.version {
        EtcdVersion::V3 => Ok(Arc::new(V3Client::connect(options).await?)),
        EtcdVersion::V2 => Ok(Arc::new(V2Client::new(options)?)),
    }
}
