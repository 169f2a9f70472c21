//! etcd v3 Backend
//!
//! gRPC client over the flat keyspace; cursors are modification revisions.

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use etcd_client::{Client, EventType, GetOptions, WatchClient, WatchOptions};
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::{Result, ScoutError};
use crate::types::{KeyPage, Kv, WatchEvent};

use super::cursor::{WatchCursor, WatchStep};
use super::{EtcdClient, EtcdOptions, AUDIT_PROBE_TIMEOUT};

/// Client for the etcd v3 protocol.
pub struct V3Client {
    client: Client,
    options: EtcdOptions,
}

impl V3Client {
    pub async fn connect(options: EtcdOptions) -> Result<Self> {
        options.ensure_valid()?;
        let client = Client::connect(&options.endpoints, None)
            .await
            .context("failed to create etcd client")?;
        Ok(Self { client, options })
    }
}

#[async_trait]
impl EtcdClient for V3Client {
    async fn get(&self, key: &str) -> Result<String> {
        let mut kv = self.client.kv_client();
        let resp = kv.get(key, None).await.context("failed to get key")?;
        match resp.kvs().first() {
            Some(record) => Ok(String::from_utf8_lossy(record.value()).into_owned()),
            None => Err(ScoutError::KeyNotFound),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<String> {
        let mut kv = self.client.kv_client();
        kv.put(key, value, None)
            .await
            .context("failed to put key")?;
        Ok(key.to_owned())
    }

    async fn delete(&self, key: &str) -> Result<String> {
        let mut kv = self.client.kv_client();
        kv.delete(key, None)
            .await
            .context("failed to delete key")?;
        Ok(key.to_owned())
    }

    fn watch(
        &self,
        shutdown: broadcast::Receiver<()>,
    ) -> (mpsc::Receiver<WatchEvent>, mpsc::Receiver<ScoutError>) {
        let (event_tx, event_rx) = mpsc::channel(self.options.watch_channel_size);
        let (err_tx, err_rx) = mpsc::channel(1);
        let worker = WatchWorker {
            watch: self.client.watch_client(),
            prefix: self.options.root_prefix.clone(),
            cursor: WatchCursor::new(self.options.max_watch_retries),
        };
        tokio::spawn(worker.run(event_tx, err_tx, shutdown));
        (event_rx, err_rx)
    }

    async fn keys_page(&self, from_key: &str) -> Result<KeyPage> {
        let mut kv = self.client.kv_client();
        let (start, get_options) = if from_key.is_empty() {
            (
                self.options.root_prefix.clone(),
                GetOptions::new()
                    .with_prefix()
                    .with_limit(self.options.pagination_limit),
            )
        } else {
            (
                from_key.to_owned(),
                GetOptions::new()
                    .with_from_key()
                    .with_limit(self.options.pagination_limit),
            )
        };

        let resp = kv
            .get(start, Some(get_options))
            .await
            .context("failed to get keys")?;

        let mut kvs = Vec::new();
        for record in resp.kvs() {
            let key = String::from_utf8_lossy(record.key()).into_owned();
            // the range starts at from_key itself; half-open semantics drop it
            if key == from_key {
                continue;
            }
            kvs.push(Kv {
                key,
                value: String::from_utf8_lossy(record.value()).into_owned(),
            });
        }

        let next_key = kvs.last().map(|kv| kv.key.clone()).unwrap_or_default();
        Ok(KeyPage { kvs, next_key })
    }

    fn start_auditor(&self, mut shutdown: broadcast::Receiver<()>) -> mpsc::Receiver<ScoutError> {
        let (err_tx, err_rx) = mpsc::channel(1);
        let mut maintenance = self.client.maintenance_client();
        let period = self.options.audit_period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("starting etcd connection auditor (period {:?})", period);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("stopping etcd connection auditor");
                        return;
                    }
                    // the first tick fires immediately, covering the startup probe
                    _ = ticker.tick() => {
                        let probe = tokio::time::timeout(AUDIT_PROBE_TIMEOUT, maintenance.status()).await;
                        match probe {
                            Ok(Ok(_)) => debug!("etcd connection check: ok"),
                            Ok(Err(err)) => {
                                let _ = err_tx
                                    .send(ScoutError::Backend(
                                        anyhow!(err).context("etcd connection check failed"),
                                    ))
                                    .await;
                                return;
                            }
                            Err(_) => {
                                let _ = err_tx
                                    .send(ScoutError::Backend(anyhow!(
                                        "etcd connection check timed out after {:?}",
                                        AUDIT_PROBE_TIMEOUT
                                    )))
                                    .await;
                                return;
                            }
                        }
                    }
                }
            }
        });

        err_rx
    }

    async fn close(&self) -> Result<()> {
        // the gRPC channels are torn down when the client drops
        Ok(())
    }
}

/// Watch producer task: owns the cursor state machine and the outbound
/// channels.
struct WatchWorker {
    watch: WatchClient,
    prefix: String,
    cursor: WatchCursor,
}

impl WatchWorker {
    async fn run(
        mut self,
        event_tx: mpsc::Sender<WatchEvent>,
        err_tx: mpsc::Sender<ScoutError>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let mut watch_options = WatchOptions::new().with_prefix();
            if let Some(resume) = self.cursor.resubscribed() {
                watch_options = watch_options.with_start_revision(resume as i64);
            }

            let (_watcher, mut stream) = match self
                .watch
                .watch(self.prefix.as_str(), Some(watch_options))
                .await
            {
                Ok(pair) => pair,
                Err(err) => {
                    let _ = err_tx
                        .send(ScoutError::Backend(anyhow!(err).context("watch error")))
                        .await;
                    return;
                }
            };

            'session: loop {
                let message = tokio::select! {
                    _ = shutdown.recv() => return,
                    message = stream.message() => message,
                };

                let resp = match message {
                    Ok(Some(resp)) => resp,
                    Ok(None) => {
                        let _ = err_tx
                            .send(ScoutError::Backend(anyhow!("watch stream closed by server")))
                            .await;
                        return;
                    }
                    Err(err) => {
                        let _ = err_tx
                            .send(ScoutError::Backend(anyhow!(err).context("watch error")))
                            .await;
                        return;
                    }
                };

                if resp.canceled() {
                    let _ = err_tx
                        .send(ScoutError::Backend(anyhow!(
                            "watch canceled by server: {}",
                            resp.cancel_reason()
                        )))
                        .await;
                    return;
                }

                for event in resp.events() {
                    let Some(record) = event.kv() else { continue };
                    let revision = record.mod_revision() as u64;

                    match self.cursor.observe(revision) {
                        WatchStep::Deliver => {
                            let key = String::from_utf8_lossy(record.key()).into_owned();
                            let out = match event.event_type() {
                                EventType::Put => WatchEvent::Put {
                                    key,
                                    value: String::from_utf8_lossy(record.value()).into_owned(),
                                },
                                EventType::Delete => WatchEvent::Delete { key },
                            };
                            tokio::select! {
                                _ = shutdown.recv() => return,
                                sent = event_tx.send(out) => {
                                    if sent.is_err() {
                                        return;
                                    }
                                }
                            }
                        }
                        WatchStep::Resubscribe { from } => {
                            warn!(
                                failures = self.cursor.failures(),
                                expected = from,
                                observed = revision,
                                "modification revision mismatch, reopening watch"
                            );
                            // drop the rest of the batch; replay starts at `from`
                            break 'session;
                        }
                        WatchStep::Terminate { expected, failures } => {
                            let _ = err_tx
                                .send(ScoutError::Backend(anyhow!(
                                    "exceeded max watch retries ({failures}) on revision {expected}"
                                )))
                                .await;
                            return;
                        }
                    }
                }
            }
        }
    }
}
