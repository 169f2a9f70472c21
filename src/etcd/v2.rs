//! etcd v2 Backend
//!
//! HTTP/JSON client over the `/v2/keys` API; cursors are modified indexes.
//! The v2 protocol exposes a node tree rather than a flat keyspace, so
//! enumeration fetches the whole recursive subtree sorted and pages through
//! it in memory, and the change stream is a long poll with a `waitIndex`.

use std::time::Duration;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use serde::Deserialize;
use tokio::sync::{broadcast, mpsc};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{Result, ScoutError};
use crate::types::{KeyPage, Kv, WatchEvent};

use super::cursor::{WatchCursor, WatchStep};
use super::{EtcdClient, EtcdOptions, AUDIT_PROBE_TIMEOUT};

/// Sentinel key probed by the auditor; not expected to exist.
const HEALTH_CHECK_KEY: &str = "/__etcdscout_health_check__";

/// etcd v2 error code for "key not found".
const CODE_KEY_NOT_FOUND: i64 = 100;

/// Client for the etcd v2 protocol. Stateless HTTP; nothing to tear down.
pub struct V2Client {
    http: reqwest::Client,
    endpoints: Vec<Url>,
    options: EtcdOptions,
}

/// Envelope of every `/v2/keys` reply.
#[derive(Debug, Deserialize)]
struct KeysResponse {
    action: String,
    node: Option<Node>,
}

/// One node of the v2 tree. Directories carry `nodes`; leaves carry `value`.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct Node {
    key: String,
    value: Option<String>,
    dir: bool,
    nodes: Option<Vec<Node>>,
    #[serde(rename = "modifiedIndex")]
    modified_index: u64,
}

/// Error body returned by the v2 API on non-2xx replies.
#[derive(Debug, Deserialize)]
struct ApiError {
    #[serde(rename = "errorCode")]
    error_code: i64,
    message: String,
}

impl V2Client {
    pub fn new(options: EtcdOptions) -> Result<Self> {
        options.ensure_valid()?;

        let mut endpoints = Vec::with_capacity(options.endpoints.len());
        for raw in &options.endpoints {
            let url = Url::parse(raw)
                .with_context(|| format!("invalid etcd endpoint '{raw}'"))?;
            endpoints.push(url);
        }

        // no overall request timeout: the watch long poll is held open by the
        // server until a change arrives
        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .build()
            .context("failed to create http client")?;

        Ok(Self {
            http,
            endpoints,
            options,
        })
    }

    /// Tries each endpoint in order, moving on only for connectivity
    /// failures.
    async fn send_with_failover<F>(&self, build: F) -> Result<reqwest::Response>
    where
        F: Fn(&Url) -> reqwest::RequestBuilder,
    {
        let mut last_err = anyhow!("no etcd endpoints configured");
        for endpoint in &self.endpoints {
            match build(endpoint).send().await {
                Ok(resp) => return Ok(resp),
                Err(err) if err.is_connect() || err.is_timeout() => {
                    warn!(endpoint = %endpoint, error = %err, "etcd endpoint unreachable, trying next");
                    last_err = anyhow!(err);
                }
                Err(err) => return Err(anyhow!(err).context("etcd request failed").into()),
            }
        }
        Err(last_err.context("all etcd endpoints unreachable").into())
    }
}

fn keys_url(endpoint: &Url, key: &str) -> Url {
    let mut url = endpoint.clone();
    if key.starts_with('/') {
        url.set_path(&format!("/v2/keys{key}"));
    } else {
        url.set_path(&format!("/v2/keys/{key}"));
    }
    url
}

/// Decodes a `/v2/keys` reply, mapping etcd error bodies onto domain errors.
async fn decode_keys_response(resp: reqwest::Response) -> Result<KeysResponse> {
    let status = resp.status();
    if status.is_success() {
        let decoded = resp
            .json::<KeysResponse>()
            .await
            .context("failed to decode etcd response")?;
        return Ok(decoded);
    }

    let body = resp.text().await.unwrap_or_default();
    if let Ok(api_err) = serde_json::from_str::<ApiError>(&body) {
        if api_err.error_code == CODE_KEY_NOT_FOUND {
            return Err(ScoutError::KeyNotFound);
        }
        return Err(anyhow!("etcd error {}: {}", api_err.error_code, api_err.message).into());
    }
    Err(anyhow!("etcd returned {status}: {body}").into())
}

/// Maps a v2 action code onto a change event. Unknown actions yield `None`.
fn map_action(action: &str, key: String, value: Option<String>) -> Option<WatchEvent> {
    match action {
        "set" | "create" | "update" | "compareAndSwap" => Some(WatchEvent::Put {
            key,
            value: value.unwrap_or_default(),
        }),
        "delete" | "expire" | "compareAndDelete" => Some(WatchEvent::Delete { key }),
        _ => None,
    }
}

/// Depth-first traversal of a sorted v2 node tree, yielding up to `limit`
/// leaves strictly after `from_key`. Directory nodes are never yielded but
/// are descended into in returned (sorted) order.
fn collect_page(root: &Node, from_key: &str, limit: usize) -> Vec<Kv> {
    let mut kvs = Vec::new();
    let mut skipping = !from_key.is_empty();
    collect_into(root, from_key, limit, &mut skipping, &mut kvs);
    kvs
}

fn collect_into(
    node: &Node,
    from_key: &str,
    limit: usize,
    skipping: &mut bool,
    kvs: &mut Vec<Kv>,
) {
    if kvs.len() >= limit {
        return;
    }

    if !node.dir {
        if *skipping {
            // the matching key itself is excluded; accumulation starts at
            // the next leaf encountered
            if node.key == from_key {
                *skipping = false;
            }
            return;
        }
        kvs.push(Kv {
            key: node.key.clone(),
            value: node.value.clone().unwrap_or_default(),
        });
        return;
    }

    if let Some(children) = &node.nodes {
        for child in children {
            if kvs.len() >= limit {
                return;
            }
            collect_into(child, from_key, limit, skipping, kvs);
        }
    }
}

#[async_trait]
impl EtcdClient for V2Client {
    async fn get(&self, key: &str) -> Result<String> {
        let resp = self
            .send_with_failover(|ep| self.http.get(keys_url(ep, key)))
            .await?;
        let decoded = decode_keys_response(resp).await?;
        match decoded.node {
            Some(node) => Ok(node.value.unwrap_or_default()),
            None => Err(ScoutError::KeyNotFound),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<String> {
        let resp = self
            .send_with_failover(|ep| {
                self.http
                    .put(keys_url(ep, key))
                    .form(&[("value", value)])
            })
            .await?;
        let decoded = decode_keys_response(resp).await?;
        match decoded.node {
            Some(node) => Ok(node.key),
            None => Err(ScoutError::KeyNotPut),
        }
    }

    async fn delete(&self, key: &str) -> Result<String> {
        let resp = self
            .send_with_failover(|ep| self.http.delete(keys_url(ep, key)))
            .await?;
        let decoded = match decode_keys_response(resp).await {
            Ok(decoded) => decoded,
            // already deleted
            Err(ScoutError::KeyNotFound) => return Ok(String::new()),
            Err(err) => return Err(err),
        };
        match decoded.node {
            Some(node) => Ok(node.key),
            None => Err(ScoutError::KeyNotDeleted),
        }
    }

    fn watch(
        &self,
        shutdown: broadcast::Receiver<()>,
    ) -> (mpsc::Receiver<WatchEvent>, mpsc::Receiver<ScoutError>) {
        let (event_tx, event_rx) = mpsc::channel(self.options.watch_channel_size);
        let (err_tx, err_rx) = mpsc::channel(1);
        let worker = WatchWorker {
            http: self.http.clone(),
            endpoint: self.endpoints[0].clone(),
            prefix: self.options.root_prefix.clone(),
            cursor: WatchCursor::new(self.options.max_watch_retries),
            poll_index: None,
        };
        tokio::spawn(worker.run(event_tx, err_tx, shutdown));
        (event_rx, err_rx)
    }

    async fn keys_page(&self, from_key: &str) -> Result<KeyPage> {
        // v2 has no native pagination: fetch the whole sorted subtree and
        // page through it in memory
        let resp = self
            .send_with_failover(|ep| {
                self.http
                    .get(keys_url(ep, &self.options.root_prefix))
                    .query(&[("recursive", "true"), ("sorted", "true")])
            })
            .await?;
        let decoded = match decode_keys_response(resp).await {
            Ok(decoded) => decoded,
            // empty keyspace
            Err(ScoutError::KeyNotFound) => return Ok(KeyPage::default()),
            Err(err) => return Err(err),
        };

        let kvs = match decoded.node {
            Some(root) => collect_page(&root, from_key, self.options.pagination_limit as usize),
            None => Vec::new(),
        };
        let next_key = kvs.last().map(|kv| kv.key.clone()).unwrap_or_default();
        Ok(KeyPage { kvs, next_key })
    }

    fn start_auditor(&self, mut shutdown: broadcast::Receiver<()>) -> mpsc::Receiver<ScoutError> {
        let (err_tx, err_rx) = mpsc::channel(1);
        let http = self.http.clone();
        let endpoint = self.endpoints[0].clone();
        let period = self.options.audit_period;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            info!("starting etcd v2 connection auditor (period {:?})", period);

            loop {
                tokio::select! {
                    _ = shutdown.recv() => {
                        debug!("stopping etcd v2 connection auditor");
                        return;
                    }
                    // the first tick fires immediately, covering the startup probe
                    _ = ticker.tick() => {
                        if let Err(err) = probe(&http, &endpoint).await {
                            let _ = err_tx
                                .send(ScoutError::Backend(err.context("etcd connection check failed")))
                                .await;
                            return;
                        }
                        debug!("etcd connection check: ok");
                    }
                }
            }
        });

        err_rx
    }

    async fn close(&self) -> Result<()> {
        // the backend is plain HTTP; there is no connection to tear down
        Ok(())
    }
}

/// Fetches a sentinel key that is not expected to exist. Any HTTP reply,
/// including "key not found", proves the server answered; only
/// connectivity-shaped failures fail the probe.
async fn probe(http: &reqwest::Client, endpoint: &Url) -> anyhow::Result<()> {
    let request = http.get(keys_url(endpoint, HEALTH_CHECK_KEY));
    match tokio::time::timeout(AUDIT_PROBE_TIMEOUT, request.send()).await {
        Ok(Ok(_resp)) => Ok(()),
        Ok(Err(err)) => {
            let text = err.to_string();
            if err.is_connect()
                || err.is_timeout()
                || text.contains("connection")
                || text.contains("timeout")
            {
                Err(anyhow!(err).context("failed to connect to etcd"))
            } else {
                Ok(())
            }
        }
        Err(_) => Err(anyhow!(
            "etcd health probe timed out after {:?}",
            AUDIT_PROBE_TIMEOUT
        )),
    }
}

/// Watch producer task: long-polls `/v2/keys` with `waitIndex` and owns the
/// cursor state machine.
struct WatchWorker {
    http: reqwest::Client,
    endpoint: Url,
    prefix: String,
    cursor: WatchCursor,
    /// `waitIndex` for the next poll; `None` waits for the next future event.
    poll_index: Option<u64>,
}

impl WatchWorker {
    async fn run(
        mut self,
        event_tx: mpsc::Sender<WatchEvent>,
        err_tx: mpsc::Sender<ScoutError>,
        mut shutdown: broadcast::Receiver<()>,
    ) {
        loop {
            let polled = tokio::select! {
                _ = shutdown.recv() => return,
                polled = self.poll_once() => polled,
            };

            let decoded = match polled {
                Ok(decoded) => decoded,
                Err(err) => {
                    let _ = err_tx
                        .send(ScoutError::Backend(
                            anyhow::Error::new(err).context("watch error"),
                        ))
                        .await;
                    return;
                }
            };

            let Some(node) = decoded.node else { continue };

            match self.cursor.observe(node.modified_index) {
                WatchStep::Deliver => {
                    self.poll_index = Some(node.modified_index + 1);
                    // unknown actions consume their cursor slot but are not
                    // delivered downstream
                    let Some(event) = map_action(&decoded.action, node.key, node.value) else {
                        debug!(action = %decoded.action, "skipping unknown etcd v2 action");
                        continue;
                    };
                    tokio::select! {
                        _ = shutdown.recv() => return,
                        sent = event_tx.send(event) => {
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
                        observed = node.modified_index,
                        "modified index mismatch, reopening watch"
                    );
                    self.poll_index = self.cursor.resubscribed();
                }
                WatchStep::Terminate { expected, failures } => {
                    let _ = err_tx
                        .send(ScoutError::Backend(anyhow!(
                            "exceeded max watch retries ({failures}) on index {expected}"
                        )))
                        .await;
                    return;
                }
            }
        }
    }

    /// One long poll; held open by the server until a change arrives.
    async fn poll_once(&self) -> Result<KeysResponse> {
        let mut request = self
            .http
            .get(keys_url(&self.endpoint, &self.prefix))
            .query(&[("wait", "true"), ("recursive", "true")]);
        if let Some(index) = self.poll_index {
            request = request.query(&[("waitIndex", index.to_string())]);
        }
        let resp = request
            .send()
            .await
            .map_err(|err| ScoutError::Backend(anyhow!(err).context("watch request failed")))?;
        decode_keys_response(resp).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn leaf(key: &str, value: &str, index: u64) -> Node {
        Node {
            key: key.to_string(),
            value: Some(value.to_string()),
            dir: false,
            nodes: None,
            modified_index: index,
        }
    }

    fn dir(key: &str, children: Vec<Node>) -> Node {
        Node {
            key: key.to_string(),
            value: None,
            dir: true,
            nodes: Some(children),
            modified_index: 0,
        }
    }

    #[test]
    fn pages_a_flat_tree_to_exhaustion() {
        let root = dir(
            "/",
            vec![leaf("/a", "1", 1), leaf("/b", "2", 2), leaf("/c", "3", 3)],
        );

        let first = collect_page(&root, "", 2);
        assert_eq!(first, vec![Kv::new("/a", "1"), Kv::new("/b", "2")]);

        let second = collect_page(&root, "/b", 2);
        assert_eq!(second, vec![Kv::new("/c", "3")]);

        let third = collect_page(&root, "/c", 2);
        assert!(third.is_empty());
    }

    #[test]
    fn descends_into_directories_in_order() {
        let root = dir(
            "/",
            vec![
                leaf("/a", "1", 1),
                dir("/nested", vec![leaf("/nested/x", "10", 4), leaf("/nested/y", "11", 5)]),
                leaf("/z", "26", 6),
            ],
        );

        let all = collect_page(&root, "", 10);
        let keys: Vec<&str> = all.iter().map(|kv| kv.key.as_str()).collect();
        assert_eq!(keys, vec!["/a", "/nested/x", "/nested/y", "/z"]);
    }

    #[test]
    fn from_key_is_exclusive_across_directories() {
        let root = dir(
            "/",
            vec![
                leaf("/a", "1", 1),
                dir("/nested", vec![leaf("/nested/x", "10", 4)]),
                leaf("/z", "26", 6),
            ],
        );

        let page = collect_page(&root, "/nested/x", 10);
        assert_eq!(page, vec![Kv::new("/z", "26")]);
    }

    #[test]
    fn limit_stops_mid_directory() {
        let root = dir(
            "/",
            vec![dir(
                "/nested",
                vec![
                    leaf("/nested/a", "1", 1),
                    leaf("/nested/b", "2", 2),
                    leaf("/nested/c", "3", 3),
                ],
            )],
        );

        let page = collect_page(&root, "", 2);
        assert_eq!(page.len(), 2);
        assert_eq!(page[1].key, "/nested/b");
    }

    #[test]
    fn unknown_from_key_skips_everything() {
        let root = dir("/", vec![leaf("/a", "1", 1), leaf("/b", "2", 2)]);
        // a from_key that is never seen leaves the traversal skipping forever
        let page = collect_page(&root, "/missing", 10);
        assert!(page.is_empty());
    }

    #[test]
    fn empty_directory_yields_an_empty_page() {
        let root = dir("/", vec![]);
        assert!(collect_page(&root, "", 10).is_empty());
    }

    #[test]
    fn maps_put_and_delete_actions() {
        let put = map_action("set", "/k".to_string(), Some("v".to_string()));
        assert_eq!(
            put,
            Some(WatchEvent::Put {
                key: "/k".to_string(),
                value: "v".to_string()
            })
        );

        let expired = map_action("expire", "/k".to_string(), None);
        assert_eq!(
            expired,
            Some(WatchEvent::Delete {
                key: "/k".to_string()
            })
        );

        assert_eq!(map_action("hidden", "/k".to_string(), None), None);
    }

    #[test]
    fn deserializes_a_nested_keys_response() {
        let body = r#"{
            "action": "get",
            "node": {
                "key": "/apps",
                "dir": true,
                "nodes": [
                    {"key": "/apps/web", "value": "running", "modifiedIndex": 12},
                    {"key": "/apps/jobs", "dir": true, "nodes": [
                        {"key": "/apps/jobs/cron", "value": "idle", "modifiedIndex": 13}
                    ]}
                ]
            }
        }"#;
        let decoded: KeysResponse = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.action, "get");
        let root = decoded.node.unwrap();
        assert!(root.dir);
        let page = collect_page(&root, "", 10);
        assert_eq!(page, vec![Kv::new("/apps/web", "running"), Kv::new("/apps/jobs/cron", "idle")]);
    }

    #[test]
    fn deserializes_error_bodies() {
        let body = r#"{"errorCode":100,"message":"Key not found","cause":"/x","index":7}"#;
        let decoded: ApiError = serde_json::from_str(body).unwrap();
        assert_eq!(decoded.error_code, CODE_KEY_NOT_FOUND);
        assert_eq!(decoded.message, "Key not found");
    }

    #[test]
    fn builds_key_urls_under_the_v2_root() {
        let endpoint = Url::parse("http://127.0.0.1:2379").unwrap();
        assert_eq!(
            keys_url(&endpoint, "/apps/web").as_str(),
            "http://127.0.0.1:2379/v2/keys/apps/web"
        );
        assert_eq!(
            keys_url(&endpoint, "bare").as_str(),
            "http://127.0.0.1:2379/v2/keys/bare"
        );
    }
}
