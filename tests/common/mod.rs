//! Shared in-memory backends for integration tests.

#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use etcdscout::error::{Result, ScoutError};
use etcdscout::etcd::EtcdClient;
use etcdscout::kvstore::KvStore;
use etcdscout::types::{KeyPage, Kv, WatchEvent};

/// In-memory etcd standing in for a real cluster. The change stream is
/// scripted: tests hand in pre-filled channels via `with_stream`.
pub struct FakeEtcd {
    pub data: Mutex<BTreeMap<String, String>>,
    page_limit: usize,
    pub fail_pages: AtomicBool,
    stream: Mutex<Option<(mpsc::Receiver<WatchEvent>, mpsc::Receiver<ScoutError>)>>,
}

impl FakeEtcd {
    pub fn new(page_limit: usize) -> Self {
        Self {
            data: Mutex::new(BTreeMap::new()),
            page_limit,
            fail_pages: AtomicBool::new(false),
            stream: Mutex::new(None),
        }
    }

    pub fn seeded(page_limit: usize, entries: &[(&str, &str)]) -> Self {
        let fake = Self::new(page_limit);
        {
            let mut data = fake.data.lock().unwrap();
            for (key, value) in entries {
                data.insert(key.to_string(), value.to_string());
            }
        }
        fake
    }

    /// Script the channels the next `watch` call hands out.
    pub fn with_stream(
        self,
        events: mpsc::Receiver<WatchEvent>,
        errors: mpsc::Receiver<ScoutError>,
    ) -> Self {
        *self.stream.lock().unwrap() = Some((events, errors));
        self
    }

    pub fn contents(&self) -> BTreeMap<String, String> {
        self.data.lock().unwrap().clone()
    }
}

#[async_trait]
impl EtcdClient for FakeEtcd {
    async fn get(&self, key: &str) -> Result<String> {
        match self.data.lock().unwrap().get(key) {
            Some(value) => Ok(value.clone()),
            None => Err(ScoutError::KeyNotFound),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<String> {
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(key.to_string())
    }

    async fn delete(&self, key: &str) -> Result<String> {
        match self.data.lock().unwrap().remove(key) {
            Some(_) => Ok(key.to_string()),
            None => Ok(String::new()),
        }
    }

    fn watch(
        &self,
        _shutdown: broadcast::Receiver<()>,
    ) -> (mpsc::Receiver<WatchEvent>, mpsc::Receiver<ScoutError>) {
        match self.stream.lock().unwrap().take() {
            Some(pair) => pair,
            None => {
                // no script: both channels close immediately
                let (_, events) = mpsc::channel(1);
                let (_, errors) = mpsc::channel(1);
                (events, errors)
            }
        }
    }

    async fn keys_page(&self, from_key: &str) -> Result<KeyPage> {
        if self.fail_pages.load(Ordering::Relaxed) {
            return Err(anyhow!("etcd unavailable").into());
        }
        let data = self.data.lock().unwrap();
        let kvs: Vec<Kv> = data
            .iter()
            .filter(|(key, _)| key.as_str() > from_key)
            .take(self.page_limit)
            .map(|(key, value)| Kv::new(key.clone(), value.clone()))
            .collect();
        let next_key = kvs.last().map(|kv| kv.key.clone()).unwrap_or_default();
        Ok(KeyPage { kvs, next_key })
    }

    fn start_auditor(&self, _shutdown: broadcast::Receiver<()>) -> mpsc::Receiver<ScoutError> {
        let (_, errors) = mpsc::channel(1);
        errors
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// In-memory index supporting substring search over keys.
#[derive(Default)]
pub struct FakeStore {
    pub data: Mutex<BTreeMap<String, String>>,
    pub puts: AtomicU64,
}

impl FakeStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn contents(&self) -> BTreeMap<String, String> {
        self.data.lock().unwrap().clone()
    }
}

#[async_trait]
impl KvStore for FakeStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        self.puts.fetch_add(1, Ordering::Relaxed);
        self.data
            .lock()
            .unwrap()
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.data.lock().unwrap().remove(key);
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<Kv>> {
        Ok(self
            .data
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.contains(query))
            .map(|(key, value)| Kv::new(key.clone(), value.clone()))
            .collect())
    }

    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
