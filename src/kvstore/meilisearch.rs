//! Meilisearch Backend
//!
//! Stores each etcd record as a `{ id, key, value }` document. The document
//! id is a sha-256 digest of the key: Meilisearch ids are restricted to
//! `[a-zA-Z0-9_-]` while etcd keys are opaque strings full of slashes.

use std::fmt::Write as FmtWrite;

use anyhow::{anyhow, Context};
use async_trait::async_trait;
use meilisearch_sdk::client::Client;
use meilisearch_sdk::indexes::Index;
use meilisearch_sdk::search::MatchingStrategies;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::config::MeilisearchConfig;
use crate::error::Result;
use crate::types::Kv;

use super::KvStore;

const PRIMARY_KEY: &str = "id";

#[derive(Debug, Clone, Serialize, Deserialize)]
struct KvDocument {
    id: String,
    key: String,
    value: String,
}

pub struct MeilisearchStore {
    index: Index,
    matching_strategy: MatchingStrategies,
}

impl MeilisearchStore {
    pub fn new(config: &MeilisearchConfig) -> Result<Self> {
        let matching_strategy = parse_matching_strategy(&config.matching_strategy)?;
        let client = Client::new(config.host.as_str(), config.api_key.as_deref())
            .context("failed to create meilisearch client")?;
        Ok(Self {
            index: client.index(&config.index_name),
            matching_strategy,
        })
    }
}

fn parse_matching_strategy(raw: &str) -> Result<MatchingStrategies> {
    match raw {
        "all" => Ok(MatchingStrategies::ALL),
        "last" => Ok(MatchingStrategies::LAST),
        "frequency" => Ok(MatchingStrategies::FREQUENCY),
        other => Err(anyhow!("unsupported matching strategy: {other}").into()),
    }
}

/// Meilisearch document id for an etcd key.
fn document_id(key: &str) -> String {
    let digest = Sha256::digest(key.as_bytes());
    let mut id = String::with_capacity(digest.len() * 2);
    for byte in digest {
        let _ = write!(id, "{byte:02x}");
    }
    id
}

#[async_trait]
impl KvStore for MeilisearchStore {
    async fn put(&self, key: &str, value: &str) -> Result<()> {
        let document = KvDocument {
            id: document_id(key),
            key: key.to_owned(),
            value: value.to_owned(),
        };
        self.index
            .add_documents(&[document], Some(PRIMARY_KEY))
            .await
            .context("failed to index document")?;
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<()> {
        self.index
            .delete_document(document_id(key))
            .await
            .context("failed to delete document")?;
        Ok(())
    }

    async fn search(&self, query: &str) -> Result<Vec<Kv>> {
        let results = self
            .index
            .search()
            .with_query(query)
            .with_matching_strategy(self.matching_strategy.clone())
            .execute::<KvDocument>()
            .await
            .context("search failed")?;
        Ok(results
            .hits
            .into_iter()
            .map(|hit| Kv {
                key: hit.result.key,
                value: hit.result.value,
            })
            .collect())
    }

    async fn close(&self) -> Result<()> {
        // stateless HTTP client; nothing to tear down
        Ok(())
    }
}
