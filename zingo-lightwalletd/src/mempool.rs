//! Snapshot of the node's mempool in compact form.
//!
//! A refresh replaces the whole snapshot. Entries for transactions that were
//! already known are carried over, so only new transactions are fetched and
//! decoded.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tokio::time::Instant;
use tonic::Status;

use crate::block::{compact_transaction, has_shielded_elements, read_transaction};
use crate::node::reply::RawTransactionInfo;
use crate::node::{NodeRpc, RpcError};
use crate::proto::CompactTx;

pub mod filter;

/// Mempool errors.
#[derive(Debug, thiserror::Error)]
pub enum MempoolError {
    /// Node error.
    #[error("rpc error. {0}")]
    Rpc(#[from] RpcError),
    /// Malformed node reply.
    #[error("json error. {0}")]
    Json(#[from] serde_json::Error),
    /// Malformed transaction hex.
    #[error("hex decode error. {0}")]
    Hex(#[from] hex::FromHexError),
    /// Malformed transaction.
    #[error("transaction decode error. {0}")]
    Transaction(#[from] std::io::Error),
}

impl From<MempoolError> for Status {
    fn from(error: MempoolError) -> Self {
        match error {
            MempoolError::Rpc(error) => error.into(),
            error => Status::internal(error.to_string()),
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawTransactionReply {
    Hex(String),
    Verbose(RawTransactionInfo),
}

impl RawTransactionReply {
    fn into_hex(self) -> String {
        match self {
            Self::Hex(hex) => hex,
            Self::Verbose(info) => info.hex,
        }
    }
}

/// Mempool ids with their compact forms. Transparent-only transactions have a
/// `None` entry: known, never sent.
#[derive(Debug, Default)]
pub struct MempoolSnapshot {
    ids: Vec<String>,
    entries: HashMap<String, Option<Arc<CompactTx>>>,
}

impl MempoolSnapshot {
    /// Ids as reported by the node, display order hex.
    pub fn ids(&self) -> &[String] {
        &self.ids
    }

    /// Entry for `id`. `None` if the id is unknown or its fetch failed.
    pub fn entry(&self, id: &str) -> Option<&Option<Arc<CompactTx>>> {
        self.entries.get(id)
    }

    #[cfg(test)]
    pub(crate) fn from_entries(entries: Vec<(String, Option<CompactTx>)>) -> Self {
        Self {
            ids: entries.iter().map(|(id, _)| id.clone()).collect(),
            entries: entries
                .into_iter()
                .map(|(id, entry)| (id, entry.map(Arc::new)))
                .collect(),
        }
    }
}

/// Compact transactions surviving a [`MempoolCache::query`], in filter order.
#[derive(Debug)]
pub struct MempoolQuery {
    snapshot: Arc<MempoolSnapshot>,
    ids: std::vec::IntoIter<String>,
}

impl Iterator for MempoolQuery {
    type Item = Arc<CompactTx>;

    fn next(&mut self) -> Option<Self::Item> {
        for id in self.ids.by_ref() {
            if let Some(Some(entry)) = self.snapshot.entry(&id) {
                return Some(entry.clone());
            }
        }
        None
    }
}

/// Time gated cache of the node's mempool.
pub struct MempoolCache {
    node: Arc<dyn NodeRpc>,
    refresh_interval: Duration,
    snapshot: RwLock<Arc<MempoolSnapshot>>,
    last_refresh: Mutex<Option<Instant>>,
}

impl MempoolCache {
    /// Cache refreshing from `node` at most once per `refresh_interval`.
    pub fn new(node: Arc<dyn NodeRpc>, refresh_interval: Duration) -> Self {
        Self {
            node,
            refresh_interval,
            snapshot: RwLock::new(Arc::new(MempoolSnapshot::default())),
            last_refresh: Mutex::new(None),
        }
    }

    /// Current snapshot.
    pub fn snapshot(&self) -> Arc<MempoolSnapshot> {
        self.snapshot
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn replace_snapshot(&self, snapshot: MempoolSnapshot) {
        *self
            .snapshot
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Arc::new(snapshot);
    }

    /// Empties the snapshot. The next refresh runs immediately.
    pub fn clear(&self) {
        self.replace_snapshot(MempoolSnapshot::default());
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = None;
    }

    /// Rebuilds the snapshot from the node unless the last refresh is still
    /// within the refresh window.
    pub async fn refresh(&self) -> Result<(), MempoolError> {
        {
            let mut last_refresh = self
                .last_refresh
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(at) = *last_refresh
                && at.elapsed() < self.refresh_interval
            {
                return Ok(());
            }
            *last_refresh = Some(Instant::now());
        }

        let ids: Vec<String> =
            serde_json::from_value(self.node.raw_request("getrawmempool", Vec::new()).await?)?;
        let previous = self.snapshot();

        let mut entries = HashMap::with_capacity(ids.len());
        for id in &ids {
            if let Some(entry) = previous.entries.get(id) {
                entries.insert(id.clone(), entry.clone());
                continue;
            }

            let reply = match self
                .node
                .raw_request("getrawtransaction", vec![json!(id), json!(0)])
                .await
            {
                Ok(reply) => reply,
                Err(e) => {
                    // evicted between the two calls
                    tracing::debug!("skipping mempool transaction {id}: {e}");
                    continue;
                }
            };
            let raw_hex = serde_json::from_value::<RawTransactionReply>(reply)?.into_hex();
            let transaction = read_transaction(&hex::decode(raw_hex)?)?;
            let entry = has_shielded_elements(&transaction)
                .then(|| Arc::new(compact_transaction(0, &transaction)));
            entries.insert(id.clone(), entry);
        }

        tracing::debug!("mempool refreshed: {} transactions", ids.len());
        self.replace_snapshot(MempoolSnapshot { ids, entries });
        Ok(())
    }

    /// Refreshes, then returns the shielded mempool transactions the caller
    /// does not hold. `exclude` holds little-endian txids, possibly truncated.
    pub async fn query(&self, exclude: &[Vec<u8>]) -> Result<MempoolQuery, MempoolError> {
        self.refresh().await?;
        let snapshot = self.snapshot();

        let exclude: Vec<String> = exclude
            .iter()
            .map(|txid| hex::encode(txid.iter().rev().copied().collect::<Vec<u8>>()))
            .collect();
        let ids = filter::exclude_known(snapshot.ids(), &exclude);

        Ok(MempoolQuery {
            snapshot,
            ids: ids.into_iter(),
        })
    }

    #[cfg(test)]
    pub(crate) fn set_snapshot(&self, snapshot: MempoolSnapshot) {
        self.replace_snapshot(snapshot);
        *self
            .last_refresh
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(Instant::now());
    }
}
