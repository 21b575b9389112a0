//! Compact block cache and the background task that fills it from the node.

use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::node::{self, NodeRpc};
use crate::proto::CompactBlock;

#[derive(Debug, Default)]
struct CacheState {
    first_height: u64,
    blocks: Vec<CompactBlock>,
}

/// Contiguous compact blocks starting at a fixed height.
#[derive(Debug, Default)]
pub struct BlockCache {
    state: RwLock<CacheState>,
}

impl BlockCache {
    /// Empty cache whose first block will be at `first_height`.
    pub fn new(first_height: u64) -> Self {
        Self {
            state: RwLock::new(CacheState {
                first_height,
                blocks: Vec::new(),
            }),
        }
    }

    /// Drops every block and restarts at `first_height`.
    pub fn reset(&self, first_height: u64) {
        let mut state = self.write();
        state.first_height = first_height;
        state.blocks.clear();
    }

    /// Cached block at `height`.
    pub fn get(&self, height: u64) -> Option<CompactBlock> {
        let state = self.read();
        let index = height.checked_sub(state.first_height)?;
        state.blocks.get(usize::try_from(index).ok()?).cloned()
    }

    /// Height the next cached block must have.
    pub fn next_height(&self) -> u64 {
        let state = self.read();
        state.first_height + state.blocks.len() as u64
    }

    /// Height and hash of the last cached block.
    pub fn tip(&self) -> Option<(u64, Vec<u8>)> {
        let state = self.read();
        state
            .blocks
            .last()
            .map(|block| (block.height, block.hash.clone()))
    }

    /// Appends `block` if it is at the next height and extends the cached tip.
    /// Returns whether it was added.
    pub fn push(&self, block: CompactBlock) -> bool {
        let mut state = self.write();
        let next_height = state.first_height + state.blocks.len() as u64;
        let extends_tip = state
            .blocks
            .last()
            .is_none_or(|tip| tip.hash == block.prev_hash);
        if block.height != next_height || !extends_tip {
            return false;
        }
        state.blocks.push(block);
        true
    }

    /// Drops the last cached block.
    pub fn pop_tip(&self) -> Option<CompactBlock> {
        self.write().blocks.pop()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, CacheState> {
        self.state.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, CacheState> {
        self.state.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Owns the task that keeps a [`BlockCache`] in step with a node.
#[derive(Debug)]
pub struct Ingestor {
    cache: Arc<BlockCache>,
    poll_interval: Duration,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Ingestor {
    /// Ingestor for `cache`, idling `poll_interval` between polls at the tip.
    pub fn new(cache: Arc<BlockCache>, poll_interval: Duration) -> Self {
        Self {
            cache,
            poll_interval,
            handle: Mutex::new(None),
        }
    }

    /// (Re)starts ingesting from `node`.
    pub fn start(&self, node: Arc<dyn NodeRpc>) {
        let task = tokio::spawn(ingest(self.cache.clone(), node, self.poll_interval));
        let previous = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .replace(task);
        if let Some(previous) = previous {
            previous.abort();
        }
        tracing::info!("block ingestor started at height {}", self.cache.next_height());
    }

    /// Stops ingesting. No-op when not running.
    pub fn stop(&self) {
        let handle = self
            .handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            handle.abort();
            tracing::info!("block ingestor stopped");
        }
    }

    /// Whether the ingest task is alive.
    pub fn is_running(&self) -> bool {
        self.handle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|handle| !handle.is_finished())
    }
}

impl Drop for Ingestor {
    fn drop(&mut self) {
        self.stop();
    }
}

async fn ingest(cache: Arc<BlockCache>, node: Arc<dyn NodeRpc>, poll_interval: Duration) {
    loop {
        let height = cache.next_height();
        match node::fetch_block(node.as_ref(), height).await {
            Ok(Some(block)) => match block.to_compact() {
                Ok(compact) => {
                    let declared = compact.height;
                    if cache.push(compact) {
                        continue;
                    }
                    if let Some(dropped) = cache.pop_tip() {
                        tracing::warn!("reorg: dropped cached block at height {}", dropped.height);
                        continue;
                    }
                    tracing::warn!("node returned block {declared} when asked for height {height}");
                }
                Err(e) => tracing::warn!("failed to compact block at height {height}: {e}"),
            },
            Ok(None) => verify_tip(&cache, node.as_ref()).await,
            Err(e) => tracing::warn!("failed to fetch block at height {height}: {e}"),
        }
        tokio::time::sleep(poll_interval).await;
    }
}

/// Drops the cached tip if the node no longer has it, e.g. after the chain
/// shrank.
async fn verify_tip(cache: &BlockCache, node: &dyn NodeRpc) {
    let Some((height, hash)) = cache.tip() else {
        return;
    };
    let stale = match node::fetch_block(node, height).await {
        Ok(Some(block)) => block.hash().0.to_vec() != hash,
        Ok(None) => true,
        Err(_) => false,
    };
    if stale {
        cache.pop_tip();
        tracing::warn!("reorg: dropped stale cached block at height {height}");
    }
}
