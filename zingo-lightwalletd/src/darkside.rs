//! Darkside mode: a synthetic chain driven by a test harness, standing in for
//! the node behind the [`NodeRpc`] gateway.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;
use tonic::Status;
use zcash_primitives::transaction::TxId;

use crate::block::BlockError;
use crate::cache::{BlockCache, Ingestor};
use crate::node::{NodeRpc, RpcError};

mod dispatch;
pub mod state;
pub mod synthetic;

pub use state::ChainState;

/// Darkside errors.
#[derive(Debug, thiserror::Error)]
pub enum DarksideError {
    /// Mutation before the first reset.
    #[error("please call Reset first")]
    NotReset,
    /// Branch id is not hex.
    #[error("invalid branch id. {0}")]
    InvalidBranchId(String),
    /// Chain name is not alphanumeric.
    #[error("invalid chain name. {0}")]
    InvalidChainName(String),
    /// Negative height.
    #[error("invalid height. {0}")]
    InvalidHeight(i64),
    /// Malformed block, or a block at its transaction ceiling.
    #[error("block error. {0}")]
    Block(#[from] BlockError),
    /// Malformed transaction.
    #[error("invalid transaction. {0}")]
    Transaction(#[from] std::io::Error),
    /// Malformed hex.
    #[error("hex decode error. {0}")]
    Hex(#[from] hex::FromHexError),
    /// Staged transaction targets a height outside the active chain.
    #[error("transaction height {height} is outside the active chain [{start}, {end})")]
    TransactionOutOfRange {
        /// Target height.
        height: u64,
        /// First active height.
        start: u64,
        /// One past the last active height.
        end: u64,
    },
    /// Fetching a block or transaction file failed.
    #[error("fetch error. {0}")]
    Fetch(#[from] reqwest::Error),
    /// The file server answered with a not found page.
    #[error("{0}")]
    SourceNotFound(String),
}

impl From<DarksideError> for Status {
    fn from(error: DarksideError) -> Self {
        let message = error.to_string();
        match error {
            DarksideError::NotReset => Status::failed_precondition(message),
            DarksideError::Block(BlockError::TransactionLimit(_)) => {
                Status::resource_exhausted(message)
            }
            DarksideError::TransactionOutOfRange { .. } => Status::out_of_range(message),
            DarksideError::Fetch(_) => Status::unavailable(message),
            DarksideError::SourceNotFound(_) => Status::not_found(message),
            DarksideError::InvalidBranchId(_)
            | DarksideError::InvalidChainName(_)
            | DarksideError::InvalidHeight(_)
            | DarksideError::Block(_)
            | DarksideError::Transaction(_)
            | DarksideError::Hex(_) => Status::invalid_argument(message),
        }
    }
}

/// Converts a wire height, rejecting negatives.
pub fn height_from_i32(height: i32) -> Result<u64, DarksideError> {
    u64::try_from(height).map_err(|_| DarksideError::InvalidHeight(i64::from(height)))
}

/// The darkside chain shared by the gRPC handlers and the block ingestor.
pub struct Darkside {
    state: RwLock<ChainState>,
    cache: Arc<BlockCache>,
    ingestor: Ingestor,
    http: reqwest::Client,
}

impl Darkside {
    /// Creates an un-reset chain feeding `cache`.
    pub fn new(cache: Arc<BlockCache>, ingestor: Ingestor) -> Self {
        Self {
            state: RwLock::new(ChainState::default()),
            cache,
            ingestor,
            http: reqwest::Client::new(),
        }
    }

    /// Starts a new session. Stops the ingestor and restarts the block cache
    /// at `sapling_activation`.
    pub async fn reset(
        &self,
        sapling_activation: u64,
        branch_id: &str,
        chain_name: &str,
    ) -> Result<(), DarksideError> {
        self.state
            .write()
            .await
            .reset(sapling_activation, branch_id, chain_name)?;
        self.ingestor.stop();
        self.cache.reset(sapling_activation);
        tracing::info!("darkside reset: activation {sapling_activation}, branch {branch_id}, chain {chain_name}");
        Ok(())
    }

    /// See [`ChainState::stage_blocks`].
    pub async fn stage_blocks<I, B>(&self, raw_blocks: I) -> Result<(), DarksideError>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        self.state.write().await.stage_blocks(raw_blocks)
    }

    /// Stages every block of a text file holding one hex block per line.
    pub async fn stage_blocks_from_url(&self, url: &str) -> Result<(), DarksideError> {
        if !self.state.read().await.is_reset() {
            return Err(DarksideError::NotReset);
        }
        let blocks = self.fetch_hex_lines(url).await?;
        self.stage_blocks(blocks).await
    }

    /// See [`ChainState::stage_synthetic`].
    pub async fn stage_synthetic(&self, start_height: u64, nonce: i32, count: u64) -> Result<(), DarksideError> {
        self.state
            .write()
            .await
            .stage_synthetic(start_height, nonce, count)
    }

    /// See [`ChainState::stage_transaction`].
    pub async fn stage_transaction(&self, height: u64, raw_transaction: Vec<u8>) -> Result<(), DarksideError> {
        self.state
            .write()
            .await
            .stage_transaction(height, raw_transaction)
    }

    /// Stages every transaction of a text file holding one hex transaction
    /// per line, all for the block at `height`.
    pub async fn stage_transactions_from_url(&self, height: u64, url: &str) -> Result<(), DarksideError> {
        if !self.state.read().await.is_reset() {
            return Err(DarksideError::NotReset);
        }
        let transactions = self.fetch_hex_lines(url).await?;
        let mut state = self.state.write().await;
        for transaction in transactions {
            state.stage_transaction(height, transaction)?;
        }
        Ok(())
    }

    /// Commits the staging area, then runs the ingestor while there is chain
    /// to ingest.
    pub async fn commit(self: &Arc<Self>, height: u64) -> Result<(), DarksideError> {
        let has_blocks = {
            let mut state = self.state.write().await;
            state.commit(height)?;
            !state.active_blocks().is_empty()
        };

        if has_blocks {
            self.ingestor.start(self.clone());
        } else {
            self.ingestor.stop();
        }
        Ok(())
    }

    /// Transactions submitted by the wallet, oldest first.
    pub async fn incoming(&self) -> Vec<Vec<u8>> {
        self.state.read().await.incoming().to_vec()
    }

    /// Forgets submitted transactions.
    pub async fn clear_incoming(&self) {
        self.state.write().await.clear_incoming();
    }

    /// See [`ChainState::record_incoming`].
    pub async fn record_incoming(&self, raw_transaction: Vec<u8>) -> Result<TxId, DarksideError> {
        self.state.write().await.record_incoming(raw_transaction)
    }

    /// Current tip, `None` before the first commit.
    pub async fn latest_height(&self) -> Option<u64> {
        self.state.read().await.latest_height()
    }

    async fn fetch_hex_lines(&self, url: &str) -> Result<Vec<Vec<u8>>, DarksideError> {
        let body = self.http.get(url).send().await?.text().await?;
        parse_hex_lines(&body)
    }
}

fn parse_hex_lines(body: &str) -> Result<Vec<Vec<u8>>, DarksideError> {
    let mut decoded = Vec::new();
    for line in body.lines().map(str::trim).filter(|line| !line.is_empty()) {
        if line == "404: Not Found" {
            return Err(DarksideError::SourceNotFound(line.to_string()));
        }
        decoded.push(hex::decode(line)?);
    }
    Ok(decoded)
}

#[async_trait]
impl NodeRpc for Darkside {
    async fn raw_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        tracing::debug!("darkside rpc: {method}");
        if method == "sendrawtransaction" {
            let mut state = self.state.write().await;
            dispatch::send_raw_transaction(&mut state, &params)
        } else {
            let state = self.state.read().await;
            dispatch::dispatch(&state, method, &params)
        }
    }
}
