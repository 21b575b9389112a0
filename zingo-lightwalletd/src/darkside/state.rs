//! The synthetic chain: active blocks, the staging area and the transactions
//! submitted by the wallet under test.

use zcash_primitives::block::BlockHash;
use zcash_primitives::transaction::TxId;

use super::{DarksideError, synthetic};
use crate::block::{BlockTransaction, ChainBlock};

#[derive(Clone, Debug)]
struct StagedTransaction {
    height: u64,
    transaction: BlockTransaction,
}

/// Darkside chain state. One instance serves one test session.
#[derive(Clone, Debug, Default)]
pub struct ChainState {
    resetted: bool,
    start_height: u64,
    sapling_activation: u64,
    branch_id: String,
    chain_name: String,
    latest_height: Option<u64>,
    /// `active_blocks[i]` is at height `start_height + i`.
    active_blocks: Vec<ChainBlock>,
    staged_blocks: Vec<ChainBlock>,
    staged_transactions: Vec<StagedTransaction>,
    incoming_transactions: Vec<Vec<u8>>,
}

impl ChainState {
    /// Discards everything and starts a new session.
    pub fn reset(
        &mut self,
        sapling_activation: u64,
        branch_id: &str,
        chain_name: &str,
    ) -> Result<(), DarksideError> {
        if branch_id.is_empty() || !branch_id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(DarksideError::InvalidBranchId(branch_id.to_string()));
        }
        if chain_name.is_empty() || !chain_name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(DarksideError::InvalidChainName(chain_name.to_string()));
        }

        *self = Self {
            resetted: true,
            sapling_activation,
            branch_id: branch_id.to_string(),
            chain_name: chain_name.to_string(),
            ..Self::default()
        };
        Ok(())
    }

    fn ensure_reset(&self) -> Result<(), DarksideError> {
        if self.resetted {
            Ok(())
        } else {
            Err(DarksideError::NotReset)
        }
    }

    /// Whether `reset` has been called.
    pub fn is_reset(&self) -> bool {
        self.resetted
    }

    /// Stages one serialised block.
    pub fn stage_block(&mut self, raw_block: &[u8]) -> Result<(), DarksideError> {
        self.ensure_reset()?;
        let block = ChainBlock::parse(raw_block)?;
        tracing::debug!("staged block at height {}", block.height());
        self.staged_blocks.push(block);
        Ok(())
    }

    /// Stages blocks in order, stopping at the first malformed one. Blocks
    /// staged before the failure stay staged.
    pub fn stage_blocks<I, B>(&mut self, raw_blocks: I) -> Result<(), DarksideError>
    where
        I: IntoIterator<Item = B>,
        B: AsRef<[u8]>,
    {
        for raw_block in raw_blocks {
            self.stage_block(raw_block.as_ref())?;
        }
        Ok(())
    }

    /// Stages `count` placeholder blocks from `start_height`.
    pub fn stage_synthetic(
        &mut self,
        start_height: u64,
        nonce: i32,
        count: u64,
    ) -> Result<(), DarksideError> {
        self.ensure_reset()?;
        self.staged_blocks
            .extend(synthetic::build_blocks(start_height, nonce, count)?);
        Ok(())
    }

    /// Stages a transaction for the block at `height`. The height is checked
    /// at commit.
    pub fn stage_transaction(&mut self, height: u64, raw_transaction: Vec<u8>) -> Result<(), DarksideError> {
        self.ensure_reset()?;
        let transaction = BlockTransaction::parse(raw_transaction)?;
        self.staged_transactions.push(StagedTransaction {
            height,
            transaction,
        });
        Ok(())
    }

    /// Merges the staging area into the active chain and moves the tip to
    /// `height`.
    ///
    /// The merge runs on a copy of the active chain, so a failed commit leaves
    /// the active chain and tip untouched. The staging area is consumed either
    /// way.
    pub fn commit(&mut self, height: u64) -> Result<(), DarksideError> {
        self.ensure_reset()?;
        let staged_blocks = std::mem::take(&mut self.staged_blocks);
        let staged_transactions = std::mem::take(&mut self.staged_transactions);

        let mut start_height = self.start_height;
        let mut active = self.active_blocks.clone();
        for block in staged_blocks {
            add_block_active(&mut start_height, &mut active, block);
        }

        for staged in staged_transactions {
            let end = start_height + active.len() as u64;
            if staged.height < start_height || staged.height >= end {
                return Err(DarksideError::TransactionOutOfRange {
                    height: staged.height,
                    start: start_height,
                    end,
                });
            }
            active[(staged.height - start_height) as usize].append_transaction(staged.transaction)?;
        }

        relink(&mut active);

        self.start_height = start_height;
        self.active_blocks = active;
        self.latest_height = Some(height);
        tracing::info!(
            "committed {} active blocks from height {}, tip {}",
            self.active_blocks.len(),
            self.start_height,
            height
        );
        Ok(())
    }

    /// Transactions submitted by the wallet, oldest first.
    pub fn incoming(&self) -> &[Vec<u8>] {
        &self.incoming_transactions
    }

    /// Forgets submitted transactions.
    pub fn clear_incoming(&mut self) {
        self.incoming_transactions.clear();
    }

    /// Records a submitted transaction after checking that it decodes.
    pub fn record_incoming(&mut self, raw_transaction: Vec<u8>) -> Result<TxId, DarksideError> {
        self.ensure_reset()?;
        let transaction = BlockTransaction::parse(raw_transaction)?;
        let txid = transaction.txid();
        self.incoming_transactions.push(transaction.data().to_vec());
        Ok(txid)
    }

    /// Records submitted bytes as they are. Nothing is decoded.
    pub fn push_incoming(&mut self, raw_transaction: Vec<u8>) {
        self.incoming_transactions.push(raw_transaction);
    }

    /// Height of `active_blocks()[0]`.
    pub fn start_height(&self) -> u64 {
        self.start_height
    }

    /// Tip presented to callers. `None` until the first commit.
    pub fn latest_height(&self) -> Option<u64> {
        self.latest_height
    }

    /// Active chain, lowest height first.
    pub fn active_blocks(&self) -> &[ChainBlock] {
        &self.active_blocks
    }

    /// Active block at `height`.
    pub fn active_block(&self, height: u64) -> Option<&ChainBlock> {
        let index = height.checked_sub(self.start_height)?;
        self.active_blocks.get(usize::try_from(index).ok()?)
    }

    /// Sapling activation height echoed by chain info.
    pub fn sapling_activation(&self) -> u64 {
        self.sapling_activation
    }

    /// Branch id echoed by chain info.
    pub fn branch_id(&self) -> &str {
        &self.branch_id
    }

    /// Chain name echoed by chain info.
    pub fn chain_name(&self) -> &str {
        &self.chain_name
    }
}

/// Places `block` at its declared height, dropping whatever it replaces.
fn add_block_active(start_height: &mut u64, active: &mut Vec<ChainBlock>, mut block: ChainBlock) {
    let height = block.height();
    let end = *start_height + active.len() as u64;
    if height > end || height < *start_height {
        active.clear();
    } else {
        active.truncate((height - *start_height) as usize);
    }

    match active.last() {
        None => *start_height = height,
        Some(tip) => block.set_prev_block(tip.hash()),
    }
    active.push(block);
}

fn relink(active: &mut [ChainBlock]) {
    let mut prev_hash = BlockHash([0; 32]);
    for block in active.iter_mut() {
        block.set_prev_block(prev_hash);
        prev_hash = block.hash();
    }
}
