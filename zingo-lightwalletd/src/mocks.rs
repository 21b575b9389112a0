//! Scripted node for unit tests.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use zcash_primitives::block::BlockHash;

use crate::block::{BlockTransaction, ChainBlock};
use crate::node::{NodeRpc, RPC_INVALID_ADDRESS_OR_KEY, RPC_INVALID_PARAMETER, RpcError};

/// Seed bytes of [`sapling_output_transaction`]'s note ciphertext.
pub(crate) fn sapling_ciphertext() -> Vec<u8> {
    (0..580).map(|i| (i % 251) as u8).collect()
}

/// A v5 transaction with no transparent parts and a single sapling output.
/// `marker` is the note commitment, so different markers give different
/// txids. The value commitment is the Jubjub point with v = 3, which is not
/// of small order. Proof and signature bytes are zero and never verified.
pub(crate) fn sapling_output_transaction(marker: u8) -> BlockTransaction {
    let mut data = Vec::new();
    data.extend_from_slice(&0x8000_0005u32.to_le_bytes());
    data.extend_from_slice(&0x26a7_270au32.to_le_bytes());
    // nu5 branch id
    data.extend_from_slice(&0xc2d6_d0b4u32.to_le_bytes());
    // lock time, expiry height, no transparent inputs or outputs
    data.extend_from_slice(&[0; 8]);
    data.extend_from_slice(&[0, 0]);
    // no sapling spends, one output
    data.extend_from_slice(&[0, 1]);
    let mut cv = [0u8; 32];
    cv[0] = 3;
    data.extend_from_slice(&cv);
    let mut cmu = [0u8; 32];
    cmu[0] = marker;
    data.extend_from_slice(&cmu);
    data.extend_from_slice(&[0xee; 32]);
    data.extend_from_slice(&sapling_ciphertext());
    data.extend_from_slice(&[0; 80]);
    // value balance, output proof, binding signature
    data.extend_from_slice(&[0; 8]);
    data.extend_from_slice(&[0; 192]);
    data.extend_from_slice(&[0; 64]);
    // no orchard actions
    data.push(0);
    BlockTransaction::parse(data).unwrap()
}

/// Serves a fixed chain, a fixed mempool and canned replies, counting calls.
#[derive(Default)]
pub(crate) struct ScriptedNode {
    chain: Mutex<Vec<ChainBlock>>,
    mempool: Mutex<Vec<String>>,
    transactions: Mutex<HashMap<String, Vec<u8>>>,
    replies: Mutex<HashMap<String, VecDeque<Value>>>,
    failing: Mutex<HashSet<String>>,
    calls: Mutex<Vec<(String, Vec<Value>)>>,
}

impl ScriptedNode {
    /// Links `blocks` from a zero hash and serves them by height.
    pub(crate) fn set_chain(&self, blocks: &mut [ChainBlock]) {
        let mut prev_hash = BlockHash([0; 32]);
        for block in blocks.iter_mut() {
            block.set_prev_block(prev_hash);
            prev_hash = block.hash();
        }
        *self.chain.lock().unwrap() = blocks.to_vec();
    }

    pub(crate) fn add_mempool(&self, transaction: &BlockTransaction) {
        let id = transaction.txid().to_string();
        self.transactions
            .lock()
            .unwrap()
            .insert(id.clone(), transaction.data().to_vec());
        self.mempool.lock().unwrap().push(id);
    }

    /// An id whose transaction cannot be fetched.
    pub(crate) fn add_mempool_id(&self, id: String) {
        self.mempool.lock().unwrap().push(id);
    }

    pub(crate) fn clear_mempool(&self) {
        self.mempool.lock().unwrap().clear();
    }

    /// Queues a canned reply. The last queued reply repeats.
    pub(crate) fn reply(&self, method: &str, value: Value) {
        self.replies
            .lock()
            .unwrap()
            .entry(method.to_string())
            .or_default()
            .push_back(value);
    }

    pub(crate) fn fail(&self, method: &str) {
        self.failing.lock().unwrap().insert(method.to_string());
    }

    pub(crate) fn calls(&self, method: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == method)
            .count()
    }

    pub(crate) fn params(&self, method: &str) -> Vec<Vec<Value>> {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|(called, _)| called == method)
            .map(|(_, params)| params.clone())
            .collect()
    }
}

#[async_trait]
impl NodeRpc for ScriptedNode {
    async fn raw_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        self.calls
            .lock()
            .unwrap()
            .push((method.to_string(), params.clone()));
        if self.failing.lock().unwrap().contains(method) {
            return Err(RpcError::node(-1, format!("{method} failed")));
        }
        if let Some(queue) = self.replies.lock().unwrap().get_mut(method) {
            let reply = if queue.len() > 1 {
                queue.pop_front()
            } else {
                queue.front().cloned()
            };
            if let Some(reply) = reply {
                return Ok(reply);
            }
        }

        match method {
            "getblock" => {
                let height: u64 = params[0].as_str().unwrap().parse().unwrap();
                self.chain
                    .lock()
                    .unwrap()
                    .iter()
                    .find(|block| block.height() == height)
                    .map(|block| Value::String(hex::encode(block.to_bytes())))
                    .ok_or_else(|| RpcError::node(RPC_INVALID_PARAMETER, "Block height out of range"))
            }
            "getrawmempool" => Ok(Value::from(self.mempool.lock().unwrap().clone())),
            "getrawtransaction" => {
                let id = params[0].as_str().unwrap();
                self.transactions
                    .lock()
                    .unwrap()
                    .get(id)
                    .map(|data| Value::String(hex::encode(data)))
                    .ok_or_else(|| {
                        RpcError::node(
                            RPC_INVALID_ADDRESS_OR_KEY,
                            "No such mempool or blockchain transaction",
                        )
                    })
            }
            _ => Err(RpcError::Unsupported(method.to_string())),
        }
    }
}
