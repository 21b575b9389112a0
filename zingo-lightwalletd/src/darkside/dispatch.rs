//! Answers the node RPCs a light wallet server needs from the synthetic chain.

use std::collections::BTreeMap;

use serde_json::Value;

use super::ChainState;
use crate::config::SAPLING_UPGRADE_ID;
use crate::node::reply::{BlockchainInfo, ConsensusInfo, RawTransactionInfo, UpgradeInfo};
use crate::node::{RPC_INVALID_ADDRESS_OR_KEY, RPC_INVALID_PARAMETER, RpcError};

/// Code for a txid argument that does not decode.
const TXID_DECODE_ERROR: i64 = -9;

/// Read-only methods.
pub(super) fn dispatch(state: &ChainState, method: &str, params: &[Value]) -> Result<Value, RpcError> {
    match method {
        "getblockchaininfo" => blockchain_info(state),
        "getblock" => get_block(state, params),
        "getrawtransaction" => get_raw_transaction(state, params),
        _ => Err(RpcError::Unsupported(method.to_string())),
    }
}

fn blockchain_info(state: &ChainState) -> Result<Value, RpcError> {
    let tip = state.latest_height().map_or(-1, |height| height as i64);
    let info = BlockchainInfo {
        chain: state.chain_name().to_string(),
        upgrades: BTreeMap::from([(
            SAPLING_UPGRADE_ID.to_string(),
            UpgradeInfo {
                activation_height: state.sapling_activation(),
            },
        )]),
        blocks: tip,
        headers: tip,
        consensus: ConsensusInfo {
            chaintip: state.branch_id().to_string(),
            nextblock: state.branch_id().to_string(),
        },
    };
    Ok(serde_json::to_value(info)?)
}

fn get_block(state: &ChainState, params: &[Value]) -> Result<Value, RpcError> {
    let height = params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::InvalidParams("failed to parse getblock request".to_string()))?
        .parse::<u64>()
        .map_err(|_| RpcError::InvalidParams("error parsing height as integer".to_string()))?;

    let block = state
        .latest_height()
        .filter(|tip| height <= *tip)
        .and_then(|_| state.active_block(height))
        .ok_or_else(|| RpcError::node(RPC_INVALID_PARAMETER, "Block height out of range"))?;

    Ok(Value::String(hex::encode(block.to_bytes())))
}

fn get_raw_transaction(state: &ChainState, params: &[Value]) -> Result<Value, RpcError> {
    if !state.is_reset() {
        return Err(RpcError::NotReset);
    }
    let txid = params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::InvalidParams("failed to parse getrawtransaction request".to_string()))?;
    if txid.len() != 64 || !txid.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(RpcError::node(TXID_DECODE_ERROR, format!("invalid txid {txid}")));
    }
    let txid = txid.to_ascii_lowercase();

    for block in state.active_blocks() {
        if let Some(transaction) = block
            .transactions()
            .iter()
            .find(|transaction| transaction.txid().to_string() == txid)
        {
            let reply = RawTransactionInfo {
                hex: hex::encode(transaction.data()),
                height: block.height() as i64,
            };
            return Ok(serde_json::to_value(reply)?);
        }
    }

    Err(RpcError::node(
        RPC_INVALID_ADDRESS_OR_KEY,
        "No information available about transaction",
    ))
}

/// Records a submitted transaction without decoding it.
pub(super) fn send_raw_transaction(state: &mut ChainState, params: &[Value]) -> Result<Value, RpcError> {
    let raw_hex = params
        .first()
        .and_then(Value::as_str)
        .ok_or_else(|| RpcError::InvalidParams("failed to parse sendrawtransaction JSON".to_string()))?;
    let raw_transaction = hex::decode(raw_hex).map_err(|_| {
        RpcError::InvalidParams("failed to parse sendrawtransaction value as a hex string".to_string())
    })?;
    state.push_incoming(raw_transaction);
    Ok(Value::Null)
}
