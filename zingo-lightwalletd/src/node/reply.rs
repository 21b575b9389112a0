//! Typed zcashd replies and request arguments.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// `getblockchaininfo` reply.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    /// Network name, e.g. `main` or `regtest`.
    pub chain: String,
    /// Network upgrades keyed by upgrade id.
    #[serde(default)]
    pub upgrades: BTreeMap<String, UpgradeInfo>,
    /// Height of the best validated block.
    #[serde(default)]
    pub blocks: i64,
    /// Height of the best known header.
    #[serde(default)]
    pub headers: i64,
    /// Consensus branch ids.
    #[serde(default)]
    pub consensus: ConsensusInfo,
}

/// Activation data of one network upgrade.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct UpgradeInfo {
    /// Activation height.
    #[serde(rename = "activationheight")]
    pub activation_height: u64,
}

/// Branch ids of the tip and the next block.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ConsensusInfo {
    /// Branch id at the tip.
    pub chaintip: String,
    /// Branch id of the next block.
    pub nextblock: String,
}

/// Verbose `getrawtransaction` reply, reduced to the fields served.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct RawTransactionInfo {
    /// Hex encoded transaction.
    pub hex: String,
    /// Mined height, absent for mempool transactions.
    #[serde(default)]
    pub height: i64,
}

/// Address list argument of the address index calls.
#[derive(Clone, Debug, Serialize)]
pub struct AddressesArg {
    /// Transparent addresses.
    pub addresses: Vec<String>,
}

/// `getaddresstxids` argument.
#[derive(Clone, Debug, Serialize)]
pub struct AddressTxidsArg {
    /// Transparent addresses.
    pub addresses: Vec<String>,
    /// First height, inclusive.
    pub start: u64,
    /// Last height, inclusive.
    pub end: u64,
}

/// `getaddressbalance` reply.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AddressBalance {
    /// Balance in zatoshis.
    pub balance: i64,
}

/// One entry of the `getaddressutxos` reply.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct AddressUtxo {
    /// Owning address.
    pub address: String,
    /// Txid in display order.
    pub txid: String,
    /// Output index.
    #[serde(rename = "outputIndex")]
    pub output_index: i64,
    /// Hex encoded script.
    pub script: String,
    /// Value in zatoshis.
    pub satoshis: u64,
    /// Mined height.
    pub height: i64,
}

/// `z_gettreestate` reply.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct TreeStateInfo {
    /// Block hash in display order.
    pub hash: String,
    /// Block height.
    pub height: i64,
    /// Block time.
    pub time: u32,
    /// Sapling tree.
    #[serde(default)]
    pub sapling: PoolTreeState,
    /// Orchard tree.
    #[serde(default)]
    pub orchard: PoolTreeState,
}

/// Tree state of one shielded pool.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PoolTreeState {
    /// Earlier block holding the same tree, set when the tree is unchanged.
    #[serde(rename = "skipHash", default)]
    pub skip_hash: String,
    /// Serialised frontier.
    #[serde(default)]
    pub commitments: Commitments,
}

/// Serialised commitment tree frontier.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Commitments {
    /// Hex encoded frontier.
    #[serde(rename = "finalState", default)]
    pub final_state: String,
}
