//! Node RPC gateway.
//!
//! Every frontend handler talks to the chain through [`NodeRpc`]. In normal
//! operation that is a zcashd JSON-RPC endpoint; in darkside mode the
//! synthetic chain answers the same calls.

use async_trait::async_trait;
use serde_json::{Value, json};
use tonic::Status;

use crate::block::{BlockError, ChainBlock};

mod json_rpc;
pub mod reply;

pub use json_rpc::JsonRpcConnector;

/// zcashd error code for an unknown transaction or address.
pub const RPC_INVALID_ADDRESS_OR_KEY: i64 = -5;
/// zcashd error code for a parameter outside the valid range, e.g. a height
/// above the tip.
pub const RPC_INVALID_PARAMETER: i64 = -8;

/// Node RPC errors.
#[derive(Debug, thiserror::Error)]
pub enum RpcError {
    /// Error reported by the node itself.
    #[error("{code}: {message}")]
    Node {
        /// Numeric node error code.
        code: i64,
        /// Node error message.
        message: String,
    },
    /// The method is not served.
    #[error("there was an attempt to call an unsupported RPC. {0}")]
    Unsupported(String),
    /// Malformed request parameters.
    #[error("invalid params. {0}")]
    InvalidParams(String),
    /// The darkside chain has not been reset.
    #[error("please call Reset first")]
    NotReset,
    /// Transport failure.
    #[error("request error. {0}")]
    Request(#[from] reqwest::Error),
    /// Malformed JSON.
    #[error("json error. {0}")]
    Json(#[from] serde_json::Error),
    /// Malformed hex in a reply.
    #[error("hex decode error. {0}")]
    Hex(#[from] hex::FromHexError),
    /// Malformed block in a reply.
    #[error("block error. {0}")]
    Block(#[from] BlockError),
}

impl RpcError {
    /// Error with a node error code.
    pub fn node(code: i64, message: impl Into<String>) -> Self {
        Self::Node {
            code,
            message: message.into(),
        }
    }

    /// Node error code, if the node produced the error.
    pub fn code(&self) -> Option<i64> {
        match self {
            Self::Node { code, .. } => Some(*code),
            _ => None,
        }
    }
}

impl From<RpcError> for Status {
    fn from(error: RpcError) -> Self {
        let message = error.to_string();
        match error {
            RpcError::Node { code, .. }
                if code == RPC_INVALID_ADDRESS_OR_KEY || code == RPC_INVALID_PARAMETER =>
            {
                Status::not_found(message)
            }
            RpcError::Node { .. } => Status::unknown(message),
            RpcError::Unsupported(_) => Status::unimplemented(message),
            RpcError::InvalidParams(_) => Status::invalid_argument(message),
            RpcError::NotReset => Status::failed_precondition(message),
            RpcError::Request(_) => Status::unavailable(message),
            RpcError::Json(_) | RpcError::Hex(_) | RpcError::Block(_) => Status::internal(message),
        }
    }
}

/// A JSON-RPC speaking chain backend.
#[async_trait]
pub trait NodeRpc: Send + Sync {
    /// Issues `method` with positional `params` and returns the `result` value.
    async fn raw_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError>;
}

/// Fetches and decodes the block at `height`. `None` when the node has no
/// block there yet.
pub async fn fetch_block(node: &dyn NodeRpc, height: u64) -> Result<Option<ChainBlock>, RpcError> {
    let result = node
        .raw_request("getblock", vec![json!(height.to_string()), json!(0)])
        .await;
    let value = match result {
        Ok(value) => value,
        Err(error) if error.code() == Some(RPC_INVALID_PARAMETER) => return Ok(None),
        Err(error) => return Err(error),
    };

    let block_hex: String = serde_json::from_value(value)?;
    let block = ChainBlock::parse(&hex::decode(block_hex)?)?;
    Ok(Some(block))
}

/// Reads the current chain description.
pub async fn blockchain_info(node: &dyn NodeRpc) -> Result<reply::BlockchainInfo, RpcError> {
    let value = node.raw_request("getblockchaininfo", Vec::new()).await?;
    Ok(serde_json::from_value(value)?)
}
