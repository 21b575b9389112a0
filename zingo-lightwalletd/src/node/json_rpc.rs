//! zcashd JSON-RPC client.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{NodeRpc, RpcError};
use crate::config::NodeConfig;

#[derive(Serialize)]
struct Request<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: Vec<Value>,
}

#[derive(Deserialize)]
struct Response {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ResponseError>,
}

#[derive(Deserialize)]
struct ResponseError {
    code: i64,
    message: String,
}

/// Gateway to a real node over HTTP.
pub struct JsonRpcConnector {
    client: reqwest::Client,
    config: NodeConfig,
    next_id: AtomicU64,
}

impl JsonRpcConnector {
    /// Creates a connector for the configured node.
    pub fn new(config: NodeConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            config,
            next_id: AtomicU64::new(1),
        }
    }
}

#[async_trait]
impl NodeRpc for JsonRpcConnector {
    async fn raw_request(&self, method: &str, params: Vec<Value>) -> Result<Value, RpcError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("rpc {id}: {method}");

        // zcashd answers errors with a 500 status and a JSON body, so the
        // status code is not inspected
        let response: Response = self
            .client
            .post(self.config.rpc_uri.to_string())
            .basic_auth(&self.config.rpc_user, Some(&self.config.rpc_password))
            .json(&Request {
                jsonrpc: "1.0",
                id,
                method,
                params,
            })
            .send()
            .await?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(RpcError::node(error.code, error.message));
        }
        Ok(response.result.unwrap_or(Value::Null))
    }
}
