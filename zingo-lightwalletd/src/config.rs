//! Server configuration and the constants shared across the proxy.

use std::net::SocketAddr;
use std::time::Duration;

/// Default address the gRPC frontend listens on.
pub const DEFAULT_GRPC_BIND_ADDR: &str = "127.0.0.1:9067";
/// Default zcashd JSON-RPC endpoint.
pub const DEFAULT_NODE_RPC_URI: &str = "http://127.0.0.1:8232";
/// Upgrade id of the sapling network upgrade in `getblockchaininfo` replies.
pub const SAPLING_UPGRADE_ID: &str = "76b809bb";
/// Mempool snapshots are refreshed at most once per window.
pub const MEMPOOL_REFRESH_INTERVAL: Duration = Duration::from_secs(2);
/// Upper bound on producing a whole block range or txid stream.
pub const STREAM_TIMEOUT: Duration = Duration::from_secs(30);
/// Darkside servers shut themselves down after this long.
pub const DEFAULT_DARKSIDE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
/// Idle interval of the block ingestor.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Vendor string reported by `GetLightdInfo`.
pub const VENDOR: &str = "ZingoLabs LightWalletD";

/// Credentials and location of the backing full node.
#[derive(Clone, Debug)]
pub struct NodeConfig {
    /// JSON-RPC endpoint.
    pub rpc_uri: http::Uri,
    /// RPC user name.
    pub rpc_user: String,
    /// RPC password.
    pub rpc_password: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            rpc_uri: http::Uri::from_static(DEFAULT_NODE_RPC_URI),
            rpc_user: String::new(),
            rpc_password: String::new(),
        }
    }
}

/// Top level server configuration.
#[derive(Clone, Debug)]
pub struct LightwalletdConfig {
    /// Address the gRPC frontend binds to.
    pub grpc_bind_addr: SocketAddr,
    /// Backing node. Ignored in darkside mode.
    pub node: NodeConfig,
    /// Replace the node with the synthetic darkside chain.
    pub darkside: bool,
    /// Darkside auto-shutdown timer.
    pub darkside_timeout: Duration,
    /// Idle interval of the block ingestor.
    pub poll_interval: Duration,
}

impl Default for LightwalletdConfig {
    fn default() -> Self {
        Self {
            grpc_bind_addr: SocketAddr::from(([127, 0, 0, 1], 9067)),
            node: NodeConfig::default(),
            darkside: false,
            darkside_timeout: DEFAULT_DARKSIDE_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl LightwalletdConfig {
    /// Configuration for a darkside harness listening on `grpc_bind_addr`.
    pub fn darkside(grpc_bind_addr: SocketAddr) -> Self {
        Self {
            grpc_bind_addr,
            darkside: true,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_bind_matches_constant() {
        let config = LightwalletdConfig::default();
        assert_eq!(config.grpc_bind_addr.to_string(), DEFAULT_GRPC_BIND_ADDR);
        assert!(!config.darkside);
    }

    #[test]
    fn darkside_config_enables_mode() {
        let config = LightwalletdConfig::darkside("127.0.0.1:20000".parse().unwrap());
        assert!(config.darkside);
        assert_eq!(config.darkside_timeout, DEFAULT_DARKSIDE_TIMEOUT);
    }
}
