//! Wires the gateway, caches and gRPC services together and serves them.

use std::sync::Arc;
use std::time::Duration;

use tonic::transport::Server;

use crate::cache::{BlockCache, Ingestor};
use crate::config::{LightwalletdConfig, MEMPOOL_REFRESH_INTERVAL, SAPLING_UPGRADE_ID};
use crate::darkside::Darkside;
use crate::frontend::{DarksideStreamerService, LightwalletdStreamer};
use crate::mempool::MempoolCache;
use crate::node::{self, JsonRpcConnector, NodeRpc, RpcError};
use crate::proto::compact_tx_streamer_server::CompactTxStreamerServer;
use crate::proto::darkside_streamer_server::DarksideStreamerServer;

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// gRPC transport failure.
    #[error("transport error. {0}")]
    Transport(#[from] tonic::transport::Error),
    /// The node could not be queried at startup.
    #[error("rpc error. {0}")]
    Rpc(#[from] RpcError),
    /// The darkside safety timer fired.
    #[error("darkside mode expired after {0:?}")]
    DarksideExpired(Duration),
}

/// Serves until interrupted, or in darkside mode until the safety timer fires.
pub async fn serve(config: LightwalletdConfig) -> Result<(), ServerError> {
    if config.darkside {
        serve_darkside(config).await
    } else {
        serve_node(config).await
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("failed to listen for ctrl-c: {e}");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}

async fn serve_node(config: LightwalletdConfig) -> Result<(), ServerError> {
    let node: Arc<dyn NodeRpc> = Arc::new(JsonRpcConnector::new(config.node.clone()));
    let info = node::blockchain_info(node.as_ref()).await?;
    let sapling_activation = info
        .upgrades
        .get(SAPLING_UPGRADE_ID)
        .map_or(0, |upgrade| upgrade.activation_height);
    tracing::info!(
        "connected to {} node at height {}, sapling activation {}",
        info.chain,
        info.blocks,
        sapling_activation
    );

    let cache = Arc::new(BlockCache::new(sapling_activation));
    let ingestor = Ingestor::new(cache.clone(), config.poll_interval);
    ingestor.start(node.clone());

    let mempool = Arc::new(MempoolCache::new(node.clone(), MEMPOOL_REFRESH_INTERVAL));
    let streamer = LightwalletdStreamer::new(node, cache, mempool);

    tracing::info!("listening on {}", config.grpc_bind_addr);
    Server::builder()
        .add_service(CompactTxStreamerServer::new(streamer))
        .serve_with_shutdown(config.grpc_bind_addr, shutdown_signal())
        .await?;
    ingestor.stop();
    Ok(())
}

async fn serve_darkside(config: LightwalletdConfig) -> Result<(), ServerError> {
    let cache = Arc::new(BlockCache::default());
    let ingestor = Ingestor::new(cache.clone(), config.poll_interval);
    let darkside = Arc::new(Darkside::new(cache.clone(), ingestor));
    let node: Arc<dyn NodeRpc> = darkside.clone();

    let mempool = Arc::new(MempoolCache::new(node.clone(), MEMPOOL_REFRESH_INTERVAL));
    let streamer = LightwalletdStreamer::new(node, cache, mempool.clone());
    let control = DarksideStreamerService::new(darkside, mempool);

    tracing::warn!(
        "darkside mode: serving a synthetic chain on {}, exiting in {:?}",
        config.grpc_bind_addr,
        config.darkside_timeout
    );
    let server = Server::builder()
        .add_service(CompactTxStreamerServer::new(streamer))
        .add_service(DarksideStreamerServer::new(control))
        .serve_with_shutdown(config.grpc_bind_addr, shutdown_signal());

    tokio::select! {
        result = server => Ok(result?),
        _ = tokio::time::sleep(config.darkside_timeout) => {
            tracing::error!("darkside mode expired, shutting down");
            Err(ServerError::DarksideExpired(config.darkside_timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn darkside_expires() {
        let mut config = LightwalletdConfig::darkside("127.0.0.1:0".parse().unwrap());
        config.darkside_timeout = Duration::from_secs(60);
        let result = serve(config).await;
        assert!(matches!(result, Err(ServerError::DarksideExpired(_))));
    }
}
