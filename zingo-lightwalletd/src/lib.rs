#![forbid(unsafe_code)]
#![warn(missing_docs)]
//! `ZingoLightwalletd`
//! Compact block proxy between light wallets and a full node, with a
//! darkside mode that swaps the node for a synthetic, test-controlled chain.

pub mod block;
pub mod cache;
pub mod config;
pub mod darkside;
pub mod frontend;
pub mod mempool;
pub mod node;
pub mod server;

#[cfg(test)]
pub(crate) mod mocks;

/// Generated protobuf types and gRPC stubs.
#[allow(missing_docs)]
pub mod proto {
    tonic::include_proto!("cash.z.wallet.sdk.rpc");
}
