//! Light wallet facing `CompactTxStreamer` service.

use std::sync::Arc;

use serde_json::{Value, json};
use tonic::{Request, Response, Status, Streaming};

use super::{ResponseStream, check_taddress, spawn_stream};
use crate::cache::BlockCache;
use crate::config::{SAPLING_UPGRADE_ID, STREAM_TIMEOUT, VENDOR};
use crate::mempool::MempoolCache;
use crate::node::reply::{
    AddressBalance, AddressTxidsArg, AddressUtxo, AddressesArg, RawTransactionInfo, TreeStateInfo,
};
use crate::node::{self, NodeRpc, RpcError};
use crate::proto::compact_tx_streamer_server::CompactTxStreamer;
use crate::proto::{
    Address, AddressList, Balance, BlockId, BlockRange, ChainSpec, CompactBlock, CompactTx, Empty,
    Exclude, GetAddressUtxosArg, GetAddressUtxosReply, GetAddressUtxosReplyList, LightdInfo,
    RawTransaction, SendResponse, TransparentAddressBlockFilter, TreeState, TxFilter,
};

/// Serves compact blocks, transactions and the mempool from a [`NodeRpc`].
#[derive(Clone)]
pub struct LightwalletdStreamer {
    node: Arc<dyn NodeRpc>,
    cache: Arc<BlockCache>,
    mempool: Arc<MempoolCache>,
}

impl LightwalletdStreamer {
    /// Streamer reading through `cache` and falling back to `node`.
    pub fn new(node: Arc<dyn NodeRpc>, cache: Arc<BlockCache>, mempool: Arc<MempoolCache>) -> Self {
        Self {
            node,
            cache,
            mempool,
        }
    }

    async fn request<T: serde::de::DeserializeOwned>(
        &self,
        method: &str,
        params: Vec<Value>,
    ) -> Result<T, Status> {
        let value = self.node.raw_request(method, params).await?;
        serde_json::from_value(value).map_err(|e| Status::internal(RpcError::from(e).to_string()))
    }

    async fn compact_block(&self, height: u64) -> Result<CompactBlock, Status> {
        if let Some(block) = self.cache.get(height) {
            return Ok(block);
        }
        let block = node::fetch_block(self.node.as_ref(), height)
            .await?
            .ok_or_else(|| Status::not_found(format!("block {height} not found")))?;
        block
            .to_compact()
            .map_err(|e| Status::internal(e.to_string()))
    }

    /// `hash` is a little-endian txid.
    async fn transaction(&self, hash: &[u8]) -> Result<RawTransaction, Status> {
        let display_txid = hex::encode(hash.iter().rev().copied().collect::<Vec<u8>>());
        let info: RawTransactionInfo = self
            .request("getrawtransaction", vec![json!(display_txid), json!(1)])
            .await?;
        let data = hex::decode(info.hex).map_err(|e| Status::internal(e.to_string()))?;
        Ok(RawTransaction {
            data,
            height: u64::try_from(info.height).unwrap_or(0),
        })
    }

    async fn address_utxos(&self, arg: GetAddressUtxosArg) -> Result<Vec<GetAddressUtxosReply>, Status> {
        for address in &arg.addresses {
            check_taddress(address)?;
        }
        let utxos: Vec<AddressUtxo> = self
            .request(
                "getaddressutxos",
                vec![json!(AddressesArg {
                    addresses: arg.addresses
                })],
            )
            .await?;

        let limit = if arg.max_entries > 0 {
            arg.max_entries as usize
        } else {
            usize::MAX
        };
        utxos
            .into_iter()
            .filter(|utxo| u64::try_from(utxo.height).unwrap_or(0) >= arg.start_height)
            .take(limit)
            .map(|utxo| {
                let mut txid = hex::decode(&utxo.txid).map_err(|e| Status::internal(e.to_string()))?;
                txid.reverse();
                Ok(GetAddressUtxosReply {
                    address: utxo.address,
                    txid,
                    index: utxo.output_index as i32,
                    script: hex::decode(&utxo.script).map_err(|e| Status::internal(e.to_string()))?,
                    value_zat: utxo.satoshis as i64,
                    height: u64::try_from(utxo.height).unwrap_or(0),
                })
            })
            .collect()
    }

    async fn taddress_balance(&self, addresses: Vec<String>) -> Result<Balance, Status> {
        for address in &addresses {
            check_taddress(address)?;
        }
        let balance: AddressBalance = self
            .request("getaddressbalance", vec![json!(AddressesArg { addresses })])
            .await?;
        Ok(Balance {
            value_zat: balance.balance,
        })
    }
}

#[tonic::async_trait]
impl CompactTxStreamer for LightwalletdStreamer {
    async fn get_latest_block(&self, _request: Request<ChainSpec>) -> Result<Response<BlockId>, Status> {
        let info = node::blockchain_info(self.node.as_ref()).await?;
        let height = u64::try_from(info.blocks).unwrap_or(0);
        let hash = self
            .cache
            .get(height)
            .map(|block| block.hash)
            .unwrap_or_default();
        Ok(Response::new(BlockId { height, hash }))
    }

    async fn get_block(&self, request: Request<BlockId>) -> Result<Response<CompactBlock>, Status> {
        let id = request.into_inner();
        if !id.hash.is_empty() {
            return Err(Status::invalid_argument("GetBlock by hash is not yet implemented"));
        }
        if id.height == 0 {
            return Err(Status::invalid_argument("request for unspecified identifier"));
        }
        Ok(Response::new(self.compact_block(id.height).await?))
    }

    type GetBlockRangeStream = ResponseStream<CompactBlock>;

    async fn get_block_range(
        &self,
        request: Request<BlockRange>,
    ) -> Result<Response<Self::GetBlockRangeStream>, Status> {
        let range = request.into_inner();
        let (Some(start), Some(end)) = (range.start, range.end) else {
            return Err(Status::invalid_argument("must specify start and end heights"));
        };
        // walked lazily; the range is client controlled and may be huge
        let heights: Box<dyn Iterator<Item = u64> + Send> = if start.height <= end.height {
            Box::new(start.height..=end.height)
        } else {
            Box::new((end.height..=start.height).rev())
        };

        let streamer = self.clone();
        let stream = spawn_stream(Some(STREAM_TIMEOUT), move |sender| async move {
            for height in heights {
                let block = streamer.compact_block(height).await;
                let failed = block.is_err();
                if sender.send(block).await.is_err() || failed {
                    return;
                }
            }
        });
        Ok(Response::new(stream))
    }

    async fn get_transaction(&self, request: Request<TxFilter>) -> Result<Response<RawTransaction>, Status> {
        let filter = request.into_inner();
        if !filter.hash.is_empty() {
            if filter.hash.len() != 32 {
                return Err(Status::invalid_argument("transaction ID has invalid length"));
            }
            return Ok(Response::new(self.transaction(&filter.hash).await?));
        }
        if filter.block.is_some_and(|block| !block.hash.is_empty()) {
            return Err(Status::invalid_argument(
                "can't GetTransaction with a blockhash+num. Please call GetTransaction with txid",
            ));
        }
        Err(Status::invalid_argument("please call GetTransaction with txid"))
    }

    async fn send_transaction(&self, request: Request<RawTransaction>) -> Result<Response<SendResponse>, Status> {
        let raw_transaction = request.into_inner();
        if raw_transaction.data.is_empty() {
            return Err(Status::invalid_argument("bad Transaction or Data"));
        }

        let result = self
            .node
            .raw_request(
                "sendrawtransaction",
                vec![json!(hex::encode(&raw_transaction.data))],
            )
            .await;
        let response = match result {
            Ok(Value::Null) => SendResponse::default(),
            // the raw reply, a quoted txid when the node accepted the transaction
            Ok(reply) => SendResponse {
                error_code: 0,
                error_message: reply.to_string(),
            },
            Err(RpcError::Node { code, message }) => SendResponse {
                error_code: code as i32,
                error_message: message,
            },
            Err(e) => return Err(e.into()),
        };
        tracing::debug!("sent transaction, code {}", response.error_code);
        Ok(Response::new(response))
    }

    type GetTaddressTxidsStream = ResponseStream<RawTransaction>;

    async fn get_taddress_txids(
        &self,
        request: Request<TransparentAddressBlockFilter>,
    ) -> Result<Response<Self::GetTaddressTxidsStream>, Status> {
        let filter = request.into_inner();
        check_taddress(&filter.address)?;
        let range = filter
            .range
            .ok_or_else(|| Status::invalid_argument("block range is required"))?;
        let start = range
            .start
            .ok_or_else(|| Status::invalid_argument("start block height is required"))?;
        let end = range
            .end
            .ok_or_else(|| Status::invalid_argument("end block height is required"))?;

        let txids: Vec<String> = self
            .request(
                "getaddresstxids",
                vec![json!(AddressTxidsArg {
                    addresses: vec![filter.address],
                    start: start.height,
                    end: end.height,
                })],
            )
            .await?;

        let streamer = self.clone();
        let stream = spawn_stream(Some(STREAM_TIMEOUT), move |sender| async move {
            for txid in txids {
                let transaction = match hex::decode(&txid) {
                    Ok(mut hash) => {
                        hash.reverse();
                        streamer.transaction(&hash).await
                    }
                    Err(e) => Err(Status::internal(e.to_string())),
                };
                let failed = transaction.is_err();
                if sender.send(transaction).await.is_err() || failed {
                    return;
                }
            }
        });
        Ok(Response::new(stream))
    }

    async fn get_taddress_balance(&self, request: Request<AddressList>) -> Result<Response<Balance>, Status> {
        let balance = self
            .taddress_balance(request.into_inner().addresses)
            .await?;
        Ok(Response::new(balance))
    }

    async fn get_taddress_balance_stream(
        &self,
        request: Request<Streaming<Address>>,
    ) -> Result<Response<Balance>, Status> {
        let mut stream = request.into_inner();
        let mut addresses = Vec::new();
        while let Some(Address { address }) = stream.message().await? {
            addresses.push(address);
        }
        Ok(Response::new(self.taddress_balance(addresses).await?))
    }

    type GetMempoolTxStream = ResponseStream<CompactTx>;

    async fn get_mempool_tx(
        &self,
        request: Request<Exclude>,
    ) -> Result<Response<Self::GetMempoolTxStream>, Status> {
        let transactions = self.mempool.query(&request.into_inner().txid).await?;
        let stream = spawn_stream(None, move |sender| async move {
            for transaction in transactions {
                if sender.send(Ok(transaction.as_ref().clone())).await.is_err() {
                    return;
                }
            }
        });
        Ok(Response::new(stream))
    }

    async fn get_tree_state(&self, request: Request<BlockId>) -> Result<Response<TreeState>, Status> {
        let id = request.into_inner();
        let param = if id.height > 0 {
            json!(id.height.to_string())
        } else if !id.hash.is_empty() {
            json!(hex::encode(&id.hash))
        } else {
            return Err(Status::invalid_argument("request for unspecified identifier"));
        };

        let requested: TreeStateInfo = self.request("z_gettreestate", vec![param]).await?;
        let mut sapling = requested.sapling.clone();
        let mut orchard = requested.orchard.clone();
        // an unchanged sapling tree is reported as a pointer to the block
        // that last changed it
        while sapling.commitments.final_state.is_empty() && !sapling.skip_hash.is_empty() {
            let skipped: TreeStateInfo = self
                .request("z_gettreestate", vec![json!(sapling.skip_hash)])
                .await?;
            sapling = skipped.sapling;
            if orchard.commitments.final_state.is_empty() {
                orchard = skipped.orchard;
            }
        }
        if sapling.commitments.final_state.is_empty() {
            return Err(Status::not_found("node did not return a tree state"));
        }

        let network = node::blockchain_info(self.node.as_ref()).await?.chain;
        Ok(Response::new(TreeState {
            network,
            height: u64::try_from(requested.height).unwrap_or(0),
            hash: requested.hash,
            time: requested.time,
            sapling_tree: sapling.commitments.final_state,
            orchard_tree: orchard.commitments.final_state,
        }))
    }

    async fn get_address_utxos(
        &self,
        request: Request<GetAddressUtxosArg>,
    ) -> Result<Response<GetAddressUtxosReplyList>, Status> {
        let address_utxos = self.address_utxos(request.into_inner()).await?;
        Ok(Response::new(GetAddressUtxosReplyList { address_utxos }))
    }

    type GetAddressUtxosStreamStream = ResponseStream<GetAddressUtxosReply>;

    async fn get_address_utxos_stream(
        &self,
        request: Request<GetAddressUtxosArg>,
    ) -> Result<Response<Self::GetAddressUtxosStreamStream>, Status> {
        let utxos = self.address_utxos(request.into_inner()).await?;
        let stream = spawn_stream(None, move |sender| async move {
            for utxo in utxos {
                if sender.send(Ok(utxo)).await.is_err() {
                    return;
                }
            }
        });
        Ok(Response::new(stream))
    }

    async fn get_lightd_info(&self, _request: Request<Empty>) -> Result<Response<LightdInfo>, Status> {
        let info = node::blockchain_info(self.node.as_ref()).await?;
        let height = u64::try_from(info.blocks).unwrap_or(0);
        Ok(Response::new(LightdInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            vendor: VENDOR.to_string(),
            taddr_support: true,
            sapling_activation_height: info
                .upgrades
                .get(SAPLING_UPGRADE_ID)
                .map_or(0, |upgrade| upgrade.activation_height),
            consensus_branch_id: info.consensus.chaintip,
            chain_name: info.chain,
            block_height: height,
            estimated_height: height,
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio_stream::StreamExt;
    use tonic::Code;

    use super::*;
    use crate::darkside::synthetic;
    use crate::mocks::ScriptedNode;

    const TADDR: &str = "t1Zmr6YMH2gTH4pDuWc3NL6bqqKF9zXpyPa";

    fn new_streamer(node: Arc<ScriptedNode>) -> LightwalletdStreamer {
        let mempool = Arc::new(MempoolCache::new(node.clone(), Duration::from_secs(2)));
        LightwalletdStreamer::new(node, Arc::new(BlockCache::new(1)), mempool)
    }

    #[tokio::test]
    async fn invalid_addresses_fail_before_rpc() {
        let node = Arc::new(ScriptedNode::default());
        let streamer = new_streamer(node.clone());

        let arg = GetAddressUtxosArg {
            addresses: vec![TADDR.to_string(), "notanaddress".to_string()],
            ..Default::default()
        };
        let error = streamer.get_address_utxos(Request::new(arg)).await.unwrap_err();
        assert_eq!(error.code(), Code::InvalidArgument);

        let list = AddressList {
            addresses: vec!["t1short".to_string()],
        };
        let error = streamer.get_taddress_balance(Request::new(list)).await.unwrap_err();
        assert_eq!(error.code(), Code::InvalidArgument);

        assert_eq!(node.calls("getaddressutxos"), 0);
        assert_eq!(node.calls("getaddressbalance"), 0);
    }

    #[tokio::test]
    async fn address_utxos_filter_and_cap() {
        let node = Arc::new(ScriptedNode::default());
        let utxo = |height: i64, index: i64| {
            json!({
                "address": TADDR,
                "txid": "0102",
                "outputIndex": index,
                "script": "76a9",
                "satoshis": 5000,
                "height": height,
            })
        };
        node.reply(
            "getaddressutxos",
            json!([utxo(5, 0), utxo(10, 1), utxo(11, 2), utxo(12, 3)]),
        );
        let streamer = new_streamer(node.clone());

        let arg = GetAddressUtxosArg {
            addresses: vec![TADDR.to_string()],
            start_height: 10,
            max_entries: 2,
        };
        let list = streamer
            .get_address_utxos(Request::new(arg))
            .await
            .unwrap()
            .into_inner();
        let indexes: Vec<i32> = list.address_utxos.iter().map(|utxo| utxo.index).collect();
        assert_eq!(indexes, vec![1, 2]);
        assert_eq!(list.address_utxos[0].txid, vec![0x02, 0x01]);
        assert_eq!(list.address_utxos[0].script, vec![0x76, 0xa9]);
        assert_eq!(
            node.params("getaddressutxos")[0],
            vec![json!({ "addresses": [TADDR] })]
        );
    }

    #[tokio::test]
    async fn send_transaction_maps_node_errors() {
        let node = Arc::new(ScriptedNode::default());
        let streamer = new_streamer(node.clone());

        node.reply("sendrawtransaction", json!("abcd"));
        let response = streamer
            .send_transaction(Request::new(RawTransaction {
                data: vec![1],
                height: 0,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.error_code, 0);
        assert_eq!(response.error_message, "\"abcd\"");

        let node = Arc::new(ScriptedNode::default());
        node.fail("sendrawtransaction");
        let response = new_streamer(node)
            .send_transaction(Request::new(RawTransaction {
                data: vec![1],
                height: 0,
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(response.error_code, -1);
        assert_eq!(response.error_message, "sendrawtransaction failed");

        let error = streamer
            .send_transaction(Request::new(RawTransaction::default()))
            .await
            .unwrap_err();
        assert_eq!(error.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn block_range_in_both_directions() {
        let node = Arc::new(ScriptedNode::default());
        let mut blocks = synthetic::build_blocks(1, 0, 4).unwrap();
        node.set_chain(&mut blocks);
        let streamer = new_streamer(node);

        let range = |start: u64, end: u64| BlockRange {
            start: Some(BlockId {
                height: start,
                hash: vec![],
            }),
            end: Some(BlockId {
                height: end,
                hash: vec![],
            }),
        };

        let heights: Vec<u64> = streamer
            .get_block_range(Request::new(range(2, 4)))
            .await
            .unwrap()
            .into_inner()
            .map(|block| block.unwrap().height)
            .collect()
            .await;
        assert_eq!(heights, vec![2, 3, 4]);

        let heights: Vec<u64> = streamer
            .get_block_range(Request::new(range(3, 1)))
            .await
            .unwrap()
            .into_inner()
            .map(|block| block.unwrap().height)
            .collect()
            .await;
        assert_eq!(heights, vec![3, 2, 1]);

        let results: Vec<Result<CompactBlock, Status>> = streamer
            .get_block_range(Request::new(range(4, 6)))
            .await
            .unwrap()
            .into_inner()
            .collect()
            .await;
        assert_eq!(results.len(), 2);
        assert_eq!(results[1].as_ref().unwrap_err().code(), Code::NotFound);
    }

    #[tokio::test]
    async fn unbounded_block_range_stops_at_missing_block() {
        let node = Arc::new(ScriptedNode::default());
        let mut blocks = synthetic::build_blocks(1, 0, 3).unwrap();
        node.set_chain(&mut blocks);
        let streamer = new_streamer(node.clone());

        for (start, end) in [(2, u64::MAX), (u64::MAX, u64::MAX - 1)] {
            let results: Vec<Result<CompactBlock, Status>> = streamer
                .get_block_range(Request::new(BlockRange {
                    start: Some(BlockId {
                        height: start,
                        hash: vec![],
                    }),
                    end: Some(BlockId {
                        height: end,
                        hash: vec![],
                    }),
                }))
                .await
                .unwrap()
                .into_inner()
                .collect()
                .await;
            let last = results.last().unwrap();
            assert_eq!(last.as_ref().unwrap_err().code(), Code::NotFound);
        }

        // 2 and 3 stream, 4 ends it; the descending range fails at once
        assert_eq!(node.calls("getblock"), 4);
    }

    #[tokio::test]
    async fn get_block_rejects_hash_lookups() {
        let streamer = new_streamer(Arc::new(ScriptedNode::default()));
        let error = streamer
            .get_block(Request::new(BlockId {
                height: 0,
                hash: vec![1; 32],
            }))
            .await
            .unwrap_err();
        assert_eq!(error.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn get_transaction_reverses_txid() {
        let node = Arc::new(ScriptedNode::default());
        node.reply("getrawtransaction", json!({ "hex": "0a0b", "height": 7 }));
        let streamer = new_streamer(node.clone());

        let mut hash = vec![0u8; 32];
        hash[0] = 0xaa;
        let transaction = streamer
            .get_transaction(Request::new(TxFilter {
                hash,
                ..Default::default()
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(transaction.data, vec![0x0a, 0x0b]);
        assert_eq!(transaction.height, 7);
        let params = &node.params("getrawtransaction")[0];
        assert_eq!(params[0], json!(format!("{}aa", "00".repeat(31))));
        assert_eq!(params[1], json!(1));

        let error = streamer
            .get_transaction(Request::new(TxFilter {
                hash: vec![1; 31],
                ..Default::default()
            }))
            .await
            .unwrap_err();
        assert_eq!(error.code(), Code::InvalidArgument);
    }

    #[tokio::test]
    async fn tree_state_carries_both_pools() {
        let node = Arc::new(ScriptedNode::default());
        node.reply(
            "z_gettreestate",
            json!({
                "hash": "00ff",
                "height": 20,
                "time": 3,
                "sapling": { "skipHash": "", "commitments": { "finalState": "01" } },
                "orchard": { "commitments": { "finalState": "02" } },
            }),
        );
        node.reply("getblockchaininfo", json!({ "chain": "regtest" }));
        let streamer = new_streamer(node);

        let state = streamer
            .get_tree_state(Request::new(BlockId {
                height: 20,
                hash: vec![],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(state.network, "regtest");
        assert_eq!(state.height, 20);
        assert_eq!(state.sapling_tree, "01");
        assert_eq!(state.orchard_tree, "02");
    }

    #[tokio::test]
    async fn tree_state_follows_skip_hash() {
        let node = Arc::new(ScriptedNode::default());
        node.reply(
            "z_gettreestate",
            json!({
                "hash": "0030",
                "height": 30,
                "time": 9,
                "sapling": { "skipHash": "0010", "commitments": { "finalState": "" } },
            }),
        );
        node.reply(
            "z_gettreestate",
            json!({
                "hash": "0010",
                "height": 10,
                "time": 4,
                "sapling": { "commitments": { "finalState": "aa" } },
                "orchard": { "commitments": { "finalState": "bb" } },
            }),
        );
        node.reply("getblockchaininfo", json!({ "chain": "main" }));
        let streamer = new_streamer(node.clone());

        let state = streamer
            .get_tree_state(Request::new(BlockId {
                height: 30,
                hash: vec![],
            }))
            .await
            .unwrap()
            .into_inner();
        assert_eq!(state.height, 30);
        assert_eq!(state.hash, "0030");
        assert_eq!(state.sapling_tree, "aa");
        assert_eq!(state.orchard_tree, "bb");
        let params = node.params("z_gettreestate");
        assert_eq!(params[0], vec![json!("30")]);
        assert_eq!(params[1], vec![json!("0010")]);
    }

    #[tokio::test]
    async fn mempool_stream_sends_snapshot_entries() {
        use crate::mempool::MempoolSnapshot;

        let node = Arc::new(ScriptedNode::default());
        let streamer = new_streamer(node);
        streamer.mempool.set_snapshot(MempoolSnapshot::from_entries(vec![
            (
                "aa00".to_string(),
                Some(CompactTx {
                    index: 0,
                    hash: vec![0x00, 0xaa],
                    ..Default::default()
                }),
            ),
            ("bb00".to_string(), None),
        ]));

        let sent: Vec<CompactTx> = streamer
            .get_mempool_tx(Request::new(Exclude { txid: vec![] }))
            .await
            .unwrap()
            .into_inner()
            .map(|tx| tx.unwrap())
            .collect()
            .await;
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].hash, vec![0x00, 0xaa]);

        // the only shielded entry is excluded by its little-endian id
        let sent: Vec<Result<CompactTx, Status>> = streamer
            .get_mempool_tx(Request::new(Exclude {
                txid: vec![vec![0x00, 0xaa]],
            }))
            .await
            .unwrap()
            .into_inner()
            .collect()
            .await;
        assert!(sent.is_empty());
    }
}
