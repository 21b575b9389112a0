//! Test driver facing `DarksideStreamer` service.

use std::sync::Arc;

use tonic::{Request, Response, Status, Streaming};

use super::{ResponseStream, spawn_stream};
use crate::darkside::{Darkside, height_from_i32};
use crate::mempool::MempoolCache;
use crate::proto::darkside_streamer_server::DarksideStreamer;
use crate::proto::{
    DarksideBlock, DarksideBlocksUrl, DarksideEmptyBlocks, DarksideHeight, DarksideMetaState,
    DarksideTransactionsUrl, Empty, RawTransaction,
};

/// Lets a test driver reset, stage and commit the darkside chain.
#[derive(Clone)]
pub struct DarksideStreamerService {
    darkside: Arc<Darkside>,
    mempool: Arc<MempoolCache>,
}

impl DarksideStreamerService {
    /// Service driving `darkside`. `mempool` is cleared on every reset.
    pub fn new(darkside: Arc<Darkside>, mempool: Arc<MempoolCache>) -> Self {
        Self { darkside, mempool }
    }
}

#[tonic::async_trait]
impl DarksideStreamer for DarksideStreamerService {
    async fn reset(&self, request: Request<DarksideMetaState>) -> Result<Response<Empty>, Status> {
        let meta = request.into_inner();
        let sapling_activation = height_from_i32(meta.sapling_activation)?;
        self.darkside
            .reset(sapling_activation, &meta.branch_id, &meta.chain_name)
            .await?;
        self.mempool.clear();
        Ok(Response::new(Empty {}))
    }

    async fn stage_blocks_stream(
        &self,
        request: Request<Streaming<DarksideBlock>>,
    ) -> Result<Response<Empty>, Status> {
        let mut stream = request.into_inner();
        while let Some(DarksideBlock { block }) = stream.message().await? {
            let raw_block = hex::decode(block.trim())
                .map_err(|e| Status::invalid_argument(format!("invalid block hex. {e}")))?;
            self.darkside.stage_blocks([raw_block]).await?;
        }
        Ok(Response::new(Empty {}))
    }

    async fn stage_blocks(&self, request: Request<DarksideBlocksUrl>) -> Result<Response<Empty>, Status> {
        let url = request.into_inner().url;
        self.darkside.stage_blocks_from_url(&url).await?;
        Ok(Response::new(Empty {}))
    }

    async fn stage_blocks_create(
        &self,
        request: Request<DarksideEmptyBlocks>,
    ) -> Result<Response<Empty>, Status> {
        let blocks = request.into_inner();
        let height = height_from_i32(blocks.height)?;
        let count = height_from_i32(blocks.count)?;
        self.darkside
            .stage_synthetic(height, blocks.nonce, count)
            .await?;
        Ok(Response::new(Empty {}))
    }

    async fn stage_transactions_stream(
        &self,
        request: Request<Streaming<RawTransaction>>,
    ) -> Result<Response<Empty>, Status> {
        let mut stream = request.into_inner();
        while let Some(RawTransaction { data, height }) = stream.message().await? {
            self.darkside.stage_transaction(height, data).await?;
        }
        Ok(Response::new(Empty {}))
    }

    async fn stage_transactions(
        &self,
        request: Request<DarksideTransactionsUrl>,
    ) -> Result<Response<Empty>, Status> {
        let source = request.into_inner();
        let height = height_from_i32(source.height)?;
        self.darkside
            .stage_transactions_from_url(height, &source.url)
            .await?;
        Ok(Response::new(Empty {}))
    }

    async fn apply_staged(&self, request: Request<DarksideHeight>) -> Result<Response<Empty>, Status> {
        let height = height_from_i32(request.into_inner().height)?;
        self.darkside.commit(height).await?;
        Ok(Response::new(Empty {}))
    }

    type GetIncomingTransactionsStream = ResponseStream<RawTransaction>;

    async fn get_incoming_transactions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Self::GetIncomingTransactionsStream>, Status> {
        let incoming = self.darkside.incoming().await;
        let stream = spawn_stream(None, move |sender| async move {
            for data in incoming {
                if sender
                    .send(Ok(RawTransaction { data, height: 0 }))
                    .await
                    .is_err()
                {
                    return;
                }
            }
        });
        Ok(Response::new(stream))
    }

    async fn clear_incoming_transactions(
        &self,
        _request: Request<Empty>,
    ) -> Result<Response<Empty>, Status> {
        self.darkside.clear_incoming().await;
        Ok(Response::new(Empty {}))
    }
}
