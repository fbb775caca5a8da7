//! Drains the scanner's delivery queue, fetching and decoding each block and recording the outcome.

use std::sync::Arc;

use anyhow::{Result, anyhow};
use tokio::{
    select,
    sync::{
        Mutex,
        mpsc::{Receiver, Sender},
    },
    task::JoinSet,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::{
    cfg::BlockScannerConfig,
    decoder::BlockDecoder,
    http::HttpRetryClient,
    metrics::Metrics,
    scanner::normalize_rpc_host,
    storage::{BlockStatus, ScannerStorage},
};

/// A decoded block, ready for transaction classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedBlock {
    pub height: u64,
    pub txs: Vec<String>,
}

pub struct BlockObserver {
    rpc_host: String,
    workers: usize,
    decoder: Arc<dyn BlockDecoder>,
    http: HttpRetryClient,
    storage: Arc<dyn ScannerStorage>,
    metrics: Arc<Metrics>,
}

impl BlockObserver {
    pub fn new(
        cfg: &BlockScannerConfig,
        decoder: Arc<dyn BlockDecoder>,
        storage: Arc<dyn ScannerStorage>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        Ok(BlockObserver {
            rpc_host: normalize_rpc_host(&cfg.rpc_host)?,
            workers: cfg.block_scan_processors.max(1),
            decoder,
            http: HttpRetryClient::new("block_observer", cfg.retry_policy())?,
            storage,
            metrics,
        })
    }

    /// Fetches and decodes the block at `height`.
    pub async fn observe(&self, height: u64, cancel: &CancellationToken) -> Result<ObservedBlock> {
        let request = self.decoder.block_request(&self.rpc_host, height)?;
        let body = match &request.body {
            Some(body) => self.http.post(&request.url, body, cancel).await?,
            None => self.http.get(&request.url, cancel).await?,
        };
        let (decoded_height, txs) = self.decoder.parse_block(&body)?;
        if decoded_height != height {
            return Err(anyhow!(
                "requested block {height} but node returned block {decoded_height}"
            ));
        }
        Ok(ObservedBlock { height, txs })
    }

    /// Processes heights from `heights` until it closes or `cancel` fires, with as many blocks in flight as the
    /// scanner has delivery slots. Each block is marked `Success` and forwarded to `out`, or marked `Failed` so the
    /// scanner offers it again later.
    pub async fn run(
        self: Arc<Self>,
        heights: Receiver<u64>,
        out: Sender<ObservedBlock>,
        cancel: CancellationToken,
    ) -> Result<()> {
        let heights = Arc::new(Mutex::new(heights));
        let mut workers = JoinSet::new();
        for _ in 0..self.workers {
            let observer = self.clone();
            let heights = heights.clone();
            let out = out.clone();
            let cancel = cancel.clone();
            workers.spawn(async move { observer.work(heights, out, cancel).await });
        }
        drop(out);

        while let Some(result) = workers.join_next().await {
            result?;
        }
        Ok(())
    }

    async fn work(
        &self,
        heights: Arc<Mutex<Receiver<u64>>>,
        out: Sender<ObservedBlock>,
        cancel: CancellationToken,
    ) {
        loop {
            let next = select! {
                _ = cancel.cancelled() => return,
                next = async { heights.lock().await.recv().await } => next,
            };
            let Some(height) = next else {
                return;
            };

            match self.observe(height, &cancel).await {
                Ok(block) => {
                    debug!(height, txs = block.txs.len(), "observed block");
                    self.set_status(height, BlockStatus::Success);
                    self.metrics.block_observed(true);
                    if out.send(block).await.is_err() {
                        return;
                    }
                }
                Err(e) => {
                    warn!(height, error = ?e, "fail to observe block");
                    self.set_status(height, BlockStatus::Failed);
                    self.metrics.block_observed(false);
                }
            }
        }
    }

    fn set_status(&self, height: u64, status: BlockStatus) {
        if let Err(e) = self.storage.set_block_status(height, status) {
            self.metrics
                .scanner_error("fail_set_block_status", e.to_string());
            warn!(height, ?status, error = %e, "fail to set block status");
        }
    }
}
