//! Discovers new blocks on an external chain and hands their heights to consumers.
//!
//! The scanner runs two tasks. The scan loop polls the chain head and, for every height past the persisted scan
//! position, marks the height `NotStarted`, pushes it onto the delivery queue and only then advances the persisted
//! position. The retry loop periodically re-offers heights that a consumer marked `Failed`. Together with a pass over
//! all unfinished heights at startup, this means every height is delivered at least once even if the process dies at
//! any point.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result, anyhow};
use tokio::{
    select,
    sync::mpsc::{self, Receiver, Sender},
    task::JoinSet,
    time::{Instant, MissedTickBehavior, interval_at, sleep},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    cfg::BlockScannerConfig,
    decoder::{BlockDecoder, BlockRequest, decoder_for},
    error::{HeightError, HttpError, RetryError, ScannerError},
    http::HttpRetryClient,
    metrics::Metrics,
    storage::{BlockStatus, ScannerStorage},
};

/// Adds `http://` to a host without a scheme and checks that the result is a usable URL. Any trailing slash is
/// removed, so paths can be appended with `format!("{host}/...")`.
pub fn normalize_rpc_host(host: &str) -> Result<String, ScannerError> {
    let trimmed = host.trim();
    if trimmed.is_empty() {
        return Err(ScannerError::InvalidEndpoint {
            host: host.to_owned(),
            reason: "host is empty".to_owned(),
        });
    }
    let with_scheme = if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
        trimmed.to_owned()
    } else {
        format!("http://{trimmed}")
    };
    let url = Url::parse(&with_scheme).map_err(|e| ScannerError::InvalidEndpoint {
        host: host.to_owned(),
        reason: e.to_string(),
    })?;
    if url.host_str().is_none_or(str::is_empty) {
        return Err(ScannerError::InvalidEndpoint {
            host: host.to_owned(),
            reason: "no host".to_owned(),
        });
    }
    Ok(with_scheme.trim_end_matches('/').to_owned())
}

/// State shared by the scan loop and the retry loop.
struct ScanContext {
    rpc_host: String,
    /// Asks the external chain for its current height, in whatever dialect its node speaks.
    height_request: BlockRequest,
    decoder: Arc<dyn BlockDecoder>,
    start_block_height: u64,
    discover_backoff: Duration,
    retry_interval: Duration,
    storage: Arc<dyn ScannerStorage>,
    metrics: Arc<Metrics>,
    http: HttpRetryClient,
    cancel: CancellationToken,
}

pub struct BlockScanner {
    ctx: Arc<ScanContext>,
    /// Taken by the tasks when the scanner is started. Once both tasks have exited every sender is gone, so the
    /// consumer sees the queue close.
    sender: Option<Sender<u64>>,
    receiver: Option<Receiver<u64>>,
    tasks: JoinSet<Result<()>>,
}

impl BlockScanner {
    pub fn new(
        cfg: &BlockScannerConfig,
        storage: Arc<dyn ScannerStorage>,
        metrics: Arc<Metrics>,
    ) -> Result<Self> {
        let rpc_host = normalize_rpc_host(&cfg.rpc_host)?;
        cfg.validate()?;
        let decoder = decoder_for(cfg.decoder);
        let height_request = decoder.height_request(&rpc_host)?;

        let http = HttpRetryClient::new("block_scanner", cfg.retry_policy())?;
        let (sender, receiver) = mpsc::channel(cfg.block_scan_processors);

        Ok(BlockScanner {
            ctx: Arc::new(ScanContext {
                rpc_host,
                height_request,
                decoder,
                start_block_height: cfg.start_block_height,
                discover_backoff: cfg.block_height_discover_backoff,
                retry_interval: cfg.block_retry_interval,
                storage,
                metrics,
                http,
                cancel: CancellationToken::new(),
            }),
            sender: Some(sender),
            receiver: Some(receiver),
            tasks: JoinSet::new(),
        })
    }

    pub fn rpc_host(&self) -> &str {
        &self.ctx.rpc_host
    }

    /// The receiving end of the delivery queue. It can only be taken once.
    pub fn messages(&mut self) -> Result<Receiver<u64>> {
        self.receiver
            .take()
            .ok_or_else(|| anyhow!("block scanner messages have already been taken"))
    }

    /// Spawns the scan and retry loops and returns immediately.
    pub fn start(&mut self) -> Result<()> {
        let sender = self
            .sender
            .take()
            .ok_or_else(|| anyhow!("block scanner has already been started"))?;

        let ctx = self.ctx.clone();
        let scan_sender = sender.clone();
        self.tasks.spawn(async move {
            let result = ctx.scan_blocks(scan_sender).await;
            if result.is_err() {
                // A fatal scan error takes the retry loop down with it.
                ctx.cancel.cancel();
            }
            result
        });

        let ctx = self.ctx.clone();
        self.tasks.spawn(async move { ctx.retry_blocks(sender).await });

        info!(rpc_host = self.ctx.rpc_host, "block scanner started");
        Ok(())
    }

    /// Waits for either loop to exit. Under normal operation this only happens after [BlockScanner::stop] is called
    /// elsewhere, or when the scan loop hits a fatal error, which is returned.
    pub async fn wait(&mut self) -> Result<()> {
        match self.tasks.join_next().await {
            Some(result) => result?,
            None => Ok(()),
        }
    }

    /// Cancels both loops and waits for them to exit. Returns the first error either loop produced.
    pub async fn stop(&mut self) -> Result<()> {
        self.ctx.cancel.cancel();
        let mut first_error = None;
        while let Some(result) = self.tasks.join_next().await {
            let result = result.map_err(anyhow::Error::from).and_then(|r| r);
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }
        info!("block scanner stopped");
        first_error.map_or(Ok(()), Err)
    }

    /// The current height of the external chain.
    pub async fn get_rpc_block(&self) -> Result<u64> {
        self.ctx.get_rpc_block().await
    }

    /// Where the chain head is polled.
    pub fn block_url(&self) -> String {
        self.ctx.block_url()
    }
}

impl ScanContext {
    fn block_url(&self) -> String {
        self.height_request.url.clone()
    }

    async fn get_rpc_block(&self) -> Result<u64> {
        let start = std::time::Instant::now();
        let result = self.fetch_rpc_height().await;
        self.metrics.block_discovery_duration(start.elapsed());
        result
    }

    async fn fetch_rpc_height(&self) -> Result<u64> {
        let request = &self.height_request;
        let body = match &request.body {
            Some(body) => self.http.post(&request.url, body, &self.cancel).await,
            None => self.http.get(&request.url, &self.cancel).await,
        }
        .inspect_err(|e| self.record_fetch_error(e))
        .context("fail to get block height")?;

        self.decoder.parse_height(&body).map_err(|e| {
            let label = match &e {
                HeightError::Unmarshal { .. } => "fail_unmarshal_block",
                HeightError::Rpc(_) => "fail_get_block",
                HeightError::Parse { .. } => "fail_parse_block_height",
            };
            self.metrics.scanner_error(label, e.to_string());
            anyhow::Error::from(e)
        })
    }

    fn record_fetch_error(&self, err: &RetryError) {
        let label = match err.last() {
            HttpError::Transport { .. } => "fail_send_http_request",
            HttpError::Status { .. } => "unexpected_status_code",
            HttpError::Body { .. } => "fail_get_block",
        };
        self.metrics.scanner_error(label, err.to_string());
    }

    /// Pushes a height onto the queue, waiting for space. Returns `false` if the scanner was stopped or the consumer
    /// went away first.
    async fn deliver(&self, sender: &Sender<u64>, height: u64) -> bool {
        select! {
            biased;
            _ = self.cancel.cancelled() => false,
            result = sender.send(height) => {
                if result.is_err() {
                    warn!(height, "block consumer has gone away");
                }
                result.is_ok()
            }
        }
    }

    /// Sleeps for `duration`. Returns `false` if the scanner was stopped first.
    async fn pause(&self, duration: Duration) -> bool {
        select! {
            _ = self.cancel.cancelled() => false,
            _ = sleep(duration) => true,
        }
    }

    fn initial_position(&self) -> u64 {
        match self.storage.get_scan_pos() {
            Ok(Some(position)) => position,
            Ok(None) => {
                info!(
                    start_block_height = self.start_block_height,
                    "no scan position persisted, starting from configured height"
                );
                self.start_block_height
            }
            Err(e) => {
                self.metrics.scanner_error("fail_get_scan_pos", e.to_string());
                error!(
                    error = %e,
                    start_block_height = self.start_block_height,
                    "fail to get scan position, starting from configured height"
                );
                self.start_block_height
            }
        }
    }

    async fn scan_blocks(&self, sender: Sender<u64>) -> Result<()> {
        let mut position = self.initial_position();
        self.metrics.current_position(position);

        // Anything handed out before the last shutdown that never completed.
        match self.storage.get_blocks_for_retry(false) {
            Ok(heights) => {
                for height in heights {
                    if !self.deliver(&sender, height).await {
                        return Ok(());
                    }
                    self.metrics.block_retried();
                }
            }
            Err(e) => {
                self.metrics
                    .scanner_error("fail_get_blocks_for_retry", e.to_string());
                error!(error = %e, "fail to get unfinished blocks");
            }
        }

        loop {
            if self.cancel.is_cancelled() {
                return Ok(());
            }

            let remote = match self.get_rpc_block().await {
                Ok(height) => height,
                Err(e) => {
                    error!(error = ?e, "fail to get rpc block height");
                    if !self.pause(self.discover_backoff).await {
                        return Ok(());
                    }
                    continue;
                }
            };

            if remote <= position {
                debug!(remote, position, "no new blocks");
                if !self.pause(self.discover_backoff).await {
                    return Ok(());
                }
                continue;
            }

            for height in (position + 1)..=remote {
                self.storage
                    .set_block_status(height, BlockStatus::NotStarted)
                    .map_err(|source| {
                        self.metrics
                            .scanner_error("fail_set_block_status", source.to_string());
                        ScannerError::Persistence { height, source }
                    })?;

                if !self.deliver(&sender, height).await {
                    return Ok(());
                }

                self.storage.set_scan_pos(height).map_err(|source| {
                    self.metrics
                        .scanner_error("fail_save_block_pos", source.to_string());
                    ScannerError::Persistence { height, source }
                })?;
                position = height;
                self.metrics.current_position(position);
                self.metrics.block_scanned();
            }
        }
    }

    async fn retry_blocks(&self, sender: Sender<u64>) -> Result<()> {
        let mut ticker = interval_at(Instant::now() + self.retry_interval, self.retry_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = self.cancel.cancelled() => return Ok(()),
                _ = ticker.tick() => {}
            }

            let heights = match self.storage.get_blocks_for_retry(true) {
                Ok(heights) => heights,
                Err(e) => {
                    self.metrics
                        .scanner_error("fail_get_blocks_for_retry", e.to_string());
                    error!(error = %e, "fail to get blocks for retry");
                    continue;
                }
            };

            for height in heights {
                debug!(height, "retrying block");
                if !self.deliver(&sender, height).await {
                    return Ok(());
                }
                self.metrics.block_retried();
            }
        }
    }
}
