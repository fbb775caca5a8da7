mod thorclient;

use std::time::Duration;

use anyhow::{Result, anyhow};
use axum::Router;
use bifrost::{
    cfg::RetryConfig,
    storage::{BlockStatus, ScannerStorage, SqliteScannerStorage},
};
use tokio::{net::TcpListener, time::timeout};

/// Serves `router` on an ephemeral local port and returns its base URL.
async fn serve(router: Router) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move { axum::serve(listener, router).await.unwrap() });
    format!("http://{addr}")
}

/// Retries quickly enough that a test can observe several attempts.
fn fast_retry() -> RetryConfig {
    RetryConfig {
        initial_interval: Duration::from_millis(5),
        multiplier: 1.5,
        randomization_factor: 0.0,
        max_interval: Duration::from_millis(20),
        max_elapsed_time: Some(Duration::from_secs(5)),
    }
}

/// Waits at most a few seconds for `future`, so a broken test fails instead of hanging.
async fn within<T>(future: impl Future<Output = T>) -> T {
    timeout(Duration::from_secs(10), future)
        .await
        .expect("timed out")
}

/// Wraps a real storage, but fails every attempt to persist the scan position.
struct ScanPosFailingStorage(SqliteScannerStorage);

impl ScannerStorage for ScanPosFailingStorage {
    fn get_scan_pos(&self) -> Result<Option<u64>> {
        self.0.get_scan_pos()
    }

    fn set_scan_pos(&self, _: u64) -> Result<()> {
        Err(anyhow!("disk full"))
    }

    fn set_block_status(&self, height: u64, status: BlockStatus) -> Result<()> {
        self.0.set_block_status(height, status)
    }

    fn get_blocks_for_retry(&self, failed_only: bool) -> Result<Vec<u64>> {
        self.0.get_blocks_for_retry(failed_only)
    }
}

/// Wraps a real storage, but fails every attempt to record a block status.
struct StatusFailingStorage(SqliteScannerStorage);

impl ScannerStorage for StatusFailingStorage {
    fn get_scan_pos(&self) -> Result<Option<u64>> {
        self.0.get_scan_pos()
    }

    fn set_scan_pos(&self, height: u64) -> Result<()> {
        self.0.set_scan_pos(height)
    }

    fn set_block_status(&self, _: u64, _: BlockStatus) -> Result<()> {
        Err(anyhow!("database is locked"))
    }

    fn get_blocks_for_retry(&self, failed_only: bool) -> Result<Vec<u64>> {
        self.0.get_blocks_for_retry(failed_only)
    }
}
