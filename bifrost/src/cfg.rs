use std::time::Duration;

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::{common::Chain, http::RetryPolicy};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// External chain observation: the block scanner and where its state is kept.
    pub observer: ObserverConfig,
    /// Connection and signer settings for THORChain.
    pub thorchain: ThorchainConfig,
    /// The base address of the OTLP collector. If not set, metrics will not be exported.
    #[serde(default)]
    pub otlp_collector_endpoint: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<()> {
        self.observer.block_scanner.validate()?;
        self.thorchain.validate()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ObserverConfig {
    /// The location of the scanner database. If not set, scanner state is kept in memory and lost on restart.
    #[serde(default)]
    pub db_path: Option<String>,
    pub block_scanner: BlockScannerConfig,
}

/// Which decoder turns raw block payloads of the external chain into transactions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DecoderKind {
    #[default]
    Tendermint,
    Ethereum,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BlockScannerConfig {
    /// RPC endpoint of the external chain. `http://` is assumed if no scheme is given.
    pub rpc_host: String,
    /// Height to resume from when no scan position has been persisted yet.
    #[serde(default)]
    pub start_block_height: u64,
    /// Capacity of the height delivery queue. Defaults to 2.
    #[serde(default = "block_scan_processors_default")]
    pub block_scan_processors: usize,
    /// Timeout applied to each individual HTTP request. Defaults to 30 seconds.
    #[serde(default = "http_request_timeout_default")]
    pub http_request_timeout: Duration,
    /// Maximum number of attempts for a single HTTP fetch. Defaults to 10.
    #[serde(default = "max_http_request_retry_default")]
    pub max_http_request_retry: u32,
    /// How long to wait before polling again once we have caught up with the chain head. Defaults to 1 second.
    #[serde(default = "block_height_discover_backoff_default")]
    pub block_height_discover_backoff: Duration,
    /// How often failed blocks are offered again to consumers. Defaults to 1 second.
    #[serde(default = "block_retry_interval_default")]
    pub block_retry_interval: Duration,
    /// The chain being scanned.
    #[serde(default = "chain_id_default")]
    pub chain_id: Chain,
    #[serde(default)]
    pub decoder: DecoderKind,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl BlockScannerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rpc_host.trim().is_empty() {
            return Err(anyhow!("block scanner rpc_host is empty"));
        }
        if self.block_scan_processors == 0 {
            return Err(anyhow!("block_scan_processors must be at least 1"));
        }
        if self.max_http_request_retry == 0 {
            return Err(anyhow!("max_http_request_retry must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .to_policy(self.max_http_request_retry, self.http_request_timeout)
    }
}

impl Default for BlockScannerConfig {
    fn default() -> Self {
        BlockScannerConfig {
            rpc_host: String::new(),
            start_block_height: 0,
            block_scan_processors: block_scan_processors_default(),
            http_request_timeout: http_request_timeout_default(),
            max_http_request_retry: max_http_request_retry_default(),
            block_height_discover_backoff: block_height_discover_backoff_default(),
            block_retry_interval: block_retry_interval_default(),
            chain_id: chain_id_default(),
            decoder: DecoderKind::default(),
            retry: RetryConfig::default(),
        }
    }
}

/// Exponential backoff parameters shared by every HTTP client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RetryConfig {
    #[serde(default = "initial_interval_default")]
    pub initial_interval: Duration,
    #[serde(default = "multiplier_default")]
    pub multiplier: f64,
    #[serde(default = "randomization_factor_default")]
    pub randomization_factor: f64,
    #[serde(default = "max_interval_default")]
    pub max_interval: Duration,
    /// Give up once this much time has passed since the first attempt. `None` means only the attempt cap applies.
    #[serde(default = "max_elapsed_time_default")]
    pub max_elapsed_time: Option<Duration>,
}

impl RetryConfig {
    pub fn to_policy(&self, max_attempts: u32, request_timeout: Duration) -> RetryPolicy {
        RetryPolicy {
            initial_interval: self.initial_interval,
            multiplier: self.multiplier,
            randomization_factor: self.randomization_factor,
            max_interval: self.max_interval,
            max_elapsed_time: self.max_elapsed_time,
            max_attempts,
            request_timeout,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        RetryConfig {
            initial_interval: initial_interval_default(),
            multiplier: multiplier_default(),
            randomization_factor: randomization_factor_default(),
            max_interval: max_interval_default(),
            max_elapsed_time: max_elapsed_time_default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ThorchainConfig {
    #[serde(default = "thorchain_chain_id_default")]
    pub chain_id: String,
    /// `host:port` of the THORChain REST API.
    #[serde(default = "chain_host_default")]
    pub chain_host: String,
    /// Directory holding the signer key store.
    #[serde(default = "chain_home_folder_default")]
    pub chain_home_folder: String,
    pub signer_name: String,
    pub signer_passwd: String,
    /// How often to check whether this node has been whitelisted. Defaults to 30 seconds.
    #[serde(default = "whitelist_poll_interval_default")]
    pub whitelist_poll_interval: Duration,
    /// Give up waiting for the node to be whitelisted after this long. Defaults to one hour.
    #[serde(default = "whitelist_timeout_default")]
    pub whitelist_timeout: Duration,
    #[serde(default = "http_request_timeout_default")]
    pub http_request_timeout: Duration,
    #[serde(default = "thorchain_max_http_request_retry_default")]
    pub max_http_request_retry: u32,
    #[serde(default)]
    pub retry: RetryConfig,
}

impl ThorchainConfig {
    pub fn validate(&self) -> Result<()> {
        if self.whitelist_poll_interval.is_zero() {
            return Err(anyhow!("whitelist_poll_interval must be non-zero"));
        }
        if self.max_http_request_retry == 0 {
            return Err(anyhow!("max_http_request_retry must be at least 1"));
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
            .to_policy(self.max_http_request_retry, self.http_request_timeout)
    }
}

impl Default for ThorchainConfig {
    fn default() -> Self {
        ThorchainConfig {
            chain_id: thorchain_chain_id_default(),
            chain_host: chain_host_default(),
            chain_home_folder: chain_home_folder_default(),
            signer_name: String::new(),
            signer_passwd: String::new(),
            whitelist_poll_interval: whitelist_poll_interval_default(),
            whitelist_timeout: whitelist_timeout_default(),
            http_request_timeout: http_request_timeout_default(),
            max_http_request_retry: thorchain_max_http_request_retry_default(),
            retry: RetryConfig::default(),
        }
    }
}

pub fn block_scan_processors_default() -> usize {
    2
}

pub fn http_request_timeout_default() -> Duration {
    Duration::from_secs(30)
}

pub fn max_http_request_retry_default() -> u32 {
    10
}

pub fn thorchain_max_http_request_retry_default() -> u32 {
    4
}

pub fn block_height_discover_backoff_default() -> Duration {
    Duration::from_secs(1)
}

pub fn block_retry_interval_default() -> Duration {
    Duration::from_secs(1)
}

pub fn chain_id_default() -> Chain {
    Chain::BNB
}

pub fn initial_interval_default() -> Duration {
    Duration::from_millis(500)
}

pub fn multiplier_default() -> f64 {
    1.5
}

pub fn randomization_factor_default() -> f64 {
    0.5
}

pub fn max_interval_default() -> Duration {
    Duration::from_secs(60)
}

pub fn max_elapsed_time_default() -> Option<Duration> {
    Some(Duration::from_secs(15 * 60))
}

pub fn thorchain_chain_id_default() -> String {
    "thorchain".to_owned()
}

pub fn chain_host_default() -> String {
    "localhost:1317".to_owned()
}

pub fn chain_home_folder_default() -> String {
    ".thorcli".to_owned()
}

pub fn whitelist_poll_interval_default() -> Duration {
    Duration::from_secs(30)
}

pub fn whitelist_timeout_default() -> Duration {
    Duration::from_secs(60 * 60)
}
