use std::time::Duration;

use reqwest::StatusCode;

use crate::{common::TxId, types::NodeStatus};

/// A single failed HTTP attempt.
#[derive(thiserror::Error, Debug)]
pub enum HttpError {
    #[error("fail to send request to {url}: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("unexpected status code {status} from {url}")]
    Status { url: String, status: StatusCode },
    #[error("fail to read response body from {url}: {source}")]
    Body {
        url: String,
        #[source]
        source: reqwest::Error,
    },
}

/// The outcome of a fetch that did not succeed within its retry policy.
#[derive(thiserror::Error, Debug)]
pub enum RetryError {
    #[error("fail to fetch {url} after {attempts} attempts")]
    Exhausted {
        url: String,
        attempts: u32,
        #[source]
        last: HttpError,
    },
    #[error("fetch of {url} cancelled after {attempts} attempts")]
    Cancelled {
        url: String,
        attempts: u32,
        #[source]
        last: HttpError,
    },
}

impl RetryError {
    /// The error from the final attempt.
    pub fn last(&self) -> &HttpError {
        match self {
            RetryError::Exhausted { last, .. } | RetryError::Cancelled { last, .. } => last,
        }
    }
}

/// A chain head response that did not yield a height.
#[derive(thiserror::Error, Debug)]
pub enum HeightError {
    #[error("fail to unmarshal chain head response: {body}")]
    Unmarshal {
        body: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("node returned an error for the chain head: {0}")]
    Rpc(String),
    #[error("fail to parse block height {raw:?}: {reason}")]
    Parse { raw: String, reason: String },
}

#[derive(thiserror::Error, Debug)]
pub enum ScannerError {
    #[error("invalid rpc host {host:?}: {reason}")]
    InvalidEndpoint { host: String, reason: String },
    #[error("fail to persist scanner state at height {height}")]
    Persistence {
        height: u64,
        #[source]
        source: anyhow::Error,
    },
}

#[derive(thiserror::Error, Debug)]
pub enum BridgeError {
    #[error("{0} is empty")]
    EmptyConfig(&'static str),
    #[error("nothing to be signed")]
    NothingToSign,
    #[error("could not determine whether tx {0} is inbound or outbound")]
    AmbiguousDirection(TxId),
    #[error("no events for tx id {0}")]
    EventNotFound(TxId),
    #[error("node account status {0}, will not be able to forward transactions to thorchain")]
    NotWhitelisted(NodeStatus),
    #[error("node is not whitelisted after waiting {0:?}")]
    WhitelistTimeout(Duration),
    #[error("transaction rejected by thorchain with code {code}: {log}")]
    BroadcastRejected { code: u32, log: String },
}
