use serde::{Deserialize, Serialize};

use super::msgs::StdTx;

/// The response to `GET /auth/accounts/{address}`. Numbers are left as strings so a malformed value can be reported
/// as-is.
#[derive(Debug, Clone, Deserialize)]
pub struct AccountResp {
    pub result: AccountResult,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountResult {
    pub value: AccountValue,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AccountValue {
    #[serde(default)]
    pub address: String,
    pub account_number: String,
    pub sequence: String,
}

/// The signer's account number and next sequence number on THORChain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccountState {
    pub account_number: u64,
    pub sequence: u64,
}

/// How long `POST /txs` waits before answering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BroadcastMode {
    /// Return after the transaction has passed `CheckTx`.
    Sync,
    /// Return immediately.
    Async,
    /// Return once the transaction has been committed in a block.
    #[serde(rename = "block")]
    Commit,
}

#[derive(Debug, Clone, Serialize)]
pub struct BroadcastRequest<'a> {
    pub tx: &'a StdTx,
    pub mode: BroadcastMode,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BroadcastResponse {
    pub txhash: String,
    /// Not always a number, e.g. it is empty for `async` broadcasts.
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub code: u32,
    #[serde(default)]
    pub raw_log: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastBlockResp {
    #[serde(with = "crate::serde_util::num_as_str")]
    pub thorchain: u64,
}
