//! Chain-specific block fetching and decoding.
//!
//! The scanner only knows about heights. A [BlockDecoder] knows how to ask a particular kind of node for its current
//! height and for the block at a height, and how to pull the raw transactions out of the answer.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use serde::Deserialize;
use serde_json::json;

use crate::{cfg::DecoderKind, error::HeightError};

/// How to fetch a single block. Requests with a body are sent as a JSON `POST`, the rest as a `GET`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRequest {
    pub url: String,
    pub body: Option<Vec<u8>>,
}

pub trait BlockDecoder: Send + Sync {
    /// How to ask the node at `host` for its current height.
    fn height_request(&self, host: &str) -> Result<BlockRequest>;

    fn parse_height(&self, body: &[u8]) -> Result<u64, HeightError>;

    fn block_request(&self, host: &str, height: u64) -> Result<BlockRequest>;

    /// Returns the height of the block and its transactions, each encoded as a string.
    fn parse_block(&self, body: &[u8]) -> Result<(u64, Vec<String>)>;
}

pub fn decoder_for(kind: DecoderKind) -> Arc<dyn BlockDecoder> {
    match kind {
        DecoderKind::Tendermint => Arc::new(TendermintDecoder),
        DecoderKind::Ethereum => Arc::new(EthereumDecoder),
    }
}

/// Tendermint RPC (`/block?height=N`). Transactions are base64 in the response and returned hex-encoded.
#[derive(Debug, Clone, Copy, Default)]
pub struct TendermintDecoder;

#[derive(Deserialize)]
struct TendermintResponse {
    result: TendermintResult,
}

#[derive(Deserialize)]
struct TendermintResult {
    block: TendermintBlock,
}

#[derive(Deserialize)]
struct TendermintBlock {
    header: TendermintHeader,
    #[serde(default)]
    data: TendermintData,
}

#[derive(Deserialize)]
struct TendermintHeader {
    height: String,
}

#[derive(Deserialize, Default)]
struct TendermintData {
    #[serde(default)]
    txs: Option<Vec<String>>,
}

fn unmarshal<'a, T: Deserialize<'a>>(body: &'a [u8]) -> Result<T, HeightError> {
    serde_json::from_slice(body).map_err(|source| HeightError::Unmarshal {
        body: String::from_utf8_lossy(body).into_owned(),
        source,
    })
}

impl BlockDecoder for TendermintDecoder {
    fn height_request(&self, host: &str) -> Result<BlockRequest> {
        Ok(BlockRequest {
            url: format!("{host}/block"),
            body: None,
        })
    }

    fn parse_height(&self, body: &[u8]) -> Result<u64, HeightError> {
        let response: TendermintResponse = unmarshal(body)?;
        let raw = response.result.block.header.height;
        raw.parse().map_err(|e: std::num::ParseIntError| HeightError::Parse {
            reason: e.to_string(),
            raw,
        })
    }

    fn block_request(&self, host: &str, height: u64) -> Result<BlockRequest> {
        Ok(BlockRequest {
            url: format!("{host}/block?height={height}"),
            body: None,
        })
    }

    fn parse_block(&self, body: &[u8]) -> Result<(u64, Vec<String>)> {
        let response: TendermintResponse =
            serde_json::from_slice(body).context("fail to unmarshal tendermint block")?;
        let block = response.result.block;
        let height = block
            .header
            .height
            .parse()
            .with_context(|| format!("fail to parse block height {:?}", block.header.height))?;

        let txs = block
            .data
            .txs
            .unwrap_or_default()
            .iter()
            .map(|tx| {
                let raw = base64::engine::general_purpose::STANDARD
                    .decode(tx)
                    .with_context(|| format!("fail to decode tx {tx:?} in block {height}"))?;
                Ok(hex::encode(raw))
            })
            .collect::<Result<_>>()?;

        Ok((height, txs))
    }
}

/// Ethereum JSON-RPC (`eth_getBlockByNumber` with full transactions). Each transaction object is returned as JSON.
#[derive(Debug, Clone, Copy, Default)]
pub struct EthereumDecoder;

#[derive(Deserialize)]
struct EthereumResponse {
    #[serde(default)]
    result: Option<EthereumBlock>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

#[derive(Deserialize)]
struct EthereumBlockNumber {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<serde_json::Value>,
}

fn parse_quantity(raw: &str) -> Result<u64> {
    let digits = raw
        .strip_prefix("0x")
        .ok_or_else(|| anyhow!("{raw:?} is not a hex quantity"))?;
    Ok(u64::from_str_radix(digits, 16)?)
}

fn rpc_body(method: &str, params: serde_json::Value) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&json!({
        "jsonrpc": "2.0",
        "id": 1,
        "method": method,
        "params": params,
    }))?)
}

#[derive(Deserialize)]
struct EthereumBlock {
    number: String,
    #[serde(default)]
    transactions: Vec<serde_json::Value>,
}

impl BlockDecoder for EthereumDecoder {
    fn height_request(&self, host: &str) -> Result<BlockRequest> {
        Ok(BlockRequest {
            url: host.to_owned(),
            body: Some(rpc_body("eth_blockNumber", json!([]))?),
        })
    }

    fn parse_height(&self, body: &[u8]) -> Result<u64, HeightError> {
        let response: EthereumBlockNumber = unmarshal(body)?;
        if let Some(error) = response.error {
            return Err(HeightError::Rpc(error.to_string()));
        }
        let raw = response
            .result
            .ok_or_else(|| HeightError::Rpc("no result".to_owned()))?;
        parse_quantity(&raw).map_err(|e| HeightError::Parse {
            reason: e.to_string(),
            raw,
        })
    }

    fn block_request(&self, host: &str, height: u64) -> Result<BlockRequest> {
        Ok(BlockRequest {
            url: host.to_owned(),
            body: Some(rpc_body(
                "eth_getBlockByNumber",
                json!([format!("{height:#x}"), true]),
            )?),
        })
    }

    fn parse_block(&self, body: &[u8]) -> Result<(u64, Vec<String>)> {
        let response: EthereumResponse =
            serde_json::from_slice(body).context("fail to unmarshal ethereum block")?;
        if let Some(error) = response.error {
            return Err(anyhow!("rpc error: {error}"));
        }
        let block = response
            .result
            .ok_or_else(|| anyhow!("block not found"))?;

        let height = parse_quantity(&block.number)
            .with_context(|| format!("fail to parse block number {:?}", block.number))?;

        let txs = block
            .transactions
            .iter()
            .map(serde_json::to_string)
            .collect::<Result<_, _>>()?;

        Ok((height, txs))
    }
}
