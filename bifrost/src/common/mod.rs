//! Chain-agnostic primitives shared by the observer and the THORChain client.

use std::{
    fmt,
    hash::{Hash, Hasher},
    str::FromStr,
};

use anyhow::{Result, anyhow};
use serde::{Deserialize, Serialize};

use crate::serde_util::{display_from_str, num_as_str};

mod blame;
mod pubkey;

pub use blame::Blame;
pub use pubkey::{PubKey, PubKeys};

/// A chain THORChain knows about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Chain {
    BNB,
    THOR,
    ETH,
    BTC,
}

impl Chain {
    pub fn as_str(&self) -> &'static str {
        match self {
            Chain::BNB => "BNB",
            Chain::THOR => "THOR",
            Chain::ETH => "ETH",
            Chain::BTC => "BTC",
        }
    }
}

impl fmt::Display for Chain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Chain {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "BNB" => Ok(Chain::BNB),
            "THOR" | "THORCHAIN" => Ok(Chain::THOR),
            "ETH" => Ok(Chain::ETH),
            "BTC" => Ok(Chain::BTC),
            _ => Err(anyhow!("unknown chain: {s}")),
        }
    }
}

/// An asset in `CHAIN.SYMBOL` notation, e.g. `BNB.BNB` or `BNB.TCAN-014`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Asset {
    pub chain: Chain,
    pub symbol: String,
}

impl Asset {
    pub fn new(chain: Chain, symbol: impl Into<String>) -> Self {
        Asset {
            chain,
            symbol: symbol.into().to_uppercase(),
        }
    }

    /// The ticker is the symbol without any `-XXX` suffix.
    pub fn ticker(&self) -> &str {
        self.symbol
            .split_once('-')
            .map_or(self.symbol.as_str(), |(ticker, _)| ticker)
    }
}

impl fmt::Display for Asset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.chain, self.symbol)
    }
}

impl FromStr for Asset {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (chain, symbol) = s
            .split_once('.')
            .ok_or_else(|| anyhow!("asset {s} is not in CHAIN.SYMBOL form"))?;
        if symbol.is_empty() {
            return Err(anyhow!("asset {s} has an empty symbol"));
        }
        Ok(Asset::new(chain.parse()?, symbol))
    }
}

impl Serialize for Asset {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        display_from_str::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for Asset {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        display_from_str::deserialize(deserializer)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub asset: Asset,
    #[serde(with = "num_as_str")]
    pub amount: u64,
}

impl Coin {
    pub fn new(asset: Asset, amount: u64) -> Self {
        Coin { asset, amount }
    }
}

impl fmt::Display for Coin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.amount, self.asset)
    }
}

pub type Coins = Vec<Coin>;

/// An address on any chain. Comparison is case-insensitive since chains disagree on the canonical case.
#[derive(Debug, Clone, Default, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(address: impl Into<String>) -> Self {
        Address(address.into())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl PartialEq for Address {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Hash for Address {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for byte in self.0.bytes() {
            state.write_u8(byte.to_ascii_lowercase());
        }
        state.write_u8(0xff);
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(s: &str) -> Self {
        Address::new(s)
    }
}

/// The hash of a transaction on any chain, without any `0x` prefix and in upper case.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TxId(String);

impl TxId {
    pub fn new(id: &str) -> Result<Self> {
        let id = id.trim_start_matches("0x");
        if id.is_empty() {
            return Err(anyhow!("tx id is empty"));
        }
        if !id.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(anyhow!("tx id {id} is not hex"));
        }
        Ok(TxId(id.to_uppercase()))
    }

    /// An id derived from a hash computed locally, rather than one reported by a chain.
    pub fn from_digest(digest: &[u8]) -> Self {
        TxId(hex::encode_upper(digest))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TxId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for TxId {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        TxId::new(s)
    }
}

impl Serialize for TxId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        display_from_str::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for TxId {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        display_from_str::deserialize(deserializer)
    }
}
