//! THORChain state types the bridge reads and writes.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{
    common::{Address, Chain, Coins, PubKey, TxId},
    serde_util::num_as_str,
};

/// A transaction as seen on an external chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tx {
    pub id: TxId,
    pub chain: Chain,
    pub from_address: Address,
    pub to_address: Address,
    pub coins: Coins,
    #[serde(default)]
    pub gas: Coins,
    #[serde(default)]
    pub memo: String,
}

impl Tx {
    /// The chain whose addressing rules apply to this transaction: that of the first coin, or BNB if the
    /// transaction moves no coins.
    pub fn address_chain(&self) -> Chain {
        self.coins
            .first()
            .map_or(Chain::BNB, |coin| coin.asset.chain)
    }
}

/// A transaction this node has observed, together with the vault it was observed against.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservedTx {
    pub tx: Tx,
    #[serde(with = "num_as_str")]
    pub block_height: u64,
    pub observed_pub_key: PubKey,
    #[serde(default)]
    pub signers: Vec<Address>,
}

impl ObservedTx {
    pub fn new(tx: Tx, block_height: u64, observed_pub_key: PubKey) -> Self {
        ObservedTx {
            tx,
            block_height,
            observed_pub_key,
            signers: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeygenType {
    Asgard,
    Yggdrasil,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeStatus {
    Whitelisted,
    Standby,
    Ready,
    Active,
    Disabled,
    #[serde(other)]
    Unknown,
}

impl fmt::Display for NodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            NodeStatus::Whitelisted => "whitelisted",
            NodeStatus::Standby => "standby",
            NodeStatus::Ready => "ready",
            NodeStatus::Active => "active",
            NodeStatus::Disabled => "disabled",
            NodeStatus::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAccount {
    pub node_address: Address,
    pub status: NodeStatus,
    #[serde(default)]
    pub bond_address: Option<Address>,
}

impl NodeAccount {
    /// Whether THORChain will accept transactions signed by this node.
    pub fn is_whitelisted(&self) -> bool {
        !matches!(self.status, NodeStatus::Disabled | NodeStatus::Unknown)
    }
}

/// An event THORChain emitted while processing an inbound transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(with = "num_as_str")]
    pub id: u64,
    #[serde(with = "num_as_str")]
    pub height: u64,
    #[serde(rename = "type")]
    pub ty: String,
    #[serde(default)]
    pub in_tx: Option<Tx>,
    pub status: String,
    #[serde(default)]
    pub event: serde_json::Value,
}
