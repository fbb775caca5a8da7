//! The subset of THORChain's transaction format the bridge has to produce.
//!
//! Transactions are amino JSON: each message is wrapped as `{"type": ..., "value": ...}` and the bytes that get signed
//! are the canonical (key-sorted, whitespace-free) JSON of the sign document.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{
    common::{Address, Blame, Coins, PubKey, PubKeys, TxId},
    serde_util::num_as_str,
    types::{KeygenType, ObservedTx},
};

/// Gas every bridge transaction pays.
pub const BRIDGE_TX_GAS: u64 = 100_000_000;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeeCoin {
    pub denom: String,
    pub amount: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdFee {
    pub amount: Vec<FeeCoin>,
    #[serde(with = "num_as_str")]
    pub gas: u64,
}

impl StdFee {
    pub fn new(gas: u64) -> Self {
        StdFee {
            amount: Vec::new(),
            gas,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignaturePubKey {
    #[serde(rename = "type")]
    pub ty: String,
    /// Base64 of the compressed key.
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdSignature {
    pub pub_key: SignaturePubKey,
    /// Base64 of the 64-byte `r || s` signature.
    pub signature: String,
    #[serde(with = "num_as_str")]
    pub account_number: u64,
    #[serde(with = "num_as_str")]
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StdTx {
    pub msg: Vec<Msg>,
    pub fee: StdFee,
    #[serde(default)]
    pub signatures: Vec<StdSignature>,
    pub memo: String,
}

#[derive(Serialize)]
struct StdSignDoc<'a> {
    #[serde(with = "num_as_str")]
    account_number: u64,
    chain_id: &'a str,
    fee: &'a StdFee,
    memo: &'a str,
    msgs: &'a [Msg],
    #[serde(with = "num_as_str")]
    sequence: u64,
}

impl StdTx {
    /// An unsigned transaction with the standard bridge fee and no memo.
    pub fn new(msg: Vec<Msg>) -> Self {
        StdTx {
            msg,
            fee: StdFee::new(BRIDGE_TX_GAS),
            signatures: Vec::new(),
            memo: String::new(),
        }
    }

    /// The bytes a signer commits to when signing this transaction as `(account_number, sequence)` on `chain_id`.
    pub fn sign_bytes(&self, chain_id: &str, account_number: u64, sequence: u64) -> Result<Vec<u8>> {
        let doc = StdSignDoc {
            account_number,
            chain_id,
            fee: &self.fee,
            memo: &self.memo,
            msgs: &self.msg,
            sequence,
        };
        // Round-tripping through `Value` sorts every object's keys.
        let canonical = serde_json::to_value(&doc)?;
        Ok(serde_json::to_vec(&canonical)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "value")]
pub enum Msg {
    #[serde(rename = "thorchain/MsgTssKeysignFail")]
    TssKeysignFail(MsgTssKeysignFail),
    #[serde(rename = "thorchain/MsgTssPool")]
    TssPool(MsgTssPool),
    #[serde(rename = "thorchain/ObservedTxIn")]
    ObservedTxIn(MsgObservedTx),
    #[serde(rename = "thorchain/ObservedTxOut")]
    ObservedTxOut(MsgObservedTx),
}

/// Reports that a keysign round did not complete, and who is to blame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgTssKeysignFail {
    pub id: TxId,
    #[serde(with = "num_as_str")]
    pub height: u64,
    pub blame: Blame,
    pub memo: String,
    pub coins: Coins,
    pub signer: Address,
}

impl MsgTssKeysignFail {
    pub fn new(height: u64, blame: Blame, memo: String, coins: Coins, signer: Address) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(height.to_string());
        hasher.update(&memo);
        for coin in &coins {
            hasher.update(coin.to_string());
        }
        for node in &blame.blame_nodes {
            hasher.update(node.to_string());
        }
        MsgTssKeysignFail {
            id: TxId::from_digest(&hasher.finalize()),
            height,
            blame,
            memo,
            coins,
            signer,
        }
    }
}

/// Reports the outcome of a keygen round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgTssPool {
    pub id: TxId,
    pub pool_pub_key: PubKey,
    pub keygen_type: KeygenType,
    pub pub_keys: PubKeys,
    #[serde(with = "num_as_str")]
    pub height: u64,
    pub blame: Blame,
    pub signer: Address,
}

impl MsgTssPool {
    pub fn new(
        pub_keys: PubKeys,
        pool_pub_key: PubKey,
        keygen_type: KeygenType,
        height: u64,
        blame: Blame,
        signer: Address,
    ) -> Self {
        // Every member of the keygen computes the same id, regardless of the order it learnt the members in.
        let mut members: Vec<String> = pub_keys.iter().map(PubKey::to_string).collect();
        members.sort();
        let mut hasher = Sha256::new();
        for member in &members {
            hasher.update(member);
        }
        hasher.update(pool_pub_key.to_string());
        hasher.update(height.to_string());
        MsgTssPool {
            id: TxId::from_digest(&hasher.finalize()),
            pool_pub_key,
            keygen_type,
            pub_keys,
            height,
            blame,
            signer,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MsgObservedTx {
    pub txs: Vec<ObservedTx>,
    pub signer: Address,
}
