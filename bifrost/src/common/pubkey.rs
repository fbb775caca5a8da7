use std::{fmt, str::FromStr};

use anyhow::{Result, anyhow};
use bech32::{Bech32, Hrp};
use k256::ecdsa::{SigningKey, VerifyingKey};
use ripemd::Ripemd160;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::Keccak256;

use super::{Address, Chain};
use crate::serde_util::display_from_str;

const PUBKEY_HRP: &str = "thorpub";

/// A compressed secp256k1 public key, written as bech32 with the `thorpub` prefix. Vault keys are of this type.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct PubKey([u8; 33]);

pub type PubKeys = Vec<PubKey>;

impl PubKey {
    pub fn from_verifying_key(key: &VerifyingKey) -> Self {
        let point = key.to_encoded_point(true);
        let mut bytes = [0u8; 33];
        bytes.copy_from_slice(point.as_bytes());
        PubKey(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let key = VerifyingKey::from_sec1_bytes(bytes)
            .map_err(|_| anyhow!("invalid secp256k1 public key"))?;
        Ok(Self::from_verifying_key(&key))
    }

    /// Generates a key nobody holds the secret for. Useful for tests and placeholders.
    pub fn random() -> Self {
        let key = SigningKey::random(&mut rand::rngs::OsRng);
        Self::from_verifying_key(key.verifying_key())
    }

    pub fn as_bytes(&self) -> &[u8; 33] {
        &self.0
    }

    fn verifying_key(&self) -> Result<VerifyingKey> {
        VerifyingKey::from_sec1_bytes(&self.0).map_err(|_| anyhow!("invalid secp256k1 public key"))
    }

    /// The address this key controls on `chain`.
    pub fn address(&self, chain: Chain) -> Result<Address> {
        match chain {
            Chain::BNB => cosmos_address("bnb", &self.0),
            Chain::THOR => cosmos_address("thor", &self.0),
            Chain::ETH => {
                let uncompressed = self.verifying_key()?.to_encoded_point(false);
                let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);
                Ok(Address::new(format!("0x{}", hex::encode(&hash[12..]))))
            }
            Chain::BTC => Err(anyhow!("address derivation for {chain} is not supported")),
        }
    }
}

fn cosmos_address(hrp: &str, key: &[u8]) -> Result<Address> {
    let hash = Ripemd160::digest(Sha256::digest(key));
    let encoded = bech32::encode::<Bech32>(Hrp::parse(hrp)?, &hash)?;
    Ok(Address::new(encoded))
}

impl fmt::Display for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The HRP is a valid constant and the payload is fixed-size, so encoding cannot fail.
        let hrp = Hrp::parse_unchecked(PUBKEY_HRP);
        match bech32::encode::<Bech32>(hrp, &self.0) {
            Ok(s) => f.write_str(&s),
            Err(_) => Err(fmt::Error),
        }
    }
}

impl fmt::Debug for PubKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PubKey({self})")
    }
}

impl FromStr for PubKey {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (hrp, data) = bech32::decode(s)?;
        if hrp.as_str() != PUBKEY_HRP {
            return Err(anyhow!(
                "pub key {s} has prefix {hrp}, expected {PUBKEY_HRP}"
            ));
        }
        PubKey::from_bytes(&data)
    }
}

impl Serialize for PubKey {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        display_from_str::serialize(self, serializer)
    }
}

impl<'de> Deserialize<'de> for PubKey {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        display_from_str::deserialize(deserializer)
    }
}
