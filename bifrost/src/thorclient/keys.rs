//! The key the bridge signs THORChain transactions with.
//!
//! Each signer is stored as `<home>/keys/<name>.json`, holding the hex secret key and a salted SHA-256 digest of the
//! passphrase. The passphrase only gates loading the key; the file itself is not encrypted.

use std::{
    fs,
    io::Write,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result, anyhow};
use base64::Engine;
use k256::ecdsa::{Signature, SigningKey, signature::Signer};
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::info;

use super::{
    msgs::{SignaturePubKey, StdSignature, StdTx},
    types::AccountState,
};
use crate::common::{Address, Chain, PubKey};

const SECP256K1_PUBKEY_TYPE: &str = "tendermint/PubKeySecp256k1";

#[derive(Serialize, Deserialize)]
struct KeyFile {
    name: String,
    secret_key: String,
    salt: String,
    passphrase_hash: String,
}

fn passphrase_hash(salt: &[u8], passphrase: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(passphrase.as_bytes());
    hex::encode(hasher.finalize())
}

pub struct Keys {
    name: String,
    signing_key: SigningKey,
    pub_key: PubKey,
    address: Address,
}

impl std::fmt::Debug for Keys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keys")
            .field("name", &self.name)
            .field("address", &self.address)
            .finish_non_exhaustive()
    }
}

impl Keys {
    pub fn key_path(home: &Path, name: &str) -> PathBuf {
        home.join("keys").join(format!("{name}.json"))
    }

    /// Loads the key called `name` from the key store in `home`, creating and saving a fresh one if it does not
    /// exist yet.
    pub fn load_or_create(home: impl AsRef<Path>, name: &str, passphrase: &str) -> Result<Self> {
        let path = Self::key_path(home.as_ref(), name);
        if path.exists() {
            Self::load(&path, name, passphrase)
        } else {
            Self::create(&path, name, passphrase)
        }
    }

    fn load(path: &Path, name: &str, passphrase: &str) -> Result<Self> {
        let contents =
            fs::read_to_string(path).with_context(|| format!("unable to read {}", path.display()))?;
        let file: KeyFile = serde_json::from_str(&contents)
            .with_context(|| format!("malformed key file {}", path.display()))?;

        let salt = hex::decode(&file.salt)?;
        if passphrase_hash(&salt, passphrase) != file.passphrase_hash {
            return Err(anyhow!("invalid passphrase for key {name}"));
        }

        let secret = hex::decode(&file.secret_key)?;
        let signing_key =
            SigningKey::from_slice(&secret).map_err(|_| anyhow!("invalid secret key for {name}"))?;
        Self::from_signing_key(name, signing_key)
    }

    fn create(path: &Path, name: &str, passphrase: &str) -> Result<Self> {
        let signing_key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut salt = [0u8; 16];
        rand::rngs::OsRng.fill_bytes(&mut salt);

        let file = KeyFile {
            name: name.to_owned(),
            secret_key: hex::encode(signing_key.to_bytes()),
            salt: hex::encode(salt),
            passphrase_hash: passphrase_hash(&salt, passphrase),
        };

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("unable to create {}", parent.display()))?;
        }
        let mut options = fs::OpenOptions::new();
        options.write(true).create_new(true);
        #[cfg(unix)]
        {
            use std::os::unix::fs::OpenOptionsExt;
            options.mode(0o600);
        }
        let mut out = options
            .open(path)
            .with_context(|| format!("unable to create {}", path.display()))?;
        out.write_all(serde_json::to_string_pretty(&file)?.as_bytes())?;

        let keys = Self::from_signing_key(name, signing_key)?;
        info!(name, address = %keys.address, "created signer key");
        Ok(keys)
    }

    pub fn from_signing_key(name: &str, signing_key: SigningKey) -> Result<Self> {
        let pub_key = PubKey::from_verifying_key(signing_key.verifying_key());
        let address = pub_key.address(Chain::THOR)?;
        Ok(Keys {
            name: name.to_owned(),
            signing_key,
            pub_key,
            address,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn pub_key(&self) -> PubKey {
        self.pub_key
    }

    /// Signs `message` with ECDSA over its SHA-256 digest.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.signing_key.sign(message)
    }

    /// Signs `tx` for submission with `account` on `chain_id`.
    pub fn sign_tx(&self, tx: &StdTx, chain_id: &str, account: AccountState) -> Result<StdSignature> {
        let bytes = tx.sign_bytes(chain_id, account.account_number, account.sequence)?;
        let signature = self.sign(&bytes);
        let b64 = base64::engine::general_purpose::STANDARD;
        Ok(StdSignature {
            pub_key: SignaturePubKey {
                ty: SECP256K1_PUBKEY_TYPE.to_owned(),
                value: b64.encode(self.pub_key.as_bytes()),
            },
            signature: b64.encode(signature.to_bytes()),
            account_number: account.account_number,
            sequence: account.sequence,
        })
    }
}
