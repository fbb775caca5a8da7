//! The bridge's connection to THORChain.
//!
//! [ThorchainBridge] turns what this node has observed into signed THORChain transactions and submits them, and
//! answers the questions the signer needs THORChain for (who signs for a vault, has this node been whitelisted).

use std::{sync::Arc, time::Instant};

use anyhow::{Context, Result, anyhow};
use serde::de::DeserializeOwned;
use tokio::{select, sync::RwLock, time::sleep};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    cfg::ThorchainConfig,
    common::{Address, Blame, Coins, PubKey, PubKeys, TxId},
    error::{BridgeError, HttpError, RetryError},
    http::HttpRetryClient,
    metrics::Metrics,
    types::{Event, KeygenType, NodeAccount, ObservedTx},
};

pub mod keys;
pub mod msgs;
pub mod types;

use keys::Keys;
use msgs::{Msg, MsgObservedTx, MsgTssKeysignFail, MsgTssPool, StdTx};
use types::{AccountResp, AccountState, BroadcastMode, BroadcastRequest, BroadcastResponse, LastBlockResp};

pub const AUTH_ACCOUNT_ENDPOINT: &str = "/auth/accounts";
pub const BROADCAST_TXS_ENDPOINT: &str = "/txs";
pub const LAST_BLOCK_ENDPOINT: &str = "/thorchain/lastblock";
pub const NODE_ACCOUNT_ENDPOINT: &str = "/thorchain/nodeaccount";

#[derive(Debug)]
pub struct ThorchainBridge {
    cfg: ThorchainConfig,
    keys: Keys,
    http: HttpRetryClient,
    metrics: Arc<Metrics>,
    /// `None` until first needed, and again after a failed broadcast. The write lock is held from fetching the
    /// account through signing to submission, so concurrent broadcasts never sign with the same sequence number.
    account: RwLock<Option<AccountState>>,
    cancel: CancellationToken,
}

impl ThorchainBridge {
    pub fn new(cfg: ThorchainConfig, metrics: Arc<Metrics>) -> Result<Self> {
        if cfg.chain_id.is_empty() {
            return Err(BridgeError::EmptyConfig("chain id").into());
        }
        if cfg.chain_host.is_empty() {
            return Err(BridgeError::EmptyConfig("chain host").into());
        }
        if cfg.signer_name.is_empty() {
            return Err(BridgeError::EmptyConfig("signer name").into());
        }
        if cfg.signer_passwd.is_empty() {
            return Err(BridgeError::EmptyConfig("signer password").into());
        }
        cfg.validate()?;

        let keys = Keys::load_or_create(&cfg.chain_home_folder, &cfg.signer_name, &cfg.signer_passwd)
            .context("fail to get keybase")?;
        let http = HttpRetryClient::new("thorchain_client", cfg.retry_policy())?;
        info!(address = %keys.address(), chain_host = cfg.chain_host, "thorchain bridge created");

        Ok(ThorchainBridge {
            cfg,
            keys,
            http,
            metrics,
            account: RwLock::new(None),
            cancel: CancellationToken::new(),
        })
    }

    pub fn config(&self) -> &ThorchainConfig {
        &self.cfg
    }

    pub fn keys(&self) -> &Keys {
        &self.keys
    }

    /// Aborts any request that is waiting to be retried and any wait for whitelisting. Subsequent requests only get
    /// one attempt.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn thorchain_url(&self, path: &str) -> String {
        let host = self.cfg.chain_host.trim_end_matches('/');
        if host.starts_with("http://") || host.starts_with("https://") {
            format!("{host}{path}")
        } else {
            format!("http://{host}{path}")
        }
    }

    fn record_http_error(&self, label: &'static str, err: &RetryError) {
        let label = match err.last() {
            HttpError::Transport { .. } => label,
            HttpError::Status { .. } => "unexpected_status_code",
            HttpError::Body { .. } => "fail_read_thorchain_resp",
        };
        self.metrics.thorchain_error(label, err.to_string());
    }

    pub async fn get(&self, path: &str) -> Result<Vec<u8>> {
        let url = self.thorchain_url(path);
        self.http
            .get(&url, &self.cancel)
            .await
            .inspect_err(|e| self.record_http_error("fail_get_from_thorchain", e))
            .context("failed to GET from thorchain")
    }

    pub async fn post(&self, path: &str, body: &[u8]) -> Result<Vec<u8>> {
        let url = self.thorchain_url(path);
        self.http
            .post(&url, body, &self.cancel)
            .await
            .inspect_err(|e| self.record_http_error("fail_post_to_thorchain", e))
            .context("failed to POST to thorchain")
    }

    fn decode<T: DeserializeOwned>(&self, label: &'static str, body: &[u8]) -> Result<T> {
        serde_json::from_slice(body)
            .inspect_err(|e| self.metrics.thorchain_error(label, e.to_string()))
            .with_context(|| format!("{label}: {}", String::from_utf8_lossy(body)))
    }

    /// The signer's account number and current sequence number, as THORChain sees them.
    pub async fn get_account_number_and_sequence_number(&self) -> Result<(u64, u64)> {
        let path = format!("{AUTH_ACCOUNT_ENDPOINT}/{}", self.keys.address());
        let body = self.get(&path).await.context("failed to get auth accounts")?;
        let resp: AccountResp = self.decode("fail_unmarshal_account", &body)?;
        let account = resp.result.value;

        let account_number = account.account_number.parse::<u64>().map_err(|e| {
            self.metrics
                .thorchain_error("fail_parse_account_number", account.account_number.clone());
            anyhow!("failed to parse account number ({}): {e}", account.account_number)
        })?;
        let sequence = account.sequence.parse::<u64>().map_err(|e| {
            self.metrics
                .thorchain_error("fail_parse_sequence_number", account.sequence.clone());
            anyhow!("failed to parse sequence number ({}): {e}", account.sequence)
        })?;
        Ok((account_number, sequence))
    }

    pub fn keysign_failure_tx(&self, blame: Blame, height: u64, memo: String, coins: Coins) -> StdTx {
        let start = Instant::now();
        let msg = MsgTssKeysignFail::new(height, blame, memo, coins, self.keys.address().clone());
        let tx = StdTx::new(vec![Msg::TssKeysignFail(msg)]);
        self.metrics.sign_duration(start.elapsed());
        tx
    }

    /// Tells THORChain a keysign round failed.
    pub async fn post_keysign_failure(
        &self,
        blame: Blame,
        height: u64,
        memo: String,
        coins: Coins,
    ) -> Result<TxId> {
        let tx = self.keysign_failure_tx(blame, height, memo, coins);
        self.broadcast(tx, BroadcastMode::Sync).await
    }

    pub fn keygen_tx(
        &self,
        pool_pub_key: PubKey,
        blame: Blame,
        input_pks: PubKeys,
        keygen_type: KeygenType,
        height: u64,
    ) -> StdTx {
        let start = Instant::now();
        let msg = MsgTssPool::new(
            input_pks,
            pool_pub_key,
            keygen_type,
            height,
            blame,
            self.keys.address().clone(),
        );
        let tx = StdTx::new(vec![Msg::TssPool(msg)]);
        self.metrics.sign_duration(start.elapsed());
        tx
    }

    /// Builds a transaction reporting `txs`. A transaction paying into its observed vault is inbound and one paying
    /// out of it is outbound; anything else is rejected.
    pub fn observations_tx(&self, txs: &[ObservedTx]) -> Result<StdTx> {
        if txs.is_empty() {
            self.metrics.thorchain_error("nothing_to_sign", "");
            return Err(BridgeError::NothingToSign.into());
        }
        let start = Instant::now();
        let result = self.partition_observations(txs);
        self.metrics.sign_duration(start.elapsed());

        let (inbound, outbound) = result?;
        let signer = self.keys.address().clone();
        let mut msgs = Vec::with_capacity(2);
        if !inbound.is_empty() {
            msgs.push(Msg::ObservedTxIn(MsgObservedTx {
                txs: inbound,
                signer: signer.clone(),
            }));
        }
        if !outbound.is_empty() {
            msgs.push(Msg::ObservedTxOut(MsgObservedTx {
                txs: outbound,
                signer,
            }));
        }
        Ok(StdTx::new(msgs))
    }

    fn partition_observations(&self, txs: &[ObservedTx]) -> Result<(Vec<ObservedTx>, Vec<ObservedTx>)> {
        let mut inbound = Vec::new();
        let mut outbound = Vec::new();
        for observed in txs {
            let vault: Address = observed.observed_pub_key.address(observed.tx.address_chain())?;
            if observed.tx.to_address == vault {
                inbound.push(observed.clone());
            } else if observed.tx.from_address == vault {
                outbound.push(observed.clone());
            } else {
                return Err(BridgeError::AmbiguousDirection(observed.tx.id.clone()).into());
            }
        }
        Ok((inbound, outbound))
    }

    /// Signs `tx` with the signer's next sequence number and submits it.
    pub async fn broadcast(&self, mut tx: StdTx, mode: BroadcastMode) -> Result<TxId> {
        let mut account = self.account.write().await;
        let result = self.sign_and_submit(&mut account, &mut tx, mode).await;
        if result.is_err() {
            // We no longer know which sequence number THORChain expects next.
            *account = None;
        }
        result
    }

    async fn sign_and_submit(
        &self,
        account: &mut Option<AccountState>,
        tx: &mut StdTx,
        mode: BroadcastMode,
    ) -> Result<TxId> {
        let state = match *account {
            Some(state) => state,
            None => {
                let (account_number, sequence) = self.get_account_number_and_sequence_number().await?;
                let state = AccountState {
                    account_number,
                    sequence,
                };
                debug!(account_number, sequence, "fetched account state");
                *account = Some(state);
                state
            }
        };

        let signature = self.keys.sign_tx(tx, &self.cfg.chain_id, state)?;
        tx.signatures = vec![signature];

        let body = serde_json::to_vec(&BroadcastRequest { tx, mode })?;
        let response = self
            .post(BROADCAST_TXS_ENDPOINT, &body)
            .await
            .inspect_err(|e| self.metrics.thorchain_error("fail_broadcast", e.to_string()))?;
        let response: BroadcastResponse = self.decode("fail_unmarshal_broadcast", &response)?;

        if response.code != 0 {
            self.metrics
                .thorchain_error("fail_broadcast", response.raw_log.clone());
            return Err(BridgeError::BroadcastRejected {
                code: response.code,
                log: response.raw_log,
            }
            .into());
        }

        let tx_id = TxId::new(&response.txhash)?;
        if let Some(state) = account.as_mut() {
            state.sequence += 1;
        }
        info!(%tx_id, sequence = state.sequence, ?mode, "broadcast to thorchain");
        Ok(tx_id)
    }

    pub async fn get_node_account(&self, address: &Address) -> Result<NodeAccount> {
        let body = self
            .get(&format!("{NODE_ACCOUNT_ENDPOINT}/{address}"))
            .await?;
        self.decode("fail_unmarshal_node_account", &body)
    }

    /// Succeeds if THORChain will accept transactions from this node.
    pub async fn ensure_node_whitelisted(&self) -> Result<()> {
        let address = self.keys.address();
        if address.is_empty() {
            return Err(anyhow!("signer address is empty"));
        }
        let account = self
            .get_node_account(address)
            .await
            .context("failed to get node account")?;
        if !account.is_whitelisted() {
            return Err(BridgeError::NotWhitelisted(account.status).into());
        }
        Ok(())
    }

    /// Waits until this node is whitelisted, checking every `whitelist_poll_interval` for up to `whitelist_timeout`.
    pub async fn ensure_node_whitelisted_with_timeout(&self) -> Result<()> {
        let timeout = self.cfg.whitelist_timeout;
        let deadline = Instant::now() + timeout;
        loop {
            match self.ensure_node_whitelisted().await {
                Ok(()) => return Ok(()),
                Err(e) => error!(error = ?e, "observer is not whitelisted, will retry a bit later"),
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(BridgeError::WhitelistTimeout(timeout).into());
            }
            select! {
                _ = self.cancel.cancelled() => return Err(anyhow!("stopped waiting for whitelisting")),
                _ = sleep(self.cfg.whitelist_poll_interval.min(remaining)) => {}
            }
        }
    }

    /// The nodes that should take part in signing for `vault_pub_key`. Never cached, since membership changes with
    /// churn.
    pub async fn get_keysign_party(&self, vault_pub_key: &PubKey) -> Result<PubKeys> {
        let body = self
            .get(&format!("/thorchain/vaults/{vault_pub_key}/signers"))
            .await
            .context("fail to get key sign party from thorchain")?;
        self.decode("fail_unmarshal_pubkeys", &body)
    }

    /// The first event THORChain recorded for `tx_id`.
    pub async fn get_event(&self, tx_id: &TxId) -> Result<Event> {
        let body = self
            .get(&format!("/thorchain/events/tx/{tx_id}"))
            .await
            .context("fail to get event")?;
        let events: Vec<Event> = self.decode("fail_unmarshal_event", &body)?;
        events
            .into_iter()
            .next()
            .ok_or_else(|| BridgeError::EventNotFound(tx_id.clone()).into())
    }

    /// THORChain's own latest block height.
    pub async fn get_last_block_height(&self) -> Result<u64> {
        let body = self.get(LAST_BLOCK_ENDPOINT).await?;
        let resp: LastBlockResp = self.decode("fail_unmarshal_lastblock", &body)?;
        Ok(resp.thorchain)
    }
}
