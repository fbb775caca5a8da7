use std::{
    path::Path,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    },
    time::Duration,
};

use axum::{
    Json, Router,
    extract::{Path as UrlPath, State},
    routing::{get, post},
};
use bifrost::{
    cfg::ThorchainConfig,
    common::{Address, Asset, Blame, Chain, Coin, PubKey, TxId},
    error::BridgeError,
    metrics::Metrics,
    thorclient::{ThorchainBridge, msgs::Msg, types::BroadcastMode},
    types::{KeygenType, NodeStatus, ObservedTx, Tx},
};
use parking_lot::Mutex;
use serde_json::{Value, json};
use tempfile::TempDir;

use crate::{fast_retry, serve, within};

const TX_HASH: &str = "E43FA2330C4317ECC084B0C6044DFE75AAE1FAB8F84A66107809E9739D02F80D";

/// Just enough of THORChain's REST API to exercise the bridge.
struct MockThorchain {
    account_number: Mutex<String>,
    /// The sequence number the chain expects next.
    sequence: AtomicU64,
    /// Served in place of `sequence` while set.
    raw_sequence: Mutex<Option<String>>,
    account_fetches: AtomicU32,
    /// The sequence number of each broadcast transaction, in arrival order.
    broadcast_sequences: Mutex<Vec<u64>>,
    broadcast_modes: Mutex<Vec<String>>,
    reject_next_broadcast: AtomicBool,
    node_status: Mutex<String>,
    /// Once the node account has been fetched this many times, the node reports as active.
    activate_after: AtomicU32,
    node_account_fetches: AtomicU32,
    signers: Mutex<Vec<String>>,
}

impl MockThorchain {
    fn new() -> Arc<Self> {
        Arc::new(MockThorchain {
            account_number: Mutex::new("5".to_owned()),
            sequence: AtomicU64::new(6),
            raw_sequence: Mutex::new(None),
            account_fetches: AtomicU32::new(0),
            broadcast_sequences: Mutex::new(Vec::new()),
            broadcast_modes: Mutex::new(Vec::new()),
            reject_next_broadcast: AtomicBool::new(false),
            node_status: Mutex::new("active".to_owned()),
            activate_after: AtomicU32::new(u32::MAX),
            node_account_fetches: AtomicU32::new(0),
            signers: Mutex::new(Vec::new()),
        })
    }

    async fn serve(self: &Arc<Self>) -> String {
        let router = Router::new()
            .route("/auth/accounts/{address}", get(account))
            .route("/txs", post(broadcast))
            .route("/thorchain/nodeaccount/{address}", get(node_account))
            .route("/thorchain/vaults/{pub_key}/signers", get(signers))
            .route("/thorchain/events/tx/{id}", get(events))
            .route(
                "/thorchain/lastblock",
                get(|| async {
                    Json(json!({
                        "chain": "BNB",
                        "lastobservedin": "10",
                        "lastsignedout": "9",
                        "thorchain": "1234"
                    }))
                }),
            )
            .with_state(self.clone());
        serve(router).await
    }
}

async fn account(
    State(mock): State<Arc<MockThorchain>>,
    UrlPath(address): UrlPath<String>,
) -> Json<Value> {
    mock.account_fetches.fetch_add(1, Ordering::SeqCst);
    let account_number = mock.account_number.lock().clone();
    let sequence = mock
        .raw_sequence
        .lock()
        .clone()
        .unwrap_or_else(|| mock.sequence.load(Ordering::SeqCst).to_string());
    Json(json!({
        "height": "78",
        "result": {
            "type": "cosmos-sdk/Account",
            "value": {
                "address": address,
                "coins": [],
                "public_key": null,
                "account_number": account_number,
                "sequence": sequence,
            }
        }
    }))
}

async fn broadcast(State(mock): State<Arc<MockThorchain>>, Json(body): Json<Value>) -> Json<Value> {
    let signature = &body["tx"]["signatures"][0];
    let sequence: u64 = signature["sequence"].as_str().unwrap().parse().unwrap();
    assert!(!signature["signature"].as_str().unwrap().is_empty());
    mock.broadcast_sequences.lock().push(sequence);
    mock.broadcast_modes
        .lock()
        .push(body["mode"].as_str().unwrap().to_owned());

    if mock.reject_next_broadcast.swap(false, Ordering::SeqCst) {
        return Json(json!({
            "txhash": TX_HASH,
            "height": "0",
            "code": 4,
            "raw_log": "signature verification failed"
        }));
    }
    mock.sequence.store(sequence + 1, Ordering::SeqCst);
    Json(json!({"txhash": TX_HASH, "height": "test_height"}))
}

async fn node_account(
    State(mock): State<Arc<MockThorchain>>,
    UrlPath(address): UrlPath<String>,
) -> Json<Value> {
    let fetches = mock.node_account_fetches.fetch_add(1, Ordering::SeqCst) + 1;
    let status = if fetches >= mock.activate_after.load(Ordering::SeqCst) {
        "active".to_owned()
    } else {
        mock.node_status.lock().clone()
    };
    Json(json!({"node_address": address, "status": status, "bond": "100000000"}))
}

async fn signers(State(mock): State<Arc<MockThorchain>>) -> Json<Value> {
    let signers = mock.signers.lock().clone();
    Json(json!(signers))
}

async fn events(UrlPath(id): UrlPath<String>) -> Json<Value> {
    if id == TX_HASH {
        Json(json!([{
            "id": "3",
            "height": "120",
            "type": "swap",
            "status": "success",
            "event": {"pool": "BNB.BNB"}
        }]))
    } else {
        Json(json!([]))
    }
}

fn config(chain_host: String, home: &Path) -> ThorchainConfig {
    ThorchainConfig {
        chain_host,
        chain_home_folder: home.to_string_lossy().into_owned(),
        signer_name: "bob".to_owned(),
        signer_passwd: "password".to_owned(),
        max_http_request_retry: 2,
        whitelist_poll_interval: Duration::from_millis(10),
        whitelist_timeout: Duration::from_millis(200),
        retry: fast_retry(),
        ..Default::default()
    }
}

async fn bridge(mock: &Arc<MockThorchain>) -> (ThorchainBridge, TempDir) {
    let home = tempfile::tempdir().unwrap();
    let host = mock.serve().await;
    let bridge = ThorchainBridge::new(config(host, home.path()), Arc::new(Metrics::default())).unwrap();
    (bridge, home)
}

#[tokio::test]
async fn account_and_sequence_numbers() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;

    assert_eq!(
        bridge.get_account_number_and_sequence_number().await.unwrap(),
        (5, 6)
    );

    *mock.account_number.lock() = "asdf".to_owned();
    let err = bridge
        .get_account_number_and_sequence_number()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("asdf"), "{err}");
}

#[tokio::test]
async fn malformed_sequence_number_leaves_no_account_state() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;
    *mock.raw_sequence.lock() = Some("whatever".to_owned());

    let err = bridge
        .get_account_number_and_sequence_number()
        .await
        .unwrap_err();
    assert!(err.to_string().contains("whatever"), "{err}");

    let err = bridge
        .post_keysign_failure(Blame::default(), 1, String::new(), vec![])
        .await
        .unwrap_err();
    assert!(format!("{err:#}").contains("whatever"), "{err:#}");
    assert!(mock.broadcast_sequences.lock().is_empty());

    // The next broadcast asks the chain again rather than using anything from the failed attempt.
    *mock.raw_sequence.lock() = None;
    bridge
        .post_keysign_failure(Blame::default(), 1, String::new(), vec![])
        .await
        .unwrap();
    assert_eq!(*mock.broadcast_sequences.lock(), vec![6]);
    assert_eq!(mock.account_fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn broadcast_returns_tx_hash() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;

    let tx_id = bridge
        .post_keysign_failure(Blame::new("timeout", vec![]), 10, "memo".to_owned(), vec![])
        .await
        .unwrap();

    assert_eq!(tx_id, TxId::new(TX_HASH).unwrap());
    assert_eq!(*mock.broadcast_sequences.lock(), vec![6]);
    assert_eq!(*mock.broadcast_modes.lock(), vec!["sync".to_owned()]);
}

#[tokio::test]
async fn commit_mode_is_sent_as_block() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;

    let tx = bridge.keygen_tx(
        PubKey::random(),
        Blame::default(),
        vec![PubKey::random()],
        KeygenType::Asgard,
        7,
    );
    bridge.broadcast(tx, BroadcastMode::Commit).await.unwrap();
    assert_eq!(*mock.broadcast_modes.lock(), vec!["block".to_owned()]);
}

#[tokio::test]
async fn concurrent_broadcasts_use_consecutive_sequences() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;
    let bridge = Arc::new(bridge);

    let mut handles = Vec::new();
    for height in 0..5 {
        let bridge = bridge.clone();
        handles.push(tokio::spawn(async move {
            bridge
                .post_keysign_failure(Blame::default(), height, String::new(), vec![])
                .await
        }));
    }
    for handle in handles {
        within(handle).await.unwrap().unwrap();
    }

    assert_eq!(*mock.broadcast_sequences.lock(), vec![6, 7, 8, 9, 10]);
    assert_eq!(mock.account_fetches.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn rejected_broadcast_refetches_account() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;
    mock.reject_next_broadcast.store(true, Ordering::SeqCst);

    let err = bridge
        .post_keysign_failure(Blame::default(), 1, String::new(), vec![])
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::BroadcastRejected { code: 4, .. })
    ));

    bridge
        .post_keysign_failure(Blame::default(), 1, String::new(), vec![])
        .await
        .unwrap();
    assert_eq!(*mock.broadcast_sequences.lock(), vec![6, 6]);
    assert_eq!(mock.account_fetches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn disabled_node_is_not_whitelisted() {
    let mock = MockThorchain::new();
    *mock.node_status.lock() = "disabled".to_owned();
    let (bridge, _home) = bridge(&mock).await;

    let err = bridge.ensure_node_whitelisted().await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::NotWhitelisted(NodeStatus::Disabled))
    ));

    let err = within(bridge.ensure_node_whitelisted_with_timeout())
        .await
        .unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::WhitelistTimeout(_))
    ));
    assert!(mock.node_account_fetches.load(Ordering::SeqCst) > 2);
}

#[tokio::test]
async fn waits_until_node_is_whitelisted() {
    let mock = MockThorchain::new();
    *mock.node_status.lock() = "unknown".to_owned();
    mock.activate_after.store(3, Ordering::SeqCst);
    let (bridge, _home) = bridge(&mock).await;

    within(bridge.ensure_node_whitelisted_with_timeout())
        .await
        .unwrap();
    assert_eq!(mock.node_account_fetches.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn keysign_party() {
    let mock = MockThorchain::new();
    let members = vec![PubKey::random(), PubKey::random()];
    *mock.signers.lock() = members.iter().map(PubKey::to_string).collect();
    let (bridge, _home) = bridge(&mock).await;

    let party = bridge.get_keysign_party(&PubKey::random()).await.unwrap();
    assert_eq!(party, members);
}

#[tokio::test]
async fn events_by_tx_id() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;

    let event = bridge.get_event(&TxId::new(TX_HASH).unwrap()).await.unwrap();
    assert_eq!(event.id, 3);
    assert_eq!(event.ty, "swap");

    let missing = TxId::new("ABCD").unwrap();
    let err = bridge.get_event(&missing).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::EventNotFound(id)) if *id == missing
    ));
}

#[tokio::test]
async fn last_block_height() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;
    assert_eq!(bridge.get_last_block_height().await.unwrap(), 1234);
}

fn observed(vault: PubKey, from: Address, to: Address, coins: Vec<Coin>) -> ObservedTx {
    let tx = Tx {
        id: TxId::new(TX_HASH).unwrap(),
        chain: Chain::BNB,
        from_address: from,
        to_address: to,
        coins,
        gas: vec![],
        memo: "SWAP:BNB.BNB".to_owned(),
    };
    ObservedTx::new(tx, 10, vault)
}

#[tokio::test]
async fn observations_are_split_by_direction() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;
    let vault = PubKey::random();
    let vault_bnb = vault.address(Chain::BNB).unwrap();
    let vault_eth = vault.address(Chain::ETH).unwrap();
    let stranger = Address::from("bnb1stranger");

    let inbound = observed(vault, stranger.clone(), vault_bnb.clone(), vec![]);
    let outbound = observed(
        vault,
        vault_bnb,
        stranger.clone(),
        vec![Coin::new(Asset::new(Chain::BNB, "BNB"), 1)],
    );
    // The chain of the first coin decides which of the vault's addresses applies.
    let eth_inbound = observed(
        vault,
        Address::from("0x0000000000000000000000000000000000000001"),
        vault_eth,
        vec![Coin::new(Asset::new(Chain::ETH, "ETH"), 1)],
    );

    let tx = bridge
        .observations_tx(&[inbound.clone(), outbound.clone(), eth_inbound.clone()])
        .unwrap();
    assert_eq!(tx.fee.gas, 100_000_000);
    assert!(tx.memo.is_empty());
    match &tx.msg[..] {
        [Msg::ObservedTxIn(inbound_msg), Msg::ObservedTxOut(outbound_msg)] => {
            assert_eq!(inbound_msg.txs, vec![inbound, eth_inbound]);
            assert_eq!(outbound_msg.txs, vec![outbound]);
            assert_eq!(&inbound_msg.signer, bridge.keys().address());
        }
        other => panic!("unexpected messages: {other:?}"),
    }

    let only_inbound = bridge
        .observations_tx(&[observed(vault, stranger.clone(), vault.address(Chain::BNB).unwrap(), vec![])])
        .unwrap();
    assert!(matches!(&only_inbound.msg[..], [Msg::ObservedTxIn(_)]));
}

#[tokio::test]
async fn observations_must_involve_the_vault() {
    let mock = MockThorchain::new();
    let (bridge, _home) = bridge(&mock).await;

    let err = bridge.observations_tx(&[]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::NothingToSign)
    ));

    let unrelated = observed(
        PubKey::random(),
        Address::from("bnb1alice"),
        Address::from("bnb1bob"),
        vec![],
    );
    let err = bridge.observations_tx(&[unrelated]).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BridgeError>(),
        Some(BridgeError::AmbiguousDirection(_))
    ));
}
