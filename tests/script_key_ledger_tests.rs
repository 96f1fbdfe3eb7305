//! Tests for script-key ledger durability, uniqueness and index reservation.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use payhost::config::{PaymentsConfig, StorageBackend, StorageConfig, WalletConfig};
use payhost::payment::{
    PaymentLocks, PaymentRequestService, SettlementStrategy, WalletSettlementService,
};
use payhost::storage::invoices::Invoice;
use payhost::storage::script_keys::ScriptKeyRecord;
use payhost::storage::Store;
use payhost::wallet::{KeyDeriver, WalletKeychain};
use tempfile::TempDir;

fn sled_config(dir: &TempDir) -> StorageConfig {
    StorageConfig {
        backend: StorageBackend::Sled,
        data_dir: dir.path().join("db").to_string_lossy().into_owned(),
    }
}

fn request_service(store: &Arc<Store>) -> PaymentRequestService {
    let wallet = WalletConfig::default();
    store.keys().get_or_create(&wallet.key_name).unwrap();
    PaymentRequestService::new(
        Arc::clone(store),
        Arc::new(WalletKeychain::new()),
        Arc::new(PaymentLocks::new()),
        wallet,
        PaymentsConfig::default(),
    )
}

fn stored_invoice(store: &Store, payment_id: &str, satoshis: u64) -> Invoice {
    let invoice = Invoice {
        payment_id: payment_id.to_string(),
        satoshis,
        description: None,
        created_at: 0,
        paid_at: None,
    };
    store.invoices().create(&invoice).unwrap();
    invoice
}

fn record(script: &str, payment_id: &str) -> ScriptKeyRecord {
    ScriptKeyRecord {
        locking_script: script.to_string(),
        key_name: "masterkey".to_string(),
        derivation_path: "0/0".to_string(),
        payment_id: payment_id.to_string(),
        created_at: 0,
    }
}

#[tokio::test]
async fn test_ledger_survives_restart() {
    let dir = TempDir::new().unwrap();
    let config = sled_config(&dir);
    let cancel = CancellationToken::new();

    let script = {
        let store = Arc::new(Store::open(&config).unwrap());
        stored_invoice(&store, "inv-restart", 7_000);
        let requests = request_service(&store);
        let request = requests
            .create_request("inv-restart", "localhost:8443", &cancel)
            .await
            .unwrap();
        store.flush().unwrap();
        request.outputs[0].script.clone()
    };

    // Reopen the database and settle against the ledger written before.
    let store = Arc::new(Store::open(&config).unwrap());
    let found = store.script_keys().lookup(&script).unwrap().unwrap();
    assert_eq!(found.payment_id, "inv-restart");

    let settlement = WalletSettlementService::new(
        Arc::clone(&store),
        Arc::new(payhost::codec::RawTxDecoder),
        Arc::new(PaymentLocks::new()),
    );
    let payment = payhost::bip270::Payment {
        transaction: raw_tx(7_000, &script),
        merchant_data: None,
        refund_to: None,
        memo: String::new(),
    };
    let ack = settlement
        .settle("inv-restart", payment, &cancel)
        .await
        .unwrap();
    assert_eq!(ack.error, 0);
    assert_eq!(store.transactions().unspent_balance().unwrap(), 7_000);
}

#[tokio::test]
async fn test_derivation_is_deterministic_across_restart() {
    let dir = TempDir::new().unwrap();
    let config = sled_config(&dir);
    let cancel = CancellationToken::new();
    let key_name = WalletConfig::default().key_name;

    let script = {
        let store = Arc::new(Store::open(&config).unwrap());
        stored_invoice(&store, "inv-derive", 1_000);
        let requests = request_service(&store);
        let request = requests
            .create_request("inv-derive", "localhost:8443", &cancel)
            .await
            .unwrap();
        store.flush().unwrap();
        request.outputs[0].script.clone()
    };

    let store = Store::open(&config).unwrap();
    let master = store.keys().get(&key_name).unwrap().unwrap();
    let found = store.script_keys().lookup(&script).unwrap().unwrap();

    // The persisted master key rederives the exact ledgered script.
    let rederived = WalletKeychain::new()
        .derive_locking_script(&master, &found.derivation_path)
        .unwrap();
    assert_eq!(rederived, script);
}

#[tokio::test]
async fn test_duplicate_script_insert_is_rejected() {
    let store = Store::in_memory().unwrap();
    let first = record("76a914aa88ac", "inv-a");

    store.script_keys().create(&[first.clone()]).unwrap();
    let err = store
        .script_keys()
        .create(&[record("76a914aa88ac", "inv-b")])
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));

    // The original binding is untouched.
    let kept = store.script_keys().lookup("76a914aa88ac").unwrap().unwrap();
    assert_eq!(kept.payment_id, "inv-a");
}

#[tokio::test]
async fn test_batch_insert_is_all_or_nothing() {
    let store = Store::in_memory().unwrap();
    store
        .script_keys()
        .create(&[record("76a914aa88ac", "inv-a")])
        .unwrap();

    // The second record collides, so the first must not land either.
    let batch = [record("76a914bb88ac", "inv-c"), record("76a914aa88ac", "inv-c")];
    assert!(store.script_keys().create(&batch).is_err());
    assert!(store.script_keys().lookup("76a914bb88ac").unwrap().is_none());
}

#[tokio::test]
async fn test_concurrent_requests_for_one_invoice_share_a_script() {
    let store = Arc::new(Store::in_memory().unwrap());
    stored_invoice(&store, "inv-race", 3_000);
    let requests = Arc::new(request_service(&store));
    let cancel = CancellationToken::new();

    let mut handles = Vec::new();
    for _ in 0..4 {
        let requests = Arc::clone(&requests);
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            requests
                .create_request("inv-race", "localhost:8443", &cancel)
                .await
                .unwrap()
        }));
    }

    let mut scripts = Vec::new();
    for handle in handles {
        scripts.push(handle.await.unwrap().outputs[0].script.clone());
    }
    scripts.dedup();
    assert_eq!(scripts.len(), 1);
    assert_eq!(store.script_keys().find_by_payment("inv-race").unwrap().len(), 1);
}

#[tokio::test]
async fn test_index_reservation_is_monotonic() {
    let store = Store::in_memory().unwrap();
    store.keys().get_or_create("masterkey").unwrap();

    let first = store.keys().reserve_index("masterkey").unwrap();
    let second = store.keys().reserve_index("masterkey").unwrap();
    let third = store.keys().reserve_index("masterkey").unwrap();
    assert_eq!(second, first + 1);
    assert_eq!(third, second + 1);

    // Counters are tracked per key.
    store.keys().get_or_create("other").unwrap();
    assert_eq!(store.keys().reserve_index("other").unwrap(), first);
}

fn raw_tx(satoshis: u64, script: &str) -> String {
    let mut raw = Vec::new();
    raw.extend_from_slice(&1u32.to_le_bytes());
    raw.push(1);
    raw.extend_from_slice(&[0u8; 32]);
    raw.extend_from_slice(&0u32.to_le_bytes());
    raw.push(0);
    raw.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
    raw.push(1);
    raw.extend_from_slice(&satoshis.to_le_bytes());
    let script = hex::decode(script).unwrap();
    raw.push(script.len() as u8);
    raw.extend_from_slice(&script);
    raw.extend_from_slice(&0u32.to_le_bytes());
    hex::encode(raw)
}
