//! Storage layer for payhost
//!
//! Durable state behind the payment pipeline: invoices, the script-key
//! ledger, committed settlement transactions with their outputs, master key
//! material and paymail references. Backed by the key-value abstraction in
//! [`database`], selectable between sled and an in-memory map.

pub mod database;
pub mod invoices;
pub mod keys;
pub mod paymail_refs;
pub mod script_keys;
pub mod transactions;

pub use database::{BatchError, Database, WriteBatch};
pub use invoices::{Invoice, InvoiceStore};
pub use keys::KeyStore;
pub use paymail_refs::{PaymailRefStore, PaymailReference};
pub use script_keys::{ScriptKeyRecord, ScriptKeyStore};
pub use transactions::{StoredTransaction, TransactionStore, Txo};

use std::sync::Arc;

use database::create_database;

use crate::config::{StorageBackend, StorageConfig};
use crate::errors::{Error, Result};

/// Storage manager that coordinates all record stores over one database.
pub struct Store {
    db: Arc<dyn Database>,
    invoices: InvoiceStore,
    script_keys: ScriptKeyStore,
    transactions: TransactionStore,
    keys: KeyStore,
    paymail_refs: PaymailRefStore,
}

impl Store {
    /// Open the store described by configuration.
    pub fn open(config: &StorageConfig) -> anyhow::Result<Self> {
        let db = Arc::from(create_database(&config.data_dir, config.backend)?);
        Self::with_database(db)
    }

    /// Build a store over an already-open database.
    pub fn with_database(db: Arc<dyn Database>) -> anyhow::Result<Self> {
        Ok(Self {
            invoices: InvoiceStore::new(Arc::clone(&db))?,
            script_keys: ScriptKeyStore::new(Arc::clone(&db))?,
            transactions: TransactionStore::new(Arc::clone(&db))?,
            keys: KeyStore::new(Arc::clone(&db))?,
            paymail_refs: PaymailRefStore::new(Arc::clone(&db))?,
            db,
        })
    }

    /// Volatile store for tests.
    pub fn in_memory() -> anyhow::Result<Self> {
        let db = Arc::from(create_database("unused", StorageBackend::Memory)?);
        Self::with_database(db)
    }

    pub fn invoices(&self) -> &InvoiceStore {
        &self.invoices
    }

    pub fn script_keys(&self) -> &ScriptKeyStore {
        &self.script_keys
    }

    pub fn transactions(&self) -> &TransactionStore {
        &self.transactions
    }

    pub fn keys(&self) -> &KeyStore {
        &self.keys
    }

    pub fn paymail_refs(&self) -> &PaymailRefStore {
        &self.paymail_refs
    }

    /// Commit an accepted settlement as one atomic unit: the transaction
    /// record, every output, the per-payment settlement marker and the
    /// invoice with its paid timestamp set.
    ///
    /// The marker insert is uniqueness-checked inside the transaction, so
    /// two settlement attempts for the same payment can never both commit.
    pub fn commit_settlement(
        &self,
        invoice: &Invoice,
        tx: &StoredTransaction,
        txos: &[Txo],
    ) -> Result<()> {
        let mut batch = WriteBatch::new();
        batch.insert_unique(
            TransactionStore::SETTLEMENTS_TREE,
            invoice.payment_id.as_bytes().to_vec(),
            tx.tx_id.as_bytes().to_vec(),
        );
        let tx_value = encode_record("encode transaction", &tx.tx_id, tx)?;
        batch.insert_unique(TransactionStore::TREE, tx.tx_id.as_bytes().to_vec(), tx_value);
        for txo in txos {
            let value = encode_record("encode txo", &txo.outpoint(), txo)?;
            batch.insert_unique(
                TransactionStore::TXOS_TREE,
                txo.outpoint().into_bytes(),
                value,
            );
        }
        let invoice_value = encode_record("encode invoice", &invoice.payment_id, invoice)?;
        batch.put(
            InvoiceStore::TREE,
            invoice.payment_id.as_bytes().to_vec(),
            invoice_value,
        );

        self.db
            .apply_batch(batch)
            .map_err(|e| map_batch_err(e, "commit settlement", &invoice.payment_id))
    }

    /// Flush pending writes to the backend.
    pub fn flush(&self) -> anyhow::Result<()> {
        self.db.flush()
    }
}

pub(crate) fn encode_record<T: serde::Serialize>(
    op: &'static str,
    id: &str,
    record: &T,
) -> Result<Vec<u8>> {
    serde_json::to_vec(record).map_err(|e| Error::dependency(op, id, e))
}

pub(crate) fn decode_record<T: serde::de::DeserializeOwned>(
    op: &'static str,
    id: &str,
    bytes: &[u8],
) -> Result<T> {
    serde_json::from_slice(bytes).map_err(|e| Error::dependency(op, id, e))
}

pub(crate) fn map_batch_err(err: BatchError, op: &'static str, subject: &str) -> Error {
    match err {
        BatchError::Duplicate { tree, key } => Error::duplicate(tree, key),
        BatchError::Backend(e) => Error::dependency(op, subject.to_string(), e),
    }
}
