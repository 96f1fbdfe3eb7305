//! Invoice records
//!
//! Invoices are created through the invoice API before a payment request is
//! issued, and mutated exactly once when a settlement is accepted (paid_at
//! set inside the settlement commit batch, never through this store).

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::database::{Database, Tree, WriteBatch};
use super::{decode_record, encode_record, map_batch_err};
use crate::errors::{Error, Result};

/// An invoice awaiting (or past) settlement.
///
/// Serialized in the camelCase shape the management API exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Invoice {
    /// Opaque unique payment identifier
    #[serde(rename = "paymentID")]
    pub payment_id: String,

    /// Requested amount in satoshis
    pub satoshis: u64,

    /// Optional human-readable description, echoed into request outputs
    pub description: Option<String>,

    /// Unix timestamp of creation
    pub created_at: i64,

    /// Unix timestamp of settlement; null until settled
    pub paid_at: Option<i64>,
}

impl Invoice {
    /// Whether a settlement has already been accepted for this invoice.
    pub fn is_settled(&self) -> bool {
        self.paid_at.is_some()
    }
}

/// Durable invoice storage.
pub struct InvoiceStore {
    db: Arc<dyn Database>,
    tree: Arc<dyn Tree>,
}

impl InvoiceStore {
    pub const TREE: &'static str = "invoices";

    pub fn new(db: Arc<dyn Database>) -> anyhow::Result<Self> {
        let tree = Arc::from(db.open_tree(Self::TREE)?);
        Ok(Self { db, tree })
    }

    /// Insert a new invoice. Fails with a duplicate error if the payment
    /// identifier is already taken.
    pub fn create(&self, invoice: &Invoice) -> Result<()> {
        let value = encode_record("encode invoice", &invoice.payment_id, invoice)?;
        let mut batch = WriteBatch::new();
        batch.insert_unique(Self::TREE, invoice.payment_id.as_bytes().to_vec(), value);
        self.db
            .apply_batch(batch)
            .map_err(|e| map_batch_err(e, "create invoice", &invoice.payment_id))
    }

    pub fn get(&self, payment_id: &str) -> Result<Option<Invoice>> {
        let bytes = self
            .tree
            .get(payment_id.as_bytes())
            .map_err(|e| Error::dependency("load invoice", payment_id, e))?;
        match bytes {
            Some(bytes) => Ok(Some(decode_record("decode invoice", payment_id, &bytes)?)),
            None => Ok(None),
        }
    }

    /// All invoices, in key order.
    pub fn list(&self) -> Result<Vec<Invoice>> {
        let mut invoices = Vec::new();
        for item in self.tree.iter() {
            let (key, value) = item.map_err(|e| Error::dependency("list invoices", "*", e))?;
            let id = String::from_utf8_lossy(&key).into_owned();
            invoices.push(decode_record("decode invoice", &id, &value)?);
        }
        Ok(invoices)
    }

    /// Delete an unsettled invoice.
    pub fn delete(&self, payment_id: &str) -> Result<()> {
        self.tree
            .remove(payment_id.as_bytes())
            .map_err(|e| Error::dependency("delete invoice", payment_id, e))
    }
}
