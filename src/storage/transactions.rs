//! Committed settlement transactions and their outputs
//!
//! Rows in these trees are only ever written by the settlement commit batch
//! (see `Store::commit_settlement`), so this store is read-side: lookups,
//! the per-payment settlement marker, and balance math over unspent txos.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::database::{Database, Tree};
use super::decode_record;
use crate::errors::{Error, Result};

/// A committed settlement transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredTransaction {
    /// Transaction id, hex encoded, unique
    pub tx_id: String,

    /// Payment identifier the transaction settled
    pub payment_id: String,

    /// Raw transaction as submitted
    pub raw_hex: String,

    /// Unix timestamp of acceptance
    pub created_at: i64,
}

/// One output of a committed settlement transaction.
///
/// Every output is recorded, recognized or not; recognized ones carry the
/// derivation metadata of the ledger record that matched them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Txo {
    pub tx_id: String,
    pub vout: u32,
    pub locking_script: String,
    pub satoshis: u64,

    /// Master key of the matching ledger record, if any
    pub key_name: Option<String>,

    /// Derivation path of the matching ledger record, if any
    pub derivation_path: Option<String>,

    /// Unix timestamp the output was spent; null while unspent
    pub spent_at: Option<i64>,
}

impl Txo {
    /// Canonical outpoint key, `txid:vout`.
    pub fn outpoint(&self) -> String {
        format!("{}:{}", self.tx_id, self.vout)
    }

    /// Whether the output pays a script from our ledger.
    pub fn is_ours(&self) -> bool {
        self.derivation_path.is_some()
    }
}

/// Read-side access to committed settlements.
pub struct TransactionStore {
    transactions: Arc<dyn Tree>,
    txos: Arc<dyn Tree>,
    settlements: Arc<dyn Tree>,
}

impl TransactionStore {
    pub const TREE: &'static str = "transactions";
    pub const TXOS_TREE: &'static str = "txos";
    pub const SETTLEMENTS_TREE: &'static str = "settlements";

    pub fn new(db: Arc<dyn Database>) -> anyhow::Result<Self> {
        let transactions = Arc::from(db.open_tree(Self::TREE)?);
        let txos = Arc::from(db.open_tree(Self::TXOS_TREE)?);
        let settlements = Arc::from(db.open_tree(Self::SETTLEMENTS_TREE)?);
        Ok(Self {
            transactions,
            txos,
            settlements,
        })
    }

    pub fn get(&self, tx_id: &str) -> Result<Option<StoredTransaction>> {
        let bytes = self
            .transactions
            .get(tx_id.as_bytes())
            .map_err(|e| Error::dependency("load transaction", tx_id, e))?;
        match bytes {
            Some(bytes) => Ok(Some(decode_record("decode transaction", tx_id, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Transaction id that settled a payment, if one was committed.
    pub fn settlement_for(&self, payment_id: &str) -> Result<Option<String>> {
        let bytes = self
            .settlements
            .get(payment_id.as_bytes())
            .map_err(|e| Error::dependency("load settlement marker", payment_id, e))?;
        Ok(bytes.map(|b| String::from_utf8_lossy(&b).into_owned()))
    }

    /// All recorded outputs, in outpoint order.
    pub fn list_txos(&self) -> Result<Vec<Txo>> {
        let mut txos = Vec::new();
        for item in self.txos.iter() {
            let (key, value) = item.map_err(|e| Error::dependency("list txos", "*", e))?;
            let outpoint = String::from_utf8_lossy(&key).into_owned();
            txos.push(decode_record("decode txo", &outpoint, &value)?);
        }
        Ok(txos)
    }

    /// Total satoshis held in recognized, unspent outputs.
    pub fn unspent_balance(&self) -> Result<u64> {
        let mut total: u64 = 0;
        for txo in self.list_txos()? {
            if txo.is_ours() && txo.spent_at.is_none() {
                total = total.checked_add(txo.satoshis).ok_or_else(|| {
                    Error::dependency(
                        "sum balance",
                        txo.outpoint(),
                        anyhow::anyhow!("balance overflows u64"),
                    )
                })?;
            }
        }
        Ok(total)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outpoint_format() {
        let txo = Txo {
            tx_id: "ab12".to_string(),
            vout: 3,
            locking_script: "76a914cc88ac".to_string(),
            satoshis: 5,
            key_name: Some("masterkey".to_string()),
            derivation_path: Some("0/7".to_string()),
            spent_at: None,
        };
        assert_eq!(txo.outpoint(), "ab12:3");
        assert!(txo.is_ours());
    }

    #[test]
    fn test_foreign_output_is_not_ours() {
        let txo = Txo {
            tx_id: "ab12".to_string(),
            vout: 0,
            locking_script: "51".to_string(),
            satoshis: 5,
            key_name: None,
            derivation_path: None,
            spent_at: None,
        };
        assert!(!txo.is_ours());
    }
}
