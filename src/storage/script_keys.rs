//! Script-key ledger
//!
//! Single source of truth for which locking scripts belong to this daemon.
//! Records are write-once: created when a payment request is issued, read
//! many times during settlement validation, never updated. A locking script
//! maps to at most one record; the uniqueness check runs inside the same
//! transaction as the insert so partial ledgers cannot exist.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

use super::database::{Database, Tree, WriteBatch};
use super::{decode_record, encode_record, map_batch_err};
use crate::errors::{Error, Result};

/// Mapping from a generated locking script to its derivation metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptKeyRecord {
    /// Hex-encoded locking script, unique
    pub locking_script: String,

    /// Master key the script was derived from
    pub key_name: String,

    /// Derivation path of the child key
    pub derivation_path: String,

    /// Payment request that generated the script
    pub payment_id: String,

    /// Unix timestamp of creation
    pub created_at: i64,
}

/// Durable script-key ledger.
pub struct ScriptKeyStore {
    db: Arc<dyn Database>,
    tree: Arc<dyn Tree>,
    by_payment: Arc<dyn Tree>,
}

impl ScriptKeyStore {
    pub const TREE: &'static str = "script_keys";
    pub const BY_PAYMENT_TREE: &'static str = "script_keys_by_payment";

    pub fn new(db: Arc<dyn Database>) -> anyhow::Result<Self> {
        let tree = Arc::from(db.open_tree(Self::TREE)?);
        let by_payment = Arc::from(db.open_tree(Self::BY_PAYMENT_TREE)?);
        Ok(Self {
            db,
            tree,
            by_payment,
        })
    }

    /// Insert a batch of records, all-or-nothing.
    ///
    /// If any locking script already exists the whole batch is rolled back
    /// and a duplicate error returned.
    pub fn create(&self, records: &[ScriptKeyRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let mut batch = WriteBatch::new();
        let mut per_payment: BTreeMap<&str, Vec<String>> = BTreeMap::new();
        for record in records {
            let value = encode_record("encode script key", &record.locking_script, record)?;
            batch.insert_unique(Self::TREE, record.locking_script.as_bytes().to_vec(), value);
            per_payment
                .entry(record.payment_id.as_str())
                .or_default()
                .push(record.locking_script.clone());
        }
        // The index entry carries every script ever issued for the payment,
        // so scripts from earlier batches are merged in. Callers serialize
        // writes per payment.
        for (payment_id, new_scripts) in per_payment {
            let mut scripts: Vec<String> = match self
                .by_payment
                .get(payment_id.as_bytes())
                .map_err(|e| Error::dependency("lookup script index", payment_id, e))?
            {
                Some(bytes) => decode_record("decode script index", payment_id, &bytes)?,
                None => Vec::new(),
            };
            scripts.extend(new_scripts);
            let value = encode_record("encode script index", payment_id, &scripts)?;
            batch.put(Self::BY_PAYMENT_TREE, payment_id.as_bytes().to_vec(), value);
        }

        self.db
            .apply_batch(batch)
            .map_err(|e| map_batch_err(e, "create script keys", &records[0].payment_id))
    }

    /// Look up the record for a locking script. A miss is not a fault; it
    /// means the output belongs to someone else.
    pub fn lookup(&self, locking_script: &str) -> Result<Option<ScriptKeyRecord>> {
        let bytes = self
            .tree
            .get(locking_script.as_bytes())
            .map_err(|e| Error::dependency("lookup script key", locking_script, e))?;
        match bytes {
            Some(bytes) => Ok(Some(decode_record(
                "decode script key",
                locking_script,
                &bytes,
            )?)),
            None => Ok(None),
        }
    }

    /// All records generated for a payment identifier, in creation order.
    pub fn find_by_payment(&self, payment_id: &str) -> Result<Vec<ScriptKeyRecord>> {
        let bytes = self
            .by_payment
            .get(payment_id.as_bytes())
            .map_err(|e| Error::dependency("lookup script index", payment_id, e))?;
        let scripts: Vec<String> = match bytes {
            Some(bytes) => decode_record("decode script index", payment_id, &bytes)?,
            None => return Ok(Vec::new()),
        };

        let mut records = Vec::with_capacity(scripts.len());
        for script in scripts {
            match self.lookup(&script)? {
                Some(record) => records.push(record),
                // The index and the ledger are written in one batch, so a
                // dangling index entry means the store is corrupt.
                None => {
                    return Err(Error::dependency(
                        "lookup script key",
                        script,
                        anyhow::anyhow!("script index references a missing ledger record"),
                    ))
                }
            }
        }
        Ok(records)
    }
}
