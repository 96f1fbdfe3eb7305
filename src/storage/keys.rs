//! Master key storage and derivation index reservation
//!
//! Master keys are created on first use and never rotated by this daemon.
//! Each payment request reserves the next derivation index for its key; the
//! reservation is serialized in-process, with the ledger's unique-script
//! constraint as the durable backstop.

use std::sync::{Arc, Mutex};
use tracing::info;

use super::database::{Database, Tree, WriteBatch};
use super::{decode_record, encode_record, map_batch_err};
use crate::errors::{Error, Result};
use crate::wallet::MasterKey;

/// Durable master key material and per-key derivation counters.
pub struct KeyStore {
    db: Arc<dyn Database>,
    keys: Arc<dyn Tree>,
    indexes: Arc<dyn Tree>,
    reserve_lock: Mutex<()>,
}

impl KeyStore {
    pub const TREE: &'static str = "keys";
    pub const INDEX_TREE: &'static str = "derivation_indexes";

    pub fn new(db: Arc<dyn Database>) -> anyhow::Result<Self> {
        let keys = Arc::from(db.open_tree(Self::TREE)?);
        let indexes = Arc::from(db.open_tree(Self::INDEX_TREE)?);
        Ok(Self {
            db,
            keys,
            indexes,
            reserve_lock: Mutex::new(()),
        })
    }

    pub fn get(&self, name: &str) -> Result<Option<MasterKey>> {
        let bytes = self
            .keys
            .get(name.as_bytes())
            .map_err(|e| Error::dependency("load master key", name, e))?;
        match bytes {
            Some(bytes) => Ok(Some(decode_record("decode master key", name, &bytes)?)),
            None => Ok(None),
        }
    }

    /// Fetch a master key, generating and persisting a fresh one if the name
    /// is unknown. Loses the race gracefully if another task creates it
    /// concurrently.
    pub fn get_or_create(&self, name: &str) -> Result<MasterKey> {
        if let Some(key) = self.get(name)? {
            return Ok(key);
        }

        let key = MasterKey::generate(name);
        let value = encode_record("encode master key", name, &key)?;
        let mut batch = WriteBatch::new();
        batch.insert_unique(Self::TREE, name.as_bytes().to_vec(), value);
        match self.db.apply_batch(batch) {
            Ok(()) => {
                info!("Generated new master key '{}'", name);
                Ok(key)
            }
            Err(err) => match map_batch_err(err, "create master key", name) {
                Error::Duplicate { .. } => self.get(name)?.ok_or_else(|| {
                    Error::dependency(
                        "create master key",
                        name,
                        anyhow::anyhow!("key vanished after duplicate insert"),
                    )
                }),
                other => Err(other),
            },
        }
    }

    /// Reserve the next derivation index for a key. Each call returns a
    /// value never handed out before for that key.
    pub fn reserve_index(&self, name: &str) -> Result<u64> {
        let _guard = self
            .reserve_lock
            .lock()
            .map_err(|_| Error::dependency("reserve index", name, anyhow::anyhow!("lock poisoned")))?;

        let current = match self
            .indexes
            .get(name.as_bytes())
            .map_err(|e| Error::dependency("reserve index", name, e))?
        {
            Some(bytes) => {
                let arr: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
                    Error::dependency(
                        "reserve index",
                        name,
                        anyhow::anyhow!("malformed derivation counter"),
                    )
                })?;
                u64::from_le_bytes(arr)
            }
            None => 0,
        };

        let next = current.checked_add(1).ok_or_else(|| {
            Error::dependency(
                "reserve index",
                name,
                anyhow::anyhow!("derivation index space exhausted"),
            )
        })?;
        self.indexes
            .insert(name.as_bytes(), &next.to_le_bytes())
            .map_err(|e| Error::dependency("reserve index", name, e))?;
        Ok(current)
    }
}
