//! Paymail reference tracking
//!
//! A paymail settlement needs the reference handed out by the counterpart
//! when the payment destination was requested. References are keyed by
//! payment identifier and expire with the payment request window, so a
//! stale entry can never settle a new request.

use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::database::{Database, Tree};
use super::{decode_record, encode_record};
use crate::errors::{Error, Result};
use crate::utils::current_timestamp;

/// A counterpart-issued reference for an in-flight paymail settlement.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymailReference {
    /// Payment identifier the reference belongs to
    pub payment_id: String,

    /// Opaque reference issued by the counterpart
    pub reference: String,

    /// Paymail handle that issued the reference
    pub counterpart: String,

    /// Unix timestamp after which the reference is unusable
    pub expires_at: i64,
}

impl PaymailReference {
    pub fn is_expired(&self, now: i64) -> bool {
        self.expires_at <= now
    }
}

/// Durable, expiring paymail reference storage.
pub struct PaymailRefStore {
    tree: Arc<dyn Tree>,
}

impl PaymailRefStore {
    pub const TREE: &'static str = "paymail_refs";

    pub fn new(db: Arc<dyn Database>) -> anyhow::Result<Self> {
        let tree = Arc::from(db.open_tree(Self::TREE)?);
        Ok(Self { tree })
    }

    /// Store or refresh the reference for a payment.
    pub fn put(&self, reference: &PaymailReference) -> Result<()> {
        let value = encode_record("encode paymail reference", &reference.payment_id, reference)?;
        self.tree
            .insert(reference.payment_id.as_bytes(), &value)
            .map_err(|e| Error::dependency("store paymail reference", &reference.payment_id, e))
    }

    /// Fetch the live reference for a payment. Expired entries are removed
    /// on read and reported as absent.
    pub fn get(&self, payment_id: &str) -> Result<Option<PaymailReference>> {
        let bytes = self
            .tree
            .get(payment_id.as_bytes())
            .map_err(|e| Error::dependency("load paymail reference", payment_id, e))?;
        let reference: PaymailReference = match bytes {
            Some(bytes) => decode_record("decode paymail reference", payment_id, &bytes)?,
            None => return Ok(None),
        };

        if reference.is_expired(current_timestamp()) {
            self.tree
                .remove(payment_id.as_bytes())
                .map_err(|e| Error::dependency("purge paymail reference", payment_id, e))?;
            return Ok(None);
        }
        Ok(Some(reference))
    }

    /// Remove the reference once a settlement concludes.
    pub fn remove(&self, payment_id: &str) -> Result<()> {
        self.tree
            .remove(payment_id.as_bytes())
            .map_err(|e| Error::dependency("purge paymail reference", payment_id, e))
    }

    /// Sweep every expired reference, returning how many were removed.
    pub fn purge_expired(&self) -> Result<usize> {
        let now = current_timestamp();
        let mut expired = Vec::new();
        for item in self.tree.iter() {
            let (key, value) =
                item.map_err(|e| Error::dependency("sweep paymail references", "*", e))?;
            let id = String::from_utf8_lossy(&key).into_owned();
            let reference: PaymailReference = decode_record("decode paymail reference", &id, &value)?;
            if reference.is_expired(now) {
                expired.push(key);
            }
        }
        let count = expired.len();
        for key in expired {
            self.tree
                .remove(&key)
                .map_err(|e| Error::dependency("sweep paymail references", "*", e))?;
        }
        Ok(count)
    }
}
