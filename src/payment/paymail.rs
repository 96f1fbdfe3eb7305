//! Paymail settlement forwarding.
//!
//! In paymail mode the counterpart owns validation and broadcast. This
//! service resolves a settlement reference for the payment (asking the
//! counterpart for one on first use), forwards the raw transaction under
//! that reference and relays the counterpart's acknowledgement unchanged.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{ensure_live, PaymentLocks, SettlementStrategy};
use crate::bip270::{Payment, PaymentAck};
use crate::errors::{Error, Result};
use crate::storage::{PaymailReference, Store};
use crate::utils::current_timestamp;

/// Client side of the paymail counterpart exchange.
///
/// Implementations speak the counterpart's transport; this crate only
/// depends on the two calls the settlement flow needs.
#[async_trait]
pub trait PaymailClient: Send + Sync {
    /// Asks the counterpart to allocate a settlement reference for a
    /// payment of `satoshis`.
    async fn request_reference(
        &self,
        handle: &str,
        payment_id: &str,
        satoshis: u64,
    ) -> Result<String>;

    /// Forwards a settlement payment under a previously allocated reference
    /// and returns the counterpart's acknowledgement.
    async fn submit_payment(
        &self,
        handle: &str,
        reference: &str,
        payment: &Payment,
    ) -> Result<PaymentAck>;
}

/// Forwards settlements to a configured paymail counterpart.
pub struct PaymailSettlementService {
    store: Arc<Store>,
    client: Arc<dyn PaymailClient>,
    locks: Arc<PaymentLocks>,
    counterpart: String,
    reference_ttl_secs: u64,
}

impl PaymailSettlementService {
    pub fn new(
        store: Arc<Store>,
        client: Arc<dyn PaymailClient>,
        locks: Arc<PaymentLocks>,
        counterpart: String,
        reference_ttl_secs: u64,
    ) -> Self {
        Self {
            store,
            client,
            locks,
            counterpart,
            reference_ttl_secs,
        }
    }

    /// Returns the stored reference for a payment, asking the counterpart
    /// for a new one when none is stored or the stored one has expired.
    async fn resolve_reference(&self, payment_id: &str, satoshis: u64) -> Result<String> {
        if let Some(stored) = self.store.paymail_refs().get(payment_id)? {
            debug!(
                "Using stored paymail reference for payment '{}'",
                payment_id
            );
            return Ok(stored.reference);
        }

        let reference = self
            .client
            .request_reference(&self.counterpart, payment_id, satoshis)
            .await?;
        let ttl = self.reference_ttl_secs as i64;
        self.store.paymail_refs().put(&PaymailReference {
            payment_id: payment_id.to_owned(),
            reference: reference.clone(),
            counterpart: self.counterpart.clone(),
            expires_at: current_timestamp() + ttl,
        })?;
        info!(
            "Allocated paymail reference for payment '{}' via {}",
            payment_id, self.counterpart
        );
        Ok(reference)
    }
}

#[async_trait]
impl SettlementStrategy for PaymailSettlementService {
    async fn settle(
        &self,
        payment_id: &str,
        payment: Payment,
        cancel: &CancellationToken,
    ) -> Result<PaymentAck> {
        if payment_id.is_empty() {
            return Err(Error::validation("paymentID", "must not be empty"));
        }
        ensure_live(cancel)?;
        let _guard = self.locks.acquire(payment_id).await?;

        let invoice = self
            .store
            .invoices()
            .get(payment_id)?
            .ok_or_else(|| Error::not_found("invoice", payment_id))?;

        let reference = self.resolve_reference(payment_id, invoice.satoshis).await?;

        // Point of no return: once forwarded, the counterpart's answer is
        // relayed whatever it is.
        ensure_live(cancel)?;
        let ack = self
            .client
            .submit_payment(&self.counterpart, &reference, &payment)
            .await?;

        if ack.is_accepted() {
            info!(
                "Counterpart {} accepted settlement for payment '{}'",
                self.counterpart, payment_id
            );
            // The reference is single-use; a failure to drop it only costs
            // a rejected retry later.
            if let Err(e) = self.store.paymail_refs().remove(payment_id) {
                warn!(
                    "Could not drop paymail reference for payment '{}': {}",
                    payment_id, e
                );
            }
        } else {
            warn!(
                "Counterpart {} rejected settlement for payment '{}': {}",
                self.counterpart, payment_id, ack.memo
            );
        }
        Ok(ack)
    }
}
