//! Invoice management.
//!
//! Invoices are the merchant-facing side of the daemon: an order system
//! registers an amount to collect, then hands the returned payment
//! identifier to the payer. Identifiers are generated here, never supplied
//! by callers.

use std::sync::Arc;

use tracing::info;
use uuid::Uuid;

use crate::errors::{Error, Result};
use crate::storage::{Invoice, Store};
use crate::utils::current_timestamp;

/// Outputs below this many satoshis are unrelayable, so invoices must ask
/// for at least this much.
pub const DUST_LIMIT: u64 = 546;

/// Longest accepted invoice description.
const MAX_DESCRIPTION_LEN: usize = 1024;

/// Creates, lists and deletes invoices.
pub struct InvoiceService {
    store: Arc<Store>,
}

impl InvoiceService {
    pub fn new(store: Arc<Store>) -> Self {
        Self { store }
    }

    /// Registers a new invoice and returns it with a generated payment
    /// identifier.
    pub fn create(&self, satoshis: u64, description: Option<String>) -> Result<Invoice> {
        if satoshis < DUST_LIMIT {
            return Err(Error::validation(
                "satoshis",
                format!("must be at least the dust limit of {} satoshis", DUST_LIMIT),
            ));
        }
        if let Some(text) = &description {
            if text.len() > MAX_DESCRIPTION_LEN {
                return Err(Error::validation(
                    "description",
                    format!("must be at most {} characters", MAX_DESCRIPTION_LEN),
                ));
            }
        }

        let invoice = Invoice {
            payment_id: Uuid::new_v4().simple().to_string(),
            satoshis,
            description,
            created_at: current_timestamp(),
            paid_at: None,
        };
        self.store.invoices().create(&invoice)?;
        info!(
            "Created invoice '{}' for {} sat",
            invoice.payment_id, invoice.satoshis
        );
        Ok(invoice)
    }

    pub fn get(&self, payment_id: &str) -> Result<Invoice> {
        self.store
            .invoices()
            .get(payment_id)?
            .ok_or_else(|| Error::not_found("invoice", payment_id))
    }

    pub fn list(&self) -> Result<Vec<Invoice>> {
        self.store.invoices().list()
    }

    /// Removes an unpaid invoice. Settled invoices are part of the ledger
    /// history and stay.
    pub fn delete(&self, payment_id: &str) -> Result<()> {
        let invoice = self.get(payment_id)?;
        if invoice.is_settled() {
            return Err(Error::duplicate("settlement", payment_id));
        }
        self.store.invoices().delete(payment_id)?;
        info!("Deleted invoice '{}'", payment_id);
        Ok(())
    }
}
