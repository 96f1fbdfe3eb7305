//! Payment request issuance and settlement validation.
//!
//! The flow mirrors the BIP-270 exchange: a payer fetches a payment request
//! for an invoice, pays the derived locking scripts, then submits the raw
//! transaction back for validation. Requests are issued by
//! [`PaymentRequestService`], settlements are validated by a
//! [`SettlementStrategy`] chosen once at startup and routed through
//! [`PaymentFacade`].

mod facade;
mod invoices;
mod locks;
mod paymail;
mod requests;
mod settlement;

pub use facade::{PaymentFacade, SettlementMode};
pub use invoices::{InvoiceService, DUST_LIMIT};
pub use locks::PaymentLocks;
pub use paymail::{PaymailClient, PaymailSettlementService};
pub use requests::PaymentRequestService;
pub use settlement::{SettlementStrategy, WalletSettlementService};

use crate::errors::{Error, Result};
use tokio_util::sync::CancellationToken;

/// Bails out with [`Error::Cancelled`] when shutdown has been requested.
///
/// Called before each suspension point so that an in-flight operation never
/// starts new work during shutdown. It is never called between the start of
/// a ledger commit and its completion.
pub(crate) fn ensure_live(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(Error::Cancelled);
    }
    Ok(())
}
