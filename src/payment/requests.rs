//! Payment request issuance.
//!
//! Each request binds an invoice to a freshly derived P2PKH locking script.
//! The script is written to the ledger before the request is returned, so a
//! request the payer holds is always one the validator can match later.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::{ensure_live, PaymentLocks};
use crate::bip270::{MerchantData, Output, PaymentRequest};
use crate::config::{PaymentsConfig, WalletConfig};
use crate::errors::{Error, Result};
use crate::storage::{Invoice, ScriptKeyRecord, Store};
use crate::utils::current_timestamp;
use crate::wallet::KeyDeriver;

/// Issues BIP-270 payment requests backed by the script-key ledger.
pub struct PaymentRequestService {
    store: Arc<Store>,
    deriver: Arc<dyn KeyDeriver>,
    locks: Arc<PaymentLocks>,
    wallet: WalletConfig,
    payments: PaymentsConfig,
}

impl PaymentRequestService {
    pub fn new(
        store: Arc<Store>,
        deriver: Arc<dyn KeyDeriver>,
        locks: Arc<PaymentLocks>,
        wallet: WalletConfig,
        payments: PaymentsConfig,
    ) -> Self {
        Self {
            store,
            deriver,
            locks,
            wallet,
            payments,
        }
    }

    /// Builds a payment request for an existing invoice.
    ///
    /// Re-requesting reuses the scripts already on the ledger for this
    /// payment instead of deriving new ones. The ledger write happens before
    /// the request is returned; if it fails, no request is handed out.
    pub async fn create_request(
        &self,
        payment_id: &str,
        hostname: &str,
        cancel: &CancellationToken,
    ) -> Result<PaymentRequest> {
        if payment_id.is_empty() {
            return Err(Error::validation("paymentID", "must not be empty"));
        }
        if hostname.is_empty() {
            return Err(Error::validation("hostname", "must not be empty"));
        }
        ensure_live(cancel)?;
        let _guard = self.locks.acquire(payment_id).await?;

        let invoice = self
            .store
            .invoices()
            .get(payment_id)?
            .ok_or_else(|| Error::not_found("invoice", payment_id))?;
        if invoice.is_settled() {
            return Err(Error::duplicate("settlement", payment_id));
        }

        ensure_live(cancel)?;
        let existing = self.store.script_keys().find_by_payment(payment_id)?;
        let outputs = if let Some(record) = existing.first() {
            debug!(
                "Reusing ledger script for payment '{}' (path {})",
                payment_id, record.derivation_path
            );
            vec![self.invoice_output(&invoice, record.locking_script.clone())]
        } else {
            vec![self.derive_output(&invoice, payment_id, cancel).await?]
        };

        let now = current_timestamp();
        Ok(PaymentRequest {
            network: self.wallet.network.clone(),
            outputs,
            creation_timestamp: now,
            expiration_timestamp: now + self.payments.request_expiry_secs(),
            payment_url: format!("http://{}/api/v1/payment/{}", hostname, payment_id),
            memo: format!("Payment request for invoice {}", payment_id),
            merchant_data: Some(MerchantData {
                avatar_url: self.payments.merchant_avatar_url.clone(),
                merchant_name: Some(self.payments.merchant_name.clone()),
            }),
        })
    }

    /// Derives a fresh locking script and records it on the ledger.
    async fn derive_output(
        &self,
        invoice: &Invoice,
        payment_id: &str,
        cancel: &CancellationToken,
    ) -> Result<Output> {
        let key_name = &self.wallet.key_name;
        let master = self.store.keys().get(key_name)?.ok_or_else(|| {
            Error::dependency(
                "load master key",
                key_name,
                anyhow::anyhow!("master key not found"),
            )
        })?;

        let index = self.store.keys().reserve_index(key_name)?;
        let path = format!("{}/{}", self.wallet.derivation_prefix, index);
        let script = self.deriver.derive_locking_script(&master, &path)?;

        ensure_live(cancel)?;
        let record = ScriptKeyRecord {
            locking_script: script.clone(),
            key_name: key_name.clone(),
            derivation_path: path.clone(),
            payment_id: payment_id.to_owned(),
            created_at: current_timestamp(),
        };
        self.store.script_keys().create(&[record])?;
        info!(
            "Issued payment request for invoice '{}' ({} sat, path {})",
            payment_id, invoice.satoshis, path
        );

        Ok(self.invoice_output(invoice, script))
    }

    fn invoice_output(&self, invoice: &Invoice, script: String) -> Output {
        Output {
            amount: invoice.satoshis,
            script,
            description: invoice.description.clone().unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::Invoice;
    use crate::wallet::WalletKeychain;

    fn service() -> PaymentRequestService {
        let store = Arc::new(Store::in_memory().unwrap());
        store.keys().get_or_create("masterkey").unwrap();
        PaymentRequestService::new(
            store,
            Arc::new(WalletKeychain::new()),
            Arc::new(PaymentLocks::new()),
            WalletConfig::default(),
            PaymentsConfig::default(),
        )
    }

    fn seed_invoice(svc: &PaymentRequestService, payment_id: &str, satoshis: u64) {
        svc.store
            .invoices()
            .create(&Invoice {
                payment_id: payment_id.to_owned(),
                satoshis,
                description: Some("for oranges".to_owned()),
                created_at: current_timestamp(),
                paid_at: None,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_request_binds_invoice_amount_and_ledger_script() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        let cancel = CancellationToken::new();

        let request = svc
            .create_request("abc123", "localhost:8443", &cancel)
            .await
            .unwrap();

        assert_eq!(request.outputs.len(), 1);
        assert_eq!(request.outputs[0].amount, 10_000);
        assert_eq!(request.outputs[0].description, "for oranges");
        assert_eq!(
            request.payment_url,
            "http://localhost:8443/api/v1/payment/abc123"
        );
        assert_eq!(request.memo, "Payment request for invoice abc123");
        assert_eq!(
            request.expiration_timestamp - request.creation_timestamp,
            24 * 3600
        );

        // The script the payer sees is on the ledger, bound to this payment.
        let record = svc
            .store
            .script_keys()
            .lookup(&request.outputs[0].script)
            .unwrap()
            .unwrap();
        assert_eq!(record.payment_id, "abc123");
    }

    #[tokio::test]
    async fn test_re_request_reuses_existing_script() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        let cancel = CancellationToken::new();

        let first = svc
            .create_request("abc123", "localhost:8443", &cancel)
            .await
            .unwrap();
        let second = svc
            .create_request("abc123", "localhost:8443", &cancel)
            .await
            .unwrap();

        assert_eq!(first.outputs[0].script, second.outputs[0].script);
        assert_eq!(
            svc.store.script_keys().find_by_payment("abc123").unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_distinct_payments_get_distinct_scripts() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        seed_invoice(&svc, "def456", 2_000);
        let cancel = CancellationToken::new();

        let a = svc
            .create_request("abc123", "localhost:8443", &cancel)
            .await
            .unwrap();
        let b = svc
            .create_request("def456", "localhost:8443", &cancel)
            .await
            .unwrap();
        assert_ne!(a.outputs[0].script, b.outputs[0].script);
    }

    #[tokio::test]
    async fn test_unknown_invoice_is_not_found() {
        let svc = service();
        let cancel = CancellationToken::new();
        let err = svc
            .create_request("missing", "localhost:8443", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_empty_arguments_are_rejected() {
        let svc = service();
        let cancel = CancellationToken::new();
        assert!(matches!(
            svc.create_request("", "localhost:8443", &cancel).await,
            Err(Error::Validation { .. })
        ));
        assert!(matches!(
            svc.create_request("abc123", "", &cancel).await,
            Err(Error::Validation { .. })
        ));
    }

    #[tokio::test]
    async fn test_settled_invoice_cannot_be_re_requested() {
        let svc = service();
        svc.store
            .invoices()
            .create(&Invoice {
                payment_id: "paid".to_owned(),
                satoshis: 10_000,
                description: None,
                created_at: current_timestamp(),
                paid_at: Some(current_timestamp()),
            })
            .unwrap();
        let cancel = CancellationToken::new();
        let err = svc
            .create_request("paid", "localhost:8443", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Duplicate { .. }));
    }

    #[tokio::test]
    async fn test_cancellation_stops_issuance() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = svc
            .create_request("abc123", "localhost:8443", &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        // Nothing was derived or persisted.
        assert!(svc
            .store
            .script_keys()
            .find_by_payment("abc123")
            .unwrap()
            .is_empty());
    }
}
