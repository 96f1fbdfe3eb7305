//! Wallet-native settlement validation.
//!
//! A submitted payment moves through four steps: decode the raw
//! transaction, match its outputs against the script-key ledger, compare
//! the recognized total to the invoice amount, then either commit the
//! settlement atomically or reject it. Rejections are definitive protocol
//! answers carried inside an acknowledgement, not service errors.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use super::{ensure_live, PaymentLocks};
use crate::bip270::{Payment, PaymentAck};
use crate::codec::TxDecoder;
use crate::errors::{Error, Result};
use crate::storage::{Store, StoredTransaction, Txo};
use crate::utils::current_timestamp;

/// A settlement delivery strategy.
///
/// The wallet validator settles against the local ledger; the paymail
/// strategy forwards to a remote counterpart. Both answer with a BIP-270
/// acknowledgement.
#[async_trait]
pub trait SettlementStrategy: Send + Sync {
    /// Validates or forwards a submitted payment for `payment_id` and
    /// returns the acknowledgement the payer should receive.
    async fn settle(
        &self,
        payment_id: &str,
        payment: Payment,
        cancel: &CancellationToken,
    ) -> Result<PaymentAck>;
}

/// Validates settlement transactions against invoices and the script-key
/// ledger, committing accepted ones durably.
pub struct WalletSettlementService {
    store: Arc<Store>,
    decoder: Arc<dyn TxDecoder>,
    locks: Arc<PaymentLocks>,
}

impl WalletSettlementService {
    pub fn new(store: Arc<Store>, decoder: Arc<dyn TxDecoder>, locks: Arc<PaymentLocks>) -> Self {
        Self {
            store,
            decoder,
            locks,
        }
    }

    fn reject(&self, payment_id: &str, payment: Payment, memo: String) -> PaymentAck {
        warn!("Rejected settlement for invoice '{}': {}", payment_id, memo);
        PaymentAck::rejected(payment, memo)
    }
}

#[async_trait]
impl SettlementStrategy for WalletSettlementService {
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

        let mut invoice = self
            .store
            .invoices()
            .get(payment_id)?
            .ok_or_else(|| Error::not_found("invoice", payment_id))?;

        // A settled invoice answers success without revalidating; the ledger
        // already holds the winning transaction.
        if invoice.is_settled() {
            info!(
                "Settlement for invoice '{}' already committed, acknowledging",
                payment_id
            );
            let mut ack = PaymentAck::accepted(payment);
            ack.memo = format!("Payment already received for paymentID {}", payment_id);
            return Ok(ack);
        }

        // Decode failures are the payer's problem, answered in-protocol.
        let decoded = match self.decoder.decode(&payment.transaction) {
            Ok(decoded) => decoded,
            Err(e) => {
                return Ok(self.reject(
                    payment_id,
                    payment,
                    format!("Invalid transaction for paymentID {}: {}", payment_id, e),
                ));
            }
        };

        ensure_live(cancel)?;

        // Every output is recorded; only ledger-matched ones pay the invoice.
        // Unmatched outputs are change or someone else's scripts.
        let mut recognized: u64 = 0;
        let mut txos = Vec::with_capacity(decoded.outputs.len());
        for (vout, output) in decoded.outputs.iter().enumerate() {
            let matched = self.store.script_keys().lookup(&output.locking_script)?;
            if let Some(record) = &matched {
                recognized = match recognized.checked_add(output.satoshis) {
                    Some(total) => total,
                    None => {
                        return Ok(self.reject(
                            payment_id,
                            payment,
                            format!("Output total overflows for paymentID {}", payment_id),
                        ));
                    }
                };
                if record.payment_id != payment_id {
                    warn!(
                        "Transaction {} pays a script issued for payment '{}' while settling '{}'",
                        decoded.tx_id, record.payment_id, payment_id
                    );
                }
            }
            txos.push(Txo {
                tx_id: decoded.tx_id.clone(),
                vout: vout as u32,
                locking_script: output.locking_script.clone(),
                satoshis: output.satoshis,
                key_name: matched.as_ref().map(|r| r.key_name.clone()),
                derivation_path: matched.as_ref().map(|r| r.derivation_path.clone()),
                spent_at: None,
            });
        }

        if recognized < invoice.satoshis {
            return Ok(self.reject(
                payment_id,
                payment,
                format!(
                    "Outputs do not fully pay invoice for paymentID {}",
                    payment_id
                ),
            ));
        }

        let now = current_timestamp();
        let tx = StoredTransaction {
            tx_id: decoded.tx_id.clone(),
            payment_id: payment_id.to_owned(),
            raw_hex: payment.transaction.clone(),
            created_at: now,
        };
        invoice.paid_at = Some(now);

        ensure_live(cancel)?;
        self.store.commit_settlement(&invoice, &tx, &txos)?;
        info!(
            "Accepted settlement for invoice '{}' ({} sat recognized, tx {})",
            payment_id, recognized, decoded.tx_id
        );
        // TODO: relay accepted transactions to the network once a broadcast
        // client is wired in.
        Ok(PaymentAck::accepted(payment))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::RawTxDecoder;
    use crate::storage::Invoice;

    fn service() -> WalletSettlementService {
        WalletSettlementService::new(
            Arc::new(Store::in_memory().unwrap()),
            Arc::new(RawTxDecoder),
            Arc::new(PaymentLocks::new()),
        )
    }

    fn seed_invoice(svc: &WalletSettlementService, payment_id: &str, satoshis: u64) {
        svc.store
            .invoices()
            .create(&Invoice {
                payment_id: payment_id.to_owned(),
                satoshis,
                description: None,
                created_at: current_timestamp(),
                paid_at: None,
            })
            .unwrap();
    }

    fn seed_script(svc: &WalletSettlementService, payment_id: &str, script: &str) {
        svc.store
            .script_keys()
            .create(&[crate::storage::ScriptKeyRecord {
                locking_script: script.to_owned(),
                key_name: "masterkey".to_owned(),
                derivation_path: "0/0".to_owned(),
                payment_id: payment_id.to_owned(),
                created_at: current_timestamp(),
            }])
            .unwrap();
    }

    /// Minimal legacy transaction paying the given scripts.
    fn raw_tx(outputs: &[(u64, &str)]) -> String {
        let mut raw = Vec::new();
        raw.extend_from_slice(&1u32.to_le_bytes());
        raw.push(1); // one input
        raw.extend_from_slice(&[0u8; 32]);
        raw.extend_from_slice(&0u32.to_le_bytes());
        raw.push(0); // empty script sig
        raw.extend_from_slice(&0xffff_ffffu32.to_le_bytes());
        raw.push(outputs.len() as u8);
        for (satoshis, script) in outputs {
            raw.extend_from_slice(&satoshis.to_le_bytes());
            let script = hex::decode(script).unwrap();
            raw.push(script.len() as u8);
            raw.extend_from_slice(&script);
        }
        raw.extend_from_slice(&0u32.to_le_bytes());
        hex::encode(raw)
    }

    fn payment(raw_hex: String) -> Payment {
        Payment {
            transaction: raw_hex,
            merchant_data: None,
            refund_to: None,
            memo: String::new(),
        }
    }

    const SCRIPT: &str = "76a914f54a5851e9372b87810a8e60cdd2e7cfd80b6e3188ac";

    #[tokio::test]
    async fn test_exact_amount_settles_invoice() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        seed_script(&svc, "abc123", SCRIPT);
        let cancel = CancellationToken::new();

        let ack = svc
            .settle("abc123", payment(raw_tx(&[(10_000, SCRIPT)])), &cancel)
            .await
            .unwrap();

        assert!(ack.is_accepted());
        assert_eq!(ack.error, 0);
        assert_eq!(ack.success, "true");

        let invoice = svc.store.invoices().get("abc123").unwrap().unwrap();
        assert!(invoice.is_settled());
        let tx_id = svc
            .store
            .transactions()
            .settlement_for("abc123")
            .unwrap()
            .unwrap();
        assert!(svc.store.transactions().get(&tx_id).unwrap().is_some());
        assert_eq!(svc.store.transactions().unspent_balance().unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_underpayment_is_rejected_with_invoice_memo() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        seed_script(&svc, "abc123", SCRIPT);
        let cancel = CancellationToken::new();

        let ack = svc
            .settle("abc123", payment(raw_tx(&[(9_999, SCRIPT)])), &cancel)
            .await
            .unwrap();

        assert!(!ack.is_accepted());
        assert_eq!(ack.error, 1);
        assert_eq!(ack.success, "false");
        assert_eq!(
            ack.memo,
            "Outputs do not fully pay invoice for paymentID abc123"
        );
        // Nothing was persisted.
        assert!(!svc.store.invoices().get("abc123").unwrap().unwrap().is_settled());
        assert!(svc.store.transactions().settlement_for("abc123").unwrap().is_none());
        assert!(svc.store.transactions().list_txos().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_outputs_do_not_count() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        seed_script(&svc, "abc123", SCRIPT);
        // Foreign change script, not on the ledger.
        let foreign = "76a914000000000000000000000000000000000000000088ac";
        let cancel = CancellationToken::new();

        let ack = svc
            .settle(
                "abc123",
                payment(raw_tx(&[(6_000, SCRIPT), (5_000, foreign)])),
                &cancel,
            )
            .await
            .unwrap();

        // 6000 recognized < 10000 required even though the tx moves 11000.
        assert!(!ack.is_accepted());
        assert_eq!(
            ack.memo,
            "Outputs do not fully pay invoice for paymentID abc123"
        );
    }

    #[tokio::test]
    async fn test_accepted_settlement_records_foreign_outputs_too() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        seed_script(&svc, "abc123", SCRIPT);
        let foreign = "76a914000000000000000000000000000000000000000088ac";
        let cancel = CancellationToken::new();

        let ack = svc
            .settle(
                "abc123",
                payment(raw_tx(&[(10_000, SCRIPT), (123, foreign)])),
                &cancel,
            )
            .await
            .unwrap();
        assert!(ack.is_accepted());

        let txos = svc.store.transactions().list_txos().unwrap();
        assert_eq!(txos.len(), 2);
        assert!(txos.iter().any(|t| t.is_ours() && t.satoshis == 10_000));
        assert!(txos.iter().any(|t| !t.is_ours() && t.satoshis == 123));
        // Only our output counts toward the balance.
        assert_eq!(svc.store.transactions().unspent_balance().unwrap(), 10_000);
    }

    #[tokio::test]
    async fn test_malformed_hex_is_rejected_without_persisting() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        let cancel = CancellationToken::new();

        let ack = svc
            .settle("abc123", payment("zz-not-hex".to_owned()), &cancel)
            .await
            .unwrap();

        assert!(!ack.is_accepted());
        assert_eq!(ack.error, 1);
        assert!(ack.memo.contains("abc123"));
        assert!(svc.store.transactions().list_txos().unwrap().is_empty());
        assert!(!svc.store.invoices().get("abc123").unwrap().unwrap().is_settled());
    }

    #[tokio::test]
    async fn test_unknown_payment_id_is_not_found() {
        let svc = service();
        let cancel = CancellationToken::new();
        let err = svc
            .settle("missing", payment(raw_tx(&[(1, SCRIPT)])), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
        assert!(svc.store.transactions().list_txos().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_second_settlement_short_circuits() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        seed_script(&svc, "abc123", SCRIPT);
        let cancel = CancellationToken::new();

        let first = svc
            .settle("abc123", payment(raw_tx(&[(10_000, SCRIPT)])), &cancel)
            .await
            .unwrap();
        assert!(first.is_accepted());
        let paid_at = svc
            .store
            .invoices()
            .get("abc123")
            .unwrap()
            .unwrap()
            .paid_at;

        let second = svc
            .settle("abc123", payment(raw_tx(&[(10_000, SCRIPT)])), &cancel)
            .await
            .unwrap();
        assert!(second.is_accepted());
        assert_eq!(second.memo, "Payment already received for paymentID abc123");

        // Idempotent: no new rows, paid-at unchanged.
        assert_eq!(svc.store.transactions().list_txos().unwrap().len(), 1);
        assert_eq!(
            svc.store.invoices().get("abc123").unwrap().unwrap().paid_at,
            paid_at
        );
    }

    #[tokio::test]
    async fn test_overpayment_is_accepted() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        seed_script(&svc, "abc123", SCRIPT);
        let cancel = CancellationToken::new();

        let ack = svc
            .settle("abc123", payment(raw_tx(&[(15_000, SCRIPT)])), &cancel)
            .await
            .unwrap();
        assert!(ack.is_accepted());
    }

    #[tokio::test]
    async fn test_cancellation_before_commit_leaves_no_trace() {
        let svc = service();
        seed_invoice(&svc, "abc123", 10_000);
        seed_script(&svc, "abc123", SCRIPT);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = svc
            .settle("abc123", payment(raw_tx(&[(10_000, SCRIPT)])), &cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Cancelled));
        assert!(!svc.store.invoices().get("abc123").unwrap().unwrap().is_settled());
    }
}
