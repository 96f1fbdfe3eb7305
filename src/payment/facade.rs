//! Settlement routing.

use std::fmt;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::SettlementStrategy;
use crate::bip270::{Payment, PaymentAck};
use crate::errors::Result;

/// Which settlement path the daemon runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettlementMode {
    /// Validate locally against the script-key ledger.
    Wallet,
    /// Forward to a paymail counterpart.
    Paymail,
}

impl fmt::Display for SettlementMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SettlementMode::Wallet => f.write_str("wallet"),
            SettlementMode::Paymail => f.write_str("paymail"),
        }
    }
}

/// Routes submitted payments to the strategy chosen at startup.
///
/// The choice is made once from configuration; per-request dispatch carries
/// no branching beyond the virtual call.
pub struct PaymentFacade {
    mode: SettlementMode,
    strategy: Arc<dyn SettlementStrategy>,
}

impl PaymentFacade {
    pub fn new(mode: SettlementMode, strategy: Arc<dyn SettlementStrategy>) -> Self {
        Self { mode, strategy }
    }

    pub fn mode(&self) -> SettlementMode {
        self.mode
    }

    /// Hands a submitted payment to the configured strategy.
    pub async fn settle(
        &self,
        payment_id: &str,
        payment: Payment,
        cancel: &CancellationToken,
    ) -> Result<PaymentAck> {
        debug!(
            "Routing settlement for payment '{}' to {} strategy",
            payment_id, self.mode
        );
        self.strategy.settle(payment_id, payment, cancel).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct FixedAck;

    #[async_trait]
    impl SettlementStrategy for FixedAck {
        async fn settle(
            &self,
            _payment_id: &str,
            payment: Payment,
            _cancel: &CancellationToken,
        ) -> Result<PaymentAck> {
            Ok(PaymentAck::accepted(payment))
        }
    }

    #[tokio::test]
    async fn test_delegates_to_configured_strategy() {
        let facade = PaymentFacade::new(SettlementMode::Wallet, Arc::new(FixedAck));
        let payment = Payment {
            transaction: "00".to_owned(),
            merchant_data: None,
            refund_to: None,
            memo: String::new(),
        };
        let ack = facade
            .settle("abc123", payment, &CancellationToken::new())
            .await
            .unwrap();
        assert!(ack.is_accepted());
        assert_eq!(facade.mode(), SettlementMode::Wallet);
    }
}
