//! Daemon orchestration.
//!
//! Wires storage, the key deriver, the payment services and the HTTP API
//! together, choosing the settlement strategy once from configuration.

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::api::ApiServer;
use crate::codec::RawTxDecoder;
use crate::config::Config;
use crate::payment::{
    InvoiceService, PaymailClient, PaymailSettlementService, PaymentFacade, PaymentLocks,
    PaymentRequestService, SettlementMode, WalletSettlementService,
};
use crate::storage::Store;
use crate::wallet::{KeyDeriver, WalletKeychain};

/// The payment daemon.
///
/// Owns the store and the cancellation token; `start` runs the API server
/// until the token fires, then flushes storage.
pub struct PaymentHost {
    config: Config,
    store: Arc<Store>,
    paymail_client: Option<Arc<dyn PaymailClient>>,
    cancel: CancellationToken,
}

impl PaymentHost {
    /// Validate the configuration and open storage.
    pub fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let store = Arc::new(Store::open(&config.storage)?);
        Ok(Self {
            config,
            store,
            paymail_client: None,
            cancel: CancellationToken::new(),
        })
    }

    /// Inject the counterpart client used when paymail mode is enabled.
    pub fn with_paymail_client(mut self, client: Arc<dyn PaymailClient>) -> Self {
        self.paymail_client = Some(client);
        self
    }

    /// Token observers can use to stop the daemon.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    /// Request shutdown; `start` returns once in-flight work drains.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Run the daemon until shutdown is requested.
    pub async fn start(&self) -> Result<()> {
        info!("Starting payment host");
        for warning in self.config.validate_security() {
            warn!("{}", warning);
        }

        let key = self.store.keys().get_or_create(&self.config.wallet.key_name)?;
        info!("Wallet master key '{}' ready", key.name);

        let purged = self.store.paymail_refs().purge_expired()?;
        if purged > 0 {
            info!("Purged {} expired paymail references", purged);
        }

        let locks = Arc::new(PaymentLocks::new());
        let deriver: Arc<dyn KeyDeriver> = Arc::new(WalletKeychain::new());
        let requests = Arc::new(PaymentRequestService::new(
            Arc::clone(&self.store),
            deriver,
            Arc::clone(&locks),
            self.config.wallet.clone(),
            self.config.payments.clone(),
        ));
        let facade = self.build_facade(&locks)?;
        info!("Settlement mode: {}", facade.mode());
        let invoices = Arc::new(InvoiceService::new(Arc::clone(&self.store)));

        let api = ApiServer::new(
            &self.config.server,
            Arc::clone(&self.store),
            invoices,
            requests,
            facade,
        );
        let result = api.start(self.cancel.clone()).await;

        self.store.flush()?;
        info!("Payment host stopped");
        result
    }

    fn build_facade(&self, locks: &Arc<PaymentLocks>) -> Result<Arc<PaymentFacade>> {
        if self.config.paymail.enabled {
            let client = self.paymail_client.clone().ok_or_else(|| {
                anyhow::anyhow!("paymail mode is enabled but no counterpart client was provided")
            })?;
            let counterpart = self.config.paymail.counterpart.clone().ok_or_else(|| {
                anyhow::anyhow!("paymail mode is enabled but paymail.counterpart is not set")
            })?;
            let strategy = PaymailSettlementService::new(
                Arc::clone(&self.store),
                client,
                Arc::clone(locks),
                counterpart,
                self.config.paymail_reference_ttl_secs(),
            );
            Ok(Arc::new(PaymentFacade::new(
                SettlementMode::Paymail,
                Arc::new(strategy),
            )))
        } else {
            let strategy = WalletSettlementService::new(
                Arc::clone(&self.store),
                Arc::new(RawTxDecoder),
                Arc::clone(locks),
            );
            Ok(Arc::new(PaymentFacade::new(
                SettlementMode::Wallet,
                Arc::new(strategy),
            )))
        }
    }
}
