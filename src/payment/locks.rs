//! Per-payment serialization.
//!
//! Request issuance and settlement for one payment identifier must not
//! interleave: two concurrent requests would each derive a fresh script, and
//! two concurrent settlements would race the ledger commit. Each payment
//! identifier gets its own async mutex; different payments proceed in
//! parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

use crate::errors::{Error, Result};

/// Shed idle locks once the map grows past this many entries.
const SHED_THRESHOLD: usize = 1024;

/// A map of per-payment async mutexes.
///
/// Shared between [`PaymentRequestService`](crate::payment::PaymentRequestService)
/// and the settlement strategies so that all mutations for one payment
/// identifier are serialized.
pub struct PaymentLocks {
    locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl PaymentLocks {
    pub fn new() -> Self {
        Self {
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Acquires the mutex for `payment_id`, creating it on first use.
    ///
    /// The guard owns its lock, so it may be held across await points.
    pub async fn acquire(&self, payment_id: &str) -> Result<OwnedMutexGuard<()>> {
        let lock = {
            let mut map = self
                .locks
                .lock()
                .map_err(|_| Error::dependency("acquire payment lock", payment_id, poisoned()))?;
            if map.len() > SHED_THRESHOLD {
                // An entry with no outstanding guard or waiter has a strong
                // count of one and can be dropped.
                map.retain(|_, lock| Arc::strong_count(lock) > 1);
            }
            Arc::clone(
                map.entry(payment_id.to_owned())
                    .or_insert_with(|| Arc::new(AsyncMutex::new(()))),
            )
        };
        Ok(lock.lock_owned().await)
    }
}

impl Default for PaymentLocks {
    fn default() -> Self {
        Self::new()
    }
}

fn poisoned() -> anyhow::Error {
    anyhow::anyhow!("lock map poisoned")
}
