use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock};

use lumen_crypto::ServiceKeys;
use lumen_relay::RelayClient;
use lumen_store::Store;
use lumen_wallet::{create_backend, WalletBackend, WalletConfig, WalletError};

use crate::events::EventLogger;

/// Process-wide service state: identity keys, repository, wallet backend and
/// relay client. Initialized once at startup; shared across handler tasks.
pub struct Service {
    keys: ServiceKeys,
    store: Arc<Store>,
    wallet: RwLock<Arc<dyn WalletBackend>>,
    relay: Arc<dyn RelayClient>,
    logger: EventLogger,
    /// Per-app locks serializing budget check + payment insertion.
    pay_locks: Mutex<HashMap<u64, Arc<Mutex<()>>>>,
}

impl Service {
    pub fn new(
        keys: ServiceKeys,
        store: Arc<Store>,
        wallet: Arc<dyn WalletBackend>,
        relay: Arc<dyn RelayClient>,
        logger: EventLogger,
    ) -> Arc<Self> {
        Arc::new(Self {
            keys,
            store,
            wallet: RwLock::new(wallet),
            relay,
            logger,
            pay_locks: Mutex::new(HashMap::new()),
        })
    }

    pub fn keys(&self) -> &ServiceKeys {
        &self.keys
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn relay(&self) -> &dyn RelayClient {
        self.relay.as_ref()
    }

    pub fn logger(&self) -> &EventLogger {
        &self.logger
    }

    /// The current wallet backend. Clone of the shared handle; safe to use
    /// across an await while the instance is being replaced.
    pub async fn wallet(&self) -> Arc<dyn WalletBackend> {
        self.wallet.read().await.clone()
    }

    /// Replace the wallet backend from configuration. The prior instance is
    /// shut down before the new one is installed.
    pub async fn reinit_wallet(&self, config: &WalletConfig) -> Result<(), WalletError> {
        let replacement = create_backend(config)?;
        let mut guard = self.wallet.write().await;
        guard.shutdown().await;
        *guard = replacement;
        Ok(())
    }

    /// The payment serialization lock for one app. Budget summation and
    /// payment insertion must not interleave between two concurrent payments
    /// of the same app.
    pub async fn pay_lock(&self, app_id: u64) -> Arc<Mutex<()>> {
        let mut locks = self.pay_locks.lock().await;
        locks
            .entry(app_id)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }
}
