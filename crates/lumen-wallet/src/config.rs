use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::{RpcWallet, WalletBackend, WalletError};

/// Backend selection, loaded from the node's JSON config file.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum WalletConfig {
    /// JSON-RPC 2.0 over HTTP.
    Rpc { url: String },
}

/// Build the configured backend. Called once at startup and again on
/// reinitialization; an unsupported configuration is a fatal init error.
pub fn create_backend(config: &WalletConfig) -> Result<Arc<dyn WalletBackend>, WalletError> {
    match config {
        WalletConfig::Rpc { url } => {
            tracing::info!(%url, "creating RPC wallet backend");
            Ok(Arc::new(RpcWallet::new(url)))
        }
    }
}
