//! lumen-wallet — the pluggable Lightning backend.
//!
//! The service is polymorphic over [`WalletBackend`]; concrete backends are
//! selected from configuration at startup and may be reinitialized at
//! runtime (the prior instance is shut down first).

mod config;
mod rpc;

pub use config::{create_backend, WalletConfig};
pub use rpc::RpcWallet;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use lumen_core::payload::{ListTransactionsParams, TlvRecord};

#[derive(Debug, Error)]
pub enum WalletError {
    #[error("insufficient balance")]
    InsufficientBalance,

    #[error("no route to destination")]
    RouteNotFound,

    #[error("not found")]
    NotFound,

    #[error("backend error: {0}")]
    Internal(String),
}

/// An invoice or payment record as reported by the backend. The same shape
/// serves `make_invoice`, `lookup_invoice` and `list_transactions` results.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// "incoming" or "outgoing".
    #[serde(rename = "type")]
    pub tx_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub invoice: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    pub payment_hash: String,
    /// Amount in msats.
    pub amount: u64,
    /// Fees in msats.
    #[serde(default)]
    pub fees_paid: u64,
    pub created_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub settled_at: Option<i64>,
}

/// Node identity and capability description for `get_info`.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub alias: String,
    pub color: String,
    pub pubkey: String,
    pub network: String,
    pub block_height: u64,
    #[serde(default)]
    pub block_hash: String,
}

/// The capability set every Lightning backend provides.
#[async_trait]
pub trait WalletBackend: Send + Sync {
    /// Pay a BOLT-11 invoice. `amount_msat` overrides for zero-amount
    /// invoices. Returns the preimage hex.
    async fn send_payment(
        &self,
        invoice: &str,
        amount_msat: Option<u64>,
    ) -> Result<String, WalletError>;

    /// Spontaneous payment to `dest_pubkey`. Returns the preimage hex.
    async fn send_keysend(
        &self,
        amount_msat: u64,
        dest_pubkey: &str,
        preimage: Option<String>,
        tlv_records: Vec<TlvRecord>,
    ) -> Result<String, WalletError>;

    /// Spendable balance in msats.
    async fn get_balance(&self) -> Result<u64, WalletError>;

    async fn make_invoice(
        &self,
        amount_msat: u64,
        description: &str,
        description_hash: &str,
        expiry_s: u64,
    ) -> Result<Transaction, WalletError>;

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<Transaction, WalletError>;

    async fn list_transactions(
        &self,
        params: &ListTransactionsParams,
    ) -> Result<Vec<Transaction>, WalletError>;

    async fn get_info(&self) -> Result<NodeInfo, WalletError>;

    /// Release backend resources. Called before the instance is replaced and
    /// on service teardown.
    async fn shutdown(&self);
}
