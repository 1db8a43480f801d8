use async_trait::async_trait;
use serde_json::json;

use lumen_core::payload::{ListTransactionsParams, TlvRecord};

use crate::{NodeInfo, Transaction, WalletBackend, WalletError};

/// Lightning backend speaking JSON-RPC 2.0 over HTTP POST.
///
/// Uses raw reqwest with serde_json rather than a full RPC framework to keep
/// the backend lean; the node daemon side defines one method per capability.
pub struct RpcWallet {
    url: String,
    client: reqwest::Client,
}

impl RpcWallet {
    pub fn new(url: &str) -> Self {
        Self {
            url: url.to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Call a JSON-RPC method and return the `result` field.
    async fn call(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> Result<serde_json::Value, WalletError> {
        let body = json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params,
            "id": 1
        });

        let resp = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await
            .map_err(|e| WalletError::Internal(format!("connecting to backend: {e}")))?;

        let json: serde_json::Value = resp
            .json()
            .await
            .map_err(|e| WalletError::Internal(format!("parsing backend response: {e}")))?;

        if let Some(err) = json.get("error").filter(|e| !e.is_null()) {
            return Err(map_rpc_error(err));
        }

        Ok(json["result"].clone())
    }
}

/// Map a backend JSON-RPC error object onto the wallet error surface.
fn map_rpc_error(err: &serde_json::Value) -> WalletError {
    let message = err["message"].as_str().unwrap_or("unknown error");
    let lowered = message.to_ascii_lowercase();
    if lowered.contains("insufficient") {
        WalletError::InsufficientBalance
    } else if lowered.contains("no route") || lowered.contains("route not found") {
        WalletError::RouteNotFound
    } else if lowered.contains("not found") {
        WalletError::NotFound
    } else {
        WalletError::Internal(message.to_string())
    }
}

fn preimage_from(result: serde_json::Value) -> Result<String, WalletError> {
    result["preimage"]
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| WalletError::Internal("missing preimage in backend response".into()))
}

#[async_trait]
impl WalletBackend for RpcWallet {
    async fn send_payment(
        &self,
        invoice: &str,
        amount_msat: Option<u64>,
    ) -> Result<String, WalletError> {
        let result = self
            .call(
                "sendpayment",
                json!({ "invoice": invoice, "amount_msat": amount_msat }),
            )
            .await?;
        preimage_from(result)
    }

    async fn send_keysend(
        &self,
        amount_msat: u64,
        dest_pubkey: &str,
        preimage: Option<String>,
        tlv_records: Vec<TlvRecord>,
    ) -> Result<String, WalletError> {
        let result = self
            .call(
                "keysend",
                json!({
                    "amount_msat": amount_msat,
                    "destination": dest_pubkey,
                    "preimage": preimage,
                    "tlv_records": tlv_records,
                }),
            )
            .await?;
        preimage_from(result)
    }

    async fn get_balance(&self) -> Result<u64, WalletError> {
        let result = self.call("getbalance", json!({})).await?;
        result["balance_msat"]
            .as_u64()
            .ok_or_else(|| WalletError::Internal("missing balance_msat".into()))
    }

    async fn make_invoice(
        &self,
        amount_msat: u64,
        description: &str,
        description_hash: &str,
        expiry_s: u64,
    ) -> Result<Transaction, WalletError> {
        let result = self
            .call(
                "makeinvoice",
                json!({
                    "amount_msat": amount_msat,
                    "description": description,
                    "description_hash": description_hash,
                    "expiry": expiry_s,
                }),
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| WalletError::Internal(format!("parsing invoice: {e}")))
    }

    async fn lookup_invoice(&self, payment_hash: &str) -> Result<Transaction, WalletError> {
        let result = self
            .call("lookupinvoice", json!({ "payment_hash": payment_hash }))
            .await?;
        if result.is_null() {
            return Err(WalletError::NotFound);
        }
        serde_json::from_value(result)
            .map_err(|e| WalletError::Internal(format!("parsing invoice: {e}")))
    }

    async fn list_transactions(
        &self,
        params: &ListTransactionsParams,
    ) -> Result<Vec<Transaction>, WalletError> {
        let result = self
            .call(
                "listtransactions",
                serde_json::to_value(params)
                    .map_err(|e| WalletError::Internal(e.to_string()))?,
            )
            .await?;
        serde_json::from_value(result)
            .map_err(|e| WalletError::Internal(format!("parsing transactions: {e}")))
    }

    async fn get_info(&self) -> Result<NodeInfo, WalletError> {
        let result = self.call("getinfo", json!({})).await?;
        serde_json::from_value(result)
            .map_err(|e| WalletError::Internal(format!("parsing node info: {e}")))
    }

    async fn shutdown(&self) {
        // Stateless HTTP client; nothing to release.
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_mapping_by_message() {
        let e = map_rpc_error(&json!({ "code": -1, "message": "Insufficient balance" }));
        assert!(matches!(e, WalletError::InsufficientBalance));

        let e = map_rpc_error(&json!({ "code": -1, "message": "no route to peer" }));
        assert!(matches!(e, WalletError::RouteNotFound));

        let e = map_rpc_error(&json!({ "code": -1, "message": "invoice not found" }));
        assert!(matches!(e, WalletError::NotFound));

        let e = map_rpc_error(&json!({ "code": -1, "message": "something else" }));
        assert!(matches!(e, WalletError::Internal(_)));
    }
}
