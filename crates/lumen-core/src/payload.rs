//! Inner request/response payloads carried encrypted in event content.
//!
//! Requests arrive as `{"method": "...", "params": {...}}`; responses are
//! `{"result_type": "...", "error": {...}|null, "result": {...}|null}`.

use serde::{Deserialize, Serialize};

// ── Method ───────────────────────────────────────────────────────────────────

/// Recognized request methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Method {
    PayInvoice,
    PayKeysend,
    MultiPayInvoice,
    MultiPayKeysend,
    MakeInvoice,
    LookupInvoice,
    ListTransactions,
    GetBalance,
    GetInfo,
}

/// Supported methods, in the order advertised by the info event.
pub const SUPPORTED_METHODS: &[Method] = &[
    Method::PayInvoice,
    Method::PayKeysend,
    Method::MultiPayInvoice,
    Method::MultiPayKeysend,
    Method::MakeInvoice,
    Method::LookupInvoice,
    Method::ListTransactions,
    Method::GetBalance,
    Method::GetInfo,
];

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::PayInvoice => "pay_invoice",
            Method::PayKeysend => "pay_keysend",
            Method::MultiPayInvoice => "multi_pay_invoice",
            Method::MultiPayKeysend => "multi_pay_keysend",
            Method::MakeInvoice => "make_invoice",
            Method::LookupInvoice => "lookup_invoice",
            Method::ListTransactions => "list_transactions",
            Method::GetBalance => "get_balance",
            Method::GetInfo => "get_info",
        }
    }

    /// Payment methods spend against the per-app budget.
    pub fn is_payment(&self) -> bool {
        matches!(
            self,
            Method::PayInvoice
                | Method::PayKeysend
                | Method::MultiPayInvoice
                | Method::MultiPayKeysend
        )
    }
}

impl std::str::FromStr for Method {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        SUPPORTED_METHODS
            .iter()
            .copied()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| format!("unknown method: {s}"))
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Space-separated method list for the capability advertisement event.
pub fn supported_methods_content() -> String {
    SUPPORTED_METHODS
        .iter()
        .map(Method::as_str)
        .collect::<Vec<_>>()
        .join(" ")
}

// ── Request ──────────────────────────────────────────────────────────────────

/// Decrypted request plaintext. The method is kept as a raw string so an
/// unrecognized name can still be echoed back in a `not_implemented` reply.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Request {
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayInvoiceParams {
    pub invoice: String,
    /// Override amount in msats, for zero-amount invoices.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<u64>,
    /// Sub-request identifier inside a multi request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TlvRecord {
    #[serde(rename = "type")]
    pub tlv_type: u64,
    /// Hex-encoded record value.
    pub value: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PayKeysendParams {
    /// Amount in msats.
    pub amount: u64,
    pub pubkey: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preimage: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tlv_records: Option<Vec<TlvRecord>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiPayInvoiceParams {
    pub invoices: Vec<PayInvoiceParams>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MultiPayKeysendParams {
    pub keysends: Vec<PayKeysendParams>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MakeInvoiceParams {
    /// Amount in msats.
    pub amount: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description_hash: Option<String>,
    /// Invoice expiry in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiry: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LookupInvoiceParams {
    pub payment_hash: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ListTransactionsParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub from: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub until: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unpaid: Option<bool>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub tx_type: Option<String>,
}

// ── Response ─────────────────────────────────────────────────────────────────

/// Error codes defined by the wallet-connect protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    Unauthorized,
    Expired,
    Restricted,
    QuotaExceeded,
    RateLimited,
    NotImplemented,
    InsufficientBalance,
    PaymentFailed,
    Internal,
    Other,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NwcError {
    pub code: ErrorCode,
    pub message: String,
}

/// Response plaintext. `error` and `result` are mutually exclusive; both
/// serialize as explicit nulls when absent, per the wire contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Response {
    pub result_type: String,
    pub error: Option<NwcError>,
    pub result: Option<serde_json::Value>,
}

impl Response {
    pub fn ok<T: Serialize>(method: &str, result: &T) -> Self {
        Self {
            result_type: method.to_string(),
            error: None,
            // Serialization of our own result structs cannot fail.
            result: Some(serde_json::to_value(result).expect("serializable result")),
        }
    }

    pub fn error(method: &str, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            result_type: method.to_string(),
            error: Some(NwcError {
                code,
                message: message.into(),
            }),
            result: None,
        }
    }
}

/// Result of `pay_invoice` and `pay_keysend`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PayResult {
    pub preimage: String,
}

/// Result of `get_balance`. Amount in msats.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BalanceResult {
    pub balance: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_names_round_trip() {
        for m in SUPPORTED_METHODS {
            assert_eq!(m.as_str().parse::<Method>().unwrap(), *m);
        }
        assert!("open_channel".parse::<Method>().is_err());
    }

    #[test]
    fn multi_methods_are_payments() {
        assert!(Method::MultiPayInvoice.is_payment());
        assert!(Method::PayKeysend.is_payment());
        assert!(!Method::GetInfo.is_payment());
    }

    #[test]
    fn error_codes_are_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::QuotaExceeded).unwrap();
        assert_eq!(json, "\"QUOTA_EXCEEDED\"");
    }

    #[test]
    fn response_serializes_explicit_nulls() {
        let resp = Response::ok("get_balance", &BalanceResult { balance: 21_000 });
        let v: serde_json::Value = serde_json::to_value(&resp).unwrap();
        assert!(v["error"].is_null());
        assert_eq!(v["result"]["balance"], 21_000);

        let err = Response::error("pay_invoice", ErrorCode::Restricted, "no permission");
        let v: serde_json::Value = serde_json::to_value(&err).unwrap();
        assert!(v["result"].is_null());
        assert_eq!(v["error"]["code"], "RESTRICTED");
    }

    #[test]
    fn request_parses_without_params() {
        let req: Request = serde_json::from_str(r#"{"method":"get_info"}"#).unwrap();
        assert_eq!(req.method, "get_info");
        assert!(req.params.is_null());
    }

    #[test]
    fn info_content_lists_all_methods() {
        let content = supported_methods_content();
        assert!(content.starts_with("pay_invoice "));
        assert!(content.ends_with(" get_info"));
        assert_eq!(content.split(' ').count(), SUPPORTED_METHODS.len());
    }
}
