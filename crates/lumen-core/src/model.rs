use serde::{Deserialize, Serialize};

use crate::types::{EventId, Pubkey, Timestamp};

// ── BudgetRenewal ────────────────────────────────────────────────────────────

/// Cadence at which a per-app spending window resets.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetRenewal {
    Never,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl BudgetRenewal {
    pub fn as_str(&self) -> &'static str {
        match self {
            BudgetRenewal::Never => "never",
            BudgetRenewal::Daily => "daily",
            BudgetRenewal::Weekly => "weekly",
            BudgetRenewal::Monthly => "monthly",
            BudgetRenewal::Yearly => "yearly",
        }
    }
}

impl std::str::FromStr for BudgetRenewal {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "never" => Ok(BudgetRenewal::Never),
            "daily" => Ok(BudgetRenewal::Daily),
            "weekly" => Ok(BudgetRenewal::Weekly),
            "monthly" => Ok(BudgetRenewal::Monthly),
            "yearly" => Ok(BudgetRenewal::Yearly),
            other => Err(format!("unknown budget renewal: {other}")),
        }
    }
}

// ── App ──────────────────────────────────────────────────────────────────────

/// A connected client application.
///
/// `created_at` anchors the `never` budget window: an app with no renewal
/// cadence spends against everything since it was connected.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct App {
    pub id: u64,
    /// Client's x-only public key. At most one app per pubkey.
    pub nostr_pubkey: Pubkey,
    pub name: String,
    pub created_at: Timestamp,
}

// ── AppPermission ────────────────────────────────────────────────────────────

/// Authorization grant for one request method.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct AppPermission {
    pub app_id: u64,
    pub request_method: String,
    /// Spending cap in satoshis for payment methods. 0 means unlimited.
    pub max_amount: u64,
    pub budget_renewal: BudgetRenewal,
    /// Absolute expiry. None means the grant never expires.
    pub expires_at: Option<Timestamp>,
}

// ── RequestEvent ─────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RequestEventState {
    Received,
    Processed,
}

/// An inbound event accepted by the service. `nostr_id` is the dedup key.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RequestEvent {
    /// May be unknown at reception (sender not in the app registry).
    pub app_id: Option<u64>,
    pub nostr_id: EventId,
    /// Original ciphertext as received.
    pub content: String,
    pub state: RequestEventState,
    /// Set when the first response publish is confirmed.
    pub replied_at: Option<Timestamp>,
}

// ── ResponseEvent ────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResponseEventState {
    /// Persisted, not yet handed to the relay.
    Received,
    /// Relay acknowledged the publish.
    Confirmed,
    /// Relay rejected the publish.
    Failed,
    /// No acknowledgement within the timeout. The event may have propagated.
    Unconfirmed,
}

/// An outbound event emitted in reply to a request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ResponseEvent {
    pub app_id: Option<u64>,
    /// Nostr id of the request event this responds to.
    pub request_event_id: EventId,
    pub nostr_id: EventId,
    /// Ciphertext as published.
    pub content: String,
    pub state: ResponseEventState,
    pub replied_at: Option<Timestamp>,
}

// ── Payment ──────────────────────────────────────────────────────────────────

/// A completed-or-attempted Lightning payment.
///
/// Budget aggregation counts only rows with `preimage` set.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    pub id: u64,
    pub app_id: u64,
    pub request_event_id: EventId,
    /// Satoshis (wire msats / 1000, truncating).
    pub amount: u64,
    /// Presence means the payment succeeded.
    pub preimage: Option<String>,
    /// BOLT-11 string, when the payment was invoice-based.
    pub payment_request: Option<String>,
    pub created_at: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn budget_renewal_round_trip() {
        for s in ["never", "daily", "weekly", "monthly", "yearly"] {
            let r: BudgetRenewal = s.parse().unwrap();
            assert_eq!(r.as_str(), s);
        }
        assert!("hourly".parse::<BudgetRenewal>().is_err());
    }
}
