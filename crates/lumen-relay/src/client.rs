use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};

use lumen_core::Event;

use crate::{Filter, RelayError};

/// Outcome of publishing one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PublishOutcome {
    /// Relay acknowledged the event.
    Succeeded,
    /// Relay rejected the event, or the write itself failed.
    Failed(String),
    /// No acknowledgement within the timeout; the event may have propagated.
    Unconfirmed,
}

/// A live subscription. Events arrive on `events` after the relay replays
/// stored history; `eose` fires once when the replay is complete. When the
/// connection dies the events channel closes and `error` carries the reason.
pub struct Subscription {
    pub events: mpsc::Receiver<Event>,
    pub eose: oneshot::Receiver<()>,
    pub error: watch::Receiver<Option<String>>,
}

/// The transport seam the service is written against. Implementations must
/// make `publish` safe to call concurrently.
#[async_trait]
pub trait RelayClient: Send + Sync {
    async fn subscribe(&self, filter: Filter) -> Result<Subscription, RelayError>;

    async fn publish(&self, event: Event) -> PublishOutcome;
}
