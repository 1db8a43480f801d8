//! lumen-relay — relay transport.
//!
//! Wire frames, subscription filters, the [`RelayClient`] seam the service
//! is written against, and the websocket implementation.

mod client;
mod filter;
mod message;
mod ws;

pub use client::{PublishOutcome, RelayClient, Subscription};
pub use filter::Filter;
pub use message::{ClientMessage, RelayMessage};
pub use ws::{RelaySocket, WsRelay};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum RelayError {
    #[error("relay connect failed: {0}")]
    Connect(String),

    #[error("relay connection closed: {0}")]
    Closed(String),

    #[error("relay protocol error: {0}")]
    Protocol(String),
}
