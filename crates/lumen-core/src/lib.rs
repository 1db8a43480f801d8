//! lumen-core — shared types for the Lumen wallet-connect service.
//!
//! Defines the data model (apps, permissions, request/response events,
//! payments), the relay event structure with its canonical serialization,
//! and the inner request/response payloads exchanged with client apps.

pub mod constants;
pub mod error;
pub mod event;
pub mod model;
pub mod payload;
pub mod types;

pub use error::LumenError;
pub use event::Event;
pub use types::{EventId, Pubkey, Timestamp};
