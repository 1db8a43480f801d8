use thiserror::Error;

#[derive(Debug, Error)]
pub enum LumenError {
    // ── Protocol errors ──────────────────────────────────────────────────────
    #[error("invalid event signature")]
    InvalidSignature,

    #[error("duplicate event: {0}")]
    DuplicateEvent(String),

    #[error("unknown app: {0}")]
    UnknownApp(String),

    #[error("undecryptable content: {0}")]
    Envelope(String),

    #[error("bad request payload: {0}")]
    BadPayload(String),

    #[error("malformed key or id: {0}")]
    Encoding(String),

    // ── Serialization / storage ──────────────────────────────────────────────
    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("store layout version {found} is newer than supported {supported}")]
    LayoutVersion { found: u64, supported: u64 },

    // ── Transport ────────────────────────────────────────────────────────────
    #[error("relay error: {0}")]
    Relay(String),

    // ── General ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}
