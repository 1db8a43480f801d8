//! lumen-crypto — the cryptographic envelope.
//!
//! Service identity keys (secp256k1), pairwise ECDH shared secrets used as
//! AES-256-CBC keys, and event id computation / Schnorr signing / verification.

pub mod envelope;
pub mod keys;
pub mod sign;

pub use envelope::{decrypt, encrypt, shared_secret};
pub use keys::ServiceKeys;
pub use sign::{event_id, sign_event, verify_event};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("invalid key: {0}")]
    InvalidKey(String),

    #[error("malformed ciphertext: {0}")]
    Malformed(String),

    #[error("decryption failed")]
    Decrypt,

    #[error("invalid signature: {0}")]
    Signature(String),
}

impl From<CryptoError> for lumen_core::LumenError {
    fn from(e: CryptoError) -> Self {
        lumen_core::LumenError::Envelope(e.to_string())
    }
}
