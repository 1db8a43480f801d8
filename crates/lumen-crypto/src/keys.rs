use once_cell::sync::Lazy;
use secp256k1::{All, Keypair, Secp256k1, SecretKey, XOnlyPublicKey};

use lumen_core::Pubkey;

use crate::CryptoError;

/// Process-wide secp256k1 context. Verification-capable contexts are
/// expensive to build, so all crypto in the crate shares this one.
pub static SECP: Lazy<Secp256k1<All>> = Lazy::new(Secp256k1::new);

/// The service identity: one secp256k1 keypair, immutable after init.
///
/// The x-only public key is the address client apps tag their requests with.
#[derive(Clone)]
pub struct ServiceKeys {
    secret: SecretKey,
    keypair: Keypair,
    public: XOnlyPublicKey,
}

impl ServiceKeys {
    /// Generate a fresh identity keypair.
    pub fn generate() -> Self {
        let secret = SecretKey::new(&mut rand::thread_rng());
        Self::from_secret(secret)
    }

    /// Restore an identity from a 32-byte hex secret key.
    pub fn from_secret_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s.trim()).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        let secret =
            SecretKey::from_slice(&bytes).map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
        Ok(Self::from_secret(secret))
    }

    fn from_secret(secret: SecretKey) -> Self {
        let keypair = Keypair::from_secret_key(&SECP, &secret);
        let (public, _parity) = XOnlyPublicKey::from_keypair(&keypair);
        Self {
            secret,
            keypair,
            public,
        }
    }

    pub fn secret_key(&self) -> &SecretKey {
        &self.secret
    }

    pub fn keypair(&self) -> &Keypair {
        &self.keypair
    }

    pub fn public_key(&self) -> &XOnlyPublicKey {
        &self.public
    }

    /// The identity as the wire-level 32-byte pubkey.
    pub fn pubkey(&self) -> Pubkey {
        Pubkey::from_bytes(self.public.serialize())
    }

    /// Hex secret for key-file persistence.
    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.secret_bytes())
    }
}

impl std::fmt::Debug for ServiceKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ServiceKeys {{ public: {} }}", self.pubkey())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_hex_round_trip() {
        let keys = ServiceKeys::generate();
        let restored = ServiceKeys::from_secret_hex(&keys.secret_hex()).unwrap();
        assert_eq!(restored.pubkey(), keys.pubkey());
    }

    #[test]
    fn rejects_bad_secret_hex() {
        assert!(ServiceKeys::from_secret_hex("not-hex").is_err());
        assert!(ServiceKeys::from_secret_hex("0000").is_err());
    }
}
