//! Pairwise symmetric envelope: ECDH shared secret + AES-256-CBC.
//!
//! Wire format of encrypted content: `base64(ciphertext) "?iv=" base64(iv)`.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use secp256k1::{ecdh, Parity, PublicKey, SecretKey, XOnlyPublicKey};

use lumen_core::Pubkey;

use crate::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// Derive the pairwise AES-256 key: the raw `x` coordinate of the ECDH
/// shared point between `peer` and `own_secret`.
///
/// The x-only peer key is lifted with even parity; the x coordinate of the
/// shared point is invariant under point negation, so both sides derive the
/// same key regardless of the actual parities.
pub fn shared_secret(peer: &Pubkey, own_secret: &SecretKey) -> Result<[u8; 32], CryptoError> {
    let xonly = XOnlyPublicKey::from_slice(peer.as_bytes())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let point = PublicKey::from_x_only_public_key(xonly, Parity::Even);
    // 64 bytes: x || y. The key is the unhashed x coordinate.
    let xy = ecdh::shared_secret_point(&point, own_secret);
    let mut key = [0u8; 32];
    key.copy_from_slice(&xy[..32]);
    Ok(key)
}

/// Encrypt `plaintext` under `key` with a random 16-byte IV.
pub fn encrypt(plaintext: &str, key: &[u8; 32]) -> String {
    let mut iv = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut iv);
    let ciphertext = Aes256CbcEnc::new(key.into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
    format!("{}?iv={}", BASE64.encode(ciphertext), BASE64.encode(iv))
}

/// Decrypt wire-format content under `key`.
///
/// Any failure (missing separator, bad base64, wrong IV length, bad padding,
/// non-UTF-8 plaintext) is non-fatal: the caller drops the event.
pub fn decrypt(content: &str, key: &[u8; 32]) -> Result<String, CryptoError> {
    let (ct_b64, iv_b64) = content
        .split_once("?iv=")
        .ok_or_else(|| CryptoError::Malformed("missing ?iv= separator".into()))?;
    let ciphertext = BASE64
        .decode(ct_b64)
        .map_err(|e| CryptoError::Malformed(format!("ciphertext base64: {e}")))?;
    let iv_bytes = BASE64
        .decode(iv_b64)
        .map_err(|e| CryptoError::Malformed(format!("iv base64: {e}")))?;
    let iv: [u8; 16] = iv_bytes
        .try_into()
        .map_err(|_| CryptoError::Malformed("iv is not 16 bytes".into()))?;

    let plaintext = Aes256CbcDec::new(key.into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(&ciphertext)
        .map_err(|_| CryptoError::Decrypt)?;
    String::from_utf8(plaintext).map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ServiceKeys;

    #[test]
    fn round_trip_all_lengths() {
        let key = [7u8; 32];
        // Cover the padding edge cases around the 16-byte block boundary.
        for len in [0usize, 1, 15, 16, 17, 31, 32, 1000] {
            let plaintext = "x".repeat(len);
            let wire = encrypt(&plaintext, &key);
            assert_eq!(decrypt(&wire, &key).unwrap(), plaintext);
        }
    }

    #[test]
    fn wrong_key_fails() {
        let wire = encrypt("secret payload", &[1u8; 32]);
        assert!(decrypt(&wire, &[2u8; 32]).is_err());
    }

    #[test]
    fn malformed_content_fails() {
        let key = [0u8; 32];
        assert!(decrypt("no separator here", &key).is_err());
        assert!(decrypt("!!!?iv=!!!", &key).is_err());
        assert!(decrypt("YWJj?iv=YWJj", &key).is_err()); // iv not 16 bytes
    }

    #[test]
    fn ecdh_is_symmetric() {
        let a = ServiceKeys::generate();
        let b = ServiceKeys::generate();
        let k_ab = shared_secret(&b.pubkey(), a.secret_key()).unwrap();
        let k_ba = shared_secret(&a.pubkey(), b.secret_key()).unwrap();
        assert_eq!(k_ab, k_ba);
    }

    #[test]
    fn peer_to_peer_round_trip() {
        let a = ServiceKeys::generate();
        let b = ServiceKeys::generate();
        let key = shared_secret(&b.pubkey(), a.secret_key()).unwrap();
        let wire = encrypt(r#"{"method":"get_info"}"#, &key);
        let key_b = shared_secret(&a.pubkey(), b.secret_key()).unwrap();
        assert_eq!(decrypt(&wire, &key_b).unwrap(), r#"{"method":"get_info"}"#);
    }
}
