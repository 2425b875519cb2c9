//! Cryptographic primitives backing the barrier, seal, and key recovery.
//!
//! All symmetric encryption is AES-256-GCM with a fresh random 96-bit nonce
//! per call, prepended to the ciphertext on output. HMAC-SHA256 is used for
//! audit-entry signing and for verifying recovered key material.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use hmac::{Hmac, Mac};
use sha2::Sha256;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::CryptoError;

type HmacSha256 = Hmac<Sha256>;

const NONCE_LEN: usize = 12;
const KEY_LEN: usize = 32;

/// A 256-bit symmetric key, zeroized on drop.
///
/// Used both as the barrier's root key and as the unseal/recovery key in
/// [`crate::seal`] and [`crate::recovery`].
#[derive(Clone, ZeroizeOnDrop)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    /// Generate a fresh random 256-bit key.
    #[must_use]
    pub fn generate() -> Self {
        let key = Aes256Gcm::generate_key(&mut OsRng);
        Self(key.into())
    }

    /// Construct a key from raw bytes (e.g. after Shamir reconstruction).
    #[must_use]
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    ///
    /// # Security
    ///
    /// Never log or persist the result in plaintext.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Derive a subkey for a named purpose via HKDF-SHA256.
    ///
    /// Used to separate the HMAC-signing key used for audit entries from the
    /// root encryption key, without requiring a second independently-stored
    /// secret.
    ///
    /// # Errors
    ///
    /// Returns [`CryptoError::KeyDerivation`] if HKDF's output-length check
    /// fails (it cannot for a 32-byte request, but the fallible API is kept
    /// so callers are not tempted to `unwrap`).
    pub fn derive(&self, context: &str) -> Result<Self, CryptoError> {
        let hk = hkdf::Hkdf::<Sha256>::new(None, &self.0);
        let mut out = [0u8; KEY_LEN];
        hk.expand(context.as_bytes(), &mut out)
            .map_err(|e| CryptoError::KeyDerivation {
                context: context.to_owned(),
                reason: e.to_string(),
            })?;
        Ok(Self(out))
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EncryptionKey").field(&"<redacted>").finish()
    }
}

impl Drop for EncryptionKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

/// Encrypt `plaintext` under `key`, returning `nonce || ciphertext || tag`.
///
/// # Errors
///
/// Returns [`CryptoError::Encryption`] if the underlying AEAD call fails.
pub fn encrypt(key: &EncryptionKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));

    let nonce = Aes256Gcm::generate_nonce(&mut OsRng);

    let ciphertext = cipher
        .encrypt(&nonce, plaintext)
        .map_err(|e| CryptoError::Encryption {
            reason: e.to_string(),
        })?;

    let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    out.extend_from_slice(nonce.as_slice());
    out.extend_from_slice(&ciphertext);
    Ok(out)
}

/// Decrypt a blob produced by [`encrypt`].
///
/// # Errors
///
/// - [`CryptoError::CiphertextTooShort`] if the blob is shorter than a nonce.
/// - [`CryptoError::Decryption`] if the key is wrong or the blob was tampered
///   with (the GCM tag fails to verify).
pub fn decrypt(key: &EncryptionKey, blob: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if blob.len() < NONCE_LEN {
        return Err(CryptoError::CiphertextTooShort {
            expected: NONCE_LEN,
            actual: blob.len(),
        });
    }

    let (nonce_bytes, ciphertext) = blob.split_at(NONCE_LEN);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes()));
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|e| CryptoError::Decryption {
            reason: e.to_string(),
        })
}

/// Compute an HMAC-SHA256 signature over `text` under `key`.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] only if `key` cannot seed the HMAC
/// (never happens for a fixed 32-byte key; kept fallible to mirror the
/// upstream API and avoid an `unwrap`).
pub fn hmac(key: &EncryptionKey, text: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| CryptoError::KeyDerivation {
            context: "hmac".to_owned(),
            reason: e.to_string(),
        })?;
    mac.update(text);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Verify an HMAC-SHA256 signature produced by [`hmac`].
///
/// Uses constant-time comparison internally (via the `hmac` crate's
/// `verify_slice`) to avoid timing side channels on signature comparison.
///
/// # Errors
///
/// Returns [`CryptoError::KeyDerivation`] under the same (practically
/// unreachable) condition as [`hmac`].
pub fn verify_hmac(key: &EncryptionKey, text: &[u8], signature: &[u8]) -> Result<bool, CryptoError> {
    let mut mac =
        HmacSha256::new_from_slice(key.as_bytes()).map_err(|e| CryptoError::KeyDerivation {
            context: "hmac".to_owned(),
            reason: e.to_string(),
        })?;
    mac.update(text);
    Ok(mac.verify_slice(signature).is_ok())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn encrypt_decrypt_round_trips() {
        let key = EncryptionKey::generate();
        let plaintext = b"the quick brown fox";
        let ciphertext = encrypt(&key, plaintext).unwrap();
        assert_ne!(ciphertext, plaintext);
        let recovered = decrypt(&key, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn decrypt_with_wrong_key_fails() {
        let key1 = EncryptionKey::generate();
        let key2 = EncryptionKey::generate();
        let ciphertext = encrypt(&key1, b"secret").unwrap();
        assert!(decrypt(&key2, &ciphertext).is_err());
    }

    #[test]
    fn decrypt_tampered_ciphertext_fails() {
        let key = EncryptionKey::generate();
        let mut ciphertext = encrypt(&key, b"secret").unwrap();
        let last = ciphertext.len() - 1;
        ciphertext[last] ^= 0xFF;
        assert!(decrypt(&key, &ciphertext).is_err());
    }

    #[test]
    fn decrypt_short_blob_fails() {
        let key = EncryptionKey::generate();
        let err = decrypt(&key, b"short").unwrap_err();
        assert!(matches!(err, CryptoError::CiphertextTooShort { .. }));
    }

    #[test]
    fn two_encryptions_of_same_plaintext_differ() {
        let key = EncryptionKey::generate();
        let a = encrypt(&key, b"same input").unwrap();
        let b = encrypt(&key, b"same input").unwrap();
        assert_ne!(a, b, "nonces must differ between calls");
    }

    #[test]
    fn hmac_round_trips() {
        let key = EncryptionKey::generate();
        let sig = hmac(&key, b"audit entry hash").unwrap();
        assert!(verify_hmac(&key, b"audit entry hash", &sig).unwrap());
    }

    #[test]
    fn hmac_rejects_tampered_text() {
        let key = EncryptionKey::generate();
        let sig = hmac(&key, b"original").unwrap();
        assert!(!verify_hmac(&key, b"tampered", &sig).unwrap());
    }

    #[test]
    fn derive_is_deterministic_and_context_scoped() {
        let key = EncryptionKey::generate();
        let a = key.derive("audit-hmac").unwrap();
        let b = key.derive("audit-hmac").unwrap();
        let c = key.derive("other-context").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
    }
}
