//! Encryption barrier for `DataBridge` — the Vault (C1).
//!
//! The barrier is the most critical architectural invariant: every byte that
//! touches the storage backend passes through the barrier's encrypt/decrypt.
//! The storage layer only ever sees ciphertext.
//!
//! When the vault is sealed, the barrier rejects all operations with
//! [`BarrierError::Sealed`].
//!
//! # Security model
//!
//! - The root key lives only in process memory, never on disk in plaintext.
//! - All values are encrypted with AES-256-GCM (fresh nonce per write).
//! - Keys (storage paths) are stored in plaintext to support prefix listing.
//! - Sealing zeroizes all retained key versions from memory immediately.
//! - A bounded number of prior key versions are retained in memory after
//!   [`Barrier::rotate_key`] so data encrypted under them remains readable;
//!   versions older than the retention window are zeroized and dropped.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use databridge_storage::StorageBackend;
use tokio::sync::RwLock;
use tracing::info;

use crate::crypto::{self, EncryptionKey};
use crate::error::{BarrierError, CryptoError};

/// Number of prior key versions retained after rotation, beyond the current one.
const MAX_RETAINED_KEY_VERSIONS: usize = 3;

/// The set of key versions known to the barrier: one current version used
/// for all new writes, plus a bounded number of retired versions retained so
/// previously-written ciphertext stays decryptable.
struct KeyRing {
    current_version: u32,
    /// Keyed by version; the oldest entries are evicted (and zeroized via
    /// `Drop`) once the ring exceeds [`MAX_RETAINED_KEY_VERSIONS`] retired
    /// versions.
    versions: BTreeMap<u32, EncryptionKey>,
}

impl KeyRing {
    fn fresh(key: EncryptionKey) -> Self {
        let mut versions = BTreeMap::new();
        versions.insert(1, key);
        Self {
            current_version: 1,
            versions,
        }
    }

    fn current(&self) -> &EncryptionKey {
        // current_version always has a corresponding entry by construction.
        #[allow(clippy::expect_used)]
        self.versions
            .get(&self.current_version)
            .expect("current key version must exist in the ring")
    }

    fn rotate_in(&mut self, key: EncryptionKey) -> u32 {
        let new_version = self.current_version + 1;
        self.versions.insert(new_version, key);
        self.current_version = new_version;

        while self.versions.len() > MAX_RETAINED_KEY_VERSIONS + 1 {
            if let Some((&oldest, _)) = self.versions.iter().next() {
                self.versions.remove(&oldest);
            }
        }
        new_version
    }
}

/// The encryption barrier wrapping a storage backend.
///
/// All reads decrypt, all writes encrypt. When sealed, all operations return
/// [`BarrierError::Sealed`].
pub struct Barrier {
    storage: Arc<dyn StorageBackend>,
    keys: RwLock<Option<KeyRing>>,
}

impl Barrier {
    /// Create a new sealed barrier wrapping the given storage backend.
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>) -> Self {
        Self {
            storage,
            keys: RwLock::new(None),
        }
    }

    /// Unseal the barrier by providing the root encryption key as version 1.
    ///
    /// After this call, all read/write operations will succeed (assuming the
    /// underlying storage is healthy).
    pub async fn unseal(&self, key: EncryptionKey) {
        let mut guard = self.keys.write().await;
        *guard = Some(KeyRing::fresh(key));
    }

    /// Seal the barrier, zeroizing every retained key version from memory.
    ///
    /// After this call, all operations return [`BarrierError::Sealed`].
    pub async fn seal(&self) {
        let mut guard = self.keys.write().await;
        *guard = None;
    }

    /// Check whether the barrier is currently unsealed.
    pub async fn is_unsealed(&self) -> bool {
        self.keys.read().await.is_some()
    }

    /// Mint a new key version and make it current for subsequent writes.
    ///
    /// Data written under prior versions remains readable as long as that
    /// version is still within the retention window (see
    /// [`MAX_RETAINED_KEY_VERSIONS`]). The rotation itself is expected to be
    /// audited by the caller (the barrier has no audit dependency of its
    /// own, to avoid a cyclic reference between Vault and Audit Trail).
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Sealed`] if the vault is sealed.
    pub async fn rotate_key(&self) -> Result<u32, BarrierError> {
        let mut guard = self.keys.write().await;
        let ring = guard.as_mut().ok_or(BarrierError::Sealed)?;
        let new_version = ring.rotate_in(EncryptionKey::generate());
        info!(version = new_version, "vault key rotated");
        Ok(new_version)
    }

    /// Read a value from storage, decrypting it through the barrier.
    ///
    /// Returns `Ok(None)` if the key does not exist in storage.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Crypto`] if decryption fails.
    /// - [`BarrierError::KeyVersionUnavailable`] if the stored version has
    ///   been retired beyond the retention window.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        let encrypted = self.storage.get(key).await?;
        match encrypted {
            None => {
                // Still require unsealed state even on a miss, so callers
                // can't distinguish "sealed" from "absent" by timing alone.
                self.ensure_unsealed().await?;
                Ok(None)
            }
            Some(versioned) => {
                let plaintext = self.decrypt_versioned(&versioned).await?;
                Ok(Some(plaintext))
            }
        }
    }

    /// Write a value to storage, encrypting it through the barrier under the
    /// current key version.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Crypto`] if encryption fails.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn put(&self, key: &str, value: &[u8]) -> Result<(), BarrierError> {
        let versioned = self.encrypt_versioned(value).await?;
        self.storage.put(key, &versioned).await?;
        Ok(())
    }

    /// Delete a key from storage.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn delete(&self, key: &str) -> Result<(), BarrierError> {
        self.ensure_unsealed().await?;
        self.storage.delete(key).await?;
        Ok(())
    }

    /// List keys with the given prefix.
    ///
    /// Keys (paths) are not encrypted — only values are. This allows prefix
    /// listing to work without a separate index.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn list(&self, prefix: &str) -> Result<Vec<String>, BarrierError> {
        self.ensure_unsealed().await?;
        let keys = self.storage.list(prefix).await?;
        Ok(keys)
    }

    /// Check whether a key exists in storage.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Storage`] if the storage backend fails.
    pub async fn exists(&self, key: &str) -> Result<bool, BarrierError> {
        self.ensure_unsealed().await?;
        let exists = self.storage.exists(key).await?;
        Ok(exists)
    }

    /// Compute an HMAC-SHA256 signature over `text` under the current key
    /// version, using a key derived for the `"audit-hmac"` context so the
    /// signing key is distinct from the raw encryption key.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Crypto`] if key derivation or signing fails.
    pub async fn hmac(&self, text: &[u8]) -> Result<Vec<u8>, BarrierError> {
        let guard = self.keys.read().await;
        let ring = guard.as_ref().ok_or(BarrierError::Sealed)?;
        let signing_key = ring.current().derive("audit-hmac")?;
        Ok(crypto::hmac(&signing_key, text)?)
    }

    /// Verify an HMAC-SHA256 signature produced by [`Barrier::hmac`].
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Crypto`] if key derivation fails.
    pub async fn verify_hmac(&self, text: &[u8], signature: &[u8]) -> Result<bool, BarrierError> {
        let guard = self.keys.read().await;
        let ring = guard.as_ref().ok_or(BarrierError::Sealed)?;
        let signing_key = ring.current().derive("audit-hmac")?;
        Ok(crypto::verify_hmac(&signing_key, text, signature)?)
    }

    /// Write raw bytes to storage WITHOUT encryption.
    ///
    /// Used for storing the encrypted root key during initialization and
    /// for backup/restore operations (which transfer ciphertext as-is).
    ///
    /// # Security
    ///
    /// Do NOT use this for normal secret storage. All application data must
    /// go through [`put`](Barrier::put) which encrypts before writing.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the storage backend fails.
    pub async fn put_raw(&self, key: &str, value: &[u8]) -> Result<(), BarrierError> {
        self.storage.put(key, value).await?;
        Ok(())
    }

    /// Read raw bytes from storage WITHOUT decryption.
    ///
    /// Used for reading the encrypted root key during unseal and for
    /// backup/restore operations (which transfer ciphertext as-is).
    ///
    /// # Security
    ///
    /// Do NOT use this for normal secret reads. All application data must
    /// go through [`get`](Barrier::get) which decrypts after reading.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Storage`] if the storage backend fails.
    pub async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>, BarrierError> {
        let val = self.storage.get(key).await?;
        Ok(val)
    }

    /// The key version currently used for new writes.
    ///
    /// # Errors
    ///
    /// Returns [`BarrierError::Sealed`] if the vault is sealed.
    pub async fn current_key_version(&self) -> Result<u32, BarrierError> {
        let guard = self.keys.read().await;
        let ring = guard.as_ref().ok_or(BarrierError::Sealed)?;
        Ok(ring.current_version)
    }

    /// Encrypt `plaintext` under the current key version and return the
    /// version alongside `nonce || ciphertext || tag`, rather than the
    /// version-prefixed single blob [`Self::put`] writes to storage.
    ///
    /// Used by callers (e.g. [`crate::credential`]) that need to expose the
    /// Vault's encryption in a field-separated wire format (spec §6's
    /// credential blob: ciphertext, iv, tag, salt, algorithm, key-version)
    /// rather than storing through the opaque KV path.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Crypto`] if encryption fails.
    pub async fn encrypt_for_export(&self, plaintext: &[u8]) -> Result<(u32, Vec<u8>), BarrierError> {
        let guard = self.keys.read().await;
        let ring = guard.as_ref().ok_or(BarrierError::Sealed)?;
        let ciphertext = crypto::encrypt(ring.current(), plaintext)?;
        Ok((ring.current_version, ciphertext))
    }

    /// Decrypt a `(version, nonce || ciphertext || tag)` pair produced by
    /// [`Self::encrypt_for_export`].
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::KeyVersionUnavailable`] if `version` has been
    ///   retired beyond the retention window.
    /// - [`BarrierError::Crypto`] if decryption fails.
    pub async fn decrypt_for_import(&self, version: u32, blob: &[u8]) -> Result<Vec<u8>, BarrierError> {
        let guard = self.keys.read().await;
        let ring = guard.as_ref().ok_or(BarrierError::Sealed)?;
        let key = ring
            .versions
            .get(&version)
            .ok_or(BarrierError::KeyVersionUnavailable { version })?;
        Ok(crypto::decrypt(key, blob)?)
    }

    /// Like [`Self::encrypt_for_export`], but encrypts under a subkey
    /// derived from the current key via [`crypto::EncryptionKey::derive`]
    /// using `context` — so a compromise of one derived subkey does not
    /// help decrypt data derived under a different context.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::Crypto`] if key derivation or encryption fails.
    pub async fn encrypt_for_export_with_context(
        &self,
        plaintext: &[u8],
        context: &str,
    ) -> Result<(u32, Vec<u8>), BarrierError> {
        let guard = self.keys.read().await;
        let ring = guard.as_ref().ok_or(BarrierError::Sealed)?;
        let subkey = ring.current().derive(context)?;
        let ciphertext = crypto::encrypt(&subkey, plaintext)?;
        Ok((ring.current_version, ciphertext))
    }

    /// Decrypt a `(version, nonce || ciphertext || tag)` pair produced by
    /// [`Self::encrypt_for_export_with_context`]. `context` must match the
    /// value used to encrypt.
    ///
    /// # Errors
    ///
    /// - [`BarrierError::Sealed`] if the vault is sealed.
    /// - [`BarrierError::KeyVersionUnavailable`] if `version` has been
    ///   retired beyond the retention window.
    /// - [`BarrierError::Crypto`] if key derivation or decryption fails.
    pub async fn decrypt_for_import_with_context(
        &self,
        version: u32,
        context: &str,
        blob: &[u8],
    ) -> Result<Vec<u8>, BarrierError> {
        let guard = self.keys.read().await;
        let ring = guard.as_ref().ok_or(BarrierError::Sealed)?;
        let key = ring
            .versions
            .get(&version)
            .ok_or(BarrierError::KeyVersionUnavailable { version })?;
        let subkey = key.derive(context)?;
        Ok(crypto::decrypt(&subkey, blob)?)
    }

    async fn ensure_unsealed(&self) -> Result<(), BarrierError> {
        if self.is_unsealed().await {
            Ok(())
        } else {
            Err(BarrierError::Sealed)
        }
    }

    /// Encrypt `value` under the current key version, prefixing the
    /// ciphertext with a 4-byte big-endian version tag so [`Self::get`] can
    /// select the matching key on read, even across a rotation.
    async fn encrypt_versioned(&self, value: &[u8]) -> Result<Vec<u8>, BarrierError> {
        let guard = self.keys.read().await;
        let ring = guard.as_ref().ok_or(BarrierError::Sealed)?;
        let ciphertext = crypto::encrypt(ring.current(), value)?;

        let mut out = Vec::with_capacity(4 + ciphertext.len());
        out.extend_from_slice(&ring.current_version.to_be_bytes());
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    async fn decrypt_versioned(&self, versioned: &[u8]) -> Result<Vec<u8>, BarrierError> {
        if versioned.len() < 4 {
            return Err(BarrierError::Crypto(CryptoError::CiphertextTooShort {
                expected: 4,
                actual: versioned.len(),
            }));
        }
        let (version_bytes, ciphertext) = versioned.split_at(4);
        #[allow(clippy::unwrap_used)]
        let version = u32::from_be_bytes(version_bytes.try_into().unwrap());

        let guard = self.keys.read().await;
        let ring = guard.as_ref().ok_or(BarrierError::Sealed)?;
        let key = ring
            .versions
            .get(&version)
            .ok_or(BarrierError::KeyVersionUnavailable { version })?;
        Ok(crypto::decrypt(key, ciphertext)?)
    }
}

impl fmt::Debug for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Barrier")
            .field("sealed", &"<check with is_unsealed()>")
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use databridge_storage::MemoryBackend;

    fn make_barrier() -> Barrier {
        let storage = Arc::new(MemoryBackend::new());
        Barrier::new(storage)
    }

    #[tokio::test]
    async fn sealed_barrier_rejects_get() {
        let barrier = make_barrier();
        let result = barrier.get("key").await;
        assert!(matches!(result, Err(BarrierError::Sealed)));
    }

    #[tokio::test]
    async fn sealed_barrier_rejects_put() {
        let barrier = make_barrier();
        let result = barrier.put("key", b"value").await;
        assert!(matches!(result, Err(BarrierError::Sealed)));
    }

    #[tokio::test]
    async fn sealed_barrier_rejects_delete() {
        let barrier = make_barrier();
        let result = barrier.delete("key").await;
        assert!(matches!(result, Err(BarrierError::Sealed)));
    }

    #[tokio::test]
    async fn sealed_barrier_rejects_list() {
        let barrier = make_barrier();
        let result = barrier.list("prefix/").await;
        assert!(matches!(result, Err(BarrierError::Sealed)));
    }

    #[tokio::test]
    async fn sealed_barrier_rejects_exists() {
        let barrier = make_barrier();
        let result = barrier.exists("key").await;
        assert!(matches!(result, Err(BarrierError::Sealed)));
    }

    #[tokio::test]
    async fn unseal_then_put_get_roundtrip() {
        let barrier = make_barrier();
        let key = EncryptionKey::generate();
        barrier.unseal(key).await;

        barrier.put("sys/test", b"hello world").await.unwrap();
        let val = barrier.get("sys/test").await.unwrap();
        assert_eq!(val, Some(b"hello world".to_vec()));
    }

    #[tokio::test]
    async fn get_nonexistent_returns_none() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;

        let val = barrier.get("does/not/exist").await.unwrap();
        assert_eq!(val, None);
    }

    #[tokio::test]
    async fn delete_removes_key() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;

        barrier.put("key", b"val").await.unwrap();
        barrier.delete("key").await.unwrap();
        let val = barrier.get("key").await.unwrap();
        assert_eq!(val, None);
    }

    #[tokio::test]
    async fn list_returns_matching_keys() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;

        barrier.put("kv/data/a", b"1").await.unwrap();
        barrier.put("kv/data/b", b"2").await.unwrap();
        barrier.put("sys/config", b"3").await.unwrap();

        let keys = barrier.list("kv/data/").await.unwrap();
        assert_eq!(keys, vec!["kv/data/a", "kv/data/b"]);
    }

    #[tokio::test]
    async fn exists_works() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;

        assert!(!barrier.exists("key").await.unwrap());
        barrier.put("key", b"val").await.unwrap();
        assert!(barrier.exists("key").await.unwrap());
    }

    #[tokio::test]
    async fn seal_zeroizes_and_rejects() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;

        barrier.put("key", b"val").await.unwrap();
        barrier.seal().await;

        let result = barrier.get("key").await;
        assert!(matches!(result, Err(BarrierError::Sealed)));
    }

    #[tokio::test]
    async fn reseal_and_unseal_with_same_key_reads_data() {
        let storage = Arc::new(MemoryBackend::new());
        let barrier = Barrier::new(Arc::clone(&storage) as Arc<dyn StorageBackend>);
        let key = EncryptionKey::generate();

        barrier.unseal(key.clone()).await;
        barrier.put("key", b"persistent").await.unwrap();
        barrier.seal().await;

        // Re-unseal with the same key — data should still be readable.
        barrier.unseal(key).await;
        let val = barrier.get("key").await.unwrap();
        assert_eq!(val, Some(b"persistent".to_vec()));
    }

    #[tokio::test]
    async fn different_key_cannot_decrypt() {
        let storage = Arc::new(MemoryBackend::new());
        let barrier = Barrier::new(Arc::clone(&storage) as Arc<dyn StorageBackend>);

        let key1 = EncryptionKey::generate();
        barrier.unseal(key1).await;
        barrier.put("key", b"secret").await.unwrap();
        barrier.seal().await;

        // Unseal with a different key — same version number (1), but wrong
        // key material, so the AEAD tag fails to verify.
        let key2 = EncryptionKey::generate();
        barrier.unseal(key2).await;
        let result = barrier.get("key").await;
        assert!(matches!(result, Err(BarrierError::Crypto(_))));
    }

    #[tokio::test]
    async fn put_raw_and_get_raw_bypass_encryption() {
        let barrier = make_barrier();
        let raw_data = b"already-encrypted-root-key";

        barrier.put_raw("sys/root_key", raw_data).await.unwrap();
        let val = barrier.get_raw("sys/root_key").await.unwrap();
        assert_eq!(val, Some(raw_data.to_vec()));
    }

    #[tokio::test]
    async fn is_unsealed_reflects_state() {
        let barrier = make_barrier();
        assert!(!barrier.is_unsealed().await);

        barrier.unseal(EncryptionKey::generate()).await;
        assert!(barrier.is_unsealed().await);

        barrier.seal().await;
        assert!(!barrier.is_unsealed().await);
    }

    #[tokio::test]
    async fn rotate_key_allows_reading_old_and_new_versions() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;

        barrier.put("a", b"written-before-rotation").await.unwrap();
        barrier.rotate_key().await.unwrap();
        barrier.put("b", b"written-after-rotation").await.unwrap();

        assert_eq!(
            barrier.get("a").await.unwrap(),
            Some(b"written-before-rotation".to_vec())
        );
        assert_eq!(
            barrier.get("b").await.unwrap(),
            Some(b"written-after-rotation".to_vec())
        );
    }

    #[tokio::test]
    async fn rotate_key_beyond_retention_window_loses_oldest_version() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;
        barrier.put("v1", b"version one").await.unwrap();

        // Rotate past the retention window (current + 3 retained = 4 total).
        for _ in 0..MAX_RETAINED_KEY_VERSIONS + 1 {
            barrier.rotate_key().await.unwrap();
        }

        let result = barrier.get("v1").await;
        assert!(matches!(
            result,
            Err(BarrierError::KeyVersionUnavailable { version: 1 })
        ));
    }

    #[tokio::test]
    async fn rotate_key_while_sealed_fails() {
        let barrier = make_barrier();
        let result = barrier.rotate_key().await;
        assert!(matches!(result, Err(BarrierError::Sealed)));
    }

    #[tokio::test]
    async fn hmac_round_trips_through_barrier() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;

        let sig = barrier.hmac(b"audit hash").await.unwrap();
        assert!(barrier.verify_hmac(b"audit hash", &sig).await.unwrap());
        assert!(!barrier.verify_hmac(b"tampered", &sig).await.unwrap());
    }

    #[tokio::test]
    async fn hmac_sealed_fails() {
        let barrier = make_barrier();
        let result = barrier.hmac(b"text").await;
        assert!(matches!(result, Err(BarrierError::Sealed)));
    }

    #[tokio::test]
    async fn export_with_context_round_trips_under_matching_context() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;

        let (version, blob) = barrier
            .encrypt_for_export_with_context(b"s3cret", "cred-abc")
            .await
            .unwrap();
        let plaintext = barrier
            .decrypt_for_import_with_context(version, "cred-abc", &blob)
            .await
            .unwrap();
        assert_eq!(plaintext, b"s3cret");
    }

    #[tokio::test]
    async fn export_with_context_rejects_mismatched_context() {
        let barrier = make_barrier();
        barrier.unseal(EncryptionKey::generate()).await;

        let (version, blob) = barrier
            .encrypt_for_export_with_context(b"s3cret", "cred-abc")
            .await
            .unwrap();
        let result = barrier.decrypt_for_import_with_context(version, "cred-xyz", &blob).await;
        assert!(matches!(result, Err(BarrierError::Crypto(_))));
    }
}
