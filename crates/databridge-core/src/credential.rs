//! Credential custody — the `Credential` data model (spec §3) and its
//! vault-backed encrypt/decrypt lifecycle.
//!
//! A `Credential` never holds a plaintext password once constructed via
//! [`CredentialStore::store`] — only the [`CredentialBlob`] produced by the
//! [`Barrier`] (Vault, C1). The password is loaned out, decrypted, only
//! transiently to a [`crate::secure_wrapper::SecureConnector`] building a
//! live connection (spec §3 "Ownership").

use std::collections::HashSet;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};

use crate::barrier::Barrier;
use crate::error::CredentialError;

/// AES-GCM's authentication tag length in bytes.
const TAG_LEN: usize = 16;
/// AES-GCM's nonce length in bytes, matching [`crate::crypto`].
const NONCE_LEN: usize = 12;

/// The encrypted-password wire/storage format (spec §6 "Credential blob
/// format"). All byte fields are base64 in this representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialBlob {
    pub ciphertext: String,
    pub iv: String,
    pub tag: String,
    /// Per-credential salt used as the HKDF context
    /// ([`crate::crypto::EncryptionKey::derive`]) the encrypting subkey is
    /// derived from the vault's current key under, so a compromise of one
    /// credential's derived key does not help decrypt another. This plays
    /// the role spec §6 reserves for "PBKDF2 key derivation" — the vault's
    /// master key is already high-entropy, so HKDF context separation is
    /// substituted for a password-stretching KDF; see DESIGN.md.
    pub salt: String,
    pub algorithm: String,
    pub key_version: u32,
}

impl CredentialBlob {
    async fn seal(barrier: &Barrier, plaintext: &[u8]) -> Result<Self, CredentialError> {
        let salt = {
            use rand::RngCore;
            let mut buf = [0u8; 16];
            rand::thread_rng().fill_bytes(&mut buf);
            buf
        };
        let salt_hex = hex::encode(salt);

        let (version, combined) = barrier
            .encrypt_for_export_with_context(plaintext, &salt_hex)
            .await?;
        if combined.len() < NONCE_LEN + TAG_LEN {
            return Err(CredentialError::MalformedBlob {
                reason: "ciphertext shorter than nonce+tag".to_owned(),
            });
        }
        let (iv, rest) = combined.split_at(NONCE_LEN);
        let (ciphertext, tag) = rest.split_at(rest.len() - TAG_LEN);

        Ok(Self {
            ciphertext: BASE64.encode(ciphertext),
            iv: BASE64.encode(iv),
            tag: BASE64.encode(tag),
            salt: salt_hex,
            algorithm: "AES-256-GCM".to_owned(),
            key_version: version,
        })
    }

    async fn open(&self, barrier: &Barrier) -> Result<Vec<u8>, CredentialError> {
        let iv = BASE64
            .decode(&self.iv)
            .map_err(|e| CredentialError::MalformedBlob {
                reason: format!("invalid iv base64: {e}"),
            })?;
        let ciphertext =
            BASE64
                .decode(&self.ciphertext)
                .map_err(|e| CredentialError::MalformedBlob {
                    reason: format!("invalid ciphertext base64: {e}"),
                })?;
        let tag = BASE64
            .decode(&self.tag)
            .map_err(|e| CredentialError::MalformedBlob {
                reason: format!("invalid tag base64: {e}"),
            })?;

        let mut combined = Vec::with_capacity(iv.len() + ciphertext.len() + tag.len());
        combined.extend_from_slice(&iv);
        combined.extend_from_slice(&ciphertext);
        combined.extend_from_slice(&tag);

        Ok(barrier
            .decrypt_for_import_with_context(self.key_version, &self.salt, &combined)
            .await?)
    }
}

/// An encrypted credential record (spec §3 `Credential`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Credential {
    pub id: String,
    pub backend_type: String,
    pub endpoint: String,
    pub username: String,
    pub encrypted_password: CredentialBlob,
    pub tls: bool,
    pub tags: HashSet<String>,
    pub created_by: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

fn credential_path(id: &str) -> String {
    format!("sys/credentials/{id}")
}

/// Owns credential records; each is persisted (as metadata plus the
/// vault-encrypted password blob) through the [`Barrier`], and loaned out
/// decrypted only transiently.
pub struct CredentialStore {
    barrier: Arc<Barrier>,
}

impl CredentialStore {
    #[must_use]
    pub fn new(barrier: Arc<Barrier>) -> Self {
        Self { barrier }
    }

    /// Encrypt `password` and persist a new credential record.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Barrier`] if the vault is sealed or
    /// storage fails, or [`CredentialError::Crypto`] if encryption fails.
    pub async fn store(
        &self,
        id: impl Into<String>,
        backend_type: impl Into<String>,
        endpoint: impl Into<String>,
        username: impl Into<String>,
        password: &str,
        tls: bool,
        tags: HashSet<String>,
        created_by: impl Into<String>,
    ) -> Result<Credential, CredentialError> {
        let now = chrono::Utc::now();
        let encrypted_password = CredentialBlob::seal(&self.barrier, password.as_bytes()).await?;
        let credential = Credential {
            id: id.into(),
            backend_type: backend_type.into(),
            endpoint: endpoint.into(),
            username: username.into(),
            encrypted_password,
            tls,
            tags,
            created_by: created_by.into(),
            created_at: now,
            updated_at: now,
        };
        self.put(&credential).await?;
        Ok(credential)
    }

    /// Load a credential record (still encrypted) by id.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] if no record exists.
    pub async fn get(&self, id: &str) -> Result<Credential, CredentialError> {
        let bytes = self
            .barrier
            .get(&credential_path(id))
            .await?
            .ok_or_else(|| CredentialError::NotFound { id: id.to_owned() })?;
        serde_json::from_slice(&bytes).map_err(|e| CredentialError::MalformedBlob {
            reason: e.to_string(),
        })
    }

    /// Decrypt and return the plaintext password for `id`. The returned
    /// `String` must not be logged or persisted; callers hold it only long
    /// enough to open a backend connection.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::NotFound`] if no record exists, or
    /// [`CredentialError::Crypto`]/[`CredentialError::Barrier`] if
    /// decryption fails (including a retired key version).
    pub async fn resolve_password(&self, id: &str) -> Result<String, CredentialError> {
        let credential = self.get(id).await?;
        let plaintext = credential.encrypted_password.open(&self.barrier).await?;
        String::from_utf8(plaintext).map_err(|e| CredentialError::MalformedBlob {
            reason: format!("decrypted password is not valid UTF-8: {e}"),
        })
    }

    /// Re-encrypt `password` under the vault's current key version, bumping
    /// `updated_at`. Used after [`Barrier::rotate_key`] to migrate a
    /// credential forward, or on ordinary password rotation.
    ///
    /// # Errors
    ///
    /// Same as [`Self::store`].
    pub async fn rotate(&self, id: &str, password: &str) -> Result<Credential, CredentialError> {
        let mut credential = self.get(id).await?;
        credential.encrypted_password = CredentialBlob::seal(&self.barrier, password.as_bytes()).await?;
        credential.updated_at = chrono::Utc::now();
        self.put(&credential).await?;
        Ok(credential)
    }

    /// Delete a credential record.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Barrier`] if storage fails.
    pub async fn delete(&self, id: &str) -> Result<(), CredentialError> {
        self.barrier.delete(&credential_path(id)).await?;
        Ok(())
    }

    /// List all stored credential ids.
    ///
    /// # Errors
    ///
    /// Returns [`CredentialError::Barrier`] if storage fails.
    pub async fn list(&self) -> Result<Vec<String>, CredentialError> {
        let prefix = "sys/credentials/";
        let keys = self.barrier.list(prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix).map(String::from))
            .collect())
    }

    async fn put(&self, credential: &Credential) -> Result<(), CredentialError> {
        let bytes = serde_json::to_vec(credential).map_err(|e| CredentialError::MalformedBlob {
            reason: e.to_string(),
        })?;
        self.barrier.put(&credential_path(&credential.id), &bytes).await?;
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use databridge_storage::MemoryBackend;

    async fn make_store() -> CredentialStore {
        let storage = Arc::new(MemoryBackend::new());
        let barrier = Arc::new(Barrier::new(storage));
        barrier.unseal(crate::crypto::EncryptionKey::generate()).await;
        CredentialStore::new(barrier)
    }

    #[tokio::test]
    async fn store_then_resolve_round_trips_password() {
        let store = make_store().await;
        store
            .store(
                "db-1",
                "postgresql",
                "localhost:5432",
                "app",
                "s3cret",
                true,
                HashSet::new(),
                "admin",
            )
            .await
            .unwrap();

        let password = store.resolve_password("db-1").await.unwrap();
        assert_eq!(password, "s3cret");
    }

    #[tokio::test]
    async fn resolve_missing_credential_fails() {
        let store = make_store().await;
        let err = store.resolve_password("missing").await.unwrap_err();
        assert!(matches!(err, CredentialError::NotFound { .. }));
    }

    #[tokio::test]
    async fn rotate_replaces_password_and_updates_timestamp() {
        let store = make_store().await;
        let original = store
            .store(
                "db-2",
                "mysql",
                "localhost:3306",
                "app",
                "old-pw",
                false,
                HashSet::new(),
                "admin",
            )
            .await
            .unwrap();

        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        let rotated = store.rotate("db-2", "new-pw").await.unwrap();
        assert!(rotated.updated_at > original.updated_at);
        assert_eq!(store.resolve_password("db-2").await.unwrap(), "new-pw");
    }

    #[tokio::test]
    async fn list_returns_stored_ids() {
        let store = make_store().await;
        store
            .store("a", "postgresql", "h", "u", "p", true, HashSet::new(), "x")
            .await
            .unwrap();
        store
            .store("b", "mysql", "h", "u", "p", true, HashSet::new(), "x")
            .await
            .unwrap();

        let mut ids = store.list().await.unwrap();
        ids.sort();
        assert_eq!(ids, vec!["a".to_owned(), "b".to_owned()]);
    }
}
