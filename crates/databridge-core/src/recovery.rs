//! Key recovery (C2): Shamir split/recover of vault keys with multi-location
//! share storage and rotation-chain bookkeeping.
//!
//! This is distinct from [`crate::seal`]'s interactive unseal flow, where
//! shares are shown once to an operator and never persisted. `recovery`
//! implements the disaster-recovery path: a key is split and its shares are
//! *replicated to storage* across a rotating set of backup locations, so
//! that any single location's loss still leaves enough shares to recover.
//!
//! Grounded in the reference implementation's `KeyRecoverySystem`
//! (`security/key_recovery.py`): key backup metadata (`KeyBackupInfo`),
//! share replication across `backup_0..backup_2` locations, and a
//! rotation-parent chain. The prime-field Lagrange interpolation in that
//! reference is replaced here with the `sharks` crate the rest of this
//! workspace already uses for Shamir secret sharing.

use std::collections::HashMap;
use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sharks::{Share, Sharks};
use tracing::{info, warn};

use crate::barrier::Barrier;
use crate::error::RecoveryError;

/// Number of rotating backup directories each share's redundant copy is
/// spread across. Mirrors the reference implementation's "primary file +
/// backup_{i%3} copy".
const BACKUP_LOCATIONS: u32 = 3;

fn key_backup_path(key_id: &str) -> String {
    format!("sys/recovery/backup/{key_id}")
}

/// The share's primary storage location.
fn primary_share_path(key_id: &str, index: u8) -> String {
    format!("sys/recovery/shares/{key_id}/primary/{index}")
}

/// The share's rotating backup copy, in a different location than the
/// primary so the loss of either one alone does not lose the share.
fn backup_share_path(key_id: &str, index: u8) -> String {
    let location = u32::from(index) % BACKUP_LOCATIONS;
    format!("sys/recovery/shares/{key_id}/backup_{location}/{index}")
}

/// Metadata describing a key that has been split and backed up for
/// disaster recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyBackupInfo {
    pub key_id: String,
    pub key_version: u32,
    pub algorithm: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub backed_up_at: chrono::DateTime<chrono::Utc>,
    pub backup_locations: Vec<String>,
    pub shares_total: u8,
    pub shares_threshold: u8,
    pub key_fingerprint: String,
    pub rotation_parent: Option<String>,
    pub usage_metadata: HashMap<String, String>,
}

/// One share of a Shamir-split key, as persisted to storage.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredShare {
    share_index: u8,
    share_data_b64: String,
    key_id: String,
    checksum: String,
}

fn fingerprint(key_bytes: &[u8]) -> String {
    let digest = Sha256::digest(key_bytes);
    hex::encode(digest)
}

fn checksum(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    hex::encode(digest)
}

/// Splits vault keys into Shamir shares, replicates them to storage across
/// several backup locations, and reconstructs them on demand.
///
/// Holds a handle to the same [`Barrier`] the rest of the vault uses for raw
/// (unencrypted — shares are already opaque secret-shares) storage access,
/// following [`crate::seal::SealManager`]'s pattern of using
/// `put_raw`/`get_raw` for material that must be readable before the vault
/// itself is unsealed.
pub struct KeyRecoverySystem {
    barrier: Arc<Barrier>,
}

impl KeyRecoverySystem {
    /// Create a new recovery system wrapping the given barrier.
    #[must_use]
    pub fn new(barrier: Arc<Barrier>) -> Self {
        Self { barrier }
    }

    /// Split `key_bytes` into `shares_total` Shamir shares (threshold
    /// `shares_threshold`), write each to a primary location and a rotating
    /// backup copy so the loss of either alone does not lose the share, and
    /// persist a [`KeyBackupInfo`] record.
    ///
    /// # Errors
    ///
    /// - [`RecoveryError::Barrier`] if persisting shares or metadata fails.
    /// - [`RecoveryError::Crypto`] if serialization of the backup record fails.
    pub async fn backup_key(
        &self,
        key_id: &str,
        key_version: u32,
        key_bytes: &[u8],
        shares_threshold: u8,
        shares_total: u8,
        rotation_parent: Option<String>,
    ) -> Result<KeyBackupInfo, RecoveryError> {
        let shamir = Sharks(shares_threshold);
        let dealer = shamir.dealer(key_bytes);
        let shares: Vec<Share> = dealer.take(usize::from(shares_total)).collect();

        let mut backup_locations = Vec::new();
        for (idx, share) in shares.iter().enumerate() {
            #[allow(clippy::cast_possible_truncation)]
            let share_index = idx as u8;
            let share_bytes: Vec<u8> = Vec::from(share);
            let stored = StoredShare {
                share_index,
                share_data_b64: BASE64.encode(&share_bytes),
                key_id: key_id.to_owned(),
                checksum: checksum(&share_bytes),
            };
            let payload =
                serde_json::to_vec(&stored).map_err(|e| RecoveryError::Barrier(
                    crate::error::BarrierError::Crypto(crate::error::CryptoError::Encryption {
                        reason: format!("share serialization failed: {e}"),
                    }),
                ))?;

            // Write each share to its primary location and a rotating backup
            // copy, so the loss of either one alone does not lose the share.
            let primary_path = primary_share_path(key_id, share_index);
            let backup_path = backup_share_path(key_id, share_index);
            self.barrier.put_raw(&primary_path, &payload).await?;
            self.barrier.put_raw(&backup_path, &payload).await?;
            backup_locations.push(primary_path);
            backup_locations.push(backup_path);
        }

        let info = KeyBackupInfo {
            key_id: key_id.to_owned(),
            key_version,
            algorithm: "AES-256-GCM".to_owned(),
            created_at: chrono::Utc::now(),
            backed_up_at: chrono::Utc::now(),
            backup_locations,
            shares_total,
            shares_threshold,
            key_fingerprint: fingerprint(key_bytes),
            rotation_parent,
            usage_metadata: HashMap::new(),
        };

        let info_bytes = serde_json::to_vec(&info).map_err(|e| {
            RecoveryError::Barrier(crate::error::BarrierError::Crypto(
                crate::error::CryptoError::Encryption {
                    reason: format!("backup info serialization failed: {e}"),
                },
            ))
        })?;
        self.barrier
            .put_raw(&key_backup_path(key_id), &info_bytes)
            .await?;

        info!(
            key_id,
            shares_total, shares_threshold, "key backed up for recovery"
        );

        Ok(info)
    }

    /// Load the backup metadata for a key id.
    ///
    /// # Errors
    ///
    /// - [`RecoveryError::NotFound`] if no backup record exists.
    /// - [`RecoveryError::Barrier`] if storage access fails.
    pub async fn backup_info(&self, key_id: &str) -> Result<KeyBackupInfo, RecoveryError> {
        let bytes = self
            .barrier
            .get_raw(&key_backup_path(key_id))
            .await?
            .ok_or_else(|| RecoveryError::NotFound {
                key_id: key_id.to_owned(),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| {
            RecoveryError::Barrier(crate::error::BarrierError::Crypto(
                crate::error::CryptoError::Decryption {
                    reason: format!("backup info deserialization failed: {e}"),
                },
            ))
        })
    }

    /// Recover the original key bytes for `key_id` from its backed-up shares.
    ///
    /// For each share index, tries the primary location first and falls back
    /// to the rotating backup copy if the primary is missing or corrupt —
    /// the two copies hold identical share data, so at most one is counted
    /// per index. Verifies each recovered share's checksum, discards any
    /// that fail, and reconstructs the key once at least `shares_threshold`
    /// valid shares remain. The recovered bytes are checked against the
    /// recorded fingerprint before being returned.
    ///
    /// # Errors
    ///
    /// - [`RecoveryError::NotFound`] if no backup metadata exists.
    /// - [`RecoveryError::InsufficientShares`] if fewer than threshold valid
    ///   shares can be located.
    /// - [`RecoveryError::FingerprintMismatch`] if reconstruction succeeds
    ///   but the result does not match the recorded key fingerprint.
    pub async fn recover_key(&self, key_id: &str) -> Result<Vec<u8>, RecoveryError> {
        let info = self.backup_info(key_id).await?;

        let mut valid_shares: Vec<Share> = Vec::new();
        for share_index in 0..info.shares_total {
            let primary = primary_share_path(key_id, share_index);
            let backup = backup_share_path(key_id, share_index);

            let mut stored = None;
            for location in [&primary, &backup] {
                let Some(bytes) = self.barrier.get_raw(location).await? else {
                    continue;
                };
                let Ok(candidate) = serde_json::from_slice::<StoredShare>(&bytes) else {
                    warn!(key_id, location = %location, "recovery share could not be parsed");
                    continue;
                };
                stored = Some(candidate);
                break;
            }

            let Some(stored) = stored else {
                warn!(key_id, index = share_index, "recovery share missing at both locations");
                continue;
            };

            let Ok(share_bytes) = BASE64.decode(&stored.share_data_b64) else {
                warn!(key_id, index = share_index, "recovery share base64 invalid");
                continue;
            };
            if checksum(&share_bytes) != stored.checksum {
                warn!(key_id, index = stored.share_index, "share checksum mismatch");
                continue;
            }
            let Ok(share) = Share::try_from(share_bytes.as_slice()) else {
                warn!(key_id, index = stored.share_index, "share deserialization failed");
                continue;
            };
            valid_shares.push(share);
        }

        if valid_shares.len() < usize::from(info.shares_threshold) {
            return Err(RecoveryError::InsufficientShares {
                threshold: info.shares_threshold,
                found: u8::try_from(valid_shares.len()).unwrap_or(u8::MAX),
            });
        }

        let shamir = Sharks(info.shares_threshold);
        let recovered = shamir
            .recover(&valid_shares)
            .map_err(|_| RecoveryError::InsufficientShares {
                threshold: info.shares_threshold,
                found: u8::try_from(valid_shares.len()).unwrap_or(u8::MAX),
            })?;

        if fingerprint(&recovered) != info.key_fingerprint {
            return Err(RecoveryError::FingerprintMismatch {
                key_id: key_id.to_owned(),
            });
        }

        info!(key_id, "key recovered from shares");
        Ok(recovered)
    }

    /// Walk the rotation chain for a key, following `rotation_parent`
    /// pointers back to the oldest ancestor. Returns the chain ordered
    /// newest-first.
    ///
    /// # Errors
    ///
    /// Returns [`RecoveryError::Barrier`] if a storage read fails partway
    /// through the walk; a missing parent simply ends the chain.
    pub async fn rotation_chain(&self, key_id: &str) -> Result<Vec<KeyBackupInfo>, RecoveryError> {
        let mut chain = Vec::new();
        let mut current = Some(key_id.to_owned());
        while let Some(id) = current {
            match self.backup_info(&id).await {
                Ok(info) => {
                    current = info.rotation_parent.clone();
                    chain.push(info);
                }
                Err(RecoveryError::NotFound { .. }) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(chain)
    }
}

impl std::fmt::Debug for KeyRecoverySystem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecoverySystem").finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use databridge_storage::MemoryBackend;

    fn make_system() -> KeyRecoverySystem {
        let storage = Arc::new(MemoryBackend::new());
        let barrier = Arc::new(Barrier::new(storage));
        KeyRecoverySystem::new(barrier)
    }

    #[tokio::test]
    async fn backup_then_recover_round_trips() {
        let system = make_system();
        let key = vec![7u8; 32];
        system
            .backup_key("vault-root", 1, &key, 3, 5, None)
            .await
            .unwrap();

        let recovered = system.recover_key("vault-root").await.unwrap();
        assert_eq!(recovered, key);
    }

    #[tokio::test]
    async fn recover_missing_key_fails() {
        let system = make_system();
        let err = system.recover_key("nope").await.unwrap_err();
        assert!(matches!(err, RecoveryError::NotFound { .. }));
    }

    #[tokio::test]
    async fn recover_with_too_few_surviving_shares_fails() {
        let system = make_system();
        let key = vec![9u8; 32];
        system.backup_key("k1", 1, &key, 3, 5, None).await.unwrap();

        // Corrupt both the primary and backup copy of 3 of the 5 shares, so
        // fewer than the threshold of valid shares remain (shares are stored
        // raw, bypassing the barrier's encryption, so put_raw works
        // regardless of seal state). Corrupting only one copy per share
        // would not be enough, since recover_key falls back to the surviving
        // copy.
        for share_index in 0..3u8 {
            system
                .barrier
                .put_raw(&primary_share_path("k1", share_index), b"corrupted")
                .await
                .unwrap();
            system
                .barrier
                .put_raw(&backup_share_path("k1", share_index), b"corrupted")
                .await
                .unwrap();
        }

        let err = system.recover_key("k1").await.unwrap_err();
        assert!(matches!(err, RecoveryError::InsufficientShares { .. }));
    }

    #[tokio::test]
    async fn recover_survives_loss_of_either_single_copy() {
        let system = make_system();
        let key = vec![3u8; 32];
        system.backup_key("k2", 1, &key, 3, 5, None).await.unwrap();

        // Destroy the primary copy of one share and the backup copy of
        // another: each share still has one surviving copy, so recovery
        // should still succeed.
        system
            .barrier
            .put_raw(&primary_share_path("k2", 0), b"corrupted")
            .await
            .unwrap();
        system
            .barrier
            .put_raw(&backup_share_path("k2", 1), b"corrupted")
            .await
            .unwrap();

        let recovered = system.recover_key("k2").await.unwrap();
        assert_eq!(recovered, key);
    }

    #[tokio::test]
    async fn rotation_chain_follows_parent_pointers() {
        let system = make_system();
        let key_v1 = vec![1u8; 32];
        let key_v2 = vec![2u8; 32];

        system
            .backup_key("k-v1", 1, &key_v1, 2, 3, None)
            .await
            .unwrap();
        system
            .backup_key("k-v2", 2, &key_v2, 2, 3, Some("k-v1".to_owned()))
            .await
            .unwrap();

        let chain = system.rotation_chain("k-v2").await.unwrap();
        assert_eq!(chain.len(), 2);
        assert_eq!(chain[0].key_id, "k-v2");
        assert_eq!(chain[1].key_id, "k-v1");
    }
}
