//! Config Backup & Restore Engine (C4) — snapshots the configuration files
//! the operator names, encrypts them through the vault, retains snapshots
//! by count and age, and can diff or restore them (spec §4.4).
//!
//! Restoring a snapshot never kills or relaunches any process (Open
//! Question, resolved — see DESIGN.md): it only rewrites file contents on
//! disk, leaving whatever picks up the change (a supervisor, a `SIGHUP`
//! handler, an operator) to act on it.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::barrier::Barrier;
use crate::error::ConfigBackupError;

/// The syntactic format a config file is classified as, driving which
/// validator runs before a snapshot is accepted (spec §4.4 "content-type
/// classification").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
    Ini,
    Unknown,
}

impl ConfigFormat {
    #[must_use]
    pub fn from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::Json,
            Some("yaml" | "yml") => Self::Yaml,
            Some("toml") => Self::Toml,
            Some("ini" | "conf" | "cfg") => Self::Ini,
            _ => Self::Unknown,
        }
    }

    /// Validate that `content` is syntactically well-formed for this
    /// format. [`Self::Unknown`] always validates (no opinion).
    #[must_use]
    pub fn validate(&self, content: &str) -> bool {
        match self {
            Self::Json => serde_json::from_str::<serde_json::Value>(content).is_ok(),
            Self::Yaml => serde_yaml::from_str::<serde_yaml::Value>(content).is_ok(),
            Self::Toml => content.parse::<toml::Value>().is_ok(),
            Self::Ini => validate_ini(content),
            Self::Unknown => true,
        }
    }
}

fn validate_ini(content: &str) -> bool {
    for line in content.lines() {
        let line = line.trim();
        if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
            continue;
        }
        if line.starts_with('[') {
            if !line.ends_with(']') {
                return false;
            }
            continue;
        }
        if !line.contains('=') {
            return false;
        }
    }
    true
}

/// A single captured file within a [`ConfigSnapshot`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapturedFile {
    pub path: String,
    pub format: ConfigFormat,
    pub sha256: String,
    /// The file's encrypted contents (base64, vault-wrapped by
    /// [`Barrier::encrypt_for_export`]'s caller at the snapshot layer).
    pub encrypted_content: String,
    pub key_version: u32,
    pub size_bytes: u64,
}

/// A point-in-time backup of every monitored config path (spec §3
/// `ConfigSnapshot`).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigSnapshot {
    pub id: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub files: Vec<CapturedFile>,
}

fn snapshot_path(id: &str) -> String {
    format!("sys/config_backups/{id}")
}

/// A dry-run or applied restore outcome for one file (spec §4.4 "restore
/// reports per-file outcome").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RestoreOutcome {
    pub path: String,
    pub would_change: bool,
    pub applied: bool,
    pub error: Option<String>,
}

/// Scans, snapshots, diffs, and restores configuration files (spec §4.4).
pub struct ConfigBackupEngine {
    barrier: std::sync::Arc<Barrier>,
    include_globs: Vec<String>,
    exclude_globs: Vec<String>,
    max_snapshots: usize,
    retention_days: i64,
}

impl ConfigBackupEngine {
    #[must_use]
    pub fn new(
        barrier: std::sync::Arc<Barrier>,
        include_globs: Vec<String>,
        exclude_globs: Vec<String>,
        max_snapshots: usize,
        retention_days: i64,
    ) -> Self {
        Self {
            barrier,
            include_globs,
            exclude_globs,
            max_snapshots,
            retention_days,
        }
    }

    fn is_excluded(&self, path: &Path) -> bool {
        let path_str = path.to_string_lossy();
        self.exclude_globs
            .iter()
            .any(|pattern| glob_match::glob_match(pattern, &path_str))
    }

    /// Walk every included path (each entry may be a file or a directory,
    /// recursed one level of glob expansion deep) and collect the
    /// non-excluded files that exist.
    fn resolve_paths(&self) -> Vec<PathBuf> {
        let mut resolved = Vec::new();
        for pattern in &self.include_globs {
            let base = Path::new(pattern);
            if base.is_file() {
                if !self.is_excluded(base) {
                    resolved.push(base.to_path_buf());
                }
                continue;
            }
            if base.is_dir() {
                if let Ok(entries) = std::fs::read_dir(base) {
                    for entry in entries.flatten() {
                        let path = entry.path();
                        if path.is_file() && !self.is_excluded(&path) {
                            resolved.push(path);
                        }
                    }
                }
            }
        }
        resolved
    }

    /// Capture a new snapshot of every currently-resolved config path,
    /// validating syntax and encrypting each file's content through the
    /// vault.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigBackupError::ReadFailed`] if a resolved path cannot
    /// be read.
    pub async fn snapshot(&self) -> Result<ConfigSnapshot, ConfigBackupError> {
        let mut files = Vec::new();
        for path in self.resolve_paths() {
            let content = std::fs::read_to_string(&path).map_err(|e| ConfigBackupError::ReadFailed {
                path: path.display().to_string(),
                reason: e.to_string(),
            })?;

            let format = ConfigFormat::from_path(&path);
            if !format.validate(&content) {
                tracing::warn!(path = %path.display(), ?format, "config file failed syntactic validation; snapshotting anyway");
            }

            let sha256 = hex::encode(Sha256::digest(content.as_bytes()));
            let (key_version, ciphertext) = self.barrier.encrypt_for_export(content.as_bytes()).await?;

            files.push(CapturedFile {
                path: path.display().to_string(),
                format,
                sha256,
                encrypted_content: base64::Engine::encode(
                    &base64::engine::general_purpose::STANDARD,
                    ciphertext,
                ),
                key_version,
                size_bytes: content.len() as u64,
            });
        }

        let snapshot = ConfigSnapshot {
            id: uuid::Uuid::new_v4().to_string(),
            created_at: chrono::Utc::now(),
            files,
        };

        self.put(&snapshot).await?;
        self.enforce_retention().await?;
        Ok(snapshot)
    }

    async fn put(&self, snapshot: &ConfigSnapshot) -> Result<(), ConfigBackupError> {
        let bytes = serde_json::to_vec(snapshot).map_err(|e| ConfigBackupError::ReadFailed {
            path: snapshot.id.clone(),
            reason: e.to_string(),
        })?;
        self.barrier.put(&snapshot_path(&snapshot.id), &bytes).await?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`ConfigBackupError::SnapshotNotFound`] if no snapshot
    /// exists under `snapshot_id`.
    pub async fn get(&self, snapshot_id: &str) -> Result<ConfigSnapshot, ConfigBackupError> {
        let bytes = self
            .barrier
            .get(&snapshot_path(snapshot_id))
            .await?
            .ok_or_else(|| ConfigBackupError::SnapshotNotFound {
                snapshot_id: snapshot_id.to_owned(),
            })?;
        serde_json::from_slice(&bytes).map_err(|e| ConfigBackupError::ReadFailed {
            path: snapshot_id.to_owned(),
            reason: e.to_string(),
        })
    }

    /// List all snapshot ids, most recent last.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigBackupError::Barrier`] if storage fails.
    pub async fn list(&self) -> Result<Vec<String>, ConfigBackupError> {
        let prefix = "sys/config_backups/";
        let keys = self.barrier.list(prefix).await?;
        Ok(keys
            .into_iter()
            .filter_map(|k| k.strip_prefix(prefix).map(String::from))
            .collect())
    }

    async fn enforce_retention(&self) -> Result<(), ConfigBackupError> {
        let mut snapshots = Vec::new();
        for id in self.list().await? {
            if let Ok(snap) = self.get(&id).await {
                snapshots.push(snap);
            }
        }
        snapshots.sort_by_key(|s| s.created_at);

        let cutoff = chrono::Utc::now() - chrono::Duration::days(self.retention_days);
        let mut to_delete = Vec::new();

        for snap in &snapshots {
            if snap.created_at < cutoff {
                to_delete.push(snap.id.clone());
            }
        }

        let remaining_after_age: Vec<_> = snapshots
            .iter()
            .filter(|s| !to_delete.contains(&s.id))
            .collect();
        if remaining_after_age.len() > self.max_snapshots {
            let excess = remaining_after_age.len() - self.max_snapshots;
            for snap in remaining_after_age.iter().take(excess) {
                to_delete.push(snap.id.clone());
            }
        }

        for id in to_delete {
            self.barrier.delete(&snapshot_path(&id)).await?;
        }
        Ok(())
    }

    /// Decrypt `snapshot_id`'s files and either report or apply the
    /// restore, per `dry_run`.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigBackupError::SnapshotNotFound`] if the snapshot does
    /// not exist.
    pub async fn restore(&self, snapshot_id: &str, dry_run: bool) -> Result<Vec<RestoreOutcome>, ConfigBackupError> {
        let snapshot = self.get(snapshot_id).await?;
        let mut outcomes = Vec::with_capacity(snapshot.files.len());

        for file in &snapshot.files {
            let ciphertext = base64::Engine::decode(
                &base64::engine::general_purpose::STANDARD,
                &file.encrypted_content,
            )
            .map_err(|e| ConfigBackupError::ReadFailed {
                path: file.path.clone(),
                reason: format!("invalid base64: {e}"),
            })?;
            let plaintext = self.barrier.decrypt_for_import(file.key_version, &ciphertext).await?;

            let current = std::fs::read(&file.path).ok();
            let would_change = current.as_deref() != Some(plaintext.as_slice());

            if !dry_run && would_change {
                match std::fs::write(&file.path, &plaintext) {
                    Ok(()) => outcomes.push(RestoreOutcome {
                        path: file.path.clone(),
                        would_change: true,
                        applied: true,
                        error: None,
                    }),
                    Err(e) => outcomes.push(RestoreOutcome {
                        path: file.path.clone(),
                        would_change: true,
                        applied: false,
                        error: Some(e.to_string()),
                    }),
                }
            } else {
                outcomes.push(RestoreOutcome {
                    path: file.path.clone(),
                    would_change,
                    applied: false,
                    error: None,
                });
            }
        }

        Ok(outcomes)
    }

    /// Compare two snapshots' captured file hashes (spec §4.4 "diff
    /// snapshots" — complements [`crate::schema::SchemaDiff`] for config
    /// rather than catalog drift).
    #[must_use]
    pub fn diff(before: &ConfigSnapshot, after: &ConfigSnapshot) -> BTreeMap<String, (Option<String>, Option<String>)> {
        let before_hashes: BTreeMap<_, _> = before.files.iter().map(|f| (f.path.clone(), f.sha256.clone())).collect();
        let after_hashes: BTreeMap<_, _> = after.files.iter().map(|f| (f.path.clone(), f.sha256.clone())).collect();

        let mut diff = BTreeMap::new();
        let mut all_paths: Vec<_> = before_hashes.keys().chain(after_hashes.keys()).cloned().collect();
        all_paths.sort();
        all_paths.dedup();

        for path in all_paths {
            let b = before_hashes.get(&path).cloned();
            let a = after_hashes.get(&path).cloned();
            if b != a {
                diff.insert(path, (b, a));
            }
        }
        diff
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use databridge_storage::MemoryBackend;
    use std::io::Write;

    async fn make_engine(include: Vec<String>) -> ConfigBackupEngine {
        let storage = std::sync::Arc::new(MemoryBackend::new());
        let barrier = std::sync::Arc::new(Barrier::new(storage));
        barrier.unseal(crate::crypto::EncryptionKey::generate()).await;
        ConfigBackupEngine::new(barrier, include, vec!["*.secret".to_owned()], 5, 30)
    }

    #[test]
    fn classifies_format_from_extension() {
        assert_eq!(ConfigFormat::from_path(Path::new("app.json")), ConfigFormat::Json);
        assert_eq!(ConfigFormat::from_path(Path::new("app.toml")), ConfigFormat::Toml);
        assert_eq!(ConfigFormat::from_path(Path::new("app.bin")), ConfigFormat::Unknown);
    }

    #[test]
    fn validates_json_syntax() {
        assert!(ConfigFormat::Json.validate("{\"a\": 1}"));
        assert!(!ConfigFormat::Json.validate("{not json"));
    }

    #[tokio::test]
    async fn snapshot_captures_and_encrypts_included_files() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("app.json");
        let mut f = std::fs::File::create(&file_path).unwrap();
        write!(f, "{{\"key\": \"value\"}}").unwrap();

        let engine = make_engine(vec![file_path.display().to_string()]).await;
        let snapshot = engine.snapshot().await.unwrap();
        assert_eq!(snapshot.files.len(), 1);
        assert_eq!(snapshot.files[0].format, ConfigFormat::Json);
    }

    #[tokio::test]
    async fn restore_dry_run_does_not_modify_disk() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("app.json");
        std::fs::write(&file_path, "{\"key\": \"value\"}").unwrap();

        let engine = make_engine(vec![file_path.display().to_string()]).await;
        let snapshot = engine.snapshot().await.unwrap();

        std::fs::write(&file_path, "{\"key\": \"changed\"}").unwrap();
        let outcomes = engine.restore(&snapshot.id, true).await.unwrap();
        assert!(outcomes[0].would_change);
        assert!(!outcomes[0].applied);

        let on_disk = std::fs::read_to_string(&file_path).unwrap();
        assert_eq!(on_disk, "{\"key\": \"changed\"}");
    }

    #[tokio::test]
    async fn restore_applied_writes_back_original_content() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("app.json");
        std::fs::write(&file_path, "{\"key\": \"value\"}").unwrap();

        let engine = make_engine(vec![file_path.display().to_string()]).await;
        let snapshot = engine.snapshot().await.unwrap();

        std::fs::write(&file_path, "{\"key\": \"changed\"}").unwrap();
        let outcomes = engine.restore(&snapshot.id, false).await.unwrap();
        assert!(outcomes[0].applied);

        let on_disk = std::fs::read_to_string(&file_path).unwrap();
        assert_eq!(on_disk, "{\"key\": \"value\"}");
    }

    #[tokio::test]
    async fn diff_flags_changed_file_hash() {
        let dir = tempfile::tempdir().unwrap();
        let file_path = dir.path().join("app.json");
        std::fs::write(&file_path, "{\"key\": \"value\"}").unwrap();

        let engine = make_engine(vec![file_path.display().to_string()]).await;
        let before = engine.snapshot().await.unwrap();

        std::fs::write(&file_path, "{\"key\": \"other\"}").unwrap();
        let after = engine.snapshot().await.unwrap();

        let diff = ConfigBackupEngine::diff(&before, &after);
        assert_eq!(diff.len(), 1);
    }
}
