//! Ambient runtime configuration, collected from environment variables
//! (spec §6 "Configuration knobs"). Every field has a sane default so the
//! process starts cleanly with no environment at all; operators override
//! only what they need.

use std::time::Duration;

/// Parsed environment configuration for a `DataBridge` process.
#[derive(Debug, Clone)]
pub struct DataBridgeConfig {
    /// `databridge-storage` backend selection for the vault barrier:
    /// `memory` (default), `redb`, `rocksdb`, `postgres`.
    pub storage_backend: String,
    pub audit_dir: std::path::PathBuf,
    pub connector_health_interval: Duration,
    pub connector_cleanup_interval: Duration,
    pub prepared_cache_size: usize,
    pub prepared_cache_ttl: Duration,
    pub session_idle_timeout: Duration,
    pub max_config_snapshots: usize,
    pub config_retention_days: i64,
    pub key_recovery_threshold: u8,
    pub key_recovery_shares: u8,
    pub key_backup_retention_days: i64,
    pub vault_backup_retention_days: i64,
    pub max_recovery_keys: usize,
    pub config_backup_paths: Vec<String>,
    pub config_backup_exclude: Vec<String>,
}

fn env_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_duration_secs(key: &str, default_secs: u64) -> Duration {
    Duration::from_secs(env_or(key, default_secs))
}

fn env_list(key: &str, default: &[&str]) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.split(',').map(|s| s.trim().to_owned()).filter(|s| !s.is_empty()).collect())
        .unwrap_or_else(|| default.iter().map(|s| (*s).to_owned()).collect())
}

impl Default for DataBridgeConfig {
    fn default() -> Self {
        Self {
            storage_backend: "memory".to_owned(),
            audit_dir: std::path::PathBuf::from("./data/audit"),
            connector_health_interval: Duration::from_secs(30),
            connector_cleanup_interval: Duration::from_secs(60),
            prepared_cache_size: 256,
            prepared_cache_ttl: Duration::from_secs(600),
            session_idle_timeout: Duration::from_secs(1800),
            max_config_snapshots: 30,
            config_retention_days: 90,
            key_recovery_threshold: 3,
            key_recovery_shares: 5,
            key_backup_retention_days: 365,
            vault_backup_retention_days: 365,
            max_recovery_keys: 10,
            config_backup_paths: Vec::new(),
            config_backup_exclude: Vec::new(),
        }
    }
}

impl DataBridgeConfig {
    /// Build a config from the process environment, falling back to
    /// [`Default::default`] for anything unset or unparsable.
    #[must_use]
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            storage_backend: std::env::var("DATABRIDGE_STORAGE_BACKEND")
                .unwrap_or(defaults.storage_backend),
            audit_dir: std::env::var("DATABRIDGE_AUDIT_DIR")
                .map(std::path::PathBuf::from)
                .unwrap_or(defaults.audit_dir),
            connector_health_interval: env_duration_secs("DATABRIDGE_CONNECTOR_HEALTH_INTERVAL_SECS", 30),
            connector_cleanup_interval: env_duration_secs("DATABRIDGE_CONNECTOR_CLEANUP_INTERVAL_SECS", 60),
            prepared_cache_size: env_or("DATABRIDGE_PREPARED_CACHE_SIZE", 256),
            prepared_cache_ttl: env_duration_secs("DATABRIDGE_PREPARED_CACHE_TTL_SECS", 600),
            session_idle_timeout: env_duration_secs("DATABRIDGE_SESSION_IDLE_TIMEOUT_SECS", 1800),
            max_config_snapshots: env_or("MAX_CONFIG_SNAPSHOTS", 30),
            config_retention_days: env_or("CONFIG_RETENTION_DAYS", 90),
            key_recovery_threshold: env_or("KEY_RECOVERY_THRESHOLD", 3),
            key_recovery_shares: env_or("KEY_RECOVERY_SHARES", 5),
            key_backup_retention_days: env_or("KEY_BACKUP_RETENTION_DAYS", 365),
            vault_backup_retention_days: env_or("VAULT_BACKUP_RETENTION_DAYS", 365),
            max_recovery_keys: env_or("MAX_RECOVERY_KEYS", 10),
            config_backup_paths: env_list("CONFIG_BACKUP_PATHS", &[]),
            config_backup_exclude: env_list("CONFIG_BACKUP_EXCLUDE", &["*.secret", "*.key"]),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_self_consistent() {
        let config = DataBridgeConfig::default();
        assert_eq!(config.prepared_cache_size, 256);
        assert_eq!(config.session_idle_timeout, Duration::from_secs(1800));
        assert_eq!(config.key_recovery_threshold, 3);
    }

    #[test]
    fn env_list_splits_on_comma_and_trims() {
        // SAFETY in spirit only — this mutates process env for the test;
        // acceptable since `cargo test` runs each test in its own thread
        // but env vars are process-global, so we use a key unlikely to
        // collide with other tests.
        std::env::set_var("DATABRIDGE_TEST_LIST_ONLY", "a, b ,c");
        assert_eq!(env_list("DATABRIDGE_TEST_LIST_ONLY", &[]), vec!["a", "b", "c"]);
        std::env::remove_var("DATABRIDGE_TEST_LIST_ONLY");
    }
}
