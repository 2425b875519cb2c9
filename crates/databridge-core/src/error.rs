//! Error types for `databridge-core`.
//!
//! Each error variant carries enough context to diagnose the problem without
//! a debugger. Crypto errors never include key material — only key identifiers
//! or operation descriptions.

use databridge_storage::StorageError;

/// Errors from cryptographic operations.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// AES-256-GCM encryption failed.
    #[error("encryption failed: {reason}")]
    Encryption { reason: String },

    /// AES-256-GCM decryption failed (wrong key, corrupted ciphertext, or tampered tag).
    #[error("decryption failed: {reason}")]
    Decryption { reason: String },

    /// HKDF key derivation failed.
    #[error("key derivation failed for context '{context}': {reason}")]
    KeyDerivation { context: String, reason: String },

    /// Ciphertext is too short to contain a valid nonce + tag.
    #[error("ciphertext too short: expected at least {expected} bytes, got {actual}")]
    CiphertextTooShort { expected: usize, actual: usize },
}

/// Errors from the encryption barrier.
#[derive(Debug, thiserror::Error)]
pub enum BarrierError {
    /// The vault is sealed — no operations are possible until unseal.
    #[error("vault is sealed")]
    Sealed,

    /// A cryptographic operation within the barrier failed.
    #[error("barrier crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The underlying storage backend returned an error.
    #[error("barrier storage error: {0}")]
    Storage(#[from] StorageError),

    /// The stored value was encrypted under a key version that has since
    /// been retired beyond the retention window.
    #[error("key version {version} is no longer retained")]
    KeyVersionUnavailable { version: u32 },
}

/// Errors from seal/unseal operations.
#[derive(Debug, thiserror::Error)]
pub enum SealError {
    /// The vault has already been initialized.
    #[error("vault is already initialized")]
    AlreadyInitialized,

    /// The vault has not been initialized yet.
    #[error("vault is not initialized")]
    NotInitialized,

    /// The vault is already unsealed.
    #[error("vault is already unsealed")]
    AlreadyUnsealed,

    /// The vault is already sealed.
    #[error("vault is already sealed")]
    AlreadySealed,

    /// Invalid Shamir configuration parameters.
    #[error("invalid seal config: {reason}")]
    InvalidConfig { reason: String },

    /// A submitted unseal share was invalid or corrupted.
    #[error("invalid unseal share: {reason}")]
    InvalidShare { reason: String },

    /// Shamir secret recovery failed (not enough shares or corrupted shares).
    #[error("share recovery failed: {reason}")]
    RecoveryFailed { reason: String },

    /// Failed to decrypt the root key with the reconstructed unseal key.
    #[error("root key decryption failed: {reason}")]
    RootKeyDecryption { reason: String },

    /// A cryptographic operation failed during seal/unseal.
    #[error("seal crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The encryption barrier returned an error during raw storage access.
    #[error("seal barrier error: {0}")]
    Barrier(#[from] BarrierError),

    /// The underlying storage backend returned an error.
    #[error("seal storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Errors from audit operations.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    /// All audit backends failed to write — request must be denied.
    #[error("all audit backends failed (fail-closed)")]
    AllBackendsFailed,

    /// A specific audit backend failed.
    #[error("audit backend '{name}' failed: {reason}")]
    BackendFailure { name: String, reason: String },

    /// Serialization of the audit entry failed.
    #[error("audit serialization failed: {reason}")]
    Serialization { reason: String },
}

/// Errors from credential custody (vault-backed secret storage, §3 `Credential`).
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    /// No credential exists under the given id.
    #[error("credential not found: {id}")]
    NotFound { id: String },

    /// The credential's stored blob is malformed.
    #[error("malformed credential blob: {reason}")]
    MalformedBlob { reason: String },

    /// A cryptographic operation failed.
    #[error("credential crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The barrier returned an error.
    #[error("credential barrier error: {0}")]
    Barrier(#[from] BarrierError),
}

/// The closed error-kind taxonomy every data-plane operation is classified
/// into (spec §7). Every subsystem error enum below exposes a `kind()`
/// method that maps onto this taxonomy so callers can match on a single
/// closed set regardless of which backend or subsystem raised the error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbErrorKind {
    /// Backend unreachable or rejecting the socket.
    ConnectionRefused,
    /// Credentials rejected, role denied, or session expired.
    AuthenticationFailed,
    /// Pool acquisition or connect exceeded its bound.
    ConnectionTimeout,
    /// Server-side execution exceeded its bound.
    QueryTimeout,
    /// Unknown backend, malformed URI, bad isolation level, missing fields,
    /// or unsupported op kind.
    InvalidConfiguration,
    /// Audit chain break, signature mismatch, or state inconsistency.
    IntegrityFailure,
    /// Insufficient shares, fingerprint mismatch, or corrupted backup.
    RecoveryFailure,
    /// Fallback for unclassified driver errors.
    Unknown,
}

impl std::fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ConnectionRefused => "connection_refused",
            Self::AuthenticationFailed => "authentication_failed",
            Self::ConnectionTimeout => "connection_timeout",
            Self::QueryTimeout => "query_timeout",
            Self::InvalidConfiguration => "invalid_configuration",
            Self::IntegrityFailure => "integrity_failure",
            Self::RecoveryFailure => "recovery_failure",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// Errors from a [`crate::connector`] implementation.
#[derive(Debug, thiserror::Error)]
pub enum ConnectorError {
    /// The backend refused the connection outright.
    #[error("connection refused: {reason}")]
    ConnectionRefused { reason: String },

    /// Credentials were rejected by the backend.
    #[error("authentication failed: {reason}")]
    AuthenticationFailed { reason: String },

    /// Pool acquisition or the initial connect exceeded its bound.
    #[error("connection timed out after {timeout_secs}s")]
    ConnectionTimeout { timeout_secs: u64 },

    /// A query exceeded its execution bound.
    #[error("query timed out after {timeout_secs}s")]
    QueryTimeout { timeout_secs: u64 },

    /// The connector was asked to do something its configuration disallows.
    #[error("invalid configuration: {reason}")]
    InvalidConfiguration { reason: String },

    /// The connector is not in a state that accepts this operation.
    #[error("connector not connected (state: {state})")]
    NotConnected { state: String },

    /// Catch-all for driver errors that don't map onto a more specific kind.
    #[error("unknown connector error: {reason}")]
    Unknown { reason: String },
}

impl ConnectorError {
    /// Classify this error into the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        match self {
            Self::ConnectionRefused { .. } | Self::NotConnected { .. } => {
                DbErrorKind::ConnectionRefused
            }
            Self::AuthenticationFailed { .. } => DbErrorKind::AuthenticationFailed,
            Self::ConnectionTimeout { .. } => DbErrorKind::ConnectionTimeout,
            Self::QueryTimeout { .. } => DbErrorKind::QueryTimeout,
            Self::InvalidConfiguration { .. } => DbErrorKind::InvalidConfiguration,
            Self::Unknown { .. } => DbErrorKind::Unknown,
        }
    }
}

/// Errors from the connector registry (C6).
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// The connection URI could not be parsed.
    #[error("malformed connection URI: {reason}")]
    MalformedUri { reason: String },

    /// No backend tag could be determined with sufficient confidence.
    #[error("could not detect backend type for '{target}'")]
    UndetectedBackend { target: String },

    /// The detected or requested backend tag has no connector implementation.
    #[error("unknown backend tag: {tag}")]
    UnknownBackend { tag: String },

    /// A connector failed to construct.
    #[error("connector construction failed: {0}")]
    Connector(#[from] ConnectorError),
}

/// Errors from the query builder (C7).
#[derive(Debug, thiserror::Error)]
pub enum QueryBuilderError {
    /// The builder was asked to build before a required clause was set
    /// (e.g. no table/collection named).
    #[error("incomplete query: {reason}")]
    Incomplete { reason: String },

    /// An operator is not supported on the target dialect.
    #[error("operator {operator} is not supported on dialect {dialect}")]
    UnsupportedOperator { operator: String, dialect: String },

    /// An identifier failed validation (empty, contains the quote character).
    #[error("invalid identifier: {reason}")]
    InvalidIdentifier { reason: String },

    /// A condition's value didn't match the shape its operator requires
    /// (e.g. `Between` needs a two-element array, `In` a non-empty array).
    #[error("invalid condition value: {reason}")]
    InvalidConditionValue { reason: String },
}

/// Errors from the schema discoverer (C8).
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The underlying connector failed while walking the catalog.
    #[error("schema introspection failed: {0}")]
    Connector(#[from] ConnectorError),

    /// The catalog returned a row schema discovery could not parse.
    #[error("unexpected catalog row shape: {reason}")]
    UnexpectedRow { reason: String },
}

/// Errors from policy evaluation (C9).
#[derive(Debug, thiserror::Error)]
pub enum AccessPolicyError {
    /// No policy in the set permits this access.
    #[error("access denied: subject={subject} database={database} op={op}")]
    Denied {
        subject: String,
        database: String,
        op: String,
    },

    /// The policy document itself is malformed.
    #[error("invalid policy: {reason}")]
    Invalid { reason: String },
}

/// Errors from the secure wrapper (C10).
#[derive(Debug, thiserror::Error)]
pub enum SecureWrapperError {
    /// The session has been idle past its configured timeout.
    #[error("session expired")]
    SessionExpired,

    /// The policy set denied this operation.
    #[error("access denied: {0}")]
    Denied(#[from] AccessPolicyError),

    /// The underlying connector failed.
    #[error("connector error: {0}")]
    Connector(#[from] ConnectorError),

    /// Audit emission failed; per spec §7 this does not block the data
    /// plane, but is surfaced so callers can observe degraded auditability.
    #[error("audit emission failed: {0}")]
    Audit(#[from] AuditError),
}

/// Errors from key recovery (C2), distinct from [`SealError`] (which governs
/// the interactive operator-held unseal flow); this covers the
/// disaster-recovery share/backup/rotation subsystem.
#[derive(Debug, thiserror::Error)]
pub enum RecoveryError {
    /// Fewer than the threshold of valid shares could be located.
    #[error("insufficient shares: need {threshold}, found {found}")]
    InsufficientShares { threshold: u8, found: u8 },

    /// A share's checksum did not match its recorded value.
    #[error("share checksum mismatch for index {index}")]
    ChecksumMismatch { index: u8 },

    /// The reconstructed key's fingerprint does not match the recorded one.
    #[error("recovered key fingerprint mismatch for key '{key_id}'")]
    FingerprintMismatch { key_id: String },

    /// No backup metadata exists for the requested key id.
    #[error("no key backup found for '{key_id}'")]
    NotFound { key_id: String },

    /// A cryptographic operation failed.
    #[error("recovery crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The barrier/storage layer failed.
    #[error("recovery barrier error: {0}")]
    Barrier(#[from] BarrierError),
}

/// Errors from the audit trail's integrity verifier and backup worker,
/// beyond the write-path [`AuditError`].
#[derive(Debug, thiserror::Error)]
pub enum AuditTrailError {
    /// Writing or reading the row store failed.
    #[error("audit row store error: {reason}")]
    RowStore { reason: String },

    /// The state sidecar file could not be read or parsed.
    #[error("audit state error: {reason}")]
    State { reason: String },

    /// Serialization of an audit record failed.
    #[error("audit serialization error: {reason}")]
    Serialization { reason: String },

    /// A cryptographic (hash/HMAC) operation failed.
    #[error("audit crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The vault (barrier) rejected a signing request, e.g. because it is
    /// sealed.
    #[error("audit barrier error: {0}")]
    Barrier(#[from] BarrierError),
}

/// Errors from the config backup engine (C4).
#[derive(Debug, thiserror::Error)]
pub enum ConfigBackupError {
    /// A monitored path could not be read.
    #[error("failed to read '{path}': {reason}")]
    ReadFailed { path: String, reason: String },

    /// The requested snapshot id does not exist.
    #[error("snapshot not found: {snapshot_id}")]
    SnapshotNotFound { snapshot_id: String },

    /// Encryption/decryption of a snapshot payload failed.
    #[error("config backup crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// The barrier/storage layer failed.
    #[error("config backup barrier error: {0}")]
    Barrier(#[from] BarrierError),
}

impl AccessPolicyError {
    /// Classify this error into the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        match self {
            Self::Denied { .. } => DbErrorKind::AuthenticationFailed,
            Self::Invalid { .. } => DbErrorKind::InvalidConfiguration,
        }
    }
}

impl SecureWrapperError {
    /// Classify this error into the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        match self {
            Self::SessionExpired => DbErrorKind::AuthenticationFailed,
            Self::Denied(e) => e.kind(),
            Self::Connector(e) => e.kind(),
            Self::Audit(_) => DbErrorKind::Unknown,
        }
    }
}

impl RecoveryError {
    /// Classify this error into the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        DbErrorKind::RecoveryFailure
    }
}

impl AuditTrailError {
    /// Classify this error into the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        DbErrorKind::IntegrityFailure
    }
}

impl RegistryError {
    /// Classify this error into the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        match self {
            Self::MalformedUri { .. } | Self::UnknownBackend { .. } => {
                DbErrorKind::InvalidConfiguration
            }
            Self::UndetectedBackend { .. } => DbErrorKind::InvalidConfiguration,
            Self::Connector(e) => e.kind(),
        }
    }
}

impl QueryBuilderError {
    /// Classify this error into the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        DbErrorKind::InvalidConfiguration
    }
}

impl SchemaError {
    /// Classify this error into the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        match self {
            Self::Connector(e) => e.kind(),
            Self::UnexpectedRow { .. } => DbErrorKind::Unknown,
        }
    }
}

impl ConfigBackupError {
    /// Classify this error into the closed taxonomy.
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        match self {
            Self::SnapshotNotFound { .. } => DbErrorKind::InvalidConfiguration,
            Self::ReadFailed { .. } | Self::Crypto(_) | Self::Barrier(_) => DbErrorKind::Unknown,
        }
    }
}

/// The single error type crossing the public boundary of the core library
/// (spec §7's "structured result with error kind and message"). Every
/// subsystem error converts into this via `#[from]`, following the teacher's
/// per-domain-enum-plus-unifying-boundary-type style.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error(transparent)]
    Crypto(#[from] CryptoError),
    #[error(transparent)]
    Barrier(#[from] BarrierError),
    #[error(transparent)]
    Seal(#[from] SealError),
    #[error(transparent)]
    Audit(#[from] AuditError),
    #[error(transparent)]
    AuditTrail(#[from] AuditTrailError),
    #[error(transparent)]
    Connector(#[from] ConnectorError),
    #[error(transparent)]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    QueryBuilder(#[from] QueryBuilderError),
    #[error(transparent)]
    Schema(#[from] SchemaError),
    #[error(transparent)]
    AccessPolicy(#[from] AccessPolicyError),
    #[error(transparent)]
    SecureWrapper(#[from] SecureWrapperError),
    #[error(transparent)]
    Recovery(#[from] RecoveryError),
    #[error(transparent)]
    ConfigBackup(#[from] ConfigBackupError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

impl CoreError {
    /// Classify this error into the closed taxonomy (spec §7).
    #[must_use]
    pub fn kind(&self) -> DbErrorKind {
        match self {
            Self::Crypto(_) | Self::Barrier(_) | Self::Seal(_) | Self::Audit(_) => {
                DbErrorKind::Unknown
            }
            Self::AuditTrail(e) => e.kind(),
            Self::Connector(e) => e.kind(),
            Self::Registry(e) => e.kind(),
            Self::QueryBuilder(e) => e.kind(),
            Self::Schema(e) => e.kind(),
            Self::AccessPolicy(e) => e.kind(),
            Self::SecureWrapper(e) => e.kind(),
            Self::Recovery(e) => e.kind(),
            Self::ConfigBackup(e) => e.kind(),
            Self::Credential(_) => DbErrorKind::AuthenticationFailed,
        }
    }
}
