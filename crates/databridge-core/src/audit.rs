//! Persistent Audit & Recovery Engine (C3) — append-only, hash-chained,
//! signed audit log with crash-safe state and periodic encrypted backups.
//!
//! Mirrors [`crate::recovery`]'s relationship to the vault: this module owns
//! its own on-disk row store and state sidecar rather than routing through
//! [`crate::barrier::Barrier`]'s KV abstraction, because the row layout
//! (`sequence_number`, indexed columns, append-only semantics) does not fit
//! a generic key-value put/get. The barrier is still used — only for signing
//! entries via [`crate::barrier::Barrier::hmac`], so the HMAC key is governed
//! by the same seal/unseal lifecycle as everything else.
//!
//! # Concurrency
//!
//! `add_entry` is a non-blocking enqueue onto an unbounded channel drained by
//! a single background worker task, which is the only writer of the row
//! store and state file (spec §5's single-writer rule). A second background
//! task performs periodic backups. Both observe a shared shutdown signal.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::fs::{self, OpenOptions};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{error, info, instrument, warn};

use crate::barrier::Barrier;
use crate::error::{AuditError, AuditTrailError};

/// Sequence numbers start at 1 and are contiguous (spec §3 invariant).
const FIRST_SEQUENCE: u64 = 1;
/// A checkpoint is recorded every this-many committed entries.
const CHECKPOINT_INTERVAL: u64 = 100;
/// How many recent checkpoints are retained in [`AuditState`].
const MAX_RETAINED_CHECKPOINTS: usize = 50;

/// One row of the append-only audit log (spec §6 "Audit row layout").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: uuid::Uuid,
    pub sequence_number: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub event_type: String,
    pub event_data: Value,
    pub subject_context: Option<Value>,
    pub system_context: Value,
    pub previous_hash: String,
    pub entry_hash: String,
    pub signature: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// A periodic snapshot of audit state, used to bound crash-recovery work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryCheckpoint {
    pub sequence_number: u64,
    pub entry_hash: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

/// The persistent sidecar describing the audit log's tail state (spec §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditState {
    pub last_sequence_number: u64,
    pub last_entry_hash: String,
    pub last_backup_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    pub total_entries: u64,
    pub integrity_check_passed: bool,
    pub recovery_checkpoints: Vec<RecoveryCheckpoint>,
}

impl AuditState {
    fn genesis() -> Self {
        Self {
            last_sequence_number: 0,
            last_entry_hash: String::new(),
            last_backup_timestamp: None,
            total_entries: 0,
            integrity_check_passed: true,
            recovery_checkpoints: Vec::new(),
        }
    }
}

/// Outcome of a chain integrity scan over a sequence-number range (spec §4.8
/// "Integrity verification").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub scanned: u64,
    pub chain_breaks: u64,
    pub hash_mismatches: u64,
    pub signature_failures: u64,
    pub passed: bool,
    /// Sequence numbers at which a chain break or hash mismatch was found.
    pub failed_sequences: Vec<u64>,
}

/// A request queued by [`AuditTrail::add_entry`] for the background worker
/// to commit.
struct PendingEntry {
    event_type: String,
    event_data: Value,
    subject_context: Option<Value>,
}

fn system_context() -> Value {
    serde_json::json!({
        "pid": std::process::id(),
        "hostname": hostname(),
    })
}

fn hostname() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_owned())
}

/// Compute the canonical (deterministic, sorted-key) hash input for an entry
/// and return its SHA-256 hex digest.
fn entry_hash(
    id: &uuid::Uuid,
    sequence_number: u64,
    timestamp: &chrono::DateTime<chrono::Utc>,
    event_type: &str,
    event_data: &Value,
    subject_context: &Option<Value>,
    system_context: &Value,
    previous_hash: &str,
) -> String {
    use sha2::{Digest, Sha256};

    // BTreeMap gives deterministic key ordering regardless of insertion
    // order, so the same logical entry always hashes identically.
    let mut canonical = std::collections::BTreeMap::new();
    canonical.insert("id", serde_json::json!(id));
    canonical.insert("sequence_number", serde_json::json!(sequence_number));
    canonical.insert("timestamp", serde_json::json!(timestamp));
    canonical.insert("type", serde_json::json!(event_type));
    canonical.insert("data", event_data.clone());
    canonical.insert("subject", serde_json::json!(subject_context));
    canonical.insert("system_ctx", system_context.clone());
    canonical.insert("previous_hash", serde_json::json!(previous_hash));

    #[allow(clippy::unwrap_used)]
    let bytes = serde_json::to_vec(&canonical).unwrap();
    hex::encode(Sha256::digest(bytes))
}

async fn read_state(path: &Path) -> Option<AuditState> {
    let bytes = fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// Write `state` atomically via temp-file + rename (spec §6).
async fn write_state(path: &Path, state: &AuditState) -> Result<(), AuditTrailError> {
    let tmp = path.with_extension("tmp");
    let bytes = serde_json::to_vec_pretty(state).map_err(|e| AuditTrailError::Serialization {
        reason: e.to_string(),
    })?;
    fs::write(&tmp, &bytes)
        .await
        .map_err(|e| AuditTrailError::State {
            reason: format!("failed to write temp state file: {e}"),
        })?;
    fs::rename(&tmp, path)
        .await
        .map_err(|e| AuditTrailError::State {
            reason: format!("failed to rename temp state file: {e}"),
        })?;
    Ok(())
}

/// Scan the row store end-to-end and return `(last_sequence, last_hash,
/// total_count)`, rebuilding state after a crash where the sidecar is
/// missing or inconsistent with the row store.
async fn scan_row_store(path: &Path) -> Result<(u64, String, u64), AuditTrailError> {
    let Ok(file) = fs::File::open(path).await else {
        return Ok((0, String::new(), 0));
    };
    let mut reader = BufReader::new(file).lines();
    let (mut last_seq, mut last_hash, mut count) = (0u64, String::new(), 0u64);
    while let Some(line) = reader
        .next_line()
        .await
        .map_err(|e| AuditTrailError::RowStore {
            reason: format!("failed reading row store: {e}"),
        })?
    {
        if line.trim().is_empty() {
            continue;
        }
        let entry: AuditEntry =
            serde_json::from_str(&line).map_err(|e| AuditTrailError::RowStore {
                reason: format!("corrupt row at offset {count}: {e}"),
            })?;
        last_seq = entry.sequence_number;
        last_hash = entry.entry_hash;
        count += 1;
    }
    Ok((last_seq, last_hash, count))
}

/// The append-only hash-chained audit log.
pub struct AuditTrail {
    row_store_path: PathBuf,
    state_path: PathBuf,
    backup_dir: PathBuf,
    barrier: Arc<Barrier>,
    backup_interval: std::time::Duration,

    sender: mpsc::UnboundedSender<PendingEntry>,
    receiver: Mutex<Option<mpsc::UnboundedReceiver<PendingEntry>>>,
    shutdown: Arc<Notify>,
    worker: Mutex<Option<JoinHandle<()>>>,
    backup_worker: Mutex<Option<JoinHandle<()>>>,

    /// Cached tail sequence for cheap reads between commits; the worker is
    /// the sole mutator of durable state, this is an observational mirror.
    last_sequence: Arc<AtomicU64>,
}

impl AuditTrail {
    /// Construct a new audit trail rooted at `row_store_path`/`state_path`,
    /// with backups written under `backup_dir` every `backup_interval`.
    ///
    /// Does not start background workers; call [`AuditTrail::start`] after
    /// construction (and after the vault has been unsealed, since commits
    /// sign entries via the barrier).
    #[must_use]
    pub fn new(
        row_store_path: impl Into<PathBuf>,
        state_path: impl Into<PathBuf>,
        backup_dir: impl Into<PathBuf>,
        barrier: Arc<Barrier>,
        backup_interval: std::time::Duration,
    ) -> Self {
        let (sender, receiver) = mpsc::unbounded_channel();
        Self {
            row_store_path: row_store_path.into(),
            state_path: state_path.into(),
            backup_dir: backup_dir.into(),
            barrier,
            backup_interval,
            sender,
            receiver: Mutex::new(Some(receiver)),
            shutdown: Arc::new(Notify::new()),
            worker: Mutex::new(None),
            backup_worker: Mutex::new(None),
            last_sequence: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Load persisted state, reconciling it against the row store on a
    /// crash-recovery path (spec §4.8 "Crash recovery"), and start the
    /// commit worker and backup timer.
    ///
    /// # Errors
    ///
    /// Returns [`AuditTrailError`] if the row store cannot be scanned.
    #[instrument(skip(self))]
    pub async fn start(&self) -> Result<(), AuditTrailError> {
        let (scanned_seq, scanned_hash, scanned_count) =
            scan_row_store(&self.row_store_path).await?;

        let state = match read_state(&self.state_path).await {
            Some(state) if state.last_sequence_number == scanned_seq => state,
            Some(mut stale) => {
                warn!(
                    state_seq = stale.last_sequence_number,
                    row_store_seq = scanned_seq,
                    "audit state sidecar inconsistent with row store, reconstructing"
                );
                stale.last_sequence_number = scanned_seq;
                stale.last_entry_hash = scanned_hash;
                stale.total_entries = scanned_count;
                stale.integrity_check_passed = true;
                stale
            }
            None if scanned_count > 0 => {
                info!(
                    sequence = scanned_seq,
                    "audit state missing, reconstructed from row store"
                );
                let mut fresh = AuditState::genesis();
                fresh.last_sequence_number = scanned_seq;
                fresh.last_entry_hash = scanned_hash;
                fresh.total_entries = scanned_count;
                fresh
            }
            None => AuditState::genesis(),
        };

        self.last_sequence
            .store(state.last_sequence_number, Ordering::SeqCst);
        write_state(&self.state_path, &state).await?;

        let mut receiver_guard = self.receiver.lock().await;
        let Some(receiver) = receiver_guard.take() else {
            return Ok(()); // already started
        };
        drop(receiver_guard);

        let worker_handle = tokio::spawn(Self::commit_loop(
            receiver,
            self.row_store_path.clone(),
            self.state_path.clone(),
            Arc::clone(&self.barrier),
            state,
            Arc::clone(&self.shutdown),
            Arc::clone(&self.last_sequence),
        ));
        *self.worker.lock().await = Some(worker_handle);

        let backup_handle = tokio::spawn(Self::backup_loop(
            self.row_store_path.clone(),
            self.state_path.clone(),
            self.backup_dir.clone(),
            self.backup_interval,
            Arc::clone(&self.shutdown),
        ));
        *self.backup_worker.lock().await = Some(backup_handle);

        Ok(())
    }

    /// Enqueue an audit event. Non-blocking for the caller; the actual
    /// commit (sequencing, hashing, signing, persistence) happens on the
    /// background worker. Enqueue order from a single caller matches commit
    /// order (spec §5).
    ///
    /// # Errors
    ///
    /// Returns [`AuditError::AllBackendsFailed`] only if the worker task has
    /// already terminated (the channel is closed) — callers should treat
    /// this as the "audit record" itself having failed, per spec §7's
    /// propagation policy for secure-wrapper events.
    pub fn add_entry(
        &self,
        event_type: impl Into<String>,
        event_data: Value,
        subject_context: Option<Value>,
    ) -> Result<(), AuditError> {
        self.sender
            .send(PendingEntry {
                event_type: event_type.into(),
                event_data,
                subject_context,
            })
            .map_err(|_| AuditError::AllBackendsFailed)
    }

    /// The last committed sequence number, observationally (the true
    /// source of truth is the state file, mutated only by the worker).
    #[must_use]
    pub fn last_sequence(&self) -> u64 {
        self.last_sequence.load(Ordering::SeqCst)
    }

    /// Signal shutdown, wait for the commit worker to drain its queue, take
    /// a final backup, and stop the backup timer.
    pub async fn shutdown(&self) {
        drop(self.sender.clone()); // does not close the channel by itself
        self.shutdown.notify_waiters();

        if let Some(handle) = self.worker.lock().await.take() {
            let _ = handle.await;
        }

        // Final backup attempt per spec §4.8.
        if let Err(e) = Self::run_backup(&self.row_store_path, &self.state_path, &self.backup_dir)
            .await
        {
            error!(error = %e, "final audit backup failed during shutdown");
        }

        if let Some(handle) = self.backup_worker.lock().await.take() {
            handle.abort();
        }
    }

    /// Verify hash-chain continuity and signatures over `[from..=to]`
    /// (inclusive), recomputing each row's hash and checking it against the
    /// previous row's recorded hash (spec §4.8).
    ///
    /// # Errors
    ///
    /// Returns [`AuditTrailError::RowStore`] if the row store cannot be read.
    pub async fn verify_integrity(
        &self,
        from: u64,
        to: u64,
    ) -> Result<IntegrityReport, AuditTrailError> {
        let file = fs::File::open(&self.row_store_path)
            .await
            .map_err(|e| AuditTrailError::RowStore {
                reason: format!("failed to open row store: {e}"),
            })?;
        let mut lines = BufReader::new(file).lines();

        let mut report = IntegrityReport {
            scanned: 0,
            chain_breaks: 0,
            hash_mismatches: 0,
            signature_failures: 0,
            passed: true,
            failed_sequences: Vec::new(),
        };
        let mut prior_hash: Option<String> = None;

        while let Some(line) = lines
            .next_line()
            .await
            .map_err(|e| AuditTrailError::RowStore {
                reason: format!("failed reading row store: {e}"),
            })?
        {
            if line.trim().is_empty() {
                continue;
            }
            let entry: AuditEntry = match serde_json::from_str(&line) {
                Ok(e) => e,
                Err(_) => {
                    report.hash_mismatches += 1;
                    report.passed = false;
                    continue;
                }
            };
            if entry.sequence_number < from {
                prior_hash = Some(entry.entry_hash);
                continue;
            }
            if entry.sequence_number > to {
                break;
            }
            report.scanned += 1;

            let recomputed = entry_hash(
                &entry.id,
                entry.sequence_number,
                &entry.timestamp,
                &entry.event_type,
                &entry.event_data,
                &entry.subject_context,
                &entry.system_context,
                &entry.previous_hash,
            );
            if recomputed != entry.entry_hash {
                report.hash_mismatches += 1;
                report.passed = false;
                report.failed_sequences.push(entry.sequence_number);
            }

            if let Some(prev) = &prior_hash {
                if *prev != entry.previous_hash {
                    report.chain_breaks += 1;
                    report.passed = false;
                    if !report.failed_sequences.contains(&entry.sequence_number) {
                        report.failed_sequences.push(entry.sequence_number);
                    }
                }
            }

            match self
                .barrier
                .verify_hmac(entry.entry_hash.as_bytes(), &decode_sig(&entry.signature))
                .await
            {
                Ok(true) => {}
                Ok(false) | Err(_) => {
                    report.signature_failures += 1;
                    report.passed = false;
                }
            }

            prior_hash = Some(entry.entry_hash.clone());
        }

        Ok(report)
    }

    /// Take an immediate backup regardless of the periodic timer.
    ///
    /// # Errors
    ///
    /// Returns [`AuditTrailError`] if the row store or state file cannot be
    /// copied.
    pub async fn backup_now(&self) -> Result<PathBuf, AuditTrailError> {
        Self::run_backup(&self.row_store_path, &self.state_path, &self.backup_dir).await
    }

    #[instrument(skip(receiver, barrier, shutdown, last_sequence))]
    async fn commit_loop(
        mut receiver: mpsc::UnboundedReceiver<PendingEntry>,
        row_store_path: PathBuf,
        state_path: PathBuf,
        barrier: Arc<Barrier>,
        mut state: AuditState,
        shutdown: Arc<Notify>,
        last_sequence: Arc<AtomicU64>,
    ) {
        loop {
            let pending = tokio::select! {
                biased;
                pending = receiver.recv() => pending,
                () = shutdown.notified() => {
                    receiver.close();
                    receiver.recv().await
                }
            };
            let Some(pending) = pending else {
                break;
            };

            if let Err(e) = Self::commit_one(
                pending,
                &row_store_path,
                &state_path,
                &barrier,
                &mut state,
                &last_sequence,
            )
            .await
            {
                // Audit-worker errors never surface to data-plane callers
                // (spec §7); log and keep draining so one bad entry does not
                // wedge the engine.
                error!(error = %e, "audit commit failed, backing off");
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
            }
        }
    }

    async fn commit_one(
        pending: PendingEntry,
        row_store_path: &Path,
        state_path: &Path,
        barrier: &Barrier,
        state: &mut AuditState,
        last_sequence: &AtomicU64,
    ) -> Result<(), AuditTrailError> {
        let sequence_number = state.last_sequence_number + 1;
        debug_assert!(sequence_number >= FIRST_SEQUENCE);
        let id = uuid::Uuid::new_v4();
        let timestamp = chrono::Utc::now();
        let system_ctx = system_context();
        let previous_hash = state.last_entry_hash.clone();

        let hash = entry_hash(
            &id,
            sequence_number,
            &timestamp,
            &pending.event_type,
            &pending.event_data,
            &pending.subject_context,
            &system_ctx,
            &previous_hash,
        );
        let signature = barrier.hmac(hash.as_bytes()).await.map_err(|e| {
            AuditTrailError::Barrier(e)
        })?;

        let entry = AuditEntry {
            id,
            sequence_number,
            timestamp,
            event_type: pending.event_type,
            event_data: pending.event_data,
            subject_context: pending.subject_context,
            system_context: system_ctx,
            previous_hash,
            entry_hash: hash.clone(),
            signature: encode_sig(&signature),
            created_at: chrono::Utc::now(),
        };

        append_row(row_store_path, &entry).await?;

        state.last_sequence_number = sequence_number;
        state.last_entry_hash = hash.clone();
        state.total_entries += 1;
        last_sequence.store(sequence_number, Ordering::SeqCst);

        if sequence_number % CHECKPOINT_INTERVAL == 0 {
            state.recovery_checkpoints.push(RecoveryCheckpoint {
                sequence_number,
                entry_hash: hash,
                created_at: chrono::Utc::now(),
            });
            let mut checkpoints: VecDeque<RecoveryCheckpoint> =
                state.recovery_checkpoints.drain(..).collect();
            while checkpoints.len() > MAX_RETAINED_CHECKPOINTS {
                checkpoints.pop_front();
            }
            state.recovery_checkpoints = checkpoints.into_iter().collect();
        }

        write_state(state_path, state).await
    }

    async fn backup_loop(
        row_store_path: PathBuf,
        state_path: PathBuf,
        backup_dir: PathBuf,
        interval: std::time::Duration,
        shutdown: Arc<Notify>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = Self::run_backup(&row_store_path, &state_path, &backup_dir).await {
                        error!(error = %e, "periodic audit backup failed");
                    }
                }
                () = shutdown.notified() => break,
            }
        }
    }

    async fn run_backup(
        row_store_path: &Path,
        state_path: &Path,
        backup_dir: &Path,
    ) -> Result<PathBuf, AuditTrailError> {
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let dest = backup_dir.join(format!("audit_backup_{stamp}"));
        fs::create_dir_all(&dest)
            .await
            .map_err(|e| AuditTrailError::RowStore {
                reason: format!("failed to create backup dir: {e}"),
            })?;

        let mut total_entries = 0u64;
        let mut last_sequence = 0u64;
        if fs::metadata(row_store_path).await.is_ok() {
            fs::copy(row_store_path, dest.join("rows.jsonl"))
                .await
                .map_err(|e| AuditTrailError::RowStore {
                    reason: format!("failed to copy row store: {e}"),
                })?;
            let (seq, _hash, count) = scan_row_store(row_store_path).await?;
            total_entries = count;
            last_sequence = seq;
        }
        if let Some(state) = read_state(state_path).await {
            let bytes =
                serde_json::to_vec_pretty(&state).map_err(|e| AuditTrailError::Serialization {
                    reason: e.to_string(),
                })?;
            fs::write(dest.join("state.json"), bytes)
                .await
                .map_err(|e| AuditTrailError::State {
                    reason: format!("failed to copy state file: {e}"),
                })?;
        }

        let manifest = serde_json::json!({
            "timestamp": chrono::Utc::now(),
            "total_entries": total_entries,
            "last_sequence_number": last_sequence,
        });
        fs::write(
            dest.join("manifest.json"),
            serde_json::to_vec_pretty(&manifest).unwrap_or_default(),
        )
        .await
        .map_err(|e| AuditTrailError::RowStore {
            reason: format!("failed to write manifest: {e}"),
        })?;

        info!(path = %dest.display(), "audit backup created");
        Ok(dest)
    }
}

async fn append_row(path: &Path, entry: &AuditEntry) -> Result<(), AuditTrailError> {
    let mut line =
        serde_json::to_vec(entry).map_err(|e| AuditTrailError::Serialization {
            reason: e.to_string(),
        })?;
    line.push(b'\n');

    if let Some(parent) = path.parent() {
        let _ = fs::create_dir_all(parent).await;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .await
        .map_err(|e| AuditTrailError::RowStore {
            reason: format!("failed to open row store: {e}"),
        })?;
    file.write_all(&line)
        .await
        .map_err(|e| AuditTrailError::RowStore {
            reason: format!("append failed: {e}"),
        })?;
    file.flush().await.map_err(|e| AuditTrailError::RowStore {
        reason: format!("flush failed: {e}"),
    })?;
    Ok(())
}

fn encode_sig(bytes: &[u8]) -> String {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn decode_sig(s: &str) -> Vec<u8> {
    use base64::Engine;
    base64::engine::general_purpose::STANDARD
        .decode(s)
        .unwrap_or_default()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use databridge_storage::MemoryBackend;

    async fn make_trail(dir: &Path) -> AuditTrail {
        let storage = Arc::new(MemoryBackend::new());
        let barrier = Arc::new(Barrier::new(storage));
        barrier.unseal(crate::crypto::EncryptionKey::generate()).await;
        let trail = AuditTrail::new(
            dir.join("rows.jsonl"),
            dir.join("state.json"),
            dir.join("backups"),
            barrier,
            std::time::Duration::from_secs(3600),
        );
        trail.start().await.unwrap();
        trail
    }

    #[tokio::test]
    async fn sequence_numbers_are_contiguous_from_one() {
        let dir = tempdir();
        let trail = make_trail(dir.path()).await;

        for i in 0..5 {
            trail
                .add_entry("query_executed", serde_json::json!({"n": i}), None)
                .unwrap();
        }
        // Let the worker drain.
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;
        assert_eq!(trail.last_sequence(), 5);

        let report = trail.verify_integrity(1, 5).await.unwrap();
        assert!(report.passed);
        assert_eq!(report.scanned, 5);
        assert_eq!(report.chain_breaks, 0);
    }

    #[tokio::test]
    async fn tampering_with_a_row_breaks_the_chain() {
        let dir = tempdir();
        let trail = make_trail(dir.path()).await;

        for i in 0..5 {
            trail
                .add_entry("query_executed", serde_json::json!({"n": i}), None)
                .unwrap();
        }
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let row_path = dir.path().join("rows.jsonl");
        let content = fs::read_to_string(&row_path).await.unwrap();
        let mut lines: Vec<String> = content.lines().map(String::from).collect();
        let mut entry: AuditEntry = serde_json::from_str(&lines[2]).unwrap();
        entry.event_data = serde_json::json!({"tampered": true});
        lines[2] = serde_json::to_string(&entry).unwrap();
        fs::write(&row_path, lines.join("\n") + "\n").await.unwrap();

        let report = trail.verify_integrity(1, 5).await.unwrap();
        assert!(!report.passed);
        assert!(report.hash_mismatches >= 1);
        assert!(report.chain_breaks >= 1);
    }

    fn tempdir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }
}
