//! Tracking session: a ledger bound to a data directory.
//!
//! Directory structure:
//!   <data_dir>/events.log
//!   <data_dir>/snapshots/snapshot_NNNNNN.json
//!
//! Journal-before-commit order (inside the ledger's per-order lock):
//!   1. kernel validation
//!   2. event log append + fsync
//!   3. in-memory insert, then notify
//!
//! Snapshots are taken after an append once `snapshot_interval` records
//! have accumulated since the last one.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info, warn};

use fulfillment_kernel::catalog::StageCatalog;
use fulfillment_kernel::domain::LedgerState;
use fulfillment_kernel::events::StageEventInput;
use fulfillment_kernel::hashing::canonical_hash;
use fulfillment_kernel::invariants::InvariantViolation;
use fulfillment_kernel::transitions::AppendOutcome;

use crate::drift::{compare_states, verify_determinism, DriftError, DriftReport};
use crate::event_store::FileJournal;
use crate::ledger::{Journal, LedgerError, StageLedger};
use crate::notifier::Notifier;
use crate::proto_types::ProtoStageEvent;
use crate::replay::{self, ReplayError};
use crate::snapshot::{self, restore_from_snapshot};
use crate::snapshot_codec::SnapshotError;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("event log I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error(transparent)]
    Snapshot(#[from] SnapshotError),

    #[error(transparent)]
    Drift(#[from] DriftError),

    #[error("recovered state is invalid: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// Result of `TrackingSession::verify`.
#[derive(Debug, Clone, Serialize)]
pub struct Verification {
    /// Hash of a full replay of the log.
    pub replay_hash: String,
    /// Sequence of the snapshot used. `None` when there is none or it
    /// could not be used; `open` replays the full log in both cases.
    pub snapshot_sequence: Option<u64>,
    /// Snapshot + tail replay against full replay.
    pub snapshot_drift: Option<DriftReport>,
    /// Live ledger against full replay.
    pub live_drift: DriftReport,
}

impl Verification {
    pub fn is_clean(&self) -> bool {
        self.live_drift.is_clean()
            && self.snapshot_drift.as_ref().map_or(true, DriftReport::is_clean)
    }
}

pub struct TrackingSession {
    data_dir: PathBuf,
    catalog: Arc<StageCatalog>,
    journal: Arc<FileJournal>,
    ledger: StageLedger,
    snapshot_interval: u64,
    last_snapshot: AtomicU64,
}

/// Latest snapshot plus the log tail after it, as `(sequence, state)`.
/// `None` when there is no snapshot or it cannot be used: unreadable,
/// ahead of the log, failing its checks, or disagreeing with the tail.
fn recover_from_snapshot(
    snap_dir: &Path,
    catalog: &Arc<StageCatalog>,
    records: &[ProtoStageEvent],
) -> Option<(u64, LedgerState)> {
    let snap = match snapshot::load_latest_snapshot(snap_dir) {
        Ok(Some(snap)) => snap,
        Ok(None) => return None,
        Err(e) => {
            warn!(error = %e, "snapshot unreadable, replaying full log");
            return None;
        }
    };

    let last_sequence = records.last().map_or(0, |r| r.sequence);
    if snap.sequence > last_sequence {
        warn!(
            sequence = snap.sequence,
            log_sequence = last_sequence,
            "snapshot is ahead of the event log, replaying full log"
        );
        return None;
    }

    let base = match restore_from_snapshot(&snap, catalog) {
        Ok(base) => base,
        Err(e) => {
            warn!(sequence = snap.sequence, error = %e, "snapshot unusable, replaying full log");
            return None;
        }
    };

    match replay::rebuild_from(Arc::clone(catalog), base, snap.sequence, records) {
        Ok((state, _)) => Some((snap.sequence, state)),
        Err(e) => {
            warn!(
                sequence = snap.sequence,
                error = %e,
                "log tail does not apply to snapshot, replaying full log"
            );
            None
        }
    }
}

impl TrackingSession {
    /// Open `data_dir`, recovering from the latest usable snapshot plus the
    /// log tail, or from the full log when there is none.
    pub fn open(
        data_dir: &Path,
        catalog: Arc<StageCatalog>,
        notifier: Arc<dyn Notifier>,
        snapshot_interval: u64,
    ) -> Result<Self, SessionError> {
        let journal = Arc::new(FileJournal::open(&data_dir.join("events.log"))?);
        let records = journal.load_all()?;
        let snap_dir = data_dir.join("snapshots");

        let (state, recovered_from) = match recover_from_snapshot(&snap_dir, &catalog, &records) {
            Some((sequence, state)) => (state, sequence),
            None => (replay::rebuild_state(Arc::clone(&catalog), &records)?.0, 0),
        };

        info!(
            data_dir = %data_dir.display(),
            records = records.len(),
            snapshot = recovered_from,
            orders = state.order_ids().len(),
            "tracking session opened"
        );

        let ledger = StageLedger::from_state(Arc::clone(&catalog), state, notifier)?
            .with_journal(journal.clone());

        Ok(Self {
            data_dir: data_dir.to_path_buf(),
            catalog,
            journal,
            ledger,
            snapshot_interval,
            last_snapshot: AtomicU64::new(recovered_from),
        })
    }

    pub fn ledger(&self) -> &StageLedger {
        &self.ledger
    }

    pub fn catalog(&self) -> &Arc<StageCatalog> {
        &self.catalog
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn snapshot_dir(&self) -> PathBuf {
        self.data_dir.join("snapshots")
    }

    /// Append through the ledger, then snapshot if the interval is reached.
    /// A failed automatic snapshot is logged; the append already stands.
    pub fn append(&self, input: &StageEventInput) -> Result<AppendOutcome, LedgerError> {
        let outcome = self.ledger.append(input)?;

        if self.snapshot_interval > 0 && !outcome.is_duplicate() {
            let position = self.journal_position();
            let last = self.last_snapshot.load(Ordering::SeqCst);
            if position >= last + self.snapshot_interval
                && self
                    .last_snapshot
                    .compare_exchange(last, position, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok()
            {
                if let Err(e) = self.take_snapshot() {
                    warn!(error = %e, "automatic snapshot failed");
                }
            }
        }

        Ok(outcome)
    }

    /// Write a snapshot of the current ledger. Returns its path.
    pub fn take_snapshot(&self) -> Result<PathBuf, SessionError> {
        let export = self.ledger.export();
        let path = snapshot::save_snapshot(
            &self.snapshot_dir(),
            export.journal_position,
            &self.catalog,
            &export.state,
        )?;
        self.last_snapshot
            .fetch_max(export.journal_position, Ordering::SeqCst);
        debug!(sequence = export.journal_position, path = %path.display(), "snapshot written");
        Ok(path)
    }

    /// Rebuild from the whole log. Returns `(state, canonical_hash)`.
    pub fn replay_full(&self) -> Result<(LedgerState, String), SessionError> {
        let records = self.journal.load_all()?;
        Ok(replay::rebuild_state(Arc::clone(&self.catalog), &records)?)
    }

    /// Compare the live ledger and the latest snapshot (plus tail) against
    /// a full, twice-run replay of the log.
    pub fn verify(&self) -> Result<Verification, SessionError> {
        let records = self.journal.load_all()?;
        let replay_hash = verify_determinism(&self.catalog, &records)?;
        let (replayed, _) = replay::rebuild_state(Arc::clone(&self.catalog), &records)?;

        let live = self.ledger.export().state;
        let live_drift = compare_states(&self.catalog, &replayed, &live);

        let (snapshot_sequence, snapshot_drift) =
            match recover_from_snapshot(&self.snapshot_dir(), &self.catalog, &records) {
                Some((sequence, rebuilt)) => (
                    Some(sequence),
                    Some(compare_states(&self.catalog, &replayed, &rebuilt)),
                ),
                None => (None, None),
            };

        Ok(Verification {
            replay_hash,
            snapshot_sequence,
            snapshot_drift,
            live_drift,
        })
    }

    pub fn current_hash(&self) -> String {
        canonical_hash(&self.ledger.export().state)
    }

    pub fn journal_position(&self) -> u64 {
        self.journal.position()
    }
}
