//! Snapshot files: the ledger state at a log sequence.
//!
//! A snapshot carries the encoded state, its canonical hash, the kernel
//! version and the catalog fingerprint. No wall-clock timestamps are
//! written, so the same state at the same sequence yields the same file.
//!
//! If a snapshot fails any check on load, fall back to full replay.

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use fulfillment_kernel::catalog::StageCatalog;
use fulfillment_kernel::domain::LedgerState;
use fulfillment_kernel::hashing::canonical_hash;
use fulfillment_kernel::KERNEL_VERSION;

use crate::snapshot_codec::{encode_state, restore_state, SnapshotError};

/// Snapshot on-disk format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Snapshot {
    /// Last log sequence included in `state_json`.
    pub sequence: u64,
    pub kernel_version: u32,
    pub catalog_fingerprint: String,
    /// `snapshot_codec` encoding of the state.
    pub state_json: String,
    /// Kernel canonical hash of the state.
    pub hash: String,
}

fn snapshot_path(dir: &Path, sequence: u64) -> PathBuf {
    dir.join(format!("snapshot_{:06}.json", sequence))
}

pub fn save_snapshot(
    dir: &Path,
    sequence: u64,
    catalog: &StageCatalog,
    state: &LedgerState,
) -> Result<PathBuf, SnapshotError> {
    fs::create_dir_all(dir)?;

    let snap = Snapshot {
        sequence,
        kernel_version: KERNEL_VERSION,
        catalog_fingerprint: catalog.fingerprint(),
        state_json: encode_state(state)?,
        hash: canonical_hash(state),
    };

    let path = snapshot_path(dir, sequence);
    let content = serde_json::to_string(&snap).map_err(SnapshotError::Serialization)?;

    let mut file = File::create(&path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;

    Ok(path)
}

/// Snapshot at exactly `sequence`, if one exists.
pub fn load_snapshot(dir: &Path, sequence: u64) -> Result<Option<Snapshot>, SnapshotError> {
    let path = snapshot_path(dir, sequence);
    if !path.exists() {
        return Ok(None);
    }

    let content = fs::read_to_string(&path)?;
    let snap = serde_json::from_str(&content).map_err(SnapshotError::Deserialization)?;
    Ok(Some(snap))
}

/// Sequences of all snapshot files in `dir`, ascending.
pub fn list_snapshots(dir: &Path) -> io::Result<Vec<u64>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut sequences = Vec::new();
    for entry in fs::read_dir(dir)? {
        let name = entry?.file_name();
        let name = name.to_string_lossy();
        if let Some(seq) = name
            .strip_prefix("snapshot_")
            .and_then(|s| s.strip_suffix(".json"))
            .and_then(|s| s.parse::<u64>().ok())
        {
            sequences.push(seq);
        }
    }
    sequences.sort_unstable();
    Ok(sequences)
}

/// The snapshot with the highest sequence.
pub fn load_latest_snapshot(dir: &Path) -> Result<Option<Snapshot>, SnapshotError> {
    match list_snapshots(dir)?.last() {
        Some(&seq) => load_snapshot(dir, seq),
        None => Ok(None),
    }
}

/// Check version, catalog, invariants and hash, then hand back the state.
pub fn restore_from_snapshot(
    snap: &Snapshot,
    catalog: &StageCatalog,
) -> Result<LedgerState, SnapshotError> {
    if snap.kernel_version != KERNEL_VERSION {
        return Err(SnapshotError::KernelVersion {
            expected: KERNEL_VERSION,
            found: snap.kernel_version,
        });
    }

    let fingerprint = catalog.fingerprint();
    if snap.catalog_fingerprint != fingerprint {
        return Err(SnapshotError::CatalogMismatch {
            expected: fingerprint,
            found: snap.catalog_fingerprint.clone(),
        });
    }

    let state = restore_state(catalog, &snap.state_json)?;
    let computed = canonical_hash(&state);
    if computed != snap.hash {
        return Err(SnapshotError::HashMismatch {
            recorded: snap.hash.clone(),
            computed,
        });
    }
    Ok(state)
}
