//! Replay: rebuild ledger state from the event log.
//!
//! Every record goes back through the kernel's append path. A log written
//! by the ledger only ever contains accepted, non-duplicate events, so a
//! rejection or a duplicate during replay means the log is corrupt.

use std::sync::Arc;

use thiserror::Error;

use fulfillment_kernel::catalog::StageCatalog;
use fulfillment_kernel::domain::{EventId, LedgerState};
use fulfillment_kernel::engine::TrackingEngine;
use fulfillment_kernel::events::StageEventInput;
use fulfillment_kernel::invariants::InvariantViolation;
use fulfillment_kernel::transitions::{AppendOutcome, RejectionReason};

use crate::proto_bridge::{proto_to_event, BridgeError};
use crate::proto_types::ProtoStageEvent;

#[derive(Debug, Error)]
pub enum ReplayError {
    #[error(transparent)]
    Bridge(#[from] BridgeError),

    #[error("record {sequence} rejected on replay: {reason}")]
    Rejected {
        sequence: u64,
        #[source]
        reason: RejectionReason,
    },

    #[error("record {sequence} repeats event {event_id}")]
    Duplicate { sequence: u64, event_id: EventId },

    #[error("base state is invalid: {0}")]
    Invariant(#[from] InvariantViolation),
}

/// Apply every record with `sequence > after` to `engine`. Returns how many
/// were applied.
pub fn apply_records(
    engine: &mut TrackingEngine,
    records: &[ProtoStageEvent],
    after: u64,
) -> Result<usize, ReplayError> {
    let mut applied = 0;
    for record in records.iter().filter(|r| r.sequence > after) {
        let event = proto_to_event(record)?;
        match engine.append(&StageEventInput::from(&event)) {
            Ok(AppendOutcome::Appended { .. }) => applied += 1,
            Ok(AppendOutcome::Duplicate { event_id }) => {
                return Err(ReplayError::Duplicate {
                    sequence: record.sequence,
                    event_id,
                })
            }
            Err(reason) => {
                return Err(ReplayError::Rejected {
                    sequence: record.sequence,
                    reason,
                })
            }
        }
    }
    Ok(applied)
}

/// Rebuild from an empty ledger. Returns `(state, canonical_hash)`.
pub fn rebuild_state(
    catalog: Arc<StageCatalog>,
    records: &[ProtoStageEvent],
) -> Result<(LedgerState, String), ReplayError> {
    let mut engine = TrackingEngine::new(catalog);
    apply_records(&mut engine, records, 0)?;
    let hash = engine.current_hash();
    Ok((engine.into_state(), hash))
}

/// Rebuild from `base` (a snapshot taken at sequence `after`) plus the
/// records that follow it.
pub fn rebuild_from(
    catalog: Arc<StageCatalog>,
    base: LedgerState,
    after: u64,
    records: &[ProtoStageEvent],
) -> Result<(LedgerState, String), ReplayError> {
    let mut engine = TrackingEngine::restore(catalog, base)?;
    apply_records(&mut engine, records, after)?;
    let hash = engine.current_hash();
    Ok((engine.into_state(), hash))
}

pub fn rebuild_hash(
    catalog: Arc<StageCatalog>,
    records: &[ProtoStageEvent],
) -> Result<String, ReplayError> {
    rebuild_state(catalog, records).map(|(_, hash)| hash)
}
