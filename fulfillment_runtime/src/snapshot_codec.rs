//! Snapshot codec: `LedgerState` to and from JSON.
//!
//! Pure codec layer. No side-effects, no timestamps, no envelope.
//!
//! - `encode_state`:  LedgerState → JSON string
//! - `decode_state`:  JSON string → LedgerState (strict, no defaults)
//! - `restore_state`: decode + invariant validation against a catalog

use std::io;

use thiserror::Error;

use fulfillment_kernel::catalog::StageCatalog;
use fulfillment_kernel::domain::LedgerState;
use fulfillment_kernel::invariants::{validate_state, InvariantViolation};

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error("snapshot serialization failed: {0}")]
    Serialization(#[source] serde_json::Error),

    /// Malformed JSON, missing fields or unknown fields.
    #[error("snapshot deserialization failed: {0}")]
    Deserialization(#[source] serde_json::Error),

    #[error("snapshot state is invalid: {0}")]
    Invariant(#[from] InvariantViolation),

    #[error("snapshot was written by kernel v{found}, this is v{expected}")]
    KernelVersion { expected: u32, found: u32 },

    #[error("snapshot was taken under catalog {found}, current catalog is {expected}")]
    CatalogMismatch { expected: String, found: String },

    #[error("snapshot hash mismatch: recorded {recorded}, computed {computed}")]
    HashMismatch { recorded: String, computed: String },

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] io::Error),
}

/// Encode a state. Orders are keyed by a `BTreeMap`, so identical states
/// encode to identical bytes.
pub fn encode_state(state: &LedgerState) -> Result<String, SnapshotError> {
    serde_json::to_string(state).map_err(SnapshotError::Serialization)
}

/// Strict decode. No invariant validation; use `restore_state` for
/// anything read from disk.
pub fn decode_state(json: &str) -> Result<LedgerState, SnapshotError> {
    serde_json::from_str::<LedgerState>(json).map_err(SnapshotError::Deserialization)
}

/// Decode and validate against `catalog`.
pub fn restore_state(catalog: &StageCatalog, json: &str) -> Result<LedgerState, SnapshotError> {
    let state = decode_state(json)?;
    validate_state(catalog, &state)?;
    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use fulfillment_kernel::domain::OrderLedger;
    use fulfillment_kernel::events::StageEventInput;

    fn make_test_state() -> LedgerState {
        let mut ledger = OrderLedger::new("FTO-2024-001");
        ledger.events.push(
            StageEventInput::new(
                "FTO-2024-001",
                "sowing",
                Utc.with_ymd_and_hms(2024, 6, 1, 6, 0, 0).unwrap(),
            )
            .with_location("North Field")
            .into_event(),
        );
        ledger.events.push(
            StageEventInput::new(
                "FTO-2024-001",
                "growing",
                Utc.with_ymd_and_hms(2024, 6, 20, 6, 0, 0).unwrap(),
            )
            .with_photo_refs(["sprouts.jpg"])
            .into_event(),
        );
        let mut state = LedgerState::default();
        state.orders.insert(ledger.order_id.clone(), ledger);
        state
    }

    #[test]
    fn roundtrip_produces_identical_json() {
        let state = make_test_state();
        let json1 = encode_state(&state).unwrap();
        let decoded = decode_state(&json1).unwrap();
        let json2 = encode_state(&decoded).unwrap();
        assert_eq!(json1, json2);
    }

    #[test]
    fn regression_in_snapshot_is_an_invariant_violation() {
        let mut state = make_test_state();
        state
            .orders
            .get_mut("FTO-2024-001")
            .unwrap()
            .events
            .reverse();
        let json = encode_state(&state).unwrap();
        assert!(matches!(
            restore_state(&StageCatalog::reference(), &json),
            Err(SnapshotError::Invariant(_))
        ));
    }

    #[test]
    fn malformed_json_returns_deserialization_error() {
        assert!(matches!(
            restore_state(&StageCatalog::reference(), "{ not valid json !!!}"),
            Err(SnapshotError::Deserialization(_))
        ));
    }

    #[test]
    fn unknown_field_rejected() {
        let json = r#"{"orders":{},"extra":1}"#;
        assert!(matches!(
            decode_state(json),
            Err(SnapshotError::Deserialization(_))
        ));
    }
}
