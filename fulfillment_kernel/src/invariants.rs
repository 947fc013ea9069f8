//! Ledger invariant checks.
//!
//! Appends cannot violate these; the checks exist for state that arrives
//! from outside the append path (snapshots, replayed logs, a catalog that
//! changed between runs). Returns the first violation found.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::arithmetic::is_valid_token;
use crate::catalog::StageCatalog;
use crate::domain::{EventId, LedgerState, OrderLedger};
use crate::events::event_id_for;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("[INVARIANT:order_id_format] order id {0:?} must match [a-zA-Z0-9_-]+")]
    InvalidOrderId(String),

    #[error("[INVARIANT:order_key] ledger stored under {key:?} belongs to order {order_id:?}")]
    MisfiledLedger { key: String, order_id: String },

    #[error("[INVARIANT:foreign_event] event {event_id} in ledger {order_id:?} belongs to another order")]
    ForeignEvent { order_id: String, event_id: EventId },

    #[error("[INVARIANT:known_stage] event {event_id} references unknown stage {stage_id:?}")]
    UnknownStage { event_id: EventId, stage_id: String },

    #[error("[INVARIANT:event_id] event {event_id} does not match its content hash")]
    EventIdMismatch { event_id: EventId },

    #[error("[INVARIANT:monotonic_time] event {event_id} in order {order_id:?} is older than its predecessor")]
    TimestampRegression { order_id: String, event_id: EventId },

    #[error("[INVARIANT:monotonic_stage] event {event_id} in order {order_id:?} regresses to an earlier stage")]
    StageRegression { order_id: String, event_id: EventId },

    #[error("[INVARIANT:unique_event] order {order_id:?} records stage {stage_id:?} at {occurred_at} twice")]
    DuplicateEvent {
        order_id: String,
        stage_id: String,
        occurred_at: DateTime<Utc>,
    },
}

/// Check every order ledger in `state`.
pub fn validate_state(catalog: &StageCatalog, state: &LedgerState) -> Result<(), InvariantViolation> {
    for (key, ledger) in &state.orders {
        if key != &ledger.order_id {
            return Err(InvariantViolation::MisfiledLedger {
                key: key.clone(),
                order_id: ledger.order_id.clone(),
            });
        }
        validate_order_ledger(catalog, ledger)?;
    }
    Ok(())
}

/// Check one order ledger.
pub fn validate_order_ledger(
    catalog: &StageCatalog,
    ledger: &OrderLedger,
) -> Result<(), InvariantViolation> {
    if !is_valid_token(&ledger.order_id) {
        return Err(InvariantViolation::InvalidOrderId(ledger.order_id.clone()));
    }

    let mut seen: BTreeSet<(&str, DateTime<Utc>)> = BTreeSet::new();
    let mut previous: Option<(DateTime<Utc>, usize)> = None;

    for event in &ledger.events {
        if event.order_id != ledger.order_id {
            return Err(InvariantViolation::ForeignEvent {
                order_id: ledger.order_id.clone(),
                event_id: event.event_id.clone(),
            });
        }

        let stage = catalog
            .stage_by_id(&event.stage_id)
            .ok_or_else(|| InvariantViolation::UnknownStage {
                event_id: event.event_id.clone(),
                stage_id: event.stage_id.clone(),
            })?;

        if event_id_for(&event.order_id, &event.stage_id, &event.occurred_at) != event.event_id {
            return Err(InvariantViolation::EventIdMismatch {
                event_id: event.event_id.clone(),
            });
        }

        if let Some((prev_at, prev_ordinal)) = previous {
            if event.occurred_at < prev_at {
                return Err(InvariantViolation::TimestampRegression {
                    order_id: ledger.order_id.clone(),
                    event_id: event.event_id.clone(),
                });
            }
            if stage.ordinal < prev_ordinal {
                return Err(InvariantViolation::StageRegression {
                    order_id: ledger.order_id.clone(),
                    event_id: event.event_id.clone(),
                });
            }
        }

        if !seen.insert((event.stage_id.as_str(), event.occurred_at)) {
            return Err(InvariantViolation::DuplicateEvent {
                order_id: ledger.order_id.clone(),
                stage_id: event.stage_id.clone(),
                occurred_at: event.occurred_at,
            });
        }

        previous = Some((event.occurred_at, stage.ordinal));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::StageEventInput;
    use chrono::TimeZone;

    fn at(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, 9, 0, 0).unwrap()
    }

    fn ledger_of(stages: &[(&str, u32)]) -> OrderLedger {
        let mut ledger = OrderLedger::new("FTO-2024-001");
        for (stage, day) in stages {
            ledger
                .events
                .push(StageEventInput::new("FTO-2024-001", stage, at(*day)).into_event());
        }
        ledger
    }

    #[test]
    fn well_formed_ledger_passes() {
        let catalog = StageCatalog::reference();
        let ledger = ledger_of(&[("sowing", 1), ("growing", 15), ("growing", 20)]);
        assert_eq!(validate_order_ledger(&catalog, &ledger), Ok(()));
    }

    #[test]
    fn stage_regression_detected() {
        let catalog = StageCatalog::reference();
        let ledger = ledger_of(&[("growing", 1), ("sowing", 2)]);
        assert!(matches!(
            validate_order_ledger(&catalog, &ledger),
            Err(InvariantViolation::StageRegression { .. })
        ));
    }

    #[test]
    fn timestamp_regression_detected() {
        let catalog = StageCatalog::reference();
        let ledger = ledger_of(&[("sowing", 5), ("growing", 2)]);
        assert!(matches!(
            validate_order_ledger(&catalog, &ledger),
            Err(InvariantViolation::TimestampRegression { .. })
        ));
    }

    #[test]
    fn duplicate_detected() {
        let catalog = StageCatalog::reference();
        let ledger = ledger_of(&[("sowing", 1), ("sowing", 1)]);
        assert!(matches!(
            validate_order_ledger(&catalog, &ledger),
            Err(InvariantViolation::DuplicateEvent { .. })
        ));
    }

    #[test]
    fn tampered_event_id_detected() {
        let catalog = StageCatalog::reference();
        let mut ledger = ledger_of(&[("sowing", 1)]);
        ledger.events[0].event_id = EventId("0".repeat(64));
        let err = validate_order_ledger(&catalog, &ledger).unwrap_err();
        assert!(err.to_string().contains("event_id"));
    }

    #[test]
    fn unknown_stage_detected_against_other_catalog() {
        let ledger = ledger_of(&[("sowing", 1), ("harvesting", 3)]);
        let short = StageCatalog::from_definitions(&[
            crate::catalog::StageDefinition::new("sowing", "Sowing", ""),
            crate::catalog::StageDefinition::new("delivered", "Delivered", ""),
        ])
        .unwrap();
        assert!(matches!(
            validate_order_ledger(&short, &ledger),
            Err(InvariantViolation::UnknownStage { .. })
        ));
    }

    #[test]
    fn misfiled_ledger_detected() {
        let catalog = StageCatalog::reference();
        let mut state = LedgerState::default();
        state
            .orders
            .insert("FTO-2024-999".to_string(), ledger_of(&[("sowing", 1)]));
        assert!(matches!(
            validate_state(&catalog, &state),
            Err(InvariantViolation::MisfiledLedger { .. })
        ));
    }
}
