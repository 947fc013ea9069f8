//! Append validation and ledger transitions.
//!
//! All ledger mutation logic lives here. Validation is split from the
//! commit so a caller holding a lock can validate, persist, then commit,
//! leaving the ledger untouched if anything in between fails.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::arithmetic::is_valid_token;
use crate::catalog::StageCatalog;
use crate::domain::{EventId, OrderLedger, StageAdvanced, StageEvent};
use crate::events::StageEventInput;

/// Why an append was refused. The ledger is unchanged in every case.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum RejectionReason {
    #[error("order id {order_id:?} is invalid: must match [a-zA-Z0-9_-]+")]
    InvalidOrderId { order_id: String },

    #[error("stage {stage_id:?} is not in the stage catalog")]
    UnknownStage { stage_id: String },

    #[error("event at {attempted} precedes the latest recorded event at {latest}")]
    OutOfOrderTimestamp {
        latest: DateTime<Utc>,
        attempted: DateTime<Utc>,
    },

    #[error(
        "stage {attempted:?} (ordinal {attempted_ordinal}) would regress from \
         current stage {current:?} (ordinal {current_ordinal})"
    )]
    StageRegression {
        current: String,
        current_ordinal: usize,
        attempted: String,
        attempted_ordinal: usize,
    },
}

/// What a validated append will do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendPlan {
    /// Same (order, stage, occurred_at) already recorded.
    Duplicate { event_id: EventId },
    /// Store `event`; `advanced` is set when the current stage changes.
    Insert {
        event: StageEvent,
        advanced: Option<StageAdvanced>,
    },
}

/// Result of an accepted append.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    Appended {
        event_id: EventId,
        advanced: Option<StageAdvanced>,
    },
    Duplicate {
        event_id: EventId,
    },
}

impl AppendOutcome {
    pub fn event_id(&self) -> &EventId {
        match self {
            AppendOutcome::Appended { event_id, .. } => event_id,
            AppendOutcome::Duplicate { event_id } => event_id,
        }
    }

    pub fn advanced(&self) -> Option<&StageAdvanced> {
        match self {
            AppendOutcome::Appended { advanced, .. } => advanced.as_ref(),
            AppendOutcome::Duplicate { .. } => None,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, AppendOutcome::Duplicate { .. })
    }
}

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Checks that need no ledger: a well-formed order id and a catalogued
/// stage. Returns the stage's ordinal.
pub fn check_references(
    catalog: &StageCatalog,
    input: &StageEventInput,
) -> Result<usize, RejectionReason> {
    if !is_valid_token(&input.order_id) {
        return Err(RejectionReason::InvalidOrderId {
            order_id: input.order_id.clone(),
        });
    }

    catalog
        .stage_by_id(&input.stage_id)
        .map(|s| s.ordinal)
        .ok_or_else(|| RejectionReason::UnknownStage {
            stage_id: input.stage_id.clone(),
        })
}

/// Validate `input` against the order's current ledger (`None` for a new
/// order). Pure: reads only.
pub fn plan_append(
    catalog: &StageCatalog,
    ledger: Option<&OrderLedger>,
    input: &StageEventInput,
) -> Result<AppendPlan, RejectionReason> {
    let ordinal = check_references(catalog, input)?;

    // Retried submissions resolve before ordering checks: a repeat of an
    // old event is not out of order, it is the same fact.
    if let Some(existing) = ledger.and_then(|l| l.find_duplicate(&input.stage_id, &input.occurred_at)) {
        return Ok(AppendPlan::Duplicate {
            event_id: existing.clone(),
        });
    }

    let latest = ledger.and_then(OrderLedger::latest);

    if let Some(latest) = latest {
        if input.occurred_at < latest.occurred_at {
            return Err(RejectionReason::OutOfOrderTimestamp {
                latest: latest.occurred_at,
                attempted: input.occurred_at,
            });
        }

        // Ledger invariants guarantee the latest stage is catalogued.
        let current_ordinal = catalog
            .stage_by_id(&latest.stage_id)
            .map(|s| s.ordinal)
            .unwrap_or(0);
        if ordinal < current_ordinal {
            return Err(RejectionReason::StageRegression {
                current: latest.stage_id.clone(),
                current_ordinal,
                attempted: input.stage_id.clone(),
                attempted_ordinal: ordinal,
            });
        }
    }

    let event = input.clone().into_event();
    let from_stage = latest.map(|e| e.stage_id.clone());
    let advanced = if from_stage.as_deref() == Some(event.stage_id.as_str()) {
        None
    } else {
        Some(StageAdvanced {
            order_id: event.order_id.clone(),
            from_stage_id: from_stage,
            to_stage_id: event.stage_id.clone(),
            occurred_at: event.occurred_at,
            event_id: event.event_id.clone(),
        })
    };

    Ok(AppendPlan::Insert { event, advanced })
}

/// Append a validated event. Callers must have obtained it from
/// [`plan_append`] against this same ledger.
pub fn commit(ledger: &mut OrderLedger, event: StageEvent) {
    ledger.events.push(event);
}

/// Validate and commit in one step on a single order ledger.
pub fn append_to_ledger(
    catalog: &StageCatalog,
    ledger: &mut OrderLedger,
    input: &StageEventInput,
) -> Result<AppendOutcome, RejectionReason> {
    let existing = if ledger.is_empty() { None } else { Some(&*ledger) };
    match plan_append(catalog, existing, input)? {
        AppendPlan::Duplicate { event_id } => Ok(AppendOutcome::Duplicate { event_id }),
        AppendPlan::Insert { event, advanced } => {
            let event_id = event.event_id.clone();
            commit(ledger, event);
            Ok(AppendOutcome::Appended { event_id, advanced })
        }
    }
}
