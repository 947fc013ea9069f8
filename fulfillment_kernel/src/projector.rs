//! Progress projection.
//!
//! Pure derivation from an order ledger and the stage catalog. No storage,
//! no clock: `last_updated_at` is the latest event's `occurred_at`.
//!
//! A stage counts as completed only once a later stage has an event. The
//! current stage is active, never completed, so a sowing-only order is at
//! 0 % with nothing completed.

use crate::arithmetic::rounded_percent;
use crate::catalog::StageCatalog;
use crate::domain::{
    OrderLedger, OrderStatus, OrderSummary, ProgressSnapshot, StageStatus, TimelineEntry,
};

/// Completion percentage for a stage ordinal.
pub fn percent_for_ordinal(catalog: &StageCatalog, ordinal: usize) -> u8 {
    rounded_percent(ordinal, catalog.total_stages().saturating_sub(1))
}

/// Progress of one order. `None` when the order has no events.
pub fn project(catalog: &StageCatalog, ledger: Option<&OrderLedger>) -> Option<ProgressSnapshot> {
    let latest = ledger?.latest()?;
    let current = catalog.stage_by_id(&latest.stage_id)?;

    let completed_stages = catalog.stages()[..current.ordinal]
        .iter()
        .map(|s| s.id.clone())
        .collect();

    Some(ProgressSnapshot {
        order_id: latest.order_id.clone(),
        current_stage_id: current.id.clone(),
        current_stage_label: current.label.clone(),
        completed_stages,
        percent_complete: percent_for_ordinal(catalog, current.ordinal),
        last_updated_at: latest.occurred_at,
        status: status_for(catalog, &current.id),
    })
}

/// One entry per catalog stage, in ordinal order. `None` when the order
/// has no events.
pub fn timeline(catalog: &StageCatalog, ledger: Option<&OrderLedger>) -> Option<Vec<TimelineEntry>> {
    let ledger = ledger?;
    let latest = ledger.latest()?;
    let current_ordinal = catalog.stage_by_id(&latest.stage_id)?.ordinal;

    let entries = catalog
        .stages()
        .iter()
        .map(|stage| {
            let status = if stage.ordinal < current_ordinal {
                StageStatus::Completed
            } else if stage.ordinal == current_ordinal {
                StageStatus::Active
            } else {
                StageStatus::Pending
            };
            let evidence = ledger.latest_for_stage(&stage.id);
            TimelineEntry {
                stage_id: stage.id.clone(),
                ordinal: stage.ordinal,
                label: stage.label.clone(),
                description: stage.description.clone(),
                status,
                reached_at: evidence.map(|e| e.occurred_at),
                location: evidence.and_then(|e| e.location.clone()),
                notes: evidence.and_then(|e| e.notes.clone()),
                photo_refs: evidence.map(|e| e.photo_refs.clone()).unwrap_or_default(),
            }
        })
        .collect();

    Some(entries)
}

/// Overview line for one order. `None` when the order has no events.
pub fn summarize(catalog: &StageCatalog, ledger: &OrderLedger) -> Option<OrderSummary> {
    let snapshot = project(catalog, Some(ledger))?;
    Some(OrderSummary {
        order_id: snapshot.order_id,
        current_stage_id: snapshot.current_stage_id,
        percent_complete: snapshot.percent_complete,
        status: snapshot.status,
        last_updated_at: snapshot.last_updated_at,
        event_count: ledger.len(),
    })
}

fn status_for(catalog: &StageCatalog, stage_id: &str) -> OrderStatus {
    if catalog.is_terminal(stage_id) {
        OrderStatus::Delivered
    } else {
        OrderStatus::InProgress
    }
}
