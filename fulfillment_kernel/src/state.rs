//! Ledger state construction and read helpers.

use chrono::{DateTime, Utc};

use crate::domain::{EventId, LedgerState, OrderLedger, StageEvent};

/// Create a fresh, empty ledger state.
pub fn create_initial_state() -> LedgerState {
    LedgerState::default()
}

impl OrderLedger {
    pub fn new(order_id: &str) -> Self {
        Self {
            order_id: order_id.to_string(),
            events: Vec::new(),
        }
    }

    pub fn latest(&self) -> Option<&StageEvent> {
        self.events.last()
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Id of an already-recorded event with the same dedup key.
    pub fn find_duplicate(&self, stage_id: &str, occurred_at: &DateTime<Utc>) -> Option<&EventId> {
        self.events
            .iter()
            .rev()
            .find(|e| e.stage_id == stage_id && e.occurred_at == *occurred_at)
            .map(|e| &e.event_id)
    }

    /// Most recent event recorded for `stage_id`.
    pub fn latest_for_stage(&self, stage_id: &str) -> Option<&StageEvent> {
        self.events.iter().rev().find(|e| e.stage_id == stage_id)
    }
}

impl LedgerState {
    pub fn order(&self, order_id: &str) -> Option<&OrderLedger> {
        self.orders.get(order_id).filter(|l| !l.is_empty())
    }

    /// Order ids with at least one event, sorted.
    pub fn order_ids(&self) -> Vec<String> {
        self.orders
            .values()
            .filter(|l| !l.is_empty())
            .map(|l| l.order_id.clone())
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.orders.values().map(OrderLedger::len).sum()
    }
}
