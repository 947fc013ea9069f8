//! Single-threaded tracking engine.
//!
//! Owns a `LedgerState` and delegates every mutation to `transitions`.
//! Used for replay, snapshot restore, and anywhere a deterministic,
//! lock-free view of the whole ledger is wanted.

use std::sync::Arc;

use crate::catalog::StageCatalog;
use crate::domain::{LedgerState, OrderLedger, OrderSummary, ProgressSnapshot, StageEvent, TimelineEntry};
use crate::events::StageEventInput;
use crate::hashing::canonical_hash;
use crate::invariants::{validate_state, InvariantViolation};
use crate::projector;
use crate::state::create_initial_state;
use crate::transitions::{append_to_ledger, AppendOutcome, RejectionReason};

pub struct TrackingEngine {
    catalog: Arc<StageCatalog>,
    state: LedgerState,
}

impl TrackingEngine {
    /// Create an engine with an empty ledger.
    pub fn new(catalog: Arc<StageCatalog>) -> Self {
        Self {
            catalog,
            state: create_initial_state(),
        }
    }

    /// Adopt an existing state after checking its invariants against
    /// `catalog`.
    pub fn restore(catalog: Arc<StageCatalog>, state: LedgerState) -> Result<Self, InvariantViolation> {
        validate_state(&catalog, &state)?;
        Ok(Self { catalog, state })
    }

    pub fn catalog(&self) -> &StageCatalog {
        &self.catalog
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn into_state(self) -> LedgerState {
        self.state
    }

    /// Validate and append one event.
    pub fn append(&mut self, input: &StageEventInput) -> Result<AppendOutcome, RejectionReason> {
        let ledger = self
            .state
            .orders
            .entry(input.order_id.clone())
            .or_insert_with(|| OrderLedger::new(&input.order_id));
        let result = append_to_ledger(&self.catalog, ledger, input);
        if ledger.is_empty() {
            // Rejected first event: leave no trace of the order.
            self.state.orders.remove(&input.order_id);
        }
        result
    }

    /// Apply an ordered sequence, stopping at the first rejection.
    pub fn apply_sequence(
        &mut self,
        inputs: &[StageEventInput],
    ) -> Result<Vec<AppendOutcome>, RejectionReason> {
        inputs.iter().map(|input| self.append(input)).collect()
    }

    pub fn events_for_order(&self, order_id: &str) -> &[StageEvent] {
        self.state
            .order(order_id)
            .map(|l| l.events.as_slice())
            .unwrap_or(&[])
    }

    pub fn latest_event(&self, order_id: &str) -> Option<&StageEvent> {
        self.state.order(order_id).and_then(OrderLedger::latest)
    }

    pub fn project(&self, order_id: &str) -> Option<ProgressSnapshot> {
        projector::project(&self.catalog, self.state.order(order_id))
    }

    pub fn timeline(&self, order_id: &str) -> Option<Vec<TimelineEntry>> {
        projector::timeline(&self.catalog, self.state.order(order_id))
    }

    pub fn overview(&self) -> Vec<OrderSummary> {
        self.state
            .orders
            .values()
            .filter_map(|l| projector::summarize(&self.catalog, l))
            .collect()
    }

    pub fn current_hash(&self) -> String {
        canonical_hash(&self.state)
    }
}
