//! Concurrent stage ledger.
//!
//! One `RwLock<OrderLedger>` per order, indexed by a `DashMap`. An append
//! holds its order's write lock across validate, journal, insert and notify,
//! so appends to one order are serialized while different orders proceed in
//! parallel. Readers take the shared lock and copy out.
//!
//! Validation and the ledger mutation itself are the kernel's
//! (`plan_append` / `commit`); this module only adds locking, durability
//! and notification around them.

use std::sync::{Arc, PoisonError, RwLock};

use dashmap::DashMap;
use thiserror::Error;
use tracing::{debug, info, warn};

use fulfillment_kernel::catalog::StageCatalog;
use fulfillment_kernel::domain::{
    EventId, LedgerState, OrderLedger, OrderSummary, ProgressSnapshot, StageEvent, TimelineEntry,
};
use fulfillment_kernel::events::StageEventInput;
use fulfillment_kernel::invariants::{validate_state, InvariantViolation};
use fulfillment_kernel::projector;
use fulfillment_kernel::transitions::{
    check_references, commit, plan_append, AppendOutcome, AppendPlan, RejectionReason,
};

use crate::notifier::Notifier;

#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal write failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("journal unavailable: {0}")]
    Unavailable(String),
}

/// Durable record of accepted events.
///
/// `record` runs inside the order's critical section before the in-memory
/// insert. An error aborts the append.
pub trait Journal: Send + Sync {
    /// Persist `event` and return its log sequence.
    fn record(&self, event: &StageEvent) -> Result<u64, JournalError>;

    /// Sequence of the last persisted event, 0 when nothing is recorded.
    fn position(&self) -> u64;
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("append rejected: {0}")]
    Rejected(#[from] RejectionReason),

    #[error("event {event_id} was not journaled: {source}")]
    Journal {
        event_id: EventId,
        #[source]
        source: JournalError,
    },
}

impl LedgerError {
    pub fn rejection(&self) -> Option<&RejectionReason> {
        match self {
            LedgerError::Rejected(reason) => Some(reason),
            LedgerError::Journal { .. } => None,
        }
    }
}

/// Ledger contents together with the journal position they reflect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerExport {
    pub state: LedgerState,
    pub journal_position: u64,
}

type OrderSlot = Arc<RwLock<OrderLedger>>;

pub struct StageLedger {
    catalog: Arc<StageCatalog>,
    orders: DashMap<String, OrderSlot>,
    /// Appends hold this shared; `export` holds it exclusively so the copied
    /// state and the journal position agree.
    commit_gate: RwLock<()>,
    notifier: Arc<dyn Notifier>,
    journal: Option<Arc<dyn Journal>>,
}

impl StageLedger {
    pub fn new(catalog: Arc<StageCatalog>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            catalog,
            orders: DashMap::new(),
            commit_gate: RwLock::new(()),
            notifier,
            journal: None,
        }
    }

    /// Load a previously persisted state. Fails if the state does not hold
    /// under `catalog`.
    pub fn from_state(
        catalog: Arc<StageCatalog>,
        state: LedgerState,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, InvariantViolation> {
        validate_state(&catalog, &state)?;
        let ledger = Self::new(catalog, notifier);
        for (order_id, order) in state.orders {
            if !order.is_empty() {
                ledger.orders.insert(order_id, Arc::new(RwLock::new(order)));
            }
        }
        Ok(ledger)
    }

    pub fn with_journal(mut self, journal: Arc<dyn Journal>) -> Self {
        self.journal = Some(journal);
        self
    }

    pub fn catalog(&self) -> &Arc<StageCatalog> {
        &self.catalog
    }

    /// Append and return the stored (or already present) event id.
    pub fn append_event(&self, input: &StageEventInput) -> Result<EventId, LedgerError> {
        self.append(input).map(|outcome| outcome.event_id().clone())
    }

    /// Append one event. Rejections and journal failures leave the ledger
    /// unchanged; a notification failure is only logged.
    pub fn append(&self, input: &StageEventInput) -> Result<AppendOutcome, LedgerError> {
        // Refuse garbage before it can create an order slot.
        if let Err(reason) = check_references(&self.catalog, input) {
            return Err(self.rejected(input, reason));
        }

        let _gate = self.commit_gate.read().unwrap_or_else(PoisonError::into_inner);
        let slot = self.slot(&input.order_id);
        let mut ledger = slot.write().unwrap_or_else(PoisonError::into_inner);

        let plan = match plan_append(&self.catalog, Some(&*ledger), input) {
            Ok(plan) => plan,
            Err(reason) => return Err(self.rejected(input, reason)),
        };

        let (event, advanced) = match plan {
            AppendPlan::Duplicate { event_id } => {
                debug!(
                    order_id = %input.order_id,
                    stage_id = %input.stage_id,
                    event_id = %event_id,
                    "duplicate stage event ignored"
                );
                return Ok(AppendOutcome::Duplicate { event_id });
            }
            AppendPlan::Insert { event, advanced } => (event, advanced),
        };

        let sequence = match &self.journal {
            Some(journal) => match journal.record(&event) {
                Ok(sequence) => Some(sequence),
                Err(source) => {
                    warn!(
                        order_id = %event.order_id,
                        event_id = %event.event_id,
                        error = %source,
                        "journal write failed, append aborted"
                    );
                    return Err(LedgerError::Journal {
                        event_id: event.event_id,
                        source,
                    });
                }
            },
            None => None,
        };

        let event_id = event.event_id.clone();
        info!(
            order_id = %event.order_id,
            stage_id = %event.stage_id,
            event_id = %event_id,
            sequence = ?sequence,
            "stage event recorded"
        );
        commit(&mut ledger, event);

        if let Some(advanced) = &advanced {
            if let Err(e) = self.notifier.notify(advanced) {
                warn!(
                    order_id = %advanced.order_id,
                    to = %advanced.to_stage_id,
                    error = %e,
                    "stage advance notification failed"
                );
            }
        }

        Ok(AppendOutcome::Appended { event_id, advanced })
    }

    fn rejected(&self, input: &StageEventInput, reason: RejectionReason) -> LedgerError {
        warn!(
            order_id = %input.order_id,
            stage_id = %input.stage_id,
            reason = %reason,
            "stage event rejected"
        );
        LedgerError::Rejected(reason)
    }

    fn slot(&self, order_id: &str) -> OrderSlot {
        if let Some(existing) = self.orders.get(order_id) {
            return Arc::clone(existing.value());
        }
        // A slot whose first append is rejected stays empty; readers skip
        // empty slots, and removing it here would race with a concurrent
        // appender that already cloned it.
        Arc::clone(
            self.orders
                .entry(order_id.to_string())
                .or_insert_with(|| Arc::new(RwLock::new(OrderLedger::new(order_id))))
                .value(),
        )
    }

    /// Run `f` on a non-empty order under its shared lock.
    fn read<R>(&self, order_id: &str, f: impl FnOnce(&OrderLedger) -> R) -> Option<R> {
        let slot = self.orders.get(order_id).map(|s| Arc::clone(s.value()))?;
        let ledger = slot.read().unwrap_or_else(PoisonError::into_inner);
        if ledger.is_empty() {
            None
        } else {
            Some(f(&ledger))
        }
    }

    fn slots(&self) -> Vec<(String, OrderSlot)> {
        let mut slots: Vec<_> = self
            .orders
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect();
        slots.sort_by(|a, b| a.0.cmp(&b.0));
        slots
    }

    /// Events of one order, oldest first. Empty for unknown orders.
    pub fn events_for_order(&self, order_id: &str) -> Vec<StageEvent> {
        self.read(order_id, |l| l.events.clone()).unwrap_or_default()
    }

    pub fn latest_event(&self, order_id: &str) -> Option<StageEvent> {
        self.read(order_id, |l| l.latest().cloned()).flatten()
    }

    pub fn project(&self, order_id: &str) -> Option<ProgressSnapshot> {
        self.read(order_id, |l| projector::project(&self.catalog, Some(l)))
            .flatten()
    }

    pub fn timeline(&self, order_id: &str) -> Option<Vec<TimelineEntry>> {
        self.read(order_id, |l| projector::timeline(&self.catalog, Some(l)))
            .flatten()
    }

    /// Orders with at least one event, sorted.
    pub fn order_ids(&self) -> Vec<String> {
        self.slots()
            .into_iter()
            .filter(|(_, slot)| !slot.read().unwrap_or_else(PoisonError::into_inner).is_empty())
            .map(|(id, _)| id)
            .collect()
    }

    pub fn overview(&self) -> Vec<OrderSummary> {
        self.slots()
            .into_iter()
            .filter_map(|(_, slot)| {
                let ledger = slot.read().unwrap_or_else(PoisonError::into_inner);
                projector::summarize(&self.catalog, &ledger)
            })
            .collect()
    }

    pub fn event_count(&self) -> usize {
        self.slots()
            .into_iter()
            .map(|(_, slot)| slot.read().unwrap_or_else(PoisonError::into_inner).len())
            .sum()
    }

    /// Copy the whole ledger while no append is in flight.
    pub fn export(&self) -> LedgerExport {
        let _gate = self.commit_gate.write().unwrap_or_else(PoisonError::into_inner);
        let mut state = LedgerState::default();
        for (order_id, slot) in self.slots() {
            let ledger = slot.read().unwrap_or_else(PoisonError::into_inner);
            if !ledger.is_empty() {
                state.orders.insert(order_id, ledger.clone());
            }
        }
        LedgerExport {
            state,
            journal_position: self.journal.as_ref().map_or(0, |j| j.position()),
        }
    }

    pub fn snapshot_state(&self) -> LedgerState {
        self.export().state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::notifier::{NotifyError, RecordingNotifier};
    use chrono::{DateTime, Duration, TimeZone, Utc};
    use fulfillment_kernel::domain::StageAdvanced;
    use std::sync::atomic::{AtomicU64, Ordering};

    const ORDER: &str = "FTO-2024-001";

    fn t(n: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + Duration::hours(n)
    }

    fn ledger_with(notifier: Arc<dyn Notifier>) -> StageLedger {
        StageLedger::new(Arc::new(StageCatalog::reference()), notifier)
    }

    struct BrokenJournal;

    impl Journal for BrokenJournal {
        fn record(&self, _: &StageEvent) -> Result<u64, JournalError> {
            Err(JournalError::Unavailable("disk full".into()))
        }
        fn position(&self) -> u64 {
            0
        }
    }

    #[derive(Default)]
    struct CountingJournal(AtomicU64);

    impl Journal for CountingJournal {
        fn record(&self, _: &StageEvent) -> Result<u64, JournalError> {
            Ok(self.0.fetch_add(1, Ordering::SeqCst) + 1)
        }
        fn position(&self) -> u64 {
            self.0.load(Ordering::SeqCst)
        }
    }

    struct Refusing;

    impl Notifier for Refusing {
        fn notify(&self, _: &StageAdvanced) -> Result<(), NotifyError> {
            Err(NotifyError::Unavailable("push service offline".into()))
        }
    }

    #[test]
    fn first_event_advances_from_nothing() {
        let recorder = Arc::new(RecordingNotifier::new());
        let ledger = ledger_with(recorder.clone());
        ledger.append(&StageEventInput::new(ORDER, "sowing", t(0))).unwrap();

        let seen = recorder.advances();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].from_stage_id, None);
        assert_eq!(seen[0].to_stage_id, "sowing");
    }

    #[test]
    fn duplicate_and_same_stage_updates_do_not_notify() {
        let recorder = Arc::new(RecordingNotifier::new());
        let ledger = ledger_with(recorder.clone());
        let first = ledger
            .append_event(&StageEventInput::new(ORDER, "growing", t(1)))
            .unwrap();
        let again = ledger
            .append_event(&StageEventInput::new(ORDER, "growing", t(1)).with_notes("retry"))
            .unwrap();
        assert_eq!(first, again);

        ledger
            .append(&StageEventInput::new(ORDER, "growing", t(2)).with_notes("watered"))
            .unwrap();
        assert_eq!(recorder.count(), 1);
        assert_eq!(ledger.events_for_order(ORDER).len(), 2);
    }

    #[test]
    fn journal_failure_leaves_ledger_unchanged() {
        let recorder = Arc::new(RecordingNotifier::new());
        let ledger = ledger_with(recorder.clone()).with_journal(Arc::new(BrokenJournal));

        let err = ledger
            .append(&StageEventInput::new(ORDER, "sowing", t(0)))
            .unwrap_err();
        assert!(matches!(err, LedgerError::Journal { .. }));
        assert!(ledger.latest_event(ORDER).is_none());
        assert!(ledger.order_ids().is_empty());
        assert_eq!(recorder.count(), 0);
    }

    #[test]
    fn notifier_failure_keeps_the_append() {
        let ledger = ledger_with(Arc::new(Refusing));
        ledger.append(&StageEventInput::new(ORDER, "sowing", t(0))).unwrap();
        assert_eq!(ledger.latest_event(ORDER).unwrap().stage_id, "sowing");
    }

    #[test]
    fn rejected_input_creates_no_order() {
        let ledger = ledger_with(Arc::new(RecordingNotifier::new()));
        let err = ledger
            .append(&StageEventInput::new("bad id!", "sowing", t(0)))
            .unwrap_err();
        assert!(matches!(
            err.rejection(),
            Some(RejectionReason::InvalidOrderId { .. })
        ));
        assert!(ledger.orders.is_empty());
    }

    #[test]
    fn empty_slot_reads_as_unknown_order() {
        let ledger = ledger_with(Arc::new(RecordingNotifier::new()))
            .with_journal(Arc::new(BrokenJournal));
        assert!(ledger
            .append(&StageEventInput::new(ORDER, "sowing", t(0)))
            .is_err());

        // The slot exists but holds nothing.
        assert_eq!(ledger.orders.len(), 1);
        assert!(ledger.events_for_order(ORDER).is_empty());
        assert!(ledger.latest_event(ORDER).is_none());
        assert!(ledger.project(ORDER).is_none());
        assert!(ledger.timeline(ORDER).is_none());
        assert!(ledger.order_ids().is_empty());
        assert!(ledger.overview().is_empty());
        assert_eq!(ledger.event_count(), 0);
        assert!(ledger.export().state.orders.is_empty());
    }

    #[test]
    fn later_rejection_keeps_order_listed() {
        let ledger = ledger_with(Arc::new(RecordingNotifier::new()));
        ledger.append(&StageEventInput::new("ORD-002", "sowing", t(5))).unwrap();
        ledger.append(&StageEventInput::new(ORDER, "growing", t(1))).unwrap();
        // Same order, earlier timestamp.
        assert!(ledger
            .append(&StageEventInput::new(ORDER, "packaging", t(0)))
            .is_err());
        assert_eq!(ledger.order_ids(), vec![ORDER, "ORD-002"]);
        assert!(ledger.project("ORD-404").is_none());
        assert!(ledger.timeline("ORD-404").is_none());
    }

    #[test]
    fn export_reports_journal_position() {
        let ledger = ledger_with(Arc::new(RecordingNotifier::new()))
            .with_journal(Arc::new(CountingJournal::default()));
        ledger.append(&StageEventInput::new(ORDER, "sowing", t(0))).unwrap();
        ledger.append(&StageEventInput::new(ORDER, "sowing", t(0))).unwrap();
        ledger.append(&StageEventInput::new(ORDER, "growing", t(1))).unwrap();

        let export = ledger.export();
        assert_eq!(export.journal_position, 2);
        assert_eq!(export.state.event_count(), 2);

        let restored = StageLedger::from_state(
            Arc::clone(ledger.catalog()),
            export.state,
            Arc::new(RecordingNotifier::new()),
        )
        .unwrap();
        assert_eq!(restored.project(ORDER), ledger.project(ORDER));
    }
}
