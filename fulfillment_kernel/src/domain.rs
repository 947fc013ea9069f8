//! Core domain types.
//!
//! Pure data. Ledger state is stored; progress, timelines and summaries
//! are derived on read and never stored.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ── Stored facts ───────────────────────────────────────────────────

/// Content-addressed identity of a stage event: lowercase hex SHA-256 of
/// `order_id|stage_id|occurred_at`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EventId(pub String);

impl EventId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A timestamped fact that an order reached a stage. Never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageEvent {
    pub event_id: EventId,
    pub order_id: String,
    pub stage_id: String,
    pub occurred_at: DateTime<Utc>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub photo_refs: Vec<String>,
}

/// All events of one order, oldest first.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OrderLedger {
    pub order_id: String,
    pub events: Vec<StageEvent>,
}

/// Every order ledger, keyed by order id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LedgerState {
    pub orders: BTreeMap<String, OrderLedger>,
}

// ── Derived views ──────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    InProgress,
    Delivered,
}

/// Progress of one order, recomputed on every read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub order_id: String,
    pub current_stage_id: String,
    pub current_stage_label: String,
    /// Stage ids strictly before the current stage, in ordinal order.
    pub completed_stages: Vec<String>,
    pub percent_complete: u8,
    pub last_updated_at: DateTime<Utc>,
    pub status: OrderStatus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Completed,
    Active,
    Pending,
}

/// One row of the farm-to-table timeline for an order.
///
/// `reached_at`, `location`, `notes` and `photo_refs` come from the most
/// recent event recorded for this stage, if any. A completed stage may have
/// no event of its own: completion is implied by a later stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub stage_id: String,
    pub ordinal: usize,
    pub label: String,
    pub description: String,
    pub status: StageStatus,
    pub reached_at: Option<DateTime<Utc>>,
    pub location: Option<String>,
    pub notes: Option<String>,
    pub photo_refs: Vec<String>,
}

/// One line of the order overview.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order_id: String,
    pub current_stage_id: String,
    pub percent_complete: u8,
    pub status: OrderStatus,
    pub last_updated_at: DateTime<Utc>,
    pub event_count: usize,
}

/// Emitted once per accepted append that changes an order's current stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageAdvanced {
    pub order_id: String,
    /// `None` for the first event of an order.
    pub from_stage_id: Option<String>,
    pub to_stage_id: String,
    pub occurred_at: DateTime<Utc>,
    pub event_id: EventId,
}
