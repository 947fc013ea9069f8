//! Drift detection: determinism checks and state comparison.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use fulfillment_kernel::catalog::StageCatalog;
use fulfillment_kernel::domain::{LedgerState, OrderStatus};
use fulfillment_kernel::hashing::canonical_hash;
use fulfillment_kernel::projector;

use crate::proto_types::ProtoStageEvent;
use crate::replay::{self, ReplayError};

#[derive(Debug, Error)]
pub enum DriftError {
    #[error(transparent)]
    Replay(#[from] ReplayError),

    #[error("determinism failure: two replays produced {run_1} and {run_2}")]
    Nondeterministic { run_1: String, run_2: String },
}

/// Replay the same records twice and require identical hashes. Returns the
/// hash.
pub fn verify_determinism(
    catalog: &Arc<StageCatalog>,
    records: &[ProtoStageEvent],
) -> Result<String, DriftError> {
    let run_1 = replay::rebuild_hash(Arc::clone(catalog), records)?;
    let run_2 = replay::rebuild_hash(Arc::clone(catalog), records)?;
    if run_1 != run_2 {
        return Err(DriftError::Nondeterministic { run_1, run_2 });
    }
    Ok(run_1)
}

/// Current stage of one order on each side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageDrift {
    pub order_id: String,
    pub stage_a: String,
    pub stage_b: String,
    pub percent_a: u8,
    pub percent_b: u8,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftReport {
    pub hash_a: String,
    pub hash_b: String,
    pub event_count_a: i64,
    pub event_count_b: i64,
    pub event_count_delta: i64,
    pub delivered_a: i64,
    pub delivered_b: i64,
    pub added_orders: Vec<String>,
    pub removed_orders: Vec<String>,
    pub stage_changes: Vec<StageDrift>,
}

impl DriftReport {
    pub fn is_clean(&self) -> bool {
        self.hash_a == self.hash_b
    }
}

fn delivered(catalog: &StageCatalog, state: &LedgerState) -> i64 {
    state
        .orders
        .values()
        .filter_map(|l| projector::project(catalog, Some(l)))
        .filter(|p| p.status == OrderStatus::Delivered)
        .count() as i64
}

/// Compare two states order by order.
pub fn compare_states(catalog: &StageCatalog, state_a: &LedgerState, state_b: &LedgerState) -> DriftReport {
    let ids_a: BTreeSet<String> = state_a.order_ids().into_iter().collect();
    let ids_b: BTreeSet<String> = state_b.order_ids().into_iter().collect();

    let added_orders = ids_b.difference(&ids_a).cloned().collect();
    let removed_orders = ids_a.difference(&ids_b).cloned().collect();

    let mut stage_changes = Vec::new();
    for order_id in ids_a.intersection(&ids_b) {
        let a = projector::project(catalog, state_a.order(order_id));
        let b = projector::project(catalog, state_b.order(order_id));
        if let (Some(a), Some(b)) = (a, b) {
            if a.current_stage_id != b.current_stage_id {
                stage_changes.push(StageDrift {
                    order_id: order_id.clone(),
                    stage_a: a.current_stage_id,
                    stage_b: b.current_stage_id,
                    percent_a: a.percent_complete,
                    percent_b: b.percent_complete,
                });
            }
        }
    }

    let event_count_a = state_a.event_count() as i64;
    let event_count_b = state_b.event_count() as i64;

    DriftReport {
        hash_a: canonical_hash(state_a),
        hash_b: canonical_hash(state_b),
        event_count_a,
        event_count_b,
        event_count_delta: event_count_b - event_count_a,
        delivered_a: delivered(catalog, state_a),
        delivered_b: delivered(catalog, state_b),
        added_orders,
        removed_orders,
        stage_changes,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone, Utc};
    use fulfillment_kernel::engine::TrackingEngine;
    use fulfillment_kernel::events::StageEventInput;

    fn state(script: &[(&str, &str)]) -> LedgerState {
        let base = Utc.with_ymd_and_hms(2024, 8, 1, 0, 0, 0).unwrap();
        let mut engine = TrackingEngine::new(Arc::new(StageCatalog::reference()));
        for (i, (order, stage)) in script.iter().enumerate() {
            engine
                .append(&StageEventInput::new(order, stage, base + Duration::hours(i as i64)))
                .unwrap();
        }
        engine.into_state()
    }

    #[test]
    fn identical_states_are_clean() {
        let catalog = StageCatalog::reference();
        let a = state(&[("ORD-002", "sowing"), ("ORD-002", "growing")]);
        let report = compare_states(&catalog, &a, &a.clone());
        assert!(report.is_clean());
        assert!(report.stage_changes.is_empty());
        assert_eq!(report.event_count_delta, 0);
    }

    #[test]
    fn reports_added_orders_and_stage_moves() {
        let catalog = StageCatalog::reference();
        let a = state(&[("ORD-002", "sowing")]);
        let b = state(&[
            ("ORD-002", "sowing"),
            ("ORD-003", "dispatch"),
            ("ORD-002", "delivered"),
        ]);
        let report = compare_states(&catalog, &a, &b);

        assert!(!report.is_clean());
        assert_eq!(report.added_orders, vec!["ORD-003"]);
        assert!(report.removed_orders.is_empty());
        assert_eq!(report.event_count_delta, 2);
        assert_eq!(report.delivered_b, 1);
        assert_eq!(
            report.stage_changes,
            vec![StageDrift {
                order_id: "ORD-002".into(),
                stage_a: "sowing".into(),
                stage_b: "delivered".into(),
                percent_a: 0,
                percent_b: 100,
            }]
        );
    }
}
