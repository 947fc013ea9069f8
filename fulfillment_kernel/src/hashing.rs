//! Canonical hashing of ledger state.
//!
//! Deterministic canonical serialization + SHA-256. Produces byte-identical
//! output across platforms.
//!
//! Rules:
//!   - Orders sorted by id (UTF-8 byte order), empty ledgers omitted
//!   - Events in ledger order (append order)
//!   - Timestamps via `format_timestamp`
//!   - Absent location/notes as `null`
//!   - UTF-8 JSON, no whitespace

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

use crate::domain::{LedgerState, StageEvent};
use crate::events::format_timestamp;
use crate::KERNEL_VERSION;

/// Canonical serialization of a ledger state to UTF-8 JSON bytes.
pub fn canonical_serialize(state: &LedgerState) -> Vec<u8> {
    // Serializing a Value built from strings and integers cannot fail.
    build_canonical_value(state).to_string().into_bytes()
}

/// SHA-256 of the canonical serialization. Lowercase hex.
pub fn canonical_hash(state: &LedgerState) -> String {
    hex::encode(Sha256::digest(canonical_serialize(state)))
}

/// Field order: kernel_version, orders.
/// Order fields: order_id, events.
/// Event fields: event_id, stage_id, occurred_at, location, notes, photo_refs.
fn build_canonical_value(state: &LedgerState) -> Value {
    let orders: Vec<Value> = state
        .orders
        .values()
        .filter(|ledger| !ledger.is_empty())
        .map(|ledger| {
            let mut order = Map::new();
            order.insert("order_id".to_string(), Value::String(ledger.order_id.clone()));
            order.insert(
                "events".to_string(),
                Value::Array(ledger.events.iter().map(canonical_event).collect()),
            );
            Value::Object(order)
        })
        .collect();

    let mut root = Map::new();
    root.insert(
        "kernel_version".to_string(),
        Value::Number(KERNEL_VERSION.into()),
    );
    root.insert("orders".to_string(), Value::Array(orders));
    Value::Object(root)
}

fn canonical_event(event: &StageEvent) -> Value {
    let optional = |v: &Option<String>| match v {
        Some(s) => Value::String(s.clone()),
        None => Value::Null,
    };

    let mut map = Map::new();
    map.insert("event_id".to_string(), Value::String(event.event_id.0.clone()));
    map.insert("stage_id".to_string(), Value::String(event.stage_id.clone()));
    map.insert(
        "occurred_at".to_string(),
        Value::String(format_timestamp(&event.occurred_at)),
    );
    map.insert("location".to_string(), optional(&event.location));
    map.insert("notes".to_string(), optional(&event.notes));
    map.insert(
        "photo_refs".to_string(),
        Value::Array(event.photo_refs.iter().cloned().map(Value::String).collect()),
    );
    Value::Object(map)
}
