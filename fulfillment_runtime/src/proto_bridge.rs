//! Proto ↔ kernel conversion bridge.
//!
//! Decoding is strict: an unknown schema version, an unparsable timestamp,
//! or an event id that does not match the content is a corrupt record.

use fulfillment_kernel::domain::{EventId, StageEvent};
use fulfillment_kernel::events::{event_id_for, format_timestamp, parse_timestamp, SCHEMA_VERSION};
use thiserror::Error;

use crate::proto_types::ProtoStageEvent;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("record {sequence}: schema version {got} is not supported (expected {expected})")]
    SchemaVersion { sequence: u64, expected: u32, got: u32 },

    #[error("record {sequence}: bad timestamp {raw:?}: {source}")]
    Timestamp {
        sequence: u64,
        raw: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("record {sequence}: event id {stored} does not match content ({computed})")]
    EventIdMismatch {
        sequence: u64,
        stored: String,
        computed: String,
    },
}

/// Convert a kernel event to its log record.
pub fn event_to_proto(sequence: u64, event: &StageEvent) -> ProtoStageEvent {
    ProtoStageEvent {
        sequence,
        schema_version: SCHEMA_VERSION,
        event_id: event.event_id.0.clone(),
        order_id: event.order_id.clone(),
        stage_id: event.stage_id.clone(),
        occurred_at: format_timestamp(&event.occurred_at),
        location: event.location.clone(),
        notes: event.notes.clone(),
        photo_refs: event.photo_refs.clone(),
    }
}

/// Convert a log record back to a kernel event.
pub fn proto_to_event(proto: &ProtoStageEvent) -> Result<StageEvent, BridgeError> {
    if proto.schema_version != SCHEMA_VERSION {
        return Err(BridgeError::SchemaVersion {
            sequence: proto.sequence,
            expected: SCHEMA_VERSION,
            got: proto.schema_version,
        });
    }

    let occurred_at = parse_timestamp(&proto.occurred_at).map_err(|source| BridgeError::Timestamp {
        sequence: proto.sequence,
        raw: proto.occurred_at.clone(),
        source,
    })?;

    let computed = event_id_for(&proto.order_id, &proto.stage_id, &occurred_at);
    if computed.0 != proto.event_id {
        return Err(BridgeError::EventIdMismatch {
            sequence: proto.sequence,
            stored: proto.event_id.clone(),
            computed: computed.0,
        });
    }

    Ok(StageEvent {
        event_id: EventId(proto.event_id.clone()),
        order_id: proto.order_id.clone(),
        stage_id: proto.stage_id.clone(),
        occurred_at,
        location: proto.location.clone(),
        notes: proto.notes.clone(),
        photo_refs: proto.photo_refs.clone(),
    })
}
