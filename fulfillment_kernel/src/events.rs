//! Append requests.
//!
//! A `StageEventInput` is what an external source (farm update, logistics
//! scan) submits. It carries no id: the id is derived from content, so a
//! retried submission maps onto the event it already created.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::domain::{EventId, StageEvent};

/// Schema version for persisted stage events. Hardcoded.
pub const SCHEMA_VERSION: u32 = 1;

/// Request to append one stage event to an order's ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageEventInput {
    pub order_id: String,
    pub stage_id: String,
    pub occurred_at: DateTime<Utc>,
    #[serde(default)]
    pub location: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    #[serde(default)]
    pub photo_refs: Vec<String>,
}

impl StageEventInput {
    pub fn new(order_id: &str, stage_id: &str, occurred_at: DateTime<Utc>) -> Self {
        Self {
            order_id: order_id.to_string(),
            stage_id: stage_id.to_string(),
            occurred_at,
            location: None,
            notes: None,
            photo_refs: Vec::new(),
        }
    }

    pub fn with_location(mut self, location: &str) -> Self {
        self.location = Some(location.to_string());
        self
    }

    pub fn with_notes(mut self, notes: &str) -> Self {
        self.notes = Some(notes.to_string());
        self
    }

    pub fn with_photo_refs<I, S>(mut self, refs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.photo_refs = refs.into_iter().map(Into::into).collect();
        self
    }

    /// Content-addressed id this input maps to.
    pub fn event_id(&self) -> EventId {
        event_id_for(&self.order_id, &self.stage_id, &self.occurred_at)
    }

    /// Materialize the stored event.
    pub fn into_event(self) -> StageEvent {
        let event_id = self.event_id();
        StageEvent {
            event_id,
            order_id: self.order_id,
            stage_id: self.stage_id,
            occurred_at: self.occurred_at,
            location: self.location,
            notes: self.notes,
            photo_refs: self.photo_refs,
        }
    }
}

impl From<&StageEvent> for StageEventInput {
    fn from(event: &StageEvent) -> Self {
        Self {
            order_id: event.order_id.clone(),
            stage_id: event.stage_id.clone(),
            occurred_at: event.occurred_at,
            location: event.location.clone(),
            notes: event.notes.clone(),
            photo_refs: event.photo_refs.clone(),
        }
    }
}

/// RFC 3339, UTC, `Z` suffix, fractional seconds only when present.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)
}

/// Parse an RFC 3339 timestamp with any offset into UTC.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, chrono::ParseError> {
    DateTime::parse_from_rfc3339(raw).map(|dt| dt.with_timezone(&Utc))
}

/// SHA-256 of `order_id|stage_id|occurred_at`, lowercase hex.
pub fn event_id_for(order_id: &str, stage_id: &str, occurred_at: &DateTime<Utc>) -> EventId {
    let mut hasher = Sha256::new();
    hasher.update(order_id.as_bytes());
    hasher.update(b"|");
    hasher.update(stage_id.as_bytes());
    hasher.update(b"|");
    hasher.update(format_timestamp(occurred_at).as_bytes());
    EventId(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn timestamp_format_is_compact_utc() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        assert_eq!(format_timestamp(&ts), "2024-06-01T09:00:00Z");
    }

    #[test]
    fn parse_normalizes_offsets() {
        let a = parse_timestamp("2024-06-01T14:30:00+05:30").unwrap();
        let b = parse_timestamp("2024-06-01T09:00:00Z").unwrap();
        assert_eq!(a, b);
        assert!(parse_timestamp("June 1st").is_err());
    }

    #[test]
    fn event_id_depends_on_key_only() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 1, 9, 0, 0).unwrap();
        let plain = StageEventInput::new("FTO-2024-001", "sowing", ts);
        let annotated = plain
            .clone()
            .with_location("Green Valley Farm, Plot A-12")
            .with_notes("Organic vegetable seeds planted")
            .with_photo_refs(["photo-1"]);
        assert_eq!(plain.event_id(), annotated.event_id());
        assert_eq!(plain.event_id().as_str().len(), 64);

        let later = StageEventInput::new("FTO-2024-001", "sowing", ts + chrono::Duration::seconds(1));
        assert_ne!(plain.event_id(), later.event_id());
    }

    #[test]
    fn into_event_round_trips_through_input() {
        let ts = Utc.with_ymd_and_hms(2024, 6, 15, 10, 30, 0).unwrap();
        let input = StageEventInput::new("FTO-2024-001", "growing", ts)
            .with_notes("Regular watering and organic pest control applied");
        let event = input.clone().into_event();
        assert_eq!(event.event_id, input.event_id());
        assert_eq!(StageEventInput::from(&event), input);
    }
}
