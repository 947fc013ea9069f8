//! Hand-written protobuf types for the stage event log.
//!
//! Uses prost derive macros for encode/decode without prost-build.
//! Field numbers are part of the on-disk format and never change.

use prost::Message;

/// One persisted stage event.
#[derive(Clone, PartialEq, Message)]
pub struct ProtoStageEvent {
    /// Global log sequence, strictly increasing from 1.
    #[prost(uint64, tag = "1")]
    pub sequence: u64,
    #[prost(uint32, tag = "2")]
    pub schema_version: u32,
    #[prost(string, tag = "3")]
    pub event_id: String,
    #[prost(string, tag = "4")]
    pub order_id: String,
    #[prost(string, tag = "5")]
    pub stage_id: String,
    /// RFC 3339 UTC, as produced by `format_timestamp`.
    #[prost(string, tag = "6")]
    pub occurred_at: String,
    #[prost(string, optional, tag = "7")]
    pub location: Option<String>,
    #[prost(string, optional, tag = "8")]
    pub notes: Option<String>,
    #[prost(string, repeated, tag = "9")]
    pub photo_refs: Vec<String>,
}
