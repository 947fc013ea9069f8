#![forbid(unsafe_code)]

//! Fulfillment runtime
//!
//! Wraps the pure fulfillment kernel with a concurrent per-order ledger,
//! an append-only event log, snapshots, replay, drift detection and
//! `StageAdvanced` notification.
//!
//! No ledger rules live here: validation, dedupe and projection are all
//! delegated to the kernel.

pub mod config;
pub mod drift;
pub mod event_store;
pub mod ledger;
pub mod notifier;
pub mod proto_bridge;
pub mod proto_types;
pub mod replay;
pub mod session;
pub mod snapshot;
pub mod snapshot_codec;
