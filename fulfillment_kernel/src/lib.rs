#![forbid(unsafe_code)]

//! Farm-to-table fulfillment tracking kernel.
//!
//! An append-only stage ledger per order, validated against a fixed stage
//! catalog, with progress derived on read. Pure and deterministic: no I/O,
//! no clock, no locks.

/// Canonical hash format version. Bumping it changes every hash.
pub const KERNEL_VERSION: u32 = 1;

pub mod arithmetic;
pub mod catalog;
pub mod domain;
pub mod events;
pub mod state;
pub mod transitions;
pub mod invariants;
pub mod projector;
pub mod hashing;
pub mod engine;
