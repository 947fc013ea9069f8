//! fulfillment-track: command-line front end for a tracking data directory.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use fulfillment_kernel::events::{parse_timestamp, StageEventInput};
use fulfillment_runtime::config::{Args, Command};
use fulfillment_runtime::ledger::LedgerError;
use fulfillment_runtime::notifier::{BroadcastNotifier, FanoutNotifier, LogNotifier};
use fulfillment_runtime::session::TrackingSession;

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn main() -> Result<()> {
    let args = Args::parse();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("fulfillment_runtime={},warn", args.log_level).into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.resolve().context("invalid configuration")?;
    let catalog = Arc::new(config.catalog()?);

    let hub = BroadcastNotifier::new(config.notification_capacity);
    let notifier = FanoutNotifier::new()
        .with(Arc::new(LogNotifier))
        .with(Arc::new(hub));

    let session = TrackingSession::open(
        &config.data_dir,
        catalog,
        Arc::new(notifier),
        config.snapshot_interval,
    )
    .with_context(|| format!("failed to open {}", config.data_dir.display()))?;
    let ledger = session.ledger();

    match args.command {
        Command::Append {
            order_id,
            stage_id,
            at,
            location,
            notes,
            photo_refs,
        } => {
            let occurred_at = match at {
                Some(raw) => parse_timestamp(&raw).with_context(|| format!("bad --at value {:?}", raw))?,
                None => Utc::now(),
            };
            let mut input = StageEventInput::new(&order_id, &stage_id, occurred_at)
                .with_photo_refs(photo_refs);
            input.location = location;
            input.notes = notes;

            match session.append(&input) {
                Ok(outcome) => {
                    let status = if outcome.is_duplicate() { "duplicate" } else { "appended" };
                    print_json(&serde_json::json!({
                        "status": status,
                        "event_id": outcome.event_id(),
                        "advanced": outcome.advanced(),
                    }))?;
                }
                Err(LedgerError::Rejected(reason)) => {
                    print_json(&reason)?;
                    bail!("event rejected: {}", reason);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Command::Events { order_id } => print_json(&ledger.events_for_order(&order_id))?,
        Command::Project { order_id } => match ledger.project(&order_id) {
            Some(snapshot) => print_json(&snapshot)?,
            None => bail!("order {} is unknown", order_id),
        },
        Command::Timeline { order_id } => match ledger.timeline(&order_id) {
            Some(entries) => print_json(&entries)?,
            None => bail!("order {} is unknown", order_id),
        },
        Command::Overview => print_json(&ledger.overview())?,
        Command::Replay => {
            let (state, hash) = session.replay_full()?;
            print_json(&serde_json::json!({
                "orders": state.order_ids().len(),
                "events": state.event_count(),
                "hash": hash,
            }))?;
        }
        Command::Verify => {
            let verification = session.verify()?;
            print_json(&verification)?;
            if !verification.is_clean() {
                bail!("drift detected");
            }
        }
        Command::Snapshot => {
            let path = session.take_snapshot()?;
            println!("{}", path.display());
        }
    }

    Ok(())
}
