//! Configuration for fulfillment-track
//!
//! CLI arguments with environment fallbacks (clap), plus an optional JSON
//! file for the settings that do not fit on a command line: the stage
//! catalog, snapshot cadence and notification buffer size.

use std::fs;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use fulfillment_kernel::catalog::{reference_definitions, CatalogError, StageCatalog, StageDefinition};

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid stage catalog: {0}")]
    Catalog(#[from] CatalogError),

    #[error("notification_capacity must be at least 1")]
    NotificationCapacity,
}

/// File-level settings. Every field is optional in the file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrackingConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Records between automatic snapshots; 0 turns them off.
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval: u64,

    /// Broadcast buffer per UI subscriber.
    #[serde(default = "default_notification_capacity")]
    pub notification_capacity: usize,

    #[serde(default = "reference_definitions")]
    pub stages: Vec<StageDefinition>,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("./fulfillment-data")
}

fn default_snapshot_interval() -> u64 {
    100
}

fn default_notification_capacity() -> usize {
    256
}

impl Default for TrackingConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            snapshot_interval: default_snapshot_interval(),
            notification_capacity: default_notification_capacity(),
            stages: reference_definitions(),
        }
    }
}

impl TrackingConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn catalog(&self) -> Result<StageCatalog, ConfigError> {
        Ok(StageCatalog::from_definitions(&self.stages)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.notification_capacity == 0 {
            return Err(ConfigError::NotificationCapacity);
        }
        self.catalog().map(|_| ())
    }
}

/// fulfillment-track - farm-to-table order stage tracking
#[derive(Parser, Debug, Clone)]
#[command(name = "fulfillment-track")]
#[command(about = "Record and inspect farm-to-table fulfillment stages")]
pub struct Args {
    /// JSON configuration file
    #[arg(long, env = "FULFILLMENT_CONFIG")]
    pub config: Option<PathBuf>,

    /// Data directory holding events.log and snapshots/ (overrides the file)
    #[arg(long, env = "FULFILLMENT_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Record a stage event for an order
    Append {
        order_id: String,
        stage_id: String,
        /// RFC 3339 time the stage was reached (defaults to now)
        #[arg(long)]
        at: Option<String>,
        #[arg(long)]
        location: Option<String>,
        #[arg(long)]
        notes: Option<String>,
        /// Photo reference; repeat for several
        #[arg(long = "photo")]
        photo_refs: Vec<String>,
    },
    /// List an order's events, oldest first
    Events { order_id: String },
    /// Show an order's progress
    Project { order_id: String },
    /// Show every catalog stage with its status for an order
    Timeline { order_id: String },
    /// Summarize all orders
    Overview,
    /// Rebuild from the event log and print the canonical hash
    Replay,
    /// Check snapshots and the live ledger against a full replay
    Verify,
    /// Write a snapshot now
    Snapshot,
}

impl Args {
    /// File settings (or defaults) with CLI overrides applied, validated.
    pub fn resolve(&self) -> Result<TrackingConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => TrackingConfig::load(path)?,
            None => TrackingConfig::default(),
        };
        if let Some(dir) = &self.data_dir {
            config.data_dir = dir.clone();
        }
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_means_defaults() {
        let config: TrackingConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config, TrackingConfig::default());
        assert_eq!(config.catalog().unwrap().total_stages(), 6);
    }

    #[test]
    fn unknown_key_rejected() {
        assert!(serde_json::from_str::<TrackingConfig>(r#"{"snapshot_every": 5}"#).is_err());
    }

    #[test]
    fn duplicate_stage_fails_validation() {
        let config: TrackingConfig = serde_json::from_str(
            r#"{"stages": [
                {"id": "sowing", "label": "Sowing"},
                {"id": "sowing", "label": "Again"}
            ]}"#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Catalog(CatalogError::DuplicateStageId(_)))
        ));
    }

    #[test]
    fn cli_data_dir_overrides_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tracking.json");
        fs::write(&path, r#"{"data_dir": "/srv/farm", "snapshot_interval": 0}"#).unwrap();

        let args = Args::parse_from([
            "fulfillment-track",
            "--config",
            path.to_str().unwrap(),
            "--data-dir",
            "/tmp/override",
            "overview",
        ]);
        let config = args.resolve().unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/override"));
        assert_eq!(config.snapshot_interval, 0);
    }

    #[test]
    fn append_collects_repeated_photos() {
        let args = Args::parse_from([
            "fulfillment-track",
            "append",
            "FTO-2024-001",
            "packaging",
            "--photo",
            "a.jpg",
            "--photo",
            "b.jpg",
        ]);
        match args.command {
            Command::Append { photo_refs, at, .. } => {
                assert_eq!(photo_refs, vec!["a.jpg", "b.jpg"]);
                assert!(at.is_none());
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
