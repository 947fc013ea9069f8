//! Stage catalog: the fixed farm-to-table sequence.
//!
//! Built once from an ordered list of definitions; ordinals are list
//! positions. Read-only after construction.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::arithmetic::is_valid_token;

/// One fixed step in the farm-to-table sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stage {
    pub id: String,
    pub ordinal: usize,
    pub label: String,
    pub description: String,
}

/// Configuration entry for a stage. The ordinal is implied by position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StageDefinition {
    pub id: String,
    pub label: String,
    #[serde(default)]
    pub description: String,
}

impl StageDefinition {
    pub fn new(id: &str, label: &str, description: &str) -> Self {
        Self {
            id: id.to_string(),
            label: label.to_string(),
            description: description.to_string(),
        }
    }
}

/// Catalog misconfiguration. Fatal at startup.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CatalogError {
    #[error("stage catalog is empty")]
    Empty,
    #[error("stage id {0:?} is invalid: must match [a-zA-Z0-9_-]+")]
    InvalidStageId(String),
    #[error("stage id {0:?} appears more than once")]
    DuplicateStageId(String),
    #[error("stage {0:?} has an empty label")]
    EmptyLabel(String),
}

/// Ordered, immutable stage sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageCatalog {
    stages: Vec<Stage>,
    by_id: BTreeMap<String, usize>,
}

impl StageCatalog {
    /// Build a catalog from ordered definitions.
    pub fn from_definitions(definitions: &[StageDefinition]) -> Result<Self, CatalogError> {
        if definitions.is_empty() {
            return Err(CatalogError::Empty);
        }

        let mut stages = Vec::with_capacity(definitions.len());
        let mut by_id = BTreeMap::new();

        for (ordinal, def) in definitions.iter().enumerate() {
            if !is_valid_token(&def.id) {
                return Err(CatalogError::InvalidStageId(def.id.clone()));
            }
            if def.label.trim().is_empty() {
                return Err(CatalogError::EmptyLabel(def.id.clone()));
            }
            if by_id.insert(def.id.clone(), ordinal).is_some() {
                return Err(CatalogError::DuplicateStageId(def.id.clone()));
            }
            stages.push(Stage {
                id: def.id.clone(),
                ordinal,
                label: def.label.clone(),
                description: def.description.clone(),
            });
        }

        Ok(Self { stages, by_id })
    }

    /// The six-stage sequence the subscription service ships with.
    pub fn reference() -> Self {
        let stages: Vec<Stage> = reference_definitions()
            .into_iter()
            .enumerate()
            .map(|(ordinal, def)| Stage {
                id: def.id,
                ordinal,
                label: def.label,
                description: def.description,
            })
            .collect();
        let by_id = stages
            .iter()
            .map(|s| (s.id.clone(), s.ordinal))
            .collect();
        Self { stages, by_id }
    }

    pub fn stage_by_ordinal(&self, ordinal: usize) -> Option<&Stage> {
        self.stages.get(ordinal)
    }

    pub fn stage_by_id(&self, id: &str) -> Option<&Stage> {
        self.by_id.get(id).map(|&ordinal| &self.stages[ordinal])
    }

    pub fn total_stages(&self) -> usize {
        self.stages.len()
    }

    /// The stage after `id`. `None` for the terminal stage and for ids the
    /// catalog does not know.
    pub fn next_stage(&self, id: &str) -> Option<&Stage> {
        let ordinal = *self.by_id.get(id)?;
        self.stages.get(ordinal + 1)
    }

    /// Last stage of the sequence. Construction guarantees one exists.
    pub fn terminal_stage(&self) -> &Stage {
        &self.stages[self.stages.len() - 1]
    }

    pub fn is_terminal(&self, id: &str) -> bool {
        self.terminal_stage().id == id
    }

    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// SHA-256 over the ordered (id, label) pairs. Lowercase hex.
    ///
    /// Descriptions are display text and do not take part.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for stage in &self.stages {
            hasher.update(stage.id.as_bytes());
            hasher.update([0x1f]);
            hasher.update(stage.label.as_bytes());
            hasher.update([0x1e]);
        }
        hex::encode(hasher.finalize())
    }
}

/// Definitions behind [`StageCatalog::reference`], in order.
pub fn reference_definitions() -> Vec<StageDefinition> {
    vec![
        StageDefinition::new("sowing", "Sowing Started", "Seeds planted in organic soil"),
        StageDefinition::new(
            "growing",
            "Growing Phase",
            "Crops are growing with organic care",
        ),
        StageDefinition::new(
            "harvesting",
            "Ready for Harvest",
            "Crops have matured and ready for picking",
        ),
        StageDefinition::new(
            "packaging",
            "Packaging",
            "Fresh produce being carefully packaged",
        ),
        StageDefinition::new("dispatch", "Out for Delivery", "Your order is on the way"),
        StageDefinition::new(
            "delivered",
            "Delivered",
            "Fresh organic produce delivered to your door",
        ),
    ]
}
