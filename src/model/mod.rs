//! Position probability model
//!
//! A six-class booster (finishing positions 1..6) bound to the ordered
//! feature-name list it was trained on. Inference aligns incoming feature
//! frames to that list and returns a row-normalized 6x6 matrix.

pub mod gbdt;
pub mod trainer;

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{info, warn};

use crate::core::matrix::PositionMatrix;
use crate::data::features::FeatureFrame;
use crate::error::{validate_entries_count, EngineError, Result};
use crate::models::NUM_BOATS;
use gbdt::{Booster, GbdtParams};

pub use trainer::{Trainer, TrainingConfig, TrainingMetrics, TrainingReport};

/// Anything that turns one race's feature frame into a position matrix
pub trait PositionPredictor {
    fn predict_positions(&self, features: &FeatureFrame) -> Result<PositionMatrix>;

    /// Label stored alongside persisted predictions and backtest runs
    fn version(&self) -> &str;
}

/// Serialized model bundle: classifier plus bound schema
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelArtifact {
    pub version: String,
    pub feature_names: Vec<String>,
    pub booster: Booster,
    pub params: GbdtParams,
    /// RFC 3339 training timestamp
    pub trained_at: String,
}

/// Position model; unbound until trained or loaded
#[derive(Debug, Clone, Default)]
pub struct PositionModel {
    artifact: Option<ModelArtifact>,
}

impl PositionModel {
    pub fn unbound() -> Self {
        Self::default()
    }

    pub fn from_artifact(artifact: ModelArtifact) -> Self {
        Self {
            artifact: Some(artifact),
        }
    }

    /// Load a bincode artifact from disk
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let bytes = fs::read(path.as_ref())?;
        let artifact: ModelArtifact = bincode::deserialize(&bytes)?;
        if artifact.feature_names.len() != artifact.booster.num_features() {
            return Err(EngineError::FeatureCountMismatch {
                expected: artifact.booster.num_features(),
                actual: artifact.feature_names.len(),
            });
        }
        info!(
            "Loaded model {} ({} features, {} trees) from {}",
            artifact.version,
            artifact.feature_names.len(),
            artifact.booster.num_trees(),
            path.as_ref().display()
        );
        Ok(Self::from_artifact(artifact))
    }

    /// Write the bound artifact with bincode
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let artifact = self.artifact()?;
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let bytes = bincode::serialize(artifact)?;
        fs::write(path.as_ref(), bytes)?;
        info!("Saved model {} to {}", artifact.version, path.as_ref().display());
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.artifact.is_some()
    }

    pub fn artifact(&self) -> Result<&ModelArtifact> {
        self.artifact.as_ref().ok_or(EngineError::UnboundModel)
    }

    pub fn feature_names(&self) -> Result<&[String]> {
        Ok(&self.artifact()?.feature_names)
    }

    /// Features ranked by accumulated split gain, normalized to sum to 1
    pub fn feature_importance(&self) -> Result<Vec<(String, f64)>> {
        let artifact = self.artifact()?;
        let gains = artifact.booster.feature_importance();
        let total: f64 = gains.iter().sum();
        let mut ranked: Vec<(String, f64)> = artifact
            .feature_names
            .iter()
            .zip(gains)
            .map(|(name, gain)| {
                let share = if total > 0.0 { gain / total } else { 0.0 };
                (name.clone(), share)
            })
            .collect();
        ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
        Ok(ranked)
    }
}

impl PositionPredictor for PositionModel {
    fn predict_positions(&self, features: &FeatureFrame) -> Result<PositionMatrix> {
        let artifact = self.artifact()?;
        validate_entries_count(features.len())?;

        let (rows, missing, extra) = features.align_to(&artifact.feature_names);
        if !missing.is_empty() {
            warn!(
                "Race {}: {} bound features missing, zero-filled: {:?}",
                features.race,
                missing.len(),
                missing
            );
        }
        if !extra.is_empty() {
            warn!(
                "Race {}: dropping {} unbound features: {:?}",
                features.race,
                extra.len(),
                extra
            );
        }

        let probs = rows
            .iter()
            .map(|row| artifact.booster.predict_proba(row))
            .collect::<Result<Vec<_>>>()?;
        if probs.iter().any(|p| p.len() != NUM_BOATS) {
            return Err(EngineError::InvalidMatrixShape {
                rows: probs.len(),
                cols: artifact.booster.num_classes(),
            });
        }

        PositionMatrix::new(&probs, &features.boat_numbers)
    }

    fn version(&self) -> &str {
        self.artifact
            .as_ref()
            .map(|a| a.version.as_str())
            .unwrap_or("unbound")
    }
}
