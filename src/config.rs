//! Engine configuration loaded from TOML
//!
//! Every section falls back to its defaults, so an empty file is a valid
//! configuration.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing_subscriber::{fmt, EnvFilter};

use crate::backtesting::BacktestConfig;
use crate::data::features::{FeatureBuilder, FeatureConfig};
use crate::data::tables::FeatureTables;
use crate::error::{EngineError, Result};
use crate::model::TrainingConfig;

/// Logging configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl LoggingConfig {
    /// Initialize the tracing subscriber; `RUST_LOG` wins over `level`.
    pub fn init(&self) {
        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&self.level));

        // A subscriber may already be installed (tests, embedding binaries)
        let _ = match self.format.as_str() {
            "json" => fmt().json().with_env_filter(filter).try_init(),
            _ => fmt().with_env_filter(filter).try_init(),
        };
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

/// File locations and persistence settings
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub db_path: PathBuf,
    pub model_path: PathBuf,
    pub races_csv: PathBuf,
    pub odds_dir: PathBuf,
    /// Label stored with predictions and backtest runs instead of the artifact's own version
    pub model_version: Option<String>,
}

impl StorageConfig {
    /// Version recorded in the store for a model
    pub fn version_label(&self, model_version: &str) -> String {
        self.model_version
            .clone()
            .unwrap_or_else(|| model_version.to_string())
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("data/boatrace.sqlite"),
            model_path: PathBuf::from("models/position_model.bin"),
            races_csv: PathBuf::from("data/races.csv"),
            odds_dir: PathBuf::from("data/odds"),
            model_version: None,
        }
    }
}

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub logging: LoggingConfig,
    pub tables: FeatureTables,
    pub features: FeatureConfig,
    pub model: TrainingConfig,
    pub backtest: BacktestConfig,
    pub storage: StorageConfig,
}

impl EngineConfig {
    /// Parse configuration from a TOML string and validate it
    pub fn parse_toml(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            EngineError::Config(format!("cannot read {}: {}", path.as_ref().display(), e))
        })?;
        Self::parse_toml(&content)
    }

    /// Load from `path` when given, defaults otherwise
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<()> {
        self.tables.validate()?;
        self.features.validate()?;
        self.model.validate()?;
        self.backtest.validate()?;
        Ok(())
    }

    pub fn feature_builder(&self) -> FeatureBuilder {
        FeatureBuilder::new(self.tables.clone(), self.features.clone())
    }
}
