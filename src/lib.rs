//! Boatrace Forecast - finishing-position prediction for six-boat races
//!
//! This library provides:
//! - Statistic resolution and per-race feature vectors
//! - A gradient-boosted position model trained with time-decay weights
//! - Win, exacta, quinella, trifecta and trio probabilities with expected values
//! - Backtesting with drift detection and SQLite persistence
//!
//! # Example
//!
//! ```no_run
//! use boatrace_forecast::{FeatureBuilder, PositionModel, RacePredictor};
//! # fn race() -> boatrace_forecast::RaceContext { unimplemented!() }
//!
//! let model = PositionModel::load("models/position_model.bin").unwrap();
//! let predictor = RacePredictor::new(model, FeatureBuilder::default());
//! let prediction = predictor.predict(&race(), None, Some(10)).unwrap();
//! for p in &prediction.predictions {
//!     println!("{}: {}", p.bet_type.name(), p.combinations[0].key);
//! }
//! ```

pub mod backtesting;
pub mod config;
pub mod core;
pub mod data;
pub mod error;
pub mod model;
pub mod models;
pub mod predictor;
pub mod store;

// Re-export commonly used types
pub use config::EngineConfig;
pub use crate::core::{CombinationEngine, PositionMatrix, ScoredCombination};
pub use data::{FeatureBuilder, FeatureFrame, FeatureTables, RaceDataset};
pub use error::{EngineError, Result};
pub use model::{PositionModel, PositionPredictor, Trainer, TrainingConfig};
pub use models::{
    BetType, BetTypePrediction, Competitor, HistoricalRace, OddsBook, PositionProb,
    PredictRequest, PredictResponse, RaceContext, RaceKey, RaceOutcome,
};
pub use predictor::{RacePredictor, RacePrediction};
