//! Data loading and feature engineering modules

pub mod csv_loader;
pub mod detailed_stats;
pub mod features;
pub mod odds_loader;
pub mod resolver;
pub mod tables;

// Re-export commonly used types
pub use csv_loader::RaceDataset;
pub use detailed_stats::DetailedStats;
pub use features::{feature_names, FeatureBuilder, FeatureConfig, FeatureFrame};
pub use odds_loader::{load_odds, OddsFile};
pub use resolver::{resolve, ResolvedStats};
pub use tables::FeatureTables;
