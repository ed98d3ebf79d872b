//! Backtesting engine for validating position predictions

pub mod evaluator;
pub mod metrics;

pub use evaluator::{score_race, BacktestConfig, BacktestEvaluator, BacktestResult};
pub use metrics::{detect_drift, DriftAlert, HitCounters, HitMetric};
