//! Backtest Evaluator
//!
//! Replays historical races through features, position model and
//! combination engine, and counts hits against the actual podium.

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use super::metrics::{detect_drift, print_summary, DriftAlert, HitCounters, HitMetric};
use crate::core::combination::{is_hit, CombinationEngine};
use crate::core::matrix::PositionMatrix;
use crate::data::features::FeatureBuilder;
use crate::error::{EngineError, Result};
use crate::model::PositionPredictor;
use crate::models::{BetType, HistoricalRace, NUM_BOATS};

/// Deepest truncation any metric looks at
const MAX_DEPTH: usize = 20;

/// Backtest evaluator configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BacktestConfig {
    /// Drop in percentage points that raises a drift alert
    pub drift_threshold: f64,
    /// Evaluate races on the rayon pool
    pub parallel: bool,
}

impl Default for BacktestConfig {
    fn default() -> Self {
        Self {
            drift_threshold: 5.0,
            parallel: true,
        }
    }
}

impl BacktestConfig {
    pub fn validate(&self) -> Result<()> {
        if !self.drift_threshold.is_finite() || self.drift_threshold < 0.0 {
            return Err(EngineError::Config(format!(
                "drift_threshold must be a non-negative number, got {}",
                self.drift_threshold
            )));
        }
        Ok(())
    }
}

/// Backtest result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BacktestResult {
    pub model_version: String,
    pub counters: HitCounters,
    pub alerts: Vec<DriftAlert>,
}

impl BacktestResult {
    pub fn rates(&self) -> BTreeMap<String, f64> {
        self.counters.rates()
    }

    pub fn has_drift(&self) -> bool {
        !self.alerts.is_empty()
    }

    pub fn print_summary(&self) {
        println!("Model: {}", self.model_version);
        print_summary(&self.counters, &self.alerts);
    }
}

/// Metrics hit by one race's matrix given the actual 1st/2nd/3rd
pub fn score_race(matrix: &PositionMatrix, podium: (u8, u8, u8)) -> Vec<HitMetric> {
    let engine = CombinationEngine::new(matrix);
    let mut hits = Vec::new();

    let winner_rank = engine
        .ranked(BetType::Win, Some(3))
        .iter()
        .position(|c| c.boats.first() == Some(&podium.0));
    if let Some(rank) = winner_rank {
        if rank == 0 {
            hits.push(HitMetric::Win);
        }
        if rank < 2 {
            hits.push(HitMetric::Top2);
        }
        hits.push(HitMetric::Top3);
    }

    let depths: [(BetType, &[(usize, HitMetric)]); 4] = [
        (BetType::Exacta, &[(5, HitMetric::ExactaTop5), (10, HitMetric::ExactaTop10)]),
        (BetType::Quinella, &[(5, HitMetric::QuinellaTop5)]),
        (BetType::Trifecta, &[(10, HitMetric::TrifectaTop10), (20, HitMetric::TrifectaTop20)]),
        (BetType::Trio, &[(10, HitMetric::TrioTop10)]),
    ];
    for (bet_type, cutoffs) in depths {
        let ranked = engine.ranked(bet_type, Some(MAX_DEPTH));
        let hit_rank = ranked
            .iter()
            .position(|c| is_hit(bet_type, &c.boats, podium));
        if let Some(rank) = hit_rank {
            for &(depth, metric) in cutoffs {
                if rank < depth {
                    hits.push(metric);
                }
            }
        }
    }

    hits
}

/// Runs a predictor over historical races
pub struct BacktestEvaluator<'a, P: PositionPredictor> {
    pub config: BacktestConfig,
    predictor: &'a P,
    builder: &'a FeatureBuilder,
}

impl<'a, P: PositionPredictor + Sync> BacktestEvaluator<'a, P> {
    pub fn new(predictor: &'a P, builder: &'a FeatureBuilder, config: BacktestConfig) -> Self {
        Self {
            config,
            predictor,
            builder,
        }
    }

    /// Hits for one race; `None` when the race has no usable result
    pub fn evaluate_race(&self, race: &HistoricalRace) -> Result<Option<Vec<HitMetric>>> {
        if race.context.competitors.len() != NUM_BOATS {
            return Ok(None);
        }
        let podium = match race.outcome.podium() {
            Some(p) => p,
            None => return Ok(None),
        };
        let features = self.builder.build(&race.context)?;
        let matrix = self.predictor.predict_positions(&features)?;
        Ok(Some(score_race(&matrix, podium)))
    }

    fn tally(&self, race: &HistoricalRace) -> HitCounters {
        let mut counters = HitCounters::default();
        match self.evaluate_race(race) {
            Ok(Some(hits)) => counters.record_evaluated(&hits),
            Ok(None) => {
                debug!("Race {}: incomplete result, skipped", race.context.key);
                counters.record_skipped();
            }
            Err(e) => {
                warn!("Race {}: skipped ({})", race.context.key, e);
                counters.record_skipped();
            }
        }
        counters
    }

    /// Evaluate every race; `tick` is called once per race
    pub fn run_with<F>(&self, races: &[&HistoricalRace], tick: F) -> HitCounters
    where
        F: Fn() + Sync,
    {
        let counters = if self.config.parallel {
            races
                .par_iter()
                .map(|race| {
                    let c = self.tally(race);
                    tick();
                    c
                })
                .reduce(HitCounters::default, |mut a, b| {
                    a.merge(&b);
                    a
                })
        } else {
            let mut total = HitCounters::default();
            for race in races {
                total.merge(&self.tally(race));
                tick();
            }
            total
        };

        info!(
            "Backtest finished: {} races, {} evaluated, {} skipped",
            counters.total_races, counters.evaluated, counters.skipped
        );
        counters
    }

    pub fn run(&self, races: &[&HistoricalRace]) -> HitCounters {
        self.run_with(races, || {})
    }

    /// Compare against the previous run's rates and assemble the result
    pub fn finish(
        &self,
        counters: HitCounters,
        previous_rates: Option<&BTreeMap<String, f64>>,
    ) -> BacktestResult {
        let alerts = match previous_rates {
            Some(previous) => detect_drift(previous, &counters.rates(), self.config.drift_threshold),
            None => {
                info!("No previous backtest run, drift check skipped");
                Vec::new()
            }
        };
        for alert in &alerts {
            warn!("Drift alert: {}", alert);
        }
        BacktestResult {
            model_version: self.predictor.version().to_string(),
            counters,
            alerts,
        }
    }
}
