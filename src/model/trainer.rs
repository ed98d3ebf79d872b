//! Training pipeline for the position model
//!
//! Races are turned into feature frames, split into train/holdout by race,
//! weighted by time decay and fed to the booster. Holdout metrics are
//! computed race by race so the win and exacta figures line up with the
//! backtest definitions.

use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::{info, warn};

use super::gbdt::{Booster, GbdtParams};
use super::{ModelArtifact, PositionModel};
use crate::core::combination::{is_hit, CombinationEngine};
use crate::core::matrix::PositionMatrix;
use crate::core::weighting::time_decay_weights;
use crate::data::features::FeatureBuilder;
use crate::error::{EngineError, Result};
use crate::models::{BetType, HistoricalRace, RaceKey, RaceOutcome, NUM_BOATS};

const LOG_LOSS_EPS: f64 = 1e-15;

/// Training settings beyond the booster hyper-parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub params: GbdtParams,
    pub half_life_years: f64,
    /// Share of races held out for evaluation
    pub holdout_fraction: f64,
    /// Date weights decay from (YYYYMMDD); newest race date when unset
    pub reference_date: Option<u32>,
    pub version: String,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            params: GbdtParams::default(),
            half_life_years: 2.5,
            holdout_fraction: 0.2,
            reference_date: None,
            version: format!("gbdt-v{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl TrainingConfig {
    pub fn validate(&self) -> Result<()> {
        self.params.validate()?;
        if !self.half_life_years.is_finite() || self.half_life_years <= 0.0 {
            return Err(EngineError::Config(format!(
                "half_life_years must be positive, got {}",
                self.half_life_years
            )));
        }
        if !(self.holdout_fraction > 0.0 && self.holdout_fraction < 1.0) {
            return Err(EngineError::Config(format!(
                "holdout_fraction must be in (0, 1), got {}",
                self.holdout_fraction
            )));
        }
        Ok(())
    }
}

/// One race's feature rows with its outcome
#[derive(Debug, Clone)]
pub struct RaceSample {
    pub key: RaceKey,
    pub boat_numbers: Vec<u8>,
    pub rows: Vec<Vec<f64>>,
    pub outcome: RaceOutcome,
}

impl RaceSample {
    /// Finishing class (0-based position) per row, when known
    fn labels(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.boat_numbers
            .iter()
            .enumerate()
            .filter_map(|(row, &boat)| {
                self.outcome
                    .position_of(boat)
                    .filter(|p| (1..=NUM_BOATS as u8).contains(p))
                    .map(|p| (row, (p - 1) as usize))
            })
    }
}

/// Feature frames for a batch of races
#[derive(Debug, Clone, Default)]
pub struct TrainingData {
    pub feature_names: Vec<String>,
    pub samples: Vec<RaceSample>,
    pub skipped_races: usize,
}

impl TrainingData {
    /// Build frames for every race; races failing validation are skipped
    pub fn assemble<'a, I>(races: I, builder: &FeatureBuilder) -> Self
    where
        I: IntoIterator<Item = &'a HistoricalRace>,
    {
        let mut data = TrainingData::default();
        for race in races {
            match builder.build(&race.context) {
                Ok(frame) => {
                    if data.feature_names.is_empty() {
                        data.feature_names = frame.names().to_vec();
                    }
                    data.samples.push(RaceSample {
                        key: race.context.key,
                        boat_numbers: frame.boat_numbers.clone(),
                        rows: frame.rows().to_vec(),
                        outcome: race.outcome.clone(),
                    });
                }
                Err(e) => {
                    warn!("Skipping race {}: {}", race.context.key, e);
                    data.skipped_races += 1;
                }
            }
        }
        data
    }

    pub fn newest_date(&self) -> Option<u32> {
        self.samples.iter().map(|s| s.key.date).max()
    }
}

/// Split race indices into (train, holdout) with a seeded shuffle
pub fn split_holdout(num_races: usize, fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut indices: Vec<usize> = (0..num_races).collect();
    let mut rng = StdRng::seed_from_u64(seed);
    indices.shuffle(&mut rng);

    let holdout_len = ((num_races as f64) * fraction).round() as usize;
    let holdout_len = holdout_len.min(num_races.saturating_sub(1));
    let holdout: HashSet<usize> = indices[..holdout_len].iter().copied().collect();

    let (mut test, mut train): (Vec<usize>, Vec<usize>) =
        (0..num_races).partition(|i| holdout.contains(i));
    train.sort_unstable();
    test.sort_unstable();
    (train, test)
}

/// Holdout evaluation results
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingMetrics {
    pub accuracy: f64,
    pub log_loss: f64,
    /// Share of races where the top 1st-place probability is the winner
    pub win_accuracy: f64,
    /// Share of races whose winner is among the top 3 by 1st-place probability
    pub top3_accuracy: f64,
    /// Share of races whose exacta is among the top 5 ranked exactas
    pub exacta_top5_accuracy: f64,
    pub holdout_rows: usize,
    pub holdout_races: usize,
}

/// Result of a training run
#[derive(Debug, Clone)]
pub struct TrainingReport {
    pub model: PositionModel,
    /// None when there were too few races for a holdout
    pub metrics: Option<TrainingMetrics>,
    pub train_rows: usize,
    pub train_races: usize,
    pub skipped_races: usize,
}

/// Trains position models from historical races
pub struct Trainer {
    config: TrainingConfig,
    builder: FeatureBuilder,
}

impl Trainer {
    pub fn new(config: TrainingConfig, builder: FeatureBuilder) -> Self {
        Self { config, builder }
    }

    pub fn train<'a, I>(&self, races: I) -> Result<TrainingReport>
    where
        I: IntoIterator<Item = &'a HistoricalRace>,
    {
        self.config.validate()?;
        let data = TrainingData::assemble(races, &self.builder);
        if data.samples.is_empty() {
            return Err(EngineError::Validation(
                "No valid races to train on".to_string(),
            ));
        }

        let (train_idx, holdout_idx) = split_holdout(
            data.samples.len(),
            self.config.holdout_fraction,
            self.config.params.seed,
        );

        let mut rows = Vec::new();
        let mut labels = Vec::new();
        let mut dates = Vec::new();
        for &i in &train_idx {
            let sample = &data.samples[i];
            for (row, label) in sample.labels() {
                rows.push(sample.rows[row].clone());
                labels.push(label);
                dates.push(sample.key.date);
            }
        }
        if rows.is_empty() {
            return Err(EngineError::Validation(
                "No competitors with a finishing position in the training races".to_string(),
            ));
        }

        let reference = self.config.reference_date.or_else(|| data.newest_date());
        let weights = time_decay_weights(&dates, reference, self.config.half_life_years)?;

        info!(
            "Training on {} rows from {} races ({} held out, {} skipped)",
            rows.len(),
            train_idx.len(),
            holdout_idx.len(),
            data.skipped_races
        );
        let booster = Booster::train(&rows, &labels, &weights, NUM_BOATS, &self.config.params)?;

        let model = PositionModel::from_artifact(ModelArtifact {
            version: self.config.version.clone(),
            feature_names: data.feature_names.clone(),
            booster,
            params: self.config.params.clone(),
            trained_at: Utc::now().to_rfc3339(),
        });

        let holdout: Vec<&RaceSample> = holdout_idx.iter().map(|&i| &data.samples[i]).collect();
        let metrics = if holdout.is_empty() {
            None
        } else {
            let metrics = evaluate(&model, &holdout)?;
            info!(
                "Holdout: accuracy {:.3}, log-loss {:.4}, win {:.3}, top3 {:.3}, exacta@5 {:.3}",
                metrics.accuracy,
                metrics.log_loss,
                metrics.win_accuracy,
                metrics.top3_accuracy,
                metrics.exacta_top5_accuracy
            );
            Some(metrics)
        };

        Ok(TrainingReport {
            model,
            metrics,
            train_rows: rows.len(),
            train_races: train_idx.len(),
            skipped_races: data.skipped_races,
        })
    }
}

fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.total_cmp(b.1))
        .map(|(i, _)| i)
        .unwrap_or(0)
}

/// Holdout metrics for a bound model over race samples
pub fn evaluate(model: &PositionModel, samples: &[&RaceSample]) -> Result<TrainingMetrics> {
    let booster = &model.artifact()?.booster;

    let mut rows_seen = 0usize;
    let mut correct = 0usize;
    let mut log_loss_sum = 0.0;
    let mut races_with_winner = 0usize;
    let mut win_hits = 0usize;
    let mut top3_hits = 0usize;
    let mut races_with_podium = 0usize;
    let mut exacta_hits = 0usize;

    for sample in samples {
        let probs = sample
            .rows
            .iter()
            .map(|row| booster.predict_proba(row))
            .collect::<Result<Vec<_>>>()?;

        for (row, label) in sample.labels() {
            rows_seen += 1;
            if argmax(&probs[row]) == label {
                correct += 1;
            }
            log_loss_sum -= probs[row][label].max(LOG_LOSS_EPS).ln();
        }

        if let Some(winner) = sample.outcome.boat_at(1) {
            races_with_winner += 1;
            let mut by_first: Vec<usize> = (0..probs.len()).collect();
            by_first.sort_by(|&a, &b| probs[b][0].total_cmp(&probs[a][0]));
            let top_boats: Vec<u8> = by_first.iter().map(|&r| sample.boat_numbers[r]).collect();
            if top_boats.first() == Some(&winner) {
                win_hits += 1;
            }
            if top_boats.iter().take(3).any(|&b| b == winner) {
                top3_hits += 1;
            }
        }

        if let Some(podium) = sample.outcome.podium() {
            if let Ok(matrix) = PositionMatrix::new(&probs, &sample.boat_numbers) {
                races_with_podium += 1;
                let top5 = CombinationEngine::new(&matrix).ranked(BetType::Exacta, Some(5));
                if top5.iter().any(|c| is_hit(BetType::Exacta, &c.boats, podium)) {
                    exacta_hits += 1;
                }
            }
        }
    }

    let ratio = |hits: usize, total: usize| {
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    };

    Ok(TrainingMetrics {
        accuracy: ratio(correct, rows_seen),
        log_loss: if rows_seen == 0 {
            0.0
        } else {
            log_loss_sum / rows_seen as f64
        },
        win_accuracy: ratio(win_hits, races_with_winner),
        top3_accuracy: ratio(top3_hits, races_with_winner),
        exacta_top5_accuracy: ratio(exacta_hits, races_with_podium),
        holdout_rows: rows_seen,
        holdout_races: samples.len(),
    })
}
