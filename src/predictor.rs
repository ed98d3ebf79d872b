//! Single-race prediction pipeline
//!
//! Race context -> feature frame -> position matrix -> ranked combinations
//! for every bet type, with expected values when odds are supplied.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::core::combination::{value_bets, CombinationEngine, ScoredCombination};
use crate::core::matrix::PositionMatrix;
use crate::data::features::FeatureBuilder;
use crate::error::Result;
use crate::model::{PositionModel, PositionPredictor};
use crate::models::{BetType, BetTypePrediction, OddsBook, PredictResponse, RaceContext, RaceKey};

/// Everything predicted for one race
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RacePrediction {
    pub race: RaceKey,
    pub model_version: String,
    pub matrix: PositionMatrix,
    pub predictions: Vec<BetTypePrediction>,
    pub value_bets: Vec<ScoredCombination>,
}

impl RacePrediction {
    pub fn for_bet_type(&self, bet_type: BetType) -> Option<&BetTypePrediction> {
        self.predictions.iter().find(|p| p.bet_type == bet_type)
    }

    pub fn into_response(self) -> PredictResponse {
        PredictResponse {
            race_id: self.race.to_string(),
            model_version: self.model_version,
            position_probs: self.matrix.to_position_probs(),
            predictions: self.predictions,
            value_bets: self.value_bets,
        }
    }
}

/// Position model plus feature builder, ready to score races
pub struct RacePredictor<P: PositionPredictor = PositionModel> {
    model: P,
    builder: FeatureBuilder,
}

impl<P: PositionPredictor> RacePredictor<P> {
    pub fn new(model: P, builder: FeatureBuilder) -> Self {
        Self { model, builder }
    }

    pub fn model(&self) -> &P {
        &self.model
    }

    pub fn builder(&self) -> &FeatureBuilder {
        &self.builder
    }

    /// Position matrix for one race
    pub fn matrix(&self, race: &RaceContext) -> Result<PositionMatrix> {
        let features = self.builder.build(race)?;
        self.model.predict_positions(&features)
    }

    /// Ranked combinations for every bet type, truncated to `top_n`
    pub fn predict(
        &self,
        race: &RaceContext,
        odds: Option<&OddsBook>,
        top_n: Option<usize>,
    ) -> Result<RacePrediction> {
        let matrix = self.matrix(race)?;
        let engine = CombinationEngine::new(&matrix);
        let predictions = engine.predict_all(odds, top_n);
        let value_bets = value_bets(&predictions);
        debug!(
            "Race {}: {} value bets with {} odds",
            race.key,
            value_bets.len(),
            if odds.is_some() { "supplied" } else { "no" }
        );

        Ok(RacePrediction {
            race: race.key,
            model_version: self.model.version().to_string(),
            matrix,
            predictions,
            value_bets,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::features::FeatureFrame;
    use crate::error::EngineError;
    use crate::models::{Competitor, NUM_BOATS};

    /// Win probability proportional to win rate, flat elsewhere
    struct WinRatePredictor;

    impl PositionPredictor for WinRatePredictor {
        fn predict_positions(&self, features: &FeatureFrame) -> Result<PositionMatrix> {
            let rows: Vec<Vec<f64>> = (0..features.len())
                .map(|row| {
                    let win = features.value(row, "win_rate").unwrap_or(1.0);
                    let mut probs = vec![1.0; NUM_BOATS];
                    probs[0] = win;
                    probs
                })
                .collect();
            PositionMatrix::new(&rows, &features.boat_numbers)
        }

        fn version(&self) -> &str {
            "win-rate"
        }
    }

    fn race() -> RaceContext {
        RaceContext {
            key: RaceKey::new(20240115, 1, 5),
            weather: None,
            competitors: (1..=6u8)
                .map(|boat| Competitor {
                    boat_number: boat,
                    win_rate: Some(if boat == 3 { 8.0 } else { 4.0 }),
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_predict_ranks_all_bet_types() {
        let predictor = RacePredictor::new(WinRatePredictor, FeatureBuilder::default());
        let prediction = predictor.predict(&race(), None, Some(5)).unwrap();

        assert_eq!(prediction.predictions.len(), BetType::ALL.len());
        let win = prediction.for_bet_type(BetType::Win).unwrap();
        assert_eq!(win.combinations.len(), 5);
        assert_eq!(win.combinations[0].key, "3");
        assert!(prediction.value_bets.is_empty());

        let response = prediction.into_response();
        assert_eq!(response.race_id, "20240115_01_05");
        assert_eq!(response.model_version, "win-rate");
        assert_eq!(response.position_probs.len(), 6);
    }

    #[test]
    fn test_odds_produce_value_bets() {
        let predictor = RacePredictor::new(WinRatePredictor, FeatureBuilder::default());
        let mut odds = OddsBook::default();
        odds.win.insert("3".to_string(), 50.0);
        odds.win.insert("1".to_string(), 1.1);

        let prediction = predictor.predict(&race(), Some(&odds), None).unwrap();
        let win = prediction.for_bet_type(BetType::Win).unwrap();
        assert_eq!(win.combinations[0].key, "3");
        assert!(win.combinations[0].is_value_bet);
        assert_eq!(prediction.value_bets.len(), 1);
        assert_eq!(prediction.value_bets[0].key, "3");
    }

    #[test]
    fn test_unbound_model_fails() {
        let predictor = RacePredictor::new(PositionModel::unbound(), FeatureBuilder::default());
        assert!(matches!(
            predictor.predict(&race(), None, None),
            Err(EngineError::UnboundModel)
        ));
    }

    #[test]
    fn test_invalid_race_rejected() {
        let predictor = RacePredictor::new(WinRatePredictor, FeatureBuilder::default());
        let mut short = race();
        short.competitors.pop();
        assert!(predictor.predict(&short, None, None).is_err());
    }
}
