pub mod combination;
pub mod matrix;
pub mod weighting;

pub use combination::{
    expected_value, is_hit, value_bets, Combination, CombinationEngine, ScoredCombination,
    VALUE_BET_THRESHOLD,
};
pub use matrix::PositionMatrix;
pub use weighting::{decay_weight, time_decay_weights};
