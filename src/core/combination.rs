//! Wagering combination probabilities
//!
//! Every bet type is derived from the position matrix with the independence
//! approximation: a joint finish is scored as the product of each boat's
//! marginal for its slot. Unordered bets sum the products over orderings.
//! Each full set is normalized to sum to 1, stably sorted by descending
//! probability, then truncated.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::HashMap;

use super::matrix::PositionMatrix;
use crate::error::validate_odds;
use crate::models::{BetType, BetTypePrediction, OddsBook, NUM_BOATS};

/// Expected value above which a combination is flagged as a value bet
pub const VALUE_BET_THRESHOLD: f64 = 1.0;

/// A tuple of distinct boat numbers for one bet type
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Combination {
    pub bet_type: BetType,
    pub boats: Vec<u8>,
}

impl Combination {
    /// Unordered bet types keep their boats in ascending order
    pub fn new(bet_type: BetType, mut boats: Vec<u8>) -> Self {
        if !bet_type.is_ordered() {
            boats.sort_unstable();
        }
        Self { bet_type, boats }
    }

    /// Display key: "1-2-3" for ordered bets, "1=2=3" for unordered
    pub fn key(&self) -> String {
        let sep = if self.bet_type.is_ordered() { "-" } else { "=" };
        self.boats
            .iter()
            .map(|b| b.to_string())
            .collect::<Vec<_>>()
            .join(sep)
    }

    /// Parse a display key, accepting either separator.
    ///
    /// Returns None for wrong arity, repeated boats or boats outside 1-6.
    pub fn parse(bet_type: BetType, raw: &str) -> Option<Self> {
        let boats: Vec<u8> = raw
            .split(|c: char| c == '-' || c == '=')
            .map(|part| part.trim().parse::<u8>().ok())
            .collect::<Option<Vec<u8>>>()?;
        if boats.len() != bet_type.arity() {
            return None;
        }
        if boats.iter().any(|b| !(1..=NUM_BOATS as u8).contains(b)) {
            return None;
        }
        for (i, b) in boats.iter().enumerate() {
            if boats[..i].contains(b) {
                return None;
            }
        }
        Some(Self::new(bet_type, boats))
    }

    /// Whether this combination pays out for the given 1st/2nd/3rd finish
    pub fn is_hit(&self, podium: (u8, u8, u8)) -> bool {
        is_hit(self.bet_type, &self.boats, podium)
    }
}

/// Whether a combination of boats pays out for the given 1st/2nd/3rd finish
pub fn is_hit(bet_type: BetType, boats: &[u8], podium: (u8, u8, u8)) -> bool {
    let (first, second, third) = podium;
    match bet_type {
        BetType::Win => boats == [first],
        BetType::Exacta => boats == [first, second],
        BetType::Trifecta => boats == [first, second, third],
        BetType::Quinella => {
            boats.len() == 2 && boats.contains(&first) && boats.contains(&second)
        }
        BetType::Trio => {
            boats.len() == 3
                && boats.contains(&first)
                && boats.contains(&second)
                && boats.contains(&third)
        }
    }
}

/// A combination with its normalized probability and optional EV
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoredCombination {
    pub key: String,
    pub boats: Vec<u8>,
    pub probability: f64,
    pub odds: Option<f64>,
    pub expected_value: Option<f64>,
    pub is_value_bet: bool,
}

impl ScoredCombination {
    fn new(combination: Combination, probability: f64) -> Self {
        Self {
            key: combination.key(),
            boats: combination.boats,
            probability,
            odds: None,
            expected_value: None,
            is_value_bet: false,
        }
    }
}

/// Scores wagering combinations from one race's position matrix
pub struct CombinationEngine<'a> {
    matrix: &'a PositionMatrix,
}

impl<'a> CombinationEngine<'a> {
    pub fn new(matrix: &'a PositionMatrix) -> Self {
        Self { matrix }
    }

    fn boat(&self, row: usize) -> u8 {
        self.matrix.boat_numbers()[row]
    }

    /// P(row a 1st) x P(row b 2nd), before normalization
    pub fn exacta_raw(&self, first: usize, second: usize) -> f64 {
        self.matrix.prob(first, 0) * self.matrix.prob(second, 1)
    }

    /// P(row a 1st) x P(row b 2nd) x P(row c 3rd), before normalization
    pub fn trifecta_raw(&self, first: usize, second: usize, third: usize) -> f64 {
        self.exacta_raw(first, second) * self.matrix.prob(third, 2)
    }

    /// Every combination of a bet type with its un-normalized score,
    /// in enumeration order
    pub fn enumerate_raw(&self, bet_type: BetType) -> Vec<(Combination, f64)> {
        let n = NUM_BOATS;
        let mut out = Vec::new();
        match bet_type {
            BetType::Win => {
                for a in 0..n {
                    out.push((
                        Combination::new(bet_type, vec![self.boat(a)]),
                        self.matrix.prob(a, 0),
                    ));
                }
            }
            BetType::Exacta => {
                for a in 0..n {
                    for b in 0..n {
                        if a == b {
                            continue;
                        }
                        out.push((
                            Combination::new(bet_type, vec![self.boat(a), self.boat(b)]),
                            self.exacta_raw(a, b),
                        ));
                    }
                }
            }
            BetType::Trifecta => {
                for a in 0..n {
                    for b in 0..n {
                        if a == b {
                            continue;
                        }
                        for c in 0..n {
                            if c == a || c == b {
                                continue;
                            }
                            out.push((
                                Combination::new(
                                    bet_type,
                                    vec![self.boat(a), self.boat(b), self.boat(c)],
                                ),
                                self.trifecta_raw(a, b, c),
                            ));
                        }
                    }
                }
            }
            BetType::Quinella => {
                for a in 0..n {
                    for b in (a + 1)..n {
                        out.push((
                            Combination::new(bet_type, vec![self.boat(a), self.boat(b)]),
                            self.exacta_raw(a, b) + self.exacta_raw(b, a),
                        ));
                    }
                }
            }
            BetType::Trio => {
                for a in 0..n {
                    for b in (a + 1)..n {
                        for c in (b + 1)..n {
                            let score = self.trifecta_raw(a, b, c)
                                + self.trifecta_raw(a, c, b)
                                + self.trifecta_raw(b, a, c)
                                + self.trifecta_raw(b, c, a)
                                + self.trifecta_raw(c, a, b)
                                + self.trifecta_raw(c, b, a);
                            out.push((
                                Combination::new(
                                    bet_type,
                                    vec![self.boat(a), self.boat(b), self.boat(c)],
                                ),
                                score,
                            ));
                        }
                    }
                }
            }
        }
        out
    }

    /// Full normalized set in enumeration order.
    ///
    /// A set whose scores sum to zero is treated as uniform.
    pub fn probabilities(&self, bet_type: BetType) -> Vec<ScoredCombination> {
        let raw = self.enumerate_raw(bet_type);
        let total: f64 = raw.iter().map(|(_, p)| p).sum();
        let uniform = 1.0 / raw.len() as f64;
        raw.into_iter()
            .map(|(combination, p)| {
                let probability = if total > 0.0 { p / total } else { uniform };
                ScoredCombination::new(combination, probability)
            })
            .collect()
    }

    /// Normalized, sorted by descending probability, truncated to `top_n`
    pub fn ranked(&self, bet_type: BetType, top_n: Option<usize>) -> Vec<ScoredCombination> {
        let mut scored = self.probabilities(bet_type);
        sort_by_probability(&mut scored);
        truncate(&mut scored, top_n);
        scored
    }

    /// Rank with expected values against an odds lookup.
    ///
    /// EV is computed on the full normalized set. Valued combinations sort
    /// by descending EV; combinations without odds follow in probability
    /// order. Truncation happens last.
    pub fn ranked_with_odds(
        &self,
        bet_type: BetType,
        odds: &HashMap<String, f64>,
        top_n: Option<usize>,
    ) -> Vec<ScoredCombination> {
        let mut scored = self.probabilities(bet_type);
        sort_by_probability(&mut scored);
        for combo in &mut scored {
            let quoted = odds
                .get(&combo.key)
                .copied()
                .filter(|o| validate_odds(*o).is_ok());
            combo.odds = quoted;
            combo.expected_value = quoted.map(|o| expected_value(combo.probability, o));
            combo.is_value_bet = combo
                .expected_value
                .map(|ev| ev > VALUE_BET_THRESHOLD)
                .unwrap_or(false);
        }
        scored.sort_by(|a, b| match (a.expected_value, b.expected_value) {
            (Some(x), Some(y)) => y.total_cmp(&x),
            (Some(_), None) => Ordering::Less,
            (None, Some(_)) => Ordering::Greater,
            (None, None) => Ordering::Equal,
        });
        truncate(&mut scored, top_n);
        scored
    }

    /// Ranked lists for all five bet types
    pub fn predict_all(&self, odds: Option<&OddsBook>, top_n: Option<usize>) -> Vec<BetTypePrediction> {
        BetType::ALL
            .iter()
            .map(|&bet_type| {
                let combinations = match odds.map(|book| book.for_bet_type(bet_type)) {
                    Some(quotes) if !quotes.is_empty() => {
                        self.ranked_with_odds(bet_type, quotes, top_n)
                    }
                    _ => self.ranked(bet_type, top_n),
                };
                BetTypePrediction {
                    bet_type,
                    combinations,
                }
            })
            .collect()
    }
}

/// Expected value of a unit stake
pub fn expected_value(probability: f64, odds: f64) -> f64 {
    probability * odds
}

/// Combinations with EV above the value-bet threshold, best first
pub fn value_bets(predictions: &[BetTypePrediction]) -> Vec<ScoredCombination> {
    let mut bets: Vec<ScoredCombination> = predictions
        .iter()
        .flat_map(|p| p.combinations.iter())
        .filter(|c| c.is_value_bet)
        .cloned()
        .collect();
    bets.sort_by(|a, b| {
        b.expected_value
            .unwrap_or(0.0)
            .total_cmp(&a.expected_value.unwrap_or(0.0))
    });
    bets
}

fn sort_by_probability(scored: &mut [ScoredCombination]) {
    scored.sort_by(|a, b| b.probability.total_cmp(&a.probability));
}

fn truncate(scored: &mut Vec<ScoredCombination>, top_n: Option<usize>) {
    if let Some(n) = top_n {
        scored.truncate(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_matrix() -> PositionMatrix {
        PositionMatrix::from_rows(&[
            vec![0.50, 0.20, 0.10, 0.10, 0.05, 0.05],
            vec![0.20, 0.30, 0.20, 0.15, 0.10, 0.05],
            vec![0.12, 0.20, 0.30, 0.18, 0.12, 0.08],
            vec![0.08, 0.15, 0.20, 0.27, 0.18, 0.12],
            vec![0.06, 0.10, 0.12, 0.18, 0.30, 0.24],
            vec![0.04, 0.05, 0.08, 0.12, 0.25, 0.46],
        ])
        .unwrap()
    }

    #[test]
    fn test_combination_counts() {
        let matrix = create_test_matrix();
        let engine = CombinationEngine::new(&matrix);
        assert_eq!(engine.probabilities(BetType::Win).len(), 6);
        assert_eq!(engine.probabilities(BetType::Exacta).len(), 30);
        assert_eq!(engine.probabilities(BetType::Quinella).len(), 15);
        assert_eq!(engine.probabilities(BetType::Trifecta).len(), 120);
        assert_eq!(engine.probabilities(BetType::Trio).len(), 20);
    }

    #[test]
    fn test_each_set_sums_to_one() {
        let matrix = create_test_matrix();
        let engine = CombinationEngine::new(&matrix);
        for bet_type in BetType::ALL {
            let total: f64 = engine
                .probabilities(bet_type)
                .iter()
                .map(|c| c.probability)
                .sum();
            assert!((total - 1.0).abs() < 1e-9, "{:?} sums to {}", bet_type, total);
        }
    }

    #[test]
    fn test_keys_are_unique_and_canonical() {
        let matrix = create_test_matrix();
        let engine = CombinationEngine::new(&matrix);
        for bet_type in BetType::ALL {
            let combos = engine.probabilities(bet_type);
            let mut keys: Vec<&str> = combos.iter().map(|c| c.key.as_str()).collect();
            keys.sort_unstable();
            keys.dedup();
            assert_eq!(keys.len(), combos.len());
        }
        let quinella = engine.probabilities(BetType::Quinella);
        assert!(quinella.iter().all(|c| c.boats[0] < c.boats[1]));
        assert!(quinella.iter().any(|c| c.key == "1=2"));
        let trio = engine.probabilities(BetType::Trio);
        assert!(trio.iter().any(|c| c.key == "1=2=3"));
    }

    #[test]
    fn test_pure_function() {
        let matrix = create_test_matrix();
        let a = CombinationEngine::new(&matrix).ranked(BetType::Trifecta, None);
        let b = CombinationEngine::new(&matrix).ranked(BetType::Trifecta, None);
        assert_eq!(a, b);
    }

    #[test]
    fn test_quinella_is_sum_of_exactas() {
        let matrix = create_test_matrix();
        let engine = CombinationEngine::new(&matrix);
        let raw = engine.enumerate_raw(BetType::Quinella);
        let (combo, score) = raw
            .iter()
            .find(|(c, _)| c.boats == vec![2, 4])
            .unwrap();
        assert_eq!(combo.key(), "2=4");
        let expected = engine.exacta_raw(1, 3) + engine.exacta_raw(3, 1);
        assert!((score - expected).abs() < 1e-15);
    }

    #[test]
    fn test_trio_is_sum_of_trifectas() {
        let matrix = create_test_matrix();
        let engine = CombinationEngine::new(&matrix);
        let trifecta: HashMap<Vec<u8>, f64> = engine
            .enumerate_raw(BetType::Trifecta)
            .into_iter()
            .map(|(c, p)| (c.boats, p))
            .collect();
        let (_, score) = engine
            .enumerate_raw(BetType::Trio)
            .into_iter()
            .find(|(c, _)| c.boats == vec![1, 3, 5])
            .unwrap();
        let expected: f64 = [
            [1u8, 3, 5],
            [1, 5, 3],
            [3, 1, 5],
            [3, 5, 1],
            [5, 1, 3],
            [5, 3, 1],
        ]
        .iter()
        .map(|p| trifecta[&p.to_vec()])
        .sum();
        assert!((score - expected).abs() < 1e-15);
    }

    #[test]
    fn test_ranked_sorted_and_truncated() {
        let matrix = create_test_matrix();
        let engine = CombinationEngine::new(&matrix);
        let top = engine.ranked(BetType::Exacta, Some(5));
        assert_eq!(top.len(), 5);
        assert!(top.windows(2).all(|w| w[0].probability >= w[1].probability));
        assert_eq!(top[0].key, "1-2");
        assert_eq!(engine.ranked(BetType::Win, Some(1))[0].key, "1");
    }

    #[test]
    fn test_uniform_matrix_keeps_enumeration_order() {
        let matrix = PositionMatrix::from_rows(&vec![vec![0.0; 6]; 6]).unwrap();
        let engine = CombinationEngine::new(&matrix);
        let ranked = engine.ranked(BetType::Exacta, None);
        assert_eq!(ranked[0].key, "1-2");
        assert_eq!(ranked[1].key, "1-3");
        assert!((ranked[0].probability - 1.0 / 30.0).abs() < 1e-12);
    }

    #[test]
    fn test_expected_value() {
        assert!((expected_value(0.20, 5.0) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ranked_with_odds_orders_missing_last() {
        let matrix = create_test_matrix();
        let engine = CombinationEngine::new(&matrix);
        let mut odds = HashMap::new();
        odds.insert("2".to_string(), 10.0);
        odds.insert("3".to_string(), 2.0);
        odds.insert("6".to_string(), -1.0);

        let ranked = engine.ranked_with_odds(BetType::Win, &odds, None);
        assert_eq!(ranked.len(), 6);
        assert_eq!(ranked[0].key, "2");
        assert_eq!(ranked[1].key, "3");
        assert!(ranked[0].is_value_bet);
        assert!(!ranked[1].is_value_bet);
        assert!(ranked[2..].iter().all(|c| c.expected_value.is_none()));
        // Unpriced entries keep probability order
        assert_eq!(ranked[2].key, "1");

        let win_prob = engine
            .probabilities(BetType::Win)
            .into_iter()
            .find(|c| c.key == "2")
            .unwrap()
            .probability;
        assert!((ranked[0].expected_value.unwrap() - win_prob * 10.0).abs() < 1e-12);
    }

    #[test]
    fn test_predict_all_and_value_bets() {
        let matrix = create_test_matrix();
        let engine = CombinationEngine::new(&matrix);
        let mut book = OddsBook::default();
        book.exacta.insert("1-2".to_string(), 50.0);
        book.trio.insert("1=2=3".to_string(), 1.1);

        let predictions = engine.predict_all(Some(&book), Some(10));
        assert_eq!(predictions.len(), 5);
        assert!(predictions.iter().all(|p| p.combinations.len() <= 10));

        let bets = value_bets(&predictions);
        assert_eq!(bets.len(), 1);
        assert_eq!(bets[0].key, "1-2");
    }

    #[test]
    fn test_parse_and_hit() {
        let quinella = Combination::parse(BetType::Quinella, "4-2").unwrap();
        assert_eq!(quinella.key(), "2=4");
        assert!(quinella.is_hit((4, 2, 1)));
        assert!(!quinella.is_hit((4, 1, 2)));

        let exacta = Combination::parse(BetType::Exacta, "4-2").unwrap();
        assert!(exacta.is_hit((4, 2, 1)));
        assert!(!exacta.is_hit((2, 4, 1)));

        assert!(Combination::parse(BetType::Trio, "1=1=2").is_none());
        assert!(Combination::parse(BetType::Trifecta, "1-2").is_none());
        assert!(Combination::parse(BetType::Win, "7").is_none());
        assert_eq!(
            Combination::parse(BetType::Trio, "3=1=2").map(|c| c.key()),
            Some("1=2=3".to_string())
        );
    }
}
