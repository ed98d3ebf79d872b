use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use crate::error::{validate_boat_number, validate_entries_count, EngineError, Result};

/// Number of competitors (and finishing positions) in a race
pub const NUM_BOATS: usize = 6;

/// Competitor record supplied by the data collector.
///
/// Every statistic is optional; the statistic resolver fills gaps with
/// fallbacks and defaults. NaN is treated the same as absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Competitor {
    pub boat_number: u8,
    #[serde(default)]
    pub racer_id: u32,
    #[serde(default)]
    pub racer_name: String,
    #[serde(default)]
    pub racer_grade: Option<String>,
    #[serde(default)]
    pub win_rate: Option<f64>,
    #[serde(default)]
    pub racer_win_rate: Option<f64>,
    #[serde(default)]
    pub place_rate_2: Option<f64>,
    #[serde(default)]
    pub place_rate_3: Option<f64>,
    #[serde(default)]
    pub motor_number: Option<u32>,
    #[serde(default)]
    pub motor_rate_2: Option<f64>,
    #[serde(default)]
    pub motor_second_rate: Option<f64>,
    #[serde(default)]
    pub motor_rate_3: Option<f64>,
    #[serde(default)]
    pub motor_third_rate: Option<f64>,
    #[serde(default)]
    pub boat_rate_2: Option<f64>,
    #[serde(default)]
    pub exhibition_time: Option<f64>,
    #[serde(default)]
    pub exhibition_turn_time: Option<f64>,
    #[serde(default)]
    pub exhibition_straight_time: Option<f64>,
    #[serde(default)]
    pub average_st: Option<f64>,
    #[serde(default)]
    pub avg_start_timing: Option<f64>,
    #[serde(default)]
    pub flying_count: Option<f64>,
    #[serde(default)]
    pub late_count: Option<f64>,
    #[serde(default)]
    pub course: Option<f64>,
    #[serde(default)]
    pub actual_course: Option<f64>,
    /// Raw nested statistics (weather/venue/course/grade keyed)
    #[serde(default)]
    pub detailed_stats: Option<serde_json::Value>,
}

impl Competitor {
    /// Look up a raw numeric field by name. NaN reads as missing.
    pub fn field(&self, name: &str) -> Option<f64> {
        let value = match name {
            "boat_number" => Some(self.boat_number as f64),
            "win_rate" => self.win_rate,
            "racer_win_rate" => self.racer_win_rate,
            "place_rate_2" => self.place_rate_2,
            "place_rate_3" => self.place_rate_3,
            "motor_rate_2" => self.motor_rate_2,
            "motor_second_rate" => self.motor_second_rate,
            "motor_rate_3" => self.motor_rate_3,
            "motor_third_rate" => self.motor_third_rate,
            "boat_rate_2" => self.boat_rate_2,
            "exhibition_time" => self.exhibition_time,
            "exhibition_turn_time" => self.exhibition_turn_time,
            "exhibition_straight_time" => self.exhibition_straight_time,
            "average_st" => self.average_st,
            "avg_start_timing" => self.avg_start_timing,
            "flying_count" => self.flying_count,
            "late_count" => self.late_count,
            "course" => self.course,
            "actual_course" => self.actual_course,
            _ => None,
        };
        value.filter(|v| !v.is_nan())
    }
}

/// Race identifier: (date, venue, race number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RaceKey {
    pub date: u32,
    pub venue_id: u8,
    pub race_no: u8,
}

impl RaceKey {
    pub fn new(date: u32, venue_id: u8, race_no: u8) -> Self {
        Self {
            date,
            venue_id,
            race_no,
        }
    }
}

impl fmt::Display for RaceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{:02}_{:02}", self.date, self.venue_id, self.race_no)
    }
}

impl FromStr for RaceKey {
    type Err = EngineError;

    /// Parse "20240115_03_01" into a race key
    fn from_str(s: &str) -> Result<Self> {
        let parts: Vec<&str> = s.split('_').collect();
        let invalid = || EngineError::Validation(format!("Invalid race id: {}", s));
        if parts.len() != 3 {
            return Err(invalid());
        }
        let date: u32 = parts[0].parse().map_err(|_| invalid())?;
        let venue_id: u8 = parts[1].parse().map_err(|_| invalid())?;
        let race_no: u8 = parts[2].parse().map_err(|_| invalid())?;
        Ok(Self::new(date, venue_id, race_no))
    }
}

/// One race awaiting prediction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RaceContext {
    pub key: RaceKey,
    #[serde(default)]
    pub weather: Option<String>,
    pub competitors: Vec<Competitor>,
}

impl RaceContext {
    /// Check the six-competitor and boat-number invariants
    pub fn validate(&self) -> Result<()> {
        validate_entries_count(self.competitors.len())?;
        let mut seen = [false; NUM_BOATS];
        for competitor in &self.competitors {
            validate_boat_number(competitor.boat_number)?;
            let idx = (competitor.boat_number - 1) as usize;
            if seen[idx] {
                return Err(EngineError::DuplicateBoatNumber(competitor.boat_number));
            }
            seen[idx] = true;
        }
        Ok(())
    }

    pub fn boat_numbers(&self) -> Vec<u8> {
        self.competitors.iter().map(|c| c.boat_number).collect()
    }
}

/// Finishing positions of a completed race, indexed by boat number - 1
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RaceOutcome {
    pub positions: [Option<u8>; NUM_BOATS],
}

impl RaceOutcome {
    pub fn set(&mut self, boat_number: u8, position: u8) {
        if (1..=NUM_BOATS as u8).contains(&boat_number) {
            self.positions[(boat_number - 1) as usize] = Some(position);
        }
    }

    pub fn position_of(&self, boat_number: u8) -> Option<u8> {
        if !(1..=NUM_BOATS as u8).contains(&boat_number) {
            return None;
        }
        self.positions[(boat_number - 1) as usize]
    }

    /// Boat finishing at the given position, if exactly one boat holds it
    pub fn boat_at(&self, position: u8) -> Option<u8> {
        let mut found = None;
        for (idx, pos) in self.positions.iter().enumerate() {
            if *pos == Some(position) {
                if found.is_some() {
                    return None;
                }
                found = Some(idx as u8 + 1);
            }
        }
        found
    }

    /// Distinct 1st, 2nd and 3rd place boats
    pub fn podium(&self) -> Option<(u8, u8, u8)> {
        let first = self.boat_at(1)?;
        let second = self.boat_at(2)?;
        let third = self.boat_at(3)?;
        if first == second || first == third || second == third {
            return None;
        }
        Some((first, second, third))
    }
}

/// Completed race used for training and backtesting
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoricalRace {
    pub context: RaceContext,
    pub outcome: RaceOutcome,
}

/// Wagering types scored by the combination engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BetType {
    Win,      // 単勝 - 1st place
    Exacta,   // 2連単 - 1st and 2nd in order
    Quinella, // 2連複 - 1st and 2nd any order
    Trifecta, // 3連単 - 1st, 2nd, 3rd in order
    Trio,     // 3連複 - 1st, 2nd, 3rd any order
}

impl BetType {
    pub const ALL: [BetType; 5] = [
        BetType::Win,
        BetType::Exacta,
        BetType::Quinella,
        BetType::Trifecta,
        BetType::Trio,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            BetType::Win => "win",
            BetType::Exacta => "exacta",
            BetType::Quinella => "quinella",
            BetType::Trifecta => "trifecta",
            BetType::Trio => "trio",
        }
    }

    /// Number of boats in one combination
    pub fn arity(&self) -> usize {
        match self {
            BetType::Win => 1,
            BetType::Exacta | BetType::Quinella => 2,
            BetType::Trifecta | BetType::Trio => 3,
        }
    }

    pub fn is_ordered(&self) -> bool {
        matches!(self, BetType::Win | BetType::Exacta | BetType::Trifecta)
    }
}

impl FromStr for BetType {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "win" | "tansho" => Ok(BetType::Win),
            "exacta" | "nirentan" => Ok(BetType::Exacta),
            "quinella" | "nirenpuku" => Ok(BetType::Quinella),
            "trifecta" | "sanrentan" => Ok(BetType::Trifecta),
            "trio" | "sanrenpuku" => Ok(BetType::Trio),
            _ => Err(EngineError::Validation(format!("Unknown bet type: {}", s))),
        }
    }
}

/// Payout multipliers per bet type, keyed by combination display key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OddsBook {
    #[serde(default)]
    pub win: HashMap<String, f64>,
    #[serde(default)]
    pub exacta: HashMap<String, f64>,
    #[serde(default)]
    pub quinella: HashMap<String, f64>,
    #[serde(default)]
    pub trifecta: HashMap<String, f64>,
    #[serde(default)]
    pub trio: HashMap<String, f64>,
}

impl OddsBook {
    pub fn for_bet_type(&self, bet_type: BetType) -> &HashMap<String, f64> {
        match bet_type {
            BetType::Win => &self.win,
            BetType::Exacta => &self.exacta,
            BetType::Quinella => &self.quinella,
            BetType::Trifecta => &self.trifecta,
            BetType::Trio => &self.trio,
        }
    }

    pub fn for_bet_type_mut(&mut self, bet_type: BetType) -> &mut HashMap<String, f64> {
        match bet_type {
            BetType::Win => &mut self.win,
            BetType::Exacta => &mut self.exacta,
            BetType::Quinella => &mut self.quinella,
            BetType::Trifecta => &mut self.trifecta,
            BetType::Trio => &mut self.trio,
        }
    }

    pub fn is_empty(&self) -> bool {
        BetType::ALL
            .iter()
            .all(|bt| self.for_bet_type(*bt).is_empty())
    }
}

/// Race prediction request
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictRequest {
    pub date: u32,
    pub venue_id: u8,
    pub race_no: u8,
    #[serde(default)]
    pub weather: Option<String>,
    pub competitors: Vec<Competitor>,
    #[serde(default)]
    pub odds: Option<OddsBook>,
    #[serde(default)]
    pub top_n: Option<usize>,
}

impl PredictRequest {
    pub fn to_context(&self) -> RaceContext {
        RaceContext {
            key: RaceKey::new(self.date, self.venue_id, self.race_no),
            weather: self.weather.clone(),
            competitors: self.competitors.clone(),
        }
    }
}

/// Position probability for a boat
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionProb {
    pub boat_no: u8,
    pub probs: [f64; 6], // P(1st), P(2nd), ..., P(6th)
}

/// Ranked combinations for one bet type
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BetTypePrediction {
    pub bet_type: BetType,
    pub combinations: Vec<crate::core::combination::ScoredCombination>,
}

/// Race prediction response
#[derive(Debug, Serialize, Deserialize)]
pub struct PredictResponse {
    pub race_id: String,
    pub model_version: String,
    pub position_probs: Vec<PositionProb>,
    pub predictions: Vec<BetTypePrediction>,
    pub value_bets: Vec<crate::core::combination::ScoredCombination>,
}

/// Health check response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub model_loaded: bool,
}

/// Error response
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context_with_boats(boats: &[u8]) -> RaceContext {
        RaceContext {
            key: RaceKey::new(20240115, 3, 1),
            weather: None,
            competitors: boats
                .iter()
                .map(|&b| Competitor {
                    boat_number: b,
                    ..Default::default()
                })
                .collect(),
        }
    }

    #[test]
    fn test_race_key_round_trip() {
        let key = RaceKey::new(20240115, 3, 1);
        assert_eq!(key.to_string(), "20240115_03_01");
        assert_eq!("20240115_03_01".parse::<RaceKey>().unwrap(), key);
        assert!("20240115-03-01".parse::<RaceKey>().is_err());
    }

    #[test]
    fn test_race_context_validate() {
        assert!(context_with_boats(&[1, 2, 3, 4, 5, 6]).validate().is_ok());
        assert!(matches!(
            context_with_boats(&[1, 2, 3, 4, 5]).validate(),
            Err(EngineError::InvalidCompetitorCount(5))
        ));
        assert!(matches!(
            context_with_boats(&[1, 2, 3, 4, 5, 5]).validate(),
            Err(EngineError::DuplicateBoatNumber(5))
        ));
        assert!(matches!(
            context_with_boats(&[1, 2, 3, 4, 5, 7]).validate(),
            Err(EngineError::InvalidBoatNumber(7))
        ));
    }

    #[test]
    fn test_competitor_field_treats_nan_as_missing() {
        let competitor = Competitor {
            boat_number: 2,
            win_rate: Some(f64::NAN),
            racer_win_rate: Some(7.2),
            ..Default::default()
        };
        assert_eq!(competitor.field("win_rate"), None);
        assert_eq!(competitor.field("racer_win_rate"), Some(7.2));
        assert_eq!(competitor.field("boat_number"), Some(2.0));
        assert_eq!(competitor.field("unknown"), None);
    }

    #[test]
    fn test_outcome_podium() {
        let mut outcome = RaceOutcome::default();
        for (boat, pos) in [(1, 1), (2, 2), (3, 3), (4, 4), (5, 5), (6, 6)] {
            outcome.set(boat, pos);
        }
        assert_eq!(outcome.podium(), Some((1, 2, 3)));
        assert_eq!(outcome.position_of(4), Some(4));

        // Dead heat for 2nd leaves no distinct podium
        outcome.set(3, 2);
        assert_eq!(outcome.podium(), None);
    }

    #[test]
    fn test_bet_type_parsing() {
        assert_eq!("exacta".parse::<BetType>().unwrap(), BetType::Exacta);
        assert_eq!("SANRENPUKU".parse::<BetType>().unwrap(), BetType::Trio);
        assert!("wide".parse::<BetType>().is_err());
        assert_eq!(BetType::Trifecta.arity(), 3);
        assert!(!BetType::Quinella.is_ordered());
    }
}
