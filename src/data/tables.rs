//! Static venue and course lookup tables
//!
//! The tables are plain configuration data: built from defaults or a TOML
//! `[tables]` section and handed to the feature builder, never mutated after.

use serde::{Deserialize, Serialize};

use crate::error::{EngineError, Result};

/// Number of venues
pub const NUM_VENUES: usize = 24;

/// Venue names indexed by venue id - 1
const VENUE_NAMES: [&str; NUM_VENUES] = [
    "桐生", "戸田", "江戸川", "平和島", "多摩川", "浜名湖", "蒲郡", "常滑", "津", "三国", "琵琶湖",
    "住之江", "尼崎", "鳴門", "丸亀", "児島", "宮島", "徳山", "下関", "若松", "芦屋", "福岡", "唐津",
    "大村",
];

/// Historical course-1 win rate per venue (venue id - 1)
const VENUE_COURSE1_WIN_RATE: [f64; NUM_VENUES] = [
    0.52, 0.48, 0.42, 0.49, 0.53, 0.55, 0.54, 0.54, 0.52, 0.52, 0.50, 0.54, 0.55, 0.57, 0.56, 0.55,
    0.56, 0.58, 0.55, 0.54, 0.60, 0.52, 0.55, 0.57,
];

/// Average win rate per course (course - 1)
const COURSE_WIN_RATE: [f64; 6] = [0.54, 0.14, 0.12, 0.11, 0.06, 0.03];

/// Venue and course lookup tables injected into the feature builder
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureTables {
    pub venue_course1_win_rate: Vec<f64>,
    pub venue_course1_default: f64,
    pub course_win_rate: Vec<f64>,
    pub course_win_rate_default: f64,
    pub venue_names: Vec<String>,
}

impl Default for FeatureTables {
    fn default() -> Self {
        Self {
            venue_course1_win_rate: VENUE_COURSE1_WIN_RATE.to_vec(),
            venue_course1_default: 0.54,
            course_win_rate: COURSE_WIN_RATE.to_vec(),
            course_win_rate_default: 0.10,
            venue_names: VENUE_NAMES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl FeatureTables {
    /// Course-1 win rate at a venue, or the default for unknown venues
    pub fn venue_course1_rate(&self, venue_id: u8) -> f64 {
        lookup(&self.venue_course1_win_rate, venue_id as usize)
            .unwrap_or(self.venue_course1_default)
    }

    /// Average win rate from a course, or the default outside 1-6
    pub fn course_win_rate(&self, course: u8) -> f64 {
        lookup(&self.course_win_rate, course as usize).unwrap_or(self.course_win_rate_default)
    }

    pub fn venue_name(&self, venue_id: u8) -> Option<&str> {
        if venue_id == 0 {
            return None;
        }
        self.venue_names
            .get(venue_id as usize - 1)
            .map(String::as_str)
            .filter(|name| !name.is_empty())
    }

    pub fn validate(&self) -> Result<()> {
        let all_rates = self
            .venue_course1_win_rate
            .iter()
            .copied()
            .chain(self.course_win_rate.iter().copied())
            .chain([self.venue_course1_default, self.course_win_rate_default]);
        for rate in all_rates {
            if !rate.is_finite() || !(0.0..=1.0).contains(&rate) {
                return Err(EngineError::Config(format!(
                    "table win rates must be within [0, 1], got {}",
                    rate
                )));
            }
        }
        Ok(())
    }
}

/// 1-based lookup into a table
fn lookup(table: &[f64], id: usize) -> Option<f64> {
    if id == 0 {
        return None;
    }
    table.get(id - 1).copied()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_venue_course1_rate() {
        let tables = FeatureTables::default();
        assert!((tables.venue_course1_rate(1) - 0.52).abs() < 1e-9);
        assert!((tables.venue_course1_rate(21) - 0.60).abs() < 1e-9);
        assert!((tables.venue_course1_rate(0) - 0.54).abs() < 1e-9);
        assert!((tables.venue_course1_rate(25) - 0.54).abs() < 1e-9);
    }

    #[test]
    fn test_course_win_rate() {
        let tables = FeatureTables::default();
        assert!((tables.course_win_rate(1) - 0.54).abs() < 1e-9);
        assert!((tables.course_win_rate(6) - 0.03).abs() < 1e-9);
        assert!((tables.course_win_rate(7) - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_venue_name() {
        let tables = FeatureTables::default();
        assert_eq!(tables.venue_name(1), Some("桐生"));
        assert_eq!(tables.venue_name(24), Some("大村"));
        assert_eq!(tables.venue_name(0), None);
        assert_eq!(tables.venue_name(30), None);
    }

    #[test]
    fn test_substituted_tables() {
        let tables = FeatureTables {
            course_win_rate: vec![0.9],
            ..Default::default()
        };
        assert!((tables.course_win_rate(1) - 0.9).abs() < 1e-9);
        assert!((tables.course_win_rate(2) - 0.10).abs() < 1e-9);
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let tables = FeatureTables {
            venue_course1_default: 1.5,
            ..Default::default()
        };
        assert!(tables.validate().is_err());
        assert!(FeatureTables::default().validate().is_ok());

        let mut tables = FeatureTables::default();
        tables.course_win_rate[3] = f64::NAN;
        assert!(tables.validate().is_err());
    }
}
