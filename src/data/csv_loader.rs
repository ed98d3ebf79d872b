//! CSV loading for historical race results
//!
//! One row per competitor. Required columns: `date`, `venue_id`, `race_no`,
//! `boat_number`. Every statistic column is optional; a column that is
//! absent from the file reads as missing for every row.

use polars::prelude::*;
use std::collections::{BTreeSet, HashMap};
use std::path::Path;
use tracing::{debug, warn};

use crate::error::Result;
use crate::models::{Competitor, HistoricalRace, RaceContext, RaceKey, RaceOutcome};

/// Load a CSV file into a DataFrame
pub fn read_csv<P: AsRef<Path>>(csv_path: P) -> Result<DataFrame> {
    let df = CsvReadOptions::default()
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(csv_path.as_ref().to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// First column present under any of the given names, cast to Float64
fn float_column(df: &DataFrame, names: &[&str]) -> PolarsResult<Option<Float64Chunked>> {
    for name in names {
        if let Ok(series) = df.column(name) {
            return Ok(Some(series.cast(&DataType::Float64)?.f64()?.clone()));
        }
    }
    Ok(None)
}

/// Required integer column, cast to Int64
fn int_column(df: &DataFrame, names: &[&str]) -> PolarsResult<Int64Chunked> {
    for name in names {
        if let Ok(series) = df.column(name) {
            return Ok(series.cast(&DataType::Int64)?.i64()?.clone());
        }
    }
    Err(PolarsError::ColumnNotFound(names.join(" | ").into()))
}

fn optional_int_column(df: &DataFrame, name: &str) -> PolarsResult<Option<Int64Chunked>> {
    match df.column(name) {
        Ok(series) => Ok(Some(series.cast(&DataType::Int64)?.i64()?.clone())),
        Err(_) => Ok(None),
    }
}

fn string_column(df: &DataFrame, name: &str) -> PolarsResult<Option<StringChunked>> {
    match df.column(name) {
        Ok(series) => Ok(Some(series.cast(&DataType::String)?.str()?.clone())),
        Err(_) => Ok(None),
    }
}

fn float_at(col: &Option<Float64Chunked>, i: usize) -> Option<f64> {
    col.as_ref().and_then(|c| c.get(i)).filter(|v| !v.is_nan())
}

fn str_at(col: &Option<StringChunked>, i: usize) -> Option<String> {
    col.as_ref()
        .and_then(|c| c.get(i))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
}

/// One parsed CSV row
struct CompetitorRow {
    key: RaceKey,
    weather: Option<String>,
    finish_position: Option<u8>,
    competitor: Competitor,
}

fn dataframe_to_rows(df: &DataFrame) -> PolarsResult<Vec<CompetitorRow>> {
    let date_col = int_column(df, &["date"])?;
    let venue_col = int_column(df, &["venue_id", "stadium_code"])?;
    let race_col = int_column(df, &["race_no"])?;
    let boat_col = int_column(df, &["boat_number", "boat_no"])?;
    let racer_id_col = optional_int_column(df, "racer_id")?;
    let motor_no_col = optional_int_column(df, "motor_number")?;
    let position_col = optional_int_column(df, "finish_position")?;

    let name_col = string_column(df, "racer_name")?;
    let grade_col = string_column(df, "racer_grade")?;
    let weather_col = string_column(df, "weather")?;
    let detailed_col = string_column(df, "detailed_stats")?;

    let win_rate = float_column(df, &["win_rate"])?;
    let racer_win_rate = float_column(df, &["racer_win_rate"])?;
    let place_rate_2 = float_column(df, &["place_rate_2"])?;
    let place_rate_3 = float_column(df, &["place_rate_3"])?;
    let motor_rate_2 = float_column(df, &["motor_rate_2"])?;
    let motor_second_rate = float_column(df, &["motor_second_rate"])?;
    let motor_rate_3 = float_column(df, &["motor_rate_3"])?;
    let motor_third_rate = float_column(df, &["motor_third_rate"])?;
    let boat_rate_2 = float_column(df, &["boat_rate_2"])?;
    let exhibition_time = float_column(df, &["exhibition_time"])?;
    let exhibition_turn_time = float_column(df, &["exhibition_turn_time"])?;
    let exhibition_straight_time = float_column(df, &["exhibition_straight_time"])?;
    let average_st = float_column(df, &["average_st"])?;
    let avg_start_timing = float_column(df, &["avg_start_timing"])?;
    let flying_count = float_column(df, &["flying_count"])?;
    let late_count = float_column(df, &["late_count"])?;
    let course = float_column(df, &["course"])?;
    let actual_course = float_column(df, &["actual_course"])?;

    let mut rows = Vec::with_capacity(df.height());
    let mut skipped = 0usize;

    for i in 0..df.height() {
        let (Some(date), Some(venue), Some(race), Some(boat)) = (
            date_col.get(i),
            venue_col.get(i),
            race_col.get(i),
            boat_col.get(i),
        ) else {
            skipped += 1;
            continue;
        };

        let detailed_stats = str_at(&detailed_col, i).and_then(|raw| {
            serde_json::from_str(&raw)
                .map_err(|e| debug!("Unparseable detailed_stats at row {}: {}", i, e))
                .ok()
        });

        let competitor = Competitor {
            boat_number: boat.clamp(0, u8::MAX as i64) as u8,
            racer_id: racer_id_col
                .as_ref()
                .and_then(|c| c.get(i))
                .unwrap_or(0)
                .max(0) as u32,
            racer_name: str_at(&name_col, i).unwrap_or_default(),
            racer_grade: str_at(&grade_col, i),
            win_rate: float_at(&win_rate, i),
            racer_win_rate: float_at(&racer_win_rate, i),
            place_rate_2: float_at(&place_rate_2, i),
            place_rate_3: float_at(&place_rate_3, i),
            motor_number: motor_no_col
                .as_ref()
                .and_then(|c| c.get(i))
                .filter(|m| *m >= 0)
                .map(|m| m as u32),
            motor_rate_2: float_at(&motor_rate_2, i),
            motor_second_rate: float_at(&motor_second_rate, i),
            motor_rate_3: float_at(&motor_rate_3, i),
            motor_third_rate: float_at(&motor_third_rate, i),
            boat_rate_2: float_at(&boat_rate_2, i),
            exhibition_time: float_at(&exhibition_time, i),
            exhibition_turn_time: float_at(&exhibition_turn_time, i),
            exhibition_straight_time: float_at(&exhibition_straight_time, i),
            average_st: float_at(&average_st, i),
            avg_start_timing: float_at(&avg_start_timing, i),
            flying_count: float_at(&flying_count, i),
            late_count: float_at(&late_count, i),
            course: float_at(&course, i),
            actual_course: float_at(&actual_course, i),
            detailed_stats,
        };

        rows.push(CompetitorRow {
            key: RaceKey::new(
                date.max(0) as u32,
                venue.clamp(0, u8::MAX as i64) as u8,
                race.clamp(0, u8::MAX as i64) as u8,
            ),
            weather: str_at(&weather_col, i),
            finish_position: position_col
                .as_ref()
                .and_then(|c| c.get(i))
                .filter(|p| (1..=6).contains(p))
                .map(|p| p as u8),
            competitor,
        });
    }

    if skipped > 0 {
        warn!("Skipped {} rows without a race key or boat number", skipped);
    }

    Ok(rows)
}

/// Historical races indexed by race key for O(1) lookups
pub struct RaceDataset {
    races: HashMap<RaceKey, HistoricalRace>,
    /// All race keys in chronological order
    keys: Vec<RaceKey>,
}

impl RaceDataset {
    /// Load and index all races from CSV
    pub fn load<P: AsRef<Path>>(csv_path: P) -> Result<Self> {
        let df = read_csv(&csv_path)?;
        let dataset = Self::from_dataframe(&df)?;
        debug!(
            "Loaded {} races from {}",
            dataset.len(),
            csv_path.as_ref().display()
        );
        Ok(dataset)
    }

    pub fn from_dataframe(df: &DataFrame) -> Result<Self> {
        let rows = dataframe_to_rows(df)?;

        let mut races: HashMap<RaceKey, HistoricalRace> = HashMap::new();
        for row in rows {
            let race = races.entry(row.key).or_insert_with(|| HistoricalRace {
                context: RaceContext {
                    key: row.key,
                    weather: None,
                    competitors: Vec::new(),
                },
                outcome: RaceOutcome::default(),
            });
            if race.context.weather.is_none() {
                race.context.weather = row.weather;
            }
            if let Some(position) = row.finish_position {
                race.outcome.set(row.competitor.boat_number, position);
            }
            race.context.competitors.push(row.competitor);
        }

        Ok(Self::from_races(races.into_values().collect()))
    }

    /// Index already-built races
    pub fn from_races(races: Vec<HistoricalRace>) -> Self {
        let mut indexed = HashMap::with_capacity(races.len());
        for mut race in races {
            race.context.competitors.sort_by_key(|c| c.boat_number);
            indexed.insert(race.context.key, race);
        }
        let mut keys: Vec<RaceKey> = indexed.keys().copied().collect();
        keys.sort();
        Self {
            races: indexed,
            keys,
        }
    }

    /// Get a race - O(1)
    pub fn get(&self, key: &RaceKey) -> Option<&HistoricalRace> {
        self.races.get(key)
    }

    /// Race keys in chronological order
    pub fn keys(&self) -> &[RaceKey] {
        &self.keys
    }

    /// Distinct race dates in sorted order
    pub fn dates(&self) -> Vec<u32> {
        let dates: BTreeSet<u32> = self.keys.iter().map(|k| k.date).collect();
        dates.into_iter().collect()
    }

    pub fn newest_date(&self) -> Option<u32> {
        self.keys.last().map(|k| k.date)
    }

    /// Iterate races in chronological order
    pub fn iter(&self) -> impl Iterator<Item = &HistoricalRace> {
        self.keys.iter().filter_map(|k| self.races.get(k))
    }

    /// Races on or after a date, oldest first
    pub fn since(&self, date: u32) -> impl Iterator<Item = &HistoricalRace> {
        self.iter().filter(move |r| r.context.key.date >= date)
    }

    pub fn len(&self) -> usize {
        self.races.len()
    }

    pub fn is_empty(&self) -> bool {
        self.races.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    const SAMPLE_CSV: &str = "\
date,venue_id,race_no,boat_number,racer_id,racer_name,racer_grade,win_rate,racer_win_rate,motor_rate_2,exhibition_time,weather,detailed_stats,finish_position
20240115,1,1,2,4002,Racer B,B1,5.1,,31.0,6.75,晴,,2
20240115,1,1,1,4001,Racer A,A1,7.2,,44.5,6.70,晴,\"{\"\"overall\"\": {\"\"win_rate\"\": 7.0}}\",1
20240115,1,1,3,4003,Racer C,A2,,6.3,,6.80,晴,,3
20240115,1,1,4,4004,Racer D,B1,4.2,,28.0,6.85,晴,,4
20240115,1,1,5,4005,Racer E,B2,3.9,,25.0,6.90,晴,,5
20240115,1,1,6,4006,Racer F,B1,4.8,,33.0,6.95,晴,,F
20240114,2,3,1,4007,Racer G,A1,6.6,,40.0,6.71,雨,,1
20240114,2,3,2,4008,Racer H,B1,5.0,,30.0,6.78,雨,,2
";

    fn load_sample() -> RaceDataset {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("races.csv");
        fs::write(&path, SAMPLE_CSV).unwrap();
        RaceDataset::load(&path).unwrap()
    }

    #[test]
    fn test_load_indexes_races() {
        let dataset = load_sample();
        assert_eq!(dataset.len(), 2);
        assert_eq!(
            dataset.keys(),
            &[RaceKey::new(20240114, 2, 3), RaceKey::new(20240115, 1, 1)]
        );
        assert_eq!(dataset.dates(), vec![20240114, 20240115]);
        assert_eq!(dataset.newest_date(), Some(20240115));
    }

    #[test]
    fn test_competitors_sorted_and_parsed() {
        let dataset = load_sample();
        let race = dataset.get(&RaceKey::new(20240115, 1, 1)).unwrap();
        assert_eq!(race.context.boat_numbers(), vec![1, 2, 3, 4, 5, 6]);
        assert_eq!(race.context.weather.as_deref(), Some("晴"));

        let first = &race.context.competitors[0];
        assert_eq!(first.racer_name, "Racer A");
        assert_eq!(first.racer_grade.as_deref(), Some("A1"));
        assert!((first.win_rate.unwrap() - 7.2).abs() < 1e-9);
        assert!(first.detailed_stats.is_some());

        let third = &race.context.competitors[2];
        assert_eq!(third.win_rate, None);
        assert!((third.racer_win_rate.unwrap() - 6.3).abs() < 1e-9);
        assert_eq!(third.motor_rate_2, None);
        // Column absent from the file
        assert_eq!(third.exhibition_turn_time, None);
    }

    #[test]
    fn test_outcome_positions() {
        let dataset = load_sample();
        let race = dataset.get(&RaceKey::new(20240115, 1, 1)).unwrap();
        assert_eq!(race.outcome.podium(), Some((1, 2, 3)));
        // Non-numeric finish reads as no position
        assert_eq!(race.outcome.position_of(6), None);
    }

    #[test]
    fn test_since_filters_by_date() {
        let dataset = load_sample();
        let recent: Vec<_> = dataset.since(20240115).collect();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].context.key.venue_id, 1);
    }

    #[test]
    fn test_missing_required_column() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.csv");
        fs::write(&path, "date,race_no\n20240115,1\n").unwrap();
        assert!(RaceDataset::load(&path).is_err());
    }
}
