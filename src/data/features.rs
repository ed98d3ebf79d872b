//! Feature Engineering
//!
//! Turn one race's six competitor records into six feature rows sharing a
//! fixed, ordered schema. Stages run in order and append to one growing
//! record per competitor: basic, equipment, timing, course, relative,
//! detailed statistics, composite.

use serde::{Deserialize, Serialize};

use super::detailed_stats::{DetailedStats, Technique, WeatherCondition, GRADES};
use super::resolver::ResolvedStats;
use super::tables::FeatureTables;
use crate::error::{EngineError, Result};
use crate::models::{RaceContext, RaceKey};

/// Tunable constants for derived features
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeatureConfig {
    /// Motor 2-place rate above which a motor counts as good
    pub motor_quality_threshold: f64,
    /// Motor 2-place rate below which a motor counts as poor
    pub motor_poor_threshold: f64,
    pub exhibition_reference: f64,
    pub exhibition_scale: f64,
    pub start_reference: f64,
    pub start_scale: f64,
    /// Weight of a late start relative to a false start
    pub late_start_weight: f64,
    pub inner_course_max: u8,
    pub course_advantage_pivot: f64,
    pub course_advantage_step: f64,
    /// 1-in-6 baseline used when no course block is available
    pub course_first_rate_default: f64,
    pub venue_avg_st_default: f64,
}

impl Default for FeatureConfig {
    fn default() -> Self {
        Self {
            motor_quality_threshold: 40.0,
            motor_poor_threshold: 25.0,
            exhibition_reference: 6.80,
            exhibition_scale: 10.0,
            start_reference: 0.18,
            start_scale: 50.0,
            late_start_weight: 0.5,
            inner_course_max: 3,
            course_advantage_pivot: 4.0,
            course_advantage_step: 0.1,
            course_first_rate_default: 16.7,
            venue_avg_st_default: 0.17,
        }
    }
}

impl FeatureConfig {
    pub fn validate(&self) -> Result<()> {
        let values = [
            self.motor_quality_threshold,
            self.motor_poor_threshold,
            self.exhibition_reference,
            self.exhibition_scale,
            self.start_reference,
            self.start_scale,
            self.late_start_weight,
            self.course_advantage_pivot,
            self.course_advantage_step,
            self.course_first_rate_default,
            self.venue_avg_st_default,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err(EngineError::Config(
                "feature constants must be finite numbers".to_string(),
            ));
        }
        Ok(())
    }
}

/// Grade (級別) to ordinal score
fn grade_score(grade: Option<&str>) -> f64 {
    match grade.map(str::trim) {
        Some("A1") => 4.0,
        Some("A2") => 3.0,
        Some("B1") => 2.0,
        Some("B2") => 1.0,
        _ => 2.0,
    }
}

/// Weights of the grade-level win rates in the grade score
const GRADE_WEIGHTS: [f64; 4] = [2.0, 1.5, 1.2, 1.0];

fn flag(condition: bool) -> f64 {
    if condition {
        1.0
    } else {
        0.0
    }
}

/// Rank where lower values are better: 1 + count of strictly smaller values
fn rank_ascending(values: &[f64], target: f64) -> f64 {
    (values.iter().filter(|&&v| v < target).count() + 1) as f64
}

/// Rank where higher values are better: 1 + count of strictly larger values
fn rank_descending(values: &[f64], target: f64) -> f64 {
    (values.iter().filter(|&&v| v > target).count() + 1) as f64
}

/// One competitor's feature record, grown stage by stage
#[derive(Debug, Clone, Default)]
pub struct FeatureRecord {
    values: Vec<(&'static str, f64)>,
}

impl FeatureRecord {
    fn push(&mut self, name: &'static str, value: f64) {
        self.values.push((name, value));
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, v)| *v)
    }

    fn value(&self, name: &str) -> f64 {
        self.get(name).unwrap_or(0.0)
    }

    pub fn names(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.values.iter().map(|(n, _)| *n)
    }

    pub fn to_vec(&self) -> Vec<f64> {
        self.values
            .iter()
            .map(|(_, v)| if v.is_finite() { *v } else { 0.0 })
            .collect()
    }
}

/// Feature rows for one race, in input competitor order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeatureFrame {
    pub race: RaceKey,
    pub boat_numbers: Vec<u8>,
    names: Vec<String>,
    rows: Vec<Vec<f64>>,
}

impl FeatureFrame {
    /// Frame from explicit names and rows; every row must match the schema width
    pub fn new(
        race: RaceKey,
        boat_numbers: Vec<u8>,
        names: Vec<String>,
        rows: Vec<Vec<f64>>,
    ) -> Result<Self> {
        if boat_numbers.len() != rows.len() {
            return Err(EngineError::Validation(format!(
                "{} boat numbers for {} feature rows",
                boat_numbers.len(),
                rows.len()
            )));
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != names.len()) {
            return Err(EngineError::FeatureCountMismatch {
                expected: names.len(),
                actual: bad.len(),
            });
        }
        Ok(Self {
            race,
            boat_numbers,
            names,
            rows,
        })
    }

    pub fn names(&self) -> &[String] {
        &self.names
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn value(&self, row: usize, name: &str) -> Option<f64> {
        let col = self.names.iter().position(|n| n == name)?;
        self.rows.get(row).and_then(|r| r.get(col)).copied()
    }

    /// Re-order columns to a bound schema.
    ///
    /// Names missing from this frame are zero-filled, names not in the
    /// schema are dropped. Returns the aligned rows with the missing and
    /// extra name lists.
    pub fn align_to(&self, schema: &[String]) -> (Vec<Vec<f64>>, Vec<String>, Vec<String>) {
        let positions: Vec<Option<usize>> = schema
            .iter()
            .map(|name| self.names.iter().position(|n| n == name))
            .collect();

        let missing: Vec<String> = schema
            .iter()
            .zip(&positions)
            .filter(|(_, pos)| pos.is_none())
            .map(|(name, _)| name.clone())
            .collect();
        let extra: Vec<String> = self
            .names
            .iter()
            .filter(|n| !schema.contains(n))
            .cloned()
            .collect();

        let rows = self
            .rows
            .iter()
            .map(|row| {
                positions
                    .iter()
                    .map(|pos| pos.map(|p| row[p]).unwrap_or(0.0))
                    .collect()
            })
            .collect();

        (rows, missing, extra)
    }
}

/// Builds feature frames from race records using injected lookup tables
#[derive(Debug, Clone, Default)]
pub struct FeatureBuilder {
    tables: FeatureTables,
    config: FeatureConfig,
}

impl FeatureBuilder {
    pub fn new(tables: FeatureTables, config: FeatureConfig) -> Self {
        Self { tables, config }
    }

    pub fn tables(&self) -> &FeatureTables {
        &self.tables
    }

    /// Build the feature frame for a race of exactly six competitors
    pub fn build(&self, race: &RaceContext) -> Result<FeatureFrame> {
        race.validate()?;

        let resolved: Vec<ResolvedStats> = race
            .competitors
            .iter()
            .map(ResolvedStats::from_competitor)
            .collect();
        let exhibition_times: Vec<f64> = resolved.iter().map(|s| s.exhibition_time).collect();
        let win_rates: Vec<f64> = resolved.iter().map(|s| s.win_rate).collect();
        let weather = race.weather.as_deref().and_then(WeatherCondition::parse);

        let records: Vec<FeatureRecord> = race
            .competitors
            .iter()
            .zip(&resolved)
            .map(|(competitor, stats)| {
                let detailed = competitor
                    .detailed_stats
                    .as_ref()
                    .map(|raw| DetailedStats::from_json(raw, &self.tables))
                    .unwrap_or_default();

                let mut record = FeatureRecord::default();
                self.basic_features(
                    &mut record,
                    stats,
                    competitor.racer_grade.as_deref(),
                );
                self.equipment_features(&mut record, stats);
                self.timing_features(&mut record, stats);
                self.course_features(
                    &mut record,
                    stats,
                    competitor.boat_number,
                    race.key.venue_id,
                );
                self.relative_features(&mut record, stats, &exhibition_times, &win_rates);
                self.detailed_features(
                    &mut record,
                    &detailed,
                    stats.course,
                    race.key.venue_id,
                    weather,
                );
                self.composite_features(&mut record);
                record
            })
            .collect();

        let names: Vec<String> = records
            .first()
            .map(|r| r.names().map(String::from).collect())
            .unwrap_or_default();
        let rows = records.iter().map(FeatureRecord::to_vec).collect();

        FeatureFrame::new(race.key, race.boat_numbers(), names, rows)
    }

    fn basic_features(&self, record: &mut FeatureRecord, stats: &ResolvedStats, grade: Option<&str>) {
        let grade = grade.map(str::trim);
        record.push("win_rate", stats.win_rate);
        record.push("place_rate_2", stats.place_rate_2);
        record.push("place_rate_3", stats.place_rate_3);
        record.push("grade_score", grade_score(grade));
        record.push("is_a_class", flag(matches!(grade, Some("A1") | Some("A2"))));
        record.push("is_a1", flag(grade == Some("A1")));
    }

    fn equipment_features(&self, record: &mut FeatureRecord, stats: &ResolvedStats) {
        record.push("motor_rate_2", stats.motor_rate_2);
        record.push("motor_rate_3", stats.motor_rate_3);
        record.push("boat_rate_2", stats.boat_rate_2);
        record.push(
            "motor_quality",
            flag(stats.motor_rate_2 > self.config.motor_quality_threshold),
        );
        record.push(
            "motor_poor",
            flag(stats.motor_rate_2 < self.config.motor_poor_threshold),
        );
    }

    fn timing_features(&self, record: &mut FeatureRecord, stats: &ResolvedStats) {
        let cfg = &self.config;
        record.push("exhibition_time", stats.exhibition_time);
        record.push("exhibition_turn_time", stats.exhibition_turn_time);
        record.push("exhibition_straight_time", stats.exhibition_straight_time);
        record.push(
            "exhibition_quality",
            ((cfg.exhibition_reference - stats.exhibition_time) * cfg.exhibition_scale).max(0.0),
        );
        record.push("average_st", stats.average_st);
        record.push("flying_count", stats.flying_count);
        record.push("late_count", stats.late_count);
        record.push(
            "start_quality",
            ((cfg.start_reference - stats.average_st) * cfg.start_scale).max(0.0),
        );
        record.push(
            "start_risk",
            stats.flying_count + stats.late_count * cfg.late_start_weight,
        );
    }

    fn course_features(
        &self,
        record: &mut FeatureRecord,
        stats: &ResolvedStats,
        boat_number: u8,
        venue_id: u8,
    ) {
        let cfg = &self.config;
        let course = stats.course;
        record.push("boat_number", boat_number as f64);
        record.push("course", course as f64);
        record.push("venue_id", venue_id as f64);
        record.push("is_course_1", flag(course == 1));
        record.push("is_inner_course", flag(course <= cfg.inner_course_max));
        record.push("course_win_rate", self.tables.course_win_rate(course));
        record.push("venue_course1_rate", self.tables.venue_course1_rate(venue_id));
        record.push(
            "course_advantage",
            ((cfg.course_advantage_pivot - course as f64) * cfg.course_advantage_step).max(0.0),
        );
    }

    fn relative_features(
        &self,
        record: &mut FeatureRecord,
        stats: &ResolvedStats,
        exhibition_times: &[f64],
        win_rates: &[f64],
    ) {
        let exhibition_rank = rank_ascending(exhibition_times, stats.exhibition_time);
        let win_rate_rank = rank_descending(win_rates, stats.win_rate);
        record.push("exhibition_rank", exhibition_rank);
        record.push("win_rate_rank", win_rate_rank);
        record.push("is_top_exhibition", flag(exhibition_rank == 1.0));
        record.push("is_top_win_rate", flag(win_rate_rank == 1.0));
    }

    fn detailed_features(
        &self,
        record: &mut FeatureRecord,
        detailed: &DetailedStats,
        course: u8,
        venue_id: u8,
        weather: Option<WeatherCondition>,
    ) {
        let cfg = &self.config;

        // Career
        let career = &detailed.career;
        record.push("career_win_rate", career.win_rate.unwrap_or(0.0));
        record.push("career_second_rate", career.second_rate.unwrap_or(0.0));
        record.push("career_third_rate", career.third_rate.unwrap_or(0.0));
        record.push("career_avg_st", career.avg_st.unwrap_or(cfg.venue_avg_st_default));

        // Experience and penalties
        let sg_appearances = detailed.sg_appearances.unwrap_or(0.0);
        record.push("sg_appearances", sg_appearances);
        record.push("high_grade_experience", flag(sg_appearances > 0.0));
        let flying = detailed.flying_start_count.unwrap_or(0.0);
        let late = detailed.late_start_count.unwrap_or(0.0);
        record.push("late_start_count", late);
        record.push("penalty_risk_score", flying + late * cfg.late_start_weight);

        // Grade-level results
        let mut grade_score = 0.0;
        for (grade, weight) in GRADES.iter().zip(GRADE_WEIGHTS) {
            let win_rate = detailed.grade(grade).map(|g| g.win_rate).unwrap_or(0.0);
            grade_score += win_rate * weight;
            record.push(grade_feature_name(grade), win_rate);
        }
        record.push(
            "sg_experience_score",
            flag(detailed.grade("SG").map(|g| g.races > 0.0).unwrap_or(false)),
        );
        record.push("racer_grade_score", grade_score);

        // Championship rates, normalised by races run
        let total_yusyutsu = detailed.total_yusyutsu();
        let total_yusho = detailed.total_yusho();
        let total_races = detailed.total_races();
        record.push("total_yusyutsu", total_yusyutsu);
        record.push("total_yusho", total_yusho);
        record.push("yusyutsu_rate", safe_ratio(total_yusyutsu, total_races));
        record.push("yusho_rate", safe_ratio(total_yusho, total_races));

        // Course-specific
        let course_stats = detailed.course(course);
        record.push(
            "course_specific_1st_rate",
            course_stats
                .and_then(|c| c.first_rate)
                .unwrap_or(cfg.course_first_rate_default),
        );
        record.push(
            "course_specific_win_rate",
            course_stats.and_then(|c| c.win_rate).unwrap_or(0.0),
        );
        for (name, technique) in [
            ("course_nige_rate", Technique::Nige),
            ("course_sashi_rate", Technique::Sashi),
            ("course_makuri_rate", Technique::Makuri),
            ("course_makurizashi_rate", Technique::Makurizashi),
        ] {
            record.push(
                name,
                course_stats
                    .map(|c| c.technique_rate(technique))
                    .unwrap_or(0.0),
            );
        }

        // Venue-specific
        let venue_stats = detailed.venue(venue_id);
        record.push(
            "venue_specific_win_rate",
            venue_stats.and_then(|v| v.win_rate).unwrap_or(0.0),
        );
        record.push(
            "venue_specific_1st_rate",
            venue_stats.and_then(|v| v.first_rate).unwrap_or(0.0),
        );
        record.push(
            "venue_specific_2nd_rate",
            venue_stats.and_then(|v| v.second_rate).unwrap_or(0.0),
        );
        record.push(
            "venue_avg_st",
            venue_stats
                .and_then(|v| v.avg_st)
                .unwrap_or(cfg.venue_avg_st_default),
        );
        record.push(
            "venue_experience",
            venue_stats.and_then(|v| v.races).unwrap_or(0.0),
        );

        // Weather-specific
        let weather_stats = weather.and_then(|w| detailed.weather(w));
        record.push(
            "weather_win_rate",
            weather_stats.and_then(|w| w.win_rate).unwrap_or(0.0),
        );
        record.push(
            "weather_place_rate_2",
            weather_stats.and_then(|w| w.place_rate_2).unwrap_or(0.0),
        );
    }

    fn composite_features(&self, record: &mut FeatureRecord) {
        let win_rate = record.value("win_rate");
        let motor_rate_2 = record.value("motor_rate_2");
        let exhibition_quality = record.value("exhibition_quality");
        let course_advantage = record.value("course_advantage");
        let start_quality = record.value("start_quality");
        let is_course_1 = record.value("is_course_1");

        record.push(
            "total_score",
            win_rate * 0.3
                + motor_rate_2 * 0.2
                + exhibition_quality * 0.2
                + course_advantage * 10.0
                + start_quality * 0.1,
        );
        record.push("course1_ability", is_course_1 * win_rate * 0.1);
        record.push("motor_exhibition", motor_rate_2 * exhibition_quality * 0.01);
        record.push(
            "total_ability_score",
            record.value("career_win_rate") * 0.3
                + record.value("racer_grade_score") * 0.2
                + record.value("venue_specific_win_rate") * 0.2
                + record.value("course_specific_1st_rate") * 0.3,
        );
    }
}

fn grade_feature_name(grade: &str) -> &'static str {
    match grade {
        "SG" => "sg_win_rate",
        "G1" => "g1_win_rate",
        "G2" => "g2_win_rate",
        _ => "g3_win_rate",
    }
}

fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator > 0.0 {
        numerator / denominator
    } else {
        0.0
    }
}

/// Ordered feature schema produced by [`FeatureBuilder::build`]
pub fn feature_names() -> Vec<&'static str> {
    vec![
        // Basic (6)
        "win_rate",
        "place_rate_2",
        "place_rate_3",
        "grade_score",
        "is_a_class",
        "is_a1",
        // Equipment (5)
        "motor_rate_2",
        "motor_rate_3",
        "boat_rate_2",
        "motor_quality",
        "motor_poor",
        // Timing (9)
        "exhibition_time",
        "exhibition_turn_time",
        "exhibition_straight_time",
        "exhibition_quality",
        "average_st",
        "flying_count",
        "late_count",
        "start_quality",
        "start_risk",
        // Course (8)
        "boat_number",
        "course",
        "venue_id",
        "is_course_1",
        "is_inner_course",
        "course_win_rate",
        "venue_course1_rate",
        "course_advantage",
        // Relative (4)
        "exhibition_rank",
        "win_rate_rank",
        "is_top_exhibition",
        "is_top_win_rate",
        // Detailed (31)
        "career_win_rate",
        "career_second_rate",
        "career_third_rate",
        "career_avg_st",
        "sg_appearances",
        "high_grade_experience",
        "late_start_count",
        "penalty_risk_score",
        "sg_win_rate",
        "g1_win_rate",
        "g2_win_rate",
        "g3_win_rate",
        "sg_experience_score",
        "racer_grade_score",
        "total_yusyutsu",
        "total_yusho",
        "yusyutsu_rate",
        "yusho_rate",
        "course_specific_1st_rate",
        "course_specific_win_rate",
        "course_nige_rate",
        "course_sashi_rate",
        "course_makuri_rate",
        "course_makurizashi_rate",
        "venue_specific_win_rate",
        "venue_specific_1st_rate",
        "venue_specific_2nd_rate",
        "venue_avg_st",
        "venue_experience",
        "weather_win_rate",
        "weather_place_rate_2",
        // Composite (4)
        "total_score",
        "course1_ability",
        "motor_exhibition",
        "total_ability_score",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Competitor;
    use serde_json::json;

    fn create_test_race() -> RaceContext {
        let exhibition = [6.70, 6.75, 6.70, 6.90, 6.60, 6.95];
        let win_rates = [7.0, 5.0, 6.0, 4.5, 5.5, 3.2];
        let grades = ["A1", "B1", "A2", "B2", "B1", "B1"];
        let competitors = (0..6)
            .map(|i| Competitor {
                boat_number: i as u8 + 1,
                racer_id: 4000 + i as u32,
                racer_name: format!("Racer {}", i + 1),
                racer_grade: Some(grades[i].to_string()),
                win_rate: Some(win_rates[i]),
                motor_rate_2: Some(20.0 + 5.0 * i as f64),
                exhibition_time: Some(exhibition[i]),
                average_st: Some(0.15),
                ..Default::default()
            })
            .collect();
        RaceContext {
            key: RaceKey::new(20240115, 1, 1),
            weather: Some("晴".to_string()),
            competitors,
        }
    }

    #[test]
    fn test_grade_score() {
        assert_eq!(grade_score(Some("A1")), 4.0);
        assert_eq!(grade_score(Some("A2")), 3.0);
        assert_eq!(grade_score(Some("B1")), 2.0);
        assert_eq!(grade_score(Some("B2")), 1.0);
        assert_eq!(grade_score(Some("unknown")), 2.0);
        assert_eq!(grade_score(None), 2.0);
    }

    #[test]
    fn test_schema_matches_feature_names() {
        let frame = FeatureBuilder::default().build(&create_test_race()).unwrap();
        let expected: Vec<String> = feature_names().into_iter().map(String::from).collect();
        assert_eq!(frame.names(), expected.as_slice());
        assert_eq!(frame.len(), 6);
        assert!(frame.rows().iter().all(|r| r.len() == expected.len()));
    }

    #[test]
    fn test_exhibition_rank_ties() {
        let frame = FeatureBuilder::default().build(&create_test_race()).unwrap();
        let ranks: Vec<f64> = (0..6)
            .map(|i| frame.value(i, "exhibition_rank").unwrap())
            .collect();
        // Boat 5 fastest; boats 1 and 3 tied behind it
        assert_eq!(ranks, vec![2.0, 4.0, 2.0, 5.0, 1.0, 6.0]);
        assert_eq!(frame.value(4, "is_top_exhibition"), Some(1.0));
        assert_eq!(frame.value(0, "is_top_exhibition"), Some(0.0));
    }

    #[test]
    fn test_win_rate_rank() {
        let frame = FeatureBuilder::default().build(&create_test_race()).unwrap();
        assert_eq!(frame.value(0, "win_rate_rank"), Some(1.0));
        assert_eq!(frame.value(5, "win_rate_rank"), Some(6.0));
        assert_eq!(frame.value(0, "is_top_win_rate"), Some(1.0));
    }

    #[test]
    fn test_timing_and_equipment_features() {
        let frame = FeatureBuilder::default().build(&create_test_race()).unwrap();
        // Boat 5: 6.60 exhibition → (6.80 - 6.60) * 10 = 2.0
        assert!((frame.value(4, "exhibition_quality").unwrap() - 2.0).abs() < 1e-9);
        // Slower than reference clamps to 0
        assert_eq!(frame.value(3, "exhibition_quality"), Some(0.0));
        // (0.18 - 0.15) * 50 = 1.5
        assert!((frame.value(0, "start_quality").unwrap() - 1.5).abs() < 1e-9);
        // Motor rates 20, 25, ..., 45
        assert_eq!(frame.value(0, "motor_poor"), Some(1.0));
        assert_eq!(frame.value(1, "motor_poor"), Some(0.0));
        assert_eq!(frame.value(5, "motor_quality"), Some(1.0));
        assert_eq!(frame.value(4, "motor_quality"), Some(0.0));
    }

    #[test]
    fn test_course_features() {
        let frame = FeatureBuilder::default().build(&create_test_race()).unwrap();
        assert_eq!(frame.value(0, "is_course_1"), Some(1.0));
        assert_eq!(frame.value(2, "is_inner_course"), Some(1.0));
        assert_eq!(frame.value(3, "is_inner_course"), Some(0.0));
        assert!((frame.value(0, "course_advantage").unwrap() - 0.3).abs() < 1e-9);
        assert_eq!(frame.value(4, "course_advantage"), Some(0.0));
        assert!((frame.value(0, "venue_course1_rate").unwrap() - 0.52).abs() < 1e-9);
        assert!((frame.value(1, "course_win_rate").unwrap() - 0.14).abs() < 1e-9);
    }

    #[test]
    fn test_start_risk() {
        let mut race = create_test_race();
        race.competitors[2].flying_count = Some(1.0);
        race.competitors[2].late_count = Some(2.0);
        let frame = FeatureBuilder::default().build(&race).unwrap();
        assert!((frame.value(2, "start_risk").unwrap() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_detailed_defaults_without_block() {
        let frame = FeatureBuilder::default().build(&create_test_race()).unwrap();
        assert!((frame.value(0, "course_specific_1st_rate").unwrap() - 16.7).abs() < 1e-9);
        assert_eq!(frame.value(0, "yusho_rate"), Some(0.0));
        assert_eq!(frame.value(0, "course_nige_rate"), Some(0.0));
        // 0.3 * 0 + 0.2 * 0 + 0.2 * 0 + 0.3 * 16.7
        assert!((frame.value(0, "total_ability_score").unwrap() - 5.01).abs() < 1e-9);
    }

    #[test]
    fn test_detailed_features_from_block() {
        let mut race = create_test_race();
        race.competitors[0].detailed_stats = Some(json!({
            "overall": {"races": 100, "win_rate": 7.5},
            "flying_start_count": 1,
            "late_start_count": 2,
            "grade_stats": {"G1": {"races": 10, "win_rate": 6.0, "yusyutsu": 4, "yusho": 2}},
            "course_stats": {"1コース": {"1st_rate": 60.0, "winning_technique": {"逃げ": 3, "差し": 1}}},
            "venue_stats": {"桐生": {"win_rate": 7.0, "races": 12}},
            "weather_stats": {"晴れ": {"win_rate": 7.7, "place_rate_2": 52.0}}
        }));
        let frame = FeatureBuilder::default().build(&race).unwrap();

        assert_eq!(frame.value(0, "career_win_rate"), Some(7.5));
        assert!((frame.value(0, "penalty_risk_score").unwrap() - 2.0).abs() < 1e-9);
        assert!((frame.value(0, "racer_grade_score").unwrap() - 9.0).abs() < 1e-9);
        assert!((frame.value(0, "yusyutsu_rate").unwrap() - 0.04).abs() < 1e-9);
        assert!((frame.value(0, "yusho_rate").unwrap() - 0.02).abs() < 1e-9);
        assert_eq!(frame.value(0, "course_specific_1st_rate"), Some(60.0));
        assert!((frame.value(0, "course_nige_rate").unwrap() - 0.75).abs() < 1e-9);
        assert!((frame.value(0, "course_sashi_rate").unwrap() - 0.25).abs() < 1e-9);
        assert_eq!(frame.value(0, "venue_specific_win_rate"), Some(7.0));
        assert_eq!(frame.value(0, "venue_experience"), Some(12.0));
        assert_eq!(frame.value(0, "weather_win_rate"), Some(7.7));

        // 7.5 * 0.3 + 9.0 * 0.2 + 7.0 * 0.2 + 60.0 * 0.3
        let expected = 2.25 + 1.8 + 1.4 + 18.0;
        assert!((frame.value(0, "total_ability_score").unwrap() - expected).abs() < 1e-9);
    }

    #[test]
    fn test_composite_features() {
        let frame = FeatureBuilder::default().build(&create_test_race()).unwrap();
        // Boat 1: win 7.0, motor 20, exq 1.0, course_adv 0.3, start_q 1.5
        let expected = 7.0 * 0.3 + 20.0 * 0.2 + 1.0 * 0.2 + 0.3 * 10.0 + 1.5 * 0.1;
        assert!((frame.value(0, "total_score").unwrap() - expected).abs() < 1e-9);
        assert!((frame.value(0, "course1_ability").unwrap() - 0.7).abs() < 1e-9);
        assert!((frame.value(0, "motor_exhibition").unwrap() - 0.2).abs() < 1e-9);
        assert_eq!(frame.value(1, "course1_ability"), Some(0.0));
    }

    #[test]
    fn test_deterministic_and_order_preserving() {
        let race = create_test_race();
        let builder = FeatureBuilder::default();
        let a = builder.build(&race).unwrap();
        let b = builder.build(&race).unwrap();
        assert_eq!(a.rows(), b.rows());
        assert_eq!(a.boat_numbers, vec![1, 2, 3, 4, 5, 6]);

        let mut reversed = race.clone();
        reversed.competitors.reverse();
        let c = builder.build(&reversed).unwrap();
        assert_eq!(c.boat_numbers, vec![6, 5, 4, 3, 2, 1]);
        assert_eq!(c.rows()[0], a.rows()[5]);
    }

    #[test]
    fn test_rejects_short_race() {
        let mut race = create_test_race();
        race.competitors.pop();
        assert!(matches!(
            FeatureBuilder::default().build(&race),
            Err(EngineError::InvalidCompetitorCount(5))
        ));
    }

    #[test]
    fn test_align_to_schema() {
        let frame = FeatureFrame::new(
            RaceKey::new(20240115, 1, 1),
            vec![1],
            vec!["a".to_string(), "b".to_string(), "extra".to_string()],
            vec![vec![1.0, 2.0, 3.0]],
        )
        .unwrap();
        let schema = vec!["b".to_string(), "missing".to_string(), "a".to_string()];
        let (rows, missing, extra) = frame.align_to(&schema);
        assert_eq!(rows, vec![vec![2.0, 0.0, 1.0]]);
        assert_eq!(missing, vec!["missing".to_string()]);
        assert_eq!(extra, vec!["extra".to_string()]);
    }
}
