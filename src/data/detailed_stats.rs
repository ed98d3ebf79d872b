//! Typed lookup over a competitor's nested detailed statistics
//!
//! The collector supplies loosely keyed JSON blocks ("1コース", "course_1",
//! "桐生", "晴れ" ...). `DetailedStats::from_json` maps every block onto a
//! canonical key once, taking the first matching raw key in document order.
//! Everything downstream does exact lookups only.

use serde_json::{Map, Value};
use std::collections::HashMap;

use super::tables::FeatureTables;

/// Championship grades tracked in `grade_stats`
pub const GRADES: [&str; 4] = ["SG", "G1", "G2", "G3"];

/// Weather conditions recognised in `weather_stats` keys and race context
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WeatherCondition {
    Sunny,
    Cloudy,
    Rain,
    Snow,
    Fog,
}

impl WeatherCondition {
    const ALL: [WeatherCondition; 5] = [
        WeatherCondition::Sunny,
        WeatherCondition::Cloudy,
        WeatherCondition::Rain,
        WeatherCondition::Snow,
        WeatherCondition::Fog,
    ];

    fn aliases(&self) -> &'static [&'static str] {
        match self {
            WeatherCondition::Sunny => &["晴", "sunny", "clear", "fine"],
            WeatherCondition::Cloudy => &["曇", "cloud"],
            WeatherCondition::Rain => &["雨", "rain"],
            WeatherCondition::Snow => &["雪", "snow"],
            WeatherCondition::Fog => &["霧", "fog"],
        }
    }

    fn matches(&self, raw: &str) -> bool {
        self.position_in(&raw.to_lowercase()).is_some()
    }

    /// Byte offset of the first alias occurrence
    fn position_in(&self, lowered: &str) -> Option<usize> {
        self.aliases().iter().filter_map(|alias| lowered.find(alias)).min()
    }

    /// Parse a free-form weather description; the leading condition wins
    pub fn parse(raw: &str) -> Option<Self> {
        let lowered = raw.to_lowercase();
        Self::ALL
            .into_iter()
            .filter_map(|c| c.position_in(&lowered).map(|pos| (pos, c)))
            .min_by_key(|(pos, _)| *pos)
            .map(|(_, c)| c)
    }
}

/// Winning technique categories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Technique {
    Nige,
    Sashi,
    Makuri,
    Makurizashi,
    Nuki,
    Megumare,
    Other,
}

impl Technique {
    fn classify(raw: &str) -> Self {
        match raw.trim().to_lowercase().as_str() {
            "逃げ" | "nige" => Technique::Nige,
            "差し" | "sashi" => Technique::Sashi,
            "まくり" | "捲り" | "makuri" => Technique::Makuri,
            "まくり差し" | "捲り差し" | "makurizashi" | "makuri_sashi" => Technique::Makurizashi,
            "抜き" | "nuki" => Technique::Nuki,
            "恵まれ" | "megumare" => Technique::Megumare,
            _ => Technique::Other,
        }
    }
}

/// Winning technique counts for one course
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TechniqueCounts {
    counts: HashMap<Technique, f64>,
}

impl TechniqueCounts {
    pub fn total(&self) -> f64 {
        self.counts.values().sum()
    }

    pub fn count(&self, technique: Technique) -> f64 {
        self.counts.get(&technique).copied().unwrap_or(0.0)
    }

    /// Share of wins using a technique; 0 when nothing was observed
    pub fn fraction(&self, technique: Technique) -> f64 {
        let total = self.total();
        if total <= 0.0 {
            return 0.0;
        }
        self.count(technique) / total
    }
}

/// Results under one condition (course, venue or weather)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConditionStats {
    pub races: Option<f64>,
    pub wins: Option<f64>,
    pub win_rate: Option<f64>,
    pub first_rate: Option<f64>,
    pub second_rate: Option<f64>,
    pub place_rate_2: Option<f64>,
    pub place_rate_3: Option<f64>,
    pub avg_st: Option<f64>,
    /// Explicit technique rates, used when no counts are supplied
    pub technique_rates: HashMap<Technique, f64>,
    pub techniques: TechniqueCounts,
}

impl ConditionStats {
    fn from_block(block: &Map<String, Value>) -> Self {
        let mut technique_rates = HashMap::new();
        for (key, technique) in [
            ("nige_rate", Technique::Nige),
            ("sashi_rate", Technique::Sashi),
            ("makuri_rate", Technique::Makuri),
            ("makurizashi_rate", Technique::Makurizashi),
        ] {
            if let Some(rate) = number(block.get(key)) {
                technique_rates.insert(technique, rate);
            }
        }

        let mut techniques = TechniqueCounts::default();
        if let Some(Value::Object(raw)) = block.get("winning_technique") {
            for (name, count) in raw {
                if let Some(count) = number(Some(count)).filter(|c| *c > 0.0) {
                    *techniques
                        .counts
                        .entry(Technique::classify(name))
                        .or_insert(0.0) += count;
                }
            }
        }

        Self {
            races: number(block.get("races")),
            wins: number(block.get("wins")),
            win_rate: number(block.get("win_rate")),
            first_rate: number(block.get("1st_rate")),
            second_rate: number(block.get("2nd_rate")),
            place_rate_2: number(block.get("place_rate_2")),
            place_rate_3: number(block.get("place_rate_3")),
            avg_st: number(block.get("avg_st")),
            technique_rates,
            techniques,
        }
    }

    /// Technique share from counts, falling back to an explicit rate field
    pub fn technique_rate(&self, technique: Technique) -> f64 {
        if self.techniques.total() > 0.0 {
            return self.techniques.fraction(technique);
        }
        self.technique_rates.get(&technique).copied().unwrap_or(0.0)
    }
}

/// Results in one championship grade
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GradeStats {
    pub races: f64,
    pub wins: f64,
    pub win_rate: f64,
    /// Final-race appearances (優出)
    pub yusyutsu: f64,
    /// Championship victories (優勝)
    pub yusho: f64,
}

/// Career-level figures
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CareerStats {
    pub races: Option<f64>,
    pub win_rate: Option<f64>,
    pub second_rate: Option<f64>,
    pub third_rate: Option<f64>,
    pub avg_st: Option<f64>,
}

/// Canonicalised detailed statistics for one competitor
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DetailedStats {
    pub career: CareerStats,
    pub sg_appearances: Option<f64>,
    pub flying_start_count: Option<f64>,
    pub late_start_count: Option<f64>,
    grades: HashMap<&'static str, GradeStats>,
    courses: HashMap<u8, ConditionStats>,
    venues: HashMap<u8, ConditionStats>,
    weather: HashMap<WeatherCondition, ConditionStats>,
}

impl DetailedStats {
    /// Build the typed lookup from the raw JSON block.
    ///
    /// Non-object input yields an empty lookup.
    pub fn from_json(raw: &Value, tables: &FeatureTables) -> Self {
        let Value::Object(root) = raw else {
            return Self::default();
        };

        let career = match root.get("overall") {
            Some(Value::Object(block)) => CareerStats {
                races: number(block.get("races")),
                win_rate: number(block.get("win_rate")),
                second_rate: number(block.get("second_rate")),
                third_rate: number(block.get("third_rate")),
                avg_st: number(block.get("avg_st")),
            },
            _ => CareerStats::default(),
        };

        let mut grades = HashMap::new();
        if let Some(Value::Object(blocks)) = root.get("grade_stats") {
            for grade in GRADES {
                if let Some(block) = first_block(blocks, |key| key.to_uppercase().contains(grade)) {
                    grades.insert(
                        grade,
                        GradeStats {
                            races: number(block.get("races")).unwrap_or(0.0),
                            wins: number(block.get("wins")).unwrap_or(0.0),
                            win_rate: number(block.get("win_rate")).unwrap_or(0.0),
                            yusyutsu: number(block.get("yusyutsu")).unwrap_or(0.0),
                            yusho: number(block.get("yusho")).unwrap_or(0.0),
                        },
                    );
                }
            }
        }

        let mut courses = HashMap::new();
        if let Some(Value::Object(blocks)) = root.get("course_stats") {
            for course in 1..=6u8 {
                let digit = char::from(b'0' + course);
                if let Some(block) = first_block(blocks, |key| key.contains(digit)) {
                    courses.insert(course, ConditionStats::from_block(block));
                }
            }
        }

        let mut venues = HashMap::new();
        if let Some(Value::Object(blocks)) = root.get("venue_stats") {
            for venue_id in 1..=tables.venue_names.len() as u8 {
                let Some(name) = tables.venue_name(venue_id) else {
                    continue;
                };
                if let Some(block) = first_block(blocks, |key| key.contains(name)) {
                    venues.insert(venue_id, ConditionStats::from_block(block));
                }
            }
        }

        let mut weather = HashMap::new();
        if let Some(Value::Object(blocks)) = root.get("weather_stats") {
            for condition in WeatherCondition::ALL {
                if let Some(block) = first_block(blocks, |key| condition.matches(key)) {
                    weather.insert(condition, ConditionStats::from_block(block));
                }
            }
        }

        Self {
            career,
            sg_appearances: number(root.get("sg_appearances")),
            flying_start_count: number(root.get("flying_start_count")),
            late_start_count: number(root.get("late_start_count")),
            grades,
            courses,
            venues,
            weather,
        }
    }

    pub fn grade(&self, grade: &str) -> Option<&GradeStats> {
        self.grades.get(grade)
    }

    pub fn course(&self, course: u8) -> Option<&ConditionStats> {
        self.courses.get(&course)
    }

    pub fn venue(&self, venue_id: u8) -> Option<&ConditionStats> {
        self.venues.get(&venue_id)
    }

    pub fn weather(&self, condition: WeatherCondition) -> Option<&ConditionStats> {
        self.weather.get(&condition)
    }

    pub fn total_yusyutsu(&self) -> f64 {
        self.grades.values().map(|g| g.yusyutsu).sum()
    }

    pub fn total_yusho(&self) -> f64 {
        self.grades.values().map(|g| g.yusho).sum()
    }

    /// Career race count, falling back to the sum over grades
    pub fn total_races(&self) -> f64 {
        self.career
            .races
            .filter(|r| *r > 0.0)
            .unwrap_or_else(|| self.grades.values().map(|g| g.races).sum())
    }
}

/// First object block whose key satisfies the predicate, in document order
fn first_block<'a, F>(blocks: &'a Map<String, Value>, predicate: F) -> Option<&'a Map<String, Value>>
where
    F: Fn(&str) -> bool,
{
    blocks.iter().find_map(|(key, value)| match value {
        Value::Object(block) if predicate(key) => Some(block),
        _ => None,
    })
}

/// Numeric value from a JSON number or numeric string. NaN reads as missing.
fn number(value: Option<&Value>) -> Option<f64> {
    let parsed = match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|v| v.is_finite())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample() -> Value {
        json!({
            "overall": {"races": 200, "win_rate": 6.5, "second_rate": 40.0, "third_rate": 55.0, "avg_st": 0.14},
            "sg_appearances": 3,
            "flying_start_count": 1,
            "late_start_count": 2,
            "grade_stats": {
                "SG": {"races": 20, "wins": 2, "win_rate": 5.1, "yusyutsu": 1, "yusho": 0},
                "G1": {"races": 40, "wins": 6, "win_rate": 6.0, "yusyutsu": 3, "yusho": 1}
            },
            "course_stats": {
                "1コース": {"races": 30, "1st_rate": 55.0, "win_rate": 7.9,
                    "winning_technique": {"逃げ": 15, "恵まれ": 1}},
                "course_1_alt": {"races": 1, "1st_rate": 99.0},
                "4コース": {"races": 25, "1st_rate": 12.0, "makuri_rate": 0.4}
            },
            "venue_stats": {
                "桐生": {"races": 18, "win_rate": 6.8, "1st_rate": 30.0, "2nd_rate": 20.0, "avg_st": "0.13"}
            },
            "weather_stats": {
                "晴れ": {"races": 50, "win_rate": 6.9, "place_rate_2": 45.0},
                "雨": {"races": 10, "win_rate": 5.0, "place_rate_2": 30.0}
            }
        })
    }

    #[test]
    fn test_first_matching_course_key_wins() {
        let stats = DetailedStats::from_json(&sample(), &FeatureTables::default());
        let course1 = stats.course(1).unwrap();
        assert_eq!(course1.first_rate, Some(55.0));
        assert!(stats.course(2).is_none());
    }

    #[test]
    fn test_technique_fractions() {
        let stats = DetailedStats::from_json(&sample(), &FeatureTables::default());
        let course1 = stats.course(1).unwrap();
        assert!((course1.technique_rate(Technique::Nige) - 15.0 / 16.0).abs() < 1e-12);
        assert_eq!(course1.technique_rate(Technique::Sashi), 0.0);

        // No counts: explicit rate field is used
        let course4 = stats.course(4).unwrap();
        assert!((course4.technique_rate(Technique::Makuri) - 0.4).abs() < 1e-12);
        assert_eq!(course4.technique_rate(Technique::Nige), 0.0);
    }

    #[test]
    fn test_zero_total_techniques() {
        let counts = TechniqueCounts::default();
        assert_eq!(counts.total(), 0.0);
        assert_eq!(counts.fraction(Technique::Nige), 0.0);
    }

    #[test]
    fn test_venue_and_weather_lookup() {
        let stats = DetailedStats::from_json(&sample(), &FeatureTables::default());
        let kiryu = stats.venue(1).unwrap();
        assert_eq!(kiryu.win_rate, Some(6.8));
        assert_eq!(kiryu.avg_st, Some(0.13));
        assert!(stats.venue(2).is_none());

        let sunny = stats.weather(WeatherCondition::Sunny).unwrap();
        assert_eq!(sunny.place_rate_2, Some(45.0));
        assert_eq!(WeatherCondition::parse("雨のち曇"), Some(WeatherCondition::Rain));
        assert_eq!(WeatherCondition::parse("曇時々雨"), Some(WeatherCondition::Cloudy));
        assert_eq!(WeatherCondition::parse("cloudy, later rain"), Some(WeatherCondition::Cloudy));
        assert_eq!(WeatherCondition::parse("Rain"), Some(WeatherCondition::Rain));
        assert_eq!(WeatherCondition::parse("unknown"), None);
    }

    #[test]
    fn test_championship_totals() {
        let stats = DetailedStats::from_json(&sample(), &FeatureTables::default());
        assert_eq!(stats.total_yusyutsu(), 4.0);
        assert_eq!(stats.total_yusho(), 1.0);
        assert_eq!(stats.total_races(), 200.0);
        assert_eq!(stats.grade("SG").map(|g| g.win_rate), Some(5.1));
        assert!(stats.grade("G3").is_none());
    }

    #[test]
    fn test_non_object_input() {
        let stats = DetailedStats::from_json(&json!("not stats"), &FeatureTables::default());
        assert_eq!(stats, DetailedStats::default());
        assert_eq!(stats.total_races(), 0.0);
    }
}
