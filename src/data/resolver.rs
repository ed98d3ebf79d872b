//! Statistic resolution with fallback chains
//!
//! Each statistic is an ordered list of (field, transform) sources plus a
//! default. The first source whose field is present and not NaN wins;
//! otherwise the default applies. Missing data never raises an error.

use crate::models::Competitor;

/// One candidate source for a statistic
#[derive(Debug, Clone, Copy)]
pub struct StatSource {
    pub field: &'static str,
    pub transform: fn(f64) -> f64,
}

/// A resolvable statistic: sources in precedence order and a default
#[derive(Debug, Clone, Copy)]
pub struct StatSpec {
    pub name: &'static str,
    pub sources: &'static [StatSource],
    pub default: f64,
}

fn identity(value: f64) -> f64 {
    value
}

/// Counts are non-negative whole numbers
fn count(value: f64) -> f64 {
    value.max(0.0).floor()
}

/// Course number, truncated to an integer lane
fn lane(value: f64) -> f64 {
    value.trunc()
}

const fn source(field: &'static str) -> StatSource {
    StatSource {
        field,
        transform: identity,
    }
}

pub const WIN_RATE: StatSpec = StatSpec {
    name: "win_rate",
    sources: &[source("win_rate"), source("racer_win_rate")],
    default: 5.0,
};

pub const PLACE_RATE_2: StatSpec = StatSpec {
    name: "place_rate_2",
    sources: &[source("place_rate_2")],
    default: 30.0,
};

pub const PLACE_RATE_3: StatSpec = StatSpec {
    name: "place_rate_3",
    sources: &[source("place_rate_3")],
    default: 50.0,
};

pub const MOTOR_RATE_2: StatSpec = StatSpec {
    name: "motor_rate_2",
    sources: &[source("motor_rate_2"), source("motor_second_rate")],
    default: 30.0,
};

pub const MOTOR_RATE_3: StatSpec = StatSpec {
    name: "motor_rate_3",
    sources: &[source("motor_rate_3"), source("motor_third_rate")],
    default: 50.0,
};

pub const BOAT_RATE_2: StatSpec = StatSpec {
    name: "boat_rate_2",
    sources: &[source("boat_rate_2")],
    default: 30.0,
};

pub const EXHIBITION_TIME: StatSpec = StatSpec {
    name: "exhibition_time",
    sources: &[source("exhibition_time")],
    default: 6.80,
};

pub const EXHIBITION_TURN_TIME: StatSpec = StatSpec {
    name: "exhibition_turn_time",
    sources: &[source("exhibition_turn_time")],
    default: 5.50,
};

pub const EXHIBITION_STRAIGHT_TIME: StatSpec = StatSpec {
    name: "exhibition_straight_time",
    sources: &[source("exhibition_straight_time")],
    default: 7.50,
};

pub const AVERAGE_ST: StatSpec = StatSpec {
    name: "average_st",
    sources: &[source("average_st"), source("avg_start_timing")],
    default: 0.17,
};

pub const FLYING_COUNT: StatSpec = StatSpec {
    name: "flying_count",
    sources: &[StatSource {
        field: "flying_count",
        transform: count,
    }],
    default: 0.0,
};

pub const LATE_COUNT: StatSpec = StatSpec {
    name: "late_count",
    sources: &[StatSource {
        field: "late_count",
        transform: count,
    }],
    default: 0.0,
};

/// Entry course, falling back to the boat number
pub const COURSE: StatSpec = StatSpec {
    name: "course",
    sources: &[
        StatSource {
            field: "course",
            transform: lane,
        },
        StatSource {
            field: "actual_course",
            transform: lane,
        },
        StatSource {
            field: "boat_number",
            transform: lane,
        },
    ],
    default: 1.0,
};

/// Every statistic the feature builder resolves
pub static ALL_STATS: [StatSpec; 13] = [
    WIN_RATE,
    PLACE_RATE_2,
    PLACE_RATE_3,
    MOTOR_RATE_2,
    MOTOR_RATE_3,
    BOAT_RATE_2,
    EXHIBITION_TIME,
    EXHIBITION_TURN_TIME,
    EXHIBITION_STRAIGHT_TIME,
    AVERAGE_ST,
    FLYING_COUNT,
    LATE_COUNT,
    COURSE,
];

/// Resolve a statistic for a competitor
pub fn resolve(competitor: &Competitor, spec: &StatSpec) -> f64 {
    spec.sources
        .iter()
        .find_map(|src| competitor.field(src.field).map(src.transform))
        .filter(|v| !v.is_nan())
        .unwrap_or(spec.default)
}

/// Look up a statistic spec by name
pub fn stat_spec(name: &str) -> Option<&'static StatSpec> {
    ALL_STATS.iter().find(|spec| spec.name == name)
}

/// Resolved view of a competitor's statistics
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedStats {
    pub win_rate: f64,
    pub place_rate_2: f64,
    pub place_rate_3: f64,
    pub motor_rate_2: f64,
    pub motor_rate_3: f64,
    pub boat_rate_2: f64,
    pub exhibition_time: f64,
    pub exhibition_turn_time: f64,
    pub exhibition_straight_time: f64,
    pub average_st: f64,
    pub flying_count: f64,
    pub late_count: f64,
    pub course: u8,
}

impl ResolvedStats {
    pub fn from_competitor(competitor: &Competitor) -> Self {
        Self {
            win_rate: resolve(competitor, &WIN_RATE),
            place_rate_2: resolve(competitor, &PLACE_RATE_2),
            place_rate_3: resolve(competitor, &PLACE_RATE_3),
            motor_rate_2: resolve(competitor, &MOTOR_RATE_2),
            motor_rate_3: resolve(competitor, &MOTOR_RATE_3),
            boat_rate_2: resolve(competitor, &BOAT_RATE_2),
            exhibition_time: resolve(competitor, &EXHIBITION_TIME),
            exhibition_turn_time: resolve(competitor, &EXHIBITION_TURN_TIME),
            exhibition_straight_time: resolve(competitor, &EXHIBITION_STRAIGHT_TIME),
            average_st: resolve(competitor, &AVERAGE_ST),
            flying_count: resolve(competitor, &FLYING_COUNT),
            late_count: resolve(competitor, &LATE_COUNT),
            course: resolve(competitor, &COURSE).clamp(0.0, u8::MAX as f64) as u8,
        }
    }
}
