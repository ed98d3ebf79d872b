//! Backtest Metrics
//!
//! Hit counters at fixed truncation depths, derived hit rates and the
//! run-over-run drift check.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// One tracked hit metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HitMetric {
    Win,           // top win-probability boat finished 1st
    Top2,          // winner among the top 2 by win probability
    Top3,          // winner among the top 3 by win probability
    ExactaTop5,
    ExactaTop10,
    QuinellaTop5,
    TrifectaTop10,
    TrifectaTop20,
    TrioTop10,
}

impl HitMetric {
    pub const ALL: [HitMetric; 9] = [
        HitMetric::Win,
        HitMetric::Top2,
        HitMetric::Top3,
        HitMetric::ExactaTop5,
        HitMetric::ExactaTop10,
        HitMetric::QuinellaTop5,
        HitMetric::TrifectaTop10,
        HitMetric::TrifectaTop20,
        HitMetric::TrioTop10,
    ];

    /// Key used in persisted rate maps
    pub fn name(&self) -> &'static str {
        match self {
            HitMetric::Win => "win_accuracy",
            HitMetric::Top2 => "top2_accuracy",
            HitMetric::Top3 => "top3_accuracy",
            HitMetric::ExactaTop5 => "exacta_top5_accuracy",
            HitMetric::ExactaTop10 => "exacta_top10_accuracy",
            HitMetric::QuinellaTop5 => "quinella_top5_accuracy",
            HitMetric::TrifectaTop10 => "trifecta_top10_accuracy",
            HitMetric::TrifectaTop20 => "trifecta_top20_accuracy",
            HitMetric::TrioTop10 => "trio_top10_accuracy",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            HitMetric::Win => "Win",
            HitMetric::Top2 => "Top2 contains winner",
            HitMetric::Top3 => "Top3 contains winner",
            HitMetric::ExactaTop5 => "Exacta top 5",
            HitMetric::ExactaTop10 => "Exacta top 10",
            HitMetric::QuinellaTop5 => "Quinella top 5",
            HitMetric::TrifectaTop10 => "Trifecta top 10",
            HitMetric::TrifectaTop20 => "Trifecta top 20",
            HitMetric::TrioTop10 => "Trio top 10",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|m| m.name() == name)
    }
}

impl fmt::Display for HitMetric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// Race and hit counts for one backtest run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HitCounters {
    pub total_races: usize,
    pub evaluated: usize,
    pub skipped: usize,
    pub win: usize,
    pub top2: usize,
    pub top3: usize,
    pub exacta_top5: usize,
    pub exacta_top10: usize,
    pub quinella_top5: usize,
    pub trifecta_top10: usize,
    pub trifecta_top20: usize,
    pub trio_top10: usize,
}

impl HitCounters {
    pub fn get(&self, metric: HitMetric) -> usize {
        match metric {
            HitMetric::Win => self.win,
            HitMetric::Top2 => self.top2,
            HitMetric::Top3 => self.top3,
            HitMetric::ExactaTop5 => self.exacta_top5,
            HitMetric::ExactaTop10 => self.exacta_top10,
            HitMetric::QuinellaTop5 => self.quinella_top5,
            HitMetric::TrifectaTop10 => self.trifecta_top10,
            HitMetric::TrifectaTop20 => self.trifecta_top20,
            HitMetric::TrioTop10 => self.trio_top10,
        }
    }

    fn slot(&mut self, metric: HitMetric) -> &mut usize {
        match metric {
            HitMetric::Win => &mut self.win,
            HitMetric::Top2 => &mut self.top2,
            HitMetric::Top3 => &mut self.top3,
            HitMetric::ExactaTop5 => &mut self.exacta_top5,
            HitMetric::ExactaTop10 => &mut self.exacta_top10,
            HitMetric::QuinellaTop5 => &mut self.quinella_top5,
            HitMetric::TrifectaTop10 => &mut self.trifecta_top10,
            HitMetric::TrifectaTop20 => &mut self.trifecta_top20,
            HitMetric::TrioTop10 => &mut self.trio_top10,
        }
    }

    /// Count one evaluated race and its hits
    pub fn record_evaluated(&mut self, hits: &[HitMetric]) {
        self.total_races += 1;
        self.evaluated += 1;
        for &metric in hits {
            *self.slot(metric) += 1;
        }
    }

    pub fn record_skipped(&mut self) {
        self.total_races += 1;
        self.skipped += 1;
    }

    /// Hit rate in percent over evaluated races; 0 when nothing was evaluated
    pub fn rate(&self, metric: HitMetric) -> f64 {
        if self.evaluated == 0 {
            return 0.0;
        }
        self.get(metric) as f64 / self.evaluated as f64 * 100.0
    }

    /// All rates keyed by metric name
    pub fn rates(&self) -> BTreeMap<String, f64> {
        HitMetric::ALL
            .iter()
            .map(|m| (m.name().to_string(), self.rate(*m)))
            .collect()
    }

    pub fn merge(&mut self, other: &HitCounters) {
        self.total_races += other.total_races;
        self.evaluated += other.evaluated;
        self.skipped += other.skipped;
        for metric in HitMetric::ALL {
            *self.slot(metric) += other.get(metric);
        }
    }
}

/// A metric that fell by more than the drift threshold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftAlert {
    pub metric: HitMetric,
    pub previous: f64,
    pub current: f64,
    /// Drop in percentage points (previous - current)
    pub delta: f64,
}

impl fmt::Display for DriftAlert {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} accuracy dropped: {:.1}% -> {:.1}% (-{:.1}pp)",
            self.metric.label(),
            self.previous,
            self.current,
            self.delta
        )
    }
}

/// Compare current rates against a previous run's rates.
///
/// Metrics missing from either side are ignored. An alert fires when the
/// drop exceeds `threshold` percentage points.
pub fn detect_drift(
    previous: &BTreeMap<String, f64>,
    current: &BTreeMap<String, f64>,
    threshold: f64,
) -> Vec<DriftAlert> {
    HitMetric::ALL
        .iter()
        .filter_map(|metric| {
            let prev = *previous.get(metric.name())?;
            let curr = *current.get(metric.name())?;
            let delta = prev - curr;
            (delta > threshold).then_some(DriftAlert {
                metric: *metric,
                previous: prev,
                current: curr,
                delta,
            })
        })
        .collect()
}

/// Print a run summary to stdout
pub fn print_summary(counters: &HitCounters, alerts: &[DriftAlert]) {
    println!("\n{}", "=".repeat(60));
    println!("BACKTEST RESULTS");
    println!("{}", "=".repeat(60));
    println!("Total races: {}", counters.total_races);
    println!("Evaluated: {}", counters.evaluated);
    println!("Skipped: {}", counters.skipped);
    println!("{}", "-".repeat(60));
    for metric in HitMetric::ALL {
        println!(
            "{:<24} {:4} / {} = {:5.1}%",
            metric.label(),
            counters.get(metric),
            counters.evaluated,
            counters.rate(metric)
        );
    }
    if !alerts.is_empty() {
        println!("{}", "-".repeat(60));
        println!("DRIFT ALERTS");
        for alert in alerts {
            println!("  {}", alert);
        }
    }
    println!("{}", "=".repeat(60));
}
