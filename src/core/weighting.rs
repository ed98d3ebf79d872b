//! Time-decay sample weighting
//!
//! A training example loses half its weight every `half_life_years`.
//! Weights are rescaled so they sum to the number of examples.

use chrono::NaiveDate;

use crate::error::{EngineError, Result};

const DAYS_PER_YEAR: f64 = 365.25;

/// Parse a YYYYMMDD race date
pub fn parse_race_date(date: u32) -> Result<NaiveDate> {
    NaiveDate::parse_from_str(&date.to_string(), "%Y%m%d")
        .map_err(|_| EngineError::Validation(format!("Invalid race date: {}", date)))
}

/// Weight of one example `days_old` days before the reference, before rescaling
pub fn decay_weight(days_old: f64, half_life_years: f64) -> f64 {
    0.5_f64.powf(days_old.max(0.0) / (DAYS_PER_YEAR * half_life_years))
}

/// Rescaled weights for examples dated `dates`.
///
/// The reference date defaults to the newest date in the batch. Examples
/// dated after the reference are treated as zero days old.
pub fn time_decay_weights(
    dates: &[u32],
    reference: Option<u32>,
    half_life_years: f64,
) -> Result<Vec<f64>> {
    if !half_life_years.is_finite() || half_life_years <= 0.0 {
        return Err(EngineError::Validation(format!(
            "Half-life must be positive, got {}",
            half_life_years
        )));
    }
    if dates.is_empty() {
        return Ok(Vec::new());
    }

    let parsed = dates
        .iter()
        .map(|&d| parse_race_date(d))
        .collect::<Result<Vec<_>>>()?;
    let reference = match reference {
        Some(date) => parse_race_date(date)?,
        None => match parsed.iter().max() {
            Some(newest) => *newest,
            None => return Ok(Vec::new()),
        },
    };

    let raw: Vec<f64> = parsed
        .iter()
        .map(|d| decay_weight((reference - *d).num_days() as f64, half_life_years))
        .collect();

    let total: f64 = raw.iter().sum();
    let scale = dates.len() as f64 / total;
    Ok(raw.into_iter().map(|w| w * scale).collect())
}
