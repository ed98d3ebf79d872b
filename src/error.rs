//! Engine error types and input validation helpers

use thiserror::Error;

/// Errors raised by the prediction engine
#[derive(Debug, Error)]
pub enum EngineError {
    /// Race does not have exactly six competitors
    #[error("Exactly 6 competitors required, got {0}")]
    InvalidCompetitorCount(usize),

    #[error("Boat number must be between 1 and 6, got {0}")]
    InvalidBoatNumber(u8),

    #[error("Boat number {0} appears more than once in the race")]
    DuplicateBoatNumber(u8),

    /// Position matrix is not 6 rows by 6 columns
    #[error("Position probability matrix must be 6x6, got {rows}x{cols}")]
    InvalidMatrixShape { rows: usize, cols: usize },

    #[error("Invalid probability value: {0}")]
    InvalidProbability(f64),

    /// Inference requested before a classifier was trained or loaded
    #[error("Model has no trained classifier bound; train or load an artifact first")]
    UnboundModel,

    #[error("Feature row has {actual} values but schema has {expected} names")]
    FeatureCountMismatch { expected: usize, actual: usize },

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] polars::prelude::PolarsError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Model artifact error: {0}")]
    Artifact(#[from] bincode::Error),

    #[error("Storage error: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("Config error: {0}")]
    Config(String),
}

impl EngineError {
    /// Whether the error comes from a caller violating an input contract
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidCompetitorCount(_)
                | EngineError::InvalidBoatNumber(_)
                | EngineError::DuplicateBoatNumber(_)
                | EngineError::InvalidMatrixShape { .. }
                | EngineError::InvalidProbability(_)
                | EngineError::FeatureCountMismatch { .. }
                | EngineError::Validation(_)
        )
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(feature = "api")]
mod response {
    use super::EngineError;
    use crate::models::ErrorResponse;
    use actix_web::{http::StatusCode, HttpResponse, ResponseError};

    impl ResponseError for EngineError {
        fn status_code(&self) -> StatusCode {
            if self.is_contract_violation() {
                StatusCode::BAD_REQUEST
            } else if matches!(self, EngineError::UnboundModel) {
                StatusCode::SERVICE_UNAVAILABLE
            } else {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }

        fn error_response(&self) -> HttpResponse {
            let error_code = match self {
                EngineError::UnboundModel => "model_unavailable",
                e if e.is_contract_violation() => "validation_error",
                _ => "internal_error",
            };

            HttpResponse::build(self.status_code()).json(ErrorResponse {
                error: error_code.to_string(),
                message: self.to_string(),
            })
        }
    }
}

/// Validation functions
pub fn validate_entries_count(count: usize) -> Result<()> {
    if count != 6 {
        return Err(EngineError::InvalidCompetitorCount(count));
    }
    Ok(())
}

pub fn validate_boat_number(boat_no: u8) -> Result<()> {
    if !(1..=6).contains(&boat_no) {
        return Err(EngineError::InvalidBoatNumber(boat_no));
    }
    Ok(())
}

pub fn validate_odds(odds: f64) -> Result<()> {
    if !odds.is_finite() || odds < 0.0 {
        return Err(EngineError::Validation(format!(
            "Odds must be non-negative, got {}",
            odds
        )));
    }
    Ok(())
}

pub fn validate_probability(prob: f64) -> Result<()> {
    if !(0.0..=1.0).contains(&prob) {
        return Err(EngineError::InvalidProbability(prob));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_entries_count() {
        assert!(validate_entries_count(6).is_ok());
        assert!(validate_entries_count(5).is_err());
        assert!(validate_entries_count(7).is_err());
        assert!(validate_entries_count(0).is_err());
    }

    #[test]
    fn test_validate_boat_number() {
        for i in 1..=6 {
            assert!(validate_boat_number(i).is_ok());
        }
        assert!(validate_boat_number(0).is_err());
        assert!(validate_boat_number(7).is_err());
    }

    #[test]
    fn test_validate_odds() {
        assert!(validate_odds(0.0).is_ok());
        assert!(validate_odds(5.5).is_ok());
        assert!(validate_odds(-1.0).is_err());
        assert!(validate_odds(f64::NAN).is_err());
    }

    #[test]
    fn test_validate_probability() {
        assert!(validate_probability(0.0).is_ok());
        assert!(validate_probability(1.0).is_ok());
        assert!(validate_probability(-0.1).is_err());
        assert!(validate_probability(1.1).is_err());
    }

    #[test]
    fn test_contract_violation_classification() {
        assert!(EngineError::InvalidCompetitorCount(5).is_contract_violation());
        assert!(EngineError::InvalidMatrixShape { rows: 5, cols: 6 }.is_contract_violation());
        assert!(!EngineError::UnboundModel.is_contract_violation());
        assert!(!EngineError::Config("bad".to_string()).is_contract_violation());
    }

    #[test]
    fn test_error_display() {
        let err = EngineError::InvalidMatrixShape { rows: 5, cols: 6 };
        assert!(err.to_string().contains("5x6"));
        assert!(EngineError::UnboundModel.to_string().contains("no trained classifier"));
    }
}
