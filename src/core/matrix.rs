//! Position probability matrix
//!
//! Six rows (one per competitor, in race order) by six finishing
//! positions. Rows are normalized on construction.

use serde::{Deserialize, Serialize};

use crate::error::{validate_boat_number, EngineError, Result};
use crate::models::{PositionProb, NUM_BOATS};

const UNIFORM: f64 = 1.0 / NUM_BOATS as f64;

/// Row-normalized 6x6 finishing-position probabilities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionMatrix {
    rows: [[f64; NUM_BOATS]; NUM_BOATS],
    boat_numbers: [u8; NUM_BOATS],
}

impl PositionMatrix {
    /// Build from raw rows with boats numbered 1-6 in row order
    pub fn from_rows(rows: &[Vec<f64>]) -> Result<Self> {
        Self::new(rows, &[1, 2, 3, 4, 5, 6])
    }

    /// Build from raw rows and the boat number owning each row.
    ///
    /// Rows are scaled to sum to 1; a row summing to 0 becomes uniform.
    /// Negative or non-finite entries are rejected.
    pub fn new(rows: &[Vec<f64>], boat_numbers: &[u8]) -> Result<Self> {
        if rows.len() != NUM_BOATS {
            return Err(EngineError::InvalidMatrixShape {
                rows: rows.len(),
                cols: rows.first().map(Vec::len).unwrap_or(0),
            });
        }
        if let Some(bad) = rows.iter().find(|r| r.len() != NUM_BOATS) {
            return Err(EngineError::InvalidMatrixShape {
                rows: rows.len(),
                cols: bad.len(),
            });
        }
        if boat_numbers.len() != NUM_BOATS {
            return Err(EngineError::InvalidCompetitorCount(boat_numbers.len()));
        }

        let mut boats = [0u8; NUM_BOATS];
        for (i, &boat) in boat_numbers.iter().enumerate() {
            validate_boat_number(boat)?;
            if boats[..i].contains(&boat) {
                return Err(EngineError::DuplicateBoatNumber(boat));
            }
            boats[i] = boat;
        }

        let mut normalized = [[0.0; NUM_BOATS]; NUM_BOATS];
        for (i, row) in rows.iter().enumerate() {
            if let Some(&bad) = row.iter().find(|p| !p.is_finite() || **p < 0.0) {
                return Err(EngineError::InvalidProbability(bad));
            }
            let sum: f64 = row.iter().sum();
            for (j, &p) in row.iter().enumerate() {
                normalized[i][j] = if sum > 0.0 { p / sum } else { UNIFORM };
            }
        }

        Ok(Self {
            rows: normalized,
            boat_numbers: boats,
        })
    }

    pub fn rows(&self) -> &[[f64; NUM_BOATS]; NUM_BOATS] {
        &self.rows
    }

    pub fn boat_numbers(&self) -> &[u8; NUM_BOATS] {
        &self.boat_numbers
    }

    /// Probability that the competitor in `row` finishes at 0-based `position`
    pub fn prob(&self, row: usize, position: usize) -> f64 {
        self.rows[row][position]
    }

    /// Row index of a boat number
    pub fn row_of(&self, boat_number: u8) -> Option<usize> {
        self.boat_numbers.iter().position(|&b| b == boat_number)
    }

    /// 1st-place column re-normalized across the six competitors
    pub fn win_probabilities(&self) -> [f64; NUM_BOATS] {
        let column: Vec<f64> = self.rows.iter().map(|r| r[0]).collect();
        let sum: f64 = column.iter().sum();
        let mut out = [UNIFORM; NUM_BOATS];
        if sum > 0.0 {
            for (slot, p) in out.iter_mut().zip(column) {
                *slot = p / sum;
            }
        }
        out
    }

    pub fn to_position_probs(&self) -> Vec<PositionProb> {
        self.boat_numbers
            .iter()
            .zip(self.rows.iter())
            .map(|(&boat_no, probs)| PositionProb {
                boat_no,
                probs: *probs,
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn skewed_rows() -> Vec<Vec<f64>> {
        vec![
            vec![5.0, 2.0, 1.0, 1.0, 0.5, 0.5],
            vec![2.0, 3.0, 2.0, 1.0, 1.0, 1.0],
            vec![1.0, 2.0, 3.0, 2.0, 1.0, 1.0],
            vec![0.5, 1.0, 2.0, 3.0, 2.0, 1.5],
            vec![0.3, 1.0, 1.0, 2.0, 3.0, 2.7],
            vec![0.2, 1.0, 1.0, 1.0, 2.5, 4.3],
        ]
    }

    #[test]
    fn test_rows_sum_to_one() {
        let matrix = PositionMatrix::from_rows(&skewed_rows()).unwrap();
        for row in matrix.rows() {
            let sum: f64 = row.iter().sum();
            assert!((sum - 1.0).abs() < 1e-9);
        }
        assert!((matrix.prob(0, 0) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_zero_row_becomes_uniform() {
        let mut rows = skewed_rows();
        rows[3] = vec![0.0; 6];
        let matrix = PositionMatrix::from_rows(&rows).unwrap();
        for p in matrix.rows()[3] {
            assert!((p - 1.0 / 6.0).abs() < 1e-12);
        }
    }

    #[test]
    fn test_invalid_shape() {
        let mut rows = skewed_rows();
        rows.pop();
        assert!(matches!(
            PositionMatrix::from_rows(&rows),
            Err(EngineError::InvalidMatrixShape { rows: 5, cols: 6 })
        ));

        let mut rows = skewed_rows();
        rows[2].push(1.0);
        assert!(matches!(
            PositionMatrix::from_rows(&rows),
            Err(EngineError::InvalidMatrixShape { rows: 6, cols: 7 })
        ));
    }

    #[test]
    fn test_rejects_negative_and_nan() {
        let mut rows = skewed_rows();
        rows[0][0] = -0.1;
        assert!(matches!(
            PositionMatrix::from_rows(&rows),
            Err(EngineError::InvalidProbability(_))
        ));

        let mut rows = skewed_rows();
        rows[1][4] = f64::NAN;
        assert!(PositionMatrix::from_rows(&rows).is_err());
    }

    #[test]
    fn test_boat_numbers_follow_rows() {
        let matrix = PositionMatrix::new(&skewed_rows(), &[3, 1, 2, 6, 5, 4]).unwrap();
        assert_eq!(matrix.row_of(6), Some(3));
        assert_eq!(matrix.to_position_probs()[0].boat_no, 3);
        assert!(PositionMatrix::new(&skewed_rows(), &[1, 1, 2, 3, 4, 5]).is_err());
    }

    #[test]
    fn test_win_probabilities_sum_to_one() {
        let matrix = PositionMatrix::from_rows(&skewed_rows()).unwrap();
        let win = matrix.win_probabilities();
        assert!((win.iter().sum::<f64>() - 1.0).abs() < 1e-9);
        assert!(win[0] > win[5]);
    }
}
