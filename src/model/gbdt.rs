//! Multiclass gradient-boosted decision trees
//!
//! Softmax objective, one tree per class per boosting round. Splits are
//! searched over quantile histogram bins. Trees use the flat
//! split/threshold/child/leaf array layout: a negative child `c` points at
//! leaf `-c - 1`, and `value <= threshold` goes left.

use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{EngineError, Result};

const MIN_HESSIAN: f64 = 1e-6;

/// Booster hyper-parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbdtParams {
    pub max_depth: usize,
    pub learning_rate: f64,
    pub n_estimators: usize,
    /// Fraction of rows sampled per round
    pub subsample: f64,
    /// Fraction of features sampled per round
    pub colsample_bytree: f64,
    /// Minimum hessian sum in each child
    pub min_child_weight: f64,
    /// Minimum gain required to split
    pub gamma: f64,
    pub reg_alpha: f64,
    pub reg_lambda: f64,
    pub max_bins: usize,
    pub seed: u64,
}

impl Default for GbdtParams {
    fn default() -> Self {
        Self {
            max_depth: 8,
            learning_rate: 0.05,
            n_estimators: 300,
            subsample: 0.8,
            colsample_bytree: 0.8,
            min_child_weight: 3.0,
            gamma: 0.1,
            reg_alpha: 0.1,
            reg_lambda: 1.0,
            max_bins: 64,
            seed: 42,
        }
    }
}

impl GbdtParams {
    pub fn validate(&self) -> Result<()> {
        let fraction_ok = |v: f64| v > 0.0 && v <= 1.0;
        if !fraction_ok(self.learning_rate) {
            return Err(EngineError::Config(format!(
                "learning_rate must be in (0, 1], got {}",
                self.learning_rate
            )));
        }
        if !fraction_ok(self.subsample) || !fraction_ok(self.colsample_bytree) {
            return Err(EngineError::Config(
                "subsample and colsample_bytree must be in (0, 1]".to_string(),
            ));
        }
        if self.max_bins < 2 || self.max_bins > u16::MAX as usize {
            return Err(EngineError::Config(format!(
                "max_bins must be between 2 and {}, got {}",
                u16::MAX,
                self.max_bins
            )));
        }
        let non_negative = [
            self.min_child_weight,
            self.gamma,
            self.reg_alpha,
            self.reg_lambda,
        ];
        if non_negative.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(EngineError::Config(
                "min_child_weight, gamma, reg_alpha and reg_lambda must be non-negative".to_string(),
            ));
        }
        Ok(())
    }
}

/// One regression tree in flat array form
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tree {
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
    shrinkage: f64,
}

impl Tree {
    pub fn num_leaves(&self) -> usize {
        self.leaf_values.len()
    }

    pub fn predict(&self, features: &[f64]) -> f64 {
        if self.split_features.is_empty() {
            return self.leaf_values.first().copied().unwrap_or_default() * self.shrinkage;
        }

        let mut node_idx = 0usize;
        loop {
            let feature_idx = self.split_features[node_idx];
            let threshold = self.thresholds[node_idx];
            let feature_value = features.get(feature_idx).copied().unwrap_or(0.0);
            let child = if feature_value <= threshold {
                self.left_child[node_idx]
            } else {
                self.right_child[node_idx]
            };

            if child < 0 {
                let leaf_idx = (-child - 1) as usize;
                return self.leaf_values.get(leaf_idx).copied().unwrap_or_default()
                    * self.shrinkage;
            }

            node_idx = child as usize;
        }
    }
}

/// Quantile bin edges per feature
#[derive(Debug, Clone)]
struct BinMapper {
    cuts: Vec<Vec<f64>>,
}

impl BinMapper {
    fn fit(rows: &[Vec<f64>], num_features: usize, max_bins: usize) -> Self {
        let cuts = (0..num_features)
            .map(|f| {
                let mut values: Vec<f64> = rows
                    .iter()
                    .map(|r| r[f])
                    .filter(|v| v.is_finite())
                    .collect();
                values.sort_by(|a, b| a.total_cmp(b));
                values.dedup();
                if values.len() <= 1 {
                    return Vec::new();
                }

                let mut cuts: Vec<f64> = if values.len() <= max_bins {
                    values.clone()
                } else {
                    (1..max_bins)
                        .map(|k| values[k * values.len() / max_bins])
                        .collect()
                };
                cuts.dedup();
                // The largest value can never be a useful "<=" threshold
                if let (Some(last_cut), Some(max)) = (cuts.last(), values.last()) {
                    if last_cut >= max {
                        cuts.pop();
                    }
                }
                cuts
            })
            .collect();
        Self { cuts }
    }

    fn bin(&self, feature: usize, value: f64) -> u16 {
        let value = if value.is_finite() { value } else { 0.0 };
        self.cuts[feature].partition_point(|c| *c < value) as u16
    }

    fn num_bins(&self, feature: usize) -> usize {
        self.cuts[feature].len() + 1
    }

    /// Column-major binned matrix
    fn transform(&self, rows: &[Vec<f64>]) -> Vec<Vec<u16>> {
        (0..self.cuts.len())
            .map(|f| rows.iter().map(|r| self.bin(f, r[f])).collect())
            .collect()
    }
}

fn soft_threshold(g: f64, alpha: f64) -> f64 {
    if g > alpha {
        g - alpha
    } else if g < -alpha {
        g + alpha
    } else {
        0.0
    }
}

fn leaf_weight(g: f64, h: f64, params: &GbdtParams) -> f64 {
    -soft_threshold(g, params.reg_alpha) / (h + params.reg_lambda)
}

fn structure_score(g: f64, h: f64, params: &GbdtParams) -> f64 {
    let t = soft_threshold(g, params.reg_alpha);
    t * t / (h + params.reg_lambda)
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    bin: usize,
    gain: f64,
}

/// Grows one tree on the gradients of a single class
struct TreeGrower<'a> {
    binned: &'a [Vec<u16>],
    mapper: &'a BinMapper,
    grad: &'a [f64],
    hess: &'a [f64],
    features: &'a [usize],
    params: &'a GbdtParams,
    split_features: Vec<usize>,
    thresholds: Vec<f64>,
    left_child: Vec<i32>,
    right_child: Vec<i32>,
    leaf_values: Vec<f64>,
    gains: Vec<(usize, f64)>,
}

impl<'a> TreeGrower<'a> {
    fn grow(&mut self, rows: &[usize], depth: usize) -> i32 {
        let g: f64 = rows.iter().map(|&r| self.grad[r]).sum();
        let h: f64 = rows.iter().map(|&r| self.hess[r]).sum();

        if depth < self.params.max_depth && rows.len() >= 2 {
            if let Some(split) = self.best_split(rows, g, h) {
                let node = self.split_features.len();
                self.split_features.push(split.feature);
                self.thresholds.push(self.mapper.cuts[split.feature][split.bin]);
                self.left_child.push(0);
                self.right_child.push(0);
                self.gains.push((split.feature, split.gain));

                let column = &self.binned[split.feature];
                let (left, right): (Vec<usize>, Vec<usize>) = rows
                    .iter()
                    .partition(|&&r| column[r] as usize <= split.bin);

                let left_ref = self.grow(&left, depth + 1);
                let right_ref = self.grow(&right, depth + 1);
                self.left_child[node] = left_ref;
                self.right_child[node] = right_ref;
                return node as i32;
            }
        }

        let leaf = self.leaf_values.len();
        self.leaf_values.push(leaf_weight(g, h, self.params));
        -(leaf as i32) - 1
    }

    fn best_split(&self, rows: &[usize], g: f64, h: f64) -> Option<SplitCandidate> {
        let params = self.params;
        let parent = structure_score(g, h, params);
        let mut best: Option<SplitCandidate> = None;

        for &feature in self.features {
            let n_bins = self.mapper.num_bins(feature);
            if n_bins < 2 {
                continue;
            }
            let column = &self.binned[feature];
            let mut hist_g = vec![0.0; n_bins];
            let mut hist_h = vec![0.0; n_bins];
            for &r in rows {
                let b = column[r] as usize;
                hist_g[b] += self.grad[r];
                hist_h[b] += self.hess[r];
            }

            let mut gl = 0.0;
            let mut hl = 0.0;
            for bin in 0..n_bins - 1 {
                gl += hist_g[bin];
                hl += hist_h[bin];
                let gr = g - gl;
                let hr = h - hl;
                if hl < params.min_child_weight || hr < params.min_child_weight {
                    continue;
                }
                let gain = 0.5
                    * (structure_score(gl, hl, params) + structure_score(gr, hr, params) - parent)
                    - params.gamma;
                if gain > 0.0 && best.map(|b| gain > b.gain).unwrap_or(true) {
                    best = Some(SplitCandidate { feature, bin, gain });
                }
            }
        }

        best
    }

    fn finish(self) -> (Tree, Vec<(usize, f64)>) {
        (
            Tree {
                split_features: self.split_features,
                thresholds: self.thresholds,
                left_child: self.left_child,
                right_child: self.right_child,
                leaf_values: self.leaf_values,
                shrinkage: self.params.learning_rate,
            },
            self.gains,
        )
    }
}

/// Row-wise softmax of raw class scores
pub fn softmax(raw: &[f64]) -> Vec<f64> {
    let max = raw.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let exp: Vec<f64> = raw.iter().map(|s| (s - max).exp()).collect();
    let sum: f64 = exp.iter().sum();
    exp.into_iter().map(|e| e / sum).collect()
}

/// Trained multiclass booster
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Booster {
    trees: Vec<Tree>,
    num_classes: usize,
    num_features: usize,
    /// Total split gain per feature
    importance: Vec<f64>,
}

impl Booster {
    /// Fit on feature rows, class labels in `0..num_classes` and sample weights
    pub fn train(
        rows: &[Vec<f64>],
        labels: &[usize],
        weights: &[f64],
        num_classes: usize,
        params: &GbdtParams,
    ) -> Result<Self> {
        params.validate()?;
        if rows.is_empty() {
            return Err(EngineError::Validation("No training rows".to_string()));
        }
        if labels.len() != rows.len() || weights.len() != rows.len() {
            return Err(EngineError::Validation(format!(
                "{} rows, {} labels, {} weights",
                rows.len(),
                labels.len(),
                weights.len()
            )));
        }
        if num_classes < 2 {
            return Err(EngineError::Validation(
                "At least two classes required".to_string(),
            ));
        }
        let num_features = rows[0].len();
        if let Some(bad) = rows.iter().find(|r| r.len() != num_features) {
            return Err(EngineError::FeatureCountMismatch {
                expected: num_features,
                actual: bad.len(),
            });
        }
        if let Some(&bad) = labels.iter().find(|&&l| l >= num_classes) {
            return Err(EngineError::Validation(format!(
                "Label {} outside 0..{}",
                bad, num_classes
            )));
        }
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(EngineError::Validation(
                "Sample weights must be finite and non-negative".to_string(),
            ));
        }

        let mapper = BinMapper::fit(rows, num_features, params.max_bins);
        let binned = mapper.transform(rows);
        let n = rows.len();
        let mut rng = StdRng::seed_from_u64(params.seed);
        let mut raw = vec![vec![0.0; num_classes]; n];
        let mut trees = Vec::with_capacity(params.n_estimators * num_classes);
        let mut importance = vec![0.0; num_features];

        let n_cols = ((num_features as f64 * params.colsample_bytree).ceil() as usize)
            .clamp(1, num_features.max(1));

        for round in 0..params.n_estimators {
            let mut sampled: Vec<usize> = (0..n)
                .filter(|_| params.subsample >= 1.0 || rng.gen::<f64>() < params.subsample)
                .collect();
            if sampled.is_empty() {
                sampled = (0..n).collect();
            }
            let mut features: Vec<usize> = (0..num_features).collect();
            if n_cols < num_features {
                features.shuffle(&mut rng);
                features.truncate(n_cols);
                features.sort_unstable();
            }

            let probs: Vec<Vec<f64>> = raw.iter().map(|r| softmax(r)).collect();

            let grown: Vec<(Tree, Vec<(usize, f64)>)> = (0..num_classes)
                .into_par_iter()
                .map(|class| {
                    let mut grad = vec![0.0; n];
                    let mut hess = vec![0.0; n];
                    for &r in &sampled {
                        let p = probs[r][class];
                        let y = if labels[r] == class { 1.0 } else { 0.0 };
                        grad[r] = (p - y) * weights[r];
                        hess[r] = (2.0 * p * (1.0 - p)).max(MIN_HESSIAN) * weights[r];
                    }
                    let mut grower = TreeGrower {
                        binned: &binned,
                        mapper: &mapper,
                        grad: &grad,
                        hess: &hess,
                        features: &features,
                        params,
                        split_features: Vec::new(),
                        thresholds: Vec::new(),
                        left_child: Vec::new(),
                        right_child: Vec::new(),
                        leaf_values: Vec::new(),
                        gains: Vec::new(),
                    };
                    grower.grow(&sampled, 0);
                    grower.finish()
                })
                .collect();

            for (class, (tree, gains)) in grown.into_iter().enumerate() {
                for (row, scores) in rows.iter().zip(raw.iter_mut()) {
                    scores[class] += tree.predict(row);
                }
                for (feature, gain) in gains {
                    importance[feature] += gain;
                }
                trees.push(tree);
            }

            if round % 50 == 0 {
                debug!("Boosting round {}/{}", round + 1, params.n_estimators);
            }
        }

        Ok(Self {
            trees,
            num_classes,
            num_features,
            importance,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    pub fn num_features(&self) -> usize {
        self.num_features
    }

    pub fn num_trees(&self) -> usize {
        self.trees.len()
    }

    /// Accumulated split gain per feature index
    pub fn feature_importance(&self) -> &[f64] {
        &self.importance
    }

    pub fn predict_raw(&self, features: &[f64]) -> Vec<f64> {
        let mut raw_scores = vec![0.0; self.num_classes];
        for (tree_idx, tree) in self.trees.iter().enumerate() {
            raw_scores[tree_idx % self.num_classes] += tree.predict(features);
        }
        raw_scores
    }

    /// Class probabilities for one feature row
    pub fn predict_proba(&self, features: &[f64]) -> Result<Vec<f64>> {
        if features.len() != self.num_features {
            return Err(EngineError::FeatureCountMismatch {
                expected: self.num_features,
                actual: features.len(),
            });
        }
        Ok(softmax(&self.predict_raw(features)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Three classes separated on feature 0, feature 1 is noise
    fn separable_data() -> (Vec<Vec<f64>>, Vec<usize>) {
        let mut rows = Vec::new();
        let mut labels = Vec::new();
        for i in 0..90 {
            let class = i % 3;
            rows.push(vec![class as f64 * 10.0 + (i % 7) as f64 * 0.1, (i % 5) as f64]);
            labels.push(class);
        }
        (rows, labels)
    }

    fn fast_params() -> GbdtParams {
        GbdtParams {
            n_estimators: 30,
            learning_rate: 0.3,
            max_depth: 3,
            min_child_weight: 1.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            ..Default::default()
        }
    }

    #[test]
    fn test_softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        assert!((p.iter().sum::<f64>() - 1.0).abs() < 1e-12);
        assert!(p[2] > p[1] && p[1] > p[0]);
        let uniform = softmax(&[0.0; 6]);
        assert!(uniform.iter().all(|v| (v - 1.0 / 6.0).abs() < 1e-12));
    }

    #[test]
    fn test_tree_predict_flat_layout() {
        // x0 <= 1.0 → leaf 0, else node 1: x1 <= 5.0 → leaf 1, else leaf 2
        let tree = Tree {
            split_features: vec![0, 1],
            thresholds: vec![1.0, 5.0],
            left_child: vec![-1, -2],
            right_child: vec![1, -3],
            leaf_values: vec![10.0, 20.0, 30.0],
            shrinkage: 0.5,
        };
        assert_eq!(tree.predict(&[1.0, 0.0]), 5.0);
        assert_eq!(tree.predict(&[2.0, 5.0]), 10.0);
        assert_eq!(tree.predict(&[2.0, 6.0]), 15.0);
        assert_eq!(tree.num_leaves(), 3);
    }

    #[test]
    fn test_bin_mapper_thresholds() {
        let rows: Vec<Vec<f64>> = [1.0, 2.0, 2.0, 3.0].iter().map(|v| vec![*v]).collect();
        let mapper = BinMapper::fit(&rows, 1, 64);
        assert_eq!(mapper.cuts[0], vec![1.0, 2.0]);
        assert_eq!(mapper.bin(0, 1.0), 0);
        assert_eq!(mapper.bin(0, 1.5), 1);
        assert_eq!(mapper.bin(0, 3.0), 2);

        let constant = vec![vec![4.0]; 5];
        assert!(BinMapper::fit(&constant, 1, 64).cuts[0].is_empty());
    }

    #[test]
    fn test_soft_threshold() {
        assert_eq!(soft_threshold(0.05, 0.1), 0.0);
        assert!((soft_threshold(1.0, 0.1) - 0.9).abs() < 1e-12);
        assert!((soft_threshold(-1.0, 0.1) + 0.9).abs() < 1e-12);
    }

    #[test]
    fn test_learns_separable_classes() {
        let (rows, labels) = separable_data();
        let weights = vec![1.0; rows.len()];
        let booster = Booster::train(&rows, &labels, &weights, 3, &fast_params()).unwrap();
        assert_eq!(booster.num_trees(), 30 * 3);

        let correct = rows
            .iter()
            .zip(&labels)
            .filter(|(row, label)| {
                let p = booster.predict_proba(row).unwrap();
                let argmax = (0..3).max_by(|&a, &b| p[a].total_cmp(&p[b])).unwrap();
                argmax == **label
            })
            .count();
        assert_eq!(correct, rows.len());

        let importance = booster.feature_importance();
        assert!(importance[0] > importance[1]);
    }

    #[test]
    fn test_deterministic_with_seed() {
        let (rows, labels) = separable_data();
        let weights = vec![1.0; rows.len()];
        let params = GbdtParams {
            subsample: 0.7,
            colsample_bytree: 0.5,
            ..fast_params()
        };
        let a = Booster::train(&rows, &labels, &weights, 3, &params).unwrap();
        let b = Booster::train(&rows, &labels, &weights, 3, &params).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_rejects_bad_inputs() {
        let (rows, labels) = separable_data();
        let weights = vec![1.0; rows.len()];
        assert!(Booster::train(&rows, &labels[1..], &weights, 3, &fast_params()).is_err());
        assert!(Booster::train(&rows, &labels, &weights, 2, &fast_params()).is_err());
        assert!(Booster::train(&[], &[], &[], 3, &fast_params()).is_err());

        let bad = GbdtParams {
            learning_rate: 0.0,
            ..fast_params()
        };
        assert!(Booster::train(&rows, &labels, &weights, 3, &bad).is_err());
    }

    #[test]
    fn test_predict_proba_checks_width() {
        let (rows, labels) = separable_data();
        let weights = vec![1.0; rows.len()];
        let booster = Booster::train(&rows, &labels, &weights, 3, &fast_params()).unwrap();
        assert!(matches!(
            booster.predict_proba(&[1.0]),
            Err(EngineError::FeatureCountMismatch { expected: 2, actual: 1 })
        ));
    }
}
