//! Per-segment model selection and the fitted model wrapper

use chrono::{DateTime, Utc};
use ndarray::{ArrayView1, ArrayView2, Axis};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::ensemble::{BaggedTrees, BaggingParams, BoostingParams, GradientBoostedTrees, Regressor};
use super::persistence::PersistenceError;
use super::{MIN_SEGMENT_SAMPLES, MlConfig, VALIDATION_MIN_SAMPLES};

/// Which regressor family backs a model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    BoostedTrees,
    BaggedTrees,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum SegmentRegressor {
    Boosted(GradientBoostedTrees),
    Bagged(BaggedTrees),
}

impl SegmentRegressor {
    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        match self {
            SegmentRegressor::Boosted(model) => model.predict_row(row),
            SegmentRegressor::Bagged(model) => model.predict_row(row),
        }
    }

    fn kind(&self) -> ModelKind {
        match self {
            SegmentRegressor::Boosted(_) => ModelKind::BoostedTrees,
            SegmentRegressor::Bagged(_) => ModelKind::BaggedTrees,
        }
    }
}

/// A trained model for one segment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainedModel {
    regressor: SegmentRegressor,
    /// Width of the feature vectors the model was fitted on
    n_features: usize,
    /// Mean absolute error on the rows used for fitting
    pub training_mae: f64,
    /// Mean absolute error on the held-out split, boosted models only
    pub validation_mae: Option<f64>,
    /// Number of samples the segment had
    pub training_samples: usize,
    pub created_at: DateTime<Utc>,
}

impl TrainedModel {
    /// Predict one row. Returns None when the row width does not match.
    pub fn predict(&self, features: &[f64]) -> Option<f64> {
        if features.len() != self.n_features {
            return None;
        }
        let value = self.regressor.predict_row(ArrayView1::from(features));
        value.is_finite().then_some(value)
    }

    pub fn kind(&self) -> ModelKind {
        self.regressor.kind()
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }

    /// Get model information as a string
    pub fn info(&self) -> String {
        format!(
            "TrainedModel(kind={:?}, samples={}, train_mae={:.2}, val_mae={}, created={})",
            self.kind(),
            self.training_samples,
            self.training_mae,
            self.validation_mae
                .map(|v| format!("{:.2}", v))
                .unwrap_or_else(|| "N/A".to_string()),
            self.created_at.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Chooses and fits the regressor for a segment
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    boosting: BoostingParams,
    bagging: BaggingParams,
    validation_fraction: f64,
    seed: u64,
    created_at: DateTime<Utc>,
}

impl Default for ModelBuilder {
    fn default() -> Self {
        Self {
            boosting: BoostingParams::default(),
            bagging: BaggingParams::default(),
            validation_fraction: 0.2,
            seed: 42,
            created_at: Utc::now(),
        }
    }
}

impl ModelBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_config(config: &MlConfig) -> Self {
        Self {
            boosting: BoostingParams {
                n_estimators: config.boosted_estimators,
                learning_rate: config.learning_rate,
                max_depth: config.boosted_max_depth,
            },
            bagging: BaggingParams {
                n_estimators: config.bagged_estimators,
                seed: config.random_seed,
                ..BaggingParams::default()
            },
            validation_fraction: config.validation_fraction,
            seed: config.random_seed,
            created_at: Utc::now(),
        }
    }

    /// Timestamp stamped onto every model this builder produces
    pub fn created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    /// Fit the regressor appropriate for the segment's sample count.
    ///
    /// Fewer than [`MIN_SEGMENT_SAMPLES`] rows is an error; up to
    /// [`VALIDATION_MIN_SAMPLES`] rows gets bagged trees on everything; more
    /// gets a boosted model with a held-out validation split.
    pub fn train_segment(
        &self,
        records: ArrayView2<'_, f64>,
        targets: ArrayView1<'_, f64>,
    ) -> Result<TrainedModel, TrainingError> {
        let n = targets.len();
        if n < MIN_SEGMENT_SAMPLES {
            return Err(TrainingError::InsufficientData {
                found: n,
                required: MIN_SEGMENT_SAMPLES,
            });
        }

        if n >= VALIDATION_MIN_SAMPLES {
            self.train_with_validation(records, targets)
        } else {
            self.train_bagged(records, targets)
        }
    }

    /// Bagged trees fitted on every row
    pub fn train_bagged(
        &self,
        records: ArrayView2<'_, f64>,
        targets: ArrayView1<'_, f64>,
    ) -> Result<TrainedModel, TrainingError> {
        let model = BaggedTrees::fit(&self.bagging, records, targets)?;
        let training_mae = mean_absolute_error(model.predict(records).view(), targets);

        Ok(TrainedModel {
            regressor: SegmentRegressor::Bagged(model),
            n_features: records.ncols(),
            training_mae,
            validation_mae: None,
            training_samples: targets.len(),
            created_at: self.created_at,
        })
    }

    /// Boosted trees fitted on a shuffled training split, scored on the rest
    pub fn train_with_validation(
        &self,
        records: ArrayView2<'_, f64>,
        targets: ArrayView1<'_, f64>,
    ) -> Result<TrainedModel, TrainingError> {
        if records.nrows() != targets.len() {
            return Err(TrainingError::MismatchedLengths {
                features: records.nrows(),
                targets: targets.len(),
            });
        }
        if targets.len() < 2 {
            return Err(TrainingError::InsufficientData {
                found: targets.len(),
                required: 2,
            });
        }

        let (train_rows, test_rows) = split_indices(targets.len(), self.validation_fraction, self.seed);
        let train_x = records.select(Axis(0), &train_rows);
        let train_y = targets.select(Axis(0), &train_rows);
        let test_x = records.select(Axis(0), &test_rows);
        let test_y = targets.select(Axis(0), &test_rows);

        let model = GradientBoostedTrees::fit(&self.boosting, train_x.view(), train_y.view())?;
        let training_mae = mean_absolute_error(model.predict(train_x.view()).view(), train_y.view());
        let validation_mae = mean_absolute_error(model.predict(test_x.view()).view(), test_y.view());

        Ok(TrainedModel {
            regressor: SegmentRegressor::Boosted(model),
            n_features: records.ncols(),
            training_mae,
            validation_mae: Some(validation_mae),
            training_samples: targets.len(),
            created_at: self.created_at,
        })
    }
}

/// Shuffle `0..n` with a fixed seed and cut off a test share.
///
/// The test share is `ceil(n * fraction)`, kept between 1 and `n - 1` rows.
pub fn split_indices(n: usize, test_fraction: f64, seed: u64) -> (Vec<usize>, Vec<usize>) {
    let mut rows: Vec<usize> = (0..n).collect();
    rows.shuffle(&mut StdRng::seed_from_u64(seed));

    if n < 2 {
        return (rows, Vec::new());
    }

    let n_test = ((n as f64 * test_fraction).ceil() as usize).clamp(1, n - 1);
    let test = rows.split_off(n - n_test);
    (rows, test)
}

/// Mean absolute error, 0 for empty or mismatched input
pub fn mean_absolute_error(predictions: ArrayView1<'_, f64>, targets: ArrayView1<'_, f64>) -> f64 {
    if predictions.is_empty() || predictions.len() != targets.len() {
        return 0.0;
    }

    let total: f64 = predictions
        .iter()
        .zip(targets.iter())
        .map(|(p, t)| (p - t).abs())
        .sum();

    total / predictions.len() as f64
}

/// Errors that can occur during model training
#[derive(Debug, Error)]
pub enum TrainingError {
    #[error("insufficient data for training: {found} observations, need {required}")]
    InsufficientData { found: usize, required: usize },

    #[error("feature and target lengths mismatch: {features} vs {targets}")]
    MismatchedLengths { features: usize, targets: usize },

    #[error("failed to persist model: {0}")]
    Persistence(#[from] PersistenceError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{Array1, Array2};

    fn weekday_segment(n: usize) -> (Array2<f64>, Array1<f64>) {
        let x = Array2::from_shape_fn((n, 7), |(i, j)| if i % 7 == j { 1.0 } else { 0.0 });
        let y = Array1::from_iter((0..n).map(|i| 20.0 + (i % 3) as f64));
        (x, y)
    }

    #[test]
    fn test_model_builder_default() {
        let builder = ModelBuilder::new();
        assert_eq!(builder.boosting.n_estimators, 100);
        assert_eq!(builder.bagging.n_estimators, 50);
        assert_eq!(builder.seed, 42);
    }

    #[test]
    fn test_below_minimum_is_rejected() {
        let (x, y) = weekday_segment(4);
        let result = ModelBuilder::new().train_segment(x.view(), y.view());

        assert!(matches!(
            result,
            Err(TrainingError::InsufficientData { found: 4, required: 5 })
        ));
    }

    #[test]
    fn test_small_segment_uses_bagging() {
        for n in 5..10 {
            let (x, y) = weekday_segment(n);
            let model = ModelBuilder::new().train_segment(x.view(), y.view()).unwrap();

            assert_eq!(model.kind(), ModelKind::BaggedTrees);
            assert!(model.validation_mae.is_none());
            assert_eq!(model.training_samples, n);
        }
    }

    #[test]
    fn test_large_segment_uses_boosting_with_validation() {
        let (x, y) = weekday_segment(10);
        let model = ModelBuilder::new().train_segment(x.view(), y.view()).unwrap();

        assert_eq!(model.kind(), ModelKind::BoostedTrees);
        assert!(model.validation_mae.is_some());
        assert_eq!(model.n_features(), 7);
    }

    #[test]
    fn test_predict_rejects_wrong_width() {
        let (x, y) = weekday_segment(12);
        let model = ModelBuilder::new().train_segment(x.view(), y.view()).unwrap();

        assert!(model.predict(&[1.0, 0.0]).is_none());
        assert!(model.predict(&[1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]).is_some());
    }

    #[test]
    fn test_training_is_deterministic() {
        let (x, y) = weekday_segment(21);
        let at = Utc::now();
        let first = ModelBuilder::new().created_at(at).train_segment(x.view(), y.view()).unwrap();
        let second = ModelBuilder::new().created_at(at).train_segment(x.view(), y.view()).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn test_split_indices_sizes() {
        let (train, test) = split_indices(10, 0.2, 42);
        assert_eq!(test.len(), 2);
        assert_eq!(train.len(), 8);

        let (train, test) = split_indices(11, 0.2, 42);
        assert_eq!(test.len(), 3);
        assert_eq!(train.len(), 8);

        let mut all: Vec<usize> = train.into_iter().chain(test).collect();
        all.sort();
        assert_eq!(all, (0..11).collect::<Vec<_>>());
    }

    #[test]
    fn test_mean_absolute_error() {
        let p = ndarray::array![1.0, 2.0, 3.0];
        let t = ndarray::array![2.0, 2.0, 5.0];
        assert!((mean_absolute_error(p.view(), t.view()) - 1.0).abs() < 1e-12);

        let empty = Array1::<f64>::zeros(0);
        assert_eq!(mean_absolute_error(empty.view(), empty.view()), 0.0);
    }

    #[test]
    fn test_model_info() {
        let (x, y) = weekday_segment(6);
        let model = ModelBuilder::new().train_segment(x.view(), y.view()).unwrap();
        let info = model.info();

        assert!(info.contains("BaggedTrees"));
        assert!(info.contains("samples=6"));
        assert!(info.contains("val_mae=N/A"));
    }
}
