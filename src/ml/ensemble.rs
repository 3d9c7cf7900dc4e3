//! Tree ensembles: gradient boosting and bootstrap aggregation

use ndarray::{Array1, ArrayView1, ArrayView2};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::model::TrainingError;
use super::tree::{RegressionTree, TreeParams, UNBOUNDED_DEPTH};

/// Something that can be fitted to a design matrix and used for prediction
pub trait Regressor: Sized {
    type Params;

    fn fit(
        params: &Self::Params,
        records: ArrayView2<'_, f64>,
        targets: ArrayView1<'_, f64>,
    ) -> Result<Self, TrainingError>;

    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64;

    fn predict(&self, records: ArrayView2<'_, f64>) -> Array1<f64> {
        Array1::from_iter(records.rows().into_iter().map(|row| self.predict_row(row)))
    }
}

fn check_shape(records: ArrayView2<'_, f64>, targets: ArrayView1<'_, f64>) -> Result<(), TrainingError> {
    if records.nrows() != targets.len() {
        return Err(TrainingError::MismatchedLengths {
            features: records.nrows(),
            targets: targets.len(),
        });
    }
    if targets.is_empty() {
        return Err(TrainingError::InsufficientData {
            found: 0,
            required: 1,
        });
    }
    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoostingParams {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
}

impl Default for BoostingParams {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.1,
            max_depth: 3,
        }
    }
}

/// Least-squares gradient boosting starting from the target mean
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GradientBoostedTrees {
    initial: f64,
    learning_rate: f64,
    trees: Vec<RegressionTree>,
}

impl GradientBoostedTrees {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for GradientBoostedTrees {
    type Params = BoostingParams;

    fn fit(
        params: &BoostingParams,
        records: ArrayView2<'_, f64>,
        targets: ArrayView1<'_, f64>,
    ) -> Result<Self, TrainingError> {
        check_shape(records, targets)?;

        let n = targets.len();
        let initial = targets.sum() / n as f64;
        let tree_params = TreeParams::with_max_depth(params.max_depth);
        let rows: Vec<usize> = (0..n).collect();
        let mut current = Array1::from_elem(n, initial);
        let mut trees = Vec::with_capacity(params.n_estimators);

        for _ in 0..params.n_estimators {
            let residuals = &targets - &current;
            let tree = RegressionTree::fit_indices(&tree_params, records, residuals.view(), &rows);
            for (i, row) in records.rows().into_iter().enumerate() {
                current[i] += params.learning_rate * tree.predict_row(row);
            }
            trees.push(tree);
        }

        Ok(Self {
            initial,
            learning_rate: params.learning_rate,
            trees,
        })
    }

    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        self.trees.iter().fold(self.initial, |acc, tree| {
            acc + self.learning_rate * tree.predict_row(row)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BaggingParams {
    pub n_estimators: usize,
    pub seed: u64,
    pub max_depth: usize,
}

impl Default for BaggingParams {
    fn default() -> Self {
        Self {
            n_estimators: 50,
            seed: 42,
            max_depth: UNBOUNDED_DEPTH,
        }
    }
}

/// Fully grown trees on bootstrap resamples, predictions averaged
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaggedTrees {
    trees: Vec<RegressionTree>,
}

impl BaggedTrees {
    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }
}

impl Regressor for BaggedTrees {
    type Params = BaggingParams;

    fn fit(
        params: &BaggingParams,
        records: ArrayView2<'_, f64>,
        targets: ArrayView1<'_, f64>,
    ) -> Result<Self, TrainingError> {
        check_shape(records, targets)?;

        let n = targets.len();
        let tree_params = TreeParams::with_max_depth(params.max_depth);
        let mut rng = StdRng::seed_from_u64(params.seed);
        let trees = (0..params.n_estimators.max(1))
            .map(|_| {
                let sample: Vec<usize> = (0..n).map(|_| rng.gen_range(0..n)).collect();
                RegressionTree::fit_indices(&tree_params, records, targets, &sample)
            })
            .collect();

        Ok(Self { trees })
    }

    fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        if self.trees.is_empty() {
            return 0.0;
        }
        self.trees.iter().map(|tree| tree.predict_row(row)).sum::<f64>() / self.trees.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array2, array};

    fn weekday_data(weeks: usize) -> (Array2<f64>, Array1<f64>) {
        let n = weeks * 7;
        let x = Array2::from_shape_fn((n, 7), |(i, j)| if i % 7 == j { 1.0 } else { 0.0 });
        let y = Array1::from_iter((0..n).map(|i| 10.0 + 5.0 * (i % 7) as f64));
        (x, y)
    }

    #[test]
    fn test_boosting_rejects_empty() {
        let x = Array2::<f64>::zeros((0, 3));
        let y = Array1::<f64>::zeros(0);
        let result = GradientBoostedTrees::fit(&BoostingParams::default(), x.view(), y.view());

        assert!(matches!(result, Err(TrainingError::InsufficientData { found: 0, .. })));
    }

    #[test]
    fn test_boosting_rejects_mismatched_lengths() {
        let x = Array2::<f64>::zeros((4, 2));
        let y = Array1::<f64>::zeros(3);
        let result = GradientBoostedTrees::fit(&BoostingParams::default(), x.view(), y.view());

        assert!(matches!(
            result,
            Err(TrainingError::MismatchedLengths {
                features: 4,
                targets: 3
            })
        ));
    }

    #[test]
    fn test_boosting_learns_weekday_pattern() {
        let (x, y) = weekday_data(3);
        let model = GradientBoostedTrees::fit(&BoostingParams::default(), x.view(), y.view()).unwrap();
        let predictions = model.predict(x.view());

        assert_eq!(model.n_trees(), 100);
        for (p, t) in predictions.iter().zip(y.iter()) {
            assert!((p - t).abs() < 1.0, "prediction {p} far from {t}");
        }
    }

    #[test]
    fn test_boosting_constant_target() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![5.0, 5.0, 5.0];
        let model = GradientBoostedTrees::fit(&BoostingParams::default(), x.view(), y.view()).unwrap();

        assert_relative_eq!(model.predict_row(array![10.0].view()), 5.0, epsilon = 1e-9);
    }

    #[test]
    fn test_bagging_is_deterministic_for_seed() {
        let (x, y) = weekday_data(1);
        let params = BaggingParams::default();
        let first = BaggedTrees::fit(&params, x.view(), y.view()).unwrap();
        let second = BaggedTrees::fit(&params, x.view(), y.view()).unwrap();

        assert_eq!(first, second);
        assert_eq!(first.n_trees(), 50);
    }

    #[test]
    fn test_bagging_stays_within_target_range() {
        let (x, y) = weekday_data(1);
        let model = BaggedTrees::fit(&BaggingParams::default(), x.view(), y.view()).unwrap();

        for p in model.predict(x.view()) {
            assert!((10.0..=40.0).contains(&p));
        }
    }

    mod proptest_tests {
        use proptest::prelude::*;

        use super::*;

        proptest! {
            #[test]
            fn boosted_predictions_are_finite(targets in prop::collection::vec(0.0f64..500.0, 2..30)) {
                let n = targets.len();
                let x = Array2::from_shape_fn((n, 7), |(i, j)| if i % 7 == j { 1.0 } else { 0.0 });
                let y = Array1::from_vec(targets);
                let params = BoostingParams { n_estimators: 10, ..BoostingParams::default() };
                let model = GradientBoostedTrees::fit(&params, x.view(), y.view()).unwrap();

                for p in model.predict(x.view()) {
                    prop_assert!(p.is_finite());
                }
            }
        }
    }
}
