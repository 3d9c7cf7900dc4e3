//! CART regression tree
//!
//! Splits minimize the summed squared error of the two children. Nodes live in
//! a flat arena so a fitted tree serializes as a plain vector.

use ndarray::{ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};

/// Depth cap used for "fully grown" trees.
pub const UNBOUNDED_DEPTH: usize = 32;

/// Growth limits for a single tree
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TreeParams {
    pub max_depth: usize,
    pub min_samples_split: usize,
    pub min_samples_leaf: usize,
}

impl Default for TreeParams {
    fn default() -> Self {
        Self {
            max_depth: 3,
            min_samples_split: 2,
            min_samples_leaf: 1,
        }
    }
}

impl TreeParams {
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            max_depth,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
enum Node {
    Leaf {
        value: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
}

/// A fitted regression tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegressionTree {
    nodes: Vec<Node>,
}

struct BestSplit {
    feature: usize,
    threshold: f64,
    score: f64,
}

impl RegressionTree {
    /// Fit on the rows named by `indices`.
    ///
    /// Indices may repeat (bootstrap samples). An empty index set yields a
    /// single leaf predicting 0.
    pub fn fit_indices(
        params: &TreeParams,
        records: ArrayView2<'_, f64>,
        targets: ArrayView1<'_, f64>,
        indices: &[usize],
    ) -> Self {
        let mut tree = Self { nodes: Vec::new() };
        if indices.is_empty() {
            tree.nodes.push(Node::Leaf { value: 0.0 });
        } else {
            tree.grow(params, records, targets, indices.to_vec(), 0);
        }
        tree
    }

    fn grow(
        &mut self,
        params: &TreeParams,
        records: ArrayView2<'_, f64>,
        targets: ArrayView1<'_, f64>,
        indices: Vec<usize>,
        depth: usize,
    ) -> usize {
        let n = indices.len();
        let mean = indices.iter().map(|&i| targets[i]).sum::<f64>() / n as f64;
        let slot = self.nodes.len();
        self.nodes.push(Node::Leaf { value: mean });

        let min_leaf = params.min_samples_leaf.max(1);
        if depth >= params.max_depth || n < params.min_samples_split || n < 2 * min_leaf {
            return slot;
        }

        let Some(split) = best_split(records, targets, &indices, min_leaf) else {
            return slot;
        };

        let (left_rows, right_rows): (Vec<usize>, Vec<usize>) = indices
            .into_iter()
            .partition(|&i| records[[i, split.feature]] <= split.threshold);

        let left = self.grow(params, records, targets, left_rows, depth + 1);
        let right = self.grow(params, records, targets, right_rows, depth + 1);
        self.nodes[slot] = Node::Split {
            feature: split.feature,
            threshold: split.threshold,
            left,
            right,
        };
        slot
    }

    pub fn predict_row(&self, row: ArrayView1<'_, f64>) -> f64 {
        let mut index = 0;
        loop {
            match self.nodes.get(index) {
                Some(Node::Leaf { value }) => return *value,
                Some(Node::Split {
                    feature,
                    threshold,
                    left,
                    right,
                }) => {
                    let value = row.get(*feature).copied().unwrap_or(0.0);
                    index = if value <= *threshold { *left } else { *right };
                }
                None => return 0.0,
            }
        }
    }

    /// Number of leaves
    pub fn leaf_count(&self) -> usize {
        self.nodes
            .iter()
            .filter(|node| matches!(node, Node::Leaf { .. }))
            .count()
    }

    /// Length of the longest root-to-leaf path, in edges
    pub fn depth(&self) -> usize {
        fn walk(nodes: &[Node], index: usize) -> usize {
            match nodes.get(index) {
                Some(Node::Split { left, right, .. }) => {
                    1 + walk(nodes, *left).max(walk(nodes, *right))
                }
                _ => 0,
            }
        }
        walk(&self.nodes, 0)
    }
}

/// Best squared-error split over every feature, or None if no split improves
/// on the parent.
fn best_split(
    records: ArrayView2<'_, f64>,
    targets: ArrayView1<'_, f64>,
    indices: &[usize],
    min_leaf: usize,
) -> Option<BestSplit> {
    let n = indices.len();
    let total: f64 = indices.iter().map(|&i| targets[i]).sum();
    let baseline = total * total / n as f64;
    let mut best: Option<BestSplit> = None;

    for feature in 0..records.ncols() {
        let mut order = indices.to_vec();
        order.sort_by(|&a, &b| records[[a, feature]].total_cmp(&records[[b, feature]]));

        let mut left_sum = 0.0;
        for k in 0..n - 1 {
            left_sum += targets[order[k]];
            let left_n = k + 1;
            let right_n = n - left_n;
            let here = records[[order[k], feature]];
            let next = records[[order[k + 1], feature]];

            if here == next || left_n < min_leaf || right_n < min_leaf {
                continue;
            }

            let right_sum = total - left_sum;
            let score = left_sum * left_sum / left_n as f64 + right_sum * right_sum / right_n as f64;
            if best.as_ref().is_none_or(|b| score > b.score) {
                best = Some(BestSplit {
                    feature,
                    threshold: (here + next) / 2.0,
                    score,
                });
            }
        }
    }

    let tolerance = 1e-9 * baseline.abs().max(1.0);
    best.filter(|split| split.score > baseline + tolerance)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{Array1, Array2, array};

    fn all(n: usize) -> Vec<usize> {
        (0..n).collect()
    }

    #[test]
    fn test_step_function_is_recovered() {
        let x = array![[0.0], [1.0], [2.0], [3.0], [4.0], [5.0]];
        let y = array![1.0, 1.0, 1.0, 9.0, 9.0, 9.0];
        let tree = RegressionTree::fit_indices(&TreeParams::default(), x.view(), y.view(), &all(6));

        assert_relative_eq!(tree.predict_row(array![0.5].view()), 1.0);
        assert_relative_eq!(tree.predict_row(array![4.5].view()), 9.0);
        assert_eq!(tree.leaf_count(), 2);
    }

    #[test]
    fn test_constant_targets_give_single_leaf() {
        let x = array![[0.0], [1.0], [2.0]];
        let y = array![4.0, 4.0, 4.0];
        let tree = RegressionTree::fit_indices(&TreeParams::default(), x.view(), y.view(), &all(3));

        assert_eq!(tree.leaf_count(), 1);
        assert_eq!(tree.depth(), 0);
        assert_relative_eq!(tree.predict_row(array![7.0].view()), 4.0);
    }

    #[test]
    fn test_identical_features_cannot_split() {
        let x = array![[1.0], [1.0], [1.0], [1.0]];
        let y = array![1.0, 2.0, 3.0, 4.0];
        let tree = RegressionTree::fit_indices(&TreeParams::default(), x.view(), y.view(), &all(4));

        assert_eq!(tree.leaf_count(), 1);
        assert_relative_eq!(tree.predict_row(array![1.0].view()), 2.5);
    }

    #[test]
    fn test_max_depth_respected() {
        let n = 64;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64);
        let y = Array1::from_iter((0..n).map(|i| (i * i) as f64));
        let tree = RegressionTree::fit_indices(&TreeParams::with_max_depth(2), x.view(), y.view(), &all(n));

        assert!(tree.depth() <= 2);
        assert!(tree.leaf_count() <= 4);
    }

    #[test]
    fn test_empty_indices_predict_zero() {
        let x = array![[1.0]];
        let y = array![5.0];
        let tree = RegressionTree::fit_indices(&TreeParams::default(), x.view(), y.view(), &[]);

        assert_relative_eq!(tree.predict_row(array![1.0].view()), 0.0);
    }

    #[test]
    fn test_repeated_indices_weight_rows() {
        let x = array![[0.0], [1.0]];
        let y = array![0.0, 10.0];
        let params = TreeParams::with_max_depth(0);
        let tree = RegressionTree::fit_indices(&params, x.view(), y.view(), &[1, 1, 1, 0]);

        assert_relative_eq!(tree.predict_row(array![0.0].view()), 7.5);
    }

    #[test]
    fn test_splits_on_informative_column() {
        // Column 0 is noise, column 1 is a one-hot day indicator
        let x = array![
            [3.0, 0.0],
            [1.0, 1.0],
            [2.0, 0.0],
            [3.0, 1.0],
            [1.0, 0.0],
            [2.0, 1.0]
        ];
        let y = array![10.0, 30.0, 10.0, 30.0, 10.0, 30.0];
        let tree = RegressionTree::fit_indices(&TreeParams::default(), x.view(), y.view(), &all(6));

        assert_relative_eq!(tree.predict_row(array![9.0, 1.0].view()), 30.0);
        assert_relative_eq!(tree.predict_row(array![9.0, 0.0].view()), 10.0);
    }
}
