use crate::dataset::LABEL_SHIFT;
use itertools::Itertools;
use ndarray::{Array1, Array2};

// The network returns a [10 x n] array of log-probabilities. For every column find the row with the
// highest value and turn that row index into a 1-indexed class, the same labeling the training
// labels use. On ties the first row wins.
pub fn predicted_labels(log_probabilities: &Array2<f64>) -> Array1<usize> {
    log_probabilities
        .columns()
        .into_iter()
        .map(|column| {
            column
                .iter()
                .position_min_by(|a, b| b.total_cmp(a))
                .unwrap_or(0)
                + LABEL_SHIFT
        })
        .collect()
}

// Percentage of entries where `predicted` agrees with `truth`.
// Returns 0.0 for empty inputs.
pub fn accuracy(predicted: &Array1<usize>, truth: &Array1<usize>) -> f64 {
    assert_eq!(predicted.len(), truth.len(), "label vectors differ in length");
    if truth.is_empty() {
        return 0.0;
    }

    let correct = predicted
        .iter()
        .zip(truth.iter())
        .filter(|(predicted, truth)| predicted == truth)
        .count();
    correct as f64 / truth.len() as f64 * 100.0
}
