//! Metrics Module for Classifier Evaluation
//!
//! Accuracy, arg-max and a confusion matrix for comparing model variants
//! on the same test split.

use serde::{Deserialize, Serialize};

use super::error::{EdgeError, Result};

/// Index of the largest value in `values`.
///
/// Ties resolve to the lowest index. NaN entries never win. Returns `None`
/// for an empty slice.
pub fn argmax(values: &[f32]) -> Option<usize> {
    let mut best: Option<(usize, f32)> = None;
    for (idx, &v) in values.iter().enumerate() {
        if v.is_nan() {
            continue;
        }
        match best {
            Some((_, b)) if v <= b => {}
            _ => best = Some((idx, v)),
        }
    }
    best.map(|(idx, _)| idx)
}

/// Fraction of predictions equal to their ground-truth label.
///
/// Fails with `LengthMismatch` unless both sequences have exactly the same
/// length. An empty pair of sequences has accuracy 0.
pub fn accuracy(predictions: &[usize], ground_truth: &[usize]) -> Result<f64> {
    if predictions.len() != ground_truth.len() {
        return Err(EdgeError::LengthMismatch {
            predictions: predictions.len(),
            labels: ground_truth.len(),
        });
    }

    if predictions.is_empty() {
        return Ok(0.0);
    }

    let correct = predictions
        .iter()
        .zip(ground_truth.iter())
        .filter(|(p, g)| p == g)
        .count();

    Ok(correct as f64 / predictions.len() as f64)
}

/// Evaluation metrics for one variant
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metrics {
    /// Total number of samples evaluated
    pub total_samples: usize,

    /// Number of correct predictions
    pub correct_predictions: usize,

    /// Overall accuracy (correct / total)
    pub accuracy: f64,

    /// Confusion matrix
    pub confusion_matrix: ConfusionMatrix,
}

impl Metrics {
    /// Create new metrics from predictions and ground truth labels
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Result<Self> {
        let accuracy = accuracy(predictions, ground_truth)?;
        let confusion_matrix =
            ConfusionMatrix::from_predictions(predictions, ground_truth, num_classes);

        let correct_predictions = predictions
            .iter()
            .zip(ground_truth.iter())
            .filter(|(p, g)| p == g)
            .count();

        Ok(Self {
            total_samples: predictions.len(),
            correct_predictions,
            accuracy,
            confusion_matrix,
        })
    }
}

/// Confusion Matrix for multi-class classification
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    /// Number of classes
    pub num_classes: usize,

    /// Row = actual, column = predicted, row-major
    pub matrix: Vec<usize>,
}

impl Default for ConfusionMatrix {
    fn default() -> Self {
        Self::new(0)
    }
}

impl ConfusionMatrix {
    /// Create a new empty confusion matrix
    pub fn new(num_classes: usize) -> Self {
        Self {
            num_classes,
            matrix: vec![0; num_classes * num_classes],
        }
    }

    /// Create confusion matrix from predictions and ground truth
    pub fn from_predictions(
        predictions: &[usize],
        ground_truth: &[usize],
        num_classes: usize,
    ) -> Self {
        let mut cm = Self::new(num_classes);

        for (&pred, &actual) in predictions.iter().zip(ground_truth.iter()) {
            cm.add(actual, pred);
        }

        cm
    }

    /// Add a single prediction to the matrix
    pub fn add(&mut self, actual: usize, predicted: usize) {
        if actual < self.num_classes && predicted < self.num_classes {
            let idx = actual * self.num_classes + predicted;
            self.matrix[idx] += 1;
        }
    }

    /// Get the count at (actual, predicted)
    pub fn get(&self, actual: usize, predicted: usize) -> usize {
        if actual < self.num_classes && predicted < self.num_classes {
            self.matrix[actual * self.num_classes + predicted]
        } else {
            0
        }
    }

    /// Get the total count
    pub fn total(&self) -> usize {
        self.matrix.iter().sum()
    }

    /// Get the number of correct predictions (diagonal sum)
    pub fn correct(&self) -> usize {
        (0..self.num_classes).map(|i| self.get(i, i)).sum()
    }

    /// Per-class recall, `None` for classes absent from the ground truth
    pub fn per_class_recall(&self) -> Vec<Option<f64>> {
        (0..self.num_classes)
            .map(|row| {
                let support: usize = (0..self.num_classes).map(|col| self.get(row, col)).sum();
                if support == 0 {
                    None
                } else {
                    Some(self.get(row, row) as f64 / support as f64)
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_argmax() {
        assert_eq!(argmax(&[0.1, 0.7, 0.2]), Some(1));
        assert_eq!(argmax(&[3.0, 3.0, 1.0]), Some(0));
        assert_eq!(argmax(&[f32::NAN, -1.0]), Some(1));
        assert_eq!(argmax(&[]), None);
    }

    #[test]
    fn test_accuracy_matches_manual_count() {
        let labels = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9];
        let predictions = [0, 1, 2, 0, 4, 5, 0, 7, 0, 9];
        let correct = predictions
            .iter()
            .zip(labels.iter())
            .filter(|(p, l)| p == l)
            .count();

        assert_eq!(correct, 7);
        assert_eq!(accuracy(&predictions, &labels).unwrap(), correct as f64 / 10.0);
    }

    #[test]
    fn test_accuracy_length_mismatch() {
        let err = accuracy(&[0, 1], &[0, 1, 2]).unwrap_err();
        assert!(matches!(
            err,
            EdgeError::LengthMismatch {
                predictions: 2,
                labels: 3
            }
        ));
    }

    #[test]
    fn test_metrics_from_predictions() {
        let metrics = Metrics::from_predictions(&[0, 1, 1, 2], &[0, 1, 2, 2], 3).unwrap();
        assert_eq!(metrics.total_samples, 4);
        assert_eq!(metrics.correct_predictions, 3);
        assert_eq!(metrics.confusion_matrix.get(2, 1), 1);
        assert_eq!(metrics.confusion_matrix.correct(), 3);
    }

    #[test]
    fn test_per_class_recall() {
        let cm = ConfusionMatrix::from_predictions(&[0, 0, 1], &[0, 1, 1], 3);
        let recall = cm.per_class_recall();
        assert_eq!(recall[0], Some(1.0));
        assert_eq!(recall[1], Some(0.5));
        assert_eq!(recall[2], None);
    }
}
