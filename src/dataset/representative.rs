//! Representative sample provider
//!
//! Calibration for full-integer quantization needs example inputs to observe
//! activation ranges. [`RepresentativeDataset`] hands them out lazily, one
//! single-sample batch at a time, drawn in order from the training split.
//! Every call to [`RepresentativeDataset::iter`] starts over, so the converter
//! can walk the data as many times as it needs.

use super::DatasetSplit;

/// Default number of calibration samples
pub const DEFAULT_CALIBRATION_SAMPLES: usize = 100;

/// One calibration input, shaped like the model input
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationBatch {
    /// `[1, C, H, W]`
    pub shape: [usize; 4],
    pub data: Vec<f32>,
}

/// Restartable, finite source of calibration inputs
#[derive(Debug, Clone, Copy)]
pub struct RepresentativeDataset<'a> {
    split: &'a DatasetSplit,
    num_samples: usize,
}

impl<'a> RepresentativeDataset<'a> {
    /// Use the first `num_samples` samples of `split`
    pub fn new(split: &'a DatasetSplit, num_samples: usize) -> Self {
        Self { split, num_samples }
    }

    /// Use the first [`DEFAULT_CALIBRATION_SAMPLES`] samples of `split`
    pub fn with_default_size(split: &'a DatasetSplit) -> Self {
        Self::new(split, DEFAULT_CALIBRATION_SAMPLES)
    }

    /// Number of items each iteration yields
    pub fn len(&self) -> usize {
        self.num_samples.min(self.split.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Model input shape of every item
    pub fn input_shape(&self) -> [usize; 4] {
        self.split.shape().batched()
    }

    /// Fresh pass over the calibration samples
    pub fn iter(&self) -> RepresentativeIter<'a> {
        RepresentativeIter {
            split: self.split,
            shape: self.input_shape(),
            position: 0,
            end: self.len(),
        }
    }
}

impl<'a> IntoIterator for &RepresentativeDataset<'a> {
    type Item = CalibrationBatch;
    type IntoIter = RepresentativeIter<'a>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Iterator returned by [`RepresentativeDataset::iter`]
#[derive(Debug, Clone)]
pub struct RepresentativeIter<'a> {
    split: &'a DatasetSplit,
    shape: [usize; 4],
    position: usize,
    end: usize,
}

impl Iterator for RepresentativeIter<'_> {
    type Item = CalibrationBatch;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }
        let sample = self.split.get(self.position)?;
        self.position += 1;

        Some(CalibrationBatch {
            shape: self.shape,
            data: sample.image().to_vec(),
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = self.end - self.position;
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for RepresentativeIter<'_> {}
