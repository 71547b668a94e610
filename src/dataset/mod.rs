//! Dataset module
//!
//! This module provides functionality for:
//! - Loading labeled image datasets (IDX files, image folders, synthetic)
//! - Normalizing pixels to [0, 1] in a fixed `[C, H, W]` layout
//! - Batching samples for burn training
//! - Drawing representative samples for quantization calibration
//!
//! Every loader yields a [`Dataset`] with two disjoint splits, `train` and
//! `test`, that live for the duration of one pipeline run.

pub mod batcher;
pub mod folder;
pub mod idx;
pub mod representative;
pub mod synthetic;

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::utils::error::{EdgeError, Result};

pub use batcher::{ClassificationBatch, SampleBatcher};
pub use representative::{CalibrationBatch, RepresentativeDataset};
pub use synthetic::SyntheticConfig;

/// Image dimensions in `[C, H, W]` order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageShape {
    pub channels: usize,
    pub height: usize,
    pub width: usize,
}

impl ImageShape {
    pub fn new(channels: usize, height: usize, width: usize) -> Self {
        Self {
            channels,
            height,
            width,
        }
    }

    /// Square image helper
    pub fn square(channels: usize, size: usize) -> Self {
        Self::new(channels, size, size)
    }

    /// Number of scalar values in one image
    pub fn num_elements(&self) -> usize {
        self.channels * self.height * self.width
    }

    /// `[C, H, W]`
    pub fn dims(&self) -> [usize; 3] {
        [self.channels, self.height, self.width]
    }

    /// Model input shape for a single-sample batch, `[1, C, H, W]`
    pub fn batched(&self) -> [usize; 4] {
        [1, self.channels, self.height, self.width]
    }
}

impl std::fmt::Display for ImageShape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}x{}", self.channels, self.height, self.width)
    }
}

/// A normalized image and its class label. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    image: Vec<f32>,
    label: usize,
}

impl Sample {
    pub fn new(image: Vec<f32>, label: usize) -> Self {
        Self { image, label }
    }

    /// Pixel values in `[C, H, W]` order, each in [0, 1]
    pub fn image(&self) -> &[f32] {
        &self.image
    }

    pub fn label(&self) -> usize {
        self.label
    }
}

/// Ordered sequence of samples sharing one image shape
#[derive(Debug, Clone)]
pub struct DatasetSplit {
    name: String,
    shape: ImageShape,
    samples: Vec<Sample>,
}

impl DatasetSplit {
    /// Build a split, checking every sample against `shape`
    pub fn new(name: &str, shape: ImageShape, samples: Vec<Sample>) -> Result<Self> {
        let expected = shape.num_elements();
        if let Some((idx, bad)) = samples
            .iter()
            .enumerate()
            .find(|(_, s)| s.image.len() != expected)
        {
            return Err(EdgeError::Dataset(format!(
                "{} sample {} has {} values, expected {} for shape {}",
                name,
                idx,
                bad.image.len(),
                expected,
                shape
            )));
        }

        Ok(Self {
            name: name.to_string(),
            shape,
            samples,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn shape(&self) -> ImageShape {
        self.shape
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Sample> {
        self.samples.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Sample> {
        self.samples.iter()
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    /// Ground-truth labels in split order
    pub fn labels(&self) -> Vec<usize> {
        self.samples.iter().map(|s| s.label).collect()
    }

    /// Keep at most the first `max` samples
    pub fn truncated(mut self, max: usize) -> Self {
        self.samples.truncate(max);
        self
    }

    /// Number of samples per class
    pub fn class_counts(&self, num_classes: usize) -> Vec<usize> {
        let mut counts = vec![0usize; num_classes];
        for sample in &self.samples {
            if sample.label < num_classes {
                counts[sample.label] += 1;
            }
        }
        counts
    }
}

/// Train and test splits plus class names
#[derive(Debug, Clone)]
pub struct Dataset {
    pub train: DatasetSplit,
    pub test: DatasetSplit,
    pub class_names: Vec<String>,
}

impl Dataset {
    /// Assemble a dataset, requiring both splits to share one image shape
    pub fn new(train: DatasetSplit, test: DatasetSplit, class_names: Vec<String>) -> Result<Self> {
        if train.shape() != test.shape() {
            return Err(EdgeError::Dataset(format!(
                "train shape {} differs from test shape {}",
                train.shape(),
                test.shape()
            )));
        }

        let num_classes = class_names.len();
        if let Some(bad) = train
            .iter()
            .chain(test.iter())
            .find(|s| s.label >= num_classes)
        {
            return Err(EdgeError::Dataset(format!(
                "label {} is out of range for {} classes",
                bad.label, num_classes
            )));
        }

        Ok(Self {
            train,
            test,
            class_names,
        })
    }

    pub fn num_classes(&self) -> usize {
        self.class_names.len()
    }

    pub fn image_shape(&self) -> ImageShape {
        self.train.shape()
    }

    /// Summary statistics for display
    pub fn stats(&self) -> DatasetStats {
        DatasetStats {
            image_shape: self.image_shape(),
            num_classes: self.num_classes(),
            train_samples: self.train.len(),
            test_samples: self.test.len(),
            train_class_counts: self.train.class_counts(self.num_classes()),
            test_class_counts: self.test.class_counts(self.num_classes()),
            class_names: self.class_names.clone(),
        }
    }
}

/// Where a dataset comes from
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum DatasetSource {
    /// MNIST-style IDX files in one directory
    Idx { dir: PathBuf },

    /// `dir/train/<class>/*` and `dir/test/<class>/*` image folders
    Folder {
        dir: PathBuf,
        image_size: usize,
        channels: usize,
    },

    /// Deterministic generated images
    Synthetic(SyntheticConfig),
}

impl Default for DatasetSource {
    fn default() -> Self {
        DatasetSource::Synthetic(SyntheticConfig::default())
    }
}

impl DatasetSource {
    /// Load both splits
    pub fn load(&self) -> Result<Dataset> {
        let dataset = match self {
            DatasetSource::Idx { dir } => {
                info!("Loading IDX dataset from {:?}", dir);
                idx::load(dir)?
            }
            DatasetSource::Folder {
                dir,
                image_size,
                channels,
            } => {
                info!("Loading image folder dataset from {:?}", dir);
                folder::load(dir, *image_size, *channels)?
            }
            DatasetSource::Synthetic(config) => {
                info!("Generating synthetic dataset (seed {})", config.seed);
                synthetic::generate(config)?
            }
        };

        info!(
            "Dataset ready: {} train / {} test samples, {} classes, shape {}",
            dataset.train.len(),
            dataset.test.len(),
            dataset.num_classes(),
            dataset.image_shape()
        );

        Ok(dataset)
    }
}

/// Dataset statistics
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetStats {
    pub image_shape: ImageShape,
    pub num_classes: usize,
    pub train_samples: usize,
    pub test_samples: usize,
    pub train_class_counts: Vec<usize>,
    pub test_class_counts: Vec<usize>,
    pub class_names: Vec<String>,
}

impl DatasetStats {
    /// Print statistics to console
    pub fn print(&self) {
        println!("\n📊 Dataset Statistics:");
        println!("  Image shape: {}", self.image_shape);
        println!("  Train samples: {}", self.train_samples);
        println!("  Test samples: {}", self.test_samples);
        println!("  Number of classes: {}", self.num_classes);
        println!("\n  Samples per class (train / test):");

        for (idx, name) in self.class_names.iter().enumerate() {
            let train = self.train_class_counts.get(idx).copied().unwrap_or(0);
            let test = self.test_class_counts.get(idx).copied().unwrap_or(0);
            let bar_len = (train as f32 / self.train_samples.max(1) as f32 * 40.0) as usize;
            let bar: String = "█".repeat(bar_len);
            println!("    {:3}. {:20} {:6} {:6} {}", idx, name, train, test, bar);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(name: &str, labels: &[usize]) -> DatasetSplit {
        let shape = ImageShape::square(1, 2);
        let samples = labels
            .iter()
            .map(|&l| Sample::new(vec![0.5; 4], l))
            .collect();
        DatasetSplit::new(name, shape, samples).unwrap()
    }

    #[test]
    fn test_image_shape() {
        let shape = ImageShape::new(3, 4, 5);
        assert_eq!(shape.num_elements(), 60);
        assert_eq!(shape.batched(), [1, 3, 4, 5]);
        assert_eq!(shape.to_string(), "3x4x5");
    }

    #[test]
    fn test_split_rejects_wrong_sample_size() {
        let shape = ImageShape::square(1, 2);
        let result = DatasetSplit::new("train", shape, vec![Sample::new(vec![0.0; 3], 0)]);
        assert!(matches!(result, Err(EdgeError::Dataset(_))));
    }

    #[test]
    fn test_split_labels_and_counts() {
        let split = split("test", &[0, 2, 2, 1]);
        assert_eq!(split.labels(), vec![0, 2, 2, 1]);
        assert_eq!(split.class_counts(3), vec![1, 1, 2]);
        assert_eq!(split.truncated(2).len(), 2);
    }

    #[test]
    fn test_dataset_rejects_out_of_range_label() {
        let result = Dataset::new(
            split("train", &[0, 1]),
            split("test", &[0, 5]),
            vec!["a".into(), "b".into()],
        );
        assert!(matches!(result, Err(EdgeError::Dataset(_))));
    }

    #[test]
    fn test_dataset_source_json() {
        let json = r#"{"kind":"idx","dir":"data/mnist"}"#;
        let source: DatasetSource = serde_json::from_str(json).unwrap();
        assert!(matches!(source, DatasetSource::Idx { .. }));

        let default_json = serde_json::to_string(&DatasetSource::default()).unwrap();
        assert!(default_json.contains("\"kind\":\"synthetic\""));
    }
}
