//! Training module for the baseline classifier
//!
//! This module provides:
//! - Training hyperparameters
//! - A supervised training loop with the Burn framework
//!
//! The trained model directory is the input of the conversion pipeline.

pub mod supervised;

use serde::{Deserialize, Serialize};

pub use supervised::{evaluate, run_training, TrainingSummary};

/// Default number of training epochs
pub const DEFAULT_EPOCHS: usize = 8;

/// Default batch size
pub const DEFAULT_BATCH_SIZE: usize = 32;

/// Default learning rate
pub const DEFAULT_LEARNING_RATE: f64 = 0.001;

/// Hyperparameters for `run_training`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    pub learning_rate: f64,
    /// L2 penalty applied by Adam
    pub weight_decay: f32,
    /// Seed for epoch shuffling
    pub seed: u64,
    /// Output channels of each conv block
    pub conv_filters: Vec<usize>,
    pub hidden_units: usize,
    pub dropout_rate: f64,
    /// Cap on training samples, useful for quick runs
    pub max_train_samples: Option<usize>,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            epochs: DEFAULT_EPOCHS,
            batch_size: DEFAULT_BATCH_SIZE,
            learning_rate: DEFAULT_LEARNING_RATE,
            weight_decay: 1e-4,
            seed: 42,
            conv_filters: vec![8, 16],
            hidden_units: 32,
            dropout_rate: 0.25,
            max_train_samples: None,
        }
    }
}

impl TrainingConfig {
    /// A few epochs on a small batch, for tests and smoke runs
    pub fn quick() -> Self {
        Self {
            epochs: 2,
            batch_size: 16,
            learning_rate: 0.005,
            ..Self::default()
        }
    }
}
