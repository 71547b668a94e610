//! Model module for the CNN classifier using the Burn framework
//!
//! This module provides:
//! - The `EdgeClassifier` architecture and its configuration
//! - Saving and loading a trained model directory
//!
//! A model directory holds `model.mpk` (weights, burn `CompactRecorder`) and
//! `model.json` (the `EdgeClassifierConfig` needed to rebuild the network).

pub mod cnn;

use std::path::{Path, PathBuf};

use burn::{
    config::Config,
    module::Module,
    record::CompactRecorder,
    tensor::backend::Backend,
};
use tracing::info;

use crate::utils::error::{EdgeError, Result};

// Re-export main types for convenience
pub use cnn::{ConvBlock, EdgeClassifier, EdgeClassifierConfig};

/// Weights file stem; the recorder appends `.mpk`
pub const MODEL_FILE_STEM: &str = "model";

/// Config file name
pub const CONFIG_FILE: &str = "model.json";

/// Path of the weights file inside a model directory
pub fn model_file(dir: &Path) -> PathBuf {
    dir.join(format!("{}.mpk", MODEL_FILE_STEM))
}

/// Path of the config file inside a model directory
pub fn config_file(dir: &Path) -> PathBuf {
    dir.join(CONFIG_FILE)
}

/// Save weights and config into `dir`
pub fn save_model<B: Backend>(
    model: &EdgeClassifier<B>,
    config: &EdgeClassifierConfig,
    dir: &Path,
) -> Result<()> {
    std::fs::create_dir_all(dir)?;

    config.save(config_file(dir))?;

    let recorder = CompactRecorder::new();
    model
        .clone()
        .save_file(dir.join(MODEL_FILE_STEM), &recorder)
        .map_err(|e| EdgeError::Model(format!("Failed to save model: {:?}", e)))?;

    info!("Saved model to {:?}", model_file(dir));
    Ok(())
}

/// Load a model directory written by [`save_model`]
pub fn load_model<B: Backend>(
    dir: &Path,
    device: &B::Device,
) -> Result<(EdgeClassifier<B>, EdgeClassifierConfig)> {
    let config = EdgeClassifierConfig::load(config_file(dir)).map_err(|e| {
        EdgeError::Model(format!(
            "Failed to load model config {:?}: {:?}",
            config_file(dir),
            e
        ))
    })?;
    config.validate()?;

    let weights = model_file(dir);
    if !weights.is_file() {
        return Err(EdgeError::Model(format!(
            "Model weights not found: {:?}",
            weights
        )));
    }

    let recorder = CompactRecorder::new();
    let model = config
        .init::<B>(device)
        .load_file(dir.join(MODEL_FILE_STEM), &recorder, device)
        .map_err(|e| EdgeError::Model(format!("Failed to load model weights: {:?}", e)))?;

    info!("Loaded model from {:?}", weights);
    Ok((model, config))
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::tensor::Tensor;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = NdArray;

    fn logits(model: &EdgeClassifier<TestBackend>, input: Tensor<TestBackend, 4>) -> Vec<f32> {
        model.forward(input).into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let device = Default::default();
        let config = EdgeClassifierConfig::new()
            .with_input_size(8)
            .with_num_classes(3);
        let model = config.init::<TestBackend>(&device);

        save_model(&model, &config, dir.path()).unwrap();
        assert!(model_file(dir.path()).is_file());
        assert!(config_file(dir.path()).is_file());

        let (loaded, loaded_config) = load_model::<TestBackend>(dir.path(), &device).unwrap();
        assert_eq!(loaded_config.num_classes, 3);

        let input = Tensor::<TestBackend, 4>::ones([1, 1, 8, 8], &device);
        let a = logits(&model, input.clone());
        let b = logits(&loaded, input);
        // weights are recorded at half precision
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() <= 1e-2 * x.abs().max(1.0), "{} vs {}", x, y);
        }

        let (again, _) = load_model::<TestBackend>(dir.path(), &device).unwrap();
        let input = Tensor::<TestBackend, 4>::ones([1, 1, 8, 8], &device);
        assert_eq!(logits(&loaded, input.clone()), logits(&again, input));
    }

    #[test]
    fn test_load_missing_directory() {
        let dir = TempDir::new().unwrap();
        let result = load_model::<TestBackend>(&dir.path().join("missing"), &Default::default());
        assert!(matches!(result, Err(EdgeError::Model(_))));
    }
}
