//! Supervised Training Implementation
//!
//! A custom training loop over Burn's optimizer API rather than the
//! high-level LearnerBuilder: Adam, cross-entropy, seeded shuffling per
//! epoch and a test-split evaluation after every epoch.

use std::path::{Path, PathBuf};

use anyhow::{bail, Result};
use burn::{
    data::dataloader::batcher::Batcher,
    module::AutodiffModule,
    nn::loss::CrossEntropyLossConfig,
    optim::{decay::WeightDecayConfig, AdamConfig, GradientsParams, Optimizer},
    tensor::{
        backend::{AutodiffBackend, Backend},
        ElementConversion,
    },
};
use colored::Colorize;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use tracing::info;

use super::TrainingConfig;
use crate::dataset::{ClassificationBatch, Dataset, DatasetSplit, SampleBatcher};
use crate::model::{model_file, save_model, EdgeClassifier, EdgeClassifierConfig};
use crate::utils::format_duration;

/// Outcome of a training run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    pub epochs: usize,
    /// Mean batch loss of the last epoch
    pub final_loss: f64,
    /// Training accuracy of the last epoch, percent
    pub train_accuracy: f64,
    /// Test-split accuracy after the last epoch, percent
    pub test_accuracy: f64,
    pub model_dir: PathBuf,
}

/// Train a classifier on `dataset.train` and save it into `output_dir`
///
/// # Type Parameters
/// * `B` - The autodiff backend to use (e.g., `Autodiff<NdArray>` or `Autodiff<Cuda>`)
pub fn run_training<B>(
    dataset: &Dataset,
    config: &TrainingConfig,
    output_dir: &Path,
    device: &B::Device,
) -> Result<TrainingSummary>
where
    B: AutodiffBackend,
{
    println!("{}", "Initializing Training...".green().bold());
    println!("  Device: {:?}", device);

    let train = match config.max_train_samples {
        Some(max) => dataset.train.clone().truncated(max),
        None => dataset.train.clone(),
    };
    if train.is_empty() {
        bail!("training split '{}' has no samples", train.name());
    }
    if config.batch_size == 0 {
        bail!("batch_size must be positive");
    }

    let model_config =
        EdgeClassifierConfig::for_dataset(dataset.image_shape(), dataset.num_classes())
            .with_conv_filters(config.conv_filters.clone())
            .with_hidden_units(config.hidden_units)
            .with_dropout_rate(config.dropout_rate);
    model_config.validate()?;

    let mut model = model_config.init::<B>(device);
    let batcher = SampleBatcher::new(dataset.image_shape());

    let mut optimizer = AdamConfig::new()
        .with_weight_decay(Some(WeightDecayConfig::new(config.weight_decay)))
        .init();

    println!();
    println!("{}", "Training Configuration:".cyan().bold());
    println!("  Training samples: {}", train.len());
    println!("  Test samples:     {}", dataset.test.len());
    println!("  Image shape:      {}", dataset.image_shape());
    println!("  Classes:          {}", dataset.num_classes());
    println!("  Epochs:           {}", config.epochs);
    println!("  Batch size:       {}", config.batch_size);
    println!("  Learning rate:    {}", config.learning_rate);
    println!();

    let start = std::time::Instant::now();
    let mut epoch_rng = ChaCha8Rng::seed_from_u64(config.seed);
    let mut indices: Vec<usize> = (0..train.len()).collect();
    let num_batches = train.len().div_ceil(config.batch_size);

    let mut final_loss = 0.0;
    let mut train_accuracy = 0.0;
    let mut test_accuracy = 0.0;

    for epoch in 0..config.epochs {
        println!(
            "{}",
            format!("Epoch {}/{}", epoch + 1, config.epochs).yellow().bold()
        );

        let mut epoch_loss = 0.0f64;
        let mut correct = 0usize;
        let mut seen = 0usize;

        indices.shuffle(&mut epoch_rng);

        for (batch_idx, chunk) in indices.chunks(config.batch_size).enumerate() {
            let items = chunk
                .iter()
                .filter_map(|&i| train.get(i).cloned())
                .collect::<Vec<_>>();
            let batch: ClassificationBatch<B> = batcher.batch(items, device);
            let batch_size = batch.targets.dims()[0];

            let output = model.forward(batch.images);
            let loss = CrossEntropyLossConfig::new()
                .init(&output.device())
                .forward(output.clone(), batch.targets.clone());

            let loss_value: f64 = loss.clone().into_scalar().elem();
            epoch_loss += loss_value;

            let predictions = output.argmax(1).reshape([batch_size]);
            let batch_correct: i64 = predictions
                .equal(batch.targets)
                .int()
                .sum()
                .into_scalar()
                .elem();
            correct += batch_correct as usize;
            seen += batch_size;

            let grads = loss.backward();
            let grads = GradientsParams::from_grads(grads, &model);
            model = optimizer.step(config.learning_rate, model, grads);

            if (batch_idx + 1) % 10 == 0 || batch_idx + 1 == num_batches {
                println!(
                    "  Batch {:>4}/{}: loss = {:.4}, acc = {:.2}%",
                    batch_idx + 1,
                    num_batches,
                    loss_value,
                    100.0 * correct as f64 / seen.max(1) as f64
                );
            }
        }

        final_loss = epoch_loss / num_batches.max(1) as f64;
        train_accuracy = 100.0 * correct as f64 / seen.max(1) as f64;
        test_accuracy = evaluate(&model.valid(), &dataset.test, config.batch_size, device);

        println!(
            "  {} Loss: {:.4} | Train Acc: {:.2}% | Test Acc: {:.2}%",
            "→".cyan(),
            final_loss,
            train_accuracy,
            test_accuracy
        );
        info!(
            "epoch {} loss {:.4} train {:.2}% test {:.2}%",
            epoch + 1,
            final_loss,
            train_accuracy,
            test_accuracy
        );
        println!();
    }

    println!("{}", "Saving Model...".cyan());
    save_model(&model.valid(), &model_config, output_dir)?;
    println!("  Saved to: {:?}", model_file(output_dir));
    println!();

    println!("{}", "Training Complete!".green().bold());
    println!("  Test accuracy: {:.2}%", test_accuracy);
    println!("  Time: {}", format_duration(start.elapsed().as_secs_f64()));
    println!();
    println!("{}", "Next steps:".cyan().bold());
    println!("  • Convert:   tinyedge convert --model-dir {:?}", output_dir);
    println!("  • Benchmark: tinyedge benchmark --model-dir {:?}", output_dir);

    Ok(TrainingSummary {
        epochs: config.epochs,
        final_loss,
        train_accuracy,
        test_accuracy,
        model_dir: output_dir.to_path_buf(),
    })
}

/// Accuracy (percent) of `model` on `split`
pub fn evaluate<B: Backend>(
    model: &EdgeClassifier<B>,
    split: &DatasetSplit,
    batch_size: usize,
    device: &B::Device,
) -> f64 {
    let batcher = SampleBatcher::new(split.shape());
    let mut correct = 0usize;
    let mut total = 0usize;

    for chunk in split.samples().chunks(batch_size.max(1)) {
        let batch: ClassificationBatch<B> = batcher.batch(chunk.to_vec(), device);
        let n = chunk.len();

        let predictions = model.forward(batch.images).argmax(1).reshape([n]);
        let batch_correct: i64 = predictions
            .equal(batch.targets)
            .int()
            .sum()
            .into_scalar()
            .elem();

        correct += batch_correct as usize;
        total += n;
    }

    if total == 0 {
        0.0
    } else {
        100.0 * correct as f64 / total as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::SyntheticConfig;
    use crate::model::load_model;
    use burn::backend::Autodiff;
    use burn_ndarray::NdArray;
    use tempfile::TempDir;

    type TestBackend = Autodiff<NdArray>;

    fn tiny_dataset() -> Dataset {
        crate::dataset::synthetic::generate(&SyntheticConfig {
            train_samples: 32,
            test_samples: 8,
            image_size: 8,
            num_classes: 2,
            ..SyntheticConfig::default()
        })
        .unwrap()
    }

    #[test]
    fn test_training_saves_loadable_model() {
        let dir = TempDir::new().unwrap();
        let dataset = tiny_dataset();
        let config = TrainingConfig {
            epochs: 1,
            batch_size: 8,
            conv_filters: vec![4],
            hidden_units: 8,
            ..TrainingConfig::default()
        };

        let summary =
            run_training::<TestBackend>(&dataset, &config, dir.path(), &Default::default())
                .unwrap();
        assert_eq!(summary.epochs, 1);
        assert!(summary.final_loss.is_finite());
        assert!((0.0..=100.0).contains(&summary.test_accuracy));

        let (model, model_config) = load_model::<NdArray>(dir.path(), &Default::default()).unwrap();
        assert_eq!(model_config.num_classes, 2);
        assert_eq!(model.num_classes(), 2);
    }

    #[test]
    fn test_empty_training_split_fails() {
        let dir = TempDir::new().unwrap();
        let dataset = tiny_dataset();
        let config = TrainingConfig {
            max_train_samples: Some(0),
            ..TrainingConfig::quick()
        };
        let device = Default::default();
        let result = run_training::<TestBackend>(&dataset, &config, dir.path(), &device);
        assert!(result.is_err());
    }
}
