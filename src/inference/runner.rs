//! Benchmark Runner Module
//!
//! Runs one [`InferenceTarget`] over a test split, timing each inference call
//! and scoring the arg-max predictions against the labels.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::benchmark::{LatencyStats, Timer};
use super::variant::InferenceTarget;
use crate::dataset::DatasetSplit;
use crate::utils::error::{EdgeError, Result};
use crate::utils::logging::ProgressLogger;
use crate::utils::metrics::{argmax, Metrics};
use crate::utils::{format_bytes, format_latency};

/// Configuration for a benchmark run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BenchmarkConfig {
    /// Untimed invocations on the first sample before measuring
    pub warmup_iterations: usize,

    /// Print per-variant results to the console as they complete
    pub print_results: bool,
}

impl Default for BenchmarkConfig {
    fn default() -> Self {
        Self {
            warmup_iterations: 5,
            print_results: true,
        }
    }
}

impl BenchmarkConfig {
    /// No warmup, no console output
    pub fn quiet() -> Self {
        Self {
            warmup_iterations: 0,
            print_results: false,
        }
    }
}

/// Measured outcome of one variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BenchmarkRecord {
    pub name: String,
    /// Total inference time over sample count, seconds
    pub mean_latency_s: f64,
    /// Fraction of correct predictions
    pub accuracy: f64,
    /// Bytes of the persisted model file
    pub size_bytes: u64,
    pub p50_latency_s: f64,
    pub p95_latency_s: f64,
    pub samples: usize,
    /// Recall per ground-truth class, `None` where the class is absent
    #[serde(default)]
    pub per_class_recall: Vec<Option<f64>>,
}

impl BenchmarkRecord {
    pub fn summary(&self) -> String {
        format!(
            "{}: {} mean latency, {:.2}% accuracy, {}",
            self.name,
            format_latency(self.mean_latency_s),
            self.accuracy * 100.0,
            format_bytes(self.size_bytes)
        )
    }
}

/// Predictions of a target over `split`, plus the timing of each invoke
pub fn predict_split(
    target: &mut dyn InferenceTarget,
    split: &DatasetSplit,
) -> Result<(Vec<usize>, LatencyStats)> {
    let mut timer = Timer::with_capacity(split.len());
    let mut predictions = Vec::with_capacity(split.len());
    let mut progress = ProgressLogger::new(target.name(), split.len());

    for sample in split.iter() {
        target.prepare(sample.image())?;

        timer.start();
        target.invoke()?;
        timer.stop();

        let output = target.output()?;
        let predicted = argmax(&output).ok_or_else(|| {
            EdgeError::Interpreter(format!("{} produced an empty output", target.name()))
        })?;
        predictions.push(predicted);
        progress.increment();
    }
    progress.finish();

    Ok((predictions, timer.stats()))
}

/// Time and score `target` on every sample of `split`
pub fn run_benchmark(
    target: &mut dyn InferenceTarget,
    split: &DatasetSplit,
    config: &BenchmarkConfig,
) -> Result<BenchmarkRecord> {
    if split.is_empty() {
        return Err(EdgeError::Dataset(format!(
            "cannot benchmark on empty split '{}'",
            split.name()
        )));
    }

    info!("Benchmarking {} on {} samples", target.name(), split.len());

    if config.warmup_iterations > 0 {
        if let Some(first) = split.get(0) {
            target.prepare(first.image())?;
            for _ in 0..config.warmup_iterations {
                target.invoke()?;
            }
            target.output()?;
            debug!("{}: {} warmup runs done", target.name(), config.warmup_iterations);
        }
    }

    let (predictions, latency) = predict_split(target, split)?;
    let labels = split.labels();
    let num_classes = labels
        .iter()
        .chain(predictions.iter())
        .max()
        .map_or(0, |&class| class + 1);
    let metrics = Metrics::from_predictions(&predictions, &labels, num_classes)?;

    let record = BenchmarkRecord {
        name: target.name().to_string(),
        mean_latency_s: latency.mean_s(),
        accuracy: metrics.accuracy,
        size_bytes: target.size_bytes(),
        p50_latency_s: latency.p50_ms / 1000.0,
        p95_latency_s: latency.p95_ms / 1000.0,
        samples: metrics.total_samples,
        per_class_recall: metrics.confusion_matrix.per_class_recall(),
    };

    if config.print_results {
        println!();
        println!("{}", format!("Variant: {}", record.name).cyan().bold());
        println!(
            "  {} {}",
            "Mean latency:".green(),
            format_latency(record.mean_latency_s).bold()
        );
        println!(
            "  P50/P95: {}/{}",
            format_latency(record.p50_latency_s),
            format_latency(record.p95_latency_s)
        );
        println!(
            "  {} {}",
            "Accuracy:".green(),
            format!("{:.2}%", record.accuracy * 100.0).bold()
        );
        println!("  Size: {}", format_bytes(record.size_bytes));
        for (class, recall) in record.per_class_recall.iter().enumerate() {
            if let Some(recall) = recall {
                debug!("{} class {} recall {:.2}%", record.name, class, recall * 100.0);
            }
        }
    }

    info!("{}", record.summary());
    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{ImageShape, Sample};

    /// Predicts the class stored in the first pixel
    struct EchoTarget {
        staged: usize,
        invocations: usize,
    }

    impl InferenceTarget for EchoTarget {
        fn name(&self) -> &str {
            "echo"
        }

        fn size_bytes(&self) -> u64 {
            123
        }

        fn prepare(&mut self, image: &[f32]) -> Result<()> {
            self.staged = image[0] as usize;
            Ok(())
        }

        fn invoke(&mut self) -> Result<()> {
            self.invocations += 1;
            Ok(())
        }

        fn output(&mut self) -> Result<Vec<f32>> {
            let mut out = vec![0.0; 3];
            out[self.staged] = 1.0;
            Ok(out)
        }
    }

    /// Ten samples, `correct` of which have a pixel matching their label
    fn split_with(correct: usize) -> DatasetSplit {
        let samples = (0..10)
            .map(|i| {
                let label = i % 3;
                let pixel = if i < correct { label } else { (label + 1) % 3 };
                Sample::new(vec![pixel as f32, 0.0], label)
            })
            .collect();
        DatasetSplit::new("test", ImageShape::new(1, 1, 2), samples).unwrap()
    }

    #[test]
    fn test_accuracy_is_exact_fraction() {
        for correct in [0, 3, 7, 10] {
            let mut target = EchoTarget { staged: 0, invocations: 0 };
            let record =
                run_benchmark(&mut target, &split_with(correct), &BenchmarkConfig::quiet())
                    .unwrap();
            assert_eq!(record.samples, 10);
            assert_eq!(record.accuracy, correct as f64 / 10.0);
            assert_eq!(record.size_bytes, 123);
            assert_eq!(record.name, "echo");
        }
    }

    #[test]
    fn test_warmup_is_not_scored() {
        let mut target = EchoTarget { staged: 0, invocations: 0 };
        let config = BenchmarkConfig {
            warmup_iterations: 4,
            print_results: false,
        };
        let record = run_benchmark(&mut target, &split_with(10), &config).unwrap();
        assert_eq!(target.invocations, 14);
        assert_eq!(record.samples, 10);
    }

    #[test]
    fn test_per_class_recall() {
        // samples 7, 8 and 9 are mispredicted
        let mut target = EchoTarget { staged: 0, invocations: 0 };
        let record =
            run_benchmark(&mut target, &split_with(7), &BenchmarkConfig::quiet()).unwrap();
        assert_eq!(record.per_class_recall.len(), 3);
        // labels: 0 at 0,3,6,9; 1 at 1,4,7; 2 at 2,5,8
        assert_eq!(record.per_class_recall[0], Some(0.75));
        assert!((record.per_class_recall[1].unwrap() - 2.0 / 3.0).abs() < 1e-12);
        assert!((record.per_class_recall[2].unwrap() - 2.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_split() {
        let split = DatasetSplit::new("test", ImageShape::new(1, 1, 2), vec![]).unwrap();
        let mut target = EchoTarget { staged: 0, invocations: 0 };
        assert!(run_benchmark(&mut target, &split, &BenchmarkConfig::quiet()).is_err());
    }
}
