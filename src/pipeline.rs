//! Conversion-and-benchmark pipeline
//!
//! Stages run strictly in order and any error aborts the run:
//!
//! 1. load the dataset and the trained model
//! 2. build the representative dataset from the train split
//! 3. convert twice: plain, then full-integer quantized
//! 4. benchmark baseline, converted and converted-quantized on the test split
//! 5. assemble the report

use std::path::{Path, PathBuf};

use anyhow::{ensure, Context, Result};
use colored::Colorize;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::backend::{default_device, DefaultBackend};
use crate::convert::{write_artifact, Converter, ConverterConfig};
use crate::dataset::representative::DEFAULT_CALIBRATION_SAMPLES;
use crate::dataset::{Dataset, DatasetSource, RepresentativeDataset};
use crate::inference::{
    run_benchmark, BaselineTarget, BenchmarkConfig, InferenceTarget, InterpreterTarget, Report,
    CONVERTED, CONVERTED_QUANTIZED,
};
use crate::model::{load_model, model_file, EdgeClassifier, EdgeClassifierConfig};
use crate::utils::format_bytes;

/// Conversion flavours offered on the command line
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ConvertMode {
    /// Float graph, no optimization
    Plain,
    /// Int8 weights, float activations
    Dynamic,
    /// Full integer with u8 input and output
    Int8,
    /// Integer kernels where possible, float elsewhere
    Int8Fallback,
}

impl ConvertMode {
    pub fn converter_config(&self) -> ConverterConfig {
        match self {
            ConvertMode::Plain => ConverterConfig::plain(),
            ConvertMode::Dynamic => ConverterConfig::dynamic_range(),
            ConvertMode::Int8 => ConverterConfig::full_integer(),
            ConvertMode::Int8Fallback => ConverterConfig::integer_with_float_fallback(),
        }
    }

    /// Whether the mode calibrates activations
    pub fn needs_representative_dataset(&self) -> bool {
        matches!(self, ConvertMode::Int8 | ConvertMode::Int8Fallback)
    }

    /// Default artifact file name
    pub fn file_name(&self) -> &'static str {
        match self {
            ConvertMode::Plain => "model.tedge",
            ConvertMode::Dynamic => "model_dynamic.tedge",
            ConvertMode::Int8 => "model_quant.tedge",
            ConvertMode::Int8Fallback => "model_quant_fallback.tedge",
        }
    }
}

/// Pipeline settings; every field has a default
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding `model.mpk` and `model.json`
    pub model_dir: PathBuf,
    pub dataset: DatasetSource,
    /// Where artifacts are written
    pub output_dir: PathBuf,
    pub plain_artifact: String,
    pub quantized_artifact: String,
    /// Samples drawn from the train split for calibration
    pub calibration_samples: usize,
    /// Cap on test samples per variant
    pub max_test_samples: Option<usize>,
    /// Untimed runs before measuring each variant
    pub warmup_iterations: usize,
    /// Optional JSON report destination
    pub report_path: Option<PathBuf>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            model_dir: PathBuf::from("output/model"),
            dataset: DatasetSource::default(),
            output_dir: PathBuf::from("output/artifacts"),
            plain_artifact: ConvertMode::Plain.file_name().to_string(),
            quantized_artifact: ConvertMode::Int8.file_name().to_string(),
            calibration_samples: DEFAULT_CALIBRATION_SAMPLES,
            max_test_samples: None,
            warmup_iterations: 5,
            report_path: None,
        }
    }
}

impl PipelineConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read pipeline config {:?}", path))?;
        serde_json::from_str(&json).with_context(|| format!("Invalid pipeline config {:?}", path))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn plain_path(&self) -> PathBuf {
        self.output_dir.join(&self.plain_artifact)
    }

    pub fn quantized_path(&self) -> PathBuf {
        self.output_dir.join(&self.quantized_artifact)
    }
}

fn check_compatible(model_config: &EdgeClassifierConfig, dataset: &Dataset) -> Result<()> {
    ensure!(
        model_config.input_shape() == dataset.image_shape(),
        "model expects {} images but the dataset provides {}",
        model_config.input_shape(),
        dataset.image_shape()
    );
    ensure!(
        model_config.num_classes == dataset.num_classes(),
        "model predicts {} classes but the dataset has {}",
        model_config.num_classes,
        dataset.num_classes()
    );
    Ok(())
}

/// Convert a trained model with one mode and write the artifact
pub fn convert_with_mode(
    model: &EdgeClassifier<DefaultBackend>,
    model_config: &EdgeClassifierConfig,
    mode: ConvertMode,
    representative: Option<RepresentativeDataset<'_>>,
    path: &Path,
) -> Result<u64> {
    let mut converter =
        Converter::from_model(model, model_config).with_config(mode.converter_config());
    if mode.needs_representative_dataset() {
        if let Some(rep) = representative {
            converter = converter.with_representative_dataset(rep);
        }
    }
    let bytes = converter
        .convert()
        .with_context(|| format!("{:?} conversion failed", mode))?;
    Ok(write_artifact(&bytes, path)?)
}

/// Run all five stages and return the report
pub fn run_pipeline(config: &PipelineConfig) -> Result<Report> {
    println!("{}", "Loading Dataset...".cyan());
    let dataset = config.dataset.load().context("Failed to load dataset")?;
    let test = match config.max_test_samples {
        Some(max) => dataset.test.clone().truncated(max),
        None => dataset.test.clone(),
    };

    println!("{}", "Loading Model...".cyan());
    let device = default_device();
    let (model, model_config) = load_model::<DefaultBackend>(&config.model_dir, &device)
        .with_context(|| format!("Failed to load model from {:?}", config.model_dir))?;
    check_compatible(&model_config, &dataset)?;

    let representative = RepresentativeDataset::new(&dataset.train, config.calibration_samples);
    info!(
        "Representative dataset: {} samples of shape {:?}",
        representative.len(),
        representative.input_shape()
    );

    println!("{}", "Converting...".cyan());
    let plain_size = convert_with_mode(
        &model,
        &model_config,
        ConvertMode::Plain,
        None,
        &config.plain_path(),
    )?;
    let quant_size = convert_with_mode(
        &model,
        &model_config,
        ConvertMode::Int8,
        Some(representative),
        &config.quantized_path(),
    )?;
    println!(
        "  {} {} | {} {}",
        "Plain:".green(),
        format_bytes(plain_size),
        "Quantized:".green(),
        format_bytes(quant_size)
    );

    println!("{}", "Benchmarking...".green().bold());
    let bench = BenchmarkConfig {
        warmup_iterations: config.warmup_iterations,
        print_results: true,
    };

    let baseline_size = std::fs::metadata(model_file(&config.model_dir))?.len();
    let mut targets: Vec<Box<dyn InferenceTarget>> = vec![
        Box::new(BaselineTarget::new(model, &model_config, device, baseline_size)),
        Box::new(InterpreterTarget::from_file(CONVERTED, &config.plain_path())?),
        Box::new(InterpreterTarget::from_file(CONVERTED_QUANTIZED, &config.quantized_path())?),
    ];

    let mut records = Vec::with_capacity(targets.len());
    for target in targets.iter_mut() {
        let record = run_benchmark(target.as_mut(), &test, &bench)
            .with_context(|| format!("Benchmark of {} failed", target.name()))?;
        records.push(record);
    }

    let report = Report::new(test.name(), records);
    println!();
    report.print();

    if let Some(path) = &config.report_path {
        report.save(path)?;
        println!("  Report saved to: {:?}", path);
    }

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_from_empty_json() {
        let config: PipelineConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.plain_artifact, "model.tedge");
        assert_eq!(config.quantized_artifact, "model_quant.tedge");
        assert_eq!(config.calibration_samples, 100);
        assert!(config.report_path.is_none());
        assert!(matches!(config.dataset, DatasetSource::Synthetic(_)));
    }

    #[test]
    fn test_config_dataset_tag() {
        let config: PipelineConfig =
            serde_json::from_str(r#"{"dataset": {"kind": "idx", "dir": "data/mnist"}}"#).unwrap();
        match config.dataset {
            DatasetSource::Idx { dir } => assert_eq!(dir, PathBuf::from("data/mnist")),
            other => panic!("unexpected source {:?}", other),
        }
    }

    #[test]
    fn test_mode_configs() {
        assert!(!ConvertMode::Plain.needs_representative_dataset());
        assert!(!ConvertMode::Dynamic.needs_representative_dataset());
        assert_eq!(ConvertMode::Int8.converter_config(), ConverterConfig::full_integer());
        assert!(ConvertMode::Int8Fallback.converter_config().validate().is_ok());
    }
}
