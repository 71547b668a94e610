//! tinyedge CLI
//!
//! Train a small classifier, convert it into plain and quantized edge
//! artifacts, and benchmark all three variants side by side.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use colored::Colorize;
use tracing::info;

use tinyedge::backend::{backend_name, default_device, DefaultBackend, TrainingBackend};
use tinyedge::dataset::{DatasetSource, RepresentativeDataset, SyntheticConfig};
use tinyedge::model::load_model;
use tinyedge::pipeline::{convert_with_mode, run_pipeline, ConvertMode, PipelineConfig};
use tinyedge::training::{run_training, TrainingConfig};
use tinyedge::utils::format_bytes;
use tinyedge::utils::logging::{init_logging, LogConfig};

/// Edge deployment toolkit: train, convert, quantize, benchmark
#[derive(Parser, Debug)]
#[command(name = "tinyedge")]
#[command(version)]
#[command(
    about = "Convert and benchmark small image classifiers for edge devices",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging
    #[arg(short, long, default_value = "false")]
    verbose: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    command: Commands,
}

#[derive(ValueEnum, Debug, Clone, Copy)]
enum DatasetKind {
    Synthetic,
    Idx,
    Folder,
}

#[derive(Args, Debug, Clone)]
struct DatasetArgs {
    /// Dataset format
    #[arg(long, value_enum, default_value = "synthetic")]
    dataset: DatasetKind,

    /// Dataset directory (idx and folder datasets)
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Square image size for folder datasets
    #[arg(long, default_value = "28")]
    image_size: usize,

    /// Channels for folder datasets (1 or 3)
    #[arg(long, default_value = "1")]
    channels: usize,
}

impl DatasetArgs {
    fn source(&self) -> DatasetSource {
        match self.dataset {
            DatasetKind::Synthetic => DatasetSource::Synthetic(SyntheticConfig::default()),
            DatasetKind::Idx => DatasetSource::Idx {
                dir: self.data_dir.clone(),
            },
            DatasetKind::Folder => DatasetSource::Folder {
                dir: self.data_dir.clone(),
                image_size: self.image_size,
                channels: self.channels,
            },
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Train the baseline model
    Train {
        #[command(flatten)]
        data: DatasetArgs,

        /// Number of training epochs
        #[arg(short, long, default_value = "8")]
        epochs: usize,

        /// Batch size for training
        #[arg(short, long, default_value = "32")]
        batch_size: usize,

        /// Learning rate
        #[arg(short, long, default_value = "0.001")]
        learning_rate: f64,

        /// Output directory for the model
        #[arg(short, long, default_value = "output/model")]
        output_dir: PathBuf,

        /// Random seed for reproducibility
        #[arg(long, default_value = "42")]
        seed: u64,

        /// Quick test mode - use only 500 training samples
        #[arg(long, default_value = "false")]
        quick: bool,
    },

    /// Convert a trained model into an edge artifact
    Convert {
        #[command(flatten)]
        data: DatasetArgs,

        /// Trained model directory
        #[arg(short, long, default_value = "output/model")]
        model_dir: PathBuf,

        /// Conversion mode
        #[arg(long, value_enum, default_value = "plain")]
        mode: ConvertMode,

        /// Artifact path (defaults to output/artifacts/<mode file name>)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Samples drawn from the train split for calibration
        #[arg(long, default_value = "100")]
        calibration_samples: usize,
    },

    /// Run the conversion-and-benchmark pipeline
    Benchmark {
        /// Pipeline config (JSON); command-line flags override it
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Trained model directory
        #[arg(short, long)]
        model_dir: Option<PathBuf>,

        /// Artifact directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,

        /// Limit test samples per variant
        #[arg(long)]
        max_test_samples: Option<usize>,

        /// Save the report as JSON
        #[arg(short, long)]
        report: Option<PathBuf>,
    },

    /// Show dataset statistics
    Stats {
        #[command(flatten)]
        data: DatasetArgs,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::verbose()
    } else {
        LogConfig::default()
    };

    let _ = init_logging(&log_config);

    print_banner();

    match cli.command {
        Commands::Train {
            data,
            epochs,
            batch_size,
            learning_rate,
            output_dir,
            seed,
            quick,
        } => {
            let config = TrainingConfig {
                epochs,
                batch_size,
                learning_rate,
                seed,
                max_train_samples: quick.then_some(500),
                ..TrainingConfig::default()
            };
            cmd_train(&data, &config, &output_dir)?;
        }

        Commands::Convert {
            data,
            model_dir,
            mode,
            output,
            calibration_samples,
        } => {
            let output =
                output.unwrap_or_else(|| PathBuf::from("output/artifacts").join(mode.file_name()));
            cmd_convert(&data, &model_dir, mode, &output, calibration_samples)?;
        }

        Commands::Benchmark {
            config,
            model_dir,
            output_dir,
            max_test_samples,
            report,
        } => {
            let mut pipeline = match config {
                Some(path) => PipelineConfig::load(&path)?,
                None => PipelineConfig::default(),
            };
            if let Some(dir) = model_dir {
                pipeline.model_dir = dir;
            }
            if let Some(dir) = output_dir {
                pipeline.output_dir = dir;
            }
            if max_test_samples.is_some() {
                pipeline.max_test_samples = max_test_samples;
            }
            if report.is_some() {
                pipeline.report_path = report;
            }
            run_pipeline(&pipeline)?;
        }

        Commands::Stats { data } => {
            cmd_stats(&data)?;
        }
    }

    Ok(())
}

fn print_banner() {
    println!(
        "{}",
        r#"
 ╔══════════════════════════════════════════════════════╗
 ║   tinyedge                                           ║
 ║   Edge conversion and benchmarking with Burn + Rust  ║
 ╚══════════════════════════════════════════════════════╝
  "#
        .green()
    );
}

fn cmd_train(data: &DatasetArgs, config: &TrainingConfig, output_dir: &Path) -> Result<()> {
    info!("Training on {:?}", data.dataset);
    let dataset = data.source().load().context("Failed to load dataset")?;
    let device = default_device();

    let summary = run_training::<TrainingBackend>(&dataset, config, output_dir, &device)?;
    info!("Final test accuracy {:.2}%", summary.test_accuracy);
    Ok(())
}

fn cmd_convert(
    data: &DatasetArgs,
    model_dir: &Path,
    mode: ConvertMode,
    output: &Path,
    calibration_samples: usize,
) -> Result<()> {
    println!("{}", "Conversion Configuration:".cyan().bold());
    println!("  Model:   {:?}", model_dir);
    println!("  Mode:    {:?}", mode);
    println!("  Output:  {:?}", output);
    println!("  Backend: {}", backend_name());
    println!();

    let device = default_device();
    let (model, model_config) = load_model::<DefaultBackend>(model_dir, &device)?;

    let size = if mode.needs_representative_dataset() {
        let dataset = data.source().load().context("Failed to load calibration data")?;
        let representative = RepresentativeDataset::new(&dataset.train, calibration_samples);
        convert_with_mode(&model, &model_config, mode, Some(representative), output)?
    } else {
        convert_with_mode(&model, &model_config, mode, None, output)?
    };

    println!(
        "{} {:?} ({})",
        "Wrote".green().bold(),
        output,
        format_bytes(size)
    );
    Ok(())
}

fn cmd_stats(data: &DatasetArgs) -> Result<()> {
    info!("Computing dataset statistics for {:?}", data.dataset);

    match data.source().load() {
        Ok(dataset) => dataset.stats().print(),
        Err(e) => {
            println!("{} Failed to load dataset: {}", "Error:".red(), e);
        }
    }

    Ok(())
}
