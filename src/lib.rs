//! # tinyedge
//!
//! Train a small image classifier with the Burn framework, convert it into a
//! portable edge artifact (plain and full-integer quantized), and benchmark
//! the three variants against a test split.
//!
//! ## Modules
//!
//! - `dataset`: IDX, image-folder and synthetic loaders, batching, representative samples
//! - `model`: CNN architecture built with Burn
//! - `training`: Supervised training loop
//! - `convert`: Lowering, calibration, quantization and the artifact format
//! - `interpreter`: Reference kernels and the allocate-then-invoke runtime
//! - `inference`: Benchmark targets, runner and report
//! - `pipeline`: The end-to-end conversion-and-benchmark run
//! - `utils`: Logging, metrics, and helper functions
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tinyedge::pipeline::{run_pipeline, PipelineConfig};
//!
//! let report = run_pipeline(&PipelineConfig::default())?;
//! report.print();
//! ```

pub mod backend;
pub mod convert;
pub mod dataset;
pub mod inference;
pub mod interpreter;
pub mod model;
pub mod pipeline;
pub mod training;
pub mod utils;

// Re-export commonly used items for convenience
pub use convert::{Converter, ConverterConfig, EdgeModel};
pub use dataset::{Dataset, DatasetSource, DatasetSplit, RepresentativeDataset};
pub use inference::{BenchmarkRecord, InferenceTarget, Report};
pub use interpreter::Interpreter;
pub use model::{EdgeClassifier, EdgeClassifierConfig};
pub use pipeline::{run_pipeline, PipelineConfig};
pub use training::TrainingConfig;
pub use utils::error::{EdgeError, Result};

/// Version of the library
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
