//! Inference module for benchmarking model variants
//!
//! This module provides:
//! - The `InferenceTarget` trait and the baseline/interpreter variants
//! - Latency measurement
//! - The per-variant benchmark run
//! - The comparison report

pub mod benchmark;
pub mod report;
pub mod runner;
pub mod variant;

// Re-export main types for convenience
pub use benchmark::{DeviceInfo, LatencyStats, Timer};
pub use report::Report;
pub use runner::{predict_split, run_benchmark, BenchmarkConfig, BenchmarkRecord};
pub use variant::{
    BaselineTarget, InferenceTarget, InterpreterTarget, BASELINE, CONVERTED, CONVERTED_QUANTIZED,
};
