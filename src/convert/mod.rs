//! Model conversion
//!
//! - `lower`: burn model to a float graph
//! - `calibrate`: activation ranges over a representative dataset
//! - `quantize`: affine quantization arithmetic
//! - `converter`: the configurable front end producing artifact bytes
//! - `graph`: the artifact format itself

pub mod calibrate;
pub mod converter;
pub mod graph;
pub mod lower;
pub mod quantize;

pub use calibrate::{calibrate, CalibrationRange, MinMaxObserver};
pub use converter::{Converter, ConverterConfig, IoType, Optimization, SupportedOps};
pub use graph::{Buffer, DType, EdgeModel, Operator, Quantization, TensorSpec};
pub use quantize::QuantParams;

use std::path::Path;

use tracing::info;

use crate::utils::error::Result;
use crate::utils::format_bytes;

/// Write artifact bytes to `path`, returning the size on disk
pub fn write_artifact(bytes: &[u8], path: &Path) -> Result<u64> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;
    let size = std::fs::metadata(path)?.len();
    info!("Wrote {} ({})", path.display(), format_bytes(size));
    Ok(size)
}
