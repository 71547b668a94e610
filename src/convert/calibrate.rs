//! Min/max calibration
//!
//! Runs the float graph over the representative dataset and records the
//! smallest and largest value every activation tensor takes. Observers keep
//! a running range, so the result is the global min/max over all samples.

use tracing::{debug, info};

use super::graph::{Buffer, EdgeModel};
use super::quantize::QuantParams;
use crate::dataset::RepresentativeDataset;
use crate::interpreter::Interpreter;
use crate::utils::error::{EdgeError, Result};
use crate::utils::logging::ProgressLogger;

/// Observed value range of one tensor
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CalibrationRange {
    pub min: f32,
    pub max: f32,
}

impl CalibrationRange {
    /// Asymmetric `u8` parameters for this range
    pub fn quant_params(&self) -> QuantParams {
        QuantParams::from_min_max(self.min, self.max)
    }
}

/// Running min/max per tensor
#[derive(Debug, Clone)]
pub struct MinMaxObserver {
    ranges: Vec<Option<CalibrationRange>>,
}

impl MinMaxObserver {
    pub fn new(num_tensors: usize) -> Self {
        Self {
            ranges: vec![None; num_tensors],
        }
    }

    /// Widen the range of tensor `index` to cover `values`
    pub fn observe(&mut self, index: usize, values: &[f32]) {
        let Some(slot) = self.ranges.get_mut(index) else {
            return;
        };
        for &v in values.iter().filter(|v| v.is_finite()) {
            match slot {
                Some(range) => {
                    range.min = range.min.min(v);
                    range.max = range.max.max(v);
                }
                None => *slot = Some(CalibrationRange { min: v, max: v }),
            }
        }
    }

    pub fn range(&self, index: usize) -> Option<CalibrationRange> {
        self.ranges.get(index).copied().flatten()
    }

    pub fn into_ranges(self) -> Vec<Option<CalibrationRange>> {
        self.ranges
    }
}

/// Observe every float activation of `model` over `dataset`
pub fn calibrate(
    model: &EdgeModel,
    dataset: &RepresentativeDataset<'_>,
) -> Result<Vec<Option<CalibrationRange>>> {
    if dataset.is_empty() {
        return Err(EdgeError::Conversion(
            "representative dataset yields no samples".into(),
        ));
    }

    let mut interpreter = Interpreter::new(model.clone())?;
    interpreter.allocate_tensors()?;

    let input = interpreter
        .input_details()
        .into_iter()
        .next()
        .ok_or_else(|| EdgeError::Conversion("graph has no input".into()))?;

    let expected_shape = dataset.input_shape();
    if input.shape != expected_shape {
        return Err(EdgeError::Conversion(format!(
            "representative samples are shaped {:?} but the model expects {:?}",
            expected_shape, input.shape
        )));
    }

    info!("Calibrating activation ranges on {} samples", dataset.len());
    let mut observer = MinMaxObserver::new(model.tensors.len());
    let mut progress = ProgressLogger::new("Calibration", dataset.len());

    for batch in dataset.iter() {
        interpreter.set_tensor(input.index, Buffer::F32(batch.data))?;
        interpreter.invoke_observed(|index, buffer| {
            if let Some(values) = buffer.as_f32() {
                observer.observe(index, values);
            }
        })?;
        progress.increment();
    }
    progress.finish();

    for (index, tensor) in model.tensors.iter().enumerate() {
        if let Some(range) = observer.range(index) {
            debug!("{:<24} [{:.4}, {:.4}]", tensor.name, range.min, range.max);
        }
    }

    Ok(observer.into_ranges())
}
