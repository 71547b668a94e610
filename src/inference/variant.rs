//! Model variants under benchmark
//!
//! Every variant is driven through the same three steps per sample:
//! `prepare` stages the input (reshape, quantize), `invoke` runs inference
//! and is the only timed call, `output` reads back a float vector
//! (dequantizing if needed).

use std::path::Path;

use burn::tensor::{backend::Backend, Tensor, TensorData};
use tracing::debug;

use crate::convert::graph::{Buffer, DType};
use crate::interpreter::{Interpreter, TensorDetails};
use crate::model::{load_model, model_file, EdgeClassifier, EdgeClassifierConfig};
use crate::utils::error::{EdgeError, Result};

/// Name of the burn model variant
pub const BASELINE: &str = "baseline";

/// Name of the plain converted variant
pub const CONVERTED: &str = "converted";

/// Name of the full-integer converted variant
pub const CONVERTED_QUANTIZED: &str = "converted-quantized";

/// A model that can be fed one sample at a time
pub trait InferenceTarget {
    fn name(&self) -> &str;

    /// Bytes of the persisted model file
    fn size_bytes(&self) -> u64;

    /// Stage one CHW sample as the model input
    fn prepare(&mut self, image: &[f32]) -> Result<()>;

    /// Run inference on the staged input
    fn invoke(&mut self) -> Result<()>;

    /// Float output vector of the last `invoke`
    fn output(&mut self) -> Result<Vec<f32>>;
}

/// The trained burn model
pub struct BaselineTarget<B: Backend> {
    name: String,
    model: EdgeClassifier<B>,
    device: B::Device,
    input_shape: [usize; 4],
    size_bytes: u64,
    staged: Option<Tensor<B, 4>>,
    result: Option<Tensor<B, 2>>,
}

impl<B: Backend> BaselineTarget<B> {
    pub fn new(
        model: EdgeClassifier<B>,
        config: &EdgeClassifierConfig,
        device: B::Device,
        size_bytes: u64,
    ) -> Self {
        Self {
            name: BASELINE.to_string(),
            model,
            device,
            input_shape: config.input_shape().batched(),
            size_bytes,
            staged: None,
            result: None,
        }
    }

    /// Load a saved model directory; size is that of its weights file
    pub fn from_dir(dir: &Path, device: &B::Device) -> Result<Self> {
        let (model, config) = load_model::<B>(dir, device)?;
        let size = std::fs::metadata(model_file(dir))?.len();
        Ok(Self::new(model, &config, device.clone(), size))
    }
}

impl<B: Backend> InferenceTarget for BaselineTarget<B> {
    fn name(&self) -> &str {
        &self.name
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn prepare(&mut self, image: &[f32]) -> Result<()> {
        let expected: usize = self.input_shape.iter().product();
        if image.len() != expected {
            return Err(EdgeError::ShapeMismatch {
                expected,
                actual: image.len(),
            });
        }
        let data = TensorData::new(image.to_vec(), self.input_shape);
        self.staged = Some(Tensor::from_floats(data, &self.device));
        Ok(())
    }

    fn invoke(&mut self) -> Result<()> {
        let input = self
            .staged
            .take()
            .ok_or_else(|| EdgeError::Interpreter("no input staged".into()))?;
        self.result = Some(self.model.forward(input));
        Ok(())
    }

    fn output(&mut self) -> Result<Vec<f32>> {
        let logits = self
            .result
            .take()
            .ok_or_else(|| EdgeError::Interpreter("invoke has not produced an output".into()))?;
        logits
            .into_data()
            .convert::<f32>()
            .to_vec::<f32>()
            .map_err(|e| EdgeError::Model(format!("Failed to read logits: {:?}", e)))
    }
}

/// A converted artifact run by the interpreter
pub struct InterpreterTarget {
    name: String,
    interpreter: Interpreter,
    input: TensorDetails,
    output: TensorDetails,
    size_bytes: u64,
}

impl InterpreterTarget {
    /// Wrap a decoded artifact and allocate its tensors
    pub fn new(
        name: impl Into<String>,
        mut interpreter: Interpreter,
        size_bytes: u64,
    ) -> Result<Self> {
        interpreter.allocate_tensors()?;

        let input = interpreter
            .input_details()
            .into_iter()
            .next()
            .ok_or_else(|| EdgeError::Interpreter("artifact declares no input".into()))?;
        let output = interpreter
            .output_details()
            .into_iter()
            .next()
            .ok_or_else(|| EdgeError::Interpreter("artifact declares no output".into()))?;

        let name = name.into();
        debug!(
            "{}: input {} {:?}, output {} {:?}",
            name, input.dtype, input.shape, output.dtype, output.shape
        );

        Ok(Self {
            name,
            interpreter,
            input,
            output,
            size_bytes,
        })
    }

    /// Load an artifact file; size is the file length
    pub fn from_file(name: impl Into<String>, path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        let size = bytes.len() as u64;
        Self::new(name, Interpreter::from_bytes(&bytes)?, size)
    }

    pub fn input_details(&self) -> &TensorDetails {
        &self.input
    }

    pub fn output_details(&self) -> &TensorDetails {
        &self.output
    }
}

fn affine_params(details: &TensorDetails) -> Result<crate::convert::QuantParams> {
    details.quantization.ok_or_else(|| {
        EdgeError::Interpreter(format!(
            "quantized tensor '{}' has no scale/zero-point",
            details.name
        ))
    })
}

impl InferenceTarget for InterpreterTarget {
    fn name(&self) -> &str {
        &self.name
    }

    fn size_bytes(&self) -> u64 {
        self.size_bytes
    }

    fn prepare(&mut self, image: &[f32]) -> Result<()> {
        let expected = self.input.num_elements();
        if image.len() != expected {
            return Err(EdgeError::ShapeMismatch {
                expected,
                actual: image.len(),
            });
        }

        let data = match self.input.dtype {
            DType::Float32 => Buffer::F32(image.to_vec()),
            DType::Uint8 => Buffer::U8(affine_params(&self.input)?.quantize_slice(image)),
            other => {
                return Err(EdgeError::TypeMismatch {
                    expected: "float32 or uint8 input".into(),
                    actual: other.to_string(),
                })
            }
        };
        self.interpreter.set_tensor(self.input.index, data)
    }

    fn invoke(&mut self) -> Result<()> {
        self.interpreter.invoke()
    }

    fn output(&mut self) -> Result<Vec<f32>> {
        let buffer = self.interpreter.tensor(self.output.index)?;
        match buffer {
            Buffer::F32(values) => Ok(values.clone()),
            Buffer::U8(codes) => Ok(affine_params(&self.output)?.dequantize_slice(codes)),
            other => Err(EdgeError::TypeMismatch {
                expected: "float32 or uint8 output".into(),
                actual: other.dtype().to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::{Converter, ConverterConfig};
    use crate::dataset::{DatasetSplit, ImageShape, RepresentativeDataset, Sample};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_model() -> (EdgeClassifier<TestBackend>, EdgeClassifierConfig) {
        let config = EdgeClassifierConfig::new()
            .with_input_size(4)
            .with_num_classes(2)
            .with_conv_filters(vec![2])
            .with_hidden_units(4);
        (config.init(&Default::default()), config)
    }

    #[test]
    fn test_baseline_rejects_wrong_size() {
        let (model, config) = small_model();
        let mut target = BaselineTarget::new(model, &config, Default::default(), 0);
        assert!(matches!(
            target.prepare(&[0.0; 5]),
            Err(EdgeError::ShapeMismatch { expected: 16, actual: 5 })
        ));
    }

    #[test]
    fn test_baseline_output_before_invoke() {
        let (model, config) = small_model();
        let mut target = BaselineTarget::new(model, &config, Default::default(), 0);
        assert!(target.output().is_err());

        target.prepare(&[0.5; 16]).unwrap();
        target.invoke().unwrap();
        assert_eq!(target.output().unwrap().len(), 2);
    }

    #[test]
    fn test_quantized_target_dequantizes_output() {
        let (model, config) = small_model();
        let samples = (0..4).map(|i| Sample::new(vec![i as f32 / 4.0; 16], i % 2)).collect();
        let split = DatasetSplit::new("train", ImageShape::square(1, 4), samples).unwrap();

        let bytes = Converter::from_model(&model, &config)
            .with_config(ConverterConfig::full_integer())
            .with_representative_dataset(RepresentativeDataset::new(&split, 4))
            .convert()
            .unwrap();
        let interpreter = Interpreter::from_bytes(&bytes).unwrap();
        let mut target =
            InterpreterTarget::new(CONVERTED_QUANTIZED, interpreter, bytes.len() as u64).unwrap();

        assert_eq!(target.input_details().dtype, DType::Uint8);
        assert_eq!(target.size_bytes(), bytes.len() as u64);

        target.prepare(split.get(1).unwrap().image()).unwrap();
        target.invoke().unwrap();
        let out = target.output().unwrap();
        assert_eq!(out.len(), 2);
        assert!(out.iter().all(|v| v.is_finite()));

        assert!(matches!(
            target.prepare(&[0.0; 3]),
            Err(EdgeError::ShapeMismatch { expected: 16, actual: 3 })
        ));
    }
}
