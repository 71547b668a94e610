//! Model converter
//!
//! Turns a trained `EdgeClassifier` into an edge artifact. What comes out is
//! decided by a plain [`ConverterConfig`] value plus the presence of a
//! representative dataset:
//!
//! | optimization | representative | supported ops    | result                          |
//! |--------------|----------------|------------------|---------------------------------|
//! | `None`       | ignored        | `Builtins`       | float graph                     |
//! | `Default`    | no             | `Builtins`       | int8 weights, float activations |
//! | `Default`    | no             | `BuiltinsInt8`   | `MissingRepresentativeDataset`  |
//! | `Default`    | yes            | `BuiltinsInt8`   | full integer, strict            |
//! | `Default`    | yes            | `Builtins`       | integer with float fallback     |

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::calibrate::{calibrate, CalibrationRange};
use super::graph::{Buffer, DType, EdgeModel, GraphBuilder, Operator, Quantization, TensorSpec};
use super::lower::lower;
use super::quantize::{quantize_bias, quantize_per_channel, QuantParams};
use crate::dataset::RepresentativeDataset;
use crate::model::{EdgeClassifier, EdgeClassifierConfig};
use crate::utils::error::{EdgeError, Result};

use burn::tensor::backend::Backend;

/// Whether to apply post-training optimizations
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Optimization {
    None,
    Default,
}

/// Kernel set the converted graph may use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SupportedOps {
    /// Any builtin kernel, float included
    Builtins,
    /// 8-bit integer kernels only
    BuiltinsInt8,
}

/// Numeric type of a graph input or output
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IoType {
    Float32,
    Uint8,
}

impl IoType {
    pub fn dtype(&self) -> DType {
        match self {
            IoType::Float32 => DType::Float32,
            IoType::Uint8 => DType::Uint8,
        }
    }
}

/// Converter settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConverterConfig {
    pub optimization: Optimization,
    pub supported_ops: SupportedOps,
    pub inference_input_type: IoType,
    pub inference_output_type: IoType,
}

impl Default for ConverterConfig {
    fn default() -> Self {
        Self::plain()
    }
}

impl ConverterConfig {
    /// Structural conversion, float everywhere
    pub fn plain() -> Self {
        Self {
            optimization: Optimization::None,
            supported_ops: SupportedOps::Builtins,
            inference_input_type: IoType::Float32,
            inference_output_type: IoType::Float32,
        }
    }

    /// Int8 weights with float activations
    pub fn dynamic_range() -> Self {
        Self {
            optimization: Optimization::Default,
            ..Self::plain()
        }
    }

    /// Every op on 8-bit integer kernels, `u8` input and output
    pub fn full_integer() -> Self {
        Self {
            optimization: Optimization::Default,
            supported_ops: SupportedOps::BuiltinsInt8,
            inference_input_type: IoType::Uint8,
            inference_output_type: IoType::Uint8,
        }
    }

    /// Integer where possible, float kernels for the rest
    pub fn integer_with_float_fallback() -> Self {
        Self {
            optimization: Optimization::Default,
            supported_ops: SupportedOps::Builtins,
            inference_input_type: IoType::Float32,
            inference_output_type: IoType::Float32,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.optimization == Optimization::None {
            if self.supported_ops != SupportedOps::Builtins {
                return Err(EdgeError::Config(
                    "integer-only kernels require optimization Default".into(),
                ));
            }
            if self.inference_input_type != IoType::Float32
                || self.inference_output_type != IoType::Float32
            {
                return Err(EdgeError::Config(
                    "a plain conversion keeps float32 inputs and outputs".into(),
                ));
            }
        }
        Ok(())
    }
}

/// Converts a trained model into artifact bytes
pub struct Converter<'a, B: Backend> {
    model: &'a EdgeClassifier<B>,
    model_config: &'a EdgeClassifierConfig,
    config: ConverterConfig,
    representative_dataset: Option<RepresentativeDataset<'a>>,
    softmax_head: bool,
}

impl<'a, B: Backend> Converter<'a, B> {
    /// Converter for `model` with plain settings
    pub fn from_model(
        model: &'a EdgeClassifier<B>,
        model_config: &'a EdgeClassifierConfig,
    ) -> Self {
        Self {
            model,
            model_config,
            config: ConverterConfig::plain(),
            representative_dataset: None,
            softmax_head: false,
        }
    }

    pub fn with_config(mut self, config: ConverterConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_representative_dataset(mut self, dataset: RepresentativeDataset<'a>) -> Self {
        self.representative_dataset = Some(dataset);
        self
    }

    /// Append a softmax producing probabilities instead of logits
    pub fn with_softmax_head(mut self, enabled: bool) -> Self {
        self.softmax_head = enabled;
        self
    }

    pub fn config(&self) -> &ConverterConfig {
        &self.config
    }

    /// Convert to serialized artifact bytes
    pub fn convert(&self) -> Result<Vec<u8>> {
        self.convert_model()?.to_bytes()
    }

    /// Convert to an in-memory graph
    pub fn convert_model(&self) -> Result<EdgeModel> {
        self.config.validate()?;
        let float = lower(self.model, self.model_config, self.softmax_head)?;

        match (self.config.optimization, &self.representative_dataset) {
            (Optimization::None, _) => {
                info!("Plain conversion: {} operators", float.operators.len());
                Ok(float)
            }
            (Optimization::Default, None) => {
                if self.config.supported_ops == SupportedOps::BuiltinsInt8
                    || self.config.inference_input_type == IoType::Uint8
                    || self.config.inference_output_type == IoType::Uint8
                {
                    return Err(EdgeError::MissingRepresentativeDataset);
                }
                info!("Dynamic-range quantization of weights");
                quantize_weights(&float)
            }
            (Optimization::Default, Some(dataset)) => {
                let ranges = calibrate(&float, dataset)?;
                info!(
                    "Integer quantization ({})",
                    match self.config.supported_ops {
                        SupportedOps::BuiltinsInt8 => "int8 only",
                        SupportedOps::Builtins => "float fallback allowed",
                    }
                );
                quantize_full_integer(&float, &ranges, &self.config)
            }
        }
    }
}

/// Store conv and dense weights as per-channel int8, keep everything else
pub fn quantize_weights(float: &EdgeModel) -> Result<EdgeModel> {
    let mut model = float.clone();
    model.description = format!("{} (dynamic-range int8 weights)", float.description);

    for op in &float.operators {
        let weights = match *op {
            Operator::Conv2d { weights, .. } | Operator::FullyConnected { weights, .. } => weights,
            _ => continue,
        };

        let spec = &float.tensors[weights];
        let data = float.constant(weights).and_then(Buffer::as_f32);
        let (Some(buffer_index), Some(data)) = (spec.buffer, data) else {
            return Err(EdgeError::Conversion(format!(
                "weights '{}' are not float constants",
                spec.name
            )));
        };

        let channels = spec.shape.first().copied().unwrap_or(1);
        let q = quantize_per_channel(data, channels);
        model.buffers[buffer_index] = Buffer::I8(q.values);
        model.tensors[weights].dtype = DType::Int8;
        model.tensors[weights].quantization = Some(Quantization::PerChannel {
            zero_points: vec![0; q.scales.len()],
            scales: q.scales,
            axis: 0,
        });
    }

    model.validate()?;
    Ok(model)
}

/// Where a float-graph tensor lives in the graph being built
#[derive(Debug, Clone, Copy)]
struct Mapped {
    index: usize,
    quantized: bool,
}

struct IntegerRewriter<'m> {
    float: &'m EdgeModel,
    ranges: &'m [Option<CalibrationRange>],
    graph: GraphBuilder,
    mapped: Vec<Option<Mapped>>,
    params: Vec<Option<QuantParams>>,
}

impl<'m> IntegerRewriter<'m> {
    fn spec(&self, index: usize) -> &'m TensorSpec {
        &self.float.tensors[index]
    }

    fn params(&mut self, index: usize) -> Result<QuantParams> {
        if let Some(p) = self.params[index] {
            return Ok(p);
        }
        let range = self.ranges.get(index).copied().flatten().ok_or_else(|| {
            EdgeError::Conversion(format!(
                "no calibration range for tensor '{}'",
                self.spec(index).name
            ))
        })?;
        let p = range.quant_params();
        self.params[index] = Some(p);
        Ok(p)
    }

    fn mapped(&self, index: usize) -> Result<Mapped> {
        self.mapped[index].ok_or_else(|| {
            EdgeError::Conversion(format!(
                "tensor '{}' is used before it is produced",
                self.spec(index).name
            ))
        })
    }

    fn add_u8(&mut self, index: usize, suffix: &str) -> Result<usize> {
        let p = self.params(index)?;
        let spec = self.spec(index);
        Ok(self.graph.activation(
            format!("{}{}", spec.name, suffix),
            spec.shape.clone(),
            DType::Uint8,
            Some(Quantization::PerTensor(p)),
        ))
    }

    fn add_f32(&mut self, index: usize, suffix: &str) -> usize {
        let spec = self.spec(index);
        self.graph.activation(
            format!("{}{}", spec.name, suffix),
            spec.shape.clone(),
            DType::Float32,
            None,
        )
    }

    /// Quantized form of float tensor `index`, inserting a Quantize if needed
    fn quantized(&mut self, index: usize) -> Result<usize> {
        let m = self.mapped(index)?;
        if m.quantized {
            return Ok(m.index);
        }
        let q = self.add_u8(index, "/quant")?;
        self.graph.operator(Operator::Quantize {
            input: m.index,
            output: q,
        });
        self.mapped[index] = Some(Mapped {
            index: q,
            quantized: true,
        });
        Ok(q)
    }

    /// Float form of tensor `index`, inserting a Dequantize if needed
    fn dequantized(&mut self, index: usize) -> Result<usize> {
        let m = self.mapped(index)?;
        if !m.quantized {
            return Ok(m.index);
        }
        let f = self.add_f32(index, "/dequant");
        self.graph.operator(Operator::Dequantize {
            input: m.index,
            output: f,
        });
        Ok(f)
    }

    fn float_constant(&self, index: usize) -> Result<&'m [f32]> {
        self.float
            .constant(index)
            .and_then(Buffer::as_f32)
            .ok_or_else(|| {
                EdgeError::Conversion(format!(
                    "tensor '{}' is not a float constant",
                    self.spec(index).name
                ))
            })
    }

    /// Int8 weights and int32 bias for a conv or dense op
    fn quantize_parameters(
        &mut self,
        input_scale: f32,
        weights: usize,
        bias: usize,
    ) -> Result<(usize, usize)> {
        let w_spec = self.spec(weights);
        let channels = w_spec.shape.first().copied().unwrap_or(1);
        let qw = quantize_per_channel(self.float_constant(weights)?, channels);

        let bias_data = self.float_constant(bias)?;
        if bias_data.len() != channels {
            return Err(EdgeError::Conversion(format!(
                "bias '{}' has {} values for {} channels",
                self.spec(bias).name,
                bias_data.len(),
                channels
            )));
        }
        let qb = quantize_bias(bias_data, input_scale, &qw.scales);
        let bias_scales: Vec<f32> = qw.scales.iter().map(|&s| s * input_scale).collect();

        let w = self.graph.constant(
            w_spec.name.clone(),
            w_spec.shape.clone(),
            Buffer::I8(qw.values),
            Some(Quantization::PerChannel {
                zero_points: vec![0; channels],
                scales: qw.scales,
                axis: 0,
            }),
        );
        let b_spec = self.spec(bias);
        let b = self.graph.constant(
            b_spec.name.clone(),
            b_spec.shape.clone(),
            Buffer::I32(qb),
            Some(Quantization::PerChannel {
                zero_points: vec![0; channels],
                scales: bias_scales,
                axis: 0,
            }),
        );
        Ok((w, b))
    }

    fn rewrite(&mut self, op: &Operator, strict: bool) -> Result<()> {
        match *op {
            Operator::Conv2d {
                input,
                weights,
                bias,
                output,
                stride,
                padding,
                activation,
            } => {
                let q_in = self.quantized(input)?;
                let in_scale = self.params(input)?.scale;
                let (w, b) = self.quantize_parameters(in_scale, weights, bias)?;
                let q_out = self.add_u8(output, "")?;
                self.graph.operator(Operator::Conv2d {
                    input: q_in,
                    weights: w,
                    bias: b,
                    output: q_out,
                    stride,
                    padding,
                    activation,
                });
                self.mapped[output] = Some(Mapped {
                    index: q_out,
                    quantized: true,
                });
            }

            Operator::FullyConnected {
                input,
                weights,
                bias,
                output,
                activation,
            } => {
                let q_in = self.quantized(input)?;
                let in_scale = self.params(input)?.scale;
                let (w, b) = self.quantize_parameters(in_scale, weights, bias)?;
                let q_out = self.add_u8(output, "")?;
                self.graph.operator(Operator::FullyConnected {
                    input: q_in,
                    weights: w,
                    bias: b,
                    output: q_out,
                    activation,
                });
                self.mapped[output] = Some(Mapped {
                    index: q_out,
                    quantized: true,
                });
            }

            Operator::MaxPool2d {
                input,
                output,
                kernel,
                stride,
            } => {
                let q_in = self.quantized(input)?;
                let p = self.params(input)?;
                self.params[output] = Some(p);
                let q_out = self.add_u8(output, "")?;
                self.graph.operator(Operator::MaxPool2d {
                    input: q_in,
                    output: q_out,
                    kernel,
                    stride,
                });
                self.mapped[output] = Some(Mapped {
                    index: q_out,
                    quantized: true,
                });
            }

            Operator::Reshape { input, output } => {
                let q_in = self.quantized(input)?;
                let p = self.params(input)?;
                self.params[output] = Some(p);
                let q_out = self.add_u8(output, "")?;
                self.graph.operator(Operator::Reshape {
                    input: q_in,
                    output: q_out,
                });
                self.mapped[output] = Some(Mapped {
                    index: q_out,
                    quantized: true,
                });
            }

            Operator::Softmax { input, output } => {
                if strict {
                    return Err(EdgeError::UnsupportedOperation {
                        op: op.name().to_string(),
                        precision: "int8".to_string(),
                    });
                }
                debug!("Softmax falls back to float kernels");
                let f_in = self.dequantized(input)?;
                let f_out = self.add_f32(output, "");
                self.graph.operator(Operator::Softmax {
                    input: f_in,
                    output: f_out,
                });
                self.mapped[output] = Some(Mapped {
                    index: f_out,
                    quantized: false,
                });
            }

            Operator::Quantize { .. } | Operator::Dequantize { .. } => {
                return Err(EdgeError::Conversion(format!(
                    "{} is not expected in a float graph",
                    op.name()
                )));
            }
        }
        Ok(())
    }
}

/// Rewrite a float graph onto integer kernels using calibrated ranges
pub fn quantize_full_integer(
    float: &EdgeModel,
    ranges: &[Option<CalibrationRange>],
    config: &ConverterConfig,
) -> Result<EdgeModel> {
    let strict = config.supported_ops == SupportedOps::BuiltinsInt8;
    let mut rw = IntegerRewriter {
        float,
        ranges,
        graph: GraphBuilder::new(format!("{} (full-integer)", float.description)),
        mapped: vec![None; float.tensors.len()],
        params: vec![None; float.tensors.len()],
    };

    for &input in &float.inputs {
        let index = match config.inference_input_type {
            IoType::Uint8 => rw.add_u8(input, "")?,
            IoType::Float32 => rw.add_f32(input, ""),
        };
        rw.graph.input(index);
        rw.mapped[input] = Some(Mapped {
            index,
            quantized: config.inference_input_type == IoType::Uint8,
        });
    }

    for op in &float.operators {
        rw.rewrite(op, strict)?;
    }

    for &output in &float.outputs {
        let index = match config.inference_output_type {
            IoType::Uint8 => rw.quantized(output)?,
            IoType::Float32 => rw.dequantized(output)?,
        };
        rw.graph.output(index);
    }

    let model = rw.graph.finish()?;
    info!(
        "Integer graph: {} operators, {} constant bytes",
        model.operators.len(),
        model.constant_bytes()
    );
    Ok(model)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::{DatasetSplit, ImageShape, Sample};
    use crate::interpreter::Interpreter;
    use crate::utils::metrics::argmax;
    use burn::tensor::{Tensor, TensorData};
    use burn_ndarray::NdArray;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    type TestBackend = NdArray;

    fn setup() -> (EdgeClassifier<TestBackend>, EdgeClassifierConfig, DatasetSplit) {
        let config = EdgeClassifierConfig::new()
            .with_input_size(8)
            .with_num_classes(3)
            .with_conv_filters(vec![4, 8])
            .with_hidden_units(16);
        let model = config.init::<TestBackend>(&Default::default());

        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let samples = (0..12)
            .map(|i| Sample::new((0..64).map(|_| rng.gen_range(0.0f32..1.0)).collect(), i % 3))
            .collect();
        let split = DatasetSplit::new("train", ImageShape::square(1, 8), samples).unwrap();
        (model, config, split)
    }

    fn burn_logits(model: &EdgeClassifier<TestBackend>, image: &[f32]) -> Vec<f32> {
        let input = Tensor::<TestBackend, 4>::from_floats(
            TensorData::new(image.to_vec(), [1, 1, 8, 8]),
            &Default::default(),
        );
        model.forward(input).into_data().to_vec::<f32>().unwrap()
    }

    fn run_f32(bytes: &[u8], image: &[f32]) -> Vec<f32> {
        let mut interpreter = Interpreter::from_bytes(bytes).unwrap();
        interpreter.allocate_tensors().unwrap();
        let input = interpreter.input_details()[0].index;
        let output = interpreter.output_details()[0].index;
        interpreter.set_tensor(input, Buffer::F32(image.to_vec())).unwrap();
        interpreter.invoke().unwrap();
        interpreter.tensor(output).unwrap().as_f32().unwrap().to_vec()
    }

    #[test]
    fn test_plain_matches_burn() {
        let (model, config, split) = setup();
        let bytes = Converter::from_model(&model, &config).convert().unwrap();

        for sample in split.iter() {
            let expected = burn_logits(&model, sample.image());
            let actual = run_f32(&bytes, sample.image());
            for (e, a) in expected.iter().zip(actual.iter()) {
                assert!((e - a).abs() < 1e-3, "burn {:?} vs artifact {:?}", expected, actual);
            }
        }
    }

    #[test]
    fn test_plain_rejects_integer_io() {
        let (model, config, _) = setup();
        let bad = ConverterConfig {
            inference_input_type: IoType::Uint8,
            ..ConverterConfig::plain()
        };
        let result = Converter::from_model(&model, &config).with_config(bad).convert();
        assert!(matches!(result, Err(EdgeError::Config(_))));
    }

    #[test]
    fn test_full_integer_requires_representative_dataset() {
        let (model, config, _) = setup();
        let result = Converter::from_model(&model, &config)
            .with_config(ConverterConfig::full_integer())
            .convert();
        assert!(matches!(result, Err(EdgeError::MissingRepresentativeDataset)));
    }

    #[test]
    fn test_full_integer_io_and_size() {
        let (model, config, split) = setup();
        let plain = Converter::from_model(&model, &config).convert().unwrap();
        let quant = Converter::from_model(&model, &config)
            .with_config(ConverterConfig::full_integer())
            .with_representative_dataset(RepresentativeDataset::new(&split, 10))
            .convert()
            .unwrap();

        assert!(quant.len() < plain.len());

        let interpreter = Interpreter::from_bytes(&quant).unwrap();
        let input = &interpreter.input_details()[0];
        let output = &interpreter.output_details()[0];
        assert_eq!(input.dtype, DType::Uint8);
        assert_eq!(output.dtype, DType::Uint8);
        assert!(input.quantization.is_some());
        assert!(output.quantization.is_some());

        // every operator runs on integer data
        let model = interpreter.model();
        for op in &model.operators {
            assert_eq!(model.tensors[op.output()].dtype, DType::Uint8, "{}", op.name());
        }
    }

    #[test]
    fn test_full_integer_tracks_float_predictions() {
        let (model, config, split) = setup();
        let plain = Converter::from_model(&model, &config).convert().unwrap();
        let quant = Converter::from_model(&model, &config)
            .with_config(ConverterConfig::full_integer())
            .with_representative_dataset(RepresentativeDataset::new(&split, 12))
            .convert()
            .unwrap();

        let mut interpreter = Interpreter::from_bytes(&quant).unwrap();
        interpreter.allocate_tensors().unwrap();
        let input = interpreter.input_details()[0].clone();
        let output = interpreter.output_details()[0].clone();
        let in_q = input.quantization.unwrap();
        let out_q = output.quantization.unwrap();

        for sample in split.iter() {
            let float_out = run_f32(&plain, sample.image());
            interpreter
                .set_tensor(input.index, Buffer::U8(in_q.quantize_slice(sample.image())))
                .unwrap();
            interpreter.invoke().unwrap();
            let codes = interpreter.tensor(output.index).unwrap().as_u8().unwrap();
            let quant_out = out_q.dequantize_slice(codes);

            let spread = float_out.iter().fold(0.0f32, |m, v| m.max(v.abs())).max(1e-3);
            for (f, q) in float_out.iter().zip(quant_out.iter()) {
                assert!(
                    (f - q).abs() <= 0.1 * spread + 2.0 * out_q.scale,
                    "{:?} vs {:?}",
                    float_out,
                    quant_out
                );
            }
        }
    }

    #[test]
    fn test_strict_int8_rejects_softmax() {
        let (model, config, split) = setup();
        let result = Converter::from_model(&model, &config)
            .with_config(ConverterConfig::full_integer())
            .with_representative_dataset(RepresentativeDataset::new(&split, 4))
            .with_softmax_head(true)
            .convert();

        match result {
            Err(EdgeError::UnsupportedOperation { op, precision }) => {
                assert_eq!(op, "Softmax");
                assert_eq!(precision, "int8");
            }
            other => panic!("expected UnsupportedOperation, got {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn test_float_fallback_runs_softmax() {
        let (model, config, split) = setup();
        let bytes = Converter::from_model(&model, &config)
            .with_config(ConverterConfig::integer_with_float_fallback())
            .with_representative_dataset(RepresentativeDataset::new(&split, 4))
            .with_softmax_head(true)
            .convert()
            .unwrap();

        let graph = EdgeModel::from_bytes(&bytes).unwrap();
        let names: Vec<_> = graph.operators.iter().map(|op| op.name()).collect();
        assert_eq!(names.first(), Some(&"Quantize"));
        assert!(names.contains(&"Dequantize"));
        assert_eq!(names.last(), Some(&"Softmax"));

        let probs = run_f32(&bytes, split.get(0).unwrap().image());
        let sum: f32 = probs.iter().sum();
        assert!((sum - 1.0).abs() < 1e-4);
        assert!(argmax(&probs).is_some());
    }

    #[test]
    fn test_dynamic_range_keeps_float_io() {
        let (model, config, split) = setup();
        let bytes = Converter::from_model(&model, &config)
            .with_config(ConverterConfig::dynamic_range())
            .convert()
            .unwrap();
        let graph = EdgeModel::from_bytes(&bytes).unwrap();
        assert!(graph.tensors.iter().any(|t| t.dtype == DType::Int8));

        let sample = split.get(0).unwrap().image();
        let expected = burn_logits(&model, sample);
        let actual = run_f32(&bytes, sample);
        assert_eq!(expected.len(), actual.len());
    }
}
