//! Edge model interpreter
//!
//! Executes an [`EdgeModel`] on the CPU with an allocate-then-invoke
//! lifecycle:
//!
//! ```text
//! Interpreter::from_file(path)?
//!     → allocate_tensors()      plans the arena, prepares every kernel
//!     → set_tensor(input, ..)   per sample
//!     → invoke()                runs the operators in order
//!     → tensor(output)          reads the result
//! ```
//!
//! Float and integer kernels are selected per operator from the dtypes of
//! its tensors. Int8 weights feeding a float operator are dequantized once
//! during allocation.

pub mod kernels;

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::convert::graph::{
    Activation, Buffer, DType, EdgeModel, Operator, Padding, Quantization,
};
use crate::convert::quantize::{
    dequantize_per_channel, QuantParams, QuantizedMultiplier, U8_MAX, U8_MIN,
};
use crate::utils::error::{EdgeError, Result};

use kernels::{Conv2dGeometry, QuantizedKernelParams};

/// What a caller needs to feed or read a graph input/output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorDetails {
    pub name: String,
    pub index: usize,
    pub shape: Vec<usize>,
    pub dtype: DType,
    /// Per-tensor (scale, zero-point) for quantized tensors
    pub quantization: Option<QuantParams>,
}

impl TensorDetails {
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }
}

/// A prepared operator
#[derive(Debug)]
enum Kernel {
    ConvF32 {
        geo: Conv2dGeometry,
        input: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
        relu: bool,
        output: usize,
    },
    ConvU8 {
        geo: Conv2dGeometry,
        input: usize,
        weights: Vec<i8>,
        bias: Vec<i32>,
        params: QuantizedKernelParams,
        output: usize,
    },
    MaxPool {
        geo: Conv2dGeometry,
        input: usize,
        output: usize,
    },
    Copy {
        input: usize,
        output: usize,
    },
    DenseF32 {
        input: usize,
        weights: Vec<f32>,
        bias: Vec<f32>,
        in_features: usize,
        out_features: usize,
        relu: bool,
        output: usize,
    },
    DenseU8 {
        input: usize,
        weights: Vec<i8>,
        bias: Vec<i32>,
        in_features: usize,
        out_features: usize,
        params: QuantizedKernelParams,
        output: usize,
    },
    Softmax {
        input: usize,
        classes: usize,
        output: usize,
    },
    Quantize {
        input: usize,
        params: QuantParams,
        output: usize,
    },
    Dequantize {
        input: usize,
        params: QuantParams,
        output: usize,
    },
}

impl Kernel {
    fn output(&self) -> usize {
        match *self {
            Kernel::ConvF32 { output, .. }
            | Kernel::ConvU8 { output, .. }
            | Kernel::MaxPool { output, .. }
            | Kernel::Copy { output, .. }
            | Kernel::DenseF32 { output, .. }
            | Kernel::DenseU8 { output, .. }
            | Kernel::Softmax { output, .. }
            | Kernel::Quantize { output, .. }
            | Kernel::Dequantize { output, .. } => output,
        }
    }
}

/// Activation storage and prepared kernels, created by `allocate_tensors`
#[derive(Debug)]
struct Arena {
    tensors: Vec<Buffer>,
    kernels: Vec<Kernel>,
}

/// Runs a converted model
#[derive(Debug)]
pub struct Interpreter {
    model: EdgeModel,
    arena: Option<Arena>,
}

fn interp_err(msg: impl Into<String>) -> EdgeError {
    EdgeError::Interpreter(msg.into())
}

impl Interpreter {
    /// Wrap a decoded model
    pub fn new(model: EdgeModel) -> Result<Self> {
        model.validate()?;
        Ok(Self { model, arena: None })
    }

    /// Decode artifact bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::new(EdgeModel::from_bytes(bytes)?)
    }

    /// Read and decode an artifact file
    pub fn from_file(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn model(&self) -> &EdgeModel {
        &self.model
    }

    pub fn is_allocated(&self) -> bool {
        self.arena.is_some()
    }

    /// Allocate activation buffers and prepare kernels
    pub fn allocate_tensors(&mut self) -> Result<()> {
        let tensors = self
            .model
            .tensors
            .iter()
            .map(|t| {
                if t.is_constant() {
                    Buffer::zeros(t.dtype, 0)
                } else {
                    Buffer::zeros(t.dtype, t.num_elements())
                }
            })
            .collect();

        let kernels = self
            .model
            .operators
            .iter()
            .map(|op| self.prepare(op))
            .collect::<Result<Vec<_>>>()?;

        debug!(
            "Allocated {} tensors and {} kernels ({} activation bytes)",
            self.model.tensors.len(),
            kernels.len(),
            self.activation_bytes()
        );

        self.arena = Some(Arena { tensors, kernels });
        Ok(())
    }

    /// Bytes needed for non-constant tensors
    pub fn activation_bytes(&self) -> usize {
        self.model
            .tensors
            .iter()
            .filter(|t| !t.is_constant())
            .map(|t| t.num_elements() * t.dtype.size_bytes())
            .sum()
    }

    fn details(&self, index: usize) -> TensorDetails {
        let spec = &self.model.tensors[index];
        TensorDetails {
            name: spec.name.clone(),
            index,
            shape: spec.shape.clone(),
            dtype: spec.dtype,
            quantization: spec.quantization.as_ref().and_then(Quantization::per_tensor),
        }
    }

    pub fn input_details(&self) -> Vec<TensorDetails> {
        self.model.inputs.iter().map(|&i| self.details(i)).collect()
    }

    pub fn output_details(&self) -> Vec<TensorDetails> {
        self.model.outputs.iter().map(|&i| self.details(i)).collect()
    }

    /// Copy `data` into tensor `index`
    pub fn set_tensor(&mut self, index: usize, data: Buffer) -> Result<()> {
        let arena = self.arena.as_mut().ok_or(EdgeError::TensorsNotAllocated)?;
        let spec = self
            .model
            .tensors
            .get(index)
            .ok_or_else(|| interp_err(format!("no tensor {}", index)))?;

        if spec.is_constant() {
            return Err(interp_err(format!("tensor '{}' is a constant", spec.name)));
        }
        if data.dtype() != spec.dtype {
            return Err(EdgeError::TypeMismatch {
                expected: spec.dtype.to_string(),
                actual: data.dtype().to_string(),
            });
        }
        if data.len() != spec.num_elements() {
            return Err(EdgeError::ShapeMismatch {
                expected: spec.num_elements(),
                actual: data.len(),
            });
        }

        arena.tensors[index] = data;
        Ok(())
    }

    /// Current contents of tensor `index`
    pub fn tensor(&self, index: usize) -> Result<&Buffer> {
        let arena = self.arena.as_ref().ok_or(EdgeError::TensorsNotAllocated)?;
        if let Some(constant) = self.model.constant(index) {
            return Ok(constant);
        }
        arena
            .tensors
            .get(index)
            .ok_or_else(|| interp_err(format!("no tensor {}", index)))
    }

    /// Run every operator once
    pub fn invoke(&mut self) -> Result<()> {
        self.invoke_observed(|_, _| {})
    }

    /// Run every operator, handing each produced tensor to `observer`
    ///
    /// Graph inputs are reported first.
    pub fn invoke_observed<F>(&mut self, mut observer: F) -> Result<()>
    where
        F: FnMut(usize, &Buffer),
    {
        let arena = self.arena.as_mut().ok_or(EdgeError::TensorsNotAllocated)?;

        for &input in &self.model.inputs {
            observer(input, &arena.tensors[input]);
        }

        for kernel in &arena.kernels {
            let out = kernel.output();
            let mut output = std::mem::replace(&mut arena.tensors[out], Buffer::F32(Vec::new()));
            let result = run_kernel(kernel, &arena.tensors, &mut output);
            arena.tensors[out] = output;
            result?;
            observer(out, &arena.tensors[out]);
        }

        Ok(())
    }

    fn prepare(&self, op: &Operator) -> Result<Kernel> {
        let spec = |i: usize| &self.model.tensors[i];
        if op.inputs().contains(&op.output()) {
            return Err(interp_err(format!("{} writes into its own input", op.name())));
        }

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
                let (i, w, o) = (spec(input), spec(weights), spec(output));
                let [n, c, h, wd] = dims4(&i.shape, "Conv2d input")?;
                let [oc, wc, kh, kw] = dims4(&w.shape, "Conv2d weights")?;
                let [on, ooc, oh, ow] = dims4(&o.shape, "Conv2d output")?;
                if wc != c || ooc != oc || on != n || kh != kw || stride == 0 {
                    return Err(interp_err("Conv2d tensor shapes do not line up"));
                }

                let (expected_h, expected_w, pad_top, pad_left) = match padding {
                    Padding::Same => {
                        let eh = h.div_ceil(stride);
                        let ew = wd.div_ceil(stride);
                        (
                            eh,
                            ew,
                            kernels::same_padding(h, eh, kh, stride),
                            kernels::same_padding(wd, ew, kw, stride),
                        )
                    }
                    Padding::Valid => {
                        if h < kh || wd < kw {
                            return Err(interp_err("Conv2d kernel is larger than its input"));
                        }
                        ((h - kh) / stride + 1, (wd - kw) / stride + 1, 0, 0)
                    }
                };
                if (oh, ow) != (expected_h, expected_w) {
                    return Err(interp_err(format!(
                        "Conv2d output is {}x{}, expected {}x{}",
                        oh, ow, expected_h, expected_w
                    )));
                }

                let geo = Conv2dGeometry {
                    batch: n,
                    in_channels: c,
                    in_height: h,
                    in_width: wd,
                    out_channels: oc,
                    out_height: oh,
                    out_width: ow,
                    kernel: kh,
                    stride,
                    pad_top,
                    pad_left,
                };

                match (i.dtype, o.dtype) {
                    (DType::Float32, DType::Float32) => Ok(Kernel::ConvF32 {
                        geo,
                        input,
                        weights: self.float_weights(weights)?,
                        bias: self.constant_f32(bias, oc)?,
                        relu: activation == Activation::Relu,
                        output,
                    }),
                    (DType::Uint8, DType::Uint8) => {
                        let (weights, bias, params) =
                            self.integer_params(input, weights, bias, output, oc, activation)?;
                        Ok(Kernel::ConvU8 {
                            geo,
                            input,
                            weights,
                            bias,
                            params,
                            output,
                        })
                    }
                    (a, b) => Err(interp_err(format!("no Conv2d kernel for {} -> {}", a, b))),
                }
            }

            Operator::MaxPool2d {
                input,
                output,
                kernel,
                stride,
            } => {
                let (i, o) = (spec(input), spec(output));
                let [n, c, h, w] = dims4(&i.shape, "MaxPool2d input")?;
                let [on, oc, oh, ow] = dims4(&o.shape, "MaxPool2d output")?;
                if i.dtype != o.dtype || !matches!(i.dtype, DType::Float32 | DType::Uint8) {
                    return Err(interp_err(format!(
                        "no MaxPool2d kernel for {} -> {}",
                        i.dtype, o.dtype
                    )));
                }
                if stride == 0 || kernel == 0 || h < kernel || w < kernel {
                    return Err(interp_err("MaxPool2d window does not fit its input"));
                }
                if (on, oc) != (n, c)
                    || (oh, ow) != ((h - kernel) / stride + 1, (w - kernel) / stride + 1)
                {
                    return Err(interp_err("MaxPool2d output shape does not match its input"));
                }
                if i.quantization != o.quantization {
                    return Err(interp_err("MaxPool2d must keep its input quantization"));
                }

                Ok(Kernel::MaxPool {
                    geo: Conv2dGeometry {
                        batch: n,
                        in_channels: c,
                        in_height: h,
                        in_width: w,
                        out_channels: c,
                        out_height: oh,
                        out_width: ow,
                        kernel,
                        stride,
                        pad_top: 0,
                        pad_left: 0,
                    },
                    input,
                    output,
                })
            }

            Operator::Reshape { input, output } => {
                let (i, o) = (spec(input), spec(output));
                if i.dtype != o.dtype || i.num_elements() != o.num_elements() {
                    return Err(interp_err(format!(
                        "cannot reshape {:?} {} into {:?} {}",
                        i.shape, i.dtype, o.shape, o.dtype
                    )));
                }
                Ok(Kernel::Copy { input, output })
            }

            Operator::FullyConnected {
                input,
                weights,
                bias,
                output,
                activation,
            } => {
                let (i, w, o) = (spec(input), spec(weights), spec(output));
                if w.shape.len() != 2 {
                    return Err(interp_err("FullyConnected weights must be [out, in]"));
                }
                let (out_features, in_features) = (w.shape[0], w.shape[1]);
                let batch = i.num_elements() / in_features.max(1);
                if i.num_elements() != batch * in_features
                    || o.num_elements() != batch * out_features
                {
                    return Err(interp_err("FullyConnected tensor shapes do not line up"));
                }

                match (i.dtype, o.dtype) {
                    (DType::Float32, DType::Float32) => Ok(Kernel::DenseF32 {
                        input,
                        weights: self.float_weights(weights)?,
                        bias: self.constant_f32(bias, out_features)?,
                        in_features,
                        out_features,
                        relu: activation == Activation::Relu,
                        output,
                    }),
                    (DType::Uint8, DType::Uint8) => {
                        let (weights, bias, params) = self.integer_params(
                            input,
                            weights,
                            bias,
                            output,
                            out_features,
                            activation,
                        )?;
                        Ok(Kernel::DenseU8 {
                            input,
                            weights,
                            bias,
                            in_features,
                            out_features,
                            params,
                            output,
                        })
                    }
                    (a, b) => Err(interp_err(format!(
                        "no FullyConnected kernel for {} -> {}",
                        a, b
                    ))),
                }
            }

            Operator::Softmax { input, output } => {
                let (i, o) = (spec(input), spec(output));
                if i.dtype != DType::Float32 || o.dtype != DType::Float32 {
                    return Err(interp_err(format!(
                        "no Softmax kernel for {} -> {}",
                        i.dtype, o.dtype
                    )));
                }
                if i.num_elements() != o.num_elements() {
                    return Err(interp_err("Softmax output shape does not match its input"));
                }
                Ok(Kernel::Softmax {
                    input,
                    classes: i.shape.last().copied().unwrap_or(1),
                    output,
                })
            }

            Operator::Quantize { input, output } => {
                let (i, o) = (spec(input), spec(output));
                if i.dtype != DType::Float32 || o.dtype != DType::Uint8 {
                    return Err(interp_err(format!(
                        "no Quantize kernel for {} -> {}",
                        i.dtype, o.dtype
                    )));
                }
                if i.num_elements() != o.num_elements() {
                    return Err(interp_err("Quantize output shape does not match its input"));
                }
                Ok(Kernel::Quantize {
                    input,
                    params: self.per_tensor(output)?,
                    output,
                })
            }

            Operator::Dequantize { input, output } => {
                let (i, o) = (spec(input), spec(output));
                if i.dtype != DType::Uint8 || o.dtype != DType::Float32 {
                    return Err(interp_err(format!(
                        "no Dequantize kernel for {} -> {}",
                        i.dtype, o.dtype
                    )));
                }
                if i.num_elements() != o.num_elements() {
                    return Err(interp_err("Dequantize output shape does not match its input"));
                }
                Ok(Kernel::Dequantize {
                    input,
                    params: self.per_tensor(input)?,
                    output,
                })
            }
        }
    }

    fn per_tensor(&self, index: usize) -> Result<QuantParams> {
        let spec = &self.model.tensors[index];
        spec.quantization
            .as_ref()
            .and_then(Quantization::per_tensor)
            .ok_or_else(|| {
                interp_err(format!("tensor '{}' needs per-tensor quantization", spec.name))
            })
    }

    fn constant_buffer(&self, index: usize) -> Result<&Buffer> {
        self.model
            .constant(index)
            .ok_or_else(|| {
                let name = &self.model.tensors[index].name;
                interp_err(format!("tensor '{}' must be a constant", name))
            })
    }

    fn constant_f32(&self, index: usize, len: usize) -> Result<Vec<f32>> {
        let data = self
            .constant_buffer(index)?
            .as_f32()
            .ok_or_else(|| {
                let name = &self.model.tensors[index].name;
                interp_err(format!("tensor '{}' must be float32", name))
            })?;
        if data.len() != len {
            return Err(interp_err(format!(
                "tensor '{}' has {} values, expected {}",
                self.model.tensors[index].name,
                data.len(),
                len
            )));
        }
        Ok(data.to_vec())
    }

    /// Float weights, dequantizing int8 weights if needed
    fn float_weights(&self, index: usize) -> Result<Vec<f32>> {
        let spec = &self.model.tensors[index];
        match self.constant_buffer(index)? {
            Buffer::F32(data) => Ok(data.clone()),
            Buffer::I8(data) => {
                let scales = match &spec.quantization {
                    Some(Quantization::PerChannel { scales, axis: 0, .. }) => scales.clone(),
                    Some(Quantization::PerTensor(params)) if params.zero_point == 0 => {
                        vec![params.scale; spec.shape.first().copied().unwrap_or(1)]
                    }
                    _ => {
                        return Err(interp_err(format!(
                            "int8 weights '{}' need symmetric quantization along axis 0",
                            spec.name
                        )))
                    }
                };
                Ok(dequantize_per_channel(data, &scales))
            }
            other => Err(interp_err(format!(
                "weights '{}' cannot be {}",
                spec.name,
                other.dtype()
            ))),
        }
    }

    /// Weights, bias and requantization parameters of an integer op
    fn integer_params(
        &self,
        input: usize,
        weights: usize,
        bias: usize,
        output: usize,
        channels: usize,
        activation: Activation,
    ) -> Result<(Vec<i8>, Vec<i32>, QuantizedKernelParams)> {
        let in_q = self.per_tensor(input)?;
        let out_q = self.per_tensor(output)?;

        let w_spec = &self.model.tensors[weights];
        let w_data = self
            .constant_buffer(weights)?
            .as_i8()
            .ok_or_else(|| interp_err(format!("weights '{}' must be int8", w_spec.name)))?;
        let w_scales = match &w_spec.quantization {
            Some(Quantization::PerChannel {
                scales,
                zero_points,
                axis: 0,
            }) if zero_points.iter().all(|&z| z == 0) => scales.clone(),
            Some(Quantization::PerTensor(params)) if params.zero_point == 0 => {
                vec![params.scale; channels]
            }
            _ => {
                return Err(interp_err(format!(
                    "weights '{}' need symmetric quantization along axis 0",
                    w_spec.name
                )))
            }
        };

        let bias_data = self
            .constant_buffer(bias)?
            .as_i32()
            .ok_or_else(|| {
                let name = &self.model.tensors[bias].name;
                interp_err(format!("bias '{}' must be int32", name))
            })?;

        if w_scales.len() != channels || bias_data.len() != channels {
            return Err(interp_err("per-channel parameters do not match the output channels"));
        }

        let multipliers = w_scales
            .iter()
            .map(|&ws| {
                QuantizedMultiplier::from_real(in_q.scale as f64 * ws as f64 / out_q.scale as f64)
            })
            .collect();

        let activation_min = match activation {
            Activation::Relu => out_q.zero_point.max(U8_MIN),
            Activation::None => U8_MIN,
        };

        Ok((
            w_data.to_vec(),
            bias_data.to_vec(),
            QuantizedKernelParams {
                input_zero_point: in_q.zero_point,
                output_zero_point: out_q.zero_point,
                multipliers,
                activation_min,
                activation_max: U8_MAX,
            },
        ))
    }
}

fn dims4(shape: &[usize], what: &str) -> Result<[usize; 4]> {
    match *shape {
        [a, b, c, d] => Ok([a, b, c, d]),
        _ => Err(interp_err(format!("{} must be rank 4, got {:?}", what, shape))),
    }
}

fn read_f32(tensors: &[Buffer], index: usize) -> Result<&[f32]> {
    tensors[index]
        .as_f32()
        .ok_or_else(|| interp_err(format!("tensor {} is not float32", index)))
}

fn read_u8(tensors: &[Buffer], index: usize) -> Result<&[u8]> {
    tensors[index]
        .as_u8()
        .ok_or_else(|| interp_err(format!("tensor {} is not uint8", index)))
}

fn run_kernel(kernel: &Kernel, tensors: &[Buffer], output: &mut Buffer) -> Result<()> {
    match (kernel, output) {
        (
            Kernel::ConvF32 {
                geo,
                input,
                weights,
                bias,
                relu,
                ..
            },
            Buffer::F32(out),
        ) => kernels::conv2d_f32(geo, read_f32(tensors, *input)?, weights, bias, *relu, out),

        (
            Kernel::ConvU8 {
                geo,
                input,
                weights,
                bias,
                params,
                ..
            },
            Buffer::U8(out),
        ) => kernels::conv2d_u8(geo, read_u8(tensors, *input)?, weights, bias, params, out),

        (Kernel::MaxPool { geo, input, .. }, Buffer::F32(out)) => {
            kernels::max_pool2d(geo, read_f32(tensors, *input)?, out)
        }
        (Kernel::MaxPool { geo, input, .. }, Buffer::U8(out)) => {
            kernels::max_pool2d(geo, read_u8(tensors, *input)?, out)
        }

        (Kernel::Copy { input, .. }, out) => {
            let src = &tensors[*input];
            if src.dtype() != out.dtype() || src.len() != out.len() {
                return Err(interp_err("reshape source and target differ"));
            }
            *out = src.clone();
        }

        (
            Kernel::DenseF32 {
                input,
                weights,
                bias,
                in_features,
                out_features,
                relu,
                ..
            },
            Buffer::F32(out),
        ) => kernels::fully_connected_f32(
            read_f32(tensors, *input)?,
            weights,
            bias,
            *in_features,
            *out_features,
            *relu,
            out,
        ),

        (
            Kernel::DenseU8 {
                input,
                weights,
                bias,
                in_features,
                out_features,
                params,
                ..
            },
            Buffer::U8(out),
        ) => kernels::fully_connected_u8(
            read_u8(tensors, *input)?,
            weights,
            bias,
            *in_features,
            *out_features,
            params,
            out,
        ),

        (Kernel::Softmax { input, classes, .. }, Buffer::F32(out)) => {
            kernels::softmax_f32(read_f32(tensors, *input)?, *classes, out)
        }

        (Kernel::Quantize { input, params, .. }, Buffer::U8(out)) => {
            kernels::quantize_u8(read_f32(tensors, *input)?, *params, out)
        }

        (Kernel::Dequantize { input, params, .. }, Buffer::F32(out)) => {
            kernels::dequantize_u8(read_u8(tensors, *input)?, *params, out)
        }

        (kernel, out) => {
            return Err(interp_err(format!(
                "kernel {:?} cannot write {} output",
                std::mem::discriminant(kernel),
                out.dtype()
            )))
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::graph::GraphBuilder;
    use crate::convert::quantize::{quantize_bias, quantize_per_channel};

    fn float_dense() -> EdgeModel {
        let mut g = GraphBuilder::new("dense");
        let input = g.activation("input", vec![1, 2], DType::Float32, None);
        let w = g.constant("w", vec![2, 2], Buffer::F32(vec![1.0, 2.0, -1.0, 0.5]), None);
        let b = g.constant("b", vec![2], Buffer::F32(vec![0.5, 0.25]), None);
        let output = g.activation("logits", vec![1, 2], DType::Float32, None);
        g.operator(Operator::FullyConnected {
            input,
            weights: w,
            bias: b,
            output,
            activation: Activation::None,
        });
        g.input(input);
        g.output(output);
        g.finish().unwrap()
    }

    /// Same dense layer with u8 activations and int8 weights
    fn quantized_dense(in_q: QuantParams, out_q: QuantParams) -> EdgeModel {
        let weights = [1.0f32, 2.0, -1.0, 0.5];
        let bias = [0.5f32, 0.25];
        let qw = quantize_per_channel(&weights, 2);
        let qb = quantize_bias(&bias, in_q.scale, &qw.scales);

        let mut g = GraphBuilder::new("dense-int8");
        let input_q = Some(Quantization::PerTensor(in_q));
        let input = g.activation("input", vec![1, 2], DType::Uint8, input_q);
        let w = g.constant(
            "w",
            vec![2, 2],
            Buffer::I8(qw.values),
            Some(Quantization::PerChannel {
                zero_points: vec![0; 2],
                scales: qw.scales,
                axis: 0,
            }),
        );
        let b = g.constant("b", vec![2], Buffer::I32(qb), None);
        let output_q = Some(Quantization::PerTensor(out_q));
        let output = g.activation("logits", vec![1, 2], DType::Uint8, output_q);
        g.operator(Operator::FullyConnected {
            input,
            weights: w,
            bias: b,
            output,
            activation: Activation::None,
        });
        g.input(input);
        g.output(output);
        g.finish().unwrap()
    }

    #[test]
    fn test_invoke_before_allocate_fails() {
        let mut interpreter = Interpreter::new(float_dense()).unwrap();
        assert!(matches!(interpreter.invoke(), Err(EdgeError::TensorsNotAllocated)));
        assert!(matches!(
            interpreter.set_tensor(0, Buffer::F32(vec![0.0; 2])),
            Err(EdgeError::TensorsNotAllocated)
        ));
    }

    #[test]
    fn test_float_dense() {
        let mut interpreter = Interpreter::new(float_dense()).unwrap();
        interpreter.allocate_tensors().unwrap();

        let input = interpreter.input_details()[0].index;
        let output = interpreter.output_details()[0].index;
        interpreter.set_tensor(input, Buffer::F32(vec![1.0, 2.0])).unwrap();
        interpreter.invoke().unwrap();

        let result = interpreter.tensor(output).unwrap().as_f32().unwrap();
        assert_eq!(result, &[5.5, 0.25]);
    }

    #[test]
    fn test_set_tensor_checks_type_and_size() {
        let mut interpreter = Interpreter::new(float_dense()).unwrap();
        interpreter.allocate_tensors().unwrap();

        assert!(matches!(
            interpreter.set_tensor(0, Buffer::U8(vec![0; 2])),
            Err(EdgeError::TypeMismatch { .. })
        ));
        assert!(matches!(
            interpreter.set_tensor(0, Buffer::F32(vec![0.0; 3])),
            Err(EdgeError::ShapeMismatch {
                expected: 2,
                actual: 3
            })
        ));
    }

    #[test]
    fn test_quantized_dense_close_to_float() {
        let in_q = QuantParams::from_min_max(0.0, 2.0);
        let out_q = QuantParams::from_min_max(-1.0, 6.0);
        let mut interpreter = Interpreter::new(quantized_dense(in_q, out_q)).unwrap();
        interpreter.allocate_tensors().unwrap();

        let details = interpreter.input_details();
        assert_eq!(details[0].dtype, DType::Uint8);
        assert_eq!(details[0].quantization, Some(in_q));

        interpreter
            .set_tensor(details[0].index, Buffer::U8(in_q.quantize_slice(&[1.0, 2.0])))
            .unwrap();
        interpreter.invoke().unwrap();

        let out_index = interpreter.output_details()[0].index;
        let codes = interpreter.tensor(out_index).unwrap().as_u8().unwrap().to_vec();
        let result = out_q.dequantize_slice(&codes);

        // float result is [5.5, 0.25]; allow an output step plus input rounding
        let tolerance = out_q.scale + 3.0 * in_q.scale;
        assert!((result[0] - 5.5).abs() <= tolerance, "{:?}", result);
        assert!((result[1] - 0.25).abs() <= tolerance, "{:?}", result);
    }

    #[test]
    fn test_hybrid_weights_are_dequantized() {
        let mut model = float_dense();
        let qw = quantize_per_channel(&[1.0, 2.0, -1.0, 0.5], 2);
        model.buffers[0] = Buffer::I8(qw.values);
        model.tensors[1].dtype = DType::Int8;
        model.tensors[1].quantization = Some(Quantization::PerChannel {
            zero_points: vec![0; 2],
            scales: qw.scales,
            axis: 0,
        });

        let mut interpreter = Interpreter::new(model).unwrap();
        interpreter.allocate_tensors().unwrap();
        interpreter.set_tensor(0, Buffer::F32(vec![1.0, 2.0])).unwrap();
        interpreter.invoke().unwrap();

        let result = interpreter.tensor(3).unwrap().as_f32().unwrap();
        assert!((result[0] - 5.5).abs() < 0.05);
        assert!((result[1] - 0.25).abs() < 0.05);
    }

    #[test]
    fn test_observer_sees_every_tensor() {
        let mut interpreter = Interpreter::new(float_dense()).unwrap();
        interpreter.allocate_tensors().unwrap();
        interpreter.set_tensor(0, Buffer::F32(vec![1.0, 2.0])).unwrap();

        let mut seen = Vec::new();
        interpreter
            .invoke_observed(|index, _| seen.push(index))
            .unwrap();
        assert_eq!(seen, vec![0, 3]);
    }

    #[test]
    fn test_softmax_has_no_integer_kernel() {
        let q = QuantParams::new(0.1, 0);
        let mut g = GraphBuilder::new("softmax-u8");
        let input = g.activation("x", vec![1, 3], DType::Uint8, Some(Quantization::PerTensor(q)));
        let output = g.activation("y", vec![1, 3], DType::Uint8, Some(Quantization::PerTensor(q)));
        g.operator(Operator::Softmax { input, output });
        g.input(input);
        g.output(output);

        let mut interpreter = Interpreter::new(g.finish().unwrap()).unwrap();
        assert!(matches!(
            interpreter.allocate_tensors(),
            Err(EdgeError::Interpreter(_))
        ));
    }
}
