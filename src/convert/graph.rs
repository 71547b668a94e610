//! Edge artifact graph
//!
//! A converted model is a flat list of tensors, constant buffers and
//! operators. Operators refer to tensors by index, tensors refer to buffers
//! by index. The on-disk form is the magic `TEDG`, a little-endian `u16`
//! format version, then the bincode encoding of [`EdgeModel`].
//!
//! Layout conventions:
//! - activations are NCHW
//! - conv weights are `[out, in, kh, kw]`
//! - dense weights are `[out, in]`
//! - per-channel quantization runs along axis 0 of a weight tensor

use std::path::Path;

use serde::{Deserialize, Serialize};

use super::quantize::QuantParams;
use crate::utils::error::{EdgeError, Result};

/// File magic
pub const MAGIC: &[u8; 4] = b"TEDG";

/// Current format version
pub const FORMAT_VERSION: u16 = 1;

const HEADER_LEN: usize = 6;

/// Element type of a tensor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DType {
    Float32,
    Uint8,
    Int8,
    Int32,
}

impl DType {
    pub fn size_bytes(&self) -> usize {
        match self {
            DType::Float32 | DType::Int32 => 4,
            DType::Uint8 | DType::Int8 => 1,
        }
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DType::Float32 => "float32",
            DType::Uint8 => "uint8",
            DType::Int8 => "int8",
            DType::Int32 => "int32",
        };
        write!(f, "{}", name)
    }
}

/// Affine quantization parameters attached to a tensor
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Quantization {
    PerTensor(QuantParams),
    PerChannel {
        scales: Vec<f32>,
        zero_points: Vec<i32>,
        axis: usize,
    },
}

impl Quantization {
    /// The single (scale, zero-point) pair of a per-tensor quantization
    pub fn per_tensor(&self) -> Option<QuantParams> {
        match self {
            Quantization::PerTensor(params) => Some(*params),
            Quantization::PerChannel { .. } => None,
        }
    }

    /// Scales, one per channel (a single entry for per-tensor)
    pub fn scales(&self) -> Vec<f32> {
        match self {
            Quantization::PerTensor(params) => vec![params.scale],
            Quantization::PerChannel { scales, .. } => scales.clone(),
        }
    }
}

/// Tensor metadata
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TensorSpec {
    pub name: String,
    pub shape: Vec<usize>,
    pub dtype: DType,
    pub quantization: Option<Quantization>,
    /// Constant data, if any
    pub buffer: Option<usize>,
}

impl TensorSpec {
    pub fn num_elements(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn is_constant(&self) -> bool {
        self.buffer.is_some()
    }
}

/// Typed storage for constant data and interpreter activations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Buffer {
    F32(Vec<f32>),
    U8(Vec<u8>),
    I8(Vec<i8>),
    I32(Vec<i32>),
}

impl Buffer {
    pub fn zeros(dtype: DType, len: usize) -> Self {
        match dtype {
            DType::Float32 => Buffer::F32(vec![0.0; len]),
            DType::Uint8 => Buffer::U8(vec![0; len]),
            DType::Int8 => Buffer::I8(vec![0; len]),
            DType::Int32 => Buffer::I32(vec![0; len]),
        }
    }

    pub fn dtype(&self) -> DType {
        match self {
            Buffer::F32(_) => DType::Float32,
            Buffer::U8(_) => DType::Uint8,
            Buffer::I8(_) => DType::Int8,
            Buffer::I32(_) => DType::Int32,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Buffer::F32(v) => v.len(),
            Buffer::U8(v) => v.len(),
            Buffer::I8(v) => v.len(),
            Buffer::I32(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn size_bytes(&self) -> usize {
        self.len() * self.dtype().size_bytes()
    }

    pub fn as_f32(&self) -> Option<&[f32]> {
        match self {
            Buffer::F32(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_u8(&self) -> Option<&[u8]> {
        match self {
            Buffer::U8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i8(&self) -> Option<&[i8]> {
        match self {
            Buffer::I8(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<&[i32]> {
        match self {
            Buffer::I32(v) => Some(v),
            _ => None,
        }
    }
}

/// Fused activation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    None,
    Relu,
}

/// Spatial padding of a convolution
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Padding {
    Same,
    Valid,
}

/// Graph operator. Fields are tensor indices unless noted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operator {
    Conv2d {
        input: usize,
        weights: usize,
        bias: usize,
        output: usize,
        stride: usize,
        padding: Padding,
        activation: Activation,
    },
    MaxPool2d {
        input: usize,
        output: usize,
        kernel: usize,
        stride: usize,
    },
    Reshape {
        input: usize,
        output: usize,
    },
    FullyConnected {
        input: usize,
        weights: usize,
        bias: usize,
        output: usize,
        activation: Activation,
    },
    Softmax {
        input: usize,
        output: usize,
    },
    Quantize {
        input: usize,
        output: usize,
    },
    Dequantize {
        input: usize,
        output: usize,
    },
}

impl Operator {
    pub fn name(&self) -> &'static str {
        match self {
            Operator::Conv2d { .. } => "Conv2d",
            Operator::MaxPool2d { .. } => "MaxPool2d",
            Operator::Reshape { .. } => "Reshape",
            Operator::FullyConnected { .. } => "FullyConnected",
            Operator::Softmax { .. } => "Softmax",
            Operator::Quantize { .. } => "Quantize",
            Operator::Dequantize { .. } => "Dequantize",
        }
    }

    pub fn inputs(&self) -> Vec<usize> {
        match *self {
            Operator::Conv2d {
                input,
                weights,
                bias,
                ..
            }
            | Operator::FullyConnected {
                input,
                weights,
                bias,
                ..
            } => vec![input, weights, bias],
            Operator::MaxPool2d { input, .. }
            | Operator::Reshape { input, .. }
            | Operator::Softmax { input, .. }
            | Operator::Quantize { input, .. }
            | Operator::Dequantize { input, .. } => vec![input],
        }
    }

    pub fn output(&self) -> usize {
        match *self {
            Operator::Conv2d { output, .. }
            | Operator::MaxPool2d { output, .. }
            | Operator::Reshape { output, .. }
            | Operator::FullyConnected { output, .. }
            | Operator::Softmax { output, .. }
            | Operator::Quantize { output, .. }
            | Operator::Dequantize { output, .. } => output,
        }
    }
}

/// A converted model
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EdgeModel {
    pub description: String,
    pub tensors: Vec<TensorSpec>,
    pub buffers: Vec<Buffer>,
    pub operators: Vec<Operator>,
    pub inputs: Vec<usize>,
    pub outputs: Vec<usize>,
}

impl EdgeModel {
    /// Serialize with header
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let body = bincode::serialize(self)?;
        let mut bytes = Vec::with_capacity(HEADER_LEN + body.len());
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&FORMAT_VERSION.to_le_bytes());
        bytes.extend_from_slice(&body);
        Ok(bytes)
    }

    /// Decode and validate artifact bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LEN || &bytes[..4] != MAGIC {
            return Err(EdgeError::InvalidArtifact(
                "missing TEDG magic header".into(),
            ));
        }

        let version = u16::from_le_bytes([bytes[4], bytes[5]]);
        if version != FORMAT_VERSION {
            return Err(EdgeError::InvalidArtifact(format!(
                "unsupported format version {} (expected {})",
                version, FORMAT_VERSION
            )));
        }

        let model: EdgeModel = bincode::deserialize(&bytes[HEADER_LEN..])
            .map_err(|e| EdgeError::InvalidArtifact(format!("undecodable body: {}", e)))?;
        model.validate()?;
        Ok(model)
    }

    /// Write the artifact and return its size in bytes
    pub fn save(&self, path: &Path) -> Result<u64> {
        let bytes = self.to_bytes()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, &bytes)?;
        Ok(bytes.len() as u64)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)?;
        Self::from_bytes(&bytes)
    }

    pub fn tensor(&self, index: usize) -> Option<&TensorSpec> {
        self.tensors.get(index)
    }

    /// Constant data of tensor `index`
    pub fn constant(&self, index: usize) -> Option<&Buffer> {
        self.tensors
            .get(index)
            .and_then(|t| t.buffer)
            .and_then(|b| self.buffers.get(b))
    }

    /// Total bytes held in constant buffers
    pub fn constant_bytes(&self) -> usize {
        self.buffers.iter().map(Buffer::size_bytes).sum()
    }

    /// Structural checks on indices, buffer sizes and dtypes
    pub fn validate(&self) -> Result<()> {
        let invalid = |msg: String| Err(EdgeError::InvalidArtifact(msg));

        for (idx, tensor) in self.tensors.iter().enumerate() {
            if let Some(b) = tensor.buffer {
                let Some(buffer) = self.buffers.get(b) else {
                    return invalid(format!("tensor {} refers to missing buffer {}", idx, b));
                };
                if buffer.dtype() != tensor.dtype {
                    return invalid(format!(
                        "tensor '{}' is {} but its buffer holds {}",
                        tensor.name,
                        tensor.dtype,
                        buffer.dtype()
                    ));
                }
                if buffer.len() != tensor.num_elements() {
                    return invalid(format!(
                        "tensor '{}' has {} elements but its buffer holds {}",
                        tensor.name,
                        tensor.num_elements(),
                        buffer.len()
                    ));
                }
            }

            if let Some(Quantization::PerChannel {
                scales,
                zero_points,
                axis,
            }) = &tensor.quantization
            {
                let channels = tensor.shape.get(*axis).copied();
                if channels != Some(scales.len()) || scales.len() != zero_points.len() {
                    return invalid(format!(
                        "tensor '{}' has per-channel parameters that do not match axis {}",
                        tensor.name, axis
                    ));
                }
            }
        }

        let check_index = |idx: usize, what: &str| {
            if idx < self.tensors.len() {
                Ok(())
            } else {
                Err(EdgeError::InvalidArtifact(format!(
                    "{} refers to missing tensor {}",
                    what, idx
                )))
            }
        };

        for &idx in self.inputs.iter().chain(self.outputs.iter()) {
            check_index(idx, "graph input/output")?;
            if self.tensors[idx].is_constant() {
                return invalid(format!(
                    "graph input/output '{}' is a constant",
                    self.tensors[idx].name
                ));
            }
        }

        for op in &self.operators {
            for idx in op.inputs() {
                check_index(idx, op.name())?;
            }
            check_index(op.output(), op.name())?;
            if self.tensors[op.output()].is_constant() {
                return invalid(format!("{} writes into a constant tensor", op.name()));
            }
        }

        if self.inputs.is_empty() || self.outputs.is_empty() {
            return invalid("graph needs at least one input and one output".into());
        }

        Ok(())
    }
}

/// Incremental builder for [`EdgeModel`]
#[derive(Debug, Default)]
pub struct GraphBuilder {
    model: EdgeModel,
}

impl GraphBuilder {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            model: EdgeModel {
                description: description.into(),
                ..Default::default()
            },
        }
    }

    /// Add an activation tensor
    pub fn activation(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        dtype: DType,
        quantization: Option<Quantization>,
    ) -> usize {
        self.model.tensors.push(TensorSpec {
            name: name.into(),
            shape,
            dtype,
            quantization,
            buffer: None,
        });
        self.model.tensors.len() - 1
    }

    /// Add a constant tensor backed by `data`
    pub fn constant(
        &mut self,
        name: impl Into<String>,
        shape: Vec<usize>,
        data: Buffer,
        quantization: Option<Quantization>,
    ) -> usize {
        self.model.buffers.push(data);
        let buffer = self.model.buffers.len() - 1;
        let dtype = self.model.buffers[buffer].dtype();
        self.model.tensors.push(TensorSpec {
            name: name.into(),
            shape,
            dtype,
            quantization,
            buffer: Some(buffer),
        });
        self.model.tensors.len() - 1
    }

    pub fn operator(&mut self, op: Operator) {
        self.model.operators.push(op);
    }

    pub fn input(&mut self, index: usize) {
        self.model.inputs.push(index);
    }

    pub fn output(&mut self, index: usize) {
        self.model.outputs.push(index);
    }

    pub fn tensor(&self, index: usize) -> &TensorSpec {
        &self.model.tensors[index]
    }

    /// Validate and return the model
    pub fn finish(self) -> Result<EdgeModel> {
        self.model.validate()?;
        Ok(self.model)
    }
}
