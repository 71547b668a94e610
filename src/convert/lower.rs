//! Lowering a burn `EdgeClassifier` into a float [`EdgeModel`]
//!
//! Structural conversion only: batch norm is folded into the preceding
//! convolution, ReLU is fused into its producer, dense weights are
//! transposed from burn's `[in, out]` to `[out, in]`. Values are unchanged.

use burn::tensor::{backend::Backend, Tensor};
use tracing::debug;

use super::graph::{Activation, Buffer, DType, EdgeModel, GraphBuilder, Operator, Padding};
use crate::model::{ConvBlock, EdgeClassifier, EdgeClassifierConfig};
use crate::utils::error::{EdgeError, Result};

/// Name of the graph input tensor
pub const INPUT_NAME: &str = "input";

/// Name of the logits tensor
pub const LOGITS_NAME: &str = "logits";

/// Name of the softmax head output tensor
pub const PROBABILITIES_NAME: &str = "probabilities";

fn to_f32_vec<B: Backend, const D: usize>(tensor: Tensor<B, D>) -> Result<Vec<f32>> {
    tensor
        .into_data()
        .convert::<f32>()
        .to_vec::<f32>()
        .map_err(|e| EdgeError::Conversion(format!("Failed to read tensor data: {:?}", e)))
}

/// Convolution weights and bias with batch norm folded in
#[derive(Debug, Clone)]
pub struct FoldedConv {
    /// `[out, in, kh, kw]`
    pub weights: Vec<f32>,
    pub bias: Vec<f32>,
    pub shape: [usize; 4],
}

/// Fold `bn(conv(x))` into one convolution
///
/// With `s = gamma / sqrt(var + eps)`: `w' = w * s`, `b' = (b - mean) * s + beta`.
pub fn fold_batch_norm<B: Backend>(block: &ConvBlock<B>) -> Result<FoldedConv> {
    let weight = block.conv.weight.val();
    let shape = weight.dims();
    let mut weights = to_f32_vec(weight)?;

    let out_channels = shape[0];
    let bias = match &block.conv.bias {
        Some(bias) => to_f32_vec(bias.val())?,
        None => vec![0.0; out_channels],
    };

    let gamma = to_f32_vec(block.bn.gamma.val())?;
    let beta = to_f32_vec(block.bn.beta.val())?;
    let mean = to_f32_vec(block.bn.running_mean.value())?;
    let var = to_f32_vec(block.bn.running_var.value())?;
    let eps = block.bn.epsilon;

    if [gamma.len(), beta.len(), mean.len(), var.len(), bias.len()]
        .iter()
        .any(|&n| n != out_channels)
    {
        return Err(EdgeError::Conversion(format!(
            "batch norm width does not match {} conv output channels",
            out_channels
        )));
    }

    let per_channel = weights.len() / out_channels;
    let mut folded_bias = Vec::with_capacity(out_channels);
    for o in 0..out_channels {
        let s = (gamma[o] as f64 / (var[o] as f64 + eps).sqrt()) as f32;
        for w in &mut weights[o * per_channel..(o + 1) * per_channel] {
            *w *= s;
        }
        folded_bias.push((bias[o] - mean[o]) * s + beta[o]);
    }

    Ok(FoldedConv {
        weights,
        bias: folded_bias,
        shape,
    })
}

/// Dense weights transposed to `[out, in]`, plus bias
pub fn dense_weights<B: Backend>(
    linear: &burn::nn::Linear<B>,
) -> Result<(Vec<f32>, Vec<f32>, [usize; 2])> {
    let weight = linear.weight.val();
    let [d_in, d_out] = weight.dims();
    let data = to_f32_vec(weight)?;

    let mut transposed = vec![0.0f32; d_in * d_out];
    for i in 0..d_in {
        for o in 0..d_out {
            transposed[o * d_in + i] = data[i * d_out + o];
        }
    }

    let bias = match &linear.bias {
        Some(bias) => to_f32_vec(bias.val())?,
        None => vec![0.0; d_out],
    };

    Ok((transposed, bias, [d_out, d_in]))
}

/// Build the float graph of `model`
///
/// With `softmax_head` set, a softmax turning logits into probabilities is
/// appended and becomes the graph output.
pub fn lower<B: Backend>(
    model: &EdgeClassifier<B>,
    config: &EdgeClassifierConfig,
    softmax_head: bool,
) -> Result<EdgeModel> {
    config.validate()?;
    if model.blocks.len() != config.conv_filters.len() {
        return Err(EdgeError::Conversion(format!(
            "model has {} conv blocks but its config lists {}",
            model.blocks.len(),
            config.conv_filters.len()
        )));
    }

    let mut g = GraphBuilder::new(format!(
        "EdgeClassifier {}x{}x{} -> {} classes",
        config.in_channels, config.input_size, config.input_size, config.num_classes
    ));

    let mut size = config.input_size;
    let mut current = g.activation(
        INPUT_NAME,
        vec![1, config.in_channels, size, size],
        DType::Float32,
        None,
    );
    g.input(current);

    for (i, block) in model.blocks.iter().enumerate() {
        let folded = fold_batch_norm(block)?;
        let out_channels = folded.shape[0];

        let weights = g.constant(
            format!("block{}/conv/weights", i),
            folded.shape.to_vec(),
            Buffer::F32(folded.weights),
            None,
        );
        let bias = g.constant(
            format!("block{}/conv/bias", i),
            vec![out_channels],
            Buffer::F32(folded.bias),
            None,
        );
        let conv_out = g.activation(
            format!("block{}/conv", i),
            vec![1, out_channels, size, size],
            DType::Float32,
            None,
        );
        g.operator(Operator::Conv2d {
            input: current,
            weights,
            bias,
            output: conv_out,
            stride: 1,
            padding: Padding::Same,
            activation: Activation::Relu,
        });

        size /= 2;
        let pool_out = g.activation(
            format!("block{}/pool", i),
            vec![1, out_channels, size, size],
            DType::Float32,
            None,
        );
        g.operator(Operator::MaxPool2d {
            input: conv_out,
            output: pool_out,
            kernel: 2,
            stride: 2,
        });

        debug!("Lowered conv block {} ({} filters, {}x{} out)", i, out_channels, size, size);
        current = pool_out;
    }

    let features = config.flattened_features();
    let flat = g.activation("flatten", vec![1, features], DType::Float32, None);
    g.operator(Operator::Reshape {
        input: current,
        output: flat,
    });

    let hidden = dense(&mut g, &model.fc1, flat, "fc1", Activation::Relu)?;
    let logits = dense(&mut g, &model.fc2, hidden, LOGITS_NAME, Activation::None)?;

    let output = if softmax_head {
        let probs = g.activation(
            PROBABILITIES_NAME,
            vec![1, config.num_classes],
            DType::Float32,
            None,
        );
        g.operator(Operator::Softmax {
            input: logits,
            output: probs,
        });
        probs
    } else {
        logits
    };
    g.output(output);

    g.finish()
}

fn dense<B: Backend>(
    g: &mut GraphBuilder,
    linear: &burn::nn::Linear<B>,
    input: usize,
    name: &str,
    activation: Activation,
) -> Result<usize> {
    let (weights, bias, [d_out, d_in]) = dense_weights(linear)?;

    let input_width = g.tensor(input).shape.last().copied().unwrap_or(0);
    if input_width != d_in {
        return Err(EdgeError::Conversion(format!(
            "{} expects {} inputs but receives {}",
            name, d_in, input_width
        )));
    }

    let w = g.constant(format!("{}/weights", name), vec![d_out, d_in], Buffer::F32(weights), None);
    let b = g.constant(format!("{}/bias", name), vec![d_out], Buffer::F32(bias), None);
    let out = g.activation(name, vec![1, d_out], DType::Float32, None);
    g.operator(Operator::FullyConnected {
        input,
        weights: w,
        bias: b,
        output: out,
        activation,
    });
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::module::{Param, RunningState};
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    fn small_config() -> EdgeClassifierConfig {
        EdgeClassifierConfig::new()
            .with_input_size(8)
            .with_num_classes(3)
            .with_conv_filters(vec![2, 4])
            .with_hidden_units(5)
    }

    #[test]
    fn test_lowered_structure() {
        let config = small_config();
        let model = config.init::<TestBackend>(&Default::default());
        let graph = lower(&model, &config, false).unwrap();

        let names: Vec<_> = graph.operators.iter().map(|op| op.name()).collect();
        assert_eq!(
            names,
            vec![
                "Conv2d",
                "MaxPool2d",
                "Conv2d",
                "MaxPool2d",
                "Reshape",
                "FullyConnected",
                "FullyConnected"
            ]
        );
        assert_eq!(graph.tensors[graph.inputs[0]].shape, vec![1, 1, 8, 8]);
        assert_eq!(graph.tensors[graph.outputs[0]].shape, vec![1, 3]);
        assert_eq!(graph.tensors[graph.outputs[0]].name, LOGITS_NAME);
    }

    #[test]
    fn test_softmax_head() {
        let config = small_config();
        let model = config.init::<TestBackend>(&Default::default());
        let graph = lower(&model, &config, true).unwrap();

        assert_eq!(graph.operators.last().map(|op| op.name()), Some("Softmax"));
        assert_eq!(graph.tensors[graph.outputs[0]].name, PROBABILITIES_NAME);
    }

    #[test]
    fn test_dense_transpose() {
        let device = Default::default();
        let mut linear = burn::nn::LinearConfig::new(2, 3).init::<TestBackend>(&device);
        // burn layout is [in, out]
        linear.weight = Param::from_tensor(Tensor::from_floats(
            [[1.0, 2.0, 3.0], [4.0, 5.0, 6.0]],
            &device,
        ));
        let (w, _, shape) = dense_weights(&linear).unwrap();
        assert_eq!(shape, [3, 2]);
        assert_eq!(w, vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]);
    }

    #[test]
    fn test_fold_batch_norm() {
        let device = Default::default();
        let mut block = ConvBlock::<TestBackend>::new(1, 2, &device);
        block.conv.weight = Param::from_tensor(Tensor::ones([2, 1, 3, 3], &device));
        block.conv.bias = Some(Param::from_tensor(Tensor::from_floats([0.5, -1.0], &device)));
        block.bn.gamma = Param::from_tensor(Tensor::from_floats([3.0, 1.0], &device));
        block.bn.beta = Param::from_tensor(Tensor::from_floats([0.1, 0.0], &device));
        block.bn.running_mean = RunningState::new(Tensor::from_floats([0.5, 1.0], &device));
        block.bn.running_var = RunningState::new(Tensor::from_floats([4.0, 1.0], &device));
        block.bn.epsilon = 0.0;

        let folded = fold_batch_norm(&block).unwrap();
        // channel 0: s = 3 / 2, channel 1: s = 1
        assert!(folded.weights[..9].iter().all(|&w| (w - 1.5).abs() < 1e-6));
        assert!(folded.weights[9..].iter().all(|&w| (w - 1.0).abs() < 1e-6));
        assert!((folded.bias[0] - 0.1).abs() < 1e-6);
        assert!((folded.bias[1] + 2.0).abs() < 1e-6);
    }
}
