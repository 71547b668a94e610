//! CNN Model Architecture for Small Image Classification
//!
//! A compact convolutional network built with the Burn framework. The
//! architecture is deliberately restricted to operations the edge artifact
//! format can express: 3x3 same-padded convolution, batch norm, ReLU, 2x2
//! max-pooling, flatten and dense layers.

use burn::{
    config::Config,
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig},
        pool::{MaxPool2d, MaxPool2dConfig},
        BatchNorm, BatchNormConfig, Dropout, DropoutConfig, Linear, LinearConfig, PaddingConfig2d,
        Relu,
    },
    tensor::{backend::Backend, Tensor},
};

use crate::dataset::ImageShape;
use crate::utils::error::EdgeError;

/// Configuration for the EdgeClassifier CNN model
#[derive(Config, Debug)]
pub struct EdgeClassifierConfig {
    /// Number of output classes
    #[config(default = "10")]
    pub num_classes: usize,

    /// Number of input channels (1 for grayscale, 3 for RGB)
    #[config(default = "1")]
    pub in_channels: usize,

    /// Input image size (assumes square images)
    #[config(default = "28")]
    pub input_size: usize,

    /// Output channels of each conv block; each block halves the spatial size
    #[config(default = "vec![8, 16]")]
    pub conv_filters: Vec<usize>,

    /// Width of the hidden dense layer
    #[config(default = "32")]
    pub hidden_units: usize,

    /// Dropout rate for regularization
    #[config(default = "0.25")]
    pub dropout_rate: f64,
}

impl EdgeClassifierConfig {
    /// Config matching a dataset's image shape and class count
    pub fn for_dataset(shape: ImageShape, num_classes: usize) -> Self {
        Self::new()
            .with_num_classes(num_classes)
            .with_in_channels(shape.channels)
            .with_input_size(shape.height)
    }

    /// Reject configurations that cannot build a working network
    pub fn validate(&self) -> crate::utils::error::Result<()> {
        if self.num_classes == 0 {
            return Err(EdgeError::Config("num_classes must be positive".into()));
        }
        if self.in_channels == 0 {
            return Err(EdgeError::Config("in_channels must be positive".into()));
        }
        if self.conv_filters.is_empty() || self.conv_filters.contains(&0) {
            return Err(EdgeError::Config(
                "conv_filters must list at least one positive filter count".into(),
            ));
        }
        if self.hidden_units == 0 {
            return Err(EdgeError::Config("hidden_units must be positive".into()));
        }
        if !(0.0..1.0).contains(&self.dropout_rate) {
            return Err(EdgeError::Config(format!(
                "dropout_rate must be in [0, 1), got {}",
                self.dropout_rate
            )));
        }
        if self.feature_map_size() == 0 {
            return Err(EdgeError::Config(format!(
                "input_size {} is too small for {} pooling stages",
                self.input_size,
                self.conv_filters.len()
            )));
        }
        Ok(())
    }

    /// Spatial size after all pooling stages
    pub fn feature_map_size(&self) -> usize {
        self.conv_filters
            .iter()
            .fold(self.input_size, |size, _| size / 2)
    }

    /// Length of the flattened feature vector fed to the dense head
    pub fn flattened_features(&self) -> usize {
        let channels = self.conv_filters.last().copied().unwrap_or(self.in_channels);
        let size = self.feature_map_size();
        channels * size * size
    }

    /// `[C, H, W]` of a single input image
    pub fn input_shape(&self) -> ImageShape {
        ImageShape::square(self.in_channels, self.input_size)
    }

    /// Initialize a model
    pub fn init<B: Backend>(&self, device: &B::Device) -> EdgeClassifier<B> {
        EdgeClassifier::new(self, device)
    }
}

/// A CNN block: Conv2d, BatchNorm, ReLU, MaxPool
#[derive(Module, Debug)]
pub struct ConvBlock<B: Backend> {
    pub conv: Conv2d<B>,
    pub bn: BatchNorm<B, 2>,
    pub relu: Relu,
    pub pool: MaxPool2d,
}

impl<B: Backend> ConvBlock<B> {
    /// Create a new convolutional block
    pub fn new(in_channels: usize, out_channels: usize, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new([in_channels, out_channels], [3, 3])
            .with_padding(PaddingConfig2d::Same)
            .init(device);

        let bn = BatchNormConfig::new(out_channels).init(device);
        let pool = MaxPool2dConfig::new([2, 2]).with_strides([2, 2]).init();

        Self {
            conv,
            bn,
            relu: Relu::new(),
            pool,
        }
    }

    /// Forward pass through the block
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = self.conv.forward(x);
        let x = self.bn.forward(x);
        let x = self.relu.forward(x);
        self.pool.forward(x)
    }
}

/// Edge image classifier
///
/// Architecture:
/// - N convolutional blocks (conv 3x3 → batch norm → ReLU → max-pool 2x2)
/// - Flatten in channel-major order
/// - Dense + ReLU + dropout
/// - Dense to logits
#[derive(Module, Debug)]
pub struct EdgeClassifier<B: Backend> {
    // Public for lowering into the edge artifact
    pub blocks: Vec<ConvBlock<B>>,
    pub fc1: Linear<B>,
    pub dropout: Dropout,
    pub fc2: Linear<B>,

    num_classes: usize,
}

impl<B: Backend> EdgeClassifier<B> {
    /// Create a new EdgeClassifier from configuration
    pub fn new(config: &EdgeClassifierConfig, device: &B::Device) -> Self {
        let mut blocks = Vec::with_capacity(config.conv_filters.len());
        let mut in_channels = config.in_channels;
        for &filters in &config.conv_filters {
            blocks.push(ConvBlock::new(in_channels, filters, device));
            in_channels = filters;
        }

        let fc1 = LinearConfig::new(config.flattened_features(), config.hidden_units).init(device);
        let dropout = DropoutConfig::new(config.dropout_rate).init();
        let fc2 = LinearConfig::new(config.hidden_units, config.num_classes).init(device);

        Self {
            blocks,
            fc1,
            dropout,
            fc2,
            num_classes: config.num_classes,
        }
    }

    /// Forward pass through the network
    ///
    /// # Arguments
    /// * `x` - Input tensor of shape [batch_size, channels, height, width]
    ///
    /// # Returns
    /// * Logits tensor of shape [batch_size, num_classes]
    pub fn forward(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let mut x = x;
        for block in &self.blocks {
            x = block.forward(x);
        }

        // Flatten: [B, C, H, W] -> [B, C*H*W]
        let [batch_size, channels, height, width] = x.dims();
        let x = x.reshape([batch_size, channels * height * width]);

        let x = self.fc1.forward(x);
        let x = Relu::new().forward(x);
        let x = self.dropout.forward(x);
        self.fc2.forward(x)
    }

    /// Forward pass with softmax for inference
    pub fn forward_softmax(&self, x: Tensor<B, 4>) -> Tensor<B, 2> {
        let logits = self.forward(x);
        burn::tensor::activation::softmax(logits, 1)
    }

    /// Get the number of output classes
    pub fn num_classes(&self) -> usize {
        self.num_classes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_edge_classifier_output_shape() {
        let device = Default::default();
        let config = EdgeClassifierConfig::new();
        let model = config.init::<TestBackend>(&device);

        let input = Tensor::<TestBackend, 4>::zeros([2, 1, 28, 28], &device);
        let output = model.forward(input);

        assert_eq!(output.dims(), [2, 10]);
        assert_eq!(model.num_classes(), 10);
        assert_eq!(model.blocks.len(), 2);
    }

    #[test]
    fn test_flattened_features() {
        let config = EdgeClassifierConfig::new()
            .with_input_size(16)
            .with_conv_filters(vec![4, 6, 8]);
        assert_eq!(config.feature_map_size(), 2);
        assert_eq!(config.flattened_features(), 8 * 2 * 2);
    }

    #[test]
    fn test_softmax_rows_sum_to_one() {
        let device = Default::default();
        let config = EdgeClassifierConfig::new()
            .with_input_size(8)
            .with_num_classes(3);
        let model = config.init::<TestBackend>(&device);

        let probs = model.forward_softmax(Tensor::<TestBackend, 4>::ones([1, 1, 8, 8], &device));
        let values: Vec<f32> = probs.into_data().to_vec::<f32>().unwrap();
        let sum: f32 = values.iter().sum();
        assert!((sum - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_validate() {
        assert!(EdgeClassifierConfig::new().validate().is_ok());
        assert!(EdgeClassifierConfig::new()
            .with_num_classes(0)
            .validate()
            .is_err());
        assert!(EdgeClassifierConfig::new()
            .with_dropout_rate(1.0)
            .validate()
            .is_err());
        assert!(EdgeClassifierConfig::new()
            .with_input_size(2)
            .with_conv_filters(vec![4, 4])
            .validate()
            .is_err());
    }

    #[test]
    fn test_config_json_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("model.json");
        let config = EdgeClassifierConfig::new()
            .with_num_classes(4)
            .with_conv_filters(vec![6, 12]);

        config.save(&path).unwrap();
        let loaded = EdgeClassifierConfig::load(&path).unwrap();
        assert_eq!(loaded.num_classes, 4);
        assert_eq!(loaded.conv_filters, vec![6, 12]);
        assert!(loaded.validate().is_ok());
    }

    #[test]
    fn test_batch_norm_per_channel() {
        let device = Default::default();
        let model = EdgeClassifierConfig::new().init::<TestBackend>(&device);
        let gamma = model.blocks[0].bn.gamma.val();
        assert_eq!(gamma.dims(), [8]);
    }
}
