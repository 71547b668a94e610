//! Burn batching for training and baseline evaluation

use burn::data::dataloader::batcher::Batcher;
use burn::prelude::*;

use super::{ImageShape, Sample};

/// A batch of images and class targets
#[derive(Clone, Debug)]
pub struct ClassificationBatch<B: Backend> {
    /// Images with shape [batch_size, channels, height, width]
    pub images: Tensor<B, 4>,
    /// Labels with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
}

/// Stacks [`Sample`]s into a [`ClassificationBatch`]
///
/// Pixels are used as loaded, already in [0, 1]. The converted artifacts see
/// exactly the same input values.
#[derive(Clone, Debug)]
pub struct SampleBatcher {
    shape: ImageShape,
}

impl SampleBatcher {
    pub fn new(shape: ImageShape) -> Self {
        Self { shape }
    }

    /// Build an image tensor from concatenated `[C, H, W]` images
    pub fn images<B: Backend>(&self, data: Vec<f32>, device: &B::Device) -> Tensor<B, 4> {
        let batch_size = data.len() / self.shape.num_elements().max(1);
        let [c, h, w] = self.shape.dims();

        Tensor::<B, 4>::from_floats(TensorData::new(data, [batch_size, c, h, w]), device)
    }
}

impl<B: Backend> Batcher<B, Sample, ClassificationBatch<B>> for SampleBatcher {
    fn batch(&self, items: Vec<Sample>, device: &B::Device) -> ClassificationBatch<B> {
        let batch_size = items.len();
        let data: Vec<f32> = items.iter().flat_map(|s| s.image().iter().copied()).collect();
        let images = self.images::<B>(data, device);

        let targets_data: Vec<i64> = items.iter().map(|s| s.label() as i64).collect();
        let targets =
            Tensor::<B, 1, Int>::from_data(TensorData::new(targets_data, [batch_size]), device);

        ClassificationBatch { images, targets }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn_ndarray::NdArray;

    type TestBackend = NdArray;

    #[test]
    fn test_batch_shapes() {
        let device = Default::default();
        let batcher = SampleBatcher::new(ImageShape::new(1, 2, 3));
        let items = vec![
            Sample::new(vec![0.0; 6], 1),
            Sample::new(vec![1.0; 6], 0),
        ];

        let batch: ClassificationBatch<TestBackend> = batcher.batch(items, &device);
        assert_eq!(batch.images.dims(), [2, 1, 2, 3]);
        assert_eq!(batch.targets.dims(), [2]);

        let targets: Vec<i64> = batch.targets.into_data().to_vec::<i64>().unwrap();
        assert_eq!(targets, vec![1, 0]);
    }
}
