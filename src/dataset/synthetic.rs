//! Synthetic dataset generator
//!
//! Each class owns one cell of a square grid laid over the image. A sample of
//! class `k` is uniform background noise with a bright patch in cell `k`. The
//! result is learnable by a small CNN in a few epochs and fully determined by
//! the seed, which makes it the dataset of choice for offline runs and tests.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};

use super::{Dataset, DatasetSplit, ImageShape, Sample};
use crate::utils::error::{EdgeError, Result};

/// Synthetic dataset parameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyntheticConfig {
    pub train_samples: usize,
    pub test_samples: usize,
    pub image_size: usize,
    pub channels: usize,
    pub num_classes: usize,
    /// Upper bound of the background noise, in [0, 1)
    pub noise: f32,
    pub seed: u64,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            train_samples: 800,
            test_samples: 200,
            image_size: 16,
            channels: 1,
            num_classes: 4,
            noise: 0.3,
            seed: 42,
        }
    }
}

impl SyntheticConfig {
    fn validate(&self) -> Result<()> {
        if self.num_classes == 0 {
            return Err(EdgeError::Config("synthetic num_classes must be positive".into()));
        }
        if self.channels == 0 {
            return Err(EdgeError::Config("synthetic channels must be positive".into()));
        }
        let grid = grid_side(self.num_classes);
        if self.image_size < grid {
            return Err(EdgeError::Config(format!(
                "synthetic image_size {} cannot hold a {}x{} class grid",
                self.image_size, grid, grid
            )));
        }
        if !(0.0..1.0).contains(&self.noise) {
            return Err(EdgeError::Config(format!(
                "synthetic noise must be in [0, 1), got {}",
                self.noise
            )));
        }
        Ok(())
    }

    pub fn shape(&self) -> ImageShape {
        ImageShape::square(self.channels, self.image_size)
    }
}

fn grid_side(num_classes: usize) -> usize {
    let mut side = 1;
    while side * side < num_classes {
        side += 1;
    }
    side
}

/// Generate one image of class `label`
fn render(config: &SyntheticConfig, label: usize, rng: &mut ChaCha8Rng) -> Vec<f32> {
    let size = config.image_size;
    let grid = grid_side(config.num_classes);
    let cell = size / grid;
    let (cell_y, cell_x) = (label / grid, label % grid);

    let mut image = vec![0.0f32; config.shape().num_elements()];
    for c in 0..config.channels {
        for y in 0..size {
            for x in 0..size {
                let in_patch = y / cell == cell_y && x / cell == cell_x;
                let value = if in_patch {
                    rng.gen_range(0.75f32..=1.0)
                } else {
                    rng.gen_range(0.0f32..=config.noise)
                };
                image[(c * size + y) * size + x] = value;
            }
        }
    }
    image
}

fn generate_split(
    config: &SyntheticConfig,
    name: &str,
    count: usize,
    seed: u64,
) -> Result<DatasetSplit> {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let samples = (0..count)
        .map(|i| {
            let label = i % config.num_classes;
            Sample::new(render(config, label, &mut rng), label)
        })
        .collect();
    DatasetSplit::new(name, config.shape(), samples)
}

/// Generate a train and a test split with independent random streams
pub fn generate(config: &SyntheticConfig) -> Result<Dataset> {
    config.validate()?;

    let train = generate_split(config, "train", config.train_samples, config.seed)?;
    let test = generate_split(
        config,
        "test",
        config.test_samples,
        config.seed.wrapping_add(1),
    )?;
    let class_names = (0..config.num_classes)
        .map(|c| format!("class_{}", c))
        .collect();

    Dataset::new(train, test, class_names)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small() -> SyntheticConfig {
        SyntheticConfig {
            train_samples: 12,
            test_samples: 10,
            image_size: 8,
            ..Default::default()
        }
    }

    #[test]
    fn test_generate_is_deterministic() {
        let a = generate(&small()).unwrap();
        let b = generate(&small()).unwrap();
        assert_eq!(a.train.samples(), b.train.samples());
        assert_eq!(a.test.samples(), b.test.samples());
    }

    #[test]
    fn test_labels_are_balanced_and_values_normalized() {
        let dataset = generate(&small()).unwrap();
        assert_eq!(dataset.train.class_counts(4), vec![3, 3, 3, 3]);
        assert!(dataset
            .train
            .iter()
            .flat_map(|s| s.image().iter())
            .all(|&v| (0.0..=1.0).contains(&v)));
    }

    #[test]
    fn test_patch_marks_the_class() {
        let dataset = generate(&small()).unwrap();
        // class 3 lives in the bottom-right quadrant of an 8x8 image
        let sample = dataset.train.get(3).unwrap();
        assert_eq!(sample.label(), 3);
        assert!(sample.image()[7 * 8 + 7] >= 0.75);
        assert!(sample.image()[0] <= 0.3);
    }

    #[test]
    fn test_invalid_config() {
        let config = SyntheticConfig {
            num_classes: 0,
            ..Default::default()
        };
        assert!(matches!(generate(&config), Err(EdgeError::Config(_))));
    }

    #[test]
    fn test_grid_side() {
        assert_eq!(grid_side(1), 1);
        assert_eq!(grid_side(4), 2);
        assert_eq!(grid_side(10), 4);
    }
}
