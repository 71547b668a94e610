//! Image Folder Loader
//!
//! Loads a dataset laid out as one directory per class:
//!
//! ```text
//! root/
//! ├── train/
//! │   ├── cat/
//! │   │   ├── 001.png
//! │   │   └── ...
//! │   └── dog/
//! └── test/
//!     ├── cat/
//!     └── dog/
//! ```
//!
//! Class indices follow the sorted list of train class directories. Images are
//! resized to a square and converted to grayscale or RGB.

use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::{Dataset, DatasetSplit, ImageShape, Sample};
use crate::utils::error::{EdgeError, Result};

const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

/// Load `root/train` and `root/test`
pub fn load(root: &Path, image_size: usize, channels: usize) -> Result<Dataset> {
    if channels != 1 && channels != 3 {
        return Err(EdgeError::Config(format!(
            "image folders support 1 or 3 channels, got {}",
            channels
        )));
    }
    if image_size == 0 {
        return Err(EdgeError::Config("image_size must be positive".into()));
    }

    let shape = ImageShape::square(channels, image_size);
    let class_names = discover_classes(&root.join("train"))?;
    info!("Found {} classes", class_names.len());

    let train = load_split(&root.join("train"), "train", &class_names, shape)?;
    let test = load_split(&root.join("test"), "test", &class_names, shape)?;

    Dataset::new(train, test, class_names)
}

/// Sorted names of the class directories under `dir`
pub fn discover_classes(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        return Err(EdgeError::Dataset(format!(
            "Dataset directory does not exist: {:?}",
            dir
        )));
    }

    let mut class_dirs = Vec::new();
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            if let Some(name) = entry.file_name().to_str() {
                class_dirs.push(name.to_string());
            }
        }
    }
    class_dirs.sort();

    if class_dirs.is_empty() {
        return Err(EdgeError::Dataset(format!(
            "No class directories found in {:?}",
            dir
        )));
    }

    Ok(class_dirs)
}

fn load_split(
    dir: &Path,
    name: &str,
    class_names: &[String],
    shape: ImageShape,
) -> Result<DatasetSplit> {
    let mut samples = Vec::new();

    for (label, class_name) in class_names.iter().enumerate() {
        let class_dir = dir.join(class_name);
        if !class_dir.is_dir() {
            warn!("{} split has no directory for class '{}'", name, class_name);
            continue;
        }

        let mut paths = image_paths(&class_dir);
        paths.sort();

        for path in &paths {
            samples.push(Sample::new(load_image_tensor(path, shape)?, label));
        }

        debug!(
            "{} class '{}' (label {}): {} images",
            name,
            class_name,
            label,
            paths.len()
        );
    }

    DatasetSplit::new(name, shape, samples)
}

fn image_paths(class_dir: &Path) -> Vec<PathBuf> {
    WalkDir::new(class_dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|e| e.path().to_path_buf())
        .filter(|path| {
            path.extension()
                .map(|ext| {
                    let ext = ext.to_string_lossy().to_lowercase();
                    IMAGE_EXTENSIONS.contains(&ext.as_str())
                })
                .unwrap_or(false)
        })
        .collect()
}

fn open_image(path: &Path) -> Result<DynamicImage> {
    ImageReader::open(path)?
        .decode()
        .map_err(|e| EdgeError::Dataset(format!("Failed to decode image {:?}: {}", path, e)))
}

/// Load an image as normalized `[C, H, W]` data
pub fn load_image_tensor(path: &Path, shape: ImageShape) -> Result<Vec<f32>> {
    let img = open_image(path)?.resize_exact(
        shape.width as u32,
        shape.height as u32,
        FilterType::Triangle,
    );
    Ok(image_to_chw(&img, shape))
}

/// Convert an already-sized image to normalized `[C, H, W]` data
pub fn image_to_chw(img: &DynamicImage, shape: ImageShape) -> Vec<f32> {
    let (height, width) = (shape.height, shape.width);
    let plane = height * width;
    let mut tensor = vec![0.0f32; shape.num_elements()];

    if shape.channels == 1 {
        let gray = img.to_luma8();
        for (x, y, pixel) in gray.enumerate_pixels() {
            tensor[y as usize * width + x as usize] = pixel[0] as f32 / 255.0;
        }
    } else {
        let rgb = img.to_rgb8();
        for (x, y, pixel) in rgb.enumerate_pixels() {
            let offset = y as usize * width + x as usize;
            for c in 0..3 {
                tensor[c * plane + offset] = pixel[c] as f32 / 255.0;
            }
        }
    }

    tensor
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma, Rgb, RgbImage};
    use tempfile::TempDir;

    fn write_gray(path: &Path, value: u8) {
        let img = GrayImage::from_pixel(8, 8, Luma([value]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_load_folder_dataset() {
        let dir = TempDir::new().unwrap();
        for split in ["train", "test"] {
            for (class, value) in [("bright", 255u8), ("dark", 0u8)] {
                let class_dir = dir.path().join(split).join(class);
                std::fs::create_dir_all(&class_dir).unwrap();
                write_gray(&class_dir.join("a.png"), value);
                write_gray(&class_dir.join("b.png"), value);
            }
        }
        std::fs::write(dir.path().join("train/bright/notes.txt"), "skip me").unwrap();

        let dataset = load(dir.path(), 4, 1).unwrap();
        assert_eq!(dataset.class_names, vec!["bright", "dark"]);
        assert_eq!(dataset.train.len(), 4);
        assert_eq!(dataset.test.len(), 4);
        assert_eq!(dataset.image_shape(), ImageShape::square(1, 4));

        let first = dataset.train.get(0).unwrap();
        assert_eq!(first.label(), 0);
        assert!(first.image().iter().all(|&v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn test_rgb_layout_is_channel_major() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 2, Rgb([255, 0, 51])));
        let data = image_to_chw(&img, ImageShape::square(3, 2));
        assert_eq!(&data[0..4], &[1.0; 4]);
        assert_eq!(&data[4..8], &[0.0; 4]);
        assert!((data[8] - 0.2).abs() < 1e-6);
    }

    #[test]
    fn test_missing_directory() {
        let dir = TempDir::new().unwrap();
        let result = load(&dir.path().join("nope"), 4, 1);
        assert!(matches!(result, Err(EdgeError::Dataset(_))));
    }

    #[test]
    fn test_rejects_two_channels() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(load(dir.path(), 4, 2), Err(EdgeError::Config(_))));
    }
}
