//! IDX file reader (MNIST, Fashion-MNIST)
//!
//! Image files: big-endian magic `0x00000803`, count, rows, cols, then one
//! byte per pixel. Label files: magic `0x00000801`, count, then one byte per
//! label.

use std::path::{Path, PathBuf};

use tracing::debug;

use super::{Dataset, DatasetSplit, ImageShape, Sample};
use crate::utils::error::{EdgeError, Result};

pub const IMAGES_MAGIC: u32 = 0x0000_0803;
pub const LABELS_MAGIC: u32 = 0x0000_0801;

/// Decoded image file: shape plus raw pixel rows
#[derive(Debug, Clone)]
pub struct IdxImages {
    pub shape: ImageShape,
    pub pixels: Vec<u8>,
    pub count: usize,
}

impl IdxImages {
    /// Normalized pixels of image `index`
    pub fn image(&self, index: usize) -> Vec<f32> {
        let size = self.shape.num_elements();
        self.pixels[index * size..(index + 1) * size]
            .iter()
            .map(|&p| p as f32 / 255.0)
            .collect()
    }
}

fn read_u32(bytes: &[u8], offset: usize) -> Result<u32> {
    bytes
        .get(offset..offset + 4)
        .map(|b| u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| EdgeError::Dataset("IDX header is truncated".into()))
}

fn check_magic(bytes: &[u8], expected: u32) -> Result<()> {
    let magic = read_u32(bytes, 0)?;
    if magic != expected {
        return Err(EdgeError::Dataset(format!(
            "bad IDX magic 0x{:08x}, expected 0x{:08x}",
            magic, expected
        )));
    }
    Ok(())
}

/// Parse an IDX image file
pub fn parse_images(bytes: &[u8]) -> Result<IdxImages> {
    check_magic(bytes, IMAGES_MAGIC)?;
    let count = read_u32(bytes, 4)? as usize;
    let rows = read_u32(bytes, 8)? as usize;
    let cols = read_u32(bytes, 12)? as usize;

    let shape = ImageShape::new(1, rows, cols);
    let expected = rows
        .checked_mul(cols)
        .and_then(|pixels| pixels.checked_mul(count))
        .ok_or_else(|| {
            EdgeError::Dataset(format!(
                "IDX header {} x {} x {} overflows the pixel count",
                count, rows, cols
            ))
        })?;
    let body = &bytes[16..];
    if body.len() < expected {
        return Err(EdgeError::Dataset(format!(
            "IDX image file is truncated: {} of {} pixel bytes",
            body.len(),
            expected
        )));
    }

    Ok(IdxImages {
        shape,
        pixels: body[..expected].to_vec(),
        count,
    })
}

/// Parse an IDX label file
pub fn parse_labels(bytes: &[u8]) -> Result<Vec<usize>> {
    check_magic(bytes, LABELS_MAGIC)?;
    let count = read_u32(bytes, 4)? as usize;

    let body = &bytes[8..];
    if body.len() < count {
        return Err(EdgeError::Dataset(format!(
            "IDX label file is truncated: {} of {} labels",
            body.len(),
            count
        )));
    }

    Ok(body[..count].iter().map(|&l| l as usize).collect())
}

/// First existing candidate among the usual file name spellings
fn find_file(dir: &Path, stem: &str, kind: &str) -> Result<PathBuf> {
    let candidates = [
        format!("{}-{}", stem, kind),
        format!("{}.{}", stem, kind),
    ];
    candidates
        .iter()
        .map(|name| dir.join(name))
        .find(|path| path.is_file())
        .ok_or_else(|| {
            EdgeError::Dataset(format!("missing IDX file {}-{} in {:?}", stem, kind, dir))
        })
}

/// Load one split from `<prefix>-images-idx3-ubyte` and `<prefix>-labels-idx1-ubyte`
pub fn load_split(dir: &Path, prefix: &str, name: &str) -> Result<DatasetSplit> {
    let images_path = find_file(dir, &format!("{}-images", prefix), "idx3-ubyte")?;
    let labels_path = find_file(dir, &format!("{}-labels", prefix), "idx1-ubyte")?;

    let images = parse_images(&std::fs::read(&images_path)?)?;
    let labels = parse_labels(&std::fs::read(&labels_path)?)?;

    if images.count != labels.len() {
        return Err(EdgeError::Dataset(format!(
            "{}: {} images but {} labels",
            name,
            images.count,
            labels.len()
        )));
    }

    debug!("{}: {} images of {}", name, images.count, images.shape);

    let samples = labels
        .iter()
        .enumerate()
        .map(|(i, &label)| Sample::new(images.image(i), label))
        .collect();

    DatasetSplit::new(name, images.shape, samples)
}

/// Load the `train` and `t10k` splits from `dir`
pub fn load(dir: &Path) -> Result<Dataset> {
    let train = load_split(dir, "train", "train")?;
    let test = load_split(dir, "t10k", "test")?;

    let num_classes = train
        .iter()
        .chain(test.iter())
        .map(|s| s.label())
        .max()
        .map(|m| m + 1)
        .unwrap_or(0);
    let class_names = (0..num_classes).map(|c| c.to_string()).collect();

    Dataset::new(train, test, class_names)
}
