//! MNIST loading and preparation.
//!
//! The four IDX files are read once into byte buffers. Preparation turns a
//! split into a normalized `f32` tensor laid out according to the configured
//! [`ImageDataFormat`], and labels into one-hot rows.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const IMG_ROWS: usize = 28;
pub const IMG_COLS: usize = 28;
pub const NUM_CLASSES: usize = 10;

const IMAGE_MAGIC: u32 = 0x0000_0803;
const LABEL_MAGIC: u32 = 0x0000_0801;

/// Where the channel axis sits in image tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum ImageDataFormat {
    /// `(N, H, W, C)`
    #[default]
    #[value(name = "channels_last")]
    ChannelsLast,
    /// `(N, C, H, W)`
    #[value(name = "channels_first")]
    ChannelsFirst,
}

impl ImageDataFormat {
    /// Per-sample dimensions for a `channels × rows × cols` image.
    pub fn sample_dims(self, channels: usize, rows: usize, cols: usize) -> [usize; 3] {
        match self {
            ImageDataFormat::ChannelsLast => [rows, cols, channels],
            ImageDataFormat::ChannelsFirst => [channels, rows, cols],
        }
    }
}

/// One image and its label, borrowed from a split.
#[derive(Debug, Clone, Copy)]
pub struct Sample<'a> {
    pub pixels: &'a [u8],
    pub label: u8,
}

/// Raw images (row-major, one byte per pixel) and labels of one split.
#[derive(Debug, Clone)]
pub struct MnistSplit {
    images: Vec<u8>,
    labels: Vec<u8>,
}

impl MnistSplit {
    /// Build a split from raw buffers, checking sizes and label range.
    pub fn new(images: Vec<u8>, labels: Vec<u8>) -> Result<Self> {
        let image_size = IMG_ROWS * IMG_COLS;
        if images.len() != labels.len() * image_size {
            return Err(Error::Dataset(format!(
                "{} image bytes do not match {} labels",
                images.len(),
                labels.len()
            )));
        }
        if let Some(bad) = labels.iter().find(|&&l| l as usize >= NUM_CLASSES) {
            return Err(Error::Dataset(format!("label {bad} out of range")));
        }
        Ok(Self { images, labels })
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[u8] {
        &self.labels
    }

    pub fn sample(&self, index: usize) -> Sample<'_> {
        let image_size = IMG_ROWS * IMG_COLS;
        Sample {
            pixels: &self.images[index * image_size..(index + 1) * image_size],
            label: self.labels[index],
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = Sample<'_>> {
        (0..self.len()).map(move |i| self.sample(i))
    }
}

#[derive(Debug, Clone)]
pub struct Mnist {
    pub train: MnistSplit,
    pub test: MnistSplit,
}

fn read_be_u32(data: &[u8], offset: &mut usize) -> Result<u32> {
    let bytes = data
        .get(*offset..*offset + 4)
        .ok_or_else(|| Error::Dataset("truncated IDX header".to_string()))?;
    *offset += 4;
    Ok(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Parse an IDX3 image file into a flat byte buffer.
pub fn parse_idx_images(data: &[u8]) -> Result<Vec<u8>> {
    let mut offset = 0usize;
    let magic = read_be_u32(data, &mut offset)?;
    if magic != IMAGE_MAGIC {
        return Err(Error::Dataset(format!(
            "bad image file magic {magic:#010x}, expected {IMAGE_MAGIC:#010x}"
        )));
    }
    let count = read_be_u32(data, &mut offset)? as usize;
    let rows = read_be_u32(data, &mut offset)? as usize;
    let cols = read_be_u32(data, &mut offset)? as usize;

    if rows != IMG_ROWS || cols != IMG_COLS {
        return Err(Error::Dataset(format!(
            "unexpected image shape {rows}x{cols}"
        )));
    }

    let total_bytes = count * rows * cols;
    let body = data
        .get(offset..offset + total_bytes)
        .ok_or_else(|| Error::Dataset("image file is truncated".to_string()))?;
    Ok(body.to_vec())
}

/// Parse an IDX1 label file.
pub fn parse_idx_labels(data: &[u8]) -> Result<Vec<u8>> {
    let mut offset = 0usize;
    let magic = read_be_u32(data, &mut offset)?;
    if magic != LABEL_MAGIC {
        return Err(Error::Dataset(format!(
            "bad label file magic {magic:#010x}, expected {LABEL_MAGIC:#010x}"
        )));
    }
    let count = read_be_u32(data, &mut offset)? as usize;
    let body = data
        .get(offset..offset + count)
        .ok_or_else(|| Error::Dataset("label file is truncated".to_string()))?;
    Ok(body.to_vec())
}

/// First existing file among the dotted and dashed spellings of `stem`.
///
/// `resolve_idx_file(dir, "train-images", "idx3-ubyte")` accepts
/// `train-images.idx3-ubyte` and `train-images-idx3-ubyte`.
fn resolve_idx_file(dir: &Path, stem: &str, ext: &str) -> Result<PathBuf> {
    let dotted = dir.join(format!("{stem}.{ext}"));
    if dotted.is_file() {
        return Ok(dotted);
    }
    let dashed = dir.join(format!("{stem}-{ext}"));
    if dashed.is_file() {
        return Ok(dashed);
    }
    Err(Error::io(
        &dotted,
        std::io::Error::new(std::io::ErrorKind::NotFound, "MNIST file not found"),
    ))
}

fn load_split(dir: &Path, images_stem: &str, labels_stem: &str) -> Result<MnistSplit> {
    let images_path = resolve_idx_file(dir, images_stem, "idx3-ubyte")?;
    let labels_path = resolve_idx_file(dir, labels_stem, "idx1-ubyte")?;

    let images_raw = fs::read(&images_path).map_err(|e| Error::io(&images_path, e))?;
    let labels_raw = fs::read(&labels_path).map_err(|e| Error::io(&labels_path, e))?;

    let images = parse_idx_images(&images_raw)?;
    let labels = parse_idx_labels(&labels_raw)?;
    log::debug!(
        "read {} labels from {}",
        labels.len(),
        labels_path.display()
    );
    MnistSplit::new(images, labels)
}

/// Load the train and test splits from `dir`.
pub fn load_mnist(dir: &Path) -> Result<Mnist> {
    let train = load_split(dir, "train-images", "train-labels")?;
    let test = load_split(dir, "t10k-images", "t10k-labels")?;
    log::info!(
        "loaded MNIST from {}: {} train / {} test",
        dir.display(),
        train.len(),
        test.len()
    );
    Ok(Mnist { train, test })
}

/// Normalized image batch: values in `[0, 1]`, shape `(N, d0, d1, d2)` with the
/// per-sample dims ordered by `format`.
#[derive(Debug, Clone, PartialEq)]
pub struct ImageTensor {
    data: Vec<f32>,
    shape: [usize; 4],
    format: ImageDataFormat,
}

impl ImageTensor {
    /// Scale every pixel of `split` by `1 / 255` and lay it out per `format`.
    pub fn from_split(split: &MnistSplit, format: ImageDataFormat) -> Self {
        // A single channel makes both orderings the same bytes.
        let data: Vec<f32> = split
            .iter()
            .flat_map(|s| s.pixels.iter().map(|&p| p as f32 / 255.0))
            .collect();
        let [d0, d1, d2] = format.sample_dims(1, IMG_ROWS, IMG_COLS);
        Self {
            data,
            shape: [split.len(), d0, d1, d2],
            format,
        }
    }

    pub fn len(&self) -> usize {
        self.shape[0]
    }

    pub fn is_empty(&self) -> bool {
        self.shape[0] == 0
    }

    pub fn shape(&self) -> [usize; 4] {
        self.shape
    }

    pub fn format(&self) -> ImageDataFormat {
        self.format
    }

    pub fn data(&self) -> &[f32] {
        &self.data
    }

    pub fn sample_size(&self) -> usize {
        self.shape[1] * self.shape[2] * self.shape[3]
    }

    /// `(channels, height, width)` whatever the storage order.
    pub fn chw(&self) -> [usize; 3] {
        let [_, d0, d1, d2] = self.shape;
        match self.format {
            ImageDataFormat::ChannelsLast => [d2, d0, d1],
            ImageDataFormat::ChannelsFirst => [d0, d1, d2],
        }
    }

    /// The samples in channels-first order, as the layers consume them.
    pub fn to_channels_first(&self) -> Vec<f32> {
        match self.format {
            ImageDataFormat::ChannelsFirst => self.data.clone(),
            ImageDataFormat::ChannelsLast => {
                let [c, h, w] = self.chw();
                let mut out = vec![0.0f32; self.data.len()];
                for (src, dst) in self
                    .data
                    .chunks_exact(self.sample_size())
                    .zip(out.chunks_exact_mut(c * h * w))
                {
                    for y in 0..h {
                        for x in 0..w {
                            for ch in 0..c {
                                dst[ch * h * w + y * w + x] = src[(y * w + x) * c + ch];
                            }
                        }
                    }
                }
                out
            }
        }
    }

    /// Python-style tuple, e.g. `(60000, 28, 28, 1)`.
    pub fn shape_string(&self) -> String {
        let [n, a, b, c] = self.shape;
        format!("({n}, {a}, {b}, {c})")
    }
}

/// One-hot encode `labels` into rows of width `num_classes`.
pub fn to_categorical(labels: &[u8], num_classes: usize) -> Vec<f32> {
    let mut out = vec![0.0f32; labels.len() * num_classes];
    for (row, &label) in out.chunks_exact_mut(num_classes).zip(labels.iter()) {
        row[label as usize] = 1.0;
    }
    out
}

/// Index of the largest value (first one on ties).
pub fn argmax(row: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// Everything the train and test commands consume.
#[derive(Debug, Clone)]
pub struct PreparedData {
    pub x_train: ImageTensor,
    pub y_train: Vec<f32>,
    pub x_test: ImageTensor,
    pub y_test: Vec<f32>,
}

impl PreparedData {
    pub fn new(mnist: &Mnist, format: ImageDataFormat) -> Self {
        Self {
            x_train: ImageTensor::from_split(&mnist.train, format),
            y_train: to_categorical(mnist.train.labels(), NUM_CLASSES),
            x_test: ImageTensor::from_split(&mnist.test, format),
            y_test: to_categorical(mnist.test.labels(), NUM_CLASSES),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Encode images and labels as IDX files.
    pub(crate) fn idx_bytes(images: &[u8], labels: &[u8]) -> (Vec<u8>, Vec<u8>) {
        let mut img = Vec::new();
        img.extend_from_slice(&IMAGE_MAGIC.to_be_bytes());
        img.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        img.extend_from_slice(&(IMG_ROWS as u32).to_be_bytes());
        img.extend_from_slice(&(IMG_COLS as u32).to_be_bytes());
        img.extend_from_slice(images);

        let mut lab = Vec::new();
        lab.extend_from_slice(&LABEL_MAGIC.to_be_bytes());
        lab.extend_from_slice(&(labels.len() as u32).to_be_bytes());
        lab.extend_from_slice(labels);
        (img, lab)
    }

    #[test]
    fn test_read_be_u32() {
        let data = vec![0x01, 0x02, 0x03, 0x04, 0x00, 0x00];
        let mut offset = 0;

        assert_eq!(read_be_u32(&data, &mut offset).unwrap(), 0x01020304);
        assert_eq!(offset, 4);
        assert!(read_be_u32(&data, &mut offset).is_err());
    }

    #[test]
    fn test_parse_rejects_bad_magic_and_truncation() {
        let (img, lab) = idx_bytes(&[7u8; 784 * 2], &[1, 2]);

        assert_eq!(parse_idx_images(&img).unwrap().len(), 784 * 2);
        assert_eq!(parse_idx_labels(&lab).unwrap(), vec![1, 2]);

        assert!(matches!(parse_idx_images(&lab), Err(Error::Dataset(_))));
        assert!(matches!(parse_idx_labels(&img), Err(Error::Dataset(_))));
        assert!(parse_idx_images(&img[..img.len() - 1]).is_err());
        assert!(parse_idx_labels(&lab[..lab.len() - 1]).is_err());
    }

    #[test]
    fn test_split_rejects_count_mismatch() {
        assert!(MnistSplit::new(vec![0u8; 784], vec![1, 2]).is_err());
        assert!(MnistSplit::new(vec![0u8; 784], vec![10]).is_err());
    }

    #[test]
    fn test_channels_last_transpose() {
        let tensor = ImageTensor {
            data: vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0],
            shape: [1, 2, 2, 2],
            format: ImageDataFormat::ChannelsLast,
        };
        assert_eq!(tensor.chw(), [2, 2, 2]);
        assert_eq!(
            tensor.to_channels_first(),
            vec![1.0, 3.0, 5.0, 7.0, 2.0, 4.0, 6.0, 8.0]
        );
    }

    #[test]
    fn test_argmax_prefers_first_on_ties() {
        assert_eq!(argmax(&[0.1, 0.7, 0.7, 0.2]), 1);
        assert_eq!(argmax(&[3.0]), 0);
    }
}
