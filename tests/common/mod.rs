// Helpers shared by the integration tests: synthetic MNIST files in IDX format.

#![allow(dead_code)]

use std::fs;
use std::path::Path;

pub const IMAGE_SIZE: usize = 28 * 28;

// Deterministic image whose bright band depends on the label.
pub fn synthetic_image(label: u8, variant: usize) -> Vec<u8> {
    let mut pixels = vec![0u8; IMAGE_SIZE];
    let row = 2 + 2 * label as usize;
    for y in row..row + 3 {
        for x in 4..24 {
            pixels[y * 28 + x] = 200u8.wrapping_add((variant * 7 + x) as u8 % 55);
        }
    }
    pixels
}

pub fn idx_images(images: &[Vec<u8>]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0803u32.to_be_bytes());
    out.extend_from_slice(&(images.len() as u32).to_be_bytes());
    out.extend_from_slice(&28u32.to_be_bytes());
    out.extend_from_slice(&28u32.to_be_bytes());
    for image in images {
        out.extend_from_slice(image);
    }
    out
}

pub fn idx_labels(labels: &[u8]) -> Vec<u8> {
    let mut out = Vec::new();
    out.extend_from_slice(&0x0801u32.to_be_bytes());
    out.extend_from_slice(&(labels.len() as u32).to_be_bytes());
    out.extend_from_slice(labels);
    out
}

fn write_split(dir: &Path, images_stem: &str, labels_stem: &str, n: usize, sep: char) {
    let labels: Vec<u8> = (0..n).map(|i| (i % 10) as u8).collect();
    let images: Vec<Vec<u8>> = labels
        .iter()
        .enumerate()
        .map(|(i, &l)| synthetic_image(l, i))
        .collect();
    fs::write(
        dir.join(format!("{images_stem}{sep}idx3-ubyte")),
        idx_images(&images),
    )
    .unwrap();
    fs::write(
        dir.join(format!("{labels_stem}{sep}idx1-ubyte")),
        idx_labels(&labels),
    )
    .unwrap();
}

// Write the four MNIST files into `dir`; `dashed` selects the `-idx3-ubyte` spelling.
pub fn write_mnist(dir: &Path, train: usize, test: usize, dashed: bool) {
    fs::create_dir_all(dir).unwrap();
    let sep = if dashed { '-' } else { '.' };
    write_split(dir, "train-images", "train-labels", train, sep);
    write_split(dir, "t10k-images", "t10k-labels", test, sep);
}
