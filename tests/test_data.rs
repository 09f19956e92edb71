mod common;

use approx::assert_relative_eq;
use mnist_convnet::data::{
    argmax, load_mnist, to_categorical, ImageDataFormat, PreparedData, NUM_CLASSES,
};
use mnist_convnet::Error;
use std::fs;
use tempfile::tempdir;

#[test]
fn test_load_and_normalize() {
    let dir = tempdir().unwrap();
    common::write_mnist(dir.path(), 20, 10, false);

    let mnist = load_mnist(dir.path()).unwrap();
    assert_eq!(mnist.train.len(), 20);
    assert_eq!(mnist.test.len(), 10);

    let data = PreparedData::new(&mnist, ImageDataFormat::ChannelsLast);
    assert_eq!(data.x_train.shape(), [20, 28, 28, 1]);
    assert_eq!(data.x_test.shape(), [10, 28, 28, 1]);
    assert_eq!(data.x_train.shape_string(), "(20, 28, 28, 1)");

    let raw = mnist.train.sample(3);
    for (&v, &p) in data.x_train.data()[3 * 784..4 * 784].iter().zip(raw.pixels) {
        assert!((0.0..=1.0).contains(&v));
        assert_relative_eq!(v, p as f32 / 255.0, epsilon = 1e-6);
    }
}

#[test]
fn test_train_and_test_sample_shapes_match() {
    let dir = tempdir().unwrap();
    common::write_mnist(dir.path(), 12, 5, false);
    let mnist = load_mnist(dir.path()).unwrap();

    for format in [ImageDataFormat::ChannelsLast, ImageDataFormat::ChannelsFirst] {
        let data = PreparedData::new(&mnist, format);
        assert_eq!(data.x_train.shape()[1..], data.x_test.shape()[1..]);
        assert_eq!(data.x_train.len(), 12);
        assert_eq!(data.x_test.len(), 5);
        assert_eq!(data.y_train.len(), 12 * NUM_CLASSES);
    }

    let first = PreparedData::new(&mnist, ImageDataFormat::ChannelsFirst);
    assert_eq!(first.x_train.shape(), [12, 1, 28, 28]);
    let last = PreparedData::new(&mnist, ImageDataFormat::ChannelsLast);
    assert_eq!(
        first.x_train.to_channels_first(),
        last.x_train.to_channels_first()
    );
}

#[test]
fn test_one_hot_rows() {
    let labels = [0u8, 9, 3, 3, 7];
    let y = to_categorical(&labels, NUM_CLASSES);

    for (row, &label) in y.chunks_exact(NUM_CLASSES).zip(labels.iter()) {
        assert_eq!(row.len(), 10);
        assert_eq!(row.iter().filter(|&&v| v == 1.0).count(), 1);
        assert_eq!(row.iter().sum::<f32>(), 1.0);
        assert_eq!(argmax(row), label as usize);
    }
}

#[test]
fn test_dashed_file_names_are_accepted() {
    let dir = tempdir().unwrap();
    common::write_mnist(dir.path(), 4, 2, true);

    let mnist = load_mnist(dir.path()).unwrap();
    assert_eq!(mnist.train.len(), 4);
    assert_eq!(mnist.test.sample(1).label, 1);
}

#[test]
fn test_missing_file_is_io_error() {
    let dir = tempdir().unwrap();
    common::write_mnist(dir.path(), 4, 2, false);
    fs::remove_file(dir.path().join("t10k-labels.idx1-ubyte")).unwrap();

    match load_mnist(dir.path()) {
        Err(Error::Io { path, .. }) => assert!(path.ends_with("t10k-labels.idx1-ubyte")),
        other => panic!("expected io error, got {other:?}"),
    }
}

#[test]
fn test_count_mismatch_is_dataset_error() {
    let dir = tempdir().unwrap();
    common::write_mnist(dir.path(), 4, 2, false);
    fs::write(
        dir.path().join("train-labels.idx1-ubyte"),
        common::idx_labels(&[1, 2, 3]),
    )
    .unwrap();

    assert!(matches!(load_mnist(dir.path()), Err(Error::Dataset(_))));
}
