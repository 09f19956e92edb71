mod common;

use approx::assert_relative_eq;
use clap::Parser;
use mnist_convnet::architecture::mnist_cnn;
use mnist_convnet::commands;
use mnist_convnet::config::RunConfig;
use mnist_convnet::data::{load_mnist, ImageDataFormat, PreparedData};
use mnist_convnet::model::{CompileConfig, FitOptions, Sequential};
use mnist_convnet::persist::{load_model, save_model};
use mnist_convnet::utils::SimpleRng;
use std::fs;
use std::path::Path;
use tempfile::tempdir;

fn prepared(dir: &Path, train: usize, test: usize) -> PreparedData {
    common::write_mnist(dir, train, test, false);
    PreparedData::new(&load_mnist(dir).unwrap(), ImageDataFormat::ChannelsLast)
}

fn build(seed: u64) -> Sequential {
    let mut rng = SimpleRng::new(seed);
    Sequential::new(
        mnist_cnn(ImageDataFormat::ChannelsLast),
        CompileConfig::default(),
        &mut rng,
    )
    .unwrap()
}

fn run_config(root: &Path, epochs: usize) -> RunConfig {
    RunConfig::try_parse_from([
        "mnist_cnn".to_string(),
        "--batch-size".to_string(),
        "8".to_string(),
        "--epochs".to_string(),
        epochs.to_string(),
        "--model_path".to_string(),
        root.join("models/cnn.keras").display().to_string(),
        "--data-dir".to_string(),
        root.join("data").display().to_string(),
        "--log-dir".to_string(),
        root.join("logs").display().to_string(),
        "--seed".to_string(),
        "5".to_string(),
    ])
    .unwrap()
}

#[test]
fn test_saved_model_evaluates_like_in_memory_model() {
    let dir = tempdir().unwrap();
    let data = prepared(&dir.path().join("data"), 16, 10);
    let x_train = data.x_train.to_channels_first();
    let x_test = data.x_test.to_channels_first();

    let mut model = build(21);
    let options = FitOptions {
        batch_size: 8,
        epochs: 1,
    };
    model.fit(&x_train, &data.y_train, options, &mut []).unwrap();
    let expected = model.evaluate(&x_test, &data.y_test, 4).unwrap();

    let path = dir.path().join("cnn.keras");
    save_model(&model, &path).unwrap();
    let mut restored = load_model(&path).unwrap();
    let actual = restored.evaluate(&x_test, &data.y_test, 4).unwrap();

    assert_relative_eq!(actual.loss, expected.loss, epsilon = 1e-5);
    assert_eq!(actual.accuracy, expected.accuracy);
    assert_eq!(restored.optimizer().iterations(), 2);
}

#[test]
fn test_evaluation_is_batch_size_independent() {
    let dir = tempdir().unwrap();
    let data = prepared(&dir.path().join("data"), 4, 10);
    let x_test = data.x_test.to_channels_first();
    let mut model = build(2);

    let a = model.evaluate(&x_test, &data.y_test, 3).unwrap();
    let b = model.evaluate(&x_test, &data.y_test, 10).unwrap();
    assert_relative_eq!(a.loss, b.loss, epsilon = 1e-5);
    assert_eq!(a.accuracy, b.accuracy);
}

#[test]
fn test_zero_epochs_saves_initial_parameters() {
    let dir = tempdir().unwrap();
    let data = prepared(&dir.path().join("data"), 8, 4);
    let config = run_config(dir.path(), 0);

    let model = build(8);
    let initial = model.state();
    let history = commands::train(&config, model, &data).unwrap();
    assert!(history.loss.is_empty());

    let saved = load_model(&config.model_path).unwrap();
    assert_eq!(saved.state(), initial);
    assert_eq!(saved.optimizer().iterations(), 0);

    let train_logs = dir.path().join("logs/train");
    assert!(train_logs.join("graph.json").is_file());
    let scalars = fs::read_to_string(train_logs.join("scalars.csv")).unwrap();
    assert_eq!(scalars.trim(), "epoch,loss,accuracy,seconds");
}

#[test]
fn test_train_writes_metrics_per_epoch() {
    let dir = tempdir().unwrap();
    let data = prepared(&dir.path().join("data"), 12, 4);
    let config = run_config(dir.path(), 2);

    let history = commands::train(&config, build(4), &data).unwrap();
    assert_eq!(history.loss.len(), 2);
    assert!(history.loss.iter().all(|l| l.is_finite()));

    let train_logs = dir.path().join("logs/train");
    let scalars = fs::read_to_string(train_logs.join("scalars.csv")).unwrap();
    let rows: Vec<&str> = scalars.lines().collect();
    assert_eq!(rows.len(), 3);
    assert!(rows[1].starts_with("1,"));
    assert!(rows[2].starts_with("2,"));

    let histograms = fs::read_to_string(train_logs.join("histograms.jsonl")).unwrap();
    let first: serde_json::Value =
        serde_json::from_str(histograms.lines().next().unwrap()).unwrap();
    assert_eq!(first["epoch"], 1);
    assert_eq!(first["tag"], "conv2d/kernel");
    assert_eq!(first["counts"].as_array().unwrap().len(), 30);

    let graph: serde_json::Value =
        serde_json::from_slice(&fs::read(train_logs.join("graph.json")).unwrap()).unwrap();
    assert_eq!(graph["compile"]["loss"], "categorical_crossentropy");
}

#[test]
fn test_evaluate_rejects_mismatched_input_shape() {
    let dir = tempdir().unwrap();
    let data = prepared(&dir.path().join("data"), 4, 4);
    let config = run_config(dir.path(), 0);

    // Same number of values per sample, different image geometry
    let mut artifact = mnist_convnet::persist::ModelArtifact::from_model(&build(1));
    artifact.architecture.input_shape = [2, 28, 14];
    fs::create_dir_all(config.model_path.parent().unwrap()).unwrap();
    fs::write(&config.model_path, serde_json::to_vec(&artifact).unwrap()).unwrap();

    assert!(commands::evaluate(&config, build(1), &data).is_err());
}
