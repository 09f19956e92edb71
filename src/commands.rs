//! The two run modes and their shared setup.

use crate::architecture::mnist_cnn;
use crate::callbacks::{Callback, ProgressLogger};
use crate::config::RunConfig;
use crate::data::{load_mnist, PreparedData};
use crate::error::{Error, Result};
use crate::model::{CompileConfig, Evaluation, FitOptions, History, Sequential};
use crate::persist::{load_model, save_model};
use crate::summary::SummaryWriter;
use crate::utils::SimpleRng;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    Train,
    Evaluate,
}

impl Command {
    /// `"train"` and `"test"`; anything else is `None`.
    pub fn from_mode(mode: &str) -> Option<Command> {
        match mode {
            "train" => Some(Command::Train),
            "test" => Some(Command::Evaluate),
            _ => None,
        }
    }
}

/// Dispatch on `config.mode`. An unknown mode is logged and does nothing.
pub fn run(config: &RunConfig) -> Result<()> {
    let Some(command) = Command::from_mode(&config.mode) else {
        log::warn!(
            "unrecognized mode '{}', expected 'train' or 'test'; nothing to do",
            config.mode
        );
        return Ok(());
    };

    let data = prepare_data(config)?;
    let mut rng = match config.seed {
        Some(seed) => SimpleRng::new(seed),
        None => SimpleRng::from_time(),
    };
    let model = Sequential::new(
        mnist_cnn(config.image_data_format),
        CompileConfig::default(),
        &mut rng,
    )?;
    println!("{}", model.summary());

    match command {
        Command::Train => {
            train(config, model, &data)?;
        }
        Command::Evaluate => {
            evaluate(config, model, &data)?;
        }
    }
    Ok(())
}

fn prepare_data(config: &RunConfig) -> Result<PreparedData> {
    let mnist = load_mnist(&config.data_dir)?;
    let data = PreparedData::new(&mnist, config.image_data_format);

    println!("x_train shape: {}", data.x_train.shape_string());
    println!("{} train samples", data.x_train.len());
    println!("{} test samples", data.x_test.len());
    Ok(data)
}

/// Fit on the training split in file order, then save to `config.model_path`.
pub fn train(
    config: &RunConfig,
    mut model: Sequential,
    data: &PreparedData,
) -> Result<History> {
    let x_train = data.x_train.to_channels_first();
    let options = FitOptions {
        batch_size: config.batch_size(),
        epochs: config.epochs,
    };
    log::info!(
        "training: epochs={} batch={} lr={}",
        options.epochs,
        options.batch_size,
        model.optimizer().learning_rate()
    );

    let mut progress = ProgressLogger;
    let mut summary = SummaryWriter::new(&config.log_dir);
    let mut callbacks: [&mut dyn Callback; 2] = [&mut progress, &mut summary];
    let history = model.fit(&x_train, &data.y_train, options, &mut callbacks)?;

    println!("Saving CNN to {}", config.model_path.display());
    save_model(&model, &config.model_path)?;
    Ok(history)
}

/// Replace `model` with the saved one and score it on the test split.
pub fn evaluate(config: &RunConfig, model: Sequential, data: &PreparedData) -> Result<Evaluation> {
    let mut loaded = load_model(&config.model_path)?;
    log::debug!(
        "replacing freshly built {}-layer model with the saved one",
        model.layers().len()
    );
    drop(model);

    if loaded.architecture().input_shape != data.x_test.chw() {
        return Err(Error::Artifact(format!(
            "model expects input {:?} (C, H, W), test data is {:?}",
            loaded.architecture().input_shape,
            data.x_test.chw()
        )));
    }

    let x_test = data.x_test.to_channels_first();
    let score = loaded.evaluate(&x_test, &data.y_test, config.batch_size())?;

    println!("Test loss: {}", score.loss);
    println!("Test accuracy: {:.2}%", score.accuracy * 100.0);
    Ok(score)
}
