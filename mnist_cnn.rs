use anyhow::Context;
use clap::Parser;
use mnist_convnet::commands;
use mnist_convnet::config::RunConfig;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let config = RunConfig::parse();
    log::debug!("{config:?}");

    commands::run(&config).with_context(|| format!("mnist_cnn --mode {} failed", config.mode))
}
