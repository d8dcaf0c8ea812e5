use env_logger::Env;
use mnist_nets::{
    config::TrainingConfig,
    mnist::{self, MnistData},
    models,
};
use std::error::Error;

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = TrainingConfig::mnist();
    let mnist_data = MnistData::load(&mnist::data_dir())?;
    let network = models::conv_classifier(&mut config.rng())?;

    let accuracy = mnist::train_and_evaluate(network, &mnist_data, &config)?;
    println!(
        "Accuracy of the model on the test images: {}%",
        accuracy.percent()
    );

    Ok(())
}
