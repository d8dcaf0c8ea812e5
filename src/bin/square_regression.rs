use env_logger::Env;
use mnist_nets::{
    config::TrainingConfig,
    loss::Loss,
    loss_history, models,
    optimizer::Sgd,
    regression::{self, SquareSampler},
    session::TrainingSession,
};
use std::{error::Error, fs::File, io::BufWriter};

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let config = TrainingConfig::square_regression();
    let mut rng = config.rng();

    let network = models::square_regressor(&mut rng)?;
    let mut session = TrainingSession::new(
        network,
        Sgd::new(config.learning_rate)?,
        Loss::MeanSquaredError,
    )?;
    if let Some(path) = loss_history::history_path() {
        session = session.with_loss_history(BufWriter::new(File::create(path)?));
    }

    regression::fit_square(&mut session, &SquareSampler::default(), &config, &mut rng)?;

    let input = 1.0;
    let predicted = regression::predict_scalar(session.network(), input)?;
    println!("Input: {input}, Predicted: {predicted:.4}, Expected: {:.4}", input * input);

    Ok(())
}
