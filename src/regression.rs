use crate::{
    config::TrainingConfig,
    dataset::{Batch, Targets},
    error::{Error, Result},
    network::Network,
    optimizer::Optimizer,
    session::{RunningLoss, TrainingSession},
};
use log::info;
use ndarray::{Array2, array};
use ndarray_rand::rand::Rng;

/// Draws fresh `(x, x^2)` pairs with `x` uniform in `[low, high)`, `[-1, 1)` by default.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SquareSampler {
    low: f64,
    high: f64,
}

impl Default for SquareSampler {
    fn default() -> Self {
        SquareSampler {
            low: -1.0,
            high: 1.0,
        }
    }
}

impl SquareSampler {
    pub fn new(low: f64, high: f64) -> Result<SquareSampler> {
        if !(low.is_finite() && high.is_finite() && low < high) {
            return Err(Error::InvalidConfig(format!(
                "sampling range [{low}, {high}) is empty or not finite"
            )));
        }
        Ok(SquareSampler { low, high })
    }

    pub fn sample<R: Rng + ?Sized>(&self, batch_size: usize, rng: &mut R) -> Batch {
        let inputs = Array2::from_shape_fn((batch_size, 1), |_| rng.gen_range(self.low..self.high));
        let targets = inputs.mapv(|x| x * x);
        Batch {
            inputs,
            targets: Targets::Values(targets),
        }
    }
}

/// Trains on a freshly drawn batch every epoch, with no fixed dataset. Every
/// `config.log_interval` epochs the running loss is logged as `Epoch [n/total], Loss: <value>`.
///
/// # Returns
/// The last logged running loss, if any epoch reached a log point.
pub fn fit_square<O, R>(
    session: &mut TrainingSession<O>,
    sampler: &SquareSampler,
    config: &TrainingConfig,
    rng: &mut R,
) -> Result<Option<f64>>
where
    O: Optimizer,
    R: Rng + ?Sized,
{
    config.validate()?;

    let mut running = RunningLoss::default();
    let mut last_logged = None;

    for epoch in 0..config.epochs {
        let batch = sampler.sample(config.batch_size, rng);
        running.add(session.step(&batch)?);

        if (epoch + 1) % config.log_interval == 0 {
            if let Some(average) = running.take_average() {
                info!("Epoch [{}/{}], Loss: {:.4}", epoch + 1, config.epochs, average);
                last_logged = Some(average);
            }
        }
    }

    session.flush_history()?;
    Ok(last_logged)
}

/// Runs a single scalar through a 1 -> 1 network.
pub fn predict_scalar(network: &Network, x: f64) -> Result<f64> {
    let output = network.forward(array![[x]].view())?;
    Ok(output[[0, 0]])
}
