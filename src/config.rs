use crate::error::{Error, Result};
use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

/// Fixed hyperparameters of one training run.
#[derive(Clone, Debug, PartialEq)]
pub struct TrainingConfig {
    pub epochs: usize,
    pub batch_size: usize,
    /// Emit the running loss every this many batches (or epochs, for the regression demo).
    pub log_interval: usize,
    pub learning_rate: f64,
    /// Seed for initialization and shuffling. `None` seeds from the operating system.
    pub seed: Option<u64>,
}

impl TrainingConfig {
    /// The MNIST classifiers: 5 epochs of shuffled batches of 64, Adam at 0.001.
    pub fn mnist() -> TrainingConfig {
        TrainingConfig {
            epochs: 5,
            batch_size: 64,
            log_interval: 100,
            learning_rate: 0.001,
            seed: None,
        }
    }

    /// The x -> x^2 demo: one fresh sample per epoch, SGD at 0.01.
    pub fn square_regression() -> TrainingConfig {
        TrainingConfig {
            epochs: 1_000_000,
            batch_size: 1,
            log_interval: 100,
            learning_rate: 0.01,
            seed: None,
        }
    }

    pub fn with_epochs(mut self, epochs: usize) -> TrainingConfig {
        self.epochs = epochs;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> TrainingConfig {
        self.seed = Some(seed);
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be > 0".to_owned()));
        }
        if self.log_interval == 0 {
            return Err(Error::InvalidConfig("log interval must be > 0".to_owned()));
        }
        Ok(())
    }

    pub fn rng(&self) -> StdRng {
        match self.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        }
    }
}

impl Default for TrainingConfig {
    fn default() -> Self {
        TrainingConfig::mnist()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray_rand::rand::Rng;

    #[test]
    fn presets_validate() {
        assert!(TrainingConfig::mnist().validate().is_ok());
        assert!(TrainingConfig::square_regression().validate().is_ok());
    }

    #[test]
    fn zero_log_interval_is_rejected() {
        let config = TrainingConfig {
            log_interval: 0,
            ..TrainingConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn seeded_configs_give_identical_streams() {
        let config = TrainingConfig::mnist().with_seed(42);
        let a: u64 = config.rng().gen_range(0..u64::MAX);
        let b: u64 = config.rng().gen_range(0..u64::MAX);
        assert_eq!(a, b);
    }
}
