use crate::{
    config::TrainingConfig,
    dataset::{Batch, DatasetProvider, Targets},
    error::{Error, Result},
    loss::Loss,
    loss_history::LossRecorder,
    network::{Gradients, Network},
    optimizer::Optimizer,
};
use log::{debug, info};
use ndarray_rand::rand::{Rng, rngs::StdRng};
use std::{fmt, io::Write};

/// Sums losses between two log points.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RunningLoss {
    sum: f64,
    count: usize,
}

impl RunningLoss {
    pub fn add(&mut self, loss: f64) {
        self.sum += loss;
        self.count += 1;
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// NaN and infinite losses are not filtered out, so this is how divergence shows up.
    pub fn is_finite(&self) -> bool {
        self.sum.is_finite()
    }

    /// Returns the mean since the last call and starts over. `None` if nothing was added.
    pub fn take_average(&mut self) -> Option<f64> {
        if self.count == 0 {
            return None;
        }
        let average = self.sum / self.count as f64;
        *self = RunningLoss::default();
        Some(average)
    }
}

/// Correct and total predictions over one evaluation pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Accuracy {
    pub correct: usize,
    pub total: usize,
}

impl Accuracy {
    /// `100 * correct / total`, truncated. An empty evaluation counts as 0%.
    pub fn percent(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        100 * self.correct / self.total
    }
}

impl fmt::Display for Accuracy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}%", self.percent())
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TrainingReport {
    pub epochs: usize,
    pub steps: usize,
    pub last_logged_loss: Option<f64>,
}

/// Owns everything one training run mutates: the network, the optimizer and its state, the loss
/// strategy, the gradient buffers and, optionally, where per-step losses are recorded.
pub struct TrainingSession<O: Optimizer> {
    network: Network,
    optimizer: O,
    loss: Loss,
    gradients: Gradients,
    recorder: Option<LossRecorder<Box<dyn Write>>>,
}

impl<O: Optimizer> TrainingSession<O> {
    pub fn new(network: Network, optimizer: O, loss: Loss) -> Result<TrainingSession<O>> {
        loss.validate(&network)?;
        let gradients = Gradients::zeros_like(network.parameters());
        Ok(TrainingSession {
            network,
            optimizer,
            loss,
            gradients,
            recorder: None,
        })
    }

    /// Records the loss of every step, one per line, to `writer`.
    pub fn with_loss_history(mut self, writer: impl Write + 'static) -> TrainingSession<O> {
        self.recorder = Some(LossRecorder::new(Box::new(writer)));
        self
    }

    pub fn network(&self) -> &Network {
        &self.network
    }

    pub fn into_network(self) -> Network {
        self.network
    }

    pub fn loss(&self) -> Loss {
        self.loss
    }

    pub fn gradients(&self) -> &Gradients {
        &self.gradients
    }

    /// Forward, loss, reset gradients, backward and optimizer step on one batch.
    ///
    /// # Returns
    /// The batch loss. It is returned as computed: a NaN or infinite loss is not an error and the
    /// update is still applied.
    pub fn step(&mut self, batch: &Batch) -> Result<f64> {
        let trace = self.network.forward_train(batch.inputs.view())?;
        let loss = self.loss.compute(&self.network, &trace, &batch.targets)?;

        self.optimizer.reset_gradients(&mut self.gradients);
        self.network
            .backward(&trace, loss.d_output, loss.fused_softmax, &mut self.gradients)?;
        self.optimizer
            .step(self.network.parameters_mut(), &self.gradients)?;

        if let Some(recorder) = &mut self.recorder {
            recorder.record(loss.value)?;
        }

        Ok(loss.value)
    }

    /// Runs `config.epochs` passes over `provider` in freshly shuffled order, logging the running
    /// loss every `config.log_interval` batches as `[epoch, batch] loss: <value>`.
    pub fn train<P, R>(
        &mut self,
        provider: &P,
        config: &TrainingConfig,
        rng: &mut R,
    ) -> Result<TrainingReport>
    where
        P: DatasetProvider,
        R: Rng + ?Sized,
    {
        config.validate()?;

        let mut report = TrainingReport::default();
        for epoch in 0..config.epochs {
            let mut running = RunningLoss::default();

            for (index, batch) in provider
                .batches(config.batch_size, Some(&mut *rng))?
                .enumerate()
            {
                running.add(self.step(&batch)?);
                report.steps += 1;

                if (index + 1) % config.log_interval == 0 {
                    if let Some(average) = running.take_average() {
                        info!("[{}, {:5}] loss: {:.3}", epoch + 1, index + 1, average);
                        report.last_logged_loss = Some(average);
                    }
                }
            }

            report.epochs += 1;
            debug!("finished epoch {} after {} steps", epoch + 1, report.steps);
        }

        self.flush_history()?;
        Ok(report)
    }

    pub fn flush_history(&mut self) -> Result<()> {
        if let Some(recorder) = &mut self.recorder {
            recorder.flush()?;
        }
        Ok(())
    }

    pub fn evaluate<P: DatasetProvider>(&self, provider: &P, batch_size: usize) -> Result<Accuracy> {
        evaluate(&self.network, provider, batch_size)
    }
}

/// Runs the network over `provider` in stored order and counts how often the highest-scoring
/// class is the labelled one. Only forward passes are made, so the network is never changed.
pub fn evaluate<P: DatasetProvider>(
    network: &Network,
    provider: &P,
    batch_size: usize,
) -> Result<Accuracy> {
    let mut accuracy = Accuracy::default();

    for batch in provider.batches::<StdRng>(batch_size, None)? {
        let Targets::Classes(labels) = &batch.targets else {
            return Err(Error::InvalidConfig(
                "accuracy needs class labels as targets".to_owned(),
            ));
        };

        let output = network.forward(batch.inputs.view())?;
        for (row, &label) in output.outer_iter().zip(labels) {
            let predicted = row
                .iter()
                .enumerate()
                .max_by(|(_, a), (_, b)| a.total_cmp(b))
                .map(|(index, _)| index);
            if predicted == Some(label) {
                accuracy.correct += 1;
            }
            accuracy.total += 1;
        }
    }

    Ok(accuracy)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        dataset::Dataset,
        layers::Linear,
        optimizer::{Adam, Sgd},
    };
    use ndarray::{Array2, array};
    use ndarray_rand::rand::SeedableRng;

    fn classifier(rng: &mut StdRng) -> Network {
        Network::builder()
            .declare("fc", Linear::new(2, 2))
            .layer("fc")
            .softmax()
            .build(rng)
            .unwrap()
    }

    // Points above the diagonal are class 1, below are class 0.
    fn separable(rng: &mut StdRng, len: usize) -> Dataset {
        let inputs = Array2::from_shape_fn((len, 2), |_| rng.gen_range(-1.0..1.0));
        let labels = inputs
            .outer_iter()
            .map(|row| usize::from(row[1] > row[0]))
            .collect();
        Dataset::classification(inputs, labels).unwrap()
    }

    #[test]
    fn running_loss_averages_and_resets() {
        let mut running = RunningLoss::default();
        assert_eq!(running.take_average(), None);
        running.add(1.0);
        running.add(3.0);
        assert_eq!(running.take_average(), Some(2.0));
        assert_eq!(running.count(), 0);
    }

    #[test]
    fn running_loss_reports_divergence() {
        let mut running = RunningLoss::default();
        running.add(0.5);
        running.add(f64::NAN);
        assert!(!running.is_finite());
        assert!(running.take_average().unwrap().is_nan());
    }

    #[test]
    fn accuracy_percent_truncates() {
        let accuracy = Accuracy {
            correct: 2,
            total: 3,
        };
        assert_eq!(accuracy.percent(), 66);
        assert_eq!(accuracy.to_string(), "66%");
        assert_eq!(Accuracy::default().percent(), 0);
    }

    #[test]
    fn cross_entropy_needs_a_softmax_head() {
        let mut rng = StdRng::seed_from_u64(0);
        let network = Network::builder()
            .declare("fc", Linear::new(2, 2))
            .layer("fc")
            .build(&mut rng)
            .unwrap();
        let result = TrainingSession::new(network, Sgd::new(0.1).unwrap(), Loss::CrossEntropy);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));
    }

    #[test]
    fn training_learns_a_separable_problem() {
        let mut rng = StdRng::seed_from_u64(21);
        let train = separable(&mut rng, 512);
        let test = separable(&mut rng, 256);
        let network = classifier(&mut rng);
        let adam = Adam::new(network.parameters(), 0.05).unwrap();
        let mut session = TrainingSession::new(network, adam, Loss::CrossEntropy).unwrap();

        let config = TrainingConfig {
            epochs: 20,
            batch_size: 32,
            log_interval: 4,
            learning_rate: 0.05,
            seed: Some(21),
        };
        let report = session.train(&train, &config, &mut rng).unwrap();

        assert_eq!(report.epochs, 20);
        assert_eq!(report.steps, 20 * 16);
        assert!(report.last_logged_loss.unwrap() < 0.3);
        assert!(session.evaluate(&test, 64).unwrap().percent() >= 90);
    }

    #[test]
    fn zero_epochs_leave_parameters_untouched() {
        let mut rng = StdRng::seed_from_u64(2);
        let data = separable(&mut rng, 16);
        let network = classifier(&mut rng);
        let before = network.parameters().to_vec();
        let adam = Adam::new(network.parameters(), 0.001).unwrap();
        let mut session = TrainingSession::new(network, adam, Loss::CrossEntropy).unwrap();

        let report = session
            .train(&data, &TrainingConfig::mnist().with_epochs(0), &mut rng)
            .unwrap();

        assert_eq!(report, TrainingReport::default());
        assert_eq!(session.network().parameters(), &before[..]);
    }

    #[test]
    fn step_resets_gradients_instead_of_accumulating() {
        let mut rng = StdRng::seed_from_u64(4);
        let network = classifier(&mut rng);
        let mut session =
            TrainingSession::new(network, Sgd::new(1e-12).unwrap(), Loss::CrossEntropy).unwrap();
        let batch = Batch {
            inputs: array![[0.5, -0.5]],
            targets: Targets::Classes(vec![1]),
        };

        session.step(&batch).unwrap();
        let first = session.gradients().clone();
        session.step(&batch).unwrap();

        // The parameters barely moved, so an accumulating loop would show roughly twice the
        // gradient here.
        for (second, first) in session.gradients().iter().zip(first.iter()) {
            for (a, b) in second.iter().zip(first.iter()) {
                assert!((a - b).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn nan_inputs_propagate_without_an_error() {
        let mut rng = StdRng::seed_from_u64(8);
        let network = classifier(&mut rng);
        let mut session =
            TrainingSession::new(network, Sgd::new(0.1).unwrap(), Loss::CrossEntropy).unwrap();
        let batch = Batch {
            inputs: array![[f64::NAN, 0.0]],
            targets: Targets::Classes(vec![0]),
        };

        let loss = session.step(&batch).unwrap();
        assert!(loss.is_nan());
        assert!(
            session
                .network()
                .parameters()
                .iter()
                .any(|p| p.value().iter().any(|v| v.is_nan()))
        );
    }

    #[test]
    fn evaluation_requires_class_labels() {
        let mut rng = StdRng::seed_from_u64(0);
        let network = classifier(&mut rng);
        let data = Dataset::new(
            Array2::zeros((2, 2)),
            Targets::Values(Array2::zeros((2, 1))),
        )
        .unwrap();
        assert!(matches!(
            evaluate(&network, &data, 2),
            Err(Error::InvalidConfig(_))
        ));
    }
}
