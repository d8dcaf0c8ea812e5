use mnist_nets::{
    config::TrainingConfig,
    dataset::Dataset,
    loss::Loss,
    loss_history::{LossCurve, read_loss_history},
    models::{self, MNIST_PIXELS},
    network::Gradients,
    optimizer::{Adam, Optimizer, Sgd},
    regression::{self, SquareSampler},
    session::{self, TrainingSession},
};
use ndarray::Array2;
use ndarray_rand::{
    RandomExt,
    rand::{Rng, SeedableRng, rngs::StdRng},
    rand_distr::Uniform,
};
use std::{
    fs::{self, File},
    io::{BufReader, BufWriter},
};

fn fake_mnist(rng: &mut StdRng, len: usize) -> Dataset {
    let inputs = Array2::random_using((len, MNIST_PIXELS), Uniform::new(0.0, 1.0), rng);
    let labels = (0..len).map(|_| rng.gen_range(0..10)).collect();
    Dataset::classification(inputs, labels).unwrap()
}

#[test]
fn zero_gradients_leave_parameters_unchanged() {
    let mut rng = StdRng::seed_from_u64(1);
    let network = models::dense_classifier(&mut rng).unwrap();
    let before = network.parameters().to_vec();
    let zeros = Gradients::zeros_like(network.parameters());

    let mut parameters = network.parameters().to_vec();
    Sgd::new(0.01)
        .unwrap()
        .step(&mut parameters, &zeros)
        .unwrap();
    assert_eq!(parameters, before);

    Adam::new(&before, 0.001)
        .unwrap()
        .step(&mut parameters, &zeros)
        .unwrap();
    assert_eq!(parameters, before);
}

#[test]
fn training_for_zero_epochs_changes_nothing() {
    let mut rng = StdRng::seed_from_u64(2);
    let data = fake_mnist(&mut rng, 8);
    let network = models::dense_classifier(&mut rng).unwrap();
    let before = network.clone();
    let adam = Adam::new(network.parameters(), 0.001).unwrap();
    let mut session = TrainingSession::new(network, adam, Loss::CrossEntropy).unwrap();

    let report = session
        .train(&data, &TrainingConfig::mnist().with_epochs(0), &mut rng)
        .unwrap();

    assert_eq!(report.steps, 0);
    assert_eq!(session.network().parameters(), before.parameters());
}

#[test]
fn evaluation_is_repeatable_and_side_effect_free() {
    let mut rng = StdRng::seed_from_u64(3);
    let data = fake_mnist(&mut rng, 50);
    let network = models::conv_classifier(&mut rng).unwrap();
    let before = network.clone();

    let first = session::evaluate(&network, &data, 16).unwrap();
    let second = session::evaluate(&network, &data, 16).unwrap();

    assert_eq!(first, second);
    assert_eq!(first.total, 50);
    assert_eq!(network.parameters(), before.parameters());
}

#[test]
fn a_few_conv_steps_reduce_the_loss_on_a_fixed_batch() {
    let mut rng = StdRng::seed_from_u64(4);
    let data = fake_mnist(&mut rng, 16);
    let network = models::conv_classifier(&mut rng).unwrap();
    let adam = Adam::new(network.parameters(), 0.001).unwrap();
    let mut session = TrainingSession::new(network, adam, Loss::CrossEntropy).unwrap();

    let config = TrainingConfig {
        epochs: 1,
        batch_size: 16,
        log_interval: 1,
        learning_rate: 0.001,
        seed: Some(4),
    };
    let first = session.train(&data, &config, &mut rng).unwrap();
    let later = session
        .train(&data, &config.clone().with_epochs(20), &mut rng)
        .unwrap();

    assert!(later.last_logged_loss.unwrap() < first.last_logged_loss.unwrap());
}

#[test]
fn square_regression_preset_fits_near_one() {
    // Same setup as the regression binary, cut to 300k of its samples.
    let config = TrainingConfig::square_regression()
        .with_epochs(300_000)
        .with_seed(2);
    let mut rng = config.rng();
    let network = models::square_regressor(&mut rng).unwrap();
    let mut session = TrainingSession::new(
        network,
        Sgd::new(config.learning_rate).unwrap(),
        Loss::MeanSquaredError,
    )
    .unwrap();

    regression::fit_square(&mut session, &SquareSampler::default(), &config, &mut rng).unwrap();

    let predicted = regression::predict_scalar(session.network(), 1.0).unwrap();
    assert!((predicted - 1.0).abs() < 0.1, "predicted {predicted}");
}

#[test]
fn sessions_write_a_readable_loss_history() {
    let path = std::env::temp_dir().join(format!("mnist-nets-history-{}.txt", std::process::id()));
    let mut rng = StdRng::seed_from_u64(9);
    let network = models::square_regressor(&mut rng).unwrap();
    let mut session =
        TrainingSession::new(network, Sgd::new(0.01).unwrap(), Loss::MeanSquaredError)
            .unwrap()
            .with_loss_history(BufWriter::new(File::create(&path).unwrap()));

    let config = TrainingConfig::square_regression()
        .with_epochs(300)
        .with_seed(9);
    regression::fit_square(&mut session, &SquareSampler::default(), &config, &mut rng).unwrap();
    drop(session);

    let values = read_loss_history(BufReader::new(File::open(&path).unwrap())).unwrap();
    fs::remove_file(&path).unwrap();

    assert_eq!(values.len(), 300);
    let curve = LossCurve::from_history(&values);
    assert_eq!(curve.points[0], (0, values[0]));
    assert_eq!(curve.points[299].0, 299);
}

#[test]
fn loss_history_points_follow_file_order() {
    let values = read_loss_history("0.9\n0.5\n0.2\n".as_bytes()).unwrap();
    let curve = LossCurve::from_history(&values);
    assert_eq!(curve.points, [(0, 0.9), (1, 0.5), (2, 0.2)]);
    assert_eq!((curve.x_label, curve.y_label), ("Training Pairs", "Loss"));
}

