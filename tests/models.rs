use mnist_nets::{
    Error,
    layers::{Conv2d, LayerNorm, Linear},
    models::{self, MNIST_CLASSES, MNIST_PIXELS},
    network::Network,
};
use ndarray::Array2;
use ndarray_rand::{
    RandomExt,
    rand::{SeedableRng, rngs::StdRng},
    rand_distr::Uniform,
};

fn images(rng: &mut StdRng, count: usize) -> Array2<f64> {
    Array2::random_using((count, MNIST_PIXELS), Uniform::new(0.0, 1.0), rng)
}

#[test]
fn classifiers_emit_one_distribution_per_image() {
    let mut rng = StdRng::seed_from_u64(5);
    let inputs = images(&mut rng, 3);

    for network in [
        models::dense_classifier(&mut rng).unwrap(),
        models::conv_classifier(&mut rng).unwrap(),
    ] {
        let output = network.forward(inputs.view()).unwrap();
        assert_eq!(output.dim(), (3, MNIST_CLASSES));
        for row in output.outer_iter() {
            assert!((row.sum() - 1.0).abs() < 1e-9);
            assert!(row.iter().all(|&p| (0.0..=1.0).contains(&p)));
        }
    }
}

#[test]
fn square_regressor_maps_scalars_to_scalars() {
    let network = models::square_regressor(&mut StdRng::seed_from_u64(0)).unwrap();
    let output = network.forward(Array2::zeros((4, 1)).view()).unwrap();
    assert_eq!(output.dim(), (4, 1));
}

#[test]
fn forward_passes_do_not_change_the_network() {
    let mut rng = StdRng::seed_from_u64(11);
    let network = models::conv_classifier(&mut rng).unwrap();
    let inputs = images(&mut rng, 2);

    let first = network.forward(inputs.view()).unwrap();
    let second = network.forward(inputs.view()).unwrap();
    assert_eq!(first, second);
}

#[test]
fn plan_referencing_an_undeclared_layer_fails_to_build() {
    let result = Network::builder()
        .declare("conv1", Conv2d::new(28, 28, 4))
        .declare("norm1", LayerNorm::spatial(25, 25))
        .declare("conv2", Conv2d::new(25, 25, 4))
        .layer("conv1")
        .layer("norm1")
        .relu()
        .layer("conv2")
        .layer("conv3")
        .build(&mut StdRng::seed_from_u64(0));

    match result {
        Err(Error::UndeclaredLayer { name }) => assert_eq!(name, "conv3"),
        other => panic!("expected an undeclared layer error, got {other:?}"),
    }
}

#[test]
fn mismatched_widths_fail_to_build() {
    let result = Network::builder()
        .declare("fc1", Linear::new(784, 49))
        .declare("fc2", Linear::new(50, 10))
        .layer("fc1")
        .layer("fc2")
        .build(&mut StdRng::seed_from_u64(0));
    assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
}
