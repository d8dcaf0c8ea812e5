//! The architectures trained by the binaries.

use crate::{
    error::Result,
    layers::{Conv2d, LayerNorm, Linear},
    network::Network,
};
use ndarray_rand::rand::Rng;

pub const MNIST_SIDE: usize = 28;
pub const MNIST_PIXELS: usize = MNIST_SIDE * MNIST_SIDE;
pub const MNIST_CLASSES: usize = 10;

/// 784 -> 49 -> 49 -> 10 with ReLU between the linear layers and a softmax over the classes.
pub fn dense_classifier<R: Rng + ?Sized>(rng: &mut R) -> Result<Network> {
    const HIDDEN: usize = 49;

    Network::builder()
        .declare("fc1", Linear::new(MNIST_PIXELS, HIDDEN))
        .declare("fc2", Linear::new(HIDDEN, HIDDEN))
        .declare("fc3", Linear::new(HIDDEN, MNIST_CLASSES))
        .layer("fc1")
        .relu()
        .layer("fc2")
        .relu()
        .layer("fc3")
        .softmax()
        .build(rng)
}

/// Two 4x4 convolutions (28 -> 25 -> 22), each followed by ReLU and a per-sample normalization
/// over the image, then 2x2 max pooling down to 11x11 = 121 features and 121 -> 576 -> 10.
pub fn conv_classifier<R: Rng + ?Sized>(rng: &mut R) -> Result<Network> {
    const KERNEL: usize = 4;
    const FIRST: usize = MNIST_SIDE - KERNEL + 1;
    const SECOND: usize = FIRST - KERNEL + 1;
    const POOLED: usize = (SECOND / 2) * (SECOND / 2);
    const HIDDEN: usize = 576;

    Network::builder()
        .declare("conv1", Conv2d::new(MNIST_SIDE, MNIST_SIDE, KERNEL))
        .declare("norm1", LayerNorm::spatial(FIRST, FIRST))
        .declare("conv2", Conv2d::new(FIRST, FIRST, KERNEL))
        .declare("norm2", LayerNorm::spatial(SECOND, SECOND))
        .declare("fc1", Linear::new(POOLED, HIDDEN))
        .declare("fc2", Linear::new(HIDDEN, MNIST_CLASSES))
        .layer("conv1")
        .relu()
        .layer("norm1")
        .layer("conv2")
        .relu()
        .layer("norm2")
        .max_pool(SECOND, SECOND)
        .layer("fc1")
        .relu()
        .layer("fc2")
        .softmax()
        .build(rng)
}

/// 1 -> 10 -> 1 with a ReLU hidden layer and an unactivated output, for fitting x -> x^2.
pub fn square_regressor<R: Rng + ?Sized>(rng: &mut R) -> Result<Network> {
    Network::builder()
        .declare("hidden", Linear::new(1, 10))
        .declare("output", Linear::new(10, 1))
        .layer("hidden")
        .relu()
        .layer("output")
        .build(rng)
}
