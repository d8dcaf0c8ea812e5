use crate::{
    error::{Error, Result},
    network::Parameter,
};
use ndarray::{Array2, ArrayView1, ArrayView2, Axis, s};
use ndarray_rand::{RandomExt, rand::Rng, rand_distr::Uniform};

/// A layer that owns learnable parameters. Layers are only descriptions of shapes and maths; the
/// parameter values themselves live in the network, in the order returned by `Layer::init`.
#[derive(Clone, Debug, PartialEq)]
pub enum Layer {
    Linear(Linear),
    Conv2d(Conv2d),
    LayerNorm(LayerNorm),
}

impl Layer {
    pub fn input_width(&self) -> usize {
        match self {
            Layer::Linear(linear) => linear.inputs,
            Layer::Conv2d(conv) => conv.height * conv.width,
            Layer::LayerNorm(norm) => norm.features,
        }
    }

    pub fn output_width(&self) -> usize {
        match self {
            Layer::Linear(linear) => linear.outputs,
            Layer::Conv2d(conv) => conv.output_height() * conv.output_width(),
            Layer::LayerNorm(norm) => norm.features,
        }
    }

    /// Rejects shapes that would leave the layer with nothing to compute.
    pub fn validate(&self) -> Result<()> {
        match self {
            Layer::Linear(linear) if linear.inputs == 0 || linear.outputs == 0 => {
                Err(Error::InvalidConfig(format!(
                    "linear layer {} -> {} has a zero width",
                    linear.inputs, linear.outputs
                )))
            }
            Layer::Conv2d(conv)
                if conv.kernel == 0 || conv.kernel > conv.height || conv.kernel > conv.width =>
            {
                Err(Error::InvalidConfig(format!(
                    "{k}x{k} kernel does not fit a {h}x{w} image",
                    k = conv.kernel,
                    h = conv.height,
                    w = conv.width
                )))
            }
            Layer::LayerNorm(norm) if norm.features == 0 => Err(Error::InvalidConfig(
                "layer norm over zero features".to_owned(),
            )),
            _ => Ok(()),
        }
    }

    /// Draws the initial parameter values, each paired with the suffix used to name it.
    pub fn init<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<(&'static str, Array2<f64>)> {
        match self {
            Layer::Linear(linear) => linear.init(rng),
            Layer::Conv2d(conv) => conv.init(rng),
            Layer::LayerNorm(norm) => norm.init(),
        }
    }

    pub fn forward(&self, params: &[Parameter], x: ArrayView2<f64>) -> Array2<f64> {
        match self {
            Layer::Linear(linear) => linear.forward(params, x),
            Layer::Conv2d(conv) => conv.forward(params, x),
            Layer::LayerNorm(norm) => norm.forward(params, x),
        }
    }

    /// Accumulates the parameter gradients into `grads` (same order as `params`) and returns the
    /// gradient with respect to the layer's input. `x` must be the input the layer saw during the
    /// forward pass that produced `d`.
    pub fn backward(
        &self,
        params: &[Parameter],
        x: ArrayView2<f64>,
        d: ArrayView2<f64>,
        grads: &mut [Array2<f64>],
    ) -> Array2<f64> {
        match self {
            Layer::Linear(linear) => linear.backward(params, x, d, grads),
            Layer::Conv2d(conv) => conv.backward(params, x, d, grads),
            Layer::LayerNorm(norm) => norm.backward(params, x, d, grads),
        }
    }
}

/// A fully connected layer computing `x.W + b`, with `W` a [inputs x outputs] matrix and `b` a
/// [1 x outputs] row that broadcasts over the batch.
#[derive(Clone, Debug, PartialEq)]
pub struct Linear {
    pub inputs: usize,
    pub outputs: usize,
}

impl Linear {
    pub fn new(inputs: usize, outputs: usize) -> Layer {
        Layer::Linear(Linear { inputs, outputs })
    }

    fn init<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<(&'static str, Array2<f64>)> {
        let bound = 1.0 / (self.inputs as f64).sqrt();
        let distribution = Uniform::new_inclusive(-bound, bound);
        vec![
            (
                "weight",
                Array2::random_using((self.inputs, self.outputs), distribution, rng),
            ),
            (
                "bias",
                Array2::random_using((1, self.outputs), distribution, rng),
            ),
        ]
    }

    fn forward(&self, params: &[Parameter], x: ArrayView2<f64>) -> Array2<f64> {
        x.dot(params[0].value()) + params[1].value()
    }

    fn backward(
        &self,
        params: &[Parameter],
        x: ArrayView2<f64>,
        d: ArrayView2<f64>,
        grads: &mut [Array2<f64>],
    ) -> Array2<f64> {
        // Each row of d is the delta for one sample, so multiplying by the transposed input sums
        // the per-sample outer products for us.
        grads[0] += &x.t().dot(&d);
        grads[1] += &d.sum_axis(Axis(0)).insert_axis(Axis(0));
        d.dot(&params[0].value().t())
    }
}

/// A single-channel "valid" 2D cross-correlation with a square kernel and one scalar bias. The
/// feature axis of the input is read as a row-major [height x width] image.
#[derive(Clone, Debug, PartialEq)]
pub struct Conv2d {
    pub height: usize,
    pub width: usize,
    pub kernel: usize,
}

impl Conv2d {
    pub fn new(height: usize, width: usize, kernel: usize) -> Layer {
        Layer::Conv2d(Conv2d {
            height,
            width,
            kernel,
        })
    }

    pub fn output_height(&self) -> usize {
        (self.height + 1).saturating_sub(self.kernel)
    }

    pub fn output_width(&self) -> usize {
        (self.width + 1).saturating_sub(self.kernel)
    }

    fn init<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec<(&'static str, Array2<f64>)> {
        // fan_in of a single-channel kernel is kernel * kernel, so 1/sqrt(fan_in) is 1/kernel.
        let bound = 1.0 / self.kernel as f64;
        let distribution = Uniform::new_inclusive(-bound, bound);
        vec![
            (
                "kernel",
                Array2::random_using((self.kernel, self.kernel), distribution, rng),
            ),
            ("bias", Array2::random_using((1, 1), distribution, rng)),
        ]
    }

    fn image(&self, row: ArrayView1<f64>) -> Array2<f64> {
        Array2::from_shape_fn((self.height, self.width), |(i, j)| row[i * self.width + j])
    }

    fn forward(&self, params: &[Parameter], x: ArrayView2<f64>) -> Array2<f64> {
        let kernel = params[0].value();
        let bias = params[1].value()[[0, 0]];
        let mut output = Array2::zeros((x.nrows(), self.output_height() * self.output_width()));

        for (row, mut output_row) in x.outer_iter().zip(output.outer_iter_mut()) {
            let image = self.image(row);
            // Windows are produced in row-major order of their top-left corner, which is exactly
            // the layout of the flattened output image.
            for (value, window) in output_row
                .iter_mut()
                .zip(image.windows((self.kernel, self.kernel)))
            {
                *value = (&window * kernel).sum() + bias;
            }
        }

        output
    }

    fn backward(
        &self,
        params: &[Parameter],
        x: ArrayView2<f64>,
        d: ArrayView2<f64>,
        grads: &mut [Array2<f64>],
    ) -> Array2<f64> {
        let kernel = params[0].value();
        let k = self.kernel;
        let output_width = self.output_width();
        let mut d_input = Array2::zeros(x.raw_dim());

        for ((row, d_row), mut d_input_row) in x
            .outer_iter()
            .zip(d.outer_iter())
            .zip(d_input.outer_iter_mut())
        {
            let image = self.image(row);
            let mut d_image = Array2::<f64>::zeros((self.height, self.width));

            for (index, (&delta, window)) in d_row
                .iter()
                .zip(image.windows((k, k)))
                .enumerate()
            {
                let (oy, ox) = (index / output_width, index % output_width);
                grads[0].scaled_add(delta, &window);
                d_image
                    .slice_mut(s![oy..oy + k, ox..ox + k])
                    .scaled_add(delta, kernel);
            }

            grads[1][[0, 0]] += d_row.sum();
            d_input_row
                .iter_mut()
                .zip(d_image.iter())
                .for_each(|(target, &value)| *target = value);
        }

        d_input
    }
}

/// Normalizes every sample to zero mean and unit variance over all of its features, followed by
/// a learnable elementwise scale (`gamma`) and shift (`beta`).
#[derive(Clone, Debug, PartialEq)]
pub struct LayerNorm {
    pub features: usize,
}

impl LayerNorm {
    pub const EPSILON: f64 = 1e-5;

    /// Normalization over the spatial positions of a single-channel image.
    pub fn spatial(height: usize, width: usize) -> Layer {
        Layer::LayerNorm(LayerNorm {
            features: height * width,
        })
    }

    fn init(&self) -> Vec<(&'static str, Array2<f64>)> {
        vec![
            ("gamma", Array2::ones((1, self.features))),
            ("beta", Array2::zeros((1, self.features))),
        ]
    }

    // Returns x_hat together with 1/sqrt(var + eps) for every row.
    fn normalize(&self, x: ArrayView2<f64>) -> (Array2<f64>, Vec<f64>) {
        let mut x_hat = x.to_owned();
        let mut inv_stds = Vec::with_capacity(x.nrows());

        for mut row in x_hat.outer_iter_mut() {
            let n = row.len() as f64;
            let mean = row.sum() / n;
            let variance = row.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
            let inv_std = 1.0 / (variance + Self::EPSILON).sqrt();
            row.mapv_inplace(|v| (v - mean) * inv_std);
            inv_stds.push(inv_std);
        }

        (x_hat, inv_stds)
    }

    fn forward(&self, params: &[Parameter], x: ArrayView2<f64>) -> Array2<f64> {
        let (x_hat, _) = self.normalize(x);
        x_hat * params[0].value() + params[1].value()
    }

    fn backward(
        &self,
        params: &[Parameter],
        x: ArrayView2<f64>,
        d: ArrayView2<f64>,
        grads: &mut [Array2<f64>],
    ) -> Array2<f64> {
        let (x_hat, inv_stds) = self.normalize(x);

        grads[0] += &(&d * &x_hat).sum_axis(Axis(0)).insert_axis(Axis(0));
        grads[1] += &d.sum_axis(Axis(0)).insert_axis(Axis(0));

        let d_x_hat = &d * params[0].value();
        let mut d_input = Array2::zeros(x.raw_dim());

        for (((d_hat_row, x_hat_row), mut d_input_row), inv_std) in d_x_hat
            .outer_iter()
            .zip(x_hat.outer_iter())
            .zip(d_input.outer_iter_mut())
            .zip(inv_stds)
        {
            let n = d_hat_row.len() as f64;
            let sum_d = d_hat_row.sum();
            let sum_d_x_hat = (&d_hat_row * &x_hat_row).sum();
            d_input_row.assign(
                &((&d_hat_row * n - sum_d - &x_hat_row * sum_d_x_hat) * (inv_std / n)),
            );
        }

        d_input
    }
}

pub fn relu(x: ArrayView2<f64>) -> Array2<f64> {
    x.mapv(|v| v.max(0.0))
}

pub fn relu_backward(x: ArrayView2<f64>, d: ArrayView2<f64>) -> Array2<f64> {
    let mut d_input = d.to_owned();
    d_input.zip_mut_with(&x, |d, &v| {
        if v <= 0.0 {
            *d = 0.0;
        }
    });
    d_input
}

pub fn sigmoid(x: ArrayView2<f64>) -> Array2<f64> {
    x.mapv(|v| 1.0 / (1.0 + (-v).exp()))
}

/// `d * s * (1 - s)` with `s = sigmoid(x)`.
pub fn sigmoid_backward(x: ArrayView2<f64>, d: ArrayView2<f64>) -> Array2<f64> {
    let mut d_input = d.to_owned();
    d_input.zip_mut_with(&sigmoid(x), |d, &s| *d *= s * (1.0 - s));
    d_input
}

pub fn tanh(x: ArrayView2<f64>) -> Array2<f64> {
    x.mapv(f64::tanh)
}

pub fn tanh_backward(x: ArrayView2<f64>, d: ArrayView2<f64>) -> Array2<f64> {
    let mut d_input = d.to_owned();
    d_input.zip_mut_with(&x, |d, &v| *d *= 1.0 - v.tanh().powi(2));
    d_input
}

/// Row-wise softmax. Each row is shifted by its maximum before exponentiating so large logits
/// cannot overflow.
pub fn softmax(x: ArrayView2<f64>) -> Array2<f64> {
    let mut output = x.to_owned();
    for mut row in output.outer_iter_mut() {
        let max = row.fold(f64::NEG_INFINITY, |max, &v| max.max(v));
        row.mapv_inplace(|v| (v - max).exp());
        let sum = row.sum();
        row.mapv_inplace(|v| v / sum);
    }
    output
}

/// Backward pass of a standalone softmax (not fused with cross-entropy).
pub fn softmax_backward(x: ArrayView2<f64>, d: ArrayView2<f64>) -> Array2<f64> {
    let probabilities = softmax(x);
    let mut d_input = Array2::zeros(x.raw_dim());
    for ((p, d_row), mut d_input_row) in probabilities
        .outer_iter()
        .zip(d.outer_iter())
        .zip(d_input.outer_iter_mut())
    {
        let dot = (&p * &d_row).sum();
        d_input_row.assign(&(&p * &(&d_row - dot)));
    }
    d_input
}

/// 2x2 max pooling with stride 2 over a row-major [height x width] image. Odd trailing rows or
/// columns are dropped.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MaxPool2 {
    pub height: usize,
    pub width: usize,
}

impl MaxPool2 {
    pub fn input_width(&self) -> usize {
        self.height * self.width
    }

    pub fn output_width(&self) -> usize {
        (self.height / 2) * (self.width / 2)
    }

    // The flat input index of the maximum in every pooling window of one sample.
    fn arg_maxes(&self, row: ArrayView1<f64>) -> Vec<usize> {
        let mut indices = Vec::with_capacity(self.output_width());
        for py in 0..self.height / 2 {
            for px in 0..self.width / 2 {
                let mut best = 2 * py * self.width + 2 * px;
                for (dy, dx) in [(0, 1), (1, 0), (1, 1)] {
                    let index = (2 * py + dy) * self.width + 2 * px + dx;
                    if row[index] > row[best] {
                        best = index;
                    }
                }
                indices.push(best);
            }
        }
        indices
    }

    pub fn forward(&self, x: ArrayView2<f64>) -> Array2<f64> {
        let mut output = Array2::zeros((x.nrows(), self.output_width()));
        for (row, mut output_row) in x.outer_iter().zip(output.outer_iter_mut()) {
            for (value, index) in output_row.iter_mut().zip(self.arg_maxes(row)) {
                *value = row[index];
            }
        }
        output
    }

    pub fn backward(&self, x: ArrayView2<f64>, d: ArrayView2<f64>) -> Array2<f64> {
        let mut d_input = Array2::zeros(x.raw_dim());
        for ((row, d_row), mut d_input_row) in x
            .outer_iter()
            .zip(d.outer_iter())
            .zip(d_input.outer_iter_mut())
        {
            for (&delta, index) in d_row.iter().zip(self.arg_maxes(row)) {
                d_input_row[index] += delta;
            }
        }
        d_input
    }
}
