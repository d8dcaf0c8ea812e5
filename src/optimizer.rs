use crate::{
    error::{Error, Result},
    network::{Gradients, Parameter},
};
use ndarray::{Array2, Zip};

/// Defines the strategy for updating parameters from their gradients.
pub trait Optimizer {
    /// Updates every parameter in place using the gradient at the same position.
    ///
    /// # Returns
    /// An error if the gradients don't line up with the parameters, in which case no parameter
    /// has been touched.
    fn step(&mut self, parameters: &mut [Parameter], gradients: &Gradients) -> Result<()>;

    /// Zeroes the gradient buffers. Backward passes accumulate, so this has to run before each one.
    fn reset_gradients(&self, gradients: &mut Gradients) {
        gradients.reset();
    }
}

fn check_learning_rate(learning_rate: f64) -> Result<()> {
    if !(learning_rate.is_finite() && learning_rate > 0.0) {
        return Err(Error::InvalidConfig(format!(
            "learning rate must be finite and > 0, got {learning_rate}"
        )));
    }
    Ok(())
}

fn check_alignment(parameters: &[Parameter], gradients: &Gradients) -> Result<()> {
    if parameters.len() != gradients.len() {
        return Err(Error::ShapeMismatch {
            what: "gradient tensors",
            expected: parameters.len(),
            got: gradients.len(),
        });
    }
    for (parameter, gradient) in parameters.iter().zip(gradients.iter()) {
        if parameter.value().dim() != gradient.dim() {
            return Err(Error::ShapeMismatch {
                what: "gradient elements",
                expected: parameter.value().len(),
                got: gradient.len(),
            });
        }
    }
    Ok(())
}

/// Plain stochastic gradient descent: `param -= learning_rate * gradient`.
#[derive(Clone, Debug)]
pub struct Sgd {
    learning_rate: f64,
}

impl Sgd {
    pub fn new(learning_rate: f64) -> Result<Sgd> {
        check_learning_rate(learning_rate)?;
        Ok(Sgd { learning_rate })
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

impl Optimizer for Sgd {
    fn step(&mut self, parameters: &mut [Parameter], gradients: &Gradients) -> Result<()> {
        check_alignment(parameters, gradients)?;
        for (parameter, gradient) in parameters.iter_mut().zip(gradients.iter()) {
            parameter.value_mut().scaled_add(-self.learning_rate, gradient);
        }
        Ok(())
    }
}

/// Adam, with bias-corrected first and second moment estimates kept per parameter element.
#[derive(Clone, Debug)]
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    epsilon: f64,
    // beta1^t and beta2^t for the number of steps taken so far.
    beta1_t: f64,
    beta2_t: f64,
    first_moments: Vec<Array2<f64>>,
    second_moments: Vec<Array2<f64>>,
}

impl Adam {
    pub const BETA1: f64 = 0.9;
    pub const BETA2: f64 = 0.999;
    pub const EPSILON: f64 = 1e-8;

    /// Creates an `Adam` optimizer with the usual decay rates, allocating zeroed moment state
    /// shaped like `parameters`.
    pub fn new(parameters: &[Parameter], learning_rate: f64) -> Result<Adam> {
        Adam::with_betas(
            parameters,
            learning_rate,
            Adam::BETA1,
            Adam::BETA2,
            Adam::EPSILON,
        )
    }

    pub fn with_betas(
        parameters: &[Parameter],
        learning_rate: f64,
        beta1: f64,
        beta2: f64,
        epsilon: f64,
    ) -> Result<Adam> {
        check_learning_rate(learning_rate)?;
        if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
            return Err(Error::InvalidConfig(format!(
                "Adam decay rates must be in [0, 1), got {beta1} and {beta2}"
            )));
        }

        let zeros = || -> Vec<Array2<f64>> {
            parameters
                .iter()
                .map(|parameter| Array2::zeros(parameter.value().raw_dim()))
                .collect()
        };

        Ok(Adam {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            beta1_t: 1.0,
            beta2_t: 1.0,
            first_moments: zeros(),
            second_moments: zeros(),
        })
    }

    pub fn learning_rate(&self) -> f64 {
        self.learning_rate
    }
}

impl Optimizer for Adam {
    fn step(&mut self, parameters: &mut [Parameter], gradients: &Gradients) -> Result<()> {
        check_alignment(parameters, gradients)?;
        if parameters.len() != self.first_moments.len() {
            return Err(Error::ShapeMismatch {
                what: "Adam moment tensors",
                expected: self.first_moments.len(),
                got: parameters.len(),
            });
        }
        for (parameter, m) in parameters.iter().zip(&self.first_moments) {
            if parameter.value().dim() != m.dim() {
                return Err(Error::ShapeMismatch {
                    what: "Adam moment elements",
                    expected: m.len(),
                    got: parameter.value().len(),
                });
            }
        }

        let Self {
            learning_rate: lr,
            beta1: b1,
            beta2: b2,
            epsilon: eps,
            ..
        } = *self;

        self.beta1_t *= b1;
        self.beta2_t *= b2;
        let correction1 = 1.0 - self.beta1_t;
        let correction2 = 1.0 - self.beta2_t;

        for (((parameter, gradient), m), v) in parameters
            .iter_mut()
            .zip(gradients.iter())
            .zip(self.first_moments.iter_mut())
            .zip(self.second_moments.iter_mut())
        {
            Zip::from(parameter.value_mut())
                .and(gradient)
                .and(m)
                .and(v)
                .for_each(|p, &g, m, v| {
                    *m = b1 * *m + (1.0 - b1) * g;
                    *v = b2 * *v + (1.0 - b2) * g * g;
                    let m_hat = *m / correction1;
                    let v_hat = *v / correction2;
                    *p -= lr * m_hat / (v_hat.sqrt() + eps);
                });
        }

        Ok(())
    }
}
