use crate::{
    error::{Error, Result},
    layers::{self, Layer, MaxPool2},
};
use log::debug;
use ndarray::{Array2, ArrayView2, ArrayViewMut2};
use ndarray_rand::rand::Rng;

/// A named, learnable tensor. The shape is fixed when the parameter is created: the value can
/// only be written in place through `value_mut`.
#[derive(Clone, Debug, PartialEq)]
pub struct Parameter {
    name: String,
    value: Array2<f64>,
}

impl Parameter {
    pub fn new(name: impl Into<String>, value: Array2<f64>) -> Parameter {
        Parameter {
            name: name.into(),
            value,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn value(&self) -> &Array2<f64> {
        &self.value
    }

    pub fn value_mut(&mut self) -> ArrayViewMut2<'_, f64> {
        self.value.view_mut()
    }
}

/// One gradient per parameter, in the same order and with the same shapes. Backward passes add
/// into these buffers, so they must be reset between steps.
#[derive(Clone, Debug, PartialEq)]
pub struct Gradients {
    values: Vec<Array2<f64>>,
}

impl Gradients {
    pub fn zeros_like(parameters: &[Parameter]) -> Gradients {
        Gradients {
            values: parameters
                .iter()
                .map(|parameter| Array2::zeros(parameter.value.raw_dim()))
                .collect(),
        }
    }

    /// Wraps gradients computed elsewhere, one per parameter in network order.
    pub fn from_values(values: Vec<Array2<f64>>) -> Gradients {
        Gradients { values }
    }

    pub fn reset(&mut self) {
        for gradient in &mut self.values {
            gradient.fill(0.0);
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Array2<f64>> {
        self.values.iter()
    }

    pub fn get(&self, index: usize) -> Option<&Array2<f64>> {
        self.values.get(index)
    }
}

/// A single operation of the forward plan.
#[derive(Clone, Debug, PartialEq)]
pub enum Step {
    /// Applies the declared layer at this index of `Network::layers`.
    Layer(usize),
    Relu,
    Sigmoid,
    Tanh,
    MaxPool(MaxPool2),
    Softmax,
}

// What the forward plan refers to before names are resolved.
#[derive(Clone, Debug)]
enum PlannedStep {
    Layer(String),
    Relu,
    Sigmoid,
    Tanh,
    MaxPool(MaxPool2),
    Softmax,
}

/// Builds a network from a list of declared layers and a forward plan that refers to them by
/// name. The declared list is authoritative: a plan that mentions a layer that was never declared
/// is rejected before any parameter is allocated.
#[derive(Clone, Debug, Default)]
pub struct NetworkBuilder {
    declared: Vec<(String, Layer)>,
    plan: Vec<PlannedStep>,
}

impl NetworkBuilder {
    pub fn new() -> NetworkBuilder {
        NetworkBuilder::default()
    }

    pub fn declare(mut self, name: impl Into<String>, layer: Layer) -> NetworkBuilder {
        self.declared.push((name.into(), layer));
        self
    }

    pub fn layer(mut self, name: impl Into<String>) -> NetworkBuilder {
        self.plan.push(PlannedStep::Layer(name.into()));
        self
    }

    pub fn relu(mut self) -> NetworkBuilder {
        self.plan.push(PlannedStep::Relu);
        self
    }

    pub fn sigmoid(mut self) -> NetworkBuilder {
        self.plan.push(PlannedStep::Sigmoid);
        self
    }

    pub fn tanh(mut self) -> NetworkBuilder {
        self.plan.push(PlannedStep::Tanh);
        self
    }

    pub fn max_pool(mut self, height: usize, width: usize) -> NetworkBuilder {
        self.plan
            .push(PlannedStep::MaxPool(MaxPool2 { height, width }));
        self
    }

    pub fn softmax(mut self) -> NetworkBuilder {
        self.plan.push(PlannedStep::Softmax);
        self
    }

    /// Resolves the plan against the declared layers, checks that the width produced by every step
    /// is the width the next one consumes, then initializes all parameters with `rng`.
    pub fn build<R: Rng + ?Sized>(self, rng: &mut R) -> Result<Network> {
        for (index, (name, layer)) in self.declared.iter().enumerate() {
            if self.declared[..index].iter().any(|(other, _)| other == name) {
                return Err(Error::DuplicateLayer { name: name.clone() });
            }
            layer.validate()?;
        }

        let mut steps = Vec::with_capacity(self.plan.len());
        for planned in self.plan {
            steps.push(match planned {
                PlannedStep::Layer(name) => {
                    let index = self
                        .declared
                        .iter()
                        .position(|(declared, _)| *declared == name)
                        .ok_or(Error::UndeclaredLayer { name })?;
                    Step::Layer(index)
                }
                PlannedStep::Relu => Step::Relu,
                PlannedStep::Sigmoid => Step::Sigmoid,
                PlannedStep::Tanh => Step::Tanh,
                PlannedStep::MaxPool(pool) if pool.output_width() == 0 => {
                    return Err(Error::InvalidConfig(format!(
                        "2x2 pooling needs at least a 2x2 image, got {}x{}",
                        pool.height, pool.width
                    )));
                }
                PlannedStep::MaxPool(pool) => Step::MaxPool(pool),
                PlannedStep::Softmax => Step::Softmax,
            });
        }

        let (names, layers): (Vec<_>, Vec<_>) = self.declared.into_iter().unzip();

        // Walk the plan once to find the input width and make sure every step fits the previous
        // one. Width-preserving steps (activations) take whatever they are given.
        let mut input_width = None;
        let mut width: Option<usize> = None;
        for step in &steps {
            let (consumes, produces) = match step {
                Step::Layer(index) => (
                    Some(layers[*index].input_width()),
                    Some(layers[*index].output_width()),
                ),
                Step::MaxPool(pool) => (Some(pool.input_width()), Some(pool.output_width())),
                Step::Relu | Step::Sigmoid | Step::Tanh | Step::Softmax => (None, width),
            };

            match (width, consumes) {
                (Some(got), Some(expected)) if got != expected => {
                    return Err(Error::ShapeMismatch {
                        what: "forward plan",
                        expected,
                        got,
                    });
                }
                (None, Some(expected)) => input_width = Some(expected),
                _ => {}
            }
            width = produces;
        }

        let (Some(input_width), Some(output_width)) = (input_width, width) else {
            return Err(Error::InvalidConfig(
                "a network needs at least one layer that fixes its width".to_owned(),
            ));
        };

        let mut parameters = Vec::new();
        let mut offsets = Vec::with_capacity(layers.len());
        for (name, layer) in names.iter().zip(&layers) {
            let values = layer.init(rng);
            offsets.push((parameters.len(), values.len()));
            parameters.extend(
                values
                    .into_iter()
                    .map(|(suffix, value)| Parameter::new(format!("{name}.{suffix}"), value)),
            );
        }

        debug!(
            "built network {input_width} -> {output_width} with {} parameter tensors ({} values)",
            parameters.len(),
            parameters.iter().map(|p| p.value.len()).sum::<usize>()
        );

        Ok(Network {
            layers,
            offsets,
            steps,
            parameters,
            input_width,
            output_width,
        })
    }
}

/// Everything the backward pass needs from a training forward pass.
#[derive(Clone, Debug)]
pub struct Trace {
    // The input of every step, in plan order.
    inputs: Vec<Array2<f64>>,
    output: Array2<f64>,
}

impl Trace {
    pub fn output(&self) -> &Array2<f64> {
        &self.output
    }

    /// The values fed to the final step. When the network ends in a softmax these are the logits.
    pub fn last_input(&self) -> Option<&Array2<f64>> {
        self.inputs.last()
    }

    pub fn batch_size(&self) -> usize {
        self.output.nrows()
    }
}

#[derive(Clone, Debug)]
pub struct Network {
    layers: Vec<Layer>,
    // (first parameter index, parameter count) for each layer.
    offsets: Vec<(usize, usize)>,
    steps: Vec<Step>,
    parameters: Vec<Parameter>,
    input_width: usize,
    output_width: usize,
}

impl Network {
    pub fn builder() -> NetworkBuilder {
        NetworkBuilder::new()
    }

    pub fn input_width(&self) -> usize {
        self.input_width
    }

    pub fn output_width(&self) -> usize {
        self.output_width
    }

    pub fn steps(&self) -> &[Step] {
        &self.steps
    }

    /// Whether the last step turns the output into a probability distribution.
    pub fn ends_in_softmax(&self) -> bool {
        matches!(self.steps.last(), Some(Step::Softmax))
    }

    pub fn parameters(&self) -> &[Parameter] {
        &self.parameters
    }

    /// Mutable access to the parameters. The slice cannot grow or shrink and values are only
    /// writable in place, so every parameter keeps the shape it was built with.
    pub fn parameters_mut(&mut self) -> &mut [Parameter] {
        &mut self.parameters
    }

    fn layer_parameters(&self, layer: usize) -> &[Parameter] {
        let (start, count) = self.offsets[layer];
        &self.parameters[start..start + count]
    }

    fn check_input(&self, input: &ArrayView2<f64>) -> Result<()> {
        if input.ncols() != self.input_width {
            return Err(Error::ShapeMismatch {
                what: "input features",
                expected: self.input_width,
                got: input.ncols(),
            });
        }
        Ok(())
    }

    fn apply(&self, step: &Step, x: ArrayView2<f64>) -> Array2<f64> {
        match step {
            Step::Layer(index) => self.layers[*index].forward(self.layer_parameters(*index), x),
            Step::Relu => layers::relu(x),
            Step::Sigmoid => layers::sigmoid(x),
            Step::Tanh => layers::tanh(x),
            Step::MaxPool(pool) => pool.forward(x),
            Step::Softmax => layers::softmax(x),
        }
    }

    /// Computes the output for a [batch x input_width] input. The result has one row per sample
    /// and `output_width` columns. Parameters are only read.
    pub fn forward(&self, input: ArrayView2<f64>) -> Result<Array2<f64>> {
        self.check_input(&input)?;

        let mut activation = input.to_owned();
        for step in &self.steps {
            activation = self.apply(step, activation.view());
        }
        Ok(activation)
    }

    /// Like `forward`, but keeps the input of every step so `backward` can use it.
    pub fn forward_train(&self, input: ArrayView2<f64>) -> Result<Trace> {
        self.check_input(&input)?;

        let mut inputs = Vec::with_capacity(self.steps.len());
        let mut activation = input.to_owned();
        // Pushing moves the activation, so compute the next one from a view first and only then
        // store the current one.
        for step in &self.steps {
            let next = self.apply(step, activation.view());
            inputs.push(activation);
            activation = next;
        }

        Ok(Trace {
            inputs,
            output: activation,
        })
    }

    /// Backpropagates `d_output` through the plan, adding every parameter gradient into `grads`.
    ///
    /// When `skip_final_softmax` is set, `d_output` is taken to already be the gradient with
    /// respect to the logits (the fused softmax + cross-entropy case) and the last step is skipped.
    pub fn backward(
        &self,
        trace: &Trace,
        d_output: Array2<f64>,
        skip_final_softmax: bool,
        grads: &mut Gradients,
    ) -> Result<()> {
        if grads.len() != self.parameters.len() {
            return Err(Error::ShapeMismatch {
                what: "gradient tensors",
                expected: self.parameters.len(),
                got: grads.len(),
            });
        }
        if d_output.nrows() != trace.output.nrows() {
            return Err(Error::ShapeMismatch {
                what: "output gradient rows",
                expected: trace.output.nrows(),
                got: d_output.nrows(),
            });
        }
        if d_output.ncols() != trace.output.ncols() {
            return Err(Error::ShapeMismatch {
                what: "output gradient columns",
                expected: trace.output.ncols(),
                got: d_output.ncols(),
            });
        }

        let mut steps = self.steps.iter().zip(&trace.inputs).rev().peekable();
        if skip_final_softmax && matches!(steps.peek(), Some((Step::Softmax, _))) {
            steps.next();
        }

        let mut delta = d_output;
        for (step, x) in steps {
            delta = match step {
                Step::Layer(index) => {
                    let (start, count) = self.offsets[*index];
                    self.layers[*index].backward(
                        self.layer_parameters(*index),
                        x.view(),
                        delta.view(),
                        &mut grads.values[start..start + count],
                    )
                }
                Step::Relu => layers::relu_backward(x.view(), delta.view()),
                Step::Sigmoid => layers::sigmoid_backward(x.view(), delta.view()),
                Step::Tanh => layers::tanh_backward(x.view(), delta.view()),
                Step::MaxPool(pool) => pool.backward(x.view(), delta.view()),
                Step::Softmax => layers::softmax_backward(x.view(), delta.view()),
            };
        }

        Ok(())
    }
}
