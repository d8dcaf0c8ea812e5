use crate::{
    dataset::Targets,
    error::{Error, Result},
    layers::softmax,
    network::{Network, Trace},
};
use ndarray::{Array2, ArrayView2};

/// The loss strategies a session can train with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Loss {
    /// Negative log-likelihood of the true class, averaged over the batch. Only valid for networks
    /// that end in a softmax; the softmax and the logarithm are fused and computed from the logits.
    CrossEntropy,
    /// Mean of the squared per-element differences. Class targets are compared as one-hot rows.
    MeanSquaredError,
}

/// A scalar loss together with the gradient backward should start from.
#[derive(Clone, Debug)]
pub struct LossValue {
    pub value: f64,
    pub d_output: Array2<f64>,
    /// Set when `d_output` is already the gradient with respect to the logits, so the network's
    /// final softmax must be skipped during backward.
    pub fused_softmax: bool,
}

impl Loss {
    /// Checks that this loss can be used with `network` at all.
    pub fn validate(self, network: &Network) -> Result<()> {
        if self == Loss::CrossEntropy && !network.ends_in_softmax() {
            return Err(Error::InvalidConfig(
                "cross-entropy needs a network whose last step is a softmax".to_owned(),
            ));
        }
        Ok(())
    }

    pub fn compute(self, network: &Network, trace: &Trace, targets: &Targets) -> Result<LossValue> {
        match self {
            Loss::CrossEntropy => {
                self.validate(network)?;
                let Targets::Classes(labels) = targets else {
                    return Err(Error::InvalidConfig(
                        "cross-entropy needs class labels as targets".to_owned(),
                    ));
                };
                let logits = trace.last_input().unwrap_or(trace.output());
                let (value, d_output) = cross_entropy_with_logits(logits.view(), labels)?;
                Ok(LossValue {
                    value,
                    d_output,
                    fused_softmax: true,
                })
            }
            Loss::MeanSquaredError => {
                let (value, d_output) = match targets {
                    Targets::Values(values) => {
                        mean_squared_error(trace.output().view(), values.view())?
                    }
                    Targets::Classes(labels) => {
                        let one_hot = one_hot(labels, trace.output().ncols())?;
                        mean_squared_error(trace.output().view(), one_hot.view())?
                    }
                };
                Ok(LossValue {
                    value,
                    d_output,
                    fused_softmax: false,
                })
            }
        }
    }
}

/// Turns class labels into rows with a 1.0 in the column of the label and 0.0 everywhere else.
pub fn one_hot(labels: &[usize], classes: usize) -> Result<Array2<f64>> {
    let mut encoded = Array2::zeros((labels.len(), classes));
    for (mut row, &label) in encoded.outer_iter_mut().zip(labels) {
        check_label(label, classes)?;
        row[label] = 1.0;
    }
    Ok(encoded)
}

fn check_label(label: usize, classes: usize) -> Result<()> {
    if label >= classes {
        return Err(Error::ShapeMismatch {
            what: "class label",
            expected: classes,
            got: label,
        });
    }
    Ok(())
}

/// Cross-entropy of `softmax(logits)` against `labels`, averaged over the rows, plus its gradient
/// with respect to the logits.
///
/// The log-probabilities are computed as `z - logsumexp(z)` with the row maximum factored out, so
/// a confident wrong prediction gives a large finite loss rather than `ln(0)`.
pub fn cross_entropy_with_logits(
    logits: ArrayView2<f64>,
    labels: &[usize],
) -> Result<(f64, Array2<f64>)> {
    if logits.nrows() != labels.len() {
        return Err(Error::ShapeMismatch {
            what: "labels",
            expected: logits.nrows(),
            got: labels.len(),
        });
    }

    let batch = logits.nrows().max(1) as f64;
    let classes = logits.ncols();
    let mut total = 0.0;

    for (row, &label) in logits.outer_iter().zip(labels) {
        check_label(label, classes)?;
        let max = row.fold(f64::NEG_INFINITY, |max, &v| max.max(v));
        let log_sum_exp = max + row.iter().map(|v| (v - max).exp()).sum::<f64>().ln();
        total += log_sum_exp - row[label];
    }

    let mut d_logits = softmax(logits);
    for (mut row, &label) in d_logits.outer_iter_mut().zip(labels) {
        row[label] -= 1.0;
    }
    d_logits /= batch;

    Ok((total / batch, d_logits))
}

/// `mean((predicted - target)^2)` over every element, plus its gradient with respect to
/// `predicted`.
pub fn mean_squared_error(
    predicted: ArrayView2<f64>,
    target: ArrayView2<f64>,
) -> Result<(f64, Array2<f64>)> {
    if predicted.dim() != target.dim() {
        return Err(Error::ShapeMismatch {
            what: "regression targets",
            expected: predicted.len(),
            got: target.len(),
        });
    }

    let n = predicted.len().max(1) as f64;
    let difference = &predicted - &target;
    let value = difference.mapv(|v| v * v).sum() / n;
    Ok((value, difference * (2.0 / n)))
}
