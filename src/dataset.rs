use crate::error::{Error, Result};
use ndarray::{Array2, Axis};
use ndarray_rand::rand::{Rng, seq::SliceRandom};

/// What a batch is trained against.
#[derive(Clone, Debug, PartialEq)]
pub enum Targets {
    /// One class index per sample.
    Classes(Vec<usize>),
    /// One row of target values per sample.
    Values(Array2<f64>),
}

impl Targets {
    pub fn len(&self) -> usize {
        match self {
            Targets::Classes(labels) => labels.len(),
            Targets::Values(values) => values.nrows(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn select(&self, indices: &[usize]) -> Targets {
        match self {
            Targets::Classes(labels) => {
                Targets::Classes(indices.iter().map(|&index| labels[index]).collect())
            }
            Targets::Values(values) => Targets::Values(values.select(Axis(0), indices)),
        }
    }
}

/// Samples stacked along the first axis: `inputs` is [batch x features].
#[derive(Clone, Debug, PartialEq)]
pub struct Batch {
    pub inputs: Array2<f64>,
    pub targets: Targets,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.inputs.nrows()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Anything that can hand out samples by index. `batches` turns that into a finite, restartable
/// sequence of batches, optionally in a freshly shuffled order.
pub trait DatasetProvider {
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Stacks the samples at `indices` into one batch, in the given order.
    fn batch(&self, indices: &[usize]) -> Batch;

    /// Splits the provider into batches of `batch_size` samples; only the last one may be shorter.
    /// With an rng the visiting order is shuffled, without one it is the stored order.
    fn batches<R: Rng + ?Sized>(
        &self,
        batch_size: usize,
        shuffle: Option<&mut R>,
    ) -> Result<Batches<'_, Self>>
    where
        Self: Sized,
    {
        if batch_size == 0 {
            return Err(Error::InvalidConfig("batch size must be > 0".to_owned()));
        }

        let mut order: Vec<usize> = (0..self.len()).collect();
        if let Some(rng) = shuffle {
            order.shuffle(rng);
        }

        Ok(Batches {
            provider: self,
            order,
            batch_size,
            position: 0,
        })
    }
}

pub struct Batches<'a, P> {
    provider: &'a P,
    order: Vec<usize>,
    batch_size: usize,
    position: usize,
}

impl<P: DatasetProvider> Iterator for Batches<'_, P> {
    type Item = Batch;

    fn next(&mut self) -> Option<Batch> {
        if self.position >= self.order.len() {
            return None;
        }
        let end = (self.position + self.batch_size).min(self.order.len());
        let batch = self.provider.batch(&self.order[self.position..end]);
        self.position = end;
        Some(batch)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = (self.order.len() - self.position).div_ceil(self.batch_size);
        (remaining, Some(remaining))
    }
}

impl<P: DatasetProvider> ExactSizeIterator for Batches<'_, P> {}

/// An in-memory dataset, one sample per row.
#[derive(Clone, Debug, PartialEq)]
pub struct Dataset {
    inputs: Array2<f64>,
    targets: Targets,
}

impl Dataset {
    pub fn new(inputs: Array2<f64>, targets: Targets) -> Result<Dataset> {
        if inputs.nrows() != targets.len() {
            return Err(Error::ShapeMismatch {
                what: "targets",
                expected: inputs.nrows(),
                got: targets.len(),
            });
        }
        Ok(Dataset { inputs, targets })
    }

    pub fn classification(inputs: Array2<f64>, labels: Vec<usize>) -> Result<Dataset> {
        Dataset::new(inputs, Targets::Classes(labels))
    }

    pub fn input_width(&self) -> usize {
        self.inputs.ncols()
    }

    pub fn inputs(&self) -> &Array2<f64> {
        &self.inputs
    }

    pub fn targets(&self) -> &Targets {
        &self.targets
    }
}

impl DatasetProvider for Dataset {
    fn len(&self) -> usize {
        self.inputs.nrows()
    }

    fn batch(&self, indices: &[usize]) -> Batch {
        Batch {
            inputs: self.inputs.select(Axis(0), indices),
            targets: self.targets.select(indices),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;
    use ndarray_rand::rand::{SeedableRng, rngs::StdRng};

    fn counting(len: usize) -> Dataset {
        let inputs = Array2::from_shape_fn((len, 2), |(i, j)| (i * 2 + j) as f64);
        Dataset::classification(inputs, (0..len).collect()).unwrap()
    }

    fn labels(batch: &Batch) -> Vec<usize> {
        match &batch.targets {
            Targets::Classes(labels) => labels.clone(),
            Targets::Values(_) => panic!("expected class targets"),
        }
    }

    #[test]
    fn unshuffled_batches_keep_stored_order_and_short_tail() {
        let data = counting(7);
        let batches: Vec<_> = data.batches::<StdRng>(3, None).unwrap().collect();
        assert_eq!(batches.len(), 3);
        assert_eq!(labels(&batches[0]), [0, 1, 2]);
        assert_eq!(labels(&batches[2]), [6]);
        assert_eq!(batches[1].inputs.row(0), array![6.0, 7.0]);
    }

    #[test]
    fn shuffled_batches_cover_every_sample_once() {
        let data = counting(50);
        let mut rng = StdRng::seed_from_u64(5);
        let mut seen: Vec<_> = data
            .batches(8, Some(&mut rng))
            .unwrap()
            .flat_map(|batch| labels(&batch))
            .collect();
        assert_ne!(seen, (0..50).collect::<Vec<_>>());
        seen.sort_unstable();
        assert_eq!(seen, (0..50).collect::<Vec<_>>());
    }

    #[test]
    fn inputs_follow_their_labels_through_shuffling() {
        let data = counting(10);
        let mut rng = StdRng::seed_from_u64(9);
        for batch in data.batches(4, Some(&mut rng)).unwrap() {
            for (row, label) in batch.inputs.outer_iter().zip(labels(&batch)) {
                assert_eq!(row[0], (label * 2) as f64);
            }
        }
    }

    #[test]
    fn batches_are_restartable() {
        let data = counting(5);
        let first: Vec<_> = data.batches::<StdRng>(2, None).unwrap().collect();
        let second: Vec<_> = data.batches::<StdRng>(2, None).unwrap().collect();
        assert_eq!(first, second);
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let data = counting(3);
        assert!(matches!(
            data.batches::<StdRng>(0, None),
            Err(Error::InvalidConfig(_))
        ));
    }

    #[test]
    fn mismatched_target_count_is_rejected() {
        let result = Dataset::classification(Array2::zeros((3, 1)), vec![0, 1]);
        assert!(matches!(result, Err(Error::ShapeMismatch { .. })));
    }

    #[test]
    fn regression_targets_are_selected_row_wise() {
        let data = Dataset::new(
            array![[1.0], [2.0], [3.0]],
            Targets::Values(array![[1.0], [4.0], [9.0]]),
        )
        .unwrap();
        let batch = data.batch(&[2, 0]);
        assert_eq!(batch.targets, Targets::Values(array![[9.0], [1.0]]));
    }
}
