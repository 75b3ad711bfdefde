use itertools::Itertools;
use nalgebra::DVector;
use serde::{Deserialize, Serialize};

use crate::error::CorrectionError;

/// Dense isotopologue intensities of one fragment in one sample.
///
/// There is one axis per tracer, axis `t` has size `atoms(t) + 1`. Values are
/// stored row-major, the first tracer is the slowest axis, so a single tracer
/// tensor is just the vector `[M+0, M+1, ..., M+n]`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LabelTensor {
    shape: Vec<usize>,
    values: Vec<f64>,
}

impl LabelTensor {
    pub fn zeros(shape: Vec<usize>) -> Self {
        let size = shape.iter().product();
        LabelTensor {
            shape,
            values: vec![0.0; size],
        }
    }

    /// Wraps row-major `values`, their number has to match the shape.
    pub fn from_values(shape: Vec<usize>, values: Vec<f64>) -> Result<Self, CorrectionError> {
        let expected: usize = shape.iter().product();
        if expected != values.len() {
            return Err(CorrectionError::Dimension {
                expected,
                found: values.len(),
            });
        }
        Ok(LabelTensor { shape, values })
    }

    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn values_mut(&mut self) -> &mut [f64] {
        &mut self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn sum(&self) -> f64 {
        self.values.iter().sum()
    }

    pub fn flat_index(&self, position: &[usize]) -> usize {
        position
            .iter()
            .zip(self.shape.iter())
            .fold(0, |acc, (&p, &size)| acc * size + p)
    }

    pub fn get(&self, position: &[usize]) -> f64 {
        self.values[self.flat_index(position)]
    }

    pub fn set(&mut self, position: &[usize], value: f64) {
        let index = self.flat_index(position);
        self.values[index] = value;
    }

    /// All positions in storage order.
    pub fn positions(&self) -> impl Iterator<Item = Vec<usize>> {
        self.shape.clone().into_iter().map(|size| 0..size).multi_cartesian_product()
    }

    /// Flat indices of every lane along `axis`, one vector per lane.
    ///
    /// # Examples
    ///
    /// ```
    /// use nacore::data::tensor::LabelTensor;
    ///
    /// let tensor = LabelTensor::zeros(vec![2, 3]);
    /// assert_eq!(tensor.lanes(0), vec![vec![0, 3], vec![1, 4], vec![2, 5]]);
    /// assert_eq!(tensor.lanes(1), vec![vec![0, 1, 2], vec![3, 4, 5]]);
    /// ```
    pub fn lanes(&self, axis: usize) -> Vec<Vec<usize>> {
        let size = self.shape[axis];
        let inner: usize = self.shape[axis + 1..].iter().product();
        let outer: usize = self.shape[..axis].iter().product();

        (0..outer)
            .flat_map(|o| (0..inner).map(move |i| o * size * inner + i))
            .map(|base| (0..size).map(|k| base + k * inner).collect())
            .collect()
    }

    /// Replaces every lane along `axis` by `f(lane)`, holding all other axes fixed.
    pub fn map_lanes<E, F>(mut self, axis: usize, mut f: F) -> Result<Self, E>
    where
        F: FnMut(DVector<f64>) -> Result<DVector<f64>, E>,
    {
        for lane in self.lanes(axis) {
            let observed = DVector::from_iterator(lane.len(), lane.iter().map(|&i| self.values[i]));
            let corrected = f(observed)?;
            for (&i, value) in lane.iter().zip(corrected.iter()) {
                self.values[i] = *value;
            }
        }
        Ok(self)
    }
}
