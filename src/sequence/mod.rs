//! Nested basis sequences and the factories that grow them.

pub mod lars;

pub use lars::{Lars, LarsState};

use crate::least_squares::LeastSquaresMethod;
use crate::types::SelectionError;
use ndarray::{Array1, ArrayView1};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Ordered list of active index sets, one per step, in global dictionary
/// indices.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasisSequence {
    basis_size: usize,
    subsets: Vec<Vec<usize>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    coefficient_history: Vec<Array1<f64>>,
}

impl BasisSequence {
    pub fn new(basis_size: usize) -> Self {
        Self {
            basis_size,
            subsets: Vec::new(),
            coefficient_history: Vec::new(),
        }
    }

    /// Size of the dictionary the indices refer to.
    pub fn basis_size(&self) -> usize {
        self.basis_size
    }

    pub fn len(&self) -> usize {
        self.subsets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subsets.is_empty()
    }

    pub fn subset(&self, step: usize) -> Option<&[usize]> {
        self.subsets.get(step).map(Vec::as_slice)
    }

    pub fn last(&self) -> Option<&[usize]> {
        self.subsets.last().map(Vec::as_slice)
    }

    pub fn iter(&self) -> impl Iterator<Item = &[usize]> {
        self.subsets.iter().map(Vec::as_slice)
    }

    /// Coefficients recorded at each step, aligned with [`subset`](Self::subset).
    /// Empty unless the factory tracks history.
    pub fn coefficient_history(&self) -> &[Array1<f64>] {
        &self.coefficient_history
    }

    pub fn push(&mut self, step: SequenceStep) {
        self.subsets.push(step.indices);
        if let Some(coefficients) = step.coefficients {
            self.coefficient_history.push(coefficients);
        }
    }
}

/// One step emitted by a factory.
#[derive(Debug, Clone, PartialEq)]
pub struct SequenceStep {
    pub indices: Vec<usize>,
    pub coefficients: Option<Array1<f64>>,
}

/// Greedy producer of a [`BasisSequence`] driven through a least-squares
/// method whose active set it mutates.
pub trait BasisSequenceFactory: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Reset the iteration state and the method's active set.
    fn initialize(
        &mut self,
        method: &mut dyn LeastSquaresMethod,
        y: ArrayView1<'_, f64>,
    ) -> Result<(), SelectionError>;

    /// Advance one step; `None` when no further predictor can be activated.
    fn update_basis(
        &mut self,
        method: &mut dyn LeastSquaresMethod,
    ) -> Result<Option<SequenceStep>, SelectionError>;

    /// Whether the last step met the stopping criterion.
    fn is_converged(&self) -> bool;

    fn box_clone(&self) -> Box<dyn BasisSequenceFactory>;

    fn build(
        &mut self,
        method: &mut dyn LeastSquaresMethod,
        y: ArrayView1<'_, f64>,
    ) -> Result<BasisSequence, SelectionError> {
        self.initialize(method, y)?;
        let mut sequence = BasisSequence::new(method.proxy().basis_size());
        self.extend(method, &mut sequence, None)?;
        Ok(sequence)
    }

    /// Run up to `max_steps` further steps (all remaining when `None`),
    /// appending them to `sequence`. Returns the number of steps taken.
    fn extend(
        &mut self,
        method: &mut dyn LeastSquaresMethod,
        sequence: &mut BasisSequence,
        max_steps: Option<usize>,
    ) -> Result<usize, SelectionError> {
        let mut taken = 0;
        while !self.is_converged() && max_steps.is_none_or(|limit| taken < limit) {
            match self.update_basis(method)? {
                Some(step) => {
                    sequence.push(step);
                    taken += 1;
                }
                None => break,
            }
        }
        Ok(taken)
    }
}

impl Clone for Box<dyn BasisSequenceFactory> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}
