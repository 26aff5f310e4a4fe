use super::{LeastSquaresMethod, LeastSquaresProblem, MethodState, build_with_config};
use super::cholesky::CholeskyMethod;
use crate::fitting;
use crate::selection::select_basis;
use crate::sequence::lars::Lars;
use crate::types::{LeastSquaresStrategy, SelectionConfig, SelectionError};
use ndarray::{Array1, Array2, ArrayView1};

/// Least squares with embedded basis selection.
///
/// `solve` runs LARS plus cross-validation on a scratch copy of the inner
/// method and returns coefficients over the current indices, zero outside
/// the selected subset. Every Gram and hat functional is the inner method's.
#[derive(Debug, Clone)]
pub struct SparseMethod {
    inner: Box<dyn LeastSquaresMethod>,
    config: SelectionConfig,
}

impl SparseMethod {
    /// Sparse selection over a Cholesky inner method.
    pub fn new(problem: LeastSquaresProblem, config: SelectionConfig) -> Self {
        Self::with_inner(Box::new(CholeskyMethod::new(problem)), config)
    }

    pub fn with_inner(inner: Box<dyn LeastSquaresMethod>, config: SelectionConfig) -> Self {
        Self { inner, config }
    }

    pub fn inner(&self) -> &dyn LeastSquaresMethod {
        self.inner.as_ref()
    }
}

impl LeastSquaresMethod for SparseMethod {
    fn strategy(&self) -> LeastSquaresStrategy {
        LeastSquaresStrategy::Sparse
    }

    fn problem(&self) -> &LeastSquaresProblem {
        self.inner.problem()
    }

    fn solve(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError> {
        let problem = self.inner.problem();
        let current = problem.current_indices().to_vec();
        let mut scratch = build_with_config(
            &self.config,
            self.inner.strategy(),
            problem.proxy().clone(),
            problem.weight_argument(),
            current.clone(),
        )?;
        let mut factory = Lars::from_config(&self.config);
        let fitting = fitting::build(&self.config);
        let selected = select_basis(
            scratch.as_mut(),
            rhs,
            &mut factory,
            fitting.as_ref(),
            &self.config,
        )?;
        log::debug!(
            "Sparse: kept {} of {} basis functions",
            selected.indices.len(),
            current.len()
        );

        let mut coefficients = Array1::<f64>::zeros(current.len());
        for (index, value) in selected.indices.iter().zip(selected.coefficients.iter()) {
            let position = current
                .iter()
                .position(|c| c == index)
                .ok_or_else(|| {
                    SelectionError::Internal(format!(
                        "selected index {index} is not an active index"
                    ))
                })?;
            coefficients[position] = *value;
        }
        Ok(coefficients)
    }

    fn solve_normal(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError> {
        self.inner.solve_normal(rhs)
    }

    fn gram_inverse(&mut self) -> Result<Array2<f64>, SelectionError> {
        self.inner.gram_inverse()
    }

    fn gram_inverse_diag(&mut self) -> Result<Array1<f64>, SelectionError> {
        self.inner.gram_inverse_diag()
    }

    fn gram_inverse_trace(&mut self) -> Result<f64, SelectionError> {
        self.inner.gram_inverse_trace()
    }

    fn h_diag(&mut self) -> Result<Array1<f64>, SelectionError> {
        self.inner.h_diag()
    }

    fn h(&mut self) -> Result<Array2<f64>, SelectionError> {
        self.inner.h()
    }

    fn update(
        &mut self,
        added: &[usize],
        conserved: &[usize],
        removed: &[usize],
        row: bool,
    ) -> Result<(), SelectionError> {
        self.inner.update(added, conserved, removed, row)
    }

    fn trash_decomposition(&mut self) {
        self.inner.trash_decomposition();
    }

    fn box_clone(&self) -> Box<dyn LeastSquaresMethod> {
        Box::new(self.clone())
    }

    fn state(&self) -> MethodState {
        MethodState {
            strategy: LeastSquaresStrategy::Sparse,
            ..self.inner.state()
        }
    }
}
