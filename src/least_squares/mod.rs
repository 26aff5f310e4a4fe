//! Weighted least-squares solvers over a subset of a design dictionary.
//!
//! Every strategy solves `argmin_x ‖W^{1/2}(Ψx - y)‖₂` where `Ψ` is the design
//! restricted to the active (current) basis indices. The active set can be
//! grown or shrunk with [`LeastSquaresMethod::update`]; strategies that can
//! maintain their factorization incrementally do so.

pub mod cholesky;
pub mod qr;
pub mod sparse;
pub mod svd;

pub use cholesky::CholeskyMethod;
pub use qr::QrMethod;
pub use sparse::SparseMethod;
pub use svd::SvdMethod;

use crate::design::DesignProxy;
use crate::linalg::faer_ndarray::fast_ab;
use crate::types::{LeastSquaresStrategy, SelectionConfig, SelectionError};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

/// Capability set shared by the Cholesky, QR, SVD and sparse strategies.
///
/// Queries take `&mut self` because a strategy may (re)build its
/// factorization on first use after an update or a call to
/// [`trash_decomposition`](LeastSquaresMethod::trash_decomposition).
pub trait LeastSquaresMethod: Send + Sync + fmt::Debug {
    fn strategy(&self) -> LeastSquaresStrategy;

    fn problem(&self) -> &LeastSquaresProblem;

    /// Coefficients over the current indices, in their order.
    fn solve(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError>;

    /// Solve `ΨᵀWΨ x = rhs`.
    fn solve_normal(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError>;

    /// `(ΨᵀWΨ)⁻¹` (a pseudo-inverse for the SVD strategy).
    fn gram_inverse(&mut self) -> Result<Array2<f64>, SelectionError>;

    fn gram_inverse_diag(&mut self) -> Result<Array1<f64>, SelectionError> {
        Ok(self.gram_inverse()?.diag().to_owned())
    }

    fn gram_inverse_trace(&mut self) -> Result<f64, SelectionError> {
        Ok(self.gram_inverse_diag()?.sum())
    }

    /// Diagonal of the hat matrix `H = Ψ(ΨᵀWΨ)⁻¹ΨᵀW`.
    fn h_diag(&mut self) -> Result<Array1<f64>, SelectionError>;

    fn h(&mut self) -> Result<Array2<f64>, SelectionError> {
        let design = self.problem().design()?;
        let gram_inverse = self.gram_inverse()?;
        let mut hat = fast_ab(&fast_ab(&design, &gram_inverse), &design.t());
        if let Some(weights) = self.problem().effective_weights() {
            hat *= &weights.view().insert_axis(Axis(0));
        }
        Ok(hat)
    }

    /// Move the active set to `conserved ++ added`, dropping `removed`.
    ///
    /// With `row = true` the three sets name sample rows instead: the row
    /// filter becomes `conserved ++ added` and the factorization is rebuilt.
    fn update(
        &mut self,
        added: &[usize],
        conserved: &[usize],
        removed: &[usize],
        row: bool,
    ) -> Result<(), SelectionError>;

    /// Drop any cached factorization; the next query rebuilds it.
    fn trash_decomposition(&mut self);

    /// `W^{1/2}Ψ` over the current indices, or over the initial candidate set
    /// when `whole` is set.
    fn compute_weighted_design(&self, whole: bool) -> Result<Array2<f64>, SelectionError> {
        let problem = self.problem();
        if whole {
            problem.weighted_design(problem.initial_indices())
        } else {
            problem.weighted_design(problem.current_indices())
        }
    }

    fn box_clone(&self) -> Box<dyn LeastSquaresMethod>;

    fn state(&self) -> MethodState {
        let problem = self.problem();
        MethodState {
            strategy: self.strategy(),
            svd_threshold: None,
            weights: problem.weights.clone(),
            initial_indices: problem.initial_indices.clone(),
            current_indices: problem.current_indices.clone(),
            row_filter: problem.proxy.row_filter().map(<[usize]>::to_vec),
        }
    }

    fn name(&self) -> &'static str {
        self.strategy().name()
    }

    fn current_indices(&self) -> &[usize] {
        self.problem().current_indices()
    }

    fn initial_indices(&self) -> &[usize] {
        self.problem().initial_indices()
    }

    fn proxy(&self) -> &DesignProxy {
        self.problem().proxy()
    }

    fn has_uniform_weight(&self) -> bool {
        self.problem().has_uniform_weight()
    }
}

impl Clone for Box<dyn LeastSquaresMethod> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Data shared by every strategy: the design proxy, the per-row weights and
/// the initial and current index sets.
#[derive(Debug, Clone)]
pub struct LeastSquaresProblem {
    proxy: DesignProxy,
    /// One weight per row of the unfiltered sample.
    weights: Array1<f64>,
    uniform_weight: bool,
    initial_indices: Vec<usize>,
    current_indices: Vec<usize>,
}

impl LeastSquaresProblem {
    /// `weights = None` means uniform weighting. The current set starts equal
    /// to `indices`.
    pub fn new(
        proxy: DesignProxy,
        weights: Option<Array1<f64>>,
        indices: Vec<usize>,
    ) -> Result<Self, SelectionError> {
        let n = proxy.full_sample_size();
        let (weights, uniform_weight) = match weights {
            None => (Array1::ones(n), true),
            Some(w) => {
                if w.len() != n {
                    return Err(SelectionError::DimensionMismatch {
                        what: "weights",
                        expected: n,
                        found: w.len(),
                    });
                }
                if let Some((index, &value)) = w
                    .iter()
                    .enumerate()
                    .find(|(_, v)| !v.is_finite() || **v < 0.0)
                {
                    return Err(SelectionError::InvalidWeight { index, value });
                }
                if n > 0 && w.iter().all(|&v| v == 0.0) {
                    return Err(SelectionError::InvalidArgument(
                        "at least one weight must be positive".to_string(),
                    ));
                }
                let uniform = w.first().is_none_or(|&first| w.iter().all(|&v| v == first));
                (w, uniform)
            }
        };
        check_basis_indices(&indices, proxy.basis_size())?;
        Ok(Self {
            proxy,
            weights,
            uniform_weight,
            current_indices: indices.clone(),
            initial_indices: indices,
        })
    }

    pub fn proxy(&self) -> &DesignProxy {
        &self.proxy
    }

    pub fn weights(&self) -> &Array1<f64> {
        &self.weights
    }

    pub fn has_uniform_weight(&self) -> bool {
        self.uniform_weight
    }

    pub fn initial_indices(&self) -> &[usize] {
        &self.initial_indices
    }

    pub fn current_indices(&self) -> &[usize] {
        &self.current_indices
    }

    /// Weights as accepted by [`LeastSquaresProblem::new`].
    pub(crate) fn weight_argument(&self) -> Option<Array1<f64>> {
        (!self.uniform_weight).then(|| self.weights.clone())
    }

    /// Rows under the proxy's current filter.
    pub fn sample_size(&self) -> usize {
        self.proxy.sample_size()
    }

    /// Weights of the filtered rows, or `None` on the uniform fast path.
    ///
    /// All-equal weights, whatever their value, take the unweighted path.
    pub fn effective_weights(&self) -> Option<Array1<f64>> {
        if self.uniform_weight {
            return None;
        }
        Some(match self.proxy.row_filter() {
            Some(rows) => rows.iter().map(|&r| self.weights[r]).collect(),
            None => self.weights.clone(),
        })
    }

    /// Unweighted design over the current indices.
    pub fn design(&self) -> Result<Array2<f64>, SelectionError> {
        Ok(self.proxy.compute_design(&self.current_indices)?)
    }

    /// `W^{1/2}Ψ` for arbitrary dictionary indices.
    pub fn weighted_design(&self, indices: &[usize]) -> Result<Array2<f64>, SelectionError> {
        let mut design = self.proxy.compute_design(indices)?;
        if let Some(weights) = self.effective_weights() {
            let sqrt_w = weights.mapv(f64::sqrt);
            design *= &sqrt_w.view().insert_axis(Axis(1));
        }
        Ok(design)
    }

    /// `W^{1/2}rhs`, checking the length against the filtered sample.
    pub fn weighted_rhs(&self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError> {
        let n = self.sample_size();
        if rhs.len() != n {
            return Err(SelectionError::DimensionMismatch {
                what: "right-hand side",
                expected: n,
                found: rhs.len(),
            });
        }
        Ok(match self.effective_weights() {
            Some(weights) => &rhs * &weights.mapv(f64::sqrt),
            None => rhs.to_owned(),
        })
    }

    pub(crate) fn check_normal_rhs(&self, rhs: ArrayView1<'_, f64>) -> Result<(), SelectionError> {
        let k = self.current_indices.len();
        if rhs.len() != k {
            return Err(SelectionError::DimensionMismatch {
                what: "normal-equation right-hand side",
                expected: k,
                found: rhs.len(),
            });
        }
        Ok(())
    }

    /// Validate a column update and move the current set to
    /// `conserved ++ added`.
    pub(crate) fn apply_column_update(
        &mut self,
        added: &[usize],
        conserved: &[usize],
        removed: &[usize],
    ) -> Result<ColumnUpdate, SelectionError> {
        let bound = self.proxy.basis_size();
        let current: HashSet<usize> = self.current_indices.iter().copied().collect();
        let initial: HashSet<usize> = self.initial_indices.iter().copied().collect();
        let mut seen = HashSet::new();
        for &index in conserved.iter().chain(removed) {
            if !current.contains(&index) {
                return Err(SelectionError::InvalidArgument(format!(
                    "index {index} is conserved or removed but not active"
                )));
            }
            if !seen.insert(index) {
                return Err(SelectionError::InvalidArgument(format!(
                    "index {index} appears twice among conserved and removed indices"
                )));
            }
        }
        if seen.len() != current.len() {
            return Err(SelectionError::InvalidArgument(
                "every active index must be either conserved or removed".to_string(),
            ));
        }
        let conserved_set: HashSet<usize> = conserved.iter().copied().collect();
        let mut added_set = HashSet::new();
        for &index in added {
            if index >= bound {
                return Err(SelectionError::IndexOutOfRange { index, bound });
            }
            if !initial.contains(&index) {
                return Err(SelectionError::InvalidArgument(format!(
                    "index {index} is not among the initial candidate indices"
                )));
            }
            if conserved_set.contains(&index) || !added_set.insert(index) {
                return Err(SelectionError::InvalidArgument(format!(
                    "index {index} is added twice or already conserved"
                )));
            }
        }

        // Positions to delete when the conserved indices keep their order.
        let mut positions = Vec::new();
        let mut expected = conserved.iter().peekable();
        let mut in_order = true;
        for (position, index) in self.current_indices.iter().enumerate() {
            if expected.peek() == Some(&index) {
                expected.next();
            } else if conserved_set.contains(index) {
                in_order = false;
                break;
            } else {
                positions.push(position);
            }
        }

        self.current_indices = conserved.iter().chain(added).copied().collect();
        Ok(ColumnUpdate {
            removed_positions: in_order.then_some(positions),
            conserved_len: conserved.len(),
        })
    }

    /// Validate a row update and install `conserved ++ added` as the filter.
    pub(crate) fn apply_row_update(
        &mut self,
        added: &[usize],
        conserved: &[usize],
        removed: &[usize],
    ) -> Result<(), SelectionError> {
        let bound = self.proxy.full_sample_size();
        let mut seen = HashSet::new();
        for &row in added.iter().chain(conserved).chain(removed) {
            if row >= bound {
                return Err(SelectionError::IndexOutOfRange { index: row, bound });
            }
            if !seen.insert(row) {
                return Err(SelectionError::InvalidArgument(format!(
                    "row {row} appears in more than one of added, conserved and removed"
                )));
            }
        }
        let rows: Vec<usize> = conserved.iter().chain(added).copied().collect();
        let filter = if rows.len() == bound && rows.iter().enumerate().all(|(i, &r)| i == r) {
            None
        } else {
            Some(rows)
        };
        self.proxy.set_row_filter(filter)?;
        Ok(())
    }

    /// Undo a column update whose factorization step failed.
    pub(crate) fn revert_current_indices(&mut self, previous: Vec<usize>) {
        self.current_indices = previous;
    }

    fn restore_indices(&mut self, current: Vec<usize>) -> Result<(), SelectionError> {
        let initial: HashSet<usize> = self.initial_indices.iter().copied().collect();
        if let Some(&index) = current.iter().find(|i| !initial.contains(i)) {
            return Err(SelectionError::InvalidArgument(format!(
                "restored index {index} is not among the initial candidate indices"
            )));
        }
        self.current_indices = current;
        Ok(())
    }
}

/// How a column update can be replayed on an existing factorization.
#[derive(Debug, Clone)]
pub(crate) struct ColumnUpdate {
    /// Positions (in the previous active order) to delete, when the conserved
    /// indices kept their relative order; `None` forces a rebuild.
    pub removed_positions: Option<Vec<usize>>,
    pub conserved_len: usize,
}

fn check_basis_indices(indices: &[usize], bound: usize) -> Result<(), SelectionError> {
    let mut seen = HashSet::new();
    for &index in indices {
        if index >= bound {
            return Err(SelectionError::IndexOutOfRange { index, bound });
        }
        if !seen.insert(index) {
            return Err(SelectionError::InvalidArgument(format!(
                "basis index {index} is listed twice"
            )));
        }
    }
    Ok(())
}

/// Serializable state of a least-squares method; see [`restore`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MethodState {
    pub strategy: LeastSquaresStrategy,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svd_threshold: Option<f64>,
    pub weights: Array1<f64>,
    pub initial_indices: Vec<usize>,
    pub current_indices: Vec<usize>,
    pub row_filter: Option<Vec<usize>>,
}

/// Build a strategy with default options.
pub fn build(
    strategy: LeastSquaresStrategy,
    proxy: DesignProxy,
    weights: Option<Array1<f64>>,
    indices: Vec<usize>,
) -> Result<Box<dyn LeastSquaresMethod>, SelectionError> {
    build_with_config(&SelectionConfig::default(), strategy, proxy, weights, indices)
}

/// Build a strategy by name (`"Cholesky"`, `"QR"`, `"SVD"` or `"Sparse"`).
pub fn build_by_name(
    name: &str,
    proxy: DesignProxy,
    weights: Option<Array1<f64>>,
    indices: Vec<usize>,
) -> Result<Box<dyn LeastSquaresMethod>, SelectionError> {
    build(name.parse()?, proxy, weights, indices)
}

pub fn build_with_config(
    config: &SelectionConfig,
    strategy: LeastSquaresStrategy,
    proxy: DesignProxy,
    weights: Option<Array1<f64>>,
    indices: Vec<usize>,
) -> Result<Box<dyn LeastSquaresMethod>, SelectionError> {
    let problem = LeastSquaresProblem::new(proxy, weights, indices)?;
    Ok(match strategy {
        LeastSquaresStrategy::Cholesky => Box::new(CholeskyMethod::new(problem)),
        LeastSquaresStrategy::QR => Box::new(QrMethod::new(problem)),
        LeastSquaresStrategy::SVD => Box::new(SvdMethod::new(problem, config.svd_threshold)),
        LeastSquaresStrategy::Sparse => Box::new(SparseMethod::new(problem, config.clone())),
    })
}

/// Standalone use on a dense design matrix: every column is a candidate.
pub fn build_from_matrix(
    strategy: LeastSquaresStrategy,
    matrix: Array2<f64>,
) -> Result<Box<dyn LeastSquaresMethod>, SelectionError> {
    let indices = (0..matrix.ncols()).collect();
    build(strategy, DesignProxy::from_matrix(matrix), None, indices)
}

/// Rebuild a method from its state over a proxy holding the same sample and
/// dictionary.
pub fn restore(
    state: MethodState,
    mut proxy: DesignProxy,
) -> Result<Box<dyn LeastSquaresMethod>, SelectionError> {
    proxy.set_row_filter(state.row_filter)?;
    let mut problem = LeastSquaresProblem::new(proxy, Some(state.weights), state.initial_indices)?;
    problem.restore_indices(state.current_indices)?;
    let config = SelectionConfig {
        svd_threshold: state
            .svd_threshold
            .unwrap_or_else(crate::types::default_svd_threshold),
        ..SelectionConfig::default()
    };
    Ok(match state.strategy {
        LeastSquaresStrategy::Cholesky => Box::new(CholeskyMethod::new(problem)),
        LeastSquaresStrategy::QR => Box::new(QrMethod::new(problem)),
        LeastSquaresStrategy::SVD => Box::new(SvdMethod::new(problem, config.svd_threshold)),
        LeastSquaresStrategy::Sparse => Box::new(SparseMethod::new(problem, config)),
    })
}

/// Squared Euclidean norm of every row.
pub(crate) fn row_norms_squared(matrix: &Array2<f64>) -> Array1<f64> {
    matrix.rows().into_iter().map(|row| row.dot(&row)).collect()
}
