//! Lazily evaluated, cached design matrix over a dictionary of basis functions.
//!
//! Columns are evaluated on every row of the input sample the first time they
//! are requested and kept in a compute-once cell shared by all clones of the
//! proxy. A row filter only selects which cached rows are read, so changing it
//! never throws cached values away.

use crate::basis::{BasisFunction, SharedBasis};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, OnceLock};
use thiserror::Error;

/// Row count above which a column is evaluated with a rayon parallel iterator.
const PARALLEL_ROW_THRESHOLD: usize = 2048;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum DesignError {
    #[error("basis index {index} is out of range for a dictionary of {size} functions")]
    BasisIndexOutOfRange { index: usize, size: usize },
    #[error("row index {index} is out of range for a sample of {size} points")]
    RowIndexOutOfRange { index: usize, size: usize },
    #[error(
        "basis function {basis} evaluated to {value} at row {row} (input point {point:?})"
    )]
    NonFiniteBasisValue {
        basis: usize,
        row: usize,
        point: Vec<f64>,
        value: f64,
    },
    #[error(
        "basis function {basis} reads {expected} input coordinates but the sample has {found}"
    )]
    InputDimensionMismatch {
        basis: usize,
        expected: usize,
        found: usize,
    },
    #[error("snapshot does not match the dictionary: {detail}")]
    SnapshotMismatch { detail: String },
}

type ColumnCell = OnceLock<Result<Arc<Array1<f64>>, DesignError>>;

/// Selects one coordinate of the input point; backs proxies built over a
/// precomputed design matrix.
#[derive(Debug, Clone, Copy)]
struct MatrixColumn(usize);

impl BasisFunction for MatrixColumn {
    fn evaluate(&self, point: ArrayView1<'_, f64>) -> f64 {
        point[self.0]
    }

    fn evaluate_batch(&self, points: ArrayView2<'_, f64>) -> Array1<f64> {
        points.column(self.0).to_owned()
    }

    fn label(&self) -> String {
        format!("column {}", self.0)
    }
}

#[derive(Clone)]
pub struct DesignProxy {
    input_sample: Arc<Array2<f64>>,
    basis: Arc<[SharedBasis]>,
    columns: Arc<[ColumnCell]>,
    row_filter: Option<Vec<usize>>,
}

impl fmt::Debug for DesignProxy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DesignProxy")
            .field("sample", &self.input_sample.dim())
            .field("basis_size", &self.basis.len())
            .field("computed", &self.computed_count())
            .field("row_filter", &self.row_filter)
            .finish()
    }
}

fn empty_cells(count: usize) -> Arc<[ColumnCell]> {
    (0..count).map(|_| OnceLock::new()).collect::<Vec<_>>().into()
}

impl DesignProxy {
    /// Wrap an `N x d` input sample and a dictionary of `P` basis functions.
    pub fn new(input_sample: Array2<f64>, basis: Vec<SharedBasis>) -> Self {
        let columns = empty_cells(basis.len());
        Self {
            input_sample: Arc::new(input_sample),
            basis: basis.into(),
            columns,
            row_filter: None,
        }
    }

    /// Proxy whose column `j` is column `j` of `matrix`.
    pub fn from_matrix(matrix: Array2<f64>) -> Self {
        let basis = (0..matrix.ncols())
            .map(|j| Arc::new(MatrixColumn(j)) as SharedBasis)
            .collect();
        Self::new(matrix, basis)
    }

    pub fn basis(&self) -> &[SharedBasis] {
        &self.basis
    }

    pub fn basis_size(&self) -> usize {
        self.basis.len()
    }

    pub fn input_sample(&self) -> ArrayView2<'_, f64> {
        self.input_sample.view()
    }

    pub fn input_dimension(&self) -> usize {
        self.input_sample.ncols()
    }

    /// Number of rows in the unfiltered sample.
    pub fn full_sample_size(&self) -> usize {
        self.input_sample.nrows()
    }

    /// Number of rows seen through the current filter.
    pub fn sample_size(&self) -> usize {
        match &self.row_filter {
            Some(rows) => rows.len(),
            None => self.full_sample_size(),
        }
    }

    pub fn row_filter(&self) -> Option<&[usize]> {
        self.row_filter.as_deref()
    }

    /// Replace the active row subset; `None` restores every row.
    pub fn set_row_filter(&mut self, filter: Option<Vec<usize>>) -> Result<(), DesignError> {
        if let Some(rows) = &filter {
            self.check_rows(rows)?;
        }
        self.row_filter = filter;
        Ok(())
    }

    pub fn is_computed(&self, index: usize) -> bool {
        self.columns
            .get(index)
            .and_then(|cell| cell.get())
            .is_some_and(|value| value.is_ok())
    }

    pub fn computed_count(&self) -> usize {
        self.columns
            .iter()
            .filter(|cell| matches!(cell.get(), Some(Ok(_))))
            .count()
    }

    /// Design matrix over the filtered rows, one column per entry of `indices`
    /// in the requested order.
    pub fn compute_design(&self, indices: &[usize]) -> Result<Array2<f64>, DesignError> {
        match &self.row_filter {
            Some(rows) => self.gather(indices, rows),
            None => {
                let n = self.full_sample_size();
                let mut design = Array2::<f64>::zeros((n, indices.len()));
                for (j, &index) in indices.iter().enumerate() {
                    let column = self.column(index)?;
                    design.column_mut(j).assign(column.as_ref());
                }
                Ok(design)
            }
        }
    }

    /// Design matrix over explicit sample rows, ignoring the current filter.
    pub fn compute_design_rows(
        &self,
        indices: &[usize],
        rows: &[usize],
    ) -> Result<Array2<f64>, DesignError> {
        self.check_rows(rows)?;
        self.gather(indices, rows)
    }

    /// Full-length evaluation of one basis function, cached.
    pub fn column(&self, index: usize) -> Result<Arc<Array1<f64>>, DesignError> {
        let cell = self
            .columns
            .get(index)
            .ok_or(DesignError::BasisIndexOutOfRange {
                index,
                size: self.basis.len(),
            })?;
        cell.get_or_init(|| self.evaluate_column(index)).clone()
    }

    fn gather(&self, indices: &[usize], rows: &[usize]) -> Result<Array2<f64>, DesignError> {
        let mut design = Array2::<f64>::zeros((rows.len(), indices.len()));
        for (j, &index) in indices.iter().enumerate() {
            let column = self.column(index)?;
            for (out, &row) in design.column_mut(j).iter_mut().zip(rows) {
                *out = column[row];
            }
        }
        Ok(design)
    }

    fn check_rows(&self, rows: &[usize]) -> Result<(), DesignError> {
        let size = self.full_sample_size();
        match rows.iter().find(|&&row| row >= size) {
            Some(&index) => Err(DesignError::RowIndexOutOfRange { index, size }),
            None => Ok(()),
        }
    }

    /// Check every basis function that declares an input dimension against
    /// the sample.
    pub fn check_input_dimension(&self) -> Result<(), DesignError> {
        (0..self.basis.len()).try_for_each(|index| self.check_function_dimension(index))
    }

    fn check_function_dimension(&self, index: usize) -> Result<(), DesignError> {
        let found = self.input_dimension();
        match self.basis[index].input_dimension() {
            Some(expected) if expected != found => Err(DesignError::InputDimensionMismatch {
                basis: index,
                expected,
                found,
            }),
            _ => Ok(()),
        }
    }

    fn evaluate_column(&self, index: usize) -> Result<Arc<Array1<f64>>, DesignError> {
        self.check_function_dimension(index)?;
        let function = &self.basis[index];
        let sample = self.input_sample.view();
        log::trace!(
            "evaluating basis function {index} ({}) on {} rows",
            function.label(),
            sample.nrows()
        );
        let values = if sample.nrows() >= PARALLEL_ROW_THRESHOLD {
            let evaluated: Vec<f64> = sample
                .axis_iter(Axis(0))
                .into_par_iter()
                .map(|point| function.evaluate(point))
                .collect();
            Array1::from(evaluated)
        } else {
            function.evaluate_batch(sample)
        };
        if let Some((row, &value)) = values.iter().enumerate().find(|(_, v)| !v.is_finite()) {
            return Err(DesignError::NonFiniteBasisValue {
                basis: index,
                row,
                point: sample.row(row).to_vec(),
                value,
            });
        }
        Ok(Arc::new(values))
    }

    /// Serializable copy of the sample, the filter and every cached column.
    pub fn snapshot(&self) -> DesignSnapshot {
        let cached_columns = self
            .columns
            .iter()
            .enumerate()
            .filter_map(|(index, cell)| match cell.get() {
                Some(Ok(column)) => Some((index, column.as_ref().clone())),
                _ => None,
            })
            .collect();
        DesignSnapshot {
            input_sample: self.input_sample.as_ref().clone(),
            basis_size: self.basis.len(),
            row_filter: self.row_filter.clone(),
            cached_columns,
        }
    }

    /// Rebuild a proxy from a snapshot; the basis functions are supplied again
    /// and must match the snapshot's dictionary size.
    pub fn from_snapshot(
        snapshot: DesignSnapshot,
        basis: Vec<SharedBasis>,
    ) -> Result<Self, DesignError> {
        if basis.len() != snapshot.basis_size {
            return Err(DesignError::SnapshotMismatch {
                detail: format!(
                    "snapshot holds {} basis functions, {} supplied",
                    snapshot.basis_size,
                    basis.len()
                ),
            });
        }
        let rows = snapshot.input_sample.nrows();
        let mut proxy = Self::new(snapshot.input_sample, basis);
        for (index, column) in snapshot.cached_columns {
            if column.len() != rows {
                return Err(DesignError::SnapshotMismatch {
                    detail: format!(
                        "cached column {index} has {} rows, sample has {rows}",
                        column.len()
                    ),
                });
            }
            let cell = proxy
                .columns
                .get(index)
                .ok_or(DesignError::BasisIndexOutOfRange {
                    index,
                    size: snapshot.basis_size,
                })?;
            let _ = cell.set(Ok(Arc::new(column)));
        }
        proxy.set_row_filter(snapshot.row_filter)?;
        Ok(proxy)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DesignSnapshot {
    pub input_sample: Array2<f64>,
    pub basis_size: usize,
    pub row_filter: Option<Vec<usize>>,
    pub cached_columns: Vec<(usize, Array1<f64>)>,
}
