//! Upper Cholesky factor `R` of a Gram matrix `G = RᵀR` that can grow and
//! shrink one column at a time.
//!
//! Appending column `k` costs one triangular solve (O(k²)); deleting a column
//! re-triangularizes the trailing block with Givens rotations (O(k²)). Both keep
//! the diagonal of `R` positive.

use super::faer_ndarray::{FaerCholesky, FaerLinalgError};
use ndarray::{Array1, Array2, ArrayView1, s};
use thiserror::Error;

/// Minimum ratio between the new pivot and the column's squared norm before the
/// column is treated as linearly dependent on the active ones.
const PIVOT_REL_TOL: f64 = 1e-12;

#[derive(Debug, Clone, Error)]
pub enum CholeskyUpdateError {
    #[error(
        "appended column is numerically dependent on the active columns \
         (pivot {pivot:.3e} for squared norm {norm_sq:.3e})"
    )]
    DependentColumn { pivot: f64, norm_sq: f64 },
    #[error("column {position} out of range for factor of dimension {dim}")]
    PositionOutOfRange { position: usize, dim: usize },
    #[error(transparent)]
    Factorization(#[from] FaerLinalgError),
}

#[derive(Debug, Clone)]
pub struct UpperCholesky {
    r: Array2<f64>,
}

impl Default for UpperCholesky {
    fn default() -> Self {
        Self {
            r: Array2::zeros((0, 0)),
        }
    }
}

impl UpperCholesky {
    /// Factor a full Gram matrix from scratch, rejecting numerically
    /// dependent columns the same way [`append_column`](Self::append_column) does.
    pub fn from_gram(gram: &Array2<f64>) -> Result<Self, CholeskyUpdateError> {
        if gram.nrows() == 0 {
            return Ok(Self::default());
        }
        let l = gram.cholesky_lower()?;
        for (k, &norm_sq) in gram.diag().iter().enumerate() {
            let pivot = l[[k, k]] * l[[k, k]];
            if !(pivot > PIVOT_REL_TOL * norm_sq.abs()) {
                return Err(CholeskyUpdateError::DependentColumn { pivot, norm_sq });
            }
        }
        Ok(Self {
            r: l.t().to_owned(),
        })
    }

    /// Wrap an upper triangular factor with a positive diagonal (such as the
    /// sign-normalized R of a thin QR).
    pub fn from_factor(r: Array2<f64>) -> Self {
        debug_assert_eq!(r.nrows(), r.ncols());
        Self { r }
    }

    pub fn dim(&self) -> usize {
        self.r.nrows()
    }

    pub fn factor(&self) -> &Array2<f64> {
        &self.r
    }

    /// Append one column given its cross products with the current columns
    /// (`cross[i] = ψ_iᵀψ_new`) and its squared norm.
    pub fn append_column(
        &mut self,
        cross: ArrayView1<'_, f64>,
        norm_sq: f64,
    ) -> Result<(), CholeskyUpdateError> {
        let k = self.dim();
        debug_assert_eq!(cross.len(), k);
        let l = self.solve_transposed(cross);
        let pivot = norm_sq - l.dot(&l);
        if !(pivot > PIVOT_REL_TOL * norm_sq.abs()) || !pivot.is_finite() {
            return Err(CholeskyUpdateError::DependentColumn { pivot, norm_sq });
        }
        let mut grown = Array2::<f64>::zeros((k + 1, k + 1));
        grown.slice_mut(s![..k, ..k]).assign(&self.r);
        grown.slice_mut(s![..k, k]).assign(&l);
        grown[[k, k]] = pivot.sqrt();
        self.r = grown;
        Ok(())
    }

    /// Delete the column at `position`, keeping the relative order of the rest.
    pub fn remove_column(&mut self, position: usize) -> Result<(), CholeskyUpdateError> {
        let k = self.dim();
        if position >= k {
            return Err(CholeskyUpdateError::PositionOutOfRange { position, dim: k });
        }
        // Drop the column: the block right of `position` becomes upper Hessenberg.
        let mut h = Array2::<f64>::zeros((k, k - 1));
        h.slice_mut(s![.., ..position])
            .assign(&self.r.slice(s![.., ..position]));
        h.slice_mut(s![.., position..])
            .assign(&self.r.slice(s![.., position + 1..]));

        for j in position..k - 1 {
            let a = h[[j, j]];
            let b = h[[j + 1, j]];
            let radius = a.hypot(b);
            if radius == 0.0 {
                continue;
            }
            let (c, sn) = (a / radius, b / radius);
            for col in j..k - 1 {
                let top = h[[j, col]];
                let bottom = h[[j + 1, col]];
                h[[j, col]] = c * top + sn * bottom;
                h[[j + 1, col]] = -sn * top + c * bottom;
            }
            h[[j + 1, j]] = 0.0;
        }
        self.r = h.slice(s![..k - 1, ..]).to_owned();
        Ok(())
    }

    /// Solve `Rᵀz = b` (forward substitution).
    pub fn solve_transposed(&self, b: ArrayView1<'_, f64>) -> Array1<f64> {
        let k = self.dim();
        let mut z = Array1::<f64>::zeros(k);
        for i in 0..k {
            let mut acc = b[i];
            for j in 0..i {
                acc -= self.r[[j, i]] * z[j];
            }
            z[i] = acc / self.r[[i, i]];
        }
        z
    }

    /// Solve `Rx = z` (back substitution).
    pub fn solve_upper(&self, z: ArrayView1<'_, f64>) -> Array1<f64> {
        let k = self.dim();
        let mut x = Array1::<f64>::zeros(k);
        for i in (0..k).rev() {
            let mut acc = z[i];
            for j in i + 1..k {
                acc -= self.r[[i, j]] * x[j];
            }
            x[i] = acc / self.r[[i, i]];
        }
        x
    }

    /// Solve the normal system `RᵀR x = b`.
    pub fn solve(&self, b: ArrayView1<'_, f64>) -> Array1<f64> {
        let z = self.solve_transposed(b);
        self.solve_upper(z.view())
    }

    /// `R⁻¹`, upper triangular.
    pub fn inverse_factor(&self) -> Array2<f64> {
        let k = self.dim();
        let mut inv = Array2::<f64>::zeros((k, k));
        for col in 0..k {
            inv[[col, col]] = 1.0 / self.r[[col, col]];
            for i in (0..col).rev() {
                let mut acc = 0.0;
                for j in i + 1..=col {
                    acc += self.r[[i, j]] * inv[[j, col]];
                }
                inv[[i, col]] = -acc / self.r[[i, i]];
            }
        }
        inv
    }

    /// `G⁻¹ = R⁻¹R⁻ᵀ`.
    pub fn gram_inverse(&self) -> Array2<f64> {
        let inv = self.inverse_factor();
        inv.dot(&inv.t())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{Axis, array};

    fn design() -> Array2<f64> {
        Array2::from_shape_fn((9, 4), |(i, j)| {
            let x = i as f64 / 8.0 - 0.3;
            x.powi(j as i32) + 0.05 * (j as f64)
        })
    }

    fn factor_columns(x: &Array2<f64>, cols: &[usize]) -> UpperCholesky {
        let sub = x.select(Axis(1), cols);
        UpperCholesky::from_gram(&sub.t().dot(&sub)).expect("spd")
    }

    #[test]
    fn appending_columns_matches_full_factorization() {
        let x = design();
        let mut chol = UpperCholesky::default();
        for k in 0..x.ncols() {
            let col = x.column(k);
            let cross = x.slice(s![.., ..k]).t().dot(&col);
            chol.append_column(cross.view(), col.dot(&col)).expect("independent");
        }
        let full = factor_columns(&x, &[0, 1, 2, 3]);
        assert_abs_diff_eq!(chol.factor(), full.factor(), epsilon = 1e-10);
    }

    #[test]
    fn removing_a_column_matches_refactorization() {
        let x = design();
        let mut chol = factor_columns(&x, &[0, 1, 2, 3]);
        chol.remove_column(1).expect("in range");
        let expected = factor_columns(&x, &[0, 2, 3]);
        assert_abs_diff_eq!(chol.factor(), expected.factor(), epsilon = 1e-10);

        chol.remove_column(2).expect("in range");
        let expected = factor_columns(&x, &[0, 2]);
        assert_abs_diff_eq!(chol.factor(), expected.factor(), epsilon = 1e-10);
    }

    #[test]
    fn solve_and_inverse_agree_with_gram() {
        let g = array![[4.0, 1.0, 0.5], [1.0, 3.0, 0.2], [0.5, 0.2, 2.0]];
        let chol = UpperCholesky::from_gram(&g).expect("spd");
        let b = array![1.0, -2.0, 0.5];
        let x = chol.solve(b.view());
        assert_abs_diff_eq!(g.dot(&x), b, epsilon = 1e-12);
        assert_abs_diff_eq!(g.dot(&chol.gram_inverse()), Array2::<f64>::eye(3), epsilon = 1e-12);
    }

    #[test]
    fn dependent_column_is_rejected() {
        let g = array![[1.0]];
        let mut chol = UpperCholesky::from_gram(&g).expect("spd");
        let result = chol.append_column(array![2.0].view(), 4.0);
        assert!(matches!(
            result,
            Err(CholeskyUpdateError::DependentColumn { .. })
        ));
        assert_eq!(chol.dim(), 1);
    }
}
