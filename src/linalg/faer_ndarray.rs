use faer::linalg::matmul::matmul;
use faer::linalg::solvers;
use faer::{Accum, Mat, MatMut, MatRef, Par, Side, get_global_parallelism};
use ndarray::{Array1, Array2, ArrayBase, Data, Ix1, Ix2};
use std::marker::PhantomData;
use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum FaerLinalgError {
    #[error("Cholesky factorization failed: {0:?}")]
    Cholesky(solvers::LltError),
    #[error("SVD failed to converge")]
    SvdNoConvergence,
    #[error("QR factor R is rank deficient at column {column} (|r_kk| = {magnitude:.3e})")]
    RankDeficientQr { column: usize, magnitude: f64 },
}

#[inline]
fn should_use_faer_matmul(m: usize, n: usize, k: usize) -> bool {
    // Tiny products stay on ndarray; faer GEMM/GEMV pays off from moderate sizes.
    const MIN_DIM: usize = 32;
    const MIN_FLOP_SCALE: usize = 64 * 64;
    (m >= MIN_DIM || n >= MIN_DIM || k >= MIN_DIM)
        && m.saturating_mul(n).saturating_mul(k) >= MIN_FLOP_SCALE
}

#[inline]
fn matmul_parallelism(dims: &[usize]) -> Par {
    if dims.iter().any(|&d| d < 128) {
        Par::Seq
    } else {
        get_global_parallelism()
    }
}

#[inline]
fn array1_to_col_mat_mut(array: &mut Array1<f64>) -> MatMut<'_, f64> {
    let len = array.len();
    let stride = array.strides()[0];
    // SAFETY: single column view over the ndarray buffer; column stride unused.
    unsafe { MatMut::from_raw_parts_mut(array.as_mut_ptr(), len, 1, stride, 0) }
}

/// Compute AᵀA (the unweighted Gram matrix of a design) with faer GEMM.
///
/// For A of shape (n, p) the result is (p, p). Small inputs fall back to ndarray.
#[inline]
pub fn fast_ata<S: Data<Elem = f64>>(a: &ArrayBase<S, Ix2>) -> Array2<f64> {
    let (n, p) = a.dim();
    if !should_use_faer_matmul(p, p, n) {
        return a.t().dot(a);
    }
    let mut result = Mat::<f64>::zeros(p, p);
    let a_view = FaerArrayView::new(a);
    let a_ref = a_view.as_ref();
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_ref.transpose(),
        a_ref,
        1.0,
        matmul_parallelism(&[n, p]),
    );
    mat_to_array(result.as_ref())
}

/// Compute AB; A is (n, p), B is (p, q).
#[inline]
pub fn fast_ab<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    b: &ArrayBase<S2, Ix2>,
) -> Array2<f64> {
    let (n, p) = a.dim();
    let (p_b, q) = b.dim();
    debug_assert_eq!(p, p_b, "A and B must have compatible inner dimensions");
    if !should_use_faer_matmul(n, q, p) {
        return a.dot(b);
    }
    let mut result = Mat::<f64>::zeros(n, q);
    let a_view = FaerArrayView::new(a);
    let b_view = FaerArrayView::new(b);
    matmul(
        result.as_mut(),
        Accum::Replace,
        a_view.as_ref(),
        b_view.as_ref(),
        1.0,
        matmul_parallelism(&[n, p, q]),
    );
    mat_to_array(result.as_ref())
}

/// Compute Aᵀv; this is the correlation vector `Ψᵀr` of LARS.
#[inline]
pub fn fast_atv<S1: Data<Elem = f64>, S2: Data<Elem = f64>>(
    a: &ArrayBase<S1, Ix2>,
    v: &ArrayBase<S2, Ix1>,
) -> Array1<f64> {
    let (n, p) = a.dim();
    debug_assert_eq!(n, v.len(), "A rows must match v length");
    if !should_use_faer_matmul(p, 1, n) {
        return a.t().dot(v);
    }
    let mut out = Array1::<f64>::zeros(p);
    let a_view = FaerArrayView::new(a);
    let v_view = FaerColView::new(v);
    let mut out_view = array1_to_col_mat_mut(&mut out);
    matmul(
        out_view.as_mut(),
        Accum::Replace,
        a_view.as_ref().transpose(),
        v_view.as_ref(),
        1.0,
        matmul_parallelism(&[n, p]),
    );
    out
}

pub(crate) fn mat_to_array(mat: MatRef<'_, f64>) -> Array2<f64> {
    Array2::from_shape_fn((mat.nrows(), mat.ncols()), |(i, j)| mat[(i, j)])
}

/// Zero-copy (when possible) faer view over an ndarray matrix.
pub struct FaerArrayView<'a> {
    ptr: *const f64,
    rows: usize,
    cols: usize,
    row_stride: isize,
    col_stride: isize,
    owned: Option<Array2<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerArrayView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix2>) -> Self {
        let (rows, cols) = array.dim();
        let strides = array.strides();
        // Negative or zero strides are materialized into a compact copy.
        if strides[0] <= 0 || strides[1] <= 0 {
            let owned = array.to_owned();
            let owned_strides = owned.strides();
            return Self {
                ptr: owned.as_ptr(),
                rows,
                cols,
                row_stride: owned_strides[0],
                col_stride: owned_strides[1],
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            rows,
            cols,
            row_stride: strides[0],
            col_stride: strides[1],
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, rows, cols, row_stride, col_stride) = match &self.owned {
            Some(owned) => {
                let strides = owned.strides();
                (
                    owned.as_ptr(),
                    owned.nrows(),
                    owned.ncols(),
                    strides[0],
                    strides[1],
                )
            }
            None => (
                self.ptr,
                self.rows,
                self.cols,
                self.row_stride,
                self.col_stride,
            ),
        };
        // SAFETY: pointer, shape and strides describe either the borrowed ndarray
        // (positive strides) or the owned copy held by `self`.
        unsafe { MatRef::from_raw_parts(ptr, rows, cols, row_stride, col_stride) }
    }
}

pub struct FaerColView<'a> {
    ptr: *const f64,
    len: usize,
    stride: isize,
    owned: Option<Array1<f64>>,
    _marker: PhantomData<&'a f64>,
}

impl<'a> FaerColView<'a> {
    pub fn new<S: Data<Elem = f64>>(array: &'a ArrayBase<S, Ix1>) -> Self {
        let len = array.len();
        let stride = array.strides()[0];
        if stride <= 0 {
            let owned = array.to_owned();
            return Self {
                ptr: owned.as_ptr(),
                len,
                stride: 1,
                owned: Some(owned),
                _marker: PhantomData,
            };
        }
        Self {
            ptr: array.as_ptr(),
            len,
            stride,
            owned: None,
            _marker: PhantomData,
        }
    }

    #[inline]
    pub fn as_ref(&self) -> MatRef<'_, f64> {
        let (ptr, len, stride) = match &self.owned {
            Some(owned) => (owned.as_ptr(), owned.len(), 1),
            None => (self.ptr, self.len, self.stride),
        };
        // SAFETY: analogous to FaerArrayView::as_ref.
        unsafe { MatRef::from_raw_parts(ptr, len, 1, stride, 0) }
    }
}

/// Lower Cholesky factor of a symmetric positive definite matrix.
pub trait FaerCholesky {
    fn cholesky_lower(&self) -> Result<Array2<f64>, FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerCholesky for ArrayBase<S, Ix2> {
    fn cholesky_lower(&self) -> Result<Array2<f64>, FaerLinalgError> {
        let view = FaerArrayView::new(self);
        let factor = view
            .as_ref()
            .llt(Side::Lower)
            .map_err(FaerLinalgError::Cholesky)?;
        let l = factor.L();
        let n = l.nrows();
        Ok(Array2::from_shape_fn((n, n), |(i, j)| {
            if i >= j { l[(i, j)] } else { 0.0 }
        }))
    }
}

/// Relative size below which a diagonal entry of R marks a dependent column.
const QR_RANK_TOL: f64 = 1e-12;

/// Thin QR decomposition `A = QR` of a tall matrix: Q is (n, p), R is (p, p).
/// Fails when A does not have full column rank.
pub trait FaerQr {
    fn thin_qr(&self) -> Result<(Array2<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerQr for ArrayBase<S, Ix2> {
    fn thin_qr(&self) -> Result<(Array2<f64>, Array2<f64>), FaerLinalgError> {
        let (n, p) = self.dim();
        if n < p {
            return Err(FaerLinalgError::RankDeficientQr {
                column: n,
                magnitude: 0.0,
            });
        }
        let view = FaerArrayView::new(self);
        let qr = view.as_ref().qr();
        let q = qr.compute_thin_Q();
        let r = qr.thin_R();
        let r_upper = Array2::from_shape_fn((p, p), |(i, j)| {
            if i <= j { r[(i, j)] } else { 0.0 }
        });
        let scale = r_upper
            .diag()
            .iter()
            .fold(0.0_f64, |acc, v| acc.max(v.abs()));
        for (column, magnitude) in r_upper.diag().iter().map(|v| v.abs()).enumerate() {
            if !(magnitude > QR_RANK_TOL * scale) {
                return Err(FaerLinalgError::RankDeficientQr { column, magnitude });
            }
        }
        Ok((mat_to_array(q.as_ref()), r_upper))
    }
}

/// Thin SVD `A = U diag(s) Vᵀ`; returns `(U, s, V)` with singular values
/// sorted in nonincreasing order.
pub trait FaerSvd {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError>;
}

impl<S: Data<Elem = f64>> FaerSvd for ArrayBase<S, Ix2> {
    fn thin_svd(&self) -> Result<(Array2<f64>, Array1<f64>, Array2<f64>), FaerLinalgError> {
        let view = FaerArrayView::new(self);
        let svd = view
            .as_ref()
            .thin_svd()
            .map_err(|_| FaerLinalgError::SvdNoConvergence)?;
        let singular = svd.S().column_vector().as_mat();
        let s = Array1::from_shape_fn(singular.nrows(), |i| singular[(i, 0)]);
        Ok((mat_to_array(svd.U()), s, mat_to_array(svd.V())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    fn tall_matrix(n: usize, p: usize) -> Array2<f64> {
        Array2::from_shape_fn((n, p), |(i, j)| {
            let x = i as f64 / n as f64;
            x.powi(j as i32) + 0.01 * ((i * 7 + j * 3) % 5) as f64
        })
    }

    #[test]
    fn faer_products_match_ndarray_on_large_inputs() {
        let a = tall_matrix(200, 40);
        let v = Array1::from_shape_fn(200, |i| (i as f64 * 0.1).sin());
        let ata = fast_ata(&a);
        let atv = fast_atv(&a, &v);
        let ab = fast_ab(&a, &ata);
        assert_abs_diff_eq!(ata, a.t().dot(&a), epsilon = 1e-9);
        assert_abs_diff_eq!(atv, a.t().dot(&v), epsilon = 1e-9);
        assert_abs_diff_eq!(ab, a.dot(&ata), epsilon = 1e-7);
    }

    #[test]
    fn cholesky_lower_reconstructs_gram() {
        let g = array![[4.0, 2.0, 0.6], [2.0, 5.0, 1.0], [0.6, 1.0, 3.0]];
        let l = g.cholesky_lower().expect("spd matrix");
        assert_abs_diff_eq!(l.dot(&l.t()), g, epsilon = 1e-12);
        assert_eq!(l[[0, 1]], 0.0);
    }

    #[test]
    fn cholesky_rejects_indefinite_matrix() {
        let g = array![[1.0, 2.0], [2.0, 1.0]];
        assert!(matches!(
            g.cholesky_lower(),
            Err(FaerLinalgError::Cholesky(_))
        ));
    }

    #[test]
    fn thin_qr_and_svd_reconstruct_tall_matrix() {
        let a = tall_matrix(12, 4);
        let (q, r) = a.thin_qr().expect("qr");
        assert_eq!(q.dim(), (12, 4));
        assert_eq!(r.dim(), (4, 4));
        assert_abs_diff_eq!(q.dot(&r), a, epsilon = 1e-10);

        let (u, s, v) = a.thin_svd().expect("svd");
        let us = &u * &s.view().insert_axis(ndarray::Axis(0));
        assert_abs_diff_eq!(us.dot(&v.t()), a, epsilon = 1e-10);
        assert!(s.windows(2).into_iter().all(|w| w[0] >= w[1]));
    }

    #[test]
    fn thin_qr_rejects_dependent_columns() {
        let mut a = tall_matrix(10, 3);
        let first = a.column(0).to_owned();
        a.column_mut(2).assign(&(&first * 2.0));
        assert!(matches!(
            a.thin_qr(),
            Err(FaerLinalgError::RankDeficientQr { column: 2, .. })
        ));
        assert!(tall_matrix(2, 3).thin_qr().is_err());
    }
}
