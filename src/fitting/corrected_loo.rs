use super::{FittingAlgorithm, check_response};
use crate::least_squares::LeastSquaresMethod;
use crate::linalg::utils::KahanSum;
use crate::types::SelectionError;
use ndarray::ArrayView1;

/// Analytic leave-one-out error with the small-sample correction of Chapelle
/// et al., as used for sparse polynomial chaos (Blatman & Sudret, 2011):
///
/// `Err = (1/N) Σ ((y_i - ŷ_i) / (1 - h_i))² · N/(N - p) · (1 + tr((ΨᵀΨ)⁻¹))`
///
/// where `h` is the hat-matrix diagonal. No refit is performed.
#[derive(Debug, Clone, Copy, Default)]
pub struct CorrectedLeaveOneOut;

impl FittingAlgorithm for CorrectedLeaveOneOut {
    fn name(&self) -> &'static str {
        "CorrectedLeaveOneOut"
    }

    fn run(
        &self,
        method: &mut dyn LeastSquaresMethod,
        y: ArrayView1<'_, f64>,
    ) -> Result<f64, SelectionError> {
        let n = check_response(method, y)?;
        let p = method.current_indices().len();
        if p >= n {
            return Err(SelectionError::InvalidArgument(format!(
                "corrected leave-one-out needs more samples ({n}) than basis functions ({p})"
            )));
        }
        let coefficients = method.solve(y)?;
        let fitted = method.problem().design()?.dot(&coefficients);
        let h = method.h_diag()?;
        let trace = method.gram_inverse_trace()?;

        let mut total = KahanSum::default();
        for (i, ((&observed, &predicted), &leverage)) in
            y.iter().zip(fitted.iter()).zip(h.iter()).enumerate()
        {
            if !(leverage < 1.0) {
                log::warn!(
                    "corrected leave-one-out: hat diagonal {leverage:.6} at row {i}, \
                     error is unbounded"
                );
                return Ok(f64::INFINITY);
            }
            let residual = (observed - predicted) / (1.0 - leverage);
            total.add(residual * residual);
        }
        let empirical = total.sum() / n as f64;
        let correction = n as f64 / (n - p) as f64 * (1.0 + trace);
        Ok(empirical * correction)
    }

    fn box_clone(&self) -> Box<dyn FittingAlgorithm> {
        Box::new(*self)
    }
}
