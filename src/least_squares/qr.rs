use super::{LeastSquaresMethod, LeastSquaresProblem, row_norms_squared};
use crate::linalg::cholesky_update::UpperCholesky;
use crate::linalg::faer_ndarray::{FaerQr, fast_atv};
use crate::types::{LeastSquaresStrategy, SelectionError};
use ndarray::{Array1, Array2, ArrayView1};

#[derive(Debug, Clone)]
struct QrFactors {
    q: Array2<f64>,
    /// `R` with a positive diagonal, i.e. the Cholesky factor of `ΨᵀWΨ`.
    r: UpperCholesky,
}

/// Thin QR of the weighted design, recomputed after every update.
#[derive(Debug, Clone)]
pub struct QrMethod {
    problem: LeastSquaresProblem,
    factors: Option<QrFactors>,
}

impl QrMethod {
    pub fn new(problem: LeastSquaresProblem) -> Self {
        Self {
            problem,
            factors: None,
        }
    }

    fn factors(&mut self) -> Result<&QrFactors, SelectionError> {
        if self.factors.is_none() {
            let design = self.problem.weighted_design(self.problem.current_indices())?;
            log::debug!("QR: decomposing {}x{} design", design.nrows(), design.ncols());
            let (mut q, mut r) = if design.ncols() == 0 {
                (
                    Array2::zeros((design.nrows(), 0)),
                    Array2::zeros((0, 0)),
                )
            } else {
                design
                    .thin_qr()
                    .map_err(|err| SelectionError::NumericalInstability {
                        strategy: "QR",
                        detail: err.to_string(),
                    })?
            };
            // Flip signs so that diag(R) > 0; QR = (QD)(DR) for D = diag(±1).
            for k in 0..r.nrows() {
                if r[[k, k]] < 0.0 {
                    r.row_mut(k).mapv_inplace(|v| -v);
                    q.column_mut(k).mapv_inplace(|v| -v);
                }
            }
            self.factors = Some(QrFactors {
                q,
                r: UpperCholesky::from_factor(r),
            });
        }
        self.factors
            .as_ref()
            .ok_or_else(|| SelectionError::Internal("QR factors missing".to_string()))
    }
}

impl LeastSquaresMethod for QrMethod {
    fn strategy(&self) -> LeastSquaresStrategy {
        LeastSquaresStrategy::QR
    }

    fn problem(&self) -> &LeastSquaresProblem {
        &self.problem
    }

    fn solve(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError> {
        let b = self.problem.weighted_rhs(rhs)?;
        let factors = self.factors()?;
        let projected = fast_atv(&factors.q, &b);
        Ok(factors.r.solve_upper(projected.view()))
    }

    fn solve_normal(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError> {
        self.problem.check_normal_rhs(rhs)?;
        Ok(self.factors()?.r.solve(rhs))
    }

    fn gram_inverse(&mut self) -> Result<Array2<f64>, SelectionError> {
        Ok(self.factors()?.r.gram_inverse())
    }

    fn h_diag(&mut self) -> Result<Array1<f64>, SelectionError> {
        Ok(row_norms_squared(&self.factors()?.q))
    }

    fn update(
        &mut self,
        added: &[usize],
        conserved: &[usize],
        removed: &[usize],
        row: bool,
    ) -> Result<(), SelectionError> {
        if row {
            self.problem.apply_row_update(added, conserved, removed)?;
        } else {
            self.problem.apply_column_update(added, conserved, removed)?;
        }
        self.factors = None;
        Ok(())
    }

    fn trash_decomposition(&mut self) {
        self.factors = None;
    }

    fn box_clone(&self) -> Box<dyn LeastSquaresMethod> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignProxy;
    use approx::assert_abs_diff_eq;

    #[test]
    fn solves_overdetermined_system_exactly_when_consistent() {
        let x = Array2::from_shape_fn((10, 3), |(i, j)| (i as f64 * 0.3).powi(j as i32));
        let coefficients = Array1::from(vec![1.5, -0.5, 0.25]);
        let y = x.dot(&coefficients);
        let problem = LeastSquaresProblem::new(DesignProxy::from_matrix(x), None, vec![0, 1, 2])
            .expect("valid");
        let mut m = QrMethod::new(problem);
        assert_abs_diff_eq!(m.solve(y.view()).expect("solve"), coefficients, epsilon = 1e-10);
        assert_abs_diff_eq!(m.h_diag().expect("hat").sum(), 3.0, epsilon = 1e-10);
    }

    #[test]
    fn rank_deficient_design_is_reported() {
        let x = Array2::from_shape_fn((6, 2), |(i, _)| i as f64 + 1.0);
        let problem =
            LeastSquaresProblem::new(DesignProxy::from_matrix(x), None, vec![0, 1]).expect("valid");
        let mut m = QrMethod::new(problem);
        assert!(matches!(
            m.gram_inverse(),
            Err(SelectionError::NumericalInstability { strategy: "QR", .. })
        ));
    }
}
