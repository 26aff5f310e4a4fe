use super::{LeastSquaresMethod, LeastSquaresProblem, MethodState, row_norms_squared};
use crate::linalg::faer_ndarray::{FaerSvd, fast_ab, fast_atv};
use crate::types::{LeastSquaresStrategy, SelectionError};
use ndarray::{Array1, Array2, ArrayView1, Axis, s};

#[derive(Debug, Clone)]
struct SvdFactors {
    /// Left singular vectors of the retained values.
    u: Array2<f64>,
    s: Array1<f64>,
    v: Array2<f64>,
}

impl SvdFactors {
    /// `V diag(d) Vᵀ b` restricted to the retained singular values.
    fn apply_v(&self, scale: &Array1<f64>, b: ArrayView1<'_, f64>) -> Array1<f64> {
        let projected = fast_atv(&self.v, &b) * scale;
        self.v.dot(&projected)
    }
}

/// Thin SVD of the weighted design with a relative singular-value cutoff.
///
/// Rank-deficient designs are handled through the pseudo-inverse: this
/// strategy never fails on a singular Gram matrix.
#[derive(Debug, Clone)]
pub struct SvdMethod {
    problem: LeastSquaresProblem,
    threshold: f64,
    factors: Option<SvdFactors>,
}

impl SvdMethod {
    /// Singular values below `threshold * s_max` are discarded.
    pub fn new(problem: LeastSquaresProblem, threshold: f64) -> Self {
        Self {
            problem,
            threshold,
            factors: None,
        }
    }

    pub fn threshold(&self) -> f64 {
        self.threshold
    }

    /// Number of singular values kept by the cutoff.
    pub fn rank(&mut self) -> Result<usize, SelectionError> {
        Ok(self.factors()?.s.len())
    }

    fn factors(&mut self) -> Result<&SvdFactors, SelectionError> {
        if self.factors.is_none() {
            let design = self.problem.weighted_design(self.problem.current_indices())?;
            let (n, k) = design.dim();
            let factors = if n == 0 || k == 0 {
                SvdFactors {
                    u: Array2::zeros((n, 0)),
                    s: Array1::zeros(0),
                    v: Array2::zeros((k, 0)),
                }
            } else {
                let (u, s, v) = design.thin_svd()?;
                let s_max = s.iter().fold(0.0_f64, |acc, &v| acc.max(v));
                let kept = s
                    .iter()
                    .take_while(|&&value| value > 0.0 && value > self.threshold * s_max)
                    .count();
                if kept < k {
                    log::debug!("SVD: keeping {kept} of {k} singular values");
                }
                SvdFactors {
                    u: u.slice(s![.., ..kept]).to_owned(),
                    s: s.slice(s![..kept]).to_owned(),
                    v: v.slice(s![.., ..kept]).to_owned(),
                }
            };
            self.factors = Some(factors);
        }
        self.factors
            .as_ref()
            .ok_or_else(|| SelectionError::Internal("SVD factors missing".to_string()))
    }
}

impl LeastSquaresMethod for SvdMethod {
    fn strategy(&self) -> LeastSquaresStrategy {
        LeastSquaresStrategy::SVD
    }

    fn problem(&self) -> &LeastSquaresProblem {
        &self.problem
    }

    fn solve(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError> {
        let b = self.problem.weighted_rhs(rhs)?;
        let factors = self.factors()?;
        let projected = fast_atv(&factors.u, &b) / &factors.s;
        Ok(factors.v.dot(&projected))
    }

    fn solve_normal(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError> {
        self.problem.check_normal_rhs(rhs)?;
        let factors = self.factors()?;
        let scale = factors.s.mapv(|v| 1.0 / (v * v));
        Ok(factors.apply_v(&scale, rhs))
    }

    fn gram_inverse(&mut self) -> Result<Array2<f64>, SelectionError> {
        let factors = self.factors()?;
        let scaled = &factors.v / &factors.s.view().insert_axis(Axis(0));
        Ok(fast_ab(&scaled, &scaled.t()))
    }

    fn h_diag(&mut self) -> Result<Array1<f64>, SelectionError> {
        Ok(row_norms_squared(&self.factors()?.u))
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

    fn state(&self) -> MethodState {
        let problem = self.problem();
        MethodState {
            strategy: LeastSquaresStrategy::SVD,
            svd_threshold: Some(self.threshold),
            weights: problem.weights().clone(),
            initial_indices: problem.initial_indices().to_vec(),
            current_indices: problem.current_indices().to_vec(),
            row_filter: problem.proxy().row_filter().map(<[usize]>::to_vec),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::design::DesignProxy;
    use approx::assert_abs_diff_eq;

    #[test]
    fn rank_deficient_design_uses_pseudo_inverse() {
        // Third column duplicates the second.
        let x = Array2::from_shape_fn((8, 3), |(i, j)| match j {
            0 => 1.0,
            _ => i as f64,
        });
        let y = Array1::from_shape_fn(8, |i| 2.0 + 4.0 * i as f64);
        let problem =
            LeastSquaresProblem::new(DesignProxy::from_matrix(x.clone()), None, vec![0, 1, 2])
                .expect("valid");
        let mut m = SvdMethod::new(problem, 1e-12);
        assert_eq!(m.rank().expect("rank"), 2);
        let beta = m.solve(y.view()).expect("pseudo-inverse solve");
        // Minimum-norm solution splits the slope evenly.
        assert_abs_diff_eq!(beta, Array1::from(vec![2.0, 2.0, 2.0]), epsilon = 1e-9);
        assert_abs_diff_eq!(x.dot(&beta), y, epsilon = 1e-9);
        assert_abs_diff_eq!(m.h_diag().expect("hat").sum(), 2.0, epsilon = 1e-9);
    }

    #[test]
    fn normal_solve_inverts_gram() {
        let x = Array2::from_shape_fn((9, 3), |(i, j)| ((i + 1) as f64 / 9.0).powi(j as i32));
        let gram = x.t().dot(&x);
        let problem = LeastSquaresProblem::new(DesignProxy::from_matrix(x), None, vec![0, 1, 2])
            .expect("valid");
        let mut m = SvdMethod::new(problem, 1e-12);
        let rhs = Array1::from(vec![1.0, -1.0, 0.5]);
        let solution = m.solve_normal(rhs.view()).expect("solve");
        assert_abs_diff_eq!(gram.dot(&solution), rhs, epsilon = 1e-8);
        assert_abs_diff_eq!(
            gram.dot(&m.gram_inverse().expect("inverse")),
            Array2::<f64>::eye(3),
            epsilon = 1e-8
        );
    }
}
