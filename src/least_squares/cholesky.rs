use super::{LeastSquaresMethod, LeastSquaresProblem, row_norms_squared};
use crate::linalg::cholesky_update::{CholeskyUpdateError, UpperCholesky};
use crate::linalg::faer_ndarray::{fast_ab, fast_ata, fast_atv};
use crate::types::{LeastSquaresStrategy, SelectionError};
use ndarray::{Array1, Array2, ArrayView1, s};

/// Normal equations `ΨᵀWΨ = RᵀR`, with `R` kept up to date column by column.
///
/// Cheapest strategy and the least robust one: the Gram matrix squares the
/// condition number of the design.
#[derive(Debug, Clone)]
pub struct CholeskyMethod {
    problem: LeastSquaresProblem,
    factor: Option<UpperCholesky>,
}

fn instability(err: CholeskyUpdateError) -> SelectionError {
    SelectionError::NumericalInstability {
        strategy: "Cholesky",
        detail: err.to_string(),
    }
}

impl CholeskyMethod {
    pub fn new(problem: LeastSquaresProblem) -> Self {
        Self {
            problem,
            factor: None,
        }
    }

    fn factor(&mut self) -> Result<&UpperCholesky, SelectionError> {
        if self.factor.is_none() {
            let design = self.problem.weighted_design(self.problem.current_indices())?;
            log::debug!(
                "Cholesky: factoring {}x{} Gram matrix",
                design.ncols(),
                design.ncols()
            );
            let factor = UpperCholesky::from_gram(&fast_ata(&design)).map_err(instability)?;
            self.factor = Some(factor);
        }
        self.factor
            .as_ref()
            .ok_or_else(|| SelectionError::Internal("Cholesky factor missing".to_string()))
    }

    /// Replay deletions and appends on the existing factor. The factor is
    /// only installed on success.
    fn update_factor(
        &mut self,
        mut factor: UpperCholesky,
        removed_positions: &[usize],
        conserved_len: usize,
    ) -> Result<(), SelectionError> {
        for &position in removed_positions.iter().rev() {
            factor.remove_column(position).map_err(instability)?;
        }
        let current = self.problem.current_indices();
        if current.len() > conserved_len {
            let design = self.problem.weighted_design(current)?;
            for t in conserved_len..current.len() {
                let column = design.column(t);
                let cross = fast_atv(&design.slice(s![.., ..t]), &column);
                factor
                    .append_column(cross.view(), column.dot(&column))
                    .map_err(instability)?;
            }
        }
        self.factor = Some(factor);
        Ok(())
    }
}

impl LeastSquaresMethod for CholeskyMethod {
    fn strategy(&self) -> LeastSquaresStrategy {
        LeastSquaresStrategy::Cholesky
    }

    fn problem(&self) -> &LeastSquaresProblem {
        &self.problem
    }

    fn solve(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError> {
        let b = self.problem.weighted_rhs(rhs)?;
        let design = self.problem.weighted_design(self.problem.current_indices())?;
        let projected = fast_atv(&design, &b);
        Ok(self.factor()?.solve(projected.view()))
    }

    fn solve_normal(&mut self, rhs: ArrayView1<'_, f64>) -> Result<Array1<f64>, SelectionError> {
        self.problem.check_normal_rhs(rhs)?;
        Ok(self.factor()?.solve(rhs))
    }

    fn gram_inverse(&mut self) -> Result<Array2<f64>, SelectionError> {
        Ok(self.factor()?.gram_inverse())
    }

    fn gram_inverse_diag(&mut self) -> Result<Array1<f64>, SelectionError> {
        // diag(R⁻¹R⁻ᵀ) is the squared norm of each row of R⁻¹.
        let inverse = self.factor()?.inverse_factor();
        Ok(row_norms_squared(&inverse))
    }

    fn h_diag(&mut self) -> Result<Array1<f64>, SelectionError> {
        let design = self.problem.weighted_design(self.problem.current_indices())?;
        let inverse = self.factor()?.inverse_factor();
        Ok(row_norms_squared(&fast_ab(&design, &inverse)))
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
            self.factor = None;
            return Ok(());
        }
        let previous = self.problem.current_indices().to_vec();
        let plan = self.problem.apply_column_update(added, conserved, removed)?;
        match (self.factor.take(), plan.removed_positions) {
            (Some(factor), Some(positions)) => {
                let saved = factor.clone();
                let result = self.update_factor(factor, &positions, plan.conserved_len);
                if result.is_err() {
                    // Leave the method exactly as it was before the call.
                    self.problem.revert_current_indices(previous);
                    self.factor = Some(saved);
                }
                result
            }
            (Some(_), None) => {
                log::warn!("Cholesky: conserved indices were reordered, refactoring from scratch");
                Ok(())
            }
            // Nothing to update; the next query factors from scratch.
            (None, _) => Ok(()),
        }
    }

    fn trash_decomposition(&mut self) {
        self.factor = None;
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

    fn method(indices: Vec<usize>) -> CholeskyMethod {
        let x = Array2::from_shape_fn((15, 5), |(i, j)| {
            let t = i as f64 / 14.0;
            t.powi(j as i32) + 0.1 * ((i + 2 * j) % 3) as f64
        });
        let weights = Array1::from_shape_fn(15, |i| 1.0 + (i % 4) as f64 * 0.25);
        let problem = LeastSquaresProblem::new(DesignProxy::from_matrix(x), Some(weights), indices)
            .expect("valid problem");
        CholeskyMethod::new(problem)
    }

    #[test]
    fn incremental_factor_matches_fresh_factor() {
        let y = Array1::from_shape_fn(15, |i| (i as f64 * 0.4).cos());
        let mut incremental = method(vec![0, 1, 2, 3, 4]);
        incremental.solve(y.view()).expect("solve");
        incremental.update(&[], &[0, 2, 3, 4], &[1], false).expect("remove");
        incremental.update(&[1], &[0, 2, 3, 4], &[], false).expect("add");
        incremental.update(&[], &[0, 3, 4, 1], &[2], false).expect("remove");
        assert!(incremental.factor.is_some());

        let mut fresh = method(vec![0, 1, 2, 3, 4]);
        fresh.update(&[0, 3, 4, 1], &[], &[0, 1, 2, 3, 4], false).expect("reset");
        assert_eq!(fresh.problem().current_indices(), &[0, 3, 4, 1]);

        assert_abs_diff_eq!(
            incremental.solve(y.view()).expect("solve"),
            fresh.solve(y.view()).expect("solve"),
            epsilon = 1e-10
        );
        assert_abs_diff_eq!(
            incremental.gram_inverse().expect("inverse"),
            fresh.gram_inverse().expect("inverse"),
            epsilon = 1e-8
        );
    }

    #[test]
    fn hat_diagonal_sums_to_active_size() {
        let mut m = method(vec![0, 1, 2]);
        let h = m.h_diag().expect("hat diagonal");
        assert_abs_diff_eq!(h.sum(), 3.0, epsilon = 1e-10);
        assert_abs_diff_eq!(m.h().expect("hat").diag().to_owned(), h, epsilon = 1e-10);
        assert_abs_diff_eq!(
            m.gram_inverse_diag().expect("diag"),
            m.gram_inverse().expect("inverse").diag().to_owned(),
            epsilon = 1e-10
        );
    }

    #[test]
    fn duplicated_column_is_reported_as_instability() {
        let x = Array2::from_shape_fn((8, 2), |(i, _)| i as f64);
        let problem = LeastSquaresProblem::new(DesignProxy::from_matrix(x), None, vec![0, 1])
            .expect("valid problem");
        let mut m = CholeskyMethod::new(problem);
        assert!(matches!(
            m.solve(Array1::zeros(8).view()),
            Err(SelectionError::NumericalInstability { strategy: "Cholesky", .. })
        ));
    }

    #[test]
    fn rejected_append_keeps_previous_active_set() {
        let x = Array2::from_shape_fn((8, 3), |(i, j)| {
            let t = i as f64 / 7.0;
            if j == 0 { 1.0 } else { t * t + 0.5 * t }
        });
        let y = Array1::from_shape_fn(8, |i| 1.0 + 0.3 * i as f64);
        let problem = LeastSquaresProblem::new(DesignProxy::from_matrix(x), None, vec![0, 1, 2])
            .expect("valid problem");
        let mut m = CholeskyMethod::new(problem);
        m.update(&[], &[0, 1], &[2], false).expect("drop duplicate");
        let before = m.solve(y.view()).expect("solve");

        // Column 2 duplicates column 1.
        assert!(matches!(
            m.update(&[2], &[0, 1], &[], false),
            Err(SelectionError::NumericalInstability { strategy: "Cholesky", .. })
        ));
        assert_eq!(m.current_indices(), &[0, 1]);
        assert!(m.factor.is_some());
        assert_abs_diff_eq!(m.solve(y.view()).expect("solve"), before, epsilon = 1e-12);
    }
}
