//! Least Angle Regression (Efron, Hastie, Johnstone & Tibshirani, 2004).
//!
//! Each step activates the candidate most correlated with the current
//! residual, then moves the fit along the equiangular direction of the
//! active set until some inactive candidate becomes as correlated as the
//! active ones (or the active least-squares solution is reached).

use super::{BasisSequenceFactory, SequenceStep};
use crate::least_squares::LeastSquaresMethod;
use crate::linalg::faer_ndarray::fast_atv;
use crate::linalg::utils::{l1_norm, sign};
use crate::types::{SelectionConfig, SelectionError};
use ndarray::{Array1, Array2, ArrayView1, Axis};
use serde::{Deserialize, Serialize};

/// Full iteration state; serializing it between two steps and resuming from
/// the copy reproduces the uninterrupted run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LarsState {
    /// Candidate dictionary indices (the method's initial indices).
    pub candidates: Vec<usize>,
    /// Positions into `candidates`, in activation order.
    pub predictors: Vec<usize>,
    pub in_predictors: Vec<bool>,
    /// Coefficients over every candidate; zero outside `predictors`.
    pub coefficients: Array1<f64>,
    /// Current fit of the weighted response.
    pub mu: Array1<f64>,
    /// Weighted response.
    pub y: Array1<f64>,
    /// Weighted design over every candidate.
    pub psi_x: Array2<f64>,
    pub coefficients_l1_norm: f64,
    pub old_coefficients_l1_norm: f64,
    /// `|1 - ‖β_old‖₁/‖β‖₁|`, or -1 while `‖β‖₁ = 0`.
    pub relative_convergence: f64,
    /// Largest absolute correlation at the first step.
    pub initial_correlation: f64,
    pub converged: bool,
}

impl LarsState {
    /// Check that the saved vectors agree with the stored design.
    fn validate(&self) -> Result<(), SelectionError> {
        let (rows, columns) = self.psi_x.dim();
        let invalid = |detail: String| Err(SelectionError::InvalidArgument(detail));
        for (name, len) in [
            ("candidates", self.candidates.len()),
            ("in_predictors", self.in_predictors.len()),
            ("coefficients", self.coefficients.len()),
        ] {
            if len != columns {
                return invalid(format!(
                    "LARS state has {len} {name} but the design has {columns} columns"
                ));
            }
        }
        for (name, len) in [("mu", self.mu.len()), ("y", self.y.len())] {
            if len != rows {
                return invalid(format!(
                    "LARS state {name} has length {len} but the design has {rows} rows"
                ));
            }
        }
        let mut seen = vec![false; columns];
        for &position in &self.predictors {
            if position >= columns {
                return invalid(format!(
                    "LARS predictor {position} is out of range for {columns} candidates"
                ));
            }
            if std::mem::replace(&mut seen[position], true) {
                return invalid(format!("LARS predictor {position} is listed twice"));
            }
        }
        if seen != self.in_predictors {
            return invalid("LARS active flags disagree with the predictor list".to_string());
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct Lars {
    maximum_relative_convergence: f64,
    correlation_threshold: f64,
    track_history: bool,
    state: LarsState,
}

impl Default for Lars {
    fn default() -> Self {
        Self::from_config(&SelectionConfig::default())
    }
}

impl Lars {
    pub fn new(maximum_relative_convergence: f64) -> Self {
        Self {
            maximum_relative_convergence,
            ..Self::default()
        }
    }

    pub fn from_config(config: &SelectionConfig) -> Self {
        Self {
            maximum_relative_convergence: config.maximum_relative_convergence,
            correlation_threshold: config.correlation_threshold,
            track_history: config.track_coefficient_history,
            state: LarsState::default(),
        }
    }

    pub fn with_history(mut self, track: bool) -> Self {
        self.track_history = track;
        self
    }

    pub fn with_correlation_threshold(mut self, threshold: f64) -> Self {
        self.correlation_threshold = threshold;
        self
    }

    /// Resume from a saved state.
    pub fn from_state(state: LarsState, config: &SelectionConfig) -> Result<Self, SelectionError> {
        state.validate()?;
        Ok(Self {
            state,
            ..Self::from_config(config)
        })
    }

    pub fn state(&self) -> &LarsState {
        &self.state
    }

    pub fn relative_convergence(&self) -> f64 {
        self.state.relative_convergence
    }

    /// Correlations `Ψᵀ(y - μ)` of every candidate with the current residual.
    pub fn correlations(&self) -> Array1<f64> {
        let residual = &self.state.y - &self.state.mu;
        fast_atv(&self.state.psi_x, &residual)
    }

    /// Largest absolute correlation over all candidates.
    pub fn max_abs_correlation(&self) -> f64 {
        self.correlations()
            .iter()
            .fold(0.0_f64, |acc, c| acc.max(c.abs()))
    }

    /// `min(P, N - 1)`: no more predictors than degrees of freedom.
    fn maximum_size(&self) -> usize {
        let n = self.state.psi_x.nrows();
        self.state.candidates.len().min(n.saturating_sub(1))
    }

    /// Inactive candidate with the largest |c|; ties go to the smallest
    /// position.
    fn select_predictor(&self, c: &Array1<f64>) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (j, value) in c.iter().enumerate() {
            if self.state.in_predictors[j] {
                continue;
            }
            let magnitude = value.abs();
            if best.is_none_or(|(_, current)| magnitude > current) {
                best = Some((j, magnitude));
            }
        }
        best
    }
}

impl BasisSequenceFactory for Lars {
    fn name(&self) -> &'static str {
        "LARS"
    }

    fn initialize(
        &mut self,
        method: &mut dyn LeastSquaresMethod,
        y: ArrayView1<'_, f64>,
    ) -> Result<(), SelectionError> {
        let n = method.problem().sample_size();
        if n == 0 {
            return Err(SelectionError::InvalidArgument(
                "LARS needs a non-empty sample".to_string(),
            ));
        }
        let y = method.problem().weighted_rhs(y)?;
        let active = method.current_indices().to_vec();
        method.update(&[], &[], &active, false)?;

        let psi_x = method.compute_weighted_design(true)?;
        let candidates = method.initial_indices().to_vec();
        let p = candidates.len();
        self.state = LarsState {
            candidates,
            predictors: Vec::new(),
            in_predictors: vec![false; p],
            coefficients: Array1::zeros(p),
            mu: Array1::zeros(n),
            y,
            psi_x,
            coefficients_l1_norm: 0.0,
            old_coefficients_l1_norm: 0.0,
            relative_convergence: -1.0,
            initial_correlation: 0.0,
            converged: false,
        };
        log::debug!("LARS: {p} candidates, {n} samples");
        Ok(())
    }

    fn update_basis(
        &mut self,
        method: &mut dyn LeastSquaresMethod,
    ) -> Result<Option<SequenceStep>, SelectionError> {
        if self.state.predictors.len() >= self.maximum_size() {
            self.state.converged = true;
            return Ok(None);
        }

        let c = self.correlations();
        let Some((selected, c_max)) = self.select_predictor(&c) else {
            self.state.converged = true;
            return Ok(None);
        };
        if self.state.predictors.is_empty() {
            self.state.initial_correlation = c_max;
        }
        if !(c_max > self.correlation_threshold * self.state.initial_correlation) {
            log::debug!(
                "LARS: largest correlation {c_max:.3e} is negligible, stopping at {} predictors",
                self.state.predictors.len()
            );
            self.state.converged = true;
            return Ok(None);
        }

        let conserved = method.current_indices().to_vec();
        method.update(&[self.state.candidates[selected]], &conserved, &[], false)?;
        self.state.predictors.push(selected);
        self.state.in_predictors[selected] = true;

        // Equiangular direction: G g = s, w = g / sqrt(sᵀg).
        let signs: Array1<f64> = self.state.predictors.iter().map(|&j| sign(c[j])).collect();
        let g = method.solve_normal(signs.view())?;
        let s_dot_g = signs.dot(&g);
        if !(s_dot_g > 0.0) || !s_dot_g.is_finite() {
            return Err(SelectionError::NumericalInstability {
                strategy: method.name(),
                detail: format!("equiangular normalization sᵀG⁻¹s = {s_dot_g:.3e}"),
            });
        }
        let c_norm = 1.0 / s_dot_g.sqrt();
        let direction = &g * c_norm;
        let psi_active = self.state.psi_x.select(Axis(1), &self.state.predictors);
        let u = psi_active.dot(&direction);
        let d = fast_atv(&self.state.psi_x, &u);

        // Largest step keeping every inactive correlation below the active ones.
        let mut step = c_max / c_norm;
        for (j, (&c_j, &d_j)) in c.iter().zip(d.iter()).enumerate() {
            if self.state.in_predictors[j] {
                continue;
            }
            for candidate in [(c_max - c_j) / (c_norm - d_j), (c_max + c_j) / (c_norm + d_j)] {
                if candidate > 0.0 && candidate < step {
                    step = candidate;
                }
            }
        }

        self.state.mu.scaled_add(step, &u);
        for (k, &j) in self.state.predictors.iter().enumerate() {
            self.state.coefficients[j] += step * direction[k];
        }
        self.state.old_coefficients_l1_norm = self.state.coefficients_l1_norm;
        self.state.coefficients_l1_norm = l1_norm(self.state.coefficients.iter().copied());
        self.state.relative_convergence = if self.state.coefficients_l1_norm > 0.0 {
            (1.0 - self.state.old_coefficients_l1_norm / self.state.coefficients_l1_norm).abs()
        } else {
            -1.0
        };
        if self.state.relative_convergence >= 0.0
            && self.state.relative_convergence <= self.maximum_relative_convergence
        {
            self.state.converged = true;
        }
        log::debug!(
            "LARS step {}: added candidate {} (|c| = {c_max:.4e}), step {step:.4e}, \
             relative convergence {:.4e}",
            self.state.predictors.len(),
            self.state.candidates[selected],
            self.state.relative_convergence
        );

        let coefficients = self.track_history.then(|| {
            self.state
                .predictors
                .iter()
                .map(|&j| self.state.coefficients[j])
                .collect()
        });
        Ok(Some(SequenceStep {
            indices: method.current_indices().to_vec(),
            coefficients,
        }))
    }

    fn is_converged(&self) -> bool {
        self.state.converged
    }

    fn box_clone(&self) -> Box<dyn BasisSequenceFactory> {
        Box::new(self.clone())
    }
}
