//! Approximation algorithms: plain least squares and LARS-driven sparse
//! selection scored by cross-validation.

use crate::basis::SharedBasis;
use crate::design::DesignProxy;
use crate::fitting::{self, FittingAlgorithm};
use crate::least_squares::{self, LeastSquaresMethod};
use crate::linalg::utils::{sample_variance, sum_of_squares};
use crate::sequence::{BasisSequence, BasisSequenceFactory, Lars};
use crate::types::{SelectionConfig, SelectionError};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Outcome of an approximation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApproximationResult {
    /// Dictionary indices of the retained basis functions.
    pub selected_indices: Vec<usize>,
    /// Coefficients aligned with `selected_indices`.
    pub coefficients: Array1<f64>,
    pub labels: Vec<String>,
    /// `sqrt(Σ r_i²) / N` on the training sample.
    pub residual: f64,
    /// Fitting score divided by the sample variance of the response.
    pub relative_error: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sequence: Option<BasisSequence>,
    /// Fitting score of every explored step.
    #[serde(default)]
    pub scores: Vec<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selected_step: Option<usize>,
}

impl ApproximationResult {
    /// Evaluate the metamodel on new points with the dictionary it was fitted
    /// on.
    pub fn predict(
        &self,
        basis: &[SharedBasis],
        points: ArrayView2<'_, f64>,
    ) -> Result<Array1<f64>, SelectionError> {
        let mut out = Array1::<f64>::zeros(points.nrows());
        for (&index, &coefficient) in self.selected_indices.iter().zip(self.coefficients.iter()) {
            let function = basis.get(index).ok_or(SelectionError::IndexOutOfRange {
                index,
                bound: basis.len(),
            })?;
            out.scaled_add(coefficient, &function.evaluate_batch(points));
        }
        Ok(out)
    }
}

pub trait ApproximationAlgorithm {
    fn run(&mut self) -> Result<ApproximationResult, SelectionError>;
}

/// Inputs shared by the approximation algorithms.
#[derive(Debug, Clone)]
struct ApproximationInput {
    proxy: DesignProxy,
    y: Array1<f64>,
    weights: Option<Array1<f64>>,
    indices: Vec<usize>,
    config: SelectionConfig,
}

impl ApproximationInput {
    fn new(
        input_sample: Array2<f64>,
        y: Array1<f64>,
        basis: Vec<SharedBasis>,
        config: SelectionConfig,
    ) -> Result<Self, SelectionError> {
        config.validate()?;
        if input_sample.nrows() != y.len() {
            return Err(SelectionError::DimensionMismatch {
                what: "output sample",
                expected: input_sample.nrows(),
                found: y.len(),
            });
        }
        if y.is_empty() {
            return Err(SelectionError::InvalidArgument(
                "the sample is empty".to_string(),
            ));
        }
        let dimension = input_sample.ncols();
        if let Some(found) = basis
            .iter()
            .filter_map(|function| function.input_dimension())
            .find(|&found| found != dimension)
        {
            return Err(SelectionError::DimensionMismatch {
                what: "basis function input dimension",
                expected: dimension,
                found,
            });
        }
        let indices = (0..basis.len()).collect();
        Ok(Self {
            proxy: DesignProxy::new(input_sample, basis),
            y,
            weights: None,
            indices,
            config,
        })
    }

    fn build_method(&self) -> Result<Box<dyn LeastSquaresMethod>, SelectionError> {
        least_squares::build_with_config(
            &self.config,
            self.config.strategy,
            self.proxy.clone(),
            self.weights.clone(),
            self.indices.clone(),
        )
    }

    fn labels(&self, indices: &[usize]) -> Vec<String> {
        let basis = self.proxy.basis();
        indices.iter().map(|&i| basis[i].label()).collect()
    }
}

/// Least-squares fit on every candidate basis function, without selection.
#[derive(Debug, Clone)]
pub struct LeastSquaresFit {
    input: ApproximationInput,
}

impl LeastSquaresFit {
    pub fn new(
        input_sample: Array2<f64>,
        y: Array1<f64>,
        basis: Vec<SharedBasis>,
        config: SelectionConfig,
    ) -> Result<Self, SelectionError> {
        Ok(Self {
            input: ApproximationInput::new(input_sample, y, basis, config)?,
        })
    }

    pub fn with_weights(mut self, weights: Array1<f64>) -> Self {
        self.input.weights = Some(weights);
        self
    }

    pub fn with_indices(mut self, indices: Vec<usize>) -> Self {
        self.input.indices = indices;
        self
    }
}

impl ApproximationAlgorithm for LeastSquaresFit {
    fn run(&mut self) -> Result<ApproximationResult, SelectionError> {
        let input = &self.input;
        let mut method = input.build_method()?;
        let coefficients = method.solve(input.y.view())?;
        let residual_sq = residual_sum_of_squares(method.as_ref(), input.y.view(), &coefficients)?;
        let n = input.y.len() as f64;
        let variance = sample_variance(input.y.view());
        let mean_squared = residual_sq / n;
        let relative_error = if variance > 0.0 {
            mean_squared / variance
        } else {
            mean_squared
        };
        let selected_indices = method.current_indices().to_vec();
        log::info!(
            "least-squares fit on {} basis functions, relative error {relative_error:.4e}",
            selected_indices.len()
        );
        Ok(ApproximationResult {
            labels: input.labels(&selected_indices),
            selected_indices,
            coefficients,
            residual: residual_sq.sqrt() / n,
            relative_error,
            sequence: None,
            scores: Vec::new(),
            selected_step: None,
        })
    }
}

/// LARS basis sequence scored step by step with a fitting algorithm; the
/// step with the lowest score is kept.
#[derive(Debug, Clone)]
pub struct LeastSquaresMetaModelSelection {
    input: ApproximationInput,
    factory: Box<dyn BasisSequenceFactory>,
    fitting: Box<dyn FittingAlgorithm>,
}

impl LeastSquaresMetaModelSelection {
    pub fn new(
        input_sample: Array2<f64>,
        y: Array1<f64>,
        basis: Vec<SharedBasis>,
        config: SelectionConfig,
    ) -> Result<Self, SelectionError> {
        let factory = Box::new(Lars::from_config(&config));
        let fitting = fitting::build(&config);
        Ok(Self {
            input: ApproximationInput::new(input_sample, y, basis, config)?,
            factory,
            fitting,
        })
    }

    pub fn with_weights(mut self, weights: Array1<f64>) -> Self {
        self.input.weights = Some(weights);
        self
    }

    /// Restrict the candidates to a subset of the dictionary.
    pub fn with_indices(mut self, indices: Vec<usize>) -> Self {
        self.input.indices = indices;
        self
    }

    pub fn with_factory(mut self, factory: Box<dyn BasisSequenceFactory>) -> Self {
        self.factory = factory;
        self
    }

    pub fn with_fitting(mut self, fitting: Box<dyn FittingAlgorithm>) -> Self {
        self.fitting = fitting;
        self
    }

    pub fn proxy(&self) -> &DesignProxy {
        &self.input.proxy
    }
}

impl ApproximationAlgorithm for LeastSquaresMetaModelSelection {
    fn run(&mut self) -> Result<ApproximationResult, SelectionError> {
        let mut method = self.input.build_method()?;
        let y = self.input.y.view();
        let selected = select_basis(
            method.as_mut(),
            y,
            self.factory.as_mut(),
            self.fitting.as_ref(),
            &self.input.config,
        )?;
        let residual_sq = residual_sum_of_squares(method.as_ref(), y, &selected.coefficients)?;
        let n = y.len() as f64;
        log::info!(
            "selected {} of {} basis functions (step {:?}), relative error {:.4e}",
            selected.indices.len(),
            self.input.indices.len(),
            selected.step,
            selected.relative_error
        );
        Ok(ApproximationResult {
            labels: self.input.labels(&selected.indices),
            selected_indices: selected.indices,
            coefficients: selected.coefficients,
            residual: residual_sq.sqrt() / n,
            relative_error: selected.relative_error,
            sequence: Some(selected.sequence),
            scores: selected.scores,
            selected_step: selected.step,
        })
    }
}

/// Best step of a basis sequence, with the method left on its active set.
#[derive(Debug, Clone)]
pub(crate) struct SelectedBasis {
    pub indices: Vec<usize>,
    pub coefficients: Array1<f64>,
    pub relative_error: f64,
    pub sequence: BasisSequence,
    pub scores: Vec<f64>,
    pub step: Option<usize>,
}

/// Build the sequence, score its steps in order and solve on the best one.
///
/// Scanning stops early once a score exceeds `maximum-error-factor` times the
/// best one, or the relative error drops below `error-threshold`. An empty
/// sequence selects the empty set.
pub(crate) fn select_basis(
    method: &mut dyn LeastSquaresMethod,
    y: ArrayView1<'_, f64>,
    factory: &mut dyn BasisSequenceFactory,
    fitting: &dyn FittingAlgorithm,
    config: &SelectionConfig,
) -> Result<SelectedBasis, SelectionError> {
    let sequence = factory.build(method, y)?;
    let variance = sample_variance(y);
    let relative = |score: f64| if variance > 0.0 { score / variance } else { score };

    let mut scores = Vec::with_capacity(sequence.len());
    let mut best: Option<(usize, f64)> = None;
    for (step, subset) in sequence.iter().enumerate() {
        set_active(method, subset)?;
        let score = fitting.run(method, y)?;
        log::debug!(
            "{} score {score:.6e} for {} basis functions",
            fitting.name(),
            subset.len()
        );
        scores.push(score);
        if best.is_none_or(|(_, minimum)| score < minimum) {
            best = Some((step, score));
        }
        let minimum = best.map_or(score, |(_, minimum)| minimum);
        if score > config.maximum_error_factor * minimum {
            log::debug!(
                "score exceeds {} times the best one, stopping",
                config.maximum_error_factor
            );
            break;
        }
        if relative(score) < config.error_threshold {
            break;
        }
    }

    let (indices, relative_error, step) = match best {
        Some((step, score)) => {
            let subset = sequence.subset(step).unwrap_or_default().to_vec();
            (subset, relative(score), Some(step))
        }
        // Nothing selected: the model is identically zero.
        None => {
            let mean_squared = sum_of_squares(y.iter().copied()) / y.len().max(1) as f64;
            (Vec::new(), relative(mean_squared), None)
        }
    };
    set_active(method, &indices)?;
    let coefficients = method.solve(y)?;
    let indices = method.current_indices().to_vec();
    Ok(SelectedBasis {
        indices,
        coefficients,
        relative_error,
        sequence,
        scores,
        step,
    })
}

/// Move the method's active set to `target` (as a set), keeping surviving
/// indices in place so incremental strategies only downdate.
pub(crate) fn set_active(
    method: &mut dyn LeastSquaresMethod,
    target: &[usize],
) -> Result<(), SelectionError> {
    let wanted: HashSet<usize> = target.iter().copied().collect();
    let current = method.current_indices().to_vec();
    let active: HashSet<usize> = current.iter().copied().collect();
    let (conserved, removed): (Vec<usize>, Vec<usize>) =
        current.iter().copied().partition(|index| wanted.contains(index));
    let added: Vec<usize> = target
        .iter()
        .copied()
        .filter(|index| !active.contains(index))
        .collect();
    if added.is_empty() && removed.is_empty() {
        return Ok(());
    }
    method.update(&added, &conserved, &removed, false)
}

fn residual_sum_of_squares(
    method: &dyn LeastSquaresMethod,
    y: ArrayView1<'_, f64>,
    coefficients: &Array1<f64>,
) -> Result<f64, SelectionError> {
    let fitted = method.problem().design()?.dot(coefficients);
    Ok(sum_of_squares(
        y.iter().zip(fitted.iter()).map(|(&o, &f)| o - f),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::{PolynomialFamily, total_degree_basis};
    use crate::types::{CrossValidationMethod, LeastSquaresStrategy};
    use approx::assert_abs_diff_eq;

    fn line_data() -> (Array2<f64>, Array1<f64>) {
        let n = 20;
        let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64 / (n - 1) as f64);
        let y = x.column(0).mapv(|t| 3.0 + 2.0 * t);
        (x, y)
    }

    #[test]
    fn selection_keeps_constant_and_linear_terms() {
        let (x, y) = line_data();
        let basis = total_degree_basis(1, 3, PolynomialFamily::Monomial);
        let mut algo = LeastSquaresMetaModelSelection::new(x, y, basis, SelectionConfig::default())
            .expect("valid input");
        let result = algo.run().expect("selection");
        assert_eq!(result.selected_indices, vec![0, 1]);
        assert_abs_diff_eq!(result.coefficients, Array1::from(vec![3.0, 2.0]), epsilon = 1e-8);
        assert_abs_diff_eq!(result.relative_error, 0.0, epsilon = 1e-12);
        assert_eq!(result.labels, vec!["1".to_string(), "x0".to_string()]);
        assert_eq!(result.sequence.as_ref().map(BasisSequence::len), Some(2));
        assert_eq!(result.selected_step, Some(1));
    }

    #[test]
    fn every_strategy_and_fitting_agree_on_the_line() {
        let (x, y) = line_data();
        for strategy in [
            LeastSquaresStrategy::Cholesky,
            LeastSquaresStrategy::QR,
            LeastSquaresStrategy::SVD,
        ] {
            for cross_validation in [
                CrossValidationMethod::CorrectedLeaveOneOut,
                CrossValidationMethod::KFold,
            ] {
                let config = SelectionConfig {
                    strategy,
                    cross_validation,
                    fold_count: 4,
                    ..SelectionConfig::default()
                };
                let basis = total_degree_basis(1, 3, PolynomialFamily::Legendre);
                let result =
                    LeastSquaresMetaModelSelection::new(x.clone(), y.clone(), basis.clone(), config)
                        .expect("valid input")
                        .run()
                        .expect("selection");
                let predicted = result.predict(&basis, x.view()).expect("predict");
                assert_abs_diff_eq!(predicted, y, epsilon = 1e-8);
            }
        }
    }

    #[test]
    fn plain_fit_uses_every_candidate() {
        let (x, y) = line_data();
        let basis = total_degree_basis(1, 2, PolynomialFamily::Monomial);
        let result = LeastSquaresFit::new(x, y, basis, SelectionConfig::default())
            .expect("valid input")
            .run()
            .expect("fit");
        assert_eq!(result.selected_indices, vec![0, 1, 2]);
        assert_abs_diff_eq!(
            result.coefficients,
            Array1::from(vec![3.0, 2.0, 0.0]),
            epsilon = 1e-9
        );
        assert_abs_diff_eq!(result.residual, 0.0, epsilon = 1e-12);
        assert!(result.sequence.is_none());
    }

    #[test]
    fn mismatched_sample_sizes_are_rejected() {
        let (x, _) = line_data();
        let basis = total_degree_basis(1, 1, PolynomialFamily::Monomial);
        assert!(matches!(
            LeastSquaresMetaModelSelection::new(
                x,
                Array1::zeros(3),
                basis,
                SelectionConfig::default()
            ),
            Err(SelectionError::DimensionMismatch { .. })
        ));
    }

    #[test]
    fn dictionary_of_wrong_input_dimension_is_rejected() {
        let (x, y) = line_data();
        // Bivariate terms on a univariate sample.
        let basis = total_degree_basis(2, 2, PolynomialFamily::Monomial);
        assert!(matches!(
            LeastSquaresMetaModelSelection::new(
                x.clone(),
                y.clone(),
                basis.clone(),
                SelectionConfig::default()
            ),
            Err(SelectionError::DimensionMismatch {
                what: "basis function input dimension",
                expected: 1,
                found: 2,
            })
        ));
        assert!(matches!(
            LeastSquaresFit::new(x, y, basis, SelectionConfig::default()),
            Err(SelectionError::DimensionMismatch { expected: 1, found: 2, .. })
        ));
    }
}
