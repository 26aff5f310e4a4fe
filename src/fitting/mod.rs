//! Cross-validation scores of a least-squares fit; lower is better.

pub mod corrected_loo;
pub mod kfold;

pub use corrected_loo::CorrectedLeaveOneOut;
pub use kfold::KFold;

use crate::least_squares::LeastSquaresMethod;
use crate::types::{CrossValidationMethod, SelectionConfig, SelectionError};
use ndarray::ArrayView1;
use std::fmt;

pub trait FittingAlgorithm: Send + Sync + fmt::Debug {
    fn name(&self) -> &'static str;

    /// Score the method's current active set against `y`, which is aligned
    /// with the method's filtered rows. The method's active set is left as
    /// it was.
    fn run(
        &self,
        method: &mut dyn LeastSquaresMethod,
        y: ArrayView1<'_, f64>,
    ) -> Result<f64, SelectionError>;

    fn box_clone(&self) -> Box<dyn FittingAlgorithm>;
}

impl Clone for Box<dyn FittingAlgorithm> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Algorithm named by `default-cross-validation-method`.
pub fn build(config: &SelectionConfig) -> Box<dyn FittingAlgorithm> {
    match config.cross_validation {
        CrossValidationMethod::CorrectedLeaveOneOut => Box::new(CorrectedLeaveOneOut),
        CrossValidationMethod::KFold => Box::new(KFold::new(config.fold_count)),
    }
}

pub fn build_by_name(
    name: &str,
    fold_count: usize,
) -> Result<Box<dyn FittingAlgorithm>, SelectionError> {
    let config = SelectionConfig {
        cross_validation: name.parse()?,
        fold_count,
        ..SelectionConfig::default()
    };
    Ok(build(&config))
}

pub(crate) fn check_response(
    method: &dyn LeastSquaresMethod,
    y: ArrayView1<'_, f64>,
) -> Result<usize, SelectionError> {
    let n = method.problem().sample_size();
    if y.len() != n {
        return Err(SelectionError::DimensionMismatch {
            what: "response",
            expected: n,
            found: y.len(),
        });
    }
    Ok(n)
}
