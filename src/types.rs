use crate::design::DesignError;
use crate::linalg::faer_ndarray::FaerLinalgError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Error type shared by the least-squares strategies, the sequence factories
/// and the fitting algorithms.
#[derive(Error)]
pub enum SelectionError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Dimension mismatch for {what}: expected {expected}, got {found}.")]
    DimensionMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    #[error("Index {index} is out of range (bound {bound}).")]
    IndexOutOfRange { index: usize, bound: usize },

    #[error("Weight {index} must be finite and non-negative, got {value}.")]
    InvalidWeight { index: usize, value: f64 },

    #[error(
        "Unknown least-squares strategy '{0}'; expected one of Cholesky, QR, SVD, Sparse."
    )]
    UnknownStrategy(String),

    #[error("Unknown fitting algorithm '{0}'; expected CorrectedLeaveOneOut or KFold.")]
    UnknownFittingAlgorithm(String),

    #[error("Numerical instability in the {strategy} least-squares strategy: {detail}")]
    NumericalInstability {
        strategy: &'static str,
        detail: String,
    },

    #[error(transparent)]
    Design(#[from] DesignError),

    #[error("Linear algebra failure: {0}")]
    Linalg(#[from] FaerLinalgError),

    #[error("Internal error: {0}")]
    Internal(String),
}

// Debug prints the message with its line breaks.
impl fmt::Debug for SelectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self}")
    }
}

#[allow(clippy::upper_case_acronyms)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LeastSquaresStrategy {
    #[default]
    Cholesky,
    QR,
    SVD,
    Sparse,
}

impl LeastSquaresStrategy {
    pub fn name(self) -> &'static str {
        match self {
            LeastSquaresStrategy::Cholesky => "Cholesky",
            LeastSquaresStrategy::QR => "QR",
            LeastSquaresStrategy::SVD => "SVD",
            LeastSquaresStrategy::Sparse => "Sparse",
        }
    }
}

impl FromStr for LeastSquaresStrategy {
    type Err = SelectionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "cholesky" | "choleskymethod" => Ok(LeastSquaresStrategy::Cholesky),
            "qr" | "qrmethod" => Ok(LeastSquaresStrategy::QR),
            "svd" | "svdmethod" => Ok(LeastSquaresStrategy::SVD),
            "sparse" | "sparsemethod" => Ok(LeastSquaresStrategy::Sparse),
            _ => Err(SelectionError::UnknownStrategy(name.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum CrossValidationMethod {
    #[default]
    CorrectedLeaveOneOut,
    KFold,
}

impl FromStr for CrossValidationMethod {
    type Err = SelectionError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        match name.to_ascii_lowercase().as_str() {
            "correctedleaveoneout" | "loo" => Ok(CrossValidationMethod::CorrectedLeaveOneOut),
            "kfold" => Ok(CrossValidationMethod::KFold),
            _ => Err(SelectionError::UnknownFittingAlgorithm(name.to_string())),
        }
    }
}

pub fn default_fold_count() -> usize {
    10
}

pub fn default_svd_threshold() -> f64 {
    1e-12
}

pub fn default_maximum_error_factor() -> f64 {
    2.0
}

pub fn default_correlation_threshold() -> f64 {
    1e-10
}

/// Options recognized by the selection engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct SelectionConfig {
    #[serde(rename = "basis-selection-K", default = "default_fold_count")]
    pub fold_count: usize,
    #[serde(rename = "default-cross-validation-method", default)]
    pub cross_validation: CrossValidationMethod,
    /// LARS stops once `|1 - ‖β_old‖₁/‖β‖₁|` falls to or below this value.
    #[serde(default)]
    pub maximum_relative_convergence: f64,
    #[serde(rename = "least-squares-strategy", default)]
    pub strategy: LeastSquaresStrategy,
    /// Relative singular-value cutoff of the SVD strategy.
    #[serde(rename = "svd-singular-value-threshold", default = "default_svd_threshold")]
    pub svd_threshold: f64,
    #[serde(default = "default_maximum_error_factor")]
    pub maximum_error_factor: f64,
    #[serde(default)]
    pub error_threshold: f64,
    /// LARS stops when the largest inactive correlation drops below this
    /// fraction of the first step's.
    #[serde(default = "default_correlation_threshold")]
    pub correlation_threshold: f64,
    #[serde(default)]
    pub track_coefficient_history: bool,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            fold_count: default_fold_count(),
            cross_validation: CrossValidationMethod::default(),
            maximum_relative_convergence: 0.0,
            strategy: LeastSquaresStrategy::default(),
            svd_threshold: default_svd_threshold(),
            maximum_error_factor: default_maximum_error_factor(),
            error_threshold: 0.0,
            correlation_threshold: default_correlation_threshold(),
            track_coefficient_history: false,
        }
    }
}

impl SelectionConfig {
    pub fn validate(&self) -> Result<(), SelectionError> {
        if self.fold_count < 2 {
            return Err(SelectionError::InvalidArgument(format!(
                "basis-selection-K must be at least 2, got {}",
                self.fold_count
            )));
        }
        let finite_non_negative = [
            ("maximum-relative-convergence", self.maximum_relative_convergence),
            ("svd-singular-value-threshold", self.svd_threshold),
            ("error-threshold", self.error_threshold),
            ("correlation-threshold", self.correlation_threshold),
        ];
        for (key, value) in finite_non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(SelectionError::InvalidArgument(format!(
                    "{key} must be finite and non-negative, got {value}"
                )));
            }
        }
        if !(self.maximum_error_factor >= 1.0) {
            return Err(SelectionError::InvalidArgument(format!(
                "maximum-error-factor must be at least 1, got {}",
                self.maximum_error_factor
            )));
        }
        Ok(())
    }
}
