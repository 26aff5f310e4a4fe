#![deny(dead_code)]
#![deny(unused_imports)]
#![allow(non_snake_case)]

pub mod basis;
pub mod design;
pub mod fitting;
pub mod least_squares;
pub mod linalg;
pub mod selection;
pub mod sequence;
pub mod types;

pub use basis::{
    BasisFunction, FnBasis, PolynomialFamily, PolynomialTerm, SharedBasis, total_degree_basis,
};
pub use design::{DesignError, DesignProxy, DesignSnapshot};
pub use fitting::{CorrectedLeaveOneOut, FittingAlgorithm, KFold};
pub use least_squares::{
    CholeskyMethod, LeastSquaresMethod, LeastSquaresProblem, MethodState, QrMethod, SparseMethod,
    SvdMethod,
};
pub use selection::{
    ApproximationAlgorithm, ApproximationResult, LeastSquaresFit, LeastSquaresMetaModelSelection,
};
pub use sequence::{BasisSequence, BasisSequenceFactory, Lars, LarsState, SequenceStep};
pub use types::{CrossValidationMethod, LeastSquaresStrategy, SelectionConfig, SelectionError};
