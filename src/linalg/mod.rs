//! Dense linear algebra used by the least-squares strategies.

pub mod cholesky_update;
pub mod faer_ndarray;
pub(crate) mod utils;
