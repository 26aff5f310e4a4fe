use super::{FittingAlgorithm, check_response};
use crate::least_squares::LeastSquaresMethod;
use crate::linalg::utils::KahanSum;
use crate::types::SelectionError;
use ndarray::{ArrayView1, Axis, s};
use rayon::prelude::*;

/// Empirical K-fold cross-validation.
///
/// Rows are split into `K` contiguous blocks with boundaries `⌊iN/K⌋`. Each
/// fold trains an independent copy of the method on the other blocks (a row
/// update, no data copy) and predicts the held-out block. The score is the
/// mean squared prediction error over all rows.
#[derive(Debug, Clone, Copy)]
pub struct KFold {
    fold_count: usize,
}

impl KFold {
    pub fn new(fold_count: usize) -> Self {
        Self { fold_count }
    }

    pub fn fold_count(&self) -> usize {
        self.fold_count
    }

    /// Half-open position ranges of the folds.
    pub fn fold_bounds(&self, n: usize) -> Vec<(usize, usize)> {
        let k = self.fold_count;
        (0..k).map(|i| (i * n / k, (i + 1) * n / k)).collect()
    }

    fn fold_error(
        method: &dyn LeastSquaresMethod,
        y: ArrayView1<'_, f64>,
        rows: &[usize],
        (start, end): (usize, usize),
    ) -> Result<f64, SelectionError> {
        let p = method.current_indices().len();
        let train_positions: Vec<usize> =
            (0..rows.len()).filter(|&i| i < start || i >= end).collect();
        if train_positions.len() <= p {
            log::warn!(
                "k-fold: {} training rows cannot fit {p} basis functions",
                train_positions.len()
            );
            return Ok(f64::INFINITY);
        }
        let train_rows: Vec<usize> = train_positions.iter().map(|&i| rows[i]).collect();
        let test_rows = &rows[start..end];

        let mut local = method.box_clone();
        local.update(&[], &train_rows, test_rows, true)?;
        let y_train = y.select(Axis(0), &train_positions);
        let coefficients = local.solve(y_train.view())?;
        let design = method
            .proxy()
            .compute_design_rows(method.current_indices(), test_rows)?;
        let predicted = design.dot(&coefficients);

        let mut total = KahanSum::default();
        for (&observed, &prediction) in y.slice(s![start..end]).iter().zip(predicted.iter()) {
            let residual = observed - prediction;
            total.add(residual * residual);
        }
        Ok(total.sum())
    }
}

impl FittingAlgorithm for KFold {
    fn name(&self) -> &'static str {
        "KFold"
    }

    fn run(
        &self,
        method: &mut dyn LeastSquaresMethod,
        y: ArrayView1<'_, f64>,
    ) -> Result<f64, SelectionError> {
        let n = check_response(method, y)?;
        if self.fold_count < 2 || self.fold_count > n {
            return Err(SelectionError::InvalidArgument(format!(
                "k-fold needs 2 <= K <= N, got K = {} for N = {n}",
                self.fold_count
            )));
        }
        let rows: Vec<usize> = match method.proxy().row_filter() {
            Some(filter) => filter.to_vec(),
            None => (0..n).collect(),
        };
        let method: &dyn LeastSquaresMethod = method;
        let errors = self
            .fold_bounds(n)
            .into_par_iter()
            .map(|bounds| Self::fold_error(method, y, &rows, bounds))
            .collect::<Result<Vec<f64>, SelectionError>>()?;

        let mut total = KahanSum::default();
        for error in errors {
            total.add(error);
        }
        Ok(total.sum() / n as f64)
    }

    fn box_clone(&self) -> Box<dyn FittingAlgorithm> {
        Box::new(*self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::least_squares::build_from_matrix;
    use crate::types::LeastSquaresStrategy;
    use approx::assert_abs_diff_eq;
    use ndarray::{Array1, Array2};

    #[test]
    fn folds_cover_every_row_once() {
        let bounds = KFold::new(3).fold_bounds(10);
        assert_eq!(bounds, vec![(0, 3), (3, 6), (6, 10)]);
    }

    #[test]
    fn exact_model_scores_zero_and_leaves_method_untouched() {
        let n = 15;
        let x = Array2::from_shape_fn((n, 2), |(i, j)| if j == 0 { 1.0 } else { i as f64 });
        let y = Array1::from_shape_fn(n, |i| 0.5 - 0.25 * i as f64);
        let mut method = build_from_matrix(LeastSquaresStrategy::Cholesky, x).expect("method");
        let score = KFold::new(5).run(method.as_mut(), y.view()).expect("score");
        assert_abs_diff_eq!(score, 0.0, epsilon = 1e-18);
        assert_eq!(method.proxy().row_filter(), None);
        assert_eq!(method.problem().sample_size(), n);
    }

    #[test]
    fn matches_manual_two_fold_split() {
        let x = Array2::from_shape_fn((6, 2), |(i, j)| if j == 0 { 1.0 } else { i as f64 });
        let y = Array1::from(vec![0.0, 1.0, 0.5, 2.0, 1.5, 3.0]);
        let mut method = build_from_matrix(LeastSquaresStrategy::QR, x.clone()).expect("method");
        let score = KFold::new(2).run(method.as_mut(), y.view()).expect("score");

        // Fit on one half, predict the other, in both directions.
        let mut expected = 0.0;
        for (train, test) in [([3usize, 4, 5], [0usize, 1, 2]), ([0, 1, 2], [3, 4, 5])] {
            let xt = x.select(Axis(0), &train);
            let yt = y.select(Axis(0), &train);
            let beta = build_from_matrix(LeastSquaresStrategy::QR, xt)
                .expect("method")
                .solve(yt.view())
                .expect("solve");
            for &r in &test {
                let residual = y[r] - x.row(r).dot(&beta);
                expected += residual * residual;
            }
        }
        assert_abs_diff_eq!(score, expected / 6.0, epsilon = 1e-10);
    }

    #[test]
    fn too_many_folds_is_invalid() {
        let x = Array2::from_shape_fn((4, 1), |_| 1.0);
        let mut method = build_from_matrix(LeastSquaresStrategy::Cholesky, x).expect("method");
        assert!(matches!(
            KFold::new(5).run(method.as_mut(), Array1::ones(4).view()),
            Err(SelectionError::InvalidArgument(_))
        ));
    }
}
