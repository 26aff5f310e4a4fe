use approx::assert_abs_diff_eq;
use basis_select::basis::{BasisFunction, PolynomialFamily, SharedBasis, total_degree_basis};
use basis_select::design::DesignProxy;
use basis_select::fitting::{CorrectedLeaveOneOut, FittingAlgorithm, KFold};
use basis_select::least_squares;
use basis_select::selection::{
    ApproximationAlgorithm, LeastSquaresFit, LeastSquaresMetaModelSelection,
};
use basis_select::sequence::Lars;
use basis_select::types::{CrossValidationMethod, LeastSquaresStrategy, SelectionConfig};
use ndarray::{Array1, Array2, ArrayView1};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand_distr::{Distribution, Normal, Uniform};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

fn sparse_truth(points: &Array2<f64>) -> Array1<f64> {
    Array1::from_shape_fn(points.nrows(), |i| {
        let (a, b) = (points[[i, 0]], points[[i, 1]]);
        // 2 + 1.5 P1(a) - 0.7 P1(a) P1(b) + 0.4 P2(b)
        2.0 + 1.5 * a - 0.7 * a * b + 0.4 * (1.5 * b * b - 0.5)
    })
}

fn uniform_points(n: usize, seed: u64) -> Array2<f64> {
    let mut rng = StdRng::seed_from_u64(seed);
    let uniform = Uniform::new(-1.0, 1.0);
    Array2::from_shape_fn((n, 2), |_| uniform.sample(&mut rng))
}

#[test]
fn sparse_polynomial_is_recovered_exactly() {
    let x = uniform_points(60, 2024);
    let y = sparse_truth(&x);
    let basis = total_degree_basis(2, 4, PolynomialFamily::Legendre);

    for cross_validation in [
        CrossValidationMethod::CorrectedLeaveOneOut,
        CrossValidationMethod::KFold,
    ] {
        let config = SelectionConfig {
            cross_validation,
            fold_count: 5,
            ..SelectionConfig::default()
        };
        let result =
            LeastSquaresMetaModelSelection::new(x.clone(), y.clone(), basis.clone(), config)
                .unwrap()
                .run()
                .unwrap();
        assert!(result.relative_error < 1e-12, "{cross_validation:?}: {}", result.relative_error);
        assert!(result.selected_indices.len() < basis.len());

        let test = uniform_points(30, 99);
        let predicted = result.predict(&basis, test.view()).unwrap();
        assert_abs_diff_eq!(predicted, sparse_truth(&test), epsilon = 1e-8);
        assert_eq!(result.labels.len(), result.selected_indices.len());
    }
}

#[test]
fn noisy_selection_scores_every_explored_step() {
    let x = uniform_points(80, 5);
    let mut rng = StdRng::seed_from_u64(6);
    let noise = Normal::new(0.0, 0.1).unwrap();
    let y = sparse_truth(&x) + Array1::from_shape_fn(80, |_| noise.sample(&mut rng));
    let basis = total_degree_basis(2, 5, PolynomialFamily::Legendre);

    let result = LeastSquaresMetaModelSelection::new(x, y, basis, SelectionConfig::default())
        .unwrap()
        .run()
        .unwrap();
    let sequence = result.sequence.as_ref().unwrap();
    let step = result.selected_step.unwrap();
    assert!(result.scores.len() <= sequence.len());
    assert!(result.scores.iter().all(|s| s.is_finite()));
    let best = result.scores.iter().copied().fold(f64::INFINITY, f64::min);
    assert_eq!(result.scores[step], best);
    assert_eq!(sequence.subset(step).map(<[usize]>::len), Some(result.selected_indices.len()));
    assert!(result.relative_error > 0.0 && result.relative_error < 0.1);
}

#[test]
fn tiny_samples_do_not_fail() {
    let basis = total_degree_basis(1, 2, PolynomialFamily::Monomial);

    let one = LeastSquaresMetaModelSelection::new(
        Array2::from_elem((1, 1), 0.5),
        Array1::from(vec![4.0]),
        basis.clone(),
        SelectionConfig::default(),
    )
    .unwrap()
    .run()
    .unwrap();
    assert!(one.selected_indices.is_empty());
    assert!(one.coefficients.is_empty());
    assert_eq!(one.selected_step, None);

    let two = LeastSquaresMetaModelSelection::new(
        Array2::from_shape_vec((2, 1), vec![0.0, 1.0]).unwrap(),
        Array1::from(vec![1.0, 3.0]),
        basis,
        SelectionConfig::default(),
    )
    .unwrap()
    .run()
    .unwrap();
    assert_eq!(two.selected_indices.len(), 1);
    assert_eq!(two.coefficients.len(), 1);
}

#[test]
fn weighted_fit_ignores_zero_weight_outlier() {
    let x = Array2::from_shape_fn((12, 1), |(i, _)| i as f64 / 11.0);
    let mut y = x.column(0).mapv(|t| 1.0 - 4.0 * t);
    y[7] += 50.0;
    let mut weights = Array1::ones(12);
    weights[7] = 0.0;
    let basis = total_degree_basis(1, 1, PolynomialFamily::Monomial);

    for strategy in [
        LeastSquaresStrategy::Cholesky,
        LeastSquaresStrategy::QR,
        LeastSquaresStrategy::SVD,
    ] {
        let config = SelectionConfig {
            strategy,
            ..SelectionConfig::default()
        };
        let result = LeastSquaresFit::new(x.clone(), y.clone(), basis.clone(), config)
            .unwrap()
            .with_weights(weights.clone())
            .run()
            .unwrap();
        assert_abs_diff_eq!(result.coefficients, Array1::from(vec![1.0, -4.0]), epsilon = 1e-9);
    }
}

#[test]
fn cross_validation_scores_agree_in_scale() {
    let x = uniform_points(40, 31);
    let mut rng = StdRng::seed_from_u64(32);
    let noise = Normal::new(0.0, 0.2).unwrap();
    let y = sparse_truth(&x) + Array1::from_shape_fn(40, |_| noise.sample(&mut rng));
    let proxy = DesignProxy::new(x, total_degree_basis(2, 2, PolynomialFamily::Legendre));
    let mut method =
        least_squares::build(LeastSquaresStrategy::QR, proxy, None, (0..6).collect()).unwrap();

    let loo = CorrectedLeaveOneOut.run(method.as_mut(), y.view()).unwrap();
    let kfold = KFold::new(40).run(method.as_mut(), y.view()).unwrap();
    // Noise variance is 0.04; both estimates land near it.
    assert!(loo > 0.01 && loo < 0.2, "loo = {loo}");
    assert!(kfold > 0.01 && kfold < 0.2, "kfold = {kfold}");
    // N-fold is plain leave-one-out, which the corrected estimate inflates.
    assert!(loo >= kfold);
}

#[derive(Debug)]
struct CountingBasis {
    degree: i32,
    calls: Arc<AtomicUsize>,
}

impl BasisFunction for CountingBasis {
    fn evaluate(&self, point: ArrayView1<'_, f64>) -> f64 {
        self.calls.fetch_add(1, Ordering::SeqCst);
        point[0].powi(self.degree)
    }
}

#[test]
fn design_columns_are_evaluated_once_per_selection() {
    let calls = Arc::new(AtomicUsize::new(0));
    let basis: Vec<SharedBasis> = (0..5)
        .map(|degree| {
            Arc::new(CountingBasis {
                degree,
                calls: Arc::clone(&calls),
            }) as SharedBasis
        })
        .collect();
    let n = 25;
    let x = Array2::from_shape_fn((n, 1), |(i, _)| i as f64 / (n - 1) as f64);
    let y = x.column(0).mapv(|t| (2.0 * t).sin());
    let config = SelectionConfig {
        cross_validation: CrossValidationMethod::KFold,
        fold_count: 5,
        ..SelectionConfig::default()
    };

    let mut algo = LeastSquaresMetaModelSelection::new(x, y, basis, config)
        .unwrap()
        .with_factory(Box::new(Lars::default()));
    algo.run().unwrap();
    assert_eq!(algo.proxy().computed_count(), 5);
    assert_eq!(calls.load(Ordering::SeqCst), 5 * n);

    // A second run reuses the cached columns.
    algo.run().unwrap();
    assert_eq!(calls.load(Ordering::SeqCst), 5 * n);
}
