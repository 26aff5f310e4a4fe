use ndarray::ArrayView1;

/// Compensated summation; keeps L1 norms and variances stable over long
/// coefficient vectors.
#[derive(Default, Clone, Copy)]
pub(crate) struct KahanSum {
    sum: f64,
    c: f64,
}

impl KahanSum {
    pub(crate) fn add(&mut self, value: f64) {
        let y = value - self.c;
        let t = self.sum + y;
        self.c = (t - self.sum) - y;
        self.sum = t;
    }

    pub(crate) fn sum(self) -> f64 {
        self.sum
    }
}

pub(crate) fn l1_norm(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut acc = KahanSum::default();
    for v in values {
        acc.add(v.abs());
    }
    acc.sum()
}

pub(crate) fn sum_of_squares(values: impl IntoIterator<Item = f64>) -> f64 {
    let mut acc = KahanSum::default();
    for v in values {
        acc.add(v * v);
    }
    acc.sum()
}

/// Unbiased sample variance; zero for fewer than two values.
pub(crate) fn sample_variance(values: ArrayView1<'_, f64>) -> f64 {
    let n = values.len();
    if n < 2 {
        return 0.0;
    }
    let mut total = KahanSum::default();
    for &v in values {
        total.add(v);
    }
    let mean = total.sum() / n as f64;
    sum_of_squares(values.iter().map(|&v| v - mean)) / (n as f64 - 1.0)
}

/// Sign with `sign(0) = 0`, unlike `f64::signum`.
#[inline]
pub(crate) fn sign(value: f64) -> f64 {
    if value > 0.0 {
        1.0
    } else if value < 0.0 {
        -1.0
    } else {
        0.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn kahan_sum_recovers_small_terms() {
        let mut acc = KahanSum::default();
        acc.add(1.0);
        for _ in 0..10_000 {
            acc.add(1e-16);
        }
        assert_abs_diff_eq!(acc.sum(), 1.0 + 1e-12, epsilon = 1e-15);
    }

    #[test]
    fn variance_and_norms() {
        let v = array![1.0, -2.0, 3.0, -4.0];
        assert_abs_diff_eq!(l1_norm(v.iter().copied()), 10.0);
        assert_abs_diff_eq!(sum_of_squares(v.iter().copied()), 30.0);
        // mean -0.5, squared deviations 2.25 + 2.25 + 12.25 + 12.25
        assert_abs_diff_eq!(sample_variance(v.view()), 29.0 / 3.0, epsilon = 1e-12);
        assert_eq!(sample_variance(array![5.0].view()), 0.0);
        assert_eq!(sign(0.0), 0.0);
        assert_eq!(sign(-0.3), -1.0);
    }
}
