//! Candidate basis functions ("dictionary") evaluated by the design proxy.
//!
//! Ordering carries no meaning for the selection algorithms: LARS picks the
//! most correlated predictor from the first step on. [`total_degree_basis`]
//! enumerates terms in graded order, so its constant term sits at index 0.

use ndarray::{Array1, ArrayView1, ArrayView2};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Scalar-valued function of one input point.
pub trait BasisFunction: Send + Sync + fmt::Debug {
    fn evaluate(&self, point: ArrayView1<'_, f64>) -> f64;

    /// Evaluate on every row of `points`.
    fn evaluate_batch(&self, points: ArrayView2<'_, f64>) -> Array1<f64> {
        points.rows().into_iter().map(|row| self.evaluate(row)).collect()
    }

    fn label(&self) -> String {
        format!("{self:?}")
    }

    /// Number of input coordinates the function reads, when fixed.
    fn input_dimension(&self) -> Option<usize> {
        None
    }
}

pub type SharedBasis = Arc<dyn BasisFunction>;

/// Univariate family used along each input coordinate of a [`PolynomialTerm`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PolynomialFamily {
    Monomial,
    /// Legendre polynomials, orthogonal on [-1, 1].
    Legendre,
    /// Probabilists' Hermite polynomials, orthogonal under N(0, 1).
    Hermite,
}

impl PolynomialFamily {
    /// `P_degree(x)` by the three-term recurrence of the family.
    pub fn evaluate(self, degree: usize, x: f64) -> f64 {
        match (self, degree) {
            (_, 0) => 1.0,
            (PolynomialFamily::Monomial, d) => x.powi(d as i32),
            (family, d) => {
                let mut prev = 1.0;
                let mut curr = x;
                for n in 1..d {
                    let nf = n as f64;
                    let next = match family {
                        PolynomialFamily::Legendre => {
                            ((2.0 * nf + 1.0) * x * curr - nf * prev) / (nf + 1.0)
                        }
                        _ => x * curr - nf * prev,
                    };
                    prev = curr;
                    curr = next;
                }
                curr
            }
        }
    }
}

/// Tensor product `∏_k P_{α_k}(x_k)` for a multi-index `α`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolynomialTerm {
    pub family: PolynomialFamily,
    pub multi_index: Vec<usize>,
}

impl PolynomialTerm {
    pub fn new(family: PolynomialFamily, multi_index: Vec<usize>) -> Self {
        Self {
            family,
            multi_index,
        }
    }

    pub fn total_degree(&self) -> usize {
        self.multi_index.iter().sum()
    }
}

impl BasisFunction for PolynomialTerm {
    fn evaluate(&self, point: ArrayView1<'_, f64>) -> f64 {
        self.multi_index
            .iter()
            .zip(point.iter())
            .filter(|(alpha, _)| **alpha > 0)
            .map(|(&alpha, &x)| self.family.evaluate(alpha, x))
            .product()
    }

    fn input_dimension(&self) -> Option<usize> {
        Some(self.multi_index.len())
    }

    fn label(&self) -> String {
        if self.total_degree() == 0 {
            return "1".to_string();
        }
        let prefix = match self.family {
            PolynomialFamily::Monomial => "x",
            PolynomialFamily::Legendre => "L",
            PolynomialFamily::Hermite => "He",
        };
        self.multi_index
            .iter()
            .enumerate()
            .filter(|(_, alpha)| **alpha > 0)
            .map(|(k, alpha)| match self.family {
                PolynomialFamily::Monomial if *alpha == 1 => format!("{prefix}{k}"),
                PolynomialFamily::Monomial => format!("{prefix}{k}^{alpha}"),
                _ => format!("{prefix}{alpha}(x{k})"),
            })
            .collect::<Vec<_>>()
            .join("*")
    }
}

/// All multi-indices of dimension `dim` with total degree `<= degree`, graded
/// (degree 0 first, then degree 1, ...).
pub fn total_degree_multi_indices(dim: usize, degree: usize) -> Vec<Vec<usize>> {
    fn fill(position: usize, remaining: usize, current: &mut [usize], out: &mut Vec<Vec<usize>>) {
        if position + 1 == current.len() {
            current[position] = remaining;
            out.push(current.to_vec());
            return;
        }
        for v in (0..=remaining).rev() {
            current[position] = v;
            fill(position + 1, remaining - v, current, out);
        }
    }

    if dim == 0 {
        return vec![Vec::new()];
    }
    let mut out = Vec::new();
    let mut current = vec![0usize; dim];
    for total in 0..=degree {
        fill(0, total, &mut current, &mut out);
    }
    out
}

pub fn total_degree_basis(dim: usize, degree: usize, family: PolynomialFamily) -> Vec<SharedBasis> {
    total_degree_multi_indices(dim, degree)
        .into_iter()
        .map(|alpha| Arc::new(PolynomialTerm::new(family, alpha)) as SharedBasis)
        .collect()
}

/// Closure-backed basis function.
pub struct FnBasis<F> {
    label: String,
    func: F,
}

impl<F> FnBasis<F>
where
    F: Fn(ArrayView1<'_, f64>) -> f64 + Send + Sync + 'static,
{
    pub fn new(label: impl Into<String>, func: F) -> Self {
        Self {
            label: label.into(),
            func,
        }
    }

    pub fn shared(label: impl Into<String>, func: F) -> SharedBasis {
        Arc::new(Self::new(label, func))
    }
}

impl<F> fmt::Debug for FnBasis<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnBasis").field("label", &self.label).finish()
    }
}

impl<F> BasisFunction for FnBasis<F>
where
    F: Fn(ArrayView1<'_, f64>) -> f64 + Send + Sync + 'static,
{
    fn evaluate(&self, point: ArrayView1<'_, f64>) -> f64 {
        (self.func)(point)
    }

    fn label(&self) -> String {
        self.label.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn graded_enumeration_starts_with_constant() {
        let indices = total_degree_multi_indices(2, 2);
        assert_eq!(
            indices,
            vec![
                vec![0, 0],
                vec![1, 0],
                vec![0, 1],
                vec![2, 0],
                vec![1, 1],
                vec![0, 2]
            ]
        );
        // C(d + p, p) terms
        assert_eq!(total_degree_multi_indices(3, 3).len(), 20);
    }

    #[test]
    fn family_recurrences_match_closed_forms() {
        let x = 0.37;
        assert_abs_diff_eq!(
            PolynomialFamily::Legendre.evaluate(3, x),
            0.5 * (5.0 * x * x * x - 3.0 * x),
            epsilon = 1e-14
        );
        assert_abs_diff_eq!(
            PolynomialFamily::Hermite.evaluate(3, x),
            x * x * x - 3.0 * x,
            epsilon = 1e-14
        );
        assert_abs_diff_eq!(PolynomialFamily::Monomial.evaluate(4, 2.0), 16.0);
    }

    #[test]
    fn tensor_term_evaluates_product() {
        let term = PolynomialTerm::new(PolynomialFamily::Monomial, vec![2, 1]);
        let point = array![3.0, -2.0];
        assert_abs_diff_eq!(term.evaluate(point.view()), -18.0);
        assert_eq!(term.label(), "x0^2*x1");

        let batch = array![[1.0, 1.0], [2.0, 0.5]];
        assert_abs_diff_eq!(term.evaluate_batch(batch.view()), array![1.0, 2.0]);
    }

    #[test]
    fn closure_basis_keeps_label() {
        let f = FnBasis::shared("sin(x0)", |p: ArrayView1<'_, f64>| p[0].sin());
        assert_eq!(f.label(), "sin(x0)");
        assert_abs_diff_eq!(f.evaluate(array![0.0].view()), 0.0);
    }
}
