//! Polynomials and least-squares polynomial fitting.

use std::iter;

use nalgebra::{DMatrix, DVector};

/// Singular values below this fraction of the largest are treated as zero.
const RANK_TOLERANCE: f64 = 1e-10;

/// A polynomial with coefficients in ascending order of power.
#[derive(Debug, Clone, PartialEq)]
pub struct Polynomial(Vec<f64>);

impl Polynomial {
    /// Create from ascending coefficients (`c0 + c1 x + c2 x² + …`).
    #[must_use]
    pub const fn new(coefficients: Vec<f64>) -> Self {
        Self(coefficients)
    }

    /// Polynomial degree (0 for an empty or constant polynomial).
    #[must_use]
    pub const fn degree(&self) -> usize {
        self.0.len().saturating_sub(1)
    }

    /// Value at `x` (Horner's scheme).
    #[must_use]
    pub fn eval(&self, x: f64) -> f64 {
        self.0.iter().rev().fold(0.0, |acc, &c| acc.mul_add(x, c))
    }

    /// First derivative at `x`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn derivative(&self, x: f64) -> f64 {
        self.0
            .iter()
            .enumerate()
            .skip(1)
            .rev()
            .fold(0.0, |acc, (i, &c)| acc.mul_add(x, c * i as f64))
    }

    /// Second derivative at `x`.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn second_derivative(&self, x: f64) -> f64 {
        self.0
            .iter()
            .enumerate()
            .skip(2)
            .rev()
            .fold(0.0, |acc, (i, &c)| acc.mul_add(x, c * (i * (i - 1)) as f64))
    }
}

/// Least-squares polynomial of `degree` through `(xs, ys)`.
///
/// Solves the Vandermonde system by SVD. Returns `None` if the inputs
/// differ in length or the system is rank deficient, e.g. fewer distinct
/// `xs` than `degree + 1`. Inputs should be scaled to roughly `[-1, 1]`
/// for higher degrees.
#[must_use]
pub fn least_squares(xs: &[f64], ys: &[f64], degree: usize) -> Option<Polynomial> {
    if xs.len() != ys.len() || xs.len() <= degree {
        return None;
    }
    let n = degree + 1;
    let vandermonde = DMatrix::from_row_iterator(
        xs.len(),
        n,
        xs.iter()
            .flat_map(|&x| iter::successors(Some(1.0), move |p| Some(p * x)).take(n)),
    );
    let rhs = DVector::from_column_slice(ys);

    let svd = vandermonde.svd(true, true);
    let tolerance = svd.singular_values.max() * RANK_TOLERANCE;
    if svd.rank(tolerance) < n {
        return None;
    }
    let solution = svd.solve(&rhs, tolerance).ok()?;
    Some(Polynomial(solution.iter().copied().collect()))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn eval_and_derivatives() {
        // 1 + 2x + 3x²
        let p = Polynomial::new(vec![1.0, 2.0, 3.0]);
        assert!((p.eval(2.0) - 17.0).abs() < 1e-12);
        assert!((p.derivative(2.0) - 14.0).abs() < 1e-12);
        assert!((p.second_derivative(2.0) - 6.0).abs() < 1e-12);
        assert_eq!(p.degree(), 2);
    }

    #[test]
    fn constant_has_zero_derivatives() {
        let p = Polynomial::new(vec![4.0]);
        assert!(p.derivative(3.0).abs() < f64::EPSILON);
        assert!(p.second_derivative(3.0).abs() < f64::EPSILON);
    }

    #[test]
    fn exact_cubic_is_recovered() {
        let xs: Vec<f64> = (0..20).map(|i| -1.0 + f64::from(i) * 0.1).collect();
        let ys: Vec<f64> = xs.iter().map(|&x| 0.5 - x + 2.0 * x.powi(3)).collect();
        let p = least_squares(&xs, &ys, 3).unwrap();
        assert_eq!(p.degree(), 3);
        for x in [-1.5f64, -0.25, 0.0, 0.6, 2.0] {
            let expected = 2.0f64.mul_add(x.powi(3), 0.5 - x);
            assert!((p.eval(x) - expected).abs() < 1e-9, "{x}");
        }
    }

    #[test]
    fn noisy_line_is_averaged() {
        let xs = [0.0, 0.0, 1.0, 1.0];
        let ys = [1.0, -1.0, 3.0, 1.0];
        let p = least_squares(&xs, &ys, 1).unwrap();
        assert!(p.eval(0.0).abs() < 1e-12);
        assert!((p.eval(1.0) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn too_few_distinct_abscissae_is_singular() {
        let xs = [0.0, 0.0, 1.0, 1.0];
        let ys = [0.0, 0.0, 1.0, 1.0];
        assert!(least_squares(&xs, &ys, 2).is_none());
    }

    #[test]
    fn mismatched_or_short_input_is_rejected() {
        assert!(least_squares(&[0.0, 1.0], &[0.0], 1).is_none());
        assert!(least_squares(&[0.0], &[0.0], 1).is_none());
    }
}
