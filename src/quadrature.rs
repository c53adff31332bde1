//! Gauss-Lobatto-Legendre (GLL) rules and the spectral differentiation
//! matrix on the reference interval `[-1, 1]`.
//!
//! The nodal spectral-element discretization collocates solution nodes and
//! quadrature points at the GLL nodes, so the mass matrix is diagonal and
//! the stiffness action reduces to tensor contractions with the 1-D
//! differentiation matrix produced here.

use std::f64::consts::PI;

/// Recurrence relation for Legendre polynomials.
///
/// The derivative formula divides by `x^2 - 1`, so it is only valid in the
/// open interval `(-1, 1)`; the endpoints are handled explicitly by the
/// callers below.
#[derive(Debug, Default)]
struct LegendreRecurrence {
    n: usize,
    x: f64,
    // The current value, i.e. p_n(x)
    p1: f64,
    // The previous value in the recurrence, i.e. p_{n - 1}(x)
    p2: f64,
}

impl LegendreRecurrence {
    fn evaluate(n: usize, x: f64) -> Self {
        // m P_m(x) = (2m - 1) x P_{m - 1}(x) - (m - 1) P_{m - 2}(x)
        let mut p1 = 1.0;
        let mut p2 = 0.0;
        let mut p3;
        for m in 1..=n {
            let m = m as f64;
            p3 = p2;
            p2 = p1;
            p1 = ((2.0 * m - 1.0) * x * p2 - (m - 1.0) * p3) / m;
        }

        Self { n, x, p1, p2 }
    }

    fn value(&self) -> f64 {
        self.p1
    }

    fn derivative(&self) -> f64 {
        let Self { n, x, p1, p2 } = &self;
        let n = *n as f64;
        // dp_n/dx (x) = n (x p_n(x) - p_{n - 1}(x)) / (x^2 - 1)
        n * (x * p1 - p2) / (x * x - 1.0)
    }

    fn second_derivative(&self) -> f64 {
        let n = self.n as f64;
        // (1 - x^2) p_n'' = 2 x p_n' - n (n + 1) p_n
        (2.0 * self.x * self.derivative() - n * (n + 1.0) * self.value()) / (1.0 - self.x * self.x)
    }
}

/// Gauss-Lobatto-Legendre rule with the given number of points.
///
/// Returns `(weights, points)` with points in ascending order, endpoints
/// included. Given `n` points the rule integrates polynomials of order up
/// to `2 n - 3` exactly, which under-integrates the spectral-element mass
/// matrix by design (collocation).
///
/// # Panics
///
/// Panics if fewer than two points are requested.
pub fn gauss_lobatto(num_points: usize) -> (Vec<f64>, Vec<f64>) {
    let nq = num_points;
    assert!(nq >= 2, "a Lobatto rule needs both endpoints");
    let degree = nq - 1;

    let mut points = vec![0.0; nq];
    points[0] = -1.0;
    points[degree] = 1.0;

    // Interior points are the roots of P'_degree, found by Newton iteration
    // seeded from the Chebyshev-Lobatto nodes.
    for i in 1..degree {
        let mut x = -(PI * i as f64 / degree as f64).cos();
        loop {
            let rec = LegendreRecurrence::evaluate(degree, x);
            let dx = -rec.derivative() / rec.second_derivative();
            x += dx;
            if dx.abs() <= 1e-15 {
                break;
            }
        }
        points[i] = x;
    }

    let scale = 2.0 / (degree as f64 * (degree + 1) as f64);
    let weights = points
        .iter()
        .map(|&x| {
            let p = LegendreRecurrence::evaluate(degree, x).value();
            scale / (p * p)
        })
        .collect();

    (weights, points)
}

/// Differentiation matrix of the Lagrange basis on the given GLL points.
///
/// Entry `(i, j)` holds `l_j'(x_i)`, stored row-major, so the derivative of
/// a nodal field at node `i` is `sum_j d[i * nq + j] * u_j`.
pub fn derivative_matrix(points: &[f64]) -> Vec<f64> {
    let nq = points.len();
    let degree = (nq - 1) as f64;
    let legendre: Vec<f64> = points
        .iter()
        .map(|&x| LegendreRecurrence::evaluate(nq - 1, x).value())
        .collect();

    let mut d = vec![0.0; nq * nq];
    for i in 0..nq {
        for j in 0..nq {
            if i != j {
                d[i * nq + j] = (legendre[i] / legendre[j]) / (points[i] - points[j]);
            }
        }
    }
    d[0] = -degree * (degree + 1.0) / 4.0;
    d[nq * nq - 1] = degree * (degree + 1.0) / 4.0;

    d
}
