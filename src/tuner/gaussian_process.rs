//! Gaussian-process regression over the unit cube
//!
//! Matern 5/2 kernel with a fixed length scale, targets normalized to zero
//! mean and unit variance before fitting.

use ndarray::{Array1, Array2, ArrayView1};

use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub struct GaussianProcess {
    length_scale: f64,
    x_train: Array2<f64>,
    /// Lower Cholesky factor of `K + alpha I`
    chol: Array2<f64>,
    /// `(K + alpha I)^-1 y`
    weights: Array1<f64>,
    y_mean: f64,
    y_std: f64,
}

pub fn matern52(a: ArrayView1<f64>, b: ArrayView1<f64>, length_scale: f64) -> f64 {
    let d = a
        .iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
        / length_scale;
    let r = 5f64.sqrt() * d;
    (1.0 + r + r * r / 3.0) * (-r).exp()
}

/// Lower-triangular `L` with `L L^T = a`, `None` if `a` is not positive definite
fn cholesky(a: &Array2<f64>) -> Option<Array2<f64>> {
    let n = a.nrows();
    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let mut sum = a[[i, j]];
            for k in 0..j {
                sum -= l[[i, k]] * l[[j, k]];
            }
            if i == j {
                if sum <= 0.0 || !sum.is_finite() {
                    return None;
                }
                l[[i, i]] = sum.sqrt();
            } else {
                l[[i, j]] = sum / l[[j, j]];
            }
        }
    }
    Some(l)
}

/// Solves `L x = b`
fn forward_substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in 0..n {
        let mut sum = b[i];
        for k in 0..i {
            sum -= l[[i, k]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

/// Solves `L^T x = b`
fn back_substitute(l: &Array2<f64>, b: &Array1<f64>) -> Array1<f64> {
    let n = b.len();
    let mut x = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let mut sum = b[i];
        for k in i + 1..n {
            sum -= l[[k, i]] * x[k];
        }
        x[i] = sum / l[[i, i]];
    }
    x
}

impl GaussianProcess {
    /// Fits on rows of `x` with targets `y`. A singular kernel matrix is
    /// retried with growing jitter before giving up.
    pub fn fit(x: Array2<f64>, y: &[f64], length_scale: f64, alpha: f64) -> Result<Self> {
        let n = x.nrows();
        if n == 0 || y.len() != n {
            return Err(Error::Shape(format!("{n} points but {} targets", y.len())));
        }

        let y_mean = y.iter().sum::<f64>() / n as f64;
        let variance = y.iter().map(|v| (v - y_mean).powi(2)).sum::<f64>() / n as f64;
        let y_std = if variance > 0.0 { variance.sqrt() } else { 1.0 };
        let targets = Array1::from_iter(y.iter().map(|v| (v - y_mean) / y_std));

        let mut kernel = Array2::<f64>::zeros((n, n));
        for i in 0..n {
            for j in 0..=i {
                let k = matern52(x.row(i), x.row(j), length_scale);
                kernel[[i, j]] = k;
                kernel[[j, i]] = k;
            }
        }

        let mut jitter = alpha;
        let chol = loop {
            let mut regularized = kernel.clone();
            for i in 0..n {
                regularized[[i, i]] += jitter;
            }
            if let Some(l) = cholesky(&regularized) {
                break l;
            }
            jitter *= 10.0;
            if jitter > 1.0 {
                return Err(Error::Shape("kernel matrix is not positive definite".to_string()));
            }
        };

        let weights = back_substitute(&chol, &forward_substitute(&chol, &targets));
        Ok(GaussianProcess {
            length_scale,
            x_train: x,
            chol,
            weights,
            y_mean,
            y_std,
        })
    }

    /// Posterior mean and standard deviation at `point`, in target units
    pub fn predict(&self, point: ArrayView1<f64>) -> (f64, f64) {
        let k_star = Array1::from_iter(
            self.x_train
                .rows()
                .into_iter()
                .map(|row| matern52(row, point, self.length_scale)),
        );
        let mean = k_star.dot(&self.weights);
        let v = forward_substitute(&self.chol, &k_star);
        let variance = (1.0 - v.dot(&v)).max(0.0);
        (
            mean * self.y_std + self.y_mean,
            variance.sqrt() * self.y_std,
        )
    }
}

/// Standard normal density
pub fn normal_pdf(z: f64) -> f64 {
    (-0.5 * z * z).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

/// Standard normal distribution function
pub fn normal_cdf(z: f64) -> f64 {
    0.5 * (1.0 + erf(z / std::f64::consts::SQRT_2))
}

/// Abramowitz and Stegun 7.1.26, absolute error below 1.5e-7
fn erf(x: f64) -> f64 {
    let sign = if x < 0.0 { -1.0 } else { 1.0 };
    let x = x.abs();
    let t = 1.0 / (1.0 + 0.327_591_1 * x);
    let poly = t
        * (0.254_829_592
            + t * (-0.284_496_736 + t * (1.421_413_741 + t * (-1.453_152_027 + t * 1.061_405_429))));
    sign * (1.0 - poly * (-x * x).exp())
}
