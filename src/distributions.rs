/*!
Prior distributions and reference potential models.

The [`Prior`] trait is the interface the sampler consumes: drawing candidate
parameters, scoring them, and describing the support that drives the
constrained/unconstrained transform. `BoxUniform` and `DiagGaussian` cover the
two common cases (bounded box, unbounded product of normals). `Gaussian2D` and
`GaussianLikelihood` are closed-form potential models used throughout the test
suite and as templates for plugging in real surrogates.

# Examples

```rust
use ndarray::array;
use posterior_mcmc::distributions::{BoxUniform, Prior};
use rand::{rngs::SmallRng, SeedableRng};

let prior = BoxUniform::new(array![-1.0, 0.0], array![1.0, 2.0]).unwrap();
let mut rng = SmallRng::seed_from_u64(7);
let draws = prior.sample(100, &mut rng);
assert_eq!(draws.dim(), (100, 2));
assert!(prior.within_support(&draws.view()).iter().all(|&ok| ok));
```
*/

use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use rand::rngs::SmallRng;
use rand::Rng;
use rand_distr::{Distribution, Normal};
use std::f64::consts::PI;

use crate::errors::McmcError;
use crate::potential::{GradientModel, PotentialModel};
use crate::transform::Support;

/// A prior distribution over the parameter vector.
///
/// Used to initialize chains, weight SIR candidates, and derive the transform
/// to unconstrained space.
pub trait Prior {
    fn dim(&self) -> usize;

    /// Draws `n` parameter vectors, one per row.
    fn sample(&self, n: usize, rng: &mut SmallRng) -> Array2<f64>;

    /// Log-density of each row of `theta`.
    fn log_prob(&self, theta: &ArrayView2<f64>) -> Array1<f64>;

    /// Per-coordinate support, used to construct the MCMC transform.
    fn support(&self) -> Vec<Support>;

    /// Support-membership predicate for each row of `theta`.
    fn within_support(&self, theta: &ArrayView2<f64>) -> Vec<bool> {
        let supports = self.support();
        theta
            .outer_iter()
            .map(|row| {
                row.iter()
                    .zip(supports.iter())
                    .all(|(&x, support)| support.contains(x))
            })
            .collect()
    }
}

/// Uniform distribution over an axis-aligned box.
#[derive(Debug, Clone, PartialEq)]
pub struct BoxUniform {
    pub low: Array1<f64>,
    pub high: Array1<f64>,
    log_volume: f64,
}

impl BoxUniform {
    /// Creates a box-uniform prior; fails unless `low < high` coordinate-wise.
    pub fn new(low: Array1<f64>, high: Array1<f64>) -> Result<Self, McmcError> {
        if low.len() != high.len() {
            return Err(McmcError::InvalidConfig(format!(
                "box bounds have lengths {} and {}",
                low.len(),
                high.len()
            )));
        }
        if low
            .iter()
            .zip(high.iter())
            .any(|(&a, &b)| !a.is_finite() || !b.is_finite() || a >= b)
        {
            return Err(McmcError::InvalidConfig(
                "box bounds must be finite with low < high".into(),
            ));
        }
        let log_volume = low
            .iter()
            .zip(high.iter())
            .map(|(&a, &b)| (b - a).ln())
            .sum();
        Ok(Self {
            low,
            high,
            log_volume,
        })
    }
}

impl Prior for BoxUniform {
    fn dim(&self) -> usize {
        self.low.len()
    }

    fn sample(&self, n: usize, rng: &mut SmallRng) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((n, self.dim()));
        for mut row in out.outer_iter_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                *v = rng.gen_range(self.low[j]..self.high[j]);
            }
        }
        out
    }

    fn log_prob(&self, theta: &ArrayView2<f64>) -> Array1<f64> {
        let inside = self.within_support(theta);
        inside
            .iter()
            .map(|&ok| if ok { -self.log_volume } else { f64::NEG_INFINITY })
            .collect()
    }

    fn support(&self) -> Vec<Support> {
        self.low
            .iter()
            .zip(self.high.iter())
            .map(|(&low, &high)| Support::Bounded { low, high })
            .collect()
    }
}

/// Product of independent normals; an unbounded prior.
#[derive(Debug, Clone, PartialEq)]
pub struct DiagGaussian {
    pub mean: Array1<f64>,
    pub std: Array1<f64>,
}

impl DiagGaussian {
    pub fn new(mean: Array1<f64>, std: Array1<f64>) -> Result<Self, McmcError> {
        if mean.len() != std.len() {
            return Err(McmcError::InvalidConfig(format!(
                "mean and std have lengths {} and {}",
                mean.len(),
                std.len()
            )));
        }
        if std.iter().any(|&s| !(s > 0.0)) {
            return Err(McmcError::InvalidConfig(
                "standard deviations must be positive".into(),
            ));
        }
        Ok(Self { mean, std })
    }
}

impl Prior for DiagGaussian {
    fn dim(&self) -> usize {
        self.mean.len()
    }

    fn sample(&self, n: usize, rng: &mut SmallRng) -> Array2<f64> {
        let mut out = Array2::<f64>::zeros((n, self.dim()));
        for mut row in out.outer_iter_mut() {
            for (j, v) in row.iter_mut().enumerate() {
                let normal = Normal::new(self.mean[j], self.std[j])
                    .expect("positive std checked at construction");
                *v = normal.sample(rng);
            }
        }
        out
    }

    fn log_prob(&self, theta: &ArrayView2<f64>) -> Array1<f64> {
        theta
            .outer_iter()
            .map(|row| {
                let mut lp = 0.0;
                for j in 0..row.len() {
                    let z = (row[j] - self.mean[j]) / self.std[j];
                    lp += -0.5 * z * z - self.std[j].ln() - 0.5 * (2.0 * PI).ln();
                }
                lp
            })
            .collect()
    }

    fn support(&self) -> Vec<Support> {
        vec![Support::Unbounded; self.dim()]
    }
}

/// A 2D Gaussian potential with full covariance.
///
/// The conditioning observation is ignored; this is an unconditioned target
/// for demos and tests.
#[derive(Debug, Clone, PartialEq)]
pub struct Gaussian2D {
    pub mean: Array1<f64>,
    pub cov: Array2<f64>,
}

impl Gaussian2D {
    /// Inverse covariance via the closed-form 2x2 inverse.
    fn inv_cov(&self) -> (f64, f64, f64, f64) {
        let (a, b, c, d) = (
            self.cov[[0, 0]],
            self.cov[[0, 1]],
            self.cov[[1, 0]],
            self.cov[[1, 1]],
        );
        let det = a * d - b * c;
        (d / det, -b / det, -c / det, a / det)
    }
}

impl PotentialModel for Gaussian2D {
    fn log_prob(&self, theta: &ArrayView2<f64>, _x: &ArrayView1<f64>) -> Array1<f64> {
        let (ia, ib, ic, id) = self.inv_cov();
        theta
            .outer_iter()
            .map(|row| {
                let dx = row[0] - self.mean[0];
                let dy = row[1] - self.mean[1];
                -0.5 * (dx * (ia * dx + ib * dy) + dy * (ic * dx + id * dy))
            })
            .collect()
    }
}

impl GradientModel for Gaussian2D {
    fn log_prob_grad(&self, theta: &ArrayView1<f64>, _x: &ArrayView1<f64>) -> (f64, Array1<f64>) {
        let (ia, ib, ic, id) = self.inv_cov();
        let dx = theta[0] - self.mean[0];
        let dy = theta[1] - self.mean[1];
        let gx = ia * dx + ib * dy;
        let gy = ic * dx + id * dy;
        let lp = -0.5 * (dx * gx + dy * gy);
        (lp, Array1::from(vec![-gx, -gy]))
    }
}

/// Gaussian observation likelihood `log N(x | theta, obs_std^2 I)`.
///
/// The posterior over `theta` given a single observation and a broad prior
/// concentrates on the observation itself, which makes this the workhorse of
/// the end-to-end tests.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianLikelihood {
    pub obs_std: f64,
}

impl GaussianLikelihood {
    pub fn new(obs_std: f64) -> Self {
        Self { obs_std }
    }
}

impl PotentialModel for GaussianLikelihood {
    fn log_prob(&self, theta: &ArrayView2<f64>, x: &ArrayView1<f64>) -> Array1<f64> {
        let var = self.obs_std * self.obs_std;
        let norm = -(x.len() as f64) * (self.obs_std.ln() + 0.5 * (2.0 * PI).ln());
        theta
            .outer_iter()
            .map(|row| {
                let mut quad = 0.0;
                for (t, o) in row.iter().zip(x.iter()) {
                    let diff = o - t;
                    quad += diff * diff;
                }
                norm - 0.5 * quad / var
            })
            .collect()
    }
}

impl GradientModel for GaussianLikelihood {
    fn log_prob_grad(&self, theta: &ArrayView1<f64>, x: &ArrayView1<f64>) -> (f64, Array1<f64>) {
        let var = self.obs_std * self.obs_std;
        let norm = -(x.len() as f64) * (self.obs_std.ln() + 0.5 * (2.0 * PI).ln());
        let mut quad = 0.0;
        let mut grad = Array1::<f64>::zeros(theta.len());
        for j in 0..theta.len() {
            let diff = x[j] - theta[j];
            quad += diff * diff;
            grad[j] = diff / var;
        }
        (norm - 0.5 * quad / var, grad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Axis};
    use rand::SeedableRng;

    #[test]
    fn box_uniform_masks_outside_points() {
        let prior = BoxUniform::new(array![0.0, 0.0], array![1.0, 2.0]).unwrap();
        let theta = array![[0.5, 1.0], [1.5, 1.0]];
        let lp = prior.log_prob(&theta.view());
        assert_abs_diff_eq!(lp[0], -(2.0f64.ln()), epsilon = 1e-12);
        assert_eq!(lp[1], f64::NEG_INFINITY);
        assert_eq!(prior.within_support(&theta.view()), vec![true, false]);
    }

    #[test]
    fn box_uniform_rejects_bad_bounds() {
        assert!(BoxUniform::new(array![0.0], array![0.0]).is_err());
        assert!(BoxUniform::new(array![0.0, 1.0], array![1.0]).is_err());
    }

    #[test]
    fn diag_gaussian_matches_known_density() {
        let prior = DiagGaussian::new(array![0.0], array![1.0]).unwrap();
        let lp = prior.log_prob(&array![[0.0]].view());
        assert_abs_diff_eq!(lp[0], -0.5 * (2.0 * PI).ln(), epsilon = 1e-12);
    }

    #[test]
    fn gaussian2d_gradient_matches_finite_differences() {
        let target = Gaussian2D {
            mean: array![0.0, 1.0],
            cov: array![[4.0, 2.0], [2.0, 3.0]],
        };
        let x = Array1::<f64>::zeros(0);
        let theta = array![0.7, -0.3];
        let (lp, grad) = target.log_prob_grad(&theta.view(), &x.view());

        let eps = 1e-6;
        for j in 0..2 {
            let mut hi = theta.clone();
            let mut lo = theta.clone();
            hi[j] += eps;
            lo[j] -= eps;
            let lph = target.log_prob(&hi.insert_axis(Axis(0)).view(), &x.view())[0];
            let lpl = target.log_prob(&lo.insert_axis(Axis(0)).view(), &x.view())[0];
            assert_abs_diff_eq!(grad[j], (lph - lpl) / (2.0 * eps), epsilon = 1e-5);
        }
        let lp_batch = target.log_prob(&theta.clone().insert_axis(Axis(0)).view(), &x.view())[0];
        assert_abs_diff_eq!(lp, lp_batch, epsilon = 1e-12);
    }

    #[test]
    fn likelihood_peaks_at_observation() {
        let model = GaussianLikelihood::new(1.0);
        let x = array![0.4, -1.2];
        let theta = array![[0.4, -1.2], [0.0, 0.0]];
        let lp = model.log_prob(&theta.view(), &x.view());
        assert!(lp[0] > lp[1]);
        let (_, grad) = model.log_prob_grad(&theta.index_axis(Axis(0), 0), &x.view());
        assert_abs_diff_eq!(grad[0], 0.0, epsilon = 1e-12);
        assert_abs_diff_eq!(grad[1], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn prior_draws_land_in_support() {
        let prior = BoxUniform::new(array![-3.0, 2.0], array![-1.0, 4.0]).unwrap();
        let mut rng = SmallRng::seed_from_u64(42);
        let draws = prior.sample(500, &mut rng);
        assert!(prior.within_support(&draws.view()).iter().all(|&ok| ok));
    }
}
