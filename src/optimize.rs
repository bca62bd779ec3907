/*!
Gradient-ascent search for the potential's mode.

Runs Adam ascent in unconstrained space from the highest-potential members of
an initial candidate pool, checkpointing the best point seen at a fixed
iteration interval. The loop is cooperative: a [`CancelToken`] flipped from
outside stops it at the next iteration boundary and the best checkpoint so far
is still returned, never an error.
*/

use ndarray::{Array1, Array2, ArrayView2};
use ndarray_stats::QuantileExt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::potential::GradientPotential;

const BETA1: f64 = 0.9;
const BETA2: f64 = 0.999;
const ADAM_EPS: f64 = 1e-8;

/// Cooperative cancellation flag for [`gradient_ascent`].
///
/// Clone it, hand one copy to the optimizer and flip the other from a signal
/// handler or another thread.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

/// Configuration of one ascent run.
#[derive(Debug, Clone)]
pub struct AscentConfig {
    /// Optimization steps per trajectory.
    pub num_iter: usize,
    /// How many of the highest-potential inits to optimize.
    pub num_to_optimize: usize,
    /// Adam learning rate.
    pub learning_rate: f64,
    /// Checkpoint the best point every this many iterations.
    pub save_best_every: usize,
}

impl Default for AscentConfig {
    fn default() -> Self {
        Self {
            num_iter: 1_000,
            num_to_optimize: 100,
            learning_rate: 0.01,
            save_best_every: 10,
        }
    }
}

/// Maximizes the potential from the best `num_to_optimize` rows of `inits`
/// (unconstrained space); returns the best point and its potential value.
pub fn gradient_ascent<P: GradientPotential>(
    potential: &P,
    inits: &ArrayView2<f64>,
    config: &AscentConfig,
    cancel: Option<&CancelToken>,
) -> (Array1<f64>, f64) {
    let dim = inits.ncols();
    let lp = potential.log_prob(inits);

    // Highest-potential candidates first.
    let mut order: Vec<usize> = (0..inits.nrows()).collect();
    order.sort_by(|&a, &b| lp[b].partial_cmp(&lp[a]).unwrap_or(std::cmp::Ordering::Equal));
    let keep = config.num_to_optimize.clamp(1, inits.nrows());

    let mut points = Array2::<f64>::zeros((keep, dim));
    for (k, &idx) in order.iter().take(keep).enumerate() {
        points.row_mut(k).assign(&inits.row(idx));
    }

    let mut best_point = points.row(0).to_owned();
    let mut best_lp = lp[order[0]];

    let mut m = Array2::<f64>::zeros((keep, dim));
    let mut v = Array2::<f64>::zeros((keep, dim));

    let save_best_every = config.save_best_every.max(1);
    for iter in 1..=config.num_iter {
        if cancel.is_some_and(|token| token.is_cancelled()) {
            break;
        }

        for k in 0..keep {
            let row = points.row(k).to_owned();
            let (_, grad) = potential.log_prob_grad(&row.view());
            let t = iter as f64;
            for j in 0..dim {
                m[[k, j]] = BETA1 * m[[k, j]] + (1.0 - BETA1) * grad[j];
                v[[k, j]] = BETA2 * v[[k, j]] + (1.0 - BETA2) * grad[j] * grad[j];
                let m_hat = m[[k, j]] / (1.0 - BETA1.powf(t));
                let v_hat = v[[k, j]] / (1.0 - BETA2.powf(t));
                points[[k, j]] += config.learning_rate * m_hat / (v_hat.sqrt() + ADAM_EPS);
            }
        }

        if iter % save_best_every == 0 {
            checkpoint(potential, &points, &mut best_point, &mut best_lp);
        }
    }

    checkpoint(potential, &points, &mut best_point, &mut best_lp);
    (best_point, best_lp)
}

fn checkpoint<P: GradientPotential>(
    potential: &P,
    points: &Array2<f64>,
    best_point: &mut Array1<f64>,
    best_lp: &mut f64,
) {
    let lps = potential.log_prob(&points.view());
    if let Ok(idx) = lps.argmax() {
        if lps[idx] > *best_lp {
            *best_lp = lps[idx];
            *best_point = points.row(idx).to_owned();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::potential::Potential;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, ArrayView1, ArrayView2};

    /// Concave quadratic with its mode at (1, -2).
    struct Quadratic;

    impl Potential for Quadratic {
        fn log_prob(&self, u: &ArrayView2<f64>) -> Array1<f64> {
            u.outer_iter()
                .map(|row| {
                    let dx = row[0] - 1.0;
                    let dy = row[1] + 2.0;
                    -(dx * dx + dy * dy)
                })
                .collect()
        }
    }

    impl GradientPotential for Quadratic {
        fn log_prob_grad(&self, u: &ArrayView1<f64>) -> (f64, Array1<f64>) {
            let dx = u[0] - 1.0;
            let dy = u[1] + 2.0;
            (-(dx * dx + dy * dy), array![-2.0 * dx, -2.0 * dy])
        }
    }

    #[test]
    fn converges_to_the_mode() {
        let potential = Quadratic;
        let inits = array![[4.0, 4.0], [-3.0, 0.0], [0.0, 0.0], [2.0, -1.0]];
        let config = AscentConfig {
            num_iter: 2_000,
            num_to_optimize: 4,
            learning_rate: 0.01,
            save_best_every: 10,
        };
        let (best, lp) = gradient_ascent(&potential, &inits.view(), &config, None);
        assert_abs_diff_eq!(best, array![1.0, -2.0], epsilon = 1e-2);
        assert!(lp > -1e-3);
    }

    #[test]
    fn cancellation_still_returns_the_best_checkpoint() {
        let potential = Quadratic;
        let inits = array![[4.0, 4.0], [0.5, -1.5]];
        let token = CancelToken::new();
        token.cancel();

        let config = AscentConfig::default();
        let (best, lp) = gradient_ascent(&potential, &inits.view(), &config, Some(&token));
        // No iteration ran; the best init is returned as-is.
        assert_abs_diff_eq!(best, array![0.5, -1.5], epsilon = 1e-12);
        assert!(lp.is_finite());
    }

    #[test]
    fn pool_selection_keeps_the_best_inits() {
        let potential = Quadratic;
        // Only the last row is anywhere near the mode.
        let inits = array![[50.0, 50.0], [-40.0, 10.0], [1.1, -2.1]];
        let config = AscentConfig {
            num_iter: 200,
            num_to_optimize: 1,
            learning_rate: 0.01,
            save_best_every: 5,
        };
        let (best, _) = gradient_ascent(&potential, &inits.view(), &config, None);
        assert_abs_diff_eq!(best, array![1.0, -2.0], epsilon = 1e-2);
    }
}
