/*!
Vectorized slice sampler: all chains advance in lockstep.

Same transition semantics as the sequential engine in [`crate::slice`], but for
a fixed coordinate the bracketing runs simultaneously across every chain with
per-chain independent random draws: one batched potential call per step-out or
shrinkage iteration instead of one call per chain. Chains that already finished
a phase keep being evaluated until the slowest chain catches up; those wasted
evaluations are the price of batching, which pays off whenever the potential
(not control flow) dominates cost.

Parallelism here is purely data-parallel batching: there are no threads, and
correctness depends on the synchronized coordinate-by-coordinate progression.

Thinning and warmup are handled by the caller on the returned raw trajectory,
see [`crate::posterior`].
*/

use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, Array2, Array3, ArrayView2, Axis};
use rand::prelude::*;

use crate::potential::Potential;

const DEFAULT_INIT_WIDTH: f64 = 0.01;
const DEFAULT_TUNING: usize = 50;

/// Multi-chain slice sampler with batched density evaluations.
pub struct SliceSamplerVectorized<'a, P: Potential> {
    potential: &'a P,
    state: Array2<f64>,
    /// Per-chain, per-coordinate bracket widths.
    pub width: Array2<f64>,
    /// Initial bracket width before tuning.
    pub init_width: f64,
    /// Cap on how far a bracket end may step out from the current point.
    pub max_width: f64,
    /// Number of width-tuning sweeps before the first recorded step.
    pub tuning: usize,
    tuned: bool,
    /// The global random seed.
    pub seed: u64,
    /// A single RNG drives all chains; per-chain draws are taken in chain
    /// order within each lockstep phase.
    pub rng: SmallRng,
}

impl<'a, P: Potential> SliceSamplerVectorized<'a, P> {
    /// Creates the sampler from one initial unconstrained vector per row.
    pub fn new(potential: &'a P, initial_params: &ArrayView2<f64>) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            potential,
            state: initial_params.to_owned(),
            width: Array2::from_elem(initial_params.dim(), DEFAULT_INIT_WIDTH),
            init_width: DEFAULT_INIT_WIDTH,
            max_width: f64::INFINITY,
            tuning: DEFAULT_TUNING,
            tuned: false,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Reseeds the sampler's RNG.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Current per-chain states, one row per chain.
    pub fn states(&self) -> &Array2<f64> {
        &self.state
    }

    /// Batched conditional evaluation: every chain's state with coordinate
    /// `i` replaced by its candidate value.
    fn eval_with_coord(&self, i: usize, values: &Array1<f64>) -> Array1<f64> {
        let mut points = self.state.clone();
        points.index_axis_mut(Axis(1), i).assign(values);
        self.potential.log_prob(&points.view())
    }

    /// Lockstep slice update of coordinate `i` across all chains; returns the
    /// per-chain bracket widths left after shrinkage.
    fn update_coord(&mut self, i: usize) -> Array1<f64> {
        let n_chains = self.state.nrows();
        let cxi = self.state.index_axis(Axis(1), i).to_owned();
        let wi = self.width.index_axis(Axis(1), i).to_owned();

        // Auxiliary heights, one batched call for all chains.
        let logp0 = self.potential.log_prob(&self.state.view());
        let mut logu = Array1::<f64>::zeros(n_chains);
        for c in 0..n_chains {
            logu[c] = logp0[c] + (1.0 - self.rng.gen::<f64>()).ln();
        }

        // Random initial bracket placement per chain.
        let mut lx = Array1::<f64>::zeros(n_chains);
        let mut ux = Array1::<f64>::zeros(n_chains);
        for c in 0..n_chains {
            lx[c] = cxi[c] - wi[c] * self.rng.gen::<f64>();
            ux[c] = lx[c] + wi[c];
        }

        // Step out the lower ends. A chain stops expanding the first time its
        // end leaves the slice or hits the width cap; the batch keeps being
        // evaluated until every chain has stopped.
        let mut expanding = vec![true; n_chains];
        loop {
            let lp = self.eval_with_coord(i, &lx);
            let mut any = false;
            for c in 0..n_chains {
                if !expanding[c] {
                    continue;
                }
                if lp[c] >= logu[c] && cxi[c] - lx[c] < self.max_width {
                    lx[c] -= wi[c];
                    any = true;
                } else {
                    expanding[c] = false;
                }
            }
            if !any {
                break;
            }
        }

        // Step out the upper ends.
        let mut expanding = vec![true; n_chains];
        loop {
            let lp = self.eval_with_coord(i, &ux);
            let mut any = false;
            for c in 0..n_chains {
                if !expanding[c] {
                    continue;
                }
                if lp[c] >= logu[c] && ux[c] - cxi[c] < self.max_width {
                    ux[c] += wi[c];
                    any = true;
                } else {
                    expanding[c] = false;
                }
            }
            if !any {
                break;
            }
        }

        // Shrinkage, batched until the last chain accepts.
        let mut xi = Array1::<f64>::zeros(n_chains);
        for c in 0..n_chains {
            xi[c] = lx[c] + (ux[c] - lx[c]) * self.rng.gen::<f64>();
        }
        let mut accepted = vec![false; n_chains];
        loop {
            let lp = self.eval_with_coord(i, &xi);
            let mut all = true;
            for c in 0..n_chains {
                if accepted[c] {
                    continue;
                }
                if lp[c] >= logu[c] {
                    accepted[c] = true;
                    self.state[[c, i]] = xi[c];
                } else {
                    if xi[c] < cxi[c] {
                        lx[c] = xi[c];
                    } else {
                        ux[c] = xi[c];
                    }
                    xi[c] = lx[c] + (ux[c] - lx[c]) * self.rng.gen::<f64>();
                    all = false;
                }
            }
            if all {
                break;
            }
        }

        &ux - &lx
    }

    /// One lockstep transition: every coordinate updated once, in an order
    /// shuffled per sweep and shared by all chains.
    fn sweep(&mut self, tune_step: Option<usize>) {
        let dim = self.state.ncols();
        let mut order: Vec<usize> = (0..dim).collect();
        order.shuffle(&mut self.rng);
        for i in order {
            let brackets = self.update_coord(i);
            if let Some(n) = tune_step {
                for c in 0..self.state.nrows() {
                    self.width[[c, i]] += (brackets[c] - self.width[[c, i]]) / (n + 1) as f64;
                }
            }
        }
    }

    fn tune_bracket_width(&mut self) {
        self.width.fill(self.init_width);
        for n in 0..self.tuning {
            self.sweep(Some(n));
        }
        self.tuned = true;
    }

    /// Runs `n_steps` lockstep transitions and returns the raw trajectory as
    /// a `chains x n_steps x dim` buffer. The first call runs the
    /// width-tuning sweeps beforehand.
    pub fn run(&mut self, n_steps: usize) -> Array3<f64> {
        if !self.tuned {
            self.tune_bracket_width();
        }
        let (n_chains, dim) = self.state.dim();
        let mut out = Array3::<f64>::zeros((n_chains, n_steps, dim));
        for t in 0..n_steps {
            self.sweep(None);
            out.slice_mut(ndarray::s![.., t, ..]).assign(&self.state);
        }
        out
    }

    /// Same as [`SliceSamplerVectorized::run`] with a progress bar over steps.
    pub fn run_progress(&mut self, n_steps: usize) -> Array3<f64> {
        if !self.tuned {
            self.tune_bracket_width();
        }
        let (n_chains, dim) = self.state.dim();
        let mut out = Array3::<f64>::zeros((n_chains, n_steps, dim));

        let pb = ProgressBar::new(n_steps as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template("{prefix:8} {bar:40.white} ETA {eta:3}")
                .unwrap()
                .progress_chars("=>-"),
        );
        pb.set_prefix("Slice");

        for t in 0..n_steps {
            self.sweep(None);
            out.slice_mut(ndarray::s![.., t, ..]).assign(&self.state);
            pb.inc(1);
        }
        pb.finish_with_message("Done!");
        out
    }
}
