/*!
Adapter driving the gradient-based kernels under a uniform chain contract.

The kernel set is closed: a slice kernel (gradient-free, one coordinate sweep
per transition), HMC and NUTS. The adapter requests
`(thin * num_samples) / num_chains + num_chains` post-warmup draws per chain,
over-provisioning so that enough draws survive thinning and multi-chain
interleaving. It then runs the chains in parallel, flattens chain-major, keeps
every `thin`-th row and truncates to exactly `num_samples`.

Chains fan out over rayon workers when `num_chains > 1`. A panicking chain
aborts the whole call; no partial results are ever returned.
*/

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use ndarray::{s, Array2, Array3, ArrayView2, Axis};
use rayon::prelude::*;

use crate::core::{run_chain, run_chain_with_progress, MarkovChain};
use crate::hmc::HmcChain;
use crate::nuts::NutsChain;
use crate::potential::GradientPotential;
use crate::slice::SliceChain;

/// Which kernel the adapter drives.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum KernelKind {
    /// Coordinate-wise slice transitions, no gradients.
    Slice,
    /// Hamiltonian Monte Carlo with fixed leapfrog settings.
    Hmc { step_size: f64, n_leapfrog: usize },
    /// No-U-Turn sampler; the step size adapts during warmup.
    Nuts { target_accept: f64 },
}

/// The per-chain stepper, closed over the kernel set.
pub enum KernelChain<'a, P: GradientPotential> {
    Slice(SliceChain<'a, P>),
    Hmc(HmcChain<'a, P>),
    Nuts(NutsChain<'a, P>),
}

impl<P: GradientPotential> MarkovChain<f64> for KernelChain<'_, P> {
    fn step(&mut self) -> &ndarray::Array1<f64> {
        match self {
            KernelChain::Slice(chain) => chain.step(),
            KernelChain::Hmc(chain) => chain.step(),
            KernelChain::Nuts(chain) => chain.step(),
        }
    }

    fn current_state(&self) -> &ndarray::Array1<f64> {
        match self {
            KernelChain::Slice(chain) => chain.current_state(),
            KernelChain::Hmc(chain) => chain.current_state(),
            KernelChain::Nuts(chain) => chain.current_state(),
        }
    }
}

/// Output of one adapter run.
pub struct KernelRun {
    /// Exactly `num_samples` unconstrained draws, thinned and truncated.
    pub samples: Array2<f64>,
    /// Last post-warmup state of every chain, one row per chain.
    pub final_states: Array2<f64>,
}

fn build_chain<'a, P: GradientPotential>(
    kind: KernelKind,
    potential: &'a P,
    initial: ndarray::Array1<f64>,
    warmup_steps: usize,
    chain_seed: u64,
) -> KernelChain<'a, P> {
    match kind {
        KernelKind::Slice => {
            KernelChain::Slice(SliceChain::new(potential, &initial.view()).set_seed(chain_seed))
        }
        KernelKind::Hmc {
            step_size,
            n_leapfrog,
        } => KernelChain::Hmc(
            HmcChain::new(potential, initial, step_size, n_leapfrog).set_seed(chain_seed),
        ),
        KernelKind::Nuts { target_accept } => KernelChain::Nuts(
            NutsChain::new(potential, initial, target_accept, warmup_steps).set_seed(chain_seed),
        ),
    }
}

/// Draws requested per chain for the over-provisioning contract.
fn draws_per_chain(num_samples: usize, thin: usize, num_chains: usize) -> usize {
    ((thin * num_samples) / num_chains + num_chains).max(1)
}

fn collect_run(
    per_chain: Vec<Array2<f64>>,
    num_samples: usize,
    thin: usize,
) -> KernelRun {
    let num_chains = per_chain.len();
    let n_draws = per_chain[0].nrows();
    let dim = per_chain[0].ncols();

    let mut buffer = Array3::<f64>::zeros((num_chains, n_draws, dim));
    for (c, draws) in per_chain.into_iter().enumerate() {
        buffer.index_axis_mut(Axis(0), c).assign(&draws);
    }

    let mut final_states = Array2::<f64>::zeros((num_chains, dim));
    for c in 0..num_chains {
        final_states
            .row_mut(c)
            .assign(&buffer.index_axis(Axis(0), c).row(n_draws - 1));
    }

    let flat = buffer
        .into_shape_with_order((num_chains * n_draws, dim))
        .expect("chain buffer is contiguous");
    let step = thin as isize;
    let thinned = flat.slice(s![..;step, ..]);
    let samples = thinned.slice(s![..num_samples, ..]).to_owned();
    assert_eq!(
        samples.nrows(),
        num_samples,
        "kernel adapter produced a wrong sample count after thinning"
    );

    KernelRun {
        samples,
        final_states,
    }
}

/// Runs the requested kernel over all chains and applies the thinning and
/// truncation contract.
pub fn run_kernel<P>(
    kind: KernelKind,
    potential: &P,
    initial_params: &ArrayView2<f64>,
    num_samples: usize,
    thin: usize,
    warmup_steps: usize,
    seed: u64,
) -> KernelRun
where
    P: GradientPotential + Sync,
{
    let num_chains = initial_params.nrows();
    let n_draws = draws_per_chain(num_samples, thin, num_chains);

    let per_chain: Vec<Array2<f64>> = (0..num_chains)
        .into_par_iter()
        .map(|c| {
            let initial = initial_params.row(c).to_owned();
            let mut chain = build_chain(kind, potential, initial, warmup_steps, seed + c as u64);
            run_chain(&mut chain, n_draws, warmup_steps)
        })
        .collect();

    collect_run(per_chain, num_samples, thin)
}

/// Same as [`run_kernel`] with one progress bar per chain.
pub fn run_kernel_progress<P>(
    kind: KernelKind,
    potential: &P,
    initial_params: &ArrayView2<f64>,
    num_samples: usize,
    thin: usize,
    warmup_steps: usize,
    seed: u64,
) -> KernelRun
where
    P: GradientPotential + Sync,
{
    let num_chains = initial_params.nrows();
    let n_draws = draws_per_chain(num_samples, thin, num_chains);

    let multi = MultiProgress::new();
    let pb_style = ProgressStyle::default_bar()
        .template("{prefix:8} [{elapsed_precise}] {bar:40.white} {pos}/{len}")
        .unwrap()
        .progress_chars("=>-");

    let per_chain: Vec<Array2<f64>> = (0..num_chains)
        .into_par_iter()
        .map(|c| {
            let pb = multi.add(ProgressBar::new(n_draws as u64));
            pb.set_prefix(format!("Chain {c}"));
            pb.set_style(pb_style.clone());

            let initial = initial_params.row(c).to_owned();
            let mut chain = build_chain(kind, potential, initial, warmup_steps, seed + c as u64);
            let draws = run_chain_with_progress(&mut chain, n_draws, warmup_steps, &pb);
            pb.finish_with_message("Done!");
            draws
        })
        .collect();

    collect_run(per_chain, num_samples, thin)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::potential::Potential;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, Array1, ArrayView1, ArrayView2, Axis};

    struct StdNormal;

    impl Potential for StdNormal {
        fn log_prob(&self, u: &ArrayView2<f64>) -> Array1<f64> {
            u.outer_iter().map(|row| -0.5 * row.dot(&row)).collect()
        }
    }

    impl GradientPotential for StdNormal {
        fn log_prob_grad(&self, u: &ArrayView1<f64>) -> (f64, Array1<f64>) {
            (-0.5 * u.dot(u), -u.to_owned())
        }
    }

    #[test]
    fn sample_count_is_exact_for_all_kernels() {
        let potential = StdNormal;
        let initial = array![[0.0, 0.0], [1.0, -1.0], [0.5, 0.5]];
        let kinds = [
            KernelKind::Slice,
            KernelKind::Hmc {
                step_size: 0.2,
                n_leapfrog: 5,
            },
            KernelKind::Nuts { target_accept: 0.8 },
        ];
        for kind in kinds {
            for (num_samples, thin) in [(17, 1), (50, 3), (101, 2)] {
                let run = run_kernel(kind, &potential, &initial.view(), num_samples, thin, 10, 42);
                assert_eq!(run.samples.dim(), (num_samples, 2));
                assert_eq!(run.final_states.dim(), (3, 2));
            }
        }
    }

    #[test]
    fn single_chain_counts_hold() {
        let potential = StdNormal;
        let initial = array![[0.0, 0.0]];
        let run = run_kernel(KernelKind::Slice, &potential, &initial.view(), 25, 4, 5, 1);
        assert_eq!(run.samples.dim(), (25, 2));
    }

    #[test]
    fn hmc_kernel_recovers_moments() {
        let potential = StdNormal;
        let initial = array![[2.0, -2.0], [-2.0, 2.0], [1.0, 1.0], [0.0, 0.0]];
        let kind = KernelKind::Hmc {
            step_size: 0.2,
            n_leapfrog: 10,
        };
        let run = run_kernel(kind, &potential, &initial.view(), 4_000, 2, 200, 42);

        let mean = run.samples.mean_axis(Axis(0)).unwrap();
        let var = run.samples.var_axis(Axis(0), 1.0);
        assert_abs_diff_eq!(mean, array![0.0, 0.0], epsilon = 0.12);
        assert_abs_diff_eq!(var, array![1.0, 1.0], epsilon = 0.25);
    }
}
