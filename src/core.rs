//! Chain plumbing shared by the sampling backends.

use indicatif::ProgressBar;
use ndarray::{Array1, Array2};
use num_traits::Float;
use rand::prelude::*;
use rand_distr::StandardNormal;

/// One Markov chain over a fixed-dimension state vector.
pub trait MarkovChain<S> {
    /// Does one transition of the chain, returning the new current state.
    fn step(&mut self) -> &Array1<S>;

    /// The current state without stepping.
    fn current_state(&self) -> &Array1<S>;
}

/// Runs a chain for `n_discard` warmup transitions followed by `n_collect`
/// recorded transitions, one row per recorded state.
pub fn run_chain<S, M>(chain: &mut M, n_collect: usize, n_discard: usize) -> Array2<S>
where
    M: MarkovChain<S>,
    S: Float,
{
    let dim = chain.current_state().len();
    let mut out = Array2::<S>::zeros((n_collect, dim));

    for _ in 0..n_discard {
        chain.step();
    }
    for i in 0..n_collect {
        let state = chain.step();
        out.row_mut(i).assign(state);
    }
    out
}

/// Same as [`run_chain`], updating a progress bar per recorded transition.
pub fn run_chain_with_progress<S, M>(
    chain: &mut M,
    n_collect: usize,
    n_discard: usize,
    pb: &ProgressBar,
) -> Array2<S>
where
    M: MarkovChain<S>,
    S: Float,
{
    let dim = chain.current_state().len();
    let mut out = Array2::<S>::zeros((n_collect, dim));

    pb.set_length(n_collect as u64);

    for _ in 0..n_discard {
        chain.step();
    }
    for i in 0..n_collect {
        let state = chain.step();
        out.row_mut(i).assign(state);
        pb.inc(1);
    }
    out
}

/// Standard-normal initial positions for `n_chains` chains in `dim`
/// dimensions; handy for unconditioned sampler runs and tests.
pub fn init<T>(n_chains: usize, dim: usize) -> Vec<Vec<T>>
where
    T: Float,
    StandardNormal: Distribution<T>,
{
    let mut rng = SmallRng::from_entropy();
    (0..n_chains)
        .map(|_| (0..dim).map(|_| rng.sample(StandardNormal)).collect())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Counter {
        state: Array1<f64>,
    }

    impl MarkovChain<f64> for Counter {
        fn step(&mut self) -> &Array1<f64> {
            self.state += 1.0;
            &self.state
        }

        fn current_state(&self) -> &Array1<f64> {
            &self.state
        }
    }

    #[test]
    fn run_chain_discards_warmup() {
        let mut chain = Counter {
            state: Array1::zeros(2),
        };
        let out = run_chain(&mut chain, 3, 2);
        assert_eq!(out.shape(), &[3, 2]);
        // Two warmup transitions happened first, so recording starts at 3.
        assert_eq!(out[[0, 0]], 3.0);
        assert_eq!(out[[2, 1]], 5.0);
    }

    #[test]
    fn init_has_requested_shape() {
        let positions = init::<f64>(4, 3);
        assert_eq!(positions.len(), 4);
        assert!(positions.iter().all(|p| p.len() == 3));
    }
}
