/*!
Hamiltonian Monte Carlo kernel.

One [`HmcChain`] is a single chain driven by gradient-based proposals: sample a
standard-normal momentum, simulate Hamiltonian dynamics with the leapfrog
integrator for `n_leapfrog` steps of size `step_size`, then accept or reject
with the standard Metropolis test on the Hamiltonian difference. Gradients come
from the wrapped potential ([`GradientPotential`]), not from this crate.

Multi-chain execution and the thinning/warmup contract live in
[`crate::kernels`], which runs one `HmcChain` per chain in parallel.
*/

use ndarray::Array1;
use rand::prelude::*;
use rand_distr::StandardNormal;

use crate::core::MarkovChain;
use crate::potential::GradientPotential;

/// A single Hamiltonian Monte Carlo chain.
pub struct HmcChain<'a, P: GradientPotential> {
    potential: &'a P,
    position: Array1<f64>,
    /// The step size of the leapfrog integrator.
    pub step_size: f64,
    /// The number of leapfrog steps per proposal.
    pub n_leapfrog: usize,
    /// The chain-specific random seed.
    pub seed: u64,
    /// The random number generator for this chain.
    pub rng: SmallRng,
}

impl<'a, P: GradientPotential> HmcChain<'a, P> {
    pub fn new(
        potential: &'a P,
        initial: Array1<f64>,
        step_size: f64,
        n_leapfrog: usize,
    ) -> Self {
        let seed = thread_rng().gen::<u64>();
        Self {
            potential,
            position: initial,
            step_size,
            n_leapfrog,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        }
    }

    /// Reseeds the chain's RNG.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    /// Leapfrog trajectory from the current position with momentum `mom`;
    /// returns the proposed position, final momentum and final log-density.
    fn leapfrog(&mut self, mut mom: Array1<f64>) -> (Array1<f64>, Array1<f64>, f64) {
        let half = 0.5 * self.step_size;
        let mut pos = self.position.clone();
        let mut logp = f64::NEG_INFINITY;
        for _ in 0..self.n_leapfrog {
            let (_, grad) = self.potential.log_prob_grad(&pos.view());
            mom = mom + grad * half;
            pos = pos + &mom * self.step_size;
            let (logp2, grad2) = self.potential.log_prob_grad(&pos.view());
            mom = mom + grad2 * half;
            logp = logp2;
        }
        (pos, mom, logp)
    }
}

impl<P: GradientPotential> MarkovChain<f64> for HmcChain<'_, P> {
    /// One HMC update: momentum refresh, leapfrog proposal, Metropolis test.
    fn step(&mut self) -> &Array1<f64> {
        let dim = self.position.len();

        let mut momentum = Array1::<f64>::zeros(dim);
        for v in momentum.iter_mut() {
            *v = self.rng.sample(StandardNormal);
        }

        let (logp_current, _) = self.potential.log_prob_grad(&self.position.view());
        let ke_current = 0.5 * momentum.dot(&momentum);
        let h_current = -logp_current + ke_current;

        let (proposed, momentum_out, logp_proposed) = self.leapfrog(momentum);
        let ke_proposed = 0.5 * momentum_out.dot(&momentum_out);
        let h_proposed = -logp_proposed + ke_proposed;

        let accept_logp = h_current - h_proposed;
        let u: f64 = self.rng.gen();
        if accept_logp.is_finite() && accept_logp > u.ln() {
            self.position = proposed;
        }
        &self.position
    }

    fn current_state(&self) -> &Array1<f64> {
        &self.position
    }
}
