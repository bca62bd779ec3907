/*!
No-U-Turn Sampler (NUTS) kernel.

One [`NutsChain`] is a single chain with dynamic trajectory lengths: each
transition doubles a leapfrog trajectory backwards or forwards until the path
starts to turn back on itself, then samples a state from the built tree. The
step size is searched at the first transition and adapted by dual averaging
over the warmup transitions, targeting `target_accept`.

The tree construction follows the classic recursive formulation (Hoffman &
Gelman; the widely used mfouesneau arrangement) with an identity metric.
Multi-chain execution and the thinning/warmup contract live in
[`crate::kernels`].
*/

use ndarray::Array1;
use rand::prelude::*;
use rand_distr::{Exp1, StandardNormal};

use crate::core::MarkovChain;
use crate::potential::GradientPotential;

// Dual-averaging constants from Hoffman & Gelman (2014).
const GAMMA: f64 = 0.05;
const T0: f64 = 10.0;
const KAPPA: f64 = 0.75;

/// One leapfrog step; returns `(theta', r', grad', logp')`.
fn leapfrog<P: GradientPotential>(
    potential: &P,
    theta: &Array1<f64>,
    r: &Array1<f64>,
    grad: &Array1<f64>,
    epsilon: f64,
) -> (Array1<f64>, Array1<f64>, Array1<f64>, f64) {
    let r_half = r + &(grad * (0.5 * epsilon));
    let theta_prime = theta + &(&r_half * epsilon);
    let (logp_prime, grad_prime) = potential.log_prob_grad(&theta_prime.view());
    let r_prime = &r_half + &(&grad_prime * (0.5 * epsilon));
    (theta_prime, r_prime, grad_prime, logp_prime)
}

/// Trajectory keeps extending while both ends still move away from each other.
fn no_u_turn(
    theta_minus: &Array1<f64>,
    theta_plus: &Array1<f64>,
    r_minus: &Array1<f64>,
    r_plus: &Array1<f64>,
) -> bool {
    let delta = theta_plus - theta_minus;
    delta.dot(r_minus) >= 0.0 && delta.dot(r_plus) >= 0.0
}

struct Tree {
    theta_minus: Array1<f64>,
    r_minus: Array1<f64>,
    grad_minus: Array1<f64>,
    theta_plus: Array1<f64>,
    r_plus: Array1<f64>,
    grad_plus: Array1<f64>,
    theta_prime: Array1<f64>,
    grad_prime: Array1<f64>,
    logp_prime: f64,
    n_prime: f64,
    s_prime: bool,
    alpha: f64,
    n_alpha: f64,
}

#[allow(clippy::too_many_arguments)]
fn build_tree<P: GradientPotential>(
    potential: &P,
    theta: &Array1<f64>,
    r: &Array1<f64>,
    grad: &Array1<f64>,
    logu: f64,
    v: i8,
    j: usize,
    epsilon: f64,
    joint0: f64,
    rng: &mut SmallRng,
) -> Tree {
    if j == 0 {
        // Base case: a single leapfrog step in direction v.
        let (theta_p, r_p, grad_p, logp_p) =
            leapfrog(potential, theta, r, grad, f64::from(v) * epsilon);
        let joint = logp_p - 0.5 * r_p.dot(&r_p);
        let n_prime = if logu <= joint { 1.0 } else { 0.0 };
        let s_prime = logu - 1000.0 < joint;
        let mut alpha = (joint - joint0).exp().min(1.0);
        if !alpha.is_finite() {
            alpha = 0.0;
        }
        return Tree {
            theta_minus: theta_p.clone(),
            r_minus: r_p.clone(),
            grad_minus: grad_p.clone(),
            theta_plus: theta_p.clone(),
            r_plus: r_p,
            grad_plus: grad_p.clone(),
            theta_prime: theta_p,
            grad_prime: grad_p,
            logp_prime: logp_p,
            n_prime,
            s_prime,
            alpha,
            n_alpha: 1.0,
        };
    }

    // Recursion: build the left and right subtrees.
    let mut tree = build_tree(potential, theta, r, grad, logu, v, j - 1, epsilon, joint0, rng);
    if tree.s_prime {
        let sub = if v == -1 {
            build_tree(
                potential,
                &tree.theta_minus,
                &tree.r_minus,
                &tree.grad_minus,
                logu,
                v,
                j - 1,
                epsilon,
                joint0,
                rng,
            )
        } else {
            build_tree(
                potential,
                &tree.theta_plus,
                &tree.r_plus,
                &tree.grad_plus,
                logu,
                v,
                j - 1,
                epsilon,
                joint0,
                rng,
            )
        };
        if v == -1 {
            tree.theta_minus = sub.theta_minus;
            tree.r_minus = sub.r_minus;
            tree.grad_minus = sub.grad_minus;
        } else {
            tree.theta_plus = sub.theta_plus;
            tree.r_plus = sub.r_plus;
            tree.grad_plus = sub.grad_plus;
        }

        let total = tree.n_prime + sub.n_prime;
        if sub.n_prime > 0.0 && rng.gen::<f64>() < sub.n_prime / total.max(1.0) {
            tree.theta_prime = sub.theta_prime;
            tree.grad_prime = sub.grad_prime;
            tree.logp_prime = sub.logp_prime;
        }
        tree.n_prime = total;
        tree.s_prime = sub.s_prime
            && no_u_turn(
                &tree.theta_minus,
                &tree.theta_plus,
                &tree.r_minus,
                &tree.r_plus,
            );
        tree.alpha += sub.alpha;
        tree.n_alpha += sub.n_alpha;
    }
    tree
}

/// Heuristic initial step size: double or halve until the one-step acceptance
/// probability crosses 1/2.
fn find_reasonable_epsilon<P: GradientPotential>(
    potential: &P,
    theta: &Array1<f64>,
    grad: &Array1<f64>,
    logp: f64,
    rng: &mut SmallRng,
) -> f64 {
    let mut epsilon = 1.0;
    let mut r0 = Array1::<f64>::zeros(theta.len());
    for v in r0.iter_mut() {
        *v = rng.sample(StandardNormal);
    }

    let (_, mut r_prime, _, mut logp_prime) = leapfrog(potential, theta, &r0, grad, epsilon);
    let mut k = 1.0;
    while !logp_prime.is_finite() || r_prime.iter().any(|v| !v.is_finite()) {
        k *= 0.5;
        let out = leapfrog(potential, theta, &r0, grad, epsilon * k);
        r_prime = out.1;
        logp_prime = out.3;
    }
    epsilon = 0.5 * k * epsilon;

    let mut log_accept = logp_prime - logp - 0.5 * (r_prime.dot(&r_prime) - r0.dot(&r0));
    let a: f64 = if log_accept > 0.5f64.ln() { 1.0 } else { -1.0 };
    for _ in 0..100 {
        if a * log_accept <= -a * 2.0f64.ln() {
            break;
        }
        epsilon *= 2.0f64.powf(a);
        let out = leapfrog(potential, theta, &r0, grad, epsilon);
        log_accept = out.3 - logp - 0.5 * (out.1.dot(&out.1) - r0.dot(&r0));
    }
    epsilon
}

/// A single No-U-Turn chain with dual-averaging step-size adaptation.
pub struct NutsChain<'a, P: GradientPotential> {
    potential: &'a P,
    position: Array1<f64>,
    grad: Array1<f64>,
    logp: f64,
    /// Desired average acceptance probability (0.6 to 0.95 are sensible).
    pub target_accept: f64,
    /// Cap on tree doublings per transition.
    pub max_depth: usize,
    epsilon: f64,
    mu: f64,
    eps_bar: f64,
    h_bar: f64,
    m: u64,
    n_adapt: u64,
    initialized: bool,
    /// The chain-specific random seed.
    pub seed: u64,
    /// The random number generator for this chain.
    pub rng: SmallRng,
}

impl<'a, P: GradientPotential> NutsChain<'a, P> {
    /// Creates a chain that adapts its step size over the first `n_adapt`
    /// transitions (the warmup length).
    pub fn new(potential: &'a P, initial: Array1<f64>, target_accept: f64, n_adapt: usize) -> Self {
        let (logp, grad) = potential.log_prob_grad(&initial.view());
        let seed = thread_rng().gen::<u64>();
        Self {
            potential,
            position: initial,
            grad,
            logp,
            target_accept,
            max_depth: 10,
            epsilon: 1.0,
            mu: 0.0,
            eps_bar: 1.0,
            h_bar: 0.0,
            m: 1,
            n_adapt: n_adapt as u64,
            initialized: false,
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
}

impl<P: GradientPotential> MarkovChain<f64> for NutsChain<'_, P> {
    fn step(&mut self) -> &Array1<f64> {
        let potential = self.potential;
        if !self.initialized {
            self.epsilon = find_reasonable_epsilon(
                potential,
                &self.position,
                &self.grad,
                self.logp,
                &mut self.rng,
            );
            self.mu = (10.0 * self.epsilon).ln();
            self.initialized = true;
        }

        let dim = self.position.len();
        let mut r0 = Array1::<f64>::zeros(dim);
        for v in r0.iter_mut() {
            *v = self.rng.sample(StandardNormal);
        }
        let joint0 = self.logp - 0.5 * r0.dot(&r0);
        let exp_draw: f64 = self.rng.sample(Exp1);
        let logu = joint0 - exp_draw;

        let mut theta_minus = self.position.clone();
        let mut theta_plus = self.position.clone();
        let mut r_minus = r0.clone();
        let mut r_plus = r0.clone();
        let mut grad_minus = self.grad.clone();
        let mut grad_plus = self.grad.clone();

        let mut j = 0usize;
        let mut n = 1.0f64;
        let mut s = true;
        let mut alpha = 1.0f64;
        let mut n_alpha = 1.0f64;

        while s && j < self.max_depth {
            let v: i8 = if self.rng.gen::<bool>() { 1 } else { -1 };
            let tree = if v == -1 {
                build_tree(
                    potential,
                    &theta_minus,
                    &r_minus,
                    &grad_minus,
                    logu,
                    v,
                    j,
                    self.epsilon,
                    joint0,
                    &mut self.rng,
                )
            } else {
                build_tree(
                    potential,
                    &theta_plus,
                    &r_plus,
                    &grad_plus,
                    logu,
                    v,
                    j,
                    self.epsilon,
                    joint0,
                    &mut self.rng,
                )
            };
            if v == -1 {
                theta_minus = tree.theta_minus.clone();
                r_minus = tree.r_minus.clone();
                grad_minus = tree.grad_minus.clone();
            } else {
                theta_plus = tree.theta_plus.clone();
                r_plus = tree.r_plus.clone();
                grad_plus = tree.grad_plus.clone();
            }

            if tree.s_prime && self.rng.gen::<f64>() < (tree.n_prime / n).min(1.0) {
                self.position = tree.theta_prime.clone();
                self.grad = tree.grad_prime.clone();
                self.logp = tree.logp_prime;
            }
            n += tree.n_prime;
            s = tree.s_prime && no_u_turn(&theta_minus, &theta_plus, &r_minus, &r_plus);
            alpha = tree.alpha;
            n_alpha = tree.n_alpha;
            j += 1;
        }

        // Dual-averaging step-size adaptation during warmup, frozen after.
        if self.m <= self.n_adapt {
            let m = self.m as f64;
            let eta = 1.0 / (m + T0);
            self.h_bar = (1.0 - eta) * self.h_bar + eta * (self.target_accept - alpha / n_alpha);
            self.epsilon = (self.mu - m.sqrt() / GAMMA * self.h_bar).exp();
            let x = m.powf(-KAPPA);
            self.eps_bar = (x * self.epsilon.ln() + (1.0 - x) * self.eps_bar.ln()).exp();
        } else if self.n_adapt > 0 {
            self.epsilon = self.eps_bar;
        }
        self.m += 1;

        &self.position
    }

    fn current_state(&self) -> &Array1<f64> {
        &self.position
    }
}
