/*!
Posterior sampling facade.

[`McmcPosterior`] ties the pieces together: it owns the potential model and
prior, derives the transform to unconstrained space, carries the run
configuration, and exposes the two public operations,
[`McmcPosterior::sample`] and [`McmcPosterior::maximize`].

One `sample` call binds the conditioning observation into a fresh evaluation
context, builds initial parameters for every chain, dispatches on the closed
[`Method`] set, maps the unconstrained draws back through the transform and
reshapes them to the requested sample shape. The final per-chain states are
retained across calls as the warm-start cache behind
`InitStrategy::LatestSample`.

`sample` and `maximize` take `&mut self`; only one may be in flight per
posterior at a time, which the borrow checker enforces for free.

# Examples

```rust
use ndarray::array;
use posterior_mcmc::distributions::{BoxUniform, GaussianLikelihood};
use posterior_mcmc::posterior::{McmcPosterior, Method};

let prior = BoxUniform::new(array![-5.0, -5.0], array![5.0, 5.0]).unwrap();
let mut posterior = McmcPosterior::new(GaussianLikelihood::new(1.0), prior)
    .unwrap()
    .set_method(Method::SliceSequential)
    .set_thin(2)
    .set_warmup_steps(20)
    .set_num_chains(2)
    .set_seed(42);

let x = array![0.5, -0.5];
let samples = posterior.sample(&[40], &x.view()).unwrap();
assert_eq!(samples.shape(), &[40, 2]);
```
*/

use ndarray::{s, Array1, Array2, Array3, ArrayD, ArrayView1, Ix2};
use rand::prelude::*;

use crate::distributions::Prior;
use crate::errors::McmcError;
use crate::init::{initial_params, InitStrategy};
use crate::kernels::{run_kernel, KernelKind};
use crate::optimize::{gradient_ascent, AscentConfig, CancelToken};
use crate::potential::{GradientModel, PosteriorPotential, TransformedPotential};
use crate::slice::SliceSampler;
use crate::slice_vectorized::SliceSamplerVectorized;
use crate::transform::ParamTransform;

/// The closed set of sampling backends.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Method {
    /// Hand-rolled slice sampler, chains run one at a time.
    SliceSequential,
    /// Hand-rolled slice sampler, chains advanced in lockstep with batched
    /// potential calls.
    SliceVectorized,
    /// Slice transitions driven through the external-kernel adapter.
    KernelSlice,
    /// Hamiltonian Monte Carlo kernel.
    Hmc { step_size: f64, n_leapfrog: usize },
    /// No-U-Turn kernel with dual-averaging step-size warmup.
    Nuts { target_accept: f64 },
}

impl Default for Method {
    fn default() -> Self {
        Method::SliceSequential
    }
}

/// Where [`McmcPosterior::maximize`] draws its initial candidate pool.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MapInit {
    /// Sample the pool from the prior.
    Prior,
    /// Sample the pool from the posterior itself.
    Posterior,
}

/// Configuration of one MAP search.
#[derive(Debug, Clone)]
pub struct MapConfig {
    /// Gradient-ascent iterations.
    pub num_iter: usize,
    /// Size of the initial candidate pool.
    pub num_init_samples: usize,
    /// How many of the best candidates to optimize.
    pub num_to_optimize: usize,
    /// Adam learning rate.
    pub learning_rate: f64,
    /// Pool source.
    pub init_method: MapInit,
    /// Checkpoint the best point every this many iterations.
    pub save_best_every: usize,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            num_iter: 1_000,
            num_init_samples: 1_000,
            num_to_optimize: 100,
            learning_rate: 0.01,
            init_method: MapInit::Prior,
            save_best_every: 10,
        }
    }
}

/// Samples from a posterior known through an unnormalized potential, via MCMC.
pub struct McmcPosterior<M, P> {
    potential: PosteriorPotential<M, P>,
    transform: ParamTransform,
    method: Method,
    thin: usize,
    warmup_steps: usize,
    num_chains: usize,
    init_strategy: InitStrategy,
    warm_start: Option<Array2<f64>>,
    map_: Option<Array1<f64>>,
    /// The global random seed.
    pub seed: u64,
    rng: SmallRng,
}

impl<M, P> McmcPosterior<M, P>
where
    M: GradientModel + Sync,
    P: Prior + Sync,
{
    /// Builds a posterior over `model`'s potential with chains initialized
    /// from `prior`; the transform is derived from the prior's support.
    pub fn new(model: M, prior: P) -> Result<Self, McmcError> {
        let transform = ParamTransform::new(prior.support())?;
        let seed = thread_rng().gen::<u64>();
        Ok(Self {
            potential: PosteriorPotential::new(model, prior),
            transform,
            method: Method::default(),
            thin: 10,
            warmup_steps: 10,
            num_chains: 1,
            init_strategy: InitStrategy::default(),
            warm_start: None,
            map_: None,
            seed,
            rng: SmallRng::seed_from_u64(seed),
        })
    }

    /// Declares the expected observation length for early shape checking.
    pub fn with_x_shape(mut self, len: usize) -> Self {
        self.potential = self.potential.with_x_shape(len);
        self
    }

    pub fn set_method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn set_thin(mut self, thin: usize) -> Self {
        self.thin = thin;
        self
    }

    pub fn set_warmup_steps(mut self, warmup_steps: usize) -> Self {
        self.warmup_steps = warmup_steps;
        self
    }

    pub fn set_num_chains(mut self, num_chains: usize) -> Self {
        self.num_chains = num_chains;
        self
    }

    pub fn set_init_strategy(mut self, init_strategy: InitStrategy) -> Self {
        self.init_strategy = init_strategy;
        self
    }

    /// Sets a new global seed; per-call sampler seeds derive from it.
    pub fn set_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = SmallRng::seed_from_u64(seed);
        self
    }

    pub fn method(&self) -> Method {
        self.method
    }

    pub fn transform(&self) -> &ParamTransform {
        &self.transform
    }

    /// Final per-chain states of the last sampling call, if any.
    pub fn latest_states(&self) -> Option<&Array2<f64>> {
        self.warm_start.as_ref()
    }

    /// The MAP estimate cached by the last [`McmcPosterior::maximize`] call.
    pub fn map_estimate(&self) -> Option<&Array1<f64>> {
        self.map_.as_ref()
    }

    fn validate(&self) -> Result<(), McmcError> {
        if self.thin == 0 {
            return Err(McmcError::InvalidConfig("thin must be at least 1".into()));
        }
        if self.num_chains == 0 {
            return Err(McmcError::InvalidConfig(
                "num_chains must be at least 1".into(),
            ));
        }
        Ok(())
    }

    /// Draws posterior samples of the requested shape given observation `x`.
    ///
    /// The returned array has shape `shape + [dim]`; the flat sample count is
    /// the product of `shape` (an empty `shape` yields one sample).
    pub fn sample(&mut self, shape: &[usize], x: &ArrayView1<f64>) -> Result<ArrayD<f64>, McmcError> {
        self.validate()?;
        let num_samples: usize = shape.iter().product();
        if num_samples == 0 {
            return Err(McmcError::InvalidConfig(
                "requested sample shape is empty".into(),
            ));
        }

        let bound = TransformedPotential::new(&self.potential, &self.transform, x.view())?;
        let dim = self.transform.dim();

        let mut rng = self.rng.clone();
        let initial = initial_params(
            self.init_strategy,
            self.num_chains,
            &self.potential.prior,
            &self.transform,
            &bound,
            self.warm_start.as_ref(),
            &mut rng,
        )?;
        let call_seed: u64 = rng.gen();

        let (flat, finals) = match self.method {
            Method::SliceSequential => {
                let draws = num_samples.div_ceil(self.num_chains);
                let mut sampler =
                    SliceSampler::new(&bound, &initial.view(), self.thin).set_seed(call_seed);
                let buffer = sampler.run(draws, self.warmup_steps);
                let finals = last_timestep(&buffer);
                let flat = buffer
                    .into_shape_with_order((self.num_chains * draws, dim))
                    .expect("chain buffer is contiguous");
                let flat = flat.slice(s![..num_samples, ..]).to_owned();
                (flat, finals)
            }
            Method::SliceVectorized => {
                // Warmup counts transitions, so it scales with the thinning
                // factor; afterwards the raw trajectory is sliced and thinned.
                let warmup = self.warmup_steps * self.thin;
                let per_chain = (num_samples * self.thin).div_ceil(self.num_chains);
                let mut sampler =
                    SliceSamplerVectorized::new(&bound, &initial.view()).set_seed(call_seed);
                let trajectory = sampler.run(warmup + per_chain);
                let step = self.thin as isize;
                let kept = trajectory.slice(s![.., warmup..;step, ..]).to_owned();
                let finals = last_timestep(&kept);
                let t = kept.shape()[1];
                let flat = kept
                    .into_shape_with_order((self.num_chains * t, dim))
                    .expect("thinned buffer is contiguous");
                let flat = flat.slice(s![..num_samples, ..]).to_owned();
                (flat, finals)
            }
            Method::KernelSlice | Method::Hmc { .. } | Method::Nuts { .. } => {
                let kind = match self.method {
                    Method::KernelSlice => KernelKind::Slice,
                    Method::Hmc {
                        step_size,
                        n_leapfrog,
                    } => KernelKind::Hmc {
                        step_size,
                        n_leapfrog,
                    },
                    Method::Nuts { target_accept } => KernelKind::Nuts { target_accept },
                    _ => unreachable!("slice variants matched above"),
                };
                let run = run_kernel(
                    kind,
                    &bound,
                    &initial.view(),
                    num_samples,
                    self.thin,
                    self.warmup_steps,
                    call_seed,
                );
                (run.samples, run.final_states)
            }
        };
        assert_eq!(
            flat.nrows(),
            num_samples,
            "sampling produced a wrong sample count after thinning"
        );

        self.rng = rng;
        self.warm_start = Some(finals);

        let theta = self.transform.inverse(&flat.view());
        let mut out_shape: Vec<usize> = shape.to_vec();
        out_shape.push(dim);
        let samples = theta
            .into_shape_with_order(out_shape)
            .expect("sample count equals the product of the requested shape");
        Ok(samples)
    }

    /// Returns the maximum-a-posteriori estimate of the potential given
    /// observation `x`.
    ///
    /// Draws a candidate pool, optimizes the best candidates by gradient
    /// ascent in unconstrained space and returns the highest-potential point
    /// found, also cached in [`McmcPosterior::map_estimate`]. Passing a
    /// [`CancelToken`] makes the search interruptible: cancellation returns
    /// the best checkpoint instead of an error.
    pub fn maximize(
        &mut self,
        x: &ArrayView1<f64>,
        config: &MapConfig,
        cancel: Option<&CancelToken>,
    ) -> Result<Array1<f64>, McmcError> {
        if config.num_init_samples == 0 {
            return Err(McmcError::InvalidConfig(
                "maximize requires a non-empty candidate pool".into(),
            ));
        }

        let inits = match config.init_method {
            MapInit::Prior => {
                let mut rng = self.rng.clone();
                let draws = self.potential.prior.sample(config.num_init_samples, &mut rng);
                self.rng = rng;
                draws
            }
            MapInit::Posterior => {
                let flat = self.sample(&[config.num_init_samples], x)?;
                flat.into_dimensionality::<Ix2>()
                    .expect("a flat sample batch is two-dimensional")
            }
        };

        let bound = TransformedPotential::new(&self.potential, &self.transform, x.view())?;
        let inits_u = self.transform.forward(&inits.view());
        let ascent = AscentConfig {
            num_iter: config.num_iter,
            num_to_optimize: config.num_to_optimize,
            learning_rate: config.learning_rate,
            save_best_every: config.save_best_every,
        };
        let (best_u, _) = gradient_ascent(&bound, &inits_u.view(), &ascent, cancel);

        let best = self.transform.inverse_one(&best_u.view());
        self.map_ = Some(best.clone());
        Ok(best)
    }
}

fn last_timestep(buffer: &Array3<f64>) -> Array2<f64> {
    let t = buffer.shape()[1];
    buffer.slice(s![.., t - 1, ..]).to_owned()
}
