/*!
Chain initialization strategies.

Every sampling call builds one unconstrained starting vector per chain:

- `Prior`: a fresh prior draw per chain, mapped through the transform.
- `Sir`: sequential importance resampling. Per chain, a batch of prior
  candidates is weighted by the potential and one candidate is resampled in
  proportion; a cheap mode-seeking initializer that keeps chains out of
  low-density basins.
- `LatestSample`: replay the warm-start cache retained from the previous
  sampling call, cycling through the saved per-chain states.
*/

use ndarray::{Array2, Axis};
use rand::distributions::WeightedIndex;
use rand::prelude::*;

use crate::distributions::Prior;
use crate::errors::McmcError;
use crate::potential::{PotentialModel, TransformedPotential};
use crate::transform::ParamTransform;

/// How chains obtain their starting parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InitStrategy {
    /// Draw each start from the prior.
    Prior,
    /// Sequential importance resampling over `num_candidates` prior draws.
    Sir { num_candidates: usize },
    /// Reuse the final chain states of the previous sampling call.
    LatestSample,
}

impl Default for InitStrategy {
    fn default() -> Self {
        InitStrategy::Prior
    }
}

/// Builds one initial unconstrained parameter vector per chain.
pub fn initial_params<M, P>(
    strategy: InitStrategy,
    num_chains: usize,
    prior: &P,
    transform: &ParamTransform,
    bound: &TransformedPotential<M, P>,
    warm_start: Option<&Array2<f64>>,
    rng: &mut SmallRng,
) -> Result<Array2<f64>, McmcError>
where
    M: PotentialModel,
    P: Prior,
{
    let dim = transform.dim();
    let mut out = Array2::<f64>::zeros((num_chains, dim));

    match strategy {
        InitStrategy::Prior => {
            for c in 0..num_chains {
                let draw = prior.sample(1, rng);
                out.row_mut(c)
                    .assign(&transform.forward(&draw.view()).index_axis(Axis(0), 0));
            }
        }
        InitStrategy::Sir { num_candidates } => {
            if num_candidates == 0 {
                return Err(McmcError::InvalidConfig(
                    "sir requires at least one candidate".into(),
                ));
            }
            for c in 0..num_chains {
                let candidates = prior.sample(num_candidates, rng);
                let lp = bound.log_prob_constrained(&candidates.view());

                let max = lp.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
                let chosen = if max.is_finite() {
                    let weights: Vec<f64> = lp.iter().map(|&v| (v - max).exp()).collect();
                    let index = WeightedIndex::new(&weights)
                        .expect("softmax weights are finite and sum above zero");
                    rng.sample(index)
                } else {
                    // Every candidate sits outside the usable region; fall
                    // back to a uniform pick and let the sampler reject.
                    rng.gen_range(0..num_candidates)
                };

                let selected = candidates.index_axis(Axis(0), chosen).to_owned();
                let selected = selected.insert_axis(Axis(0));
                out.row_mut(c)
                    .assign(&transform.forward(&selected.view()).index_axis(Axis(0), 0));
            }
        }
        InitStrategy::LatestSample => {
            let cache = warm_start.ok_or(McmcError::MissingWarmStart)?;
            if cache.ncols() != dim {
                return Err(McmcError::ParamDim {
                    expected: dim,
                    got: cache.ncols(),
                });
            }
            for c in 0..num_chains {
                out.row_mut(c).assign(&cache.row(c % cache.nrows()));
            }
        }
    }

    Ok(out)
}
