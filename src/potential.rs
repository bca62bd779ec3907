/*!
Potential functions and the calling conventions the sampling backends expect.

Three layers, innermost first:

- [`PotentialModel`] / [`GradientModel`]: the consumed surrogate interface. A
  model scores a batch of parameter vectors against a conditioning observation;
  the gradient flavor additionally returns `d log p / d theta` for a single
  vector. The zeroth-order slice engines never call the gradient path.
- [`PosteriorPotential`]: composes a model with its prior. Outside the prior's
  support the potential is negative infinity, never an error; the sampler then
  rejects such points on its own.
- [`TransformedPotential`]: the per-call evaluation context. It borrows the
  potential, the transform and the observation, and evaluates in unconstrained
  space with the log-absolute-Jacobian correction of the inverse transform.
  It implements both backend conventions: [`Potential`] (batched,
  gradient-free) and [`GradientPotential`] (value plus gradient, chain-ruled
  through the transform).

One `TransformedPotential` is built per sampling call and shared read-only by
every chain, which is what makes the single-call-at-a-time discipline of the
facade structural rather than a convention.
*/

use ndarray::{Array1, ArrayView1, ArrayView2, Axis};

use crate::distributions::Prior;
use crate::errors::McmcError;
use crate::transform::ParamTransform;

/// The raw potential interface supplied by an external model.
pub trait PotentialModel {
    /// Unnormalized log-density of each row of `theta` given observation `x`.
    fn log_prob(&self, theta: &ArrayView2<f64>, x: &ArrayView1<f64>) -> Array1<f64>;
}

/// Gradient-capable potential interface, required by the gradient-based
/// kernels and by MAP optimization.
pub trait GradientModel: PotentialModel {
    /// Value and gradient of the log-density at a single parameter vector.
    fn log_prob_grad(&self, theta: &ArrayView1<f64>, x: &ArrayView1<f64>) -> (f64, Array1<f64>);
}

/// A model bound to its prior: the potential evaluated by every backend.
///
/// The value is the model's log-density forced to negative infinity outside
/// the prior's support.
#[derive(Debug, Clone)]
pub struct PosteriorPotential<M, P> {
    pub model: M,
    pub prior: P,
    x_shape: Option<usize>,
}

impl<M, P> PosteriorPotential<M, P>
where
    M: PotentialModel,
    P: Prior,
{
    pub fn new(model: M, prior: P) -> Self {
        Self {
            model,
            prior,
            x_shape: None,
        }
    }

    /// Declares the expected observation length, enabling an early descriptive
    /// error instead of a downstream numeric failure.
    pub fn with_x_shape(mut self, len: usize) -> Self {
        self.x_shape = Some(len);
        self
    }

    pub fn check_observation(&self, x: &ArrayView1<f64>) -> Result<(), McmcError> {
        match self.x_shape {
            Some(expected) if expected != x.len() => Err(McmcError::ObservationShape {
                expected,
                got: x.len(),
            }),
            _ => Ok(()),
        }
    }

    /// Masked log-density of each row of `theta`.
    pub fn log_prob(&self, theta: &ArrayView2<f64>, x: &ArrayView1<f64>) -> Array1<f64> {
        let mut lp = self.model.log_prob(theta, x);
        for (v, inside) in lp.iter_mut().zip(self.prior.within_support(theta)) {
            if !inside {
                *v = f64::NEG_INFINITY;
            }
        }
        lp
    }

    /// Masked value and gradient at a single parameter vector.
    pub fn log_prob_grad(&self, theta: &ArrayView1<f64>, x: &ArrayView1<f64>) -> (f64, Array1<f64>)
    where
        M: GradientModel,
    {
        let batched = theta.to_owned().insert_axis(Axis(0));
        if !self.prior.within_support(&batched.view())[0] {
            return (f64::NEG_INFINITY, Array1::zeros(theta.len()));
        }
        self.model.log_prob_grad(theta, x)
    }
}

/// Batched, gradient-free evaluation in unconstrained space.
pub trait Potential {
    /// Log-density of each row of the unconstrained batch `u`.
    fn log_prob(&self, u: &ArrayView2<f64>) -> Array1<f64>;

    /// Log-density of a single unconstrained vector.
    fn log_prob_one(&self, u: &ArrayView1<f64>) -> f64 {
        let u2 = u.to_owned().insert_axis(Axis(0));
        self.log_prob(&u2.view())[0]
    }
}

/// Value-and-gradient evaluation in unconstrained space.
pub trait GradientPotential: Potential {
    fn log_prob_grad(&self, u: &ArrayView1<f64>) -> (f64, Array1<f64>);
}

/// The evaluation context of one sampling call: potential + transform +
/// conditioning observation, evaluated in unconstrained space.
#[derive(Debug)]
pub struct TransformedPotential<'a, M, P> {
    potential: &'a PosteriorPotential<M, P>,
    transform: &'a ParamTransform,
    x: ArrayView1<'a, f64>,
}

impl<'a, M, P> TransformedPotential<'a, M, P>
where
    M: PotentialModel,
    P: Prior,
{
    /// Binds an observation to the potential for the duration of one call.
    pub fn new(
        potential: &'a PosteriorPotential<M, P>,
        transform: &'a ParamTransform,
        x: ArrayView1<'a, f64>,
    ) -> Result<Self, McmcError> {
        potential.check_observation(&x)?;
        Ok(Self {
            potential,
            transform,
            x,
        })
    }

    pub fn dim(&self) -> usize {
        self.transform.dim()
    }

    /// Evaluates the masked potential directly in constrained space.
    ///
    /// Used by the SIR initializer, which weighs prior draws before they are
    /// mapped to unconstrained space.
    pub fn log_prob_constrained(&self, theta: &ArrayView2<f64>) -> Array1<f64> {
        self.potential.log_prob(theta, &self.x)
    }
}

impl<M, P> Potential for TransformedPotential<'_, M, P>
where
    M: PotentialModel,
    P: Prior,
{
    fn log_prob(&self, u: &ArrayView2<f64>) -> Array1<f64> {
        let theta = self.transform.inverse(u);
        let mut lp = self.potential.log_prob(&theta.view(), &self.x);
        lp += &self.transform.inverse_log_abs_det_jacobian(u);
        lp
    }
}

impl<M, P> GradientPotential for TransformedPotential<'_, M, P>
where
    M: GradientModel,
    P: Prior,
{
    fn log_prob_grad(&self, u: &ArrayView1<f64>) -> (f64, Array1<f64>) {
        let theta = self.transform.inverse_one(u);
        let (lp, grad_theta) = self.potential.log_prob_grad(&theta.view(), &self.x);
        if lp == f64::NEG_INFINITY {
            return (lp, Array1::zeros(u.len()));
        }
        let u2 = u.to_owned().insert_axis(Axis(0));
        let correction = self.transform.inverse_log_abs_det_jacobian(&u2.view())[0];
        let (dx_du, dld_du) = self.transform.inverse_grad_factors(u);
        let grad_u = &grad_theta * &dx_du + &dld_du;
        (lp + correction, grad_u)
    }
}
