/*!
Autodiff-backed potential models via the `burn` crate.

The sampler itself never differentiates anything: gradient-based kernels
consume a [`GradientModel`], and this module supplies one for any log-density
written on burn tensors. [`AutodiffModel`] evaluates the density batched on
the zeroth-order path and, on the gradient path, marks the input as tracked,
backpropagates, and reads the gradient back out: the usual
`require_grad`/`backward`/`grad` round trip.

# Examples

```rust
use burn::backend::{Autodiff, NdArray};
use ndarray::array;
use posterior_mcmc::autodiff::{AutodiffModel, TensorGaussianLikelihood};
use posterior_mcmc::potential::GradientModel;

type B = Autodiff<NdArray<f64>>;

let model: AutodiffModel<B, _> = AutodiffModel::new(TensorGaussianLikelihood { obs_std: 1.0 });
let x = array![0.5, -0.5];
let (logp, grad) = model.log_prob_grad(&array![0.0, 0.0].view(), &x.view());
assert!(logp.is_finite());
assert_eq!(grad.len(), 2);
```
*/

use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;
use ndarray::{Array1, ArrayView1, ArrayView2};
use std::marker::PhantomData;

use crate::potential::{GradientModel, PotentialModel};

/// A log-density defined on burn tensors.
pub trait TensorModel<B: AutodiffBackend>: Send + Sync {
    /// Log-density of each row of `theta` given observation `x`.
    fn log_prob(&self, theta: Tensor<B, 2>, x: Tensor<B, 1>) -> Tensor<B, 1>;
}

/// Adapts a [`TensorModel`] into the model interface consumed by the
/// posterior, with gradients supplied by the autodiff backend.
pub struct AutodiffModel<B: AutodiffBackend, M> {
    model: M,
    device: B::Device,
    _backend: PhantomData<fn() -> B>,
}

impl<B, M> AutodiffModel<B, M>
where
    B: AutodiffBackend<FloatElem = f64>,
    M: TensorModel<B>,
{
    pub fn new(model: M) -> Self {
        Self {
            model,
            device: B::Device::default(),
            _backend: PhantomData,
        }
    }

    fn tensor2(&self, rows: usize, cols: usize, data: Vec<f64>) -> Tensor<B, 2> {
        Tensor::from_data(TensorData::new(data, [rows, cols]), &self.device)
    }

    fn tensor1(&self, data: Vec<f64>) -> Tensor<B, 1> {
        let len = data.len();
        Tensor::from_data(TensorData::new(data, [len]), &self.device)
    }
}

impl<B, M> PotentialModel for AutodiffModel<B, M>
where
    B: AutodiffBackend<FloatElem = f64>,
    M: TensorModel<B>,
{
    fn log_prob(&self, theta: &ArrayView2<f64>, x: &ArrayView1<f64>) -> Array1<f64> {
        let t = self.tensor2(theta.nrows(), theta.ncols(), theta.iter().cloned().collect());
        let xt = self.tensor1(x.to_vec());
        let lp = self.model.log_prob(t, xt);
        let values = lp
            .into_data()
            .to_vec::<f64>()
            .expect("backend float element is f64");
        Array1::from(values)
    }
}

impl<B, M> GradientModel for AutodiffModel<B, M>
where
    B: AutodiffBackend<FloatElem = f64>,
    M: TensorModel<B>,
{
    fn log_prob_grad(&self, theta: &ArrayView1<f64>, x: &ArrayView1<f64>) -> (f64, Array1<f64>) {
        let t = self
            .tensor2(1, theta.len(), theta.to_vec())
            .require_grad();
        let xt = self.tensor1(x.to_vec());
        let lp = self.model.log_prob(t.clone(), xt);
        let value = lp.clone().into_scalar();
        let grads = t.grad(&lp.backward()).expect("input tensor is tracked");
        let grad = grads
            .into_data()
            .to_vec::<f64>()
            .expect("backend float element is f64");
        (value, Array1::from(grad))
    }
}

/// Tensor counterpart of [`crate::distributions::GaussianLikelihood`]:
/// `log N(x | theta, obs_std^2 I)` up to the additive normalization constant.
#[derive(Debug, Clone, Copy)]
pub struct TensorGaussianLikelihood {
    pub obs_std: f64,
}

impl<B: AutodiffBackend> TensorModel<B> for TensorGaussianLikelihood {
    fn log_prob(&self, theta: Tensor<B, 2>, x: Tensor<B, 1>) -> Tensor<B, 1> {
        let [n, d] = theta.dims();
        let var = self.obs_std * self.obs_std;
        let observed = x.unsqueeze_dim::<2>(0).expand([n, d]);
        let quad: Tensor<B, 1> = theta.sub(observed).powi_scalar(2).sum_dim(1).squeeze(1);
        quad.mul_scalar(-0.5 / var)
    }
}
