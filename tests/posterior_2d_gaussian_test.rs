//! End-to-end posterior sampling tests on a 2D Gaussian potential.
//!
//! A Gaussian observation likelihood under a broad box prior concentrates the
//! posterior at the observation with unit covariance, so every backend can be
//! checked against known moments, and the MAP search against a known mode.

use approx::assert_abs_diff_eq;
use burn::backend::{Autodiff, NdArray};
use ndarray::{array, Array2, ArrayD, Axis, Ix2};
use ndarray_stats::CorrelationExt;
use posterior_mcmc::autodiff::{AutodiffModel, TensorGaussianLikelihood};
use posterior_mcmc::distributions::{BoxUniform, DiagGaussian, GaussianLikelihood};
use posterior_mcmc::init::InitStrategy;
use posterior_mcmc::posterior::{MapConfig, MapInit, McmcPosterior, Method};

fn broad_box() -> BoxUniform {
    BoxUniform::new(array![-10.0, -10.0], array![10.0, 10.0]).unwrap()
}

fn flat(samples: ArrayD<f64>) -> Array2<f64> {
    samples
        .into_dimensionality::<Ix2>()
        .expect("flat sample batch")
}

/// Shared harness: sample with the given method and check the posterior's
/// mean and covariance against the likelihood's truth.
fn run_gaussian_2d_test(method: Method, num_samples: usize, thin: usize, warmup: usize) {
    let x = array![0.8, -0.6];
    let mut posterior = McmcPosterior::new(GaussianLikelihood::new(1.0), broad_box())
        .unwrap()
        .set_method(method)
        .set_thin(thin)
        .set_warmup_steps(warmup)
        .set_num_chains(4)
        .set_seed(42);

    let samples = flat(posterior.sample(&[num_samples], &x.view()).unwrap());
    assert_eq!(samples.dim(), (num_samples, 2));

    let mean = samples.mean_axis(Axis(0)).unwrap();
    let cov = samples.t().cov(1.0).unwrap();
    assert_abs_diff_eq!(mean, x, epsilon = 0.2);
    assert_abs_diff_eq!(cov, array![[1.0, 0.0], [0.0, 1.0]], epsilon = 0.3);
}

#[test]
fn sequential_slice_recovers_gaussian_moments() {
    run_gaussian_2d_test(Method::SliceSequential, 1_000, 2, 50);
}

#[test]
fn vectorized_slice_recovers_gaussian_moments() {
    run_gaussian_2d_test(Method::SliceVectorized, 1_000, 2, 50);
}

#[test]
fn slice_kernel_recovers_gaussian_moments() {
    run_gaussian_2d_test(Method::KernelSlice, 1_000, 2, 50);
}

#[test]
fn hmc_kernel_recovers_gaussian_moments() {
    run_gaussian_2d_test(
        Method::Hmc {
            step_size: 0.05,
            n_leapfrog: 20,
        },
        1_000,
        2,
        100,
    );
}

#[test]
fn nuts_kernel_recovers_gaussian_moments() {
    run_gaussian_2d_test(Method::Nuts { target_accept: 0.8 }, 1_000, 2, 200);
}

#[test]
fn every_method_returns_the_exact_sample_count() {
    let x = array![0.0, 0.0];
    let methods = [
        Method::SliceSequential,
        Method::SliceVectorized,
        Method::KernelSlice,
        Method::Hmc {
            step_size: 0.1,
            n_leapfrog: 5,
        },
        Method::Nuts { target_accept: 0.8 },
    ];
    for method in methods {
        for (shape, want) in [(vec![33], 33), (vec![7, 3], 21), (vec![2, 2, 2], 8)] {
            let mut posterior = McmcPosterior::new(GaussianLikelihood::new(1.0), broad_box())
                .unwrap()
                .set_method(method)
                .set_thin(3)
                .set_warmup_steps(10)
                .set_num_chains(2)
                .set_seed(7);
            let samples = posterior.sample(&shape, &x.view()).unwrap();
            let mut expected_shape = shape.clone();
            expected_shape.push(2);
            assert_eq!(samples.shape(), expected_shape.as_slice());
            assert_eq!(samples.len() / 2, want);
        }
    }
}

#[test]
fn bounded_prior_samples_never_leave_the_support() {
    // Likelihood peak sits outside the box; the masked potential must keep
    // every sample inside anyway.
    let prior = BoxUniform::new(array![0.0, 0.0], array![1.0, 1.0]).unwrap();
    let x = array![1.4, -0.4];
    let mut posterior = McmcPosterior::new(GaussianLikelihood::new(0.5), prior)
        .unwrap()
        .set_method(Method::SliceSequential)
        .set_thin(1)
        .set_warmup_steps(20)
        .set_num_chains(2)
        .set_seed(11);

    let samples = flat(posterior.sample(&[500], &x.view()).unwrap());
    for row in samples.outer_iter() {
        assert!((0.0..=1.0).contains(&row[0]), "sample left the box: {row}");
        assert!((0.0..=1.0).contains(&row[1]), "sample left the box: {row}");
    }
}

#[test]
fn sir_initialization_samples_fine() {
    let x = array![0.8, -0.6];
    let mut posterior = McmcPosterior::new(GaussianLikelihood::new(1.0), broad_box())
        .unwrap()
        .set_method(Method::SliceSequential)
        .set_thin(1)
        .set_warmup_steps(20)
        .set_num_chains(4)
        .set_init_strategy(InitStrategy::Sir {
            num_candidates: 200,
        })
        .set_seed(3);

    let samples = flat(posterior.sample(&[400], &x.view()).unwrap());
    let mean = samples.mean_axis(Axis(0)).unwrap();
    assert_abs_diff_eq!(mean, x, epsilon = 0.3);
}

#[test]
fn warm_started_second_call_continues_sampling() {
    let x = array![0.8, -0.6];
    let mut posterior = McmcPosterior::new(GaussianLikelihood::new(1.0), broad_box())
        .unwrap()
        .set_method(Method::SliceSequential)
        .set_thin(1)
        .set_warmup_steps(30)
        .set_num_chains(4)
        .set_seed(5);

    posterior.sample(&[200], &x.view()).unwrap();
    let mut posterior = posterior.set_init_strategy(InitStrategy::LatestSample);
    // No warmup needed: the chains resume from their previous final states.
    let mut posterior = posterior.set_warmup_steps(0);
    let samples = flat(posterior.sample(&[400], &x.view()).unwrap());
    let mean = samples.mean_axis(Axis(0)).unwrap();
    assert_abs_diff_eq!(mean, x, epsilon = 0.25);
}

#[test]
fn map_search_finds_the_gaussian_mode() {
    let x = array![0.8, -0.6];
    let mut posterior = McmcPosterior::new(GaussianLikelihood::new(1.0), broad_box())
        .unwrap()
        .set_seed(9);

    let config = MapConfig {
        num_iter: 1_500,
        num_init_samples: 500,
        num_to_optimize: 50,
        learning_rate: 0.01,
        init_method: MapInit::Prior,
        save_best_every: 10,
    };
    let map = posterior.maximize(&x.view(), &config, None).unwrap();
    assert_abs_diff_eq!(map, x, epsilon = 0.1);
}

#[test]
fn autodiff_model_samples_under_an_unbounded_prior() {
    type B = Autodiff<NdArray<f64>>;

    let model: AutodiffModel<B, _> = AutodiffModel::new(TensorGaussianLikelihood { obs_std: 1.0 });
    let prior = DiagGaussian::new(array![0.0, 0.0], array![10.0, 10.0]).unwrap();
    let x = array![0.5, -0.5];

    let mut posterior = McmcPosterior::new(model, prior)
        .unwrap()
        .set_method(Method::Nuts { target_accept: 0.8 })
        .set_thin(1)
        .set_warmup_steps(100)
        .set_num_chains(2)
        .set_seed(42);

    let samples = flat(posterior.sample(&[400], &x.view()).unwrap());
    let mean = samples.mean_axis(Axis(0)).unwrap();
    assert_abs_diff_eq!(mean, x, epsilon = 0.25);
}
