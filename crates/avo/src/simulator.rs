//! Simulator interface and the toy Gaussian model.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::Normal;

use crate::batch::Batch;
use crate::error::{AvoError, Result};

/// Black-box stochastic simulator: parameters in, i.i.d. observations out.
///
/// Implementations must support `n_samples == 1`, which the proposal gradient
/// estimator calls once per sampled parameter vector.
pub trait Simulator {
    /// Number of parameters `theta` must have.
    fn n_params(&self) -> usize;

    /// Width of each observation row.
    fn n_features(&self) -> usize;

    fn simulate(&self, theta: &[f64], n_samples: usize, rng: &mut StdRng) -> Result<Batch>;
}

/// `x ~ Normal(theta[0], exp(theta[1]))`, one feature per row.
#[derive(Debug, Clone, Copy, Default)]
pub struct GaussianSimulator;

impl Simulator for GaussianSimulator {
    fn n_params(&self) -> usize {
        2
    }

    fn n_features(&self) -> usize {
        1
    }

    fn simulate(&self, theta: &[f64], n_samples: usize, rng: &mut StdRng) -> Result<Batch> {
        if theta.len() != 2 {
            return Err(AvoError::shape("simulator theta", &[2], &[theta.len()]));
        }
        let normal = Normal::new(theta[0], theta[1].exp())
            .map_err(|e| AvoError::Simulator(format!("theta={theta:?}: {e}")))?;
        let data = (0..n_samples).map(|_| rng.sample(normal)).collect();
        Batch::new(n_samples, 1, data)
    }
}

/// Simulate one row per parameter vector and stack them, in order.
pub fn simulate_each<S: Simulator + ?Sized>(
    simulator: &S,
    thetas: &[Vec<f64>],
    rng: &mut StdRng,
) -> Result<Batch> {
    let n_features = simulator.n_features();
    let mut data = Vec::with_capacity(thetas.len() * n_features);
    for theta in thetas {
        let x = simulator.simulate(theta, 1, rng)?;
        if x.shape() != [1, n_features] {
            return Err(AvoError::shape("simulated row", &[1, n_features], &x.shape()));
        }
        data.extend_from_slice(x.as_slice());
    }
    Batch::new(thetas.len(), n_features, data)
}

/// Draw the observed dataset `n_samples` rows at `true_theta` from its own
/// seeded stream, independent of any training randomness.
pub fn observe<S: Simulator + ?Sized>(
    simulator: &S,
    true_theta: &[f64],
    n_samples: usize,
    seed: u64,
) -> Result<Batch> {
    simulator.simulate(true_theta, n_samples, &mut StdRng::seed_from_u64(seed))
}
