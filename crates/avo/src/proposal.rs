//! Mean-field Gaussian variational proposal over simulator parameters.
//!
//! Dimension `i` is `Normal(location[i], exp(log_scale[i]))`. The log-scale
//! parameterization keeps the standard deviation positive by construction.

use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};

use crate::error::{AvoError, Result};
use crate::params::{GradientDict, ParamDict, ParamGroup, ParamGroups};

pub const LOCATION: &str = "location";
pub const LOG_SCALE: &str = "log_scale";

/// `0.5 * ln(2πe)`, the entropy of a unit Gaussian.
const HALF_LOG_2PI_E: f64 = 1.418_938_533_204_672_7;

/// `0.5 * ln(2π)`.
const HALF_LOG_2PI: f64 = 0.918_938_533_204_672_7;

/// Variational parameters and the operations of the Gaussian family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GaussianProposal {
    pub location: Vec<f64>,
    pub log_scale: Vec<f64>,
}

impl GaussianProposal {
    /// Every dimension starts at the same `location` and `log_scale`.
    pub fn new(n_params: usize, location: f64, log_scale: f64) -> Self {
        Self {
            location: vec![location; n_params],
            log_scale: vec![log_scale; n_params],
        }
    }

    pub fn from_parts(location: Vec<f64>, log_scale: Vec<f64>) -> Result<Self> {
        if location.len() != log_scale.len() {
            return Err(AvoError::shape(LOG_SCALE, &[location.len()], &[log_scale.len()]));
        }
        Ok(Self { location, log_scale })
    }

    /// Rebuild from a parameter dictionary with groups `location` and `log_scale`.
    pub fn from_param_dict(dict: &ParamDict) -> Result<Self> {
        let location = dict.get(LOCATION)?;
        let n = location.values.len();
        let log_scale = dict.values(LOG_SCALE, &[n])?;
        Self::from_parts(location.values.clone(), log_scale.to_vec())
    }

    pub fn n_params(&self) -> usize {
        self.location.len()
    }

    pub fn std_dev(&self) -> Vec<f64> {
        self.log_scale.iter().map(|s| s.exp()).collect()
    }

    /// `n` independent draws, each of length [`Self::n_params`].
    pub fn sample(&self, n: usize, rng: &mut StdRng) -> Vec<Vec<f64>> {
        let sigma = self.std_dev();
        (0..n)
            .map(|_| {
                self.location
                    .iter()
                    .zip(&sigma)
                    .map(|(mu, s)| {
                        let z: f64 = rng.sample(StandardNormal);
                        mu + s * z
                    })
                    .collect()
            })
            .collect()
    }

    fn check_theta(&self, theta: &[f64]) -> Result<()> {
        if theta.len() != self.n_params() {
            return Err(AvoError::shape("theta", &[self.n_params()], &[theta.len()]));
        }
        Ok(())
    }

    /// Per-dimension Gaussian log-density of `theta`.
    pub fn log_density(&self, theta: &[f64]) -> Result<Vec<f64>> {
        self.check_theta(theta)?;
        Ok(theta
            .iter()
            .zip(self.location.iter().zip(&self.log_scale))
            .map(|(t, (mu, ls))| {
                let z = (t - mu) / ls.exp();
                -0.5 * z * z - ls - HALF_LOG_2PI
            })
            .collect())
    }

    /// Joint log-density; the dimensions are independent so this is the sum.
    pub fn log_density_sum(&self, theta: &[f64]) -> Result<f64> {
        Ok(self.log_density(theta)?.iter().sum())
    }

    /// Analytic gradient of [`Self::log_density_sum`] with respect to the
    /// variational parameters.
    pub fn grad_log_density(&self, theta: &[f64]) -> Result<GradientDict> {
        self.check_theta(theta)?;
        let mut d_location = Vec::with_capacity(self.n_params());
        let mut d_log_scale = Vec::with_capacity(self.n_params());
        for (t, (mu, ls)) in theta.iter().zip(self.location.iter().zip(&self.log_scale)) {
            let variance = (2.0 * ls).exp();
            let diff = t - mu;
            d_location.push(diff / variance);
            d_log_scale.push(diff * diff / variance - 1.0);
        }
        Ok(Self::dict(d_location, d_log_scale))
    }

    /// Differential entropy `Σ (0.5 ln(2πe) + log_scale_i)`.
    pub fn entropy(&self) -> f64 {
        self.log_scale.iter().map(|ls| HALF_LOG_2PI_E + ls).sum()
    }

    /// Exact entropy gradient: 0 for every location, 1 for every log-scale.
    pub fn grad_entropy(&self) -> GradientDict {
        let n = self.n_params();
        Self::dict(vec![0.0; n], vec![1.0; n])
    }

    fn dict(location: Vec<f64>, log_scale: Vec<f64>) -> ParamDict {
        let mut d = ParamDict::new();
        d.insert(LOCATION, ParamGroup::vector(location));
        d.insert(LOG_SCALE, ParamGroup::vector(log_scale));
        d
    }
}

impl ParamGroups for GaussianProposal {
    fn to_param_dict(&self) -> ParamDict {
        Self::dict(self.location.clone(), self.log_scale.clone())
    }

    fn load_param_dict(&mut self, dict: &ParamDict) -> Result<()> {
        let n = self.n_params();
        let location = dict.values(LOCATION, &[n])?.to_vec();
        let log_scale = dict.values(LOG_SCALE, &[n])?.to_vec();
        self.location = location;
        self.log_scale = log_scale;
        Ok(())
    }
}
