use burn::prelude::*;

use crate::error::{self, AvoError};
use crate::optim::AdamConfig;

/// Configuration for an adversarial variational optimization run.
///
/// Defaults reproduce the toy Gaussian experiment.
#[derive(Config, Debug)]
pub struct AvoConfig {
    /// Critic batch size: half generated rows, half observed rows. Also the
    /// number of samples in each proposal gradient estimate.
    #[config(default = 64)]
    pub batch_size: usize,
    /// Number of outer iterations after warmup.
    #[config(default = 300)]
    pub n_epochs: usize,
    /// Weight of the gradient penalty in the critic loss.
    #[config(default = 0.025)]
    pub lambda_gp: f64,
    /// Weight of the entropy term in the proposal gradient.
    #[config(default = 5.0)]
    pub gamma: f64,
    /// Width of both hidden critic layers.
    #[config(default = 10)]
    pub n_hidden: usize,
    /// Slope of the leaky rectifier for negative inputs.
    #[config(default = 0.1)]
    pub negative_slope: f64,
    #[config(default = 0.01)]
    pub critic_step_size: f64,
    #[config(default = 0.5)]
    pub critic_beta1: f64,
    #[config(default = 0.5)]
    pub critic_beta2: f64,
    #[config(default = 0.01)]
    pub proposal_step_size: f64,
    #[config(default = 0.1)]
    pub proposal_beta1: f64,
    #[config(default = 0.1)]
    pub proposal_beta2: f64,
    /// Adam denominator term, shared by both optimizers.
    #[config(default = 1e-8)]
    pub epsilon: f64,
    /// Critic steps before the first proposal update.
    #[config(default = 100)]
    pub warmup_steps: usize,
    /// Critic steps after each proposal update.
    #[config(default = 100)]
    pub retrain_steps: usize,
    /// Batch size of the per-epoch diagnostic.
    #[config(default = 5000)]
    pub diagnostic_batch_size: usize,
    #[config(default = 0.0)]
    pub init_location: f64,
    #[config(default = 0.0)]
    pub init_log_scale: f64,
    /// Root seed for every random stream of the run.
    #[config(default = 123)]
    pub seed: u64,
}

impl AvoConfig {
    /// Reject inconsistent settings before any model or optimizer is built.
    pub fn validate(&self) -> error::Result<()> {
        for (name, size) in [
            ("batch_size", self.batch_size),
            ("diagnostic_batch_size", self.diagnostic_batch_size),
        ] {
            if size == 0 || size % 2 != 0 {
                return Err(AvoError::Config(format!(
                    "{name} must be even and positive, got {size}"
                )));
            }
        }
        for (name, steps) in [
            ("warmup_steps", self.warmup_steps),
            ("retrain_steps", self.retrain_steps),
            ("n_hidden", self.n_hidden),
        ] {
            if steps == 0 {
                return Err(AvoError::Config(format!("{name} must be positive")));
            }
        }
        for (name, weight) in [("lambda_gp", self.lambda_gp), ("gamma", self.gamma)] {
            if !(weight >= 0.0 && weight.is_finite()) {
                return Err(AvoError::Config(format!(
                    "{name} must be finite and non-negative, got {weight}"
                )));
            }
        }
        if !self.negative_slope.is_finite() {
            return Err(AvoError::Config("negative_slope must be finite".to_string()));
        }
        if !(self.init_location.is_finite() && self.init_log_scale.is_finite()) {
            return Err(AvoError::Config("initial proposal must be finite".to_string()));
        }
        self.critic_adam().validate()?;
        self.proposal_adam().validate()?;
        Ok(())
    }

    pub fn critic_adam(&self) -> AdamConfig {
        AdamConfig::new()
            .with_step_size(self.critic_step_size)
            .with_beta1(self.critic_beta1)
            .with_beta2(self.critic_beta2)
            .with_epsilon(self.epsilon)
    }

    pub fn proposal_adam(&self) -> AdamConfig {
        AdamConfig::new()
            .with_step_size(self.proposal_step_size)
            .with_beta1(self.proposal_beta1)
            .with_beta2(self.proposal_beta2)
            .with_epsilon(self.epsilon)
    }
}
