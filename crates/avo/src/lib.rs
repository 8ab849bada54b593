//! Adversarial variational optimization for likelihood-free inference.
//!
//! Fits a variational proposal over the parameters of a black-box simulator by
//! playing it against a Wasserstein critic trained with a gradient penalty.
//! The proposal is updated with a score-function (REINFORCE) estimator of an
//! entropy-regularized adversarial objective; the critic is retrained to near
//! optimality between proposal updates.
//!
//! # Key types
//!
//! - [`GaussianProposal`]: mean-field Gaussian variational family
//! - [`Critic`] / [`CriticParams`]: burn-backed scorer with exact input gradients
//! - [`AdamOptimizer`]: optimizer with decoupled `step` / `move_to` / `reset`
//! - [`Trainer`] / [`AvoConfig`]: the bilevel training loop and its configuration
//! - [`Simulator`]: trait for the external simulator; [`GaussianSimulator`] is the toy model

pub mod batch;
pub mod critic;
pub mod error;
pub mod estimator;
pub mod optim;
pub mod params;
pub mod proposal;
pub mod rng;
pub mod simulator;
pub mod training;

pub use batch::Batch;
pub use critic::{Critic, CriticLoss, CriticLossInputs, CriticObjective, CriticParams, Scorer};
pub use error::{AvoError, Result};
pub use estimator::ProposalObjective;
pub use optim::{AdamConfig, AdamOptimizer, GradientFn, OptimizerState};
pub use params::{GradientDict, ParamDict, ParamGroups};
pub use proposal::GaussianProposal;
pub use rng::RandomStreamer;
pub use simulator::{observe, GaussianSimulator, Simulator};
pub use training::{AvoConfig, EpochSnapshot, LossTrace, Phase, Trainer, TrainingReport};
