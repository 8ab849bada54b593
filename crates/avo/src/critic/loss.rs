//! Wasserstein critic loss with gradient penalty.
//!
//! The tensor functions are generic over `B: Backend` so the same code path
//! serves plain evaluation and, on an autodiff backend, the parameter gradient.
//! Convention: observed rows carry label 1, generated rows label 0, and the
//! critic minimizes `mean(-label * score + (1 - label) * score)`.

use burn::prelude::*;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::critic::bridge::{batch_to_tensor, tensor_to_f64, tensor_to_vec, vector_to_tensor};
use crate::critic::network::CriticNet;
use crate::critic::Critic;
use crate::error::{AvoError, Result};
use crate::optim::GradientFn;
use crate::params::{GradientDict, ParamDict};
use crate::proposal::GaussianProposal;
use crate::rng::{permutation, uniform_unit};
use crate::simulator::{simulate_each, Simulator};

/// Value of the critic loss and its parts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticLoss {
    /// `wasserstein + lambda_gp * penalty`.
    pub total: f64,
    pub wasserstein: f64,
    /// Unweighted `mean((‖∇_x score(x̂)‖ - 1)²)`.
    pub penalty: f64,
    /// Mean observed score minus mean generated score.
    pub score_gap: f64,
    /// Standard deviation of all scores in the batch.
    pub score_std: f64,
}

/// One critic training batch: paired generated and observed rows plus the
/// interpolation weight of each pair.
#[derive(Debug, Clone, PartialEq)]
pub struct CriticLossInputs {
    generated: Batch,
    observed: Batch,
    interpolation: Vec<f64>,
}

impl CriticLossInputs {
    pub fn new(generated: Batch, observed: Batch, interpolation: Vec<f64>) -> Result<Self> {
        if generated.shape() != observed.shape() {
            return Err(AvoError::shape("critic batch halves", &generated.shape(), &observed.shape()));
        }
        if interpolation.len() != generated.n_rows() {
            return Err(AvoError::shape(
                "interpolation weights",
                &[generated.n_rows()],
                &[interpolation.len()],
            ));
        }
        Ok(Self { generated, observed, interpolation })
    }

    /// Draw a batch of `batch_size` rows, half generated and half observed.
    ///
    /// Generated rows come from one simulator call per parameter vector
    /// sampled from `proposal`; observed rows are the first half of a random
    /// permutation of `observed_pool`.
    pub fn draw<S: Simulator + ?Sized>(
        proposal: &GaussianProposal,
        simulator: &S,
        observed_pool: &Batch,
        batch_size: usize,
        rng: &mut StdRng,
    ) -> Result<Self> {
        if batch_size == 0 || batch_size % 2 != 0 {
            return Err(AvoError::Config(format!(
                "critic batch size must be even and positive, got {batch_size}"
            )));
        }
        let half = batch_size / 2;
        if half > observed_pool.n_rows() {
            return Err(AvoError::Config(format!(
                "critic batch needs {half} observed rows, only {} available",
                observed_pool.n_rows()
            )));
        }

        let thetas = proposal.sample(half, rng);
        let generated = simulate_each(simulator, &thetas, rng)?;

        let indices = permutation(observed_pool.n_rows(), rng);
        let observed = observed_pool.select(&indices[..half])?;

        let interpolation = uniform_unit(half, rng);
        Self::new(generated, observed, interpolation)
    }

    pub fn generated(&self) -> &Batch {
        &self.generated
    }

    pub fn observed(&self) -> &Batch {
        &self.observed
    }

    pub fn interpolation(&self) -> &[f64] {
        &self.interpolation
    }

    /// Rows per half.
    pub fn half(&self) -> usize {
        self.generated.n_rows()
    }

    /// Same pairs with the roles of generated and observed exchanged.
    ///
    /// Weights become `1 - ε` so the interpolated points are unchanged.
    pub fn swapped(&self) -> Self {
        Self {
            generated: self.observed.clone(),
            observed: self.generated.clone(),
            interpolation: self.interpolation.iter().map(|e| 1.0 - e).collect(),
        }
    }

    /// Generated rows on top, observed rows below.
    pub fn stacked(&self) -> Result<Batch> {
        self.generated.vstack(&self.observed)
    }

    /// Labels matching [`Self::stacked`]: 0 for generated, 1 for observed.
    pub fn labels(&self) -> Vec<f64> {
        let mut labels = vec![0.0; self.half()];
        labels.resize(2 * self.half(), 1.0);
        labels
    }

    /// `ε·x_observed + (1 - ε)·x_generated`, pair by pair.
    pub fn interpolated(&self) -> Result<Batch> {
        self.observed.interpolate(&self.generated, &self.interpolation)
    }
}

/// `mean(-label * score + (1 - label) * score)`.
pub fn wasserstein_term<B: Backend>(scores: Tensor<B, 1>, labels: Tensor<B, 1>) -> Tensor<B, 1> {
    let generated = labels.clone().neg().add_scalar(1.0);
    (labels.neg() * scores.clone() + generated * scores).mean()
}

/// `mean((‖g_i‖₂ - 1)²)` over the rows `g_i` of an input-gradient matrix.
pub fn gradient_penalty_term<B: Backend>(input_grad: Tensor<B, 2>) -> Tensor<B, 1> {
    let norms = input_grad.powf_scalar(2.0).sum_dim(1).sqrt(); // (batch, 1)
    norms.sub_scalar(1.0).powf_scalar(2.0).mean()
}

/// Loss tensors of one evaluation, kept on the graph until `backward`.
pub(crate) struct LossTerms<B: Backend> {
    pub(crate) total: Tensor<B, 1>,
    wasserstein: Tensor<B, 1>,
    penalty: Tensor<B, 1>,
    scores: Tensor<B, 1>,
    half: usize,
}

impl<B: Backend> LossTerms<B> {
    pub(crate) fn to_loss(&self) -> Result<CriticLoss> {
        let total = tensor_to_f64(self.total.clone());
        if !total.is_finite() {
            return Err(AvoError::NonFinite("critic loss".to_string()));
        }
        let scores = tensor_to_vec(self.scores.clone())?;
        let n = scores.len().max(1) as f64;
        let mean = scores.iter().sum::<f64>() / n;
        let score_std = (scores.iter().map(|s| (s - mean).powi(2)).sum::<f64>() / n).sqrt();
        let half = self.half.max(1) as f64;
        let generated_mean = scores[..self.half].iter().sum::<f64>() / half;
        let observed_mean = scores[self.half..].iter().sum::<f64>() / half;
        Ok(CriticLoss {
            total,
            wasserstein: tensor_to_f64(self.wasserstein.clone()),
            penalty: tensor_to_f64(self.penalty.clone()),
            score_gap: observed_mean - generated_mean,
            score_std,
        })
    }
}

/// Evaluate the critic loss of `net` on `inputs`.
pub(crate) fn evaluate<B: Backend>(
    net: &CriticNet<B>,
    inputs: &CriticLossInputs,
    lambda_gp: f64,
    device: &B::Device,
) -> Result<LossTerms<B>> {
    if inputs.half() == 0 {
        return Err(AvoError::Config("critic batch is empty".to_string()));
    }
    let x = batch_to_tensor::<B>(&inputs.stacked()?, device);
    let labels = vector_to_tensor::<B>(&inputs.labels(), device);
    let scores = net.forward(x);
    let wasserstein = wasserstein_term(scores.clone(), labels);

    let x_hat = batch_to_tensor::<B>(&inputs.interpolated()?, device);
    let penalty = gradient_penalty_term(net.input_gradient(x_hat));

    let total = wasserstein.clone() + penalty.clone().mul_scalar(lambda_gp);
    Ok(LossTerms {
        total,
        wasserstein,
        penalty,
        scores,
        half: inputs.half(),
    })
}

/// Gradient function of the critic's optimizer.
///
/// Each call draws a fresh batch against the committed proposal and returns
/// the critic-loss gradient at the optimizer's trial critic parameters.
pub struct CriticObjective<'a, S: Simulator + ?Sized> {
    critic: &'a Critic,
    proposal: &'a GaussianProposal,
    simulator: &'a S,
    observed: &'a Batch,
    batch_size: usize,
    lambda_gp: f64,
    rng: StdRng,
    last_loss: Option<CriticLoss>,
}

impl<'a, S: Simulator + ?Sized> CriticObjective<'a, S> {
    pub fn new(
        critic: &'a Critic,
        proposal: &'a GaussianProposal,
        simulator: &'a S,
        observed: &'a Batch,
        batch_size: usize,
        lambda_gp: f64,
        rng: StdRng,
    ) -> Self {
        Self {
            critic,
            proposal,
            simulator,
            observed,
            batch_size,
            lambda_gp,
            rng,
            last_loss: None,
        }
    }

    /// Loss of the most recent gradient evaluation.
    pub fn last_loss(&self) -> Option<CriticLoss> {
        self.last_loss
    }
}

impl<S: Simulator + ?Sized> GradientFn for CriticObjective<'_, S> {
    fn gradient(&mut self, params: &ParamDict, iteration: usize) -> Result<GradientDict> {
        let trial = self.critic.with_param_dict(params)?;
        let inputs = CriticLossInputs::draw(
            self.proposal,
            self.simulator,
            self.observed,
            self.batch_size,
            &mut self.rng,
        )?;
        let (loss, grad) = trial.loss_and_grad(&inputs, self.lambda_gp)?;
        tracing::trace!(iteration, loss = loss.total, penalty = loss.penalty, "critic gradient");
        self.last_loss = Some(loss);
        Ok(grad)
    }
}
