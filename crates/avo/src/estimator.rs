//! Score-function gradient of the proposal objective
//! `U(ψ) = E_{θ~q_ψ}[-score(simulate(θ))] - γ H(q_ψ)`.

use rand::rngs::StdRng;

use crate::critic::Scorer;
use crate::error::{AvoError, Result};
use crate::optim::GradientFn;
use crate::params::{GradientDict, ParamDict, ParamGroups};
use crate::proposal::GaussianProposal;
use crate::simulator::{simulate_each, Simulator};

/// Monte Carlo part of the gradient:
/// `(1/m) Σ_i -score(x_i) ∇_ψ log q_ψ(θ_i)` with `θ_i ~ q_ψ` and one
/// simulated `x_i` per `θ_i`. No baseline is subtracted.
pub fn score_function_term<C, S>(
    proposal: &GaussianProposal,
    critic: &C,
    simulator: &S,
    m: usize,
    rng: &mut StdRng,
) -> Result<GradientDict>
where
    C: Scorer + ?Sized,
    S: Simulator + ?Sized,
{
    if m == 0 {
        return Err(AvoError::Config("estimator sample count must be positive".to_string()));
    }
    if simulator.n_params() != proposal.n_params() {
        return Err(AvoError::shape(
            "proposal dimension",
            &[simulator.n_params()],
            &[proposal.n_params()],
        ));
    }
    let thetas = proposal.sample(m, rng);
    let x = simulate_each(simulator, &thetas, rng)?;
    let scores = critic.score(&x)?;

    let mut grad = proposal.to_param_dict().zeros_like();
    for (theta, score) in thetas.iter().zip(&scores) {
        grad.add_scaled(&proposal.grad_log_density(theta)?, -score)?;
    }
    grad.scale(1.0 / m as f64);
    Ok(grad)
}

/// Full proposal gradient: Monte Carlo term plus `γ ∇H`.
pub fn proposal_gradient<C, S>(
    proposal: &GaussianProposal,
    critic: &C,
    simulator: &S,
    m: usize,
    gamma: f64,
    rng: &mut StdRng,
) -> Result<GradientDict>
where
    C: Scorer + ?Sized,
    S: Simulator + ?Sized,
{
    let mut grad = score_function_term(proposal, critic, simulator, m, rng)?;
    grad.add_scaled(&proposal.grad_entropy(), gamma)?;
    Ok(grad)
}

/// Gradient function of the proposal's optimizer.
///
/// Scores with the committed critic; samples from the optimizer's trial
/// proposal parameters.
pub struct ProposalObjective<'a, C: Scorer + ?Sized, S: Simulator + ?Sized> {
    critic: &'a C,
    simulator: &'a S,
    batch_size: usize,
    gamma: f64,
    rng: StdRng,
}

impl<'a, C: Scorer + ?Sized, S: Simulator + ?Sized> ProposalObjective<'a, C, S> {
    pub fn new(critic: &'a C, simulator: &'a S, batch_size: usize, gamma: f64, rng: StdRng) -> Self {
        Self { critic, simulator, batch_size, gamma, rng }
    }
}

impl<C: Scorer + ?Sized, S: Simulator + ?Sized> GradientFn for ProposalObjective<'_, C, S> {
    fn gradient(&mut self, params: &ParamDict, iteration: usize) -> Result<GradientDict> {
        let trial = GaussianProposal::from_param_dict(params)?;
        let grad = proposal_gradient(
            &trial,
            self.critic,
            self.simulator,
            self.batch_size,
            self.gamma,
            &mut self.rng,
        )?;
        tracing::trace!(iteration, norm = grad.l2_norm(), "proposal gradient");
        Ok(grad)
    }
}
