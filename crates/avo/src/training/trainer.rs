//! Bilevel training loop.
//!
//! Warm up the critic, then per epoch: one proposal step against the
//! committed critic, reset the critic's moments, retrain the critic against
//! the new proposal, and record a diagnostic on a large held-out batch.

use std::fmt;

use rand::Rng;

use crate::batch::Batch;
use crate::critic::{Critic, CriticLoss, CriticLossInputs, CriticObjective, CriticParams};
use crate::error::{AvoError, Result};
use crate::estimator::ProposalObjective;
use crate::optim::AdamOptimizer;
use crate::proposal::GaussianProposal;
use crate::rng::RandomStreamer;
use crate::simulator::Simulator;
use crate::training::config::AvoConfig;
use crate::training::report::{EpochSnapshot, LossTrace, TrainingReport};

/// Below this spread of critic scores the critic no longer separates samples.
const SCORE_STD_COLLAPSE: f64 = 1e-6;

/// Where the trainer is in its state machine. Each variant names the phase
/// that runs next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    WarmupCritic,
    UpdateProposal,
    ResetCriticOptimizer,
    RetrainCritic,
    RecordDiagnostic,
    Done,
    /// A phase returned an error. Terminal.
    Failed,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::WarmupCritic => "warmup-critic",
            Phase::UpdateProposal => "update-proposal",
            Phase::ResetCriticOptimizer => "reset-critic-optimizer",
            Phase::RetrainCritic => "retrain-critic",
            Phase::RecordDiagnostic => "record-diagnostic",
            Phase::Done => "done",
            Phase::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// Owns both players, their optimizers and the observed data for one run.
pub struct Trainer<S: Simulator> {
    config: AvoConfig,
    simulator: S,
    observed: Batch,
    proposal: GaussianProposal,
    critic: Critic,
    proposal_opt: AdamOptimizer,
    critic_opt: AdamOptimizer,
    streams: RandomStreamer,
    diagnostics: RandomStreamer,
    phase: Phase,
    epoch: usize,
    trace: LossTrace,
    snapshots: Vec<EpochSnapshot>,
}

impl<S: Simulator> Trainer<S> {
    /// Validate `config` against the simulator and data, then initialize the
    /// proposal, a Glorot critic and both optimizers.
    pub fn new(config: AvoConfig, simulator: S, observed: Batch) -> Result<Self> {
        config.validate()?;
        if observed.n_features() != simulator.n_features() {
            return Err(AvoError::shape(
                "observed data width",
                &[simulator.n_features()],
                &[observed.n_features()],
            ));
        }
        let needed = config.batch_size.max(config.diagnostic_batch_size) / 2;
        if observed.n_rows() < needed {
            return Err(AvoError::Config(format!(
                "need at least {needed} observed rows, got {}",
                observed.n_rows()
            )));
        }

        let mut streams = RandomStreamer::new(config.seed);
        let diagnostics = RandomStreamer::new(streams.rng().gen());
        let params = CriticParams::glorot(simulator.n_features(), config.n_hidden, &mut streams.fork());
        let critic = Critic::new(params, config.negative_slope);
        let proposal = GaussianProposal::new(
            simulator.n_params(),
            config.init_location,
            config.init_log_scale,
        );
        let critic_opt = config.critic_adam().init(&critic)?;
        let proposal_opt = config.proposal_adam().init(&proposal)?;

        tracing::info!(
            seed = config.seed,
            n_params = simulator.n_params(),
            n_features = simulator.n_features(),
            n_observed = observed.n_rows(),
            critic_params = critic.params().num_params(),
            "trainer initialized"
        );

        Ok(Self {
            config,
            simulator,
            observed,
            proposal,
            critic,
            proposal_opt,
            critic_opt,
            streams,
            diagnostics,
            phase: Phase::WarmupCritic,
            epoch: 0,
            trace: LossTrace::new(),
            snapshots: Vec::new(),
        })
    }

    pub fn config(&self) -> &AvoConfig {
        &self.config
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Completed epochs.
    pub fn epoch(&self) -> usize {
        self.epoch
    }

    /// Committed proposal.
    pub fn proposal(&self) -> &GaussianProposal {
        &self.proposal
    }

    /// Committed critic.
    pub fn critic(&self) -> &Critic {
        &self.critic
    }

    pub fn proposal_optimizer(&self) -> &AdamOptimizer {
        &self.proposal_opt
    }

    pub fn critic_optimizer(&self) -> &AdamOptimizer {
        &self.critic_opt
    }

    pub fn loss_trace(&self) -> &LossTrace {
        &self.trace
    }

    pub fn snapshots(&self) -> &[EpochSnapshot] {
        &self.snapshots
    }

    fn expect_phase(&self, expected: Phase) -> Result<()> {
        if self.phase != expected {
            return Err(AvoError::Config(format!(
                "trainer is in phase {}, expected {expected}",
                self.phase
            )));
        }
        Ok(())
    }

    fn enter(&mut self, phase: Phase) {
        tracing::debug!(epoch = self.epoch, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    fn fail(&mut self, err: &AvoError) {
        tracing::warn!(epoch = self.epoch, phase = %self.phase, error = %err, "training aborted");
        self.phase = Phase::Failed;
    }

    /// Train the critic against the initial proposal and commit it.
    ///
    /// An error moves the trainer to [`Phase::Failed`].
    pub fn warmup(&mut self) -> Result<()> {
        self.expect_phase(Phase::WarmupCritic)?;
        if let Err(err) = self.warmup_critic() {
            self.fail(&err);
            return Err(err);
        }
        Ok(())
    }

    fn warmup_critic(&mut self) -> Result<()> {
        let loss = self.train_critic(self.config.warmup_steps)?;
        if let Some(loss) = loss {
            tracing::info!(
                steps = self.config.warmup_steps,
                loss = loss.total,
                penalty = loss.penalty,
                "critic warmup complete"
            );
        }
        let next = if self.config.n_epochs == 0 { Phase::Done } else { Phase::UpdateProposal };
        self.enter(next);
        Ok(())
    }

    /// Run one full epoch and return its snapshot.
    ///
    /// An error moves the trainer to [`Phase::Failed`]; every later call is
    /// rejected.
    pub fn run_epoch(&mut self) -> Result<&EpochSnapshot> {
        self.expect_phase(Phase::UpdateProposal)?;
        if let Err(err) = self.advance_epoch() {
            self.fail(&err);
            return Err(err);
        }
        Ok(&self.snapshots[self.snapshots.len() - 1])
    }

    fn advance_epoch(&mut self) -> Result<()> {
        self.update_proposal()?;

        self.enter(Phase::ResetCriticOptimizer);
        self.critic_opt.reset();

        self.enter(Phase::RetrainCritic);
        self.train_critic(self.config.retrain_steps)?;

        self.enter(Phase::RecordDiagnostic);
        let loss = self.diagnostic()?;
        if loss.score_std < SCORE_STD_COLLAPSE {
            tracing::warn!(
                epoch = self.epoch,
                score_std = loss.score_std,
                "critic scores collapsed to a constant"
            );
        }
        let snapshot = EpochSnapshot::new(self.epoch, &self.proposal, loss);
        tracing::info!(
            epoch = self.epoch,
            location = ?snapshot.location,
            log_scale = ?snapshot.log_scale,
            diagnostic = snapshot.diagnostic,
            penalty = loss.penalty,
            "epoch complete"
        );
        self.trace.push(snapshot.diagnostic);
        self.snapshots.push(snapshot);

        self.epoch += 1;
        let next = if self.epoch >= self.config.n_epochs { Phase::Done } else { Phase::UpdateProposal };
        self.enter(next);
        Ok(())
    }

    /// One proposal step scored by the committed critic, then commit.
    fn update_proposal(&mut self) -> Result<()> {
        let rng = self.streams.fork();
        let mut objective = ProposalObjective::new(
            &self.critic,
            &self.simulator,
            self.config.batch_size,
            self.config.gamma,
            rng,
        );
        self.proposal_opt.step(1, &mut objective)?;
        self.proposal_opt.move_to(&mut self.proposal)
    }

    /// `steps` critic iterations against the committed proposal, then commit.
    fn train_critic(&mut self, steps: usize) -> Result<Option<CriticLoss>> {
        let rng = self.streams.fork();
        let mut objective = CriticObjective::new(
            &self.critic,
            &self.proposal,
            &self.simulator,
            &self.observed,
            self.config.batch_size,
            self.config.lambda_gp,
            rng,
        );
        self.critic_opt.step(steps, &mut objective)?;
        let last = objective.last_loss();
        self.critic_opt.move_to(&mut self.critic)?;
        Ok(last)
    }

    /// Critic loss of the committed players on a diagnostic batch.
    ///
    /// The batch comes from a stream keyed by the current epoch, separate from
    /// the training streams, and no optimizer state is touched. Extra calls do
    /// not change the rest of the run.
    pub fn diagnostic(&self) -> Result<CriticLoss> {
        if self.phase == Phase::Failed {
            return Err(AvoError::Config("trainer is in phase failed".to_string()));
        }
        let mut rng = self.diagnostics.keyed(self.epoch as u64);
        let inputs = CriticLossInputs::draw(
            &self.proposal,
            &self.simulator,
            &self.observed,
            self.config.diagnostic_batch_size,
            &mut rng,
        )?;
        self.critic.loss(&inputs, self.config.lambda_gp)
    }

    /// Warm up if needed, then run every remaining epoch.
    pub fn run(self) -> Result<TrainingReport> {
        self.run_with_observer(|_| {})
    }

    /// Like [`Self::run`], calling `observer` with each snapshot as it is
    /// recorded.
    pub fn run_with_observer<F>(mut self, mut observer: F) -> Result<TrainingReport>
    where
        F: FnMut(&EpochSnapshot),
    {
        if self.phase == Phase::WarmupCritic {
            self.warmup()?;
        }
        while self.phase != Phase::Done {
            let snapshot = self.run_epoch()?;
            observer(snapshot);
        }
        Ok(self.into_report())
    }

    pub fn into_report(self) -> TrainingReport {
        TrainingReport {
            seed: self.config.seed,
            n_epochs: self.epoch,
            loss_trace: self.trace,
            snapshots: self.snapshots,
            final_proposal: self.proposal,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;
    use std::rc::Rc;

    use rand::rngs::StdRng;

    use super::*;
    use crate::params::ParamGroups;
    use crate::simulator::{observe, GaussianSimulator};

    /// Gaussian simulator whose single-row calls fail while `broken` is set.
    struct FlakySimulator {
        broken: Rc<Cell<bool>>,
    }

    impl Simulator for FlakySimulator {
        fn n_params(&self) -> usize {
            GaussianSimulator.n_params()
        }

        fn n_features(&self) -> usize {
            GaussianSimulator.n_features()
        }

        fn simulate(&self, theta: &[f64], n_samples: usize, rng: &mut StdRng) -> Result<Batch> {
            if n_samples == 1 && self.broken.get() {
                return Err(AvoError::Simulator("unavailable".to_string()));
            }
            GaussianSimulator.simulate(theta, n_samples, rng)
        }
    }

    fn flaky_trainer(broken: bool) -> (Trainer<FlakySimulator>, Rc<Cell<bool>>) {
        let flag = Rc::new(Cell::new(broken));
        let simulator = FlakySimulator { broken: Rc::clone(&flag) };
        (Trainer::new(small_config(), simulator, observed()).unwrap(), flag)
    }

    fn small_config() -> AvoConfig {
        AvoConfig::new()
            .with_batch_size(16)
            .with_n_epochs(3)
            .with_warmup_steps(5)
            .with_retrain_steps(4)
            .with_diagnostic_batch_size(64)
    }

    fn observed() -> Batch {
        observe(&GaussianSimulator, &[0.5, 0.5_f64.ln()], 200, 123).unwrap()
    }

    fn trainer(config: AvoConfig) -> Trainer<GaussianSimulator> {
        Trainer::new(config, GaussianSimulator, observed()).unwrap()
    }

    #[test]
    fn test_new_rejects_invalid_setup() {
        let odd = Trainer::new(small_config().with_batch_size(15), GaussianSimulator, observed());
        assert!(matches!(odd, Err(AvoError::Config(_))));

        let few = observe(&GaussianSimulator, &[0.0, 0.0], 10, 1).unwrap();
        let small_pool = Trainer::new(small_config(), GaussianSimulator, few);
        assert!(matches!(small_pool, Err(AvoError::Config(_))));

        let wide = Batch::new(100, 2, vec![0.0; 200]).unwrap();
        let mismatch = Trainer::new(small_config(), GaussianSimulator, wide);
        assert!(matches!(mismatch, Err(AvoError::Shape { .. })));
    }

    #[test]
    fn test_phase_order_is_enforced() {
        let mut t = trainer(small_config());
        assert_eq!(t.phase(), Phase::WarmupCritic);
        assert!(t.run_epoch().is_err());

        t.warmup().unwrap();
        assert_eq!(t.phase(), Phase::UpdateProposal);
        assert!(t.warmup().is_err());

        for _ in 0..3 {
            t.run_epoch().unwrap();
        }
        assert_eq!(t.phase(), Phase::Done);
        assert!(t.run_epoch().is_err());
    }

    #[test]
    fn test_warmup_commits_critic() {
        let mut t = trainer(small_config());
        let initial = t.critic().to_param_dict();
        t.warmup().unwrap();
        assert_ne!(t.critic().to_param_dict(), initial);
        assert_eq!(&t.critic().to_param_dict(), t.critic_optimizer().params());
        assert_eq!(t.critic_optimizer().state().step, 5);
    }

    #[test]
    fn test_epoch_resets_critic_moments_and_commits_both_players() {
        let mut t = trainer(small_config());
        t.warmup().unwrap();
        let before = t.proposal().clone();
        let snapshot = t.run_epoch().unwrap().clone();

        // Reset before retraining: only the retrain steps are counted.
        assert_eq!(t.critic_optimizer().state().step, 4);
        assert_eq!(t.proposal_optimizer().state().step, 1);
        assert_ne!(t.proposal(), &before);
        assert_eq!(&t.proposal().to_param_dict(), t.proposal_optimizer().params());
        assert_eq!(&t.critic().to_param_dict(), t.critic_optimizer().params());

        assert_eq!(snapshot.epoch, 0);
        assert_eq!(snapshot.location, t.proposal().location);
        assert_eq!(t.loss_trace().values(), &[snapshot.diagnostic]);
        assert_eq!(snapshot.diagnostic, -snapshot.critic.total);
    }

    #[test]
    fn test_diagnostic_leaves_optimizers_untouched() {
        let mut t = trainer(small_config());
        t.warmup().unwrap();
        t.run_epoch().unwrap();

        let critic_state = t.critic_optimizer().state().clone();
        let critic_params = t.critic_optimizer().params().clone();
        let proposal_state = t.proposal_optimizer().state().clone();
        let critic = t.critic().clone();
        let proposal = t.proposal().clone();

        let loss = t.diagnostic().unwrap();
        assert!(loss.total.is_finite());
        assert_eq!(t.diagnostic().unwrap(), loss);
        assert_eq!(t.critic_optimizer().state(), &critic_state);
        assert_eq!(t.critic_optimizer().params(), &critic_params);
        assert_eq!(t.proposal_optimizer().state(), &proposal_state);
        assert_eq!(t.critic(), &critic);
        assert_eq!(t.proposal(), &proposal);
    }

    #[test]
    fn test_extra_diagnostics_do_not_change_training() {
        let mut a = trainer(small_config());
        let mut b = trainer(small_config());
        a.warmup().unwrap();
        b.warmup().unwrap();
        a.run_epoch().unwrap();
        b.run_epoch().unwrap();

        b.diagnostic().unwrap();
        b.diagnostic().unwrap();

        let sa = a.run_epoch().unwrap().clone();
        let sb = b.run_epoch().unwrap().clone();
        assert_eq!(sa, sb);
        assert_eq!(a.proposal(), b.proposal());
        assert_eq!(a.critic(), b.critic());
    }

    #[test]
    fn test_failed_epoch_is_terminal() {
        let (mut t, broken) = flaky_trainer(false);
        t.warmup().unwrap();
        let before = t.proposal().clone();

        broken.set(true);
        assert!(matches!(t.run_epoch(), Err(AvoError::Simulator(_))));
        assert_eq!(t.phase(), Phase::Failed);
        assert_eq!(t.proposal(), &before);

        broken.set(false);
        assert!(matches!(t.run_epoch(), Err(AvoError::Config(_))));
        assert!(t.diagnostic().is_err());
        assert!(t.warmup().is_err());
        assert_eq!(t.epoch(), 0);
        assert!(t.run().is_err());
    }

    #[test]
    fn test_failed_warmup_is_terminal() {
        let (mut t, broken) = flaky_trainer(true);
        assert!(matches!(t.warmup(), Err(AvoError::Simulator(_))));
        assert_eq!(t.phase(), Phase::Failed);
        broken.set(false);
        assert!(matches!(t.warmup(), Err(AvoError::Config(_))));
        assert!(t.run_epoch().is_err());
    }

    #[test]
    fn test_run_is_reproducible() {
        let a = trainer(small_config()).run().unwrap();
        let b = trainer(small_config()).run().unwrap();
        assert_eq!(a, b);

        let c = trainer(small_config().with_seed(7)).run().unwrap();
        assert_ne!(a.final_proposal, c.final_proposal);
    }

    #[test]
    fn test_observer_sees_every_epoch() {
        let mut seen = Vec::new();
        let report = trainer(small_config())
            .run_with_observer(|s| seen.push(s.epoch))
            .unwrap();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(report.n_epochs, 3);
        assert_eq!(report.loss_trace.len(), 3);
        assert_eq!(report.snapshots.len(), 3);
        assert_eq!(report.final_proposal.location, report.snapshots[2].location);
    }

    #[test]
    fn test_zero_epochs_only_warms_up() {
        let report = trainer(small_config().with_n_epochs(0)).run().unwrap();
        assert!(report.loss_trace.is_empty());
        assert_eq!(report.final_proposal, GaussianProposal::new(2, 0.0, 0.0));
    }
}
