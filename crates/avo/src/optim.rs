//! Adam optimizer over [`ParamDict`]s with an explicit step / commit / reset
//! contract.
//!
//! The optimizer owns a trial copy of the parameters it optimizes. `step`
//! advances that copy, `move_to` writes it into the caller's model, and
//! `reset` clears the moments without touching the parameters. Nothing reaches
//! the caller's model except through `move_to`.

use burn::prelude::*;

use crate::error::{self, AvoError};
use crate::params::{GradientDict, ParamDict, ParamGroup, ParamGroups};

/// Adam hyperparameters.
#[derive(Config, Debug)]
pub struct AdamConfig {
    /// Learning rate.
    #[config(default = 0.001)]
    pub step_size: f64,
    /// Decay of the first-moment estimate.
    #[config(default = 0.9)]
    pub beta1: f64,
    /// Decay of the second-moment estimate.
    #[config(default = 0.999)]
    pub beta2: f64,
    /// Added to the denominator.
    #[config(default = 1e-8)]
    pub epsilon: f64,
}

impl AdamConfig {
    /// Reject values that would make the update meaningless.
    pub fn validate(&self) -> error::Result<()> {
        if !(self.step_size > 0.0 && self.step_size.is_finite()) {
            return Err(AvoError::Config(format!(
                "step_size must be positive, got {}",
                self.step_size
            )));
        }
        for (name, beta) in [("beta1", self.beta1), ("beta2", self.beta2)] {
            if !(0.0..1.0).contains(&beta) {
                return Err(AvoError::Config(format!("{name} must be in [0, 1), got {beta}")));
            }
        }
        if !(self.epsilon > 0.0 && self.epsilon.is_finite()) {
            return Err(AvoError::Config(format!(
                "epsilon must be positive, got {}",
                self.epsilon
            )));
        }
        Ok(())
    }

    /// Validate, then build an optimizer starting from `params`.
    pub fn init<P: ParamGroups + ?Sized>(&self, params: &P) -> error::Result<AdamOptimizer> {
        AdamOptimizer::new(self.clone(), params)
    }
}

/// Gradient of the objective at the optimizer's trial parameters.
///
/// `iteration` is the optimizer's step counter before the update being
/// computed. Closures `FnMut(&ParamDict, usize) -> Result<GradientDict>`
/// implement this trait directly.
pub trait GradientFn {
    fn gradient(&mut self, params: &ParamDict, iteration: usize) -> error::Result<GradientDict>;
}

impl<F> GradientFn for F
where
    F: FnMut(&ParamDict, usize) -> error::Result<GradientDict>,
{
    fn gradient(&mut self, params: &ParamDict, iteration: usize) -> error::Result<GradientDict> {
        self(params, iteration)
    }
}

/// Step counter and moment estimates, laid out like the parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimizerState {
    pub step: usize,
    pub first_moment: ParamDict,
    pub second_moment: ParamDict,
}

impl OptimizerState {
    fn zeros_like(params: &ParamDict) -> Self {
        Self {
            step: 0,
            first_moment: params.zeros_like(),
            second_moment: params.zeros_like(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdamOptimizer {
    config: AdamConfig,
    params: ParamDict,
    state: OptimizerState,
}

impl AdamOptimizer {
    /// Fails with [`AvoError::Config`] before any state exists if the
    /// hyperparameters are invalid.
    pub fn new<P: ParamGroups + ?Sized>(config: AdamConfig, params: &P) -> error::Result<Self> {
        config.validate()?;
        let params = params.to_param_dict();
        params.ensure_finite("initial parameters")?;
        let state = OptimizerState::zeros_like(&params);
        Ok(Self { config, params, state })
    }

    pub fn config(&self) -> &AdamConfig {
        &self.config
    }

    /// Trial parameters: the result of every step so far.
    pub fn params(&self) -> &ParamDict {
        &self.params
    }

    pub fn state(&self) -> &OptimizerState {
        &self.state
    }

    /// Run exactly `k` Adam iterations.
    ///
    /// On error the iteration that failed leaves parameters and state as they
    /// were before it; earlier iterations of the same call are kept.
    pub fn step<G: GradientFn + ?Sized>(&mut self, k: usize, grad_fn: &mut G) -> error::Result<()> {
        if k == 0 {
            return Err(AvoError::Config("optimizer step count must be positive".to_string()));
        }
        for _ in 0..k {
            self.step_once(grad_fn)?;
        }
        Ok(())
    }

    fn step_once<G: GradientFn + ?Sized>(&mut self, grad_fn: &mut G) -> error::Result<()> {
        let t = self.state.step;
        let grad = grad_fn.gradient(&self.params, t)?;
        self.params.check_same_layout(&grad, "gradient")?;
        grad.ensure_finite("gradient")?;

        let AdamConfig { step_size, beta1, beta2, epsilon } = self.config;
        let exponent = (t + 1) as f64;
        let bias1 = 1.0 - beta1.powf(exponent);
        let bias2 = 1.0 - beta2.powf(exponent);

        let mut params = ParamDict::new();
        let mut first = ParamDict::new();
        let mut second = ParamDict::new();
        for (name, g) in grad.iter() {
            let p_prev = &self.params.get(name)?.values;
            let m_prev = &self.state.first_moment.get(name)?.values;
            let v_prev = &self.state.second_moment.get(name)?.values;

            let n = g.values.len();
            let mut p = Vec::with_capacity(n);
            let mut m = Vec::with_capacity(n);
            let mut v = Vec::with_capacity(n);
            for i in 0..n {
                let gi = g.values[i];
                let mi = beta1 * m_prev[i] + (1.0 - beta1) * gi;
                let vi = beta2 * v_prev[i] + (1.0 - beta2) * gi * gi;
                let m_hat = mi / bias1;
                let v_hat = vi / bias2;
                p.push(p_prev[i] - step_size * m_hat / (v_hat.sqrt() + epsilon));
                m.push(mi);
                v.push(vi);
            }
            params.insert(name, ParamGroup { shape: g.shape.clone(), values: p });
            first.insert(name, ParamGroup { shape: g.shape.clone(), values: m });
            second.insert(name, ParamGroup { shape: g.shape.clone(), values: v });
        }
        params.ensure_finite("updated parameters")?;

        self.params = params;
        self.state.first_moment = first;
        self.state.second_moment = second;
        self.state.step = t + 1;
        Ok(())
    }

    /// Write the trial parameters into `target`.
    pub fn move_to<P: ParamGroups + ?Sized>(&self, target: &mut P) -> error::Result<()> {
        target.load_param_dict(&self.params)
    }

    /// Zero the step counter and both moments. Parameters are untouched.
    pub fn reset(&mut self) {
        tracing::debug!(step = self.state.step, "resetting optimizer moments");
        self.state = OptimizerState::zeros_like(&self.params);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposal::GaussianProposal;

    fn point(values: &[f64]) -> ParamDict {
        let mut d = ParamDict::new();
        d.insert("x", ParamGroup::vector(values.to_vec()));
        d
    }

    /// Gradient of `‖x − target‖²`.
    fn quadratic(target: Vec<f64>) -> impl FnMut(&ParamDict, usize) -> error::Result<GradientDict> {
        move |params: &ParamDict, _iteration: usize| {
            let x = params.values("x", &[target.len()])?;
            Ok(point(&x.iter().zip(&target).map(|(a, b)| 2.0 * (a - b)).collect::<Vec<_>>()))
        }
    }

    #[test]
    fn test_default_config() {
        let config = AdamConfig::new();
        assert_eq!(config.step_size, 0.001);
        assert_eq!(config.beta1, 0.9);
        assert_eq!(config.beta2, 0.999);
        assert_eq!(config.epsilon, 1e-8);
        config.validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_hyperparameters() {
        let bad = [
            AdamConfig::new().with_step_size(0.0),
            AdamConfig::new().with_step_size(-0.1),
            AdamConfig::new().with_beta1(1.0),
            AdamConfig::new().with_beta2(-0.1),
            AdamConfig::new().with_epsilon(0.0),
        ];
        for config in bad {
            let err = AdamOptimizer::new(config.clone(), &point(&[0.0])).unwrap_err();
            assert!(matches!(err, AvoError::Config(_)), "{config:?}");
        }
    }

    #[test]
    fn test_converges_on_quadratic() {
        let target = vec![1.0, -2.0, 0.5];
        let mut opt = AdamConfig::new()
            .with_step_size(0.05)
            .init(&point(&[0.0, 0.0, 0.0]))
            .unwrap();
        let mut grad_fn = quadratic(target.clone());
        opt.step(5000, &mut grad_fn).unwrap();

        let x = opt.params().values("x", &[3]).unwrap();
        for (a, b) in x.iter().zip(&target) {
            assert!((a - b).abs() < 1e-2, "x={x:?}");
        }
        assert_eq!(opt.state().step, 5000);
    }

    #[test]
    fn test_first_step_moves_by_step_size() {
        let mut opt = AdamConfig::new()
            .with_step_size(0.1)
            .init(&point(&[0.0, 0.0]))
            .unwrap();
        opt.step(1, &mut quadratic(vec![3.0, -7.0])).unwrap();
        let x = opt.params().values("x", &[2]).unwrap();
        // m̂ = g and v̂ = g², so the first update is step_size * sign(g).
        assert!((x[0] - 0.1).abs() < 1e-6);
        assert!((x[1] + 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_reset_then_step_matches_fresh_optimizer() {
        let config = AdamConfig::new().with_step_size(0.01).with_beta1(0.5).with_beta2(0.5);
        let mut used = config.init(&point(&[0.3, -0.2])).unwrap();
        used.step(3, &mut quadratic(vec![1.0, 1.0])).unwrap();

        let mut fresh = config.init(used.params()).unwrap();
        used.reset();
        assert_eq!(used.state(), fresh.state());

        used.step(1, &mut quadratic(vec![1.0, 1.0])).unwrap();
        fresh.step(1, &mut quadratic(vec![1.0, 1.0])).unwrap();
        assert_eq!(used.params(), fresh.params());
        assert_eq!(used.state(), fresh.state());
    }

    #[test]
    fn test_reset_keeps_parameters() {
        let mut opt = AdamConfig::new().init(&point(&[0.0])).unwrap();
        opt.step(2, &mut quadratic(vec![1.0])).unwrap();
        let before = opt.params().clone();
        opt.reset();
        assert_eq!(opt.params(), &before);
        assert_eq!(opt.state().step, 0);
        assert_eq!(opt.state().first_moment.l2_norm(), 0.0);
    }

    #[test]
    fn test_iteration_is_counter_before_update() {
        let mut seen = Vec::new();
        let mut opt = AdamConfig::new().init(&point(&[0.0])).unwrap();
        let mut grad_fn = |params: &ParamDict, iteration: usize| -> error::Result<GradientDict> {
            seen.push(iteration);
            Ok(params.zeros_like())
        };
        opt.step(3, &mut grad_fn).unwrap();
        opt.step(2, &mut grad_fn).unwrap();
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_zero_steps_is_config_error() {
        let mut opt = AdamConfig::new().init(&point(&[0.0])).unwrap();
        let err = opt.step(0, &mut quadratic(vec![1.0])).unwrap_err();
        assert!(matches!(err, AvoError::Config(_)));
    }

    #[test]
    fn test_non_finite_gradient_leaves_state_untouched() {
        let mut opt = AdamConfig::new().init(&point(&[0.0, 0.0])).unwrap();
        opt.step(1, &mut quadratic(vec![1.0, 1.0])).unwrap();
        let params = opt.params().clone();
        let state = opt.state().clone();

        let mut nan = |_: &ParamDict, _: usize| -> error::Result<GradientDict> { Ok(point(&[f64::NAN, 0.0])) };
        let err = opt.step(1, &mut nan).unwrap_err();
        assert!(matches!(err, AvoError::NonFinite(_)));
        assert_eq!(opt.params(), &params);
        assert_eq!(opt.state(), &state);
    }

    #[test]
    fn test_gradient_shape_mismatch() {
        let mut opt = AdamConfig::new().init(&point(&[0.0, 0.0])).unwrap();
        let mut short = |_: &ParamDict, _: usize| -> error::Result<GradientDict> { Ok(point(&[1.0])) };
        assert!(matches!(opt.step(1, &mut short), Err(AvoError::Shape { .. })));

        let mut renamed = |_: &ParamDict, _: usize| -> error::Result<GradientDict> {
            let mut d = ParamDict::new();
            d.insert("y", ParamGroup::vector(vec![1.0, 1.0]));
            Ok(d)
        };
        assert!(matches!(opt.step(1, &mut renamed), Err(AvoError::MissingGroup(_))));
    }

    #[test]
    fn test_move_to_commits_only_on_request() {
        let mut proposal = GaussianProposal::new(2, 0.0, 0.0);
        let mut opt = AdamConfig::new().with_step_size(0.1).init(&proposal).unwrap();
        let mut grad_fn = |params: &ParamDict, _: usize| -> error::Result<GradientDict> {
            let mut g = params.zeros_like();
            g.insert("location", ParamGroup::vector(vec![-1.0, -1.0]));
            Ok(g)
        };
        opt.step(1, &mut grad_fn).unwrap();
        assert_eq!(proposal, GaussianProposal::new(2, 0.0, 0.0));

        opt.move_to(&mut proposal).unwrap();
        assert!((proposal.location[0] - 0.1).abs() < 1e-6);
        assert_eq!(proposal.log_scale, vec![0.0, 0.0]);

        let mut wrong = GaussianProposal::new(3, 0.0, 0.0);
        assert!(opt.move_to(&mut wrong).is_err());
    }
}
