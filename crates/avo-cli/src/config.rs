//! TOML config loading for the experiment CLI.
//!
//! Deserializes `configs/toy_gaussian.toml`, which has a `[simulator]` section
//! and an optional `[training]` section, then merges with CLI overrides.

use std::path::Path;

use anyhow::Context;
use avo::AvoConfig;
use serde::Deserialize;

/// Top-level structure matching `configs/toy_gaussian.toml`.
#[derive(Debug, Deserialize)]
pub struct ExperimentToml {
    /// How the observed dataset is generated.
    pub simulator: SimulatorSection,
    /// Overrides applied onto `AvoConfig::new()`.
    #[serde(default)]
    pub training: TrainingOverrides,
}

#[derive(Debug, Deserialize)]
pub struct SimulatorSection {
    /// Parameters the observed data is simulated at.
    pub true_theta: Vec<f64>,
    /// Rows of observed data.
    #[serde(default = "default_n_observed")]
    pub n_observed: usize,
    /// Seed of the observed data stream, separate from the training seed.
    #[serde(default = "default_observed_seed")]
    pub observed_seed: u64,
}

fn default_n_observed() -> usize {
    20_000
}
fn default_observed_seed() -> u64 {
    123
}

/// Optional overrides for `AvoConfig` fields.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TrainingOverrides {
    pub batch_size: Option<usize>,
    pub n_epochs: Option<usize>,
    pub lambda_gp: Option<f64>,
    pub gamma: Option<f64>,
    pub n_hidden: Option<usize>,
    pub negative_slope: Option<f64>,
    pub critic_step_size: Option<f64>,
    pub critic_beta1: Option<f64>,
    pub critic_beta2: Option<f64>,
    pub proposal_step_size: Option<f64>,
    pub proposal_beta1: Option<f64>,
    pub proposal_beta2: Option<f64>,
    pub epsilon: Option<f64>,
    pub warmup_steps: Option<usize>,
    pub retrain_steps: Option<usize>,
    pub diagnostic_batch_size: Option<usize>,
    pub init_location: Option<f64>,
    pub init_log_scale: Option<f64>,
    pub seed: Option<u64>,
}

/// Load and deserialize an `ExperimentToml` from a TOML file.
pub fn load_experiment_toml(path: &Path) -> anyhow::Result<ExperimentToml> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config {}", path.display()))?;
    let config: ExperimentToml = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config {}", path.display()))?;
    tracing::info!(path = %path.display(), "Loaded experiment config");
    Ok(config)
}

/// Build an `AvoConfig` from defaults, TOML overrides, and CLI flags.
///
/// Priority chain: `AvoConfig::new()` defaults < TOML values < CLI flags.
pub fn build_avo_config(
    overrides: &TrainingOverrides,
    epochs_cli: Option<usize>,
    seed_cli: Option<u64>,
) -> AvoConfig {
    let mut config = AvoConfig::new();

    macro_rules! apply {
        ($($field:ident),* $(,)?) => {
            $(
                if let Some(v) = overrides.$field {
                    config.$field = v;
                }
            )*
        };
    }
    apply!(
        batch_size,
        n_epochs,
        lambda_gp,
        gamma,
        n_hidden,
        negative_slope,
        critic_step_size,
        critic_beta1,
        critic_beta2,
        proposal_step_size,
        proposal_beta1,
        proposal_beta2,
        epsilon,
        warmup_steps,
        retrain_steps,
        diagnostic_batch_size,
        init_location,
        init_log_scale,
        seed,
    );

    if let Some(n) = epochs_cli {
        config.n_epochs = n;
    }
    if let Some(s) = seed_cli {
        config.seed = s;
    }
    config
}
