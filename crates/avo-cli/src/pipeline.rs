//! Experiment runner and report inspection.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use avo::{observe, GaussianSimulator, Simulator, Trainer, TrainingReport};

use crate::config::{build_avo_config, load_experiment_toml};

/// Arguments for the `run` subcommand.
#[derive(Debug)]
pub struct RunArgs {
    /// Path to the experiment config TOML file.
    pub config: PathBuf,
    /// Path for the JSON report.
    pub output: PathBuf,
    /// Optional CLI override for the number of epochs.
    pub epochs: Option<usize>,
    /// Optional CLI override for the training seed.
    pub seed: Option<u64>,
}

/// Arguments for the `summary` subcommand.
#[derive(Debug)]
pub struct SummaryArgs {
    /// Path to a JSON report written by `run`.
    pub input: PathBuf,
    /// Output as JSON instead of human-readable text.
    pub json: bool,
}

/// Run the toy Gaussian experiment and write the report as JSON.
pub fn run_experiment(args: RunArgs) -> anyhow::Result<TrainingReport> {
    let start = Instant::now();

    // 1. Load config
    let toml = load_experiment_toml(&args.config)?;
    let config = build_avo_config(&toml.training, args.epochs, args.seed);

    // 2. Observed data
    let simulator = GaussianSimulator;
    let sim = &toml.simulator;
    anyhow::ensure!(
        sim.true_theta.len() == simulator.n_params(),
        "true_theta must have {} values, got {}",
        simulator.n_params(),
        sim.true_theta.len()
    );
    let observed = observe(&simulator, &sim.true_theta, sim.n_observed, sim.observed_seed)
        .context("Failed to simulate observed data")?;
    tracing::info!(
        true_theta = ?sim.true_theta,
        n_observed = observed.n_rows(),
        mean = observed.column_means()[0],
        "Simulated observed data"
    );

    // 3. Train with progress bar
    let n_epochs = config.n_epochs;
    let trainer = Trainer::new(config, simulator, observed).context("Invalid training setup")?;

    let pb = ProgressBar::new(n_epochs as u64);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}")?
            .progress_chars("=> "),
    );
    pb.set_message("warmup");

    let report = trainer
        .run_with_observer(|snapshot| {
            pb.set_message(format!(
                "loc={:.3} sd={:.3} d={:.4}",
                snapshot.location[0], snapshot.std_dev[0], snapshot.diagnostic
            ));
            pb.inc(1);
        })
        .context("Training failed")?;
    pb.finish_with_message("done");

    // 4. Write report
    write_report(&args.output, &report)?;

    // 5. Print summary
    let elapsed = start.elapsed();
    println!("\n--- Run Summary ---");
    println!("Epochs: {}", report.n_epochs);
    println!("Location: {:?}", report.final_proposal.location);
    println!("Std dev: {:?}", report.final_proposal.std_dev());
    if let Some(last) = report.loss_trace.last() {
        println!("Final diagnostic: {last:.4}");
    }
    println!("Output: {}", args.output.display());
    println!("Elapsed: {:.1}s", elapsed.as_secs_f64());

    Ok(report)
}

fn write_report(path: &Path, report: &TrainingReport) -> anyhow::Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let file = std::fs::File::create(path)
        .with_context(|| format!("Failed to create {}", path.display()))?;
    serde_json::to_writer_pretty(std::io::BufWriter::new(file), report)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;
    tracing::info!(path = %path.display(), "Wrote training report");
    Ok(())
}

fn load_report(path: &Path) -> anyhow::Result<TrainingReport> {
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    serde_json::from_reader(std::io::BufReader::new(file))
        .with_context(|| format!("Failed to parse {}", path.display()))
}

/// Condensed view of a report.
#[derive(Debug, Serialize, PartialEq)]
pub struct ReportSummary {
    pub seed: u64,
    pub n_epochs: usize,
    pub location: Vec<f64>,
    pub log_scale: Vec<f64>,
    pub std_dev: Vec<f64>,
    pub diagnostic_first: Option<f64>,
    pub diagnostic_last: Option<f64>,
    pub diagnostic_min: Option<f64>,
    pub diagnostic_max: Option<f64>,
    pub diagnostic_mean: Option<f64>,
}

impl ReportSummary {
    pub fn from_report(report: &TrainingReport) -> Self {
        let trace = &report.loss_trace;
        Self {
            seed: report.seed,
            n_epochs: report.n_epochs,
            location: report.final_proposal.location.clone(),
            log_scale: report.final_proposal.log_scale.clone(),
            std_dev: report.final_proposal.std_dev(),
            diagnostic_first: trace.values().first().copied(),
            diagnostic_last: trace.last(),
            diagnostic_min: trace.min(),
            diagnostic_max: trace.max(),
            diagnostic_mean: trace.mean(),
        }
    }
}

/// Print the final proposal and diagnostic statistics of a report.
pub fn run_summary(args: SummaryArgs) -> anyhow::Result<()> {
    let report = load_report(&args.input)?;
    let summary = ReportSummary::from_report(&report);

    if args.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
        return Ok(());
    }

    let fmt = |v: Option<f64>| v.map_or_else(|| "-".to_string(), |x| format!("{x:.4}"));
    println!("--- Report Summary ---");
    println!("File: {}", args.input.display());
    println!("Seed: {}", summary.seed);
    println!("Epochs: {}", summary.n_epochs);
    println!("Location: {:?}", summary.location);
    println!("Log scale: {:?}", summary.log_scale);
    println!("Std dev: {:?}", summary.std_dev);
    println!(
        "Diagnostic: first={} last={} min={} max={} mean={}",
        fmt(summary.diagnostic_first),
        fmt(summary.diagnostic_last),
        fmt(summary.diagnostic_min),
        fmt(summary.diagnostic_max),
        fmt(summary.diagnostic_mean),
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SMALL_TOML: &str = r#"
[simulator]
true_theta = [0.5, -0.6931471805599453]
n_observed = 500
observed_seed = 123

[training]
batch_size = 8
n_epochs = 4
warmup_steps = 3
retrain_steps = 2
diagnostic_batch_size = 40
"#;

    fn write_config(dir: &Path, contents: &str) -> PathBuf {
        let path = dir.join("experiment.toml");
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_run_writes_report_and_summary_reads_it() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = write_config(tmp.path(), SMALL_TOML);
        let output = tmp.path().join("out").join("report.json");

        let report = run_experiment(RunArgs {
            config,
            output: output.clone(),
            epochs: Some(2),
            seed: None,
        })
        .unwrap();
        assert_eq!(report.n_epochs, 2);
        assert_eq!(report.seed, 123);

        let loaded = load_report(&output).unwrap();
        assert_eq!(loaded, report);

        let summary = ReportSummary::from_report(&loaded);
        assert_eq!(summary.location, report.final_proposal.location);
        assert_eq!(summary.diagnostic_last, report.loss_trace.last());

        run_summary(SummaryArgs { input: output.clone(), json: false }).unwrap();
        run_summary(SummaryArgs { input: output, json: true }).unwrap();
    }

    #[test]
    fn test_seed_flag_changes_run() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = write_config(tmp.path(), SMALL_TOML);
        let run = |seed: u64, name: &str| {
            run_experiment(RunArgs {
                config: config.clone(),
                output: tmp.path().join(name),
                epochs: None,
                seed: Some(seed),
            })
            .unwrap()
        };
        let a = run(1, "a.json");
        let b = run(1, "b.json");
        let c = run(2, "c.json");
        assert_eq!(a, b);
        assert_ne!(a.final_proposal, c.final_proposal);
        assert_eq!(a.n_epochs, 4);
    }

    #[test]
    fn test_wrong_theta_length_is_rejected() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = write_config(tmp.path(), "[simulator]\ntrue_theta = [0.5]\n");
        let err = run_experiment(RunArgs {
            config,
            output: tmp.path().join("report.json"),
            epochs: None,
            seed: None,
        })
        .unwrap_err();
        assert!(err.to_string().contains("true_theta"));
    }

    #[test]
    fn test_invalid_training_config_is_reported() {
        let tmp = tempfile::TempDir::new().unwrap();
        let config = write_config(
            tmp.path(),
            "[simulator]\ntrue_theta = [0.5, 0.0]\nn_observed = 100\n\n[training]\nbatch_size = 7\n",
        );
        let err = run_experiment(RunArgs {
            config,
            output: tmp.path().join("report.json"),
            epochs: Some(1),
            seed: None,
        })
        .unwrap_err();
        assert!(format!("{err:#}").contains("batch_size"));
    }

    #[test]
    fn test_summary_missing_file() {
        let err = run_summary(SummaryArgs {
            input: PathBuf::from("/nonexistent/report.json"),
            json: false,
        })
        .unwrap_err();
        assert!(err.to_string().contains("Failed to open"));
    }
}
