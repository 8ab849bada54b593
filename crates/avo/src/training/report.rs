//! Per-epoch records and the final run report.

use serde::{Deserialize, Serialize};

use crate::critic::CriticLoss;
use crate::proposal::GaussianProposal;

/// Append-only diagnostic values, one per epoch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LossTrace {
    values: Vec<f64>,
}

impl LossTrace {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, value: f64) {
        self.values.push(value);
    }

    pub fn values(&self) -> &[f64] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn last(&self) -> Option<f64> {
        self.values.last().copied()
    }

    pub fn mean(&self) -> Option<f64> {
        if self.values.is_empty() {
            return None;
        }
        Some(self.values.iter().sum::<f64>() / self.values.len() as f64)
    }

    pub fn min(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::min)
    }

    pub fn max(&self) -> Option<f64> {
        self.values.iter().copied().reduce(f64::max)
    }
}

/// State of the proposal after one epoch, plus that epoch's diagnostic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpochSnapshot {
    pub epoch: usize,
    pub location: Vec<f64>,
    pub log_scale: Vec<f64>,
    pub std_dev: Vec<f64>,
    pub entropy: f64,
    /// Negated critic loss on the diagnostic batch.
    pub diagnostic: f64,
    /// Critic loss components on the diagnostic batch.
    pub critic: CriticLoss,
}

impl EpochSnapshot {
    pub(crate) fn new(epoch: usize, proposal: &GaussianProposal, critic: CriticLoss) -> Self {
        Self {
            epoch,
            location: proposal.location.clone(),
            log_scale: proposal.log_scale.clone(),
            std_dev: proposal.std_dev(),
            entropy: proposal.entropy(),
            diagnostic: -critic.total,
            critic,
        }
    }
}

/// Everything a finished run produces.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingReport {
    pub seed: u64,
    pub n_epochs: usize,
    pub loss_trace: LossTrace,
    pub snapshots: Vec<EpochSnapshot>,
    pub final_proposal: GaussianProposal,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trace_statistics() {
        let mut trace = LossTrace::new();
        assert_eq!(trace.mean(), None);
        assert_eq!(trace.min(), None);
        for v in [0.5, -1.0, 2.0] {
            trace.push(v);
        }
        assert_eq!(trace.len(), 3);
        assert_eq!(trace.last(), Some(2.0));
        assert_eq!(trace.min(), Some(-1.0));
        assert_eq!(trace.max(), Some(2.0));
        assert!((trace.mean().unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_snapshot_derives_from_proposal() {
        let proposal = GaussianProposal::from_parts(vec![0.5], vec![0.0]).unwrap();
        let loss = CriticLoss {
            total: -0.25,
            wasserstein: -0.3,
            penalty: 2.0,
            score_gap: 0.6,
            score_std: 1.0,
        };
        let snap = EpochSnapshot::new(7, &proposal, loss);
        assert_eq!(snap.epoch, 7);
        assert_eq!(snap.std_dev, vec![1.0]);
        assert_eq!(snap.diagnostic, 0.25);
        assert!((snap.entropy - proposal.entropy()).abs() < 1e-12);
    }

    #[test]
    fn test_report_json_shape() {
        let mut trace = LossTrace::new();
        trace.push(1.5);
        let report = TrainingReport {
            seed: 1,
            n_epochs: 1,
            loss_trace: trace,
            snapshots: Vec::new(),
            final_proposal: GaussianProposal::new(2, 0.0, 0.0),
        };
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["loss_trace"], serde_json::json!([1.5]));
        assert_eq!(json["final_proposal"]["location"], serde_json::json!([0.0, 0.0]));

        let back: TrainingReport = serde_json::from_value(json).unwrap();
        assert_eq!(back, report);
    }

    #[test]
    fn test_report_text_round_trip_is_exact() {
        let proposal =
            GaussianProposal::from_parts(vec![0.009999998700593914], vec![-0.009999994107774557]).unwrap();
        let mut trace = LossTrace::new();
        trace.push(0.1 + 0.2);
        let report = TrainingReport {
            seed: 123,
            n_epochs: 1,
            loss_trace: trace,
            snapshots: Vec::new(),
            final_proposal: proposal,
        };
        let text = serde_json::to_string_pretty(&report).unwrap();
        let back: TrainingReport = serde_json::from_str(&text).unwrap();
        assert_eq!(back, report);
        assert_eq!(back.final_proposal.std_dev(), report.final_proposal.std_dev());
    }
}
