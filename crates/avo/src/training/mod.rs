//! Training pipeline: run configuration, the bilevel loop between proposal and
//! critic, and the per-epoch records it produces.

pub mod config;
pub mod report;
pub mod trainer;

pub use config::AvoConfig;
pub use report::{EpochSnapshot, LossTrace, TrainingReport};
pub use trainer::{Phase, Trainer};
