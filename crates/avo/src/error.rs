/// Errors raised by the training core.
///
/// Every variant aborts the current run; nothing in the crate retries.
#[derive(Debug, thiserror::Error)]
pub enum AvoError {
    /// Two buffers that must agree in shape do not.
    #[error("shape mismatch in {context}: expected {expected:?}, got {actual:?}")]
    Shape {
        context: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// A parameter dictionary lacks a group the consumer requires.
    #[error("missing parameter group `{0}`")]
    MissingGroup(String),

    /// NaN or infinity in a gradient, loss or parameter.
    #[error("non-finite value in {0}")]
    NonFinite(String),

    /// Invalid configuration, rejected before any optimizer state exists.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// The simulator could not produce observations.
    #[error("simulator error: {0}")]
    Simulator(String),

    /// Data could not be read back out of a burn tensor.
    #[error("tensor conversion error: {0}")]
    Tensor(String),
}

impl AvoError {
    /// Convenience constructor for [`AvoError::Shape`].
    pub fn shape(context: impl Into<String>, expected: &[usize], actual: &[usize]) -> Self {
        AvoError::Shape {
            context: context.into(),
            expected: expected.to_vec(),
            actual: actual.to_vec(),
        }
    }
}

pub type Result<T> = std::result::Result<T, AvoError>;

/// Fail with [`AvoError::NonFinite`] if any value is NaN or infinite.
pub(crate) fn ensure_finite(values: &[f64], context: impl FnOnce() -> String) -> Result<()> {
    if values.iter().all(|v| v.is_finite()) {
        Ok(())
    } else {
        Err(AvoError::NonFinite(context()))
    }
}
