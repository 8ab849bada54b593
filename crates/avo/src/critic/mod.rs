//! Wasserstein critic: parameters, burn network, loss with gradient penalty,
//! and the gradient function driven by the critic's optimizer.

pub mod bridge;
pub mod loss;
pub mod network;

use burn::backend::ndarray::NdArray;
use burn::backend::Autodiff;
use burn::optim::GradientsParams;
use rand::rngs::StdRng;
use rand::Rng;
use rand_distr::Uniform;
use serde::{Deserialize, Serialize};

use crate::batch::Batch;
use crate::error::{AvoError, Result};
use crate::params::{GradientDict, ParamDict, ParamGroup, ParamGroups};
use bridge::{batch_to_tensor, tensor_to_batch, tensor_to_vec};
use network::CriticNet;

pub use loss::{CriticLoss, CriticLossInputs, CriticObjective};

/// Backend for plain evaluation (scores, input gradients, diagnostics).
pub type EvalBackend = NdArray<f64>;

/// Backend for parameter gradients of the critic loss.
pub type TrainBackend = Autodiff<NdArray<f64>>;

/// Number of affine layers: two hidden plus the scalar head.
pub const N_LAYERS: usize = 3;

/// Trainable critic parameters: per-layer weight matrices `(d_out, d_in)`,
/// row-major, and bias vectors.
///
/// The layer chain is fixed at construction; loading a [`ParamDict`] of a
/// different shape is an error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CriticParams {
    pub n_features: usize,
    pub n_hidden: usize,
    pub weights: Vec<Vec<f64>>,
    pub biases: Vec<Vec<f64>>,
}

impl CriticParams {
    /// Glorot-uniform weights, zero biases.
    ///
    /// Each weight is drawn from `Uniform(-b, b)` with
    /// `b = sqrt(6 / (fan_in + fan_out))`.
    pub fn glorot(n_features: usize, n_hidden: usize, rng: &mut StdRng) -> Self {
        let shapes = Self::shapes_for(n_features, n_hidden);
        let weights = shapes
            .iter()
            .map(|&[d_out, d_in]| {
                let bound = (6.0 / (d_in + d_out) as f64).sqrt();
                let unit = Uniform::new_inclusive(-bound, bound);
                (0..d_out * d_in).map(|_| rng.sample(unit)).collect()
            })
            .collect();
        let biases = shapes.iter().map(|&[d_out, _]| vec![0.0; d_out]).collect();
        Self { n_features, n_hidden, weights, biases }
    }

    /// Build from explicit layer values, checking every shape.
    pub fn from_layers(
        n_features: usize,
        n_hidden: usize,
        weights: Vec<Vec<f64>>,
        biases: Vec<Vec<f64>>,
    ) -> Result<Self> {
        let shapes = Self::shapes_for(n_features, n_hidden);
        if weights.len() != N_LAYERS || biases.len() != N_LAYERS {
            return Err(AvoError::shape(
                "critic layers",
                &[N_LAYERS, N_LAYERS],
                &[weights.len(), biases.len()],
            ));
        }
        for (k, [d_out, d_in]) in shapes.iter().enumerate() {
            if weights[k].len() != d_out * d_in {
                return Err(AvoError::shape(Self::weight_name(k), &[*d_out, *d_in], &[weights[k].len()]));
            }
            if biases[k].len() != *d_out {
                return Err(AvoError::shape(Self::bias_name(k), &[*d_out], &[biases[k].len()]));
            }
        }
        Ok(Self { n_features, n_hidden, weights, biases })
    }

    fn shapes_for(n_features: usize, n_hidden: usize) -> [[usize; 2]; N_LAYERS] {
        [[n_hidden, n_features], [n_hidden, n_hidden], [1, n_hidden]]
    }

    /// `(d_out, d_in)` of each layer, input to output.
    pub fn layer_shapes(&self) -> [[usize; 2]; N_LAYERS] {
        Self::shapes_for(self.n_features, self.n_hidden)
    }

    pub fn weight_name(layer: usize) -> String {
        format!("layer{}.weight", layer + 1)
    }

    pub fn bias_name(layer: usize) -> String {
        format!("layer{}.bias", layer + 1)
    }

    pub fn num_params(&self) -> usize {
        self.weights.iter().chain(&self.biases).map(Vec::len).sum()
    }
}

impl ParamGroups for CriticParams {
    fn to_param_dict(&self) -> ParamDict {
        let mut dict = ParamDict::new();
        for (k, [d_out, d_in]) in self.layer_shapes().into_iter().enumerate() {
            dict.insert(
                Self::weight_name(k),
                ParamGroup { shape: vec![d_out, d_in], values: self.weights[k].clone() },
            );
            dict.insert(Self::bias_name(k), ParamGroup::vector(self.biases[k].clone()));
        }
        dict
    }

    fn load_param_dict(&mut self, dict: &ParamDict) -> Result<()> {
        let shapes = self.layer_shapes();
        // Validate everything before touching any layer.
        let mut weights = Vec::with_capacity(N_LAYERS);
        let mut biases = Vec::with_capacity(N_LAYERS);
        for (k, [d_out, d_in]) in shapes.into_iter().enumerate() {
            weights.push(dict.values(&Self::weight_name(k), &[d_out, d_in])?.to_vec());
            biases.push(dict.values(&Self::bias_name(k), &[d_out])?.to_vec());
        }
        self.weights = weights;
        self.biases = biases;
        Ok(())
    }
}

/// Anything that scores observation rows and exposes the exact gradient of
/// each score with respect to its row.
pub trait Scorer {
    fn score(&self, x: &Batch) -> Result<Vec<f64>>;

    /// Row-wise `∇_x score(x)`, same shape as `x`.
    fn input_gradient(&self, x: &Batch) -> Result<Batch>;
}

/// The critic: parameters plus the fixed leaky-rectifier slope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Critic {
    params: CriticParams,
    negative_slope: f64,
}

impl Critic {
    pub fn new(params: CriticParams, negative_slope: f64) -> Self {
        Self { params, negative_slope }
    }

    pub fn params(&self) -> &CriticParams {
        &self.params
    }

    pub fn negative_slope(&self) -> f64 {
        self.negative_slope
    }

    pub fn n_features(&self) -> usize {
        self.params.n_features
    }

    /// A copy of this critic carrying `dict` as its parameters.
    pub fn with_param_dict(&self, dict: &ParamDict) -> Result<Critic> {
        let mut trial = self.clone();
        trial.params.load_param_dict(dict)?;
        Ok(trial)
    }

    fn eval_net(&self) -> CriticNet<EvalBackend> {
        CriticNet::from_params(&self.params, self.negative_slope, &Default::default())
    }

    fn check_width(&self, x: &Batch) -> Result<()> {
        if x.n_features() != self.params.n_features {
            return Err(AvoError::shape(
                "critic input",
                &[self.params.n_features],
                &[x.n_features()],
            ));
        }
        Ok(())
    }

    /// Critic loss without gradients, used for monitoring.
    pub fn loss(&self, inputs: &CriticLossInputs, lambda_gp: f64) -> Result<CriticLoss> {
        self.check_width(inputs.generated())?;
        let device = Default::default();
        let net = self.eval_net();
        let terms = loss::evaluate(&net, inputs, lambda_gp, &device)?;
        terms.to_loss()
    }

    /// Critic loss and its gradient with respect to every critic parameter.
    pub fn loss_and_grad(
        &self,
        inputs: &CriticLossInputs,
        lambda_gp: f64,
    ) -> Result<(CriticLoss, GradientDict)> {
        self.check_width(inputs.generated())?;
        let device = Default::default();
        let net = CriticNet::<TrainBackend>::from_params(&self.params, self.negative_slope, &device);
        let terms = loss::evaluate(&net, inputs, lambda_gp, &device)?;
        let value = terms.to_loss()?;
        let grads = GradientsParams::from_grads(terms.total.backward(), &net);
        let dict = net.gradient_dict(&grads)?;
        dict.ensure_finite("critic gradient")?;
        Ok((value, dict))
    }
}

impl Scorer for Critic {
    fn score(&self, x: &Batch) -> Result<Vec<f64>> {
        self.check_width(x)?;
        if x.n_rows() == 0 {
            return Ok(Vec::new());
        }
        let net = self.eval_net();
        tensor_to_vec(net.forward(batch_to_tensor(x, &Default::default())))
    }

    fn input_gradient(&self, x: &Batch) -> Result<Batch> {
        self.check_width(x)?;
        if x.n_rows() == 0 {
            return Batch::new(0, x.n_features(), Vec::new());
        }
        let net = self.eval_net();
        tensor_to_batch(net.input_gradient(batch_to_tensor(x, &Default::default())))
    }
}

impl ParamGroups for Critic {
    fn to_param_dict(&self) -> ParamDict {
        self.params.to_param_dict()
    }

    fn load_param_dict(&mut self, dict: &ParamDict) -> Result<()> {
        self.params.load_param_dict(dict)
    }
}

/// Row-wise reference forms of the loss terms, for checking the tensor
/// versions in [`loss`] against any [`Scorer`].
///
/// `mean(-label * score + (1 - label) * score)`: generated rows (label 0)
/// push the loss up, observed rows (label 1) push it down.
#[cfg(test)]
pub(crate) fn wasserstein_loss(scores: &[f64], labels: &[f64]) -> Result<f64> {
    if scores.len() != labels.len() {
        return Err(AvoError::shape("labels", &[scores.len()], &[labels.len()]));
    }
    if scores.is_empty() {
        return Ok(0.0);
    }
    let total: f64 = scores
        .iter()
        .zip(labels)
        .map(|(s, y)| -y * s + (1.0 - y) * s)
        .sum();
    Ok(total / scores.len() as f64)
}

/// Unweighted gradient penalty `mean((‖∇_x score(x̂)‖₂ - 1)²)` for any scorer.
#[cfg(test)]
pub(crate) fn gradient_penalty<S: Scorer + ?Sized>(scorer: &S, x_hat: &Batch) -> Result<f64> {
    if x_hat.n_rows() == 0 {
        return Ok(0.0);
    }
    let grad = scorer.input_gradient(x_hat)?;
    let total: f64 = grad
        .rows()
        .map(|g| {
            let norm = g.iter().map(|v| v * v).sum::<f64>().sqrt();
            (norm - 1.0).powi(2)
        })
        .sum();
    Ok(total / x_hat.n_rows() as f64)
}
