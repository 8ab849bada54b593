use burn::module::Param;
use burn::optim::GradientsParams;
use burn::prelude::*;
use burn::tensor::backend::AutodiffBackend;

use crate::critic::bridge::{matrix_to_tensor, tensor_to_vec, vector_to_tensor};
use crate::critic::CriticParams;
use crate::error::Result;
use crate::params::{GradientDict, ParamGroup};

/// Affine layer `x W^T + b` with weight shape `(d_out, d_in)`.
#[derive(Module, Debug)]
pub struct CriticLayer<B: Backend> {
    pub(crate) weight: Param<Tensor<B, 2>>,
    pub(crate) bias: Param<Tensor<B, 1>>,
}

impl<B: Backend> CriticLayer<B> {
    fn from_values(weight: &[f64], bias: &[f64], shape: [usize; 2], device: &B::Device) -> Self {
        CriticLayer {
            weight: Param::from_tensor(matrix_to_tensor(weight, shape, device)),
            bias: Param::from_tensor(vector_to_tensor(bias, device)),
        }
    }

    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        x.matmul(self.weight.val().transpose()) + self.bias.val().unsqueeze_dim::<2>(0)
    }
}

/// Critic network: two leaky-rectified hidden layers and a linear scalar head.
///
/// ```text
/// (batch, n_features)
///   → layer1 (n_features→n_hidden) → leaky
///   → layer2 (n_hidden→n_hidden)   → leaky
///   → layer3 (n_hidden→1)          → squeeze
///   → score: (batch,)
/// ```
///
/// Built from [`CriticParams`] for each evaluation; the parameters themselves
/// live outside burn so the optimizer can treat them like any other group.
#[derive(Module, Debug)]
pub struct CriticNet<B: Backend> {
    pub(crate) layer1: CriticLayer<B>,
    pub(crate) layer2: CriticLayer<B>,
    pub(crate) layer3: CriticLayer<B>,
    negative_slope: f64,
}

/// Forward intermediates needed by the input gradient.
struct ForwardTrace<B: Backend> {
    /// Leaky-rectifier slope (1 or `negative_slope`) of each hidden unit.
    slope1: Tensor<B, 2>,
    slope2: Tensor<B, 2>,
    scores: Tensor<B, 1>,
}

impl<B: Backend> CriticNet<B> {
    pub fn from_params(params: &CriticParams, negative_slope: f64, device: &B::Device) -> Self {
        let shapes = params.layer_shapes();
        let layer = |k: usize| {
            CriticLayer::from_values(&params.weights[k], &params.biases[k], shapes[k], device)
        };
        CriticNet {
            layer1: layer(0),
            layer2: layer(1),
            layer3: layer(2),
            negative_slope,
        }
    }

    /// Per-row scores, shape `(batch,)`.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 1> {
        self.trace(x).scores
    }

    /// Exact gradient of each row's score with respect to that row's input.
    ///
    /// The leaky rectifier is piecewise linear, so the Jacobian of the score is
    /// `((slope2 ⊙ w3) W2 ⊙ slope1) W1` row by row. Written in tensor ops on
    /// the parameters, it stays differentiable with respect to them on an
    /// autodiff backend, which is what the gradient penalty needs.
    ///
    /// Input shape `(batch, n_features)`, output shape `(batch, n_features)`.
    pub fn input_gradient(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let trace = self.trace(x);
        let a2 = trace.slope2 * self.layer3.weight.val(); // (batch, n_hidden)
        let a1 = trace.slope1 * a2.matmul(self.layer2.weight.val()); // (batch, n_hidden)
        a1.matmul(self.layer1.weight.val())
    }

    fn slope(&self, z: &Tensor<B, 2>) -> Tensor<B, 2> {
        let negative = z.clone().lower_equal_elem(0.0);
        Tensor::ones(z.shape(), &z.device()).mask_fill(negative, self.negative_slope)
    }

    fn trace(&self, x: Tensor<B, 2>) -> ForwardTrace<B> {
        let z1 = self.layer1.forward(x);
        let slope1 = self.slope(&z1);
        let h1 = z1 * slope1.clone();

        let z2 = self.layer2.forward(h1);
        let slope2 = self.slope(&z2);
        let h2 = z2 * slope2.clone();

        let scores = self.layer3.forward(h2).squeeze::<1>(1);
        ForwardTrace { slope1, slope2, scores }
    }
}

impl<B: AutodiffBackend> CriticNet<B> {
    /// Collect parameter gradients into a [`GradientDict`] keyed like
    /// [`CriticParams`]. Parameters that received no gradient get zeros.
    pub fn gradient_dict(&self, grads: &GradientsParams) -> Result<GradientDict> {
        let mut dict = GradientDict::new();
        for (k, layer) in [&self.layer1, &self.layer2, &self.layer3].into_iter().enumerate() {
            let [d_out, d_in] = layer.weight.val().dims();
            let weight = match grads.get::<B::InnerBackend, 2>(layer.weight.id) {
                Some(g) => tensor_to_vec(g)?,
                None => vec![0.0; d_out * d_in],
            };
            let bias = match grads.get::<B::InnerBackend, 1>(layer.bias.id) {
                Some(g) => tensor_to_vec(g)?,
                None => vec![0.0; d_out],
            };
            dict.insert(CriticParams::weight_name(k), ParamGroup::new(vec![d_out, d_in], weight)?);
            dict.insert(CriticParams::bias_name(k), ParamGroup::vector(bias));
        }
        Ok(dict)
    }
}
