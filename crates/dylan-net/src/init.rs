//! Layer construction with explicit, per-kind parameter initialisation.
//!
//! Every convolution, linear layer and batch norm is created through an
//! [`Initializer`], which picks the weight distribution for that kind of
//! layer when the layer is built.

use candle_nn::{
    batch_norm, conv2d, linear, BatchNorm, Conv2d, Conv2dConfig, Init, Linear, VarBuilder,
};
use dylan_core::{InitScheme, Result};

const BN_EPS: f64 = 1e-5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Initializer {
    scheme: InitScheme,
}

impl Default for Initializer {
    fn default() -> Self {
        Self::new(InitScheme::Framework)
    }
}

impl Initializer {
    pub fn new(scheme: InitScheme) -> Self {
        Self { scheme }
    }

    pub fn scheme(&self) -> InitScheme {
        self.scheme
    }

    /// Pointwise 2D convolution with bias.
    ///
    /// Convolutions only appear in the input projection and the fusion
    /// gates, which always take the framework defaults.
    pub fn conv2d_1x1(&self, in_channels: usize, out_channels: usize, vb: VarBuilder) -> Result<Conv2d> {
        Ok(conv2d(in_channels, out_channels, 1, Conv2dConfig::default(), vb)?)
    }

    pub fn linear(&self, in_dim: usize, out_dim: usize, vb: VarBuilder) -> Result<Linear> {
        match self.scheme {
            InitScheme::Framework => Ok(linear(in_dim, out_dim, vb)?),
            InitScheme::Reference => {
                let stdev = (2.0 / (in_dim + out_dim) as f64).sqrt();
                let weight =
                    vb.get_with_hints((out_dim, in_dim), "weight", Init::Randn { mean: 0.0, stdev })?;
                let bias = vb.get_with_hints(out_dim, "bias", Init::Const(0.0))?;
                Ok(Linear::new(weight, Some(bias)))
            }
        }
    }

    /// Batch norm with unit scale and zero shift.
    ///
    /// The reference scheme resets batch norms to exactly this state, so
    /// both schemes share one construction.
    pub fn batch_norm(&self, num_features: usize, vb: VarBuilder) -> Result<BatchNorm> {
        Ok(batch_norm(num_features, BN_EPS, vb)?)
    }
}
