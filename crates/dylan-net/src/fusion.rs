//! Attentional feature fusion (AFF) and its iterative variant (iAFF).
//!
//! Both gates combine two same-shaped `[batch, channels, frames, joints]`
//! tensors. The gate is `sigmoid(local(s) + global(s))`, where the local
//! branch keeps the full resolution and the global branch works on the
//! per-channel mean and is broadcast back.

use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{BatchNorm, Conv2d, VarBuilder};
use dylan_core::{Error, FusionConfig, FusionKind, Result};

use crate::init::Initializer;

/// conv1x1 -> BN -> ReLU -> conv1x1 -> BN, optionally on globally pooled input
struct GateBranch {
    conv1: Conv2d,
    bn1: BatchNorm,
    conv2: Conv2d,
    bn2: BatchNorm,
    global: bool,
}

impl GateBranch {
    fn new(channels: usize, inter_channels: usize, global: bool, vb: VarBuilder) -> Result<Self> {
        let init = Initializer::default();
        Ok(Self {
            conv1: init.conv2d_1x1(channels, inter_channels, vb.pp("conv1"))?,
            bn1: init.batch_norm(inter_channels, vb.pp("bn1"))?,
            conv2: init.conv2d_1x1(inter_channels, channels, vb.pp("conv2"))?,
            bn2: init.batch_norm(channels, vb.pp("bn2"))?,
            global,
        })
    }

    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = if self.global {
            x.mean_keepdim(3)?.mean_keepdim(2)?
        } else {
            x.clone()
        };
        let x = self.conv1.forward(&x)?;
        let x = self.bn1.forward_t(&x, train)?.relu()?;
        let x = self.conv2.forward(&x)?;
        Ok(self.bn2.forward_t(&x, train)?)
    }
}

/// `x * gate + residual * (1 - gate)`, scaled
fn blend(x: &Tensor, residual: &Tensor, gate: &Tensor, scale: f64) -> Result<Tensor> {
    let keep = x.mul(gate)?;
    let rest = residual.mul(&gate.affine(-1.0, 1.0)?)?;
    Ok((keep + rest)?.affine(scale, 0.0)?)
}

fn check_pair(x: &Tensor, residual: &Tensor) -> Result<()> {
    if x.dims() != residual.dims() {
        return Err(Error::ShapeMismatch {
            context: "feature fusion",
            expected: x.dims().to_vec(),
            actual: residual.dims().to_vec(),
        });
    }
    Ok(())
}

/// Sum of a local and a global branch, squashed into a gate
struct Gate {
    local: GateBranch,
    global: GateBranch,
}

impl Gate {
    fn new(channels: usize, inter_channels: usize, local: &str, global: &str, vb: &VarBuilder) -> Result<Self> {
        Ok(Self {
            local: GateBranch::new(channels, inter_channels, false, vb.pp(local))?,
            global: GateBranch::new(channels, inter_channels, true, vb.pp(global))?,
        })
    }

    fn forward_t(&self, s: &Tensor, train: bool) -> Result<Tensor> {
        let xl = self.local.forward_t(s, train)?;
        let xg = self.global.forward_t(s, train)?;
        Ok(candle_nn::ops::sigmoid(&xl.broadcast_add(&xg)?)?)
    }
}

/// Single-pass fusion: `2*x*w + 2*residual*(1-w)`
pub struct Aff {
    gate: Gate,
}

impl Aff {
    pub fn new(channels: usize, inter_channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            gate: Gate::new(channels, inter_channels, "local", "global", &vb)?,
        })
    }

    /// Gate weights in [0, 1], same shape as the inputs
    pub fn gate(&self, x: &Tensor, residual: &Tensor, train: bool) -> Result<Tensor> {
        check_pair(x, residual)?;
        self.gate.forward_t(&(x + residual)?, train)
    }

    pub fn forward_t(&self, x: &Tensor, residual: &Tensor, train: bool) -> Result<Tensor> {
        let wei = self.gate(x, residual, train)?;
        // the mean gate is 0.5, doubling keeps the output on the input scale
        blend(x, residual, &wei, 2.0)
    }
}

/// Two-pass fusion: the first blend feeds a second, independent gate
pub struct Iaff {
    first: Gate,
    second: Gate,
}

impl Iaff {
    pub fn new(channels: usize, inter_channels: usize, vb: VarBuilder) -> Result<Self> {
        Ok(Self {
            first: Gate::new(channels, inter_channels, "local", "global", &vb)?,
            second: Gate::new(channels, inter_channels, "local2", "global2", &vb)?,
        })
    }

    /// Gate weights of both passes
    pub fn gates(&self, x: &Tensor, residual: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        check_pair(x, residual)?;
        let wei = self.first.forward_t(&(x + residual)?, train)?;
        let xi = blend(x, residual, &wei, 1.0)?;
        let wei2 = self.second.forward_t(&xi, train)?;
        Ok((wei, wei2))
    }

    pub fn forward_t(&self, x: &Tensor, residual: &Tensor, train: bool) -> Result<Tensor> {
        let (_, wei2) = self.gates(x, residual, train)?;
        blend(x, residual, &wei2, 1.0)
    }
}

pub enum Fusion {
    Aff(Aff),
    Iaff(Iaff),
}

impl Fusion {
    pub fn new(channels: usize, config: &FusionConfig, vb: VarBuilder) -> Result<Self> {
        Ok(match config.kind {
            FusionKind::Aff => Self::Aff(Aff::new(channels, config.inter_channels, vb)?),
            FusionKind::Iaff => Self::Iaff(Iaff::new(channels, config.inter_channels, vb)?),
        })
    }

    pub fn forward_t(&self, x: &Tensor, residual: &Tensor, train: bool) -> Result<Tensor> {
        match self {
            Self::Aff(aff) => aff.forward_t(x, residual, train),
            Self::Iaff(iaff) => iaff.forward_t(x, residual, train),
        }
    }

    pub fn kind(&self) -> FusionKind {
        match self {
            Self::Aff(_) => FusionKind::Aff,
            Self::Iaff(_) => FusionKind::Iaff,
        }
    }
}
