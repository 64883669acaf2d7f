//! Fully connected head: dense blocks of decreasing width and a linear classifier.

use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{BatchNorm, Dropout, Linear, VarBuilder};
use dylan_core::{Error, Result};

use crate::init::Initializer;

const NEGATIVE_SLOPE: f64 = 0.2;

/// Linear -> BatchNorm1d -> leaky ReLU -> dropout
pub struct DenseBlock {
    linear: Linear,
    bn: BatchNorm,
    dropout: Dropout,
}

impl DenseBlock {
    pub fn new(input_dim: usize, filters: usize, dropout: f64, vb: VarBuilder) -> Result<Self> {
        let init = Initializer::default();
        Ok(Self {
            linear: init.linear(input_dim, filters, vb.pp("linear"))?,
            bn: init.batch_norm(filters, vb.pp("bn"))?,
            dropout: Dropout::new(dropout as f32),
        })
    }

    /// `x`: [batch, input_dim] -> [batch, filters]
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let batch = x.dim(0)?;
        // per-batch statistics are undefined for a single sample
        if train && batch < 2 {
            return Err(Error::BatchTooSmall { batch });
        }

        let x = self.linear.forward(x)?;
        let x = self.bn.forward_t(&x, train)?;
        let x = candle_nn::ops::leaky_relu(&x, NEGATIVE_SLOPE)?;
        Ok(self.dropout.forward_t(&x, train)?)
    }
}

/// Dense blocks followed by a linear layer producing raw class scores
pub struct DenseStack {
    blocks: Vec<DenseBlock>,
    classifier: Linear,
}

impl DenseStack {
    pub fn new(
        input_dim: usize,
        widths: &[usize],
        num_class: usize,
        dropout: f64,
        vb: VarBuilder,
    ) -> Result<Self> {
        let mut blocks = Vec::with_capacity(widths.len());
        let mut in_dim = input_dim;
        for (i, &width) in widths.iter().enumerate() {
            blocks.push(DenseBlock::new(in_dim, width, dropout, vb.pp(format!("linear{}", i + 1)))?);
            in_dim = width;
        }

        let classifier = Initializer::default().linear(in_dim, num_class, vb.pp("fc"))?;

        Ok(Self { blocks, classifier })
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let mut x = x.clone();
        for block in &self.blocks {
            x = block.forward_t(&x, train)?;
        }
        Ok(self.classifier.forward(&x)?)
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }
}
