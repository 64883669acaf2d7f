//! Multi-head self-attention and the residual block wrapping it.

use candle_core::{Module, ModuleT, Tensor, D};
use candle_nn::{layer_norm, Dropout, LayerNorm, Linear, VarBuilder};
use dylan_core::{Error, Result};

use crate::init::Initializer;

/// Dropout applied to attention probabilities
const ATTENTION_DROPOUT: f32 = 0.1;
const NORM_EPS: f64 = 1e-6;

/// Scaled dot-product self-attention with `n_heads` heads over the feature axis
pub struct MultiHeadAttention {
    query: Linear,
    key: Linear,
    value: Linear,
    output: Linear,
    attn_dropout: Dropout,
    n_heads: usize,
    head_dim: usize,
}

impl MultiHeadAttention {
    pub fn new(
        dim: usize,
        n_heads: usize,
        branch: &'static str,
        init: Initializer,
        vb: VarBuilder,
    ) -> Result<Self> {
        if n_heads == 0 || dim % n_heads != 0 {
            return Err(Error::HeadMismatch {
                branch,
                features: dim,
                heads: n_heads,
            });
        }
        let head_dim = dim / n_heads;

        let query = init.linear(dim, dim, vb.pp("query"))?;
        let key = init.linear(dim, dim, vb.pp("key"))?;
        let value = init.linear(dim, dim, vb.pp("value"))?;
        let output = init.linear(dim, dim, vb.pp("output"))?;

        Ok(Self {
            query,
            key,
            value,
            output,
            attn_dropout: Dropout::new(ATTENTION_DROPOUT),
            n_heads,
            head_dim,
        })
    }

    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq_len, dim) = x.dims3()?;

        let heads = |t: Tensor| -> Result<Tensor> {
            Ok(t.reshape((batch, seq_len, self.n_heads, self.head_dim))?
                .transpose(1, 2)?
                .contiguous()?)
        };

        // [batch, heads, seq, head_dim]
        let q = heads(self.query.forward(x)?)?;
        let k = heads(self.key.forward(x)?)?;
        let v = heads(self.value.forward(x)?)?;

        let scale = (self.head_dim as f64).sqrt();
        let scores = (q.matmul(&k.t()?)? / scale)?;
        let attn = candle_nn::ops::softmax(&scores, D::Minus1)?;
        let attn = self.attn_dropout.forward_t(&attn, train)?;

        let out = attn.matmul(&v)?;
        let out = out.transpose(1, 2)?.reshape((batch, seq_len, dim))?;

        Ok(self.output.forward(&out)?)
    }

    pub fn n_heads(&self) -> usize {
        self.n_heads
    }
}

/// Self-attention with residual connection, layer norm and dropout:
/// `dropout(norm(x + attn(x)))`
pub struct AttentionBlock {
    attention: MultiHeadAttention,
    norm: LayerNorm,
    dropout: Dropout,
    features: usize,
}

impl AttentionBlock {
    pub fn new(
        features: usize,
        n_heads: usize,
        dropout: f64,
        branch: &'static str,
        init: Initializer,
        vb: VarBuilder,
    ) -> Result<Self> {
        let attention = MultiHeadAttention::new(features, n_heads, branch, init, vb.pp("attn"))?;
        let norm = layer_norm(features, NORM_EPS, vb.pp("norm"))?;

        Ok(Self {
            attention,
            norm,
            dropout: Dropout::new(dropout as f32),
            features,
        })
    }

    /// `x`: [batch, seq, features], output has the same shape
    pub fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, seq_len, features) = x.dims3()?;
        if features != self.features {
            return Err(Error::ShapeMismatch {
                context: "attention block",
                expected: vec![batch, seq_len, self.features],
                actual: vec![batch, seq_len, features],
            });
        }

        let attn_out = self.attention.forward_t(x, train)?;
        let x = (x + attn_out)?;
        let x = self.norm.forward(&x)?;
        Ok(self.dropout.forward_t(&x, train)?)
    }

    pub fn n_heads(&self) -> usize {
        self.attention.n_heads()
    }
}
