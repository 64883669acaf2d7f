//! Dual-axis attention block: one attention pass across joints, one across frames.
//!
//! Both streams arrive as `[batch, channels, frames, joints]`. Each is folded
//! into a `[batch, seq, features]` view for its attention block and unfolded
//! with the exact inverse permutation afterwards, so every element returns to
//! the position it came from.

use candle_core::Tensor;
use candle_nn::VarBuilder;
use dylan_core::{Error, FeatureLayout, ModelConfig, Result};

use crate::attention::AttentionBlock;
use crate::init::Initializer;

pub struct MtBlock {
    spatial: AttentionBlock,
    temporal: AttentionBlock,
    layout: FeatureLayout,
    channels: usize,
    frames: usize,
    joints: usize,
}

impl MtBlock {
    pub fn new(config: &ModelConfig, vb: VarBuilder) -> Result<Self> {
        let init = Initializer::new(config.block_init);
        let (_, spatial_features) = config.spatial_view();
        let (_, temporal_features) = config.temporal_view();

        let spatial = AttentionBlock::new(
            spatial_features,
            config.spatial_heads,
            config.dropout,
            "spatial",
            init,
            vb.pp("s_att"),
        )?;
        let temporal = AttentionBlock::new(
            temporal_features,
            config.temporal_heads,
            config.dropout,
            "temporal",
            init,
            vb.pp("t_att"),
        )?;

        Ok(Self {
            spatial,
            temporal,
            layout: config.feature_layout,
            channels: config.in_channels,
            frames: config.num_frame,
            joints: config.num_node,
        })
    }

    /// Attend across joints in `x` and across frames in `y`.
    pub fn forward_t(&self, x: &Tensor, y: &Tensor, train: bool) -> Result<(Tensor, Tensor)> {
        let batch = self.check_input(x)?;
        let batch_y = self.check_input(y)?;
        if batch != batch_y {
            return Err(Error::ShapeMismatch {
                context: "dual-axis block streams",
                expected: x.dims().to_vec(),
                actual: y.dims().to_vec(),
            });
        }

        let xs = self.spatial.forward_t(&self.spatial_view(x)?, train)?;
        let x = self.from_spatial_view(&xs, batch)?;

        let ys = self.temporal.forward_t(&self.temporal_view(y)?, train)?;
        let y = self.from_temporal_view(&ys, batch)?;

        Ok((x, y))
    }

    fn check_input(&self, t: &Tensor) -> Result<usize> {
        let (batch, channels, frames, joints) = t.dims4()?;
        if (channels, frames, joints) != (self.channels, self.frames, self.joints) {
            return Err(Error::ShapeMismatch {
                context: "dual-axis block input",
                expected: vec![batch, self.channels, self.frames, self.joints],
                actual: vec![batch, channels, frames, joints],
            });
        }
        Ok(batch)
    }

    pub(crate) fn spatial_view(&self, x: &Tensor) -> Result<Tensor> {
        let (b, c, t, j) = (x.dim(0)?, self.channels, self.frames, self.joints);
        let view = match self.layout {
            // [B, J, T, C] -> [B, J, T*C]
            FeatureLayout::Merged => x.permute((0, 3, 2, 1))?.contiguous()?.reshape((b, j, t * c))?,
            // [B, J, C, T] -> [B, J*C, T]
            FeatureLayout::PerChannel => x.permute((0, 3, 1, 2))?.contiguous()?.reshape((b, j * c, t))?,
        };
        Ok(view)
    }

    pub(crate) fn from_spatial_view(&self, v: &Tensor, b: usize) -> Result<Tensor> {
        let (c, t, j) = (self.channels, self.frames, self.joints);
        let x = match self.layout {
            FeatureLayout::Merged => v.reshape((b, j, t, c))?.permute((0, 3, 2, 1))?,
            FeatureLayout::PerChannel => v.reshape((b, j, c, t))?.permute((0, 2, 3, 1))?,
        };
        Ok(x.contiguous()?)
    }

    pub(crate) fn temporal_view(&self, y: &Tensor) -> Result<Tensor> {
        let (b, c, t, j) = (y.dim(0)?, self.channels, self.frames, self.joints);
        let view = match self.layout {
            // [B, T, J, C] -> [B, T, J*C]
            FeatureLayout::Merged => y.permute((0, 2, 3, 1))?.contiguous()?.reshape((b, t, j * c))?,
            // [B, T, C, J] -> [B, T*C, J]
            FeatureLayout::PerChannel => y.permute((0, 2, 1, 3))?.contiguous()?.reshape((b, t * c, j))?,
        };
        Ok(view)
    }

    pub(crate) fn from_temporal_view(&self, v: &Tensor, b: usize) -> Result<Tensor> {
        let (c, t, j) = (self.channels, self.frames, self.joints);
        let y = match self.layout {
            FeatureLayout::Merged => v.reshape((b, t, j, c))?.permute((0, 3, 1, 2))?,
            FeatureLayout::PerChannel => v.reshape((b, t, c, j))?.permute((0, 2, 1, 3))?,
        };
        Ok(y.contiguous()?)
    }

    pub fn heads(&self) -> (usize, usize) {
        (self.spatial.n_heads(), self.temporal.n_heads())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;

    fn small_config(layout: FeatureLayout, channels: usize, frames: usize, joints: usize) -> ModelConfig {
        let base = match layout {
            FeatureLayout::Merged => ModelConfig::v5(channels, 4 * channels, 5),
            FeatureLayout::PerChannel => ModelConfig::v8(channels, 2 * channels, 5),
        };
        ModelConfig {
            num_frame: frames,
            num_node: joints,
            spatial_heads: 1,
            temporal_heads: 1,
            ..base
        }
    }

    fn max_abs_diff(a: &Tensor, b: &Tensor) -> Result<f32> {
        Ok((a - b)?.abs()?.max_all()?.to_scalar::<f32>()?)
    }

    #[test]
    fn test_views_are_exact_inverses() -> Result<()> {
        let device = Device::Cpu;
        for layout in [FeatureLayout::Merged, FeatureLayout::PerChannel] {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let block = MtBlock::new(&small_config(layout, 3, 7, 5), vb)?;

            let x = Tensor::arange(0f32, (2 * 3 * 7 * 5) as f32, &device)?.reshape((2, 3, 7, 5))?;

            let back = block.from_spatial_view(&block.spatial_view(&x)?, 2)?;
            assert_eq!(max_abs_diff(&x, &back)?, 0.0, "{layout:?} spatial");

            let back = block.from_temporal_view(&block.temporal_view(&x)?, 2)?;
            assert_eq!(max_abs_diff(&x, &back)?, 0.0, "{layout:?} temporal");
        }
        Ok(())
    }

    #[test]
    fn test_spatial_view_groups_by_joint() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let block = MtBlock::new(&small_config(FeatureLayout::Merged, 2, 3, 4), vb)?;

        let x = Tensor::arange(0f32, 24.0, &device)?.reshape((1, 2, 3, 4))?;
        let view = block.spatial_view(&x)?;
        assert_eq!(view.dims(), &[1, 4, 6]);

        // joint 1 collects x[0, c, t, 1] ordered by (t, c)
        let joint1 = view.get(0)?.get(1)?.to_vec1::<f32>()?;
        assert_eq!(joint1, vec![1.0, 13.0, 5.0, 17.0, 9.0, 21.0]);
        Ok(())
    }

    #[test]
    fn test_forward_preserves_shapes() -> Result<()> {
        let device = Device::Cpu;
        let cases = [
            (FeatureLayout::Merged, 4, 16, 22),
            (FeatureLayout::Merged, 2, 5, 9),
            (FeatureLayout::PerChannel, 3, 12, 22),
            (FeatureLayout::PerChannel, 4, 6, 25),
        ];

        for (layout, channels, frames, joints) in cases {
            let varmap = VarMap::new();
            let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
            let block = MtBlock::new(&small_config(layout, channels, frames, joints), vb)?;

            let x = Tensor::randn(0f32, 1.0, (2, channels, frames, joints), &device)?;
            let (x2, y2) = block.forward_t(&x, &x, true)?;

            assert_eq!(x2.dims(), x.dims());
            assert_eq!(y2.dims(), x.dims());
        }
        Ok(())
    }

    #[test]
    fn test_head_split_per_preset() -> Result<()> {
        let device = Device::Cpu;

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let v5 = MtBlock::new(&ModelConfig::v5(16, 64, 28), vb)?;
        assert_eq!(v5.heads(), (16, 8));

        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let v8 = MtBlock::new(&ModelConfig::v8(3, 6, 28), vb)?;
        assert_eq!(v8.heads(), (4, 2));
        Ok(())
    }

    #[test]
    fn test_rejects_undeclared_joint_count() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let block = MtBlock::new(&small_config(FeatureLayout::Merged, 2, 8, 22), vb)?;

        let x = Tensor::zeros((2, 2, 8, 21), DType::F32, &device)?;
        assert!(matches!(
            block.forward_t(&x, &x, false),
            Err(Error::ShapeMismatch { .. })
        ));
        Ok(())
    }
}
