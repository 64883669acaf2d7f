//! Complete spatial/temporal attention network for skeleton action recognition.

use candle_core::{Module, ModuleT, Tensor};
use candle_nn::{BatchNorm, Conv2d, Dropout, VarBuilder};
use dylan_core::{Error, FusionKind, ModelConfig, Result};

use crate::block::MtBlock;
use crate::dense::DenseStack;
use crate::encoding::PositionalEncoding;
use crate::fusion::Fusion;
use crate::init::Initializer;

const INPUT_NEGATIVE_SLOPE: f64 = 0.1;

/// Pointwise lift of the raw joint coordinates to the embedding width
struct InputProjection {
    conv: Conv2d,
    bn: BatchNorm,
}

impl InputProjection {
    fn new(raw_channels: usize, channels: usize, vb: VarBuilder) -> Result<Self> {
        let init = Initializer::default();
        Ok(Self {
            conv: init.conv2d_1x1(raw_channels, channels, vb.pp("conv"))?,
            bn: init.batch_norm(channels, vb.pp("bn"))?,
        })
    }

    fn forward_t(&self, x: &Tensor, train: bool) -> Result<Tensor> {
        let x = self.conv.forward(x)?;
        let x = self.bn.forward_t(&x, train)?;
        Ok(candle_nn::ops::leaky_relu(&x, INPUT_NEGATIVE_SLOPE)?)
    }
}

/// Dylan MT-Net
///
/// A pose sequence `[batch, frames, joints, channels]` is embedded, tagged
/// with a positional code and sent through a stack of dual-axis attention
/// blocks that keep a spatial stream `x` and a temporal stream `y`. The two
/// streams are fused, optionally pooled over time, flattened and classified.
pub struct DylanMtNet {
    input_map: Option<InputProjection>,
    encoding: PositionalEncoding,
    blocks: Vec<MtBlock>,
    fusion: Fusion,
    pool_dropout: Dropout,
    dense: DenseStack,
    config: ModelConfig,
}

impl DylanMtNet {
    pub fn new(config: ModelConfig, vb: VarBuilder) -> Result<Self> {
        config.validate()?;

        let input_map = if config.input_projection {
            Some(InputProjection::new(
                config.raw_channels,
                config.in_channels,
                vb.pp("input_map"),
            )?)
        } else {
            None
        };

        let encoding = PositionalEncoding::from_config(&config, vb.device())?;

        let mut blocks = Vec::with_capacity(config.n_layers);
        for i in 0..config.n_layers {
            blocks.push(MtBlock::new(&config, vb.pp(format!("att_blocks.{}", i)))?);
        }

        let fusion = Fusion::new(config.in_channels, &config.fusion, vb.pp("fusion"))?;

        let dense = DenseStack::new(
            config.flattened_features(),
            &config.dense_widths,
            config.num_class,
            config.dense_dropout,
            vb.pp("head"),
        )?;

        tracing::info!(
            layers = config.n_layers,
            spatial_heads = config.spatial_heads,
            temporal_heads = config.temporal_heads,
            layout = ?config.feature_layout,
            fusion = ?config.fusion.kind,
            classes = config.num_class,
            "Dylan MT-Net constructed"
        );

        Ok(Self {
            input_map,
            encoding,
            blocks,
            fusion,
            pool_dropout: Dropout::new(config.dense_dropout as f32),
            dense,
            config,
        })
    }

    /// Forward pass
    ///
    /// # Arguments
    /// * `pose` - Joint trajectories of shape [batch, frames, joints, channels]
    /// * `train` - Use batch statistics and dropout
    ///
    /// # Returns
    /// Raw class scores of shape [batch, num_class]
    pub fn forward_t(&self, pose: &Tensor, train: bool) -> Result<Tensor> {
        let (batch, frames, joints, channels) = pose.dims4()?;
        let expected = (
            self.config.num_frame,
            self.config.num_node,
            self.config.input_channels(),
        );
        if (frames, joints, channels) != expected {
            return Err(Error::ShapeMismatch {
                context: "pose input",
                expected: vec![batch, expected.0, expected.1, expected.2],
                actual: vec![batch, frames, joints, channels],
            });
        }

        // [batch, channels, frames, joints]
        let x = pose.permute((0, 3, 1, 2))?.contiguous()?;
        let x = match &self.input_map {
            Some(map) => map.forward_t(&x, train)?,
            None => x,
        };
        let x = self.encoding.apply(&x)?;
        tracing::debug!(shape = ?x.dims(), "encoded input");

        let mut y = x.clone();
        let mut x = x;
        for block in &self.blocks {
            (x, y) = block.forward_t(&x, &y, train)?;
        }

        let z = self.fusion.forward_t(&x, &y, train)?;
        let z = match self.config.time_pool {
            Some(pool) => {
                let z = z.max_pool2d((pool, 1))?;
                self.pool_dropout.forward_t(&z, train)?
            }
            None => z,
        };
        tracing::debug!(shape = ?z.dims(), "fused features");

        let z = z.flatten_from(1)?;
        self.dense.forward_t(&z, train)
    }

    /// Inference forward pass
    pub fn forward(&self, pose: &Tensor) -> Result<Tensor> {
        self.forward_t(pose, false)
    }

    pub fn config(&self) -> &ModelConfig {
        &self.config
    }

    pub fn encoding(&self) -> &PositionalEncoding {
        &self.encoding
    }

    pub fn depth(&self) -> usize {
        self.blocks.len()
    }

    pub fn fusion_kind(&self) -> FusionKind {
        self.fusion.kind()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device};
    use candle_nn::VarMap;
    use dylan_core::{Domain, FusionConfig};

    fn assert_finite(t: &Tensor) -> Result<()> {
        let values = t.flatten_all()?.to_vec1::<f32>()?;
        assert!(values.iter().all(|v| v.is_finite()));
        Ok(())
    }

    #[test]
    fn test_v5_scenario_output_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = DylanMtNet::new(ModelConfig::v5(16, 64, 28), vb)?;
        assert_eq!(model.depth(), 6);

        let pose = Tensor::rand(0f32, 1.0, (20, 64, 22, 3), &device)?;
        let logits = model.forward_t(&pose, true)?;
        assert_eq!(logits.dims(), &[20, 28]);
        assert_finite(&logits)?;

        let logits = model.forward(&pose)?;
        assert_eq!(logits.dims(), &[20, 28]);
        assert_finite(&logits)?;
        Ok(())
    }

    #[test]
    fn test_v8_scenario_output_shape() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let model = DylanMtNet::new(ModelConfig::v8(3, 6, 28), vb)?;
        assert_eq!(model.depth(), 2);
        assert_eq!(model.fusion_kind(), FusionKind::Aff);

        let pose = Tensor::rand(0f32, 1.0, (20, 64, 22, 3), &device)?;
        let logits = model.forward_t(&pose, true)?;
        assert_eq!(logits.dims(), &[20, 28]);
        assert_finite(&logits)?;
        Ok(())
    }

    #[test]
    fn test_iaff_and_temporal_encoding_variant() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let mut config = ModelConfig::v5(8, 16, 5);
        config.num_frame = 12;
        config.n_layers = 2;
        config.spatial_heads = 4;
        config.temporal_heads = 2;
        config.encoding.domain = Domain::Temporal;
        config.fusion = FusionConfig {
            kind: FusionKind::Iaff,
            inter_channels: 2,
        };
        config.dense_widths = vec![32];

        let model = DylanMtNet::new(config, vb)?;
        assert_eq!(model.encoding().domain(), Domain::Temporal);

        let pose = Tensor::randn(0f32, 1.0, (4, 12, 22, 3), &device)?;
        let logits = model.forward_t(&pose, true)?;
        assert_eq!(logits.dims(), &[4, 5]);
        assert_finite(&logits)?;
        Ok(())
    }

    #[test]
    fn test_eval_forward_is_deterministic() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let mut config = ModelConfig::v8(3, 6, 10);
        config.num_frame = 16;
        let model = DylanMtNet::new(config, vb)?;

        let pose = Tensor::randn(0f32, 1.0, (2, 16, 22, 3), &device)?;
        let a = model.forward(&pose)?;
        let b = model.forward(&pose)?;
        let diff = (a - b)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    fn running_means(varmap: &VarMap) -> Result<Vec<(String, Vec<f32>)>> {
        let data = varmap.data().lock().unwrap();
        let mut stats = data
            .iter()
            .filter(|(name, _)| name.ends_with("running_mean"))
            .map(|(name, var)| Ok((name.clone(), var.as_tensor().flatten_all()?.to_vec1::<f32>()?)))
            .collect::<Result<Vec<_>>>()?;
        stats.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(stats)
    }

    #[test]
    fn test_running_stats_update_only_in_training() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let mut config = ModelConfig::v8(3, 6, 10);
        config.num_frame = 8;
        let model = DylanMtNet::new(config, vb)?;
        let pose = Tensor::randn(0f32, 1.0, (4, 8, 22, 3), &device)?;

        let initial = running_means(&varmap)?;
        assert!(!initial.is_empty());

        model.forward(&pose)?;
        assert_eq!(running_means(&varmap)?, initial);

        model.forward_t(&pose, true)?;
        let trained = running_means(&varmap)?;
        assert_eq!(trained.len(), initial.len());
        assert_ne!(trained, initial);
        Ok(())
    }

    #[test]
    fn test_rejects_pose_with_wrong_joint_count() -> Result<()> {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let mut config = ModelConfig::v8(3, 6, 10);
        config.num_frame = 8;
        let model = DylanMtNet::new(config, vb)?;

        let pose = Tensor::zeros((2, 8, 21, 3), DType::F32, &device)?;
        assert!(matches!(
            model.forward(&pose),
            Err(Error::ShapeMismatch { context: "pose input", .. })
        ));
        Ok(())
    }

    #[test]
    fn test_construction_rejects_bad_head_count() {
        let device = Device::Cpu;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);

        let config = ModelConfig {
            temporal_heads: 4,
            ..ModelConfig::v8(3, 6, 28)
        };
        assert!(matches!(
            DylanMtNet::new(config, vb),
            Err(Error::HeadMismatch { branch: "temporal", .. })
        ));
    }
}
