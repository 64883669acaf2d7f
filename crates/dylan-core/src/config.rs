//! Model configuration and the two published presets.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::types::{Domain, JointLayout};

/// How the dual-axis block folds channels into the attention views
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeatureLayout {
    /// Channels join the feature axis: spatial `[B, J, T*C]`, temporal `[B, T, J*C]`
    Merged,
    /// Channels join the sequence axis: spatial `[B, J*C, T]`, temporal `[B, T*C, J]`
    PerChannel,
}

/// Fusion gate used to combine the spatial and temporal streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FusionKind {
    Aff,
    Iaff,
}

/// Parameter initialisation applied to the attention blocks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InitScheme {
    /// candle-nn defaults
    Framework,
    /// Xavier-normal linears with zero bias
    Reference,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncodingConfig {
    pub domain: Domain,
    /// Build the table with one extra channel and add only the first `in_channels`
    pub pad_channel: bool,
    /// Joint placement for the spatial domain; derived from the joint count when absent
    pub layout: Option<JointLayout>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    pub kind: FusionKind,
    /// Width of the bottleneck between the two 1x1 convolutions
    pub inter_channels: usize,
}

/// Complete model configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    /// Channels of the raw pose (x, y, z)
    pub raw_channels: usize,
    /// Embedding width the attention blocks run at
    pub in_channels: usize,
    pub out_channels: usize,
    pub num_class: usize,
    pub num_node: usize,
    pub num_frame: usize,
    pub n_layers: usize,
    pub spatial_heads: usize,
    pub temporal_heads: usize,
    pub dropout: f64,
    /// 1x1 convolution lifting `raw_channels` to `in_channels`
    pub input_projection: bool,
    pub encoding: EncodingConfig,
    pub feature_layout: FeatureLayout,
    pub fusion: FusionConfig,
    /// Max-pool kernel over time applied after fusion
    pub time_pool: Option<usize>,
    pub dense_widths: Vec<usize>,
    pub dense_dropout: f64,
    pub block_init: InitScheme,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::v5(16, 64, 28)
    }
}

impl ModelConfig {
    pub const DEFAULT_NODES: usize = 22;
    pub const DEFAULT_FRAMES: usize = 64;
    pub const RAW_CHANNELS: usize = 3;

    /// Six merged-layout blocks, input projection, AFF with a 1/4 bottleneck
    pub fn v5(in_channels: usize, out_channels: usize, num_class: usize) -> Self {
        let heads = 16;
        Self {
            raw_channels: Self::RAW_CHANNELS,
            in_channels,
            out_channels,
            num_class,
            num_node: Self::DEFAULT_NODES,
            num_frame: Self::DEFAULT_FRAMES,
            n_layers: 6,
            spatial_heads: heads,
            temporal_heads: heads / 2,
            dropout: 0.01,
            input_projection: true,
            encoding: EncodingConfig {
                domain: Domain::Spatial,
                pad_channel: false,
                layout: None,
            },
            feature_layout: FeatureLayout::Merged,
            fusion: FusionConfig {
                kind: FusionKind::Aff,
                inter_channels: in_channels / 4,
            },
            time_pool: None,
            dense_widths: vec![256, 128],
            dense_dropout: 0.01,
            block_init: InitScheme::Framework,
        }
    }

    /// Two per-channel blocks on the raw pose, AFF widening to `out_channels`, time pooling
    pub fn v8(in_channels: usize, out_channels: usize, num_class: usize) -> Self {
        Self {
            raw_channels: in_channels,
            in_channels,
            out_channels,
            num_class,
            num_node: Self::DEFAULT_NODES,
            num_frame: Self::DEFAULT_FRAMES,
            n_layers: 2,
            spatial_heads: 4,
            // 22 joints split into heads of 11
            temporal_heads: 2,
            dropout: 0.05,
            input_projection: false,
            encoding: EncodingConfig {
                domain: Domain::Spatial,
                pad_channel: true,
                layout: None,
            },
            feature_layout: FeatureLayout::PerChannel,
            fusion: FusionConfig {
                kind: FusionKind::Aff,
                inter_channels: out_channels,
            },
            time_pool: Some(2),
            dense_widths: vec![512, 128, 128],
            dense_dropout: 0.2,
            block_init: InitScheme::Reference,
        }
    }

    /// Channel count of the tensor handed to `forward`
    pub fn input_channels(&self) -> usize {
        if self.input_projection {
            self.raw_channels
        } else {
            self.in_channels
        }
    }

    /// Channel count of the positional table before slicing
    pub fn encoding_channels(&self) -> usize {
        self.in_channels + usize::from(self.encoding.pad_channel)
    }

    pub fn joint_layout(&self) -> JointLayout {
        self.encoding
            .layout
            .unwrap_or_else(|| JointLayout::for_joint_count(self.num_node))
    }

    /// (sequence, features) of the spatial attention view
    pub fn spatial_view(&self) -> (usize, usize) {
        match self.feature_layout {
            FeatureLayout::Merged => (self.num_node, self.num_frame * self.in_channels),
            FeatureLayout::PerChannel => (self.num_node * self.in_channels, self.num_frame),
        }
    }

    /// (sequence, features) of the temporal attention view
    pub fn temporal_view(&self) -> (usize, usize) {
        match self.feature_layout {
            FeatureLayout::Merged => (self.num_frame, self.num_node * self.in_channels),
            FeatureLayout::PerChannel => (self.num_frame * self.in_channels, self.num_node),
        }
    }

    pub fn pooled_frames(&self) -> usize {
        self.time_pool
            .map_or(self.num_frame, |pool| self.num_frame / pool)
    }

    /// Width of the flattened fused tensor entering the dense stack
    pub fn flattened_features(&self) -> usize {
        self.in_channels * self.pooled_frames() * self.num_node
    }

    /// Width of the vector entering the classifier
    pub fn classifier_features(&self) -> usize {
        self.dense_widths
            .last()
            .copied()
            .unwrap_or_else(|| self.flattened_features())
    }

    pub fn validate(&self) -> Result<()> {
        let dims = [
            ("raw_channels", self.raw_channels),
            ("in_channels", self.in_channels),
            ("num_class", self.num_class),
            ("num_node", self.num_node),
            ("num_frame", self.num_frame),
            ("spatial_heads", self.spatial_heads),
            ("temporal_heads", self.temporal_heads),
            ("fusion.inter_channels", self.fusion.inter_channels),
        ];
        if let Some((name, _)) = dims.iter().find(|(_, v)| *v == 0) {
            return Err(Error::InvalidConfig(format!("{name} must be positive")));
        }

        let (_, spatial_features) = self.spatial_view();
        if spatial_features % self.spatial_heads != 0 {
            return Err(Error::HeadMismatch {
                branch: "spatial",
                features: spatial_features,
                heads: self.spatial_heads,
            });
        }
        let (_, temporal_features) = self.temporal_view();
        if temporal_features % self.temporal_heads != 0 {
            return Err(Error::HeadMismatch {
                branch: "temporal",
                features: temporal_features,
                heads: self.temporal_heads,
            });
        }

        if self.encoding.domain == Domain::Spatial {
            if self.encoding_channels() % 4 != 0 {
                return Err(Error::InvalidConfig(format!(
                    "spatial encoding needs a channel count divisible by 4, got {}",
                    self.encoding_channels()
                )));
            }
            let layout = self.joint_layout();
            if layout.capacity() < self.num_node {
                return Err(Error::InvalidConfig(format!(
                    "joint layout holds {} joints, model declares {}",
                    layout.capacity(),
                    self.num_node
                )));
            }
            if let Some(joint) = (0..self.num_node).find(|&j| layout.cell(j).is_none()) {
                return Err(Error::InvalidConfig(format!(
                    "joint {joint} has no cell in the joint layout"
                )));
            }
        }

        if let Some(pool) = self.time_pool {
            if pool == 0 || pool > self.num_frame {
                return Err(Error::InvalidConfig(format!(
                    "time pool {pool} does not fit {} frames",
                    self.num_frame
                )));
            }
        }

        for p in [self.dropout, self.dense_dropout] {
            if !(0.0..1.0).contains(&p) {
                return Err(Error::InvalidConfig(format!(
                    "dropout probability {p} outside [0, 1)"
                )));
            }
        }

        Ok(())
    }

    /// Load configuration from file, with `DYLAN_` environment overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(Self::environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Load from environment variables
    pub fn from_env() -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(Self::environment())
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix("DYLAN")
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}
