//! Classifier engine: owns the parameters, runs the model and decodes scores.

use std::path::Path;

use candle_core::{DType, Device, Tensor, D};
use candle_nn::{VarBuilder, VarMap};
use dylan_core::{Error, ModelConfig, Result};
use serde::{Deserialize, Serialize};

use crate::model::DylanMtNet;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeviceType {
    Cpu,
    Cuda(usize),
    Metal,
}

impl DeviceType {
    pub fn device(&self) -> Result<Device> {
        Ok(match *self {
            DeviceType::Cpu => Device::Cpu,
            DeviceType::Cuda(ordinal) => Device::new_cuda(ordinal)?,
            DeviceType::Metal => Device::new_metal(0)?,
        })
    }
}

/// Most likely class for one sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub class: usize,
    pub confidence: f32,
}

/// Parameter inventory of a constructed model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelSummary {
    /// Scalars updated by the optimizer
    pub trainable: usize,
    /// Batch-norm running statistics
    pub buffers: usize,
    /// Number of named tensors
    pub tensors: usize,
}

impl ModelSummary {
    pub fn total(&self) -> usize {
        self.trainable + self.buffers
    }
}

pub struct Classifier {
    model: DylanMtNet,
    varmap: VarMap,
    device: Device,
}

impl Classifier {
    /// Create a classifier with freshly initialised weights
    pub fn new_random(config: ModelConfig, device: DeviceType) -> Result<Self> {
        let device = device.device()?;
        let varmap = VarMap::new();
        let vb = VarBuilder::from_varmap(&varmap, DType::F32, &device);
        let model = DylanMtNet::new(config, vb)?;

        let classifier = Self {
            model,
            varmap,
            device,
        };
        let summary = classifier.summary();
        tracing::info!(
            trainable = summary.trainable,
            buffers = summary.buffers,
            tensors = summary.tensors,
            "classifier ready"
        );
        Ok(classifier)
    }

    /// Build the model for `config` and load its weights from a safetensors checkpoint
    pub fn load<P: AsRef<Path>>(path: P, config: ModelConfig, device: DeviceType) -> Result<Self> {
        let mut classifier = Self::new_random(config, device)?;
        classifier
            .varmap
            .load(path.as_ref())
            .map_err(|e| Error::ModelLoad(format!("{}: {e}", path.as_ref().display())))?;
        tracing::info!(path = %path.as_ref().display(), "checkpoint loaded");
        Ok(classifier)
    }

    /// Write all parameters and running statistics as safetensors
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        self.varmap.save(path.as_ref())?;
        tracing::info!(path = %path.as_ref().display(), "checkpoint saved");
        Ok(())
    }

    /// Raw class scores for `pose` of shape [batch, frames, joints, channels]
    pub fn logits(&self, pose: &Tensor) -> Result<Tensor> {
        let pose = pose.to_device(&self.device)?.to_dtype(DType::F32)?;
        self.model.forward(&pose)
    }

    pub fn probabilities(&self, pose: &Tensor) -> Result<Tensor> {
        let logits = self.logits(pose)?;
        Ok(candle_nn::ops::softmax(&logits, D::Minus1)?)
    }

    /// Arg-max class and its softmax probability for every sample in the batch
    pub fn predict(&self, pose: &Tensor) -> Result<Vec<Prediction>> {
        let probs = self.probabilities(pose)?.to_vec2::<f32>()?;

        Ok(probs
            .iter()
            .map(|row| {
                let (class, confidence) = row
                    .iter()
                    .copied()
                    .enumerate()
                    .fold((0, f32::NEG_INFINITY), |best, (i, p)| {
                        if p > best.1 {
                            (i, p)
                        } else {
                            best
                        }
                    });
                Prediction { class, confidence }
            })
            .collect())
    }

    pub fn summary(&self) -> ModelSummary {
        let data = match self.varmap.data().lock() {
            Ok(data) => data,
            Err(poisoned) => poisoned.into_inner(),
        };

        let mut summary = ModelSummary {
            trainable: 0,
            buffers: 0,
            tensors: data.len(),
        };
        for (name, var) in data.iter() {
            if name.ends_with("running_mean") || name.ends_with("running_var") {
                summary.buffers += var.elem_count();
            } else {
                summary.trainable += var.elem_count();
            }
        }
        summary
    }

    pub fn model(&self) -> &DylanMtNet {
        &self.model
    }

    /// Parameters for an external optimizer
    pub fn varmap(&self) -> &VarMap {
        &self.varmap
    }

    pub fn device(&self) -> &Device {
        &self.device
    }
}
