//! Fixed sinusoidal positional encodings over the (channel, frame, joint) grid.
//!
//! Two domains are supported:
//! - Temporal: the position of every cell is its frame index, so all joints
//!   of a frame share one code.
//! - Spatial: the position is the joint's cell in a 2D skeleton layout; a
//!   2D sinusoid (columns in the first half of the channels, rows in the
//!   second half) is looked up per joint and repeated over time.
//!
//! The table is computed once and never changes; `apply` only slices and adds.

use candle_core::{Device, Tensor};
use dylan_core::{Domain, Error, JointLayout, ModelConfig, Result};

const MAX_PERIOD: f64 = 10000.0;

/// Standard transformer sinusoid for `channel` of a `width`-channel code
fn sinusoid(position: f64, channel: usize, width: usize) -> f32 {
    let exponent = (channel - channel % 2) as f64 / width as f64;
    let angle = position * (-exponent * MAX_PERIOD.ln()).exp();
    if channel % 2 == 0 {
        angle.sin() as f32
    } else {
        angle.cos() as f32
    }
}

pub struct PositionalEncoding {
    /// [1, table_channels, frames, joints]
    table: Tensor,
    domain: Domain,
}

impl PositionalEncoding {
    /// Build the table for `channels` channels, plus one unused channel when `pad_channel` is set.
    pub fn new(
        channels: usize,
        joints: usize,
        frames: usize,
        domain: Domain,
        layout: JointLayout,
        pad_channel: bool,
        device: &Device,
    ) -> Result<Self> {
        let table_channels = channels + usize::from(pad_channel);
        let data = match domain {
            Domain::Temporal => Self::temporal_table(table_channels, joints, frames),
            Domain::Spatial => Self::spatial_table(table_channels, joints, frames, layout)?,
        };
        let table = Tensor::from_vec(data, (1, table_channels, frames, joints), device)?;

        Ok(Self { table, domain })
    }

    pub fn from_config(config: &ModelConfig, device: &Device) -> Result<Self> {
        Self::new(
            config.in_channels,
            config.num_node,
            config.num_frame,
            config.encoding.domain,
            config.joint_layout(),
            config.encoding.pad_channel,
            device,
        )
    }

    fn temporal_table(channels: usize, joints: usize, frames: usize) -> Vec<f32> {
        let mut data = Vec::with_capacity(channels * frames * joints);
        for c in 0..channels {
            for t in 0..frames {
                let value = sinusoid(t as f64, c, channels);
                data.extend(std::iter::repeat(value).take(joints));
            }
        }
        data
    }

    fn spatial_table(
        channels: usize,
        joints: usize,
        frames: usize,
        layout: JointLayout,
    ) -> Result<Vec<f32>> {
        if channels % 4 != 0 {
            return Err(Error::InvalidConfig(format!(
                "2D positional encoding needs channels divisible by 4, got {channels}"
            )));
        }
        let half = channels / 2;

        let cells = (0..joints)
            .map(|j| {
                layout.cell(j).ok_or_else(|| {
                    Error::InvalidConfig(format!("joint {j} has no cell in {layout:?}"))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut data = Vec::with_capacity(channels * frames * joints);
        for c in 0..channels {
            let per_joint: Vec<f32> = cells
                .iter()
                .map(|cell| {
                    if c < half {
                        sinusoid(cell.col as f64, c, half)
                    } else {
                        sinusoid(cell.row as f64, c - half, half)
                    }
                })
                .collect();
            for _ in 0..frames {
                data.extend_from_slice(&per_joint);
            }
        }
        Ok(data)
    }

    /// Add the encoding to `x` of shape [batch, channels, frames, joints].
    ///
    /// Shorter inputs (fewer channels or frames) read a truncated slice of the
    /// table; the joint count must match exactly.
    pub fn apply(&self, x: &Tensor) -> Result<Tensor> {
        let (_batch, channels, frames, joints) = x.dims4()?;
        let (_, table_channels, table_frames, table_joints) = self.table.dims4()?;

        if channels > table_channels || frames > table_frames || joints != table_joints {
            return Err(Error::ShapeMismatch {
                context: "positional encoding",
                expected: vec![table_channels, table_frames, table_joints],
                actual: vec![channels, frames, joints],
            });
        }

        let pe = self
            .table
            .narrow(1, 0, channels)?
            .narrow(2, 0, frames)?
            .to_dtype(x.dtype())?;
        Ok(x.broadcast_add(&pe)?)
    }

    pub fn table(&self) -> &Tensor {
        &self.table
    }

    pub fn domain(&self) -> Domain {
        self.domain
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;
    use dylan_core::HandJoint;

    #[test]
    fn test_temporal_table_values() -> Result<()> {
        let device = Device::Cpu;
        let pe = PositionalEncoding::new(4, 3, 5, Domain::Temporal, JointLayout::Hand, false, &device)?;
        assert_eq!(pe.table().dims(), &[1, 4, 5, 3]);

        let table = pe.table().squeeze(0)?;
        let t = 2.0f64;
        // channel 0: sin(t), channel 1: cos(t), channel 2: sin(t / 10000^(2/4))
        let c0 = table.get(0)?.get(2)?.to_vec1::<f32>()?;
        let c1 = table.get(1)?.get(2)?.to_vec1::<f32>()?;
        let c2 = table.get(2)?.get(2)?.to_vec1::<f32>()?;
        for j in 0..3 {
            assert!((c0[j] - t.sin() as f32).abs() < 1e-6);
            assert!((c1[j] - t.cos() as f32).abs() < 1e-6);
            assert!((c2[j] - (t / 100.0).sin() as f32).abs() < 1e-6);
        }
        Ok(())
    }

    #[test]
    fn test_temporal_table_odd_channels() -> Result<()> {
        let pe = PositionalEncoding::new(3, 2, 4, Domain::Temporal, JointLayout::Hand, false, &Device::Cpu)?;
        assert_eq!(pe.table().dims(), &[1, 3, 4, 2]);
        Ok(())
    }

    #[test]
    fn test_spatial_table_is_constant_over_time() -> Result<()> {
        let device = Device::Cpu;
        let pe = PositionalEncoding::new(16, 22, 8, Domain::Spatial, JointLayout::Hand, false, &device)?;
        let table = pe.table().squeeze(0)?;

        let first = table.narrow(1, 0, 1)?;
        let last = table.narrow(1, 7, 1)?;
        let diff = (first - last)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);

        // wrist and palm share a column, so the column half of their codes matches
        let wrist = table.narrow(2, 0, 1)?.narrow(0, 0, 8)?;
        let palm = table.narrow(2, 1, 1)?.narrow(0, 0, 8)?;
        let diff = (wrist - palm)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert!(diff < 1e-6);
        Ok(())
    }

    #[test]
    fn test_spatial_table_values() -> Result<()> {
        let device = Device::Cpu;
        let pe = PositionalEncoding::new(8, 22, 3, Domain::Spatial, JointLayout::Hand, false, &device)?;
        let table = pe.table().squeeze(0)?;

        // IndexTip sits in row 5, column 1
        let joint = HandJoint::IndexTip as usize;
        let cell = HandJoint::IndexTip.grid_cell();
        assert_eq!((cell.row, cell.col), (5, 1));

        let code: Vec<f32> = (0..8)
            .map(|c| table.get(c)?.get(1)?.get(joint)?.to_scalar::<f32>())
            .collect::<candle_core::Result<_>>()?;
        let expected = [
            1f64.sin(),
            1f64.cos(),
            0.01f64.sin(),
            0.01f64.cos(),
            5f64.sin(),
            5f64.cos(),
            0.05f64.sin(),
            0.05f64.cos(),
        ];
        for (c, (&actual, want)) in code.iter().zip(expected).enumerate() {
            assert!((actual - want as f32).abs() < 1e-6, "channel {c}: {actual} vs {want}");
        }
        Ok(())
    }

    #[test]
    fn test_spatial_table_rejects_bad_channels() {
        let result = PositionalEncoding::new(6, 22, 8, Domain::Spatial, JointLayout::Hand, false, &Device::Cpu);
        assert!(matches!(result, Err(Error::InvalidConfig(_))));

        // padding 3 channels to 4 makes the grid valid
        let result = PositionalEncoding::new(3, 22, 8, Domain::Spatial, JointLayout::Hand, true, &Device::Cpu);
        assert!(result.is_ok());
    }

    #[test]
    fn test_apply_truncates_time_and_is_deterministic() -> Result<()> {
        let device = Device::Cpu;
        let pe = PositionalEncoding::new(4, 22, 64, Domain::Spatial, JointLayout::Hand, false, &device)?;

        let x = Tensor::zeros((2, 4, 10, 22), DType::F32, &device)?;
        let a = pe.apply(&x)?;
        let b = pe.apply(&x)?;
        assert_eq!(a.dims(), &[2, 4, 10, 22]);

        let diff = (&a - &b)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);

        let expected = pe.table().narrow(2, 0, 10)?.squeeze(0)?;
        let diff = (a.get(1)? - expected)?.abs()?.max_all()?.to_scalar::<f32>()?;
        assert_eq!(diff, 0.0);
        Ok(())
    }

    #[test]
    fn test_apply_slices_padded_channel() -> Result<()> {
        let device = Device::Cpu;
        let pe = PositionalEncoding::new(3, 22, 16, Domain::Spatial, JointLayout::Hand, true, &device)?;
        assert_eq!(pe.table().dim(1)?, 4);

        let x = Tensor::ones((1, 3, 16, 22), DType::F32, &device)?;
        assert_eq!(pe.apply(&x)?.dims(), &[1, 3, 16, 22]);
        Ok(())
    }

    #[test]
    fn test_apply_rejects_longer_input() -> Result<()> {
        let device = Device::Cpu;
        let pe = PositionalEncoding::new(4, 22, 8, Domain::Temporal, JointLayout::Hand, false, &device)?;
        let x = Tensor::zeros((1, 4, 9, 22), DType::F32, &device)?;
        assert!(matches!(pe.apply(&x), Err(Error::ShapeMismatch { .. })));
        Ok(())
    }
}
