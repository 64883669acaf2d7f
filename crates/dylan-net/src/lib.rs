//! # Dylan-Net
//!
//! Spatial/temporal self-attention network for skeleton-based action
//! recognition, built on candle.
//!
//! ## Architecture Overview
//!
//! 1. **Input Projection** (optional): 1x1 convolution from raw coordinates
//!    to the embedding width
//! 2. **Positional Encoding**: fixed sinusoidal code over joints or frames
//! 3. **Dual-Axis Blocks**: self-attention across joints on one stream and
//!    across frames on the other
//! 4. **Feature Fusion**: AFF / iAFF gate combining the two streams
//! 5. **Dense Head**: flatten, dense blocks, linear classifier
//!
//! Inputs are pose sequences `[batch, frames, joints, channels]`; outputs
//! are raw class scores `[batch, classes]` for a cross-entropy objective.

pub mod attention;
pub mod block;
pub mod dense;
pub mod encoding;
pub mod fusion;
pub mod inference;
pub mod init;
pub mod loss;
pub mod model;

pub use attention::*;
pub use block::*;
pub use dense::*;
pub use encoding::*;
pub use fusion::*;
pub use inference::*;
pub use init::*;
pub use model::*;
