//! # Dylan-Core
//!
//! Configuration, error and skeleton types for the Dylan MT-Net
//! skeleton-based action recognition model.

pub mod config;
pub mod error;
pub mod types;

pub use config::*;
pub use error::{Error, Result};
pub use types::*;
