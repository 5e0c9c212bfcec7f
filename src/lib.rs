//! Command-stream builders and DRM submission helpers for validating amdgpu
//! and i915 kernel drivers.

pub mod amdgpu;
pub mod aperture;
pub mod config;
pub mod drm;
pub mod error;
pub mod intel;
pub mod utils;

pub use config::IgtConfig;
pub use error::{IgtError, IgtResult};
