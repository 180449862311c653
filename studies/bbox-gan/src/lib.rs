//! Conditional GAN that predicts the 11th bounding box of a tracked object
//! from its ten previous boxes.
//!
//! - `data`: samples, provenance, batch sampling and (un)normalization.
//! - `model`: generator, discriminator and the composite view used to train
//!   the generator against a frozen discriminator.
//! - `train`: the alternating adversarial training loop.
//! - `eval`: discriminator probe and the per-sample evaluation harness.
//! - `config`: run configuration loaded from JSON.
//! - `utils`: losses, learning-rate schedule and frame rendering.

pub mod config;
pub mod data;
pub mod eval;
pub mod model;
pub mod train;
pub mod utils;

/// Backend used for inference (NdArray by default; WGPU if enabled).
#[cfg(feature = "backend-wgpu")]
pub type GanBackend = burn_wgpu::Wgpu;
#[cfg(not(feature = "backend-wgpu"))]
pub type GanBackend = burn::backend::NdArray<f32>;

/// Backend used for training.
pub type TrainBackend = burn::backend::Autodiff<GanBackend>;
